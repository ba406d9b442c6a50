//! Loads the social feed from the HAT's Facebook and Twitter plugs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use hatsync::{
    FeedCursor, FeedFilter, FeedItem, FeedSource, HatError, OptionExt, PageRequest, SocialFeed,
    oldest_created_at, parse_page,
};
use log::{info, warn};

use crate::http::FeedPage;
use crate::walker::TokenStore;

/// Upper bound on request rounds per refresh
const MAX_PAGES_PER_REFRESH: usize = 20;

/// Fetches pages for several plugs in one round.
pub trait FeedFetcher: Send + Sync {
    fn fetch_pages(
        &self,
        token: &str,
        requests: &[(FeedSource, PageRequest)],
    ) -> Vec<(FeedSource, hatsync::Result<FeedPage>)>;
}

pub struct FeedLoader {
    fetcher: Arc<dyn FeedFetcher>,
    tokens: Arc<dyn TokenStore>,
    feed: Mutex<SocialFeed>,
    cursors: Mutex<HashMap<FeedSource, FeedCursor>>,
}

impl FeedLoader {
    pub fn new(fetcher: Arc<dyn FeedFetcher>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            fetcher,
            tokens,
            feed: Mutex::new(SocialFeed::new()),
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Walk each source back in time until a short page, merging new items.
    ///
    /// Returns the number of items added. A source that fails is skipped;
    /// the error is returned only if nothing was loaded at all.
    pub fn refresh(&self, sources: &[FeedSource]) -> hatsync::Result<usize> {
        let mut token = self.tokens.token().ok_or_auth_expired()?;
        let mut active: Vec<FeedSource> = sources.to_vec();
        let mut added = 0;
        let mut first_error = None;

        for _ in 0..MAX_PAGES_PER_REFRESH {
            if active.is_empty() {
                break;
            }
            let requests = self.requests_for(&active)?;
            let mut next = Vec::new();

            for (source, result) in self.fetcher.fetch_pages(&token, &requests) {
                let page = match result {
                    Ok(page) => page,
                    Err(e) if e.is_auth_expired() => return Err(e),
                    Err(e) => {
                        warn!("[FeedLoader] {:?} fetch failed: {}", source, e);
                        first_error.get_or_insert(e);
                        continue;
                    }
                };

                if let Some(renewed) = page.renewed_token {
                    self.tokens.set_token(renewed.clone());
                    token = renewed;
                }

                let items = parse_page(source, &page.records);
                let oldest = oldest_created_at(&items);
                added += self.lock_feed()?.extend(items);

                let more = self
                    .cursors
                    .lock()
                    .map_err(|_| HatError::feed("cursor lock poisoned"))?
                    .entry(source)
                    .or_default()
                    .advance(page.records.len(), oldest);
                if more {
                    next.push(source);
                }
            }
            active = next;
        }

        info!("[FeedLoader] Refresh added {} items", added);
        match first_error {
            Some(e) if added == 0 => Err(e),
            _ => Ok(added),
        }
    }

    fn requests_for(&self, sources: &[FeedSource]) -> hatsync::Result<Vec<(FeedSource, PageRequest)>> {
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| HatError::feed("cursor lock poisoned"))?;
        Ok(sources
            .iter()
            .map(|s| (*s, cursors.entry(*s).or_default().request()))
            .collect())
    }

    fn lock_feed(&self) -> hatsync::Result<std::sync::MutexGuard<'_, SocialFeed>> {
        self.feed
            .lock()
            .map_err(|_| HatError::feed("feed lock poisoned"))
    }

    pub fn items(&self, filter: FeedFilter) -> Vec<FeedItem> {
        self.lock_feed()
            .map(|feed| feed.items(filter))
            .unwrap_or_default()
    }

    /// Forget loaded items and pagination state.
    pub fn clear(&self) {
        if let Ok(mut feed) = self.feed.lock() {
            feed.clear();
        }
        if let Ok(mut cursors) = self.cursors.lock() {
            cursors.clear();
        }
    }
}
