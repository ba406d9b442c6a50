//! Social feed aggregation for Facebook and Twitter data plugs.
//!
//! The HAT returns plug data as generic records. This module parses them into
//! a tagged union, de-duplicates per network, merges both networks newest
//! first and tracks the pagination cursor used to walk back in time.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{HatError, Result};

/// First page size for a network
pub const INITIAL_PAGE_LIMIT: u32 = 50;
/// Page size once the first page came back full
pub const EXPANDED_PAGE_LIMIT: u32 = 500;

// ============================================================================
// Sources & Filters
// ============================================================================

/// A data plug that feeds social posts into the HAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSource {
    Facebook,
    Twitter,
}

impl FeedSource {
    /// Path of the plug's data endpoint under `/api/v2.6/data/`.
    pub fn endpoint(&self) -> &'static str {
        match self {
            FeedSource::Facebook => "facebook/feed",
            FeedSource::Twitter => "twitter/tweets",
        }
    }
}

/// Which networks the merged feed shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFilter {
    #[default]
    All,
    Facebook,
    Twitter,
}

impl FeedFilter {
    pub fn includes(&self, source: FeedSource) -> bool {
        match self {
            FeedFilter::All => true,
            FeedFilter::Facebook => source == FeedSource::Facebook,
            FeedFilter::Twitter => source == FeedSource::Twitter,
        }
    }
}

// ============================================================================
// Feed Items
// ============================================================================

/// A generic HAT data record as returned by the data API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HatRecord {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub record_id: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookPost {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub message: String,
    pub story: String,
    pub description: String,
    pub link: String,
    /// "status", "photo", "link", ...
    pub kind: String,
    pub author: Option<String>,
}

impl FacebookPost {
    /// Best available body text: message, then story, then description.
    pub fn text(&self) -> &str {
        [&self.message, &self.story, &self.description]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn is_photo(&self) -> bool {
        self.kind == "photo"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tweet {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub screen_name: Option<String>,
}

/// One entry of the merged social feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FeedItem {
    Facebook(FacebookPost),
    Twitter(Tweet),
}

impl FeedItem {
    /// Common ordering key across networks.
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            FeedItem::Facebook(p) => p.created_at,
            FeedItem::Twitter(t) => t.created_at,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            FeedItem::Facebook(p) => &p.id,
            FeedItem::Twitter(t) => &t.id,
        }
    }

    pub fn source(&self) -> FeedSource {
        match self {
            FeedItem::Facebook(_) => FeedSource::Facebook,
            FeedItem::Twitter(_) => FeedSource::Twitter,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            FeedItem::Facebook(p) => p.text(),
            FeedItem::Twitter(t) => &t.text,
        }
    }

    /// Parse a HAT record coming from `source`'s endpoint.
    pub fn from_record(source: FeedSource, record: &HatRecord) -> Result<Self> {
        match source {
            FeedSource::Facebook => parse_facebook(&record.data).map(FeedItem::Facebook),
            FeedSource::Twitter => parse_tweet(&record.data).map(FeedItem::Twitter),
        }
        .map_err(|e| HatError::feed(format!("record {}: {}", record.record_id, e)))
    }
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawFacebookPost {
    id: String,
    created_time: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    story: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    link: String,
    #[serde(rename = "type", default)]
    kind: String,
    from: Option<RawAuthor>,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    screen_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTweet {
    id_str: Option<String>,
    id: Option<serde_json::Value>,
    created_at: String,
    #[serde(default)]
    text: String,
    user: Option<RawUser>,
}

fn parse_facebook(data: &serde_json::Value) -> std::result::Result<FacebookPost, String> {
    let raw: RawFacebookPost = serde_json::from_value(data.clone()).map_err(|e| e.to_string())?;
    let created_at = parse_facebook_time(&raw.created_time)
        .ok_or_else(|| format!("bad created_time '{}'", raw.created_time))?;

    Ok(FacebookPost {
        id: raw.id,
        created_at,
        message: raw.message,
        story: raw.story,
        description: raw.description,
        link: raw.link,
        kind: raw.kind,
        author: raw.from.and_then(|a| a.name),
    })
}

fn parse_tweet(data: &serde_json::Value) -> std::result::Result<Tweet, String> {
    let raw: RawTweet = serde_json::from_value(data.clone()).map_err(|e| e.to_string())?;
    let id = match (raw.id_str, raw.id) {
        (Some(id), _) => id,
        (None, Some(serde_json::Value::String(id))) => id,
        (None, Some(serde_json::Value::Number(id))) => id.to_string(),
        _ => return Err("tweet without id".to_string()),
    };
    let created_at = parse_twitter_time(&raw.created_at)
        .ok_or_else(|| format!("bad created_at '{}'", raw.created_at))?;

    Ok(Tweet {
        id,
        created_at,
        text: raw.text,
        screen_name: raw.user.and_then(|u| u.screen_name),
    })
}

/// Graph API style `2017-03-14T10:00:00+0000`, RFC 3339 accepted too.
fn parse_facebook_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Twitter style `Wed Aug 27 13:08:45 +0000 2008`.
fn parse_twitter_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a page of records, skipping (and logging) malformed ones.
pub fn parse_page(source: FeedSource, records: &[HatRecord]) -> Vec<FeedItem> {
    records
        .iter()
        .filter_map(|record| match FeedItem::from_record(source, record) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("[SocialFeed] Skipping {:?} record: {}", source, e);
                None
            }
        })
        .collect()
}

// ============================================================================
// Aggregated Feed
// ============================================================================

/// De-duplicated, merged feed across networks.
#[derive(Debug, Clone, Default)]
pub struct SocialFeed {
    items: Vec<FeedItem>,
    seen: HashSet<(FeedSource, String)>,
}

impl SocialFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add items, ignoring any already present. Returns how many were new.
    pub fn extend(&mut self, items: impl IntoIterator<Item = FeedItem>) -> usize {
        let before = self.items.len();
        for item in items {
            if self.seen.insert((item.source(), item.id().to_string())) {
                self.items.push(item);
            }
        }
        self.sort();
        let added = self.items.len() - before;
        debug!(
            "[SocialFeed] Added {} items ({} total)",
            added,
            self.items.len()
        );
        added
    }

    /// Newest first; ties broken by id so the order is stable.
    fn sort(&mut self) {
        self.items.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
    }

    pub fn items(&self, filter: FeedFilter) -> Vec<FeedItem> {
        self.items
            .iter()
            .filter(|item| filter.includes(item.source()))
            .cloned()
            .collect()
    }

    pub fn count(&self, filter: FeedFilter) -> usize {
        self.items
            .iter()
            .filter(|item| filter.includes(item.source()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.seen.clear();
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Query for one page of a plug's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub start_time: i64,
    /// Unix seconds; only records older than this are returned
    pub end_time: Option<i64>,
}

impl PageRequest {
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("limit", self.limit.to_string()),
            ("starttime", self.start_time.to_string()),
        ];
        if let Some(end) = self.end_time {
            params.push(("endtime", end.to_string()));
        }
        params
    }
}

/// Walks a plug's records backwards in time, one page per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCursor {
    limit: u32,
    end_time: Option<i64>,
}

impl Default for FeedCursor {
    fn default() -> Self {
        Self {
            limit: INITIAL_PAGE_LIMIT,
            end_time: None,
        }
    }
}

impl FeedCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) -> PageRequest {
        PageRequest {
            limit: self.limit,
            start_time: 0,
            end_time: self.end_time,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn end_time(&self) -> Option<i64> {
        self.end_time
    }

    /// Move past a page. Returns whether another page should be requested.
    ///
    /// `raw_count` is the number of records the server returned, before
    /// de-duplication. `oldest` is the oldest parsed item on the page.
    /// A short page ends the walk and clears the end time; the expanded
    /// limit is kept for later refreshes.
    pub fn advance(&mut self, raw_count: usize, oldest: Option<DateTime<Utc>>) -> bool {
        let full_page = raw_count >= self.limit as usize;

        match (full_page, oldest) {
            (true, Some(oldest)) => {
                let next_end = oldest.timestamp();
                if self.end_time.is_some_and(|prev| next_end >= prev) {
                    debug!(
                        "[FeedCursor] End time stuck at {}, stopping",
                        next_end
                    );
                    self.end_time = None;
                    return false;
                }
                self.end_time = Some(next_end);
                self.limit = EXPANDED_PAGE_LIMIT;
                true
            }
            _ => {
                self.end_time = None;
                false
            }
        }
    }
}

/// Oldest creation time on a page.
pub fn oldest_created_at(items: &[FeedItem]) -> Option<DateTime<Utc>> {
    items.iter().map(FeedItem::created_at).min()
}
