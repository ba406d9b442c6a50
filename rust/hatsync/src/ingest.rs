//! Ingest policy: decides which location fixes become stored samples.
//!
//! Checks run cheapest first: validity of the measurement, then the accuracy
//! bound, then the optional distance filter against the last accepted sample.

use log::debug;

use crate::config::LocationPreferences;
use crate::error::{FixRejection, HatError, Result};
use crate::geo_utils::{haversine_distance, is_valid_coordinate};
use crate::types::{LocationFix, LocationSample};

/// Accuracy and distance rules applied to every incoming fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestPolicy {
    preferences: LocationPreferences,
}

impl IngestPolicy {
    pub fn new(preferences: LocationPreferences) -> Self {
        Self { preferences }
    }

    pub fn preferences(&self) -> &LocationPreferences {
        &self.preferences
    }

    /// Accept or reject a fix.
    ///
    /// `last_accepted` is only consulted when a distance filter is set.
    pub fn check(&self, fix: &LocationFix, last_accepted: Option<&LocationSample>) -> Result<()> {
        if let Err(reason) = self.evaluate(fix, last_accepted) {
            debug!(
                "[IngestPolicy] Rejected fix ({:.5}, {:.5}) acc={:.1}: {}",
                fix.latitude, fix.longitude, fix.horizontal_accuracy, reason
            );
            return Err(HatError::InvalidFix { reason });
        }
        Ok(())
    }

    fn evaluate(
        &self,
        fix: &LocationFix,
        last_accepted: Option<&LocationSample>,
    ) -> std::result::Result<(), FixRejection> {
        let accuracy = fix.horizontal_accuracy;

        if !accuracy.is_finite() || !fix.latitude.is_finite() || !fix.longitude.is_finite() {
            return Err(FixRejection::NonFinite);
        }
        if accuracy < 0.0 {
            return Err(FixRejection::NegativeAccuracy { accuracy });
        }
        if !is_valid_coordinate(fix.latitude, fix.longitude) {
            return Err(FixRejection::CoordinatesOutOfRange {
                latitude: fix.latitude,
                longitude: fix.longitude,
            });
        }
        if accuracy > self.preferences.desired_accuracy {
            return Err(FixRejection::AccuracyAboveThreshold {
                accuracy,
                threshold: self.preferences.desired_accuracy,
            });
        }

        if let (Some(filter), Some(last)) = (self.preferences.distance_filter, last_accepted) {
            let distance =
                haversine_distance(last.latitude, last.longitude, fix.latitude, fix.longitude);
            if distance < filter {
                return Err(FixRejection::WithinDistanceFilter { distance, filter });
            }
        }

        Ok(())
    }
}

/// The platform may batch several fixes; only the newest one is ingested.
pub fn latest_fix(fixes: &[LocationFix]) -> Option<&LocationFix> {
    fixes.last()
}
