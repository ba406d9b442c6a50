//! Deterministic location trails for tests and stress runs.
//!
//! Enabled with the `synthetic` feature. The same scenario always produces the
//! same fixes, so store and walker tests can assert exact counts.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::types::LocationFix;

/// Meters per degree of latitude
const METERS_PER_DEGREE: f64 = 111_320.0;

/// A walk along a straight heading with jittered accuracy.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticTrail {
    pub start_lat: f64,
    pub start_lon: f64,
    /// Degrees clockwise from north
    pub heading: f64,
    /// Distance between consecutive fixes (meters)
    pub step_meters: f64,
    pub interval: Duration,
    pub start: DateTime<Utc>,
    /// Accuracy values are drawn from `[min, max]`
    pub accuracy_range: (f64, f64),
    pub seed: u64,
}

impl Default for SyntheticTrail {
    fn default() -> Self {
        Self {
            start_lat: 51.5074,
            start_lon: -0.1278,
            heading: 45.0,
            step_meters: 25.0,
            interval: Duration::seconds(10),
            start: Utc
                .timestamp_opt(1_700_000_000, 0)
                .single()
                .unwrap_or_else(Utc::now),
            accuracy_range: (3.0, 15.0),
            seed: 42,
        }
    }
}

impl SyntheticTrail {
    /// Generate `count` fixes in capture order.
    pub fn generate(&self, count: usize) -> Vec<LocationFix> {
        let mut rng = Lcg::new(self.seed);
        let heading = self.heading.to_radians();
        let (min_acc, max_acc) = self.accuracy_range;

        (0..count)
            .map(|i| {
                let dist = self.step_meters * i as f64;
                let lat = self.start_lat + dist * heading.cos() / METERS_PER_DEGREE;
                let lon = self.start_lon
                    + dist * heading.sin()
                        / (METERS_PER_DEGREE * self.start_lat.to_radians().cos());
                let accuracy = min_acc + rng.next_f64() * (max_acc - min_acc);
                LocationFix::new(lat, lon, accuracy, self.start + self.interval * i as i32)
            })
            .collect()
    }

    /// Like [`generate`](Self::generate), but every `nth` fix has an accuracy
    /// of `bad_accuracy` so ingest filtering can be exercised.
    pub fn generate_with_noise(&self, count: usize, nth: usize, bad_accuracy: f64) -> Vec<LocationFix> {
        let mut fixes = self.generate(count);
        if nth > 0 {
            for fix in fixes.iter_mut().skip(nth - 1).step_by(nth) {
                fix.horizontal_accuracy = bad_accuracy;
            }
        }
        fixes
    }
}

/// Minimal linear congruential generator (Knuth MMIX constants).
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}
