//! Wall-clock time primitive.
//!
//! Milliseconds since the Unix epoch. The ordering primitive for the
//! engine is the per-entity version counter; `WallClock` is the
//! merge tiebreaker and the stamp carried on every entity write.

use serde::{Deserialize, Serialize};

/// Wall clock in milliseconds since the Unix epoch.
///
/// Copy is fine here - it's just a measurement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WallClock(pub u64);

impl WallClock {
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }
}
