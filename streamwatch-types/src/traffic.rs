//! Traffic samples.

/// One traffic reading. The backend already reports rates, in bytes per
/// second, so consumers display these as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrafficSample {
    /// Upload rate (bytes/s).
    pub up: u64,
    /// Download rate (bytes/s).
    pub down: u64,
}

impl TrafficSample {
    pub fn new(up: u64, down: u64) -> Self {
        Self { up, down }
    }
}
