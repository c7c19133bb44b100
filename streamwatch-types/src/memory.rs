//! Memory samples.

/// Memory usage of the backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemorySample {
    /// Bytes currently in use.
    pub inuse: u64,

    /// Memory limit imposed by the OS, when the backend reports one.
    #[cfg_attr(feature = "serde", serde(default))]
    pub oslimit: u64,
}

impl MemorySample {
    pub fn new(inuse: u64) -> Self {
        Self { inuse, oslimit: 0 }
    }
}
