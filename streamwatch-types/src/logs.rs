//! Log records and severity filtering.

use core::fmt;
use core::str::FromStr;

/// Severity of a single log line, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LogLevel {
    Debug,
    Info,
    #[cfg_attr(feature = "serde", serde(alias = "warn"))]
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum severity a log subscription accepts.
///
/// A level accepts itself and everything more severe. `Silent` accepts
/// nothing and `All` accepts everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Severity {
    All,
    Debug,
    #[default]
    Info,
    #[cfg_attr(feature = "serde", serde(alias = "warn"))]
    Warning,
    Error,
    Silent,
}

impl Severity {
    /// Whether a line of the given level passes this filter.
    pub fn accepts(&self, level: LogLevel) -> bool {
        match self {
            Severity::All => true,
            Severity::Silent => false,
            Severity::Debug => level >= LogLevel::Debug,
            Severity::Info => level >= LogLevel::Info,
            Severity::Warning => level >= LogLevel::Warning,
            Severity::Error => level >= LogLevel::Error,
        }
    }

    /// The value the backend expects for its `level` channel parameter.
    ///
    /// The backend has no notion of `all`; its most verbose level is
    /// `debug`, which already admits every line.
    pub fn as_param(&self) -> &'static str {
        match self {
            Severity::All | Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Silent => "silent",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::All => "all",
            other => other.as_param(),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown severity name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSeverity(pub String);

impl fmt::Display for UnknownSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown severity: {}", self.0)
    }
}

impl std::error::Error for UnknownSeverity {}

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Severity::All),
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "silent" => Ok(Severity::Silent),
            _ => Err(UnknownSeverity(s.to_string())),
        }
    }
}

/// One line of backend log output.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogRecord {
    /// Wall-clock time the line was received, already formatted for display.
    #[cfg_attr(feature = "serde", serde(default))]
    pub time: String,

    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub level: LogLevel,

    pub payload: String,
}

impl LogRecord {
    pub fn new(time: impl Into<String>, level: LogLevel, payload: impl Into<String>) -> Self {
        Self {
            time: time.into(),
            level,
            payload: payload.into(),
        }
    }
}
