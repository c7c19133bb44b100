//! # streamwatch-types
//!
//! Payload types for the live streams a proxy core pushes to its
//! controller clients. Each stream has one shape:
//!
//! - **traffic**: [`TrafficSample`], instantaneous up/down rates
//! - **memory**: [`MemorySample`], in-use bytes
//! - **connections**: [`ConnectionsSnapshot`], the full set of open
//!   connections with cumulative byte counters
//! - **logs**: [`LogRecord`], one line of core output with its [`LogLevel`]
//!
//! The types are plain data. Enable the `serde` feature to decode them from
//! the JSON documents the backend sends.
//!
//! ## Example
//!
//! ```rust
//! use streamwatch_types::{ConnectionsSnapshot, LogLevel, Severity};
//!
//! let snapshot = ConnectionsSnapshot::builder()
//!     .connection("c1", |c| c.upload(100).download(200).host("example.com"))
//!     .connection("c2", |c| c.upload(5))
//!     .build();
//!
//! assert_eq!(snapshot.len(), 2);
//! assert_eq!(snapshot.upload_total, 105);
//!
//! assert!(Severity::Warning.accepts(LogLevel::Error));
//! assert!(!Severity::Warning.accepts(LogLevel::Info));
//! ```

mod connections;
mod logs;
mod memory;
mod traffic;

pub use connections::*;
pub use logs::*;
pub use memory::*;
pub use traffic::*;
