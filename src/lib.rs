//! virtmic - route one application's audio into a virtual microphone
//!
//! The routing engine lives in [`audio`]: a PipeWire registry watcher feeds a
//! single-threaded router that tracks application streams, resolves their
//! ports from `pw-dump` snapshots and keeps at most one stream linked into
//! the virtual microphone.

pub mod audio;
pub mod config;
pub mod logging;
pub mod ui;
