//! Stereorig Application
//!
//! Assembles the stereo capture pipeline: two cameras, rectification,
//! matching and point-cloud publishing, with interrupt-safe teardown.
//!
//! ## Modules
//!
//! - [`config`]: command line and JSON rig configuration
//! - [`pipeline`]: the per-frame capture → rectify → match → publish loop
//! - [`shutdown`]: exactly-once camera teardown shared with the interrupt handler
//! - [`rate`]: frame-rate diagnostics
//! - [`tuning`]: live parameter tuning from stdin
//! - [`app`]: startup wiring used by the `stereorig` binary

pub mod app;
pub mod config;
pub mod pipeline;
pub mod rate;
pub mod shutdown;
pub mod tuning;

pub use config::{Args, ConfigError, RigConfig};
pub use pipeline::{Pipeline, PipelineOptions, RunOutcome};
pub use rate::{FrameRateMonitor, RateSample};
pub use shutdown::{ShutdownController, ShutdownReason};
