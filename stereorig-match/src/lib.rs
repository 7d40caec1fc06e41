//! Stereorig Match Crate
//!
//! Boundary to the dense stereo-correspondence engine and the live-tunable
//! parameters it is driven with.
//!
//! ## Modules
//!
//! - [`params`]: matching parameters, tuning commands and their bounds
//! - [`engine`]: the [`StereoEngine`] contract and the adapter that turns
//!   correspondences into 3-D points
//! - [`probe`]: a small reference engine for bring-up and simulated runs

pub mod engine;
pub mod params;
pub mod probe;

pub use engine::{Correspondence, StereoEngine, StereoEngineAdapter};
pub use params::{ParameterBounds, ParameterStore, StereoParameters, TuningCommand, TuningOutcome};
pub use probe::BlockProbe;
