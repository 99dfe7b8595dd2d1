//! Audio endpoint discovery and probing.

pub mod heuristics;
pub mod prober;

pub use prober::{DeviceProber, ProbeOutcome, ProbeResult};
