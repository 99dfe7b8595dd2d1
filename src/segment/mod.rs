//! Silence-driven session segmentation.

pub mod engine;

pub use engine::{SegmentAction, SegmentState, SegmentationEngine, SessionOutcome};
