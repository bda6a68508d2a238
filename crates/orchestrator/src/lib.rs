//! # Orchestrator
//!
//! Runs an analysis request end to end:
//!
//! 1. every view is loaded, classified and (optionally) explained;
//! 2. the surviving views are checked for consistency;
//! 3. narratives are generated only for consistent cases.
//!
//! A conflict between views suppresses all automated interpretation: the
//! reasoning backend is never called and the report shows raw predictions.

pub mod consistency;
pub mod error;
pub mod pipeline;

pub use consistency::assess;
pub use error::PipelineError;
pub use pipeline::{case_id, reasoning_from_settings, Orchestrator};
