//! Configuration expansion and stage sequencing.

mod stages;

pub use stages::{extraction_plan, projection_plan, ExtractionPlan};
