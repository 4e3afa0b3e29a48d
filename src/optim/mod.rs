//! Optimization: Adam, image losses, per-group optimizers and the stroke planner.

pub mod adam;
pub mod groups;
pub mod loss;
pub mod planner;

pub use groups::{LearningRates, StrokeOptimizers};
pub use loss::LossKind;
pub use planner::{plan_from_image, PlanError, PlannerConfig};
