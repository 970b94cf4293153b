//! Question classification and retrieval planning

pub mod complexity;
pub mod planner;
pub mod types;

pub use complexity::{ComplexityEstimator, QuestionClassifier};
pub use planner::{Planner, PlanningContext};
pub use types::{normalize_query, Classification, Plan, QueryTier, TierProfile, TierProfiles};
