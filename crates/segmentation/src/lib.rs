//! Audience segmentation: the rule engine, derived customer properties, and
//! the paged segment evaluator.

pub mod builder;
pub mod computed;
pub mod engine;
pub mod predicates;

pub use builder::SegmentBuilder;
pub use engine::{AudienceStream, SegmentEvaluator, SegmentPreview, SegmentStats};
pub use predicates::{matches, segment_matches, validate_rule};
