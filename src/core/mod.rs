//! Core composite-building modules

pub mod backscatter;
pub mod cloud;
pub mod composite;
pub mod eligibility;
pub mod focal;
pub mod geometry;
pub mod metrics;
pub mod scoring;
pub mod shadow;

// Re-export main types
pub use backscatter::BackscatterParams;
pub use cloud::{CloudMaskPolicy, CloudScoreParams};
pub use composite::{
    CloudFreeParams, Composite, LeastCloudyParams, QualityMosaicParams, RankKey,
};
pub use eligibility::{EligibilityFilter, ScenePredicate};
pub use focal::MorphologyParams;
pub use metrics::Metric;
pub use shadow::ShadowScoreParams;
