//! clearsky: A Fast, Modular Cloud-Free Composite Builder
//!
//! This library builds representative composites from time-stamped stacks of
//! satellite scenes: scenes are filtered for eligibility, scored for cloud
//! cover, coverage and shadow, and blended into a single output raster by
//! ranked or per-pixel-quality mosaicking, with all pixel operations
//! evaluated eagerly on in-memory arrays.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, CompositeError, CompositeResult, CoordinateSystem, GeoTransform, Mask,
    OrbitPass, Polarization, Raster, Region, Scene, SceneMetadata, SceneScore,
};

pub use config::{ProductKind, ProductRecord};
pub use crate::core::{
    CloudFreeParams, CloudMaskPolicy, Composite, EligibilityFilter, LeastCloudyParams,
    QualityMosaicParams, RankKey, ScenePredicate,
};
pub use io::RegionReader;
