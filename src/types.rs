use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Real-valued raster aligned to a region grid (row x col), NaN = nodata
pub type Raster = Array2<f32>;

/// Per-pixel boolean mask aligned to a region grid
pub type Mask = Array2<bool>;

/// A 2D point in region coordinates (x, y)
pub type Point = [f64; 2];

/// Coordinate system enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (latitude, longitude)
    Geographic,
    /// Projected coordinates (e.g., UTM)
    Projected { epsg: u32 },
}

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

/// Orbit direction of a Sentinel-1 pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrbitPass {
    Ascending,
    Descending,
}

impl std::fmt::Display for OrbitPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrbitPass::Ascending => write!(f, "ASCENDING"),
            OrbitPass::Descending => write!(f, "DESCENDING"),
        }
    }
}

/// Geospatial transformation parameters (GDAL affine order)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square pixels of the given size
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: pixel_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_size,
        }
    }

    /// Area covered by a single pixel, in squared map units
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y).abs()
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn from_ring(ring: &[Point]) -> Self {
        let mut bbox = BoundingBox {
            min_x: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            min_y: f64::INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for p in ring {
            bbox.min_x = bbox.min_x.min(p[0]);
            bbox.max_x = bbox.max_x.max(p[0]);
            bbox.min_y = bbox.min_y.min(p[1]);
            bbox.max_y = bbox.max_y.max(p[1]);
        }
        bbox
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

/// Target region (ROI patch) with the raster grid composites are built on
#[derive(Debug, Clone)]
pub struct Region {
    /// Polygon ring, open (no repeated closing vertex)
    pub ring: Vec<Point>,
    pub coordinate_system: CoordinateSystem,
    /// Output grid shape (rows, cols)
    pub shape: (usize, usize),
    pub geo_transform: GeoTransform,
}

impl Region {
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_ring(&self.ring)
    }

    /// Rectangular region whose grid spans its bounding box
    pub fn rectangle(
        bbox: BoundingBox,
        coordinate_system: CoordinateSystem,
        pixel_size: f64,
    ) -> Self {
        let cols = ((bbox.max_x - bbox.min_x) / pixel_size).round().max(1.0) as usize;
        let rows = ((bbox.max_y - bbox.min_y) / pixel_size).round().max(1.0) as usize;
        Region {
            ring: vec![
                [bbox.min_x, bbox.min_y],
                [bbox.max_x, bbox.min_y],
                [bbox.max_x, bbox.max_y],
                [bbox.min_x, bbox.max_y],
            ],
            coordinate_system,
            shape: (rows, cols),
            geo_transform: GeoTransform::north_up(bbox.min_x, bbox.max_y, pixel_size),
        }
    }
}

/// Per-scene catalog metadata used for filtering and ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub scene_id: String,
    /// Reported whole-scene cloudy pixel percentage (0-100), if the catalog
    /// provides one
    pub cloud_percentage: Option<f32>,
    pub instrument_mode: Option<String>,
    pub orbit_pass: Option<OrbitPass>,
    pub relative_orbit: Option<u32>,
    pub polarizations: Vec<Polarization>,
    /// Mean solar azimuth angle in degrees
    pub solar_azimuth: Option<f64>,
    /// Mean solar zenith angle in degrees
    pub solar_zenith: Option<f64>,
}

impl SceneMetadata {
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            cloud_percentage: None,
            instrument_mode: None,
            orbit_pass: None,
            relative_orbit: None,
            polarizations: Vec::new(),
            solar_azimuth: None,
            solar_zenith: None,
        }
    }
}

/// One satellite acquisition, rasterized onto a region grid
///
/// Band rasters share the region's shape; pixels outside the scene footprint
/// (or masked during processing) are NaN.
#[derive(Debug, Clone)]
pub struct Scene {
    pub metadata: SceneMetadata,
    pub acquired: DateTime<Utc>,
    /// Footprint ring in region coordinates, open
    pub footprint: Vec<Point>,
    pub bands: HashMap<String, Raster>,
    /// Paired per-pixel cloud probability layer (0-100), if available
    pub cloud_probability: Option<Raster>,
}

impl Scene {
    pub fn band(&self, name: &str) -> CompositeResult<&Raster> {
        self.bands
            .get(name)
            .ok_or_else(|| CompositeError::MissingBand(name.to_string()))
    }

    pub fn shape(&self) -> Option<(usize, usize)> {
        self.bands.values().next().map(|b| b.dim())
    }
}

/// Derived per-scene scores for one region, recomputed per query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneScore {
    /// footprint-region overlap / region area, in [0, 1]
    pub coverage: f32,
    /// cloud-flagged area within the region / region area, in [0, 1]
    pub cloud_fraction: f32,
}

impl SceneScore {
    /// coverage * (1 - cloud fraction); higher is better
    pub fn priority(&self) -> f32 {
        self.coverage * (1.0 - self.cloud_fraction)
    }

    /// coverage * cloud fraction; lower is better (rejection tie-break key)
    pub fn rejection(&self) -> f32 {
        self.coverage * self.cloud_fraction
    }

    /// Strict cloud-free candidate: full coverage and no flagged clouds
    pub fn is_cloud_free(&self) -> bool {
        self.coverage >= 1.0 && self.cloud_fraction <= 0.0
    }
}

/// Error types for composite processing
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Missing band: {0}")]
    MissingBand(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),
}

/// Result type for composite operations
pub type CompositeResult<T> = Result<T, CompositeError>;
