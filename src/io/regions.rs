use crate::types::{BoundingBox, CompositeError, CompositeResult, CoordinateSystem, Point, Region};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(rename = "type")]
    kind: String,
    coordinates: serde_json::Value,
}

/// GeoJSON region-seed reader
///
/// Reads polygon features from a FeatureCollection and rasterizes each onto
/// a north-up grid spanning its bounding box. Only the exterior ring is
/// used. A missing seed file is fatal.
pub struct RegionReader {
    coordinate_system: CoordinateSystem,
    pixel_size: f64,
}

impl RegionReader {
    pub fn new(coordinate_system: CoordinateSystem, pixel_size: f64) -> Self {
        Self {
            coordinate_system,
            pixel_size,
        }
    }

    pub fn read_regions<P: AsRef<Path>>(&self, path: P) -> CompositeResult<Vec<Region>> {
        log::info!("Reading region seeds from {}", path.as_ref().display());
        let contents = std::fs::read_to_string(&path)?;
        let collection: FeatureCollection = serde_json::from_str(&contents)?;

        let mut regions = Vec::with_capacity(collection.features.len());
        for feature in collection.features {
            if feature.geometry.kind != "Polygon" {
                return Err(CompositeError::InvalidGeometry(format!(
                    "expected Polygon features, got {}",
                    feature.geometry.kind
                )));
            }
            let rings: Vec<Vec<Point>> = serde_json::from_value(feature.geometry.coordinates)?;
            let ring = rings.into_iter().next().ok_or_else(|| {
                CompositeError::InvalidGeometry("polygon has no exterior ring".to_string())
            })?;
            regions.push(self.region_from_ring(ring)?);
        }
        log::info!("Loaded {} regions", regions.len());
        Ok(regions)
    }

    fn region_from_ring(&self, mut ring: Vec<Point>) -> CompositeResult<Region> {
        // GeoJSON rings repeat the first vertex; our rings are open
        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        if ring.len() < 3 {
            return Err(CompositeError::InvalidGeometry(
                "polygon ring has fewer than 3 distinct vertices".to_string(),
            ));
        }

        let bbox = BoundingBox::from_ring(&ring);
        let template = Region::rectangle(bbox, self.coordinate_system.clone(), self.pixel_size);
        Ok(Region {
            ring,
            coordinate_system: self.coordinate_system.clone(),
            shape: template.shape,
            geo_transform: template.geo_transform,
        })
    }
}
