use crate::core::cloud::CloudMaskPolicy;
use crate::core::geometry;
use crate::types::{CompositeError, CompositeResult, Mask, Point, Region, Scene, SceneScore};
use ndarray::Array2;

/// Rasterize the region ring onto its grid: true where the pixel center
/// falls inside the polygon
pub fn region_mask(region: &Region) -> Mask {
    let (rows, cols) = region.shape;
    let gt = &region.geo_transform;
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        let x = gt.top_left_x + (j as f64 + 0.5) * gt.pixel_width + (i as f64 + 0.5) * gt.rotation_x;
        let y = gt.top_left_y + (j as f64 + 0.5) * gt.rotation_y + (i as f64 + 0.5) * gt.pixel_height;
        point_in_ring([x, y], &region.ring)
    })
}

/// Ray-casting point-in-polygon test (even-odd rule)
fn point_in_ring(p: Point, ring: &[Point]) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut k = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[k]);
        if (a[1] > p[1]) != (b[1] > p[1]) {
            let x_cross = a[0] + (p[1] - a[1]) / (b[1] - a[1]) * (b[0] - a[0]);
            if p[0] < x_cross {
                inside = !inside;
            }
        }
        k = i;
    }
    inside
}

/// Cloud fraction: cloud-flagged pixel area within the region / region area
///
/// Pixel areas come from the region geotransform; the ratio is clamped to
/// [0, 1]. A zero-area region is rejected explicitly.
pub fn cloud_fraction(
    cloud_mask: &Mask,
    region: &Region,
    error_margin: f64,
) -> CompositeResult<f64> {
    let region_area = geometry::area(&region.ring, error_margin);
    if region_area <= 0.0 {
        return Err(CompositeError::InvalidGeometry(
            "region has zero area".to_string(),
        ));
    }
    if cloud_mask.dim() != region.shape {
        return Err(CompositeError::Processing(format!(
            "cloud mask shape {:?} does not match region grid {:?}",
            cloud_mask.dim(),
            region.shape
        )));
    }

    let in_region = region_mask(region);
    let cloudy_pixels = cloud_mask
        .iter()
        .zip(in_region.iter())
        .filter(|(&cloudy, &inside)| cloudy && inside)
        .count();

    let cloud_area = cloudy_pixels as f64 * region.geo_transform.pixel_area();
    Ok((cloud_area / region_area).clamp(0.0, 1.0))
}

/// Score one scene against a region: coverage and cloud fraction
///
/// Pure function of its inputs; the result is attached to the scene by the
/// caller for sorting, never cached across regions.
pub fn score_scene(
    scene: &Scene,
    region: &Region,
    policy: &CloudMaskPolicy,
    error_margin: f64,
) -> CompositeResult<SceneScore> {
    let coverage = geometry::coverage(&scene.footprint, &region.ring, error_margin)?;
    let mask = policy.mask(scene)?;
    let cloud_fraction = cloud_fraction(&mask, region, error_margin)?;

    log::debug!(
        "scene {}: coverage {:.3}, cloud fraction {:.3}",
        scene.metadata.scene_id,
        coverage,
        cloud_fraction
    );

    Ok(SceneScore {
        coverage: coverage as f32,
        cloud_fraction: cloud_fraction as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cloud::QA_BAND;
    use crate::types::{BoundingBox, CoordinateSystem, SceneMetadata};
    use approx::assert_abs_diff_eq;
    use chrono::Utc;
    use std::collections::HashMap;

    fn test_region() -> Region {
        Region::rectangle(
            BoundingBox {
                min_x: 0.0,
                max_x: 100.0,
                min_y: 0.0,
                max_y: 100.0,
            },
            CoordinateSystem::Projected { epsg: 32633 },
            10.0,
        )
    }

    #[test]
    fn test_region_mask_rectangle_is_full() {
        let region = test_region();
        let mask = region_mask(&region);
        assert_eq!(mask.dim(), (10, 10));
        assert!(mask.iter().all(|&inside| inside));
    }

    #[test]
    fn test_region_mask_triangle_is_partial() {
        let mut region = test_region();
        region.ring = vec![[0.0, 0.0], [100.0, 0.0], [0.0, 100.0]];
        let mask = region_mask(&region);
        let inside = mask.iter().filter(|&&m| m).count();
        // half the grid, within a pixel band of the hypotenuse
        assert!(inside > 35 && inside < 65);
    }

    #[test]
    fn test_cloud_fraction_half_cloudy() {
        let region = test_region();
        let mask = Array2::from_shape_fn((10, 10), |(_, j)| j < 5);
        let fraction = cloud_fraction(&mask, &region, 0.001).unwrap();
        assert_abs_diff_eq!(fraction, 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_cloud_fraction_zero_area_region_is_guarded() {
        let mut region = test_region();
        region.ring = vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]];
        let mask = Array2::from_elem((10, 10), true);
        let result = cloud_fraction(&mask, &region, 0.001);
        assert!(matches!(result, Err(CompositeError::InvalidGeometry(_))));
    }

    #[test]
    fn test_cloud_fraction_shape_mismatch() {
        let region = test_region();
        let mask = Array2::from_elem((5, 5), false);
        assert!(cloud_fraction(&mask, &region, 0.001).is_err());
    }

    #[test]
    fn test_score_scene_full_coverage_quarter_cloud() {
        let region = test_region();
        let qa = Array2::from_shape_fn((10, 10), |(i, j)| {
            if i < 5 && j < 5 {
                (1u32 << 10) as f32
            } else {
                0.0
            }
        });
        let mut bands = HashMap::new();
        bands.insert(QA_BAND.to_string(), qa);
        let scene = Scene {
            metadata: SceneMetadata::new("s"),
            acquired: Utc::now(),
            footprint: vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]],
            bands,
            cloud_probability: None,
        };

        let score = score_scene(&scene, &region, &CloudMaskPolicy::BitFlag, 0.001).unwrap();
        assert_abs_diff_eq!(score.coverage, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(score.cloud_fraction, 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(score.priority(), 0.75, epsilon = 1e-6);
        assert_abs_diff_eq!(score.rejection(), 0.25, epsilon = 1e-6);
        assert!(!score.is_cloud_free());
    }

    #[test]
    fn test_cloud_free_candidate() {
        let score = SceneScore {
            coverage: 1.0,
            cloud_fraction: 0.0,
        };
        assert!(score.is_cloud_free());
        assert_abs_diff_eq!(score.priority(), 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(score.rejection(), 0.0, epsilon = 1e-6);
    }
}
