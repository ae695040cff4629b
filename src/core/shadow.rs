use crate::core::cloud::normalized_difference;
use crate::core::focal::{self, MorphologyParams};
use crate::types::{CompositeError, CompositeResult, GeoTransform, Raster, Scene};
use ndarray::Array2;
use std::f64::consts::PI;

/// Parameters for solar-geometry shadow scoring
#[derive(Debug, Clone)]
pub struct ShadowScoreParams {
    /// Candidate cloud-base heights in meters
    pub cloud_heights: Vec<f64>,
    /// Cloud-score threshold above which a pixel counts as cloud
    pub cloud_threshold: f32,
    /// Combined NIR/SWIR reflectance below which a pixel counts as dark
    pub ir_sum_threshold: f32,
    /// NDVI below which a pixel counts as water (excluded from shadows)
    pub ndvi_threshold: f32,
    /// Raw digital-number scale of the reflectance bands
    pub reflectance_scale: f32,
    /// Morphological open applied to the raw shadow mask
    pub morphology: MorphologyParams,
}

impl Default for ShadowScoreParams {
    fn default() -> Self {
        Self {
            cloud_heights: (200..10_000).step_by(250).map(|h| h as f64).collect(),
            cloud_threshold: 0.2,
            ir_sum_threshold: 0.3,
            ndvi_threshold: -0.1,
            reflectance_scale: 10_000.0,
            morphology: MorphologyParams::default(),
        }
    }
}

/// Per-pixel shadow score from cloud projection along the solar vector
///
/// For each candidate cloud height the cloud score is displaced to where the
/// shadow of a cloud at that height would fall; the displaced layers are
/// averaged into a shadow likelihood, gated by dark-pixel detection (low
/// NIR/SWIR, not water, not already cloud), opened morphologically, and
/// spread by a 3x3 maximum.
pub fn compute_shadow_score(
    scene: &Scene,
    cloud_score: &Raster,
    geo_transform: &GeoTransform,
    params: &ShadowScoreParams,
) -> CompositeResult<Raster> {
    let azimuth = scene.metadata.solar_azimuth.ok_or_else(|| {
        CompositeError::Processing(format!(
            "scene {} has no solar azimuth angle",
            scene.metadata.scene_id
        ))
    })?;
    let zenith = scene.metadata.solar_zenith.ok_or_else(|| {
        CompositeError::Processing(format!(
            "scene {} has no solar zenith angle",
            scene.metadata.scene_id
        ))
    })?;

    log::debug!(
        "Computing shadow score for {} (azimuth {:.1} deg, zenith {:.1} deg, {} heights)",
        scene.metadata.scene_id,
        azimuth,
        zenith,
        params.cloud_heights.len()
    );

    let dark_pixel_mask = dark_pixel_mask(scene, cloud_score, params)?;

    // shadows fall opposite the sun: flip the azimuth by 180 degrees
    let az_rad = (azimuth + 180.0) * PI / 180.0;
    let zen_rad = zenith * PI / 180.0;

    let (height, width) = cloud_score.dim();
    let mut accumulated = Array2::<f32>::zeros((height, width));
    let mut counts = Array2::<u32>::zeros((height, width));

    for &cloud_height in &params.cloud_heights {
        let cast_distance = zen_rad.tan() * cloud_height;
        let dx = -az_rad.sin() * cast_distance;
        let dy = -az_rad.cos() * cast_distance;

        let shifted = displace(cloud_score, geo_transform, dx, dy);
        for i in 0..height {
            for j in 0..width {
                let v = shifted[[i, j]];
                if v.is_finite() {
                    accumulated[[i, j]] += v;
                    counts[[i, j]] += 1;
                }
            }
        }
    }

    let mut shadow_likelihood = Array2::from_elem((height, width), f32::NAN);
    for i in 0..height {
        for j in 0..width {
            if counts[[i, j]] > 0 {
                shadow_likelihood[[i, j]] = accumulated[[i, j]] / counts[[i, j]] as f32;
            }
        }
    }

    // suppress false positives outside dark non-water land pixels;
    // nodata pixels stay nodata rather than becoming valid zeros
    for (v, &dark) in shadow_likelihood.iter_mut().zip(dark_pixel_mask.iter()) {
        if !dark && v.is_finite() {
            *v = 0.0;
        }
    }

    let pixel_size = geo_transform.pixel_width.abs();
    let opened = focal::dilated_erosion(&shadow_likelihood, pixel_size, &params.morphology);
    focal::max_filter(&opened, 3)
}

/// Pixels that could plausibly be shadow: dark in NIR/SWIR, not water
/// (NDVI gate), not already flagged cloud
fn dark_pixel_mask(
    scene: &Scene,
    cloud_score: &Raster,
    params: &ShadowScoreParams,
) -> CompositeResult<Array2<bool>> {
    let b4 = scene.band("B4")?;
    let b8 = scene.band("B8")?;
    let b11 = scene.band("B11")?;
    let b12 = scene.band("B12")?;

    let (height, width) = b8.dim();
    let mut mask = Array2::from_elem((height, width), false);
    for i in 0..height {
        for j in 0..width {
            let idx = [i, j];
            let vals = [b4[idx], b8[idx], b11[idx], b12[idx], cloud_score[idx]];
            if vals.iter().any(|v| !v.is_finite()) {
                continue;
            }
            let ir_sum = (b8[idx] + b11[idx] + b12[idx]) / params.reflectance_scale;
            let ndvi = normalized_difference(b8[idx], b4[idx]);
            let is_dark = ir_sum < params.ir_sum_threshold;
            let is_water = ndvi < params.ndvi_threshold;
            let is_cloud = cloud_score[idx] > params.cloud_threshold;
            mask[idx] = is_dark && !is_water && !is_cloud;
        }
    }
    Ok(mask)
}

/// Displace a raster by a map-space vector, rounded to whole pixels
///
/// Pixels shifted in from outside the grid become nodata.
fn displace(raster: &Raster, geo_transform: &GeoTransform, dx: f64, dy: f64) -> Raster {
    let dcol = (dx / geo_transform.pixel_width).round() as i64;
    let drow = (dy / geo_transform.pixel_height).round() as i64;

    let (height, width) = raster.dim();
    let mut shifted = Array2::from_elem((height, width), f32::NAN);
    for i in 0..height {
        for j in 0..width {
            let src_i = i as i64 - drow;
            let src_j = j as i64 - dcol;
            if src_i >= 0 && src_i < height as i64 && src_j >= 0 && src_j < width as i64 {
                shifted[[i, j]] = raster[[src_i as usize, src_j as usize]];
            }
        }
    }
    shifted
}

/// Combined per-pixel quality score: -max(cloud, shadow), 5x5 mean smoothed
///
/// More negative means higher quality; used as the per-pixel ranking key for
/// quality mosaicking.
pub fn compute_quality_score(
    cloud_score: &Raster,
    shadow_score: &Raster,
) -> CompositeResult<Raster> {
    let (height, width) = cloud_score.dim();
    let mut combined = Array2::from_elem((height, width), f32::NAN);
    for i in 0..height {
        for j in 0..width {
            let c = cloud_score[[i, j]];
            let s = shadow_score[[i, j]];
            combined[[i, j]] = match (c.is_finite(), s.is_finite()) {
                (true, true) => c.max(s),
                (true, false) => c,
                (false, true) => s,
                (false, false) => f32::NAN,
            };
        }
    }
    let smoothed = focal::mean_filter(&combined, 5)?;
    Ok(smoothed.mapv(|v| -v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SceneMetadata;
    use approx::assert_abs_diff_eq;
    use chrono::Utc;
    use std::collections::HashMap;

    fn flat_band(shape: (usize, usize), value: f32) -> Raster {
        Array2::from_elem(shape, value)
    }

    fn shadow_test_scene(shape: (usize, usize)) -> Scene {
        let mut bands = HashMap::new();
        // dark land everywhere: IR sum 0.15, NDVI 0
        bands.insert("B4".to_string(), flat_band(shape, 500.0));
        bands.insert("B8".to_string(), flat_band(shape, 500.0));
        bands.insert("B11".to_string(), flat_band(shape, 500.0));
        bands.insert("B12".to_string(), flat_band(shape, 500.0));

        let mut metadata = SceneMetadata::new("shadow-test");
        metadata.solar_azimuth = Some(0.0);
        metadata.solar_zenith = Some(45.0);
        Scene {
            metadata,
            acquired: Utc::now(),
            footprint: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            bands,
            cloud_probability: None,
        }
    }

    fn test_params() -> ShadowScoreParams {
        ShadowScoreParams {
            cloud_heights: vec![400.0],
            morphology: MorphologyParams {
                erode_radius: 1.5,
                dilate_radius: 3.0,
                iterations: 1,
                reference_scale: 20.0,
            },
            ..ShadowScoreParams::default()
        }
    }

    #[test]
    fn test_displace_whole_pixels() {
        let geo = GeoTransform::north_up(0.0, 1200.0, 20.0);
        let mut raster = Array2::zeros((60, 60));
        raster[[30, 30]] = 1.0;

        // dy = +400 m moves content 20 rows up (pixel_height is -20)
        let shifted = displace(&raster, &geo, 0.0, 400.0);
        assert_abs_diff_eq!(shifted[[10, 30]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(shifted[[30, 30]], 0.0, epsilon = 1e-6);
        // rows shifted in from below the grid are nodata
        assert!(shifted[[59, 0]].is_nan());
    }

    #[test]
    fn test_shadow_appears_displaced_from_cloud() {
        let shape = (60, 60);
        let scene = shadow_test_scene(shape);
        let geo = GeoTransform::north_up(0.0, 1200.0, 20.0);

        // cloud block rows 30..44, cols 20..34
        let mut cloud_score = Array2::zeros(shape);
        for i in 30..44 {
            for j in 20..34 {
                cloud_score[[i, j]] = 1.0;
            }
        }

        // zenith 45 deg, height 400 m, azimuth 0 -> shadow 20 rows north
        let score = compute_shadow_score(&scene, &cloud_score, &geo, &test_params()).unwrap();

        assert!(score[[17, 27]] > 0.0, "shadow missing at projected location");
        // far from both the cloud and its projection
        assert_abs_diff_eq!(score[[5, 50]], 0.0, epsilon = 1e-6);
        // rows the displacement pulled in from outside the grid stay nodata
        assert!(score[[55, 55]].is_nan());
    }

    #[test]
    fn test_cloud_pixels_excluded_from_shadow() {
        let shape = (60, 60);
        let scene = shadow_test_scene(shape);
        let geo = GeoTransform::north_up(0.0, 1200.0, 20.0);

        let mut cloud_score = Array2::zeros(shape);
        for i in 20..50 {
            for j in 10..50 {
                cloud_score[[i, j]] = 1.0;
            }
        }

        let score = compute_shadow_score(&scene, &cloud_score, &geo, &test_params()).unwrap();
        // the projected shadow lands on cloud itself, which is excluded
        assert_abs_diff_eq!(score[[25, 30]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_water_excluded_from_shadow() {
        let shape = (60, 60);
        let mut scene = shadow_test_scene(shape);
        // NDVI = (100 - 5000) / (100 + 5000) << -0.1 everywhere: water
        scene.bands.insert("B8".to_string(), flat_band(shape, 100.0));
        scene.bands.insert("B4".to_string(), flat_band(shape, 5000.0));
        let geo = GeoTransform::north_up(0.0, 1200.0, 20.0);

        let mut cloud_score = Array2::zeros(shape);
        for i in 30..44 {
            for j in 20..34 {
                cloud_score[[i, j]] = 1.0;
            }
        }

        let score = compute_shadow_score(&scene, &cloud_score, &geo, &test_params()).unwrap();
        assert_abs_diff_eq!(score[[17, 27]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bright_pixels_suppressed_but_nodata_stays_masked() {
        let shape = (60, 60);
        let mut scene = shadow_test_scene(shape);
        // bright surface: IR sum 0.6, well above the dark threshold
        scene.bands.insert("B8".to_string(), flat_band(shape, 5000.0));
        let geo = GeoTransform::north_up(0.0, 1200.0, 20.0);

        let mut cloud_score = Array2::zeros(shape);
        for i in 30..44 {
            for j in 20..34 {
                cloud_score[[i, j]] = 1.0;
            }
        }

        let score = compute_shadow_score(&scene, &cloud_score, &geo, &test_params()).unwrap();
        // the projected shadow falls on bright pixels and is suppressed
        assert_abs_diff_eq!(score[[17, 27]], 0.0, epsilon = 1e-6);
        // pixels the displacement never reached stay nodata, not zero
        assert!(score[[55, 55]].is_nan());
    }

    #[test]
    fn test_quality_score_on_tiny_grid() {
        // grids smaller than the smoothing window still composite
        let cloud = Array2::from_elem((3, 3), 0.2f32);
        let shadow = Array2::zeros((3, 3));
        let quality = compute_quality_score(&cloud, &shadow).unwrap();
        assert_abs_diff_eq!(quality[[1, 1]], -0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_quality_score_sign() {
        let shape = (10, 10);
        let mut cloud = Array2::zeros(shape);
        for i in 0..10 {
            for j in 5..10 {
                cloud[[i, j]] = 1.0;
            }
        }
        let shadow = Array2::zeros(shape);

        let quality = compute_quality_score(&cloud, &shadow).unwrap();
        // more negative where cloudy: cloudy pixels rank worse
        assert!(quality[[5, 9]] < quality[[5, 0]]);
        assert!(quality[[5, 9]] <= 0.0);
    }
}
