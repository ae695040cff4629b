use crate::core::cloud::{self, CloudMaskPolicy, CloudScoreParams};
use crate::core::scoring;
use crate::core::shadow::{self, ShadowScoreParams};
use crate::types::{CompositeResult, Raster, Region, Scene, SceneScore};
use ndarray::Array2;
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use ndarray::parallel::prelude::*;
#[cfg(feature = "parallel")]
use ndarray::Axis;

/// Declared input range of reflectance-scaled optical digital numbers
pub const REFLECTANCE_RANGE: (f32, f32) = (0.0, 10_000.0);
/// Declared input range of radar backscatter in decibels
pub const BACKSCATTER_DB_RANGE: (f32, f32) = (-25.0, 0.0);

/// Output raster stack on the region grid, one layer per band
#[derive(Debug, Clone)]
pub struct Composite {
    pub band_order: Vec<String>,
    pub data: HashMap<String, Raster>,
    pub shape: (usize, usize),
}

impl Composite {
    /// All-zero composite of the given shape (the empty-scene-set fallback)
    pub fn empty(bands: &[String], shape: (usize, usize)) -> Self {
        let data = bands
            .iter()
            .map(|b| (b.clone(), Array2::zeros(shape)))
            .collect();
        Composite {
            band_order: bands.to_vec(),
            data,
            shape,
        }
    }

    pub fn band(&self, name: &str) -> Option<&Raster> {
        self.data.get(name)
    }
}

/// Scalar ranking key for scene-wise mosaicking
///
/// Each variant carries its own sign convention, preserved from the policy
/// it came from; they are deliberately not unified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankKey {
    /// coverage * (1 - cloud fraction), best first = highest
    Priority,
    /// coverage * cloud fraction, best first = lowest
    Rejection,
    /// Reported whole-scene cloud percentage, best first = lowest;
    /// scenes without one rank last
    ReportedCloudPercentage,
}

impl RankKey {
    fn value(&self, scene: &Scene, score: &SceneScore) -> f32 {
        match self {
            RankKey::Priority => -score.priority(),
            RankKey::Rejection => score.rejection(),
            RankKey::ReportedCloudPercentage => {
                scene.metadata.cloud_percentage.unwrap_or(f32::INFINITY)
            }
        }
    }
}

/// Sort scored scenes best-first according to the ranking key
pub fn rank_scenes<'a>(
    scored: &[(&'a Scene, SceneScore)],
    key: RankKey,
) -> Vec<(&'a Scene, SceneScore)> {
    let mut ranked = scored.to_vec();
    ranked.sort_by(|a, b| {
        key.value(a.0, &a.1)
            .partial_cmp(&key.value(b.0, &b.1))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked
}

/// Priority-ordered stacking: for each pixel, the first layer with valid
/// (finite) data wins
pub fn first_valid_mosaic(shape: (usize, usize), layers: &[&Raster]) -> Raster {
    let mut out = Array2::from_elem(shape, f32::NAN);
    for layer in layers {
        for (o, &v) in out.iter_mut().zip(layer.iter()) {
            if o.is_nan() && v.is_finite() {
                *o = v;
            }
        }
    }
    out
}

/// Pixel-wise argmax mosaic: each pixel is drawn from whichever layer has
/// the locally highest quality score
///
/// Unlike a ranked mosaic, different pixels may come from different scenes
/// even when one scene dominates globally.
pub fn quality_mosaic_band(
    shape: (usize, usize),
    qualities: &[&Raster],
    values: &[&Raster],
) -> Raster {
    debug_assert_eq!(qualities.len(), values.len());
    let (height, width) = shape;

    let pick = |i: usize, j: usize| -> f32 {
        let mut best_quality = f32::NAN;
        let mut best_value = f32::NAN;
        for (quality, value) in qualities.iter().zip(values.iter()) {
            let q = quality[[i, j]];
            if q.is_finite() && (best_quality.is_nan() || q > best_quality) {
                best_quality = q;
                best_value = value[[i, j]];
            }
        }
        best_value
    };

    #[cfg(feature = "parallel")]
    if height * width > 1_000_000 {
        let mut out = Array2::from_elem(shape, f32::NAN);
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                for j in 0..width {
                    row[j] = pick(i, j);
                }
            });
        return out;
    }

    let mut out = Array2::from_elem(shape, f32::NAN);
    for i in 0..height {
        for j in 0..width {
            out[[i, j]] = pick(i, j);
        }
    }
    out
}

/// clamp((x - lo) / (hi - lo), 0, 1); nodata passes through
pub fn unit_scale(raster: &Raster, range: (f32, f32)) -> Raster {
    let (lo, hi) = range;
    let span = hi - lo;
    raster.mapv(|v| {
        if v.is_finite() {
            ((v - lo) / span).clamp(0.0, 1.0)
        } else {
            v
        }
    })
}

/// Replace remaining nodata with a constant (0 before output)
pub fn fill_nodata(raster: &Raster, fill: f32) -> Raster {
    raster.mapv(|v| if v.is_finite() { v } else { fill })
}

fn finalize_band(raster: &Raster, range: (f32, f32)) -> Raster {
    fill_nodata(&unit_scale(raster, range), 0.0)
}

/// Parameters for the simple ranked cloud-free mosaic
#[derive(Debug, Clone)]
pub struct CloudFreeParams {
    pub bands: Vec<String>,
    pub cloud_policy: CloudMaskPolicy,
    /// Area-computation tolerance for coverage/cloud-fraction scoring
    pub error_margin: f64,
    /// Reported cloud percentage below which a strict cloud-free candidate
    /// is preferred outright
    pub cloud_free_keep_threshold: f32,
    pub input_range: (f32, f32),
}

impl Default for CloudFreeParams {
    fn default() -> Self {
        Self {
            bands: Vec::new(),
            cloud_policy: CloudMaskPolicy::BitFlag,
            error_margin: crate::core::geometry::DEFAULT_ERROR_MARGIN,
            cloud_free_keep_threshold: 5.0,
            input_range: REFLECTANCE_RANGE,
        }
    }
}

/// Ranked cloud-free mosaic with fallback layering
///
/// Layer priority, each layer filling only the nodata gaps of the previous:
/// 1. the strict cloud-free candidate (full coverage, zero cloud fraction)
///    with the lowest reported cloud percentage below the keep threshold;
/// 2. the least-reported-cloudy strict candidate regardless of threshold;
/// 3. the cloud-masked scene stack ordered by rejection score ascending.
/// Output is normalized to [0, 1] and nodata-filled with 0. An empty scene
/// set yields an all-zero composite, not an error.
pub fn cloud_free_composite(
    region: &Region,
    scenes: &[&Scene],
    params: &CloudFreeParams,
) -> CompositeResult<Composite> {
    if scenes.is_empty() {
        log::warn!("No eligible scenes; producing all-zero composite");
        return Ok(Composite::empty(&params.bands, region.shape));
    }
    log::info!(
        "Building ranked cloud-free mosaic from {} scenes",
        scenes.len()
    );

    let mut scored: Vec<(&Scene, SceneScore)> = Vec::with_capacity(scenes.len());
    for &scene in scenes {
        let score = scoring::score_scene(scene, region, &params.cloud_policy, params.error_margin)?;
        scored.push((scene, score));
    }

    // strict cloud-free candidates, least reported cloud first
    let candidates: Vec<(&Scene, SceneScore)> = rank_scenes(
        &scored
            .iter()
            .filter(|(_, s)| s.is_cloud_free())
            .copied()
            .collect::<Vec<_>>(),
        RankKey::ReportedCloudPercentage,
    );
    let best = candidates.iter().find(|(scene, _)| {
        scene
            .metadata
            .cloud_percentage
            .map(|pct| pct < params.cloud_free_keep_threshold)
            .unwrap_or(false)
    });
    let best_local = candidates.first();
    log::debug!(
        "{} strict cloud-free candidates, keep-threshold hit: {}",
        candidates.len(),
        best.is_some()
    );

    // cloud-masked stack, rejection score ascending (lower is better)
    let masked_order = rank_scenes(&scored, RankKey::Rejection);
    let mut masked_stacks: Vec<HashMap<&str, Raster>> = Vec::with_capacity(masked_order.len());
    for (scene, _) in &masked_order {
        let mask = params.cloud_policy.mask(scene)?;
        let mut stack = HashMap::new();
        for band in &params.bands {
            stack.insert(band.as_str(), cloud::mask_clouds(scene.band(band)?, &mask));
        }
        masked_stacks.push(stack);
    }

    let mut data = HashMap::new();
    for band in &params.bands {
        let mut layers: Vec<&Raster> = Vec::new();
        if let Some((scene, _)) = best {
            layers.push(scene.band(band)?);
        }
        if let Some((scene, _)) = best_local {
            layers.push(scene.band(band)?);
        }
        for stack in &masked_stacks {
            layers.push(&stack[band.as_str()]);
        }
        let mosaic = first_valid_mosaic(region.shape, &layers);
        data.insert(band.clone(), finalize_band(&mosaic, params.input_range));
    }

    Ok(Composite {
        band_order: params.bands.clone(),
        data,
        shape: region.shape,
    })
}

/// Parameters for the shadow-aware quality mosaic
#[derive(Debug, Clone)]
pub struct QualityMosaicParams {
    pub bands: Vec<String>,
    pub cloud_score: CloudScoreParams,
    pub shadow: ShadowScoreParams,
    /// Reported cloud percentage below which a scene joins the preferred
    /// scene-wise mosaic layered over the per-pixel result
    pub cloud_free_keep_threshold: f32,
    pub error_margin: f64,
    pub input_range: (f32, f32),
}

impl Default for QualityMosaicParams {
    fn default() -> Self {
        Self {
            bands: Vec::new(),
            cloud_score: CloudScoreParams::default(),
            shadow: ShadowScoreParams::default(),
            cloud_free_keep_threshold: 5.0,
            error_margin: crate::core::geometry::DEFAULT_ERROR_MARGIN,
            input_range: REFLECTANCE_RANGE,
        }
    }
}

/// Shadow-aware quality mosaic
///
/// Scores every scene per pixel (cloud score, solar-geometry shadow score,
/// combined quality), builds the pixel-wise argmax mosaic, then layers the
/// ranked mosaic of near-cloud-free scenes (reported percentage below the
/// keep threshold, least cloudy first) on top of it.
pub fn quality_composite(
    region: &Region,
    scenes: &[&Scene],
    params: &QualityMosaicParams,
) -> CompositeResult<Composite> {
    if scenes.is_empty() {
        log::warn!("No eligible scenes; producing all-zero composite");
        return Ok(Composite::empty(&params.bands, region.shape));
    }
    log::info!("Building quality mosaic from {} scenes", scenes.len());

    let pixel_size = region.geo_transform.pixel_width.abs();
    let mut qualities: Vec<Raster> = Vec::with_capacity(scenes.len());
    for &scene in scenes {
        let cloud_score = cloud::compute_cloud_score(scene, pixel_size, &params.cloud_score)?;
        let shadow_score =
            shadow::compute_shadow_score(scene, &cloud_score, &region.geo_transform, &params.shadow)?;
        qualities.push(shadow::compute_quality_score(&cloud_score, &shadow_score)?);
    }
    let quality_refs: Vec<&Raster> = qualities.iter().collect();

    // near-cloud-free scenes, least reported cloud first
    let mut preferred: Vec<&Scene> = scenes
        .iter()
        .copied()
        .filter(|s| {
            s.metadata
                .cloud_percentage
                .map(|pct| pct < params.cloud_free_keep_threshold)
                .unwrap_or(false)
        })
        .collect();
    preferred.sort_by(|a, b| {
        a.metadata
            .cloud_percentage
            .partial_cmp(&b.metadata.cloud_percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut data = HashMap::new();
    for band in &params.bands {
        let mut values: Vec<&Raster> = Vec::with_capacity(scenes.len());
        for &scene in scenes {
            values.push(scene.band(band)?);
        }
        let argmax = quality_mosaic_band(region.shape, &quality_refs, &values);

        let mut layers: Vec<&Raster> = Vec::new();
        for scene in &preferred {
            layers.push(scene.band(band)?);
        }
        layers.push(&argmax);
        let mosaic = first_valid_mosaic(region.shape, &layers);
        data.insert(band.clone(), finalize_band(&mosaic, params.input_range));
    }

    Ok(Composite {
        band_order: params.bands.clone(),
        data,
        shape: region.shape,
    })
}

/// Parameters for the least-cloudy probability mosaic
#[derive(Debug, Clone)]
pub struct LeastCloudyParams {
    pub bands: Vec<String>,
    pub error_margin: f64,
    pub input_range: (f32, f32),
    /// Require full region coverage before a scene may contribute
    pub require_full_coverage: bool,
}

impl Default for LeastCloudyParams {
    fn default() -> Self {
        Self {
            bands: Vec::new(),
            error_margin: crate::core::geometry::DEFAULT_ERROR_MARGIN,
            input_range: REFLECTANCE_RANGE,
            require_full_coverage: true,
        }
    }
}

/// Least-cloudy mosaic ordered by summed cloud probability
///
/// Candidate scenes (optionally restricted to full region coverage) are
/// ordered by the sum of their cloud-probability layer over the region,
/// lowest first, and stacked first-valid.
pub fn least_cloudy_composite(
    region: &Region,
    scenes: &[&Scene],
    params: &LeastCloudyParams,
) -> CompositeResult<Composite> {
    if scenes.is_empty() {
        log::warn!("No eligible scenes; producing all-zero composite");
        return Ok(Composite::empty(&params.bands, region.shape));
    }
    log::info!(
        "Building least-cloudy probability mosaic from {} scenes",
        scenes.len()
    );

    let mut candidates: Vec<(&Scene, f64)> = Vec::new();
    for &scene in scenes {
        if params.require_full_coverage {
            let coverage = crate::core::geometry::coverage(
                &scene.footprint,
                &region.ring,
                params.error_margin,
            )?;
            if coverage < 1.0 {
                continue;
            }
        }
        candidates.push((scene, cloud::probability_sum_score(scene)?));
    }
    candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut data = HashMap::new();
    for band in &params.bands {
        let mut layers: Vec<&Raster> = Vec::new();
        for (scene, _) in &candidates {
            layers.push(scene.band(band)?);
        }
        let mosaic = first_valid_mosaic(region.shape, &layers);
        data.insert(band.clone(), finalize_band(&mosaic, params.input_range));
    }

    Ok(Composite {
        band_order: params.bands.clone(),
        data,
        shape: region.shape,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SceneMetadata;
    use approx::assert_abs_diff_eq;
    use chrono::Utc;

    fn scored_scene(id: &str, coverage: f32, cloud_fraction: f32) -> (Scene, SceneScore) {
        let scene = Scene {
            metadata: SceneMetadata::new(id),
            acquired: Utc::now(),
            footprint: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            bands: HashMap::new(),
            cloud_probability: None,
        };
        let score = SceneScore {
            coverage,
            cloud_fraction,
        };
        (scene, score)
    }

    fn ranked_ids(ranked: &[(&Scene, SceneScore)]) -> Vec<String> {
        ranked
            .iter()
            .map(|(s, _)| s.metadata.scene_id.clone())
            .collect()
    }

    #[test]
    fn test_rank_priority_highest_first() {
        let (a, sa) = scored_scene("a", 1.0, 0.4); // priority 0.60
        let (b, sb) = scored_scene("b", 0.9, 0.0); // priority 0.90
        let (c, sc) = scored_scene("c", 0.5, 0.5); // priority 0.25

        let ranked = rank_scenes(&[(&a, sa), (&b, sb), (&c, sc)], RankKey::Priority);
        assert_eq!(ranked_ids(&ranked), ["b", "a", "c"]);
    }

    #[test]
    fn test_rank_rejection_lowest_first() {
        let (a, sa) = scored_scene("a", 1.0, 0.4); // rejection 0.40
        let (b, sb) = scored_scene("b", 0.6, 0.0); // rejection 0.00
        let (c, sc) = scored_scene("c", 0.8, 0.1); // rejection 0.08

        let ranked = rank_scenes(&[(&a, sa), (&b, sb), (&c, sc)], RankKey::Rejection);
        assert_eq!(ranked_ids(&ranked), ["b", "c", "a"]);
    }

    #[test]
    fn test_rank_reported_percentage_missing_ranks_last() {
        let (mut a, sa) = scored_scene("a", 1.0, 0.0);
        a.metadata.cloud_percentage = Some(12.0);
        let (b, sb) = scored_scene("b", 1.0, 0.0); // no reported percentage
        let (mut c, sc) = scored_scene("c", 1.0, 0.0);
        c.metadata.cloud_percentage = Some(3.0);

        let ranked = rank_scenes(
            &[(&a, sa), (&b, sb), (&c, sc)],
            RankKey::ReportedCloudPercentage,
        );
        assert_eq!(ranked_ids(&ranked), ["c", "a", "b"]);
    }

    #[test]
    fn test_first_valid_mosaic_priority_order() {
        let mut top = Array2::from_elem((2, 2), f32::NAN);
        top[[0, 0]] = 1.0;
        let bottom = Array2::from_elem((2, 2), 2.0f32);

        let mosaic = first_valid_mosaic((2, 2), &[&top, &bottom]);
        assert_abs_diff_eq!(mosaic[[0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(mosaic[[1, 1]], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_first_valid_mosaic_empty_layers() {
        let mosaic = first_valid_mosaic((3, 3), &[]);
        assert!(mosaic.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_quality_mosaic_picks_local_best() {
        // scene a is best on the left half, scene b on the right
        let qa = Array2::from_shape_fn((2, 4), |(_, j)| if j < 2 { -0.1 } else { -0.9 });
        let qb = Array2::from_shape_fn((2, 4), |(_, j)| if j < 2 { -0.9 } else { -0.1 });
        let va = Array2::from_elem((2, 4), 10.0f32);
        let vb = Array2::from_elem((2, 4), 20.0f32);

        let mosaic = quality_mosaic_band((2, 4), &[&qa, &qb], &[&va, &vb]);
        assert_abs_diff_eq!(mosaic[[0, 0]], 10.0, epsilon = 1e-6);
        assert_abs_diff_eq!(mosaic[[0, 3]], 20.0, epsilon = 1e-6);
    }

    #[test]
    fn test_quality_mosaic_skips_masked_quality() {
        let mut qa = Array2::from_elem((1, 2), 0.5f32);
        qa[[0, 1]] = f32::NAN;
        let qb = Array2::from_elem((1, 2), -0.5f32);
        let va = Array2::from_elem((1, 2), 10.0f32);
        let vb = Array2::from_elem((1, 2), 20.0f32);

        let mosaic = quality_mosaic_band((1, 2), &[&qa, &qb], &[&va, &vb]);
        assert_abs_diff_eq!(mosaic[[0, 0]], 10.0, epsilon = 1e-6);
        // a's quality is masked there, so b wins despite the lower score
        assert_abs_diff_eq!(mosaic[[0, 1]], 20.0, epsilon = 1e-6);
    }

    #[test]
    fn test_unit_scale_clamps() {
        let mut raster = Array2::zeros((1, 4));
        raster[[0, 0]] = -5.0;
        raster[[0, 1]] = 5_000.0;
        raster[[0, 2]] = 20_000.0;
        raster[[0, 3]] = f32::NAN;

        let scaled = unit_scale(&raster, REFLECTANCE_RANGE);
        assert_abs_diff_eq!(scaled[[0, 0]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(scaled[[0, 1]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(scaled[[0, 2]], 1.0, epsilon = 1e-6);
        assert!(scaled[[0, 3]].is_nan());
    }

    #[test]
    fn test_unit_scale_backscatter_range() {
        let mut raster = Array2::zeros((1, 2));
        raster[[0, 0]] = -25.0;
        raster[[0, 1]] = -12.5;
        let scaled = unit_scale(&raster, BACKSCATTER_DB_RANGE);
        assert_abs_diff_eq!(scaled[[0, 0]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(scaled[[0, 1]], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_fill_nodata() {
        let mut raster = Array2::from_elem((1, 2), f32::NAN);
        raster[[0, 0]] = 0.25;
        let filled = fill_nodata(&raster, 0.0);
        assert_abs_diff_eq!(filled[[0, 0]], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(filled[[0, 1]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_composite_shape() {
        let composite = Composite::empty(&["B2".to_string()], (4, 6));
        let band = composite.band("B2").unwrap();
        assert_eq!(band.dim(), (4, 6));
        assert!(band.iter().all(|&v| v == 0.0));
    }
}
