use crate::core::focal::{self, MorphologyParams};
use crate::types::{CompositeError, CompositeResult, Mask, Raster, Scene};
use ndarray::Array2;

/// Quality-assurance band carrying the cloud/cirrus bit flags
pub const QA_BAND: &str = "QA60";
/// Scene-classification band (surface-reflectance products only)
pub const SCL_BAND: &str = "SCL";

// QA60 reserved bits: 10 = opaque cloud, 11 = cirrus
const CLOUD_BIT: u32 = 1 << 10;
const CIRRUS_BIT: u32 = 1 << 11;

// SCL class 11 = snow/ice
const SCL_SNOW: f32 = 11.0;

/// Cloud-mask derivation policy, selectable per sensor/product
#[derive(Debug, Clone)]
pub enum CloudMaskPolicy {
    /// Quality band bit flags: cloudy if the cloud or cirrus bit is set
    BitFlag,
    /// Auxiliary cloud-probability layer (0-100) thresholded at the cutoff
    Probability { threshold: f32 },
}

impl Default for CloudMaskPolicy {
    fn default() -> Self {
        CloudMaskPolicy::Probability { threshold: 80.0 }
    }
}

impl CloudMaskPolicy {
    /// Derive the per-pixel cloud mask for a scene
    ///
    /// Nodata (NaN) pixels are never flagged cloudy.
    pub fn mask(&self, scene: &Scene) -> CompositeResult<Mask> {
        match self {
            CloudMaskPolicy::BitFlag => {
                let qa = scene.band(QA_BAND)?;
                Ok(qa.mapv(|v| {
                    if !v.is_finite() {
                        return false;
                    }
                    let bits = v as u32;
                    bits & CLOUD_BIT != 0 || bits & CIRRUS_BIT != 0
                }))
            }
            CloudMaskPolicy::Probability { threshold } => {
                let prob = scene.cloud_probability.as_ref().ok_or_else(|| {
                    CompositeError::MissingBand("cloud probability layer".to_string())
                })?;
                Ok(prob.mapv(|p| p.is_finite() && p > *threshold))
            }
        }
    }
}

/// Set cloudy pixels of a raster to nodata
pub fn mask_clouds(raster: &Raster, cloud_mask: &Mask) -> Raster {
    let mut out = raster.clone();
    for (v, &cloudy) in out.iter_mut().zip(cloud_mask.iter()) {
        if cloudy {
            *v = f32::NAN;
        }
    }
    out
}

/// Snow mask for surface-reflectance scenes: SCL class 11
pub fn snow_mask(scene: &Scene) -> CompositeResult<Mask> {
    let scl = scene.band(SCL_BAND)?;
    Ok(scl.mapv(|v| v.is_finite() && v == SCL_SNOW))
}

/// Sum of per-pixel cloud probability over the region (scene-level key)
///
/// Used to order full-coverage scenes when only a relative cloudiness
/// ranking is needed, without committing to a threshold.
pub fn probability_sum_score(scene: &Scene) -> CompositeResult<f64> {
    let prob = scene
        .cloud_probability
        .as_ref()
        .ok_or_else(|| CompositeError::MissingBand("cloud probability layer".to_string()))?;
    Ok(prob.iter().filter(|p| p.is_finite()).map(|&p| p as f64).sum())
}

/// Parameters for the TOA heuristic cloud score
#[derive(Debug, Clone)]
pub struct CloudScoreParams {
    /// Raw digital-number scale of the reflectance bands
    pub reflectance_scale: f32,
    /// Morphological open applied to suppress small bright speckle
    pub morphology: MorphologyParams,
    /// Square smoothing window applied to the final score
    pub smoothing_window: usize,
}

impl Default for CloudScoreParams {
    fn default() -> Self {
        Self {
            reflectance_scale: 10_000.0,
            morphology: MorphologyParams::default(),
            smoothing_window: 5,
        }
    }
}

/// Heuristic per-pixel cloud score for TOA scenes, in [0, 1]
///
/// Takes the minimum of several brightness/moisture indicators (clouds are
/// bright in blue and cirrus bands, bright across the visible range, moist,
/// and not snow), floors it at 0.001, opens it morphologically and smooths
/// it with a local mean. Nodata propagates.
pub fn compute_cloud_score(
    scene: &Scene,
    pixel_size: f64,
    params: &CloudScoreParams,
) -> CompositeResult<Raster> {
    log::debug!("Computing TOA cloud score for {}", scene.metadata.scene_id);

    let b1 = scene.band("B1")?;
    let b2 = scene.band("B2")?;
    let b3 = scene.band("B3")?;
    let b4 = scene.band("B4")?;
    let b8 = scene.band("B8")?;
    let b10 = scene.band("B10")?;
    let b11 = scene.band("B11")?;

    let (height, width) = b2.dim();
    let scale = params.reflectance_scale;
    let mut score = Array2::from_elem((height, width), f32::NAN);

    for i in 0..height {
        for j in 0..width {
            let idx = [i, j];
            let vals = [
                b1[idx], b2[idx], b3[idx], b4[idx], b8[idx], b10[idx], b11[idx],
            ];
            if vals.iter().any(|v| !v.is_finite()) {
                continue;
            }
            let [v1, v2, v3, v4, v8, v10, v11] = vals.map(|v| v / scale);

            let mut s = 1.0f32;

            // clouds are reasonably bright in the blue and cirrus bands
            s = s.min(rescale(v2, 0.1, 0.5));
            s = s.min(rescale(v1, 0.1, 0.3));
            s = s.min(rescale(v1 + v10, 0.15, 0.2));

            // clouds are reasonably bright in all visible bands
            s = s.min(rescale(v4 + v3 + v2, 0.2, 0.8));

            // clouds are moist
            let ndmi = normalized_difference(v8, v11);
            s = s.min(rescale(ndmi, -0.1, 0.1));

            // however, clouds are not snow
            let ndsi = normalized_difference(v3, v11);
            s = s.min(rescale(ndsi, 0.8, 0.6));

            score[idx] = s.max(0.001);
        }
    }

    let opened = focal::dilated_erosion(&score, pixel_size, &params.morphology);
    let capped = opened.mapv(|v| if v.is_finite() { v.min(1.0) } else { v });

    focal::mean_filter(&capped, params.smoothing_window)
}

/// Linear rescale of an indicator onto [lo, hi] -> [0, 1] (unclamped)
fn rescale(value: f32, lo: f32, hi: f32) -> f32 {
    (value - lo) / (hi - lo)
}

/// (a - b) / (a + b), NaN when the denominator vanishes
pub fn normalized_difference(a: f32, b: f32) -> f32 {
    let denom = a + b;
    if denom == 0.0 {
        f32::NAN
    } else {
        (a - b) / denom
    }
}
