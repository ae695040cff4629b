use crate::types::{CompositeResult, Raster, Scene};
use ndarray::Array2;
use std::collections::HashMap;

/// Per-pixel reducers over a time-ordered scene stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Mean,
    Median,
    Min,
    Max,
    StdDev,
    /// Interquartile range (p75 - p25)
    Iqr,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Mean => "mean",
            Metric::Median => "median",
            Metric::Min => "min",
            Metric::Max => "max",
            Metric::StdDev => "stdDev",
            Metric::Iqr => "iqr",
        }
    }
}

/// Reduce a raster stack pixel-wise
///
/// Nodata values are excluded from each pixel's sample; a pixel with no
/// valid observations reduces to NaN (an empty stack is all-NaN).
pub fn reduce_stack(shape: (usize, usize), stack: &[&Raster], metric: Metric) -> Raster {
    let (height, width) = shape;
    let mut out = Array2::from_elem(shape, f32::NAN);
    let mut sample: Vec<f32> = Vec::with_capacity(stack.len());

    for i in 0..height {
        for j in 0..width {
            sample.clear();
            for layer in stack {
                let v = layer[[i, j]];
                if v.is_finite() {
                    sample.push(v);
                }
            }
            out[[i, j]] = reduce_sample(&mut sample, metric);
        }
    }
    out
}

fn reduce_sample(sample: &mut [f32], metric: Metric) -> f32 {
    if sample.is_empty() {
        return f32::NAN;
    }
    let n = sample.len();
    match metric {
        Metric::Mean => sample.iter().sum::<f32>() / n as f32,
        Metric::Min => sample.iter().copied().fold(f32::INFINITY, f32::min),
        Metric::Max => sample.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        Metric::StdDev => {
            if n < 2 {
                return f32::NAN;
            }
            let mean = sample.iter().sum::<f32>() / n as f32;
            let variance =
                sample.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / (n - 1) as f32;
            variance.sqrt()
        }
        Metric::Median => {
            sample.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            percentile_sorted(sample, 50.0)
        }
        Metric::Iqr => {
            sample.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            percentile_sorted(sample, 75.0) - percentile_sorted(sample, 25.0)
        }
    }
}

/// Linearly interpolated percentile of an already-sorted sample
fn percentile_sorted(sorted: &[f32], p: f32) -> f32 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (n - 1) as f32;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f32;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// Compute named metric layers for each band of a scene stack
///
/// Output keys follow the `{band}_{metric}` naming convention, in band-major
/// order.
pub fn time_series_metrics(
    shape: (usize, usize),
    scenes: &[&Scene],
    bands: &[String],
    metrics: &[Metric],
) -> CompositeResult<HashMap<String, Raster>> {
    log::info!(
        "Computing {} time-series metrics over {} scenes",
        metrics.len(),
        scenes.len()
    );
    let mut out = HashMap::new();
    for band in bands {
        let mut stack: Vec<&Raster> = Vec::with_capacity(scenes.len());
        for &scene in scenes {
            stack.push(scene.band(band)?);
        }
        for metric in metrics {
            let name = format!("{}_{}", band, metric.name());
            out.insert(name, reduce_stack(shape, &stack, *metric));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn stack_of(values: &[f32]) -> Vec<Raster> {
        values
            .iter()
            .map(|&v| Array2::from_elem((1, 1), v))
            .collect()
    }

    #[test]
    fn test_mean_and_minmax() {
        let layers = stack_of(&[1.0, 2.0, 3.0, 6.0]);
        let refs: Vec<&Raster> = layers.iter().collect();
        assert_abs_diff_eq!(
            reduce_stack((1, 1), &refs, Metric::Mean)[[0, 0]],
            3.0,
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            reduce_stack((1, 1), &refs, Metric::Min)[[0, 0]],
            1.0,
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            reduce_stack((1, 1), &refs, Metric::Max)[[0, 0]],
            6.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_median_even_sample_interpolates() {
        let layers = stack_of(&[1.0, 2.0, 3.0, 10.0]);
        let refs: Vec<&Raster> = layers.iter().collect();
        assert_abs_diff_eq!(
            reduce_stack((1, 1), &refs, Metric::Median)[[0, 0]],
            2.5,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_stddev_sample() {
        let layers = stack_of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let refs: Vec<&Raster> = layers.iter().collect();
        // sample standard deviation with n-1 denominator
        assert_abs_diff_eq!(
            reduce_stack((1, 1), &refs, Metric::StdDev)[[0, 0]],
            2.13809,
            epsilon = 1e-4
        );
    }

    #[test]
    fn test_iqr() {
        let layers = stack_of(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let refs: Vec<&Raster> = layers.iter().collect();
        assert_abs_diff_eq!(
            reduce_stack((1, 1), &refs, Metric::Iqr)[[0, 0]],
            2.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_nodata_excluded() {
        let layers = stack_of(&[1.0, f32::NAN, 3.0]);
        let refs: Vec<&Raster> = layers.iter().collect();
        assert_abs_diff_eq!(
            reduce_stack((1, 1), &refs, Metric::Mean)[[0, 0]],
            2.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_empty_stack_is_nan() {
        let out = reduce_stack((2, 2), &[], Metric::Mean);
        assert!(out.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_time_series_metric_naming() {
        use crate::types::SceneMetadata;
        use chrono::Utc;

        let scenes: Vec<Scene> = [1.0f32, 3.0]
            .iter()
            .map(|&v| {
                let mut bands = HashMap::new();
                bands.insert("B2".to_string(), Array2::from_elem((2, 2), v));
                Scene {
                    metadata: SceneMetadata::new(format!("s{}", v)),
                    acquired: Utc::now(),
                    footprint: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
                    bands,
                    cloud_probability: None,
                }
            })
            .collect();
        let refs: Vec<&Scene> = scenes.iter().collect();

        let layers = time_series_metrics(
            (2, 2),
            &refs,
            &["B2".to_string()],
            &[Metric::Mean, Metric::StdDev],
        )
        .unwrap();

        assert_abs_diff_eq!(layers["B2_mean"][[0, 0]], 2.0, epsilon = 1e-6);
        assert!(layers.contains_key("B2_stdDev"));
    }

    #[test]
    fn test_single_observation_stddev_is_nan() {
        let layers = stack_of(&[4.0]);
        let refs: Vec<&Raster> = layers.iter().collect();
        assert!(reduce_stack((1, 1), &refs, Metric::StdDev)[[0, 0]].is_nan());
    }
}
