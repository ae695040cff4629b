use crate::types::{CompositeError, CompositeResult, Raster};
use ndarray::Array2;

#[cfg(feature = "parallel")]
use ndarray::parallel::prelude::*;
#[cfg(feature = "parallel")]
use ndarray::Axis;

/// Parameters for the dilated-erosion (morphological open) operator
#[derive(Debug, Clone)]
pub struct MorphologyParams {
    /// Erosion radius in pixels at the reference scale
    pub erode_radius: f64,
    /// Dilation radius in pixels at the reference scale
    pub dilate_radius: f64,
    /// Iterations of each pass
    pub iterations: usize,
    /// Resolution the radii are defined at, in map units per pixel
    pub reference_scale: f64,
}

impl Default for MorphologyParams {
    fn default() -> Self {
        Self {
            erode_radius: 1.5,      // speckle removal
            dilate_radius: 3.0,     // restore eroded extent
            iterations: 3,
            reference_scale: 20.0,  // fixed morphology resolution (m)
        }
    }
}

/// NaN-aware square-window mean filter
///
/// NaN pixels are excluded from the window average; a pixel whose whole
/// window is NaN stays NaN. Window size must be odd. Windows clip at the
/// grid edges, so a grid smaller than the window reduces to a whole-grid
/// neighborhood rather than an error.
pub fn mean_filter(image: &Raster, window_size: usize) -> CompositeResult<Raster> {
    validate_window(window_size)?;
    let (height, width) = image.dim();

    // per-row parallel path for large rasters
    #[cfg(feature = "parallel")]
    if height * width > 1_000_000 {
        log::debug!("Applying parallel mean filter, window {}", window_size);
        let mut filtered = Array2::from_elem((height, width), f32::NAN);
        filtered
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(i, mut row)| {
                for j in 0..width {
                    row[j] = window_mean(image, i, j, window_size);
                }
            });
        return Ok(filtered);
    }

    log::debug!("Applying mean filter, window {}", window_size);
    let mut filtered = Array2::from_elem((height, width), f32::NAN);
    for i in 0..height {
        for j in 0..width {
            filtered[[i, j]] = window_mean(image, i, j, window_size);
        }
    }
    Ok(filtered)
}

fn window_mean(image: &Raster, center_i: usize, center_j: usize, window_size: usize) -> f32 {
    let (height, width) = image.dim();
    let half_window = window_size / 2;
    let mut sum = 0.0;
    let mut count = 0;

    let i_start = center_i.saturating_sub(half_window);
    let i_end = (center_i + half_window + 1).min(height);
    let j_start = center_j.saturating_sub(half_window);
    let j_end = (center_j + half_window + 1).min(width);

    for i in i_start..i_end {
        for j in j_start..j_end {
            let val = image[[i, j]];
            if val.is_finite() {
                sum += val;
                count += 1;
            }
        }
    }

    if count > 0 {
        sum / count as f32
    } else {
        f32::NAN
    }
}

/// NaN-aware square-window maximum filter
pub fn max_filter(image: &Raster, window_size: usize) -> CompositeResult<Raster> {
    validate_window(window_size)?;
    let (height, width) = image.dim();
    let half_window = window_size / 2;
    let mut filtered = Array2::from_elem((height, width), f32::NAN);

    for i in 0..height {
        for j in 0..width {
            let i_start = i.saturating_sub(half_window);
            let i_end = (i + half_window + 1).min(height);
            let j_start = j.saturating_sub(half_window);
            let j_end = (j + half_window + 1).min(width);

            let mut max = f32::NAN;
            for wi in i_start..i_end {
                for wj in j_start..j_end {
                    let val = image[[wi, wj]];
                    if val.is_finite() && !(val <= max) {
                        max = val;
                    }
                }
            }
            filtered[[i, j]] = max;
        }
    }
    Ok(filtered)
}

fn validate_window(window_size: usize) -> CompositeResult<()> {
    if window_size % 2 == 0 {
        return Err(CompositeError::Processing(
            "Window size must be odd".to_string(),
        ));
    }
    Ok(())
}

/// Circular-kernel focal minimum (erosion)
pub fn focal_min(image: &Raster, radius: f64, iterations: usize) -> Raster {
    focal_extremum(image, radius, iterations, true)
}

/// Circular-kernel focal maximum (dilation)
pub fn focal_max(image: &Raster, radius: f64, iterations: usize) -> Raster {
    focal_extremum(image, radius, iterations, false)
}

fn circle_offsets(radius: f64) -> Vec<(i32, i32)> {
    let r = radius.max(0.0);
    let r_int = r.ceil() as i32;
    let mut offsets = Vec::new();
    for di in -r_int..=r_int {
        for dj in -r_int..=r_int {
            if (di * di + dj * dj) as f64 <= r * r {
                offsets.push((di, dj));
            }
        }
    }
    offsets
}

fn focal_extremum(image: &Raster, radius: f64, iterations: usize, minimum: bool) -> Raster {
    let (height, width) = image.dim();
    let offsets = circle_offsets(radius);
    let mut current = image.clone();

    for _ in 0..iterations {
        let mut next = Array2::from_elem((height, width), f32::NAN);
        for i in 0..height {
            for j in 0..width {
                let mut extremum = f32::NAN;
                for &(di, dj) in &offsets {
                    let ii = i as i32 + di;
                    let jj = j as i32 + dj;
                    if ii < 0 || ii >= height as i32 || jj < 0 || jj >= width as i32 {
                        continue;
                    }
                    let val = current[[ii as usize, jj as usize]];
                    if !val.is_finite() {
                        continue;
                    }
                    if extremum.is_nan()
                        || (minimum && val < extremum)
                        || (!minimum && val > extremum)
                    {
                        extremum = val;
                    }
                }
                next[[i, j]] = extremum;
            }
        }
        current = next;
    }
    current
}

/// Dilated erosion: morphological open with a circular kernel
///
/// Erode then dilate, removing speckle smaller than the erosion radius.
/// Radii are defined at `reference_scale` and rescaled to the grid's pixel
/// size so morphology is scale-consistent across output resolutions.
pub fn dilated_erosion(image: &Raster, pixel_size: f64, params: &MorphologyParams) -> Raster {
    let scale = if pixel_size > 0.0 {
        params.reference_scale / pixel_size
    } else {
        1.0
    };
    let erode_radius = params.erode_radius * scale;
    let dilate_radius = params.dilate_radius * scale;

    log::debug!(
        "Dilated erosion: erode {:.2} px, dilate {:.2} px, {} iterations",
        erode_radius,
        dilate_radius,
        params.iterations
    );

    let eroded = focal_min(image, erode_radius, params.iterations);
    focal_max(&eroded, dilate_radius, params.iterations)
}
