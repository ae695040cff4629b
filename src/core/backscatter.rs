use crate::core::composite::{self, Composite, BACKSCATTER_DB_RANGE};
use crate::core::metrics::{self, Metric};
use crate::types::{CompositeResult, OrbitPass, Polarization, Raster, Region, Scene};
use std::collections::HashMap;

/// Parameters for single-orbit backscatter mosaicking
#[derive(Debug, Clone)]
pub struct BackscatterParams {
    /// Polarization bands to composite (band names follow Display, e.g. "VV")
    pub polarizations: Vec<Polarization>,
    /// Backscatter below this is treated as instrument noise and masked
    pub noise_floor_db: f32,
    /// Declared decibel range for output normalization
    pub db_range: (f32, f32),
    /// Declared range for standard-deviation normalization (metrics variant)
    pub std_range: (f32, f32),
}

impl Default for BackscatterParams {
    fn default() -> Self {
        Self {
            polarizations: vec![Polarization::VV, Polarization::VH],
            noise_floor_db: -25.0,
            db_range: BACKSCATTER_DB_RANGE,
            std_range: (0.0, 10.0),
        }
    }
}

/// Pick the orbit direction with more scenes
///
/// Ties go to descending (the ascending stack must be strictly larger to
/// win). Scenes without an orbit pass are ignored.
pub fn select_orbit_pass(scenes: &[&Scene]) -> OrbitPass {
    let ascending = scenes
        .iter()
        .filter(|s| s.metadata.orbit_pass == Some(OrbitPass::Ascending))
        .count();
    let descending = scenes
        .iter()
        .filter(|s| s.metadata.orbit_pass == Some(OrbitPass::Descending))
        .count();
    let selected = if ascending > descending {
        OrbitPass::Ascending
    } else {
        OrbitPass::Descending
    };
    log::info!(
        "Orbit selection: {} ascending, {} descending -> {}",
        ascending,
        descending,
        selected
    );
    selected
}

/// Group the selected pass's scenes by relative orbit number
///
/// Scenes without a relative orbit number cannot be grouped and are dropped
/// with a warning.
fn orbit_groups<'a>(scenes: &[&'a Scene], pass: OrbitPass) -> Vec<(u32, Vec<&'a Scene>)> {
    let mut groups: HashMap<u32, Vec<&Scene>> = HashMap::new();
    for &scene in scenes {
        if scene.metadata.orbit_pass != Some(pass) {
            continue;
        }
        match scene.metadata.relative_orbit {
            Some(number) => groups.entry(number).or_default().push(scene),
            None => log::warn!(
                "scene {} has no relative orbit number, skipping",
                scene.metadata.scene_id
            ),
        }
    }
    let mut ordered: Vec<(u32, Vec<&Scene>)> = groups.into_iter().collect();
    ordered.sort_by_key(|(number, _)| *number);
    ordered
}

/// Mask backscatter below the noise floor
fn mask_noise(raster: &Raster, noise_floor_db: f32) -> Raster {
    raster.mapv(|v| if v.is_finite() && v >= noise_floor_db { v } else { f32::NAN })
}

/// Mean backscatter mosaic over the dominant orbit
///
/// Scenes from the better-populated orbit direction are grouped by relative
/// orbit number; each group reduces to its temporal mean and the group means
/// are mosaicked first-valid. Output is normalized over the decibel range
/// and nodata-filled. An empty scene set yields an all-zero composite.
pub fn single_orbit_mean(
    region: &Region,
    scenes: &[&Scene],
    params: &BackscatterParams,
) -> CompositeResult<Composite> {
    let band_names: Vec<String> = params.polarizations.iter().map(|p| p.to_string()).collect();
    if scenes.is_empty() {
        log::warn!("No eligible scenes; producing all-zero composite");
        return Ok(Composite::empty(&band_names, region.shape));
    }

    let pass = select_orbit_pass(scenes);
    let groups = orbit_groups(scenes, pass);
    log::info!("{} relative orbit groups for {}", groups.len(), pass);

    let mut data = HashMap::new();
    for band in &band_names {
        let mut group_means: Vec<Raster> = Vec::with_capacity(groups.len());
        for (_, group) in &groups {
            let masked: Vec<Raster> = group
                .iter()
                .map(|s| s.band(band).map(|r| mask_noise(r, params.noise_floor_db)))
                .collect::<CompositeResult<_>>()?;
            let refs: Vec<&Raster> = masked.iter().collect();
            group_means.push(metrics::reduce_stack(region.shape, &refs, Metric::Mean));
        }
        let refs: Vec<&Raster> = group_means.iter().collect();
        let mosaic = composite::first_valid_mosaic(region.shape, &refs);
        let scaled = composite::unit_scale(&mosaic, params.db_range);
        data.insert(band.clone(), composite::fill_nodata(&scaled, 0.0));
    }

    Ok(Composite {
        band_order: band_names,
        data,
        shape: region.shape,
    })
}

/// Mean and standard-deviation backscatter mosaics over the dominant orbit
///
/// Like [`single_orbit_mean`] but emits `{pol}_mean` and `{pol}_stdDev`
/// bands, with the standard deviation normalized over its own range.
pub fn single_orbit_metrics(
    region: &Region,
    scenes: &[&Scene],
    params: &BackscatterParams,
) -> CompositeResult<Composite> {
    let mut band_order: Vec<String> = Vec::new();
    for pol in &params.polarizations {
        band_order.push(format!("{}_mean", pol));
        band_order.push(format!("{}_stdDev", pol));
    }
    if scenes.is_empty() {
        log::warn!("No eligible scenes; producing all-zero composite");
        return Ok(Composite::empty(&band_order, region.shape));
    }

    let pass = select_orbit_pass(scenes);
    let groups = orbit_groups(scenes, pass);

    let mut data = HashMap::new();
    for pol in &params.polarizations {
        let band = pol.to_string();
        let mut group_means: Vec<Raster> = Vec::with_capacity(groups.len());
        let mut group_stds: Vec<Raster> = Vec::with_capacity(groups.len());
        for (_, group) in &groups {
            let masked: Vec<Raster> = group
                .iter()
                .map(|s| s.band(&band).map(|r| mask_noise(r, params.noise_floor_db)))
                .collect::<CompositeResult<_>>()?;
            let refs: Vec<&Raster> = masked.iter().collect();
            group_means.push(metrics::reduce_stack(region.shape, &refs, Metric::Mean));
            group_stds.push(metrics::reduce_stack(region.shape, &refs, Metric::StdDev));
        }

        let mean_refs: Vec<&Raster> = group_means.iter().collect();
        let mean_mosaic = composite::first_valid_mosaic(region.shape, &mean_refs);
        let mean_scaled = composite::unit_scale(&mean_mosaic, params.db_range);
        data.insert(
            format!("{}_mean", pol),
            composite::fill_nodata(&mean_scaled, 0.0),
        );

        let std_refs: Vec<&Raster> = group_stds.iter().collect();
        let std_mosaic = composite::first_valid_mosaic(region.shape, &std_refs);
        let std_scaled = composite::unit_scale(&std_mosaic, params.std_range);
        data.insert(
            format!("{}_stdDev", pol),
            composite::fill_nodata(&std_scaled, 0.0),
        );
    }

    Ok(Composite {
        band_order,
        data,
        shape: region.shape,
    })
}
