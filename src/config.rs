use crate::core::backscatter::{self, BackscatterParams};
use crate::core::composite::{
    self, CloudFreeParams, Composite, LeastCloudyParams, QualityMosaicParams,
};
use crate::types::{CompositeError, CompositeResult, Polarization, Region, Scene};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One satellite-data record from a download configuration
///
/// Field names follow the configuration files' conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ProductRecord {
    pub sensor: String,
    pub product: String,
    pub bands: Vec<String>,
    /// Optional override of the declared input range for normalization
    #[serde(default)]
    pub normalization_bounds: Option<(f32, f32)>,
}

/// Load product records from a JSON configuration file
///
/// A missing file is fatal (I/O error), matching the error policy for
/// expected local inputs.
pub fn load_records<P: AsRef<Path>>(path: P) -> CompositeResult<Vec<ProductRecord>> {
    log::info!("Loading product records from {}", path.as_ref().display());
    let contents = std::fs::read_to_string(path)?;
    let records: Vec<ProductRecord> = serde_json::from_str(&contents)?;
    Ok(records)
}

/// Supported sensor/product combinations with their resolved parameters
///
/// The string-keyed sensor/product pairs of the configuration are resolved
/// into this tagged variant once, at configuration time; dispatch afterwards
/// is a plain match.
#[derive(Debug, Clone)]
pub enum ProductKind {
    /// Sentinel-1 GRD: mean backscatter over the dominant orbit
    SingleOrbitMean(BackscatterParams),
    /// Sentinel-1 GRD: mean + stdDev backscatter over the dominant orbit
    SingleOrbitMetrics(BackscatterParams),
    /// Sentinel-2 TOA: ranked cloud-free mosaic with fallback layering
    CloudFreeMosaic(CloudFreeParams),
    /// Sentinel-2 TOA: shadow-aware per-pixel quality mosaic
    QualityMosaic(QualityMosaicParams),
    /// Sentinel-2 (probability layer): least-cloudy ranked mosaic
    LeastCloudyMosaic(LeastCloudyParams),
}

impl ProductKind {
    /// Resolve a configuration record into a dispatchable product
    pub fn resolve(record: &ProductRecord) -> CompositeResult<Self> {
        let kind = match (record.sensor.as_str(), record.product.as_str()) {
            ("sentinel1", "single_orbit_mosaic") => {
                let mut params = BackscatterParams {
                    polarizations: parse_polarizations(&record.bands)?,
                    ..BackscatterParams::default()
                };
                if let Some(bounds) = record.normalization_bounds {
                    params.db_range = bounds;
                }
                ProductKind::SingleOrbitMean(params)
            }
            ("sentinel1", "single_orbit_metrics") => {
                let mut params = BackscatterParams {
                    polarizations: parse_polarizations(&record.bands)?,
                    ..BackscatterParams::default()
                };
                if let Some(bounds) = record.normalization_bounds {
                    params.db_range = bounds;
                }
                ProductKind::SingleOrbitMetrics(params)
            }
            ("sentinel2toa", "simple_cloud_free_mosaic") => {
                let mut params = CloudFreeParams {
                    bands: record.bands.clone(),
                    ..CloudFreeParams::default()
                };
                if let Some(bounds) = record.normalization_bounds {
                    params.input_range = bounds;
                }
                ProductKind::CloudFreeMosaic(params)
            }
            ("sentinel2toa", "quality_mosaic") => {
                let mut params = QualityMosaicParams {
                    bands: record.bands.clone(),
                    ..QualityMosaicParams::default()
                };
                if let Some(bounds) = record.normalization_bounds {
                    params.input_range = bounds;
                }
                ProductKind::QualityMosaic(params)
            }
            ("sentinel2toa" | "sentinel2sr", "least_cloudy_mosaic") => {
                let mut params = LeastCloudyParams {
                    bands: record.bands.clone(),
                    ..LeastCloudyParams::default()
                };
                if let Some(bounds) = record.normalization_bounds {
                    params.input_range = bounds;
                }
                ProductKind::LeastCloudyMosaic(params)
            }
            (sensor, product) => {
                return Err(CompositeError::Config(format!(
                    "unsupported sensor/product combination: {}/{}",
                    sensor, product
                )))
            }
        };
        Ok(kind)
    }

    /// Build the composite for one region from an eligible scene stack
    pub fn build(&self, region: &Region, scenes: &[&Scene]) -> CompositeResult<Composite> {
        match self {
            ProductKind::SingleOrbitMean(params) => {
                backscatter::single_orbit_mean(region, scenes, params)
            }
            ProductKind::SingleOrbitMetrics(params) => {
                backscatter::single_orbit_metrics(region, scenes, params)
            }
            ProductKind::CloudFreeMosaic(params) => {
                composite::cloud_free_composite(region, scenes, params)
            }
            ProductKind::QualityMosaic(params) => {
                composite::quality_composite(region, scenes, params)
            }
            ProductKind::LeastCloudyMosaic(params) => {
                composite::least_cloudy_composite(region, scenes, params)
            }
        }
    }
}

fn parse_polarizations(bands: &[String]) -> CompositeResult<Vec<Polarization>> {
    bands
        .iter()
        .map(|b| match b.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            other => Err(CompositeError::Config(format!(
                "invalid polarization band: {}",
                other
            ))),
        })
        .collect()
}
