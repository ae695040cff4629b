use crate::types::{OrbitPass, Polarization, Region, Scene};
use chrono::{DateTime, Utc};

/// Typed metadata predicate applied during scene selection
///
/// Each variant corresponds to one catalog metadata filter; a scene must
/// satisfy every predicate to stay eligible. Scenes missing the queried
/// metadata field fail the predicate.
#[derive(Debug, Clone)]
pub enum ScenePredicate {
    /// Instrument mode equals the given string (e.g., "IW")
    InstrumentMode(String),
    /// Orbit direction equals the given pass
    OrbitPass(OrbitPass),
    /// Relative orbit number equals the given value
    RelativeOrbit(u32),
    /// All listed polarizations are present on the scene
    PolarizationsPresent(Vec<Polarization>),
    /// Reported whole-scene cloud percentage is not greater than the cutoff
    MaxCloudPercentage(f32),
}

impl ScenePredicate {
    pub fn matches(&self, scene: &Scene) -> bool {
        let md = &scene.metadata;
        match self {
            ScenePredicate::InstrumentMode(mode) => {
                md.instrument_mode.as_deref() == Some(mode.as_str())
            }
            ScenePredicate::OrbitPass(pass) => md.orbit_pass == Some(*pass),
            ScenePredicate::RelativeOrbit(number) => md.relative_orbit == Some(*number),
            ScenePredicate::PolarizationsPresent(pols) => {
                pols.iter().all(|p| md.polarizations.contains(p))
            }
            ScenePredicate::MaxCloudPercentage(cutoff) => match md.cloud_percentage {
                Some(pct) => pct <= *cutoff,
                None => false,
            },
        }
    }
}

/// Scene eligibility filter for one region and time window
///
/// The time interval is half-open: `start <= acquired < end`.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub predicates: Vec<ScenePredicate>,
}

impl EligibilityFilter {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            predicates: Vec::new(),
        }
    }

    pub fn with_predicate(mut self, predicate: ScenePredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    fn is_eligible(&self, scene: &Scene, region: &Region) -> bool {
        if scene.acquired < self.start || scene.acquired >= self.end {
            return false;
        }
        if !scene_intersects_region(scene, region) {
            return false;
        }
        self.predicates.iter().all(|p| p.matches(scene))
    }

    /// Select the eligible subset of a scene stack
    ///
    /// An empty result is a valid outcome, not an error; downstream
    /// compositing turns it into an all-zero output.
    pub fn apply<'a>(&self, scenes: &'a [Scene], region: &Region) -> Vec<&'a Scene> {
        let eligible: Vec<&Scene> = scenes
            .iter()
            .filter(|s| self.is_eligible(s, region))
            .collect();
        log::info!(
            "{} of {} scenes eligible for region window [{}, {})",
            eligible.len(),
            scenes.len(),
            self.start,
            self.end
        );
        eligible
    }
}

fn scene_intersects_region(scene: &Scene, region: &Region) -> bool {
    let scene_bbox = crate::types::BoundingBox::from_ring(&scene.footprint);
    if !scene_bbox.intersects(&region.bounding_box()) {
        return false;
    }
    // bbox overlap is a cheap pre-test; confirm with the actual clip
    let intersection = super::geometry::clip_polygon(&scene.footprint, &region.ring);
    super::geometry::area(&intersection, super::geometry::DEFAULT_ERROR_MARGIN) > 0.0
}
