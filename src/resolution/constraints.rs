//! Per-trackable resolution constraints and their TOML form.
//!
//! ```toml
//! proximity_threshold = 100.0
//! battery_threshold = 15.0
//! low_battery_multiplier = 2.0
//!
//! [default_resolution]
//! accuracy = "balanced"
//! desired_interval_ms = 1000
//! minimum_displacement = 1.0
//!
//! [[policy]]
//! battery = "above"
//! proximity = "below"
//! subscribers = "multiple"
//! resolution = { accuracy = "high", desired_interval_ms = 500, minimum_displacement = 0.5 }
//! ```

use serde::Deserialize;
use std::path::Path;

use super::{PolicyKey, PolicyTable, SubscriberClass, ThresholdClass};
use crate::error::{Error, Result};
use crate::model::Resolution;

/// Inputs a trackable brings to the decision engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionConstraints {
    pub policy: PolicyTable,
    /// Fallback for every cell the policy table leaves out.
    pub default_resolution: Resolution,
    pub proximity_threshold: f64,
    /// Battery percentage under which the low battery multiplier applies.
    pub battery_threshold: f32,
    pub low_battery_multiplier: f32,
}

impl ResolutionConstraints {
    /// Constraints that never classify anything as below a threshold.
    ///
    /// With these the decision reduces to the subscriber rules over `default`.
    pub fn unconstrained(default_resolution: Resolution) -> Self {
        Self {
            policy: PolicyTable::new(),
            default_resolution,
            proximity_threshold: f64::NEG_INFINITY,
            battery_threshold: f32::NEG_INFINITY,
            low_battery_multiplier: 1.0,
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConstraintsFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad resolution constraints: {e}")))?;
        file.try_into()
    }

    /// Load constraints from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read constraints file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }
}

/// Top-level TOML layout.
#[derive(Debug, Deserialize)]
struct ConstraintsFile {
    proximity_threshold: f64,
    battery_threshold: f32,
    #[serde(default = "default_multiplier")]
    low_battery_multiplier: f32,
    default_resolution: Resolution,
    #[serde(default)]
    policy: Vec<PolicyEntry>,
}

#[derive(Debug, Deserialize)]
struct PolicyEntry {
    battery: ThresholdClass,
    proximity: ThresholdClass,
    subscribers: SubscriberClass,
    resolution: Resolution,
}

fn default_multiplier() -> f32 {
    1.0
}

impl TryFrom<ConstraintsFile> for ResolutionConstraints {
    type Error = Error;

    fn try_from(file: ConstraintsFile) -> Result<Self> {
        if !(file.low_battery_multiplier.is_finite() && file.low_battery_multiplier > 0.0) {
            return Err(Error::Config(format!(
                "low_battery_multiplier must be positive, got {}",
                file.low_battery_multiplier
            )));
        }

        let mut policy = PolicyTable::new();
        for entry in file.policy {
            let key = PolicyKey::new(entry.battery, entry.proximity, entry.subscribers);
            if policy.get(&key).is_some() {
                return Err(Error::Config(format!("duplicate policy entry for {key:?}")));
            }
            policy.insert(key, entry.resolution);
        }
        if policy.is_empty() {
            tracing::debug!("no policy entries, every cell uses the default resolution");
        } else if !policy.is_total() {
            tracing::debug!(
                entries = policy.len(),
                "partial policy, missing cells use the default resolution"
            );
        }

        Ok(Self {
            policy,
            default_resolution: file.default_resolution,
            proximity_threshold: file.proximity_threshold,
            battery_threshold: file.battery_threshold,
            low_battery_multiplier: file.low_battery_multiplier,
        })
    }
}
