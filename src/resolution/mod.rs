//! Resolution decision engine.
//!
//! Computes the resolution a trackable should publish at from three
//! competing inputs: what subscribers asked for, how close the trackable is to
//! its destination, and how much battery the device has left. The decision is
//! a pure function of its input and is safe to call from anywhere.

pub mod constraints;

pub use constraints::ResolutionConstraints;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::Resolution;

// ---------------------------------------------------------------------------
// Classifications
// ---------------------------------------------------------------------------

/// Where a measured value sits relative to its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdClass {
    Below,
    Above,
}

impl ThresholdClass {
    /// A missing measurement never counts as below the threshold.
    fn classify<T: PartialOrd>(value: Option<T>, threshold: T) -> Self {
        match value {
            Some(value) if value < threshold => ThresholdClass::Below,
            _ => ThresholdClass::Above,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberClass {
    None,
    One,
    Multiple,
}

impl SubscriberClass {
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => SubscriberClass::None,
            1 => SubscriberClass::One,
            _ => SubscriberClass::Multiple,
        }
    }
}

/// A cell of the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyKey {
    pub battery: ThresholdClass,
    pub proximity: ThresholdClass,
    pub subscribers: SubscriberClass,
}

impl PolicyKey {
    pub fn new(battery: ThresholdClass, proximity: ThresholdClass, subscribers: SubscriberClass) -> Self {
        Self {
            battery,
            proximity,
            subscribers,
        }
    }

    /// Every combination of the three classifications.
    pub fn all() -> impl Iterator<Item = PolicyKey> {
        const THRESHOLDS: [ThresholdClass; 2] = [ThresholdClass::Below, ThresholdClass::Above];
        const SUBSCRIBERS: [SubscriberClass; 3] =
            [SubscriberClass::None, SubscriberClass::One, SubscriberClass::Multiple];

        THRESHOLDS.into_iter().flat_map(|battery| {
            THRESHOLDS.into_iter().flat_map(move |proximity| {
                SUBSCRIBERS
                    .into_iter()
                    .map(move |subscribers| PolicyKey::new(battery, proximity, subscribers))
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Policy table
// ---------------------------------------------------------------------------

/// Per-state base resolutions.
///
/// Lookups are total: combinations without an explicit entry resolve to the
/// caller's default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyTable {
    entries: HashMap<PolicyKey, Resolution>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: PolicyKey, resolution: Resolution) -> Self {
        self.entries.insert(key, resolution);
        self
    }

    pub fn insert(&mut self, key: PolicyKey, resolution: Resolution) {
        self.entries.insert(key, resolution);
    }

    /// The explicit entry for `key`, if the caller specified one.
    pub fn get(&self, key: &PolicyKey) -> Option<&Resolution> {
        self.entries.get(key)
    }

    /// The entry for `key`, or `default` when none was specified.
    pub fn lookup(&self, key: &PolicyKey, default: Resolution) -> Resolution {
        self.get(key).copied().unwrap_or(default)
    }

    /// Whether every combination has an explicit entry.
    pub fn is_total(&self) -> bool {
        PolicyKey::all().all(|key| self.entries.contains_key(&key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Everything [`decide`] looks at.
#[derive(Debug, Clone)]
pub struct DecisionInput<'a> {
    /// Battery charge in percent, if known.
    pub battery_level: Option<f32>,
    /// Distance to destination, if a destination is set.
    pub proximity: Option<f64>,
    /// One entry per subscriber; `None` for subscribers that asked for nothing specific.
    pub subscriber_requests: &'a [Option<Resolution>],
    pub policy: &'a PolicyTable,
    pub proximity_threshold: f64,
    pub battery_threshold: f32,
    pub battery_multiplier: f32,
    pub default_resolution: Resolution,
}

impl<'a> DecisionInput<'a> {
    /// Input shaped by a trackable's constraints.
    pub fn from_constraints(
        constraints: &'a ResolutionConstraints,
        battery_level: Option<f32>,
        proximity: Option<f64>,
        subscriber_requests: &'a [Option<Resolution>],
    ) -> Self {
        Self {
            battery_level,
            proximity,
            subscriber_requests,
            policy: &constraints.policy,
            proximity_threshold: constraints.proximity_threshold,
            battery_threshold: constraints.battery_threshold,
            battery_multiplier: constraints.low_battery_multiplier,
            default_resolution: constraints.default_resolution,
        }
    }

    pub fn policy_key(&self) -> PolicyKey {
        PolicyKey::new(
            ThresholdClass::classify(self.battery_level, self.battery_threshold),
            ThresholdClass::classify(self.proximity, self.proximity_threshold),
            SubscriberClass::from_count(self.subscriber_requests.len()),
        )
    }
}

/// Decide the resolution for one trackable.
///
/// The table entry for the current (battery, proximity, subscribers) cell, or
/// the default when the table leaves that cell out, is the base. A single
/// subscriber's explicit request replaces it; several subscribers' requests
/// are combined with it, lowest wins. Below the proximity threshold requests
/// are always combined with the base rather than replacing it. Low battery
/// stretches only the interval.
pub fn decide(input: &DecisionInput<'_>) -> Resolution {
    let key = input.policy_key();
    let base = input.policy.lookup(&key, input.default_resolution);
    let lowest_request = input
        .subscriber_requests
        .iter()
        .flatten()
        .copied()
        .reduce(Resolution::lowest);

    let combined = lowest_request.map(|request| base.lowest(request));
    let resolution = match (key.proximity, key.subscribers) {
        (ThresholdClass::Below, _) => combined.unwrap_or(base),
        (ThresholdClass::Above, SubscriberClass::None) => base,
        (ThresholdClass::Above, SubscriberClass::One) => lowest_request.unwrap_or(base),
        (ThresholdClass::Above, SubscriberClass::Multiple) => combined.unwrap_or(base),
    };

    match key.battery {
        ThresholdClass::Below => resolution.with_interval_multiplied(input.battery_multiplier),
        ThresholdClass::Above => resolution,
    }
}

/// Rate the location engine should sample at: the highest of the decided
/// per-trackable resolutions, so every trackable gets at least what it needs.
pub fn location_sampling<I>(resolutions: I, default: Resolution) -> Resolution
where
    I: IntoIterator<Item = Resolution>,
{
    resolutions
        .into_iter()
        .reduce(Resolution::highest)
        .unwrap_or(default)
}
