use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::vital::{VitalKind, VitalResult};

/// Biological sex as used by the pressure model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unspecified,
}

impl Gender {
    /// Numeric code used by profile stores: 1 is male, anything else is not.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Gender::Male,
            2 => Gender::Female,
            _ => Gender::Unspecified,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Gender::Male => 1,
            Gender::Female => 2,
            Gender::Unspecified => 0,
        }
    }

    pub fn is_male(&self) -> bool {
        matches!(self, Gender::Male)
    }
}

/// User body measurements, read-only input to the pressure model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnthropometricProfile {
    pub age: f64,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub gender: Gender,
}

impl Default for AnthropometricProfile {
    fn default() -> Self {
        Self {
            age: 30.0,
            height_cm: 170.0,
            weight_kg: 70.0,
            gender: Gender::Unspecified,
        }
    }
}

impl AnthropometricProfile {
    /// Replaces missing or nonsensical fields with the defaults.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let pick = |v: f64, d: f64| if v.is_finite() && v > 0.0 { v } else { d };
        Self {
            age: pick(self.age, defaults.age),
            height_cm: pick(self.height_cm, defaults.height_cm),
            weight_kg: pick(self.weight_kg, defaults.weight_kg),
            gender: self.gender,
        }
    }
}

/// When the user last ate, scaling the glucose estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealTiming {
    #[default]
    Fasting,
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealTiming {
    pub fn factor(&self) -> f64 {
        match self {
            MealTiming::Fasting => 1.0,
            MealTiming::Breakfast => 1.1,
            MealTiming::Lunch | MealTiming::Dinner => 1.05,
            MealTiming::Snack => 1.02,
        }
    }
}

/// External collaborator holding user profiles and measurement history.
pub trait ProfileStore {
    fn profile(&self, user: &str) -> Option<AnthropometricProfile>;
    fn record(&mut self, user: &str, result: &VitalResult);
}

/// Everything stored for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    pub profile: AnthropometricProfile,
    pub results: Vec<VitalResult>,
}

impl UserRecord {
    pub fn latest(&self, kind: VitalKind) -> Option<&VitalResult> {
        self.results.iter().rev().find(|r| r.kind == kind)
    }
}

/// In-memory profile store, serializable to a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryProfileStore {
    // BTreeMap keeps users sorted in the saved file.
    pub users: BTreeMap<String, UserRecord>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_profile(&mut self, user: &str, profile: AnthropometricProfile) {
        self.users.entry(user.to_string()).or_default().profile = profile;
    }

    pub fn user(&self, user: &str) -> Option<&UserRecord> {
        self.users.get(user)
    }

    /// Writes the store as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("serializing profile store")?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    /// Reads a store previously written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
    }
}

impl ProfileStore for MemoryProfileStore {
    fn profile(&self, user: &str) -> Option<AnthropometricProfile> {
        self.users.get(user).map(|r| r.profile)
    }

    fn record(&mut self, user: &str, result: &VitalResult) {
        self.users
            .entry(user.to_string())
            .or_default()
            .results
            .push(*result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vital::{Quality, VitalValue};
    use std::time::Duration;

    #[test]
    fn gender_codes() {
        assert!(Gender::from_code(1).is_male());
        assert!(!Gender::from_code(0).is_male());
        assert_eq!(Gender::from_code(7), Gender::Unspecified);
        assert_eq!(Gender::Male.code(), 1);
    }

    #[test]
    fn partial_profile_json_uses_defaults() {
        let p: AnthropometricProfile = serde_json::from_str(r#"{ "age": 52, "gender": "male" }"#).unwrap();
        assert_eq!(p.age, 52.0);
        assert_eq!(p.height_cm, 170.0);
        assert!(p.gender.is_male());

        let fixed = AnthropometricProfile {
            weight_kg: -3.0,
            ..p
        }
        .sanitized();
        assert_eq!(fixed.weight_kg, 70.0);
    }

    #[test]
    fn store_records_history() {
        let mut store = MemoryProfileStore::new();
        store.insert_profile("ana", AnthropometricProfile::default());
        let result = VitalResult {
            kind: VitalKind::HeartRate,
            value: VitalValue::HeartRate { bpm: 64.0 },
            quality: Quality {
                snr: 9.0,
                confidence: 1.0,
            },
            timestamp: Duration::from_secs(12),
            elapsed: Duration::from_secs(11),
        };
        store.record("ana", &result);
        store.record("bo", &result);

        assert_eq!(store.user("ana").unwrap().latest(VitalKind::HeartRate), Some(&result));
        assert!(store.user("ana").unwrap().latest(VitalKind::Spo2).is_none());
        assert_eq!(store.profile("bo"), Some(AnthropometricProfile::default()));
        assert!(store.profile("cy").is_none());
    }

    #[test]
    fn meal_factors() {
        assert_eq!(MealTiming::Fasting.factor(), 1.0);
        assert_eq!(MealTiming::Breakfast.factor(), 1.1);
        assert_eq!(MealTiming::Dinner.factor(), 1.05);
        assert_eq!(MealTiming::Snack.factor(), 1.02);
    }
}
