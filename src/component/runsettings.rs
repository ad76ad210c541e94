//! Per-instance run-setting values.
//!
//! Values are keyed by run-setting id. Keys given by callers may be the
//! full dotted id or, when unambiguous, the leaf name.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::definition::runsettings::InactiveReason;
use crate::definition::{RunSettingParam, RunSettingsDefinition};
use crate::errors::{ComponentError, Result};
use crate::types::ParamValue;
use crate::validation::ErrorCode;

/// Typed, validated run-setting store of one instance.
#[derive(Debug, Clone)]
pub struct RunSettings {
    definition: Arc<RunSettingsDefinition>,
    values: FxHashMap<String, ParamValue>,
}

impl RunSettings {
    pub fn new(definition: Arc<RunSettingsDefinition>) -> Self {
        Self {
            definition,
            values: FxHashMap::default(),
        }
    }

    pub fn definition(&self) -> &RunSettingsDefinition {
        &self.definition
    }

    fn resolve(&self, key: &str) -> Result<String> {
        self.definition
            .resolve_key(key)
            .map(str::to_string)
            .ok_or_else(|| {
                ComponentError::validation(
                    ErrorCode::UnknownArgument,
                    format!("runsettings/{}", key),
                    format!("unknown run setting '{}'", key),
                )
            })
    }

    /// Set a value. Activation is checked by validation, not here, so
    /// settings can be assigned in any order.
    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) -> Result<()> {
        let id = self.resolve(key)?;
        self.values.insert(id, value.into());
        Ok(())
    }

    pub fn unset(&mut self, key: &str) -> Option<ParamValue> {
        let id = self.definition.resolve_key(key)?.to_string();
        self.values.remove(&id)
    }

    /// The explicitly set value.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        let id = self.definition.resolve_key(key)?;
        self.values.get(id)
    }

    fn lookup(&self) -> impl Fn(&str) -> Option<ParamValue> + '_ {
        move |id: &str| self.values.get(id).cloned()
    }

    /// Explicit value or active default; `None` when inactive.
    pub fn effective(&self, key: &str) -> Option<ParamValue> {
        let id = self.definition.resolve_key(key)?;
        self.definition.effective_value(id, &self.lookup())
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.definition
            .resolve_key(key)
            .map_or(false, |id| self.definition.active_variant(id, &self.lookup()).is_some())
    }

    pub fn inactive_reason(&self, key: &str) -> Option<InactiveReason> {
        let id = self.definition.resolve_key(key)?;
        self.definition.inactive_reason(id, &self.lookup())
    }

    pub fn active_variant(&self, key: &str) -> Option<&RunSettingParam> {
        let id = self.definition.resolve_key(key)?;
        self.definition.active_variant(id, &self.lookup())
    }

    /// Active entries with a value, in schema order.
    pub fn active_values(&self) -> Vec<(&RunSettingParam, ParamValue)> {
        let lookup = self.lookup();
        self.definition
            .entries()
            .iter()
            .filter_map(|entry| {
                let variant = self.definition.active_variant(&entry.id, &lookup)?;
                let value = self.definition.effective_value(&entry.id, &lookup)?;
                Some((variant, value))
            })
            .collect()
    }

    /// Ids that were explicitly set.
    pub fn explicit_ids(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Compute target named on this instance, explicit or default.
    pub fn target(&self) -> Option<String> {
        let entry = self.definition.compute_target()?;
        self.definition
            .effective_value(&entry.id, &self.lookup())
            .map(|v| v.render())
            .filter(|name| !name.is_empty())
    }

    pub fn set_target(&mut self, name: impl Into<String>) -> Result<()> {
        let id = self
            .definition
            .compute_target()
            .map(|e| e.id.clone())
            .ok_or_else(|| {
                ComponentError::validation(
                    ErrorCode::UnknownArgument,
                    "runsettings/target",
                    "component declares no compute target setting",
                )
            })?;
        self.values.insert(id, ParamValue::Str(name.into()));
        Ok(())
    }

    /// Carry values over to a new schema, keeping only keys it knows.
    pub(crate) fn rebased(&self, definition: Arc<RunSettingsDefinition>) -> Self {
        let mut next = Self::new(definition);
        for (id, value) in &self.values {
            if let Some(new_id) = next.definition.resolve_key(id).map(str::to_string) {
                next.values.insert(new_id, value.clone());
            }
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParamType;

    fn store() -> RunSettings {
        let def = RunSettingsDefinition::new(vec![
            RunSettingParam::compute_target("target", ["AmlCompute"]),
            RunSettingParam::new("resource.node_count", ParamType::Int).with_default(1),
            RunSettingParam::new("sweep.early_termination.policy_type", ParamType::Str)
                .with_enum(["bandit", "median"])
                .optional(),
            RunSettingParam::new("sweep.early_termination.slack_factor", ParamType::Float)
                .enabled_by("policy_type", ["bandit"])
                .optional(),
        ])
        .unwrap();
        RunSettings::new(Arc::new(def))
    }

    #[test]
    fn test_set_by_leaf_and_id() {
        let mut rs = store();
        rs.set("node_count", 4).unwrap();
        assert_eq!(rs.get("resource.node_count"), Some(&ParamValue::Int(4)));
        let err = rs.set("nonexistent", 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownArgument);
    }

    #[test]
    fn test_active_values_skip_inactive() {
        let mut rs = store();
        rs.set("policy_type", "median").unwrap();
        rs.set("slack_factor", 0.1).unwrap();
        assert!(!rs.is_active("slack_factor"));
        assert_eq!(
            rs.inactive_reason("slack_factor").map(|r| r.code),
            Some(ErrorCode::NotEnabled)
        );
        let ids: Vec<&str> = rs.active_values().iter().map(|(p, _)| p.id.as_str()).collect();
        assert_eq!(ids, vec!["resource.node_count", "sweep.early_termination.policy_type"]);

        rs.set("policy_type", "bandit").unwrap();
        assert_eq!(rs.effective("slack_factor"), Some(ParamValue::Float(0.1)));
    }

    #[test]
    fn test_target() {
        let mut rs = store();
        assert_eq!(rs.target(), None);
        rs.set_target("cpu-cluster").unwrap();
        assert_eq!(rs.target().as_deref(), Some("cpu-cluster"));
        assert!(rs.unset("target").is_some());
        assert_eq!(rs.target(), None);
    }

    #[test]
    fn test_rebased_keeps_known_keys() {
        let mut rs = store();
        rs.set("node_count", 2).unwrap();
        rs.set_target("gpu").unwrap();
        let narrower = RunSettingsDefinition::new(vec![RunSettingParam::new(
            "resource.node_count",
            ParamType::Int,
        )])
        .unwrap();
        let next = rs.rebased(Arc::new(narrower));
        assert_eq!(next.get("node_count"), Some(&ParamValue::Int(2)));
        assert_eq!(next.target(), None);
    }
}
