//! Run-setting schema.
//!
//! Run settings are execution knobs (compute target, node count, sweep
//! policy, ...) addressed by dotted id, e.g. `sweep.early_termination.policy_type`.
//! Several records may share one id when the knob has different shapes in
//! different contexts; they are merged into one [`RunSettingEntry`] whose
//! active variant is chosen from sibling values.

use serde::{Deserialize, Serialize};

use crate::errors::{ComponentError, Result};
use crate::types::{ParamType, ParamValue};
use crate::validation::ErrorCode;

use super::{check_dependency_cycles, EnabledBy, ScalarSchema};

/// Section holding sweep search-space parameters.
pub const SEARCH_SPACE_SECTION: &str = "sweep.search_space";

/// Section whose settings are sent as compute run settings.
pub const COMPUTE_SECTION: &str = "compute";

/// Required top-level JSON shape of a JSON-string run setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonShape {
    Any,
    Object,
    Array,
}

impl JsonShape {
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            Self::Any => true,
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// One run-setting record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettingParam {
    /// Dotted id: `section.argument` or `argument`.
    pub id: String,
    pub schema: ScalarSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_shape: Option<JsonShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
    pub optional: bool,
    #[serde(default)]
    pub is_compute_target: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_compute_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_by: Option<EnabledBy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_by: Vec<String>,
    /// Component parameters a search-space entry drives.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RunSettingParam {
    pub fn new(id: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            id: id.into(),
            schema: ScalarSchema::new(param_type),
            json_shape: None,
            default: None,
            optional: false,
            is_compute_target: false,
            valid_compute_types: Vec::new(),
            enabled_by: None,
            disabled_by: Vec::new(),
            linked_parameters: Vec::new(),
            description: None,
        }
    }

    /// The compute-target knob, restricted to `valid_types` when non-empty.
    pub fn compute_target<I, S>(id: impl Into<String>, valid_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut param = Self::new(id, ParamType::Str);
        param.is_compute_target = true;
        param.optional = true;
        param.valid_compute_types = valid_types.into_iter().map(Into::into).collect();
        param
    }

    /// A JSON-string knob accepting a native dict/list or a JSON string.
    pub fn json(id: impl Into<String>, shape: JsonShape) -> Self {
        let mut param = Self::new(id, ParamType::Str);
        param.json_shape = Some(shape);
        param
    }

    /// Leaf argument name.
    pub fn name(&self) -> &str {
        self.id.rsplit('.').next().unwrap_or(&self.id)
    }

    /// Dotted section path, empty for top-level settings.
    pub fn section(&self) -> &str {
        match self.id.rfind('.') {
            Some(i) => &self.id[..i],
            None => "",
        }
    }

    pub fn is_search_space(&self) -> bool {
        self.section() == SEARCH_SPACE_SECTION
            || self.section().starts_with("sweep.search_space.")
    }

    pub fn is_compute_setting(&self) -> bool {
        self.section() == COMPUTE_SECTION || self.section().starts_with("compute.")
    }

    pub fn with_default(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self.optional = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.schema.min = min;
        self.schema.max = max;
        self
    }

    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn enabled_by<I, S>(mut self, parameter: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enabled_by = Some(EnabledBy::new(parameter, values));
        self
    }

    pub fn disabled_by(mut self, parameter: impl Into<String>) -> Self {
        self.disabled_by.push(parameter.into());
        self
    }

    pub fn with_linked_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.linked_parameters = names.into_iter().map(Into::into).collect();
        self
    }
}

/// All variants sharing one id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSettingEntry {
    pub id: String,
    pub variants: Vec<RunSettingParam>,
}

impl RunSettingEntry {
    pub fn primary(&self) -> &RunSettingParam {
        &self.variants[0]
    }

    pub fn is_compute_target(&self) -> bool {
        self.variants.iter().any(|v| v.is_compute_target)
    }
}

/// Why a run setting is currently not active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InactiveReason {
    pub code: ErrorCode,
    pub message: String,
}

/// The full run-setting schema of a component.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RunSettingsDefinition {
    entries: Vec<RunSettingEntry>,
}

impl RunSettingsDefinition {
    /// Merge records by id and reject enable/disable cycles.
    pub fn new(params: Vec<RunSettingParam>) -> Result<Self> {
        let mut entries: Vec<RunSettingEntry> = Vec::new();
        for param in params {
            if param.id.trim().is_empty() {
                return Err(ComponentError::invalid_spec("run setting with empty id"));
            }
            match entries.iter_mut().find(|e| e.id == param.id) {
                Some(entry) => entry.variants.push(param),
                None => entries.push(RunSettingEntry {
                    id: param.id.clone(),
                    variants: vec![param],
                }),
            }
        }

        let definition = Self { entries };
        let edges: Vec<(String, Vec<String>)> = definition
            .entries
            .iter()
            .map(|entry| {
                let deps = entry
                    .variants
                    .iter()
                    .flat_map(|v| {
                        v.enabled_by
                            .iter()
                            .map(|e| e.parameter.as_str())
                            .chain(v.disabled_by.iter().map(String::as_str))
                            .filter_map(|name| definition.resolve_dependency(v, name))
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
                    .collect();
                (entry.id.clone(), deps)
            })
            .collect();
        check_dependency_cycles(&edges, "/runsettings")?;
        Ok(definition)
    }

    pub fn entries(&self) -> &[RunSettingEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: &str) -> Option<&RunSettingEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Resolve a user key to an id: exact id first, else a unique leaf name.
    pub fn resolve_key(&self, key: &str) -> Option<&str> {
        if let Some(entry) = self.entry(key) {
            return Some(&entry.id);
        }
        let mut matches = self.entries.iter().filter(|e| e.primary().name() == key);
        match (matches.next(), matches.next()) {
            (Some(entry), None) => Some(&entry.id),
            _ => None,
        }
    }

    /// Resolve a dependency named by `from`: exact id, sibling in the same
    /// section, then unique leaf name.
    pub fn resolve_dependency(&self, from: &RunSettingParam, name: &str) -> Option<&str> {
        if let Some(entry) = self.entry(name) {
            return Some(&entry.id);
        }
        let section = from.section();
        if !section.is_empty() {
            let sibling = format!("{}.{}", section, name);
            if let Some(entry) = self.entry(&sibling) {
                return Some(&entry.id);
            }
        }
        self.resolve_key(name)
    }

    pub fn compute_target(&self) -> Option<&RunSettingEntry> {
        self.entries.iter().find(|e| e.is_compute_target())
    }

    /// First variant of `id` whose enabling condition holds and which no
    /// explicitly set disabler switches off.
    pub fn active_variant<F>(&self, id: &str, explicit: &F) -> Option<&RunSettingParam>
    where
        F: Fn(&str) -> Option<ParamValue>,
    {
        let entry = self.entry(id)?;
        entry
            .variants
            .iter()
            .find(|v| self.variant_inactive_reason(v, explicit).is_none())
    }

    /// Explicit value if set, else the active variant's default; `None`
    /// when the entry is inactive.
    pub fn effective_value<F>(&self, id: &str, explicit: &F) -> Option<ParamValue>
    where
        F: Fn(&str) -> Option<ParamValue>,
    {
        let variant = self.active_variant(id, explicit)?;
        explicit(id).or_else(|| variant.default.clone())
    }

    /// Reason the entry `id` is inactive, taken from its first variant.
    pub fn inactive_reason<F>(&self, id: &str, explicit: &F) -> Option<InactiveReason>
    where
        F: Fn(&str) -> Option<ParamValue>,
    {
        let entry = self.entry(id)?;
        if self.active_variant(id, explicit).is_some() {
            return None;
        }
        self.variant_inactive_reason(entry.primary(), explicit)
    }

    fn variant_inactive_reason<F>(&self, variant: &RunSettingParam, explicit: &F) -> Option<InactiveReason>
    where
        F: Fn(&str) -> Option<ParamValue>,
    {
        if let Some(enabled_by) = &variant.enabled_by {
            let enabler = self
                .resolve_dependency(variant, &enabled_by.parameter)
                .unwrap_or(&enabled_by.parameter);
            let current = self.effective_value(enabler, explicit);
            let activated = current
                .as_ref()
                .map_or(false, |v| enabled_by.is_activated_by(v));
            if !activated {
                return Some(InactiveReason {
                    code: ErrorCode::NotEnabled,
                    message: format!(
                        "'{}' is only enabled when '{}' is one of [{}], current value is '{}'",
                        variant.id,
                        enabler,
                        enabled_by.values.join(", "),
                        current.map_or_else(|| "None".to_string(), |v| v.render())
                    ),
                });
            }
        }
        for name in &variant.disabled_by {
            let disabler = self.resolve_dependency(variant, name).unwrap_or(name);
            if explicit(disabler).is_some() {
                return Some(InactiveReason {
                    code: ErrorCode::Disabled,
                    message: format!("'{}' is disabled because '{}' is set", variant.id, disabler),
                });
            }
        }
        None
    }
}
