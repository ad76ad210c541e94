//! Composition and lowering configuration.
//!
//! [`ComposeConfig`] can be built in code with the `with_*` methods or
//! deserialized from JSON, where every field is optional:
//!
//! ```json
//! {
//!   "max_builder_depth": 100,
//!   "unresolved_reference_policy": "warn",
//!   "compute_negative_cache_ttl_secs": 60,
//!   "default_compute_type": "AmlCompute",
//!   "node_id_seed": 7
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{ComponentError, Result};

/// What to do when a template references a name that is not in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReferencePolicy {
    /// Demote the reference to a literal placeholder and log a warning.
    #[default]
    Warn,
    /// Fail with an `unresolved_reference` error.
    Error,
}

/// Configuration shared by a [`Composer`](crate::pipeline::Composer) and
/// the lowering it drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Maximum nesting of pipeline invocations (default: 100).
    #[serde(default = "default_max_builder_depth")]
    pub max_builder_depth: usize,
    /// Handling of template references missing from the flat scope.
    #[serde(default)]
    pub unresolved_reference_policy: UnresolvedReferencePolicy,
    /// How long a "compute not found" answer is cached (default: 60s).
    #[serde(default = "default_negative_ttl")]
    pub compute_negative_cache_ttl_secs: u64,
    /// Compute type assumed when a named compute cannot be found.
    #[serde(default = "default_compute_type")]
    pub default_compute_type: String,
    /// Seed for node-id generation; `None` draws from OS entropy.
    #[serde(default)]
    pub node_id_seed: Option<u64>,
    /// Run validation before handing artifacts to a submission sink.
    #[serde(default = "default_true")]
    pub validate_on_submit: bool,
}

fn default_max_builder_depth() -> usize {
    100
}

fn default_negative_ttl() -> u64 {
    60
}

fn default_compute_type() -> String {
    "AmlCompute".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ComposeConfig {
    fn default() -> Self {
        Self {
            max_builder_depth: default_max_builder_depth(),
            unresolved_reference_policy: UnresolvedReferencePolicy::default(),
            compute_negative_cache_ttl_secs: default_negative_ttl(),
            default_compute_type: default_compute_type(),
            node_id_seed: None,
            validate_on_submit: true,
        }
    }
}

impl ComposeConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON config
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_builder_depth == 0 {
            return Err(ComponentError::invalid_config(
                "max_builder_depth must be > 0",
            ));
        }

        if self.default_compute_type.trim().is_empty() {
            return Err(ComponentError::invalid_config(
                "default_compute_type must not be empty",
            ));
        }

        Ok(())
    }

    /// Builder method: set maximum builder depth
    pub fn with_max_builder_depth(mut self, depth: usize) -> Self {
        self.max_builder_depth = depth;
        self
    }

    /// Builder method: set unresolved template reference policy
    pub fn with_unresolved_reference_policy(mut self, policy: UnresolvedReferencePolicy) -> Self {
        self.unresolved_reference_policy = policy;
        self
    }

    /// Builder method: set negative compute cache TTL
    pub fn with_compute_negative_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.compute_negative_cache_ttl_secs = secs;
        self
    }

    /// Builder method: set the compute type assumed for unknown computes
    pub fn with_default_compute_type(mut self, compute_type: impl Into<String>) -> Self {
        self.default_compute_type = compute_type.into();
        self
    }

    /// Builder method: seed node-id generation
    pub fn with_node_id_seed(mut self, seed: u64) -> Self {
        self.node_id_seed = Some(seed);
        self
    }

    /// Builder method: toggle validation before submission
    pub fn with_validate_on_submit(mut self, validate: bool) -> Self {
        self.validate_on_submit = validate;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ComposeConfig::default();
        assert_eq!(config.max_builder_depth, 100);
        assert_eq!(config.compute_negative_cache_ttl_secs, 60);
        assert_eq!(config.default_compute_type, "AmlCompute");
        assert_eq!(
            config.unresolved_reference_policy,
            UnresolvedReferencePolicy::Warn
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            ComposeConfig::from_json_str(r#"{"unresolved_reference_policy": "error", "node_id_seed": 9}"#)
                .unwrap();
        assert_eq!(
            config.unresolved_reference_policy,
            UnresolvedReferencePolicy::Error
        );
        assert_eq!(config.node_id_seed, Some(9));
        assert_eq!(config.max_builder_depth, 100);
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let config = ComposeConfig::new().with_max_builder_depth(0);
        assert!(config.validate().is_err());
        assert!(ComposeConfig::from_json_str(r#"{"max_builder_depth": 0}"#).is_err());
    }

    #[test]
    fn test_builders() {
        let config = ComposeConfig::new()
            .with_default_compute_type("Kubernetes")
            .with_compute_negative_cache_ttl_secs(5)
            .with_validate_on_submit(false);
        assert_eq!(config.default_compute_type, "Kubernetes");
        assert_eq!(config.compute_negative_cache_ttl_secs, 5);
        assert!(!config.validate_on_submit);
    }
}
