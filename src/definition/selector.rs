//! Component selectors used to look definitions up in a catalogue.
//!
//! Accepted forms:
//!
//! | Selector | Meaning |
//! |---|---|
//! | `name` | default version |
//! | `name:version` | exact version |
//! | `name@label` | label (ignored with a warning; default version is used) |
//! | `namespace://name[:version]` | namespaced component |
//! | `azureml://name` | built-in component, no version or label |

use std::fmt;

use serde::Serialize;

use crate::errors::{ComponentError, Result};
use crate::validation::ErrorCode;

const BUILTIN_SCHEME: &str = "azureml";

/// Parsed selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ComponentSelector {
    pub namespace: Option<String>,
    pub name: String,
    pub version: Option<String>,
    pub label: Option<String>,
}

fn invalid(selector: &str, message: impl Into<String>) -> ComponentError {
    ComponentError::validation(ErrorCode::InvalidSelector, selector, message)
}

impl ComponentSelector {
    pub fn new(name: impl Into<String>, version: Option<&str>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            version: version.map(str::to_string),
            label: None,
        }
    }

    pub fn parse(selector: &str) -> Result<Self> {
        let text = selector.trim();
        if text.is_empty() {
            return Err(invalid(selector, "selector must not be empty"));
        }

        let (namespace, rest) = match text.split_once("://") {
            Some((ns, rest)) if !ns.is_empty() => (Some(ns.to_string()), rest),
            Some(_) => return Err(invalid(selector, "empty namespace before '://'")),
            None => (None, text),
        };

        let has_version = rest.contains(':');
        let has_label = rest.contains('@');
        if has_version && has_label {
            return Err(invalid(
                selector,
                "a selector can carry a version or a label, not both",
            ));
        }

        let (name, version, label) = if has_version {
            let mut pieces = rest.split(':');
            let name = pieces.next().unwrap_or_default();
            let version = pieces.next().unwrap_or_default();
            if pieces.next().is_some() {
                return Err(invalid(selector, "more than one ':' in selector"));
            }
            (name, Some(version), None)
        } else if has_label {
            let mut pieces = rest.split('@');
            let name = pieces.next().unwrap_or_default();
            let label = pieces.next().unwrap_or_default();
            if pieces.next().is_some() {
                return Err(invalid(selector, "more than one '@' in selector"));
            }
            (name, None, Some(label))
        } else {
            (rest, None, None)
        };

        if name.is_empty() {
            return Err(invalid(selector, "component name must not be empty"));
        }
        if version == Some("") || label == Some("") {
            return Err(invalid(selector, "version or label must not be empty"));
        }

        if namespace.as_deref() == Some(BUILTIN_SCHEME) && (version.is_some() || label.is_some()) {
            return Err(invalid(
                selector,
                "built-in components cannot be selected by version or label",
            ));
        }

        if let Some(label) = label {
            tracing::warn!(
                selector = %selector,
                "label '{}' is ignored; the default version is used",
                label
            );
        }

        Ok(Self {
            namespace,
            name: name.to_string(),
            version: version.map(str::to_string),
            label: label.map(str::to_string),
        })
    }

    pub fn is_builtin(&self) -> bool {
        self.namespace.as_deref() == Some(BUILTIN_SCHEME)
    }

    /// Catalogue key: `name` or `name:version`, namespaced when present.
    pub fn key(&self) -> String {
        let base = match &self.version {
            Some(v) => format!("{}:{}", self.name, v),
            None => self.name.clone(),
        };
        match &self.namespace {
            Some(ns) => format!("{}://{}", ns, base),
            None => base,
        }
    }
}

impl fmt::Display for ComponentSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())?;
        if let Some(label) = &self.label {
            write!(f, "@{}", label)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        let s = ComponentSelector::parse("train:1.2").unwrap();
        assert_eq!(s.name, "train");
        assert_eq!(s.version.as_deref(), Some("1.2"));

        let s = ComponentSelector::parse("train@latest").unwrap();
        assert_eq!(s.label.as_deref(), Some("latest"));
        assert_eq!(s.version, None);
        assert_eq!(s.key(), "train");

        let s = ComponentSelector::parse("team://train:3").unwrap();
        assert_eq!(s.namespace.as_deref(), Some("team"));
        assert_eq!(s.key(), "team://train:3");

        let s = ComponentSelector::parse("azureml://Select Columns").unwrap();
        assert!(s.is_builtin());
        assert_eq!(s.name, "Select Columns");
    }

    #[test]
    fn test_parse_rejects_ambiguous() {
        for bad in ["", "a:1@x", "a:1:2", "a@x@y", ":1", "a:", "azureml://x:1", "://x"] {
            let err = ComponentSelector::parse(bad).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidSelector, "selector {bad:?}");
        }
    }

    #[test]
    fn test_display_round_trips_label() {
        let s = ComponentSelector::parse("train@prod").unwrap();
        assert_eq!(s.to_string(), "train@prod");
    }
}
