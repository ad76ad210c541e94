//! Core types for ml_component
//!
//! Scalar parameter types and values, the shared boolean parser, port access
//! modes, and the datastore/compute descriptors used by inheritance
//! resolution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ComponentError, Result};

// ============================================================================
// Parameter types
// ============================================================================

/// Declared type of a scalar parameter slot.
///
/// The wire code is the numeric string used in the emitted parameter
/// interface (`"0"` for int through `"3"` for string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Int,
    Float,
    Bool,
    #[default]
    Str,
}

impl ParamType {
    /// Numeric type code (int=0, float=1, bool=2, str=3)
    pub fn code(&self) -> u8 {
        match self {
            Self::Int => 0,
            Self::Float => 1,
            Self::Bool => 2,
            Self::Str => 3,
        }
    }

    /// Type code as emitted on the wire
    pub fn wire_code(&self) -> String {
        self.code().to_string()
    }

    /// Parse a type name as written in a component spec.
    ///
    /// Returns `None` for names that describe data ports rather than scalars.
    pub fn from_spec_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" => Some(Self::Int),
            "float" | "double" | "number" => Some(Self::Float),
            "bool" | "boolean" => Some(Self::Bool),
            "str" | "string" | "enum" | "mode" => Some(Self::Str),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Str => "str",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Boolean parsing
// ============================================================================

/// Parse a boolean the same way everywhere in the crate.
///
/// Accepts `true|false|yes|no|1|0`, case-insensitively and ignoring
/// surrounding whitespace. Everything else is rejected.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Parameter values
// ============================================================================

/// A concrete scalar (or JSON) value bound to a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Native dict/list payload for JSON-string run settings
    Json(serde_json::Value),
}

impl ParamValue {
    /// Type this value naturally carries. JSON payloads count as strings
    /// since they are serialized before emission.
    pub fn natural_type(&self) -> ParamType {
        match self {
            Self::Bool(_) => ParamType::Bool,
            Self::Int(_) => ParamType::Int,
            Self::Float(_) => ParamType::Float,
            Self::Str(_) | Self::Json(_) => ParamType::Str,
        }
    }

    /// Render the value as it appears on the wire and in templates.
    ///
    /// Booleans render as `True`/`False`; whole floats keep a trailing `.0`.
    pub fn render(&self) -> String {
        match self {
            Self::Bool(true) => "True".to_string(),
            Self::Bool(false) => "False".to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => render_float(*f),
            Self::Str(s) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce to the declared slot type.
    ///
    /// Int slots accept integers only (never booleans); float slots accept
    /// integers and floats; string-encoded numerics and booleans are parsed.
    /// Any value coerces to a string slot via [`render`](Self::render).
    pub fn coerce(&self, ty: ParamType) -> std::result::Result<ParamValue, String> {
        match (ty, self) {
            (ParamType::Int, Self::Int(i)) => Ok(Self::Int(*i)),
            (ParamType::Int, Self::Str(s)) => s
                .trim()
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| format!("'{}' is not a valid int", s)),
            (ParamType::Int, other) => Err(format!(
                "expected int, got {} '{}'",
                other.natural_type(),
                other.render()
            )),
            (ParamType::Float, Self::Int(i)) => Ok(Self::Float(*i as f64)),
            (ParamType::Float, Self::Float(f)) => Ok(Self::Float(*f)),
            (ParamType::Float, Self::Str(s)) => s
                .trim()
                .parse::<f64>()
                .map(Self::Float)
                .map_err(|_| format!("'{}' is not a valid float", s)),
            (ParamType::Float, other) => Err(format!(
                "expected float, got {} '{}'",
                other.natural_type(),
                other.render()
            )),
            (ParamType::Bool, Self::Bool(b)) => Ok(Self::Bool(*b)),
            (ParamType::Bool, Self::Str(s)) => parse_bool(s)
                .map(Self::Bool)
                .ok_or_else(|| format!("'{}' is not a valid bool", s)),
            (ParamType::Bool, other) => Err(format!(
                "expected bool, got {} '{}'",
                other.natural_type(),
                other.render()
            )),
            (ParamType::Str, Self::Str(s)) => Ok(Self::Str(s.clone())),
            (ParamType::Str, other) => Ok(Self::Str(other.render())),
        }
    }

    /// Numeric view used by range checks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }
}

fn render_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<serde_json::Value> for ParamValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::Str(s),
            other => Self::Json(other),
        }
    }
}

// ============================================================================
// Port modes
// ============================================================================

/// How a data input is made available on the compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    #[default]
    Mount,
    Download,
    Direct,
}

impl InputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Download => "download",
            Self::Direct => "direct",
        }
    }
}

impl FromStr for InputMode {
    type Err = ComponentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mount" => Ok(Self::Mount),
            "download" => Ok(Self::Download),
            "direct" => Ok(Self::Direct),
            other => Err(ComponentError::invalid_config(format!(
                "invalid input mode '{}', expected one of mount, download, direct",
                other
            ))),
        }
    }
}

/// How an output is written back to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Mount,
    Upload,
}

impl OutputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mount => "mount",
            Self::Upload => "upload",
        }
    }
}

impl FromStr for OutputMode {
    type Err = ComponentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mount" => Ok(Self::Mount),
            "upload" => Ok(Self::Upload),
            other => Err(ComponentError::invalid_config(format!(
                "invalid output mode '{}', expected one of mount, upload",
                other
            ))),
        }
    }
}

// ============================================================================
// Datastores and computes
// ============================================================================

/// Datastore type accepted for Scope component stream outputs.
pub const DATA_LAKE_DATASTORE_TYPE: &str = "AzureDataLake";

/// Datastore type used for plain blob containers.
pub const BLOB_DATASTORE_TYPE: &str = "AzureBlob";

/// A named datastore with its storage type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Datastore {
    pub name: String,
    pub datastore_type: String,
}

impl Datastore {
    pub fn new(name: impl Into<String>, datastore_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datastore_type: datastore_type.into(),
        }
    }

    pub fn blob(name: impl Into<String>) -> Self {
        Self::new(name, BLOB_DATASTORE_TYPE)
    }

    pub fn data_lake(name: impl Into<String>) -> Self {
        Self::new(name, DATA_LAKE_DATASTORE_TYPE)
    }

    pub fn is_data_lake(&self) -> bool {
        self.datastore_type == DATA_LAKE_DATASTORE_TYPE
    }
}

/// A compute target as known to the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputeTarget {
    pub name: String,
    pub compute_type: String,
}

impl ComputeTarget {
    pub fn new(name: impl Into<String>, compute_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compute_type: compute_type.into(),
        }
    }
}

/// Identifier-safe argument name derived from a declared port or parameter
/// name: lowercased, non-alphanumerics replaced by `_`, and prefixed with
/// `_` when it would start with a digit.
pub fn sanitize_argument_name(name: &str) -> String {
    let mut out: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
