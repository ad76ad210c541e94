//! String templates that splice pipeline parameters into literal text.
//!
//! A template is produced from any string containing `@@name@@`
//! placeholders whose names are bound in the current scope. It keeps enough
//! structure for lowering to emit a literal, a graph parameter reference, or
//! a concatenation.
//!
//! ```rust,ignore
//! let t = match TemplateAssignment::resolve("greeting: @@msg@@", &bindings) {
//!     Resolved::Template(t) => t,
//!     Resolved::Plain(s) => unreachable!(),
//! };
//! assert_eq!(t.formatter(), "greeting: {msg}");
//! ```

use std::collections::BTreeSet;

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::UnresolvedReferencePolicy;
use crate::errors::{ComponentError, Result};
use crate::types::ParamValue;
use crate::validation::ErrorCode;

use super::reference::ParameterRef;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@@([A-Za-z][A-Za-z0-9_]*)@@").expect("valid placeholder pattern"));

/// Whether `text` contains at least one well-formed `@@name@@` token.
pub fn contains_placeholder(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

// ─── Parts and bindings ─────────────────────────────────────────────────────

/// One segment of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TemplatePart {
    Literal(String),
    Ref(String),
}

/// What a template reference is bound to.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TemplateBinding {
    Value(ParamValue),
    Parameter(ParameterRef),
    Template(TemplateAssignment),
}

impl From<ParameterRef> for TemplateBinding {
    fn from(p: ParameterRef) -> Self {
        Self::Parameter(p)
    }
}

impl From<ParamValue> for TemplateBinding {
    fn from(v: ParamValue) -> Self {
        Self::Value(v)
    }
}

impl From<TemplateAssignment> for TemplateBinding {
    fn from(t: TemplateAssignment) -> Self {
        Self::Template(t)
    }
}

/// A segment of a flattened template: literals and leaf references only.
#[derive(Debug, Clone, PartialEq)]
pub enum FlatPart {
    Literal(String),
    Value { name: String, value: ParamValue },
    Parameter { name: String, reference: ParameterRef },
}

/// Outcome of [`TemplateAssignment::resolve`].
#[derive(Debug, Clone)]
pub enum Resolved {
    /// No bound reference was found; the original string.
    Plain(String),
    Template(TemplateAssignment),
}

// ─── Template ───────────────────────────────────────────────────────────────

/// A string with `@@name@@` placeholders and the bindings captured for them.
///
/// The formatter, parts and bindings cannot be reassigned after
/// construction; [`update`](Self::update) is the only way to change a
/// binding, and it invalidates the cached value.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateAssignment {
    formatter: String,
    parts: Vec<TemplatePart>,
    bindings: Vec<(String, TemplateBinding)>,
    #[serde(skip)]
    cached: OnceCell<String>,
}

impl PartialEq for TemplateAssignment {
    fn eq(&self, other: &Self) -> bool {
        self.parts == other.parts
            && self.bindings.len() == other.bindings.len()
            && self
                .bindings
                .iter()
                .zip(&other.bindings)
                .all(|((a, _), (b, _))| a == b)
    }
}

impl TemplateAssignment {
    /// Scan `text` for placeholders bound in `bindings`.
    ///
    /// Every matched name present in `bindings` becomes a reference; all
    /// other text, including tokens naming unbound parameters, stays literal.
    pub fn resolve(text: &str, bindings: &[(String, TemplateBinding)]) -> Resolved {
        let mut parts = Vec::new();
        let mut used = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some((_, binding)) = bindings.iter().find(|(n, _)| n == name.as_str()) else {
                continue;
            };
            literal.push_str(&text[last..whole.start()]);
            if !literal.is_empty() {
                parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
            }
            parts.push(TemplatePart::Ref(name.as_str().to_string()));
            if !used.iter().any(|(n, _): &(String, TemplateBinding)| n == name.as_str()) {
                used.push((name.as_str().to_string(), binding.clone()));
            }
            last = whole.end();
        }

        if used.is_empty() {
            return Resolved::Plain(text.to_string());
        }
        literal.push_str(&text[last..]);
        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }
        Resolved::Template(Self::from_parts(parts, used))
    }

    /// Build a template from explicit parts. References without a binding
    /// are allowed and are handled by [`flatten`](Self::flatten).
    pub fn from_parts(parts: Vec<TemplatePart>, bindings: Vec<(String, TemplateBinding)>) -> Self {
        let formatter = build_formatter(&parts);
        Self {
            formatter,
            parts,
            bindings,
            cached: OnceCell::new(),
        }
    }

    /// Brace format string: `{name}` per reference, braces doubled.
    pub fn formatter(&self) -> &str {
        &self.formatter
    }

    pub fn parts(&self) -> &[TemplatePart] {
        &self.parts
    }

    pub fn bindings(&self) -> &[(String, TemplateBinding)] {
        &self.bindings
    }

    pub fn binding(&self, name: &str) -> Option<&TemplateBinding> {
        self.bindings
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
    }

    /// Replace or add bindings and drop the cached value.
    pub fn update<I>(&mut self, bindings: I)
    where
        I: IntoIterator<Item = (String, TemplateBinding)>,
    {
        for (name, binding) in bindings {
            match self.bindings.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = binding,
                None => self.bindings.push((name, binding)),
            }
        }
        self.cached = OnceCell::new();
    }

    /// Value with every reference at its binding's default. Cached until the
    /// next [`update`](Self::update).
    pub fn value(&self) -> &str {
        self.cached
            .get_or_init(|| self.value_with(&FxHashMap::default()))
    }

    /// Value with `overrides` taking precedence over binding defaults.
    /// Overrides apply at every nesting level by reference name.
    pub fn value_with(&self, overrides: &FxHashMap<String, ParamValue>) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => out.push_str(text),
                TemplatePart::Ref(name) => {
                    if let Some(v) = overrides.get(name) {
                        out.push_str(&v.render());
                        continue;
                    }
                    match self.binding(name) {
                        Some(TemplateBinding::Value(v)) => out.push_str(&v.render()),
                        Some(TemplateBinding::Parameter(p)) => {
                            if let Some(v) = p.default_value() {
                                out.push_str(&v.render());
                            }
                        }
                        Some(TemplateBinding::Template(t)) => out.push_str(&t.value_with(overrides)),
                        None => {
                            out.push_str("@@");
                            out.push_str(name);
                            out.push_str("@@");
                        }
                    }
                }
            }
        }
        out
    }

    /// Inline nested templates so only literal and leaf reference parts
    /// remain. Adjacent literals are merged.
    pub fn flatten(&self, policy: UnresolvedReferencePolicy) -> Result<Vec<FlatPart>> {
        let mut flat = Vec::new();
        self.flatten_into(policy, &mut flat)?;
        Ok(merge_literals(flat))
    }

    fn flatten_into(
        &self,
        policy: UnresolvedReferencePolicy,
        out: &mut Vec<FlatPart>,
    ) -> Result<()> {
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => out.push(FlatPart::Literal(text.clone())),
                TemplatePart::Ref(name) => match self.binding(name) {
                    Some(TemplateBinding::Value(v)) => out.push(FlatPart::Value {
                        name: name.clone(),
                        value: v.clone(),
                    }),
                    Some(TemplateBinding::Parameter(p)) => out.push(FlatPart::Parameter {
                        name: name.clone(),
                        reference: p.clone(),
                    }),
                    Some(TemplateBinding::Template(t)) => t.flatten_into(policy, out)?,
                    None => match policy {
                        UnresolvedReferencePolicy::Warn => {
                            tracing::warn!(
                                parameter = %name,
                                template = %self.formatter,
                                "template references '{}' which is not in scope; kept as literal",
                                name
                            );
                            out.push(FlatPart::Literal(format!("@@{}@@", name)));
                        }
                        UnresolvedReferencePolicy::Error => {
                            return Err(ComponentError::validation(
                                ErrorCode::UnresolvedReference,
                                "",
                                format!(
                                    "template '{}' references '{}' which is not in scope",
                                    self.formatter, name
                                ),
                            ));
                        }
                    },
                },
            }
        }
        Ok(())
    }

    /// Transitive set of parameter names reached through nested templates.
    pub fn expand_all_parameter_name_set(&self) -> BTreeSet<String> {
        self.parameter_refs()
            .into_iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Every parameter reference reached through nested templates, in part
    /// order, without duplicates.
    pub fn parameter_refs(&self) -> Vec<ParameterRef> {
        let mut refs: Vec<ParameterRef> = Vec::new();
        self.collect_refs(&mut refs);
        refs
    }

    fn collect_refs(&self, refs: &mut Vec<ParameterRef>) {
        for part in &self.parts {
            let TemplatePart::Ref(name) = part else {
                continue;
            };
            match self.binding(name) {
                Some(TemplateBinding::Parameter(p)) => {
                    if !refs.contains(p) {
                        refs.push(p.clone());
                    }
                }
                Some(TemplateBinding::Template(t)) => t.collect_refs(refs),
                Some(TemplateBinding::Value(_)) | None => {}
            }
        }
    }
}

fn build_formatter(parts: &[TemplatePart]) -> String {
    let mut out = String::new();
    for part in parts {
        match part {
            TemplatePart::Literal(text) => {
                out.push_str(&text.replace('{', "{{").replace('}', "}}"))
            }
            TemplatePart::Ref(name) => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
    }
    out
}

fn merge_literals(parts: Vec<FlatPart>) -> Vec<FlatPart> {
    let mut merged: Vec<FlatPart> = Vec::with_capacity(parts.len());
    for part in parts {
        match (merged.last_mut(), part) {
            (Some(FlatPart::Literal(prev)), FlatPart::Literal(next)) => prev.push_str(&next),
            (_, part) => merged.push(part),
        }
    }
    merged.retain(|p| !matches!(p, FlatPart::Literal(s) if s.is_empty()));
    merged
}

/// Apply a brace formatter: `{name}` is replaced from `values`,
/// `{{` and `}}` are literal braces. Unknown names are left as written.
pub fn render_formatter(formatter: &str, values: &FxHashMap<String, String>) -> String {
    let mut out = String::with_capacity(formatter.len());
    let mut chars = formatter.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                match values.get(&name) {
                    Some(v) if closed => out.push_str(v),
                    _ => {
                        out.push('{');
                        out.push_str(&name);
                        if closed {
                            out.push('}');
                        }
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bind(p: &ParameterRef) -> (String, TemplateBinding) {
        (p.name().to_string(), TemplateBinding::Parameter(p.clone()))
    }

    fn template(text: &str, bindings: &[(String, TemplateBinding)]) -> TemplateAssignment {
        match TemplateAssignment::resolve(text, bindings) {
            Resolved::Template(t) => t,
            Resolved::Plain(s) => panic!("expected template for {s}"),
        }
    }

    #[test]
    fn test_resolve_plain_string() {
        let msg = ParameterRef::standalone("msg", None);
        match TemplateAssignment::resolve("no refs @here@", &[bind(&msg)]) {
            Resolved::Plain(s) => assert_eq!(s, "no refs @here@"),
            Resolved::Template(_) => panic!("expected plain"),
        }
    }

    #[test]
    fn test_resolve_parts_and_formatter() {
        let msg = ParameterRef::standalone("msg", Some("hi".into()));
        let t = template("greeting: @@msg@@", &[bind(&msg)]);
        assert_eq!(
            t.parts(),
            &[
                TemplatePart::Literal("greeting: ".into()),
                TemplatePart::Ref("msg".into())
            ]
        );
        assert_eq!(t.formatter(), "greeting: {msg}");
        assert_eq!(t.value(), "greeting: hi");
    }

    #[test]
    fn test_unbound_token_stays_literal() {
        let a = ParameterRef::standalone("a", Some(ParamValue::Int(1)));
        let t = template("@@a@@-@@b@@ {x}", &[bind(&a)]);
        assert_eq!(
            t.parts(),
            &[
                TemplatePart::Ref("a".into()),
                TemplatePart::Literal("-@@b@@ {x}".into())
            ]
        );
        assert_eq!(t.formatter(), "{a}-@@b@@ {{x}}");
        assert_eq!(t.value(), "1-@@b@@ {x}");
    }

    #[test]
    fn test_malformed_placeholders_are_literal() {
        let a = ParameterRef::standalone("a", None);
        match TemplateAssignment::resolve("@@1a@@ @a@ @@a", &[bind(&a)]) {
            Resolved::Plain(_) => {}
            Resolved::Template(_) => panic!("no valid placeholder present"),
        }
    }

    #[test]
    fn test_value_overrides_and_update() {
        let a = ParameterRef::standalone("a", Some("x".into()));
        let mut t = template("v=@@a@@", &[bind(&a)]);
        assert_eq!(t.value(), "v=x");

        let mut overrides = FxHashMap::default();
        overrides.insert("a".to_string(), ParamValue::Int(5));
        assert_eq!(t.value_with(&overrides), "v=5");
        assert_eq!(t.value(), "v=x");

        t.update([("a".to_string(), TemplateBinding::Value(ParamValue::Bool(true)))]);
        assert_eq!(t.value(), "v=True");
    }

    #[test]
    fn test_flatten_nested() {
        let a = ParameterRef::standalone("a", Some("x".into()));
        let inner = template("<@@a@@>", &[bind(&a)]);
        let outer = template(
            "pre @@inner@@ post",
            &[("inner".to_string(), TemplateBinding::Template(inner))],
        );
        let flat = outer.flatten(UnresolvedReferencePolicy::Warn).unwrap();
        assert_eq!(
            flat,
            vec![
                FlatPart::Literal("pre <".into()),
                FlatPart::Parameter {
                    name: "a".into(),
                    reference: a.clone()
                },
                FlatPart::Literal("> post".into()),
            ]
        );
        assert_eq!(outer.value(), "pre <x> post");
        assert_eq!(
            outer.expand_all_parameter_name_set().into_iter().collect::<Vec<_>>(),
            vec!["a".to_string()]
        );
    }

    #[test]
    fn test_flatten_unresolved_policy() {
        let t = TemplateAssignment::from_parts(
            vec![
                TemplatePart::Literal("x".into()),
                TemplatePart::Ref("ghost".into()),
            ],
            Vec::new(),
        );
        let flat = t.flatten(UnresolvedReferencePolicy::Warn).unwrap();
        assert_eq!(flat, vec![FlatPart::Literal("x@@ghost@@".into())]);

        let err = t.flatten(UnresolvedReferencePolicy::Error).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnresolvedReference);
    }

    #[test]
    fn test_render_formatter() {
        let mut values = FxHashMap::default();
        values.insert("a".to_string(), "1".to_string());
        assert_eq!(render_formatter("{{a}} = {a}", &values), "{a} = 1");
        assert_eq!(render_formatter("{missing}", &values), "{missing}");
    }

    #[test]
    fn test_repeated_reference_single_binding() {
        let a = ParameterRef::standalone("a", Some("z".into()));
        let t = template("@@a@@/@@a@@", &[bind(&a)]);
        assert_eq!(t.bindings().len(), 1);
        assert_eq!(t.value(), "z/z");
        assert_eq!(t.parameter_refs().len(), 1);
    }
}
