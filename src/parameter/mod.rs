//! Parameter model: late-bound references and string templates.

pub mod reference;
pub mod template;

pub use reference::{ParameterDefault, ParameterRef};
pub use template::{
    contains_placeholder, render_formatter, FlatPart, Resolved, TemplateAssignment,
    TemplateBinding, TemplatePart,
};
