//! Input and output port state of a component instance.

use serde::Serialize;

use crate::errors::Result;
use crate::types::{Datastore, InputMode, OutputMode};

use super::Binding;

/// Binding and access settings of one declared input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputPort {
    pub binding: Option<Binding>,
    pub mode: Option<InputMode>,
    pub path_on_compute: Option<String>,
}

impl InputPort {
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Set the access mode and on-compute path. Unknown modes are rejected.
    pub fn configure(&mut self, mode: Option<&str>, path_on_compute: Option<&str>) -> Result<()> {
        if let Some(mode) = mode {
            self.mode = Some(mode.parse()?);
        }
        if let Some(path) = path_on_compute {
            self.path_on_compute = Some(path.to_string());
        }
        Ok(())
    }

    pub fn effective_mode(&self) -> InputMode {
        self.mode.unwrap_or_default()
    }
}

/// Dataset registration requested for an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRegistration {
    pub name: String,
    pub create_new_version: bool,
}

/// Storage settings of one declared output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputPort {
    /// Overrides the datastore inherited from the enclosing pipelines.
    pub datastore: Option<Datastore>,
    pub mode: Option<OutputMode>,
    pub path_on_compute: Option<String>,
    pub path_on_datastore: Option<String>,
    pub registration: Option<OutputRegistration>,
}

impl OutputPort {
    pub fn configure(
        &mut self,
        datastore: Option<Datastore>,
        mode: Option<&str>,
        path_on_compute: Option<&str>,
        path_on_datastore: Option<&str>,
    ) -> Result<()> {
        if let Some(mode) = mode {
            self.mode = Some(mode.parse()?);
        }
        if datastore.is_some() {
            self.datastore = datastore;
        }
        if let Some(path) = path_on_compute {
            self.path_on_compute = Some(path.to_string());
        }
        if let Some(path) = path_on_datastore {
            self.path_on_datastore = Some(path.to_string());
        }
        Ok(())
    }

    pub fn register_as(&mut self, name: impl Into<String>, create_new_version: bool) {
        self.registration = Some(OutputRegistration {
            name: name.into(),
            create_new_version,
        });
    }

    pub fn effective_mode(&self) -> OutputMode {
        self.mode.unwrap_or_default()
    }
}
