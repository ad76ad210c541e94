//! Dataset references and the process-wide built-input cache.
//!
//! A [`DatasetRef`] is a cheap handle with identity semantics: two handles
//! are the same dataset iff they were cloned from the same original. The
//! lowering stage deduplicates dataset nodes by `(identity, access mode)`
//! through [`built_input`], whose entries are immutable once created and so
//! can be shared by every pipeline in the process.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Serialize, Serializer};

use crate::types::InputMode;

/// Shape of the data behind a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    #[default]
    File,
    Tabular,
}

/// Where a dataset comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DatasetSource {
    /// A dataset registered in the workspace under a name and version.
    Registered {
        id: String,
        name: String,
        version: Option<String>,
        kind: DatasetKind,
    },
    /// An unregistered dataset that has been saved and has a saved id.
    Saved {
        saved_id: String,
        name: String,
        kind: DatasetKind,
    },
    /// A path on a named datastore.
    DataReference {
        datastore: String,
        path_on_datastore: String,
        name: String,
    },
    /// A built-in dataset shared by every workspace.
    Global {
        datastore: String,
        path_on_datastore: String,
        name: String,
    },
}

/// Identity handle to a dataset.
#[derive(Clone)]
pub struct DatasetRef {
    inner: Arc<DatasetSource>,
}

impl DatasetRef {
    pub fn new(source: DatasetSource) -> Self {
        Self {
            inner: Arc::new(source),
        }
    }

    pub fn registered(id: impl Into<String>, name: impl Into<String>, version: Option<&str>) -> Self {
        Self::new(DatasetSource::Registered {
            id: id.into(),
            name: name.into(),
            version: version.map(str::to_string),
            kind: DatasetKind::File,
        })
    }

    pub fn tabular(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(DatasetSource::Registered {
            id: id.into(),
            name: name.into(),
            version: None,
            kind: DatasetKind::Tabular,
        })
    }

    pub fn saved(saved_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(DatasetSource::Saved {
            saved_id: saved_id.into(),
            name: name.into(),
            kind: DatasetKind::File,
        })
    }

    pub fn data_reference(
        datastore: impl Into<String>,
        path_on_datastore: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(DatasetSource::DataReference {
            datastore: datastore.into(),
            path_on_datastore: path_on_datastore.into(),
            name: name.into(),
        })
    }

    pub fn global(
        datastore: impl Into<String>,
        path_on_datastore: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::new(DatasetSource::Global {
            datastore: datastore.into(),
            path_on_datastore: path_on_datastore.into(),
            name: name.into(),
        })
    }

    pub fn source(&self) -> &DatasetSource {
        &self.inner
    }

    /// Stable identity of the underlying dataset object.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub fn name(&self) -> &str {
        match self.source() {
            DatasetSource::Registered { name, .. }
            | DatasetSource::Saved { name, .. }
            | DatasetSource::DataReference { name, .. }
            | DatasetSource::Global { name, .. } => name,
        }
    }

    pub fn kind(&self) -> DatasetKind {
        match self.source() {
            DatasetSource::Registered { kind, .. } | DatasetSource::Saved { kind, .. } => *kind,
            DatasetSource::DataReference { .. } | DatasetSource::Global { .. } => {
                DatasetKind::File
            }
        }
    }

    pub fn is_tabular(&self) -> bool {
        self.kind() == DatasetKind::Tabular
    }
}

impl PartialEq for DatasetRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for DatasetRef {}

impl fmt::Debug for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DatasetRef").field(self.source()).finish()
    }
}

impl Serialize for DatasetRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.source().serialize(serializer)
    }
}

// ─── Built-input cache ──────────────────────────────────────────────────────

/// A dataset consumed in a particular access mode.
#[derive(Debug)]
pub struct BuiltInput {
    pub dataset: DatasetRef,
    pub mode: InputMode,
    /// Consumption name: `name_mount`, `name_download`, or `name` for direct.
    pub name: String,
}

type BuiltKey = (usize, InputMode);

// Entries hold a clone of the dataset handle, so an identity key can never
// be reused by a different dataset while its entry exists.
static BUILT_INPUTS: Lazy<Mutex<FxHashMap<BuiltKey, Arc<BuiltInput>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

/// Return the shared built input for `dataset` consumed in `mode`.
pub fn built_input(dataset: &DatasetRef, mode: InputMode) -> Arc<BuiltInput> {
    let key = (dataset.identity(), mode);
    let mut cache = BUILT_INPUTS.lock();
    cache
        .entry(key)
        .or_insert_with(|| {
            let base = if dataset.name().is_empty() {
                "dataset"
            } else {
                dataset.name()
            };
            let name = match mode {
                InputMode::Mount | InputMode::Download => format!("{}_{}", base, mode.as_str()),
                InputMode::Direct => base.to_string(),
            };
            Arc::new(BuiltInput {
                dataset: dataset.clone(),
                mode,
                name,
            })
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_equality() {
        let a = DatasetRef::registered("id-1", "iris", Some("1"));
        let b = a.clone();
        let c = DatasetRef::registered("id-1", "iris", Some("1"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_built_input_shared_per_mode() {
        let ds = DatasetRef::saved("saved-1", "train");
        let m1 = built_input(&ds, InputMode::Mount);
        let m2 = built_input(&ds.clone(), InputMode::Mount);
        let d = built_input(&ds, InputMode::Download);
        assert!(Arc::ptr_eq(&m1, &m2));
        assert!(!Arc::ptr_eq(&m1, &d));
        assert_eq!(m1.name, "train_mount");
        assert_eq!(d.name, "train_download");
        assert_eq!(built_input(&ds, InputMode::Direct).name, "train");
    }

    #[test]
    fn test_empty_name_falls_back() {
        let ds = DatasetRef::saved("saved-2", "");
        assert_eq!(built_input(&ds, InputMode::Direct).name, "dataset");
    }

    #[test]
    fn test_kind() {
        assert!(DatasetRef::tabular("t", "table").is_tabular());
        assert!(!DatasetRef::data_reference("blob", "a/b", "ref").is_tabular());
    }
}
