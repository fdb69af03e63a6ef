use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io, path::PathBuf};
use thiserror::Error;

/// Association record groups under `HKEY_CLASSES_ROOT` that point at a Vivado install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordGroupId {
    Checkpoint,
    Project,
    Wdb,
}

impl RecordGroupId {
    pub const ALL: [RecordGroupId; 3] = [
        RecordGroupId::Checkpoint,
        RecordGroupId::Project,
        RecordGroupId::Wdb,
    ];

    pub fn key_name(self) -> &'static str {
        match self {
            RecordGroupId::Checkpoint => "Vivado.Checkpoint.1",
            RecordGroupId::Project => "Vivado.Project.1",
            RecordGroupId::Wdb => "Vivado.WDB.1",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RecordGroupId::Checkpoint => "checkpoint handler",
            RecordGroupId::Project => "project handler",
            RecordGroupId::Wdb => "waveform database handler",
        }
    }
}

/// The two string entries every record group carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    DisplayPath,
    CommandPath,
}

impl FieldName {
    pub const ALL: [FieldName; 2] = [FieldName::DisplayPath, FieldName::CommandPath];

    pub fn subkey(self) -> &'static str {
        match self {
            FieldName::DisplayPath => "DefaultIcon",
            FieldName::CommandPath => r"Shell\Open\Command",
        }
    }
}

pub fn key_path(group: RecordGroupId, field: FieldName) -> String {
    format!(r"{}\{}", group.key_name(), field.subkey())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{path} not found")]
    NotFound { path: String },
    #[error("access denied to {path}")]
    AccessDenied { path: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn from_read(err: io::Error, path: String) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound { path },
            io::ErrorKind::PermissionDenied => StoreError::AccessDenied { path },
            _ => StoreError::Read { path, source: err },
        }
    }

    fn from_write(err: io::Error, path: String) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => StoreError::AccessDenied { path },
            _ => StoreError::Write { path, source: err },
        }
    }
}

/// Hierarchical key/value store holding the association records.
///
/// Handles are scoped: dropping one releases whatever the backend holds open,
/// so callers should keep them only for a single read or read-modify-write.
pub trait AssociationStore {
    type Handle;

    fn open(
        &self,
        group: RecordGroupId,
        field: FieldName,
        access: Access,
    ) -> Result<Self::Handle, StoreError>;

    fn read(&self, handle: &Self::Handle) -> Result<String, StoreError>;

    fn write(&mut self, handle: &Self::Handle, value: &str) -> Result<(), StoreError>;

    fn describe(&self) -> String;
}

pub fn read_field<S: AssociationStore>(
    store: &S,
    group: RecordGroupId,
    field: FieldName,
) -> Result<String, StoreError> {
    let handle = store.open(group, field, Access::Read)?;
    store.read(&handle)
}

pub fn write_field<S: AssociationStore>(
    store: &mut S,
    group: RecordGroupId,
    field: FieldName,
    value: &str,
) -> Result<(), StoreError> {
    let handle = store.open(group, field, Access::ReadWrite)?;
    store.write(&handle, value)
}

type Document = BTreeMap<String, BTreeMap<String, String>>;

/// JSON file laid out like the registry: `{ "<group key>": { "<subkey>": "<value>" } }`.
///
/// Every call re-reads the file; handles hold nothing open between calls.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct FileHandle {
    group: RecordGroupId,
    field: FieldName,
    access: Access,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writes a fresh document containing `entries`, replacing any existing file.
    pub fn create<'a>(
        path: impl Into<PathBuf>,
        entries: impl IntoIterator<Item = (RecordGroupId, FieldName, &'a str)>,
    ) -> io::Result<Self> {
        let store = Self::new(path);
        let mut document = Document::new();
        for (group, field, value) in entries {
            document
                .entry(group.key_name().to_string())
                .or_default()
                .insert(field.subkey().to_string(), value.to_string());
        }
        store.save_document(&document)?;
        Ok(store)
    }

    fn load_document(&self) -> io::Result<Document> {
        let raw = fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    fn save_document(&self, document: &Document) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(document)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, raw)?;
        fs::rename(&temp, &self.path)
    }
}

fn lookup<'a>(document: &'a Document, group: RecordGroupId, field: FieldName) -> Option<&'a String> {
    document.get(group.key_name())?.get(field.subkey())
}

impl AssociationStore for FileStore {
    type Handle = FileHandle;

    fn open(
        &self,
        group: RecordGroupId,
        field: FieldName,
        access: Access,
    ) -> Result<FileHandle, StoreError> {
        let path = key_path(group, field);
        let document = self
            .load_document()
            .map_err(|err| StoreError::from_read(err, path.clone()))?;
        if lookup(&document, group, field).is_none() {
            return Err(StoreError::NotFound { path });
        }
        if access == Access::ReadWrite {
            let readonly = fs::metadata(&self.path)
                .map(|meta| meta.permissions().readonly())
                .unwrap_or(false);
            if readonly {
                return Err(StoreError::AccessDenied { path });
            }
        }
        Ok(FileHandle {
            group,
            field,
            access,
        })
    }

    fn read(&self, handle: &FileHandle) -> Result<String, StoreError> {
        let path = key_path(handle.group, handle.field);
        let document = self
            .load_document()
            .map_err(|err| StoreError::from_read(err, path.clone()))?;
        lookup(&document, handle.group, handle.field)
            .cloned()
            .ok_or(StoreError::NotFound { path })
    }

    fn write(&mut self, handle: &FileHandle, value: &str) -> Result<(), StoreError> {
        let path = key_path(handle.group, handle.field);
        if handle.access != Access::ReadWrite {
            return Err(StoreError::AccessDenied { path });
        }
        let mut document = self
            .load_document()
            .map_err(|err| StoreError::from_write(err, path.clone()))?;
        document
            .entry(handle.group.key_name().to_string())
            .or_default()
            .insert(handle.field.subkey().to_string(), value.to_string());
        self.save_document(&document)
            .map_err(|err| StoreError::from_write(err, path))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

#[cfg(windows)]
pub use registry::RegistryStore;

#[cfg(windows)]
mod registry {
    use super::{key_path, Access, AssociationStore, FieldName, RecordGroupId, StoreError};
    use winreg::enums::{HKEY_CLASSES_ROOT, KEY_READ, KEY_SET_VALUE};
    use winreg::RegKey;

    pub struct RegistryStore {
        root: RegKey,
    }

    pub struct RegistryHandle {
        key: RegKey,
        path: String,
    }

    impl RegistryStore {
        pub fn classes_root() -> Self {
            Self {
                root: RegKey::predef(HKEY_CLASSES_ROOT),
            }
        }
    }

    impl AssociationStore for RegistryStore {
        type Handle = RegistryHandle;

        fn open(
            &self,
            group: RecordGroupId,
            field: FieldName,
            access: Access,
        ) -> Result<RegistryHandle, StoreError> {
            let path = key_path(group, field);
            let flags = match access {
                Access::Read => KEY_READ,
                Access::ReadWrite => KEY_READ | KEY_SET_VALUE,
            };
            match self.root.open_subkey_with_flags(&path, flags) {
                Ok(key) => Ok(RegistryHandle { key, path }),
                Err(err) => Err(StoreError::from_read(err, path)),
            }
        }

        fn read(&self, handle: &RegistryHandle) -> Result<String, StoreError> {
            handle
                .key
                .get_value::<String, _>("")
                .map_err(|err| StoreError::from_read(err, handle.path.clone()))
        }

        fn write(&mut self, handle: &RegistryHandle, value: &str) -> Result<(), StoreError> {
            handle
                .key
                .set_value("", &value.to_string())
                .map_err(|err| StoreError::from_write(err, handle.path.clone()))
        }

        fn describe(&self) -> String {
            "registry HKEY_CLASSES_ROOT".to_string()
        }
    }
}

/// Store picked at startup from the configured backend.
pub enum ConfiguredStore {
    File(FileStore),
    #[cfg(windows)]
    Registry(RegistryStore),
}

pub enum ConfiguredHandle {
    File(FileHandle),
    #[cfg(windows)]
    Registry(registry::RegistryHandle),
}

impl AssociationStore for ConfiguredStore {
    type Handle = ConfiguredHandle;

    fn open(
        &self,
        group: RecordGroupId,
        field: FieldName,
        access: Access,
    ) -> Result<ConfiguredHandle, StoreError> {
        match self {
            ConfiguredStore::File(store) => store.open(group, field, access).map(ConfiguredHandle::File),
            #[cfg(windows)]
            ConfiguredStore::Registry(store) => {
                store.open(group, field, access).map(ConfiguredHandle::Registry)
            }
        }
    }

    fn read(&self, handle: &ConfiguredHandle) -> Result<String, StoreError> {
        match (self, handle) {
            (ConfiguredStore::File(store), ConfiguredHandle::File(handle)) => store.read(handle),
            #[cfg(windows)]
            (ConfiguredStore::Registry(store), ConfiguredHandle::Registry(handle)) => {
                store.read(handle)
            }
            #[cfg(windows)]
            _ => Err(mismatched_handle()),
        }
    }

    fn write(&mut self, handle: &ConfiguredHandle, value: &str) -> Result<(), StoreError> {
        match (self, handle) {
            (ConfiguredStore::File(store), ConfiguredHandle::File(handle)) => {
                store.write(handle, value)
            }
            #[cfg(windows)]
            (ConfiguredStore::Registry(store), ConfiguredHandle::Registry(handle)) => {
                store.write(handle, value)
            }
            #[cfg(windows)]
            _ => Err(mismatched_handle()),
        }
    }

    fn describe(&self) -> String {
        match self {
            ConfiguredStore::File(store) => store.describe(),
            #[cfg(windows)]
            ConfiguredStore::Registry(store) => store.describe(),
        }
    }
}

#[cfg(windows)]
fn mismatched_handle() -> StoreError {
    StoreError::Read {
        path: "<handle>".to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "handle from another store"),
    }
}
