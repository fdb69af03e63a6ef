use crate::{
    backup::{self, AssociationSnapshot},
    config::{self, AppConfig, StoreBackend},
    log::{OperationLog, Verbosity},
    rewrite::{self, FieldStatus, RewriteOutcome},
    scanner,
    store::{
        key_path, read_field, AssociationStore, ConfiguredStore, FieldName, FileStore,
        RecordGroupId, StoreError,
    },
    version::{self, VersionToken, ANCHOR, SEPARATOR},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    pub data_dir: Option<PathBuf>,
    pub install_root: Option<PathBuf>,
    pub store_file: Option<PathBuf>,
    pub verbosity: Option<Verbosity>,
}

/// Derived view of the installation; recomputed on every detection pass.
#[derive(Debug, Clone, Serialize)]
pub struct VersionState {
    pub current: Option<VersionToken>,
    pub available: Vec<VersionToken>,
    pub install_root: PathBuf,
    pub scan_error: Option<String>,
}

pub struct FieldDetail {
    pub field: FieldName,
    pub key_path: String,
    pub value: Result<String, StoreError>,
}

pub struct GroupDetail {
    pub group: RecordGroupId,
    pub fields: Vec<FieldDetail>,
}

pub struct SwitchReport {
    pub source: VersionToken,
    pub target: VersionToken,
    pub backup: Option<PathBuf>,
    pub outcome: RewriteOutcome,
    pub refreshed: VersionState,
}

pub struct RestoreReport {
    pub backup: PathBuf,
    pub snapshot: AssociationSnapshot,
    pub outcome: RewriteOutcome,
    pub refreshed: VersionState,
}

pub struct App<S> {
    pub config: AppConfig,
    pub data_dir: PathBuf,
    pub store: S,
    pub log: OperationLog,
    pub groups: Vec<RecordGroupId>,
}

impl App<ConfiguredStore> {
    pub fn initialize(options: StartupOptions) -> Result<Self> {
        let data_dir = match options.data_dir {
            Some(dir) => dir,
            None => config::base_data_dir()?,
        };
        let mut config = AppConfig::load_or_create(&data_dir)?;
        if let Some(root) = options.install_root {
            config.install_root = root;
        }
        if let Some(path) = options.store_file {
            config.store = StoreBackend::File { path };
        }
        let store = open_store(&config.store)?;
        let log = OperationLog::new(
            Some(data_dir.join("vivswitch.log")),
            options.verbosity.unwrap_or(Verbosity::Normal),
        );
        Ok(Self::new(config, data_dir, store, log))
    }
}

pub fn open_store(backend: &StoreBackend) -> Result<ConfiguredStore> {
    match backend {
        StoreBackend::File { path } => Ok(ConfiguredStore::File(FileStore::new(path.clone()))),
        #[cfg(windows)]
        StoreBackend::Registry => Ok(ConfiguredStore::Registry(
            crate::store::RegistryStore::classes_root(),
        )),
        #[cfg(not(windows))]
        StoreBackend::Registry => {
            bail!("the registry backend is only available on Windows; pass --store <file>")
        }
    }
}

impl<S: AssociationStore> App<S> {
    pub fn new(config: AppConfig, data_dir: PathBuf, store: S, log: OperationLog) -> Self {
        Self {
            config,
            data_dir,
            store,
            log,
            groups: RecordGroupId::ALL.to_vec(),
        }
    }

    pub fn detect_current_version(&mut self) -> Option<VersionToken> {
        let current = version::detect_current_version(&self.store, &self.groups);
        match &current {
            Some(version) => self.log.info(format!("Current registry version: {version}")),
            None => self.log.warn("No Vivado version found in registry"),
        }
        current
    }

    pub fn list_available_versions(&mut self) -> (Vec<VersionToken>, Option<String>) {
        match scanner::list_available_versions(&self.config.install_root) {
            Ok(versions) if versions.is_empty() => {
                self.log.warn(format!(
                    "No Vivado versions found in {}",
                    self.config.install_root.display()
                ));
                (versions, None)
            }
            Ok(versions) => {
                let names: Vec<&str> = versions.iter().map(VersionToken::as_str).collect();
                self.log
                    .info(format!("Available target versions: {}", names.join(", ")));
                (versions, None)
            }
            Err(err) => {
                self.log.warn(err.to_string());
                (Vec::new(), Some(err.to_string()))
            }
        }
    }

    pub fn version_state(&mut self) -> VersionState {
        self.log.info("Detecting Vivado versions...");
        let current = self.detect_current_version();
        let (available, scan_error) = self.list_available_versions();
        VersionState {
            current,
            available,
            install_root: self.config.install_root.clone(),
            scan_error,
        }
    }

    pub fn details(&self) -> Vec<GroupDetail> {
        self.groups
            .iter()
            .map(|&group| GroupDetail {
                group,
                fields: FieldName::ALL
                    .into_iter()
                    .map(|field| FieldDetail {
                        field,
                        key_path: key_path(group, field),
                        value: read_field(&self.store, group, field),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Rewrites all groups from `source` to `target`, backing up first when `backup` is set.
    pub fn switch_version(
        &mut self,
        source: &str,
        target: &str,
        backup: bool,
    ) -> Result<SwitchReport> {
        let (source, target) = rewrite::validate_request(source, target)?;
        self.log
            .info(format!("Starting version switch: {source} -> {target}"));

        let backup = if backup {
            let reason = format!("switch {source} -> {target}");
            self.backup(&reason)?
        } else {
            None
        };

        let outcome = rewrite::switch_version(
            &mut self.store,
            &self.groups,
            source.as_str(),
            target.as_str(),
        )?;
        self.log_outcome(&outcome, &format!("{ANCHOR}{SEPARATOR}{source}{SEPARATOR}"));
        self.log.info(format!(
            "Version switch complete! Success rate: {:.1}% ({}/{})",
            outcome.success_rate(),
            outcome.succeeded,
            outcome.attempted
        ));
        if outcome.succeeded == 0 {
            self.log.warn("No registry entries were updated");
        }

        let refreshed = self.version_state();
        Ok(SwitchReport {
            source,
            target,
            backup,
            outcome,
            refreshed,
        })
    }

    /// Snapshots the store. Nothing is written when no field could be read,
    /// so an empty snapshot never replaces the last usable backup.
    pub fn backup(&mut self, reason: &str) -> Result<Option<PathBuf>> {
        let snapshot = backup::snapshot(&self.store, &self.groups, Some(reason));
        if snapshot.entries.is_empty() {
            self.log.warn(format!(
                "Skipping backup: no readable association entries in {}",
                snapshot.store
            ));
            return Ok(None);
        }
        let path = backup::create_backup(&self.data_dir, &snapshot, self.config.keep_backups)
            .context("back up associations (pass --no-backup to skip)")?;
        self.log
            .info(format!("Backed up associations to {}", path.display()));
        Ok(Some(path))
    }

    pub fn last_backup(&self) -> Result<Option<PathBuf>> {
        backup::load_last_backup(&self.data_dir)
    }

    /// Restores the most recent backup. A backup taken from another store is
    /// refused unless `force` is set.
    pub fn restore_last_backup(&mut self, force: bool) -> Result<RestoreReport> {
        let Some(path) = self.last_backup()? else {
            bail!("No backup found in {}", self.data_dir.join("backups").display());
        };
        let snapshot = backup::load_backup(&path)?;
        let current = self.store.describe();
        if snapshot.store != current {
            if !force {
                bail!(
                    "Backup {} was taken from {} but the active store is {current} (pass --force to restore anyway)",
                    path.display(),
                    snapshot.store
                );
            }
            self.log.warn(format!(
                "Restoring a backup taken from {} into {current}",
                snapshot.store
            ));
        }
        self.log.info(format!("Restoring associations from {}", path.display()));
        let outcome = backup::restore(&mut self.store, &snapshot);
        self.log_outcome(&outcome, "");
        self.log.info(format!(
            "Restore complete. Success rate: {:.1}% ({}/{})",
            outcome.success_rate(),
            outcome.succeeded,
            outcome.attempted
        ));
        let refreshed = self.version_state();
        Ok(RestoreReport {
            backup: path,
            snapshot,
            outcome,
            refreshed,
        })
    }

    /// Copies the current association values into a JSON file store at `path`.
    pub fn export(&mut self, path: &Path) -> Result<usize> {
        let snapshot = backup::snapshot(&self.store, &self.groups, None);
        FileStore::create(
            path,
            snapshot
                .entries
                .iter()
                .map(|entry| (entry.group, entry.field, entry.value.as_str())),
        )
        .with_context(|| format!("write {}", path.display()))?;
        self.log.info(format!(
            "Exported {} association entries to {}",
            snapshot.entries.len(),
            path.display()
        ));
        Ok(snapshot.entries.len())
    }

    fn log_outcome(&mut self, outcome: &RewriteOutcome, segment: &str) {
        for field in &outcome.fields {
            let key = field.key_path();
            match &field.status {
                FieldStatus::Updated { changed: true } => self.log.info(format!("Updated {key}")),
                FieldStatus::Updated { changed: false } if !segment.is_empty() => self
                    .log
                    .info(format!("Updated {key} (no {segment} segment, value unchanged)")),
                FieldStatus::Updated { changed: false } => {
                    self.log.info(format!("Updated {key} (value unchanged)"))
                }
                FieldStatus::Failed(err) => self.log.error(format!("Failed to update {key}: {err}")),
            }
        }
    }
}
