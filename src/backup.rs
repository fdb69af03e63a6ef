use crate::{
    rewrite::{FieldStatus, RewriteOutcome},
    store::{read_field, write_field, AssociationStore, FieldName, RecordGroupId},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationSnapshot {
    pub timestamp: u64,
    pub reason: Option<String>,
    pub store: String,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub group: RecordGroupId,
    pub field: FieldName,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LastBackup {
    path: PathBuf,
    timestamp: u64,
}

/// Captures every readable field; unreadable ones are left out.
pub fn snapshot<S: AssociationStore>(
    store: &S,
    groups: &[RecordGroupId],
    reason: Option<&str>,
) -> AssociationSnapshot {
    let entries = groups
        .iter()
        .flat_map(|&group| FieldName::ALL.into_iter().map(move |field| (group, field)))
        .filter_map(|(group, field)| {
            read_field(store, group, field)
                .ok()
                .map(|value| SnapshotEntry {
                    group,
                    field,
                    value,
                })
        })
        .collect();
    AssociationSnapshot {
        timestamp: now_stamp(),
        reason: reason.map(|value| value.to_string()),
        store: store.describe(),
        entries,
    }
}

pub fn create_backup(
    data_dir: &Path,
    snapshot: &AssociationSnapshot,
    keep: usize,
) -> Result<PathBuf> {
    let backup_root = data_dir.join("backups");
    fs::create_dir_all(&backup_root).context("create backups dir")?;

    let mut backup_dir = backup_root.join(format!("backup-{}", snapshot.timestamp));
    let mut suffix = 1;
    while backup_dir.exists() {
        backup_dir = backup_root.join(format!("backup-{}-{suffix}", snapshot.timestamp));
        suffix += 1;
    }
    fs::create_dir_all(&backup_dir).context("create backup dir")?;

    let raw = serde_json::to_string_pretty(snapshot).context("serialize snapshot")?;
    fs::write(backup_dir.join("associations.json"), raw).context("write snapshot")?;

    let last = LastBackup {
        path: backup_dir.clone(),
        timestamp: snapshot.timestamp,
    };
    let last_json = serde_json::to_string_pretty(&last).context("serialize last backup")?;
    fs::write(backup_root.join("last.json"), last_json).context("write last backup")?;

    if keep > 0 {
        prune_backups(&backup_root, keep).context("prune old backups")?;
    }

    Ok(backup_dir)
}

fn prune_backups(backup_root: &Path, keep: usize) -> Result<()> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(backup_root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("backup-"))
        })
        .collect();
    dirs.sort_by_key(|path| backup_order_key(path));
    let excess = dirs.len().saturating_sub(keep);
    for dir in dirs.into_iter().take(excess) {
        fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
    }
    Ok(())
}

fn backup_order_key(path: &Path) -> (u64, u64) {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let mut parts = name.trim_start_matches("backup-").split('-');
    let stamp = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
    let suffix = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
    (stamp, suffix)
}

pub fn load_last_backup(data_dir: &Path) -> Result<Option<PathBuf>> {
    let path = data_dir.join("backups").join("last.json");
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).context("read last backup")?;
    let last: LastBackup = serde_json::from_str(&raw).context("parse last backup")?;
    if last.path.exists() {
        Ok(Some(last.path))
    } else {
        Ok(None)
    }
}

pub fn load_backup(backup_dir: &Path) -> Result<AssociationSnapshot> {
    let raw = fs::read_to_string(backup_dir.join("associations.json"))
        .context("read backup snapshot")?;
    let snapshot = serde_json::from_str(&raw).context("parse backup snapshot")?;
    Ok(snapshot)
}

/// Writes every captured value back, tallied like a switch.
pub fn restore<S: AssociationStore>(store: &mut S, snapshot: &AssociationSnapshot) -> RewriteOutcome {
    snapshot
        .entries
        .iter()
        .fold(RewriteOutcome::default(), |mut outcome, entry| {
            let changed = read_field(&*store, entry.group, entry.field)
                .map(|current| current != entry.value)
                .unwrap_or(true);
            let status = match write_field(store, entry.group, entry.field, &entry.value) {
                Ok(()) => FieldStatus::Updated { changed },
                Err(err) => FieldStatus::Failed(err),
            };
            outcome.record(entry.group, entry.field, status);
            outcome
        })
}

fn now_stamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rewrite::switch_version, store::testing::MemoryStore};
    use tempfile::TempDir;

    const ICON: &str = r"C:\Xilinx\Vivado\2021.1\bin\icon.ico";
    const COMMAND: &str = r#"C:\Xilinx\Vivado\2021.1\bin\vivado.exe "%1""#;

    #[test]
    fn snapshot_skips_unreadable_fields() {
        let mut store = MemoryStore::default().with_record(RecordGroupId::Project, ICON, COMMAND);
        store.set(RecordGroupId::Wdb, FieldName::DisplayPath, ICON);
        let snap = snapshot(&store, &RecordGroupId::ALL, Some("test"));
        assert_eq!(snap.entries.len(), 3);
        assert_eq!(snap.reason.as_deref(), Some("test"));
        assert_eq!(snap.store, "memory");
    }

    #[test]
    fn backup_then_restore_undoes_a_switch() {
        let temp = TempDir::new().unwrap();
        let mut store = MemoryStore::default()
            .with_record(RecordGroupId::Checkpoint, ICON, COMMAND)
            .with_record(RecordGroupId::Project, ICON, COMMAND);

        let snap = snapshot(&store, &RecordGroupId::ALL, None);
        let dir = create_backup(temp.path(), &snap, 5).unwrap();
        switch_version(&mut store, &RecordGroupId::ALL, "2021.1", "2022.2").unwrap();
        assert_ne!(
            store.get(RecordGroupId::Project, FieldName::DisplayPath),
            Some(ICON)
        );

        assert_eq!(load_last_backup(temp.path()).unwrap(), Some(dir.clone()));
        let loaded = load_backup(&dir).unwrap();
        assert_eq!(loaded.entries, snap.entries);

        let outcome = restore(&mut store, &loaded);
        assert_eq!(outcome.attempted, 4);
        assert!(outcome.is_complete());
        for group in [RecordGroupId::Checkpoint, RecordGroupId::Project] {
            assert_eq!(store.get(group, FieldName::DisplayPath), Some(ICON));
            assert_eq!(store.get(group, FieldName::CommandPath), Some(COMMAND));
        }
    }

    #[test]
    fn no_last_backup_before_the_first_one() {
        let temp = TempDir::new().unwrap();
        assert_eq!(load_last_backup(temp.path()).unwrap(), None);
    }

    #[test]
    fn old_backups_are_pruned() {
        let temp = TempDir::new().unwrap();
        let store = MemoryStore::default().with_record(RecordGroupId::Wdb, ICON, COMMAND);
        let mut snap = snapshot(&store, &RecordGroupId::ALL, None);
        let mut created = Vec::new();
        for stamp in [1_700_000_000, 1_700_000_100, 1_700_000_100, 1_700_000_200] {
            snap.timestamp = stamp;
            created.push(create_backup(temp.path(), &snap, 2).unwrap());
        }
        let remaining: Vec<bool> = created.iter().map(|dir| dir.exists()).collect();
        assert_eq!(remaining, [false, false, true, true]);
        assert!(created[2].ends_with("backup-1700000100-1"));
        assert_eq!(load_last_backup(temp.path()).unwrap(), Some(created[3].clone()));
    }
}
