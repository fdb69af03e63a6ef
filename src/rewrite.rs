use crate::{
    store::{key_path, Access, AssociationStore, FieldName, RecordGroupId, StoreError},
    version::{replace_anchored_version, VersionToken},
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewriteError {
    #[error("invalid switch request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug)]
pub enum FieldStatus {
    /// Written back; `changed` is false when the value held no anchored source segment.
    Updated { changed: bool },
    Failed(StoreError),
}

#[derive(Debug)]
pub struct FieldOutcome {
    pub group: RecordGroupId,
    pub field: FieldName,
    pub status: FieldStatus,
}

impl FieldOutcome {
    pub fn key_path(&self) -> String {
        key_path(self.group, self.field)
    }
}

#[derive(Debug, Default)]
pub struct RewriteOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub fields: Vec<FieldOutcome>,
}

impl RewriteOutcome {
    pub(crate) fn record(&mut self, group: RecordGroupId, field: FieldName, status: FieldStatus) {
        self.attempted += 1;
        if matches!(status, FieldStatus::Updated { .. }) {
            self.succeeded += 1;
        }
        self.fields.push(FieldOutcome {
            group,
            field,
            status,
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = (&FieldOutcome, &StoreError)> {
        self.fields.iter().filter_map(|outcome| match &outcome.status {
            FieldStatus::Failed(err) => Some((outcome, err)),
            FieldStatus::Updated { .. } => None,
        })
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.attempted as f64 * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded == self.attempted
    }
}

pub fn validate_request(
    source: &str,
    target: &str,
) -> Result<(VersionToken, VersionToken), RewriteError> {
    let source = source.trim();
    let target = target.trim();
    if source.is_empty() || target.is_empty() {
        return Err(RewriteError::InvalidRequest(
            "current or target version not specified".to_string(),
        ));
    }
    if source == target {
        return Err(RewriteError::InvalidRequest(format!(
            "current and target versions are the same ({source})"
        )));
    }
    let parse = |value: &str| {
        VersionToken::parse(value)
            .ok_or_else(|| RewriteError::InvalidRequest(format!("not a version: {value:?}")))
    };
    Ok((parse(source)?, parse(target)?))
}

/// Repoints every group's display and command entries from `source` to `target`.
///
/// Each field is opened, rewritten and released on its own. A failing field is
/// recorded and the loop moves on; earlier writes are never rolled back.
pub fn switch_version<S: AssociationStore>(
    store: &mut S,
    groups: &[RecordGroupId],
    source: &str,
    target: &str,
) -> Result<RewriteOutcome, RewriteError> {
    let (source, target) = validate_request(source, target)?;
    let outcome = groups
        .iter()
        .flat_map(|&group| FieldName::ALL.into_iter().map(move |field| (group, field)))
        .fold(RewriteOutcome::default(), |mut outcome, (group, field)| {
            let status = match rewrite_field(store, group, field, &source, &target) {
                Ok(changed) => FieldStatus::Updated { changed },
                Err(err) => FieldStatus::Failed(err),
            };
            outcome.record(group, field, status);
            outcome
        });
    Ok(outcome)
}

fn rewrite_field<S: AssociationStore>(
    store: &mut S,
    group: RecordGroupId,
    field: FieldName,
    source: &VersionToken,
    target: &VersionToken,
) -> Result<bool, StoreError> {
    let handle = store.open(group, field, Access::ReadWrite)?;
    let current = store.read(&handle)?;
    let (next, replaced) = replace_anchored_version(&current, source.as_str(), target.as_str());
    store.write(&handle, &next)?;
    Ok(replaced > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{MemoryStore, SpyStore};

    const ICON: &str = r"C:\Xilinx\Vivado\2021.1\bin\icon.ico";
    const COMMAND: &str = r#"C:\Xilinx\Vivado\2021.1\bin\vivado.exe "%1""#;

    fn full_store() -> MemoryStore {
        RecordGroupId::ALL
            .into_iter()
            .fold(MemoryStore::default(), |store, group| {
                store.with_record(group, ICON, COMMAND)
            })
    }

    #[test]
    fn rewrites_both_fields_of_a_group() {
        let mut store = MemoryStore::default().with_record(RecordGroupId::Checkpoint, ICON, COMMAND);
        let outcome =
            switch_version(&mut store, &[RecordGroupId::Checkpoint], "2021.1", "2022.2").unwrap();

        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.succeeded, 2);
        assert!(outcome.is_complete());
        assert_eq!(
            store.get(RecordGroupId::Checkpoint, FieldName::DisplayPath),
            Some(r"C:\Xilinx\Vivado\2022.2\bin\icon.ico")
        );
        assert_eq!(
            store.get(RecordGroupId::Checkpoint, FieldName::CommandPath),
            Some(r#"C:\Xilinx\Vivado\2022.2\bin\vivado.exe "%1""#)
        );
    }

    #[test]
    fn equal_versions_are_rejected_before_touching_the_store() {
        let mut spy = SpyStore {
            inner: full_store(),
            ..SpyStore::default()
        };
        let err = switch_version(&mut spy, &RecordGroupId::ALL, "2021.1", "2021.1").unwrap_err();
        assert!(matches!(err, RewriteError::InvalidRequest(_)));
        assert_eq!(spy.opens.get(), 0);
    }

    #[test]
    fn empty_or_malformed_versions_are_rejected() {
        let mut spy = SpyStore::default();
        for (source, target) in [("", "2022.2"), ("2021.1", " "), ("2021.1", "latest")] {
            assert!(matches!(
                switch_version(&mut spy, &RecordGroupId::ALL, source, target),
                Err(RewriteError::InvalidRequest(_))
            ));
        }
        assert_eq!(spy.opens.get(), 0);
    }

    #[test]
    fn failures_are_recorded_and_the_loop_continues() {
        let mut store = full_store();
        store.deny_writes(RecordGroupId::Project, FieldName::DisplayPath);
        store.fail_writes(RecordGroupId::Wdb, FieldName::CommandPath);

        let outcome =
            switch_version(&mut store, &RecordGroupId::ALL, "2021.1", "2022.2").unwrap();

        assert_eq!(outcome.attempted, 6);
        assert_eq!(outcome.succeeded, 4);
        assert!(!outcome.is_complete());
        let failed: Vec<String> = outcome.failures().map(|(field, _)| field.key_path()).collect();
        assert_eq!(
            failed,
            [
                r"Vivado.Project.1\DefaultIcon",
                r"Vivado.WDB.1\Shell\Open\Command"
            ]
        );
        assert!(matches!(
            outcome.failures().next().map(|(_, err)| err),
            Some(StoreError::AccessDenied { .. })
        ));
        assert_eq!(
            store.get(RecordGroupId::Project, FieldName::DisplayPath),
            Some(ICON)
        );
        assert_eq!(
            store.get(RecordGroupId::Project, FieldName::CommandPath),
            Some(r#"C:\Xilinx\Vivado\2022.2\bin\vivado.exe "%1""#)
        );
        assert!((outcome.success_rate() - 66.666).abs() < 0.01);
    }

    #[test]
    fn read_failures_leave_the_value_untouched() {
        let mut store = full_store();
        store.fail_reads(RecordGroupId::Checkpoint, FieldName::CommandPath);

        let outcome =
            switch_version(&mut store, &RecordGroupId::ALL, "2021.1", "2022.2").unwrap();

        assert_eq!(outcome.attempted, 6);
        assert_eq!(outcome.succeeded, 5);
        let failed: Vec<(String, bool)> = outcome
            .failures()
            .map(|(field, err)| (field.key_path(), matches!(err, StoreError::Read { .. })))
            .collect();
        assert_eq!(
            failed,
            [(r"Vivado.Checkpoint.1\Shell\Open\Command".to_string(), true)]
        );
        assert_eq!(
            store.get(RecordGroupId::Checkpoint, FieldName::CommandPath),
            Some(COMMAND)
        );
        assert_eq!(
            store.get(RecordGroupId::Wdb, FieldName::CommandPath),
            Some(r#"C:\Xilinx\Vivado\2022.2\bin\vivado.exe "%1""#)
        );
    }

    #[test]
    fn missing_groups_count_as_attempted_failures() {
        let mut store = MemoryStore::default().with_record(RecordGroupId::Wdb, ICON, COMMAND);
        let outcome =
            switch_version(&mut store, &RecordGroupId::ALL, "2021.1", "2020.2").unwrap();
        assert_eq!(outcome.attempted, 2 * RecordGroupId::ALL.len());
        assert_eq!(outcome.succeeded, 2);
        assert!(outcome
            .failures()
            .all(|(_, err)| matches!(err, StoreError::NotFound { .. })));
    }

    #[test]
    fn values_without_the_source_segment_are_written_back_unchanged() {
        let mut store = MemoryStore::default().with_record(
            RecordGroupId::Checkpoint,
            r"C:\Xilinx\Vivado\2020.2\bin\icon.ico",
            "notepad.exe %1",
        );
        let outcome =
            switch_version(&mut store, &[RecordGroupId::Checkpoint], "2021.1", "2022.2").unwrap();
        assert_eq!(outcome.succeeded, 2);
        assert!(outcome
            .fields
            .iter()
            .all(|field| matches!(field.status, FieldStatus::Updated { changed: false })));
        assert_eq!(
            store.get(RecordGroupId::Checkpoint, FieldName::DisplayPath),
            Some(r"C:\Xilinx\Vivado\2020.2\bin\icon.ico")
        );
    }

    #[test]
    fn switching_back_restores_original_values() {
        let mut store = full_store();
        store.set(
            RecordGroupId::Project,
            FieldName::CommandPath,
            r#""C:\Xilinx\Vivado\2021.1\bin\vivado.bat" -log C:\work\2021.1\vivado.log "%1""#,
        );
        let before: Vec<Option<String>> = RecordGroupId::ALL
            .into_iter()
            .flat_map(|group| FieldName::ALL.into_iter().map(move |field| (group, field)))
            .map(|(group, field)| store.get(group, field).map(str::to_string))
            .collect();

        let forward = switch_version(&mut store, &RecordGroupId::ALL, "2021.1", "2022.2").unwrap();
        let back = switch_version(&mut store, &RecordGroupId::ALL, "2022.2", "2021.1").unwrap();
        assert!(forward.is_complete() && back.is_complete());

        let after: Vec<Option<String>> = RecordGroupId::ALL
            .into_iter()
            .flat_map(|group| FieldName::ALL.into_iter().map(move |field| (group, field)))
            .map(|(group, field)| store.get(group, field).map(str::to_string))
            .collect();
        assert_eq!(before, after);
    }
}
