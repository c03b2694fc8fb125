//! Decide which scanned files need decomposition and which old rows expire.

use std::collections::{HashMap, HashSet};

use crate::scanner::empty_checksum;
use crate::snapshot::Snapshot;
use crate::unit::FileRecord;

/// Outcome of comparing a fresh scan with the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePlan {
    /// New or modified files, in scan order.
    pub files_to_process: Vec<FileRecord>,
    /// Old checksums of paths whose rows are being replaced.
    pub stale_checksums: HashSet<String>,
    /// `(filepath, checksum)` pairs whose previous rows are kept verbatim.
    pub carried_forward: HashSet<(String, String)>,
    /// Paths skipped because their content is empty.
    pub skipped_empty: Vec<String>,
    /// Whether previous embeddings may be reused for relocated content.
    pub reuse_embeddings: bool,
}

impl UpdatePlan {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.files_to_process.is_empty() && self.stale_checksums.is_empty()
    }
}

/// Compare `scan` with `previous` by path and checksum.
///
/// A path present before with the same checksum is carried forward, unless
/// some of its units failed to embed last time. With a different checksum
/// its old checksum becomes stale and the file is processed; an unseen path
/// is processed. Empty files are skipped after the stale bookkeeping, so
/// emptying a file still evicts its old rows.
///
/// A snapshot embedded by a model other than `embedding_model` is treated as
/// empty: every file is processed again and nothing is reused.
#[must_use]
pub fn plan_update(scan: &[FileRecord], previous: &Snapshot, embedding_model: &str) -> UpdatePlan {
    let mut plan = UpdatePlan {
        reuse_embeddings: true,
        ..UpdatePlan::default()
    };

    let known: HashMap<&str, &str> = if previous.embedded_by(embedding_model) {
        previous.path_checksums()
    } else {
        tracing::info!(
            previous = previous.embedding_model.as_deref().unwrap_or("unknown"),
            current = embedding_model,
            "embedding model changed, re-embedding every file"
        );
        plan.reuse_embeddings = false;
        plan.stale_checksums = previous
            .checksums()
            .into_iter()
            .map(str::to_owned)
            .collect();
        HashMap::new()
    };
    let empty = empty_checksum();

    for file in scan {
        match known.get(file.filepath.as_str()) {
            Some(&old) if old == file.checksum && previous.is_incomplete(&file.filepath, old) => {
                tracing::debug!(file = %file.filepath, "retrying units that failed to embed");
                plan.stale_checksums.insert(old.to_owned());
            }
            Some(&old) if old == file.checksum => {
                plan.carried_forward
                    .insert((file.filepath.clone(), file.checksum.clone()));
                continue;
            }
            Some(&old) => {
                plan.stale_checksums.insert(old.to_owned());
            }
            None => {}
        }

        if file.checksum == empty {
            tracing::debug!(file = %file.filepath, "skipping empty file");
            plan.skipped_empty.push(file.filepath.clone());
            continue;
        }
        plan.files_to_process.push(file.clone());
    }

    tracing::debug!(
        process = plan.files_to_process.len(),
        stale = plan.stale_checksums.len(),
        carried = plan.carried_forward.len(),
        "update planned"
    );
    plan
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::snapshot::SnapshotRow;
    use crate::unit::CodeUnit;

    const MODEL: &str = "mock/mock-embedding";

    fn previous(files: &[(&str, &str)]) -> Snapshot {
        Snapshot::new(
            files
                .iter()
                .map(|(path, checksum)| SnapshotRow {
                    filepath: (*path).into(),
                    file_checksum: (*checksum).into(),
                    unit: CodeUnit::global(format!("# {path}")),
                })
                .collect(),
        )
        .with_embedding_model(MODEL)
    }

    fn scanned(files: &[(&str, &str)]) -> Vec<FileRecord> {
        files.iter().map(|(p, c)| FileRecord::new(*p, *c)).collect()
    }

    fn processed(plan: &UpdatePlan) -> Vec<&str> {
        plan.files_to_process
            .iter()
            .map(|f| f.filepath.as_str())
            .collect()
    }

    #[test]
    fn unchanged_tree_is_a_noop() {
        let prev = previous(&[("a.py", "c1"), ("b.py", "c2")]);
        let plan = plan_update(&scanned(&[("a.py", "c1"), ("b.py", "c2")]), &prev, MODEL);
        assert!(plan.is_noop());
        assert_eq!(plan.carried_forward.len(), 2);
    }

    #[test]
    fn modified_file_is_processed_and_old_checksum_stale() {
        let prev = previous(&[("a.py", "c1"), ("b.py", "c2")]);
        let plan = plan_update(&scanned(&[("a.py", "c1"), ("b.py", "c3")]), &prev, MODEL);

        assert_eq!(processed(&plan), vec!["b.py"]);
        assert!(plan.stale_checksums.contains("c2"));
        assert_eq!(plan.stale_checksums.len(), 1);
        assert!(plan.carried_forward.contains(&("a.py".into(), "c1".into())));
        assert!(!plan.carried_forward.iter().any(|(p, _)| p == "b.py"));
    }

    #[test]
    fn new_file_has_no_stale_checksum() {
        let prev = previous(&[("a.py", "c1")]);
        let plan = plan_update(&scanned(&[("a.py", "c1"), ("new.py", "c5")]), &prev, MODEL);
        assert_eq!(processed(&plan), vec!["new.py"]);
        assert!(plan.stale_checksums.is_empty());
    }

    #[test]
    fn deleted_file_is_neither_carried_nor_processed() {
        let prev = previous(&[("a.py", "c1"), ("gone.py", "c2")]);
        let plan = plan_update(&scanned(&[("a.py", "c1")]), &prev, MODEL);
        assert!(plan.files_to_process.is_empty());
        assert!(!plan.carried_forward.iter().any(|(p, _)| p == "gone.py"));
    }

    #[test]
    fn empty_files_are_skipped() {
        let plan = plan_update(&scanned(&[("empty.py", empty_checksum().as_str())]), &Snapshot::default(), MODEL);
        assert!(plan.files_to_process.is_empty());
        assert_eq!(plan.skipped_empty, vec!["empty.py".to_string()]);
    }

    #[test]
    fn emptied_file_evicts_old_rows() {
        let prev = previous(&[("a.py", "c1")]);
        let plan = plan_update(&scanned(&[("a.py", empty_checksum().as_str())]), &prev, MODEL);
        assert!(plan.files_to_process.is_empty());
        assert!(plan.stale_checksums.contains("c1"));
    }

    #[test]
    fn empty_snapshot_processes_everything() {
        let plan = plan_update(&scanned(&[("a.py", "c1"), ("b.py", "c2")]), &Snapshot::default(), MODEL);
        assert_eq!(processed(&plan), vec!["a.py", "b.py"]);
        assert!(plan.carried_forward.is_empty());
    }

    #[test]
    fn incomplete_file_is_processed_again() {
        let prev = previous(&[("a.py", "c1"), ("b.py", "c2")])
            .with_incomplete_files(BTreeSet::from([("a.py".to_string(), "c1".to_string())]));
        let plan = plan_update(&scanned(&[("a.py", "c1"), ("b.py", "c2")]), &prev, MODEL);

        assert_eq!(processed(&plan), vec!["a.py"]);
        assert!(!plan.carried_forward.iter().any(|(p, _)| p == "a.py"));
        assert!(plan.carried_forward.contains(&("b.py".into(), "c2".into())));
        assert!(!plan.is_noop());
    }

    #[test]
    fn other_model_discards_previous_rows() {
        let prev = previous(&[("a.py", "c1"), ("b.py", "c2")]);
        let plan = plan_update(
            &scanned(&[("a.py", "c1"), ("b.py", "c2")]),
            &prev,
            "mock/mock-embedding-3",
        );

        assert_eq!(processed(&plan), vec!["a.py", "b.py"]);
        assert!(plan.carried_forward.is_empty());
        assert_eq!(plan.stale_checksums.len(), 2);
        assert!(!plan.reuse_embeddings);
    }

    #[test]
    fn untagged_snapshot_is_embedded_again() {
        let prev = Snapshot::new(previous(&[("a.py", "c1")]).rows);
        let plan = plan_update(&scanned(&[("a.py", "c1")]), &prev, MODEL);
        assert_eq!(processed(&plan), vec!["a.py"]);
    }

    #[test]
    fn same_model_reuses_embeddings() {
        let plan = plan_update(&scanned(&[("a.py", "c1")]), &previous(&[("a.py", "c1")]), MODEL);
        assert!(plan.reuse_embeddings);
        assert!(plan.is_noop());
    }
}
