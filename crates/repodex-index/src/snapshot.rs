//! The persisted table of code units and its single owner, [`SnapshotStore`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

pub use crate::unit::{CodeUnit, FileRecord, UnitKind};

use crate::error::Result;
use crate::store;

/// One code unit flattened together with its owning file's path and checksum.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRow {
    pub filepath: String,
    pub file_checksum: String,
    pub unit: CodeUnit,
}

/// All indexed units as of the last successful run.
///
/// Rows are ordered by file path; units of one file keep decomposition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub rows: Vec<SnapshotRow>,
    /// `provider/model` that produced every embedding; `None` when there are
    /// no rows or the rows disagree.
    pub embedding_model: Option<String>,
    /// `(filepath, checksum)` pairs that lost at least one unit to an
    /// embedding failure and must be processed again.
    pub incomplete_files: BTreeSet<(String, String)>,
}

impl Snapshot {
    #[must_use]
    pub fn new(rows: Vec<SnapshotRow>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Tag the rows with the model that embedded them. Empty snapshots stay
    /// untagged.
    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = (!self.rows.is_empty()).then(|| model.into());
        self
    }

    #[must_use]
    pub fn with_incomplete_files(mut self, files: BTreeSet<(String, String)>) -> Self {
        self.incomplete_files = files;
        self
    }

    /// Whether every row was embedded by `model`. Vacuously true when empty.
    #[must_use]
    pub fn embedded_by(&self, model: &str) -> bool {
        self.rows.is_empty() || self.embedding_model.as_deref() == Some(model)
    }

    #[must_use]
    pub fn is_incomplete(&self, filepath: &str, checksum: &str) -> bool {
        self.incomplete_files
            .contains(&(filepath.to_owned(), checksum.to_owned()))
    }

    /// Flatten file records into rows, in record order.
    #[must_use]
    pub fn from_records(records: Vec<FileRecord>) -> Self {
        let rows = records
            .into_iter()
            .flat_map(|record| {
                let FileRecord {
                    filepath,
                    checksum,
                    units,
                } = record;
                units.into_iter().map(move |unit| SnapshotRow {
                    filepath: filepath.clone(),
                    file_checksum: checksum.clone(),
                    unit,
                })
            })
            .collect();
        Self::new(rows)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every distinct file checksum present.
    #[must_use]
    pub fn checksums(&self) -> HashSet<&str> {
        self.rows.iter().map(|r| r.file_checksum.as_str()).collect()
    }

    /// Current checksum for each tracked path.
    #[must_use]
    pub fn path_checksums(&self) -> HashMap<&str, &str> {
        self.rows
            .iter()
            .map(|r| (r.filepath.as_str(), r.file_checksum.as_str()))
            .collect()
    }

    /// Rows whose unit is called `name`, matched either bare (`run`) or
    /// qualified with its class (`Job.run`).
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Vec<&SnapshotRow> {
        self.rows
            .iter()
            .filter(|r| {
                r.unit.name.as_deref() == Some(name)
                    || r.unit.qualified_name().as_deref() == Some(name)
            })
            .collect()
    }

    /// Embedded units of some file with this checksum, if every unit of that
    /// file carries an embedding and none was lost to a failed request.
    #[must_use]
    pub fn embedded_units(&self, checksum: &str) -> Option<Vec<CodeUnit>> {
        let first = self
            .rows
            .iter()
            .find(|r| r.file_checksum == checksum && !self.is_incomplete(&r.filepath, checksum))?;
        let units: Vec<CodeUnit> = self
            .rows
            .iter()
            .filter(|r| r.filepath == first.filepath && r.file_checksum == checksum)
            .map(|r| r.unit.clone())
            .collect();
        units
            .iter()
            .all(|u| u.embedding.is_some())
            .then_some(units)
    }

    /// Regroup rows into file records, preserving row order.
    #[must_use]
    pub fn files(&self) -> Vec<FileRecord> {
        let mut files: Vec<FileRecord> = Vec::new();
        for row in &self.rows {
            match files.last_mut() {
                Some(f) if f.filepath == row.filepath && f.checksum == row.file_checksum => {
                    f.units.push(row.unit.clone());
                }
                _ => {
                    let mut f = FileRecord::new(row.filepath.clone(), row.file_checksum.clone());
                    f.units.push(row.unit.clone());
                    files.push(f);
                }
            }
        }
        files
    }
}

/// Build the next snapshot's rows.
///
/// Keeps every previous row whose `(filepath, checksum)` pair was carried
/// forward and adds `new_rows`. Rows of replaced or deleted paths are simply
/// not carried, so two paths sharing one checksum never evict each other.
#[must_use]
pub fn merge(
    previous: &Snapshot,
    carried_forward: &HashSet<(String, String)>,
    new_rows: Vec<SnapshotRow>,
) -> Snapshot {
    let mut rows: Vec<SnapshotRow> = previous
        .rows
        .iter()
        .filter(|r| carried_forward.contains(&(r.filepath.clone(), r.file_checksum.clone())))
        .cloned()
        .chain(new_rows)
        .collect();

    rows.sort_by(|a, b| a.filepath.cmp(&b.filepath));
    Snapshot::new(rows)
}

/// Sole owner of the persisted snapshot file.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    current: Snapshot,
}

impl SnapshotStore {
    /// Open the snapshot at `path`; a missing file is an empty snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or lacks a
    /// required column.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = store::read_snapshot(&path).await?;
        tracing::debug!(path = %path.display(), rows = current.len(), "snapshot loaded");
        Ok(Self { path, current })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.current
    }

    /// Re-read the persisted file, discarding the in-memory copy.
    ///
    /// # Errors
    ///
    /// Same as [`SnapshotStore::open`].
    pub async fn reload(&mut self) -> Result<&Snapshot> {
        self.current = store::read_snapshot(&self.path).await?;
        Ok(&self.current)
    }

    /// Atomically persist `snapshot` and make it current.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::StorageWrite`](crate::IndexError::StorageWrite);
    /// the previous file and in-memory snapshot stay as they were.
    pub async fn commit(&mut self, snapshot: Snapshot) -> Result<()> {
        store::write_snapshot(&self.path, &snapshot).await?;
        tracing::info!(path = %self.path.display(), rows = snapshot.len(), "snapshot committed");
        self.current = snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(path: &str, checksum: &str, name: &str) -> SnapshotRow {
        SnapshotRow {
            filepath: path.into(),
            file_checksum: checksum.into(),
            unit: CodeUnit {
                kind: UnitKind::Function,
                name: Some(name.into()),
                source_text: format!("def {name}(): pass"),
                embedding: Some(vec![1.0, 0.0]),
                ..CodeUnit::global(String::new())
            },
        }
    }

    fn pairs(items: &[(&str, &str)]) -> HashSet<(String, String)> {
        items
            .iter()
            .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
            .collect()
    }

    fn names(s: &Snapshot) -> Vec<&str> {
        s.rows
            .iter()
            .map(|r| r.unit.name.as_deref().unwrap_or_default())
            .collect()
    }

    #[test]
    fn merge_carries_unchanged_and_replaces_modified() {
        let previous = Snapshot::new(vec![
            row("a.py", "c1", "a1"),
            row("a.py", "c1", "a2"),
            row("b.py", "c2", "b_old"),
        ]);
        let merged = merge(
            &previous,
            &pairs(&[("a.py", "c1")]),
            vec![row("b.py", "c3", "b_new")],
        );
        assert_eq!(names(&merged), vec!["a1", "a2", "b_new"]);
    }

    #[test]
    fn merge_drops_deleted_files() {
        let previous = Snapshot::new(vec![row("a.py", "c1", "a"), row("gone.py", "c9", "g")]);
        let merged = merge(&previous, &pairs(&[("a.py", "c1")]), Vec::new());
        assert!(!merged.checksums().contains("c9"));
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn merge_keeps_stale_checksum_produced_again() {
        // b.py took over a.py's old content: c1 is replaced for a.py but fresh for b.py.
        let previous = Snapshot::new(vec![row("a.py", "c1", "old")]);
        let merged = merge(
            &previous,
            &HashSet::new(),
            vec![row("a.py", "c2", "new_a"), row("b.py", "c1", "new_b")],
        );
        assert_eq!(names(&merged), vec!["new_a", "new_b"]);
    }

    #[test]
    fn merge_keeps_carried_twin_of_modified_file() {
        // a.py and b.py shared c1; a.py changed, b.py did not.
        let previous = Snapshot::new(vec![row("a.py", "c1", "a_old"), row("b.py", "c1", "b")]);
        let merged = merge(
            &previous,
            &pairs(&[("b.py", "c1")]),
            vec![row("a.py", "c2", "a_new")],
        );
        assert_eq!(names(&merged), vec!["a_new", "b"]);
        assert!(merged.checksums().contains("c1"));
    }

    #[test]
    fn merge_sorts_by_path_and_keeps_unit_order() {
        let merged = merge(
            &Snapshot::default(),
            &HashSet::new(),
            vec![
                row("z.py", "c1", "z1"),
                row("a.py", "c2", "a1"),
                row("z.py", "c1", "z2"),
                row("a.py", "c2", "a2"),
            ],
        );
        assert_eq!(names(&merged), vec!["a1", "a2", "z1", "z2"]);
    }

    #[test]
    fn files_regroup_rows() {
        let snapshot = Snapshot::new(vec![
            row("a.py", "c1", "x"),
            row("a.py", "c1", "y"),
            row("b.py", "c2", "z"),
        ]);
        let files = snapshot.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].units.len(), 2);
        assert_eq!(Snapshot::from_records(files), snapshot);
    }

    #[test]
    fn find_by_name_matches_bare_and_qualified() {
        let mut method = row("j.py", "c1", "run");
        method.unit.kind = UnitKind::Method;
        method.unit.enclosing_class = Some("Job".into());
        let snapshot = Snapshot::new(vec![method, row("k.py", "c2", "run")]);

        assert_eq!(snapshot.find_by_name("run").len(), 2);
        assert_eq!(snapshot.find_by_name("Job.run").len(), 1);
        assert!(snapshot.find_by_name("missing").is_empty());
    }

    #[test]
    fn embedded_units_requires_every_embedding() {
        let mut unembedded = row("a.py", "c1", "b");
        unembedded.unit.embedding = None;
        let snapshot = Snapshot::new(vec![row("a.py", "c1", "a"), unembedded, row("b.py", "c2", "x")]);

        assert!(snapshot.embedded_units("c1").is_none());
        assert_eq!(snapshot.embedded_units("c2").map(|u| u.len()), Some(1));
        assert!(snapshot.embedded_units("c3").is_none());
    }

    #[test]
    fn embedded_units_skips_incomplete_files() {
        let snapshot = Snapshot::new(vec![row("a.py", "c1", "a"), row("b.py", "c1", "a")])
            .with_incomplete_files(BTreeSet::from([("a.py".to_string(), "c1".to_string())]));
        assert_eq!(snapshot.embedded_units("c1").map(|u| u.len()), Some(1));

        let all_incomplete = Snapshot::new(vec![row("a.py", "c1", "a")])
            .with_incomplete_files(BTreeSet::from([("a.py".to_string(), "c1".to_string())]));
        assert!(all_incomplete.embedded_units("c1").is_none());
    }

    #[test]
    fn embedding_model_tags_only_non_empty_snapshots() {
        assert!(Snapshot::default().with_embedding_model("m").embedding_model.is_none());
        assert!(Snapshot::default().embedded_by("m"));

        let snapshot = Snapshot::new(vec![row("a.py", "c1", "a")]).with_embedding_model("m");
        assert!(snapshot.embedded_by("m"));
        assert!(!snapshot.embedded_by("other"));
        assert!(!Snapshot::new(vec![row("a.py", "c1", "a")]).embedded_by("m"));
    }

    #[test]
    fn path_checksums_maps_each_path() {
        let snapshot = Snapshot::new(vec![row("a.py", "c1", "a"), row("b.py", "c2", "b")]);
        let map = snapshot.path_checksums();
        assert_eq!(map.get("a.py"), Some(&"c1"));
        assert_eq!(map.get("b.py"), Some(&"c2"));
    }

    #[tokio::test]
    async fn store_commit_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");

        let mut store = SnapshotStore::open(&path).await.unwrap();
        assert!(store.snapshot().is_empty());

        let snapshot = Snapshot::new(vec![row("a.py", "c1", "a")])
            .with_embedding_model("mock/mock-embedding")
            .with_incomplete_files(BTreeSet::from([("a.py".to_string(), "c1".to_string())]));
        store.commit(snapshot.clone()).await.unwrap();
        assert_eq!(store.snapshot(), &snapshot);

        let reopened = SnapshotStore::open(&path).await.unwrap();
        assert_eq!(reopened.snapshot(), &snapshot);

        store.current = Snapshot::default();
        assert_eq!(store.reload().await.unwrap(), &snapshot);
    }
}
