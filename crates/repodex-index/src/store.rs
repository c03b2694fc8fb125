//! `SQLite` persistence for snapshots: one flat `code_units` table per file,
//! plus the `incomplete_files` side table.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{IndexError, Result};
use crate::snapshot::{Snapshot, SnapshotRow};
use crate::unit::{CodeUnit, UnitKind};

/// Columns every reader requires. `embedding_model` is read when present.
const REQUIRED_COLUMNS: [&str; 10] = [
    "filepath",
    "file_checksum",
    "unit_kind",
    "name",
    "enclosing_class_name",
    "source_text",
    "summary_text",
    "input_signature",
    "output_signature",
    "embedding_vector",
];

const CREATE_TABLE: &str = "CREATE TABLE code_units (
    filepath TEXT NOT NULL,
    file_checksum TEXT NOT NULL,
    unit_kind TEXT NOT NULL,
    name TEXT,
    enclosing_class_name TEXT,
    source_text TEXT NOT NULL,
    summary_text TEXT,
    input_signature TEXT,
    output_signature TEXT,
    embedding_vector BLOB,
    embedding_model TEXT
)";

const CREATE_INCOMPLETE: &str = "CREATE TABLE incomplete_files (
    filepath TEXT NOT NULL,
    file_checksum TEXT NOT NULL
)";

const INSERT_ROW: &str = "INSERT INTO code_units (
    filepath, file_checksum, unit_kind, name, enclosing_class_name,
    source_text, summary_text, input_signature, output_signature, embedding_vector,
    embedding_model
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const INSERT_INCOMPLETE: &str =
    "INSERT INTO incomplete_files (filepath, file_checksum) VALUES (?, ?)";

const SELECT_ROWS: &str = "SELECT filepath, file_checksum, unit_kind, name, enclosing_class_name,
    source_text, summary_text, input_signature, output_signature, embedding_vector
FROM code_units ORDER BY rowid";

async fn connect(path: &Path, create: bool) -> std::result::Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Delete);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
}

/// Read a snapshot file. A missing file yields an empty snapshot.
pub(crate) async fn read_snapshot(path: &Path) -> Result<Snapshot> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(Snapshot::default());
    }

    let pool = connect(path, false).await?;
    let result = read_all(&pool).await;
    pool.close().await;
    result
}

async fn read_all(pool: &SqlitePool) -> Result<Snapshot> {
    let columns = validate_schema(pool).await?;
    let rows = sqlx::query(SELECT_ROWS)
        .fetch_all(pool)
        .await?
        .iter()
        .map(decode_row)
        .collect::<Result<Vec<_>>>()?;

    let embedding_model = if columns.iter().any(|c| c == "embedding_model") {
        read_embedding_model(pool).await?
    } else {
        None
    };

    Ok(Snapshot {
        rows,
        embedding_model,
        incomplete_files: read_incomplete(pool).await?,
    })
}

/// The single model shared by every row, if there is one.
async fn read_embedding_model(pool: &SqlitePool) -> Result<Option<String>> {
    let models: Vec<Option<String>> = sqlx::query("SELECT DISTINCT embedding_model FROM code_units")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.try_get::<Option<String>, _>("embedding_model"))
        .collect::<std::result::Result<_, _>>()?;

    match models.as_slice() {
        [single] => Ok(single.clone()),
        [] => Ok(None),
        _ => {
            tracing::warn!(models = models.len(), "snapshot rows disagree on embedding model");
            Ok(None)
        }
    }
}

async fn read_incomplete(pool: &SqlitePool) -> Result<BTreeSet<(String, String)>> {
    let exists = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'incomplete_files'",
    )
    .fetch_optional(pool)
    .await?
    .is_some();
    if !exists {
        return Ok(BTreeSet::new());
    }

    sqlx::query("SELECT filepath, file_checksum FROM incomplete_files")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| -> Result<(String, String)> {
            Ok((row.try_get("filepath")?, row.try_get("file_checksum")?))
        })
        .collect()
}

/// Check the required columns and return every column name present.
async fn validate_schema(pool: &SqlitePool) -> Result<Vec<String>> {
    let columns: Vec<String> = sqlx::query("PRAGMA table_info(code_units)")
        .fetch_all(pool)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<std::result::Result<_, _>>()?;

    if columns.is_empty() {
        return Err(IndexError::SnapshotSchema("missing table code_units".to_owned()));
    }
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|required| !columns.iter().any(|c| c == required))
        .collect();
    if !missing.is_empty() {
        return Err(IndexError::SnapshotSchema(format!(
            "missing columns: {}",
            missing.join(", ")
        )));
    }
    Ok(columns)
}

fn decode_row(row: &SqliteRow) -> Result<SnapshotRow> {
    let kind: String = row.try_get("unit_kind")?;
    let kind: UnitKind = kind.parse().map_err(IndexError::SnapshotSchema)?;

    let input_signature: Option<String> = row.try_get("input_signature")?;
    let output_signature: Option<String> = row.try_get("output_signature")?;
    let embedding: Option<Vec<u8>> = row.try_get("embedding_vector")?;

    Ok(SnapshotRow {
        filepath: row.try_get("filepath")?,
        file_checksum: row.try_get("file_checksum")?,
        unit: CodeUnit {
            kind,
            name: row.try_get("name")?,
            enclosing_class: row.try_get("enclosing_class_name")?,
            source_text: row.try_get("source_text")?,
            summary_text: row.try_get("summary_text")?,
            input_signature: input_signature
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            output_signature: output_signature
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            embedding: embedding.as_deref().map(blob_to_vec),
        },
    })
}

/// Write `snapshot` next to `path` and rename it into place.
///
/// The temporary file is removed on failure, leaving `path` untouched.
pub(crate) async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let tmp = temp_path(path)?;
    let result = write_then_rename(&tmp, path, snapshot).await;
    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(IndexError::StorageWrite(format!("{}: {e}", path.display())));
    }
    Ok(())
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| IndexError::StorageWrite(format!("invalid path {}", path.display())))?;
    Ok(path.with_file_name(format!(
        "{}.tmp-{}",
        name.to_string_lossy(),
        uuid::Uuid::new_v4()
    )))
}

async fn write_then_rename(tmp: &Path, path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let pool = connect(tmp, true).await?;
    let written = write_rows(&pool, snapshot).await;
    pool.close().await;
    written?;

    tokio::fs::rename(tmp, path).await?;
    Ok(())
}

async fn write_rows(pool: &SqlitePool, snapshot: &Snapshot) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(CREATE_TABLE).execute(&mut *tx).await?;
    sqlx::query(CREATE_INCOMPLETE).execute(&mut *tx).await?;

    for row in &snapshot.rows {
        let unit = &row.unit;
        let input = unit
            .input_signature
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let output = unit
            .output_signature
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(INSERT_ROW)
            .bind(&row.filepath)
            .bind(&row.file_checksum)
            .bind(unit.kind.as_str())
            .bind(unit.name.as_deref())
            .bind(unit.enclosing_class.as_deref())
            .bind(&unit.source_text)
            .bind(unit.summary_text.as_deref())
            .bind(input)
            .bind(output)
            .bind(unit.embedding.as_deref().map(vec_to_blob))
            .bind(snapshot.embedding_model.as_deref())
            .execute(&mut *tx)
            .await?;
    }

    for (filepath, checksum) in &snapshot.incomplete_files {
        sqlx::query(INSERT_INCOMPLETE)
            .bind(filepath)
            .bind(checksum)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
