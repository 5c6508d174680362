//! Storage for files attached to notes

use {
    crate::{notes, warp_util::HttpError},
    anyhow::Result,
    bytes::Bytes,
    classroom_shared::{
        attachments::{self as limits, SelectionError},
        Attachment, Authorization,
    },
    futures::TryStreamExt,
    mime::Mime,
    sqlx::{sqlite::SqliteRow, Row, SqliteConnection},
    std::{
        convert::TryFrom,
        io::ErrorKind,
        path::{Path, PathBuf},
    },
    tokio::{
        fs::{self, OpenOptions},
        io::{AsyncWrite, AsyncWriteExt},
    },
    tracing::{info, warn},
};

const COLUMNS: &str = "id, note_id, file_name, file_type, file_url, file_size, created_by, created_at";

fn attachment(row: &SqliteRow) -> Result<Attachment> {
    Ok(Attachment {
        id: row.try_get("id")?,
        note_id: row.try_get("note_id")?,
        file_name: row.try_get("file_name")?,
        file_type: row.try_get("file_type")?,
        file_url: row.try_get("file_url")?,
        file_size: u64::try_from(row.try_get::<i64, _>("file_size")?)?,
        created_by: row.try_get("created_by")?,
        created_at: crate::parse_datetime(row.try_get("created_at")?)?,
    })
}

/// Retrieve the attachments of the specified notes, ordered by upload time.
pub async fn for_notes(conn: &mut SqliteConnection, note_ids: &[i64]) -> Result<Vec<Attachment>> {
    if note_ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {COLUMNS} FROM attachments WHERE note_id IN ({}) ORDER BY created_at, id",
        vec!["?"; note_ids.len()].join(", ")
    );

    let mut select = sqlx::query(&sql);

    for &id in note_ids {
        select = select.bind(id);
    }

    let mut rows = select.fetch(&mut *conn);
    let mut attachments = Vec::new();

    while let Some(row) = rows.try_next().await? {
        attachments.push(attachment(&row)?);
    }

    Ok(attachments)
}

async fn count(conn: &mut SqliteConnection, note_id: i64) -> Result<usize> {
    Ok(usize::try_from(
        sqlx::query("SELECT count(*) FROM attachments WHERE note_id = ?1")
            .bind(note_id)
            .fetch_one(&mut *conn)
            .await?
            .try_get::<i64, _>(0)?,
    )?)
}

/// Pick the extension for a stored file: whatever follows the last '.' in the original name, or the whole
/// name if it has no '.'.
fn extension(file_name: &str) -> String {
    let extension = file_name.rsplit('.').next().unwrap_or(file_name);

    let extension = extension
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();

    if extension.is_empty() {
        "bin".into()
    } else {
        extension
    }
}

/// Write `body` to the freshly created file at `path`, removing the file again if the write fails.
async fn fill(mut file: impl AsyncWrite + Unpin, path: &Path, body: &[u8]) -> Result<()> {
    let written = match file.write_all(body).await {
        Ok(()) => file.flush().await,
        Err(e) => Err(e),
    };

    if let Err(e) = written {
        drop(file);

        if let Err(remove_error) = fs::remove_file(path).await {
            warn!(path = %path.display(), "unable to remove partially written file: {remove_error:?}");
        }

        return Err(e.into());
    }

    Ok(())
}

/// Write `body` to a new file named `{unix_millis}.{extension}` in `directory`, returning the file name.
async fn store(directory: &Path, extension: &str, body: &[u8]) -> Result<String> {
    fs::create_dir_all(directory).await?;

    let mut millis = chrono::Utc::now().timestamp_millis();

    loop {
        let name = format!("{millis}.{extension}");
        let path = directory.join(&name);

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => {
                fill(file, &path, body).await?;

                break Ok(name);
            }

            // Another upload to the same note landed in the same millisecond.
            Err(e) if e.kind() == ErrorKind::AlreadyExists => millis += 1,

            Err(e) => break Err(e.into()),
        }
    }
}

/// Store an uploaded file and record it as an attachment of the specified note.
#[allow(clippy::too_many_arguments)]
pub async fn upload(
    conn: &mut SqliteConnection,
    storage_directory: &str,
    public_url: &str,
    auth: &Authorization,
    note_id: i64,
    file_name: &str,
    content_type: Option<Mime>,
    body: Bytes,
) -> Result<Attachment> {
    let file_name = file_name.trim();

    if file_name.is_empty() {
        return Err(HttpError::bad_request("file name must not be empty").into());
    }

    notes::expect_note(conn, note_id).await?;

    limits::check_selection(count(conn, note_id).await?, &[body.len() as u64]).map_err(|e| {
        match e {
            SelectionError::TooMany => HttpError::bad_request(e.to_string()),
            SelectionError::TooLarge { .. } => HttpError::payload_too_large(e.to_string()),
        }
    })?;

    let directory = PathBuf::from(storage_directory).join(note_id.to_string());

    let stored = store(&directory, &extension(file_name), &body).await?;

    let file_url = format!(
        "{}/attachments/{note_id}/{stored}",
        public_url.trim_end_matches('/')
    );

    let file_type = content_type
        .unwrap_or(mime::APPLICATION_OCTET_STREAM)
        .to_string();

    let result = sqlx::query(
        "INSERT INTO attachments \
         (note_id, file_name, file_type, file_url, file_size, created_by, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(note_id)
    .bind(file_name)
    .bind(file_type.as_str())
    .bind(file_url.as_str())
    .bind(i64::try_from(body.len())?)
    .bind(auth.subject.as_str())
    .bind(crate::now())
    .execute(&mut *conn)
    .await;

    let id = match result {
        Ok(result) => result.last_insert_rowid(),

        Err(e) => {
            if let Err(e) = fs::remove_file(directory.join(&stored)).await {
                warn!("unable to remove {stored} after failed insert: {:?}", e);
            }

            return Err(e.into());
        }
    };

    info!(id, note_id, file_name, size = body.len(), "stored attachment");

    sqlx::query(&format!("SELECT {COLUMNS} FROM attachments WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| attachment(&row))
        .transpose()?
        .ok_or_else(|| HttpError::not_found("attachment not found").into())
}
