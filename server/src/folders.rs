//! Storage for the folders table, i.e. chapters and the exercises nested under them.

use {
    crate::warp_util::HttpError,
    anyhow::Result,
    classroom_shared::{Authorization, Folder, FolderKind, FolderPatch, NewFolder, YearLevel},
    futures::TryStreamExt,
    sqlx::{sqlite::SqliteRow, Row, SqliteConnection},
    tracing::info,
};

const COLUMNS: &str = "id, name, year_level, is_chapter, is_exercise, parent_id, created_at";

fn folder(row: &SqliteRow) -> Result<Folder> {
    Ok(Folder {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        year_level: row
            .try_get::<Option<&str>, _>("year_level")?
            .map(str::parse::<YearLevel>)
            .transpose()?,
        is_chapter: row.try_get("is_chapter")?,
        is_exercise: row.try_get("is_exercise")?,
        parent_id: row.try_get("parent_id")?,
        created_at: crate::parse_datetime(row.try_get("created_at")?)?,
    })
}

async fn select(
    conn: &mut SqliteConnection,
    clause: &str,
    bind: Option<&str>,
    id: Option<i64>,
) -> Result<Vec<Folder>> {
    let sql = format!("SELECT {COLUMNS} FROM folders {clause} ORDER BY name, id");

    let mut select = sqlx::query(&sql);

    if let Some(bind) = bind {
        select = select.bind(bind);
    }

    if let Some(id) = id {
        select = select.bind(id);
    }

    let mut rows = select.fetch(&mut *conn);
    let mut folders = Vec::new();

    while let Some(row) = rows.try_next().await? {
        folders.push(folder(&row)?);
    }

    Ok(folders)
}

/// Return every folder, ordered by name.
pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<Folder>> {
    select(conn, "", None, None).await
}

/// Return the chapters of the specified year, ordered by name.
pub async fn chapters(conn: &mut SqliteConnection, year: YearLevel) -> Result<Vec<Folder>> {
    select(
        conn,
        "WHERE year_level = ?1 AND is_chapter AND NOT is_exercise AND parent_id IS NULL",
        Some(year.as_str()),
        None,
    )
    .await
}

/// Return the exercises nested under the specified chapter, ordered by name.
pub async fn exercises(conn: &mut SqliteConnection, chapter: i64) -> Result<Vec<Folder>> {
    select(
        conn,
        "WHERE parent_id = ?1 AND is_exercise AND NOT is_chapter",
        None,
        Some(chapter),
    )
    .await
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<Folder>> {
    sqlx::query(&format!("SELECT {COLUMNS} FROM folders WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| folder(&row))
        .transpose()
}

/// Look up the folder with the specified id, failing with 400 Bad Request unless it exists and is of the
/// specified `kind`.
pub async fn expect_kind(conn: &mut SqliteConnection, id: i64, kind: FolderKind) -> Result<Folder> {
    match get(conn, id).await? {
        Some(folder) if folder.kind() == Some(kind) => Ok(folder),

        _ => Err(HttpError::bad_request(format!(
            "folder {id} is not an existing {}",
            match kind {
                FolderKind::Chapter => "chapter",
                FolderKind::Exercise => "exercise",
            }
        ))
        .into()),
    }
}

/// Insert a folder row without validating anything beyond what the schema enforces, returning its id.
pub async fn insert(
    conn: &mut SqliteConnection,
    name: &str,
    year_level: Option<YearLevel>,
    kind: FolderKind,
    parent_id: Option<i64>,
    user: &str,
) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO folders (name, year_level, is_chapter, is_exercise, parent_id, user_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(name.trim())
    .bind(year_level.map(YearLevel::as_str))
    .bind(kind == FolderKind::Chapter)
    .bind(kind == FolderKind::Exercise)
    .bind(parent_id)
    .bind(user)
    .bind(crate::now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(id, name = name.trim(), ?kind, ?parent_id, "created folder");

    Ok(id)
}

pub async fn create(
    conn: &mut SqliteConnection,
    auth: &Authorization,
    new: &NewFolder,
) -> Result<Folder> {
    if new.name.trim().is_empty() {
        return Err(HttpError::bad_request("folder name must not be empty").into());
    }

    match (new.kind, new.parent_id) {
        (FolderKind::Chapter, Some(_)) => {
            return Err(HttpError::bad_request("a chapter may not have a parent").into())
        }

        (FolderKind::Exercise, None) => {
            return Err(HttpError::bad_request("an exercise requires a parent chapter").into())
        }

        (FolderKind::Exercise, Some(parent)) => {
            expect_kind(conn, parent, FolderKind::Chapter).await?;
        }

        (FolderKind::Chapter, None) => (),
    }

    let id = insert(
        conn,
        &new.name,
        new.year_level,
        new.kind,
        new.parent_id,
        &auth.subject,
    )
    .await?;

    get(conn, id)
        .await?
        .ok_or_else(|| HttpError::not_found("folder not found").into())
}

pub async fn update(conn: &mut SqliteConnection, id: i64, patch: &FolderPatch) -> Result<Folder> {
    if let Some(name) = &patch.name {
        if name.trim().is_empty() {
            return Err(HttpError::bad_request("folder name must not be empty").into());
        }

        sqlx::query("UPDATE folders SET name = ?1 WHERE id = ?2")
            .bind(name.trim())
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }

    get(conn, id)
        .await?
        .ok_or_else(|| HttpError::not_found("folder not found").into())
}

/// Delete the specified folder row (and only that row), returning false if it did not exist.
pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let deleted = sqlx::query("DELETE FROM folders WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected()
        > 0;

    if deleted {
        info!(id, "deleted folder");
    }

    Ok(deleted)
}
