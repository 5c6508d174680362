use {
    crate::warp_util::HttpError,
    anyhow::Result,
    classroom_shared::{self as shared, filter, NewTag, Tag, TagPatch},
    futures::TryStreamExt,
    rand::seq::SliceRandom,
    sqlx::{sqlite::SqliteRow, Row, SqliteConnection},
    tracing::info,
};

pub(crate) fn tag(row: &SqliteRow) -> Result<Tag> {
    Ok(Tag {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        created_at: crate::parse_datetime(row.try_get("created_at")?)?,
    })
}

fn default_color() -> &'static str {
    shared::DEFAULT_COLORS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(shared::DEFAULT_COLORS[0])
}

fn check_name(name: &str) -> Result<&str> {
    let name = name.trim();

    if name.is_empty() {
        Err(HttpError::bad_request("tag name must not be empty").into())
    } else {
        Ok(name)
    }
}

fn check_color(color: &str) -> Result<()> {
    if shared::is_valid_color(color) {
        Ok(())
    } else {
        Err(HttpError::bad_request(format!("invalid color: {color}")).into())
    }
}

pub async fn list(conn: &mut SqliteConnection) -> Result<Vec<Tag>> {
    let mut rows =
        sqlx::query("SELECT id, name, color, created_at FROM tags ORDER BY name_key, id").fetch(conn);

    let mut tags = Vec::new();

    while let Some(row) = rows.try_next().await? {
        tags.push(tag(&row)?);
    }

    Ok(tags)
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<Tag>> {
    sqlx::query("SELECT id, name, color, created_at FROM tags WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| tag(&row))
        .transpose()
}

async fn insert(conn: &mut SqliteConnection, name: &str, color: &str) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO tags (name, name_key, color, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(name)
    .bind(filter::tag_key(name))
    .bind(color)
    .bind(crate::now())
    .execute(&mut *conn)
    .await
    .map_err(|e| crate::conflict_on_duplicate(e, "a tag with that name already exists"))?
    .last_insert_rowid();

    info!(id, name, color, "created tag");

    Ok(id)
}

pub async fn create(conn: &mut SqliteConnection, new: &NewTag) -> Result<Tag> {
    let name = check_name(&new.name)?;

    let color = if let Some(color) = &new.color {
        check_color(color)?;
        color.as_str()
    } else {
        default_color()
    };

    let id = insert(conn, name, color).await?;

    get(conn, id)
        .await?
        .ok_or_else(|| HttpError::not_found("tag not found").into())
}

/// Return the id of the tag named `name` (compared by [filter::tag_key]), creating it with a default color if
/// necessary.
///
/// The second element of the result is true iff the tag was created by this call.
pub async fn find_or_create(conn: &mut SqliteConnection, name: &str) -> Result<(i64, bool)> {
    let name = check_name(name)?;

    if let Some(row) = sqlx::query("SELECT id FROM tags WHERE name_key = ?1")
        .bind(filter::tag_key(name))
        .fetch_optional(&mut *conn)
        .await?
    {
        Ok((row.try_get(0)?, false))
    } else {
        Ok((insert(conn, name, default_color()).await?, true))
    }
}

pub async fn update(conn: &mut SqliteConnection, id: i64, patch: &TagPatch) -> Result<Tag> {
    if get(conn, id).await?.is_none() {
        return Err(HttpError::not_found("tag not found").into());
    }

    if let Some(name) = &patch.name {
        let name = check_name(name)?;

        sqlx::query("UPDATE tags SET name = ?1, name_key = ?2 WHERE id = ?3")
            .bind(name)
            .bind(filter::tag_key(name))
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| crate::conflict_on_duplicate(e, "a tag with that name already exists"))?;
    }

    if let Some(color) = &patch.color {
        check_color(color)?;

        sqlx::query("UPDATE tags SET color = ?1 WHERE id = ?2")
            .bind(color)
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }

    get(conn, id)
        .await?
        .ok_or_else(|| HttpError::not_found("tag not found").into())
}

/// Delete the specified tag.  Link rows referring to it are left in place and ignored on read.
pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let deleted = sqlx::query("DELETE FROM tags WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected()
        > 0;

    if deleted {
        info!(id, "deleted tag");
    }

    Ok(deleted)
}

/// Attach a tag to a snippet, failing with 409 Conflict if it is already attached.
pub async fn assign(conn: &mut SqliteConnection, tag_id: i64, snippet_id: i64) -> Result<()> {
    if get(conn, tag_id).await?.is_none() {
        return Err(HttpError::not_found("tag not found").into());
    }

    if sqlx::query("SELECT 1 FROM code_snippets WHERE id = ?1")
        .bind(snippet_id)
        .fetch_optional(&mut *conn)
        .await?
        .is_none()
    {
        return Err(HttpError::not_found("snippet not found").into());
    }

    link(conn, tag_id, snippet_id).await
}

/// Insert a link row without checking that either side exists.
pub(crate) async fn link(conn: &mut SqliteConnection, tag_id: i64, snippet_id: i64) -> Result<()> {
    sqlx::query("INSERT INTO code_snippets_tags (tag_id, code_snippet_id) VALUES (?1, ?2)")
        .bind(tag_id)
        .bind(snippet_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            crate::conflict_on_duplicate(e, "tag is already assigned to that snippet")
        })?;

    info!(tag_id, snippet_id, "assigned tag");

    Ok(())
}

/// Detach a tag from a snippet.  Removing a link which does not exist is not an error.
pub async fn remove(conn: &mut SqliteConnection, tag_id: i64, snippet_id: i64) -> Result<()> {
    let removed = sqlx::query(
        "DELETE FROM code_snippets_tags WHERE tag_id = ?1 AND code_snippet_id = ?2",
    )
    .bind(tag_id)
    .bind(snippet_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    info!(tag_id, snippet_id, removed, "removed tag");

    Ok(())
}
