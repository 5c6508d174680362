use {
    crate::{attachments, warp_util::HttpError},
    anyhow::Result,
    classroom_shared::{
        Authorization, Comment, NewComment, NewNote, NewSubject, Note, NotesQuery, Subject,
        SubjectsQuery,
    },
    futures::TryStreamExt,
    sqlx::{sqlite::SqliteRow, Row, SqliteConnection},
    std::collections::HashMap,
    tracing::info,
};

fn subject(row: &SqliteRow) -> Result<Subject> {
    Ok(Subject {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        parent_id: row.try_get("parent_id")?,
        created_at: crate::parse_datetime(row.try_get("created_at")?)?,
    })
}

fn note(row: &SqliteRow) -> Result<Note> {
    Ok(Note {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        subject_id: row.try_get("subject_id")?,
        created_at: crate::parse_datetime(row.try_get("created_at")?)?,
        attachments: Vec::new(),
    })
}

fn comment(row: &SqliteRow) -> Result<Comment> {
    Ok(Comment {
        id: row.try_get("id")?,
        note_id: row.try_get("note_id")?,
        content: row.try_get("content")?,
        created_by: row.try_get("created_by")?,
        created_at: crate::parse_datetime(row.try_get("created_at")?)?,
    })
}

/// List the children of `query.parent`, or the root subjects if it's `None`, ordered by name.
pub async fn subjects(conn: &mut SqliteConnection, query: &SubjectsQuery) -> Result<Vec<Subject>> {
    let mut rows = sqlx::query(
        "SELECT id, name, description, parent_id, created_at FROM subjects \
         WHERE parent_id IS ?1 ORDER BY name, id",
    )
    .bind(query.parent)
    .fetch(conn);

    let mut subjects = Vec::new();

    while let Some(row) = rows.try_next().await? {
        subjects.push(subject(&row)?);
    }

    Ok(subjects)
}

pub async fn get_subject(conn: &mut SqliteConnection, id: i64) -> Result<Option<Subject>> {
    sqlx::query("SELECT id, name, description, parent_id, created_at FROM subjects WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| subject(&row))
        .transpose()
}

pub async fn create_subject(conn: &mut SqliteConnection, new: &NewSubject) -> Result<Subject> {
    let name = new.name.trim();

    if name.is_empty() {
        return Err(HttpError::bad_request("subject name must not be empty").into());
    }

    if let Some(parent) = new.parent_id {
        if get_subject(conn, parent).await?.is_none() {
            return Err(HttpError::bad_request(format!("subject {parent} does not exist")).into());
        }
    }

    let id = sqlx::query(
        "INSERT INTO subjects (name, description, parent_id, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(name)
    .bind(new.description.as_deref())
    .bind(new.parent_id)
    .bind(crate::now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(id, name, "created subject");

    get_subject(conn, id)
        .await?
        .ok_or_else(|| HttpError::not_found("subject not found").into())
}

async fn attach(conn: &mut SqliteConnection, notes: &mut [Note]) -> Result<()> {
    let indexes = notes
        .iter()
        .enumerate()
        .map(|(index, note)| (note.id, index))
        .collect::<HashMap<_, _>>();

    let ids = notes.iter().map(|note| note.id).collect::<Vec<_>>();

    for attachment in attachments::for_notes(conn, &ids).await? {
        if let Some(&index) = indexes.get(&attachment.note_id) {
            notes[index].attachments.push(attachment);
        }
    }

    Ok(())
}

/// List the notes filed under `query.subject` (or the unfiled notes if it's `None`), newest first, each with
/// its attachments.
pub async fn notes(conn: &mut SqliteConnection, query: &NotesQuery) -> Result<Vec<Note>> {
    let mut notes = Vec::new();

    {
        let mut rows = sqlx::query(
            "SELECT id, title, content, subject_id, created_at FROM notes \
             WHERE subject_id IS ?1 ORDER BY created_at DESC, id DESC",
        )
        .bind(query.subject)
        .fetch(&mut *conn);

        while let Some(row) = rows.try_next().await? {
            notes.push(note(&row)?);
        }
    }

    attach(conn, &mut notes).await?;

    Ok(notes)
}

pub async fn get_note(conn: &mut SqliteConnection, id: i64) -> Result<Option<Note>> {
    let note = sqlx::query("SELECT id, title, content, subject_id, created_at FROM notes WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|row| note(&row))
        .transpose()?;

    Ok(if let Some(note) = note {
        let mut notes = [note];

        attach(conn, &mut notes).await?;

        let [note] = notes;

        Some(note)
    } else {
        None
    })
}

pub async fn create_note(conn: &mut SqliteConnection, new: &NewNote) -> Result<Note> {
    let title = new.title.trim();

    if title.is_empty() {
        return Err(HttpError::bad_request("note title must not be empty").into());
    }

    if let Some(subject) = new.subject_id {
        if get_subject(conn, subject).await?.is_none() {
            return Err(HttpError::bad_request(format!("subject {subject} does not exist")).into());
        }
    }

    let id = sqlx::query(
        "INSERT INTO notes (title, content, subject_id, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(title)
    .bind(new.content.as_str())
    .bind(new.subject_id)
    .bind(crate::now())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(id, title, "created note");

    get_note(conn, id)
        .await?
        .ok_or_else(|| HttpError::not_found("note not found").into())
}

/// Fail with 404 Not Found unless the specified note exists.
pub async fn expect_note(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    if sqlx::query("SELECT 1 FROM notes WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some()
    {
        Ok(())
    } else {
        Err(HttpError::not_found("note not found").into())
    }
}

/// List the comments on a note, oldest first.
pub async fn comments(conn: &mut SqliteConnection, note_id: i64) -> Result<Vec<Comment>> {
    expect_note(conn, note_id).await?;

    let mut rows = sqlx::query(
        "SELECT id, note_id, content, created_by, created_at FROM comments \
         WHERE note_id = ?1 ORDER BY created_at, id",
    )
    .bind(note_id)
    .fetch(&mut *conn);

    let mut comments = Vec::new();

    while let Some(row) = rows.try_next().await? {
        comments.push(comment(&row)?);
    }

    Ok(comments)
}

pub async fn add_comment(
    conn: &mut SqliteConnection,
    auth: &Authorization,
    note_id: i64,
    new: &NewComment,
) -> Result<Comment> {
    let content = new.content.trim();

    if content.is_empty() {
        return Err(HttpError::bad_request("comment must not be empty").into());
    }

    expect_note(conn, note_id).await?;

    let created_at = crate::now();

    let id = sqlx::query(
        "INSERT INTO comments (note_id, content, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(note_id)
    .bind(content)
    .bind(auth.subject.as_str())
    .bind(created_at.as_str())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    info!(id, note_id, subject = %auth.subject, "added comment");

    Ok(Comment {
        id,
        note_id,
        content: content.to_owned(),
        created_by: auth.subject.clone(),
        created_at: crate::parse_datetime(&created_at)?,
    })
}
