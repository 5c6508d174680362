use {
    crate::{folders, tags, warp_util::HttpError},
    anyhow::Result,
    classroom_shared::{
        filter, Authorization, FolderChoice, FolderKind, FolderPath, FolderRef, Language,
        NewSnippet, Snippet, SnippetPatch, SnippetsQuery,
    },
    futures::TryStreamExt,
    sqlx::{
        query::Query,
        sqlite::{SqliteArguments, SqliteRow},
        Row, Sqlite, SqliteConnection,
    },
    std::{
        collections::{HashMap, HashSet},
        fmt::Write,
    },
    tracing::{info, warn},
};

const SELECT: &str = "SELECT s.id, s.title, s.description, s.language, s.code_content, s.folder_id, \
                      s.created_at, s.is_important, s.exam_notes, \
                      f.name AS folder_name, p.id AS parent_id, p.name AS parent_name \
                      FROM code_snippets s \
                      LEFT JOIN folders f ON f.id = s.folder_id \
                      LEFT JOIN folders p ON p.id = f.parent_id";

const SELECT_TAGS: &str = "SELECT l.code_snippet_id AS snippet_id, t.id, t.name, t.color, t.created_at \
                           FROM code_snippets_tags l \
                           INNER JOIN tags t ON t.id = l.tag_id";

/// Conditions on the code_snippets table, applied identically to the snippet and tag queries
#[derive(Default)]
struct Conditions {
    id: Option<i64>,
    folder: Option<i64>,
    language: Option<Language>,
}

impl Conditions {
    fn clause(&self) -> String {
        let mut conditions = Vec::new();

        if self.id.is_some() {
            conditions.push("s.id = ?");
        }

        if self.folder.is_some() {
            conditions.push("s.folder_id = ?");
        }

        if self.language.is_some() {
            conditions.push("s.language = ?");
        }

        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }

    fn bind<'a>(
        &self,
        mut query: Query<'a, Sqlite, SqliteArguments<'a>>,
    ) -> Query<'a, Sqlite, SqliteArguments<'a>> {
        if let Some(id) = self.id {
            query = query.bind(id);
        }

        if let Some(folder) = self.folder {
            query = query.bind(folder);
        }

        if let Some(language) = self.language {
            query = query.bind(language.value());
        }

        query
    }
}

fn snippet(row: &SqliteRow) -> Result<Snippet> {
    let folder_id = row.try_get::<Option<i64>, _>("folder_id")?;

    let folder = match (folder_id, row.try_get::<Option<String>, _>("folder_name")?) {
        (Some(id), Some(name)) => Some(FolderPath {
            id,
            name,
            parent: match (
                row.try_get::<Option<i64>, _>("parent_id")?,
                row.try_get::<Option<String>, _>("parent_name")?,
            ) {
                (Some(id), Some(name)) => Some(FolderRef { id, name }),
                _ => None,
            },
        }),

        // Either the snippet is unfiled or its folder has been deleted.
        _ => None,
    };

    Ok(Snippet {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        language: row.try_get::<&str, _>("language")?.parse()?,
        code_content: row.try_get("code_content")?,
        folder_id,
        folder,
        created_at: crate::parse_datetime(row.try_get("created_at")?)?,
        is_important: row.try_get("is_important")?,
        exam_notes: row.try_get("exam_notes")?,
        tags: Vec::new(),
    })
}

async fn select(conn: &mut SqliteConnection, conditions: &Conditions) -> Result<Vec<Snippet>> {
    let clause = conditions.clause();

    let mut snippets = Vec::new();
    let mut indexes = HashMap::new();

    {
        let sql = format!("{SELECT}{clause}");

        let mut rows = conditions.bind(sqlx::query(&sql)).fetch(&mut *conn);

        while let Some(row) = rows.try_next().await? {
            let snippet = snippet(&row)?;

            indexes.insert(snippet.id, snippets.len());
            snippets.push(snippet);
        }
    }

    if snippets.is_empty() {
        return Ok(snippets);
    }

    // Resolve tags for all the snippets found above in a single query.  The inner join drops links to tags
    // which no longer exist.

    let mut sql = SELECT_TAGS.to_owned();

    write!(
        sql,
        " WHERE l.code_snippet_id IN (SELECT s.id FROM code_snippets s{clause}) ORDER BY t.name_key, t.id"
    )?;

    let mut rows = conditions.bind(sqlx::query(&sql)).fetch(&mut *conn);

    while let Some(row) = rows.try_next().await? {
        if let Some(&index) = indexes.get(&row.try_get::<i64, _>("snippet_id")?) {
            snippets[index].tags.push(tags::tag(&row)?);
        }
    }

    Ok(snippets)
}

/// Find the snippets matching `query`, in storage order.
///
/// The folder and language conditions are applied in SQL, and the tag condition (case-insensitive) is applied
/// to the resolved tags afterward.
pub async fn snippets(conn: &mut SqliteConnection, query: &SnippetsQuery) -> Result<Vec<Snippet>> {
    let snippets = select(
        conn,
        &Conditions {
            id: None,
            folder: query.folder,
            language: query.language,
        },
    )
    .await?;

    Ok(filter::refine(snippets, query.tag.as_deref()))
}

pub async fn get(conn: &mut SqliteConnection, id: i64) -> Result<Option<Snippet>> {
    Ok(select(
        conn,
        &Conditions {
            id: Some(id),
            ..Conditions::default()
        },
    )
    .await?
    .into_iter()
    .next())
}

/// Rows written so far while creating a snippet, in creation order
#[derive(Default)]
struct Created {
    folders: Vec<i64>,
    snippet: Option<i64>,
}

impl Created {
    /// Delete the rows recorded here: the snippet and its links first, then the folders, newest first.
    ///
    /// Failures are logged rather than returned so they can't mask whatever error prompted the cleanup.
    async fn undo(self, conn: &mut SqliteConnection) {
        if let Some(id) = self.snippet {
            if let Err(e) = delete(conn, id).await {
                warn!(id, "unable to remove snippet during cleanup: {:?}", e);
            }
        }

        for &id in self.folders.iter().rev() {
            if let Err(e) = folders::delete(conn, id).await {
                warn!(id, "unable to remove folder during cleanup: {:?}", e);
            }
        }
    }
}

async fn insert(
    conn: &mut SqliteConnection,
    auth: &Authorization,
    new: &NewSnippet,
    created: &mut Created,
) -> Result<i64> {
    let chapter = match &new.chapter {
        Some(FolderChoice::New(name)) => {
            let id = folders::insert(
                conn,
                name,
                Some(new.year_level),
                FolderKind::Chapter,
                None,
                &auth.subject,
            )
            .await?;

            created.folders.push(id);

            Some(id)
        }

        Some(FolderChoice::Existing(id)) => {
            Some(folders::expect_kind(conn, *id, FolderKind::Chapter).await?.id)
        }

        None => None,
    };

    let exercise = match &new.exercise {
        Some(FolderChoice::New(name)) => {
            let chapter = chapter
                .ok_or_else(|| HttpError::bad_request("an exercise requires a chapter"))?;

            let id = folders::insert(
                conn,
                name,
                Some(new.year_level),
                FolderKind::Exercise,
                Some(chapter),
                &auth.subject,
            )
            .await?;

            created.folders.push(id);

            Some(id)
        }

        Some(FolderChoice::Existing(id)) => {
            let exercise = folders::expect_kind(conn, *id, FolderKind::Exercise).await?;

            if chapter.is_some() && exercise.parent_id != chapter {
                return Err(HttpError::bad_request(format!(
                    "exercise {id} does not belong to the selected chapter"
                ))
                .into());
            }

            Some(exercise.id)
        }

        None => None,
    };

    let id = sqlx::query(
        "INSERT INTO code_snippets \
         (title, description, language, code_content, folder_id, user_id, created_at, is_important, exam_notes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(new.title.trim())
    .bind(new.description.as_deref())
    .bind(new.language.value())
    .bind(new.code_content.as_str())
    .bind(exercise.or(chapter))
    .bind(auth.subject.as_str())
    .bind(crate::now())
    .bind(new.is_important)
    .bind(new.exam_notes.as_deref())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    created.snippet = Some(id);

    info!(id, title = new.title.trim(), folder_id = ?exercise.or(chapter), "created snippet");

    let mut linked = HashSet::new();

    for name in &new.tags {
        let (tag_id, fresh) = tags::find_or_create(conn, name).await?;

        if fresh {
            info!(tag_id, name = name.trim(), "created tag for new snippet");
        }

        if linked.insert(tag_id) {
            tags::link(conn, tag_id, id).await?;
        }
    }

    Ok(id)
}

/// Create a snippet, creating its chapter and/or exercise first if they're new.
///
/// The individual writes are not wrapped in a transaction.  Instead, if any step fails, the rows created by
/// the earlier steps (except tags) are deleted again before the error is returned.
pub async fn create(
    conn: &mut SqliteConnection,
    auth: &Authorization,
    new: &NewSnippet,
) -> Result<Snippet> {
    new.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let mut created = Created::default();

    match insert(conn, auth, new, &mut created).await {
        Ok(id) => get(conn, id)
            .await?
            .ok_or_else(|| HttpError::not_found("snippet not found").into()),

        Err(e) => {
            created.undo(conn).await;

            Err(e)
        }
    }
}

pub async fn update(conn: &mut SqliteConnection, id: i64, patch: &SnippetPatch) -> Result<Snippet> {
    if get(conn, id).await?.is_none() {
        return Err(HttpError::not_found("snippet not found").into());
    }

    if matches!(&patch.title, Some(title) if title.trim().is_empty()) {
        return Err(HttpError::bad_request("title is required").into());
    }

    if matches!(&patch.code_content, Some(code) if code.trim().is_empty()) {
        return Err(HttpError::bad_request("code content is required").into());
    }

    if let Some(Some(folder_id)) = patch.folder_id {
        if folders::get(conn, folder_id).await?.is_none() {
            return Err(HttpError::bad_request(format!("folder {folder_id} does not exist")).into());
        }
    }

    let mut assignments = Vec::new();

    if patch.title.is_some() {
        assignments.push("title = ?");
    }

    if patch.description.is_some() {
        assignments.push("description = ?");
    }

    if patch.language.is_some() {
        assignments.push("language = ?");
    }

    if patch.code_content.is_some() {
        assignments.push("code_content = ?");
    }

    if patch.folder_id.is_some() {
        assignments.push("folder_id = ?");
    }

    if patch.is_important.is_some() {
        assignments.push("is_important = ?");
    }

    if patch.exam_notes.is_some() {
        assignments.push("exam_notes = ?");
    }

    if !assignments.is_empty() {
        let sql = format!(
            "UPDATE code_snippets SET {} WHERE id = ?",
            assignments.join(", ")
        );

        let mut update = sqlx::query(&sql);

        if let Some(title) = &patch.title {
            update = update.bind(title.trim());
        }

        if let Some(description) = &patch.description {
            update = update.bind(description.as_deref());
        }

        if let Some(language) = patch.language {
            update = update.bind(language.value());
        }

        if let Some(code) = &patch.code_content {
            update = update.bind(code.as_str());
        }

        if let Some(folder_id) = patch.folder_id {
            update = update.bind(folder_id);
        }

        if let Some(is_important) = patch.is_important {
            update = update.bind(is_important);
        }

        if let Some(exam_notes) = &patch.exam_notes {
            update = update.bind(exam_notes.as_deref());
        }

        update.bind(id).execute(&mut *conn).await?;

        info!(id, "updated snippet");
    }

    get(conn, id)
        .await?
        .ok_or_else(|| HttpError::not_found("snippet not found").into())
}

/// Delete a snippet along with its link rows, returning false if it did not exist.
pub async fn delete(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    sqlx::query("DELETE FROM code_snippets_tags WHERE code_snippet_id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    let deleted = sqlx::query("DELETE FROM code_snippets WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected()
        > 0;

    if deleted {
        info!(id, "deleted snippet");
    }

    Ok(deleted)
}
