use {
    anyhow::Result,
    classroom_shared::{
        Attachment, ChaptersQuery, Comment, Folder, FolderPatch, GrantType, NewComment, NewFolder,
        NewNote, NewSnippet, NewSubject, NewTag, Note, NotesQuery, Session, Snippet, SnippetPatch,
        SnippetsQuery, Subject, SubjectsQuery, Tag, TagPatch, TokenRequest, TokenSuccess,
        UploadQuery, YearLevel,
    },
    futures::future::{BoxFuture, FutureExt},
    log::{info, warn},
    reqwest::{header, Method, RequestBuilder, Response, StatusCode},
    serde::{de::DeserializeOwned, Serialize},
    serde_derive::Deserialize,
    tokio::sync::{watch, RwLock},
};

/// Error reported by a Classroom server, carrying the status and message from its JSON error body
#[derive(Debug, Clone, thiserror::Error)]
#[error("HTTP {status}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// The subset of the server API which the view state in this crate depends on
///
/// [HttpClient] is the real implementation; tests substitute their own.
pub trait Api: Send + Sync {
    fn folders(&self) -> BoxFuture<'_, Result<Vec<Folder>>>;

    fn chapters(&self, year: YearLevel) -> BoxFuture<'_, Result<Vec<Folder>>>;

    fn exercises(&self, chapter: i64) -> BoxFuture<'_, Result<Vec<Folder>>>;

    fn tags(&self) -> BoxFuture<'_, Result<Vec<Tag>>>;

    fn snippets(&self, query: SnippetsQuery) -> BoxFuture<'_, Result<Vec<Snippet>>>;

    fn create_snippet(&self, new: NewSnippet) -> BoxFuture<'_, Result<Snippet>>;

    fn upload_attachment(
        &self,
        note_id: i64,
        file_name: String,
        content_type: Option<String>,
        body: Vec<u8>,
    ) -> BoxFuture<'_, Result<Attachment>>;
}

fn with_query(path: &str, query: &impl Serialize) -> Result<String> {
    let query = serde_urlencoded::to_string(query)?;

    Ok(if query.is_empty() {
        path.to_owned()
    } else {
        format!("{path}?{query}")
    })
}

/// Client for a Classroom server's HTTP API
///
/// The access token obtained by [HttpClient::log_in] is attached to every subsequent request.  Session changes
/// (log in, log out, and tokens rejected by the server) are published to receivers obtained from
/// [HttpClient::subscribe].
pub struct HttpClient {
    client: reqwest::Client,
    root: String,
    token: RwLock<Option<String>>,
    session: watch::Sender<Option<Session>>,
}

impl HttpClient {
    /// Create a client for the server at `root` (e.g. "https://example.com").
    pub fn new(root: impl Into<String>) -> Self {
        let (session, _) = watch::channel(None);

        Self {
            client: reqwest::Client::new(),
            root: root.into().trim_end_matches('/').to_owned(),
            token: RwLock::new(None),
            session,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.borrow().clone()
    }

    /// Return true iff the current session carries the admin role.
    pub fn is_admin(&self) -> bool {
        self.session
            .borrow()
            .as_ref()
            .map(|session| session.is_admin)
            .unwrap_or(false)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.root, path)
    }

    /// Sign in, then resolve and publish the resulting session.
    pub async fn log_in(&self, username: &str, password: &str) -> Result<Session> {
        let response = self
            .client
            .post(self.url("token"))
            .form(&TokenRequest {
                grant_type: GrantType::Password,
                username: username.to_owned(),
                password: password.to_owned(),
            })
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError {
                status: StatusCode::UNAUTHORIZED,
                message: "invalid user name or password".into(),
            }
            .into());
        }

        let success = response.error_for_status()?.json::<TokenSuccess>().await?;

        *self.token.write().await = Some(success.access_token);

        match self.get::<Session>("session").await {
            Ok(session) => {
                info!("logged in as {} ({})", session.subject, session.role);

                self.session.send_replace(Some(session.clone()));

                Ok(session)
            }

            Err(e) => {
                self.log_out().await;

                Err(e)
            }
        }
    }

    /// Forget the access token and publish the end of the session.
    pub async fn log_out(&self) {
        *self.token.write().await = None;

        if self.session.borrow().is_some() {
            self.session.send_replace(None);

            info!("logged out");
        }
    }

    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, self.url(path));

        if let Some(token) = self.token.read().await.as_deref() {
            request.header(header::AUTHORIZATION, format!("Bearer {token}"))
        } else {
            request
        }
    }

    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            warn!("server rejected our token; logging out");

            self.log_out().await;
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => status.to_string(),
        };

        Err(ApiError { status, message }.into())
    }

    async fn receive<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        Ok(self.check(request.send().await?).await?.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.receive(self.request(Method::GET, path).await).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        self.receive(self.request(method, path).await.json(body))
            .await
    }

    async fn send_empty(&self, method: Method, path: &str) -> Result<()> {
        self.check(self.request(method, path).await.send().await?)
            .await?;

        Ok(())
    }

    pub async fn folders(&self) -> Result<Vec<Folder>> {
        self.get("folders").await
    }

    pub async fn chapters(&self, year_level: YearLevel) -> Result<Vec<Folder>> {
        self.get(&with_query("folders/chapters", &ChaptersQuery { year_level })?)
            .await
    }

    pub async fn exercises(&self, chapter: i64) -> Result<Vec<Folder>> {
        self.get(&format!("folders/{chapter}/exercises")).await
    }

    pub async fn create_folder(&self, new: &NewFolder) -> Result<Folder> {
        self.send_json(Method::POST, "folders", new).await
    }

    pub async fn update_folder(&self, id: i64, patch: &FolderPatch) -> Result<Folder> {
        self.send_json(Method::PATCH, &format!("folders/{id}"), patch)
            .await
    }

    pub async fn delete_folder(&self, id: i64) -> Result<()> {
        self.send_empty(Method::DELETE, &format!("folders/{id}"))
            .await
    }

    pub async fn tags(&self) -> Result<Vec<Tag>> {
        self.get("tags").await
    }

    pub async fn create_tag(&self, new: &NewTag) -> Result<Tag> {
        self.send_json(Method::POST, "tags", new).await
    }

    pub async fn update_tag(&self, id: i64, patch: &TagPatch) -> Result<Tag> {
        self.send_json(Method::PATCH, &format!("tags/{id}"), patch)
            .await
    }

    pub async fn delete_tag(&self, id: i64) -> Result<()> {
        self.send_empty(Method::DELETE, &format!("tags/{id}")).await
    }

    pub async fn snippets(&self, query: &SnippetsQuery) -> Result<Vec<Snippet>> {
        self.get(&with_query("snippets", query)?).await
    }

    pub async fn create_snippet(&self, new: &NewSnippet) -> Result<Snippet> {
        self.send_json(Method::POST, "snippets", new).await
    }

    pub async fn update_snippet(&self, id: i64, patch: &SnippetPatch) -> Result<Snippet> {
        self.send_json(Method::PATCH, &format!("snippets/{id}"), patch)
            .await
    }

    pub async fn delete_snippet(&self, id: i64) -> Result<()> {
        self.send_empty(Method::DELETE, &format!("snippets/{id}"))
            .await
    }

    /// Attach a tag to a snippet.  Fails with a 409 [ApiError] if it is already attached.
    pub async fn assign_tag(&self, snippet: i64, tag: i64) -> Result<()> {
        self.send_empty(Method::PUT, &format!("snippets/{snippet}/tags/{tag}"))
            .await
    }

    pub async fn remove_tag(&self, snippet: i64, tag: i64) -> Result<()> {
        self.send_empty(Method::DELETE, &format!("snippets/{snippet}/tags/{tag}"))
            .await
    }

    pub async fn subjects(&self, parent: Option<i64>) -> Result<Vec<Subject>> {
        self.get(&with_query("subjects", &SubjectsQuery { parent })?)
            .await
    }

    pub async fn subject(&self, id: i64) -> Result<Subject> {
        self.get(&format!("subjects/{id}")).await
    }

    pub async fn create_subject(&self, new: &NewSubject) -> Result<Subject> {
        self.send_json(Method::POST, "subjects", new).await
    }

    pub async fn notes(&self, subject: Option<i64>) -> Result<Vec<Note>> {
        self.get(&with_query("notes", &NotesQuery { subject })?)
            .await
    }

    pub async fn note(&self, id: i64) -> Result<Note> {
        self.get(&format!("notes/{id}")).await
    }

    pub async fn create_note(&self, new: &NewNote) -> Result<Note> {
        self.send_json(Method::POST, "notes", new).await
    }

    pub async fn comments(&self, note: i64) -> Result<Vec<Comment>> {
        self.get(&format!("notes/{note}/comments")).await
    }

    pub async fn add_comment(&self, note: i64, new: &NewComment) -> Result<Comment> {
        self.send_json(Method::POST, &format!("notes/{note}/comments"), new)
            .await
    }

    pub async fn upload_attachment(
        &self,
        note: i64,
        file_name: &str,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> Result<Attachment> {
        let path = with_query(
            &format!("notes/{note}/attachments"),
            &UploadQuery {
                file_name: file_name.to_owned(),
            },
        )?;

        let mut request = self.request(Method::POST, &path).await.body(body);

        if let Some(content_type) = content_type {
            request = request.header(header::CONTENT_TYPE, content_type);
        }

        self.receive(request).await
    }
}

impl Api for HttpClient {
    fn folders(&self) -> BoxFuture<'_, Result<Vec<Folder>>> {
        HttpClient::folders(self).boxed()
    }

    fn chapters(&self, year: YearLevel) -> BoxFuture<'_, Result<Vec<Folder>>> {
        HttpClient::chapters(self, year).boxed()
    }

    fn exercises(&self, chapter: i64) -> BoxFuture<'_, Result<Vec<Folder>>> {
        HttpClient::exercises(self, chapter).boxed()
    }

    fn tags(&self) -> BoxFuture<'_, Result<Vec<Tag>>> {
        HttpClient::tags(self).boxed()
    }

    fn snippets(&self, query: SnippetsQuery) -> BoxFuture<'_, Result<Vec<Snippet>>> {
        async move { HttpClient::snippets(self, &query).await }.boxed()
    }

    fn create_snippet(&self, new: NewSnippet) -> BoxFuture<'_, Result<Snippet>> {
        async move { HttpClient::create_snippet(self, &new).await }.boxed()
    }

    fn upload_attachment(
        &self,
        note_id: i64,
        file_name: String,
        content_type: Option<String>,
        body: Vec<u8>,
    ) -> BoxFuture<'_, Result<Attachment>> {
        async move {
            HttpClient::upload_attachment(self, note_id, &file_name, content_type.as_deref(), body)
                .await
        }
        .boxed()
    }
}
