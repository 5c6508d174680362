#![deny(warnings)]

use {
    crate::warp_util::{Bearer, HttpError},
    anyhow::{anyhow, Error, Result},
    bytes::Bytes,
    chrono::{DateTime, SecondsFormat, Utc},
    classroom_shared::{
        attachments::MAX_ATTACHMENT_BYTES, Authorization, ChaptersQuery, FolderPatch, NewComment,
        NewFolder, NewNote, NewSnippet, NewSubject, NewTag, NotesQuery, SnippetPatch,
        SnippetsQuery, SubjectsQuery, TagPatch, TokenRequest, UploadQuery,
    },
    futures::future::{FutureExt, TryFutureExt},
    http::{
        header,
        response::{self, Response},
    },
    hyper::Body,
    mime::Mime,
    serde::Serialize,
    sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, SqliteConnection},
    std::{
        convert::Infallible,
        net::SocketAddrV4,
        ops::DerefMut,
        panic::{self, AssertUnwindSafe},
        sync::Arc,
        time::Duration,
    },
    structopt::StructOpt,
    tokio::{fs::File as AsyncFile, io::AsyncReadExt, sync::Mutex as AsyncMutex},
    tracing::{info, warn},
    warp::{filters::BoxedFilter, Filter, Rejection, Reply},
};

pub use auth::{add_user, set_role};

mod attachments;
mod auth;
mod folders;
mod notes;
mod snippets;
mod tags;
mod warp_util;

const INVALID_CREDENTIAL_DELAY_SECS: u64 = 5;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "classroom-server",
    about = "Classroom code sharing and notes webapp backend"
)]
pub struct Options {
    /// Address to which to bind
    #[structopt(long)]
    pub address: SocketAddrV4,

    /// SQLite database to create or reuse
    #[structopt(long)]
    pub state_file: String,

    /// Directory in which to store files attached to notes
    #[structopt(long)]
    pub storage_directory: String,

    /// Prefix for links to stored attachments (e.g. "https://example.com"); empty for host-relative links
    #[structopt(long, default_value = "")]
    pub public_url: String,

    /// Directory containing static resources
    #[structopt(long)]
    pub public_directory: String,

    /// File containing TLS certificate to use
    #[structopt(long)]
    pub cert_file: Option<String>,

    /// File containing TLS key to use
    #[structopt(long)]
    pub key_file: Option<String>,

    /// File containing HS256 key for signing and verifying JWTs
    #[structopt(long)]
    pub auth_key_file: Option<String>,

    /// Domain appended to login names which don't contain an '@'
    #[structopt(long, default_value = "demo.com")]
    pub login_domain: String,
}

pub async fn open(state_file: &str) -> Result<SqliteConnection> {
    let mut conn = format!("sqlite://{}", state_file)
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true)
        .connect()
        .await?;

    for statement in schema::DDL_STATEMENTS {
        sqlx::query(statement).execute(&mut conn).await?;
    }

    Ok(conn)
}

/// Current time in the format stored in `created_at` columns
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(error) = error {
        // SQLITE_CONSTRAINT_UNIQUE and SQLITE_CONSTRAINT_PRIMARYKEY
        matches!(error.code().as_deref(), Some("2067") | Some("1555"))
            || error.message().contains("UNIQUE constraint failed")
    } else {
        false
    }
}

/// Map a unique constraint violation to 409 Conflict, passing any other error through unchanged.
fn conflict_on_duplicate(error: sqlx::Error, message: &'static str) -> Error {
    if is_unique_violation(&error) {
        HttpError::conflict(message).into()
    } else {
        error.into()
    }
}

fn response() -> response::Builder {
    Response::builder()
}

fn json_response<T: Serialize>(value: &T) -> Result<Response<Body>> {
    let body = serde_json::to_vec(value)?;

    Ok(response()
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))?)
}

fn empty_response() -> Result<Response<Body>> {
    Ok(response().body(Body::empty())?)
}

fn rejection(auth: &Authorization, action: &str, error: Error) -> Rejection {
    warn!(subject = %auth.subject, "error {}: {:?}", action, error);

    Rejection::from(HttpError::from(error))
}

type Route = BoxedFilter<(Response<Body>,)>;

type Auth = BoxedFilter<(Arc<Authorization>,)>;

fn folder_routes(conn: &Arc<AsyncMutex<SqliteConnection>>, auth: &Auth, admin: &Auth) -> Route {
    let list = warp::get()
        .and(warp::path!("folders"))
        .and(auth.clone())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move { json_response(&folders::list(conn.lock().await.deref_mut()).await?) }
                    .map_err(move |e| rejection(&auth, "listing folders", e))
            }
        });

    let chapters = warp::get()
        .and(warp::path!("folders" / "chapters"))
        .and(auth.clone())
        .and(warp::query::<ChaptersQuery>())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>, query: ChaptersQuery| {
                let conn = conn.clone();

                async move {
                    json_response(
                        &folders::chapters(conn.lock().await.deref_mut(), query.year_level).await?,
                    )
                }
                .map_err(move |e| rejection(&auth, "listing chapters", e))
            }
        });

    let exercises = warp::get()
        .and(warp::path!("folders" / i64 / "exercises"))
        .and(auth.clone())
        .and_then({
            let conn = conn.clone();

            move |chapter: i64, auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move {
                    json_response(&folders::exercises(conn.lock().await.deref_mut(), chapter).await?)
                }
                .map_err(move |e| rejection(&auth, "listing exercises", e))
            }
        });

    let create = warp::post()
        .and(warp::path!("folders"))
        .and(admin.clone())
        .and(warp::body::json::<NewFolder>())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>, new: NewFolder| {
                let conn = conn.clone();

                {
                    let auth = auth.clone();

                    async move {
                        json_response(
                            &folders::create(conn.lock().await.deref_mut(), &auth, &new).await?,
                        )
                    }
                }
                .map_err(move |e| rejection(&auth, "creating folder", e))
            }
        });

    let update = warp::patch()
        .and(warp::path!("folders" / i64))
        .and(admin.clone())
        .and(warp::body::json::<FolderPatch>())
        .and_then({
            let conn = conn.clone();

            move |id: i64, auth: Arc<Authorization>, patch: FolderPatch| {
                let conn = conn.clone();

                async move {
                    json_response(&folders::update(conn.lock().await.deref_mut(), id, &patch).await?)
                }
                .map_err(move |e| rejection(&auth, "updating folder", e))
            }
        });

    let delete = warp::delete()
        .and(warp::path!("folders" / i64))
        .and(admin.clone())
        .and_then({
            let conn = conn.clone();

            move |id: i64, auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move {
                    if folders::delete(conn.lock().await.deref_mut(), id).await? {
                        empty_response()
                    } else {
                        Err(HttpError::not_found("folder not found").into())
                    }
                }
                .map_err(move |e| rejection(&auth, "deleting folder", e))
            }
        });

    list.or(chapters)
        .unify()
        .or(exercises)
        .unify()
        .or(create)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .boxed()
}

fn tag_routes(conn: &Arc<AsyncMutex<SqliteConnection>>, auth: &Auth, admin: &Auth) -> Route {
    let list = warp::get()
        .and(warp::path!("tags"))
        .and(auth.clone())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move { json_response(&tags::list(conn.lock().await.deref_mut()).await?) }
                    .map_err(move |e| rejection(&auth, "listing tags", e))
            }
        });

    let create = warp::post()
        .and(warp::path!("tags"))
        .and(admin.clone())
        .and(warp::body::json::<NewTag>())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>, new: NewTag| {
                let conn = conn.clone();

                async move { json_response(&tags::create(conn.lock().await.deref_mut(), &new).await?) }
                    .map_err(move |e| rejection(&auth, "creating tag", e))
            }
        });

    let update = warp::patch()
        .and(warp::path!("tags" / i64))
        .and(admin.clone())
        .and(warp::body::json::<TagPatch>())
        .and_then({
            let conn = conn.clone();

            move |id: i64, auth: Arc<Authorization>, patch: TagPatch| {
                let conn = conn.clone();

                async move {
                    json_response(&tags::update(conn.lock().await.deref_mut(), id, &patch).await?)
                }
                .map_err(move |e| rejection(&auth, "updating tag", e))
            }
        });

    let delete = warp::delete()
        .and(warp::path!("tags" / i64))
        .and(admin.clone())
        .and_then({
            let conn = conn.clone();

            move |id: i64, auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move {
                    if tags::delete(conn.lock().await.deref_mut(), id).await? {
                        empty_response()
                    } else {
                        Err(HttpError::not_found("tag not found").into())
                    }
                }
                .map_err(move |e| rejection(&auth, "deleting tag", e))
            }
        });

    list.or(create)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .boxed()
}

fn snippet_routes(conn: &Arc<AsyncMutex<SqliteConnection>>, auth: &Auth, admin: &Auth) -> Route {
    let list = warp::get()
        .and(warp::path!("snippets"))
        .and(auth.clone())
        .and(warp::query::<SnippetsQuery>())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>, query: SnippetsQuery| {
                let conn = conn.clone();

                async move {
                    json_response(&snippets::snippets(conn.lock().await.deref_mut(), &query).await?)
                }
                .map_err(move |e| rejection(&auth, "listing snippets", e))
            }
        });

    let create = warp::post()
        .and(warp::path!("snippets"))
        .and(admin.clone())
        .and(warp::body::json::<NewSnippet>())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>, new: NewSnippet| {
                let conn = conn.clone();

                {
                    let auth = auth.clone();

                    async move {
                        json_response(
                            &snippets::create(conn.lock().await.deref_mut(), &auth, &new).await?,
                        )
                    }
                }
                .map_err(move |e| rejection(&auth, "creating snippet", e))
            }
        });

    let update = warp::patch()
        .and(warp::path!("snippets" / i64))
        .and(admin.clone())
        .and(warp::body::json::<SnippetPatch>())
        .and_then({
            let conn = conn.clone();

            move |id: i64, auth: Arc<Authorization>, patch: SnippetPatch| {
                let conn = conn.clone();

                async move {
                    json_response(&snippets::update(conn.lock().await.deref_mut(), id, &patch).await?)
                }
                .map_err(move |e| rejection(&auth, "updating snippet", e))
            }
        });

    let delete = warp::delete()
        .and(warp::path!("snippets" / i64))
        .and(admin.clone())
        .and_then({
            let conn = conn.clone();

            move |id: i64, auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move {
                    if snippets::delete(conn.lock().await.deref_mut(), id).await? {
                        empty_response()
                    } else {
                        Err(HttpError::not_found("snippet not found").into())
                    }
                }
                .map_err(move |e| rejection(&auth, "deleting snippet", e))
            }
        });

    let assign = warp::put()
        .and(warp::path!("snippets" / i64 / "tags" / i64))
        .and(admin.clone())
        .and_then({
            let conn = conn.clone();

            move |snippet: i64, tag: i64, auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move {
                    tags::assign(conn.lock().await.deref_mut(), tag, snippet).await?;

                    empty_response()
                }
                .map_err(move |e| rejection(&auth, "assigning tag", e))
            }
        });

    let remove = warp::delete()
        .and(warp::path!("snippets" / i64 / "tags" / i64))
        .and(admin.clone())
        .and_then({
            let conn = conn.clone();

            move |snippet: i64, tag: i64, auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move {
                    tags::remove(conn.lock().await.deref_mut(), tag, snippet).await?;

                    empty_response()
                }
                .map_err(move |e| rejection(&auth, "removing tag", e))
            }
        });

    list.or(create)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .or(assign)
        .unify()
        .or(remove)
        .unify()
        .boxed()
}

fn note_routes(
    conn: &Arc<AsyncMutex<SqliteConnection>>,
    options: &Arc<Options>,
    auth: &Auth,
    admin: &Auth,
) -> Route {
    let subjects = warp::get()
        .and(warp::path!("subjects"))
        .and(auth.clone())
        .and(warp::query::<SubjectsQuery>())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>, query: SubjectsQuery| {
                let conn = conn.clone();

                async move {
                    json_response(&notes::subjects(conn.lock().await.deref_mut(), &query).await?)
                }
                .map_err(move |e| rejection(&auth, "listing subjects", e))
            }
        });

    let subject = warp::get()
        .and(warp::path!("subjects" / i64))
        .and(auth.clone())
        .and_then({
            let conn = conn.clone();

            move |id: i64, auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move {
                    json_response(
                        &notes::get_subject(conn.lock().await.deref_mut(), id)
                            .await?
                            .ok_or_else(|| HttpError::not_found("subject not found"))?,
                    )
                }
                .map_err(move |e| rejection(&auth, "retrieving subject", e))
            }
        });

    let create_subject = warp::post()
        .and(warp::path!("subjects"))
        .and(admin.clone())
        .and(warp::body::json::<NewSubject>())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>, new: NewSubject| {
                let conn = conn.clone();

                async move {
                    json_response(&notes::create_subject(conn.lock().await.deref_mut(), &new).await?)
                }
                .map_err(move |e| rejection(&auth, "creating subject", e))
            }
        });

    let list = warp::get()
        .and(warp::path!("notes"))
        .and(auth.clone())
        .and(warp::query::<NotesQuery>())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>, query: NotesQuery| {
                let conn = conn.clone();

                async move { json_response(&notes::notes(conn.lock().await.deref_mut(), &query).await?) }
                    .map_err(move |e| rejection(&auth, "listing notes", e))
            }
        });

    let note = warp::get()
        .and(warp::path!("notes" / i64))
        .and(auth.clone())
        .and_then({
            let conn = conn.clone();

            move |id: i64, auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move {
                    json_response(
                        &notes::get_note(conn.lock().await.deref_mut(), id)
                            .await?
                            .ok_or_else(|| HttpError::not_found("note not found"))?,
                    )
                }
                .map_err(move |e| rejection(&auth, "retrieving note", e))
            }
        });

    let create = warp::post()
        .and(warp::path!("notes"))
        .and(admin.clone())
        .and(warp::body::json::<NewNote>())
        .and_then({
            let conn = conn.clone();

            move |auth: Arc<Authorization>, new: NewNote| {
                let conn = conn.clone();

                async move {
                    json_response(&notes::create_note(conn.lock().await.deref_mut(), &new).await?)
                }
                .map_err(move |e| rejection(&auth, "creating note", e))
            }
        });

    let comments = warp::get()
        .and(warp::path!("notes" / i64 / "comments"))
        .and(auth.clone())
        .and_then({
            let conn = conn.clone();

            move |id: i64, auth: Arc<Authorization>| {
                let conn = conn.clone();

                async move { json_response(&notes::comments(conn.lock().await.deref_mut(), id).await?) }
                    .map_err(move |e| rejection(&auth, "listing comments", e))
            }
        });

    let comment = warp::post()
        .and(warp::path!("notes" / i64 / "comments"))
        .and(auth.clone())
        .and(warp::body::json::<NewComment>())
        .and_then({
            let conn = conn.clone();

            move |id: i64, auth: Arc<Authorization>, new: NewComment| {
                let conn = conn.clone();

                {
                    let auth = auth.clone();

                    async move {
                        json_response(
                            &notes::add_comment(conn.lock().await.deref_mut(), &auth, id, &new)
                                .await?,
                        )
                    }
                }
                .map_err(move |e| rejection(&auth, "adding comment", e))
            }
        });

    let upload = warp::post()
        .and(warp::path!("notes" / i64 / "attachments"))
        .and(admin.clone())
        .and(warp::query::<UploadQuery>())
        .and(warp::header::optional::<Mime>("content-type"))
        .and(warp::body::content_length_limit(MAX_ATTACHMENT_BYTES))
        .and(warp::body::bytes())
        .and_then({
            let conn = conn.clone();
            let options = options.clone();

            move |id: i64,
                  auth: Arc<Authorization>,
                  query: UploadQuery,
                  content_type: Option<Mime>,
                  body: Bytes| {
                let conn = conn.clone();
                let options = options.clone();

                {
                    let auth = auth.clone();

                    async move {
                        json_response(
                            &attachments::upload(
                                conn.lock().await.deref_mut(),
                                &options.storage_directory,
                                &options.public_url,
                                &auth,
                                id,
                                &query.file_name,
                                content_type,
                                body,
                            )
                            .await?,
                        )
                    }
                }
                .map_err(move |e| rejection(&auth, "uploading attachment", e))
            }
        });

    subjects
        .or(subject)
        .unify()
        .or(create_subject)
        .unify()
        .or(list)
        .unify()
        .or(note)
        .unify()
        .or(create)
        .unify()
        .or(comments)
        .unify()
        .or(comment)
        .unify()
        .or(upload)
        .unify()
        .boxed()
}

async fn routes(
    conn: &Arc<AsyncMutex<SqliteConnection>>,
    options: &Arc<Options>,
    default_auth_key: [u8; 32],
    invalid_credential_delay: Duration,
) -> Result<impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone> {
    let auth_key = if let Some(auth_key_file) = &options.auth_key_file {
        let mut key = [0u8; 32];

        AsyncFile::open(auth_key_file)
            .await?
            .read_exact(&mut key)
            .await?;

        key
    } else {
        default_auth_key
    };

    let auth_mutex = Arc::new(AsyncMutex::new(()));

    let auth = warp::header::optional::<Bearer>("authorization")
        .and_then(move |authorization: Option<Bearer>| async move {
            if let Some(token) = authorization.as_ref().map(|h| &h.body) {
                Ok(auth::authorize(token, &auth_key)?)
            } else {
                Err(Rejection::from(HttpError::unauthorized("missing token")))
            }
        })
        .boxed();

    let admin = auth
        .clone()
        .and_then(|auth: Arc<Authorization>| async move {
            auth::require_admin(&auth)?;

            Ok::<_, Rejection>(auth)
        })
        .boxed();

    let token = warp::post()
        .and(warp::path!("token"))
        .and(warp::body::form::<TokenRequest>())
        .and_then({
            let conn = conn.clone();
            let options = options.clone();

            move |body| {
                let conn = conn.clone();
                let auth_mutex = auth_mutex.clone();
                let options = options.clone();

                async move {
                    auth::authenticate(
                        &conn,
                        &body,
                        &auth_key,
                        &auth_mutex,
                        invalid_credential_delay,
                        &options.login_domain,
                    )
                    .await
                }
                .map_err(|e| {
                    warn!("error authorizing: {:?}", e);

                    Rejection::from(HttpError::from(e))
                })
            }
        })
        .boxed();

    let session = warp::get()
        .and(warp::path!("session"))
        .and(auth.clone())
        .and_then(|auth: Arc<Authorization>| async move {
            auth::session(&auth).map_err(|e| rejection(&auth, "retrieving session", e))
        })
        .boxed();

    let attachments = warp::get()
        .and(warp::path("attachments"))
        .and(warp::fs::dir(options.storage_directory.clone()))
        .map(|file: warp::fs::File| file.into_response());

    let public = warp::get()
        .and(warp::fs::dir(options.public_directory.clone()))
        .map(|file: warp::fs::File| file.into_response());

    Ok(token
        .or(session)
        .unify()
        .or(folder_routes(conn, &auth, &admin))
        .unify()
        .or(tag_routes(conn, &auth, &admin))
        .unify()
        .or(snippet_routes(conn, &auth, &admin))
        .unify()
        .or(note_routes(conn, options, &auth, &admin))
        .unify()
        .or(attachments)
        .unify()
        .or(public)
        .unify()
        .recover(warp_util::handle_rejection)
        .with(warp::log("classroom")))
}

fn catch_unwind<T>(fun: impl panic::UnwindSafe + FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(fun).map_err(|e| {
        if let Some(s) = e.downcast_ref::<&str>() {
            anyhow!("{}", s)
        } else if let Some(s) = e.downcast_ref::<String>() {
            anyhow!("{}", s)
        } else {
            anyhow!("caught panic")
        }
    })
}

pub async fn serve(
    conn: &Arc<AsyncMutex<SqliteConnection>>,
    options: &Arc<Options>,
    default_auth_key: [u8; 32],
) -> Result<()> {
    let routes = routes(
        conn,
        options,
        default_auth_key,
        Duration::from_secs(INVALID_CREDENTIAL_DELAY_SECS),
    )
    .await?;

    let (address, future) = if let (Some(cert), Some(key)) = (&options.cert_file, &options.key_file)
    {
        let server = warp::serve(routes).tls().cert_path(cert).key_path(key);

        // As of this writing, warp::TlsServer does not have a try_bind_ephemeral method, so we must catch panics
        // explicitly.
        let (address, future) = catch_unwind(AssertUnwindSafe(move || {
            server.bind_ephemeral(options.address)
        }))?;

        (address, future.boxed())
    } else {
        let (address, future) = warp::serve(routes).try_bind_ephemeral(options.address)?;

        (address, future.boxed())
    };

    info!("listening on {}", address);

    future.await;

    Ok(())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        classroom_shared::{
            Attachment, Comment, Folder, FolderChoice, FolderKind, Language, Note, Role, Session,
            Snippet, Subject, Tag, TokenError, TokenSuccess, YearLevel,
        },
        http::status::StatusCode,
        jsonwebtoken::{self, Algorithm, EncodingKey, Header},
        maplit::hashset,
        rand::Rng,
        serde::de::DeserializeOwned,
        sqlx::Row,
        std::{
            collections::HashSet,
            sync::Once,
            time::{SystemTime, UNIX_EPOCH},
        },
        tempfile::TempDir,
    };

    struct TestState<F> {
        conn: Arc<AsyncMutex<SqliteConnection>>,
        routes: F,
        admin: String,
        student: String,
        _storage: TempDir,
    }

    async fn init(
    ) -> Result<TestState<impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone>> {
        {
            static ONCE: Once = Once::new();

            ONCE.call_once(pretty_env_logger::init_timed);
        }

        let mut conn = "sqlite::memory:"
            .parse::<SqliteConnectOptions>()?
            .connect()
            .await?;

        for statement in schema::DDL_STATEMENTS {
            sqlx::query(statement).execute(&mut conn).await?;
        }

        let conn = Arc::new(AsyncMutex::new(conn));

        let storage = TempDir::new()?;

        let mut auth_key = [0u8; 32];
        rand::thread_rng().fill(&mut auth_key);

        let routes = routes(
            &conn,
            &Arc::new(Options {
                address: "0.0.0.0:0".parse()?,
                state_file: "does-not-exist-6f0e3c52-8f4e-4bd6-9a57-0b1f4bb1f8f1".to_string(),
                storage_directory: storage
                    .path()
                    .to_str()
                    .ok_or_else(|| anyhow!("invalid UTF-8"))?
                    .to_owned(),
                public_url: String::new(),
                public_directory: "does-not-exist-6f0e3c52-8f4e-4bd6-9a57-0b1f4bb1f8f1".to_string(),
                cert_file: None,
                key_file: None,
                auth_key_file: None,
                login_domain: "demo.com".to_string(),
            }),
            auth_key,
            Duration::from_secs(0),
        )
        .await?;

        Ok(TestState {
            conn,
            routes,
            admin: make_token(&auth_key, "instructor@demo.com", Role::Admin)?,
            student: make_token(&auth_key, "student@demo.com", Role::Student)?,
            _storage: storage,
        })
    }

    fn make_token(auth_key: &[u8], subject: &str, role: Role) -> Result<String> {
        let expiration = (SystemTime::now() + Duration::from_secs(60 * 60))
            .duration_since(UNIX_EPOCH)?
            .as_secs();

        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &Authorization {
                expiration,
                subject: subject.to_owned(),
                role,
            },
            &EncodingKey::from_secret(auth_key),
        )?)
    }

    async fn get<T: DeserializeOwned>(
        routes: &(impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + 'static),
        token: &str,
        path: &str,
    ) -> Result<T> {
        let response = warp::test::request()
            .method("GET")
            .path(path)
            .header("authorization", format!("Bearer {}", token))
            .reply(routes)
            .await;

        assert_eq!(response.status(), StatusCode::OK, "GET {}", path);

        Ok(serde_json::from_slice(response.body())?)
    }

    async fn send<T: DeserializeOwned>(
        routes: &(impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + 'static),
        token: &str,
        method: &str,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        let response = warp::test::request()
            .method(method)
            .path(path)
            .header("authorization", format!("Bearer {}", token))
            .json(body)
            .reply(routes)
            .await;

        assert_eq!(response.status(), StatusCode::OK, "{} {}", method, path);

        Ok(serde_json::from_slice(response.body())?)
    }

    async fn status(
        routes: &(impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + 'static),
        token: &str,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> StatusCode {
        let request = warp::test::request()
            .method(method)
            .path(path)
            .header("authorization", format!("Bearer {}", token));

        if let Some(body) = body {
            request.json(&body)
        } else {
            request
        }
        .reply(routes)
        .await
        .status()
    }

    async fn upload(
        routes: &(impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + 'static),
        token: &str,
        note: i64,
        file_name: &str,
        body: Vec<u8>,
    ) -> http::Response<Bytes> {
        warp::test::request()
            .method("POST")
            .path(&format!("/notes/{note}/attachments?file_name={file_name}"))
            .header("authorization", format!("Bearer {}", token))
            .header("content-type", "text/plain")
            .body(body)
            .reply(routes)
            .await
    }

    fn new_snippet(
        title: &str,
        language: Language,
        chapter: Option<FolderChoice>,
        exercise: Option<FolderChoice>,
        tags: &[&str],
    ) -> NewSnippet {
        NewSnippet {
            title: title.into(),
            description: None,
            language,
            code_content: format!("// {title}"),
            year_level: YearLevel::Second,
            chapter,
            exercise,
            tags: tags.iter().map(|&tag| tag.to_owned()).collect(),
            is_important: false,
            exam_notes: None,
        }
    }

    fn ids(snippets: &[Snippet]) -> HashSet<i64> {
        snippets.iter().map(|snippet| snippet.id).collect()
    }

    async fn count(conn: &AsyncMutex<SqliteConnection>, table: &str) -> Result<i64> {
        Ok(sqlx::query(&format!("SELECT count(*) FROM {table}"))
            .fetch_one(conn.lock().await.deref_mut())
            .await?
            .try_get(0)?)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn authentication() -> Result<()> {
        let TestState {
            conn,
            routes,
            student,
            ..
        } = init().await?;

        add_user(
            conn.lock().await.deref_mut(),
            "Instructor@demo.com",
            "Bandersnatch",
            Role::Admin,
        )
        .await?;

        // Invalid user and password should yield `UNAUTHORIZED` from /token.

        let response = warp::test::request()
            .method("POST")
            .path("/token")
            .body("grant_type=password&username=invalid+user&password=invalid+password")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        serde_json::from_slice::<TokenError>(response.body())?;

        // Valid user and invalid password should yield `UNAUTHORIZED` from /token.

        let response = warp::test::request()
            .method("POST")
            .path("/token")
            .body("grant_type=password&username=instructor&password=invalid+password")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // A bare user name is qualified with the login domain.

        let response = warp::test::request()
            .method("POST")
            .path("/token")
            .body("grant_type=password&username=instructor&password=Bandersnatch")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::OK);

        let token = serde_json::from_slice::<TokenSuccess>(response.body())?.access_token;

        assert_eq!(
            get::<Session>(&routes, &token, "/session").await?,
            Session {
                subject: "instructor@demo.com".into(),
                role: Role::Admin,
                is_admin: true
            }
        );

        assert!(!get::<Session>(&routes, &student, "/session").await?.is_admin);

        // A role change takes effect on the next sign in.

        assert!(set_role(conn.lock().await.deref_mut(), "instructor@demo.com", Role::Student).await?);

        let response = warp::test::request()
            .method("POST")
            .path("/token")
            .body("grant_type=password&username=instructor%40demo.com&password=Bandersnatch")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::OK);

        let token = serde_json::from_slice::<TokenSuccess>(response.body())?.access_token;

        assert!(!get::<Session>(&routes, &token, "/session").await?.is_admin);

        assert!(!set_role(conn.lock().await.deref_mut(), "nobody@demo.com", Role::Admin).await?);

        // Missing or invalid tokens should yield `UNAUTHORIZED`.

        let response = warp::test::request()
            .method("GET")
            .path("/folders")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(
            status(&routes, "invalid", "GET", "/folders", None).await,
            StatusCode::UNAUTHORIZED
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn folders() -> Result<()> {
        let TestState {
            routes,
            admin,
            student,
            ..
        } = init().await?;

        assert_eq!(
            status(
                &routes,
                &student,
                "POST",
                "/folders",
                Some(serde_json::json!({ "name": "Arrays", "year_level": "2nd Year", "kind": "chapter" }))
            )
            .await,
            StatusCode::FORBIDDEN
        );

        let arrays = send::<Folder>(
            &routes,
            &admin,
            "POST",
            "/folders",
            &NewFolder {
                name: "Arrays".into(),
                year_level: Some(YearLevel::Second),
                kind: FolderKind::Chapter,
                parent_id: None,
            },
        )
        .await?;

        assert_eq!(arrays.kind(), Some(FolderKind::Chapter));

        let loops = send::<Folder>(
            &routes,
            &admin,
            "POST",
            "/folders",
            &NewFolder {
                name: "Loops".into(),
                year_level: Some(YearLevel::Second),
                kind: FolderKind::Chapter,
                parent_id: None,
            },
        )
        .await?;

        // Chapters may not have parents, and exercises need a chapter as their parent.

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/folders",
                Some(serde_json::json!({
                    "name": "Nested", "year_level": "2nd Year", "kind": "chapter", "parent_id": arrays.id
                }))
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/folders",
                Some(serde_json::json!({ "name": "Orphan", "year_level": "2nd Year", "kind": "exercise" }))
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        let exercise = send::<Folder>(
            &routes,
            &admin,
            "POST",
            "/folders",
            &NewFolder {
                name: "Exercise 1".into(),
                year_level: Some(YearLevel::Second),
                kind: FolderKind::Exercise,
                parent_id: Some(arrays.id),
            },
        )
        .await?;

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/folders",
                Some(serde_json::json!({
                    "name": "Nested", "year_level": "2nd Year", "kind": "exercise", "parent_id": exercise.id
                }))
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        // Chapters are scoped by year and ordered by name.

        assert_eq!(
            get::<Vec<Folder>>(&routes, &student, "/folders/chapters?year_level=2nd%20Year")
                .await?
                .into_iter()
                .map(|folder| folder.name)
                .collect::<Vec<_>>(),
            vec!["Arrays", "Loops"]
        );

        assert!(
            get::<Vec<Folder>>(&routes, &student, "/folders/chapters?year_level=3rd%20Year")
                .await?
                .is_empty()
        );

        assert_eq!(
            get::<Vec<Folder>>(&routes, &student, &format!("/folders/{}/exercises", arrays.id))
                .await?,
            vec![exercise.clone()]
        );

        assert!(
            get::<Vec<Folder>>(&routes, &student, &format!("/folders/{}/exercises", loops.id))
                .await?
                .is_empty()
        );

        let renamed = send::<Folder>(
            &routes,
            &admin,
            "PATCH",
            &format!("/folders/{}", loops.id),
            &FolderPatch {
                name: Some("Iteration".into()),
            },
        )
        .await?;

        assert_eq!(renamed.name, "Iteration");
        assert_eq!(renamed.year_level, Some(YearLevel::Second));

        assert_eq!(
            status(&routes, &admin, "DELETE", &format!("/folders/{}", loops.id), None).await,
            StatusCode::OK
        );

        assert_eq!(
            status(&routes, &admin, "DELETE", &format!("/folders/{}", loops.id), None).await,
            StatusCode::NOT_FOUND
        );

        assert_eq!(
            get::<Vec<Folder>>(&routes, &student, "/folders")
                .await?
                .into_iter()
                .map(|folder| folder.id)
                .collect::<HashSet<_>>(),
            hashset![arrays.id, exercise.id]
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn create_snippets() -> Result<()> {
        let TestState {
            conn,
            routes,
            admin,
            student,
            ..
        } = init().await?;

        // A new chapter plus a new exercise yields exactly one of each, with the snippet filed under the
        // exercise.

        let snippet = send::<Snippet>(
            &routes,
            &admin,
            "POST",
            "/snippets",
            &new_snippet(
                "Bubble sort",
                Language::Cpp,
                Some(FolderChoice::New("Arrays".into())),
                Some(FolderChoice::New("Exercise 1".into())),
                &["sorting", "Recursion"],
            ),
        )
        .await?;

        let folders = get::<Vec<Folder>>(&routes, &student, "/folders").await?;

        assert_eq!(folders.len(), 2);

        let chapter = folders
            .iter()
            .find(|folder| folder.kind() == Some(FolderKind::Chapter))
            .ok_or_else(|| anyhow!("missing chapter"))?;

        let exercise = folders
            .iter()
            .find(|folder| folder.kind() == Some(FolderKind::Exercise))
            .ok_or_else(|| anyhow!("missing exercise"))?;

        assert_eq!(chapter.name, "Arrays");
        assert_eq!(chapter.year_level, Some(YearLevel::Second));
        assert_eq!(exercise.parent_id, Some(chapter.id));
        assert_eq!(snippet.folder_id, Some(exercise.id));
        assert_eq!(
            snippet.folder.as_ref().map(ToString::to_string).as_deref(),
            Some("Arrays / Exercise 1")
        );
        assert_eq!(
            snippet
                .tags
                .iter()
                .map(|tag| tag.name.as_str())
                .collect::<HashSet<_>>(),
            hashset!["sorting", "Recursion"]
        );

        // Existing tags are reused by name, case-insensitively, and repeats are ignored.

        let other = send::<Snippet>(
            &routes,
            &admin,
            "POST",
            "/snippets",
            &new_snippet(
                "Linear search",
                Language::Java,
                Some(FolderChoice::Existing(chapter.id)),
                Some(FolderChoice::Existing(exercise.id)),
                &["SORTING", "sorting"],
            ),
        )
        .await?;

        assert_eq!(other.tags.len(), 1);
        assert_eq!(get::<Vec<Tag>>(&routes, &student, "/tags").await?.len(), 2);
        assert_eq!(count(&conn, "folders").await?, 2);

        let loops = send::<Folder>(
            &routes,
            &admin,
            "POST",
            "/folders",
            &NewFolder {
                name: "Loops".into(),
                year_level: Some(YearLevel::Second),
                kind: FolderKind::Chapter,
                parent_id: None,
            },
        )
        .await?;

        // An existing exercise must belong to the selected chapter.

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/snippets",
                Some(serde_json::to_value(new_snippet(
                    "Mismatch",
                    Language::Php,
                    Some(FolderChoice::Existing(loops.id)),
                    Some(FolderChoice::Existing(exercise.id)),
                    &[],
                ))?)
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        // A chapter created for a submission which then fails is removed again.

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/snippets",
                Some(serde_json::to_value(new_snippet(
                    "Nested",
                    Language::Php,
                    Some(FolderChoice::New("Graphs".into())),
                    Some(FolderChoice::Existing(loops.id)),
                    &[],
                ))?)
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        assert_eq!(count(&conn, "folders").await?, 3);

        // Invalid submissions are rejected before anything is written.

        let mut invalid = new_snippet(
            "  ",
            Language::Html,
            Some(FolderChoice::New("Forms".into())),
            None,
            &[],
        );

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/snippets",
                Some(serde_json::to_value(&invalid)?)
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        invalid.title = "Forms".into();
        invalid.chapter = None;
        invalid.exercise = Some(FolderChoice::New("Exercise 1".into()));

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/snippets",
                Some(serde_json::to_value(&invalid)?)
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        assert_eq!(count(&conn, "folders").await?, 3);
        assert_eq!(count(&conn, "code_snippets").await?, 2);

        assert_eq!(
            status(
                &routes,
                &student,
                "POST",
                "/snippets",
                Some(serde_json::to_value(new_snippet(
                    "Nope",
                    Language::Css,
                    None,
                    None,
                    &[]
                ))?)
            )
            .await,
            StatusCode::FORBIDDEN
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn failed_creation_cleans_up() -> Result<()> {
        let TestState {
            conn,
            routes,
            admin,
            ..
        } = init().await?;

        // Make the snippet insert fail after the folders have been created.

        sqlx::query("DROP TABLE code_snippets")
            .execute(conn.lock().await.deref_mut())
            .await?;

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/snippets",
                Some(serde_json::to_value(new_snippet(
                    "Bubble sort",
                    Language::Cpp,
                    Some(FolderChoice::New("Arrays".into())),
                    Some(FolderChoice::New("Exercise 1".into())),
                    &["sorting"],
                ))?)
            )
            .await,
            StatusCode::INTERNAL_SERVER_ERROR
        );

        assert_eq!(count(&conn, "folders").await?, 0);
        assert_eq!(count(&conn, "tags").await?, 0);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn filter_snippets() -> Result<()> {
        let TestState {
            routes,
            admin,
            student,
            ..
        } = init().await?;

        let in_exercise = send::<Snippet>(
            &routes,
            &admin,
            "POST",
            "/snippets",
            &new_snippet(
                "Fibonacci",
                Language::Java,
                Some(FolderChoice::New("Arrays".into())),
                Some(FolderChoice::New("Exercise 1".into())),
                &["recursion"],
            ),
        )
        .await?;

        let exercise = in_exercise
            .folder_id
            .ok_or_else(|| anyhow!("missing exercise"))?;

        let chapter = in_exercise
            .folder
            .as_ref()
            .and_then(|folder| folder.parent.as_ref())
            .map(|parent| parent.id)
            .ok_or_else(|| anyhow!("missing chapter"))?;

        let in_chapter = send::<Snippet>(
            &routes,
            &admin,
            "POST",
            "/snippets",
            &new_snippet(
                "Hello",
                Language::Cpp,
                Some(FolderChoice::Existing(chapter)),
                None,
                &["Java"],
            ),
        )
        .await?;

        let unfiled = send::<Snippet>(
            &routes,
            &admin,
            "POST",
            "/snippets",
            &new_snippet("Page", Language::Html, None, None, &[]),
        )
        .await?;

        assert_eq!(unfiled.folder, None);

        assert_eq!(
            ids(&get::<Vec<Snippet>>(&routes, &student, "/snippets").await?),
            hashset![in_exercise.id, in_chapter.id, unfiled.id]
        );

        // Selecting a chapter doesn't include snippets filed under its exercises.

        assert_eq!(
            ids(&get::<Vec<Snippet>>(&routes, &student, &format!("/snippets?folder={chapter}")).await?),
            hashset![in_chapter.id]
        );

        assert_eq!(
            ids(&get::<Vec<Snippet>>(&routes, &student, &format!("/snippets?folder={exercise}")).await?),
            hashset![in_exercise.id]
        );

        // Tag names match case-insensitively.

        assert_eq!(
            ids(&get::<Vec<Snippet>>(&routes, &student, "/snippets?tag=RECURSION").await?),
            hashset![in_exercise.id]
        );

        assert_eq!(
            ids(&get::<Vec<Snippet>>(&routes, &student, "/snippets?tag=java").await?),
            hashset![in_chapter.id]
        );

        // Language is independent of tags.

        assert_eq!(
            ids(&get::<Vec<Snippet>>(&routes, &student, "/snippets?language=java").await?),
            hashset![in_exercise.id]
        );

        assert!(get::<Vec<Snippet>>(
            &routes,
            &student,
            &format!("/snippets?folder={chapter}&language=java")
        )
        .await?
        .is_empty());

        assert_eq!(
            status(&routes, &student, "GET", "/snippets?language=python", None).await,
            StatusCode::BAD_REQUEST
        );

        // Deleting a chapter leaves its snippets in place, without a folder path.

        assert_eq!(
            status(&routes, &admin, "DELETE", &format!("/folders/{chapter}"), None).await,
            StatusCode::OK
        );

        let snippets = get::<Vec<Snippet>>(&routes, &student, "/snippets?tag=java").await?;

        assert_eq!(ids(&snippets), hashset![in_chapter.id]);
        assert_eq!(snippets[0].folder_id, Some(chapter));
        assert_eq!(snippets[0].folder, None);

        let snippets =
            get::<Vec<Snippet>>(&routes, &student, &format!("/snippets?folder={exercise}")).await?;

        assert_eq!(
            snippets[0].folder.as_ref().map(ToString::to_string).as_deref(),
            Some("Exercise 1")
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn edit_snippets() -> Result<()> {
        let TestState {
            conn,
            routes,
            admin,
            student,
            ..
        } = init().await?;

        let snippet = send::<Snippet>(
            &routes,
            &admin,
            "POST",
            "/snippets",
            &new_snippet(
                "Fibonacci",
                Language::Java,
                Some(FolderChoice::New("Arrays".into())),
                None,
                &[],
            ),
        )
        .await?;

        let patched = send::<Snippet>(
            &routes,
            &admin,
            "PATCH",
            &format!("/snippets/{}", snippet.id),
            &serde_json::json!({
                "title": "Memoized Fibonacci",
                "folder_id": null,
                "is_important": true,
                "exam_notes": "O(n)"
            }),
        )
        .await?;

        assert_eq!(patched.title, "Memoized Fibonacci");
        assert_eq!(patched.folder_id, None);
        assert!(patched.is_important);
        assert_eq!(patched.exam_notes.as_deref(), Some("O(n)"));
        assert_eq!(patched.language, Language::Java);
        assert_eq!(patched.code_content, snippet.code_content);

        assert_eq!(
            status(
                &routes,
                &admin,
                "PATCH",
                &format!("/snippets/{}", snippet.id),
                Some(serde_json::json!({ "folder_id": 12345 }))
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        assert_eq!(
            status(
                &routes,
                &admin,
                "PATCH",
                "/snippets/12345",
                Some(serde_json::json!({ "title": "Missing" }))
            )
            .await,
            StatusCode::NOT_FOUND
        );

        assert_eq!(
            status(
                &routes,
                &student,
                "PATCH",
                &format!("/snippets/{}", snippet.id),
                Some(serde_json::json!({ "title": "Mine now" }))
            )
            .await,
            StatusCode::FORBIDDEN
        );

        let tag = send::<Tag>(
            &routes,
            &admin,
            "POST",
            "/tags",
            &NewTag {
                name: "dynamic programming".into(),
                color: None,
            },
        )
        .await?;

        assert_eq!(
            status(
                &routes,
                &admin,
                "PUT",
                &format!("/snippets/{}/tags/{}", snippet.id, tag.id),
                None
            )
            .await,
            StatusCode::OK
        );

        // Deleting a snippet removes its links too.

        assert_eq!(
            status(&routes, &admin, "DELETE", &format!("/snippets/{}", snippet.id), None).await,
            StatusCode::OK
        );

        assert_eq!(count(&conn, "code_snippets_tags").await?, 0);

        assert_eq!(
            status(&routes, &admin, "DELETE", &format!("/snippets/{}", snippet.id), None).await,
            StatusCode::NOT_FOUND
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn tags() -> Result<()> {
        let TestState {
            routes,
            admin,
            student,
            ..
        } = init().await?;

        let snippet = send::<Snippet>(
            &routes,
            &admin,
            "POST",
            "/snippets",
            &new_snippet("Loop", Language::Javascript, None, None, &[]),
        )
        .await?;

        let tag = send::<Tag>(
            &routes,
            &admin,
            "POST",
            "/tags",
            &NewTag {
                name: " Arrays ".into(),
                color: Some("#10B981".into()),
            },
        )
        .await?;

        assert_eq!(tag.name, "Arrays");
        assert_eq!(tag.color, "#10B981");

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/tags",
                Some(serde_json::json!({ "name": "arrays" }))
            )
            .await,
            StatusCode::CONFLICT
        );

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/tags",
                Some(serde_json::json!({ "name": "loops", "color": "blue" }))
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        assert_eq!(
            status(
                &routes,
                &student,
                "POST",
                "/tags",
                Some(serde_json::json!({ "name": "loops" }))
            )
            .await,
            StatusCode::FORBIDDEN
        );

        let path = format!("/snippets/{}/tags/{}", snippet.id, tag.id);

        // Assigning twice is a conflict.

        assert_eq!(status(&routes, &admin, "PUT", &path, None).await, StatusCode::OK);

        assert_eq!(
            status(&routes, &admin, "PUT", &path, None).await,
            StatusCode::CONFLICT
        );

        assert_eq!(
            status(
                &routes,
                &admin,
                "PUT",
                &format!("/snippets/{}/tags/12345", snippet.id),
                None
            )
            .await,
            StatusCode::NOT_FOUND
        );

        assert_eq!(
            ids(&get::<Vec<Snippet>>(&routes, &student, "/snippets?tag=arrays").await?),
            hashset![snippet.id]
        );

        // Removing is idempotent.

        assert_eq!(status(&routes, &admin, "DELETE", &path, None).await, StatusCode::OK);
        assert_eq!(status(&routes, &admin, "DELETE", &path, None).await, StatusCode::OK);

        assert!(get::<Vec<Snippet>>(&routes, &student, "/snippets?tag=arrays")
            .await?
            .is_empty());

        assert_eq!(status(&routes, &admin, "PUT", &path, None).await, StatusCode::OK);

        let renamed = send::<Tag>(
            &routes,
            &admin,
            "PATCH",
            &format!("/tags/{}", tag.id),
            &TagPatch {
                name: Some("Lists".into()),
                color: None,
            },
        )
        .await?;

        assert_eq!(renamed.name, "Lists");
        assert_eq!(renamed.color, "#10B981");

        // Links to a deleted tag are dropped on read.

        assert_eq!(
            status(&routes, &admin, "DELETE", &format!("/tags/{}", tag.id), None).await,
            StatusCode::OK
        );

        let snippets = get::<Vec<Snippet>>(&routes, &student, "/snippets").await?;

        assert_eq!(ids(&snippets), hashset![snippet.id]);
        assert!(snippets[0].tags.is_empty());

        // Names differing only in non-ASCII case are the same tag, both when stored and when filtering.

        let accented = send::<Snippet>(
            &routes,
            &admin,
            "POST",
            "/snippets",
            &new_snippet("Accents", Language::Html, None, None, &["Émile", "émile", "ÉMILE"]),
        )
        .await?;

        assert_eq!(
            accented
                .tags
                .iter()
                .map(|tag| tag.name.as_str())
                .collect::<Vec<_>>(),
            vec!["Émile"]
        );

        assert_eq!(
            status(
                &routes,
                &admin,
                "POST",
                "/tags",
                Some(serde_json::json!({ "name": " émile " }))
            )
            .await,
            StatusCode::CONFLICT
        );

        assert_eq!(
            get::<Vec<Tag>>(&routes, &student, "/tags")
                .await?
                .iter()
                .filter(|tag| tag.name.to_lowercase() == "émile")
                .count(),
            1
        );

        assert_eq!(
            ids(&get::<Vec<Snippet>>(&routes, &student, "/snippets?tag=%C3%89MILE").await?),
            hashset![accented.id]
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn notes_and_comments() -> Result<()> {
        let TestState {
            routes,
            admin,
            student,
            ..
        } = init().await?;

        let web = send::<Subject>(
            &routes,
            &admin,
            "POST",
            "/subjects",
            &NewSubject {
                name: "Web Development".into(),
                description: None,
                parent_id: None,
            },
        )
        .await?;

        let css = send::<Subject>(
            &routes,
            &admin,
            "POST",
            "/subjects",
            &NewSubject {
                name: "CSS".into(),
                description: Some("Styling".into()),
                parent_id: Some(web.id),
            },
        )
        .await?;

        assert_eq!(
            get::<Vec<Subject>>(&routes, &student, "/subjects").await?,
            vec![web.clone()]
        );

        assert_eq!(
            get::<Vec<Subject>>(&routes, &student, &format!("/subjects?parent={}", web.id)).await?,
            vec![css.clone()]
        );

        assert_eq!(
            get::<Subject>(&routes, &student, &format!("/subjects/{}", css.id)).await?,
            css
        );

        assert_eq!(
            status(&routes, &student, "GET", "/subjects/12345", None).await,
            StatusCode::NOT_FOUND
        );

        let first = send::<Note>(
            &routes,
            &admin,
            "POST",
            "/notes",
            &NewNote {
                title: "Selectors".into(),
                content: "Use classes.".into(),
                subject_id: Some(css.id),
            },
        )
        .await?;

        let second = send::<Note>(
            &routes,
            &admin,
            "POST",
            "/notes",
            &NewNote {
                title: "Flexbox".into(),
                content: String::new(),
                subject_id: Some(css.id),
            },
        )
        .await?;

        // Newest first.

        assert_eq!(
            get::<Vec<Note>>(&routes, &student, &format!("/notes?subject={}", css.id))
                .await?
                .into_iter()
                .map(|note| note.id)
                .collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        assert!(get::<Vec<Note>>(&routes, &student, "/notes").await?.is_empty());

        assert_eq!(
            status(
                &routes,
                &student,
                "POST",
                "/notes",
                Some(serde_json::json!({ "title": "Mine" }))
            )
            .await,
            StatusCode::FORBIDDEN
        );

        // Any signed-in user may comment.

        let comment = send::<Comment>(
            &routes,
            &student,
            "POST",
            &format!("/notes/{}/comments", first.id),
            &NewComment {
                content: " Thanks! ".into(),
            },
        )
        .await?;

        assert_eq!(comment.content, "Thanks!");
        assert_eq!(comment.created_by, "student@demo.com");

        assert_eq!(
            status(
                &routes,
                &student,
                "POST",
                &format!("/notes/{}/comments", first.id),
                Some(serde_json::json!({ "content": "   " }))
            )
            .await,
            StatusCode::BAD_REQUEST
        );

        assert_eq!(
            get::<Vec<Comment>>(&routes, &admin, &format!("/notes/{}/comments", first.id)).await?,
            vec![comment]
        );

        assert_eq!(
            status(&routes, &student, "GET", "/notes/12345/comments", None).await,
            StatusCode::NOT_FOUND
        );

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn attachments() -> Result<()> {
        let TestState {
            routes,
            admin,
            student,
            ..
        } = init().await?;

        let note = send::<Note>(
            &routes,
            &admin,
            "POST",
            "/notes",
            &NewNote {
                title: "Slides".into(),
                content: String::new(),
                subject_id: None,
            },
        )
        .await?;

        assert_eq!(
            upload(&routes, &student, note.id, "a.txt", b"hello".to_vec())
                .await
                .status(),
            StatusCode::FORBIDDEN
        );

        // Anything over 10 MiB is too large, but exactly 10 MiB is fine.

        assert_eq!(
            upload(
                &routes,
                &admin,
                note.id,
                "big.bin",
                vec![0; MAX_ATTACHMENT_BYTES as usize + 1]
            )
            .await
            .status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );

        assert_eq!(
            upload(
                &routes,
                &admin,
                note.id,
                "max.bin",
                vec![0; MAX_ATTACHMENT_BYTES as usize]
            )
            .await
            .status(),
            StatusCode::OK
        );

        let response = upload(&routes, &admin, note.id, "hello.txt", b"hello".to_vec()).await;

        assert_eq!(response.status(), StatusCode::OK);

        let hello = serde_json::from_slice::<Attachment>(response.body())?;

        assert_eq!(hello.file_name, "hello.txt");
        assert_eq!(hello.file_type, "text/plain");
        assert_eq!(hello.file_size, 5);
        assert_eq!(hello.created_by.as_deref(), Some("instructor@demo.com"));
        assert!(hello
            .file_url
            .starts_with(&format!("/attachments/{}/", note.id)));
        assert!(hello.file_url.ends_with(".txt"));

        // The stored file is served from the recorded URL.

        let response = warp::test::request()
            .method("GET")
            .path(&hello.file_url)
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&response.body()[..], b"hello");

        // Five files per note, and no more.

        for name in ["c.txt", "d.txt", "e.txt"] {
            assert_eq!(
                upload(&routes, &admin, note.id, name, b"x".to_vec())
                    .await
                    .status(),
                StatusCode::OK
            );
        }

        assert_eq!(
            upload(&routes, &admin, note.id, "f.txt", b"x".to_vec())
                .await
                .status(),
            StatusCode::BAD_REQUEST
        );

        let note = get::<Note>(&routes, &student, &format!("/notes/{}", note.id)).await?;

        assert_eq!(note.attachments.len(), 5);
        assert_eq!(note.attachments[1], hello);

        assert_eq!(
            get::<Vec<Note>>(&routes, &student, "/notes").await?[0]
                .attachments
                .len(),
            5
        );

        assert_eq!(
            upload(&routes, &admin, 12345, "a.txt", b"x".to_vec())
                .await
                .status(),
            StatusCode::NOT_FOUND
        );

        Ok(())
    }
}
