use {
    crate::warp_util::HttpError,
    anyhow::Result,
    classroom_shared::{
        Authorization, Role, Session, TokenError, TokenErrorType, TokenRequest, TokenSuccess,
        TokenType,
    },
    http::{header, status::StatusCode, Response},
    hyper::Body,
    jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation},
    sqlx::{Row, SqliteConnection},
    std::{
        num::NonZeroU32,
        ops::DerefMut,
        sync::Arc,
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
    tokio::{sync::Mutex as AsyncMutex, time},
    tracing::{info, warn},
};

const TOKEN_EXPIRATION_SECS: u64 = 24 * 60 * 60;

const PBKDF2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(iterations) => iterations,
    None => panic!("iteration count must be nonzero"),
};

pub fn hash_password(salt: &[u8], secret: &[u8]) -> String {
    const SIZE: usize = ring::digest::SHA256_OUTPUT_LEN;
    let mut hash: [u8; SIZE] = [0u8; SIZE];
    ring::pbkdf2::derive(
        ring::pbkdf2::PBKDF2_HMAC_SHA256,
        PBKDF2_ITERATIONS,
        salt,
        secret,
        &mut hash,
    );
    base64::encode(&hash)
}

/// Expand a login name into the email address it stands for.
///
/// Bare user names (e.g. "alice") are qualified with `domain`; anything containing an '@' is taken as-is.
/// Either way, the result is lowercased, since emails are matched case-insensitively.
pub fn login_email(username: &str, domain: &str) -> String {
    let username = username.trim();

    if username.contains('@') {
        username.to_lowercase()
    } else {
        format!("{username}@{domain}").to_lowercase()
    }
}

/// Add a user, or replace the password and role of an existing one.
pub async fn add_user(
    conn: &mut SqliteConnection,
    email: &str,
    password: &str,
    role: Role,
) -> Result<()> {
    let email = email.trim().to_lowercase();
    let hash = hash_password(email.as_bytes(), password.as_bytes());

    sqlx::query(
        "INSERT INTO users (email, password_hash, role) VALUES (?1, ?2, ?3) \
         ON CONFLICT (email) DO UPDATE SET password_hash = ?2, role = ?3",
    )
    .bind(&email)
    .bind(&hash)
    .bind(role.as_str())
    .execute(&mut *conn)
    .await?;

    info!(%email, %role, "saved user");

    Ok(())
}

/// Change the role of an existing user, returning false if no such user exists.
pub async fn set_role(conn: &mut SqliteConnection, email: &str, role: Role) -> Result<bool> {
    Ok(sqlx::query("UPDATE users SET role = ?1 WHERE email = ?2")
        .bind(role.as_str())
        .bind(email.trim().to_lowercase())
        .execute(&mut *conn)
        .await?
        .rows_affected()
        > 0)
}

pub async fn authenticate(
    conn: &AsyncMutex<SqliteConnection>,
    request: &TokenRequest,
    key: &[u8],
    mutex: &AsyncMutex<()>,
    invalid_credential_delay: Duration,
    login_domain: &str,
) -> Result<Response<Body>> {
    let _lock = mutex.lock().await;

    let email = login_email(&request.username, login_domain);

    let hash = hash_password(email.as_bytes(), request.password.as_bytes());

    let role = sqlx::query("SELECT role FROM users WHERE email = ?1 AND password_hash = ?2")
        .bind(&email)
        .bind(&hash)
        .fetch_optional(conn.lock().await.deref_mut())
        .await?
        .map(|row| row.try_get::<String, _>(0))
        .transpose()?;

    Ok(if let Some(role) = role {
        let expiration = (SystemTime::now() + Duration::from_secs(TOKEN_EXPIRATION_SECS))
            .duration_since(UNIX_EPOCH)?
            .as_secs();

        let success = TokenSuccess {
            access_token: jsonwebtoken::encode(
                &Header::new(Algorithm::HS256),
                &Authorization {
                    expiration,
                    subject: email,
                    role: role.parse()?,
                },
                &EncodingKey::from_secret(key),
            )?,
            token_type: TokenType::Jwt,
        };

        crate::json_response(&success)?
    } else {
        warn!("received invalid credentials; delaying response");

        time::sleep(invalid_credential_delay).await;

        let error = serde_json::to_vec(&TokenError {
            error: TokenErrorType::UnauthorizedClient,
            error_description: None,
        })?;

        crate::response()
            .status(StatusCode::UNAUTHORIZED)
            .header(header::CONTENT_LENGTH, error.len())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(error))?
    })
}

pub fn authorize(token: &str, key: &[u8]) -> Result<Arc<Authorization>, HttpError> {
    Ok(Arc::new(
        jsonwebtoken::decode::<Authorization>(
            token,
            &DecodingKey::from_secret(key),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| {
            warn!("received invalid token: {:?}", e);

            HttpError::unauthorized("invalid token")
        })?
        .claims,
    ))
}

/// Fail with 403 Forbidden unless `auth` carries the admin role.
pub fn require_admin(auth: &Authorization) -> Result<(), HttpError> {
    if auth.is_admin() {
        Ok(())
    } else {
        warn!(subject = %auth.subject, "non-admin attempted an admin operation");

        Err(HttpError::forbidden("admin role required"))
    }
}

pub fn session(auth: &Authorization) -> Result<Response<Body>> {
    crate::json_response(&Session::from(auth))
}
