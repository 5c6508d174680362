use {
    anyhow::{anyhow, Error},
    hyper::StatusCode,
    serde_derive::Serialize,
    std::{borrow::Cow, convert::Infallible, str::FromStr},
    warp::{
        body::BodyDeserializeError,
        reject::{
            InvalidHeader, InvalidQuery, MethodNotAllowed, MissingHeader, PayloadTooLarge, Reject,
        },
        reply, Rejection, Reply,
    },
};

#[derive(Serialize)]
#[serde(remote = "StatusCode")]
struct StatusCodeU16(#[serde(getter = "StatusCode::as_u16")] u16);

/// Error reported to the client as a JSON body of the form `{"message": ..., "status": ...}`
///
/// Handlers attach one of these to an `anyhow::Error` wherever a failure should be reported as something other than
/// a 500.
#[derive(Clone, Serialize, Debug, thiserror::Error)]
#[error("HTTP {}: {}", status, message)]
pub struct HttpError {
    pub message: Cow<'static, str>,
    #[serde(with = "StatusCodeU16")]
    pub status: StatusCode,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: &'static str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: &'static str) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(what: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, what)
    }

    /// Uniqueness violation, e.g. a tag name already in use
    pub fn conflict(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn payload_too_large(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn internal_server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    /// Find the `HttpError` at the root of `error`, if any.  Anything else is reported as a 500 without details.
    pub fn from(error: Error) -> Self {
        if let Some(e) = error.root_cause().downcast_ref::<HttpError>() {
            e.clone()
        } else {
            Self::internal_server_error()
        }
    }

    fn as_reply(&self) -> impl Reply {
        reply::with_status(reply::json(&self), self.status)
    }
}

impl Reject for HttpError {}

/// Value of an HTTP "Authorization: Bearer ..." header
pub struct Bearer {
    pub body: String,
}

impl FromStr for Bearer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let prefix = "Bearer ";
        if let Some(body) = s.strip_prefix(prefix) {
            Ok(Self {
                body: body.to_owned(),
            })
        } else {
            Err(anyhow!("expected prefix \"{}\"", prefix))
        }
    }
}

/// Convert any rejection into a JSON [HttpError] reply.
///
/// Warp reports an unmatched path as "not found" even when some other route rejected the request for a more
/// specific reason, so "not found" is checked first and everything else by type.
pub async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let error = if rejection.is_not_found() {
        HttpError::not_found("not found")
    } else if let Some(error) = rejection.find::<HttpError>() {
        error.clone()
    } else if let Some(error) = rejection.find::<BodyDeserializeError>() {
        HttpError::bad_request(error.to_string())
    } else if let Some(error) = rejection.find::<InvalidQuery>() {
        HttpError::bad_request(error.to_string())
    } else if let Some(error) = rejection.find::<MissingHeader>() {
        HttpError::bad_request(error.to_string())
    } else if let Some(error) = rejection.find::<InvalidHeader>() {
        HttpError::bad_request(error.to_string())
    } else if rejection.find::<PayloadTooLarge>().is_some() {
        HttpError::payload_too_large("attachments must be at most 10MB")
    } else if rejection.find::<MethodNotAllowed>().is_some() {
        HttpError::new(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        HttpError::internal_server_error()
    };

    Ok(error.as_reply())
}
