//! Uniform JSON error responses.
//!
//! Every failure leaving the HTTP surface is rendered as
//! `{"error": <code>, "message": <text>, "details": [...] | null}`:
//!
//! | kind          | status            | `error`              |
//! |---------------|-------------------|----------------------|
//! | internal      | 500               | `internal_error`     |
//! | not found     | 404               | `not_found`          |
//! | conflict      | 409               | `conflict`           |
//! | validation    | 422               | `validation_error`   |
//! | routing       | framework status  | the status, e.g. `404` |
//! | unhandled     | 500               | `internal_error`     |
//!
//! Unhandled errors (crate errors without a domain mapping and handler
//! panics) are logged in full and reach the client only as
//! "Internal server error".

use crate::Error;
use crate::session::is_valid_session_id;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Request, rejection::BytesRejection},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use serde_path_to_error::Segment;
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
pub const NOT_FOUND_MESSAGE: &str = "Resource not found";
pub const CONFLICT_MESSAGE: &str = "Resource conflict";
pub const VALIDATION_ERROR_MESSAGE: &str = "Validation failed";
pub const FIELD_REQUIRED_MESSAGE: &str = "Field required";
pub const JSON_DECODE_MESSAGE: &str = "JSON decode error";
pub const SESSION_ID_RULE: &str =
    "Session id must be 1-128 characters of letters, digits, '-', '_' or '.'";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("HTTP {status}: {reason}")]
    Routing { status: StatusCode, reason: String },

    #[error("Validation failed: {0:?}")]
    Validation(Vec<FieldError>),

    #[error("Unhandled error: {0:#}")]
    Unhandled(#[from] anyhow::Error),
}

impl ApiError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Framework-level failure described only by its status.
    pub fn routing(status: StatusCode) -> Self {
        Self::Routing {
            status,
            reason: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
        }
    }

    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Internal(_) | Self::Unhandled(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Routing { status, .. } => *status,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    pub fn code(&self) -> String {
        match self {
            Self::Internal(_) | Self::Unhandled(_) => "internal_error".to_string(),
            Self::NotFound(_) => "not_found".to_string(),
            Self::Conflict(_) => "conflict".to_string(),
            Self::Routing { status, .. } => status.as_str().to_string(),
            Self::Validation(_) => "validation_error".to_string(),
        }
    }

    /// Logs unhandled errors and produces the client-facing body.
    pub fn render(self) -> (StatusCode, ErrorResponse) {
        let status = self.status();
        let error = self.code();

        let (message, details) = match self {
            Self::Internal(message) => (or_default(message, INTERNAL_ERROR_MESSAGE), None),
            Self::NotFound(message) => (or_default(message, NOT_FOUND_MESSAGE), None),
            Self::Conflict(message) => (or_default(message, CONFLICT_MESSAGE), None),
            Self::Routing { reason, .. } => (reason, None),
            Self::Validation(details) => (VALIDATION_ERROR_MESSAGE.to_string(), Some(details)),
            Self::Unhandled(err) => {
                error!("Unhandled exception: {:?}", err);
                (INTERNAL_ERROR_MESSAGE.to_string(), None)
            }
        };

        (
            status,
            ErrorResponse {
                error,
                message,
                details,
            },
        )
    }
}

fn or_default(message: String, default: &str) -> String {
    if message.is_empty() {
        default.to_string()
    } else {
        message
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.render();
        (status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::SessionNotFound { session_id } => {
                Self::NotFound(format!("Session '{session_id}' not found"))
            }
            Error::SessionExists { session_id } => {
                Self::Conflict(format!("Session '{session_id}' already exists"))
            }
            Error::InvalidSessionId { .. } => Self::invalid_field("body.session_id", SESSION_ID_RULE),
            other => Self::Unhandled(other.into()),
        }
    }
}

/// Field-level checks that run after a request body deserializes.
pub trait Validate {
    fn validate(&self) -> Vec<FieldError> {
        Vec::new()
    }
}

/// Checks an optional session id field, reporting it under `field`.
pub fn validate_session_id(field: &str, session_id: Option<&str>) -> Vec<FieldError> {
    match session_id {
        Some(id) if !is_valid_session_id(id) => vec![FieldError::new(field, SESSION_ID_RULE)],
        _ => Vec::new(),
    }
}

/// JSON body extractor whose failures become [`ApiError`]s. The body is
/// parsed as JSON whatever the content type says. Syntax errors, shape
/// errors and [`Validate`] failures are all 422s pointing at the
/// offending location; shape errors are collected for every field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ApiError::invalid_field("body", FIELD_REQUIRED_MESSAGE));
        }

        let value: Value = serde_json::from_slice(&bytes).map_err(|err| {
            let offset = byte_offset(&bytes, err.line(), err.column());
            ApiError::invalid_field(format!("body.{offset}"), JSON_DECODE_MESSAGE)
        })?;

        let parsed: T = deserialize_collecting(value).map_err(ApiError::Validation)?;

        let problems = parsed.validate();
        if problems.is_empty() {
            Ok(Self(parsed))
        } else {
            Err(ApiError::Validation(problems))
        }
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        Self::Routing {
            status: rejection.status(),
            reason: rejection.body_text(),
        }
    }
}

fn byte_offset(body: &[u8], line: usize, column: usize) -> usize {
    let line_start: usize = body
        .split_inclusive(|b| *b == b'\n')
        .take(line.saturating_sub(1))
        .map(<[u8]>::len)
        .sum();
    line_start + column.saturating_sub(1)
}

/// One step into a JSON document.
#[derive(Debug, Clone, PartialEq)]
enum Step {
    Key(String),
    Index(usize),
}

/// A shape error: where it is, and whether it names a missing field.
struct ShapeError {
    /// `None` when serde's path can't be followed back into the document.
    steps: Option<Vec<Step>>,
    display: Vec<String>,
    message: String,
}

impl ShapeError {
    fn new(err: &serde_path_to_error::Error<serde_json::Error>) -> Self {
        let mut steps = Some(Vec::new());
        let mut display = Vec::new();

        for segment in err.path().iter() {
            let step = match segment {
                Segment::Seq { index } => Some(Step::Index(*index)),
                Segment::Map { key } => Some(Step::Key(key.clone())),
                Segment::Enum { .. } | Segment::Unknown => None,
            };
            display.push(match segment {
                Segment::Seq { index } => index.to_string(),
                Segment::Map { key } => key.clone(),
                Segment::Enum { variant } => variant.clone(),
                Segment::Unknown => "?".to_string(),
            });
            match (step, steps.as_mut()) {
                (Some(step), Some(steps)) => steps.push(step),
                _ => steps = None,
            }
        }

        let inner = err.inner().to_string();
        let message = match missing_field(&inner) {
            Some(name) => {
                display.push(name.to_string());
                if let Some(steps) = steps.as_mut() {
                    steps.push(Step::Key(name.to_string()));
                }
                FIELD_REQUIRED_MESSAGE.to_string()
            }
            None => inner,
        };

        Self {
            steps,
            display,
            message,
        }
    }

    fn field_error(&self) -> FieldError {
        let mut field = vec!["body".to_string()];
        field.extend(self.display.iter().cloned());
        FieldError::new(field.join("."), self.message.clone())
    }
}

/// Upper bound on shape errors reported for one body.
const MAX_SHAPE_ERRORS: usize = 32;

/// Deserializes `value` into `T`, reporting every shape error instead of
/// only the first. serde stops at the first error, so each offending
/// location is patched with a placeholder that satisfies it and the
/// document is tried again.
fn deserialize_collecting<T: DeserializeOwned>(mut value: Value) -> Result<T, Vec<FieldError>> {
    let mut problems = Vec::new();

    loop {
        let err = match serde_path_to_error::deserialize::<_, T>(value.clone()) {
            Ok(parsed) if problems.is_empty() => return Ok(parsed),
            Ok(_) => return Err(problems),
            Err(err) => ShapeError::new(&err),
        };
        problems.push(err.field_error());

        let patched = match &err.steps {
            Some(steps) if !steps.is_empty() && problems.len() < MAX_SHAPE_ERRORS => {
                patch::<T>(&value, steps)
            }
            _ => None,
        };
        match patched {
            Some(next) => value = next,
            None => return Err(problems),
        }
    }
}

/// Finds a placeholder for the value at `steps` after which the next
/// error, if any, lies outside that location.
fn patch<T: DeserializeOwned>(value: &Value, steps: &[Step]) -> Option<Value> {
    let placeholders = [
        Value::String(String::new()),
        json!(0),
        Value::Bool(false),
        json!([]),
        json!({}),
        Value::Null,
    ];

    placeholders.into_iter().find_map(|placeholder| {
        let mut candidate = value.clone();
        if !set_at(&mut candidate, steps, placeholder) {
            return None;
        }
        match serde_path_to_error::deserialize::<_, T>(candidate.clone()) {
            Ok(_) => Some(candidate),
            Err(err) => {
                let next = ShapeError::new(&err);
                let inside = next
                    .steps
                    .as_ref()
                    .is_none_or(|next_steps| next_steps.starts_with(steps));
                (!inside).then_some(candidate)
            }
        }
    })
}

fn set_at(value: &mut Value, steps: &[Step], new: Value) -> bool {
    let Some((last, parents)) = steps.split_last() else {
        return false;
    };

    let mut target = value;
    for step in parents {
        let next = match step {
            Step::Key(key) => target.get_mut(key.as_str()),
            Step::Index(index) => target.get_mut(*index),
        };
        match next {
            Some(next) => target = next,
            None => return false,
        }
    }

    match (last, target) {
        (Step::Key(key), Value::Object(map)) => {
            map.insert(key.clone(), new);
            true
        }
        (Step::Index(index), Value::Array(items)) if *index < items.len() => {
            items[*index] = new;
            true
        }
        _ => false,
    }
}

// serde reports a missing field at the enclosing struct, naming the
// field only in the message.
fn missing_field(message: &str) -> Option<&str> {
    message
        .strip_prefix("missing field `")?
        .split('`')
        .next()
}

pub async fn route_not_found() -> ApiError {
    ApiError::routing(StatusCode::NOT_FOUND)
}

/// Rewrites bodiless error responses produced by the framework itself
/// (405 on method mismatch, for one) into the uniform shape.
pub async fn normalize_error_response(response: Response) -> Response {
    let status = response.status();
    let is_error = status.is_client_error() || status.is_server_error();
    if !is_error || response.headers().contains_key(header::CONTENT_TYPE) {
        return response;
    }

    let mut normalized = ApiError::routing(status).into_response();
    if let Some(allow) = response.headers().get(header::ALLOW) {
        normalized.headers_mut().insert(header::ALLOW, allow.clone());
    }
    normalized
}

pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");

    ApiError::Unhandled(anyhow::anyhow!("handler panicked: {detail}")).into_response()
}

/// Installs the fallback, response normalization and panic capture so
/// that every error path on `router` renders uniformly.
pub fn install<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .fallback(route_not_found)
        .layer(middleware::map_response(normalize_error_response))
        .layer(CatchPanicLayer::custom(panic_response))
}
