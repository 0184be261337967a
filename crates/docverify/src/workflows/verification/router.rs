use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::domain::{Actor, ActorId, CaseId, CaseSnapshot, DocumentKind, DocumentSlot, Role};
use super::error::VerificationError;
use super::fields::SlotFields;
use super::machine::SlotAction;
use super::repository::{RepositoryError, SlotRepository, StorageError};
use super::service::VerificationService;
use super::store::SlotMutation;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Router builder exposing the submitter and reviewer endpoints.
pub fn verification_router<R>(
    service: Arc<VerificationService<R>>,
    max_upload_bytes: usize,
) -> Router
where
    R: SlotRepository + 'static,
{
    Router::new()
        .route("/cases/:case_id", get(case_handler::<R>))
        .route("/cases/:case_id/stream", get(stream_handler::<R>))
        .route("/cases/:case_id/approve-all", post(approve_all_handler::<R>))
        .route("/cases/:case_id/slots/:kind", post(decision_handler::<R>))
        .route(
            "/cases/:case_id/slots/:kind/fields",
            put(fields_handler::<R>),
        )
        .route(
            "/cases/:case_id/slots/:kind/file",
            put(upload_handler::<R>).get(file_url_handler::<R>),
        )
        .route("/reviews/queue", get(queue_handler::<R>))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(service)
}

/// HTTP-facing error wrapper.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid {0} header")]
    Unauthenticated(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Verification(#[from] VerificationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Verification(err) => match err {
                VerificationError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                VerificationError::IllegalTransition(_) => {
                    (StatusCode::CONFLICT, "ILLEGAL_TRANSITION")
                }
                VerificationError::Repository(
                    RepositoryError::Conflict | RepositoryError::Contention { .. },
                ) => (StatusCode::CONFLICT, "CONTENTION"),
                VerificationError::Storage(StorageError::NotFound)
                | VerificationError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                VerificationError::Repository(RepositoryError::Unavailable(_)) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "REPOSITORY_UNAVAILABLE")
                }
                VerificationError::Storage(_) => (StatusCode::BAD_GATEWAY, "STORAGE_ERROR"),
                VerificationError::UnsupportedMedia(_) => {
                    (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_MEDIA")
                }
                VerificationError::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            },
        };

        let mut body = json!({
            "error": self.to_string(),
            "code": code,
        });
        if let ApiError::Verification(VerificationError::IllegalTransition(detail)) = &self {
            body["transition"] = json!(detail);
        }

        (status, Json(body)).into_response()
    }
}

/// Slot write response: the slot as committed plus the re-derived case.
#[derive(Debug, Serialize)]
pub struct SlotResponse {
    pub slot: DocumentSlot,
    pub case: CaseSnapshot,
}

impl From<SlotMutation> for SlotResponse {
    fn from(mutation: SlotMutation) -> Self {
        Self {
            slot: mutation.slot,
            case: mutation.case,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

/// Read the caller identity from the transport headers.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, ApiError> {
    let id = headers
        .get(ACTOR_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ApiError::Unauthenticated(ACTOR_ID_HEADER))?;
    let role = headers
        .get(ACTOR_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(Role::parse)
        .ok_or(ApiError::Unauthenticated(ACTOR_ROLE_HEADER))?;

    Ok(Actor {
        id: ActorId(id.to_string()),
        role,
    })
}

fn parse_kind(raw: &str) -> Result<DocumentKind, ApiError> {
    DocumentKind::parse(raw)
        .ok_or_else(|| VerificationError::NotFound(format!("document kind {raw}")).into())
}

/// Split a `{kind}:{action}` segment such as `bank_proof:reject`.
fn parse_decision_segment(raw: &str) -> Result<(DocumentKind, SlotAction), ApiError> {
    let (kind, action) = raw
        .split_once(':')
        .ok_or_else(|| ApiError::BadRequest(format!("expected {{kind}}:approve or {{kind}}:reject, got {raw}")))?;
    let action = match action {
        "approve" => SlotAction::Approve,
        "reject" => SlotAction::Reject,
        other => return Err(ApiError::BadRequest(format!("unknown slot action {other}"))),
    };
    Ok((parse_kind(kind)?, action))
}

pub(crate) async fn case_handler<R>(
    State(service): State<Arc<VerificationService<R>>>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CaseSnapshot>, ApiError>
where
    R: SlotRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let snapshot = service.case_for(&actor, &CaseId(case_id))?;
    Ok(Json(snapshot))
}

pub(crate) async fn fields_handler<R>(
    State(service): State<Arc<VerificationService<R>>>,
    Path((case_id, kind)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<SlotResponse>, ApiError>
where
    R: SlotRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let kind = parse_kind(&kind)?;
    let fields = SlotFields::from_json(kind, body).map_err(VerificationError::from)?;
    let mutation = service.put_fields(&actor, &CaseId(case_id), kind, fields)?;
    Ok(Json(mutation.into()))
}

pub(crate) async fn upload_handler<R>(
    State(service): State<Arc<VerificationService<R>>>,
    Path((case_id, kind)): Path<(String, String)>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<SlotResponse>, ApiError>
where
    R: SlotRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let kind = parse_kind(&kind)?;
    let case_id = CaseId(case_id);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let content_type = match (field.content_type(), field.file_name()) {
            (Some(declared), _) => declared.to_string(),
            (None, Some(name)) => mime_guess::from_path(name)
                .first_or_octet_stream()
                .to_string(),
            (None, None) => mime::APPLICATION_OCTET_STREAM.to_string(),
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::BadRequest(err.to_string()))?;

        let mutation = service
            .upload_file(&actor, &case_id, kind, bytes.to_vec(), &content_type)
            .await?;
        return Ok(Json(mutation.into()));
    }

    Err(ApiError::BadRequest(
        "multipart body needs a `file` part".to_string(),
    ))
}

pub(crate) async fn file_url_handler<R>(
    State(service): State<Arc<VerificationService<R>>>,
    Path((case_id, kind)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError>
where
    R: SlotRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let kind = parse_kind(&kind)?;
    let url = service.file_url(&actor, &CaseId(case_id), kind).await?;
    Ok(Json(json!({ "kind": kind, "url": url })))
}

pub(crate) async fn decision_handler<R>(
    State(service): State<Arc<VerificationService<R>>>,
    Path((case_id, segment)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SlotResponse>, ApiError>
where
    R: SlotRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let (kind, action) = parse_decision_segment(&segment)?;
    let case_id = CaseId(case_id);

    let mutation = match action {
        SlotAction::Reject => {
            let request: RejectRequest = serde_json::from_slice(&body)
                .map_err(|err| ApiError::BadRequest(format!("reject needs {{\"reason\"}}: {err}")))?;
            service.reject(&actor, &case_id, kind, request.reason).await?
        }
        _ => service.approve(&actor, &case_id, kind).await?,
    };
    Ok(Json(mutation.into()))
}

pub(crate) async fn approve_all_handler<R>(
    State(service): State<Arc<VerificationService<R>>>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    R: SlotRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let outcome = service.approve_all(&actor, &CaseId(case_id)).await?;
    Ok((StatusCode::OK, Json(outcome)).into_response())
}

pub(crate) async fn queue_handler<R>(
    State(service): State<Arc<VerificationService<R>>>,
    headers: HeaderMap,
) -> Result<Response, ApiError>
where
    R: SlotRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let queue = service.review_queue(&actor)?;
    Ok((StatusCode::OK, Json(json!({ "cases": queue }))).into_response())
}

pub(crate) async fn stream_handler<R>(
    State(service): State<Arc<VerificationService<R>>>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError>
where
    R: SlotRepository + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let subscription = service.subscribe(&actor, &CaseId(case_id))?;
    let events = subscription
        .into_stream()
        .map(|snapshot| Event::default().event("case").json_data(snapshot));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
