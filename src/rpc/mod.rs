#![allow(clippy::result_large_err)] // Handlers convert AppError into envelope rejections at the boundary.

use crate::core::actions::{self, ActionRunner, ExecutorRegistry};
use crate::core::approvals;
use crate::core::auth::{AuthProvider, AuthUser};
use crate::core::config::{FieldSchema, WorkflowRegistry};
use crate::core::engine::{TransitionEngine, TransitionRequest};
use crate::core::entities::{ApprovalKind, ApprovalToken, CardEntry, TimestampValue, DRAFT_STATUS};
use crate::core::error::AppError;
use crate::core::lov::{LovCache, LovValidator};
use crate::core::mail::MailerRegistry;
use crate::core::sheets::RangeReader;
use crate::core::stats::Aggregator;
use crate::core::store::{CardStore, DocumentStore, ACTIVITY_COLLECTION, STATS_COLLECTION};
use crate::core::types::ErrorCategory;
use axum::{
    body::Body,
    extract::{Extension, Path},
    http::{header, HeaderMap, HeaderValue, Response, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::util::MapResponseLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

const MAX_BODY_BYTES: usize = 1_048_576;

/// Shared collaborators behind the RPC surface.
pub struct AppState {
    pub configs: Arc<WorkflowRegistry>,
    pub store: Arc<dyn DocumentStore>,
    pub cards: Arc<CardStore>,
    pub aggregator: Arc<Aggregator>,
    pub engine: Arc<TransitionEngine>,
    pub lov: Arc<LovCache>,
    pub lov_validator: Arc<LovValidator>,
    pub auth: Arc<dyn AuthProvider>,
}

/// Wire the engine and its collaborators together over the given store.
pub fn build_state(
    configs: Arc<WorkflowRegistry>,
    store: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
    mailers: Arc<MailerRegistry>,
    sheets: Arc<dyn RangeReader>,
) -> Arc<AppState> {
    let http = reqwest::Client::new();
    let cards = Arc::new(CardStore::new(store.clone()));
    let aggregator = Arc::new(Aggregator::new(store.clone()));
    let lov = Arc::new(LovCache::new(store.clone(), http.clone(), sheets));
    let lov_validator = Arc::new(LovValidator::new(lov.clone()));

    let mut builder = ExecutorRegistry::builder();
    actions::register_builtins(
        &mut builder,
        actions::BuiltinExecutorDeps {
            cards: cards.clone(),
            aggregator: aggregator.clone(),
            mailers,
            http,
        },
    );
    let runner = ActionRunner::new(builder.build());

    let engine = Arc::new(TransitionEngine::new(
        configs.clone(),
        cards.clone(),
        runner,
        aggregator.clone(),
        lov_validator.clone(),
    ));

    Arc::new(AppState {
        configs,
        store,
        cards,
        aggregator,
        engine,
        lov,
        lov_validator,
        auth,
    })
}

/// Start the RPC listener and block until the service terminates.
pub async fn serve_rpc(state: Arc<AppState>, bind: &str) -> Result<(), AppError> {
    serve_rpc_internal(state, bind, None).await
}

/// Start the RPC listener and notify once the bind address is known (test helper).
pub async fn serve_rpc_with_ready_notifier(
    state: Arc<AppState>,
    bind: &str,
    ready_notifier: oneshot::Sender<SocketAddr>,
) -> Result<(), AppError> {
    serve_rpc_internal(state, bind, Some(ready_notifier)).await
}

async fn serve_rpc_internal(
    state: Arc<AppState>,
    bind: &str,
    ready_notifier: Option<oneshot::Sender<SocketAddr>>,
) -> Result<(), AppError> {
    let bind_addr: SocketAddr = bind.parse().map_err(|err| {
        AppError::new(
            ErrorCategory::ValidationError,
            format!("invalid bind address {}: {}", bind, err),
        )
    })?;
    let router = router(state);
    let listener = TcpListener::bind(bind_addr).await.map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to bind RPC listener {}: {}", bind_addr, err),
        )
    })?;
    let local_addr = listener.local_addr().map_err(|err| {
        AppError::new(
            ErrorCategory::IoError,
            format!("failed to determine RPC listener address: {}", err),
        )
    })?;
    if let Some(tx) = ready_notifier {
        let _ = tx.send(local_addr);
    }
    info!("cardflow RPC listening on {}", local_addr);
    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| {
            AppError::new(
                ErrorCategory::InternalError,
                format!("RPC server terminated: {}", err),
            )
        })
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/cards", post(handle_create))
        .route("/v1/cards/transit", post(handle_transit))
        .route(
            "/v1/cards/{workflow}/{card}",
            get(handle_get).patch(handle_update).delete(handle_delete),
        )
        .route("/v1/cards/{workflow}/{card}/approve", post(handle_approve))
        .route("/v1/cards/{workflow}/{card}/activity", get(handle_activity))
        .route("/v1/stats/{workflow}", get(handle_stats))
        .route("/v1/lov/invalidate", post(handle_lov_invalidate))
        .layer(Extension(state))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(MapResponseLayer::new(|mut response: Response<Body>| {
            if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
                let body = json!({
                    "success": false,
                    "reason": "payload too large",
                })
                .to_string();
                *response.body_mut() = Body::from(body);
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
            }
            response
        }))
        .layer(CorsLayer::permissive())
}

fn ok(result: Value) -> Json<Value> {
    Json(json!({ "success": true, "result": result }))
}

struct ApiRejection {
    status: StatusCode,
    reason: String,
}

impl ApiRejection {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            reason: "unauthorized".to_string(),
        }
    }

    fn forbidden<T: Into<String>>(reason: T) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            reason: reason.into(),
        }
    }

    fn bad_request<T: Into<String>>(reason: T) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            reason: reason.into(),
        }
    }
}

impl From<AppError> for ApiRejection {
    fn from(err: AppError) -> Self {
        let status = match err.category {
            ErrorCategory::AuthError => StatusCode::UNAUTHORIZED,
            ErrorCategory::ValidationError | ErrorCategory::ConfigurationError => {
                StatusCode::BAD_REQUEST
            }
            ErrorCategory::StoreError => StatusCode::NOT_FOUND,
            ErrorCategory::HttpError | ErrorCategory::MailError => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("RPC internal error: {}", err);
        }
        Self {
            status,
            reason: err.message,
        }
    }
}

impl IntoResponse for ApiRejection {
    fn into_response(self) -> Response<Body> {
        let mut resp = Json(json!({
            "success": false,
            "reason": self.reason,
        }))
        .into_response();
        *resp.status_mut() = self.status;
        resp
    }
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AuthUser, ApiRejection> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(ApiRejection::unauthorized)?;
    state
        .auth
        .verify_token(bearer)
        .await
        .map_err(|_| ApiRejection::unauthorized())
}

fn check_access(state: &AppState, workflow_id: &str, user: &AuthUser) -> Result<(), ApiRejection> {
    let config = state.configs.get(workflow_id).ok_or_else(|| {
        ApiRejection::bad_request(format!("unknown workflow: {}", workflow_id))
    })?;
    if !config.is_user_allowed(&user.email) {
        return Err(ApiRejection::forbidden(format!(
            "user {} has no access to workflow {}",
            user.email, workflow_id
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCardRequest {
    workflow_id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "type")]
    card_type: String,
    #[serde(default)]
    value: f64,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    field_data: Map<String, Value>,
}

async fn handle_create(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateCardRequest>,
) -> Result<Json<Value>, ApiRejection> {
    let user = authenticate(&state, &headers).await?;
    check_access(&state, &body.workflow_id, &user)?;
    let config = state
        .configs
        .get(&body.workflow_id)
        .expect("access check resolved the workflow");
    if !config.types.is_empty() && !config.types.contains(&body.card_type) {
        return Err(ApiRejection::bad_request(format!(
            "unknown card type: {}",
            body.card_type
        )));
    }
    config.validate_card_fields(&body.field_data).map_err(ApiRejection::from)?;
    state
        .lov_validator
        .validate_field_data(config.as_ref(), &body.field_data, &Map::new())
        .await?;

    let now = Utc::now();
    let card = CardEntry {
        workflow_id: body.workflow_id.clone(),
        workflow_card_id: uuid::Uuid::new_v4().to_string(),
        title: body.title,
        description: body.description,
        status: DRAFT_STATUS.to_string(),
        card_type: body.card_type,
        value: body.value,
        owner: body.owner.unwrap_or_else(|| user.email.clone()),
        field_data: body.field_data,
        approval_tokens: None,
        status_since: TimestampValue::Instant(now),
        created_by: user.email.clone(),
        created_at: now,
        updated_by: user.email.clone(),
        updated_at: now,
    };
    state.cards.put_card(&card).await?;
    state.aggregator.record_write(None, Some(&card), &user).await?;
    Ok(ok(json!({ "cardId": card.workflow_card_id })))
}

async fn handle_transit(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<Value>, ApiRejection> {
    let user = authenticate(&state, &headers).await?;
    check_access(&state, &body.workflow_id, &user)?;
    let telemetry = state.engine.transit(&body, &user).await?;
    Ok(ok(serde_json::to_value(telemetry).map_err(AppError::from)?))
}

async fn handle_get(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path((workflow, card)): Path<(String, String)>,
) -> Result<Json<Value>, ApiRejection> {
    let user = authenticate(&state, &headers).await?;
    check_access(&state, &workflow, &user)?;
    let card = state.cards.get_card(&workflow, &card).await?;
    Ok(ok(serde_json::to_value(card).map_err(AppError::from)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCardRequest {
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    field_data: Map<String, Value>,
}

async fn handle_update(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path((workflow, card_id)): Path<(String, String)>,
    Json(body): Json<UpdateCardRequest>,
) -> Result<Json<Value>, ApiRejection> {
    let user = authenticate(&state, &headers).await?;
    check_access(&state, &workflow, &user)?;
    if body.fields.contains_key("status") {
        return Err(ApiRejection::bad_request(
            "status cannot be edited directly; request a transition",
        ));
    }
    let config = state
        .configs
        .get(&workflow)
        .expect("access check resolved the workflow");
    let before = state.cards.get_card(&workflow, &card_id).await?;

    let mut updated = before.clone();
    for (key, value) in &body.fields {
        match key.as_str() {
            "title" => {
                if let Some(text) = value.as_str() {
                    updated.title = text.to_string();
                }
            }
            "description" => updated.description = value.as_str().map(str::to_string),
            "type" => {
                if let Some(text) = value.as_str() {
                    updated.card_type = text.to_string();
                }
            }
            "value" => {
                if let Some(number) = value.as_f64() {
                    updated.value = number;
                }
            }
            "owner" => {
                if let Some(text) = value.as_str() {
                    updated.owner = text.to_string();
                }
            }
            other => {
                return Err(ApiRejection::bad_request(format!(
                    "unsupported top-level field: {}",
                    other
                )));
            }
        }
    }
    for (key, value) in &body.field_data {
        updated.field_data.insert(key.clone(), value.clone());
    }
    updated.updated_by = user.email.clone();
    updated.updated_at = Utc::now();

    config.validate_card_fields(&updated.field_data).map_err(ApiRejection::from)?;
    state
        .lov_validator
        .validate_field_data(config.as_ref(), &updated.field_data, &before.field_data)
        .await?;

    state.cards.put_card(&updated).await?;
    state
        .aggregator
        .record_write(Some(&before), Some(&updated), &user)
        .await?;
    Ok(ok(serde_json::to_value(updated).map_err(AppError::from)?))
}

async fn handle_delete(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path((workflow, card_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiRejection> {
    let user = authenticate(&state, &headers).await?;
    check_access(&state, &workflow, &user)?;
    let before = state.cards.get_card(&workflow, &card_id).await?;
    state.cards.delete_card(&workflow, &card_id).await?;
    state.aggregator.record_write(Some(&before), None, &user).await?;
    Ok(ok(json!({ "deleted": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveRequest {
    key: String,
    #[serde(default)]
    note: String,
    #[serde(default)]
    negative: bool,
    #[serde(default)]
    void: bool,
}

async fn handle_approve(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path((workflow, card_id)): Path<(String, String)>,
    Json(body): Json<ApproveRequest>,
) -> Result<Json<Value>, ApiRejection> {
    let user = authenticate(&state, &headers).await?;
    check_access(&state, &workflow, &user)?;
    let config = state
        .configs
        .get(&workflow)
        .expect("access check resolved the workflow");
    let before = state.cards.get_card(&workflow, &card_id).await?;
    if !approvals::can_user_approve(&user, &body.key, &before, config.as_ref()) {
        return Err(ApiRejection::forbidden(format!(
            "user {} may not approve {}",
            user.email, body.key
        )));
    }

    let mut updated = before.clone();
    let tokens = updated
        .approval_tokens
        .get_or_insert_with(Default::default)
        .entry(body.key.clone())
        .or_default();
    if body.void {
        for token in tokens.iter_mut() {
            if token.author == user.email && token.is_active() {
                token.voided = Some(true);
            }
        }
    } else {
        tokens.push(ApprovalToken {
            kind: ApprovalKind::Basic,
            author: user.email.clone(),
            date: Utc::now(),
            note: body.note,
            is_negative: body.negative,
            voided: None,
        });
    }
    updated.updated_by = user.email.clone();
    updated.updated_at = Utc::now();
    state.cards.put_card(&updated).await?;
    state
        .aggregator
        .record_write(Some(&before), Some(&updated), &user)
        .await?;
    let active = approvals::active_tokens(&updated, &body.key).len();
    Ok(ok(json!({ "key": body.key, "activeTokens": active })))
}

async fn handle_activity(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path((workflow, card_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiRejection> {
    let user = authenticate(&state, &headers).await?;
    check_access(&state, &workflow, &user)?;
    let prefix = format!("{}:{}:", workflow, card_id);
    let entries = state
        .store
        .list_prefix(ACTIVITY_COLLECTION, &prefix)
        .await
        .map_err(AppError::from)?;
    Ok(ok(Value::Array(entries)))
}

async fn handle_stats(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(workflow): Path<String>,
) -> Result<Json<Value>, ApiRejection> {
    let user = authenticate(&state, &headers).await?;
    check_access(&state, &workflow, &user)?;
    let config = state
        .configs
        .get(&workflow)
        .expect("access check resolved the workflow");
    let mut result = Map::new();
    for status in &config.statuses {
        let doc_id = Aggregator::stats_doc_id(&workflow, &status.slug);
        let doc = state
            .store
            .get(STATS_COLLECTION, &doc_id)
            .await
            .map_err(AppError::from)?;
        result.insert(status.slug.clone(), doc.unwrap_or(Value::Null));
    }
    Ok(ok(Value::Object(result)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LovInvalidateRequest {
    workflow_id: String,
    field_slug: String,
}

async fn handle_lov_invalidate(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LovInvalidateRequest>,
) -> Result<Json<Value>, ApiRejection> {
    let user = authenticate(&state, &headers).await?;
    check_access(&state, &body.workflow_id, &user)?;
    let config = state
        .configs
        .get(&body.workflow_id)
        .expect("access check resolved the workflow");
    let field = config.field(&body.field_slug).ok_or_else(|| {
        ApiRejection::bad_request(format!("unknown field: {}", body.field_slug))
    })?;
    let provider = match &field.schema {
        FieldSchema::Text {
            lov: Some(provider),
            ..
        } => provider,
        _ => {
            return Err(ApiRejection::bad_request(format!(
                "field {} has no list of values bound",
                body.field_slug
            )))
        }
    };
    let values = state.lov.list(provider, true).await?;
    Ok(ok(json!({
        "cacheKey": provider.cache_key(),
        "entries": values.len(),
    })))
}
