//! Request handlers for the broker webhooks, the publish bridge and the
//! batch ledger.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;

use crate::logging::structured::LogContext;
use crate::pipeline::admission::TelemetryAdmission;
use crate::pipeline::batch::{BatchLedger, BatchProgress};
use crate::pipeline::context::{MessageContext, Transport};
use crate::routing::topic::{classify_topic, TopicKind};
use crate::security::acl::{AclEngine, AclRequest};
use crate::security::auth::BrokerAuthEngine;
use crate::security::decision::{Access, Decision};
use crate::storage::traits::ImageIngestor;

use super::error::ApiError;

/// Header carrying the bridge's shared secret.
pub const PUBLISH_SECRET_HEADER: &str = "x-publish-secret";

/// Everything the handlers need, shared across requests.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<BrokerAuthEngine>,
    pub acl: Arc<AclEngine>,
    pub admission: Arc<TelemetryAdmission>,
    pub ledger: Arc<BatchLedger>,
    pub images: Arc<dyn ImageIngestor>,
    pub publish_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub result: String,
}

impl From<&Decision> for WebhookResponse {
    fn from(decision: &Decision) -> Self {
        Self {
            result: decision.as_str().to_string(),
        }
    }
}

impl WebhookResponse {
    fn deny() -> Self {
        Self {
            result: "deny".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthRequest {
    pub username: Option<String>,
    pub password: Option<String>,
    pub clientid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AclQuery {
    pub username: Option<String>,
    pub clientid: Option<String>,
    pub topic: Option<String>,
    pub access: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResponse {
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PublishResponse {
    fn accepted() -> Self {
        Self {
            result: "accepted".to_string(),
            reason: None,
        }
    }

    fn rejected(reason: String) -> Self {
        Self {
            result: "rejected".to_string(),
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenBatchRequest {
    pub device_id: String,
    pub total_count: u64,
}

#[derive(Debug, Serialize)]
pub struct OpenBatchResponse {
    pub batch_id: String,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub batch_id: String,
    pub purge: bool,
}

pub async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn auth(State(state): State<AppState>, Json(request): Json<AuthRequest>) -> Json<WebhookResponse> {
    let ctx = LogContext::generate();
    let decision = state
        .auth
        .authenticate(
            request.username.as_deref(),
            request.password.as_deref(),
            request.clientid.as_deref(),
            &ctx,
        )
        .await;
    Json(WebhookResponse::from(&decision))
}

/// Access may arrive as a name or as the broker's numeric code.
fn parse_access(raw: &Value) -> Option<Access> {
    match raw {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

pub async fn acl(State(state): State<AppState>, Json(query): Json<AclQuery>) -> Json<WebhookResponse> {
    let ctx = LogContext::generate();
    let client_id = query.clientid.as_deref().filter(|c| !c.is_empty());
    let topic = query.topic.as_deref().filter(|t| !t.is_empty());
    let access = query.access.as_ref().and_then(parse_access);

    let (Some(client_id), Some(topic), Some(access)) = (client_id, topic, access) else {
        log::warn!(
            "{} ACL_DENY reason=missing_fields client_id={:?} topic={:?} access={:?}",
            ctx,
            query.clientid,
            query.topic,
            query.access
        );
        return Json(WebhookResponse::deny());
    };

    let request = AclRequest {
        username: query.username.as_deref(),
        client_id,
        topic,
        access,
    };
    let decision = state.acl.authorize(request, &ctx).await;
    Json(WebhookResponse::from(&decision))
}

/// No superuser channel is exposed over the webhook.
pub async fn superuser() -> Json<WebhookResponse> {
    Json(WebhookResponse::deny())
}

fn secret_matches(expected: &str, headers: &HeaderMap) -> bool {
    let Some(provided) = headers.get(PUBLISH_SECRET_HEADER) else {
        return false;
    };
    let provided = provided.as_bytes();
    provided.len() == expected.len() && bool::from(provided.ct_eq(expected.as_bytes()))
}

/// Bridges sometimes forward the MQTT payload as a JSON string.
fn decode_payload(payload: Value) -> Result<Value, ApiError> {
    match payload {
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| ApiError::BadRequest(format!("payload is not JSON: {}", e))),
        other => Ok(other),
    }
}

async fn admit(state: &AppState, topic: &str, payload: &Value, transport: Transport) -> PublishResponse {
    let msg = MessageContext::new(topic, transport);
    match state.admission.admit(&msg, payload).await {
        Ok(_) => PublishResponse::accepted(),
        Err(rejection) => PublishResponse::rejected(rejection.reason()),
    }
}

pub async fn publish(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let ctx = LogContext::generate();
    if let Some(expected) = state.publish_secret.as_deref() {
        if !secret_matches(expected, &headers) {
            log::warn!("{} PUBLISH_UNAUTHORIZED topic={}", ctx, request.topic);
            return Err(ApiError::Unauthorized);
        }
    }

    let payload = decode_payload(request.payload)?;
    match classify_topic(&request.topic) {
        TopicKind::Telemetry => Ok(Json(
            admit(&state, &request.topic, &payload, Transport::Mqtt).await,
        )),
        TopicKind::Image => {
            state
                .images
                .ingest(&request.topic, &payload)
                .await
                .map_err(|e| ApiError::Internal(format!("image ingestion: {}", e)))?;
            log::info!("{} IMAGE_FORWARDED topic={}", ctx, request.topic);
            Ok(Json(PublishResponse::accepted()))
        }
        TopicKind::Other => {
            log::warn!("{} PUBLISH_UNROUTABLE topic={}", ctx, request.topic);
            Err(ApiError::BadRequest(format!(
                "no route for topic {}",
                request.topic
            )))
        }
    }
}

/// Telemetry over HTTP lands in the same admission pipeline as MQTT.
pub async fn telemetry(
    State(state): State<AppState>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let payload = decode_payload(request.payload)?;
    Ok(Json(
        admit(&state, &request.topic, &payload, Transport::Http).await,
    ))
}

pub async fn open_batch(
    State(state): State<AppState>,
    Json(request): Json<OpenBatchRequest>,
) -> Result<(StatusCode, Json<OpenBatchResponse>), ApiError> {
    let ctx = LogContext::generate().with_subject(&request.device_id);
    let batch_id = state
        .ledger
        .open(&request.device_id, request.total_count, &ctx)
        .await?;
    Ok((StatusCode::CREATED, Json(OpenBatchResponse { batch_id })))
}

pub async fn mark_processed(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchProgress>, ApiError> {
    let ctx = LogContext::generate();
    Ok(Json(state.ledger.mark_processed(&batch_id, &ctx).await?))
}

pub async fn batch_progress(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchProgress>, ApiError> {
    Ok(Json(state.ledger.progress(&batch_id).await?))
}

pub async fn batch_purge(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<PurgeResponse>, ApiError> {
    let ctx = LogContext::generate();
    let purge = state.ledger.can_purge(&batch_id, &ctx).await?;
    Ok(Json(PurgeResponse { batch_id, purge }))
}
