use std::collections::HashMap;
use std::sync::Arc;

use application::RuleLookupKey;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use domain::device::{Device, DeviceKind};
use domain::error::EngineError;
use domain::rule::Rule;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors(&state.config.cors.allowed_origins);

    Router::new()
        .route("/api/healthz", get(healthz))
        .route(
            "/api/engine/devices",
            get(list_devices).post(add_device),
        )
        .route(
            "/api/engine/devices/command",
            axum::routing::post(execute_command),
        )
        .route(
            "/api/engine/devices/{id}",
            get(get_device).put(update_device).delete(delete_device),
        )
        .route("/api/engine/status/sensors", get(status_sensors))
        .route("/api/engine/status/actuators", get(status_actuators))
        .route("/api/engine/status/device/{id}", get(status_device))
        .route("/api/engine/status/all", get(status_all))
        .route("/api/engine/dashboard/status", get(dashboard_status))
        .route("/api/engine/rules", get(list_rules).post(add_rule))
        .route(
            "/api/engine/rules/{ident}",
            get(get_rule).put(update_rule).delete(delete_rule),
        )
        .route("/api/engine/commands/history", get(commands_history))
        .layer(cors)
        .with_state(state)
}

fn build_cors(allowed_origins: &Option<Vec<String>>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match allowed_origins {
        None => layer.allow_origin(Any),
        Some(origins) if origins.iter().any(|o| o == "*") => layer.allow_origin(Any),
        Some(origins) => {
            let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            layer.allow_origin(AllowOrigin::list(parsed))
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Wraps a successful payload in the `{code, message, data}` envelope.
/// Idempotent: if `data` already looks like an envelope (has `code`,
/// `message`, and `data` keys), it is passed through unchanged rather than
/// nested a second time.
fn envelope(status: StatusCode, message: &str, data: Value) -> (StatusCode, Json<Value>) {
    if is_already_enveloped(&data) {
        return (status, Json(data));
    }
    (
        status,
        Json(json!({
            "code": status.as_u16(),
            "message": message,
            "data": data,
        })),
    )
}

fn is_already_enveloped(value: &Value) -> bool {
    matches!(
        value,
        Value::Object(map)
            if map.contains_key("code") && map.contains_key("message") && map.contains_key("data")
    )
}

fn ok(data: Value) -> (StatusCode, Json<Value>) {
    envelope(StatusCode::OK, "OK", data)
}

/// Newtype so `EngineError` can implement `IntoResponse` without running
/// afoul of the orphan rule; renders the same `{code, message, data:null}`
/// envelope every error path uses, per the error-kind to HTTP-status table.
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            EngineError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            EngineError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            EngineError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            EngineError::Io(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            EngineError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        envelope(status, &message, Value::Null).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn device_to_value(id: &str, device: &Device) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(device)
        .map_err(|e| EngineError::Internal(format!("serializing device: {e}")))?;
    if let Value::Object(ref mut map) = value {
        map.insert("device_id".to_string(), json!(id));
    }
    Ok(value)
}

fn devices_to_object(devices: HashMap<String, Device>) -> Result<Value, ApiError> {
    let mut out = serde_json::Map::with_capacity(devices.len());
    for (id, device) in &devices {
        out.insert(id.clone(), device_to_value(id, device)?);
    }
    Ok(Value::Object(out))
}

async fn list_devices(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let registry = state.device_registry()?;
    let devices = registry.list().await;
    Ok(ok(devices_to_object(devices)?))
}

async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let registry = state.device_registry()?;
    let device = registry.get(&id).await?;
    Ok(ok(device_to_value(&id, &device)?))
}

fn extract_device_id(body: &Value) -> Result<String, ApiError> {
    body.get("device_id")
        .or_else(|| body.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError(EngineError::Validation("device_id is required".into())))
}

async fn add_device(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let registry = state.device_registry()?;
    let device_id = extract_device_id(&body)?;
    let mut device: Device = serde_json::from_value(body)
        .map_err(|e| EngineError::Validation(format!("invalid device: {e}")))?;
    device.device_id = device_id.clone();
    let stored = registry.add(device).await?;
    Ok((
        StatusCode::CREATED,
        envelope(
            StatusCode::CREATED,
            "created",
            device_to_value(&device_id, &stored)?,
        )
        .1,
    ))
}

async fn update_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let registry = state.device_registry()?;
    let updated = registry.update(&id, patch).await?;
    Ok(ok(device_to_value(&id, &updated)?))
}

async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let registry = state.device_registry()?;
    registry.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ExecuteCommandRequest {
    device_id: String,
    command: String,
    #[serde(default)]
    params: HashMap<String, Value>,
}

async fn execute_command(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ExecuteCommandRequest>,
) -> ApiResult<impl IntoResponse> {
    let registry = state.device_registry()?;
    let bus_client = state.bus_client()?;
    let (topic, payload) = registry
        .resolve_command(&req.device_id, &req.command, &req.params)
        .await?;
    bus_client
        .publish(
            &topic,
            payload.clone(),
            infrastructure::QoS::AtLeastOnce,
            false,
            domain::command::CommandSource::Api,
        )
        .await?;
    Ok(ok(json!({ "topic": topic, "payload": payload })))
}

fn state_entry_value(entry: Option<domain::state::StateEntry>) -> Value {
    match entry {
        Some(entry) => json!({ "timestamp": entry.timestamp, "state": entry.state_fields }),
        None => json!({ "timestamp": null, "state": {} }),
    }
}

async fn status_sensors(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let cache = state.state_cache()?;
    let entries = cache.by_type(DeviceKind::Sensor).await;
    let data: serde_json::Map<String, Value> = entries
        .into_iter()
        .map(|(id, entry)| (id, state_entry_value(entry)))
        .collect();
    Ok(ok(Value::Object(data)))
}

async fn status_actuators(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let cache = state.state_cache()?;
    let entries = cache.by_type(DeviceKind::Actuator).await;
    let data: serde_json::Map<String, Value> = entries
        .into_iter()
        .map(|(id, entry)| (id, state_entry_value(entry)))
        .collect();
    Ok(ok(Value::Object(data)))
}

async fn status_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let registry = state.device_registry()?;
    let cache = state.state_cache()?;
    registry.get(&id).await?;
    Ok(ok(state_entry_value(cache.get(&id))))
}

async fn status_all(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let cache = state.state_cache()?;
    let entries = cache.all();
    let data: serde_json::Map<String, Value> = entries
        .into_iter()
        .map(|(id, entry)| (id, state_entry_value(Some(entry))))
        .collect();
    Ok(ok(Value::Object(data)))
}

async fn dashboard_status(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let registry = state.device_registry()?;
    let cache = state.state_cache()?;
    let devices = registry.list().await;

    let mut out = serde_json::Map::with_capacity(devices.len());
    for (id, device) in &devices {
        let entry = cache.get(id);
        let current_state = entry.as_ref().map(|e| e.state_fields.clone()).unwrap_or(json!({}));
        let last_updated = entry.as_ref().map(|e| json!(e.timestamp)).unwrap_or(Value::Null);
        out.insert(
            id.clone(),
            json!({
                "definition": device_to_value(id, device)?,
                "current_state": current_state,
                "last_updated": last_updated,
            }),
        );
    }

    Ok(ok(json!({ "timestamp": Utc::now(), "devices": Value::Object(out) })))
}

#[derive(Deserialize)]
struct LookupQuery {
    #[serde(default)]
    by: Option<String>,
}

fn lookup_key(query: &LookupQuery) -> RuleLookupKey {
    match query.by.as_deref() {
        Some("name") => RuleLookupKey::Name,
        _ => RuleLookupKey::Id,
    }
}

async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let store = state.rule_store()?;
    let rules = store.list().await;
    let data = serde_json::to_value(rules)
        .map_err(|e| EngineError::Internal(format!("serializing rules: {e}")))?;
    Ok(ok(data))
}

async fn get_rule(
    State(state): State<Arc<AppState>>,
    Path(ident): Path<String>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<impl IntoResponse> {
    let store = state.rule_store()?;
    let rule = store.get(&ident, lookup_key(&query)).await?;
    let data = serde_json::to_value(rule)
        .map_err(|e| EngineError::Internal(format!("serializing rule: {e}")))?;
    Ok(ok(data))
}

async fn add_rule(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<Rule>,
) -> ApiResult<impl IntoResponse> {
    let store = state.rule_store()?;
    let stored = store.add(rule).await?;
    let data = serde_json::to_value(stored)
        .map_err(|e| EngineError::Internal(format!("serializing rule: {e}")))?;
    Ok((StatusCode::CREATED, envelope(StatusCode::CREATED, "created", data).1))
}

async fn update_rule(
    State(state): State<Arc<AppState>>,
    Path(ident): Path<String>,
    Query(query): Query<LookupQuery>,
    Json(rule): Json<Rule>,
) -> ApiResult<impl IntoResponse> {
    let store = state.rule_store()?;
    let updated = store.modify(&ident, lookup_key(&query), rule).await?;
    let data = serde_json::to_value(updated)
        .map_err(|e| EngineError::Internal(format!("serializing rule: {e}")))?;
    Ok(ok(data))
}

async fn delete_rule(
    State(state): State<Arc<AppState>>,
    Path(ident): Path<String>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<impl IntoResponse> {
    let store = state.rule_store()?;
    store.delete(&ident, lookup_key(&query)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn commands_history(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let bus_client = state.bus_client()?;
    let history = bus_client.history().await;
    let data = serde_json::to_value(history)
        .map_err(|e| EngineError::Internal(format!("serializing history: {e}")))?;
    Ok(ok(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use infrastructure::config::{AppServerConfig, CorsConfig, DatabaseConfig, MqttConfig};
    use tower::ServiceExt;

    fn bare_config() -> infrastructure::AppConfig {
        infrastructure::AppConfig {
            secret_key: "test".into(),
            jwt_secret_key: None,
            database: DatabaseConfig { uri: None },
            mqtt: MqttConfig {
                broker_host: "localhost".into(),
                broker_port: 1883,
                username: None,
                password: None,
                topic_base: "home".into(),
            },
            app: AppServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
                debug: false,
            },
            cors: CorsConfig::default(),
            admin_user: None,
        }
    }

    #[tokio::test]
    async fn healthz_returns_plain_ok() {
        let state = Arc::new(AppState::new(bare_config()));
        let router = create_router(state);
        let response = router
            .oneshot(Request::builder().uri("/api/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn devices_endpoint_returns_503_when_registry_unset() {
        let state = Arc::new(AppState::new(bare_config()));
        let router = create_router(state);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/engine/devices")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn envelope_is_idempotent() {
        let already = json!({"code": 200, "message": "OK", "data": {"a": 1}});
        let (status, Json(body)) = envelope(StatusCode::OK, "ignored", already.clone());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, already);
    }

    #[test]
    fn envelope_wraps_plain_data() {
        let (status, Json(body)) = envelope(StatusCode::OK, "OK", json!({"a": 1}));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 200);
        assert_eq!(body["data"]["a"], 1);
    }
}
