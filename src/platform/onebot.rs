use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{OneBotConfig, PluginConfig};
use crate::error::ActionError;
use crate::handler::PixivHandler;
use crate::platform::{ActionCaller, ChatEvent};

/// OneBot v11 action client over HTTP.
pub struct OneBotClient {
    client: reqwest::Client,
    config: OneBotConfig,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    wording: Option<String>,
}

impl OneBotClient {
    pub fn new(config: OneBotConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, action: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), action)
    }
}

#[async_trait]
impl ActionCaller for OneBotClient {
    async fn call(&self, action: &str, params: Value) -> Result<Value, ActionError> {
        let mut request = self
            .client
            .post(self.url(action))
            .timeout(Duration::from_secs(self.config.action_timeout_secs))
            .json(&params);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }
        debug!("OneBot action {}", action);

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ActionError::Status(status.as_u16()));
        }

        let body: ActionResponse = response.json().await?;
        // retcode 1 is "queued" (status=async) and counts as accepted.
        if body.status == "failed" || !(body.retcode == 0 || body.retcode == 1) {
            return Err(ActionError::Rejected {
                retcode: body.retcode,
                message: body.wording.or(body.msg).unwrap_or_default(),
            });
        }
        Ok(body.data)
    }
}

#[derive(Clone)]
struct WebhookState {
    handler: Arc<PixivHandler>,
    access_token: Option<String>,
}

impl WebhookState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.access_token else {
            return true;
        };
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|v| v == token)
    }
}

/// Event webhook plus the runtime config endpoints.
pub fn router(handler: Arc<PixivHandler>, access_token: Option<String>) -> Router {
    Router::new()
        .route("/", post(receive_event))
        .route("/onebot", post(receive_event))
        .route(
            "/config",
            get(get_config).put(replace_config).patch(update_config),
        )
        .with_state(WebhookState {
            handler,
            access_token,
        })
}

/// Acknowledge immediately and handle the event in its own task.
async fn receive_event(State(state): State<WebhookState>, Json(payload): Json<Value>) -> StatusCode {
    let event: ChatEvent = match serde_json::from_value(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!("Ignoring undecodable OneBot event: {}", e);
            return StatusCode::NO_CONTENT;
        }
    };
    if !event.is_message() {
        return StatusCode::NO_CONTENT;
    }

    let handler = state.handler.clone();
    tokio::spawn(async move {
        let outcome = handler.handle_event(&event).await;
        debug!("Dispatch outcome: {:?}", outcome);
    });
    StatusCode::NO_CONTENT
}

async fn get_config(
    State(state): State<WebhookState>,
    headers: HeaderMap,
) -> Result<Json<PluginConfig>, StatusCode> {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json((*state.handler.config().snapshot().await).clone()))
}

async fn replace_config(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(config): Json<PluginConfig>,
) -> Result<Json<PluginConfig>, StatusCode> {
    if !state.authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    state.handler.config().replace(config.clone()).await;
    info!("Plugin config replaced");
    Ok(Json(config))
}

async fn update_config(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> Result<Json<PluginConfig>, (StatusCode, String)> {
    if !state.authorized(&headers) {
        return Err((StatusCode::UNAUTHORIZED, "unauthorized".to_string()));
    }
    match state.handler.config().merge(patch).await {
        Ok(config) => {
            info!("Plugin config updated");
            Ok(Json((*config).clone()))
        }
        Err(e) => Err((StatusCode::BAD_REQUEST, format!("{:#}", e))),
    }
}

/// Serve the webhook until the process is stopped.
pub async fn run(handler: Arc<PixivHandler>, config: &OneBotConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Listening for OneBot events on {}", config.listen);

    axum::serve(listener, router(handler, config.access_token.clone()))
        .await
        .context("OneBot webhook server stopped")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigHandle;
    use crate::delivery::Jitter;
    use crate::probe::HttpProbe;
    use crate::source::LoliconClient;
    use axum::http::HeaderValue;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::ServerGuard, token: Option<&str>) -> OneBotClient {
        OneBotClient::new(OneBotConfig {
            api_base: format!("{}/", server.url()),
            access_token: token.map(str::to_string),
            ..Default::default()
        })
    }

    fn state(token: Option<&str>) -> WebhookState {
        let config = crate::config::Config::default();
        let handler = PixivHandler::new(
            ConfigHandle::new(PluginConfig::default()),
            Arc::new(LoliconClient::new(config.source.clone())),
            Arc::new(HttpProbe::new(&config.source)),
            Arc::new(OneBotClient::new(config.onebot.clone())),
            Jitter::NONE,
        );
        WebhookState {
            handler: Arc::new(handler),
            access_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_call_posts_json_with_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/send_msg")
            .match_header("authorization", "Bearer t0ken")
            .match_body(Matcher::PartialJson(json!({ "message_type": "group" })))
            .with_status(200)
            .with_body(r#"{"status":"ok","retcode":0,"data":{"message_id":7}}"#)
            .create_async()
            .await;

        let data = client_for(&server, Some("t0ken"))
            .call(
                "send_msg",
                json!({ "message": "hi", "message_type": "group", "group_id": "1" }),
            )
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(data, json!({ "message_id": 7 }));
    }

    #[tokio::test]
    async fn test_failed_status_is_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/send_forward_msg")
            .with_status(200)
            .with_body(r#"{"status":"failed","retcode":1404,"data":null,"wording":"不支持的Api"}"#)
            .create_async()
            .await;
        let _missing = server
            .mock("POST", "/send_group_forward_msg")
            .with_status(404)
            .create_async()
            .await;

        let client = client_for(&server, None);
        match client.call("send_forward_msg", json!({})).await {
            Err(ActionError::Rejected { retcode, message }) => {
                assert_eq!(retcode, 1404);
                assert_eq!(message, "不支持的Api");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            client.call("send_group_forward_msg", json!({})).await,
            Err(ActionError::Status(404))
        ));
    }

    #[test]
    fn test_config_endpoints_require_token_when_set() {
        let mut headers = HeaderMap::new();
        assert!(state(None).authorized(&headers));
        assert!(!state(Some("abc")).authorized(&headers));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(state(Some("abc")).authorized(&headers));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(!state(Some("abc")).authorized(&headers));
    }

    #[tokio::test]
    async fn test_update_config_endpoint_merges() {
        let state = state(None);
        let Json(updated) = update_config(
            State(state.clone()),
            HeaderMap::new(),
            Json(json!({ "commandPrefix": "/px" })),
        )
        .await
        .unwrap();
        assert_eq!(updated.command_prefix, "/px");

        let Json(current) = get_config(State(state.clone()), HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(current, updated);

        let rejected = update_config(
            State(state),
            HeaderMap::new(),
            Json(json!({ "maxResults": "many" })),
        )
        .await;
        assert!(matches!(rejected, Err((StatusCode::BAD_REQUEST, _))));
    }

    #[tokio::test]
    async fn test_non_message_events_are_acknowledged() {
        let status = receive_event(
            State(state(None)),
            Json(json!({ "post_type": "meta_event", "meta_event_type": "heartbeat" })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }
}
