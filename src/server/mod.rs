//! HTTP and WebSocket surface over a [`Gateway`].

use crate::error::Error;
use crate::events::GatewayEvent;
use crate::gateway::Gateway;
use crate::pairing::QrChallenge;
use crate::session::StatusSnapshot;
use crate::types::AccountId;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state passed to handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub default_account: AccountId,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> crate::Result<Self> {
        let default_account = AccountId::new(gateway.config().default_account.clone())?;
        Ok(Self {
            gateway,
            default_account,
        })
    }

    fn account(&self, query: &AccountQuery) -> Result<AccountId, ApiError> {
        match &query.account {
            Some(id) => Ok(AccountId::new(id.as_str())?),
            None => Ok(self.default_account.clone()),
        }
    }
}

/// Build the router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/api/qr", get(current_qr))
        .route("/api/qr/generate", post(generate_qr))
        .route("/api/send", post(send))
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .route("/api/logout", post(logout))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve `gateway` on `listener` until `shutdown` resolves.
pub async fn serve(
    gateway: Arc<Gateway>,
    listener: TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = build_router(AppState::new(gateway)?);
    tracing::info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountQuery {
    pub account: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub to: String,
    pub message: String,
}

#[derive(Serialize)]
struct StatusBody {
    #[serde(flatten)]
    status: StatusSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    qr: Option<QrChallenge>,
}

/// Error response: `{"success": false, "error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Gateway(Error),
    BadRequest(String),
    NotFound(&'static str),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self::Gateway(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Gateway(e) => match e {
                Error::InvalidStateForQr(_) | Error::InvalidAccountId(_) | Error::InvalidAddress(_) => {
                    StatusCode::BAD_REQUEST
                }
                Error::SessionNotConnected => StatusCode::CONFLICT,
                Error::SendFailed { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Gateway(e) => e.to_string(),
            Self::BadRequest(msg) => msg.clone(),
            Self::NotFound(msg) => msg.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "accounts": state.gateway.accounts().len(),
        "subscribers": state.gateway.broadcaster().subscriber_count(),
    }))
}

async fn status(State(state): State<AppState>, Query(query): Query<AccountQuery>) -> Result<Json<StatusBody>, ApiError> {
    let account = state.account(&query)?;
    Ok(Json(StatusBody {
        status: state.gateway.get_status(&account),
        qr: state.gateway.get_qr(&account),
    }))
}

async fn current_qr(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account = state.account(&query)?;
    let qr = state
        .gateway
        .get_qr(&account)
        .ok_or(ApiError::NotFound("no QR code available"))?;
    Ok(Json(json!({
        "success": true,
        "account_id": account,
        "qr": qr.payload,
        "expires_at": qr.expires_at,
    })))
}

async fn generate_qr(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let account = state.account(&query)?;
    state.gateway.request_qr(&account).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "message": "QR code requested; it is delivered as a qr:generated event",
        })),
    ))
}

async fn send(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let account = state.account(&query)?;
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    if request.to.trim().is_empty() || request.message.is_empty() {
        return Err(ApiError::BadRequest("`to` and `message` are required".into()));
    }
    let sent = state.gateway.send(&account, &request.to, &request.message).await?;
    Ok(Json(json!({
        "success": true,
        "message_id": sent.raw_reference,
        "to": sent.to,
        "timestamp": sent.timestamp,
    })))
}

async fn start(State(state): State<AppState>, Query(query): Query<AccountQuery>) -> Result<Json<StatusSnapshot>, ApiError> {
    let account = state.account(&query)?;
    state.gateway.start(&account).await?;
    Ok(Json(state.gateway.get_status(&account)))
}

async fn stop(State(state): State<AppState>, Query(query): Query<AccountQuery>) -> Result<Json<StatusSnapshot>, ApiError> {
    let account = state.account(&query)?;
    state.gateway.stop(&account).await?;
    Ok(Json(state.gateway.get_status(&account)))
}

async fn logout(State(state): State<AppState>, Query(query): Query<AccountQuery>) -> Result<Json<StatusSnapshot>, ApiError> {
    let account = state.account(&query)?;
    state.gateway.logout(&account).await?;
    Ok(Json(state.gateway.get_status(&account)))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = match &query.account {
        Some(id) => Some(AccountId::new(id.as_str())?),
        None => None,
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, filter)))
}

/// Current state of the accounts a new subscriber is interested in.
fn catch_up(state: &AppState, filter: Option<&AccountId>) -> Vec<GatewayEvent> {
    let accounts = match filter {
        Some(account) => vec![account.clone()],
        None => {
            let mut accounts = state.gateway.accounts();
            if accounts.is_empty() {
                accounts.push(state.default_account.clone());
            }
            accounts
        }
    };
    let mut events = Vec::new();
    for account in accounts {
        events.push(GatewayEvent::ConnectionStatus(state.gateway.get_status(&account)));
        if let Some(qr) = state.gateway.get_qr(&account) {
            events.push(GatewayEvent::qr_generated(account, &qr));
        }
    }
    events
}

async fn handle_socket(socket: WebSocket, state: AppState, filter: Option<AccountId>) {
    let mut subscription = state.gateway.subscribe(filter.clone());
    let subscriber = subscription.id();
    tracing::info!(%subscriber, account = ?filter, "websocket subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    for event in catch_up(&state, filter.as_ref()) {
        if !send_event(&mut ws_tx, &event).await {
            return;
        }
    }

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                if !send_event(&mut ws_tx, &event).await {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) if text.as_str().trim() == "ping" => {
                        if ws_tx.send(WsMessage::Text("pong".into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    tracing::info!(%subscriber, "websocket subscriber disconnected");
}

async fn send_event<S>(sink: &mut S, event: &GatewayEvent) -> bool
where
    S: futures::Sink<WsMessage> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(event = event.name(), error = %e, "could not serialize event");
            return true;
        }
    };
    sink.send(WsMessage::Text(text.into())).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::session::{ConnectedUser, SessionState};
    use crate::store::MemoryStore;
    use crate::transport::LoopbackNetwork;
    use crate::types::{Jid, DEFAULT_USER_SERVER};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as ClientMessage;

    struct TestServer {
        base: String,
        port: u16,
        gateway: Arc<Gateway>,
        net: LoopbackNetwork,
    }

    async fn spawn_server() -> TestServer {
        let net = LoopbackNetwork::new();
        let gateway = Arc::new(Gateway::new(
            GatewayConfig::default().with_default_account("main"),
            Arc::new(MemoryStore::new()),
            Arc::new(net.clone()),
        ));
        let router = build_router(AppState::new(Arc::clone(&gateway)).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        TestServer {
            base: format!("http://127.0.0.1:{port}"),
            port,
            gateway,
            net,
        }
    }

    async fn wait_for_qr(server: &TestServer, account: &AccountId) -> QrChallenge {
        for _ in 0..200 {
            if let Some(qr) = server.gateway.get_qr(account) {
                return qr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no QR code for {account}");
    }

    async fn wait_for_state(server: &TestServer, account: &AccountId, state: SessionState) {
        for _ in 0..200 {
            if server.gateway.get_status(account).state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{account} never reached {state}");
    }

    #[tokio::test]
    async fn health_and_default_status() {
        let server = spawn_server().await;
        let resp = reqwest::get(format!("{}/health", server.base)).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        let body: serde_json::Value = reqwest::get(format!("{}/status", server.base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["account_id"], "main");
        assert_eq!(body["state"], "disconnected");
        assert!(body.get("qr").is_none());
    }

    #[tokio::test]
    async fn qr_flow_over_http() {
        let server = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client.get(format!("{}/api/qr", server.base)).send().await.unwrap();
        assert_eq!(resp.status(), 404);

        let resp = client
            .post(format!("{}/api/qr/generate?account=toko", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);

        let account = AccountId::new("toko").unwrap();
        let qr = wait_for_qr(&server, &account).await;
        let body: serde_json::Value = client
            .get(format!("{}/api/qr?account=toko", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["qr"], qr.payload);

        let user = ConnectedUser {
            id: Jid::new("628123", DEFAULT_USER_SERVER),
            name: "Toko".into(),
        };
        server.net.scan(&account, &qr.payload, user).unwrap();
        wait_for_state(&server, &account, SessionState::Connected).await;

        let resp = client
            .post(format!("{}/api/qr/generate?account=toko", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn send_maps_errors_to_status_codes() {
        let server = spawn_server().await;
        let client = reqwest::Client::new();
        let url = format!("{}/api/send", server.base);

        let resp = client
            .post(&url)
            .json(&json!({ "to": "628123", "message": "halo" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 409);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);

        let resp = client.post(&url).json(&json!({ "to": "628123" })).send().await.unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .post(format!("{url}?account=bad%20id"))
            .json(&json!({ "to": "628123", "message": "halo" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn send_through_connected_account() {
        let server = spawn_server().await;
        let client = reqwest::Client::new();
        let account = AccountId::new("main").unwrap();

        let resp = client.post(format!("{}/api/start", server.base)).send().await.unwrap();
        tokio_test::assert_ok!(resp.error_for_status_ref());
        let qr = wait_for_qr(&server, &account).await;
        let user = ConnectedUser {
            id: Jid::new("628999", DEFAULT_USER_SERVER),
            name: "Main".into(),
        };
        server.net.scan(&account, &qr.payload, user).unwrap();
        wait_for_state(&server, &account, SessionState::Connected).await;

        let body: serde_json::Value = client
            .post(format!("{}/api/send", server.base))
            .json(&json!({ "to": "+62 812 000", "message": "halo" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["to"], "62812000@s.whatsapp.net");
        assert_eq!(server.net.sent(&account)[0].text, "halo");

        server.net.fail_sends(&account, Some("rate limited"));
        let resp = client
            .post(format!("{}/api/send", server.base))
            .json(&json!({ "to": "62812000", "message": "lagi" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 502);

        let body: serde_json::Value = client
            .post(format!("{}/api/logout", server.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["state"], "logged_out");
    }

    #[tokio::test]
    async fn websocket_sends_snapshot_then_events() {
        let server = spawn_server().await;
        let url = format!("ws://127.0.0.1:{}/ws?account=main", server.port);
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let first: serde_json::Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(first["event"], "connection:status");
        assert_eq!(first["data"]["state"], "disconnected");

        ws.send(ClientMessage::Text("ping".into())).await.unwrap();
        let pong = ws.next().await.unwrap().unwrap();
        assert_eq!(pong.to_text().unwrap(), "pong");

        let account = AccountId::new("main").unwrap();
        server.gateway.start(&account).await.unwrap();
        let next = ws.next().await.unwrap().unwrap();
        let next: serde_json::Value = serde_json::from_str(next.to_text().unwrap()).unwrap();
        assert_eq!(next["event"], "connection:status");
        assert_eq!(next["data"]["state"], "connecting");
    }
}
