//! Gateway WebSocket server — Axum-based HTTP + WS server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use switchboard_core::{Orchestrator, SwitchboardError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clients::{ClientRegistry, outbound_queue};
use crate::protocol::{ALL_AGENTS, ClientMessage, ServerMessage, SystemInfo, TaskRequest};

/// Shared state for all WebSocket connections
#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub clients: Arc<ClientRegistry>,
    pub handler_timeout: Duration,
    pub start_time: Instant,
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<Orchestrator>, handler_timeout: Duration) -> Self {
        Self {
            orchestrator,
            clients: Arc::new(ClientRegistry::new()),
            handler_timeout,
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
        }
    }
}

/// What a single inbound message produces: a reply for the sender and,
/// optionally, an event for every connected client.
#[derive(Debug)]
pub struct Dispatch {
    pub reply: ServerMessage,
    pub broadcast: Option<ServerMessage>,
}

impl Dispatch {
    fn reply(reply: ServerMessage) -> Self {
        Self {
            reply,
            broadcast: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::reply(ServerMessage::error(message))
    }
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    /// Create a new gateway server
    pub fn new(
        bind: SocketAddr,
        orchestrator: Arc<Orchestrator>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            state: GatewayState::new(orchestrator, handler_timeout),
            bind,
        }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/status", get(status_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` is cancelled
    pub async fn serve(
        mut self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        self.state.shutdown = shutdown.clone();
        let router = self.router();
        info!("Gateway listening on {}", listener.local_addr()?);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

// ── HTTP Handlers ──

async fn status_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    axum::Json(system_info(&state).await)
}

// ── WebSocket Handler ──

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    info!("WebSocket connection from {}", addr);
    ws.on_upgrade(move |socket| handle_ws(socket, state, addr))
}

async fn handle_ws(socket: WebSocket, state: GatewayState, addr: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = outbound_queue();
    let client_id = state.clients.register(tx).await;

    // Writer task: drains this client's queue onto the socket
    let writer = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    state
        .clients
        .send_to(client_id, &ServerMessage::welcome(client_id.to_string()))
        .await;

    loop {
        let next = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            next = ws_receiver.next() => next,
        };
        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                debug!("Client {} ({}) closed the connection", client_id, addr);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("WebSocket error from {}: {}", addr, e);
                break;
            }
        };

        let dispatch = handle_message(&state, text.as_str()).await;
        deliver(&state, client_id, dispatch).await;
    }

    state.clients.unregister(client_id).await;
    // The registry held the only sender, so the writer finishes once its queue drains
    if let Err(e) = writer.await {
        error!("Writer task for client {} failed: {}", client_id, e);
    }
}

async fn deliver(state: &GatewayState, client_id: Uuid, dispatch: Dispatch) {
    if !state.clients.send_to(client_id, &dispatch.reply).await {
        debug!("Client {} went away before its reply was queued", client_id);
    }
    if let Some(event) = dispatch.broadcast {
        state.clients.broadcast(&event).await;
    }
}

/// Handle one inbound text frame, bounded by the configured handler timeout.
///
/// Task requests run to completion even when the reply times out; the
/// completion event is broadcast once the task finishes.
pub async fn handle_message(state: &GatewayState, raw: &str) -> Dispatch {
    let message = match ClientMessage::parse(raw) {
        Ok(m) => m,
        Err(e) => {
            debug!("Rejected message: {}", e);
            return Dispatch::error(e.to_string());
        }
    };

    match message {
        ClientMessage::TaskRequest(req) => handle_task_request(state, req).await,

        ClientMessage::AgentStatus(req) => {
            bounded(state, async move {
                let agent = req.agent.filter(|a| a != ALL_AGENTS);
                let agents = state.orchestrator.agent_status(agent.as_deref()).await;
                Dispatch::reply(ServerMessage::agent_status(agents))
            })
            .await
        }

        ClientMessage::MemoryQuery(query) => match query.agent.filter(|a| !a.trim().is_empty()) {
            Some(agent) => {
                bounded(state, async move {
                    let memory = state.orchestrator.memory().recall(&agent, None, None).await;
                    Dispatch::reply(ServerMessage::memory(agent, memory))
                })
                .await
            }
            None => Dispatch::error("Agent name is required for memory query"),
        },

        ClientMessage::SystemInfo => {
            bounded(state, async move {
                Dispatch::reply(ServerMessage::system_info(system_info(state).await))
            })
            .await
        }
    }
}

/// Run a read-only handler under the timeout; abandoning one midway leaves nothing behind
async fn bounded(state: &GatewayState, work: impl Future<Output = Dispatch>) -> Dispatch {
    match tokio::time::timeout(state.handler_timeout, work).await {
        Ok(dispatch) => dispatch,
        Err(_) => timed_out(state),
    }
}

fn timed_out(state: &GatewayState) -> Dispatch {
    let millis = state.handler_timeout.as_millis();
    warn!("Request handling exceeded {}ms", millis);
    Dispatch::error(format!("Request timed out after {}ms", millis))
}

async fn handle_task_request(state: &GatewayState, req: TaskRequest) -> Dispatch {
    let task = match req.task {
        Some(t) if !t.trim().is_empty() => t,
        _ => return Dispatch::error("Task input is required"),
    };
    let client_task_id = req.task_id.filter(|id| !id.is_empty());

    // Routing runs on its own task so a timeout never cuts it off between
    // the memory writes and the history update
    let orchestrator = state.orchestrator.clone();
    let text = task.clone();
    let context = req.context;
    let mut routing = tokio::spawn(async move { orchestrator.route_task(&text, context).await });

    let outcome = match tokio::time::timeout(state.handler_timeout, &mut routing).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let clients = state.clients.clone();
            tokio::spawn(async move {
                match routing.await {
                    Ok(Ok(response)) => {
                        info!(
                            "Task {} finished after its reply timed out",
                            response.task_id
                        );
                        clients
                            .broadcast(&ServerMessage::task_completed(task, response.agent))
                            .await;
                    }
                    Ok(Err(e)) => warn!("Timed-out task failed: {}", e),
                    Err(e) => error!("Timed-out task panicked: {}", e),
                }
            });
            return timed_out(state);
        }
    };

    match outcome {
        Ok(Ok(response)) => {
            let agent = response.agent.clone();
            Dispatch {
                reply: ServerMessage::task_response(client_task_id, response),
                broadcast: Some(ServerMessage::task_completed(task, agent)),
            }
        }
        Ok(Err(SwitchboardError::Validation(message))) => Dispatch::error(message),
        Ok(Err(e)) => {
            error!("Error handling task request: {}", e);
            Dispatch::error(format!("Task processing failed: {}", e))
        }
        Err(e) => {
            error!("Task routing panicked: {}", e);
            Dispatch::error(format!("Task processing failed: {}", e))
        }
    }
}

async fn system_info(state: &GatewayState) -> SystemInfo {
    SystemInfo {
        connected_clients: state.clients.count().await,
        available_agents: state.orchestrator.identities(),
        server_status: "running".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }
}
