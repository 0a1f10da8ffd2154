//! Axum server: REST endpoints for editing and elections, WebSocket
//! streaming of election events.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use stp_election::{ElectionEvent, ElectionResult, ElectionSnapshot, PacketInFlight, WireBpdu};
use stp_topology::{NodeId, PortNumber, Topology};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::error::{Error, Result};
use crate::playback::{Playback, PlaybackStatus};
use crate::sandbox::{InitStp, Sandbox, SandboxStatus};

/// Shared application state.
///
/// Lock order is sandbox, then playback.
#[derive(Debug)]
pub struct AppState {
    sandbox: RwLock<Sandbox>,
    playback: RwLock<Playback>,
}

impl AppState {
    pub fn new(sandbox: Sandbox) -> Self {
        Self {
            sandbox: RwLock::new(sandbox),
            playback: RwLock::new(Playback::default()),
        }
    }

    /// Advance the live election one tick and the playhead by `elapsed`.
    pub async fn tick(&self, elapsed: Duration) {
        let mut sandbox = self.sandbox.write().await;
        sandbox.tick();
        let mut playback = self.playback.write().await;
        playback.sync(sandbox.run(), sandbox.base(), sandbox.events());
        playback.advance(elapsed);
    }

    /// Run a closure against the playback, brought up to date with the log.
    async fn with_playback<R>(&self, f: impl FnOnce(&mut Playback) -> R) -> R {
        let sandbox = self.sandbox.read().await;
        let mut playback = self.playback.write().await;
        playback.sync(sandbox.run(), sandbox.base(), sandbox.events());
        f(&mut playback)
    }
}

/// Sandbox server.
pub struct SandboxServer {
    state: Arc<AppState>,
    tick_pacing: Option<Duration>,
}

impl SandboxServer {
    pub fn new(config: SandboxConfig) -> Self {
        let tick_pacing = config.tick_pacing;
        Self {
            state: Arc::new(AppState::new(Sandbox::new(config))),
            tick_pacing,
        }
    }

    /// Serve an existing sandbox.
    pub fn with_sandbox(sandbox: Sandbox) -> Self {
        let tick_pacing = sandbox.config().tick_pacing;
        Self {
            state: Arc::new(AppState::new(sandbox)),
            tick_pacing,
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Build the router for the server.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index_handler))
            // Topology editing
            .route("/api/status", get(status_handler))
            .route("/api/topology", get(topology_handler))
            .route("/api/nodes", post(create_node_handler))
            .route("/api/nodes/{id}", delete(delete_node_handler))
            .route("/api/links", post(create_link_handler))
            .route("/api/links/{a}/{b}", delete(remove_link_handler))
            // Elections
            .route("/api/election/start", post(start_election_handler))
            .route("/api/election/run", post(run_election_handler))
            .route("/api/election/result", get(result_handler))
            .route("/api/election/packets", get(packets_handler))
            .route("/api/election/inject", post(inject_handler))
            .route("/api/events", get(events_handler))
            .route("/api/snapshot", get(snapshot_handler))
            // Playback of the recorded run
            .route("/api/playback", get(playback_status_handler))
            .route("/api/playback/snapshot", get(playback_snapshot_handler))
            .route("/api/playback/play", post(play_handler))
            .route("/api/playback/pause", post(pause_handler))
            .route("/api/playback/stop", post(stop_handler))
            .route("/api/playback/seek", post(seek_handler))
            .route("/api/playback/speed", post(speed_handler))
            .route("/api/playback/step", post(step_handler))
            .route("/api/playback/loop", post(loop_handler))
            .route("/ws", get(ws_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Start the background task that paces the live election.
    pub fn spawn_ticker(&self) -> Option<JoinHandle<()>> {
        let pacing = self.tick_pacing?;
        let state = self.state();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(pacing);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                state.tick(pacing).await;
            }
        }))
    }

    /// Run the server on the given port.
    pub async fn serve(self, port: u16) -> std::result::Result<(), std::io::Error> {
        let ticker = self.spawn_ticker();
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            live = ticker.is_some(),
            "STP sandbox running on http://localhost:{}", port
        );
        let served = axum::serve(listener, self.router()).await;
        if let Some(ticker) = ticker {
            ticker.abort();
        }
        served
    }
}

async fn index_handler() -> &'static str {
    "STP sandbox: REST API under /api, WebSocket at /ws\n"
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<SandboxStatus> {
    Json(state.sandbox.read().await.status())
}

async fn topology_handler(State(state): State<Arc<AppState>>) -> Json<Topology> {
    Json(state.sandbox.read().await.topology())
}

#[derive(Debug, Deserialize)]
struct CreateNodeRequest {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CreatedNode {
    id: NodeId,
}

async fn create_node_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateNodeRequest>,
) -> Result<(StatusCode, Json<CreatedNode>)> {
    let id = state.sandbox.write().await.create_node(req.x, req.y)?;
    Ok((StatusCode::CREATED, Json(CreatedNode { id })))
}

async fn delete_node_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u32>,
) -> Result<StatusCode> {
    state.sandbox.write().await.delete_node(NodeId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct LinkRequest {
    a: u32,
    b: u32,
}

/// Whether a link edit changed anything.
#[derive(Debug, Serialize, Deserialize)]
struct LinkEdit {
    changed: bool,
}

async fn create_link_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LinkRequest>,
) -> Result<Json<LinkEdit>> {
    let changed = state
        .sandbox
        .write()
        .await
        .create_link(NodeId(req.a), NodeId(req.b))?;
    Ok(Json(LinkEdit { changed }))
}

async fn remove_link_handler(
    State(state): State<Arc<AppState>>,
    Path((a, b)): Path<(u32, u32)>,
) -> Result<Json<LinkEdit>> {
    let changed = state
        .sandbox
        .write()
        .await
        .remove_link(NodeId(a), NodeId(b))?;
    Ok(Json(LinkEdit { changed }))
}

#[derive(Debug, Serialize, Deserialize)]
struct ElectionStarted {
    run: u64,
}

async fn start_election_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ElectionStarted>> {
    let run = state.sandbox.write().await.start_election()?;
    Ok(Json(ElectionStarted { run }))
}

/// Ticks a blocking run takes per hold of the sandbox lock.
const RUN_CHUNK_TICKS: u64 = 1_000;

/// Run the election to convergence without holding the sandbox for the
/// whole run: the lock is taken per chunk and the task yields in between.
async fn run_election_handler(State(state): State<Arc<AppState>>) -> Result<Json<ElectionResult>> {
    let max_ticks = state.sandbox.read().await.config().max_ticks;
    let mut taken = 0;
    loop {
        let chunk = RUN_CHUNK_TICKS.min(max_ticks - taken);
        if let Some(result) = state.sandbox.write().await.run_for(chunk)? {
            return Ok(Json(result));
        }
        taken += chunk;
        if taken >= max_ticks {
            warn!(ticks = max_ticks, "Election run hit its tick budget");
            return Err(stp_election::Error::NotConverged { ticks: max_ticks }.into());
        }
        tokio::task::yield_now().await;
    }
}

async fn result_handler(State(state): State<Arc<AppState>>) -> Result<Json<ElectionResult>> {
    Ok(Json(state.sandbox.read().await.result()?))
}

async fn packets_handler(State(state): State<Arc<AppState>>) -> Json<Vec<PacketInFlight>> {
    Json(state.sandbox.read().await.in_flight())
}

#[derive(Debug, Deserialize)]
struct InjectRequest {
    to: u32,
    port: PortNumber,
    bpdu: WireBpdu,
}

async fn inject_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InjectRequest>,
) -> Result<StatusCode> {
    state
        .sandbox
        .write()
        .await
        .inject(NodeId(req.to), req.port, req.bpdu)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    since: Option<u64>,
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<ElectionEvent>> {
    let sandbox = state.sandbox.read().await;
    Json(sandbox.events_since(query.since.unwrap_or(0)).to_vec())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotQuery {
    up_to: Option<usize>,
}

async fn snapshot_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotQuery>,
) -> Json<ElectionSnapshot> {
    Json(state.sandbox.read().await.snapshot(query.up_to))
}

async fn playback_status_handler(State(state): State<Arc<AppState>>) -> Json<PlaybackStatus> {
    Json(state.with_playback(|p| PlaybackStatus::from(&*p)).await)
}

async fn playback_snapshot_handler(State(state): State<Arc<AppState>>) -> Json<ElectionSnapshot> {
    Json(state.with_playback(|p| p.snapshot()).await)
}

async fn play_handler(State(state): State<Arc<AppState>>) -> Json<PlaybackStatus> {
    Json(
        state
            .with_playback(|p| {
                p.play();
                PlaybackStatus::from(&*p)
            })
            .await,
    )
}

async fn pause_handler(State(state): State<Arc<AppState>>) -> Json<PlaybackStatus> {
    Json(
        state
            .with_playback(|p| {
                p.pause();
                PlaybackStatus::from(&*p)
            })
            .await,
    )
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> Json<PlaybackStatus> {
    Json(
        state
            .with_playback(|p| {
                p.stop();
                PlaybackStatus::from(&*p)
            })
            .await,
    )
}

/// Seek by event index or by virtual time.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeekRequest {
    index: Option<usize>,
    time_ms: Option<u64>,
}

async fn seek_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SeekRequest>,
) -> Result<Json<PlaybackStatus>> {
    let status = state
        .with_playback(|p| {
            match (req.index, req.time_ms) {
                (Some(index), None) => p.seek(index),
                (None, Some(time_ms)) => p.seek_time(time_ms),
                _ => {
                    return Err(Error::InvalidRequest(
                        "seek needs exactly one of index or timeMs".into(),
                    ))
                }
            }
            Ok(PlaybackStatus::from(&*p))
        })
        .await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
struct SpeedRequest {
    speed: f64,
}

async fn speed_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SpeedRequest>,
) -> Result<Json<PlaybackStatus>> {
    let status = state
        .with_playback(|p| {
            p.set_speed(req.speed)?;
            Ok::<_, Error>(PlaybackStatus::from(&*p))
        })
        .await?;
    Ok(Json(status))
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StepDirection {
    Forward,
    Backward,
}

#[derive(Debug, Deserialize)]
struct StepRequest {
    direction: StepDirection,
}

async fn step_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StepRequest>,
) -> Json<PlaybackStatus> {
    Json(
        state
            .with_playback(|p| {
                match req.direction {
                    StepDirection::Forward => p.step_forward(),
                    StepDirection::Backward => p.step_backward(),
                };
                PlaybackStatus::from(&*p)
            })
            .await,
    )
}

#[derive(Debug, Deserialize)]
struct LoopRequest {
    enabled: bool,
}

async fn loop_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoopRequest>,
) -> Json<PlaybackStatus> {
    Json(
        state
            .with_playback(|p| {
                p.set_loop(req.enabled);
                PlaybackStatus::from(&*p)
            })
            .await,
    )
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Messages accepted over the WebSocket.
///
/// `initSTP` carries a whole topology in the browser client's format.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum WsCommand {
    #[serde(rename = "initSTP")]
    InitStp(InitStp),
    CreateNode {
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    CreateLink {
        a: u32,
        b: u32,
    },
    RemoveLink {
        a: u32,
        b: u32,
    },
    DeleteNode {
        id: u32,
    },
    StartElection,
    GetStatus,
    GetTopology,
    GetSnapshot,
    GetResult,
}

/// Messages sent over the WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum WsResponse {
    Event(ElectionEvent),
    Status(SandboxStatus),
    Topology(Topology),
    Snapshot(ElectionSnapshot),
    #[serde(rename = "result")]
    Outcome(ElectionResult),
    NodeCreated { id: NodeId },
    LinkEdited { changed: bool },
    ElectionStarted { run: u64 },
    Ok,
    Error { message: String },
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    info!("WebSocket client connected");
    let mut events = state.sandbox.read().await.subscribe();

    let topology = WsResponse::Topology(state.sandbox.read().await.topology());
    if let Err(e) = send(&mut socket, &topology).await {
        warn!("Failed to send initial topology: {}", e);
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = match serde_json::from_str::<WsCommand>(&text) {
                            Ok(command) => handle_ws_command(&state, command).await,
                            Err(e) => {
                                debug!("Unrecognized message from client: {}", e);
                                WsResponse::Error { message: format!("unrecognized message: {e}") }
                            }
                        };
                        if let Err(e) = send(&mut socket, &response).await {
                            warn!("Failed to send response: {}", e);
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if let Err(e) = send(&mut socket, &WsResponse::Event(event)).await {
                            warn!("Failed to stream event: {}", e);
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client fell behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

async fn handle_ws_command(state: &AppState, command: WsCommand) -> WsResponse {
    debug!(?command, "WebSocket command");
    match run_ws_command(state, command).await {
        Ok(response) => response,
        Err(e) => WsResponse::Error {
            message: e.to_string(),
        },
    }
}

async fn run_ws_command(state: &AppState, command: WsCommand) -> Result<WsResponse> {
    let response = match command {
        WsCommand::InitStp(init) => {
            let run = state.sandbox.write().await.import(&init)?;
            WsResponse::ElectionStarted { run }
        }
        WsCommand::CreateNode { x, y } => {
            let id = state.sandbox.write().await.create_node(x, y)?;
            WsResponse::NodeCreated { id }
        }
        WsCommand::CreateLink { a, b } => {
            let changed = state
                .sandbox
                .write()
                .await
                .create_link(NodeId(a), NodeId(b))?;
            WsResponse::LinkEdited { changed }
        }
        WsCommand::RemoveLink { a, b } => {
            let changed = state
                .sandbox
                .write()
                .await
                .remove_link(NodeId(a), NodeId(b))?;
            WsResponse::LinkEdited { changed }
        }
        WsCommand::DeleteNode { id } => {
            state.sandbox.write().await.delete_node(NodeId(id))?;
            WsResponse::Ok
        }
        WsCommand::StartElection => {
            let run = state.sandbox.write().await.start_election()?;
            WsResponse::ElectionStarted { run }
        }
        WsCommand::GetStatus => WsResponse::Status(state.sandbox.read().await.status()),
        WsCommand::GetTopology => WsResponse::Topology(state.sandbox.read().await.topology()),
        WsCommand::GetSnapshot => WsResponse::Snapshot(state.sandbox.read().await.snapshot(None)),
        WsCommand::GetResult => WsResponse::Outcome(state.sandbox.read().await.result()?),
    };
    Ok(response)
}

async fn send(socket: &mut WebSocket, response: &WsResponse) -> std::result::Result<(), axum::Error> {
    let json = serde_json::to_string(response).map_err(axum::Error::new)?;
    socket.send(Message::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use stp_election::ElectionConfig;

    fn state() -> Arc<AppState> {
        let fast = ElectionConfig::fast();
        let window = fast.reelection_interval * 2;
        let config = SandboxConfig::default()
            .with_election(fast.with_quiescence_window(window))
            .with_tick_pacing(None);
        SandboxServer::new(config).state()
    }

    async fn node(state: &Arc<AppState>) -> NodeId {
        let (status, Json(created)) = create_node_handler(
            State(state.clone()),
            Json(CreateNodeRequest { x: 0.0, y: 0.0 }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        created.id
    }

    async fn link(state: &Arc<AppState>, a: NodeId, b: NodeId) -> bool {
        let Json(edit) = create_link_handler(State(state.clone()), Json(LinkRequest { a: a.0, b: b.0 }))
            .await
            .unwrap();
        edit.changed
    }

    fn budgeted_triangle_state(max_ticks: u64) -> Arc<AppState> {
        let fast = ElectionConfig::fast();
        let window = fast.reelection_interval * 2;
        let config = SandboxConfig::default()
            .with_election(fast.with_quiescence_window(window))
            .with_tick_pacing(None)
            .with_max_ticks(max_ticks);
        let mut sandbox = Sandbox::new(config);
        for _ in 0..3 {
            sandbox.create_node(0.0, 0.0).unwrap();
        }
        for (a, b) in [(2, 3), (3, 4), (2, 4)] {
            sandbox.create_link(NodeId(a), NodeId(b)).unwrap();
        }
        sandbox.start_election().unwrap();
        Arc::new(AppState::new(sandbox))
    }

    #[tokio::test]
    async fn run_election_spans_several_chunks() {
        let state = budgeted_triangle_state(RUN_CHUNK_TICKS * 5);
        let Json(result) = run_election_handler(State(state.clone())).await.unwrap();
        assert!(result.converged);
        assert!(result.time_ms > RUN_CHUNK_TICKS);
        assert_eq!(result.root_nodes(), vec![NodeId(2)]);
        assert!(state.sandbox.try_write().is_ok());
    }

    #[tokio::test]
    async fn run_election_reports_an_exhausted_budget() {
        let state = budgeted_triangle_state(200);
        let error = run_election_handler(State(state.clone())).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Election(stp_election::Error::NotConverged { ticks: 200 })
        ));
        assert_eq!(state.sandbox.read().await.status().time_ms, 200);
    }

    #[test]
    fn router_builds() {
        let server = SandboxServer::new(SandboxConfig::default());
        let _router = server.router();
    }

    #[tokio::test]
    async fn chain_elects_the_first_node() {
        let state = state();
        let a = node(&state).await;
        let b = node(&state).await;
        let c = node(&state).await;
        assert!(link(&state, a, b).await);
        assert!(link(&state, b, c).await);
        assert!(!link(&state, c, b).await);

        let Json(started) = start_election_handler(State(state.clone())).await.unwrap();
        assert_eq!(started.run, 1);
        let Json(result) = run_election_handler(State(state.clone())).await.unwrap();
        assert_eq!(result.root_nodes(), vec![NodeId(2)]);
        let four = result.node(NodeId(4)).unwrap();
        assert_eq!((four.hop_count, four.next_hop, four.upstream), (2, NodeId(2), Some(NodeId(3))));

        let Json(status) = status_handler(State(state.clone())).await;
        assert!(status.converged);
        assert_eq!(status.roots, vec![NodeId(2)]);
    }

    #[tokio::test]
    async fn unknown_node_is_404() {
        let state = state();
        let err = delete_node_handler(State(state.clone()), Path(77)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn result_before_start_is_conflict() {
        let err = result_handler(State(state())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn malformed_inject_is_rejected() {
        let state = state();
        let a = node(&state).await;
        let b = node(&state).await;
        link(&state, a, b).await;
        start_election_handler(State(state.clone())).await.unwrap();

        let req = InjectRequest {
            to: a.0,
            port: 0,
            bpdu: WireBpdu {
                root_id: 2,
                hop_count: -1,
                next_hop: 2,
            },
        };
        let err = inject_handler(State(state.clone()), Json(req)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn events_since_and_ticks() {
        let state = state();
        let a = node(&state).await;
        let b = node(&state).await;
        link(&state, a, b).await;
        start_election_handler(State(state.clone())).await.unwrap();
        for _ in 0..10 {
            state.tick(Duration::from_millis(1)).await;
        }

        let Json(all) = events_handler(State(state.clone()), Query(EventsQuery { since: None })).await;
        assert!(all.len() > 4);
        let Json(tail) =
            events_handler(State(state.clone()), Query(EventsQuery { since: Some(4) })).await;
        assert_eq!(tail.len(), all.len() - 4);
        assert_eq!(tail[0].seq, 4);
    }

    #[tokio::test]
    async fn playback_follows_the_log() {
        let state = state();
        let a = node(&state).await;
        let b = node(&state).await;
        link(&state, a, b).await;
        start_election_handler(State(state.clone())).await.unwrap();
        run_election_handler(State(state.clone())).await.unwrap();

        let Json(status) = playback_status_handler(State(state.clone())).await;
        assert_eq!(status.run, 1);
        assert!(status.total > 0);
        assert_eq!(status.cursor, 0);

        let Json(status) = seek_handler(
            State(state.clone()),
            Json(SeekRequest { index: Some(status.total), time_ms: None }),
        )
        .await
        .unwrap();
        assert_eq!(status.cursor, status.total);

        let Json(snapshot) = playback_snapshot_handler(State(state.clone())).await;
        assert_eq!(snapshot.roots, vec![NodeId(2)]);

        let bad = seek_handler(
            State(state.clone()),
            Json(SeekRequest { index: Some(1), time_ms: Some(1) }),
        )
        .await;
        assert!(bad.is_err());
    }

    #[test]
    fn playback_speed_validation() {
        tokio_test::block_on(async {
            let state = state();
            let ok = speed_handler(State(state.clone()), Json(SpeedRequest { speed: 4.0 })).await;
            assert_eq!(ok.unwrap().0.speed, 4.0);
            let bad = speed_handler(State(state.clone()), Json(SpeedRequest { speed: -1.0 })).await;
            assert!(bad.is_err());
        });
    }

    #[test]
    fn parses_the_browser_init_message() {
        let text = r#"{"type":"initSTP","data":{"nodes":[
            {"id":2,"x":100,"y":50,"rootId":2,"hopCount":0,"nextHop":2,"ports":[]},
            {"id":3,"x":200,"y":50,"rootId":3,"hopCount":0,"nextHop":3,"ports":[{"targetId":2,"portNumber":0,"status":"Blocked"}]}
        ],"links":[{"sourceId":2,"targetId":3}]}}"#;
        let command: WsCommand = serde_json::from_str(text).unwrap();
        let WsCommand::InitStp(init) = command else {
            panic!("expected initSTP, got {command:?}");
        };
        assert_eq!(init.nodes.len(), 2);
        assert_eq!(init.links.len(), 1);

        let start: WsCommand = serde_json::from_str(r#"{"type":"start_election"}"#).unwrap();
        assert!(matches!(start, WsCommand::StartElection));
        let create: WsCommand =
            serde_json::from_str(r#"{"type":"create_link","data":{"a":2,"b":3}}"#).unwrap();
        assert!(matches!(create, WsCommand::CreateLink { a: 2, b: 3 }));
    }

    #[tokio::test]
    async fn ws_commands_drive_the_sandbox() {
        let state = state();
        let init = InitStp {
            nodes: vec![],
            links: vec![],
        };
        let response = handle_ws_command(&state, WsCommand::InitStp(init)).await;
        assert!(matches!(response, WsResponse::ElectionStarted { run: 1 }));

        let response = handle_ws_command(&state, WsCommand::CreateNode { x: 1.0, y: 2.0 }).await;
        assert!(matches!(response, WsResponse::NodeCreated { id: NodeId(2) }));

        let response = handle_ws_command(&state, WsCommand::CreateLink { a: 2, b: 9 }).await;
        let WsResponse::Error { message } = response else {
            panic!("expected an error, got {response:?}");
        };
        assert!(message.contains('9'));

        let json = serde_json::to_value(&handle_ws_command(&state, WsCommand::GetResult).await).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["data"]["nodes"]["2"]["rootId"], 2);
    }

    #[tokio::test]
    async fn subscribers_receive_ticks() {
        let state = state();
        let a = node(&state).await;
        let b = node(&state).await;
        link(&state, a, b).await;
        let mut rx = state.sandbox.read().await.subscribe();
        start_election_handler(State(state.clone())).await.unwrap();
        state.tick(Duration::from_millis(1)).await;

        let mut seen = 0;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.seq, seen);
            seen += 1;
        }
        assert!(seen > 0);
    }
}
