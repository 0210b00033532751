//! # Tendermint WebSocket Source
//!
//! [`BlockSource`] over a Tendermint RPC WebSocket (`/websocket`).
//!
//! The tip comes from `status`; each requested height becomes a
//! `block_results` call tracked by request id. With `subscribe_new_blocks`
//! set, `NewBlock` events above the tip trigger `block_results` calls of
//! their own, so live blocks flow through the same feed.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::TendermintWsConfig;
use crate::domain::{Height, IngestError, RawBlock};
use crate::ports::{BlockSource, SourceConnection};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

const NEW_BLOCK_QUERY: &str = "tm.event='NewBlock'";

/// Tendermint RPC block source.
#[derive(Clone, Debug)]
pub struct TendermintWsSource {
    config: TendermintWsConfig,
}

impl TendermintWsSource {
    /// Create a source for `config`.
    pub fn new(config: TendermintWsConfig) -> Self {
        Self { config }
    }

    fn connect_error(&self, reason: impl ToString) -> IngestError {
        IngestError::Connect {
            endpoint: self.endpoint(),
            reason: reason.to_string(),
        }
    }

    async fn handshake(&self, session: &mut Session) -> Result<(WsWrite, WsRead, Height), IngestError> {
        let (stream, _) = connect_async(self.endpoint().as_str())
            .await
            .map_err(|e| self.connect_error(e))?;
        let (mut write, mut read) = stream.split();

        let status_id = session.next_id();
        send(&mut write, "status", json!({}), status_id)
            .await
            .map_err(|e| self.connect_error(e))?;

        let tip = loop {
            let message = read
                .next()
                .await
                .ok_or_else(|| self.connect_error("connection closed during handshake"))?
                .map_err(|e| self.connect_error(e))?;
            match message {
                Message::Text(text) => match classify(text.as_str()) {
                    Inbound::Response { id, result } if id == status_id => {
                        break parse_tip(&result)
                            .ok_or_else(|| self.connect_error("status carries no latest_block_height"))?;
                    }
                    Inbound::Failure { id, error } if id == status_id => {
                        return Err(self.connect_error(format!("status failed: {error}")));
                    }
                    _ => {}
                },
                Message::Ping(data) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Message::Close(_) => return Err(self.connect_error("connection closed during handshake")),
                _ => {}
            }
        };

        if self.config.subscribe_new_blocks {
            let subscribe_id = session.next_id();
            send(&mut write, "subscribe", json!({ "query": NEW_BLOCK_QUERY }), subscribe_id)
                .await
                .map_err(|e| self.connect_error(e))?;
        }

        Ok((write, read, tip))
    }
}

#[async_trait]
impl BlockSource for TendermintWsSource {
    async fn connect(
        &self,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SourceConnection, IngestError> {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let mut session = Session::default();

        let (write, read, tip) = tokio::time::timeout(timeout, self.handshake(&mut session))
            .await
            .map_err(|_| self.connect_error(format!("no status within {}s", timeout.as_secs())))??;
        session.tip = tip;
        session.live_floor = tip;
        info!(
            endpoint = %self.endpoint(),
            tip,
            live = self.config.subscribe_new_blocks,
            "[ingest] Tendermint RPC session open"
        );

        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (record_tx, record_rx) = mpsc::channel(capacity);
        let task = tokio::spawn(receive_loop(
            session,
            write,
            read,
            request_rx,
            record_tx,
            shutdown,
            timeout,
        ));

        Ok(SourceConnection {
            tip,
            requests: request_tx,
            records: record_rx,
            task,
        })
    }

    fn endpoint(&self) -> String {
        self.config.url()
    }
}

/// Per-connection bookkeeping, owned by the receive loop.
#[derive(Debug, Default)]
struct Session {
    next_id: u64,
    pending: HashMap<u64, Height>,
    tip: Height,
    /// Highest height requested because of a `NewBlock` event.
    live_floor: Height,
}

impl Session {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

async fn receive_loop(
    mut session: Session,
    mut write: WsWrite,
    mut read: WsRead,
    mut requests: mpsc::Receiver<Height>,
    records: mpsc::Sender<RawBlock>,
    mut shutdown: watch::Receiver<bool>,
    drain_timeout: Duration,
) -> Vec<Height> {
    let mut requests_open = true;
    let mut draining = false;
    let drain_deadline = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(drain_deadline);

    loop {
        if draining && session.pending.is_empty() {
            break;
        }

        tokio::select! {
            _ = shutdown.changed(), if !draining => {
                draining = true;
                drain_deadline.as_mut().reset(Instant::now() + drain_timeout);
                debug!(pending = session.pending.len(), "[ingest] Shutdown requested, draining responses");
            }
            _ = &mut drain_deadline, if draining => {
                warn!(
                    pending = session.pending.len(),
                    quiet_secs = drain_timeout.as_secs(),
                    "[ingest] Node went quiet with responses outstanding"
                );
                break;
            }
            request = requests.recv(), if requests_open && !draining => match request {
                Some(height) => {
                    if let Err(e) = request_block(&mut session, &mut write, height).await {
                        warn!(height, "[ingest] Failed to send block_results request: {}", e);
                        break;
                    }
                }
                None => requests_open = false,
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let outstanding = session.pending.len();
                    let keep_going = handle_text(
                        &mut session,
                        &mut write,
                        &records,
                        text.as_str(),
                        draining,
                    )
                    .await;
                    if !keep_going {
                        break;
                    }
                    if draining && session.pending.len() < outstanding {
                        drain_deadline.as_mut().reset(Instant::now() + drain_timeout);
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "[ingest] Node closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("[ingest] WebSocket read failed: {}", e);
                    break;
                }
                None => {
                    info!("[ingest] WebSocket stream ended");
                    break;
                }
            },
        }
    }

    let _ = write.send(Message::Close(None)).await;
    let _ = write.close().await;

    let mut unanswered: Vec<Height> = session.pending.into_values().collect();
    unanswered.sort_unstable();
    unanswered.dedup();
    debug!(unanswered = unanswered.len(), "[ingest] Tendermint RPC session closed");
    unanswered
}

/// Returns `false` once the record feed is gone or the socket is broken.
async fn handle_text(
    session: &mut Session,
    write: &mut WsWrite,
    records: &mpsc::Sender<RawBlock>,
    text: &str,
    draining: bool,
) -> bool {
    let record = match classify(text) {
        Inbound::Response { id, result } => session
            .pending
            .remove(&id)
            .map(|height| RawBlock::new(height, result)),
        Inbound::Failure { id, error } => match session.pending.remove(&id) {
            Some(height) => Some(RawBlock::rejected(height, error)),
            None => {
                warn!(id, %error, "[ingest] RPC error for untracked request");
                None
            }
        },
        Inbound::NewBlock { height } => {
            if !draining && height > session.live_floor {
                debug!(height, tip = session.tip, "[ingest] New block above tip");
                session.live_floor = height;
                if let Err(e) = request_block(session, write, height).await {
                    warn!(height, "[ingest] Failed to request live block: {}", e);
                    return false;
                }
            }
            None
        }
        Inbound::Ignored => None,
    };

    match record {
        Some(record) => records.send(record).await.is_ok(),
        None => true,
    }
}

async fn request_block(
    session: &mut Session,
    write: &mut WsWrite,
    height: Height,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let id = session.next_id();
    session.pending.insert(id, height);
    send(write, "block_results", json!({ "height": height.to_string() }), id).await
}

fn request_text(method: &str, params: Value, id: u64) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
    .to_string()
}

async fn send<S>(write: &mut S, method: &str, params: Value, id: u64) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    write.send(Message::Text(request_text(method, params, id).into())).await
}

/// A text frame, as far as the source cares.
#[derive(Debug, PartialEq)]
enum Inbound {
    /// Result for a request id.
    Response { id: u64, result: Value },
    /// JSON-RPC error for a request id.
    Failure { id: u64, error: Value },
    /// `NewBlock` subscription event.
    NewBlock { height: Height },
    /// Anything else (subscription acks, unparseable frames).
    Ignored,
}

fn classify(text: &str) -> Inbound {
    let Ok(mut message) = serde_json::from_str::<Value>(text) else {
        return Inbound::Ignored;
    };

    if let Some(height) = message
        .pointer("/result/data/value/block/header/height")
        .and_then(parse_height)
    {
        return Inbound::NewBlock { height };
    }

    let Some(id) = message.get("id").and_then(parse_id) else {
        return Inbound::Ignored;
    };
    if let Some(error) = message
        .get_mut("error")
        .map(Value::take)
        .filter(|error| !error.is_null())
    {
        return Inbound::Failure { id, error };
    }
    match message.get_mut("result").map(Value::take) {
        Some(result) => Inbound::Response { id, result },
        None => Inbound::Ignored,
    }
}

fn parse_tip(status: &Value) -> Option<Height> {
    status
        .pointer("/sync_info/latest_block_height")
        .and_then(parse_height)
}

fn parse_height(value: &Value) -> Option<Height> {
    match value {
        Value::String(s) => s.parse().ok(),
        other => other.as_u64(),
    }
}

fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.parse().ok(),
        other => other.as_u64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::BackfillPipeline;
    use crate::config::IngestionConfig;
    use crate::ports::{BackfillApi, InMemoryBlockStore};
    use crate::test_utils::block_results_payload;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_classify_response() {
        let text = r#"{"jsonrpc":"2.0","id":3,"result":{"height":"12"}}"#;
        assert_eq!(
            classify(text),
            Inbound::Response {
                id: 3,
                result: json!({"height": "12"})
            }
        );
    }

    #[test]
    fn test_classify_error() {
        let text = r#"{"jsonrpc":"2.0","id":"4","error":{"code":-32603,"message":"Internal error"}}"#;
        assert!(matches!(classify(text), Inbound::Failure { id: 4, .. }));
    }

    #[test]
    fn test_classify_new_block_event() {
        let text = r#"{"jsonrpc":"2.0","id":2,"result":{"query":"tm.event='NewBlock'","data":{"type":"tendermint/event/NewBlock","value":{"block":{"header":{"height":"77"}}}}}}"#;
        assert_eq!(classify(text), Inbound::NewBlock { height: 77 });
    }

    #[test]
    fn test_classify_ignores_noise() {
        assert_eq!(classify("not json"), Inbound::Ignored);
        assert_eq!(classify(r#"{"jsonrpc":"2.0","result":{}}"#), Inbound::Ignored);
    }

    #[test]
    fn test_parse_tip() {
        let status = json!({"sync_info": {"latest_block_height": "8123456", "catching_up": false}});
        assert_eq!(parse_tip(&status), Some(8_123_456));
        assert_eq!(parse_tip(&json!({})), None);
    }

    #[test]
    fn test_request_text() {
        let text = request_text("block_results", json!({"height": "5"}), 9);
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["method"], "block_results");
        assert_eq!(value["params"]["height"], "5");
        assert_eq!(value["id"], 9);
    }

    /// Minimal node: answers `status` with `tip` and `block_results` with a
    /// fixture payload, except for `rejected` (RPC error) and `silent`
    /// (no answer at all).
    async fn serve_node(listener: TcpListener, tip: Height, rejected: Vec<Height>, silent: Vec<Height>) {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else { continue };
            let request: Value = serde_json::from_str(text.as_str()).unwrap();
            let id = request["id"].clone();
            let reply = match request["method"].as_str().unwrap() {
                "status" => json!({"jsonrpc": "2.0", "id": id, "result": {
                    "sync_info": {"latest_block_height": tip.to_string()}
                }}),
                "block_results" => {
                    let height: Height = request["params"]["height"].as_str().unwrap().parse().unwrap();
                    if silent.contains(&height) {
                        continue;
                    }
                    if rejected.contains(&height) {
                        json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32603, "message": "Internal error"}})
                    } else {
                        json!({"jsonrpc": "2.0", "id": id, "result": block_results_payload(height)})
                    }
                }
                _ => json!({"jsonrpc": "2.0", "id": id, "result": {}}),
            };
            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                break;
            }
        }
    }

    fn local_source(addr: std::net::SocketAddr, timeout_secs: u64) -> TendermintWsSource {
        TendermintWsSource::new(TendermintWsConfig {
            host: addr.to_string(),
            path: "/websocket".to_string(),
            connect_timeout_secs: timeout_secs,
            subscribe_new_blocks: false,
        })
    }

    #[tokio::test]
    async fn test_session_against_local_node() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let node = tokio::spawn(serve_node(listener, 3, vec![2], vec![]));

        let source = local_source(addr, 5);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut conn = source.connect(4, shutdown_rx).await.unwrap();
        assert_eq!(conn.tip, 3);

        for height in 1..=3 {
            conn.requests.send(height).await.unwrap();
        }
        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(conn.records.recv().await.unwrap());
        }
        got.sort_by_key(|r| r.height);
        assert_eq!(got[0].payload["height"], "1");
        assert!(got[1].payload.get("error").is_some());
        assert_eq!(got[2].payload["height"], "3");

        shutdown_tx.send(true).unwrap();
        assert!(conn.task.await.unwrap().is_empty());
        assert!(conn.records.recv().await.is_none());
        node.await.unwrap();
    }

    #[tokio::test]
    async fn test_quiet_node_hands_back_unanswered_heights() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let node = tokio::spawn(serve_node(listener, 3, vec![], vec![1]));

        let source = local_source(addr, 1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut conn = source.connect(4, shutdown_rx).await.unwrap();

        for height in 1..=3 {
            conn.requests.send(height).await.unwrap();
        }
        assert_eq!(conn.records.recv().await.unwrap().height, 2);
        assert_eq!(conn.records.recv().await.unwrap().height, 3);

        shutdown_tx.send(true).unwrap();
        assert_eq!(conn.task.await.unwrap(), vec![1]);
        assert!(conn.records.recv().await.is_none());
        node.await.unwrap();
    }

    #[tokio::test]
    async fn test_unanswered_height_is_reported_by_the_run() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let node = tokio::spawn(serve_node(listener, 2, vec![], vec![1]));

        let store = InMemoryBlockStore::new();
        let pipeline = BackfillPipeline::new(
            local_source(addr, 1),
            Arc::new(store.clone()),
            &IngestionConfig::for_testing(),
        )
        .unwrap();
        let report = pipeline.run().await.unwrap();
        let chain = pipeline.chain_id().clone();

        assert_eq!(store.heights(&chain), vec![2]);
        assert_eq!(report.written, 1);
        assert_eq!(report.unanswered_heights, vec![1]);
        assert!(!report.is_clean());
        node.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = TendermintWsSource::new(TendermintWsConfig {
            host: addr.to_string(),
            connect_timeout_secs: 2,
            ..TendermintWsConfig::default()
        });
        let (_tx, rx) = watch::channel(false);
        assert!(matches!(
            source.connect(4, rx).await,
            Err(IngestError::Connect { .. })
        ));
    }
}
