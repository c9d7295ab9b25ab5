use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::libs::backend::backend_traits::{
    BackendError, ChangeEvent, ChangeFilter, ChangeKind, Subscription,
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const COMMAND_BUFFER_SIZE: usize = 32;
const EVENT_BUFFER_SIZE: usize = 64;

/// One frame of the Phoenix channel protocol.
#[derive(Debug, Serialize, Deserialize)]
struct PhoenixFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

enum Command {
    Join {
        topic: String,
        filter: ChangeFilter,
        access_token: String,
        events: mpsc::Sender<ChangeEvent>,
        joined: oneshot::Sender<Result<(), BackendError>>,
    },
    Leave {
        topic: String,
    },
}

struct Channel {
    filter: ChangeFilter,
    events: mpsc::Sender<ChangeEvent>,
    join_ref: String,
    joined: Option<oneshot::Sender<Result<(), BackendError>>>,
}

/// Realtime websocket shared by every subscription of one backend. The socket is
/// opened by the first subscribe and reopened by the next subscribe after it drops.
pub struct RealtimeClient {
    endpoint: String,
    commands: Mutex<Option<mpsc::Sender<Command>>>,
    next_topic: AtomicU64,
}

impl RealtimeClient {
    pub fn new(project_url: &str, anon_key: &str) -> Self {
        let base = project_url.trim_end_matches('/');
        let base = base
            .strip_prefix("https://")
            .map(|host| format!("wss://{}", host))
            .or_else(|| base.strip_prefix("http://").map(|host| format!("ws://{}", host)))
            .unwrap_or_else(|| base.to_string());
        Self {
            endpoint: format!(
                "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
                base,
                urlencoding::encode(anon_key)
            ),
            commands: Mutex::new(None),
            next_topic: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn subscribe(
        &self,
        filter: ChangeFilter,
        access_token: String,
    ) -> Result<Subscription, BackendError> {
        let commands = self.connection().await?;
        let topic = format!(
            "realtime:{}:{}",
            filter.table,
            self.next_topic.fetch_add(1, Ordering::Relaxed)
        );

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let (joined_tx, joined_rx) = oneshot::channel();
        commands
            .send(Command::Join {
                topic: topic.clone(),
                filter: filter.clone(),
                access_token,
                events: events_tx,
                joined: joined_tx,
            })
            .await
            .map_err(|_| BackendError::Realtime("realtime socket closed".to_string()))?;

        match tokio::time::timeout(JOIN_TIMEOUT, joined_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => {
                return Err(BackendError::Realtime(
                    "realtime socket closed before join".to_string(),
                ))
            }
            Err(_) => {
                let _ = commands.send(Command::Leave { topic }).await;
                return Err(BackendError::Realtime("channel join timed out".to_string()));
            }
        }
        debug!(%topic, "joined realtime channel");

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            let _ = commands.send(Command::Leave { topic }).await;
        });

        Ok(Subscription::new(filter, events_rx, cancel))
    }

    async fn connection(&self) -> Result<mpsc::Sender<Command>, BackendError> {
        let mut guard = self.commands.lock().await;
        if let Some(commands) = guard.as_ref() {
            if !commands.is_closed() {
                return Ok(commands.clone());
            }
        }

        let (socket, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| BackendError::Realtime(e.to_string()))?;
        info!("realtime socket connected");

        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER_SIZE);
        tokio::spawn(run_socket(socket, receiver));
        *guard = Some(commands.clone());
        Ok(commands)
    }
}

async fn run_socket<S>(socket: S, mut commands: mpsc::Receiver<Command>)
where
    S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let mut channels: HashMap<String, Channel> = HashMap::new();
    let mut next_ref: u64 = 0;
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        let outgoing = tokio::select! {
            command = commands.recv() => match command {
                None => break,
                Some(Command::Join { topic, filter, access_token, events, joined }) => {
                    next_ref += 1;
                    let join_ref = next_ref.to_string();
                    let frame = join_frame(&topic, &filter, &access_token, &join_ref);
                    channels.insert(topic, Channel {
                        filter,
                        events,
                        join_ref,
                        joined: Some(joined),
                    });
                    Some(frame)
                }
                Some(Command::Leave { topic }) => {
                    channels.remove(&topic).map(|_| {
                        next_ref += 1;
                        frame(&topic, "phx_leave", json!({}), &next_ref.to_string())
                    })
                }
            },
            _ = heartbeat.tick() => {
                next_ref += 1;
                Some(frame("phoenix", "heartbeat", json!({}), &next_ref.to_string()))
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => handle_frame(text.as_str(), &mut channels),
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "realtime socket error");
                        break;
                    }
                }
                None
            }
        };

        if let Some(outgoing) = outgoing {
            if let Err(e) = sink.send(WsMessage::Text(outgoing.into())).await {
                warn!(error = %e, "realtime send failed");
                break;
            }
        }
    }

    for (_, channel) in channels.drain() {
        if let Some(joined) = channel.joined {
            let _ = joined.send(Err(BackendError::Realtime(
                "realtime socket closed".to_string(),
            )));
        }
    }
    info!("realtime socket closed");
}

fn frame(topic: &str, event: &str, payload: Value, reference: &str) -> String {
    json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": reference,
    })
    .to_string()
}

fn join_frame(topic: &str, filter: &ChangeFilter, access_token: &str, join_ref: &str) -> String {
    let mut change = json!({
        "event": filter.kind.as_str(),
        "schema": "public",
        "table": filter.table,
    });
    if let Some(expression) = filter.filter_expression() {
        change["filter"] = Value::String(expression);
    }

    frame(
        topic,
        "phx_join",
        json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": [change],
                "private": false,
            },
            "access_token": access_token,
        }),
        join_ref,
    )
}

fn handle_frame(text: &str, channels: &mut HashMap<String, Channel>) {
    let frame: PhoenixFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "unreadable realtime frame");
            return;
        }
    };

    match frame.event.as_str() {
        "phx_reply" => {
            let Some(channel) = channels.get_mut(&frame.topic) else {
                return;
            };
            if frame.reference.as_deref() != Some(channel.join_ref.as_str()) {
                return;
            }
            if let Some(joined) = channel.joined.take() {
                let result = match frame.payload.get("status").and_then(Value::as_str) {
                    Some("ok") => Ok(()),
                    _ => Err(BackendError::Realtime(format!(
                        "join rejected: {}",
                        frame.payload.get("response").unwrap_or(&Value::Null)
                    ))),
                };
                let _ = joined.send(result);
            }
        }
        "postgres_changes" => {
            let Some(channel) = channels.get(&frame.topic) else {
                return;
            };
            match parse_change(&frame.payload) {
                Some(event) if channel.filter.matches(&event) => {
                    if channel.events.try_send(event).is_err() {
                        warn!(topic = %frame.topic, "dropping realtime event, subscriber is behind");
                    }
                }
                Some(_) => {}
                None => warn!(topic = %frame.topic, "malformed postgres_changes payload"),
            }
        }
        "phx_error" | "phx_close" => {
            warn!(topic = %frame.topic, event = %frame.event, "realtime channel closed by server");
            channels.remove(&frame.topic);
        }
        _ => {}
    }
}

/// Extracts the change from a `postgres_changes` payload:
/// `{"ids": [...], "data": {"table": .., "type": "INSERT", "record": {..}}}`.
fn parse_change(payload: &Value) -> Option<ChangeEvent> {
    let data = payload.get("data")?;
    let table = data.get("table")?.as_str()?.to_string();
    let kind: ChangeKind = serde_json::from_value(data.get("type")?.clone()).ok()?;
    let record = match kind {
        ChangeKind::Delete => data.get("old_record").cloned().unwrap_or(Value::Null),
        _ => data.get("record").cloned().unwrap_or(Value::Null),
    };
    Some(ChangeEvent {
        table,
        kind,
        record,
    })
}
