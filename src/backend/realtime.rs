/// Realtime channel client.
/// Maintains one multiplexed WebSocket to the realtime endpoint and joins a
/// Phoenix channel per subscription. Inserts matching a channel's filter are
/// forwarded to that subscription's event stream.

use super::{Filter, PushEvent, Subscription, SubscriptionHandle};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

type JoinAck = oneshot::Sender<std::result::Result<(), String>>;

struct Channel {
    join_ref: String,
    events: mpsc::UnboundedSender<PushEvent>,
    join_ack: Option<JoinAck>,
}

type Channels = Arc<StdMutex<HashMap<String, Channel>>>;

fn lock(channels: &Channels) -> MutexGuard<'_, HashMap<String, Channel>> {
    channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct RealtimeClient {
    url: Url,
    heartbeat_interval: Duration,
    join_timeout: Duration,
    connect_attempts: u32,
    connect_backoff: Duration,
    max_connect_backoff: Duration,
    state: Arc<Mutex<ConnectionState>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    channels: Channels,
    next_ref: Arc<AtomicU64>,
}

impl RealtimeClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(RealtimeClient {
            url: config.realtime_url()?,
            heartbeat_interval: config.heartbeat_interval,
            join_timeout: config.join_timeout,
            connect_attempts: config.connect_attempts.max(1),
            connect_backoff: config.connect_backoff,
            max_connect_backoff: config.max_connect_backoff,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            outgoing: Mutex::new(None),
            channels: Arc::new(StdMutex::new(HashMap::new())),
            next_ref: Arc::new(AtomicU64::new(1)),
        })
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// Number of joined channels
    pub fn channel_count(&self) -> usize {
        lock(&self.channels).len()
    }

    /// Join a channel for inserts into `collection` matching `filter`
    pub async fn subscribe(
        &self,
        collection: &str,
        filter: &Filter,
        access_token: Option<&str>,
    ) -> Result<Subscription> {
        let filter = filter.to_realtime().ok_or_else(|| {
            ClientError::Subscription(format!(
                "Filter {:?} cannot be used on a realtime channel",
                filter
            ))
        })?;
        let outgoing = self.ensure_connected().await?;

        let n = self.next_ref.fetch_add(1, Ordering::SeqCst);
        let topic = format!("realtime:{}:{}", collection, n);
        let join_ref = n.to_string();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();

        lock(&self.channels).insert(
            topic.clone(),
            Channel {
                join_ref: join_ref.clone(),
                events: events_tx,
                join_ack: Some(ack_tx),
            },
        );

        let join = json!({
            "topic": topic,
            "event": "phx_join",
            "payload": {
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "INSERT",
                        "schema": "public",
                        "table": collection,
                        "filter": filter,
                    }],
                },
                "access_token": access_token,
            },
            "ref": join_ref,
            "join_ref": join_ref,
        });
        log::debug!("Joining {} ({})", topic, filter);
        if outgoing.send(join.to_string()).is_err() {
            lock(&self.channels).remove(&topic);
            return Err(ClientError::Subscription(
                "Realtime connection closed".to_string(),
            ));
        }

        let outcome = tokio::time::timeout(self.join_timeout, ack_rx).await;
        let failure = match outcome {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(reason))) => Some(reason),
            Ok(Err(_)) => Some("Realtime connection closed during join".to_string()),
            Err(_) => Some(format!("Join of {} timed out", topic)),
        };
        if let Some(reason) = failure {
            if lock(&self.channels).remove(&topic).is_some() {
                let _ = outgoing.send(leave_frame(&topic, &self.next_ref));
            }
            log::warn!("Subscription to {} failed: {}", collection, reason);
            return Err(ClientError::Subscription(reason));
        }
        log::info!("Subscribed to {} ({})", collection, filter);

        let (leave_tx, leave_rx) = oneshot::channel::<()>();
        let channels = self.channels.clone();
        let next_ref = self.next_ref.clone();
        let watched = topic.clone();
        tokio::spawn(async move {
            let _ = leave_rx.await;
            if lock(&channels).remove(&watched).is_some() {
                let _ = outgoing.send(leave_frame(&watched, &next_ref));
            }
        });

        Ok(Subscription::new(SubscriptionHandle::new(topic, leave_tx), events_rx))
    }

    /// Return the live outgoing queue, connecting if needed
    async fn ensure_connected(&self) -> Result<mpsc::UnboundedSender<String>> {
        let mut outgoing = self.outgoing.lock().await;
        if let Some(tx) = outgoing.as_ref() {
            if !tx.is_closed() {
                return Ok(tx.clone());
            }
        }
        *self.state.lock().await = ConnectionState::Connecting;
        let tx = self.connect_with_backoff().await?;
        outgoing.replace(tx.clone());
        Ok(tx)
    }

    /// Connect with exponential backoff, bounded by `connect_attempts`
    async fn connect_with_backoff(&self) -> Result<mpsc::UnboundedSender<String>> {
        let mut backoff = self.connect_backoff;
        let mut last_error = String::new();

        for attempt in 0..self.connect_attempts {
            match self.connect_internal().await {
                Ok(tx) => {
                    log::info!("Realtime connected to {}", self.url.host_str().unwrap_or_default());
                    return Ok(tx);
                }
                Err(e) => {
                    log::warn!("Realtime connection attempt {} failed: {}", attempt + 1, e);
                    last_error = e.to_string();
                    if attempt + 1 < self.connect_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(self.max_connect_backoff);
                    }
                }
            }
        }

        *self.state.lock().await = ConnectionState::Failed;
        Err(ClientError::Network(format!(
            "Failed to connect to realtime after {} attempts: {}",
            self.connect_attempts, last_error
        )))
    }

    async fn connect_internal(&self) -> Result<mpsc::UnboundedSender<String>> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ClientError::Network(format!("Connection failed: {}", e)))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<String>();

        *self.state.lock().await = ConnectionState::Connected;

        let writer = tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                if let Err(e) = ws_sender.send(Message::Text(msg.into())).await {
                    log::error!("Failed to send realtime frame: {}", e);
                    break;
                }
            }
        });

        let heartbeat_tx = msg_tx.clone();
        let heartbeat_ref = self.next_ref.clone();
        let period = self.heartbeat_interval;
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let frame = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": heartbeat_ref.fetch_add(1, Ordering::SeqCst).to_string(),
                });
                if heartbeat_tx.send(frame.to_string()).is_err() {
                    break;
                }
            }
        });

        let channels = self.channels.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(Message::Text(text)) => route_frame(&channels, &text),
                    Ok(Message::Close(_)) => {
                        log::info!("Realtime socket closed by server");
                        break;
                    }
                    Err(e) => {
                        log::error!("Realtime socket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            writer.abort();
            heartbeat.abort();
            *state.lock().await = ConnectionState::Disconnected;
            fail_all(&channels, "Realtime connection closed");
            log::info!("Realtime connection closed");
        });

        Ok(msg_tx)
    }
}

fn leave_frame(topic: &str, next_ref: &AtomicU64) -> String {
    json!({
        "topic": topic,
        "event": "phx_leave",
        "payload": {},
        "ref": next_ref.fetch_add(1, Ordering::SeqCst).to_string(),
    })
    .to_string()
}

/// Drop every channel, telling each subscriber why
fn fail_all(channels: &Channels, reason: &str) {
    let drained: Vec<Channel> = lock(channels).drain().map(|(_, c)| c).collect();
    for mut channel in drained {
        if let Some(ack) = channel.join_ack.take() {
            let _ = ack.send(Err(reason.to_string()));
        }
        let _ = channel.events.send(PushEvent::Error(reason.to_string()));
    }
}

/// Dispatch one inbound frame to its channel
fn route_frame(channels: &Channels, text: &str) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("Unparseable realtime frame: {}", e);
            return;
        }
    };
    let topic = frame.get("topic").and_then(Value::as_str).unwrap_or_default();
    let event = frame.get("event").and_then(Value::as_str).unwrap_or_default();
    let payload = frame.get("payload").cloned().unwrap_or(Value::Null);

    if topic == "phoenix" {
        return;
    }

    match event {
        "phx_reply" => {
            let reply_ref = frame.get("ref").and_then(Value::as_str).unwrap_or_default();
            let ok = payload.get("status").and_then(Value::as_str) == Some("ok");
            let mut guard = lock(channels);
            let Some(channel) = guard.get_mut(topic) else {
                return;
            };
            if channel.join_ref != reply_ref {
                return;
            }
            if let Some(ack) = channel.join_ack.take() {
                let result = if ok {
                    Ok(())
                } else {
                    Err(reply_reason(&payload))
                };
                let _ = ack.send(result);
            }
        }
        "postgres_changes" => {
            let data = payload.get("data");
            let kind = data.and_then(|d| d.get("type")).and_then(Value::as_str);
            if kind.is_some_and(|k| k != "INSERT") {
                return;
            }
            let Some(record) = data.and_then(|d| d.get("record")).cloned() else {
                log::warn!("postgres_changes on {} without a record", topic);
                return;
            };
            if let Some(channel) = lock(channels).get(topic) {
                let _ = channel.events.send(PushEvent::Insert(record));
            }
        }
        "system" => {
            if payload.get("status").and_then(Value::as_str) == Some("error") {
                close_channel(channels, topic, &reply_reason(&payload));
            }
        }
        "phx_error" => close_channel(channels, topic, "Channel error"),
        "phx_close" => close_channel(channels, topic, "Channel closed by server"),
        other => log::debug!("Ignoring realtime event {} on {}", other, topic),
    }
}

fn close_channel(channels: &Channels, topic: &str, reason: &str) {
    if let Some(mut channel) = lock(channels).remove(topic) {
        log::warn!("Channel {} closed: {}", topic, reason);
        if let Some(ack) = channel.join_ack.take() {
            let _ = ack.send(Err(reason.to_string()));
        }
        let _ = channel.events.send(PushEvent::Error(reason.to_string()));
    }
}

fn reply_reason(payload: &Value) -> String {
    payload
        .get("response")
        .and_then(|r| r.get("reason").or_else(|| r.get("message")))
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("Channel join rejected")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels_with(topic: &str) -> (Channels, mpsc::UnboundedReceiver<PushEvent>, oneshot::Receiver<std::result::Result<(), String>>) {
        let channels: Channels = Arc::new(StdMutex::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = oneshot::channel();
        lock(&channels).insert(
            topic.to_string(),
            Channel {
                join_ref: "7".to_string(),
                events: events_tx,
                join_ack: Some(ack_tx),
            },
        );
        (channels, events_rx, ack_rx)
    }

    #[test]
    fn test_join_reply_acknowledges() {
        let (channels, _events, mut ack) = channels_with("realtime:messages:7");
        route_frame(
            &channels,
            r#"{"topic":"realtime:messages:7","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"7"}"#,
        );
        assert_eq!(ack.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_rejected_join_carries_reason() {
        let (channels, _events, mut ack) = channels_with("realtime:messages:7");
        route_frame(
            &channels,
            r#"{"topic":"realtime:messages:7","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"7"}"#,
        );
        assert_eq!(ack.try_recv().unwrap(), Err("unauthorized".to_string()));
    }

    #[test]
    fn test_insert_is_forwarded() {
        let (channels, mut events, _ack) = channels_with("realtime:messages:7");
        route_frame(
            &channels,
            r#"{"topic":"realtime:messages:7","event":"postgres_changes","payload":{"data":{"type":"INSERT","record":{"id":"m1"}},"ids":[1]},"ref":null}"#,
        );
        assert_eq!(
            events.try_recv().unwrap(),
            PushEvent::Insert(json!({ "id": "m1" }))
        );
    }

    #[test]
    fn test_channel_error_closes_subscription() {
        let (channels, mut events, _ack) = channels_with("realtime:messages:7");
        route_frame(
            &channels,
            r#"{"topic":"realtime:messages:7","event":"phx_error","payload":{},"ref":"7"}"#,
        );
        assert!(matches!(events.try_recv().unwrap(), PushEvent::Error(_)));
        assert!(lock(&channels).is_empty());
    }

    #[test]
    fn test_fail_all_drains_channels() {
        let (channels, mut events, mut ack) = channels_with("realtime:messages:7");
        fail_all(&channels, "gone");
        assert_eq!(ack.try_recv().unwrap(), Err("gone".to_string()));
        assert_eq!(events.try_recv().unwrap(), PushEvent::Error("gone".to_string()));
        assert!(lock(&channels).is_empty());
    }
}
