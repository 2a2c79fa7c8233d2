use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, info, warn};
use uuid::Uuid;

use hallway_types::api::Claims;
use hallway_types::events::{GatewayCommand, GatewayEvent, Table};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<Table>>>;

/// Handle a WebSocket whose token was validated at the HTTP upgrade.
pub async fn handle_connection_authenticated(
    socket: WebSocket,
    dispatcher: Dispatcher,
    user_id: Uuid,
    name: String,
) {
    let (mut sender, receiver) = socket.split();

    info!("{} ({}) connected to gateway", name, user_id);

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id, name: name.clone() }).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, user_id, name).await;
}

/// Handle a WebSocket that authenticates with an Identify command as its
/// first text frame.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some((user_id, name)) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    info!("{} ({}) identified on gateway", name, user_id);

    if !send_event(&mut sender, &GatewayEvent::Ready { user_id, name: name.clone() }).await {
        return;
    }

    run_connection_loop(sender, receiver, dispatcher, user_id, name).await;
}

/// Serialize and send one event. Returns `false` once the socket is gone.
async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            true
        }
    }
}

/// Row events only go out for tables the connection subscribed to.
fn should_forward(event: &GatewayEvent, subscriptions: &HashSet<Table>) -> bool {
    match event.table() {
        Some(table) => subscriptions.contains(&table),
        None => true,
    }
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user_id: Uuid,
    name: String,
) {
    let (conn_id, mut user_rx) = dispatcher.register(user_id).await;
    debug!(
        "{} ({}) now has {} gateway connection(s)",
        name,
        user_id,
        dispatcher.connection_count(user_id).await
    );

    // Nothing is delivered until the client subscribes.
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = user_rx.recv() => {
                    let Some(event) = result else { break };

                    let forward = {
                        let subs = send_subscriptions.read().unwrap_or_else(|p| p.into_inner());
                        should_forward(&event, &subs)
                    };
                    if !forward {
                        continue;
                    }

                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let name_recv = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(user_id, &name_recv, cmd, &subscriptions),
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            name_recv,
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", name, user_id);
}

fn handle_command(user_id: Uuid, name: &str, cmd: GatewayCommand, subscriptions: &Subscriptions) {
    match cmd {
        GatewayCommand::Identify { .. } => {
            debug!("{} ({}) sent Identify on an authenticated connection", name, user_id);
        }
        GatewayCommand::Subscribe { tables } => {
            info!("{} ({}) subscribing to {:?}", name, user_id, tables);
            let mut subs = subscriptions.write().unwrap_or_else(|p| p.into_inner());
            *subs = tables.into_iter().collect();
        }
    }
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                return identify_from_text(&text, jwt_secret);
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

/// The first text frame must be an Identify carrying a valid token.
fn identify_from_text(text: &str, jwt_secret: &str) -> Option<(Uuid, String)> {
    let GatewayCommand::Identify { token } = serde_json::from_str::<GatewayCommand>(text).ok()? else {
        return None;
    };

    let data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    Some((data.claims.sub, data.claims.name))
}
