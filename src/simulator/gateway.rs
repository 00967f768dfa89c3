use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch, RwLock};

use crate::logging;
use crate::protocol::{ControlMessage, FeedMessage};

use super::session::FeedSession;
use super::stopped;

/// Serialised feed message fanned out to every connected client.
#[derive(Clone, Debug)]
pub struct FeedFrame {
    /// `None` for aggregates, which are not list scoped.
    pub list: Option<String>,
    pub sequence: u64,
    pub payload: Arc<str>,
}

impl FeedFrame {
    pub fn encode(message: &FeedMessage) -> Result<Self> {
        let sequence = match message {
            FeedMessage::Snapshot { sequence, .. } | FeedMessage::Delta { sequence, .. } => *sequence,
            FeedMessage::Aggregate { .. } => 0,
        };
        let payload = serde_json::to_string(message).context("serialize feed message")?;
        Ok(Self {
            list: message.list().map(str::to_string),
            sequence,
            payload: payload.into(),
        })
    }
}

#[derive(Clone)]
struct GatewayState {
    session: Arc<RwLock<FeedSession>>,
    frames: broadcast::Sender<FeedFrame>,
}

pub(super) async fn run_gateway(
    addr: SocketAddr,
    session: Arc<RwLock<FeedSession>>,
    frames: broadcast::Sender<FeedFrame>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind feed gateway at {addr}"))?;

    logging::info(
        "gateway.bind",
        "Feed gateway listening for clients",
        json!({ "addr": addr.to_string() }),
    );

    let state = GatewayState { session, frames };
    let app = Router::new().route(
        "/ws",
        get(move |ws: WebSocketUpgrade| websocket_upgrade(ws, state.clone())),
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { stopped(&mut stop).await })
        .await
        .context("feed gateway terminated with error")?;

    logging::info_simple("gateway.server.stop", "Feed gateway stopped");
    Ok(())
}

async fn websocket_upgrade(ws: WebSocketUpgrade, state: GatewayState) -> Response {
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = serve_client(socket, state).await {
            logging::warn(
                "gateway.client_error",
                "Feed client ended with error",
                json!({ "error": format!("{err:?}") }),
            );
        }
    })
}

async fn serve_client(socket: WebSocket, state: GatewayState) -> Result<()> {
    logging::info_simple("gateway.client.connected", "Feed client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut frames = state.frames.subscribe();
    // list -> last sequence delivered to this client
    let mut delivered: HashMap<String, u64> = HashMap::new();

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let control = match serde_json::from_str::<ControlMessage>(&text) {
                        Ok(control) => control,
                        Err(err) => {
                            logging::warn(
                                "gateway.client.bad_control",
                                "Ignoring unparseable control message",
                                json!({ "error": err.to_string() }),
                            );
                            continue;
                        }
                    };
                    match control {
                        ControlMessage::SubscribeList { list } | ControlMessage::Resync { list } => {
                            let Some(frame) = snapshot_frame(&state.session, &list).await? else {
                                logging::warn(
                                    "gateway.client.unknown_list",
                                    "Client asked for an unknown list",
                                    json!({ "list": list }),
                                );
                                continue;
                            };
                            delivered.insert(list, frame.sequence);
                            ws_sender
                                .send(Message::Text(frame.payload.to_string()))
                                .await
                                .context("send snapshot")?;
                        }
                        ControlMessage::UnsubscribeList { list } => {
                            delivered.remove(&list);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err).context("read client message"),
            },
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let forward = match &frame.list {
                        None => !delivered.is_empty(),
                        Some(list) => delivered.get(list).is_some_and(|seen| frame.sequence > *seen),
                    };
                    if !forward {
                        continue;
                    }
                    if let Some(list) = &frame.list {
                        delivered.insert(list.clone(), frame.sequence);
                    }
                    if ws_sender.send(Message::Text(frame.payload.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    logging::warn(
                        "gateway.client.lagged",
                        "Feed client lagged, resending snapshots",
                        json!({ "skipped": skipped, "lists": delivered.len() }),
                    );
                    // Missed deltas cannot be replayed; start every list over.
                    let lists: Vec<String> = delivered.keys().cloned().collect();
                    for list in lists {
                        if let Some(frame) = snapshot_frame(&state.session, &list).await? {
                            delivered.insert(list, frame.sequence);
                            ws_sender
                                .send(Message::Text(frame.payload.to_string()))
                                .await
                                .context("send snapshot")?;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    logging::info_simple("gateway.client.disconnected", "Feed client disconnected");
    Ok(())
}

async fn snapshot_frame(session: &RwLock<FeedSession>, list: &str) -> Result<Option<FeedFrame>> {
    let snapshot = session.read().await.snapshot(list);
    snapshot.as_ref().map(FeedFrame::encode).transpose()
}
