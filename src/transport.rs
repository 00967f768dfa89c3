use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::logging;
use crate::protocol::ControlMessage;
use crate::runtime::EngineHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpExit {
    Closed,
    Shutdown,
}

/// Keep a websocket connection to the feed alive and bridge it to the engine.
///
/// Connect and disconnect are reported to the engine, which resubscribes its
/// lists on every new connection. Returns once `shutdown` flips to true.
pub async fn run_websocket(
    url: String,
    engine: EngineHandle,
    mut outbound: mpsc::UnboundedReceiver<ControlMessage>,
    backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                logging::info(
                    "transport.connected",
                    "Connected to feed websocket",
                    json!({ "url": url }),
                );
                engine.connected();
                let exit = pump(stream, &engine, &mut outbound, &mut shutdown).await;
                engine.disconnected();

                match exit {
                    Ok(PumpExit::Shutdown) => break,
                    Ok(PumpExit::Closed) => logging::warn(
                        "transport.closed",
                        "Feed websocket closed",
                        json!({ "url": url }),
                    ),
                    Err(err) => logging::warn(
                        "transport.error",
                        "Feed websocket failed",
                        json!({ "url": url, "error": format!("{err:?}") }),
                    ),
                }
            }
            Err(err) => logging::warn(
                "transport.connect_failed",
                "Could not connect to feed websocket",
                json!({ "url": url, "error": err.to_string() }),
            ),
        }

        // Control messages queued for the dead connection are superseded by
        // the resubscribe that follows the next connect.
        while outbound.try_recv().is_ok() {}

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    logging::info_simple("transport.stop", "Feed websocket transport stopped");
    Ok(())
}

async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    engine: &EngineHandle,
    outbound: &mut mpsc::UnboundedReceiver<ControlMessage>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<PumpExit> {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    engine.deliver(text);
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        engine.deliver(text);
                    }
                    Err(_) => logging::warn_simple(
                        "transport.binary_dropped",
                        "Dropping non utf-8 binary frame",
                    ),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(PumpExit::Closed),
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err).context("websocket read failed"),
            },
            control = outbound.recv() => {
                let Some(control) = control else {
                    return Ok(PumpExit::Shutdown);
                };
                sink.send(Message::Text(control.to_payload()))
                    .await
                    .context("websocket write failed")?;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = sink.close().await;
                    return Ok(PumpExit::Shutdown);
                }
            }
        }
    }
}
