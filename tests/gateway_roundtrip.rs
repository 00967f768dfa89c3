use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ranked_list_sync::engine::EngineConfig;
use ranked_list_sync::logging;
use ranked_list_sync::protocol::{ControlMessage, FeedMessage};
use ranked_list_sync::runtime::spawn_engine;
use ranked_list_sync::simulator::{self, SimulatorConfig};
use ranked_list_sync::transport::run_websocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

fn start_simulator(port: u16) -> JoinHandle<()> {
    let config = SimulatorConfig {
        gateway_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
        tick_interval: Duration::from_millis(10),
        publish_interval: Duration::from_millis(40),
        universe_size: 60,
        list_size: 10,
        seed: Some(3),
        max_ticks: None,
        ..SimulatorConfig::default()
    };

    tokio::spawn(async move {
        let _ = simulator::run_with_config(config).await;
    })
}

async fn connect(url: &str) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
> {
    loop {
        match tokio_tungstenite::connect_async(url).await {
            Ok((ws, _)) => break ws,
            Err(tokio_tungstenite::tungstenite::Error::Io(io))
                if io.kind() == std::io::ErrorKind::ConnectionRefused =>
            {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(err) => panic!("failed to connect to gateway: {err}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn gateway_sends_snapshot_then_newer_deltas() {
    logging::set_silent(true);
    let handle = start_simulator(9125);
    let mut ws = connect("ws://127.0.0.1:9125/ws").await;

    let subscribe = ControlMessage::SubscribeList {
        list: "volume_leaders".into(),
    };
    ws.send(Message::Text(subscribe.to_payload()))
        .await
        .expect("send subscribe");

    let mut snapshot_sequence = None;
    let mut deltas_seen = 0usize;
    while deltas_seen < 3 {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("websocket message timeout");
        let Some(Ok(Message::Text(payload))) = message else {
            continue;
        };
        match FeedMessage::decode(payload.as_bytes()).expect("valid feed message") {
            FeedMessage::Snapshot { list, sequence, .. } => {
                assert_eq!(list, "volume_leaders");
                assert!(snapshot_sequence.is_none(), "one snapshot per subscribe");
                snapshot_sequence = Some(sequence);
            }
            FeedMessage::Delta { list, sequence, .. } => {
                assert_eq!(list, "volume_leaders");
                let baseline = snapshot_sequence.expect("snapshot precedes deltas");
                assert!(sequence > baseline, "stale delta {sequence} <= {baseline}");
                snapshot_sequence = Some(sequence);
                deltas_seen += 1;
            }
            FeedMessage::Aggregate { .. } => {
                assert!(snapshot_sequence.is_some(), "aggregates only after subscribing");
            }
        }
    }

    let _ = ws.close(None).await;
    handle.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_syncs_through_websocket_transport() {
    logging::set_silent(true);
    let handle = start_simulator(9126);

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (engine, engine_task) = spawn_engine(EngineConfig::default(), outbound_tx);
    engine.subscribe("gappers_up");
    engine.subscribe("high_rvol");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let transport = tokio::spawn(run_websocket(
        "ws://127.0.0.1:9126/ws".into(),
        engine.clone(),
        outbound_rx,
        Duration::from_millis(100),
        shutdown_rx,
    ));

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let view = engine.view("high_rvol").await.expect("view");
            if view.ready && view.sequence >= 2 && !view.records.is_empty() {
                let ranks: Vec<i64> = view.records.iter().map(|record| record.rank).collect();
                assert!(ranks.windows(2).all(|pair| pair[0] <= pair[1]));
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("engine never synced");

    assert!(engine.is_ready("gappers_up").await);

    let _ = shutdown_tx.send(true);
    transport.await.expect("join").expect("transport result");
    engine.shutdown();
    engine_task.await.expect("join").expect("engine result");
    handle.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simulator_stops_after_tick_budget() {
    logging::set_silent(true);
    let config = SimulatorConfig {
        gateway_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9127),
        tick_interval: Duration::from_millis(5),
        universe_size: 40,
        list_size: 5,
        active_fraction: 1.0,
        seed: Some(9),
        max_ticks: Some(200),
        ..SimulatorConfig::default()
    };

    tokio::time::timeout(Duration::from_secs(10), simulator::run_with_config(config))
        .await
        .expect("simulator did not stop on its own")
        .expect("simulator result");
}
