pub const FRAME_INTERVAL_MS: u64 = 16;
pub const DELTA_QUEUE_CAP: usize = 2_000;
pub const AGGREGATE_QUEUE_CAP: usize = 2_000;
pub const SNAPSHOT_TIMEOUT_MS: u64 = 5_000;
pub const METRICS_REPORT_SECS: u64 = 1;

pub const GATEWAY_PORT: u16 = 9001;
pub const GATEWAY_URL: &str = "ws://127.0.0.1:9001/ws";
pub const RECONNECT_BACKOFF_MS: u64 = 2_000;

pub const TICK_INTERVAL_MS: u64 = 50;
pub const ACTIVE_FRACTION: f64 = 0.25;
pub const PUBLISH_INTERVAL_MS: u64 = 500;
pub const CORRELATION_REFRESH_SECS: u64 = 30;
pub const LIST_SIZE: usize = 25;
pub const UNIVERSE_SIZE: usize = 400;
