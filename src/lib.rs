pub mod cli;
pub mod constants;
pub mod engine;
pub mod list;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod protocol;
pub mod replay;
pub mod runtime;
pub mod scheduler;
pub mod simulator;
pub mod subscription;
pub mod transport;
pub mod watch;
