pub mod dispatcher_client;
pub mod heartbeat_manager;

pub use dispatcher_client::DispatcherClient;
pub use heartbeat_manager::{HeartbeatManager, StopReason};
