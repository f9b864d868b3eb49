pub mod api_logging;
pub mod app_config;
pub mod dispatcher_runner;
pub mod node;

pub use api_logging::{ApiConfig, LoggingConfig};
pub use app_config::AppConfig;
pub use dispatcher_runner::{DispatcherConfig, RunnerConfig};
pub use node::NodeConfig;
