pub mod files;
pub mod health;
pub mod libraries;
pub mod metrics;
pub mod node;
pub mod runner;
pub mod ws;
