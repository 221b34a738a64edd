pub mod app;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod payload;
pub mod store;
pub mod telemetry;
pub mod topic;
pub mod transport;
