pub mod api;
pub mod artifacts;
pub mod config;
pub mod consumer;
pub mod db;
pub mod handlers;
pub mod jobs;
pub mod queue;
pub mod reports;
pub mod storage;
pub mod telemetry;
