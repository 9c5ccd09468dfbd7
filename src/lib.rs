pub mod config;
pub mod coordinator;
pub mod errors;
pub mod graph;
pub mod metadata;
pub mod resolver;
pub mod task;
pub mod telemetry;
pub mod tracker;
pub mod worker;
pub mod workspace;
