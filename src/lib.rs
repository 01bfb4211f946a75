// Application wiring and the ports the pipeline talks through
pub mod app;
pub mod common;
pub mod config;

// Domain data shapes shared across layers
pub mod domain;

pub mod infra;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod server;
