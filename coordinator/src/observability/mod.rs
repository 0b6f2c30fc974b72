//! Tracing subscriber setup

pub mod logging;

pub use logging::{init_from_config, init_production_logging, init_simple_logging};
