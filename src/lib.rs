pub mod configuration;
pub mod controllers;
pub mod db;
pub mod domain;
pub mod events;
pub mod ingest;
pub mod net;
pub mod queue;
pub mod reader;
pub mod schema;
pub mod startup;
pub mod telemetry;

// crate-wide error type, re-exported so call sites can stay terse
pub use domain::error::{Error, ErrorKind, Result};
