//! A distributed, XML-defined valuation workflow orchestration engine.
//!
//! Three roles share this crate: the Front Orchestrator (`front`) accepts
//! HTTP submissions and optionally waits for a synchronous result, the
//! Request Orchestrator (`orchestrator`) sequences a request's task groups,
//! and the Task Worker (`worker`) executes individual tasks. All three
//! coordinate through a shared datastore of streams and a key/value cache
//! (see [`data`]).

pub mod api;
pub mod core;
pub mod data;
pub mod domain;
pub mod error;
pub mod utils;

pub use error::EngineError;
