//! Synthetic event generator: renders timestamped events from templates, at a rate governed by
//! pluggable timestamp producers, and fans them out to one or more output sinks.
//!
//! A run is described by a single YAML [`config::Config`] document -- one producer under
//! `input:`, a template-engine configuration under `event:`, and zero or more sinks under
//! `output:` -- and executed by handing that configuration to [`Runtime::run`].

pub mod batcher;
pub mod condition;
pub mod config;
mod error;
pub mod formatter;
pub mod model;
pub mod outputs;
pub mod picker;
pub mod producers;
pub mod renderer;
pub mod state;
pub mod time;

mod runtime;

pub use error::Error;
pub use runtime::Runtime;
