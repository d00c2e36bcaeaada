//! Logging and OpenTelemetry integration for Regen.
//!
//! Provides subscriber initialisation (text or JSON logs, optional OTLP span
//! export) and span constructors for cache operations.

pub mod spans;
pub mod tracer;

pub use spans::{CacheAttributes, get_span, purge_span, revalidate_span, set_span};
pub use tracer::{
    LogFormat, OtlpConfig, TracerError, TracingConfig, init_test_logging, init_tracer,
    shutdown_tracer,
};
