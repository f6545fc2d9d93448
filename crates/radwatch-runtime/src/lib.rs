//! `radwatch-runtime` – Process-level wiring
//!
//! # Modules
//!
//! - [`context`] – [`SupervisionContext`][context::SupervisionContext]:
//!   owns every running monitor, waits for an operator interrupt or the first
//!   monitor failure, and performs the single teardown sequence that leaves
//!   the beam closed and the power supply released.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter. Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod context;
pub mod telemetry;

pub use context::{ExitReason, SupervisionContext};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
