//! Observability for Cascade: tracing subscriber setup and OpenTelemetry
//! GenAI semantic-convention attribute constants.

pub mod genai_attrs;
pub mod tracing_setup;
