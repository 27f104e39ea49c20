// Embedder-facing surface of the engine.

pub mod engine;
pub mod telemetry;
