//! Cross-cutting HTTP middleware.

pub mod cors;
pub mod trace;

pub use cors::cors_layer;
pub use trace::TraceLayer;
