//! REST API module
//!
//! Thin HTTP boundary over the ingestion and streaming pipeline:
//! - `POST /api/scan` joins or starts a library scan
//! - `GET /api/songs/:id/stream` serves audio with Range support
//! - `GET /health` reports liveness

pub mod server;
pub mod routes;
pub mod middleware;
pub mod handlers;

pub use server::ApiServer;
pub use handlers::AppState;
pub use middleware::{trace_id_middleware, TraceId, TRACE_ID_HEADER};
