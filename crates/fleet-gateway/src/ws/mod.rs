//! Browser-facing WebSocket surface: the server and the intent handler.

pub mod handler;
pub mod server;

pub use server::{build_router, serve, AppState};
