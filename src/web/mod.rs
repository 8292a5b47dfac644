//! HTTP surface for the dashboard queries.
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────┐
//! │  Widget  │ ───────> │  server.rs  (axum Router, collector loops)   │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)     │
//! └──────────┘          │         │                                    │
//!                       │         │ FeatureService (per request)       │
//!                       │         v                                    │
//!                       │  store::DbHandle  (SQLite, spawn_blocking)   │
//!                       └──────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod server;

pub use api::{AppState, SharedState, api_router};
pub use server::{build_router, start_server};
