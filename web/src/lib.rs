//! # Guestflow Web
//!
//! Axum HTTP boundary for the registration engine. Routes, error mapping,
//! the raw-body webhook endpoint, and the SSE check-in stream live here;
//! every business decision is delegated to `guestflow-registration`.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod router;
pub mod state;

pub use error::AppError;
pub use router::router;
pub use state::AppState;

use tracing_subscriber::EnvFilter;

/// Install the tracing subscriber for binaries and integration runs.
///
/// Respects `RUST_LOG`; defaults to `info` for the workspace crates.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,guestflow=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
