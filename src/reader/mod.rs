//! History Reader API
//!
//! Read-only HTTP view over stored observations, for display.
//! Only compiled when the `reader-api` feature is enabled.

mod api;

pub use api::create_router;

use serde::Serialize;
use std::sync::Arc;

use crate::history::HistoryStore;

/// Shared state for the reader routes
#[derive(Clone)]
pub struct ReaderState {
    pub store: Arc<dyn HistoryStore>,
    /// Asset used when the query names none
    pub default_id: String,
    pub default_hours: i64,
    pub max_hours: i64,
}

/// Uniform JSON envelope
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Start the reader server
pub async fn start_server(state: ReaderState, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("History reader API starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
