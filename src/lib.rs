//! Documentation of a live pizza voting backend.
//!
//! Callers pick one pizza, tallies live in a shared store, admins curate the
//! option list and reset results.
//!
//!
//!
//! # General Infrastructure
//! - axum HTTP API in front of Redis; the frontend is a plain JS client
//! - One process owns all state mutation; the store is the single source of
//!   truth, client-side state is a cache invalidated by the live stream
//! - Bearer tokens are HMAC-signed uids; the secret lives in a docker secret
//!   or the environment
//!
//!
//!
//! # One Vote Per Caller
//!
//! **Goal**: a caller identity appears in at most one option's voter set, no
//! matter how many duplicate or concurrent requests arrive.
//!
//! - The whole vote is a single store operation: check the target exists,
//!   scan every voter set for the caller, then increment and record
//! - Redis runs it as one Lua script, so two concurrent requests from the
//!   same caller cannot both observe "not yet voted"
//! - A duplicate vote is a 200 no-op, not an error; the response says
//!   `already_voted`
//!
//!
//!
//! # Routes
//!
//! | Route | Access | Purpose |
//! |---|---|---|
//! | `GET /api/options` | public | current snapshot |
//! | `GET /api/options/live` | public | SSE full-snapshot stream |
//! | `POST /api/vote` | token | cast the one vote |
//! | `POST /api/options` | admin | add an option |
//! | `DELETE /api/options/{id}` | admin | remove an option |
//! | `POST /api/reset` | admin | zero every tally |
//! | `GET /api/admins` | admin | list admin markers |
//! | `POST /api/admins` | admin | grant by uid or email |
//! | `DELETE /api/admins/{uid}` | admin | revoke, never the last one |
//!
//!
//!
//! # Setup
//!
//! ```sh
//! AUTH_SECRET=dev-secret REDIS_URL=redis://127.0.0.1:6379 cargo run
//! ```
//!
//! `BOOTSTRAP_ADMIN=<uid>` grants the first admin marker on an empty admin
//! collection. Mint a token for any uid with [`auth::mint_token`].
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    routing::{delete, get, post},
    Router,
};

use signal::{
    ctrl_c,
    unix::{signal, SignalKind},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;

use routes::{
    admins_add_handler, admins_list_handler, admins_remove_handler, live_handler,
    option_add_handler, option_remove_handler, options_handler, reset_handler, vote_handler,
};
use state::AppState;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/options", get(options_handler).post(option_add_handler))
        .route("/api/options/live", get(live_handler))
        .route("/api/options/{id}", delete(option_remove_handler))
        .route("/api/vote", post(vote_handler))
        .route("/api/reset", post(reset_handler))
        .route(
            "/api/admins",
            get(admins_list_handler).post(admins_add_handler),
        )
        .route("/api/admins/{uid}", delete(admins_remove_handler))
        .with_state(state)
}

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await;

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let app = app(state.clone()).layer(cors);

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
