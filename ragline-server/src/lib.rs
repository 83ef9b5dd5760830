//! `ragline-server` exposes the ragline orchestrator over HTTP.
//! Ingest and query are JSON `POST`s under `/v1`; health, readiness and a
//! dashboard of counters are plain `GET`s.

pub mod error;
pub mod protocol;
pub mod server;

pub use error::ApiError;
pub use server::{
    AppState, REQUEST_ID_HEADER, ServerConfig, app_router, load_env_file, load_env_file_from,
    run_server,
};
