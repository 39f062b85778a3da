//! HTTP surface of the Kawach ticket engine.
//!
//! Handlers are thin: they extract the principal and the raw submission, hand
//! both to [`kawach_runtime::Engine`], and map the result to a response.
//! Validation, authorization and the lifecycle live in the engine.
//!
//! # Request Flow
//!
//! 1. **Request id** set (or propagated) and a tracing span opened
//! 2. **Principal** read from `X-Principal-Type` / `X-Principal-Id` (401 if absent)
//! 3. **Submission** deserialized from the path, query and JSON body
//! 4. **Engine** call
//! 5. **Result** serialized, or the [`AppError`] mapped to a status code
//!
//! # Example
//!
//! ```ignore
//! use kawach_web::{AppState, build_router};
//!
//! let app = build_router(AppState::new(engine));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::AppError;
pub use extractors::{AuthenticatedPrincipal, IdempotencyKeyHeader};
pub use routes::build_router;
pub use state::AppState;
