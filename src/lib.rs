// Saini Connect - community social network backend
//
// The storage layer is the core of this crate: a single `Storage` trait with
// two interchangeable implementations (in-process maps and Postgres) that must
// stay observationally identical. The HTTP layer in `routes` is a thin
// translation of that contract into REST endpoints.

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod seed;
pub mod storage;

// Re-exports for convenience
pub use error::{AppError, AppResult};
