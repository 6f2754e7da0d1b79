//! HTTP surface and runtime wiring for the Vigil scan service.

pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use errors::{AppError, AppResult};
pub use routes::create_router;
pub use state::AppState;
