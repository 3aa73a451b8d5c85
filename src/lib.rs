pub mod access;
pub mod app;
pub mod config;
pub mod demo;
pub mod errors;
pub mod executor;
pub mod jwt;
pub mod routes;
pub mod schema;
pub mod store;

// Re-export commonly used items for tests
pub use app::{create_app, AppState};
pub use executor::{ExecuteError, Executor};
