pub mod auth;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod http;
pub mod repo;
pub mod session;
pub mod state;
pub mod upstream;

pub use http::build_router;
pub use state::AppState;
