pub mod config;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use handlers::build_router;
pub use state::AppState;
