pub mod error;
pub mod limiters;

pub use error::ApiError;
pub use limiters::ProviderLimiter;
