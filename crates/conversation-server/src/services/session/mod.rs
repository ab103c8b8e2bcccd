//! Session storage, expiry and per-session execution ordering

mod clock;
mod manager;
mod types;

#[cfg(test)]
pub use clock::ManualClock;
pub use clock::{Clock, SystemClock};
pub use manager::{SessionGuard, SessionManager};
pub use types::{Session, SessionSnapshot, SessionStats};
