//! Session lifecycle: register, login, refresh with rotation, logout.

mod manager;
mod types;

pub use manager::SessionManager;
pub use types::{LogoutOutcome, Registration, TokenPair};
