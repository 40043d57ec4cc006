mod account;
mod auth;
mod health_check;

pub use account::current_user;
pub use auth::{login, logout, logout_all, refresh, register};
pub use health_check::health_check;
