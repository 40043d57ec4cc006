/// Middleware module
///
/// Access-token authentication for protected routes.

mod access_guard;

pub use access_guard::{bearer_token, AccessTokenGuard};
