pub mod handlers;
pub mod session;

pub use session::{SessionHandle, SessionState, session_middleware, status_for};
