pub mod cookie_sessions;

pub use cookie_sessions::{CookieSessions, Session, SessionError, SessionUser, SESSION_COOKIE};
