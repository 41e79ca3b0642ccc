pub mod handle;
pub mod http_helpers;
pub mod log_throttle;
pub mod logger;

pub use handle::is_valid_handle;
pub use http_helpers::{HTTPError, PrettyJson};
