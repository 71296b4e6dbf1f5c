pub mod sanitize;
pub mod session_token;
pub mod time;
