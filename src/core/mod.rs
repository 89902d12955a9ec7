pub mod config;
pub mod errors;
pub mod kernel;
pub mod request;
pub mod response;
pub mod session;
pub mod shorthand;
pub mod types;
