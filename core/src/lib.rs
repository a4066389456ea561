pub mod error;
pub mod expression;
pub mod request;
pub mod session;
pub mod wire;
