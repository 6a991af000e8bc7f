pub mod auth;
pub mod entity;
pub mod export;
pub mod retry;
pub mod transport;
