pub mod auth;
pub mod cipher;
pub mod credential;
pub mod headers;
