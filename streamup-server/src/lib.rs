//! HTTP/2 front end for the streamup multipart engine

pub mod auth;
pub mod handlers;
pub mod server;

pub use auth::Authenticator;
pub use server::{AppState, StreamupServer};
