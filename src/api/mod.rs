pub mod accounts;
pub mod auth;
pub mod error;
pub mod handler_utils;
pub mod server;
pub mod summarize;
