pub mod action;
pub mod config;
pub mod error;
pub mod fee;
pub mod platform;
pub mod router;
pub mod service;
pub mod store;
pub mod ticket;
pub mod transcript;
pub mod utils;
