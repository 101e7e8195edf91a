pub mod auth;
pub mod cache;
pub mod common;
pub mod config;
pub mod services;
pub mod storage;
pub mod store;
pub mod utils;
