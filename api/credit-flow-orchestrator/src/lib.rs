pub mod app;
pub mod config;
pub mod errors;
pub mod infra;
pub mod module;
pub mod service;
