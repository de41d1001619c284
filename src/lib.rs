pub mod app_state;
pub mod config;
pub mod core;
pub mod domain;
pub mod errors;
pub mod routes;
pub mod scheduler;
