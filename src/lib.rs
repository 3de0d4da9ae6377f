//! connbroker: library crate shared by the server binary and integration tests.

pub mod api;
pub mod aws;
pub mod config;
pub mod errors;
pub mod models;
pub mod plugins;
pub mod services;
