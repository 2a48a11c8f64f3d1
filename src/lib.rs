// Library root for Sentinel Auth

pub mod core;
pub mod state;
pub mod auth;
pub mod infra;
pub mod api;
pub mod config;
