// Integration tests organized by module

#[path = "../common/mod.rs"]
mod common;

pub mod infra;
pub mod test_auth_pipeline;
