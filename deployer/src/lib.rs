//! Deployer Library
//!
//! Deployment webhook performing a rolling single-container replacement
//! against a container engine.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod engine;
pub mod errors;
pub mod logs;
pub mod server;
pub mod storage;
pub mod utils;
