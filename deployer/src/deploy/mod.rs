//! Deployment module

pub mod config;
pub mod fsm;
pub mod locks;
pub mod orchestrator;
pub mod status;
