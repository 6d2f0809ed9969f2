//! Wire models shared by the deployer webhook and its clients.

pub mod models;
