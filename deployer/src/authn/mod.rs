//! Request authentication

pub mod gate;
pub mod layer;
