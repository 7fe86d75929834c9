//! # umbra-core
//! Foundation types and collaborator contracts for the Umbra protocol.

pub mod coins;
pub mod constants;
pub mod feerate;
pub mod types;
