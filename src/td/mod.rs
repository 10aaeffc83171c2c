//! Everything that speaks to TDLib.

pub mod gateway;
pub mod json_client;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use gateway::{Gateway, GatewayError};
