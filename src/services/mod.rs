//! Core of the gateway: store adapter, derivative naming and building,
//! transport strategies and the facade composing them.

pub mod auth;
pub mod codec;
pub mod gateway;
pub mod resolver;
pub mod storage;
pub mod transcode;
pub mod transport;
