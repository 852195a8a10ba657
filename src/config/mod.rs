//! Configuration Module
//!
//! Handles client configuration loading.

pub mod client;
pub mod loader;

pub use client::ClientConfig;
pub use loader::ConfigLoader;
