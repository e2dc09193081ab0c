#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Typed control-plane HTTP client (spec.md §4.2, §6).

pub mod client;
pub mod error;
pub mod types;

pub use client::ControlPlaneClient;
pub use error::ApiError;
