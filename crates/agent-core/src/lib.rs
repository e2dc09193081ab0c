#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Shared data model, configuration, and device inventory for the GP4U
//! provider agent.

pub mod config;
pub mod device;
pub mod env_sanitize;
pub mod error;
pub mod model;

pub use config::{AgentConfig, CliOverrides, FileConfig};
pub use device::{enumerate_devices, DeviceDescriptor, GpuBackend, UnavailableGpuBackend};
pub use error::CoreError;
pub use model::{JobManifest, RawManifest};
