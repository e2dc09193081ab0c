//! GPU device inventory (spec.md §4.1).
//!
//! `enumerate_devices` never fails: it tries a management-library binding,
//! falls back to parsing `nvidia-smi`, and finally falls back to a single
//! mock descriptor. Grounded on `original_source`'s `gpu_discovery.py`.

use serde::Serialize;
use tracing::warn;

/// A stable description of one locally visible GPU.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDescriptor {
    /// Stable UUID, survives reboots.
    pub uuid: String,
    /// Human-readable model name.
    pub name: String,
    /// VRAM, GB.
    pub vram_gb: f64,
    /// Driver version string.
    pub driver_version: String,
    /// CUDA runtime version, if known.
    pub cuda_version: Option<String>,
    /// Total memory, MB.
    pub total_memory_mb: u64,
    /// PCIe link generation.
    pub pcie_link_gen: u32,
    /// PCIe link width.
    pub pcie_link_width: u32,
}

/// The management-library binding this process is built against. Production
/// binds to the real NVML wrapper; that binding is an external collaborator
/// (spec.md §1, out of scope) so only the seam lives here.
pub trait GpuBackend {
    /// Attempt to enumerate devices via the bound library.
    fn discover(&self) -> anyhow::Result<Vec<DeviceDescriptor>>;
}

/// A backend that always reports the library as unavailable, matching the
/// Python original's behavior whenever `pynvml` is not importable on the
/// host. Swap in a real NVML-backed implementation in a production build.
pub struct UnavailableGpuBackend;

impl GpuBackend for UnavailableGpuBackend {
    fn discover(&self) -> anyhow::Result<Vec<DeviceDescriptor>> {
        anyhow::bail!("NVML binding not available in this build")
    }
}

/// Discover all GPUs on this host: management library, then `nvidia-smi`,
/// then a mock descriptor. Never returns an error.
pub async fn enumerate_devices(backend: &dyn GpuBackend) -> Vec<DeviceDescriptor> {
    match backend.discover() {
        Ok(devices) => return devices,
        Err(err) => warn!(target: "agent::device", %err, "management library discovery failed, trying nvidia-smi"),
    }

    match discover_via_nvidia_smi().await {
        Ok(devices) if !devices.is_empty() => return devices,
        Ok(_) => warn!(target: "agent::device", "nvidia-smi returned no devices, using mock GPU data"),
        Err(err) => warn!(target: "agent::device", %err, "nvidia-smi fallback failed, using mock GPU data"),
    }

    vec![mock_device()]
}

async fn discover_via_nvidia_smi() -> anyhow::Result<Vec<DeviceDescriptor>> {
    let output = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        tokio::process::Command::new("nvidia-smi")
            .arg("--query-gpu=gpu_uuid,name,memory.total,driver_version")
            .arg("--format=csv,noheader,nounits")
            .output(),
    )
    .await??;

    if !output.status.success() {
        anyhow::bail!(
            "nvidia-smi exit {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut devices = Vec::new();
    for line in stdout.lines() {
        let parts: Vec<&str> = line.split(',').map(|p| p.trim()).collect();
        if parts.len() < 4 {
            continue;
        }
        let (uuid, name, mem_mb_str, driver) = (parts[0], parts[1], parts[2], parts[3]);
        let Ok(mem_mb) = mem_mb_str.parse::<u64>() else {
            continue;
        };
        devices.push(DeviceDescriptor {
            uuid: uuid.to_string(),
            name: name.to_string(),
            vram_gb: round2(mem_mb as f64 / 1024.0),
            driver_version: driver.to_string(),
            cuda_version: None,
            total_memory_mb: mem_mb,
            pcie_link_gen: 4,
            pcie_link_width: 16,
        });
    }
    Ok(devices)
}

fn mock_device() -> DeviceDescriptor {
    DeviceDescriptor {
        uuid: "GPU-MOCK-00000000-0000-0000-0000-000000000001".to_string(),
        name: "NVIDIA Mock RTX 4090 (CI)".to_string(),
        vram_gb: 24.0,
        driver_version: "545.23.08".to_string(),
        cuda_version: Some("12.3".to_string()),
        total_memory_mb: 24576,
        pcie_link_gen: 4,
        pcie_link_width: 16,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_backend_falls_through_to_mock_or_smi() {
        let devices = enumerate_devices(&UnavailableGpuBackend).await;
        assert!(!devices.is_empty());
    }
}
