//! Backend abstraction - device selection
//!
//! Chooses CUDA when the `cuda` feature is compiled in and an NVIDIA GPU is
//! present, otherwise falls back to the NdArray CPU backend. The probe runs
//! once per process; later calls return the cached answer.

use std::sync::OnceLock;

use burn::backend::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};
use serde::{Deserialize, Serialize};
use tracing::info;

// --------------------------------------------------------------------------------
// BACKEND TYPES: CUDA (preferred) or NdArray (fallback)
// --------------------------------------------------------------------------------

/// CPU fallback backend, always compiled in
pub type CpuBackend = NdArray<f32>;

/// Autodiff wrapper over the CPU backend
pub type CpuTrainingBackend = Autodiff<CpuBackend>;

#[cfg(feature = "cuda")]
pub type CudaBackend = burn_cuda::Cuda;

#[cfg(feature = "cuda")]
pub type CudaTrainingBackend = Autodiff<CudaBackend>;

/// The compute device picked for a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ComputeDevice {
    /// NVIDIA GPU by ordinal
    Cuda(usize),
    /// General-purpose CPU
    Cpu,
}

impl ComputeDevice {
    pub fn is_accelerator(&self) -> bool {
        matches!(self, ComputeDevice::Cuda(_))
    }
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "CPU"),
            ComputeDevice::Cuda(id) => write!(f, "CUDA:{}", id),
        }
    }
}

static SELECTED_DEVICE: OnceLock<ComputeDevice> = OnceLock::new();

/// Return the device for this process, probing on first call only
pub fn select_device() -> ComputeDevice {
    *SELECTED_DEVICE.get_or_init(|| {
        let device = probe_device();
        info!("Compute device: {} ({})", device, backend_name(&device));
        device
    })
}

fn probe_device() -> ComputeDevice {
    if cfg!(feature = "cuda") && has_nvidia_gpu() {
        ComputeDevice::Cuda(0)
    } else {
        ComputeDevice::Cpu
    }
}

/// Interpret `CUDA_VISIBLE_DEVICES`: `None` when unset, otherwise whether any device is visible
fn cuda_visible(value: Option<&str>) -> Option<bool> {
    value.map(|v| {
        let v = v.trim();
        !(v.is_empty() || v == "-1" || v.eq_ignore_ascii_case("none"))
    })
}

/// Check for an NVIDIA GPU (CUDA)
fn has_nvidia_gpu() -> bool {
    let env = std::env::var("CUDA_VISIBLE_DEVICES").ok();
    if let Some(visible) = cuda_visible(env.as_deref()) {
        if !visible {
            return false;
        }
    }

    #[cfg(target_os = "linux")]
    {
        if std::path::Path::new("/proc/driver/nvidia/version").exists()
            || std::path::Path::new("/dev/nvidia0").exists()
        {
            return true;
        }
    }

    std::process::Command::new("nvidia-smi")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Human-readable backend name for a device
pub fn backend_name(device: &ComputeDevice) -> &'static str {
    match device {
        ComputeDevice::Cuda(_) => "CUDA (GPU)",
        ComputeDevice::Cpu => "NdArray (CPU)",
    }
}

/// Decode workers to use when the config leaves it unset
pub fn default_num_workers(device: &ComputeDevice) -> usize {
    if device.is_accelerator() {
        4
    } else {
        0
    }
}

/// Burn device handle for the CPU backend
pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// Burn device handle for a CUDA ordinal
#[cfg(feature = "cuda")]
pub fn cuda_device(index: usize) -> burn_cuda::CudaDevice {
    burn_cuda::CudaDevice::new(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(ComputeDevice::Cpu.to_string(), "CPU");
        assert_eq!(ComputeDevice::Cuda(1).to_string(), "CUDA:1");
    }

    #[test]
    fn test_cuda_visible_devices_parsing() {
        assert_eq!(cuda_visible(None), None);
        assert_eq!(cuda_visible(Some("")), Some(false));
        assert_eq!(cuda_visible(Some("-1")), Some(false));
        assert_eq!(cuda_visible(Some("0,1")), Some(true));
    }

    #[test]
    fn test_default_workers() {
        assert_eq!(default_num_workers(&ComputeDevice::Cpu), 0);
        assert_eq!(default_num_workers(&ComputeDevice::Cuda(0)), 4);
    }

    #[test]
    fn test_selection_is_cached() {
        let first = select_device();
        let second = select_device();
        assert_eq!(first, second);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cpu_only_build_never_selects_accelerator() {
        assert_eq!(select_device(), ComputeDevice::Cpu);
    }
}
