// ================================================================================================
// DEVICE SELECTION
// ================================================================================================
//
// Both models run on the same candle device:
// - CUDA for NVIDIA GPUs (requires the `cuda` feature)
// - Metal for Apple Silicon (requires the `metal` feature)
// - CPU otherwise, and whenever GPU initialisation fails
//
// ================================================================================================

use candle_core::{DType, Device};
use std::env;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuBackend {
    Cuda,
    Metal,
    Cpu,
}

impl GpuBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuBackend::Cuda => "CUDA",
            GpuBackend::Metal => "Metal",
            GpuBackend::Cpu => "CPU",
        }
    }

    /// Parse a `FORCE_GPU_BACKEND` value.
    pub fn from_override(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "cuda" => Some(GpuBackend::Cuda),
            "metal" => Some(GpuBackend::Metal),
            "cpu" => Some(GpuBackend::Cpu),
            _ => None,
        }
    }
}

/// Pick a backend: environment override first, then compiled-in GPU support.
pub fn detect_gpu_backend() -> GpuBackend {
    if let Ok(value) = env::var("FORCE_GPU_BACKEND") {
        match GpuBackend::from_override(&value) {
            Some(backend) => {
                info!("🎮 Forced {} backend via FORCE_GPU_BACKEND", backend.as_str());
                return backend;
            }
            None => {
                warn!("⚠️ Invalid FORCE_GPU_BACKEND value: {}, continuing auto-detection", value);
            }
        }
    }

    if candle_core::utils::cuda_is_available() {
        info!("🚀 CUDA support compiled in - using CUDA backend");
        return GpuBackend::Cuda;
    }

    if candle_core::utils::metal_is_available() {
        info!("🚀 Metal support compiled in - using Metal backend");
        return GpuBackend::Metal;
    }

    info!("💾 No GPU backend available - using CPU");
    GpuBackend::Cpu
}

/// Create the device for `backend`, falling back to CPU on failure.
pub fn select_device(backend: GpuBackend) -> Device {
    let device = match backend {
        GpuBackend::Cuda => Device::new_cuda(0).unwrap_or_else(|e| {
            warn!("❌ Failed to initialize CUDA: {}, using CPU", e);
            Device::Cpu
        }),
        GpuBackend::Metal => Device::new_metal(0).unwrap_or_else(|e| {
            warn!("❌ Failed to initialize Metal: {}, using CPU", e);
            Device::Cpu
        }),
        GpuBackend::Cpu => Device::Cpu,
    };
    info!("📱 Selected device: {:?}", device);
    device
}

/// Weight precision for `device`: half precision on GPUs, full on CPU.
pub fn model_dtype(device: &Device) -> DType {
    if device.is_cpu() {
        DType::F32
    } else {
        DType::F16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_override_parsing() {
        assert_eq!(GpuBackend::from_override("CUDA"), Some(GpuBackend::Cuda));
        assert_eq!(GpuBackend::from_override(" metal "), Some(GpuBackend::Metal));
        assert_eq!(GpuBackend::from_override("cpu"), Some(GpuBackend::Cpu));
        assert_eq!(GpuBackend::from_override("tpu"), None);
    }

    #[test]
    fn test_cpu_device_uses_full_precision() {
        let device = select_device(GpuBackend::Cpu);
        assert!(device.is_cpu());
        assert_eq!(model_dtype(&device), DType::F32);
    }
}
