//! # Device Selection
//!
//! Picks the compute device for model inference from the configured
//! preference, probing accelerator availability and falling back to CPU.

use candle_core::Device;
use tracing::{debug, info, warn};

/// Configured device preference for model placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Probe CUDA, then Metal, then fall back to CPU.
    #[default]
    Auto,
    Cpu,
    /// CUDA if available, otherwise CPU.
    Cuda,
    /// Metal if available, otherwise CPU.
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

/// Resolve a device from the configured preference string.
///
/// Invalid strings fall back to automatic selection rather than failing:
/// device preference is a hint, not a contract.
pub fn select_device(preference: &str) -> Device {
    let preference = match preference.parse::<DevicePreference>() {
        Ok(p) => p,
        Err(_) => {
            warn!("Invalid device preference '{}', using auto", preference);
            DevicePreference::Auto
        }
    };

    match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => probe_cuda().unwrap_or(Device::Cpu),
        DevicePreference::Metal => probe_metal().unwrap_or(Device::Cpu),
        DevicePreference::Auto => {
            if let Some(device) = probe_cuda() {
                info!("Selected CUDA GPU for inference");
                device
            } else if let Some(device) = probe_metal() {
                info!("Selected Metal GPU for inference");
                device
            } else {
                info!("No accelerator available, using CPU for inference");
                Device::Cpu
            }
        }
    }
}

/// Short human-readable name for a device, used in logs and /health.
pub fn device_label(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

fn probe_cuda() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("CUDA not available: {}", e);
            None
        }
    }
}

fn probe_metal() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("Metal not available: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_selection_always_works() {
        let device = select_device("cpu");
        assert_eq!(device_label(&device), "cpu");
    }

    #[test]
    fn test_invalid_preference_falls_back() {
        // Must not panic; resolves to whatever the host supports.
        let device = select_device("quantum");
        assert!(!device_label(&device).is_empty());
    }
}
