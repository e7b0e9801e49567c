use candle_core::Device;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{DeviceConfig, DevicePreference};
use crate::error::{ChatError, Result};

/// Kind of compute device backing a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cuda,
    Metal,
    Cpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cuda => f.write_str("cuda"),
            DeviceKind::Metal => f.write_str("metal"),
            DeviceKind::Cpu => f.write_str("cpu"),
        }
    }
}

/// A compute device acquired for one model session
#[derive(Debug, Clone)]
pub struct ComputeDevice {
    kind: DeviceKind,
    ordinal: usize,
    device: Device,
}

impl ComputeDevice {
    pub fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            ordinal: 0,
            device: Device::Cpu,
        }
    }

    fn cuda(ordinal: usize) -> Result<Self> {
        let device = Device::new_cuda(ordinal).map_err(|e| ChatError::DeviceUnavailable {
            message: format!("cuda:{}: {}", ordinal, e),
        })?;
        Ok(Self {
            kind: DeviceKind::Cuda,
            ordinal,
            device,
        })
    }

    fn metal(ordinal: usize) -> Result<Self> {
        let device = Device::new_metal(ordinal).map_err(|e| ChatError::DeviceUnavailable {
            message: format!("metal:{}: {}", ordinal, e),
        })?;
        Ok(Self {
            kind: DeviceKind::Metal,
            ordinal,
            device,
        })
    }

    /// Acquire a device according to `config`. `Auto` tries CUDA, then Metal,
    /// then the CPU if fallback is allowed.
    pub fn acquire(config: &DeviceConfig) -> Result<Self> {
        let device = match config.preference {
            DevicePreference::Cpu => Ok(Self::cpu()),
            DevicePreference::Cuda => Self::cuda(config.ordinal),
            DevicePreference::Metal => Self::metal(config.ordinal),
            DevicePreference::Auto => Self::acquire_auto(config),
        }?;
        info!(device = %device.label(), "Acquired compute device");
        Ok(device)
    }

    fn acquire_auto(config: &DeviceConfig) -> Result<Self> {
        if candle_core::utils::cuda_is_available() {
            match Self::cuda(config.ordinal) {
                Ok(device) => return Ok(device),
                Err(e) => warn!(error = %e, "CUDA device unavailable"),
            }
        }
        if candle_core::utils::metal_is_available() {
            match Self::metal(config.ordinal) {
                Ok(device) => return Ok(device),
                Err(e) => warn!(error = %e, "Metal device unavailable"),
            }
        }
        if config.allow_cpu_fallback {
            debug!("No accelerator available, falling back to CPU");
            return Ok(Self::cpu());
        }
        Err(ChatError::DeviceUnavailable {
            message: "no GPU adapter found and CPU fallback is disabled".to_string(),
        })
    }

    /// Wait for outstanding work so buffers can be dropped safely
    pub fn release(&self) -> Result<()> {
        self.device.synchronize().map_err(|e| ChatError::DeviceUnavailable {
            message: format!("failed to release {}: {}", self.label(), e),
        })?;
        debug!(device = %self.label(), "Released compute device");
        Ok(())
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn is_cpu(&self) -> bool {
        self.kind == DeviceKind::Cpu
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Display label such as `cuda:0` or `cpu`
    pub fn label(&self) -> String {
        match self.kind {
            DeviceKind::Cpu => self.kind.to_string(),
            kind => format!("{}:{}", kind, self.ordinal),
        }
    }
}
