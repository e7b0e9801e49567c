//! Compute device acquisition and release

mod device;

pub use device::{ComputeDevice, DeviceKind};
