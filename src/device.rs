//! Device and model-cache management boundary.
//!
//! The device cache is exclusively owned by the worker loop; these hooks are
//! only ever called from the worker thread, at policy-determined points.

use tracing::debug;

use crate::error::ReclaimError;

/// Accelerator-side resource management, provided by the host integration.
pub trait DeviceManager: Send + Sync {
    /// Unload every cached model and release its device allocations.
    fn release_cached_resources(&self) -> Result<(), ReclaimError>;

    /// Return device-side memory caches to the allocator.
    fn flush_device_cache(&self) -> Result<(), ReclaimError>;
}

/// Device manager for hosts without a managed accelerator.
#[derive(Debug, Default)]
pub struct NullDevice;

impl DeviceManager for NullDevice {
    fn release_cached_resources(&self) -> Result<(), ReclaimError> {
        debug!("No device attached, nothing to unload");
        Ok(())
    }

    fn flush_device_cache(&self) -> Result<(), ReclaimError> {
        debug!("No device attached, nothing to flush");
        Ok(())
    }
}
