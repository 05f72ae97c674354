//! Standalone fence for the direct creation path.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use crate::device::Device;
use crate::error::ResourceError;

/// A fence owned outside any pool.
///
/// [`submit_handle`](Self::submit_handle) marks the fence as waited-for;
/// [`wait`](Self::wait) is a no-op until then and resets the fence once it
/// has signalled.
pub struct Fence<D: Device> {
    device: Arc<D>,
    handle: vk::Fence,
    waiting: bool,
}

impl<D: Device> Fence<D> {
    /// Create an unsignalled fence.
    pub fn new(device: Arc<D>) -> Result<Self, ResourceError> {
        let handle = device.create_fence(false)?;
        Ok(Self {
            device,
            handle,
            waiting: false,
        })
    }

    /// The native fence without marking it submitted.
    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    /// The native fence, recorded as submitted.
    pub fn submit_handle(&mut self) -> vk::Fence {
        self.waiting = true;
        self.handle
    }

    /// Whether the fence is submitted and not yet waited on.
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Block until the submitted fence signals or `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout; the fence then stays submitted.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<bool, ResourceError> {
        if !self.waiting {
            return Ok(true);
        }
        crate::profile_scope!("Fence::wait");
        if !self.device.wait_for_fences(&[self.handle], timeout)? {
            return Ok(false);
        }
        self.device.reset_fences(&[self.handle])?;
        self.waiting = false;
        Ok(true)
    }
}

impl<D: Device> Drop for Fence<D> {
    fn drop(&mut self) {
        if self.waiting {
            log::warn!("Destroying fence {:?} that was submitted but never waited on", self.handle);
        }
        self.device.destroy_fence(self.handle);
    }
}

impl<D: Device> std::fmt::Debug for Fence<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("handle", &self.handle)
            .field("waiting", &self.waiting)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyDevice;

    #[test]
    fn test_wait_before_submit_is_noop() {
        let device = Arc::new(DummyDevice::new().with_manual_fences());
        let mut fence = Fence::new(Arc::clone(&device)).unwrap();
        assert!(fence.wait(None).unwrap());
        assert_eq!(device.stats().fence_waits, 0);
    }

    #[test]
    fn test_submit_wait_reset() {
        let device = Arc::new(DummyDevice::new().with_manual_fences());
        let mut fence = Fence::new(Arc::clone(&device)).unwrap();

        let raw = fence.submit_handle();
        assert!(!fence.wait(Some(Duration::from_millis(1))).unwrap());
        assert!(fence.is_waiting());

        device.signal_fence(raw);
        assert!(fence.wait(None).unwrap());
        assert!(!fence.is_waiting());
        assert!(!device.is_fence_signaled(raw));

        drop(fence);
        assert_eq!(device.stats().fences_destroyed, 1);
    }
}
