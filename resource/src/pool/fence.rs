//! Recyclable fence slots.
//!
//! ```text
//! fences:   [ f0 | f1 | f2 | f3 ]      grows on demand, never shrinks
//!                        ^ in_use = 3  next fence() hands out f3
//! waitlist: { f0, f2 }                 submitted, pending completion
//! ```
//!
//! Slots below `in_use` are either idle or on the wait-list. Only the pool's
//! purge resets `in_use` to zero; it also bumps the epoch so handles from
//! before the purge no longer resolve.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use parking_lot::Mutex;

use crate::device::Device;
use crate::error::ResourceError;

#[derive(Debug, Default)]
pub(crate) struct FenceSlots {
    fences: Vec<vk::Fence>,
    in_use: usize,
    waitlist: Vec<vk::Fence>,
    epoch: u64,
}

impl FenceSlots {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fences: Vec::with_capacity(capacity),
            in_use: 0,
            waitlist: Vec::with_capacity(capacity),
            epoch: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn waiting(&self) -> usize {
        self.waitlist.len()
    }

    /// Index of the next slot, creating its fence if every slot is taken.
    pub fn acquire<D: Device>(&mut self, device: &D) -> Result<usize, ResourceError> {
        if self.in_use == self.fences.len() {
            let fence = device.create_fence(false)?;
            self.fences.push(fence);
        }
        let index = self.in_use;
        self.in_use += 1;
        Ok(index)
    }

    /// Wait for every submitted fence, reset them, and make all slots free.
    pub fn recycle<D: Device>(&mut self, device: &D) -> Result<(), ResourceError> {
        if !self.waitlist.is_empty() {
            crate::profile_scope!("FenceSlots::recycle");
            log::trace!("Waiting for {} submitted fences", self.waitlist.len());
            device.wait_for_fences(&self.waitlist, None)?;
            device.reset_fences(&self.waitlist)?;
            self.waitlist.clear();
        }
        self.in_use = 0;
        self.epoch += 1;
        Ok(())
    }

    /// Destroy every fence. The slots must not be used afterwards.
    pub fn destroy<D: Device>(&mut self, device: &D) {
        for fence in self.fences.drain(..) {
            device.destroy_fence(fence);
        }
        self.waitlist.clear();
        self.in_use = 0;
    }

    fn fence(&self, index: usize, epoch: u64) -> Option<vk::Fence> {
        if epoch != self.epoch {
            return None;
        }
        self.fences.get(index).copied()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Handle to a fence slot of a [`ResourcePool`](crate::ResourcePool).
///
/// The execution layer calls [`submit_handle`](Self::submit_handle) when it
/// submits work signalling the fence; only then does [`wait`](Self::wait)
/// block. Handles are invalidated by the pool's purge: afterwards they
/// resolve to a null fence and waiting on them returns immediately.
pub struct FenceHandle<D: Device> {
    device: Arc<D>,
    slots: Arc<Mutex<FenceSlots>>,
    index: usize,
    epoch: u64,
}

impl<D: Device> FenceHandle<D> {
    pub(crate) fn new(
        device: Arc<D>,
        slots: Arc<Mutex<FenceSlots>>,
        index: usize,
        epoch: u64,
    ) -> Self {
        Self {
            device,
            slots,
            index,
            epoch,
        }
    }

    /// Slot index inside the pool's fence array.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The native fence without marking it submitted; null when stale.
    pub fn handle(&self) -> vk::Fence {
        self.slots
            .lock()
            .fence(self.index, self.epoch)
            .unwrap_or_default()
    }

    /// The native fence, recorded as submitted so waits block on it.
    ///
    /// Returns a null fence when the handle is stale.
    pub fn submit_handle(&self) -> vk::Fence {
        let mut slots = self.slots.lock();
        let Some(fence) = slots.fence(self.index, self.epoch) else {
            log::warn!("Submitting stale fence handle (slot {})", self.index);
            return vk::Fence::null();
        };
        if !slots.waitlist.contains(&fence) {
            slots.waitlist.push(fence);
        }
        fence
    }

    /// Whether the fence is submitted and not yet waited on.
    pub fn is_submitted(&self) -> bool {
        let slots = self.slots.lock();
        slots
            .fence(self.index, self.epoch)
            .is_some_and(|fence| slots.waitlist.contains(&fence))
    }

    /// Block until the submitted fence signals or `timeout` elapses.
    ///
    /// `None` waits indefinitely. A handle that was never submitted (or was
    /// already waited on) returns `Ok(true)` without blocking. On completion
    /// the fence is reset and leaves the wait-list; on timeout it stays
    /// there and `Ok(false)` is returned.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool, ResourceError> {
        let fence = {
            let slots = self.slots.lock();
            match slots.fence(self.index, self.epoch) {
                Some(fence) if slots.waitlist.contains(&fence) => fence,
                _ => return Ok(true),
            }
        };

        crate::profile_scope!("FenceHandle::wait");
        if !self.device.wait_for_fences(&[fence], timeout)? {
            return Ok(false);
        }

        let mut slots = self.slots.lock();
        if let Some(position) = slots.waitlist.iter().position(|&f| f == fence) {
            self.device.reset_fences(&[fence])?;
            slots.waitlist.swap_remove(position);
        }
        Ok(true)
    }
}

impl<D: Device> std::fmt::Debug for FenceHandle<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FenceHandle")
            .field("index", &self.index)
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyDevice;

    fn handle(
        device: &Arc<DummyDevice>,
        slots: &Arc<Mutex<FenceSlots>>,
    ) -> FenceHandle<DummyDevice> {
        let mut guard = slots.lock();
        let index = guard.acquire(&**device).unwrap();
        FenceHandle::new(Arc::clone(device), Arc::clone(slots), index, guard.epoch())
    }

    #[test]
    fn test_acquire_grows_then_reuses() {
        let device = Arc::new(DummyDevice::new());
        let mut slots = FenceSlots::with_capacity(2);

        assert_eq!(slots.acquire(&*device).unwrap(), 0);
        assert_eq!(slots.acquire(&*device).unwrap(), 1);
        assert_eq!(slots.len(), 2);

        slots.recycle(&*device).unwrap();
        assert_eq!(slots.in_use(), 0);
        assert_eq!(slots.acquire(&*device).unwrap(), 0);
        assert_eq!(device.stats().fences_created, 2);

        slots.destroy(&*device);
        assert_eq!(device.stats().fences_destroyed, 2);
    }

    #[test]
    fn test_wait_without_submit_does_not_block() {
        let device = Arc::new(DummyDevice::new().with_manual_fences());
        let slots = Arc::new(Mutex::new(FenceSlots::default()));
        let fence = handle(&device, &slots);

        assert!(fence.wait(None).unwrap());
        assert_eq!(device.stats().fence_waits, 0);
        slots.lock().destroy(&*device);
    }

    #[test]
    fn test_wait_timeout_keeps_fence_submitted() {
        let device = Arc::new(DummyDevice::new().with_manual_fences());
        let slots = Arc::new(Mutex::new(FenceSlots::default()));
        let fence = handle(&device, &slots);

        let raw = fence.submit_handle();
        assert!(fence.is_submitted());
        assert!(!fence.wait(Some(Duration::from_millis(5))).unwrap());
        assert!(fence.is_submitted());

        device.signal_fence(raw);
        assert!(fence.wait(Some(Duration::from_secs(5))).unwrap());
        assert!(!fence.is_submitted());
        assert!(!device.is_fence_signaled(raw));
        slots.lock().destroy(&*device);
    }

    #[test]
    fn test_stale_handle_after_recycle() {
        let device = Arc::new(DummyDevice::new());
        let slots = Arc::new(Mutex::new(FenceSlots::default()));
        let fence = handle(&device, &slots);
        assert_ne!(fence.handle(), vk::Fence::null());

        slots.lock().recycle(&*device).unwrap();
        assert_eq!(fence.handle(), vk::Fence::null());
        assert_eq!(fence.submit_handle(), vk::Fence::null());
        assert!(fence.wait(None).unwrap());
        slots.lock().destroy(&*device);
    }
}
