//! RAII resource objects binding a native object to its device memory.
//!
//! A [`Resource`] is either live (device, native object and allocation) or
//! empty. The empty state is what [`Default`] produces and what
//! `std::mem::take` leaves behind, so releasing a moved-from resource is a
//! structural no-op.
//!
//! ```text
//! Resource<D, O>
//!   device: Option<Arc<D>>      None  => empty, release() does nothing
//!   object: O                   native handles (buffer | image + view)
//!   memory: Option<Allocation>  freed after the object is destroyed
//! ```

mod buffer;
mod image;

pub use buffer::{Buffer, BufferObject, BufferProperties};
pub use image::{Image, ImageObject};

pub(crate) use buffer::create_buffer;
pub(crate) use image::create_image;

use std::fmt;
use std::sync::Arc;

use crate::device::Device;

/// Native object part of a [`Resource`].
pub trait DeviceObject: Default + fmt::Debug + Send + Sync + 'static {
    /// Kind name for logging.
    const KIND: &'static str;

    /// Whether no native handle is held.
    fn is_null(&self) -> bool;

    /// Destroy every native handle held, dependents first.
    fn destroy<D: Device>(&mut self, device: &D);

    /// Byte length the host sees when mapping, if narrower than the allocation.
    fn host_len(&self) -> Option<u64> {
        None
    }
}

/// A native object together with the device memory bound to it.
pub struct Resource<D: Device, O: DeviceObject> {
    device: Option<Arc<D>>,
    object: O,
    memory: Option<D::Allocation>,
}

impl<D: Device, O: DeviceObject> Resource<D, O> {
    /// A live resource without memory; memory is attached during creation.
    pub(crate) fn new(device: Arc<D>, object: O) -> Self {
        Self {
            device: Some(device),
            object,
            memory: None,
        }
    }

    /// Whether this is the empty sentinel.
    pub fn is_empty(&self) -> bool {
        self.device.is_none()
    }

    /// The owning device, unless empty.
    pub fn device(&self) -> Option<&Arc<D>> {
        self.device.as_ref()
    }

    /// The backing memory allocation, unless empty.
    pub fn allocation(&self) -> Option<&D::Allocation> {
        self.memory.as_ref()
    }

    /// The native object part.
    pub fn object(&self) -> &O {
        &self.object
    }

    pub(crate) fn object_mut(&mut self) -> &mut O {
        &mut self.object
    }

    pub(crate) fn attach_memory(&mut self, allocation: D::Allocation) -> &D::Allocation {
        self.memory.insert(allocation)
    }

    /// Destroy the native object, then free its memory.
    ///
    /// Releasing an empty or already released resource does nothing.
    pub fn release(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };

        if !self.object.is_null() {
            log::trace!("Releasing {} {:?}", O::KIND, self.object);
            self.object.destroy(&*device);
        }
        if let Some(allocation) = self.memory.take() {
            if let Err(e) = device.free_memory(allocation) {
                log::error!("Failed to free {} allocation: {}", O::KIND, e);
            }
        }
        self.object = O::default();
    }
}

impl<D: Device, O: DeviceObject> Default for Resource<D, O> {
    fn default() -> Self {
        Self {
            device: None,
            object: O::default(),
            memory: None,
        }
    }
}

impl<D: Device, O: DeviceObject> Drop for Resource<D, O> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<D: Device, O: DeviceObject> fmt::Debug for Resource<D, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(O::KIND)
            .field("device", &self.device.as_ref().map(|device| device.name()))
            .field("object", &self.object)
            .field("memory", &self.memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DummyDevice;

    #[test]
    fn test_default_is_empty() {
        let buffer = Buffer::<DummyDevice>::default();
        assert!(buffer.is_empty());
        assert!(buffer.allocation().is_none());
        assert!(buffer.object().is_null());
    }

    #[test]
    fn test_release_empty_is_noop() {
        let mut image = Image::<DummyDevice>::default();
        image.release();
        image.release();
        assert!(image.is_empty());
    }
}
