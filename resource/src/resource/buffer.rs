//! Buffer resources.

use std::sync::Arc;

use ash::vk;

use crate::device::{AllocationRequest, Device};
use crate::error::ResourceError;
use crate::policy::AllocationPolicy;
use crate::types::BufferDescriptor;

use super::{DeviceObject, Resource};

/// A buffer with its own device memory.
pub type Buffer<D> = Resource<D, BufferObject>;

/// Immutable buffer properties recorded at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferProperties {
    /// Requested size in bytes.
    pub size: u64,
    /// Start of the usable byte range.
    pub mem_offset: u64,
    /// Length of the usable byte range.
    pub mem_range: u64,
    /// Native usage flags.
    pub usage: vk::BufferUsageFlags,
}

/// Native part of a [`Buffer`].
#[derive(Debug, Default)]
pub struct BufferObject {
    handle: vk::Buffer,
    properties: BufferProperties,
}

impl DeviceObject for BufferObject {
    const KIND: &'static str = "Buffer";

    fn is_null(&self) -> bool {
        self.handle == vk::Buffer::null()
    }

    fn destroy<D: Device>(&mut self, device: &D) {
        device.destroy_buffer(std::mem::take(&mut self.handle));
    }

    fn host_len(&self) -> Option<u64> {
        Some(self.properties.mem_range)
    }
}

impl<D: Device> Resource<D, BufferObject> {
    /// The native buffer handle; null when empty.
    pub fn handle(&self) -> vk::Buffer {
        self.object().handle
    }

    /// Properties recorded at creation.
    pub fn properties(&self) -> &BufferProperties {
        &self.object().properties
    }

    /// Requested size in bytes.
    pub fn size(&self) -> u64 {
        self.object().properties.size
    }
}

/// Create a buffer, allocate memory for it and bind the two.
///
/// A policy, when given, may steer the allocation into a sub-pool. On failure
/// everything created so far is released again.
pub(crate) fn create_buffer<D: Device>(
    device: &Arc<D>,
    descriptor: &BufferDescriptor,
    policy: Option<&mut Box<dyn AllocationPolicy<D>>>,
) -> Result<Buffer<D>, ResourceError> {
    crate::profile_scope!("create_buffer");

    let info = vk::BufferCreateInfo::default()
        .size(descriptor.size)
        .usage(descriptor.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let handle = device.create_buffer(&info)?;

    let mut buffer = Resource::new(
        Arc::clone(device),
        BufferObject {
            handle,
            properties: BufferProperties {
                size: descriptor.size,
                mem_offset: 0,
                mem_range: descriptor.size,
                usage: descriptor.usage,
            },
        },
    );

    let requirements = device.buffer_memory_requirements(handle);
    let name = descriptor.label.as_deref().unwrap_or("buffer");
    let mut request = AllocationRequest::buffer(name, descriptor.memory);
    if let Some(policy) = policy {
        policy.enact(device, &requirements, &mut request)?;
    }

    let allocation = device.allocate_memory(&requirements, &request)?;
    let allocation = buffer.attach_memory(allocation);
    device.bind_buffer_memory(handle, allocation)?;

    log::trace!(
        "Created buffer {:?} ({} bytes, {:?})",
        descriptor.label,
        descriptor.size,
        descriptor.memory.usage
    );
    Ok(buffer)
}
