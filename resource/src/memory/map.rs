//! Scoped host access to a resource's memory.

use std::marker::PhantomData;
use std::ptr::NonNull;

use bytemuck::Pod;

use crate::device::Device;
use crate::error::ResourceError;
use crate::resource::{DeviceObject, Resource};

use super::MemoryAccess;

struct Mapping<'a, D: Device> {
    device: &'a D,
    allocation: &'a D::Allocation,
    data: NonNull<u8>,
    len: usize,
}

/// Host view of a resource's memory.
///
/// The map borrows the resource, so it cannot outlive it. Writes are flushed
/// when a `WRITE` map drops; device writes become visible to a `READ` map
/// after [`invalidate`](Self::invalidate). Mapping an empty resource yields
/// an empty map that drops as a no-op.
///
/// Two live maps over the same allocation must not be used from different
/// threads; the map is neither `Send` nor `Sync`.
///
/// # Example
///
/// ```ignore
/// {
///     let mut map = MemoryMap::new(&buffer, MemoryAccess::WRITE)?;
///     map.write_pod(0, &0xdead_beef_u32);
/// } // flushed here
///
/// let mut map = MemoryMap::new(&buffer, MemoryAccess::READ)?;
/// map.invalidate()?;
/// let value: u32 = map.read_pod(0);
/// ```
pub struct MemoryMap<'a, D: Device> {
    mapping: Option<Mapping<'a, D>>,
    access: MemoryAccess,
    _not_send: PhantomData<*mut u8>,
}

impl<'a, D: Device> MemoryMap<'a, D> {
    /// Map `resource` for the given access.
    ///
    /// Fails with [`ResourceError::NotHostVisible`] when the backing memory
    /// cannot be mapped. No invalidate happens here.
    pub fn new<O: DeviceObject>(
        resource: &'a Resource<D, O>,
        access: MemoryAccess,
    ) -> Result<Self, ResourceError> {
        let (Some(device), Some(allocation)) = (resource.device(), resource.allocation()) else {
            return Ok(Self {
                mapping: None,
                access,
                _not_send: PhantomData,
            });
        };

        let info = device.allocation_info(allocation);
        if !info.is_host_visible() {
            return Err(ResourceError::NotHostVisible);
        }
        let data = device.map_memory(allocation)?;
        let len = resource
            .object()
            .host_len()
            .unwrap_or(info.size)
            .min(info.size) as usize;

        Ok(Self {
            mapping: Some(Mapping {
                device: &**device,
                allocation,
                data,
                len,
            }),
            access,
            _not_send: PhantomData,
        })
    }

    /// Access mode this map was created with.
    pub fn access(&self) -> MemoryAccess {
        self.access
    }

    /// Number of mapped bytes.
    pub fn len(&self) -> usize {
        self.mapping.as_ref().map_or(0, |mapping| mapping.len)
    }

    /// Whether nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pull device writes into host-visible memory.
    ///
    /// May be called any number of times. Does nothing without `READ` access.
    pub fn invalidate(&mut self) -> Result<(), ResourceError> {
        if !self.access.contains(MemoryAccess::READ) {
            return Ok(());
        }
        match &self.mapping {
            Some(mapping) => {
                mapping
                    .device
                    .invalidate_memory(mapping.allocation, 0, mapping.len as u64)
            }
            None => Ok(()),
        }
    }

    /// Mapped bytes for reading.
    ///
    /// # Panics
    ///
    /// Panics without `READ` access.
    pub fn as_slice(&self) -> &[u8] {
        assert!(
            self.access.contains(MemoryAccess::READ),
            "Memory map was not created with READ access!"
        );
        match &self.mapping {
            // SAFETY: the allocation stays mapped and alive while the
            // resource is borrowed, and spans at least `len` bytes.
            Some(mapping) => unsafe {
                std::slice::from_raw_parts(mapping.data.as_ptr(), mapping.len)
            },
            None => &[],
        }
    }

    /// Mapped bytes for writing.
    ///
    /// # Panics
    ///
    /// Panics without `WRITE` access.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        assert!(
            self.access.contains(MemoryAccess::WRITE),
            "Memory map was not created with WRITE access!"
        );
        match &mut self.mapping {
            // SAFETY: as in `as_slice`; `&mut self` makes the view unique.
            Some(mapping) => unsafe {
                std::slice::from_raw_parts_mut(mapping.data.as_ptr(), mapping.len)
            },
            None => &mut [],
        }
    }

    /// Read a plain value at `offset`.
    ///
    /// # Panics
    ///
    /// Panics without `READ` access or if the value does not fit.
    pub fn read_pod<T: Pod>(&self, offset: usize) -> T {
        let size = std::mem::size_of::<T>();
        bytemuck::pod_read_unaligned(&self.as_slice()[offset..offset + size])
    }

    /// Write a plain value at `offset`.
    ///
    /// # Panics
    ///
    /// Panics without `WRITE` access or if the value does not fit.
    pub fn write_pod<T: Pod>(&mut self, offset: usize, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        self.as_mut_slice()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl<D: Device> Drop for MemoryMap<'_, D> {
    fn drop(&mut self) {
        let Some(mapping) = self.mapping.take() else {
            return;
        };
        if self.access.contains(MemoryAccess::WRITE) {
            if let Err(e) = mapping
                .device
                .flush_memory(mapping.allocation, 0, mapping.len as u64)
            {
                log::error!("Failed to flush mapped memory: {}", e);
            }
        }
        mapping.device.unmap_memory(mapping.allocation);
    }
}
