//! Memory usage hints and memory type selection.

mod map;

pub use map::MemoryMap;

use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Host access requested for a [`MemoryMap`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryAccess: u32 {
        /// The host reads device-written data.
        const READ = 1 << 0;
        /// The host writes data for the device.
        const WRITE = 1 << 1;
    }
}

/// Intended access pattern of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryUsage {
    /// Only the device touches the memory.
    #[default]
    GpuOnly,
    /// Host-side staging memory, never read by shaders directly.
    CpuOnly,
    /// Written by the host every frame, read by the device.
    CpuToGpu,
    /// Written by the device, read back by the host.
    GpuToCpu,
    /// Host memory used only for copies; kept away from device-local heaps.
    CpuCopy,
}

impl MemoryUsage {
    /// Flags a memory type must have to serve this usage.
    pub fn required_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::GpuOnly => vk::MemoryPropertyFlags::empty(),
            _ => vk::MemoryPropertyFlags::HOST_VISIBLE,
        }
    }

    /// Flags that make a memory type a better fit.
    pub fn preferred_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::GpuOnly | Self::CpuToGpu => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Self::GpuToCpu => vk::MemoryPropertyFlags::HOST_CACHED,
            Self::CpuOnly => vk::MemoryPropertyFlags::HOST_COHERENT,
            Self::CpuCopy => vk::MemoryPropertyFlags::empty(),
        }
    }

    /// Flags that make a memory type a worse fit.
    pub fn not_preferred_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::CpuOnly | Self::CpuCopy => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            _ => vk::MemoryPropertyFlags::empty(),
        }
    }

    /// Whether the host accesses memory of this usage.
    pub fn is_host_visible(self) -> bool {
        self != Self::GpuOnly
    }
}

/// Memory placement request: a usage hint refined by explicit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryProperties {
    /// Usage hint.
    pub usage: MemoryUsage,
    /// Extra flags the memory type must have.
    pub required: vk::MemoryPropertyFlags,
    /// Extra flags the memory type should have.
    pub preferred: vk::MemoryPropertyFlags,
}

impl MemoryProperties {
    /// Properties driven only by a usage hint.
    pub fn new(usage: MemoryUsage) -> Self {
        Self {
            usage,
            required: vk::MemoryPropertyFlags::empty(),
            preferred: vk::MemoryPropertyFlags::empty(),
        }
    }

    /// Device-local memory.
    pub fn gpu_only() -> Self {
        Self::new(MemoryUsage::GpuOnly)
    }

    /// Host-visible memory for uploads.
    pub fn cpu_to_gpu() -> Self {
        Self::new(MemoryUsage::CpuToGpu)
    }

    /// Host-visible memory for readback.
    pub fn gpu_to_cpu() -> Self {
        Self::new(MemoryUsage::GpuToCpu)
    }

    /// Add required flags.
    pub fn with_required(mut self, flags: vk::MemoryPropertyFlags) -> Self {
        self.required |= flags;
        self
    }

    /// Add preferred flags.
    pub fn with_preferred(mut self, flags: vk::MemoryPropertyFlags) -> Self {
        self.preferred |= flags;
        self
    }

    /// All flags a memory type must carry.
    pub fn required_flags(&self) -> vk::MemoryPropertyFlags {
        self.usage.required_flags() | self.required
    }

    /// All flags a memory type should carry.
    pub fn preferred_flags(&self) -> vk::MemoryPropertyFlags {
        self.usage.preferred_flags() | self.preferred
    }
}

/// Pick the memory type index best matching `memory`.
///
/// Candidates must be allowed by `type_bits` and carry every required flag.
/// Among them the type with the fewest missing preferred flags plus present
/// not-preferred flags wins; ties go to the lowest index.
pub fn find_memory_type_index(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    memory: &MemoryProperties,
) -> Option<u32> {
    let required = memory.required_flags();
    let preferred = memory.preferred_flags();
    let not_preferred = memory.usage.not_preferred_flags() & !preferred;

    let count = props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .filter(|index| type_bits & (1 << index) != 0)
        .filter_map(|index| {
            let flags = props.memory_types[index as usize].property_flags;
            if !flags.contains(required) {
                return None;
            }
            let cost = (preferred & !flags).as_raw().count_ones()
                + (not_preferred & flags).as_raw().count_ones();
            Some((cost, index))
        })
        .min()
        .map(|(_, index)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    fn typical() -> vk::PhysicalDeviceMemoryProperties {
        memory_props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
            vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
        ])
    }

    #[test]
    fn test_gpu_only_prefers_device_local() {
        let index = find_memory_type_index(&typical(), !0, &MemoryProperties::gpu_only());
        assert_eq!(index, Some(0));
    }

    #[test]
    fn test_gpu_to_cpu_prefers_cached() {
        let index = find_memory_type_index(&typical(), !0, &MemoryProperties::gpu_to_cpu());
        assert_eq!(index, Some(2));
    }

    #[test]
    fn test_cpu_to_gpu_prefers_device_local_host_visible() {
        let index = find_memory_type_index(&typical(), !0, &MemoryProperties::cpu_to_gpu());
        assert_eq!(index, Some(3));
    }

    #[test]
    fn test_cpu_copy_avoids_device_local() {
        let memory = MemoryProperties::new(MemoryUsage::CpuCopy);
        let index = find_memory_type_index(&typical(), !0, &memory);
        assert_eq!(index, Some(1));
    }

    #[test]
    fn test_type_bits_and_required_flags_filter() {
        let memory = MemoryProperties::gpu_to_cpu();
        // Only the device-local type is allowed; it is not host-visible.
        assert_eq!(find_memory_type_index(&typical(), 0b0001, &memory), None);

        let memory = MemoryProperties::cpu_to_gpu()
            .with_required(vk::MemoryPropertyFlags::HOST_CACHED);
        assert_eq!(find_memory_type_index(&typical(), !0, &memory), Some(2));
    }

    #[test]
    fn test_access_flags() {
        let access = MemoryAccess::READ | MemoryAccess::WRITE;
        assert!(access.contains(MemoryAccess::READ));
        assert!(!MemoryAccess::WRITE.contains(MemoryAccess::READ));
    }
}
