//! Resource error types.

use std::fmt;

use ash::vk;

/// Errors that can occur while creating, mapping or releasing GPU resources.
///
/// Precondition violations (null handles, use of an invalidated pool, mapping
/// with the wrong access) are programming errors and panic instead of
/// producing one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Failed to initialize the allocator for a device.
    InitializationFailed(String),
    /// The allocator rejected a memory request.
    AllocationFailed(String),
    /// Failed to create a native object (buffer, image, view, sampler, fence).
    ResourceCreationFailed(String),
    /// Out of device or host memory.
    OutOfMemory,
    /// The memory backing a resource cannot be mapped by the host.
    NotHostVisible,
    /// The GPU device was lost.
    DeviceLost,
    /// A wait that must complete timed out.
    Timeout,
    /// An internal error occurred.
    Internal(String),
}

impl ResourceError {
    /// Classify a native Vulkan result code.
    pub(crate) fn from_vk(context: &str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                Self::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::TIMEOUT => Self::Timeout,
            other => Self::ResourceCreationFailed(format!("{context}: {other:?}")),
        }
    }

    /// Whether this error reports memory exhaustion.
    ///
    /// Callers typically react by freeing caches and retrying at a higher level.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory)
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::AllocationFailed(msg) => write!(f, "memory allocation failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::NotHostVisible => write!(f, "memory is not host visible"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::Timeout => write!(f, "wait timed out"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ResourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResourceError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = ResourceError::AllocationFailed("pool exhausted".to_string());
        assert_eq!(err.to_string(), "memory allocation failed: pool exhausted");
    }

    #[test]
    fn test_from_vk_classification() {
        assert_eq!(
            ResourceError::from_vk("create buffer", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            ResourceError::OutOfMemory
        );
        assert_eq!(
            ResourceError::from_vk("wait", vk::Result::ERROR_DEVICE_LOST),
            ResourceError::DeviceLost
        );
        assert!(matches!(
            ResourceError::from_vk("create view", vk::Result::ERROR_FORMAT_NOT_SUPPORTED),
            ResourceError::ResourceCreationFailed(msg) if msg.starts_with("create view")
        ));
    }

    #[test]
    fn test_is_out_of_memory() {
        assert!(ResourceError::OutOfMemory.is_out_of_memory());
        assert!(!ResourceError::DeviceLost.is_out_of_memory());
    }
}
