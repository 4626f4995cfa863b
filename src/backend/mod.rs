// Backend module - Vulkan implementation of the renderer backend
//
// Thin wrappers around ash. Each wrapper owns its handles and releases them
// on Drop; `VulkanBackend` sequences them for the lifecycle controller.

pub mod buffer;
pub mod commands;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use context::{BackendSettings, VulkanBackend};
pub use device::VulkanDevice;
