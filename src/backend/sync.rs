// Synchronization primitives
//
// One FrameSync per frame-in-flight slot. The fence bounds how far the CPU
// runs ahead; the semaphores order acquire -> render -> present on the GPU.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

/// Ten seconds. Long enough for any sane frame, short enough to notice a hang.
pub const FENCE_TIMEOUT_NS: u64 = 10_000_000_000;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create semaphore")?,
                render_finished: device
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create semaphore")?,
                in_flight_fence: device
                    .device
                    .create_fence(&fence_info, None)
                    .context("Failed to create fence")?,
            })
        }
    }

    /// Block until the GPU is done with whatever this slot last submitted
    pub fn wait(&self, device: &ash::Device) -> Result<()> {
        wait_fence(device, self.in_flight_fence)
    }

    /// Unsignal the fence right before it is handed to a submission
    pub fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }.context("vkResetFences failed")
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

pub fn wait_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    unsafe { device.wait_for_fences(&[fence], true, FENCE_TIMEOUT_NS) }
        .context("Timed out or failed waiting for a frame fence")
}
