// Descriptor objects
//
// One set layout (a uniform buffer at binding 0, vertex stage) and a pool big
// enough for one set per swapchain image. Per-image uniforms are created the
// first time an image index shows up and are kept until shutdown.

use anyhow::{Context, Result};
use ash::vk;
use glam::Mat4;
use std::sync::Arc;

use super::buffer::HostBuffer;
use super::swapchain::MAX_SWAPCHAIN_IMAGES;
use super::VulkanDevice;

const UNIFORM_SIZE: vk::DeviceSize = std::mem::size_of::<Mat4>() as vk::DeviceSize;

pub struct DescriptorObjects {
    pub layout: vk::DescriptorSetLayout,
    pub pool: vk::DescriptorPool,
    device: Arc<VulkanDevice>,
}

impl DescriptorObjects {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build()];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
            .context("Failed to create descriptor set layout")?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: MAX_SWAPCHAIN_IMAGES,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(MAX_SWAPCHAIN_IMAGES)
            .pool_sizes(&pool_sizes);

        let pool = match unsafe { device.device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.device.destroy_descriptor_set_layout(layout, None) };
                return Err(e).context("Failed to create descriptor pool");
            }
        };

        Ok(Self { layout, pool, device })
    }
}

impl Drop for DescriptorObjects {
    fn drop(&mut self) {
        unsafe {
            // Sets allocated from the pool go with it
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Transform matrix storage for one swapchain image
pub struct ImageUniform {
    pub buffer: HostBuffer,
    pub descriptor_set: vk::DescriptorSet,
}

impl ImageUniform {
    pub fn write(&mut self, mvp: &Mat4) -> Result<()> {
        self.buffer.store(bytemuck::bytes_of(mvp))
    }
}

/// Grow-only list of per-image uniforms
#[derive(Default)]
pub struct ImageUniforms {
    entries: Vec<ImageUniform>,
}

impl ImageUniforms {
    /// Make sure images `0..count` each have a uniform buffer and descriptor set
    pub fn ensure(&mut self, device: &Arc<VulkanDevice>, descriptors: &DescriptorObjects, count: usize) -> Result<()> {
        while self.entries.len() < count {
            let index = self.entries.len();
            let buffer = HostBuffer::with_data(
                device.clone(),
                &format!("uniform[{}]", index),
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                std::slice::from_ref(&Mat4::IDENTITY),
            )?;

            let layouts = [descriptors.layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(descriptors.pool)
                .set_layouts(&layouts);
            let descriptor_set = unsafe { device.device.allocate_descriptor_sets(&alloc_info) }
                .context("Failed to allocate descriptor set")?[0];

            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: buffer.buffer,
                offset: 0,
                range: UNIFORM_SIZE,
            }];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(descriptor_set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build();
            unsafe { device.device.update_descriptor_sets(&[write], &[]) };

            log::debug!("Created uniform buffer for swapchain image {}", index);
            self.entries.push(ImageUniform {
                buffer,
                descriptor_set,
            });
        }
        Ok(())
    }

    pub fn get_mut(&mut self, image_index: usize) -> Option<&mut ImageUniform> {
        self.entries.get_mut(image_index)
    }

    pub fn descriptor_set(&self, image_index: usize) -> Option<vk::DescriptorSet> {
        self.entries.get(image_index).map(|u| u.descriptor_set)
    }

    /// Release every buffer; sets are freed with the pool
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
