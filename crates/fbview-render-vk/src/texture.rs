// SPDX-License-Identifier: CEPL-1.0
use crate::device::DeviceContext;
use anyhow::{Context, Result};
use ash::vk;
use fbview_render::{frame_bytes, stage_payload, RenderSize, UploadError};
use tracing::info;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

const INITIAL_COLOR: vk::ClearColorValue = vk::ClearColorValue {
    float32: [0.0, 0.0, 0.0, 1.0],
};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Host-visible, coherent, mapped for its whole life. Never reallocated.
struct StagingBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    capacity: usize,
}

/// Sampled RGBA8 texture sized to the swapchain, fed from one fixed staging buffer.
pub struct TextureStreamer {
    staging: StagingBuffer,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
}

/// (src access, dst access, src stage, dst stage) for the layout changes the texture goes through.
pub(crate) fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Option<(
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
)> {
    use vk::ImageLayout as L;
    match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => Some((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => Some((
            vk::AccessFlags::SHADER_READ,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => Some((
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        _ => None,
    }
}

unsafe fn cmd_transition(
    d: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let Some((src_access, dst_access, src_stage, dst_stage)) = transition_masks(old, new) else {
        debug_assert!(false, "unsupported texture transition {old:?} → {new:?}");
        return;
    };
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: src_access,
        dst_access_mask: dst_access,
        old_layout: old,
        new_layout: new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: COLOR_RANGE,
        ..Default::default()
    };
    d.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
}

impl TextureStreamer {
    /// Allocates the staging buffer for `max` once, then the texture at `extent`.
    pub unsafe fn new(ctx: &DeviceContext, extent: RenderSize, max: RenderSize) -> Result<Self> {
        let capacity = frame_bytes(max);
        let (buffer, memory) = ctx
            .create_buffer(
                capacity as vk::DeviceSize,
                vk::BufferUsageFlags::TRANSFER_SRC,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .context("create staging buffer")?;
        let mapped = match ctx
            .device
            .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        {
            Ok(p) => p as *mut u8,
            Err(e) => {
                ctx.device.destroy_buffer(buffer, None);
                ctx.device.free_memory(memory, None);
                return Err(anyhow::anyhow!("map staging memory: {e:?}"));
            }
        };
        info!(
            "staging buffer: {} bytes ({}x{} max)",
            capacity, max.width, max.height
        );

        let mut t = TextureStreamer {
            staging: StagingBuffer {
                buffer,
                memory,
                mapped,
                capacity,
            },
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            extent: vk::Extent2D::default(),
        };
        let ext = vk::Extent2D {
            width: extent.width,
            height: extent.height,
        };
        if let Err(e) = t.create_image(ctx, ext) {
            t.destroy(ctx);
            return Err(e);
        }
        Ok(t)
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> RenderSize {
        RenderSize::new(self.extent.width, self.extent.height)
    }

    pub fn staging_capacity(&self) -> usize {
        self.staging.capacity
    }

    /// Creates the device-local image at `extent`, cleared to opaque black and left in
    /// SHADER_READ_ONLY_OPTIMAL.
    pub unsafe fn create_image(&mut self, ctx: &DeviceContext, extent: vk::Extent2D) -> Result<()> {
        debug_assert!(self.image == vk::Image::null());

        let size = RenderSize::new(extent.width, extent.height);
        let required = frame_bytes(size);
        if required > self.staging.capacity {
            let err = UploadError::ExceedsStaging {
                required,
                capacity: self.staging.capacity,
            };
            return Err(anyhow::Error::new(err)
                .context(format!("texture {}x{}", extent.width, extent.height)));
        }

        let d = &ctx.device;
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: TEXTURE_FORMAT,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        self.image = d.create_image(&img_ci, None).context("create_image(texture)")?;
        self.extent = extent;

        let req = d.get_image_memory_requirements(self.image);
        let mem_type =
            ctx.find_memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: mem_type,
            ..Default::default()
        };
        self.memory = d
            .allocate_memory(&alloc, None)
            .context("allocate_memory(texture)")?;
        d.bind_image_memory(self.image, self.memory, 0)?;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: self.image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: TEXTURE_FORMAT,
            subresource_range: COLOR_RANGE,
            ..Default::default()
        };
        self.view = d
            .create_image_view(&view_ci, None)
            .context("create_image_view(texture)")?;

        let image = self.image;
        ctx.one_shot(|d, cmd| {
            cmd_transition(
                d,
                cmd,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            d.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &INITIAL_COLOR,
                std::slice::from_ref(&COLOR_RANGE),
            );
            cmd_transition(
                d,
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })
        .context("initial texture clear")?;

        info!("texture: {}x{} {:?}", extent.width, extent.height, TEXTURE_FORMAT);
        Ok(())
    }

    /// Detaches the sized image handles. The staging buffer stays untouched across recreations.
    fn take_image(&mut self) -> (vk::ImageView, vk::Image, vk::DeviceMemory) {
        (
            std::mem::replace(&mut self.view, vk::ImageView::null()),
            std::mem::replace(&mut self.image, vk::Image::null()),
            std::mem::replace(&mut self.memory, vk::DeviceMemory::null()),
        )
    }

    // Idempotent.
    pub unsafe fn destroy_image(&mut self, ctx: &DeviceContext) {
        let d = &ctx.device;
        let (view, image, memory) = self.take_image();
        if view != vk::ImageView::null() {
            d.destroy_image_view(view, None);
        }
        if image != vk::Image::null() {
            d.destroy_image(image, None);
        }
        if memory != vk::DeviceMemory::null() {
            d.free_memory(memory, None);
        }
    }

    /// Copies one RGBA8 frame into the texture. Blocks until the copy has retired.
    ///
    /// A payload of the wrong size is rejected before anything touches the staging buffer.
    pub unsafe fn upload(&mut self, ctx: &DeviceContext, payload: &[u8]) -> Result<(), UploadError> {
        let staging = std::slice::from_raw_parts_mut(self.staging.mapped, self.staging.capacity);
        stage_payload(payload, self.extent(), staging)?;

        let image = self.image;
        let buffer = self.staging.buffer;
        let extent = self.extent;
        ctx.one_shot(|d, cmd| {
            cmd_transition(
                d,
                cmd,
                image,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
            };
            d.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
            cmd_transition(
                d,
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })
        .context("texture upload")?;
        Ok(())
    }

    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        self.destroy_image(ctx);
        let d = &ctx.device;
        if self.staging.buffer != vk::Buffer::null() {
            d.unmap_memory(self.staging.memory);
            d.destroy_buffer(self.staging.buffer, None);
            d.free_memory(self.staging.memory, None);
            self.staging.buffer = vk::Buffer::null();
            self.staging.memory = vk::DeviceMemory::null();
            self.staging.mapped = std::ptr::null_mut();
        }
    }
}
