// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry};
use fbview_render::RenderConfig;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{c_char, CStr};
use tracing::{debug, error, info, trace, warn};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub(crate) struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Instance, surface, device, queue and the per-frame command/sync objects.
///
/// Created once, destroyed once. Everything else borrows it.
pub struct DeviceContext {
    _entry: Entry,
    pub(crate) instance: ash::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    pub(crate) surface_loader: surface::Instance,
    pub(crate) surface: vk::SurfaceKHR,

    pub(crate) phys: vk::PhysicalDevice,
    pub(crate) device: ash::Device,
    pub(crate) queue: vk::Queue,

    pub(crate) cmd_pool: vk::CommandPool,
    pub(crate) frame_cmd: vk::CommandBuffer,
    pub(crate) upload_cmd: vk::CommandBuffer,
    pub(crate) sync: FrameSync,

    mem_props: vk::PhysicalDeviceMemoryProperties,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!("[vulkan] {msg}");
    } else {
        trace!("[vulkan] {msg}");
    }
    vk::FALSE
}

fn has_name(names: &[[c_char; vk::MAX_EXTENSION_NAME_SIZE]], want: &CStr) -> bool {
    names
        .iter()
        .any(|n| unsafe { CStr::from_ptr(n.as_ptr()) } == want)
}

/// Index of the device to use: first discrete GPU when preferred, else the first enumerated.
pub(crate) fn preferred_device_index(
    types: &[vk::PhysicalDeviceType],
    prefer_discrete: bool,
) -> Option<usize> {
    if types.is_empty() {
        return None;
    }
    if prefer_discrete {
        if let Some(i) = types
            .iter()
            .position(|t| *t == vk::PhysicalDeviceType::DISCRETE_GPU)
        {
            return Some(i);
        }
    }
    Some(0)
}

/// First queue family with graphics that can also present to the surface.
pub(crate) fn graphics_present_family(families: &[(vk::QueueFlags, bool)]) -> Option<u32> {
    families
        .iter()
        .position(|(flags, present)| flags.contains(vk::QueueFlags::GRAPHICS) && *present)
        .map(|i| i as u32)
}

pub(crate) fn memory_type_index(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    want_validation: bool,
) -> Result<(ash::Instance, bool)> {
    let app = c"fbview";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: app.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut exts = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();

    // Validation only when asked for, in debug builds, and actually installed.
    let validation = want_validation && cfg!(debug_assertions) && {
        let layers: Vec<_> = entry
            .enumerate_instance_layer_properties()
            .unwrap_or_default()
            .iter()
            .map(|l| l.layer_name)
            .collect();
        let inst_exts: Vec<_> = entry
            .enumerate_instance_extension_properties(None)
            .unwrap_or_default()
            .iter()
            .map(|e| e.extension_name)
            .collect();
        let ok = has_name(&layers, VALIDATION_LAYER) && has_name(&inst_exts, debug_utils::NAME);
        if !ok {
            warn!("validation requested but VK_LAYER_KHRONOS_validation is not available");
        }
        ok
    };
    if validation {
        exts.push(debug_utils::NAME.as_ptr());
    }
    let layers = [VALIDATION_LAYER.as_ptr()];

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: exts.len() as u32,
        pp_enabled_extension_names: exts.as_ptr(),
        enabled_layer_count: if validation { 1 } else { 0 },
        pp_enabled_layer_names: if validation {
            layers.as_ptr()
        } else {
            std::ptr::null()
        },
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;
    Ok((instance, validation))
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .context("create_debug_utils_messenger")?;
    Ok((loader, messenger))
}

unsafe fn pick_device_and_queue(
    instance: &ash::Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    prefer_discrete: bool,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;
    let types: Vec<_> = devices
        .iter()
        .map(|&p| instance.get_physical_device_properties(p).device_type)
        .collect();
    let idx = preferred_device_index(&types, prefer_discrete)
        .ok_or_else(|| anyhow!("no Vulkan physical devices"))?;
    let phys = devices[idx];

    let families: Vec<_> = instance
        .get_physical_device_queue_family_properties(phys)
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let present = surf_i
                .get_physical_device_surface_support(phys, i as u32, surface)
                .unwrap_or(false);
            (q.queue_flags, present)
        })
        .collect();
    let family = graphics_present_family(&families)
        .ok_or_else(|| anyhow!("selected device has no graphics+present queue family"))?;

    let props = instance.get_physical_device_properties(phys);
    info!(
        "device: {} ({:?}), queue family {}",
        CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy(),
        props.device_type,
        family
    );
    Ok((phys, family))
}

unsafe fn create_device(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue)> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };
    let device = instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;
    let queue = device.get_device_queue(queue_family, 0);
    Ok((device, queue))
}

unsafe fn create_sync(device: &ash::Device) -> Result<FrameSync> {
    let sem_ci = vk::SemaphoreCreateInfo::default();
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };
    Ok(FrameSync {
        image_available: device.create_semaphore(&sem_ci, None)?,
        render_finished: device.create_semaphore(&sem_ci, None)?,
        in_flight: device.create_fence(&fence_ci, None)?,
    })
}

impl DeviceContext {
    // STRICT ORDER: instance → surface → physical device/queue (checked against THIS surface)
    // → logical device → command pool/buffers → sync.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        cfg: &RenderConfig,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::load().context("load Vulkan loader")?;
        let (instance, validation) = create_instance(&entry, dh, cfg.validation)?;
        let debug = if validation {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
            .context("ash_window::create_surface")?;

        let (phys, queue_family) =
            pick_device_and_queue(&instance, &surface_loader, surface, cfg.prefer_discrete)?;
        let (device, queue) = create_device(&instance, phys, queue_family)?;
        let mem_props = instance.get_physical_device_memory_properties(phys);

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        let cmd_pool = device
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 2,
            ..Default::default()
        };
        let bufs = device
            .allocate_command_buffers(&alloc_info)
            .context("allocate_command_buffers")?;
        let sync = create_sync(&device).context("create frame sync")?;

        info!("vk: device ready (validation={validation})");

        Ok(Self {
            _entry: entry,
            instance,
            debug,
            surface_loader,
            surface,
            phys,
            device,
            queue,
            cmd_pool,
            frame_cmd: bufs[0],
            upload_cmd: bufs[1],
            sync,
            mem_props,
        })
    }

    pub(crate) fn find_memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        memory_type_index(&self.mem_props, type_bits, required)
            .ok_or_else(|| anyhow!("no memory type matches bits {type_bits:#x} with {required:?}"))
    }

    pub(crate) unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buf = self.device.create_buffer(&bci, None)?;
        let req = self.device.get_buffer_memory_requirements(buf);
        let mem_type = match self.find_memory_type(req.memory_type_bits, props) {
            Ok(t) => t,
            Err(e) => {
                self.device.destroy_buffer(buf, None);
                return Err(e);
            }
        };
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: mem_type,
            ..Default::default()
        };
        let mem = self.device.allocate_memory(&mai, None)?;
        self.device.bind_buffer_memory(buf, mem, 0)?;
        Ok((buf, mem))
    }

    /// Records into the upload command buffer, submits, and waits for the queue to drain.
    pub(crate) unsafe fn one_shot<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let cmd = self.upload_cmd;
        self.device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        self.device.begin_command_buffer(cmd, &bi)?;
        record(&self.device, cmd);
        self.device.end_command_buffer(cmd)?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        self.device
            .queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null())
            .context("queue_submit(one_shot)")?;
        self.device
            .queue_wait_idle(self.queue)
            .context("queue_wait_idle(one_shot)")?;
        Ok(())
    }

    pub(crate) unsafe fn wait_idle(&self) -> Result<()> {
        self.device
            .device_wait_idle()
            .context("device_wait_idle")?;
        Ok(())
    }
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - sync objects, command buffers, pool BEFORE device
// - device BEFORE surface; debug messenger and instance last.
impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            d.device_wait_idle().ok();

            d.destroy_fence(self.sync.in_flight, None);
            d.destroy_semaphore(self.sync.render_finished, None);
            d.destroy_semaphore(self.sync.image_available, None);

            d.free_command_buffers(self.cmd_pool, &[self.frame_cmd, self.upload_cmd]);
            d.destroy_command_pool(self.cmd_pool, None);

            d.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = *f;
        }
        props
    }

    #[test]
    fn discrete_gpu_is_preferred() {
        let types = [
            vk::PhysicalDeviceType::INTEGRATED_GPU,
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
        ];
        assert_eq!(preferred_device_index(&types, true), Some(2));
        assert_eq!(preferred_device_index(&types, false), Some(0));
    }

    #[test]
    fn falls_back_to_first_device() {
        let types = [
            vk::PhysicalDeviceType::VIRTUAL_GPU,
            vk::PhysicalDeviceType::INTEGRATED_GPU,
        ];
        assert_eq!(preferred_device_index(&types, true), Some(0));
        assert_eq!(preferred_device_index(&[], true), None);
    }

    #[test]
    fn queue_family_needs_graphics_and_present() {
        let families = [
            (vk::QueueFlags::TRANSFER, true),
            (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, false),
            (vk::QueueFlags::GRAPHICS, true),
        ];
        assert_eq!(graphics_present_family(&families), Some(2));
        assert_eq!(graphics_present_family(&families[..2]), None);
    }

    #[test]
    fn memory_type_respects_bits_and_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = mem_props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | host,
        ]);

        assert_eq!(memory_type_index(&props, 0b111, host), Some(1));
        assert_eq!(memory_type_index(&props, 0b100, host), Some(2));
        assert_eq!(
            memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
        assert_eq!(
            memory_type_index(&props, 0b001, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn memory_type_ignores_entries_past_count() {
        let mut props = mem_props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(
            memory_type_index(&props, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }
}
