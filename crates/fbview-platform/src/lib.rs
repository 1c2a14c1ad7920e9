// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use anyhow::{Context, Result};
use fbview_render::RenderSize;
use tracing::info;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub size: RenderSize,
    pub min_size: RenderSize,
    /// The engine cannot stream frames larger than its staging buffer.
    pub max_size: RenderSize,
}

fn physical(size: RenderSize) -> PhysicalSize<u32> {
    PhysicalSize::new(size.width, size.height)
}

/// Clamps each side into `[min, max]`; `max` wins if the two cross.
pub fn clamp_size(size: RenderSize, min: RenderSize, max: RenderSize) -> RenderSize {
    RenderSize::new(
        size.width.max(min.width).min(max.width),
        size.height.max(min.height).min(max.height),
    )
}

pub fn window_attributes(spec: &WindowSpec) -> WindowAttributes {
    let initial = clamp_size(spec.size, spec.min_size, spec.max_size);
    Window::default_attributes()
        .with_title(spec.title.clone())
        .with_inner_size(physical(initial))
        .with_min_inner_size(physical(spec.min_size))
        .with_max_inner_size(physical(spec.max_size))
}

pub fn create_window(event_loop: &ActiveEventLoop, spec: &WindowSpec) -> Result<Window> {
    let window = event_loop
        .create_window(window_attributes(spec))
        .context("create_window")?;
    let size = framebuffer_size(&window);
    info!(
        "window \"{}\" {}x{} (min {}x{}, max {}x{})",
        spec.title,
        size.width,
        size.height,
        spec.min_size.width,
        spec.min_size.height,
        spec.max_size.width,
        spec.max_size.height
    );
    Ok(window)
}

/// Current drawable size in physical pixels; zero while minimised on most platforms.
pub fn framebuffer_size(window: &Window) -> RenderSize {
    let s = window.inner_size();
    RenderSize::new(s.width, s.height)
}
