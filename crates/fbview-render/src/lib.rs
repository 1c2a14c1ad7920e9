// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

mod payload;
mod scheduler;

pub use payload::{frame_bytes, stage_payload, UploadError};
pub use scheduler::{
    Acquired, FrameBackend, FrameOutcome, FrameScheduler, FrameState, FrameStats,
    FramebufferSource, Presented, ResizeOutcome,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either side is zero (minimised window, collapsed surface).
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn at_least(&self, min: RenderSize) -> bool {
        self.width >= min.width && self.height >= min.height
    }
}

/// Engine knobs, independent of where they were read from.
#[derive(Clone, Debug)]
pub struct RenderConfig {
    pub clear_color: [f32; 4],
    /// Resize requests below this are ignored.
    pub min_size: RenderSize,
    /// Upper bound for the streamed frame; sizes the staging buffer once.
    pub max_size: RenderSize,
    pub shader_dir: PathBuf,
    pub validation: bool,
    pub prefer_discrete: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            min_size: RenderSize::new(480, 360),
            max_size: RenderSize::new(4096, 4096),
            shader_dir: PathBuf::from("shaders"),
            validation: true,
            prefer_discrete: true,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: &RenderConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<ResizeOutcome>;

    /// Runs a recreation left pending by a stale acquire. Call before `upload` each tick so the
    /// payload matches `extent()` and lands in the texture the next frame draws.
    fn settle(&mut self, framebuffer: &dyn FramebufferSource) -> Result<Option<RenderSize>>;

    /// Streams one RGBA8 frame into the sampled texture. Returns once the copy has retired.
    fn upload(&mut self, payload: &[u8]) -> Result<(), UploadError>;

    fn render(&mut self, framebuffer: &dyn FramebufferSource) -> Result<FrameOutcome>;

    /// Current render extent; payloads must be exactly `width * height * 4` bytes.
    fn extent(&self) -> RenderSize;

    fn stats(&self) -> FrameStats;

    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
