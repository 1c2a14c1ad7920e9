// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use fbview_core::{init_tracing, FpsCounter};
use fbview_platform::{create_window, framebuffer_size};
use fbview_render::{FrameOutcome, RenderSize, Renderer, ResizeOutcome};
use fbview_render_vk::VkEngine;
use std::time::Instant;
use tracing::{error, info, warn};

use fbview_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;
mod noise;

use config::{load_cfg, AppCfg, Args};
use noise::NoiseProducer;

struct App {
    cfg: AppCfg,
    frame_limit: Option<u64>,

    // engine before window: drop order matters
    engine: Option<VkEngine>,
    window: Option<Window>,

    noise: NoiseProducer,
    paused: bool,
    exiting: bool,
    frames: u64,
    fps: FpsCounter,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg, frame_limit: Option<u64>) -> Self {
        let noise = NoiseProducer::new(cfg.max_size());
        App {
            cfg,
            frame_limit,
            engine: None,
            window: None,
            noise,
            paused: false,
            exiting: false,
            frames: 0,
            fps: FpsCounter::new(Instant::now()),
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("fatal: {err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(engine) = &self.engine {
            let s = engine.stats();
            info!(
                "frames: presented={} skipped={} recreations={}",
                s.presented, s.skipped, s.recreations
            );
        }
        self.exiting = true;
        self.engine = None;
        self.window = None;
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = create_window(event_loop, &self.cfg.window_spec())?;
        let size = framebuffer_size(&window);
        let engine = VkEngine::new(&window, &window, size, &self.cfg.render_config())?;
        info!("backend = vk, extent {}x{}", engine.extent().width, engine.extent().height);

        self.paused = size.is_zero();
        self.engine = Some(engine);
        self.window = Some(window);
        Ok(())
    }

    /// Streams one noise frame and draws it. Returns whether a frame reached the screen.
    fn redraw(&mut self) -> Result<bool> {
        let (Some(window), Some(engine)) = (&self.window, &mut self.engine) else {
            return Ok(false);
        };

        let fb = || framebuffer_size(window);
        if let Some(ext) = engine.settle(&fb)? {
            info!("swapchain settled at {}x{}", ext.width, ext.height);
        }

        let extent = engine.extent();
        match self.noise.fill(extent) {
            Some(bytes) => match engine.upload(bytes) {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => warn!("upload rejected: {e}"),
                Err(e) => return Err(e.into()),
            },
            None => warn!(
                "extent {}x{} exceeds the noise buffer; frame not refreshed",
                extent.width, extent.height
            ),
        }

        let outcome = engine.render(&fb)?;
        Ok(matches!(
            outcome,
            FrameOutcome::Presented | FrameOutcome::Recreated
        ))
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e.context("engine init"));
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                let size = RenderSize::new(new_size.width, new_size.height);
                let now_paused = size.is_zero();
                if self.paused != now_paused {
                    info!("Resized → {}x{} (paused={})", size.width, size.height, now_paused);
                    self.paused = now_paused;
                    self.fps.reset(Instant::now());
                }
                if self.paused {
                    return;
                }

                let Some(engine) = &mut self.engine else {
                    return;
                };
                match engine.resize(size) {
                    Ok(ResizeOutcome::Recreated(ext)) => {
                        info!("Resized → {}x{}", ext.width, ext.height)
                    }
                    Ok(ResizeOutcome::Ignored) => {}
                    Err(e) => {
                        self.fail(event_loop, e.context("resize"));
                        return;
                    }
                }
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                match self.redraw() {
                    Ok(true) => {
                        // count only frames that were actually presented
                        self.frames += 1;
                        self.fps.tick();
                    }
                    Ok(false) => {}
                    Err(e) => {
                        self.fail(event_loop, e.context("frame"));
                        return;
                    }
                }
                if self.frame_limit.is_some_and(|n| self.frames >= n) {
                    info!("frame limit {} reached", self.frames);
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            // minimised → sleep until the next event
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }

        // FIFO present paces the loop
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        if let Some(n) = self.fps.poll(Instant::now()) {
            info!("fps ~ {}", n);
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    cfg.apply_args(&args);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, args.frames);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
