// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Counts frames over one-second windows.
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
        }
    }

    pub fn tick(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Frames in the window that just closed, once a full second has passed.
    pub fn poll(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.window_start) < Self::WINDOW {
            return None;
        }
        let n = self.frames;
        self.frames = 0;
        self.window_start = now;
        tracing::trace!("fps window closed at {n} frames");
        Some(n)
    }

    /// Drops the partial window, e.g. after a pause.
    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.window_start = now;
    }
}
