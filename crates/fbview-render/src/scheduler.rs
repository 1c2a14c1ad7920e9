// SPDX-License-Identifier: CEPL-1.0
use crate::RenderSize;
use anyhow::Result;
use tracing::{debug, info};

/// On-demand query of the window's current framebuffer size in pixels.
pub trait FramebufferSource {
    fn framebuffer_size(&self) -> RenderSize;
}

impl<F: Fn() -> RenderSize> FramebufferSource for F {
    fn framebuffer_size(&self) -> RenderSize {
        self()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Image(u32),
    /// Surface no longer matches the swapchain; nothing was signalled.
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Done,
    /// Out of date or suboptimal.
    Stale,
}

/// GPU side of one frame. The scheduler owns the ordering, the backend owns the handles.
pub trait FrameBackend {
    /// Blocks until the previous submission has retired.
    fn wait_in_flight(&mut self) -> Result<()>;
    fn reset_in_flight(&mut self) -> Result<()>;
    fn acquire_image(&mut self) -> Result<Acquired>;
    /// Re-records the frame command buffer against swapchain image `image`.
    fn record_frame(&mut self, image: u32) -> Result<()>;
    /// Waits image-available, signals render-finished and the in-flight fence.
    fn submit_frame(&mut self) -> Result<()>;
    fn present_image(&mut self, image: u32) -> Result<Presented>;
    /// Rebuilds the swapchain and everything sized by it. Returns the resulting extent.
    fn recreate(&mut self, size: RenderSize) -> Result<RenderSize>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

impl FrameState {
    pub fn can_advance_to(self, next: FrameState) -> bool {
        use FrameState::*;
        matches!(
            (self, next),
            (Idle, Acquiring)
                | (Acquiring, Recording)
                | (Acquiring, Idle)
                | (Recording, Submitted)
                | (Submitted, Presenting)
                | (Presenting, Idle)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Nothing was submitted this tick.
    Skipped,
    /// Presented onto a stale surface and rebuilt right after.
    Recreated,
    /// Presented onto a stale surface while the window had no area; rebuild waits.
    Deferred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    Ignored,
    Recreated(RenderSize),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub recreations: u64,
}

pub struct FrameScheduler {
    state: FrameState,
    min_size: RenderSize,
    pending_recreate: bool,
    stats: FrameStats,
}

impl FrameScheduler {
    pub fn new(min_size: RenderSize) -> Self {
        Self {
            state: FrameState::Idle,
            min_size,
            pending_recreate: false,
            stats: FrameStats::default(),
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn recreate_pending(&self) -> bool {
        self.pending_recreate
    }

    /// Resize notification from the window system.
    pub fn on_resize(
        &mut self,
        backend: &mut dyn FrameBackend,
        size: RenderSize,
    ) -> Result<ResizeOutcome> {
        if size.is_zero() {
            debug!("resize to {}x{} → paused", size.width, size.height);
            return Ok(ResizeOutcome::Ignored);
        }
        if !size.at_least(self.min_size) {
            debug!(
                "resize to {}x{} below minimum {}x{} → ignored",
                size.width, size.height, self.min_size.width, self.min_size.height
            );
            return Ok(ResizeOutcome::Ignored);
        }
        let extent = self.recreate(backend, size)?;
        Ok(ResizeOutcome::Recreated(extent))
    }

    /// Performs a pending recreation so the next upload lands in the texture that will be drawn.
    /// Returns the new extent, or `None` when nothing was pending or the window has no area.
    pub fn settle(
        &mut self,
        backend: &mut dyn FrameBackend,
        framebuffer: &dyn FramebufferSource,
    ) -> Result<Option<RenderSize>> {
        if !self.pending_recreate {
            return Ok(None);
        }
        let size = framebuffer.framebuffer_size();
        if size.is_zero() {
            return Ok(None);
        }
        self.recreate(backend, size).map(Some)
    }

    // Idle → Acquiring → Recording → Submitted → Presenting → Idle
    pub fn run_frame(
        &mut self,
        backend: &mut dyn FrameBackend,
        framebuffer: &dyn FramebufferSource,
    ) -> Result<FrameOutcome> {
        debug_assert_eq!(self.state, FrameState::Idle);

        // A rebuilt texture holds no frame yet; drawing waits for the next upload.
        if self.pending_recreate {
            if self.settle(backend, framebuffer)?.is_some() {
                debug!("recreated at frame start → frame skipped until the next upload");
            }
            self.stats.skipped += 1;
            return Ok(FrameOutcome::Skipped);
        }

        let res = self.cycle(backend, framebuffer);
        if res.is_err() {
            self.state = FrameState::Idle;
        }
        res
    }

    fn cycle(
        &mut self,
        backend: &mut dyn FrameBackend,
        framebuffer: &dyn FramebufferSource,
    ) -> Result<FrameOutcome> {
        self.advance(FrameState::Acquiring);
        backend.wait_in_flight()?;

        // Fence stays signalled on a stale acquire; resetting it here would leave nothing to signal it.
        let image = match backend.acquire_image()? {
            Acquired::Image(i) => i,
            Acquired::Stale => {
                debug!("acquire: swapchain stale → frame skipped, recreate pending");
                self.pending_recreate = true;
                self.stats.skipped += 1;
                self.advance(FrameState::Idle);
                return Ok(FrameOutcome::Skipped);
            }
        };
        backend.reset_in_flight()?;

        self.advance(FrameState::Recording);
        backend.record_frame(image)?;

        self.advance(FrameState::Submitted);
        backend.submit_frame()?;

        self.advance(FrameState::Presenting);
        let presented = backend.present_image(image)?;
        self.advance(FrameState::Idle);

        match presented {
            Presented::Done => {
                self.stats.presented += 1;
                Ok(FrameOutcome::Presented)
            }
            Presented::Stale => {
                let size = framebuffer.framebuffer_size();
                if size.is_zero() {
                    debug!("present: swapchain stale, framebuffer 0x0 → deferred");
                    self.pending_recreate = true;
                    return Ok(FrameOutcome::Deferred);
                }
                self.recreate(backend, size)?;
                Ok(FrameOutcome::Recreated)
            }
        }
    }

    fn recreate(&mut self, backend: &mut dyn FrameBackend, size: RenderSize) -> Result<RenderSize> {
        let extent = backend.recreate(size)?;
        self.pending_recreate = false;
        self.stats.recreations += 1;
        info!(
            "swapchain recreated: requested {}x{} → {}x{}",
            size.width, size.height, extent.width, extent.height
        );
        Ok(extent)
    }

    fn advance(&mut self, next: FrameState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "frame state {:?} → {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::cell::Cell;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Wait,
        Reset,
        Acquire,
        Record(u32),
        Submit,
        Present(u32),
        Recreate(RenderSize),
    }

    /// Records calls and models one fence: a wait with nothing in flight on an
    /// unsignalled fence would never return.
    struct MockBackend {
        calls: Vec<Call>,
        fence_signalled: bool,
        in_flight: bool,
        image_count: u32,
        next_image: u32,
        acquire_script: VecDeque<Acquired>,
        present_script: VecDeque<Presented>,
        fail_record: bool,
        // texture rebuilt and not yet written
        fresh_texture: bool,
        unfilled_draws: usize,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                calls: Vec::new(),
                fence_signalled: true,
                in_flight: false,
                image_count: 3,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                fail_record: false,
                fresh_texture: false,
                unfilled_draws: 0,
            }
        }

        fn upload(&mut self) {
            self.fresh_texture = false;
        }

        fn count(&self, call: &Call) -> usize {
            self.calls.iter().filter(|c| *c == call).count()
        }

        fn recreations(&self) -> Vec<RenderSize> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Recreate(s) => Some(*s),
                    _ => None,
                })
                .collect()
        }
    }

    impl FrameBackend for MockBackend {
        fn wait_in_flight(&mut self) -> Result<()> {
            assert!(
                self.fence_signalled || self.in_flight,
                "wait on an unsignalled fence with no submission pending"
            );
            self.fence_signalled = true;
            self.in_flight = false;
            self.calls.push(Call::Wait);
            Ok(())
        }

        fn reset_in_flight(&mut self) -> Result<()> {
            assert!(!self.in_flight, "fence reset while work is in flight");
            self.fence_signalled = false;
            self.calls.push(Call::Reset);
            Ok(())
        }

        fn acquire_image(&mut self) -> Result<Acquired> {
            self.calls.push(Call::Acquire);
            if let Some(a) = self.acquire_script.pop_front() {
                return Ok(a);
            }
            let i = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(Acquired::Image(i))
        }

        fn record_frame(&mut self, image: u32) -> Result<()> {
            assert!(!self.in_flight, "command buffer re-recorded while pending");
            assert!(!self.fence_signalled, "recording before the fence was reset");
            self.calls.push(Call::Record(image));
            if self.fresh_texture {
                self.unfilled_draws += 1;
            }
            if self.fail_record {
                bail!("record failed");
            }
            Ok(())
        }

        fn submit_frame(&mut self) -> Result<()> {
            assert!(!self.fence_signalled, "submit with a signalled fence");
            self.in_flight = true;
            self.calls.push(Call::Submit);
            Ok(())
        }

        fn present_image(&mut self, image: u32) -> Result<Presented> {
            self.calls.push(Call::Present(image));
            Ok(self.present_script.pop_front().unwrap_or(Presented::Done))
        }

        fn recreate(&mut self, size: RenderSize) -> Result<RenderSize> {
            // device idle
            self.in_flight = false;
            self.fence_signalled = true;
            self.next_image = 0;
            // texture image rebuilt, contents undefined
            self.fresh_texture = true;
            self.calls.push(Call::Recreate(size));
            Ok(size)
        }
    }

    fn fixed(size: RenderSize) -> impl Fn() -> RenderSize {
        move || size
    }

    const MIN: RenderSize = RenderSize::new(480, 360);

    #[test]
    fn steady_frames_pair_every_wait_with_a_reset() {
        let mut be = MockBackend::new();
        let mut sched = FrameScheduler::new(MIN);
        let fb = fixed(RenderSize::new(640, 480));

        for _ in 0..5 {
            assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Presented);
        }

        assert_eq!(be.count(&Call::Wait), 5);
        assert_eq!(be.count(&Call::Reset), 5);
        assert_eq!(be.count(&Call::Submit), 5);
        assert!(be.recreations().is_empty());
        assert_eq!(sched.stats().presented, 5);
        assert_eq!(sched.state(), FrameState::Idle);
    }

    #[test]
    fn frame_calls_follow_cycle_order() {
        let mut be = MockBackend::new();
        let mut sched = FrameScheduler::new(MIN);

        sched
            .run_frame(&mut be, &fixed(RenderSize::new(640, 480)))
            .unwrap();

        assert_eq!(
            be.calls,
            vec![
                Call::Wait,
                Call::Acquire,
                Call::Reset,
                Call::Record(0),
                Call::Submit,
                Call::Present(0),
            ]
        );
    }

    #[test]
    fn stale_present_recreates_exactly_once() {
        let mut be = MockBackend::new();
        be.present_script = VecDeque::from([Presented::Done, Presented::Stale]);
        let mut sched = FrameScheduler::new(MIN);
        let fb = fixed(RenderSize::new(1280, 720));

        assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Presented);
        assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Recreated);
        assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Presented);
        assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Presented);

        assert_eq!(be.recreations(), vec![RenderSize::new(1280, 720)]);
        assert_eq!(sched.stats().recreations, 1);
        assert!(!sched.recreate_pending());
    }

    #[test]
    fn stale_acquire_skips_then_recreates_before_next_frame() {
        let mut be = MockBackend::new();
        be.acquire_script = VecDeque::from([Acquired::Stale]);
        let mut sched = FrameScheduler::new(MIN);
        let fb = fixed(RenderSize::new(800, 600));

        assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Skipped);
        assert!(sched.recreate_pending());
        assert_eq!(be.count(&Call::Reset), 0);

        // the mock panics if this wait would block forever
        assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Skipped);
        assert_eq!(be.recreations(), vec![RenderSize::new(800, 600)]);
        assert_eq!(be.count(&Call::Submit), 0);

        be.upload();
        assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Presented);

        assert_eq!(be.recreations(), vec![RenderSize::new(800, 600)]);
        assert_eq!(sched.stats().skipped, 2);
        assert_eq!(sched.stats().presented, 1);
        assert_eq!(be.unfilled_draws, 0);
    }

    #[test]
    fn resize_clears_pending_recreate() {
        let mut be = MockBackend::new();
        be.acquire_script = VecDeque::from([Acquired::Stale]);
        let mut sched = FrameScheduler::new(MIN);
        let fb = fixed(RenderSize::new(1024, 768));

        sched.run_frame(&mut be, &fb).unwrap();
        sched.on_resize(&mut be, RenderSize::new(1024, 768)).unwrap();
        sched.run_frame(&mut be, &fb).unwrap();

        assert_eq!(be.recreations(), vec![RenderSize::new(1024, 768)]);
    }

    #[test]
    fn resize_below_minimum_is_ignored() {
        let mut be = MockBackend::new();
        let mut sched = FrameScheduler::new(MIN);

        let out = sched.on_resize(&mut be, RenderSize::new(320, 240)).unwrap();
        assert_eq!(out, ResizeOutcome::Ignored);
        let out = sched.on_resize(&mut be, RenderSize::new(1920, 200)).unwrap();
        assert_eq!(out, ResizeOutcome::Ignored);
        let out = sched.on_resize(&mut be, RenderSize::new(0, 0)).unwrap();
        assert_eq!(out, ResizeOutcome::Ignored);

        assert!(be.calls.is_empty());
        assert_eq!(sched.stats().recreations, 0);
    }

    #[test]
    fn same_size_resize_twice_recreates_twice() {
        let mut be = MockBackend::new();
        let mut sched = FrameScheduler::new(MIN);
        let size = RenderSize::new(1280, 720);

        assert_eq!(
            sched.on_resize(&mut be, size).unwrap(),
            ResizeOutcome::Recreated(size)
        );
        assert_eq!(
            sched.on_resize(&mut be, size).unwrap(),
            ResizeOutcome::Recreated(size)
        );
        assert_eq!(sched.run_frame(&mut be, &fixed(size)).unwrap(), FrameOutcome::Presented);

        assert_eq!(be.recreations(), vec![size, size]);
    }

    #[test]
    fn zero_framebuffer_defers_recreate_until_visible() {
        let mut be = MockBackend::new();
        be.present_script = VecDeque::from([Presented::Stale]);
        let mut sched = FrameScheduler::new(MIN);
        let size = Cell::new(RenderSize::new(0, 0));
        let fb = || size.get();

        assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Deferred);
        assert!(sched.recreate_pending());

        let waits = be.count(&Call::Wait);
        assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Skipped);
        assert_eq!(be.count(&Call::Wait), waits);

        assert_eq!(sched.settle(&mut be, &fb).unwrap(), None);
        assert!(sched.recreate_pending());

        size.set(RenderSize::new(640, 480));
        assert_eq!(
            sched.settle(&mut be, &fb).unwrap(),
            Some(RenderSize::new(640, 480))
        );
        be.upload();
        assert_eq!(sched.run_frame(&mut be, &fb).unwrap(), FrameOutcome::Presented);
        assert_eq!(be.recreations(), vec![RenderSize::new(640, 480)]);
    }

    #[test]
    fn uploads_always_precede_draws_across_stale_acquire() {
        let mut be = MockBackend::new();
        be.acquire_script = VecDeque::from([Acquired::Stale]);
        be.present_script = VecDeque::from([Presented::Done, Presented::Done, Presented::Stale]);
        let mut sched = FrameScheduler::new(MIN);
        let fb = fixed(RenderSize::new(1280, 720));

        // settle → upload → run_frame, the way the app drives a tick
        for _ in 0..6 {
            sched.settle(&mut be, &fb).unwrap();
            be.upload();
            sched.run_frame(&mut be, &fb).unwrap();
        }

        assert_eq!(be.unfilled_draws, 0);
        assert_eq!(be.recreations().len(), 2);
        assert_eq!(sched.stats().skipped, 1);
        assert_eq!(sched.stats().presented, 4);
    }

    #[test]
    fn frame_after_unsettled_recreate_is_not_drawn() {
        let mut be = MockBackend::new();
        be.acquire_script = VecDeque::from([Acquired::Stale]);
        let mut sched = FrameScheduler::new(MIN);
        let fb = fixed(RenderSize::new(1280, 720));

        for _ in 0..4 {
            be.upload();
            sched.run_frame(&mut be, &fb).unwrap();
        }

        assert_eq!(be.unfilled_draws, 0);
        assert_eq!(be.recreations(), vec![RenderSize::new(1280, 720)]);
        assert_eq!(sched.stats().presented, 2);
    }

    #[test]
    fn failed_frame_returns_to_idle() {
        let mut be = MockBackend::new();
        be.fail_record = true;
        let mut sched = FrameScheduler::new(MIN);

        let err = sched
            .run_frame(&mut be, &fixed(RenderSize::new(640, 480)))
            .unwrap_err();

        assert_eq!(err.to_string(), "record failed");
        assert_eq!(sched.state(), FrameState::Idle);
        assert_eq!(be.count(&Call::Submit), 0);
    }

    #[test]
    fn state_transitions() {
        use FrameState::*;
        assert!(Idle.can_advance_to(Acquiring));
        assert!(Acquiring.can_advance_to(Idle));
        assert!(Presenting.can_advance_to(Idle));
        assert!(!Idle.can_advance_to(Recording));
        assert!(!Recording.can_advance_to(Presenting));
        assert!(!Submitted.can_advance_to(Idle));
    }
}
