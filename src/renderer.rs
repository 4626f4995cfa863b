// =============================================================================
// RESOURCE LIFECYCLE CONTROLLER
// =============================================================================
//
// Decides WHEN things happen; the backend decides HOW. The controller owns
// the state machine that separates one-time resources from the ones tied to
// the surface size, and drives the per-frame submit/present sequence.
//
//   Uninitialized ──new──> SteadyState ──resize(w,h)──> Rebuilding ──> SteadyState
//                               │  ▲                         ▲
//                  resize(0,0)  │  │ resize(w,h)             │ stale swapchain
//                               ▼  │                         │ (next run)
//                            Suspended                   SteadyState
//
//   any state ──shutdown──> Terminal
//
// =============================================================================

use anyhow::Result;
use ash::vk;
use thiserror::Error;

use crate::scene::Transform;

/// Controller contract violations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RendererError {
    #[error("refusing to build a zero-sized swapchain ({width}x{height})")]
    ZeroExtent { width: u32, height: u32 },
    #[error("at least one frame in flight is required")]
    InvalidFramesInFlight,
}

/// Where the controller is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing created yet
    Uninitialized,
    /// Swapchain-dependent resources exist and frames are being drawn
    SteadyState,
    /// Swapchain-dependent resources are stale and must be rebuilt before drawing
    Rebuilding,
    /// Surface has zero area; nothing is drawn
    Suspended,
    /// Shut down; every resource has been released
    Terminal,
}

/// Swapchain-dependent resources as built by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceTargets {
    /// Actual swapchain extent (may differ from the requested size)
    pub extent: vk::Extent2D,
    /// Number of swapchain images
    pub image_count: usize,
    /// Number of recorded command buffers, one per image
    pub command_buffers: usize,
    /// Framebuffer sizes, one per image
    pub framebuffer_extents: Vec<vk::Extent2D>,
}

/// Result of asking the swapchain for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    Optimal,
    /// Presented, but the swapchain no longer matches the surface
    Stale,
}

/// Outcome of one `run()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    Skipped,
}

/// Operations the controller sequences on the graphics API.
///
/// Slot indices are always `< frames_in_flight`.
pub trait RenderBackend {
    /// One-time setup: pipeline, buffers, descriptor objects, synchronization
    fn create_persistent(&mut self, frames_in_flight: usize) -> Result<()>;

    /// (Re)create swapchain, image views, framebuffers and recorded command
    /// buffers. Returns `None` when the surface reports a zero extent.
    fn build_targets(&mut self, width: u32, height: u32) -> Result<Option<SurfaceTargets>>;

    /// Wait for idle and release everything `build_targets` created
    fn release_targets(&mut self) -> Result<()>;

    /// Block until the slot's fence has signaled
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquire the next swapchain image, signaling the slot's acquire semaphore
    fn acquire_image(&mut self, slot: usize) -> Result<Acquired>;

    /// Upload `mvp` for the image and submit its prerecorded command buffer.
    /// Resets and re-arms the slot's fence.
    fn submit(&mut self, slot: usize, image_index: u32, mvp: &glam::Mat4) -> Result<()>;

    /// Queue the image for presentation after the slot's render-complete semaphore
    fn present(&mut self, slot: usize, image_index: u32) -> Result<Presented>;

    /// Wait for all GPU work, then release every resource in reverse order
    fn shutdown(&mut self) -> Result<()>;
}

/// Controller knobs
#[derive(Debug, Clone, Copy)]
pub struct RendererSettings {
    pub frames_in_flight: usize,
    pub rotation_step: f32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            rotation_step: 0.025,
        }
    }
}

/// The application's rendering context
pub struct Renderer<B: RenderBackend> {
    backend: B,
    state: LifecycleState,
    settings: RendererSettings,
    transform: Transform,
    targets: Option<SurfaceTargets>,
    /// Last size reported by the window
    requested: (u32, u32),
    /// Which sync slot the next frame uses
    current_frame: usize,
    rebuild_count: u64,
}

impl<B: RenderBackend> Renderer<B> {
    /// Run one-time setup and build the first set of surface targets
    pub fn new(backend: B, width: u32, height: u32, settings: RendererSettings) -> Result<Self> {
        if settings.frames_in_flight == 0 {
            return Err(RendererError::InvalidFramesInFlight.into());
        }

        let mut renderer = Self {
            backend,
            state: LifecycleState::Uninitialized,
            settings,
            transform: Transform::new(width, height, settings.rotation_step),
            targets: None,
            requested: (width, height),
            current_frame: 0,
            rebuild_count: 0,
        };

        log::info!("Creating persistent resources ({} frames in flight)", settings.frames_in_flight);
        renderer.backend.create_persistent(settings.frames_in_flight)?;

        if width == 0 || height == 0 {
            log::info!("Initial surface is {}x{}, starting suspended", width, height);
            renderer.state = LifecycleState::Suspended;
        } else {
            renderer.build()?;
        }

        Ok(renderer)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn targets(&self) -> Option<&SurfaceTargets> {
        self.targets.as_ref()
    }

    /// Number of completed swapchain-dependent builds after the first one
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    #[cfg(test)]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Window size changed
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.state == LifecycleState::Terminal {
            return Ok(());
        }

        self.requested = (width, height);

        if width == 0 || height == 0 {
            if self.state != LifecycleState::Suspended {
                log::info!("Surface minimized, suspending rendering");
                self.release()?;
                self.state = LifecycleState::Suspended;
            }
            return Ok(());
        }

        if let Some(targets) = &self.targets {
            if self.state == LifecycleState::SteadyState
                && targets.extent.width == width
                && targets.extent.height == height
            {
                return Ok(());
            }
        }

        self.state = LifecycleState::Rebuilding;
        self.rebuild()
    }

    /// Draw one frame if the controller is ready for it
    pub fn run(&mut self) -> Result<FrameStatus> {
        match self.state {
            LifecycleState::SteadyState => self.draw(),
            LifecycleState::Rebuilding => {
                self.rebuild()?;
                if self.state == LifecycleState::SteadyState {
                    self.draw()
                } else {
                    Ok(FrameStatus::Skipped)
                }
            }
            LifecycleState::Suspended
            | LifecycleState::Uninitialized
            | LifecycleState::Terminal => {
                log::trace!("Skipping frame in {:?}", self.state);
                Ok(FrameStatus::Skipped)
            }
        }
    }

    /// Submit and present one frame. Only valid in `SteadyState`.
    pub fn draw(&mut self) -> Result<FrameStatus> {
        if self.state != LifecycleState::SteadyState {
            return Ok(FrameStatus::Skipped);
        }

        let slot = self.current_frame;

        // STEP 1: Spin the square
        self.transform.advance();
        let mvp = self.transform.mvp();

        // STEP 2: Bound how far ahead of the GPU we run
        self.backend.wait_for_slot(slot)?;

        // STEP 3: Acquire. The slot fence stays signaled if we bail here.
        let image_index = match self.backend.acquire_image(slot)? {
            Acquired::Image { index, suboptimal } => {
                if suboptimal {
                    log::debug!("Swapchain suboptimal, rebuilding after this frame");
                    self.state = LifecycleState::Rebuilding;
                }
                index
            }
            Acquired::OutOfDate => {
                log::debug!("Swapchain out of date, rebuilding");
                self.state = LifecycleState::Rebuilding;
                return Ok(FrameStatus::Skipped);
            }
        };

        // STEP 4: Reset the fence, upload uniforms, submit
        self.backend.submit(slot, image_index, &mvp)?;

        // STEP 5: Present
        if self.backend.present(slot, image_index)? == Presented::Stale {
            self.state = LifecycleState::Rebuilding;
        }

        // STEP 6: Next slot
        self.current_frame = (self.current_frame + 1) % self.settings.frames_in_flight;

        Ok(FrameStatus::Presented)
    }

    /// Wait for in-flight work and release everything. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == LifecycleState::Terminal {
            return Ok(());
        }

        log::info!("Shutting down renderer");
        self.state = LifecycleState::Terminal;
        self.targets = None;

        // Every slot's last submission has to finish before anything is destroyed
        let slots = self.settings.frames_in_flight;
        let waited = (0..slots).try_for_each(|slot| self.backend.wait_for_slot(slot));
        if let Err(e) = &waited {
            log::error!("Waiting for in-flight frames failed: {:#}", e);
        }

        self.backend.shutdown()?;
        waited
    }

    fn rebuild(&mut self) -> Result<()> {
        self.release()?;
        self.build()?;
        if self.state == LifecycleState::SteadyState {
            self.rebuild_count += 1;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if self.targets.take().is_some() {
            self.backend.release_targets()?;
        }
        Ok(())
    }

    fn build(&mut self) -> Result<()> {
        let (width, height) = self.requested;
        if width == 0 || height == 0 {
            return Err(RendererError::ZeroExtent { width, height }.into());
        }

        match self.backend.build_targets(width, height)? {
            Some(targets) => {
                log::info!(
                    "Surface targets ready: {}x{}, {} images",
                    targets.extent.width,
                    targets.extent.height,
                    targets.image_count
                );
                self.transform.set_viewport(targets.extent.width, targets.extent.height);
                self.targets = Some(targets);
                self.state = LifecycleState::SteadyState;
            }
            None => {
                log::info!("Surface reports zero extent, suspending rendering");
                self.state = LifecycleState::Suspended;
            }
        }

        Ok(())
    }
}

impl<B: RenderBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Renderer shutdown failed: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Fence {
        Signaled,
        InFlight,
    }

    /// Everything the mock saw, shared with the test after the renderer takes
    /// ownership of the backend
    #[derive(Debug, Default)]
    struct Log {
        persistent_builds: usize,
        target_builds: usize,
        target_releases: usize,
        waits: usize,
        submits: Vec<(usize, u32)>,
        presents: usize,
        shutdowns: usize,
        fences: Vec<Fence>,
        /// Fence states seen when teardown started
        fences_at_shutdown: Vec<Fence>,
        live_targets: usize,
    }

    struct MockBackend {
        log: Rc<RefCell<Log>>,
        image_count: usize,
        surface_extent: Option<vk::Extent2D>,
        next_image: u32,
        acquire_script: VecDeque<Acquired>,
        present_script: VecDeque<Presented>,
    }

    impl MockBackend {
        fn new(image_count: usize) -> (Self, Rc<RefCell<Log>>) {
            let log = Rc::new(RefCell::new(Log::default()));
            let backend = Self {
                log: log.clone(),
                image_count,
                surface_extent: None,
                next_image: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
            };
            (backend, log)
        }
    }

    impl RenderBackend for MockBackend {
        fn create_persistent(&mut self, frames_in_flight: usize) -> Result<()> {
            let mut log = self.log.borrow_mut();
            log.persistent_builds += 1;
            log.fences = vec![Fence::Signaled; frames_in_flight];
            Ok(())
        }

        fn build_targets(&mut self, width: u32, height: u32) -> Result<Option<SurfaceTargets>> {
            let mut log = self.log.borrow_mut();
            assert!(width > 0 && height > 0, "zero-sized build reached the backend");
            assert_eq!(log.live_targets, 0, "targets built twice without release");

            let extent = self
                .surface_extent
                .unwrap_or(vk::Extent2D { width, height });
            if extent.width == 0 || extent.height == 0 {
                return Ok(None);
            }

            log.target_builds += 1;
            log.live_targets += 1;
            self.next_image = 0;
            Ok(Some(SurfaceTargets {
                extent,
                image_count: self.image_count,
                command_buffers: self.image_count,
                framebuffer_extents: vec![extent; self.image_count],
            }))
        }

        fn release_targets(&mut self) -> Result<()> {
            let mut log = self.log.borrow_mut();
            assert_eq!(log.live_targets, 1, "release without live targets");
            log.live_targets -= 1;
            log.target_releases += 1;
            Ok(())
        }

        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            // The GPU finishes whatever the slot had in flight
            let mut log = self.log.borrow_mut();
            log.waits += 1;
            log.fences[slot] = Fence::Signaled;
            Ok(())
        }

        fn acquire_image(&mut self, _slot: usize) -> Result<Acquired> {
            if let Some(scripted) = self.acquire_script.pop_front() {
                return Ok(scripted);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count as u32;
            Ok(Acquired::Image { index, suboptimal: false })
        }

        fn submit(&mut self, slot: usize, image_index: u32, _mvp: &glam::Mat4) -> Result<()> {
            let mut log = self.log.borrow_mut();
            assert_eq!(log.live_targets, 1, "submit without surface targets");
            assert_eq!(
                log.fences[slot],
                Fence::Signaled,
                "slot {} reused before its fence signaled",
                slot
            );
            assert!((image_index as usize) < self.image_count);
            log.fences[slot] = Fence::InFlight;
            log.submits.push((slot, image_index));
            Ok(())
        }

        fn present(&mut self, _slot: usize, _image_index: u32) -> Result<Presented> {
            self.log.borrow_mut().presents += 1;
            Ok(self.present_script.pop_front().unwrap_or(Presented::Optimal))
        }

        fn shutdown(&mut self) -> Result<()> {
            let mut log = self.log.borrow_mut();
            log.shutdowns += 1;
            log.fences_at_shutdown = log.fences.clone();
            log.live_targets = 0;
            Ok(())
        }
    }

    fn renderer(image_count: usize) -> (Renderer<MockBackend>, Rc<RefCell<Log>>) {
        let (backend, log) = MockBackend::new(image_count);
        let renderer = Renderer::new(backend, 640, 360, RendererSettings::default()).unwrap();
        (renderer, log)
    }

    #[test]
    fn construct_builds_pipeline_once_and_first_draw_presents() {
        for image_count in [2, 3] {
            let (mut renderer, log) = renderer(image_count);

            assert_eq!(renderer.state(), LifecycleState::SteadyState);
            let targets = renderer.targets().unwrap();
            assert_eq!(targets.command_buffers, image_count);
            assert_eq!(targets.image_count, image_count);

            assert_eq!(renderer.draw().unwrap(), FrameStatus::Presented);
            assert_eq!(log.borrow().persistent_builds, 1);
            assert_eq!(log.borrow().presents, 1);
        }
    }

    #[test]
    fn resize_matches_command_buffers_and_framebuffers_to_images() {
        let (mut renderer, log) = renderer(3);

        for (w, h) in [(800, 600), (1, 1), (1920, 1080), (333, 777)] {
            renderer.resize(w, h).unwrap();
            assert_eq!(renderer.state(), LifecycleState::SteadyState);

            let targets = renderer.targets().unwrap();
            assert_eq!(targets.command_buffers, targets.image_count);
            assert_eq!(targets.framebuffer_extents.len(), targets.image_count);
            for extent in &targets.framebuffer_extents {
                assert_eq!((extent.width, extent.height), (w, h));
            }
        }

        assert_eq!(log.borrow().persistent_builds, 1);
    }

    #[test]
    fn never_submits_to_a_slot_with_an_unsignaled_fence() {
        let (mut renderer, log) = renderer(3);

        for _ in 0..25 {
            renderer.run().unwrap();
        }

        let log = log.borrow();
        assert_eq!(log.submits.len(), 25);
        assert_eq!(log.waits, 25);
        let slots: Vec<usize> = log.submits.iter().map(|&(slot, _)| slot).collect();
        assert!(slots.iter().enumerate().all(|(i, &slot)| slot == i % 2));
    }

    #[test]
    fn minimize_restore_cycles_do_not_leak_targets() {
        let (mut renderer, log) = renderer(2);

        for _ in 0..5 {
            renderer.resize(0, 0).unwrap();
            assert_eq!(renderer.state(), LifecycleState::Suspended);
            assert!(renderer.targets().is_none());
            assert_eq!(log.borrow().live_targets, 0);

            renderer.resize(640, 360).unwrap();
            assert_eq!(renderer.state(), LifecycleState::SteadyState);
            assert_eq!(log.borrow().live_targets, 1);
        }

        let log = log.borrow();
        assert_eq!(log.target_builds, 6);
        assert_eq!(log.target_releases, 5);
    }

    #[test]
    fn run_while_suspended_submits_nothing() {
        let (mut renderer, log) = renderer(2);
        renderer.resize(0, 0).unwrap();

        for _ in 0..10 {
            assert_eq!(renderer.run().unwrap(), FrameStatus::Skipped);
        }
        assert!(log.borrow().submits.is_empty());
        assert_eq!(log.borrow().waits, 0);

        let rebuilds_before = renderer.rebuild_count();
        renderer.resize(640, 360).unwrap();
        assert_eq!(renderer.rebuild_count(), rebuilds_before + 1);
        assert_eq!(log.borrow().target_builds, 2);

        assert_eq!(renderer.draw().unwrap(), FrameStatus::Presented);
        assert_eq!(log.borrow().submits.len(), 1);
    }

    #[test]
    fn repeated_zero_resizes_release_once() {
        let (mut renderer, log) = renderer(2);
        renderer.resize(0, 100).unwrap();
        renderer.resize(0, 0).unwrap();
        renderer.resize(100, 0).unwrap();

        assert_eq!(renderer.state(), LifecycleState::Suspended);
        assert_eq!(log.borrow().target_releases, 1);
    }

    #[test]
    fn same_size_resize_is_a_no_op() {
        let (mut renderer, log) = renderer(2);
        renderer.resize(640, 360).unwrap();
        assert_eq!(renderer.rebuild_count(), 0);
        assert_eq!(log.borrow().target_builds, 1);
    }

    #[test]
    fn out_of_date_acquire_rebuilds_on_next_run() {
        let (mut backend, log) = MockBackend::new(3);
        backend.acquire_script.push_back(Acquired::OutOfDate);
        let mut renderer = Renderer::new(backend, 640, 360, RendererSettings::default()).unwrap();

        assert_eq!(renderer.run().unwrap(), FrameStatus::Skipped);
        assert_eq!(renderer.state(), LifecycleState::Rebuilding);
        assert_eq!(log.borrow().fences[0], Fence::Signaled);
        assert_eq!(renderer.current_frame(), 0);

        assert_eq!(renderer.run().unwrap(), FrameStatus::Presented);
        assert_eq!(renderer.state(), LifecycleState::SteadyState);
        assert_eq!(renderer.rebuild_count(), 1);
        assert_eq!(log.borrow().submits.len(), 1);
    }

    #[test]
    fn stale_present_schedules_one_rebuild() {
        let (mut backend, log) = MockBackend::new(2);
        backend.present_script.push_back(Presented::Stale);
        let mut renderer = Renderer::new(backend, 640, 360, RendererSettings::default()).unwrap();

        assert_eq!(renderer.run().unwrap(), FrameStatus::Presented);
        assert_eq!(renderer.state(), LifecycleState::Rebuilding);

        renderer.run().unwrap();
        renderer.run().unwrap();
        assert_eq!(renderer.rebuild_count(), 1);
        assert_eq!(log.borrow().presents, 3);
    }

    #[test]
    fn suboptimal_acquire_still_draws_then_rebuilds() {
        let (mut backend, log) = MockBackend::new(2);
        backend
            .acquire_script
            .push_back(Acquired::Image { index: 1, suboptimal: true });
        let mut renderer = Renderer::new(backend, 640, 360, RendererSettings::default()).unwrap();

        assert_eq!(renderer.run().unwrap(), FrameStatus::Presented);
        assert_eq!(log.borrow().submits, vec![(0, 1)]);
        assert_eq!(renderer.state(), LifecycleState::Rebuilding);
    }

    #[test]
    fn surface_reporting_zero_extent_suspends() {
        let (mut backend, log) = MockBackend::new(2);
        backend.surface_extent = Some(vk::Extent2D { width: 0, height: 0 });
        let mut renderer = Renderer::new(backend, 640, 360, RendererSettings::default()).unwrap();

        assert_eq!(renderer.state(), LifecycleState::Suspended);
        assert_eq!(renderer.run().unwrap(), FrameStatus::Skipped);
        assert!(log.borrow().submits.is_empty());
    }

    #[test]
    fn zero_initial_size_starts_suspended() {
        let (backend, log) = MockBackend::new(2);
        let mut renderer = Renderer::new(backend, 0, 0, RendererSettings::default()).unwrap();

        assert_eq!(renderer.state(), LifecycleState::Suspended);
        assert_eq!(log.borrow().persistent_builds, 1);
        assert_eq!(log.borrow().target_builds, 0);

        renderer.resize(640, 360).unwrap();
        assert_eq!(renderer.state(), LifecycleState::SteadyState);
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let (backend, _log) = MockBackend::new(2);
        let settings = RendererSettings {
            frames_in_flight: 0,
            ..Default::default()
        };
        let err = Renderer::new(backend, 640, 360, settings).err().unwrap();
        assert_eq!(
            err.downcast_ref::<RendererError>(),
            Some(&RendererError::InvalidFramesInFlight)
        );
    }

    #[test]
    fn shutdown_is_terminal_and_idempotent() {
        let (mut renderer, log) = renderer(2);
        renderer.run().unwrap();

        renderer.shutdown().unwrap();
        renderer.shutdown().unwrap();
        assert_eq!(renderer.state(), LifecycleState::Terminal);

        assert_eq!(renderer.run().unwrap(), FrameStatus::Skipped);
        renderer.resize(800, 600).unwrap();
        assert_eq!(renderer.state(), LifecycleState::Terminal);

        drop(renderer);
        let log = log.borrow();
        assert_eq!(log.shutdowns, 1);
        assert_eq!(log.submits.len(), 1);
    }

    #[test]
    fn shutdown_waits_for_every_slot_before_teardown() {
        let (mut renderer, log) = renderer(3);
        for _ in 0..3 {
            renderer.run().unwrap();
        }
        assert!(log.borrow().fences.contains(&Fence::InFlight));

        renderer.shutdown().unwrap();

        let log = log.borrow();
        assert_eq!(log.shutdowns, 1);
        assert_eq!(log.fences_at_shutdown.len(), 2);
        assert!(log.fences_at_shutdown.iter().all(|&f| f == Fence::Signaled));
    }

    #[test]
    fn drop_shuts_the_backend_down() {
        let (renderer, log) = renderer(2);
        drop(renderer);
        assert_eq!(log.borrow().shutdowns, 1);
    }

    #[test]
    fn three_slots_rotate_through_all_fences() {
        let (backend, log) = MockBackend::new(3);
        let settings = RendererSettings {
            frames_in_flight: 3,
            ..Default::default()
        };
        let mut renderer = Renderer::new(backend, 640, 360, settings).unwrap();

        for _ in 0..6 {
            renderer.run().unwrap();
        }
        let slots: Vec<usize> = log.borrow().submits.iter().map(|&(s, _)| s).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
    }
}
