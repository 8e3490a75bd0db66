// Frame lifecycle bookkeeping shared by every backend
//
// Tracks frames in flight, which frame slot last used each swapchain image,
// and the framebuffer size generation that drives swapchain recreation.
// Contains no GPU handles so the protocol can be exercised without a device.

/// Where the current frame is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    ImageAcquired,
    Recording,
    InRenderpass,
    Submitted,
    Presented,
}

/// Outcome of asking to start a swapchain recreation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateGate {
    /// A recreation is already running; the request is ignored.
    AlreadyRecreating,
    /// Width or height is zero; try again after the next resize.
    DegenerateExtent,
    Proceed,
}

#[derive(Debug)]
pub struct FrameLifecycle {
    framebuffer_width: u32,
    framebuffer_height: u32,
    /// Bumped on every resize notification.
    size_generation: u64,
    /// Size generation the current swapchain was built for.
    last_generation: u64,
    recreating: bool,

    max_frames_in_flight: usize,
    current_frame: usize,
    image_index: u32,
    /// Frame slot whose fence guards each swapchain image, if any.
    images_in_flight: Vec<Option<usize>>,

    phase: FramePhase,
}

impl FrameLifecycle {
    pub fn new(width: u32, height: u32, max_frames_in_flight: usize) -> Self {
        Self {
            framebuffer_width: width,
            framebuffer_height: height,
            size_generation: 0,
            last_generation: 0,
            recreating: false,
            max_frames_in_flight: max_frames_in_flight.max(1),
            current_frame: 0,
            image_index: 0,
            images_in_flight: Vec::new(),
            phase: FramePhase::Idle,
        }
    }

    /// Record a new framebuffer size. Never touches the swapchain directly.
    pub fn resized(&mut self, width: u32, height: u32) {
        self.framebuffer_width = width;
        self.framebuffer_height = height;
        self.size_generation += 1;
        log::debug!(
            "Framebuffer resized to {}x{} (generation {})",
            width,
            height,
            self.size_generation
        );
    }

    /// Force a recreation on the next `begin_frame`, e.g. after present
    /// reported the swapchain as out of date or suboptimal.
    pub fn invalidate_swapchain(&mut self) {
        self.size_generation += 1;
    }

    pub fn needs_recreation(&self) -> bool {
        self.size_generation != self.last_generation
    }

    pub fn is_recreating(&self) -> bool {
        self.recreating
    }

    pub fn begin_recreation(&mut self) -> RecreateGate {
        if self.recreating {
            log::debug!("Swapchain recreation already in progress");
            return RecreateGate::AlreadyRecreating;
        }
        if self.framebuffer_width == 0 || self.framebuffer_height == 0 {
            log::debug!(
                "Skipping swapchain recreation for degenerate extent {}x{}",
                self.framebuffer_width,
                self.framebuffer_height
            );
            return RecreateGate::DegenerateExtent;
        }

        self.recreating = true;
        for slot in self.images_in_flight.iter_mut() {
            *slot = None;
        }
        RecreateGate::Proceed
    }

    /// On success the current size generation becomes the built one.
    pub fn finish_recreation(&mut self, success: bool) {
        if success {
            self.last_generation = self.size_generation;
        }
        self.recreating = false;
        self.phase = FramePhase::Idle;
    }

    /// Resize the image-to-frame mapping after the swapchain (re)creates.
    pub fn set_image_count(&mut self, count: usize) {
        self.images_in_flight = vec![None; count];
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    /// Frame slot other than the current one still holding `image_index`.
    pub fn image_owner(&self, image_index: u32) -> Option<usize> {
        self.images_in_flight
            .get(image_index as usize)
            .copied()
            .flatten()
            .filter(|&slot| slot != self.current_frame)
    }

    /// Bind `image_index` to the current frame slot.
    ///
    /// Returns the slot whose fence must be waited on first, when a different
    /// frame still holds the image.
    pub fn claim_image(&mut self, image_index: u32) -> Option<usize> {
        let entry = self.images_in_flight.get_mut(image_index as usize)?;
        let previous = entry.filter(|&slot| slot != self.current_frame);
        *entry = Some(self.current_frame);
        previous
    }

    /// Record the image handed out by the presentation engine.
    pub fn image_acquired(&mut self, image_index: u32) {
        self.image_index = image_index;
        self.phase = FramePhase::ImageAcquired;
    }

    /// Rotate to the next frame slot after a present.
    pub fn advance_frame(&mut self) {
        self.current_frame = (self.current_frame + 1) % self.max_frames_in_flight;
        self.phase = FramePhase::Idle;
    }

    pub fn set_phase(&mut self, phase: FramePhase) {
        self.phase = phase;
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn max_frames_in_flight(&self) -> usize {
        self.max_frames_in_flight
    }

    pub fn framebuffer_size(&self) -> (u32, u32) {
        (self.framebuffer_width, self.framebuffer_height)
    }

    pub fn size_generation(&self) -> u64 {
        self.size_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lifecycle_needs_no_recreation() {
        let lifecycle = FrameLifecycle::new(800, 600, 2);
        assert!(!lifecycle.needs_recreation());
        assert_eq!(lifecycle.current_frame(), 0);
        assert_eq!(lifecycle.phase(), FramePhase::Idle);
    }

    #[test]
    fn repeated_resizes_collapse_into_one_recreation() {
        let mut lifecycle = FrameLifecycle::new(800, 600, 2);
        lifecycle.resized(1024, 768);
        lifecycle.resized(1024, 768);
        lifecycle.resized(1280, 720);
        assert!(lifecycle.needs_recreation());

        assert_eq!(lifecycle.begin_recreation(), RecreateGate::Proceed);
        lifecycle.finish_recreation(true);
        assert!(!lifecycle.needs_recreation());
        assert_eq!(lifecycle.framebuffer_size(), (1280, 720));
    }

    #[test]
    fn degenerate_extent_defers_recreation() {
        let mut lifecycle = FrameLifecycle::new(800, 600, 2);
        lifecycle.resized(0, 600);
        assert_eq!(lifecycle.begin_recreation(), RecreateGate::DegenerateExtent);
        assert!(!lifecycle.is_recreating());
        assert!(lifecycle.needs_recreation());

        lifecycle.resized(800, 600);
        assert_eq!(lifecycle.begin_recreation(), RecreateGate::Proceed);
    }

    #[test]
    fn recreation_is_not_reentrant() {
        let mut lifecycle = FrameLifecycle::new(800, 600, 2);
        lifecycle.resized(640, 480);
        assert_eq!(lifecycle.begin_recreation(), RecreateGate::Proceed);
        assert_eq!(
            lifecycle.begin_recreation(),
            RecreateGate::AlreadyRecreating
        );
        lifecycle.finish_recreation(true);
        assert!(!lifecycle.is_recreating());
    }

    #[test]
    fn failed_recreation_is_retried() {
        let mut lifecycle = FrameLifecycle::new(800, 600, 2);
        lifecycle.resized(640, 480);
        assert_eq!(lifecycle.begin_recreation(), RecreateGate::Proceed);
        lifecycle.finish_recreation(false);
        assert!(lifecycle.needs_recreation());
    }

    #[test]
    fn claiming_an_image_reports_the_previous_owner() {
        let mut lifecycle = FrameLifecycle::new(800, 600, 2);
        lifecycle.set_image_count(3);

        assert_eq!(lifecycle.claim_image(0), None);
        lifecycle.advance_frame();
        assert_eq!(lifecycle.claim_image(1), None);
        lifecycle.advance_frame();
        // back on slot 0, image 1 is still owned by slot 1
        assert_eq!(lifecycle.image_owner(1), Some(1));
        assert_eq!(lifecycle.image_owner(0), None);
        assert_eq!(lifecycle.claim_image(1), Some(1));
        // same slot claiming the same image again is not a conflict
        assert_eq!(lifecycle.claim_image(1), None);
    }

    #[test]
    fn recreation_clears_image_ownership() {
        let mut lifecycle = FrameLifecycle::new(800, 600, 2);
        lifecycle.set_image_count(2);
        lifecycle.claim_image(0);
        lifecycle.advance_frame();

        lifecycle.resized(400, 300);
        assert_eq!(lifecycle.begin_recreation(), RecreateGate::Proceed);
        lifecycle.finish_recreation(true);
        assert_eq!(lifecycle.claim_image(0), None);
    }

    #[test]
    fn frame_slots_wrap() {
        let mut lifecycle = FrameLifecycle::new(800, 600, 3);
        for expected in [1, 2, 0, 1] {
            lifecycle.advance_frame();
            assert_eq!(lifecycle.current_frame(), expected);
        }
    }

    #[test]
    fn invalidation_forces_recreation() {
        let mut lifecycle = FrameLifecycle::new(800, 600, 2);
        lifecycle.invalidate_swapchain();
        assert!(lifecycle.needs_recreation());
    }
}
