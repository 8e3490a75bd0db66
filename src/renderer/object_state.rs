// Per-object descriptor bookkeeping
//
// Each render object owns one descriptor set per frame slot. Descriptors are
// only rewritten when the resource behind them changed, tracked with a
// generation marker per descriptor per frame slot.

use super::error::RendererError;
use super::texture::INVALID_ID;
use super::types::{MAX_FRAMES_IN_FLIGHT, OBJECT_DESCRIPTOR_COUNT};

/// Generation last written for one descriptor, per frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorState {
    pub generations: [u32; MAX_FRAMES_IN_FLIGHT],
}

impl Default for DescriptorState {
    fn default() -> Self {
        Self {
            generations: [INVALID_ID; MAX_FRAMES_IN_FLIGHT],
        }
    }
}

/// Which texture a sampler descriptor should be written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerSource {
    Requested,
    Default,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectDescriptorState {
    pub descriptors: [DescriptorState; OBJECT_DESCRIPTOR_COUNT],
}

impl ObjectDescriptorState {
    /// Binding 0 holds the object uniform buffer, which never moves.
    /// Returns true the first time a frame slot needs it written.
    pub fn sync_uniform(&mut self, frame: usize) -> bool {
        let marker = &mut self.descriptors[0].generations[frame];
        if *marker == INVALID_ID {
            *marker = 1;
            true
        } else {
            false
        }
    }

    /// Decide whether the sampler at `binding` must be rewritten for `frame`,
    /// without touching the marker.
    ///
    /// `generation` is the requested texture's generation, or `None` when the
    /// object has no texture. An unloaded texture always falls back to the
    /// default.
    pub fn pending_sampler(
        &self,
        binding: usize,
        frame: usize,
        generation: Option<u32>,
    ) -> Option<SamplerSource> {
        match generation {
            Some(generation) if generation != INVALID_ID => {
                if self.descriptors[binding].generations[frame] == generation {
                    None
                } else {
                    Some(SamplerSource::Requested)
                }
            }
            _ => Some(SamplerSource::Default),
        }
    }

    /// Record that the sampler at `binding` was written for `frame`.
    ///
    /// A default write leaves the marker invalid, so the real texture is
    /// picked up as soon as it loads.
    pub fn mark_sampler(&mut self, binding: usize, frame: usize, generation: Option<u32>) {
        self.descriptors[binding].generations[frame] = generation.unwrap_or(INVALID_ID);
    }

    /// [`pending_sampler`](Self::pending_sampler) followed by
    /// [`mark_sampler`](Self::mark_sampler) for backends whose writes cannot fail.
    pub fn sync_sampler(
        &mut self,
        binding: usize,
        frame: usize,
        generation: Option<u32>,
    ) -> Option<SamplerSource> {
        let source = self.pending_sampler(binding, frame, generation);
        if source.is_some() {
            self.mark_sampler(binding, frame, generation);
        }
        source
    }

    /// Forget every sampler marker so the next frame in each slot rewrites
    /// them. Needed when the object switches to a different texture, whose
    /// generation may equal the old one.
    pub fn invalidate_samplers(&mut self) {
        for descriptor in &mut self.descriptors[1..] {
            descriptor.generations = [INVALID_ID; MAX_FRAMES_IN_FLIGHT];
        }
    }
}

/// Object id allocator plus the descriptor state of every live object.
///
/// Ids are handed out monotonically; released ids are never reused.
#[derive(Debug)]
pub struct ObjectSlots {
    next_id: u32,
    capacity: u32,
    states: Vec<ObjectDescriptorState>,
}

impl ObjectSlots {
    pub fn new(capacity: u32) -> Self {
        Self {
            next_id: 0,
            capacity,
            states: vec![ObjectDescriptorState::default(); capacity as usize],
        }
    }

    pub fn acquire(&mut self) -> Result<u32, RendererError> {
        if self.next_id >= self.capacity {
            return Err(RendererError::ObjectCapacityExhausted {
                capacity: self.capacity,
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        self.states[id as usize] = ObjectDescriptorState::default();
        Ok(id)
    }

    pub fn release(&mut self, object_id: u32) {
        if let Some(state) = self.states.get_mut(object_id as usize) {
            *state = ObjectDescriptorState::default();
        }
    }

    pub fn state_mut(&mut self, object_id: u32) -> Option<&mut ObjectDescriptorState> {
        if object_id >= self.next_id {
            return None;
        }
        self.states.get_mut(object_id as usize)
    }

    pub fn acquired(&self) -> u32 {
        self.next_id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_is_written_once_per_frame_slot() {
        let mut state = ObjectDescriptorState::default();
        assert!(state.sync_uniform(0));
        assert!(!state.sync_uniform(0));
        assert!(state.sync_uniform(1));
        assert!(!state.sync_uniform(1));
    }

    #[test]
    fn sampler_written_only_on_generation_change() {
        let mut state = ObjectDescriptorState::default();
        assert_eq!(state.sync_sampler(1, 0, Some(0)), Some(SamplerSource::Requested));
        assert_eq!(state.sync_sampler(1, 0, Some(0)), None);
        assert_eq!(state.sync_sampler(1, 0, Some(1)), Some(SamplerSource::Requested));
        assert_eq!(state.sync_sampler(1, 0, Some(1)), None);
        // other frame slots are tracked independently
        assert_eq!(state.sync_sampler(1, 1, Some(1)), Some(SamplerSource::Requested));
    }

    #[test]
    fn unloaded_texture_uses_default_every_time() {
        let mut state = ObjectDescriptorState::default();
        assert_eq!(
            state.sync_sampler(1, 0, Some(INVALID_ID)),
            Some(SamplerSource::Default)
        );
        assert_eq!(state.sync_sampler(1, 0, None), Some(SamplerSource::Default));
        assert_eq!(state.descriptors[1].generations[0], INVALID_ID);
    }

    #[test]
    fn texture_loading_after_default_is_picked_up() {
        let mut state = ObjectDescriptorState::default();
        state.sync_sampler(1, 0, Some(3));
        assert_eq!(state.sync_sampler(1, 0, None), Some(SamplerSource::Default));
        // marker was reset, so the same generation is written again
        assert_eq!(state.sync_sampler(1, 0, Some(3)), Some(SamplerSource::Requested));
    }

    #[test]
    fn pending_sampler_does_not_commit() {
        let mut state = ObjectDescriptorState::default();
        assert_eq!(state.pending_sampler(1, 0, Some(2)), Some(SamplerSource::Requested));
        // the write never happened, e.g. the texture handle was missing
        assert_eq!(state.pending_sampler(1, 0, Some(2)), Some(SamplerSource::Requested));
        assert_eq!(state.descriptors[1].generations[0], INVALID_ID);

        state.mark_sampler(1, 0, Some(2));
        assert_eq!(state.pending_sampler(1, 0, Some(2)), None);
    }

    #[test]
    fn switching_texture_of_equal_generation_rewrites_sampler() {
        let mut state = ObjectDescriptorState::default();
        state.sync_uniform(0);
        state.sync_sampler(1, 0, Some(0));
        state.sync_sampler(1, 1, Some(0));

        // another texture also at generation 0
        state.invalidate_samplers();
        assert_eq!(state.sync_sampler(1, 0, Some(0)), Some(SamplerSource::Requested));
        assert_eq!(state.sync_sampler(1, 1, Some(0)), Some(SamplerSource::Requested));
        // the uniform marker survives
        assert!(!state.sync_uniform(0));
    }

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut slots = ObjectSlots::new(3);
        let a = slots.acquire().unwrap();
        let b = slots.acquire().unwrap();
        slots.release(a);
        let c = slots.acquire().unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        match slots.acquire() {
            Err(RendererError::ObjectCapacityExhausted { capacity }) => assert_eq!(capacity, 3),
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn release_resets_descriptor_state() {
        let mut slots = ObjectSlots::new(2);
        let id = slots.acquire().unwrap();
        let state = slots.state_mut(id).unwrap();
        state.sync_uniform(0);
        state.sync_sampler(1, 0, Some(0));

        slots.release(id);
        let state = slots.state_mut(id).unwrap();
        assert!(state.sync_uniform(0));
        assert_eq!(state.descriptors[1].generations[0], INVALID_ID);
    }

    #[test]
    fn unknown_object_has_no_state() {
        let mut slots = ObjectSlots::new(2);
        assert!(slots.state_mut(0).is_none());
        slots.acquire().unwrap();
        assert!(slots.state_mut(0).is_some());
        assert!(slots.state_mut(5).is_none());
    }
}
