//! Overlay registry (spec §4.2): the mapping from a small integer ID to a
//! loadable code+data module the dispatch kernel can page in on demand.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::arena::{Arena, Box};
use crate::config::OVERLAY_SLOTS;

/// A registered overlay's immutable description. The host builds one of
/// these and hands it to `register`/`register_static`; after that it is
/// never mutated (spec §3: "immutable after registration").
pub struct OverlayDescriptor {
    /// Code image handed to the kernel's DMA-in path. Opaque to this crate
    /// (the coprocessor's machine code is explicitly out of scope).
    pub text_image: &'static [u8],
    /// Initial contents of the overlay's persistent-state area.
    pub data_image: &'static [u8],
    /// Per-command word count, indexed by command index `0..count`. Every
    /// entry must be in `1..=MAX_COMMAND_WORDS`; `register`/`register_static`
    /// validate this eagerly (spec_full §6: "fail fast per spec.md §7").
    pub command_sizes: &'static [u8],
}

impl OverlayDescriptor {
    fn validate(&self) {
        assert!(
            !self.command_sizes.is_empty(),
            "overlay descriptor declares no commands"
        );
        assert!(
            self.command_sizes.len() <= 16,
            "overlay declares {} commands, more than one 16-command ID range can address",
            self.command_sizes.len()
        );
        for (i, &size) in self.command_sizes.iter().enumerate() {
            assert!(
                size as usize >= 1 && size as usize <= crate::config::MAX_COMMAND_WORDS,
                "overlay command {} declares size {}, out of 1..={} range",
                i,
                size,
                crate::config::MAX_COMMAND_WORDS
            );
        }
    }

    /// Number of consecutive overlay-ID slots this descriptor needs.
    fn slots_needed(&self) -> usize {
        (self.command_sizes.len() + 15) / 16
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, defmt::Format)]
pub enum RegistryError {
    /// No contiguous run of free IDs was found for `register`.
    NoContiguousRange,
    /// `register_static` targeted an ID (or range) already occupied.
    SlotOccupied,
    /// An ID was out of the `0..OVERLAY_SLOTS` range, or 0 (reserved for
    /// internal commands).
    InvalidId,
}

struct Slot {
    /// Uncached from the host's viewpoint in the real system (DMA target);
    /// modeled here as plain atomics per the ring buffer's convention.
    state: &'static [AtomicU32],
    /// Whether this slot is the first of a multi-slot descriptor, so
    /// `unregister` knows how many slots to free together.
    range_len: usize,
    /// This ID's slice of the descriptor's command-size table (up to 16
    /// entries), so `Engine::write` can validate `args.len()` without
    /// retaining the whole descriptor.
    command_sizes: &'static [u8],
}

/// Table of up to `OVERLAY_SLOTS` overlay bindings (spec §4.2: "table of up
/// to 16 overlay ID slots").
pub struct OverlayRegistry {
    slots: [Option<Slot>; OVERLAY_SLOTS],
}

impl OverlayRegistry {
    pub fn new() -> Self {
        OverlayRegistry {
            slots: Default::default(),
        }
    }

    /// Registers `descriptor` at the lowest available contiguous ID range.
    /// IDs start at 1; ID 0 is reserved for internal opcodes.
    pub fn register(
        &mut self,
        arena: &Arena,
        descriptor: &OverlayDescriptor,
    ) -> Result<u8, RegistryError> {
        descriptor.validate();
        let needed = descriptor.slots_needed();
        let start = self.find_free_range(1, needed)?;
        self.bind(arena, descriptor, start, needed);
        Ok(start as u8)
    }

    /// Registers `descriptor` at a caller-chosen starting ID.
    pub fn register_static(
        &mut self,
        arena: &Arena,
        descriptor: &OverlayDescriptor,
        id: u8,
    ) -> Result<(), RegistryError> {
        descriptor.validate();
        let needed = descriptor.slots_needed();
        let start = id as usize;
        if start == 0 || start + needed > OVERLAY_SLOTS {
            return Err(RegistryError::InvalidId);
        }
        if (start..start + needed).any(|i| self.slots[i].is_some()) {
            return Err(RegistryError::SlotOccupied);
        }
        self.bind(arena, descriptor, start, needed);
        Ok(())
    }

    /// Frees the ID (and any additional slots in its range). The caller is
    /// responsible for ensuring no queued command still references it --
    /// in practice, after a `wait` (spec §4.2).
    pub fn unregister(&mut self, id: u8) -> Result<(), RegistryError> {
        let start = id as usize;
        if start == 0 || start >= OVERLAY_SLOTS || self.slots[start].is_none() {
            return Err(RegistryError::InvalidId);
        }
        let range_len = self.slots[start].as_ref().unwrap().range_len;
        for i in start..start + range_len {
            self.slots[i] = None;
        }
        Ok(())
    }

    /// Host-visible pointer to the given ID's persistent-state backing
    /// store. Callers must have already `wait`ed (the implicit wait this
    /// performs in the real system is an engine-level concern living in
    /// `Engine::state_pointer`, which calls `Engine::wait` before this).
    pub fn state_pointer(&self, id: u8) -> Option<&'static [AtomicU32]> {
        self.slots
            .get(id as usize)?
            .as_ref()
            .map(|slot| slot.state)
    }

    pub fn is_registered(&self, id: u8) -> bool {
        (id as usize) < OVERLAY_SLOTS && self.slots[id as usize].is_some()
    }

    /// Declared word count (including word 0) for `command_index` under
    /// overlay `id`, looked up in the per-overlay table established at
    /// registration (spec §4.1: "Command size is looked up in a per-overlay
    /// table").
    pub fn command_size(&self, id: u8, command_index: u8) -> Option<u8> {
        self.slots
            .get(id as usize)?
            .as_ref()?
            .command_sizes
            .get(command_index as usize)
            .copied()
    }

    fn find_free_range(&self, from: usize, needed: usize) -> Result<usize, RegistryError> {
        let mut start = from;
        while start + needed <= OVERLAY_SLOTS {
            if (start..start + needed).all(|i| self.slots[i].is_none()) {
                return Ok(start);
            }
            start += 1;
        }
        Err(RegistryError::NoContiguousRange)
    }

    fn bind(&mut self, arena: &Arena, descriptor: &OverlayDescriptor, start: usize, needed: usize) {
        let state: Box<'static, [AtomicU32]> = arena
            .alloc_slice_default::<AtomicU32>((descriptor.data_image.len() + 3) / 4)
            .expect("arena exhausted allocating overlay persistent state");
        let state = state.leak();
        for (i, chunk) in descriptor.data_image.chunks(4).enumerate() {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            state[i].store(u32::from_le_bytes(word), Ordering::Relaxed);
        }
        let sizes: &'static [u8] = arena
            .alloc_slice_copy(descriptor.command_sizes)
            .expect("arena exhausted allocating overlay command-size table")
            .leak();
        for i in 0..needed {
            let lo = i * 16;
            let hi = (lo + 16).min(sizes.len());
            self.slots[start + i] = Some(Slot {
                state: if i == 0 { state } else { &[] },
                range_len: if i == 0 { needed } else { 0 },
                command_sizes: &sizes[lo..hi],
            });
        }
    }
}

impl Default for OverlayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::MaybeUninit;

    fn backing(len: usize) -> &'static mut [MaybeUninit<u8>] {
        let v = std::vec![MaybeUninit::uninit(); len].into_boxed_slice();
        std::boxed::Box::leak(v)
    }

    fn descriptor(data: &'static [u8], sizes: &'static [u8]) -> OverlayDescriptor {
        OverlayDescriptor {
            text_image: &[],
            data_image: data,
            command_sizes: sizes,
        }
    }

    #[test]
    fn register_assigns_lowest_free_id() {
        let arena = Arena::new(backing(1 << 16));
        let mut reg = OverlayRegistry::new();
        let d = descriptor(&[1, 2, 3, 4], &[1, 2]);
        let id = reg.register(&arena, &d).unwrap();
        assert_eq!(id, 1);
        let id2 = reg.register(&arena, &d).unwrap();
        assert_eq!(id2, 2);
    }

    #[test]
    fn register_static_rejects_occupied_slot() {
        let arena = Arena::new(backing(1 << 16));
        let mut reg = OverlayRegistry::new();
        let d = descriptor(&[], &[1]);
        reg.register_static(&arena, &d, 5).unwrap();
        assert_eq!(
            reg.register_static(&arena, &d, 5),
            Err(RegistryError::SlotOccupied)
        );
    }

    #[test]
    fn register_static_rejects_id_zero() {
        let arena = Arena::new(backing(1 << 16));
        let mut reg = OverlayRegistry::new();
        let d = descriptor(&[], &[1]);
        assert_eq!(
            reg.register_static(&arena, &d, 0),
            Err(RegistryError::InvalidId)
        );
    }

    #[test]
    fn unregister_frees_id_for_reuse() {
        let arena = Arena::new(backing(1 << 16));
        let mut reg = OverlayRegistry::new();
        let d = descriptor(&[], &[1]);
        let id = reg.register(&arena, &d).unwrap();
        reg.unregister(id).unwrap();
        let id2 = reg.register(&arena, &d).unwrap();
        assert_eq!(id, id2);
    }

    #[test]
    fn state_pointer_reflects_initial_data_image() {
        let arena = Arena::new(backing(1 << 16));
        let mut reg = OverlayRegistry::new();
        let d = descriptor(&[0x78, 0x56, 0x34, 0x12], &[1]);
        let id = reg.register(&arena, &d).unwrap();
        let state = reg.state_pointer(id).unwrap();
        assert_eq!(state[0].load(Ordering::Relaxed), 0x1234_5678);
    }

    #[test]
    #[should_panic(expected = "out of 1..=")]
    fn validate_rejects_oversized_command() {
        let arena = Arena::new(backing(1 << 16));
        let mut reg = OverlayRegistry::new();
        let d = descriptor(&[], &[200]);
        let _ = reg.register(&arena, &d);
    }
}
