//! The ring buffer and its lockless single-producer/single-consumer
//! publication protocol (spec §3, §4.1, §9).
//!
//! Two equal-sized regions back each priority class. A region's *sentinel*
//! sits `MAX_COMMAND_WORDS` words before its end; the writer never starts a
//! command past the sentinel. When it would, it instead emits a JUMP to the
//! paired region and continues there.
//!
//! Per the design notes, the original "uncached memory + write word 0 last"
//! trick is modeled here as a plain release-store of word 0 observed with an
//! acquire-load by the consumer. A slot holding `0` has not been published
//! yet; this is also why a command's own first-word payload must never
//! legitimately be all zero (`command::pack_word0` asserts as much for any
//! payload that collides with the sentinel value, by construction the
//! overlay/command-index bits are never both zero for a valid non-internal
//! command and overlay 0 command 0 is reserved as `Internal::Invalid`, the
//! "nothing here yet" marker).

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::addr::{self, RingClass};
use crate::arena::Arena;
use crate::config::MAX_COMMAND_WORDS;

/// One half of a ping-pong ring: a fixed-size word array plus the sentinel
/// offset derived from its length.
pub struct Region {
    words: &'static [AtomicU32],
}

impl Region {
    pub fn new(words: &'static [AtomicU32]) -> Self {
        assert!(
            words.len() > MAX_COMMAND_WORDS,
            "region of {} words too small to hold a sentinel plus any command",
            words.len()
        );
        Region { words }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// First word index at which a new command must not be started; if the
    /// writer's cursor reaches this, it jumps to the paired region instead.
    pub fn sentinel(&self) -> usize {
        self.words.len() - MAX_COMMAND_WORDS
    }
}

/// A priority class's pair of regions plus the cursors both sides maintain
/// into them.
pub struct Ring {
    class: RingClass,
    regions: [Region; 2],
    /// Index (0 or 1) of the region the writer is currently targeting, plus
    /// the word offset within it. Only ever touched by the producer.
    write_region: AtomicUsize,
    write_pos: AtomicUsize,
    /// Mirrors what the consumer is presumed to be working through, used
    /// only to decide whether `write` must allocate a fresh region (i.e.
    /// whether the consumer has drained far enough). In the real system this
    /// is inferred from the consumer having executed a prior JUMP; here we
    /// track it explicitly since the "consumer" is a pluggable stub.
    read_region: AtomicUsize,
    read_pos: AtomicUsize,
}

impl Ring {
    pub fn new(class: RingClass, arena: &Arena, region_words: usize) -> Self {
        let a = arena
            .alloc_slice_default::<AtomicU32>(region_words)
            .expect("arena exhausted allocating ring region A")
            .leak();
        let b = arena
            .alloc_slice_default::<AtomicU32>(region_words)
            .expect("arena exhausted allocating ring region B")
            .leak();
        Ring {
            class,
            regions: [Region::new(a), Region::new(b)],
            write_region: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            read_region: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    pub fn region(&self, index: usize) -> &Region {
        &self.regions[index]
    }

    pub fn write_region_index(&self) -> usize {
        self.write_region.load(Ordering::Relaxed)
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos.load(Ordering::Relaxed)
    }

    /// Address (for JUMP targets and RDP_DISPATCH ranges) of a word slot.
    pub fn address_of(&self, region: usize, word: usize) -> u32 {
        addr::encode_ring(self.class, region, word)
    }

    /// Reserves `len` words for a new command starting at the writer's
    /// current position, jumping to the paired region first if the
    /// reservation would cross the sentinel. Returns the region index and
    /// starting word offset the caller should publish into, plus whether a
    /// JUMP was written (so the caller knows a region switch occurred).
    pub fn reserve(&self, len: usize) -> (usize, usize) {
        assert!(len >= 1 && len <= MAX_COMMAND_WORDS, "bad command length {}", len);
        let region_idx = self.write_region.load(Ordering::Relaxed);
        let pos = self.write_pos.load(Ordering::Relaxed);
        let region = &self.regions[region_idx];
        if pos + len <= region.sentinel() {
            self.write_pos.store(pos + len, Ordering::Relaxed);
            return (region_idx, pos);
        }

        // Emit a JUMP to the paired region's base, then reserve there.
        let next_region = 1 - region_idx;
        let target_addr = self.address_of(next_region, 0);
        self.publish_jump(region_idx, pos, target_addr);

        self.write_region.store(next_region, Ordering::Release);
        self.write_pos.store(len, Ordering::Relaxed);
        (next_region, 0)
    }

    fn publish_jump(&self, region_idx: usize, pos: usize, target_addr: u32) {
        use crate::command::{self, Internal};
        let region = &self.regions[region_idx];
        region.words[pos + 1].store(target_addr, Ordering::Relaxed);
        let word0 = command::pack_word0(0, Internal::Jump as u8, 0);
        debug_assert_ne!(word0, 0);
        region.words[pos].store(word0, Ordering::Release);
    }

    /// Writes `words[0]` last, publishing the command. `words[0]` must have
    /// its reserved payload bits already validated by the caller.
    pub fn publish(&self, region_idx: usize, pos: usize, words: &[u32]) {
        let region = &self.regions[region_idx];
        for (i, w) in words.iter().enumerate().skip(1) {
            region.words[pos + i].store(*w, Ordering::Relaxed);
        }
        debug_assert_ne!(words[0], 0, "word 0 must be non-zero to publish");
        region.words[pos].store(words[0], Ordering::Release);
    }

    /// Consumer-side: observes word 0 of the next unread slot. Returns
    /// `None` if it is still zero (queue idle from here).
    pub fn peek_word0(&self) -> Option<u32> {
        let region_idx = self.read_region.load(Ordering::Relaxed);
        let pos = self.read_pos.load(Ordering::Relaxed);
        let w0 = self.regions[region_idx].words[pos].load(Ordering::Acquire);
        if w0 == 0 {
            None
        } else {
            Some(w0)
        }
    }

    /// Consumer-side: reads `count` words (including word 0, already peeked)
    /// starting at the current read position, then advances past them. Does
    /// not itself interpret JUMP; callers that see a JUMP opcode should use
    /// `follow_jump`.
    pub fn read_command(&self, count: usize, out: &mut [u32]) {
        let region_idx = self.read_region.load(Ordering::Relaxed);
        let pos = self.read_pos.load(Ordering::Relaxed);
        for i in 0..count {
            out[i] = self.regions[region_idx].words[pos + i].load(Ordering::Relaxed);
        }
        // Clear word 0 so this slot reads as "empty" again once the writer
        // eventually wraps back around to it.
        self.regions[region_idx].words[pos].store(0, Ordering::Relaxed);
        self.read_pos.store(pos + count, Ordering::Relaxed);
    }

    /// Consumer-side: follow a same-class JUMP, switching regions. Callers
    /// decode the raw address word with `addr::decode` first and confirm it
    /// names this ring's class.
    pub fn follow_jump(&self, region_idx: usize, pos: usize) {
        // The slot the JUMP itself occupied in the old region is cleared by
        // `read_command`'s caller before this runs.
        self.read_region.store(region_idx, Ordering::Relaxed);
        self.read_pos.store(pos, Ordering::Relaxed);
    }

    /// Whether the consumer has drained up to the writer's last published
    /// position, for both regions agreeing. Used by `wait`.
    pub fn is_drained(&self) -> bool {
        self.read_region.load(Ordering::Acquire) == self.write_region.load(Ordering::Acquire)
            && self.read_pos.load(Ordering::Acquire) >= self.write_pos.load(Ordering::Acquire)
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

    #[test]
    fn reserve_does_not_cross_sentinel() {
        let arena = Arena::new(backing(1 << 20));
        let ring = Ring::new(RingClass::Normal, &arena, MAX_COMMAND_WORDS + 4);
        // First reservation of 3 words fits before the sentinel (at offset
        // 4). Second reservation of 3 words would not fit (4+3=7 > 4), so it
        // must JUMP to the other region.
        let (r0, p0) = ring.reserve(3);
        assert_eq!((r0, p0), (0, 0));
        let before = ring.write_region_index();
        let (r1, p1) = ring.reserve(3);
        assert_ne!(r1, before);
        assert_eq!(p1, 0);
    }

    #[test]
    fn publish_then_peek_and_read() {
        let arena = Arena::new(backing(1 << 20));
        let ring = Ring::new(RingClass::Normal, &arena, 64);
        let (region, pos) = ring.reserve(2);
        ring.publish(region, pos, &[crate::command::pack_word0(1, 0, 0), 0xAAAA]);
        let w0 = ring.peek_word0().expect("should be published");
        assert_eq!(crate::command::overlay_id(w0), 1);
        let mut out = [0u32; 2];
        ring.read_command(2, &mut out);
        assert_eq!(out[1], 0xAAAA);
        assert!(ring.peek_word0().is_none());
    }
}
