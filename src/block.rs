//! Prerecorded command blocks (spec §3, §4.3).
//!
//! A block is an immutable, standalone sequence of commands that can be
//! invoked by reference via a CALL opcode. Recording grows a chunk at a
//! time: each chunk is carved from a fixed size-class slab in `ChunkPool`
//! (no heap, per `arena`), starting small and doubling up to a capped
//! maximum, after which further chunks are chained at the maximum size.
//! Nesting (a block whose commands CALL another block) is bounded by
//! `Config::max_block_nesting`, matching the coprocessor's own save-stack
//! depth (spec §4.3, §4.5).
//!
//! A block that contains rasterizer-bound commands also owns a sibling
//! chunk list of raw rasterizer words (spec §4.3, §4.6's "static path"):
//! while recording, the host already knows the exact words a command will
//! hand to the rasterizer, so it writes them straight into this list and
//! records only a dispatch command in the block's own command stream,
//! coalescing it into the immediately preceding dispatch when contiguous.
//! This list reuses `ChunkPool`'s slab machinery but chains chunks by a
//! trailer word (the slab's last word holds the next chunk's id, or
//! `u32::MAX` for the chain's end) instead of a JUMP command, since raw
//! rasterizer words aren't command-encoded.

use core::cell::Cell;

use crate::addr::{self, Addr};
use crate::arena::Arena;
use crate::command::{self, Internal};

/// A single fixed-size slab of words, members of one size class in the
/// chunk pool.
struct ChunkClass {
    words_per_chunk: usize,
    slabs: &'static mut [u32],
    /// Bit `i` set means slab `i` is free. Supports up to 64 chunks per
    /// class, which comfortably covers `Config::chunks_per_class` defaults.
    free: Cell<u64>,
    count: usize,
}

impl ChunkClass {
    fn alloc(&self) -> Option<usize> {
        let free = self.free.get();
        if free == 0 {
            return None;
        }
        let slot = free.trailing_zeros() as usize;
        self.free.set(free & !(1 << slot));
        Some(slot)
    }

    fn dealloc(&self, slot: usize) {
        self.free.set(self.free.get() | (1 << slot));
    }

    fn slab_mut(&mut self, slot: usize) -> &mut [u32] {
        let start = slot * self.words_per_chunk;
        &mut self.slabs[start..start + self.words_per_chunk]
    }

    fn slab(&self, slot: usize) -> &[u32] {
        let start = slot * self.words_per_chunk;
        &self.slabs[start..start + self.words_per_chunk]
    }
}

const MAX_CLASSES: usize = 8;

/// Pool of fixed-size word slabs backing block chunks. An `Engine` holds
/// two: one for command chunks, one for a block's sibling rasterizer-word
/// chunks (see module docs).
pub struct ChunkPool {
    classes: [Option<ChunkClass>; MAX_CLASSES],
    num_classes: usize,
    /// Maps a flat chunk id (as encoded in `Addr::Chunk`) back to
    /// (class, slot), and forward from (class, slot) to chunk id.
    ids: &'static [Cell<u32>],
}

impl ChunkPool {
    pub fn new(arena: &Arena, min_words: usize, max_words: usize, chunks_per_class: usize) -> Self {
        assert!(chunks_per_class <= 64, "chunk pool class cannot exceed 64 slabs");
        assert!(min_words >= 2, "a chunk must fit at least one payload word plus a chain terminator");
        assert!(max_words >= min_words);

        let mut classes: [Option<ChunkClass>; MAX_CLASSES] = Default::default();
        let mut size = min_words;
        let mut n = 0;
        let mut total_chunks = 0usize;
        loop {
            let slabs = arena
                .alloc_slice_default::<u32>(size * chunks_per_class)
                .expect("arena exhausted allocating block chunk pool")
                .leak();
            classes[n] = Some(ChunkClass {
                words_per_chunk: size,
                slabs,
                free: Cell::new(if chunks_per_class == 64 {
                    u64::MAX
                } else {
                    (1u64 << chunks_per_class) - 1
                }),
                count: chunks_per_class,
            });
            total_chunks += chunks_per_class;
            n += 1;
            if size >= max_words || n == MAX_CLASSES {
                break;
            }
            size *= 2;
        }

        let ids = arena
            .alloc_slice_default::<Cell<u32>>(total_chunks)
            .expect("arena exhausted allocating chunk id table")
            .leak();
        // Assign each (class, slot) a stable flat id up front.
        let mut next_id = 0u32;
        for class in classes[..n].iter() {
            let class = class.as_ref().unwrap();
            for _ in 0..class.count {
                ids[next_id as usize].set(next_id);
                next_id += 1;
            }
        }

        ChunkPool {
            classes,
            num_classes: n,
            ids,
        }
    }

    fn class_base_id(&self, class_idx: usize) -> u32 {
        self.classes[..class_idx]
            .iter()
            .map(|c| c.as_ref().unwrap().count as u32)
            .sum()
    }

    /// Allocates the smallest class at or above `min_words`, or the largest
    /// class if `min_words` exceeds every class (callers then chain).
    fn alloc_chunk(&self, min_words: usize) -> Option<(usize, usize, u32)> {
        for class_idx in 0..self.num_classes {
            let class = self.classes[class_idx].as_ref().unwrap();
            if class.words_per_chunk >= min_words {
                if let Some(slot) = class.alloc() {
                    let id = self.class_base_id(class_idx) + slot as u32;
                    return Some((class_idx, slot, id));
                }
            }
        }
        None
    }

    fn chunk_words_mut(&mut self, class_idx: usize, slot: usize) -> &mut [u32] {
        self.classes[class_idx].as_mut().unwrap().slab_mut(slot)
    }

    fn chunk_words(&self, class_idx: usize, slot: usize) -> &[u32] {
        self.classes[class_idx].as_ref().unwrap().slab(slot)
    }

    fn locate(&self, chunk_id: u32) -> (usize, usize) {
        let mut remaining = chunk_id;
        for (class_idx, class) in self.classes[..self.num_classes].iter().enumerate() {
            let class = class.as_ref().unwrap();
            if (remaining as usize) < class.count {
                return (class_idx, remaining as usize);
            }
            remaining -= class.count as u32;
        }
        panic!("invalid chunk id {}", chunk_id);
    }

    /// Reads the words of the chunk named by `chunk_id`, for the stub
    /// coprocessor / validator to dereference a CALL/JUMP into block
    /// storage, or to replay a static rasterizer dispatch.
    pub fn words_of(&self, chunk_id: u32) -> &[u32] {
        let (class_idx, slot) = self.locate(chunk_id);
        self.chunk_words(class_idx, slot)
    }

    /// Mutable counterpart of `words_of`, used to patch a resolved fixup's
    /// words into its static placeholder (spec §4.6).
    pub fn words_of_mut(&mut self, chunk_id: u32) -> &mut [u32] {
        let (class_idx, slot) = self.locate(chunk_id);
        self.chunk_words_mut(class_idx, slot)
    }

    fn free_chunk(&self, chunk_id: u32) {
        let (class_idx, slot) = self.locate(chunk_id);
        self.classes[class_idx].as_ref().unwrap().dealloc(slot);
    }
}

/// An immutable handle to a recorded block. Running it (`block_run`) writes
/// a CALL to its first chunk into the live stream.
#[derive(Clone, Copy, Debug)]
pub struct Block {
    pub(crate) first_chunk: u32,
    pub(crate) first_rast_chunk: Option<u32>,
    pub(crate) nesting_level: usize,
}

impl Block {
    pub fn nesting_level(&self) -> usize {
        self.nesting_level
    }
}

/// Where the previously recorded static rasterizer dispatch landed, so the
/// next contiguous one can be coalesced into it by rewriting its end
/// address in place (spec §4.6) -- a direct indexed write into the command
/// chunk pool, so it stays correct even once that chunk is no longer
/// "current".
#[derive(Clone, Copy)]
struct LastDispatch {
    rast_chunk_id: u32,
    rast_end: usize,
    cmd_class: usize,
    cmd_slot: usize,
    end_word_pos: usize,
}

/// Accumulates words for a block under construction. Not `Sync`/`Send`:
/// recording is strictly single-threaded, host-side, non-reentrant (spec
/// §4.3: "Nested recordings are not allowed"). Holds no reference to either
/// `ChunkPool` it draws from -- callers (`Engine`, which owns both) pass
/// them explicitly to each method, so a `BlockBuilder` can live alongside
/// its pools inside the same owning struct without a self-referential
/// borrow.
pub struct BlockBuilder {
    chunk_words: usize,
    first_chunk: Option<u32>,
    current_chunk: Option<(usize, usize, u32)>,
    /// Word length of the slab backing `current_chunk`, captured at
    /// allocation time. `chunk_words` is the *next* chunk's doubling
    /// target, not the current slab's length, so remaining-space checks
    /// must use this instead.
    current_chunk_len: usize,
    pos: usize,
    max_chunk_words: usize,
    max_nesting_seen: usize,

    rast_chunk_words: usize,
    rast_max_chunk_words: usize,
    rast_current_chunk: Option<(usize, usize, u32)>,
    rast_current_chunk_len: usize,
    rast_pos: usize,
    rast_first_chunk: Option<u32>,
    last_rast_dispatch: Option<LastDispatch>,
}

impl BlockBuilder {
    pub fn new(min_words: usize, max_words: usize, rast_min_words: usize, rast_max_words: usize) -> Self {
        BlockBuilder {
            chunk_words: min_words,
            first_chunk: None,
            current_chunk: None,
            current_chunk_len: 0,
            pos: 0,
            max_chunk_words: max_words,
            max_nesting_seen: 1,

            rast_chunk_words: rast_min_words,
            rast_max_chunk_words: rast_max_words,
            rast_current_chunk: None,
            rast_current_chunk_len: 0,
            rast_pos: 0,
            rast_first_chunk: None,
            last_rast_dispatch: None,
        }
    }

    fn ensure_chunk(&mut self, pool: &mut ChunkPool, needed: usize) {
        if self.current_chunk.is_some() {
            let remaining = self.current_chunk_len - self.pos;
            // Reserve 2 words at the end of every chunk for the JUMP/RET
            // that terminates it, mirroring the ring's sentinel.
            if remaining >= needed + 2 {
                return;
            }
        }
        self.grow_chunk(pool);
    }

    fn grow_chunk(&mut self, pool: &mut ChunkPool) {
        let want = self.chunk_words;
        let (class_idx, slot, id) = pool.alloc_chunk(want).expect("block chunk pool exhausted");
        let len = pool.chunk_words(class_idx, slot).len();
        if let Some((prev_class, prev_slot, _prev_id)) = self.current_chunk {
            let target = addr::encode_chunk(id, 0);
            let jump_word0 = command::pack_word0(0, Internal::Jump as u8, 0);
            let prev = pool.chunk_words_mut(prev_class, prev_slot);
            prev[self.pos] = jump_word0;
            prev[self.pos + 1] = target;
        } else {
            self.first_chunk = Some(id);
        }
        self.current_chunk = Some((class_idx, slot, id));
        self.current_chunk_len = len;
        self.pos = 0;
        if self.chunk_words < self.max_chunk_words {
            self.chunk_words = (self.chunk_words * 2).min(self.max_chunk_words);
        }
    }

    /// Appends a fully-built command (word 0 included) to the recording.
    pub fn push(&mut self, pool: &mut ChunkPool, words: &[u32]) {
        assert!(
            !words.is_empty() && words.len() <= crate::config::MAX_COMMAND_WORDS,
            "bad command length"
        );
        self.ensure_chunk(pool, words.len());
        let (class_idx, slot, _) = self.current_chunk.unwrap();
        let dest = pool.chunk_words_mut(class_idx, slot);
        dest[self.pos..self.pos + words.len()].copy_from_slice(words);
        self.pos += words.len();
    }

    /// Notes that this block itself invoked another block at `level`,
    /// tracking the deepest nesting this recording depends on.
    pub(crate) fn note_nesting(&mut self, level: usize) {
        self.max_nesting_seen = self.max_nesting_seen.max(level + 1);
    }

    /// Seals the recording: writes a trailing RET and returns an immutable
    /// `Block` handle.
    pub fn seal(mut self, pool: &mut ChunkPool) -> Block {
        let ret = command::pack_word0(0, Internal::Ret as u8, 0);
        self.push_terminal(pool, ret);
        Block {
            first_chunk: self.first_chunk.expect("empty block recording"),
            first_rast_chunk: self.rast_first_chunk,
            nesting_level: self.max_nesting_seen,
        }
    }

    fn push_terminal(&mut self, pool: &mut ChunkPool, word0: u32) {
        if self.current_chunk.is_none() {
            self.grow_chunk(pool);
        }
        let (class_idx, slot, _) = self.current_chunk.unwrap();
        let dest = pool.chunk_words_mut(class_idx, slot);
        dest[self.pos] = word0;
    }

    fn ensure_rast_chunk(&mut self, pool: &mut ChunkPool, needed: usize) {
        if self.rast_current_chunk.is_some() {
            let remaining = self.rast_current_chunk_len - self.rast_pos;
            // Reserve the slab's last word for the chain trailer.
            if remaining >= needed + 1 {
                return;
            }
        }
        self.grow_rast_chunk(pool);
    }

    fn grow_rast_chunk(&mut self, pool: &mut ChunkPool) {
        let want = self.rast_chunk_words;
        let (class_idx, slot, id) = pool.alloc_chunk(want).expect("block rasterizer chunk pool exhausted");
        let len = pool.chunk_words(class_idx, slot).len();
        pool.chunk_words_mut(class_idx, slot)[len - 1] = u32::MAX;
        if let Some((prev_class, prev_slot, _prev_id)) = self.rast_current_chunk {
            let prev = pool.chunk_words_mut(prev_class, prev_slot);
            let prev_len = prev.len();
            prev[prev_len - 1] = id;
        } else {
            self.rast_first_chunk = Some(id);
        }
        self.rast_current_chunk = Some((class_idx, slot, id));
        self.rast_current_chunk_len = len;
        self.rast_pos = 0;
        if self.rast_chunk_words < self.rast_max_chunk_words {
            self.rast_chunk_words = (self.rast_chunk_words * 2).min(self.rast_max_chunk_words);
        }
    }

    /// Writes `words` into the block's sibling rasterizer chunk list,
    /// returning `(chunk_id, start, end)` of where they landed. Used both
    /// for a fixup's static placeholder (no dispatch command of its own --
    /// the fixup command itself dispatches) and, via `push_rast_dispatch`,
    /// for the static path's known-in-advance words.
    pub fn push_rast(&mut self, pool: &mut ChunkPool, words: &[u32]) -> (u32, usize, usize) {
        assert!(!words.is_empty(), "push_rast() called with no words");
        self.ensure_rast_chunk(pool, words.len());
        let (class_idx, slot, id) = self.rast_current_chunk.unwrap();
        let start = self.rast_pos;
        let dest = pool.chunk_words_mut(class_idx, slot);
        dest[start..start + words.len()].copy_from_slice(words);
        self.rast_pos += words.len();
        (id, start, self.rast_pos)
    }

    /// Records `raster_words` as a static rasterizer dispatch (spec §4.3,
    /// §4.6): writes them into the rasterizer chunk list, then either
    /// coalesces into the immediately preceding dispatch (if contiguous,
    /// in the same chunk) by rewriting its end address in place, or emits
    /// a fresh `RDP_DISPATCH` command.
    pub fn push_rast_dispatch(&mut self, cmd_pool: &mut ChunkPool, rast_pool: &mut ChunkPool, raster_words: &[u32]) {
        let (chunk_id, start, end) = self.push_rast(rast_pool, raster_words);
        if let Some(last) = self.last_rast_dispatch {
            if last.rast_chunk_id == chunk_id && last.rast_end == start {
                let dest = cmd_pool.chunk_words_mut(last.cmd_class, last.cmd_slot);
                dest[last.end_word_pos] = addr::encode_chunk(chunk_id, end);
                self.last_rast_dispatch = Some(LastDispatch { rast_end: end, ..last });
                return;
            }
        }
        let word0 = command::pack_word0(0, Internal::RdpDispatch as u8, 0);
        let start_addr = addr::encode_chunk(chunk_id, start);
        let end_addr = addr::encode_chunk(chunk_id, end);
        self.push(cmd_pool, &[word0, start_addr, end_addr]);
        let (cmd_class, cmd_slot, _) = self.current_chunk.unwrap();
        let end_word_pos = self.pos - 1;
        self.last_rast_dispatch = Some(LastDispatch {
            rast_chunk_id: chunk_id,
            rast_end: end,
            cmd_class,
            cmd_slot,
            end_word_pos,
        });
    }
}

/// Walks a chunk's commands in order -- exactly as a consumer would -- to
/// find the chaining JUMP or terminating RET a chunk always ends with.
/// Returns the next chunk id if the chunk ends in a JUMP, `None` if it ends
/// in a RET (the chain's last chunk).
fn chained_chunk(pool: &ChunkPool, overlays: &crate::overlay::OverlayRegistry, chunk_id: u32) -> Option<u32> {
    let words = pool.words_of(chunk_id);
    let mut pos = 0;
    while pos < words.len() {
        let word0 = words[pos];
        let overlay_id = command::overlay_id(word0);
        let idx = command::command_index(word0);
        if overlay_id == command::INTERNAL_OVERLAY {
            match Internal::from_index(idx) {
                Some(Internal::Jump) => {
                    return match addr::decode(words[pos + 1]) {
                        Addr::Chunk { chunk_id, .. } => Some(chunk_id),
                        _ => None,
                    };
                }
                Some(Internal::Ret) => return None,
                Some(op) => pos += op.word_count(),
                None => return None,
            }
        } else {
            pos += overlays.command_size(overlay_id, idx).unwrap_or(1).max(1) as usize;
        }
    }
    None
}

/// Walks a rasterizer chunk chain via its trailer words, freeing each
/// chunk. Unlike `chained_chunk`, the chain pointer is a flat trailer word
/// rather than something embedded in a command, since raw rasterizer words
/// carry no chaining opcode of their own.
fn rast_chained_chunk(pool: &ChunkPool, chunk_id: u32) -> Option<u32> {
    let words = pool.words_of(chunk_id);
    let trailer = words[words.len() - 1];
    if trailer == u32::MAX {
        None
    } else {
        Some(trailer)
    }
}

/// Frees every chunk reachable from `block`, in both the command pool and
/// its sibling rasterizer chunk pool. Must only be called once the block is
/// provably no longer live -- e.g. after a `wait`, or once a syncpoint
/// created after the block's last use has been reached (spec §4.3, §4.4,
/// Design Notes §9: "guard free with a generation counter or a deferred-free
/// queue tied to syncpoint completion").
pub fn free_block(pool: &ChunkPool, rast_pool: &ChunkPool, overlays: &crate::overlay::OverlayRegistry, block: Block) {
    let mut chunk_id = Some(block.first_chunk);
    while let Some(id) = chunk_id {
        let next = chained_chunk(pool, overlays, id);
        pool.free_chunk(id);
        chunk_id = next;
    }
    let mut rast_chunk_id = block.first_rast_chunk;
    while let Some(id) = rast_chunk_id {
        let next = rast_chained_chunk(rast_pool, id);
        rast_pool.free_chunk(id);
        rast_chunk_id = next;
    }
}

/// Emits the word sequence for a CALL into `block`, suitable for appending
/// either to the live ring (via `writer::CommandWriter`) or into another
/// block recording.
pub fn call_words(block: Block) -> [u32; 2] {
    let word0 = command::pack_word0(0, Internal::Call as u8, 0);
    [word0, addr::encode_chunk(block.first_chunk, 0)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::MaybeUninit;
    use crate::config::Config;

    fn backing(len: usize) -> &'static mut [MaybeUninit<u8>] {
        let v = std::vec![MaybeUninit::uninit(); len].into_boxed_slice();
        std::boxed::Box::leak(v)
    }

    fn cfg() -> Config {
        Config {
            block_chunk_min_words: 4,
            block_chunk_max_words: 16,
            chunks_per_class: 4,
            rast_chunk_min_words: 4,
            rast_chunk_max_words: 16,
            ..Default::default()
        }
    }

    fn pools(arena: &Arena, cfg: &Config) -> (ChunkPool, ChunkPool) {
        (
            ChunkPool::new(arena, cfg.block_chunk_min_words, cfg.block_chunk_max_words, cfg.chunks_per_class),
            ChunkPool::new(arena, cfg.rast_chunk_min_words, cfg.rast_chunk_max_words, cfg.chunks_per_class),
        )
    }

    fn builder(cfg: &Config) -> BlockBuilder {
        BlockBuilder::new(
            cfg.block_chunk_min_words,
            cfg.block_chunk_max_words,
            cfg.rast_chunk_min_words,
            cfg.rast_chunk_max_words,
        )
    }

    #[test]
    fn record_small_block_fits_one_chunk() {
        let arena = Arena::new(backing(1 << 16));
        let cfg = cfg();
        let (mut pool, _rast_pool) = pools(&arena, &cfg);
        let mut b = builder(&cfg);
        b.push(&mut pool, &[command::pack_word0(1, 0, 0), 0x1111]);
        let block = b.seal(&mut pool);
        let words = pool.words_of(block.first_chunk);
        assert_eq!(command::overlay_id(words[0]), 1);
        assert_eq!(words[1], 0x1111);
        assert_eq!(command::command_index(words[2]), Internal::Ret as u8);
    }

    #[test]
    fn record_grows_and_chains_chunks() {
        let arena = Arena::new(backing(1 << 16));
        let cfg = cfg();
        let (mut pool, _rast_pool) = pools(&arena, &cfg);
        let mut b = builder(&cfg);
        // Each push is 2 words; the first chunk (4 words, 2 reserved for the
        // terminal) only fits one push before growing.
        for i in 0..6 {
            b.push(&mut pool, &[command::pack_word0(1, 0, 0), i]);
        }
        let block = b.seal(&mut pool);
        let first = pool.words_of(block.first_chunk);
        assert_eq!(command::command_index(first[first.len() - 2]), Internal::Jump as u8);
    }

    #[test]
    fn free_block_walks_chained_chunks_by_command_length_not_position() {
        let arena = Arena::new(backing(1 << 16));
        let cfg = cfg();
        let (mut pool, rast_pool) = pools(&arena, &cfg);
        let mut overlays = crate::overlay::OverlayRegistry::new();
        let descriptor = crate::overlay::OverlayDescriptor {
            text_image: &[],
            data_image: &[],
            command_sizes: &[2],
        };
        let id = overlays.register(&arena, &descriptor).unwrap();

        let mut b = builder(&cfg);
        for i in 0..6u32 {
            b.push(&mut pool, &[command::pack_word0(id, 0, 0), i]);
        }
        let block = b.seal(&mut pool);
        let first_chunk = block.first_chunk;
        assert!(chained_chunk(&pool, &overlays, first_chunk).is_some());

        free_block(&pool, &rast_pool, &overlays, block);
        // Every chunk in the chain is now free and reusable.
        let mut b2 = builder(&cfg);
        b2.push(&mut pool, &[command::pack_word0(id, 0, 0), 0]);
        let block2 = b2.seal(&mut pool);
        assert_eq!(block2.first_chunk, first_chunk);
    }

    #[test]
    fn contiguous_static_dispatches_coalesce_into_one_rdp_dispatch() {
        let arena = Arena::new(backing(1 << 16));
        let cfg = cfg();
        let (mut pool, mut rast_pool) = pools(&arena, &cfg);
        let mut b = builder(&cfg);
        b.push_rast_dispatch(&mut pool, &mut rast_pool, &[1, 2]);
        b.push_rast_dispatch(&mut pool, &mut rast_pool, &[3]);
        let block = b.seal(&mut pool);

        let mut dispatches = 0;
        let mut pos = 0;
        let words = pool.words_of(block.first_chunk);
        while pos < words.len() {
            match Internal::from_index(command::command_index(words[pos])) {
                Some(Internal::RdpDispatch) => {
                    dispatches += 1;
                    pos += Internal::RdpDispatch.word_count();
                }
                Some(Internal::Ret) => break,
                Some(op) => pos += op.word_count(),
                None => break,
            }
        }
        assert_eq!(dispatches, 1, "a contiguous second static write must coalesce, not add a dispatch");

        let rast_words = rast_pool.words_of(block.first_rast_chunk.unwrap());
        assert_eq!(&rast_words[..3], &[1, 2, 3]);
    }

    #[test]
    fn a_fixup_reservation_breaks_coalescing_with_the_next_static_write() {
        let arena = Arena::new(backing(1 << 16));
        let cfg = cfg();
        let (mut pool, mut rast_pool) = pools(&arena, &cfg);
        let mut b = builder(&cfg);
        b.push_rast_dispatch(&mut pool, &mut rast_pool, &[1, 2]);
        // Reserve a placeholder directly, as `Engine::write_rdp_fixup` would,
        // without going through `push_rast_dispatch`.
        b.push_rast(&mut rast_pool, &[0]);
        b.push_rast_dispatch(&mut pool, &mut rast_pool, &[3]);
        let block = b.seal(&mut pool);

        let mut dispatches = 0;
        let mut pos = 0;
        let words = pool.words_of(block.first_chunk);
        while pos < words.len() {
            match Internal::from_index(command::command_index(words[pos])) {
                Some(Internal::RdpDispatch) => {
                    dispatches += 1;
                    pos += Internal::RdpDispatch.word_count();
                }
                Some(Internal::Ret) => break,
                Some(op) => pos += op.word_count(),
                None => break,
            }
        }
        assert_eq!(dispatches, 2, "the fixup's reserved gap must prevent coalescing across it");
    }
}
