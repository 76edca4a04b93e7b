//! Tunable limits for an [`Engine`](crate::Engine) instance.
//!
//! The limits named in spec are defaults here rather than `const`s, so a
//! host can size the engine to its own memory budget without recompiling the
//! crate.

use smart_default::SmartDefault;

/// Maximum number of words in a single command, including word 0.
pub const MAX_COMMAND_WORDS: usize = 62;

/// Overlay ID 0 is reserved for internal opcodes; IDs 1..=15 are assignable.
pub const OVERLAY_SLOTS: usize = 16;

#[derive(Clone, Copy, Debug, SmartDefault)]
pub struct Config {
    /// Word capacity of each of the two regions backing the normal-priority
    /// ring. Must be larger than `MAX_COMMAND_WORDS` so the sentinel leaves
    /// room for at least one command.
    #[default = 4096]
    pub normal_region_words: usize,

    /// Word capacity of each of the two regions backing the high-priority
    /// ring. High-priority segments are meant to be short, so this is
    /// smaller than the normal ring by default.
    #[default = 256]
    pub highpri_region_words: usize,

    /// Word capacity of each of the two rasterizer-feeder DRAM buffers.
    #[default = 4096]
    pub rdp_buffer_words: usize,

    /// Maximum recursion depth for `block_run` (bounded by the coprocessor's
    /// internal CALL/RET save stack in the real system).
    #[default = 8]
    pub max_block_nesting: usize,

    /// Depth of the attachment stack.
    #[default = 4]
    pub attach_stack_depth: usize,

    /// Capacity of the deferred-callback queue drained outside interrupt
    /// context.
    #[default = 64]
    pub callback_queue_depth: usize,

    /// Capacity of the validator's recently-seen command-buffer-range ring,
    /// used to coalesce consecutive dispatches of the same range without
    /// re-disassembling already-seen bytes.
    #[default = 8]
    pub validator_range_history: usize,

    /// Safety margin (in TMEM 8-byte words) the validator uses when deciding
    /// whether two tiles' backing storage overlaps closely enough to warrant
    /// a warning. Not a semantic contract (see spec's open questions) --
    /// purely a heuristic knob.
    #[default = 8]
    pub tile_overlap_margin: usize,

    /// Starting chunk size, in words, for a block recording.
    #[default = 64]
    pub block_chunk_min_words: usize,

    /// Largest chunk size, in words, a block recording will grow to before
    /// chaining a same-sized chunk instead of doubling again.
    #[default = 1024]
    pub block_chunk_max_words: usize,

    /// Number of chunks pre-allocated per size class in the block chunk
    /// pool. Size classes double from `block_chunk_min_words` to
    /// `block_chunk_max_words`; each class gets this many slabs.
    #[default = 16]
    pub chunks_per_class: usize,

    /// Starting chunk size, in words, for a block's sibling rasterizer-word
    /// chunk list (spec §4.3/§4.6 "static path").
    #[default = 64]
    pub rast_chunk_min_words: usize,

    /// Largest chunk size, in words, a block's rasterizer-word chunk list
    /// will grow to before chaining a same-sized chunk instead of doubling
    /// again.
    #[default = 1024]
    pub rast_chunk_max_words: usize,

    /// Byte alignment the coprocessor's DMA engine requires for a fast
    /// Z-buffer fill (spec §4.7); a Z buffer whose byte size isn't a
    /// multiple of this falls back to a fill-rectangle clear.
    #[default = 64]
    pub dma_alignment: u32,
}
