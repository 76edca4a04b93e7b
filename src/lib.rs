#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! A lockless, ring-buffered command queue for driving a vector coprocessor
//! and an attached rasterizer.
//!
//! [`Engine`] ties together the ring buffer and command writer, the
//! overlay registry, the block recorder, syncpoints and deferred
//! callbacks, the high-priority sub-queue, the rasterizer feeder, the
//! attachment stack, and the validator. It owns no heap allocation: every
//! dynamic structure it needs is carved from the [`Arena`](arena::Arena)
//! handed to [`Engine::new`].

pub mod addr;
pub mod arena;
pub mod attach;
pub mod block;
pub mod command;
pub mod config;
pub mod highpri;
pub mod overlay;
pub mod priority;
pub mod rdp;
pub mod ring;
pub mod sync;
pub mod validate;
pub mod writer;

use addr::RingClass;
use arena::Arena;
use attach::AttachStack;
use block::{Block, BlockBuilder, ChunkPool};
use config::Config;
use highpri::HighPri;
use overlay::{OverlayDescriptor, OverlayRegistry, RegistryError};
use priority::Host;
use rdp::Feeder;
use ring::Ring;
use sync::{CallbackFn, Syncpoints};
use validate::Validator;
use writer::{CommandWriter, Target};

/// The engine. One instance owns one set of ring regions, one overlay
/// table, one block chunk pool, and so on -- everything a host needs to
/// drive a single coprocessor.
pub struct Engine {
    config: Config,
    #[allow(dead_code)]
    arena: Arena,
    normal_ring: Ring,
    highpri_ring: Ring,
    overlays: OverlayRegistry,
    chunk_pool: ChunkPool,
    rast_chunk_pool: ChunkPool,
    recording: Option<BlockBuilder>,
    syncpoints: Syncpoints,
    highpri: HighPri,
    feeder: Feeder,
    attach: AttachStack,
    validator: Validator,
}

impl Engine {
    pub fn new(config: Config, arena: Arena) -> Self {
        assert_eq!(
            config.attach_stack_depth, 4,
            "attach_stack_depth is documentation only; AttachStack's backing array is fixed at 4"
        );
        let normal_ring = Ring::new(RingClass::Normal, &arena, config.normal_region_words);
        let highpri_ring = Ring::new(RingClass::HighPri, &arena, config.highpri_region_words);
        let chunk_pool = ChunkPool::new(
            &arena,
            config.block_chunk_min_words,
            config.block_chunk_max_words,
            config.chunks_per_class,
        );
        let rast_chunk_pool = ChunkPool::new(
            &arena,
            config.rast_chunk_min_words,
            config.rast_chunk_max_words,
            config.chunks_per_class,
        );
        let syncpoints = Syncpoints::new(&arena, config.callback_queue_depth);
        let feeder = Feeder::new(&arena, config.rdp_buffer_words);
        let validator = Validator::new(&config);
        let highpri = HighPri::new();
        Engine {
            config,
            arena,
            normal_ring,
            highpri_ring,
            overlays: OverlayRegistry::new(),
            chunk_pool,
            rast_chunk_pool,
            recording: None,
            syncpoints,
            highpri,
            feeder,
            attach: AttachStack::new(),
            validator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolved Open Question (spec_full §5): a deferred callback must not
    /// re-enter the writer. Rather than silently deadlock (the source's own
    /// behavior is merely documented as unsupported, not enforced), every
    /// writer entry point checks this first and panics with a descriptive
    /// message.
    fn assert_not_in_callback(&self, what: &str) {
        assert!(
            !self.syncpoints.in_callback(),
            "{}() called re-entrantly from within a syncpoint callback",
            what
        );
    }

    fn writer(&mut self) -> CommandWriter<'_> {
        self.assert_not_in_callback("writer");
        let target = if let Some(builder) = self.recording.as_mut() {
            Target::Block(builder, &mut self.chunk_pool)
        } else if self.highpri.is_open() {
            Target::Ring(&self.highpri_ring)
        } else {
            Target::Ring(&self.normal_ring)
        };
        CommandWriter::new(target, Host::new())
    }

    /// Writes a single command, validating `args` against the overlay's
    /// declared command size (spec §4.1).
    pub fn write(&mut self, overlay_id: u8, command_index: u8, payload: u32, args: &[u32]) {
        if overlay_id != command::INTERNAL_OVERLAY {
            let declared = self
                .overlays
                .command_size(overlay_id, command_index)
                .unwrap_or_else(|| {
                    panic!(
                        "overlay {} command {} has no registered size",
                        overlay_id, command_index
                    )
                });
            assert_eq!(
                declared as usize,
                args.len() + 1,
                "overlay {} command {} declares {} words, got {}",
                overlay_id,
                command_index,
                declared,
                args.len() + 1
            );
        }
        self.writer().write(overlay_id, command_index, payload, args);
    }

    pub fn write_begin(&mut self, overlay_id: u8, command_index: u8, payload: u32, total_words: usize) {
        self.writer().write_begin(overlay_id, command_index, payload, total_words);
    }

    pub fn write_arg(&mut self, word: u32) {
        self.writer().write_arg(word);
    }

    pub fn write_end(&mut self) {
        self.writer().write_end();
    }

    pub fn flush(&mut self) {
        self.writer().flush();
    }

    /// Blocks until the consumer has drained the queue and the rasterizer
    /// stream (spec §4.1). Implemented as a syncpoint created at the
    /// current write position, waited on.
    pub fn wait(&mut self) {
        let id = self.syncpoint_create();
        self.syncpoint_wait(id);
    }

    // --- Overlay registry -------------------------------------------------

    pub fn register_overlay(&mut self, descriptor: &OverlayDescriptor) -> Result<u8, RegistryError> {
        self.overlays.register(&self.arena, descriptor)
    }

    pub fn register_overlay_static(
        &mut self,
        descriptor: &OverlayDescriptor,
        id: u8,
    ) -> Result<(), RegistryError> {
        self.overlays.register_static(&self.arena, descriptor, id)
    }

    pub fn unregister_overlay(&mut self, id: u8) -> Result<(), RegistryError> {
        self.overlays.unregister(id)
    }

    /// Returns a host-visible pointer to `id`'s persistent state. Performs
    /// an implicit `wait` first so the host observes a quiescent copy
    /// (spec §4.2).
    pub fn state_pointer(&mut self, id: u8) -> Option<&'static [core::sync::atomic::AtomicU32]> {
        self.wait();
        self.overlays.state_pointer(id)
    }

    // --- Block recorder -----------------------------------------------------

    /// Switches the writer's target to a growable recording buffer.
    /// Nested recordings are rejected (spec §4.3); so is starting a
    /// recording while a high-priority segment is open (spec_full §5).
    pub fn block_begin(&mut self) {
        self.assert_not_in_callback("block_begin");
        assert!(
            self.recording.is_none(),
            "block_begin() called while a recording is already open"
        );
        assert!(
            !self.highpri.is_open(),
            "block_begin() called while a high-priority segment is open"
        );
        self.recording = Some(BlockBuilder::new(
            self.config.block_chunk_min_words,
            self.config.block_chunk_max_words,
            self.config.rast_chunk_min_words,
            self.config.rast_chunk_max_words,
        ));
    }

    /// Seals the open recording and returns an immutable handle.
    pub fn block_end(&mut self) -> Block {
        let builder = self
            .recording
            .take()
            .expect("block_end() called with no open recording");
        builder.seal(&mut self.chunk_pool)
    }

    /// Writes a CALL to `block`'s first chunk into the current stream.
    /// Rejected while a high-priority segment is open (spec_full §5).
    pub fn block_run(&mut self, block: Block) {
        assert!(
            !self.highpri.is_open(),
            "block_run() called while a high-priority segment is open"
        );
        assert!(
            block.nesting_level() <= self.config.max_block_nesting,
            "block nesting level {} exceeds the configured maximum of {}",
            block.nesting_level(),
            self.config.max_block_nesting
        );
        if let Some(builder) = self.recording.as_mut() {
            builder.note_nesting(block.nesting_level());
        }
        let words = block::call_words(block);
        self.writer().write(
            command::INTERNAL_OVERLAY,
            command::Internal::Call as u8,
            0,
            &words[1..],
        );
    }

    /// Releases a block's storage. Must only be called once it is provably
    /// no longer live (spec §4.3).
    pub fn block_free(&mut self, block: Block) {
        block::free_block(&self.chunk_pool, &self.rast_chunk_pool, &self.overlays, block);
    }

    /// Host-side "static path" for a block recording (spec §4.3, §4.6): the
    /// raster words a command will produce are already fully known at
    /// record time, so the host writes them directly into the block's
    /// sibling rasterizer chunk list and records only the resulting
    /// dispatch, coalescing it into the immediately preceding one when
    /// contiguous. Only meaningful while recording -- outside a recording,
    /// the kernel derives rasterizer output from the overlay command
    /// itself at execution time, so there is nowhere for precomputed words
    /// to land.
    pub fn write_rdp_static(&mut self, raster_words: &[u32]) {
        self.assert_not_in_callback("write_rdp_static");
        let builder = self
            .recording
            .as_mut()
            .expect("write_rdp_static() is only meaningful while recording a block");
        builder.push_rast_dispatch(&mut self.chunk_pool, &mut self.rast_chunk_pool, raster_words);
    }

    /// Registers a fixup (spec §4.6), returning the id used to record it
    /// with `write_rdp_fixup`.
    pub fn register_fixup(&mut self, fixup: &'static dyn rdp::Fixup) -> u8 {
        self.feeder.register_fixup(fixup)
    }

    /// Resolves `fixup_id` against kernel-tracked context. Exposed for a
    /// stand-in kernel's internal dispatch handling; host code never calls
    /// this directly.
    pub fn resolve_fixup(&self, fixup_id: u8, cycle_mode: u8, framebuffer_depth: u8) -> arrayvec::ArrayVec<[u32; 8]> {
        self.feeder.resolve_fixup(fixup_id, cycle_mode, framebuffer_depth)
    }

    /// Records a fixup command (spec §4.6): its real rasterizer encoding
    /// depends on context this crate doesn't know at record time (current
    /// cycle mode, framebuffer bit depth), so it's resolved by the kernel
    /// at execution time instead. While recording a block, reserves an
    /// `hint_words`-sized static placeholder the kernel patches once
    /// resolved, so later replays and any other consumer of the block's
    /// raster storage see a stable address; outside a recording there is no
    /// such buffer, so the placeholder is `addr::NONE` and the words are
    /// only ever forwarded live.
    pub fn write_rdp_fixup(&mut self, fixup_id: u8, hint_words: usize) {
        self.assert_not_in_callback("write_rdp_fixup");
        assert!(
            hint_words <= 8,
            "fixup reservation of {} words exceeds the 8-word fixup cap",
            hint_words
        );
        let (placeholder_start, placeholder_end) = if let Some(builder) = self.recording.as_mut() {
            let zeros = [0u32; 8];
            let (chunk_id, start, end) = builder.push_rast(&mut self.rast_chunk_pool, &zeros[..hint_words]);
            (addr::encode_chunk(chunk_id, start), addr::encode_chunk(chunk_id, end))
        } else {
            (addr::NONE, addr::NONE)
        };
        self.writer().write(
            command::INTERNAL_OVERLAY,
            command::Internal::RdpFixup as u8,
            fixup_id as u32,
            &[placeholder_start, placeholder_end],
        );
    }

    /// Words of the block rasterizer chunk named by `chunk_id`, for a
    /// stand-in kernel replaying a static dispatch or reading a fixup's
    /// reserved placeholder.
    pub fn rast_chunk_words(&self, chunk_id: u32) -> &[u32] {
        self.rast_chunk_pool.words_of(chunk_id)
    }

    /// Mutable counterpart of `rast_chunk_words`, for a stand-in kernel to
    /// patch a resolved fixup's words into its static placeholder.
    pub fn rast_chunk_words_mut(&mut self, chunk_id: u32) -> &mut [u32] {
        self.rast_chunk_pool.words_of_mut(chunk_id)
    }

    // --- Syncpoints and deferred callbacks ----------------------------------

    /// Creates a syncpoint at the current write position. Must not be
    /// called from the high-priority queue or from within a block
    /// recording (spec §4.4).
    pub fn syncpoint_create(&mut self) -> u32 {
        assert!(
            !self.highpri.is_open(),
            "syncpoint_create() called from the high-priority queue"
        );
        assert!(
            self.recording.is_none(),
            "syncpoint_create() called while recording a block"
        );
        let id = self.syncpoints.alloc_id();
        self.writer()
            .write(command::INTERNAL_OVERLAY, command::Internal::WriteStatus as u8, 0, &[id]);
        id
    }

    pub fn syncpoint_create_with_callback(&mut self, f: CallbackFn, arg: usize) -> u32 {
        let id = self.syncpoint_create();
        self.syncpoints.register_callback(f, arg);
        id
    }

    pub fn syncpoint_check(&self, id: u32) -> bool {
        self.syncpoints.check(id)
    }

    pub fn syncpoint_wait(&mut self, id: u32) {
        self.syncpoints.wait(id);
        self.syncpoints.drain_callbacks();
    }

    /// Called once the host has observed the kernel's completion interrupt
    /// for `id`. Advances the "last reached" counter but does not itself
    /// run callbacks; a subsequent `syncpoint_wait`/explicit drain does.
    pub fn syncpoint_advance(&self, id: u32) {
        self.syncpoints.advance(id);
    }

    pub fn pending_callbacks(&self) -> usize {
        self.syncpoints.pending_callbacks()
    }

    // --- High-priority sub-queue --------------------------------------------

    pub fn highpri_begin(&mut self) {
        assert!(
            self.recording.is_none(),
            "highpri_begin() called while a block recording is open"
        );
        self.highpri.begin();
    }

    /// Writes the terminating SWAP_BUFFERS into the high-priority ring
    /// *before* marking the segment closed, so it lands as the last command
    /// of the segment rather than leaking into the normal ring (the kernel
    /// only swaps back to normal once it executes this word from the
    /// high-priority side).
    pub fn highpri_end(&mut self) {
        self.writer().write(
            command::INTERNAL_OVERLAY,
            command::Internal::SwapBuffers as u8,
            0,
            &[],
        );
        self.highpri.end();
    }

    pub fn highpri_sync(&mut self) {
        self.highpri.sync();
    }

    // --- Attachment stack ----------------------------------------------------

    /// Attaches `frame`, installing its color image, Z image, and scissor
    /// on the full surface (spec §4.7). Surface identity is opaque to this
    /// crate, so the actual dimensions are resolved by the kernel from
    /// `frame`'s handles at execution time.
    pub fn attach(&mut self, frame: attach::Frame) {
        self.attach.attach(frame);
        self.emit_attach_install();
    }

    /// Like `attach`, but also clears `frame`'s Z buffer (spec §4.7):
    /// `depth_bytes` is the Z buffer's byte size, needed to pick between the
    /// coprocessor's fast DMA fill and a fallback fill-rectangle -- this
    /// crate doesn't otherwise track surface sizes, so the caller supplies
    /// it. A no-op clear if `frame` has no depth buffer.
    pub fn attach_clear(&mut self, frame: attach::Frame, depth_bytes: u32) {
        let method = self.attach.attach_clear(frame, depth_bytes, self.config.dma_alignment);
        self.emit_attach_install();
        if let Some(method) = method {
            self.emit_attach_clear(method);
        }
    }

    fn emit_attach_install(&mut self) {
        self.writer().write(
            command::INTERNAL_OVERLAY,
            command::Internal::AttachInstall as u8,
            0,
            &[],
        );
    }

    fn emit_attach_clear(&mut self, method: attach::ZClearMethod) {
        match method {
            attach::ZClearMethod::FastDmaFill => {
                self.writer()
                    .write(command::INTERNAL_OVERLAY, command::Internal::Dma as u8, 0, &[0, 0, 0]);
            }
            attach::ZClearMethod::FallbackFillRect => {
                self.writer().write(
                    command::INTERNAL_OVERLAY,
                    command::Internal::AttachClearFallback as u8,
                    0,
                    &[],
                );
            }
        }
    }

    /// Detaches, restoring the prior frame if any -- and, since the
    /// rasterizer's current target register must follow, re-installing it
    /// (spec §4.7).
    pub fn detach(&mut self) -> Option<attach::Frame> {
        let popped = self.attach.detach();
        if self.attach.get_attached().is_some() {
            self.emit_attach_install();
        }
        popped
    }

    pub fn detach_wait(&mut self) -> Option<attach::Frame> {
        let frame = self.detach();
        self.wait();
        frame
    }

    pub fn detach_cb(&mut self, f: CallbackFn, arg: usize) -> Option<attach::Frame> {
        let frame = self.detach();
        self.syncpoint_create_with_callback(f, arg);
        frame
    }

    /// Detaches and flushes, so the detached surface's remaining commands
    /// are processed promptly without the host blocking on them (unlike
    /// `detach_wait`). SWAP_BUFFERS (spec §6) is reserved for the kernel's
    /// own normal/high-priority ring swap and `highpri_end`; it is not
    /// reused here.
    pub fn detach_show(&mut self) -> Option<attach::Frame> {
        let frame = self.detach();
        self.writer().flush();
        frame
    }

    pub fn is_attached(&self) -> bool {
        self.attach.is_attached()
    }

    pub fn get_attached(&self) -> Option<attach::Frame> {
        self.attach.get_attached()
    }

    // --- Rasterizer feeder, validator ----------------------------------------

    pub fn feeder(&self) -> &Feeder {
        &self.feeder
    }

    pub fn feeder_mut(&mut self) -> &mut Feeder {
        &mut self.feeder
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn validator_mut(&mut self) -> &mut Validator {
        &mut self.validator
    }

    /// Disjoint mutable borrow of the feeder and validator together, for a
    /// stand-in kernel pushing a just-dispatched range through both in one
    /// step (the coupling `&mut self` on each getter individually can't
    /// express).
    pub fn feeder_and_validator_mut(&mut self) -> (&mut Feeder, &mut Validator) {
        (&mut self.feeder, &mut self.validator)
    }

    // --- Kernel-facing accessors ---------------------------------------------
    //
    // Nothing below is used by the host fast path. It exists for a stand-in
    // dispatch kernel (`gfxq-sim`, per Design Notes §9: "Tests should stub
    // it out behind an interface so host-side tests can run without the
    // real hardware") to drive the rings, block storage, and overlay table
    // the same way the real coprocessor's resident kernel would.

    /// The normal-priority ring, for a stand-in kernel's consumer loop.
    pub fn normal_ring(&self) -> &Ring {
        &self.normal_ring
    }

    /// The high-priority ring, for a stand-in kernel's consumer loop.
    pub fn highpri_ring(&self) -> &Ring {
        &self.highpri_ring
    }

    /// Called by a stand-in kernel once it has executed the SWAP_BUFFERS
    /// that closes out a high-priority segment, so `highpri_sync` can
    /// observe completion.
    pub fn highpri_note_processed(&self) {
        self.highpri.note_processed();
    }

    /// Words of the block chunk named by `chunk_id`, for a stand-in kernel
    /// following a CALL/JUMP into block storage.
    pub fn chunk_words(&self, chunk_id: u32) -> &[u32] {
        self.chunk_pool.words_of(chunk_id)
    }

    /// Whether `id` names a currently-registered overlay, for a stand-in
    /// kernel deciding whether a command's overlay ID is a paging fault.
    pub fn overlay_is_registered(&self, id: u8) -> bool {
        self.overlays.is_registered(id)
    }

    /// Declared word count for `command_index` under overlay `id`, for a
    /// stand-in kernel to know how many ring or chunk words a command
    /// occupies once it has read word 0.
    pub fn overlay_command_size(&self, id: u8, command_index: u8) -> Option<u8> {
        self.overlays.command_size(id, command_index)
    }

    /// Raw, un-waited access to an overlay's persistent-state backing
    /// store, for a stand-in kernel's overlay handlers to read and mutate
    /// directly. Host code should use `state_pointer` instead, which
    /// performs the implicit `wait` spec §4.2 requires.
    pub fn overlay_state_raw(&self, id: u8) -> Option<&'static [core::sync::atomic::AtomicU32]> {
        self.overlays.state_pointer(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::MaybeUninit;

    fn backing(len: usize) -> &'static mut [MaybeUninit<u8>] {
        let v = std::vec![MaybeUninit::uninit(); len << 10].into_boxed_slice();
        std::boxed::Box::leak(v)
    }

    fn small_config() -> Config {
        Config {
            normal_region_words: 128,
            highpri_region_words: 64,
            rdp_buffer_words: 64,
            block_chunk_min_words: 8,
            block_chunk_max_words: 32,
            chunks_per_class: 4,
            callback_queue_depth: 4,
            ..Default::default()
        }
    }

    fn engine() -> Engine {
        Engine::new(small_config(), Arena::new(backing(64)))
    }

    fn counter_overlay() -> OverlayDescriptor {
        OverlayDescriptor {
            text_image: &[],
            data_image: &[0, 0, 0, 0],
            command_sizes: &[1],
        }
    }

    #[test]
    fn write_validates_against_overlay_command_size_table() {
        let mut e = engine();
        let id = e.register_overlay(&counter_overlay()).unwrap();
        e.write(id, 0, 0, &[]);
    }

    #[test]
    #[should_panic(expected = "declares 1 words")]
    fn write_rejects_mismatched_arg_count() {
        let mut e = engine();
        let id = e.register_overlay(&counter_overlay()).unwrap();
        e.write(id, 0, 0, &[0xdead]);
    }

    #[test]
    fn block_begin_then_highpri_begin_panics() {
        let mut e = engine();
        e.block_begin();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            e.highpri_begin();
        }));
        assert!(result.is_err());
    }

    #[test]
    fn syncpoint_roundtrip() {
        let mut e = engine();
        let id = e.syncpoint_create();
        assert!(!e.syncpoint_check(id));
        e.syncpoint_advance(id);
        e.syncpoint_wait(id);
        assert!(e.syncpoint_check(id));
    }

    #[test]
    fn record_and_run_block() {
        let mut e = engine();
        let id = e.register_overlay(&counter_overlay()).unwrap();
        e.block_begin();
        e.write(id, 0, 0, &[]);
        e.write(id, 0, 0, &[]);
        let block = e.block_end();
        assert_eq!(block.nesting_level(), 1);
        e.block_run(block);
    }

    #[test]
    #[should_panic(expected = "re-entrantly from within a syncpoint callback")]
    fn callback_reentering_writer_panics() {
        fn reenter(arg: usize) {
            let e = unsafe { &mut *(arg as *mut Engine) };
            e.write(command::INTERNAL_OVERLAY, command::Internal::Noop as u8, 0, &[]);
        }
        let mut e = engine();
        let id = e.syncpoint_create();
        let ptr = &mut e as *mut Engine as usize;
        e.syncpoints.register_callback(reenter, ptr);
        e.syncpoints.advance(id);
        e.syncpoint_wait(id);
    }

    #[test]
    fn attach_detach_round_trip() {
        let mut e = engine();
        let frame = attach::Frame { color: 1, depth: None };
        e.attach(frame);
        assert!(e.is_attached());
        assert_eq!(e.detach(), Some(frame));
        assert!(!e.is_attached());
    }
}
