//! `CommandWriter`: the host-facing entry point for enqueueing commands
//! (spec §4.1).
//!
//! A writer targets exactly one of three destinations at a time: the
//! normal-priority ring, the high-priority ring, or an open block
//! recording. Which one is selected lives in `Engine`, not here; a
//! `CommandWriter` is a thin view constructed fresh for each call so it
//! never outlives the borrow of whichever target it wraps.

use crate::block::{BlockBuilder, ChunkPool};
use crate::command;
use crate::config::MAX_COMMAND_WORDS;
use crate::priority::Host;
use crate::ring::Ring;

/// Where a `CommandWriter`'s words actually land.
pub(crate) enum Target<'a> {
    Ring(&'a Ring),
    Block(&'a mut BlockBuilder, &'a mut ChunkPool),
}

/// Host-facing command writer. Borrowed fresh from `Engine` for the
/// duration of a single `write`/`write_begin..write_end` call.
pub struct CommandWriter<'a> {
    target: Target<'a>,
    /// Present only while between `write_begin` and `write_end`.
    cursor: Option<Cursor>,
    _ctx: Host,
}

struct Cursor {
    buf: [u32; MAX_COMMAND_WORDS],
    total: usize,
    filled: usize,
}

impl<'a> CommandWriter<'a> {
    pub(crate) fn new(target: Target<'a>, ctx: Host) -> Self {
        CommandWriter {
            target,
            cursor: None,
            _ctx: ctx,
        }
    }

    /// Writes a single command in one call (spec §4.1). `args` are the
    /// words following word 0; their count plus one must match the
    /// overlay's declared command size for `command_index`, a precondition
    /// the caller (`Engine::write`, which knows the overlay's size table)
    /// is responsible for having already checked.
    pub fn write(&mut self, overlay_id: u8, command_index: u8, payload: u32, args: &[u32]) {
        assert!(
            self.cursor.is_none(),
            "write() called while a write_begin/write_end span is open"
        );
        let total = args.len() + 1;
        assert!(
            total <= MAX_COMMAND_WORDS,
            "command of {} words exceeds the {}-word limit",
            total,
            MAX_COMMAND_WORDS
        );
        let word0 = command::pack_word0(overlay_id, command_index, payload);
        let mut buf = [0u32; MAX_COMMAND_WORDS];
        buf[0] = word0;
        buf[1..=args.len()].copy_from_slice(args);
        self.emit(&buf[..total]);
    }

    /// Begins a cursor-style command for payloads too large to hand to
    /// `write` in one call (spec §4.1). `total_words` includes word 0.
    pub fn write_begin(&mut self, overlay_id: u8, command_index: u8, payload: u32, total_words: usize) {
        assert!(
            self.cursor.is_none(),
            "write_begin() called while another span is already open"
        );
        assert!(
            total_words >= 1 && total_words <= MAX_COMMAND_WORDS,
            "command of {} words out of range",
            total_words
        );
        let mut buf = [0u32; MAX_COMMAND_WORDS];
        buf[0] = command::pack_word0(overlay_id, command_index, payload);
        self.cursor = Some(Cursor {
            buf,
            total: total_words,
            filled: 1,
        });
    }

    /// Appends one argument word to the command opened by `write_begin`.
    pub fn write_arg(&mut self, word: u32) {
        let cursor = self
            .cursor
            .as_mut()
            .expect("write_arg() called with no open write_begin span");
        assert!(
            cursor.filled < cursor.total,
            "write_arg() called more times than the {}-word span declared",
            cursor.total
        );
        cursor.buf[cursor.filled] = word;
        cursor.filled += 1;
    }

    /// Closes the span opened by `write_begin`, publishing the completed
    /// command.
    pub fn write_end(&mut self) {
        let cursor = self
            .cursor
            .take()
            .expect("write_end() called with no open write_begin span");
        assert_eq!(
            cursor.filled, cursor.total,
            "write_end() called with {} of {} words filled",
            cursor.filled, cursor.total
        );
        self.emit(&cursor.buf[..cursor.total]);
    }

    fn emit(&mut self, words: &[u32]) {
        match &mut self.target {
            Target::Ring(ring) => {
                let (region, pos) = ring.reserve(words.len());
                ring.publish(region, pos, words);
            }
            Target::Block(builder, pool) => builder.push(pool, words),
        }
    }

    /// Ensures the consumer is awake and will process everything written so
    /// far (spec §4.1). A no-op while recording a block: captured commands
    /// aren't streamed anywhere yet.
    pub fn flush(&self) {
        match &self.target {
            Target::Ring(_ring) => {
                // The real kernel wake signal is a platform concern (out of
                // scope, per Non-goals); here flush only needs to exist as
                // a call the host can make unconditionally and cheaply.
            }
            Target::Block(..) => {}
        }
    }

    /// Returns the target ring's current write cursor, for diagnostics and
    /// tests. Exposes no production behavior.
    pub fn debug_snapshot(&self) -> Option<(usize, usize)> {
        match &self.target {
            Target::Ring(ring) => Some((ring.write_region_index(), ring.write_pos())),
            Target::Block(..) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::RingClass;
    use crate::arena::Arena;
    use core::mem::MaybeUninit;

    fn backing(len: usize) -> &'static mut [MaybeUninit<u8>] {
        let v = std::vec![MaybeUninit::uninit(); len].into_boxed_slice();
        std::boxed::Box::leak(v)
    }

    #[test]
    fn write_publishes_a_single_command() {
        let arena = Arena::new(backing(1 << 16));
        let ring = Ring::new(RingClass::Normal, &arena, 64);
        let mut w = CommandWriter::new(Target::Ring(&ring), crate::priority::Host::new());
        w.write(2, 1, 0, &[0xdead, 0xbeef]);
        let w0 = ring.peek_word0().unwrap();
        assert_eq!(command::overlay_id(w0), 2);
        let mut out = [0u32; 3];
        ring.read_command(3, &mut out);
        assert_eq!(out[1], 0xdead);
        assert_eq!(out[2], 0xbeef);
    }

    #[test]
    fn write_begin_arg_end_matches_single_call_write() {
        let arena = Arena::new(backing(1 << 16));
        let ring = Ring::new(RingClass::Normal, &arena, 64);
        let mut w = CommandWriter::new(Target::Ring(&ring), crate::priority::Host::new());
        w.write_begin(3, 2, 0, 3);
        w.write_arg(111);
        w.write_arg(222);
        w.write_end();
        let mut out = [0u32; 3];
        ring.peek_word0().unwrap();
        ring.read_command(3, &mut out);
        assert_eq!(out[1], 111);
        assert_eq!(out[2], 222);
    }

    #[test]
    #[should_panic(expected = "write_end() called with")]
    fn write_end_before_filling_span_panics() {
        let arena = Arena::new(backing(1 << 16));
        let ring = Ring::new(RingClass::Normal, &arena, 64);
        let mut w = CommandWriter::new(Target::Ring(&ring), crate::priority::Host::new());
        w.write_begin(1, 1, 0, 2);
        w.write_end();
    }
}
