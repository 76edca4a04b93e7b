//! Syncpoints and deferred callbacks (spec §4.4).
//!
//! A syncpoint is a monotone fence: the host emits one at a logical write
//! position, the kernel's completion interrupt (modeled here as whatever
//! the embedding host calls after it has actually drained that far) raises
//! "last reached", and `syncpoint_check`/`syncpoint_wait` observe it.
//! Callbacks attached to a syncpoint are queued for the host to drain
//! outside interrupt context, never invoked inline from `advance`.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::arena::Arena;
use crate::priority::Callback;

pub type CallbackFn = fn(arg: usize);

struct QueuedCallback {
    f: CallbackFn,
    arg: usize,
}

/// Monotone fence counter plus a bounded queue of callbacks waiting to run
/// outside interrupt context.
pub struct Syncpoints {
    next_id: Cell<u32>,
    last_reached: AtomicU32,
    queue: &'static mut [Cell<Option<QueuedCallback>>],
    queue_head: Cell<usize>,
    queue_len: Cell<usize>,
    /// Set for the duration of `drain_callbacks`; a callback that calls back
    /// into the writer trips the re-entrancy guard (resolved Open Question,
    /// spec_full §5).
    in_callback: Cell<bool>,
}

// Safety: the engine only ever touches a `Syncpoints` from the single host
// thread plus the completion-interrupt path, which this crate models as a
// plain method call (`advance`) rather than real interrupt reentrancy.
unsafe impl Sync for Syncpoints {}

impl Syncpoints {
    pub fn new(arena: &Arena, queue_depth: usize) -> Self {
        let queue = arena
            .alloc_slice_default::<Cell<Option<QueuedCallback>>>(queue_depth)
            .expect("arena exhausted allocating syncpoint callback queue")
            .leak();
        Syncpoints {
            next_id: Cell::new(1),
            last_reached: AtomicU32::new(0),
            queue,
            queue_head: Cell::new(0),
            queue_len: Cell::new(0),
            in_callback: Cell::new(false),
        }
    }

    /// Allocates the next monotone syncpoint ID. Does not itself emit
    /// anything into a ring; `Engine::syncpoint_create` pairs this with
    /// writing the fence command.
    pub fn alloc_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Registers a callback to run once `id` is reached. Must be called
    /// before the corresponding completion is observed.
    pub fn register_callback(&self, f: CallbackFn, arg: usize) {
        let len = self.queue_len.get();
        assert!(
            len < self.queue.len(),
            "syncpoint callback queue exhausted ({} pending)",
            len
        );
        let tail = (self.queue_head.get() + len) % self.queue.len();
        self.queue[tail].set(Some(QueuedCallback { f, arg }));
        self.queue_len.set(len + 1);
    }

    /// Number of callbacks registered but not yet drained, for host code
    /// that wants to apply backpressure (spec_full §6).
    pub fn pending_callbacks(&self) -> usize {
        self.queue_len.get()
    }

    /// Whether execution is currently inside `drain_callbacks`. `Engine`
    /// checks this before any call that would re-enter the `CommandWriter`
    /// (resolved Open Question, spec_full §5: "debug-check and reject"
    /// rather than silently deadlock).
    pub fn in_callback(&self) -> bool {
        self.in_callback.get()
    }

    /// Called by the host once it has observed the kernel's completion
    /// interrupt for syncpoint `id`. Advances `last_reached`; does not run
    /// callbacks (use `drain_callbacks` for that, outside interrupt
    /// context).
    pub fn advance(&self, id: u32) {
        let mut cur = self.last_reached.load(Ordering::Relaxed);
        while id > cur {
            match self.last_reached.compare_exchange_weak(
                cur,
                id,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn check(&self, id: u32) -> bool {
        id <= self.last_reached.load(Ordering::Acquire)
    }

    /// Spins until `id` is reached. A real host would sleep on the
    /// completion interrupt instead; this crate treats that as the
    /// embedder's concern (spec_full Non-goals: host-side bring-up).
    pub fn wait(&self, id: u32) {
        while !self.check(id) {
            core::hint::spin_loop();
        }
    }

    /// Runs every queued callback whose registration predates this call,
    /// in FIFO order. Must be called outside interrupt context. Panics if
    /// called re-entrantly (i.e. from within a callback it is itself
    /// running).
    pub fn drain_callbacks(&self) {
        assert!(
            !self.in_callback.get(),
            "drain_callbacks() called re-entrantly from within a callback"
        );
        self.in_callback.set(true);
        let guard = scopeguard::guard((), |_| self.in_callback.set(false));
        let len = self.queue_len.get();
        for _ in 0..len {
            let head = self.queue_head.get();
            let queued = self.queue[head].take().expect("callback slot unexpectedly empty");
            self.queue_head.set((head + 1) % self.queue.len());
            self.queue_len.set(self.queue_len.get() - 1);
            // Safety: we are on the drain path, precisely the context this
            // token represents.
            let _ctx = unsafe { Callback::new() };
            (queued.f)(queued.arg);
        }
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::MaybeUninit;
    use std::cell::RefCell;

    fn backing(len: usize) -> &'static mut [MaybeUninit<u8>] {
        let v = std::vec![MaybeUninit::uninit(); len].into_boxed_slice();
        std::boxed::Box::leak(v)
    }

    #[test]
    fn check_tracks_monotone_advance() {
        let arena = Arena::new(backing(1 << 16));
        let sp = Syncpoints::new(&arena, 4);
        let id = sp.alloc_id();
        assert!(!sp.check(id));
        sp.advance(id);
        assert!(sp.check(id));
    }

    #[test]
    fn drain_runs_callbacks_in_order() {
        thread_local! {
            static SEEN: RefCell<Vec<usize>> = RefCell::new(Vec::new());
        }
        fn record(arg: usize) {
            SEEN.with(|s| s.borrow_mut().push(arg));
        }

        let arena = Arena::new(backing(1 << 16));
        let sp = Syncpoints::new(&arena, 4);
        sp.register_callback(record, 1);
        sp.register_callback(record, 2);
        sp.drain_callbacks();
        SEEN.with(|s| assert_eq!(*s.borrow(), vec![1, 2]));
    }

    #[test]
    #[should_panic(expected = "re-entrantly")]
    fn drain_rejects_reentrant_call() {
        fn reenter(arg: usize) {
            let sp = arg as *const Syncpoints;
            unsafe { (*sp).drain_callbacks() };
        }

        let arena = Arena::new(backing(1 << 16));
        let sp = Syncpoints::new(&arena, 4);
        sp.register_callback(reenter, &sp as *const Syncpoints as usize);
        sp.drain_callbacks();
    }
}
