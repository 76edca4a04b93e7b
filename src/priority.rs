//! Type-level tokens identifying which execution context is calling in.
//!
//! Generalized from the teacher's interrupt-priority tokens. Here the two
//! contexts that matter are "the host's normal call path" and "inside a
//! deferred syncpoint callback" -- the latter must not re-enter the
//! `CommandWriter` (spec §4.4), and these zero-sized tokens let that rule be
//! threaded through APIs without a runtime flag check at every call site that
//! doesn't need one.

use core::marker::PhantomData;

type NotSyncOrSend = PhantomData<*mut ()>;

/// Ordinary host call context: anywhere outside a syncpoint callback.
#[derive(Copy, Clone)]
pub struct Host(NotSyncOrSend);

/// Execution context inside a deferred syncpoint callback. Holding this
/// token is what the writer's re-entrancy guard actually checks against --
/// see `sync::Syncpoints::drain_callbacks`.
#[derive(Copy, Clone)]
pub struct Callback(NotSyncOrSend);

impl Host {
    pub(crate) fn new() -> Self {
        Host(PhantomData)
    }
}

impl Callback {
    pub(crate) unsafe fn new() -> Self {
        Callback(PhantomData)
    }
}
