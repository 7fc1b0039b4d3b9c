//! Deferred invocation of alarm handlers
use hwalarm_kernel::AlarmHandler;
use std::sync::mpsc;

use crate::{ThreadRole, THREAD_ROLE};

/// The body of the dispatch thread. Invokes handlers in the order they were
/// enqueued, and exits when the queue is closed and drained.
pub(crate) fn dispatch_thread(dispatch_recv: mpsc::Receiver<AlarmHandler>) {
    THREAD_ROLE.with(|role| role.set(ThreadRole::Dispatch));

    for handler in dispatch_recv {
        log::trace!("invoking {handler:?}");
        handler.call();
    }

    log::trace!("the dispatch thread is exiting");
}
