//! The simulated comparator
use hwalarm_kernel::PortToKernel;
use std::{sync::mpsc, time::Instant};

use crate::{PortInstance, ThreadRole, THREAD_ROLE};

pub(crate) enum TimerCmd {
    /// Raise the interrupt at `at`. Replaces the previous deadline.
    SetDeadline { at: Instant },
    Disarm,
}

/// The body of the timer thread, which serves as the interrupt context.
///
/// Exits when the sender of `timer_cmd_recv` is dropped.
pub(crate) fn timer_thread<Traits: PortInstance>(timer_cmd_recv: mpsc::Receiver<TimerCmd>) {
    THREAD_ROLE.with(|role| role.set(ThreadRole::Interrupt));

    let mut next_deadline: Option<Instant> = None;
    loop {
        let recv_result = if let Some(next_deadline) = next_deadline {
            // A deadline in the past times out immediately unless there are
            // pending commands
            timer_cmd_recv.recv_timeout(next_deadline.saturating_duration_since(Instant::now()))
        } else {
            timer_cmd_recv
                .recv()
                .map_err(|_| mpsc::RecvTimeoutError::Disconnected)
        };
        match recv_result {
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // A match event fires only once per arming
                next_deadline = None;

                log::trace!("timer_interrupt");

                // Safety: CPU Lock inactive, an interrupt context. This thread
                //         is the only caller, so it's never re-entered.
                unsafe { <Traits as PortToKernel>::timer_interrupt() };
            }
            Ok(TimerCmd::SetDeadline { at }) => {
                next_deadline = Some(at);
            }
            Ok(TimerCmd::Disarm) => {
                next_deadline = None;
            }
        }
    }

    log::trace!("the timer thread is exiting");
}
