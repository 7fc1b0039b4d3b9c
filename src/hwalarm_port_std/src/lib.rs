//! Simulation environment for running `hwalarm_kernel` on a hosted
//! environment.
//!
//! The hardware comparator is simulated by a *timer thread*, which sleeps
//! until the armed deadline and then calls
//! [`PortToKernel::timer_interrupt`]. The timer thread acts as the interrupt
//! context. Alarm handlers are invoked by a separate *dispatch thread*, fed by
//! a bounded queue of [`DISPATCH_QUEUE_LEN`] elements.
//!
//! CPU Lock is a process-wide spinlock. While one thread holds it, the timer
//! thread can't enter the interrupt handler, which is how masking the
//! comparator interrupt is modeled.
//!
//! # Usage
//!
//! ```rust,ignore
//! hwalarm_port_std::use_port!(unsafe struct SystemTraits);
//!
//! static ALARM: Alarm<SystemTraits> = Alarm::new(10_000, true);
//!
//! fn main() {
//!     hwalarm_port_std::boot::<SystemTraits>();
//!     Pin::static_ref(&ALARM).activate(Some(handler), 0).unwrap();
//!     /* ... */
//!     hwalarm_port_std::shutdown::<SystemTraits>();
//! }
//! ```
#![deny(unsafe_op_in_unsafe_fn)]
use atomic_ref::AtomicRef;
use hwalarm_kernel::{AlarmHandler, KernelTraits, PendDispatchError, PortToKernel, UTicks};
use spin::Mutex as SpinMutex;
use std::{
    cell::Cell,
    sync::{atomic::Ordering, mpsc},
    thread::{self, JoinHandle, ThreadId},
    time::{Duration, Instant},
};

mod dispatch;
mod timer;

use self::timer::TimerCmd;

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate hwalarm_kernel;
/// Used by `use_port!`
#[doc(hidden)]
pub extern crate env_logger;

/// The frequency of the simulated counter. One tick is one microsecond.
pub const TICK_FREQUENCY: u64 = 1_000_000;

/// The capacity of the dispatch queue. A firing is dropped if the dispatch
/// thread falls this far behind.
pub const DISPATCH_QUEUE_LEN: usize = 64;

/// Implemented on a kernel trait type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: KernelTraits + PortToKernel {
    fn port_state() -> &'static State;
}

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation of
/// the corresponding trait methods of `Port*`.
#[doc(hidden)]
pub struct State {
    /// Held while CPU Lock is active. The guard is forgotten by
    /// `enter_cpu_lock` and the lock is forcibly released by
    /// `leave_cpu_lock`.
    cpu_lock: SpinMutex<()>,
    /// The thread currently holding `cpu_lock`.
    cpu_lock_owner: SpinMutex<Option<ThreadId>>,
    timer_cmd_send: SpinMutex<Option<mpsc::Sender<TimerCmd>>>,
    timer_join_handle: SpinMutex<Option<JoinHandle<()>>>,
    dispatch_send: SpinMutex<Option<mpsc::SyncSender<AlarmHandler>>>,
    dispatch_join_handle: SpinMutex<Option<JoinHandle<()>>>,
    origin: AtomicRef<'static, Instant>,
}

/// The role of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    /// A thread not managed by the port, e.g., the main thread.
    Unknown,
    /// The timer thread, which serves as the interrupt context.
    Interrupt,
    /// The dispatch thread, which invokes alarm handlers.
    Dispatch,
}

thread_local! {
    /// The current thread's role. It's automatically assigned after the
    /// creation of a thread managed by the port.
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Unknown);
}

fn current_thread_role() -> ThreadRole {
    THREAD_ROLE.with(|r| r.get())
}

/// The tick count at `State::origin`. Nonzero so that the kernel doesn't
/// depend on zero-start.
const TICK_ORIGIN: UTicks = 0x00c0ffee;

#[allow(clippy::missing_safety_doc)]
impl State {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            cpu_lock: SpinMutex::new(()),
            cpu_lock_owner: SpinMutex::new(None),
            timer_cmd_send: SpinMutex::new(None),
            timer_join_handle: SpinMutex::new(None),
            dispatch_send: SpinMutex::new(None),
            dispatch_join_handle: SpinMutex::new(None),
            origin: AtomicRef::new(None),
        }
    }

    /// Start the timer and dispatch threads and initialize the kernel.
    pub fn port_boot<Traits: PortInstance>(&'static self) {
        log::trace!("port_boot");
        assert_eq!(
            current_thread_role(),
            ThreadRole::Unknown,
            "`boot` cannot be called from a port-managed thread"
        );
        assert!(
            self.timer_join_handle.lock().is_none(),
            "the port is already running"
        );

        // Establish the origin of the tick count
        self.origin();

        // Start a timer thread
        let (timer_cmd_send, timer_cmd_recv) = mpsc::channel();
        log::trace!("starting the timer thread");
        let timer_join_handle = thread::Builder::new()
            .name("hwalarm timer".to_owned())
            .spawn(move || timer::timer_thread::<Traits>(timer_cmd_recv))
            .unwrap_or_else(|e| panic!("failed to spawn the timer thread: {e}"));
        *self.timer_cmd_send.lock() = Some(timer_cmd_send);
        *self.timer_join_handle.lock() = Some(timer_join_handle);

        // Start a dispatch thread
        let (dispatch_send, dispatch_recv) = mpsc::sync_channel(DISPATCH_QUEUE_LEN);
        log::trace!("starting the dispatch thread");
        let dispatch_join_handle = thread::Builder::new()
            .name("hwalarm dispatch".to_owned())
            .spawn(move || dispatch::dispatch_thread(dispatch_recv))
            .unwrap_or_else(|e| panic!("failed to spawn the dispatch thread: {e}"));
        *self.dispatch_send.lock() = Some(dispatch_send);
        *self.dispatch_join_handle.lock() = Some(dispatch_join_handle);

        // Safety: We are a port, so it's okay to call this. CPU Lock inactive.
        unsafe { <Traits as PortToKernel>::init() };
    }

    /// Stop the timer and dispatch threads. Handlers already in the dispatch
    /// queue are invoked before this returns.
    pub fn port_shutdown(&self) {
        log::trace!("port_shutdown");
        assert_eq!(
            current_thread_role(),
            ThreadRole::Unknown,
            "`shutdown` cannot be called from a port-managed thread"
        );

        // Stop the timer thread first so that nothing is enqueued after the
        // dispatch queue is closed.
        // `timer_cmd_recv.recv` will return `Err(_)` when we drop the
        // corresponding sender (`timer_cmd_send`).
        log::trace!("stopping the timer thread");
        *self.timer_cmd_send.lock() = None;
        let timer_join_handle = self.timer_join_handle.lock().take();
        let timer_result = timer_join_handle.map(JoinHandle::join);
        log::trace!("stopped the timer thread");

        log::trace!("stopping the dispatch thread");
        *self.dispatch_send.lock() = None;
        let dispatch_join_handle = self.dispatch_join_handle.lock().take();
        let dispatch_result = dispatch_join_handle.map(JoinHandle::join);
        log::trace!("stopped the dispatch thread");

        // Propagate any panic that occurred in a port thread
        for result in [timer_result, dispatch_result].into_iter().flatten() {
            if let Err(e) = result {
                std::panic::resume_unwind(e);
            }
        }
    }

    pub unsafe fn enter_cpu_lock(&self) {
        log::trace!("enter_cpu_lock");

        // The guard is released by `leave_cpu_lock`
        std::mem::forget(self.cpu_lock.lock());

        let mut owner = self.cpu_lock_owner.lock();
        debug_assert!(owner.is_none());
        *owner = Some(thread::current().id());
    }

    pub unsafe fn leave_cpu_lock(&self) {
        log::trace!("leave_cpu_lock");

        let mut owner = self.cpu_lock_owner.lock();
        assert_eq!(*owner, Some(thread::current().id()));
        *owner = None;
        drop(owner);

        // Safety: The guard was forgotten by `enter_cpu_lock` on this thread
        unsafe { self.cpu_lock.force_unlock() };
    }

    pub fn is_cpu_lock_active(&self) -> bool {
        *self.cpu_lock_owner.lock() == Some(thread::current().id())
    }

    fn origin(&self) -> &'static Instant {
        if let Some(x) = self.origin.load(Ordering::Acquire) {
            x
        } else {
            // Establish an origin point.
            let origin = Box::leak(Box::new(Instant::now()));

            // Store `origin` to `self.origin`.
            //
            // 1. If `self.origin` is already initialized at this point, discard
            //    `origin`. Use `Acquire` to synchronize with the canonical
            //    initializing thread.
            //
            // 2. Otherwise, `origin` is now the canonical origin. Use `Release`
            //    to synchronize with other threads, ensuring the initialized
            //    contents of `origin` is visible to them.
            match self.origin.compare_exchange(
                None,
                Some(origin),
                Ordering::AcqRel,  // case 2
                Ordering::Acquire, // case 1
            ) {
                Ok(_) => origin,              // case 2
                Err(x) => x.unwrap_or(origin), // case 1
            }
        }
    }

    pub fn read_ticks(&self) -> UTicks {
        let micros = Instant::now().duration_since(*self.origin()).as_micros();

        // Truncate the upper bits to make it wrap around at 64 bits
        (micros as UTicks).wrapping_add(TICK_ORIGIN)
    }

    /// Convert a tick count to a point of time. Returns `None` if it's not
    /// representable by `Instant`.
    fn instant_from_ticks(&self, ticks: UTicks) -> Option<Instant> {
        let micros = ticks.wrapping_sub(TICK_ORIGIN);
        self.origin().checked_add(Duration::from_micros(micros))
    }

    pub unsafe fn arm(&self, deadline: UTicks) {
        log::trace!("arm({deadline})");
        debug_assert!(self.is_cpu_lock_active());

        if let Some(at) = self.instant_from_ticks(deadline) {
            self.send_timer_cmd(TimerCmd::SetDeadline { at });
        } else {
            // Too far in the future to ever fire
            log::warn!("deadline {deadline} is out of range; leaving the comparator disarmed");
            self.send_timer_cmd(TimerCmd::Disarm);
        }
    }

    pub unsafe fn disarm(&self) {
        log::trace!("disarm");
        debug_assert!(self.is_cpu_lock_active());

        self.send_timer_cmd(TimerCmd::Disarm);
    }

    pub unsafe fn acknowledge(&self) {
        log::trace!("acknowledge");
        debug_assert_eq!(current_thread_role(), ThreadRole::Interrupt);

        // The timer thread clears its deadline before calling the interrupt
        // handler, so there's no pending flag to clear
    }

    fn send_timer_cmd(&self, cmd: TimerCmd) {
        if let Some(timer_cmd_send) = &*self.timer_cmd_send.lock() {
            // The receiver lives as long as `timer_cmd_send` is `Some(_)`
            let _ = timer_cmd_send.send(cmd);
        } else {
            // Not booted yet or already shut down. `PortToKernel::init`
            // rearms the comparator on boot.
            log::trace!("the timer thread is not running; ignoring the command");
        }
    }

    pub unsafe fn pend_dispatch(&self, handler: AlarmHandler) -> Result<(), PendDispatchError> {
        log::trace!("pend_dispatch({handler:?})");
        debug_assert!(!self.is_cpu_lock_active());

        let dispatch_send = self.dispatch_send.lock();
        let Some(dispatch_send) = &*dispatch_send else {
            return Err(PendDispatchError::QueueOverflow);
        };

        dispatch_send
            .try_send(handler)
            .map_err(|_| PendDispatchError::QueueOverflow)
    }
}

/// Start the simulated hardware and initialize the kernel.
///
/// Alarms may be activated before this; the comparator is armed for them
/// here.
pub fn boot<Traits: PortInstance>() {
    Traits::port_state().port_boot::<Traits>();
}

/// Stop the simulated hardware.
///
/// Pending alarms stay in the alarm set but no longer fire. Handlers already
/// handed over to the dispatch thread are invoked before this returns. Panics
/// that occurred in an alarm handler are propagated to the caller.
///
/// It's illegal to call this from an alarm handler.
pub fn shutdown<Traits: PortInstance>() {
    Traits::port_state().port_shutdown();
}

/// Instantiate the port.
///
/// `use_port!(unsafe struct SystemTraits)` defines a kernel trait type named
/// `SystemTraits` and implements the kernel's port traits and
/// `KernelTraits` on it.
///
/// `use_port!(unsafe struct SystemTraits; fn main => app)` additionally
/// generates a `main` function that initializes `env_logger`, calls
/// [`boot`], calls `app`, and then calls [`shutdown`].
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $SystemTraits:ident; fn main => $app:path) => {
        $crate::use_port!(unsafe $vis struct $SystemTraits);

        fn main() {
            $crate::env_logger::init();

            $crate::boot::<$SystemTraits>();
            $app();
            $crate::shutdown::<$SystemTraits>();
        }
    };

    (unsafe $vis:vis struct $SystemTraits:ident) => {
        $vis struct $SystemTraits;

        mod port_std_impl {
            use super::$SystemTraits;
            use $crate::hwalarm_kernel::{
                AlarmGlobals, AlarmHandler, KernelTraits, PendDispatchError, PortDispatch,
                PortThreading, PortTimer, UTicks,
            };
            use $crate::{State, PortInstance};

            pub(super) static PORT_STATE: State = State::new();
            static KERNEL_STATE: AlarmGlobals<$SystemTraits> = AlarmGlobals::new();

            unsafe impl PortInstance for $SystemTraits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            // Safety: `KERNEL_STATE` is the only `AlarmGlobals<$SystemTraits>`
            unsafe impl KernelTraits for $SystemTraits {
                #[inline]
                fn state() -> &'static AlarmGlobals<Self> {
                    &KERNEL_STATE
                }
            }

            unsafe impl PortThreading for $SystemTraits {
                unsafe fn enter_cpu_lock() {
                    unsafe { PORT_STATE.enter_cpu_lock() }
                }

                unsafe fn leave_cpu_lock() {
                    unsafe { PORT_STATE.leave_cpu_lock() }
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active()
                }
            }

            impl PortTimer for $SystemTraits {
                const FREQUENCY: u64 = $crate::TICK_FREQUENCY;

                unsafe fn read_ticks() -> UTicks {
                    PORT_STATE.read_ticks()
                }

                unsafe fn arm(deadline: UTicks) {
                    unsafe { PORT_STATE.arm(deadline) }
                }

                unsafe fn disarm() {
                    unsafe { PORT_STATE.disarm() }
                }

                unsafe fn acknowledge() {
                    unsafe { PORT_STATE.acknowledge() }
                }
            }

            impl PortDispatch for $SystemTraits {
                unsafe fn pend_dispatch(handler: AlarmHandler) -> Result<(), PendDispatchError> {
                    unsafe { PORT_STATE.pend_dispatch(handler) }
                }
            }
        }
    };
}
