//! Software alarms multiplexed onto a single hardware comparator.
//!
//! A platform usually has exactly one free-running counter with one compare
//! register, but applications want many independent alarms. This crate keeps
//! the pending alarms in an ordered set (at most [`ALARM_CAPACITY`] of them)
//! and always programs the comparator with the nearest deadline.
//!
//! The platform-specific parts are supplied by a *port*, which implements
//! [`PortThreading`] (the critical section), [`PortTimer`] (the hardware
//! comparator), and [`PortDispatch`] (deferred invocation of handlers outside
//! interrupt context). The port forwards the comparator interrupt to
//! [`PortToKernel::timer_interrupt`].
//!
//! # Contexts
//!
//! Two execution contexts touch the alarm set: ordinary program context
//! (through [`Alarm`]'s methods) and the comparator's interrupt handler. They
//! exclude each other by *CPU Lock*, which masks the comparator interrupt.
//! Alarm handlers never run in interrupt context; the interrupt handler only
//! enqueues an [`AlarmHandler`] through [`PortDispatch::pend_dispatch`].
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

mod alarm;
mod error;
mod klock;
mod schedule;
pub mod time;
pub mod utils;


pub use self::{
    alarm::{Alarm, AlarmFn, AlarmHandler},
    error::*,
    schedule::{pending_count, pending_deadlines, AlarmGlobals, PendingDeadlines},
    time::AlarmDuration,
};

/// Unsigned integer type representing a hardware tick count.
pub type UTicks = u64;

/// The maximum number of alarms that can be pending at the same time.
pub const ALARM_CAPACITY: usize = 16;

/// Implemented by a port. Provides the critical section used to exclude the
/// comparator interrupt handler.
///
/// # Safety
///
/// CPU Lock must mask (at least) the comparator interrupt while it's active,
/// and [`Self::is_cpu_lock_active`] must report the state as seen by the
/// calling context.
pub unsafe trait PortThreading: Sized + Send + Sync + 'static {
    /// Disable the comparator interrupt (enter a CPU Lock state).
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel. CPU Lock must be inactive.
    unsafe fn enter_cpu_lock();

    /// Re-enable the comparator interrupt (leave a CPU Lock state).
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel. CPU Lock must be active.
    unsafe fn leave_cpu_lock();

    /// Enter a CPU Lock state and return `true` if the current context is not
    /// in a CPU Lock state. Return `false` otherwise.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel.
    unsafe fn try_enter_cpu_lock() -> bool {
        if Self::is_cpu_lock_active() {
            false
        } else {
            // Safety: CPU Lock inactive
            unsafe { Self::enter_cpu_lock() };
            true
        }
    }

    /// Return a flag indicating whether a CPU Lock state is active.
    fn is_cpu_lock_active() -> bool;
}

/// Implemented by a port. The hardware timer adapter.
///
/// All methods are non-blocking and callable from interrupt context. The
/// kernel only calls [`Self::arm`] and [`Self::disarm`] while CPU Lock is
/// active.
pub trait PortTimer {
    /// The number of ticks per second.
    const FREQUENCY: u64;

    /// Read the free-running counter. The value wraps around at 64 bits.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel.
    unsafe fn read_ticks() -> UTicks;

    /// Program the comparator with `deadline` and enable its interrupt.
    ///
    /// If `deadline` is already in the past, the interrupt must be raised as
    /// soon as possible.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel. CPU Lock active.
    unsafe fn arm(deadline: UTicks);

    /// Disable the comparator interrupt. The counter keeps running.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel. CPU Lock active.
    unsafe fn disarm();

    /// Clear the pending comparator interrupt flag.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel, from the comparator interrupt
    /// handler.
    unsafe fn acknowledge();
}

/// Implemented by a port. Deferred invocation of alarm handlers.
pub trait PortDispatch {
    /// Enqueue `handler` for invocation in a non-interrupt context.
    ///
    /// Called from interrupt context with CPU Lock inactive. Must not block
    /// or allocate.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the kernel.
    unsafe fn pend_dispatch(handler: AlarmHandler) -> Result<(), PendDispatchError>;
}

/// Represents a particular group of traits that a port should implement.
pub trait Port: PortThreading + PortTimer + PortDispatch {}

impl<T: PortThreading + PortTimer + PortDispatch> Port for T {}

/// Associates a port with the kernel state it drives. Usually implemented by
/// a port's instantiation macro.
///
/// # Safety
///
/// [`Self::state`] must always return the same instance, and no other
/// `AlarmGlobals<Self>` may be used. The alarm set holds raw pointers to
/// pinned alarms, and every alarm records its position in that one set.
///
/// A plain `impl` is rejected:
///
/// ```rust,compile_fail,E0200
/// # use hwalarm_kernel::*;
/// # struct Sys;
/// # unsafe impl PortThreading for Sys {
/// #     unsafe fn enter_cpu_lock() {}
/// #     unsafe fn leave_cpu_lock() {}
/// #     fn is_cpu_lock_active() -> bool { false }
/// # }
/// # impl PortTimer for Sys {
/// #     const FREQUENCY: u64 = 1;
/// #     unsafe fn read_ticks() -> UTicks { 0 }
/// #     unsafe fn arm(_: UTicks) {}
/// #     unsafe fn disarm() {}
/// #     unsafe fn acknowledge() {}
/// # }
/// # impl PortDispatch for Sys {
/// #     unsafe fn pend_dispatch(_: AlarmHandler) -> Result<(), PendDispatchError> { Ok(()) }
/// # }
/// impl KernelTraits for Sys {
///     fn state() -> &'static AlarmGlobals<Self> {
///         static STATE: AlarmGlobals<Sys> = AlarmGlobals::new();
///         &STATE
///     }
/// }
/// ```
pub unsafe trait KernelTraits: Port {
    /// Get the kernel state.
    fn state() -> &'static AlarmGlobals<Self>;
}

/// Methods intended to be called by a port.
///
/// This is automatically implemented by every [`KernelTraits`] type.
pub trait PortToKernel {
    /// Initialize the kernel state and put the comparator into a known
    /// (disarmed) state. Should be called once at boot time.
    ///
    /// # Safety
    ///
    /// CPU Lock inactive.
    unsafe fn init();

    /// Handle the comparator interrupt.
    ///
    /// # Safety
    ///
    /// CPU Lock inactive, an interrupt context. Must not be re-entered.
    unsafe fn timer_interrupt();
}

impl<Traits: KernelTraits> PortToKernel for Traits {
    unsafe fn init() {
        schedule::init::<Traits>();
    }

    unsafe fn timer_interrupt() {
        schedule::handle_interrupt::<Traits>();
    }
}
