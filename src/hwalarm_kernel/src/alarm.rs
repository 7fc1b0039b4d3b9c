//! Alarms
use core::{fmt, marker::PhantomPinned, pin::Pin, ptr::NonNull};

use crate::{
    error::{ActivateAlarmError, CancelAlarmError, CreateAlarmError, QueryAlarmError},
    klock::{lock_cpu, CpuLockCell},
    schedule,
    time::AlarmDuration,
    KernelTraits, UTicks,
};

// ---------------------------------------------------------------------------
// Define a singleton token type to allow the mutable access to `Alarm::{
// deadline, set_pos}`.

pub(super) struct AlarmPropTag<Traits>(Traits);

/// The key that "unlocks" [`AlarmPropCell`].
pub(super) type AlarmPropToken<Traits> = tokenlock::UnsyncSingletonToken<AlarmPropTag<Traits>>;
pub(super) type AlarmPropTokenRefMut<'a, Traits> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, AlarmPropTag<Traits>>;

/// The keyhole type for [`UnsyncTokenLock`] that can be "unlocked" by
/// [`AlarmPropToken`].
///
/// [`UnsyncTokenLock`]: tokenlock::UnsyncTokenLock
type AlarmPropKeyhole<Traits> = tokenlock::SingletonTokenId<AlarmPropTag<Traits>>;

/// Cell type that can be accessed by [`AlarmPropToken`] (which is stored
/// next to the alarm set and can be obtained by [`lock_cpu`]).
pub(super) type AlarmPropCell<Traits, T> = tokenlock::UnsyncTokenLock<T, AlarmPropKeyhole<Traits>>;

// ---------------------------------------------------------------------------

/// The entry point of an alarm handler.
pub type AlarmFn = fn(usize);

/// The payload handed over to [`PortDispatch::pend_dispatch`] each time an
/// alarm fires. It's copied out of the [`Alarm`], so the port can hold on to
/// it for as long as it likes.
///
/// [`PortDispatch::pend_dispatch`]: crate::PortDispatch::pend_dispatch
#[derive(Debug, Clone, Copy)]
pub struct AlarmHandler {
    /// The function to call.
    pub entry_point: AlarmFn,
    /// The parameter supplied for `entry_point`.
    pub param: usize,
}

impl AlarmHandler {
    /// Call the handler. Ports call this from their dispatch context.
    #[inline]
    pub fn call(self) {
        (self.entry_point)(self.param)
    }
}

/// Value of [`Alarm::set_pos`] indicating the alarm is not pending.
pub(super) const SET_POS_NONE: usize = usize::MAX;

/// An alarm.
///
/// `Alarm` is a `!Unpin` type. Once activated by [`Self::activate`], the
/// alarm set holds a pointer to it, so it must stay in the same memory
/// location until it's cancelled. This is guaranteed by requiring
/// `Pin<&Self>` for activation. Dropping an `Alarm` cancels it.
///
/// The possible states are:
///
///  - **Inactive**: the initial state. Also entered when a one-shot alarm
///    fires, and by [`Self::cancel`] or by `activate(None, _)`.
///  - **Pending**: the alarm is a member of the alarm set and will fire at its
///    deadline. A periodic alarm stays in this state when it fires; it's
///    re-inserted with a new deadline.
///
/// # Examples
///
/// ```rust,ignore
/// static BLINK: Alarm<SystemTraits> = Alarm::new(500_000, true);
///
/// fn toggle_led(_: usize) { /* ... */ }
///
/// Pin::static_ref(&BLINK).activate(Some(toggle_led), 0)?;
/// ```
pub struct Alarm<Traits: KernelTraits> {
    /// The absolute tick count at which the alarm fires. Only meaningful
    /// while the alarm is pending.
    ///
    /// This is wrapped by `AlarmPropCell` because the alarm set's comparator
    /// needs to access this while the set is mutably borrowed. Otherwise, this
    /// would have been [`CpuLockCell`]`<Traits, _>`.
    pub(super) deadline: AlarmPropCell<Traits, UTicks>,

    /// The position of this alarm in the alarm set.
    ///
    /// Similarly to [`Self::deadline`], this is wrapped by `AlarmPropCell`
    /// only because the set's `on_move` callback needs to update this.
    ///
    /// [`SET_POS_NONE`] indicates this alarm is not included in the set.
    pub(super) set_pos: AlarmPropCell<Traits, usize>,

    /// The duration after which the alarm fires, counted from activation (or
    /// from the previous firing if `periodic` is set). Never zero.
    pub(super) interval: UTicks,

    pub(super) periodic: bool,

    /// The handler to invoke on expiration. `None` iff the alarm has never
    /// been activated or was deactivated by `activate(None, _)`.
    pub(super) handler: CpuLockCell<Traits, Option<AlarmHandler>>,

    /// Un-implement `Unpin`.
    _pin: PhantomPinned,
}

impl<Traits: KernelTraits> Alarm<Traits> {
    /// Construct an inactive `Alarm` that fires `interval` ticks after
    /// activation (and every `interval` ticks afterwards if `periodic` is
    /// set).
    ///
    /// This is a `const fn` so that alarms can be placed in `static`s.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero. Use [`Self::try_new`] to get an error
    /// instead.
    pub const fn new(interval: UTicks, periodic: bool) -> Self {
        assert!(interval != 0, "`interval` must be non-zero");
        Self {
            deadline: AlarmPropCell::new(AlarmPropKeyhole::new(), 0),
            set_pos: AlarmPropCell::new(AlarmPropKeyhole::new(), SET_POS_NONE),
            interval,
            periodic,
            handler: CpuLockCell::new(None),
            _pin: PhantomPinned,
        }
    }

    /// Construct an inactive `Alarm`, failing with `InvalidDuration` if
    /// `interval` is zero.
    pub fn try_new(interval: UTicks, periodic: bool) -> Result<Self, CreateAlarmError> {
        if interval == 0 {
            Err(CreateAlarmError::InvalidDuration)
        } else {
            Ok(Self::new(interval, periodic))
        }
    }

    /// Construct an inactive `Alarm` from a duration expressed in seconds,
    /// milliseconds, or microseconds. The duration is converted to ticks
    /// using [`PortTimer::FREQUENCY`].
    ///
    /// [`PortTimer::FREQUENCY`]: crate::PortTimer::FREQUENCY
    pub fn from_duration(
        duration: AlarmDuration,
        periodic: bool,
    ) -> Result<Self, CreateAlarmError> {
        Self::try_new(duration.to_ticks(Traits::FREQUENCY)?, periodic)
    }

    /// Get the interval in ticks.
    #[inline]
    pub fn interval(&self) -> UTicks {
        self.interval
    }

    /// Get a flag indicating whether the alarm re-arms itself on expiration.
    #[inline]
    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    /// Set the handler and make the alarm pending.
    ///
    /// If `handler` is `None`, the alarm is deactivated: it's removed from
    /// the alarm set if it's pending, and its handler is cleared.
    ///
    /// Otherwise, if the alarm is not pending yet, it's scheduled to fire
    /// [`Self::interval`] ticks from now. If the alarm is already pending, only
    /// the handler is replaced, and the deadline is left intact.
    ///
    /// Fails with `CapacityExceeded` (leaving everything, including the
    /// previous handler, unchanged) if the alarm set is full.
    pub fn activate(
        self: Pin<&Self>,
        handler: Option<AlarmFn>,
        param: usize,
    ) -> Result<(), ActivateAlarmError> {
        let mut lock = lock_cpu::<Traits>()?;

        let Some(entry_point) = handler else {
            if schedule::remove_alarm(lock.borrow_mut(), &self) {
                schedule::rearm(lock.borrow_mut());
            }
            self.handler.replace(&mut *lock, None);
            return Ok(());
        };

        if !schedule::is_pending(lock.borrow_mut(), &self) {
            // Safety: We are the kernel
            let now = unsafe { Traits::read_ticks() };
            let deadline = now.wrapping_add(self.interval);

            let pos = schedule::insert_alarm(lock.borrow_mut(), self, deadline)?;

            if pos == 0 {
                // The new alarm is the earliest one
                schedule::rearm(lock.borrow_mut());
            }
        }

        self.handler
            .replace(&mut *lock, Some(AlarmHandler { entry_point, param }));

        Ok(())
    }

    /// Make the alarm inactive. Does nothing if it's not pending.
    ///
    /// A firing that has already been handed over to the dispatcher is not
    /// retracted.
    pub fn cancel(&self) -> Result<(), CancelAlarmError> {
        let mut lock = lock_cpu::<Traits>()?;
        if schedule::remove_alarm(lock.borrow_mut(), self) {
            schedule::rearm(lock.borrow_mut());
        }
        Ok(())
    }

    /// Get a flag indicating whether the alarm is pending.
    pub fn is_active(&self) -> Result<bool, QueryAlarmError> {
        let mut lock = lock_cpu::<Traits>()?;
        Ok(schedule::is_pending(lock.borrow_mut(), self))
    }

    /// Get the number of ticks remaining until the alarm fires, or `None` if
    /// it's not pending. Returns `Some(0)` if the deadline has passed but the
    /// interrupt hasn't been handled yet.
    pub fn ticks_until_fire(&self) -> Result<Option<UTicks>, QueryAlarmError> {
        let mut lock = lock_cpu::<Traits>()?;
        let Some(deadline) = schedule::deadline_if_pending(lock.borrow_mut(), self) else {
            return Ok(None);
        };

        // Safety: We are the kernel
        let now = unsafe { Traits::read_ticks() };
        Ok(Some(deadline.saturating_sub(now)))
    }
}

impl<Traits: KernelTraits> Drop for Alarm<Traits> {
    #[inline]
    fn drop(&mut self) {
        if let Ok(mut lock) = lock_cpu::<Traits>() {
            if schedule::remove_alarm(lock.borrow_mut(), self) {
                schedule::rearm(lock.borrow_mut());
            }
        } else if *self.set_pos.get_mut() != SET_POS_NONE {
            // The alarm is still in the set, and we can't take CPU Lock to
            // remove it because the caller is already holding it. Dropping
            // `self` now would leave a dangling pointer in the set.
            panic!("alarm is still pending");
        }
    }
}

impl<Traits: KernelTraits> fmt::Debug for Alarm<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Alarm")
            .field("self", &(self as *const _))
            .field("interval", &self.interval)
            .field("periodic", &self.periodic)
            .field("handler", &self.handler)
            .finish()
    }
}

/// A reference to an [`Alarm`], stored in the alarm set.
pub(super) struct AlarmRef<Traits: KernelTraits>(pub(super) NonNull<Alarm<Traits>>);

// Safety: `Alarm` is `Send + Sync`, and the pointee is only accessed with CPU
//         Lock active
unsafe impl<Traits: KernelTraits> Send for AlarmRef<Traits> {}
unsafe impl<Traits: KernelTraits> Sync for AlarmRef<Traits> {}

impl<Traits: KernelTraits> Clone for AlarmRef<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits: KernelTraits> Copy for AlarmRef<Traits> {}

impl<Traits: KernelTraits> fmt::Debug for AlarmRef<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("AlarmRef").field(&self.0).finish()
    }
}
