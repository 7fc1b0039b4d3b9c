//! Manages pending alarms and drives the hardware comparator.
//!
//! # Alarm set
//!
//! Every pending [`Alarm`] is referenced by an [`AlarmRef`] in the *alarm
//! set*, an insertion-sorted array of at most [`ALARM_CAPACITY`] elements,
//! ordered by deadline. Alarms sharing a deadline fire in the order they were
//! inserted. Each alarm records its own index in the set (`Alarm::set_pos`),
//! which is kept up-to-date by [`AlarmSetCtx::on_move`] and allows removal
//! without a search.
//!
//! # Arming
//!
//! The comparator is always armed for the deadline of the first element, or
//! disarmed if the set is empty. Whenever the first element changes, the
//! comparator is rearmed by [`rearm`]. This happens while CPU Lock is still
//! held, so the interrupt handler never observes a comparator state that
//! disagrees with the set.
//!
//! # Firing
//!
//! The comparator interrupt is handled by [`handle_interrupt`]. It removes the
//! first alarm, re-inserts it with a new deadline if it's periodic, rearms the
//! comparator, and finally releases CPU Lock and hands the alarm's handler to
//! [`PortDispatch::pend_dispatch`]. Handlers never run in the interrupt
//! context.
//!
//! A periodic alarm's next deadline is computed from the tick count observed
//! in the interrupt handler, not from the previous deadline. Interrupt latency
//! therefore accumulates over periods.
//!
//! [`PortDispatch::pend_dispatch`]: crate::PortDispatch::pend_dispatch
use arrayvec::ArrayVec;
use core::{fmt, pin::Pin};

use crate::{
    alarm::{Alarm, AlarmHandler, AlarmPropToken, AlarmPropTokenRefMut, AlarmRef, SET_POS_NONE},
    error::{ActivateAlarmError, QueryAlarmError},
    klock::{lock_cpu, CpuLockCell, CpuLockTokenRefMut},
    utils::sorted_vec::{SortedVec, SortedVecCtx},
    KernelTraits, UTicks, ALARM_CAPACITY,
};

type AlarmSet<Traits> = ArrayVec<AlarmRef<Traits>, ALARM_CAPACITY>;

/// A snapshot of the deadlines of all pending alarms, in firing order.
pub type PendingDeadlines = ArrayVec<UTicks, ALARM_CAPACITY>;

/// The global state of the alarm scheduler. A port stores an instance of this
/// in a `static` and returns it from [`KernelTraits::state`].
pub struct AlarmGlobals<Traits: KernelTraits> {
    set_and_prop_token: CpuLockCell<Traits, AlarmSetAndPropToken<Traits>>,
}

struct AlarmSetAndPropToken<Traits: KernelTraits> {
    /// The alarm set, sorted by deadline.
    set: AlarmSet<Traits>,

    /// Unlocks the `AlarmPropCell`s in `Alarm`. Stored here so that it can be
    /// borrowed at the same time as `set`.
    prop_token: AlarmPropToken<Traits>,
}

impl<Traits: KernelTraits> AlarmGlobals<Traits> {
    pub const fn new() -> Self {
        Self {
            set_and_prop_token: CpuLockCell::new(AlarmSetAndPropToken {
                set: ArrayVec::new_const(),
                // Safety: The kernel only ever touches the instance returned by
                //         `KernelTraits::state`, which is unique per `Traits`.
                //         This is a safety requirement of `KernelTraits`.
                prop_token: unsafe { AlarmPropToken::new_unchecked() },
            }),
        }
    }
}

impl<Traits: KernelTraits> fmt::Debug for AlarmGlobals<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AlarmGlobals")
            .field(
                "pending_deadlines",
                &self.set_and_prop_token.debug_fmt_with_ref(|st, f| {
                    f.debug_list()
                        .entries(st.set.iter().map(|alarm_ref| {
                            // Safety: `alarm_ref` is in the set, so the
                            //         pointee is valid
                            let alarm = unsafe { alarm_ref.0.as_ref() };
                            *alarm.deadline.read(&st.prop_token)
                        }))
                        .finish()
                }),
            )
            .finish()
    }
}

/// Implements [`SortedVecCtx`] for the alarm set. Compares deadlines and keeps
/// `Alarm::set_pos` up-to-date.
struct AlarmSetCtx<'a, Traits: KernelTraits> {
    prop_token: AlarmPropTokenRefMut<'a, Traits>,
}

impl<Traits: KernelTraits> SortedVecCtx<AlarmRef<Traits>> for AlarmSetCtx<'_, Traits> {
    #[inline]
    fn lt(&mut self, x: &AlarmRef<Traits>, y: &AlarmRef<Traits>) -> bool {
        // Safety: `x` and `y` are in the set or being inserted, so the pointees
        //         are valid
        let (x, y) = unsafe { (x.0.as_ref(), y.0.as_ref()) };
        *x.deadline.read(&*self.prop_token) < *y.deadline.read(&*self.prop_token)
    }

    #[inline]
    fn on_move(&mut self, e: &mut AlarmRef<Traits>, new_index: usize) {
        // Safety: `e` is in the set, so the pointee is valid
        let alarm = unsafe { e.0.as_ref() };
        alarm.set_pos.replace(&mut *self.prop_token, new_index);
    }
}

/// Insert `alarm_ref` into `set`. `Alarm::deadline` must be set beforehand.
/// Returns the position of the inserted alarm, or `None` if `set` is full.
fn set_insert<Traits: KernelTraits>(
    set: &mut AlarmSet<Traits>,
    prop_token: &mut AlarmPropToken<Traits>,
    alarm_ref: AlarmRef<Traits>,
) -> Option<usize> {
    let pos = set
        .sorted_insert(
            alarm_ref,
            AlarmSetCtx {
                prop_token: prop_token.borrow_mut(),
            },
        )
        .ok()?;

    // Safety: `alarm_ref` is in the set now
    debug_assert_eq!(
        *unsafe { alarm_ref.0.as_ref() }.set_pos.read(prop_token),
        pos
    );

    Some(pos)
}

/// Get a flag indicating whether `alarm` is in the alarm set.
pub(super) fn is_pending<Traits: KernelTraits>(
    lock: CpuLockTokenRefMut<'_, Traits>,
    alarm: &Alarm<Traits>,
) -> bool {
    let prop_token = &Traits::state().set_and_prop_token.read(&*lock).prop_token;
    *alarm.set_pos.read(prop_token) != SET_POS_NONE
}

/// Get the deadline of `alarm` if it's in the alarm set.
pub(super) fn deadline_if_pending<Traits: KernelTraits>(
    lock: CpuLockTokenRefMut<'_, Traits>,
    alarm: &Alarm<Traits>,
) -> Option<UTicks> {
    let prop_token = &Traits::state().set_and_prop_token.read(&*lock).prop_token;
    (*alarm.set_pos.read(prop_token) != SET_POS_NONE).then(|| *alarm.deadline.read(prop_token))
}

/// Insert `alarm` into the alarm set with the specified deadline, and return
/// its position. Doesn't rearm the comparator; the caller should call
/// [`rearm`] if the returned position is `0`.
///
/// Fails with `CapacityExceeded` if the set is full, in which case nothing is
/// modified.
///
/// # Panics
///
/// `alarm` must not be in the set already.
pub(super) fn insert_alarm<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    alarm: Pin<&Alarm<Traits>>,
    deadline: UTicks,
) -> Result<usize, ActivateAlarmError> {
    let AlarmSetAndPropToken { set, prop_token } =
        Traits::state().set_and_prop_token.write(&mut *lock);

    assert_eq!(
        *alarm.set_pos.read(prop_token),
        SET_POS_NONE,
        "alarm is already pending"
    );

    if set.is_full() {
        log::trace!("alarm set is full; rejecting {:p}", alarm);
        return Err(ActivateAlarmError::CapacityExceeded);
    }

    alarm.deadline.replace(prop_token, deadline);

    // Pinning ensures the pointee outlives its membership in the set; `Drop`
    // removes it
    let alarm_ref = AlarmRef((&*alarm).into());
    let pos = set_insert(set, prop_token, alarm_ref)
        .ok_or(ActivateAlarmError::CapacityExceeded)?;

    log::trace!("inserted {:p} at {pos} (deadline = {deadline})", alarm);

    Ok(pos)
}

/// Remove `alarm` from the alarm set. Returns `false` if it wasn't in the set.
/// Doesn't rearm the comparator; the caller should call [`rearm`] if this
/// returns `true`.
pub(super) fn remove_alarm<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    alarm: &Alarm<Traits>,
) -> bool {
    let AlarmSetAndPropToken { set, prop_token } =
        Traits::state().set_and_prop_token.write(&mut *lock);

    let set_pos = *alarm.set_pos.read(prop_token);

    // `sorted_remove` returns `None` for `SET_POS_NONE`
    let Some(alarm_ref) = set.sorted_remove(
        set_pos,
        AlarmSetCtx {
            prop_token: prop_token.borrow_mut(),
        },
    ) else {
        debug_assert_eq!(set_pos, SET_POS_NONE);
        return false;
    };

    debug_assert_eq!(alarm_ref.0.as_ptr() as *const Alarm<Traits>, alarm as *const _);

    alarm.set_pos.replace(prop_token, SET_POS_NONE);

    log::trace!("removed {:p} from {set_pos}", alarm);

    true
}

/// Make the comparator's state reflect the first element of the alarm set.
///
/// The comparator is disarmed first so that a stale match can't be taken
/// between here and the next `arm`.
pub(super) fn rearm<Traits: KernelTraits>(lock: CpuLockTokenRefMut<'_, Traits>) {
    let AlarmSetAndPropToken { set, prop_token } =
        Traits::state().set_and_prop_token.read(&*lock);

    // Safety: CPU Lock active
    unsafe { Traits::disarm() };

    if let Some(alarm_ref) = set.first() {
        // Safety: `alarm_ref` is in the set, so the pointee is valid
        let deadline = *unsafe { alarm_ref.0.as_ref() }.deadline.read(prop_token);

        log::trace!("arming the comparator for {deadline}");

        // Safety: CPU Lock active
        unsafe { Traits::arm(deadline) };
    } else {
        log::trace!("no pending alarms; the comparator stays disarmed");
    }
}

/// Remove the first alarm if its deadline has been reached, and return its
/// handler. A periodic alarm is re-inserted with the deadline `now +
/// interval`.
///
/// Returns `None` if nothing fired (the set is empty, or the first deadline
/// is in the future). Returns `Some(None)` if an alarm fired but had no
/// handler to dispatch.
fn pop_due_alarm<Traits: KernelTraits>(
    mut lock: CpuLockTokenRefMut<'_, Traits>,
    now: UTicks,
) -> Option<Option<AlarmHandler>> {
    let g = Traits::state();

    let Some(&alarm_ref) = g.set_and_prop_token.read(&*lock).set.first() else {
        log::trace!("no pending alarms; ignoring the interrupt");
        return None;
    };

    // Safety: `alarm_ref` is in the set, so the pointee is valid. It stays
    //         valid while we are holding CPU Lock because `Alarm::drop` has
    //         to take CPU Lock to remove it.
    let alarm = unsafe { &*alarm_ref.0.as_ptr() };

    // Read the handler before `lock` is mutably borrowed by `write`
    let handler = alarm.handler.get(&*lock);

    let AlarmSetAndPropToken { set, prop_token } = g.set_and_prop_token.write(&mut *lock);

    let deadline = *alarm.deadline.read(prop_token);
    if deadline > now {
        // The interrupt was taken early, or the first alarm was replaced
        // after the interrupt was raised
        log::trace!("the first alarm isn't due yet ({deadline} > {now})");
        return None;
    }

    let removed = set.sorted_pop_front(AlarmSetCtx {
        prop_token: prop_token.borrow_mut(),
    });
    debug_assert!(removed.is_some());
    alarm.set_pos.replace(prop_token, SET_POS_NONE);

    if alarm.periodic {
        let next_deadline = now.wrapping_add(alarm.interval);
        alarm.deadline.replace(prop_token, next_deadline);

        // We just removed an element, so there's room for this
        if set_insert(set, prop_token, alarm_ref).is_none() {
            unreachable!("alarm set overflowed while re-inserting a periodic alarm");
        }

        log::trace!("{:p} fired at {now}, next deadline = {next_deadline}", alarm);
    } else {
        log::trace!("{:p} fired at {now}", alarm);
    }

    Some(handler)
}

/// Implements [`crate::PortToKernel::timer_interrupt`].
///
/// An interrupt taken before the first deadline fires nothing and only
/// rearms. This happens when the comparator was reprogrammed (e.g., the
/// alarm it was armed for was cancelled) after the interrupt had latched, and
/// must not be removed: popping anyway would fire the next alarm early.
pub(super) fn handle_interrupt<Traits: KernelTraits>() {
    // Safety: We are the comparator interrupt handler
    unsafe { Traits::acknowledge() };

    // The interrupt handler is entered with CPU Lock inactive
    let Ok(mut lock) = lock_cpu::<Traits>() else {
        unreachable!("the timer interrupt was taken with CPU Lock active");
    };

    // Safety: We are the kernel
    let now = unsafe { Traits::read_ticks() };

    let fired = pop_due_alarm(lock.borrow_mut(), now);

    rearm(lock.borrow_mut());

    // Release CPU Lock before handing over the handler
    drop(lock);

    if let Some(Some(handler)) = fired {
        // Safety: CPU Lock inactive
        if let Err(e) = unsafe { Traits::pend_dispatch(handler) } {
            log::warn!("dropping the firing of {:?}: {:?}", handler, e);
        }
    }
}

/// Implements [`crate::PortToKernel::init`].
pub(super) fn init<Traits: KernelTraits>() {
    let Ok(mut lock) = lock_cpu::<Traits>() else {
        unreachable!("the kernel was initialized with CPU Lock active");
    };

    // The comparator might hold a stale deadline from before a reset. If
    // alarms were activated during boot, this also arms it for them.
    rearm(lock.borrow_mut());
}

/// Get the number of pending alarms.
pub fn pending_count<Traits: KernelTraits>() -> Result<usize, QueryAlarmError> {
    let lock = lock_cpu::<Traits>()?;
    Ok(Traits::state().set_and_prop_token.read(&*lock).set.len())
}

/// Get the deadlines of all pending alarms in firing order.
pub fn pending_deadlines<Traits: KernelTraits>() -> Result<PendingDeadlines, QueryAlarmError> {
    let lock = lock_cpu::<Traits>()?;
    let AlarmSetAndPropToken { set, prop_token } =
        Traits::state().set_and_prop_token.read(&*lock);

    Ok(set
        .iter()
        .map(|alarm_ref| {
            // Safety: `alarm_ref` is in the set, so the pointee is valid
            *unsafe { alarm_ref.0.as_ref() }.deadline.read(prop_token)
        })
        .collect())
}
