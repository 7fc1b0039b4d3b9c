//! CPU Lock, the critical section shared with the comparator interrupt
//!
//! CPU Lock masks the comparator interrupt. While it's active, the current
//! context has exclusive access to:
//!
//!  - the alarm set (`AlarmGlobals`) and each alarm's handler;
//!  - the comparator itself. `PortTimer::arm` and `PortTimer::disarm` are only
//!    called with CPU Lock active, so a `disarm` + `arm` pair is never split
//!    by the interrupt handler.
//!
//! The state is stored in [`CpuLockCell`]s, which can only be accessed with a
//! [`CpuLockToken`]. The only way to get a token is [`lock_cpu`], so the
//! compiler checks that nothing touches the state outside the critical
//! section.
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::{error::BadContextError, PortThreading};

pub(super) struct CpuLockTag<Traits>(Traits);

/// Proof that CPU Lock is active. Owned by [`CpuLockGuard`].
pub(super) type CpuLockToken<Traits> = tokenlock::UnsyncSingletonToken<CpuLockTag<Traits>>;

/// A borrowed [`CpuLockToken`], passed down to the functions that operate on
/// the alarm set. Unlike `&mut CpuLockGuard`, this is not reborrowed
/// implicitly; call `borrow_mut` to pass it on.
pub(super) type CpuLockTokenRefMut<'a, Traits> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, CpuLockTag<Traits>>;

type CpuLockKeyhole<Traits> = tokenlock::SingletonTokenId<CpuLockTag<Traits>>;

/// State that may only be accessed with CPU Lock active.
pub(super) struct CpuLockCell<Traits, T>(UnsyncTokenLock<T, CpuLockKeyhole<Traits>>);

impl<Traits, T> CpuLockCell<Traits, T> {
    pub(super) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::new(), x))
    }

    #[inline]
    pub(super) fn read<'a>(&'a self, token: &'a CpuLockToken<Traits>) -> &'a T {
        self.0.read(token)
    }

    #[inline]
    pub(super) fn write<'a>(&'a self, token: &'a mut CpuLockToken<Traits>) -> &'a mut T {
        self.0.write(token)
    }

    #[inline]
    pub(super) fn get(&self, token: &CpuLockToken<Traits>) -> T
    where
        T: Copy,
    {
        *self.read(token)
    }

    #[inline]
    pub(super) fn replace(&self, token: &mut CpuLockToken<Traits>, x: T) -> T {
        core::mem::replace(self.write(token), x)
    }
}

impl<Traits: PortThreading, T> CpuLockCell<Traits, T> {
    /// Return a debug formatting proxy that formats the contents with `f`.
    ///
    /// Formatting takes CPU Lock, so it prints `< locked >` if the caller
    /// is already in the critical section (e.g., inside a port callback).
    pub(super) fn debug_fmt_with_ref<'a, F: 'a + Fn(&T, &mut fmt::Formatter) -> fmt::Result>(
        &'a self,
        f: F,
    ) -> impl fmt::Debug + 'a {
        struct DebugFmtWithRef<'a, Traits, T, F> {
            cell: &'a CpuLockCell<Traits, T>,
            f: F,
        }

        impl<Traits: PortThreading, T, F: Fn(&T, &mut fmt::Formatter) -> fmt::Result> fmt::Debug
            for DebugFmtWithRef<'_, Traits, T, F>
        {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match lock_cpu::<Traits>() {
                    Ok(lock) => (self.f)(self.cell.read(&lock), f),
                    Err(_) => f.write_str("< locked >"),
                }
            }
        }

        DebugFmtWithRef { cell: self, f }
    }
}

impl<Traits: PortThreading, T: fmt::Debug> fmt::Debug for CpuLockCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.debug_fmt_with_ref(|x, f| x.fmt(f)).fmt(f)
    }
}

/// Enter CPU Lock and get an RAII guard that leaves it on drop.
///
/// Fails with `BadContext` if CPU Lock is already active. Kernel operations
/// never nest, so this means the caller is inside a critical section that it
/// entered by some other means, and the operation is refused rather than
/// deadlocking or unmasking the interrupt early.
pub(super) fn lock_cpu<Traits: PortThreading>() -> Result<CpuLockGuard<Traits>, BadContextError> {
    // Safety: We are the kernel
    if !unsafe { Traits::try_enter_cpu_lock() } {
        return Err(BadContextError::BadContext);
    }

    debug_assert!(Traits::is_cpu_lock_active());

    Ok(CpuLockGuard {
        // Safety: We just entered CPU Lock, so no other `CpuLockGuard` (and
        //         therefore no other token) exists
        token: unsafe { CpuLockToken::new_unchecked() },
    })
}

/// RAII guard for CPU Lock. Derefs to [`CpuLockToken`].
pub(super) struct CpuLockGuard<Traits: PortThreading> {
    token: CpuLockToken<Traits>,
}

impl<Traits: PortThreading> CpuLockGuard<Traits> {
    pub(super) fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_, Traits> {
        self.token.borrow_mut()
    }
}

impl<Traits: PortThreading> Drop for CpuLockGuard<Traits> {
    fn drop(&mut self) {
        // Safety: CPU Lock is active, and it was entered by `lock_cpu`
        unsafe { Traits::leave_cpu_lock() };
    }
}

impl<Traits: PortThreading> ops::Deref for CpuLockGuard<Traits> {
    type Target = CpuLockToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: PortThreading> ops::DerefMut for CpuLockGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}
