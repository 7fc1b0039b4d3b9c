use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use hwalarm_kernel::ResultCode;
            /// assert_eq!(ResultCode::CapacityExceeded.as_str(), "CapacityExceeded");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }

        impl fmt::Display for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the alarm operations can
    /// return.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// The duration is zero, negative, or was specified in more than one
        /// unit (or none).
        InvalidDuration = -17,
        /// The current context disallows the operation. Usually this means
        /// CPU Lock is already active in the calling context.
        BadContext = -25,
        /// The alarm set is full; [`ALARM_CAPACITY`] alarms are already
        /// pending.
        ///
        /// [`ALARM_CAPACITY`]: crate::ALARM_CAPACITY
        CapacityExceeded = -33,
        /// The deferred dispatch queue is full.
        QueueOverflow = -43,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }
    };
}

define_error! {
    mod create_alarm_error {}
    /// Error type for [`Alarm::try_new`] and [`AlarmDuration::from_parts`].
    ///
    /// [`Alarm::try_new`]: crate::Alarm::try_new
    /// [`AlarmDuration::from_parts`]: crate::AlarmDuration::from_parts
    pub enum CreateAlarmError {
        /// The duration is zero or not representable, or it was specified in
        /// more than one unit (or none).
        InvalidDuration,
    }
}

define_error! {
    mod activate_alarm_error {}
    /// Error type for [`Alarm::activate`].
    ///
    /// [`Alarm::activate`]: crate::Alarm::activate
    pub enum ActivateAlarmError {
        /// CPU Lock is active.
        BadContext,
        /// The alarm is not pending and the alarm set is full. The operation
        /// had no side effects.
        CapacityExceeded,
    }
}

define_error! {
    mod cancel_alarm_error {}
    /// Error type for [`Alarm::cancel`].
    ///
    /// [`Alarm::cancel`]: crate::Alarm::cancel
    pub enum CancelAlarmError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod query_alarm_error {}
    /// Error type for the query operations such as [`Alarm::is_active`] and
    /// [`pending_count`].
    ///
    /// [`Alarm::is_active`]: crate::Alarm::is_active
    /// [`pending_count`]: crate::pending_count
    pub enum QueryAlarmError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod pend_dispatch_error {}
    /// Error type for [`PortDispatch::pend_dispatch`].
    ///
    /// [`PortDispatch::pend_dispatch`]: crate::PortDispatch::pend_dispatch
    pub enum PendDispatchError {
        /// The dispatch queue is full. The firing is dropped.
        QueueOverflow,
    }
}

/// `BadContext`. Returned by [`lock_cpu`] and converted into every error type
/// that can report it.
///
/// [`lock_cpu`]: crate::klock::lock_cpu
#[repr(i8)]
#[derive(PartialEq, Eq, Copy, Clone)]
pub(super) enum BadContextError {
    BadContext = ResultCode::BadContext as _,
}

impl fmt::Debug for BadContextError {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        ResultCode::from(*self).fmt(f)
    }
}

impl From<BadContextError> for ResultCode {
    #[inline]
    fn from(x: BadContextError) -> Self {
        match x {
            BadContextError::BadContext => Self::BadContext,
        }
    }
}

macro_rules! impl_from_bad_context {
    ( $( $Supererror:ty ),* $(,)* ) => {
        $(
            impl From<BadContextError> for $Supererror {
                #[inline]
                fn from(x: BadContextError) -> Self {
                    match x {
                        BadContextError::BadContext => Self::BadContext,
                    }
                }
            }
        )*
    };
}

impl_from_bad_context!(ActivateAlarmError, CancelAlarmError, QueryAlarmError);
