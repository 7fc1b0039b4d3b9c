//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only so that ports and tests can reuse the containers the kernel is built
//! on.
pub mod sorted_vec;
