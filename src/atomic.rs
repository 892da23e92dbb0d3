//! Fixed-width atomic integers with explicit memory ordering.
//!
//! The counters in this crate (the ring queue counters, task reference
//! counts, dependency counters) all go through [`AtomicCell`] rather than
//! touching `std::sync::atomic` directly, so that every ordering decision on
//! them is spelled out at the call site.
//!
//! The compare-exchange contract is load-bearing: on failure the *actual*
//! current value is written back into `expected`, which is what allows the
//! queue's retry loops to re-arm themselves with the observed value. Do not
//! change this to the `Result`-returning std shape without updating every
//! retry loop that relies on it.

use std::sync::atomic::{self, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Issues a sequentially-consistent fence across all threads.
#[inline]
pub fn full_fence() {
    atomic::fence(Ordering::SeqCst);
}

/// Integer types that can back an [`AtomicCell`].
pub trait Atom: Copy + Eq {
    #[doc(hidden)]
    type Repr;

    #[doc(hidden)]
    const ONE: Self;

    #[doc(hidden)]
    fn into_repr(value: Self) -> Self::Repr;
    #[doc(hidden)]
    fn load(repr: &Self::Repr, order: Ordering) -> Self;
    #[doc(hidden)]
    fn store(repr: &Self::Repr, value: Self, order: Ordering);
    #[doc(hidden)]
    fn compare_exchange(
        repr: &Self::Repr,
        current: Self,
        new: Self,
        success: Ordering,
        failure: Ordering,
    ) -> Result<Self, Self>;
    #[doc(hidden)]
    fn fetch_add(repr: &Self::Repr, value: Self) -> Self;
    #[doc(hidden)]
    fn fetch_sub(repr: &Self::Repr, value: Self) -> Self;
    #[doc(hidden)]
    fn fetch_and(repr: &Self::Repr, value: Self) -> Self;
    #[doc(hidden)]
    fn fetch_or(repr: &Self::Repr, value: Self) -> Self;
    #[doc(hidden)]
    fn wrapping_add(self, rhs: Self) -> Self;
    #[doc(hidden)]
    fn wrapping_sub(self, rhs: Self) -> Self;
}

macro_rules! impl_atom {
    ($int:ty, $repr:ty) => {
        impl Atom for $int {
            type Repr = $repr;

            const ONE: Self = 1;

            #[inline]
            fn into_repr(value: Self) -> Self::Repr {
                <$repr>::new(value)
            }

            #[inline]
            fn load(repr: &Self::Repr, order: Ordering) -> Self {
                repr.load(order)
            }

            #[inline]
            fn store(repr: &Self::Repr, value: Self, order: Ordering) {
                repr.store(value, order);
            }

            #[inline]
            fn compare_exchange(
                repr: &Self::Repr,
                current: Self,
                new: Self,
                success: Ordering,
                failure: Ordering,
            ) -> Result<Self, Self> {
                repr.compare_exchange(current, new, success, failure)
            }

            #[inline]
            fn fetch_add(repr: &Self::Repr, value: Self) -> Self {
                repr.fetch_add(value, Ordering::SeqCst)
            }

            #[inline]
            fn fetch_sub(repr: &Self::Repr, value: Self) -> Self {
                repr.fetch_sub(value, Ordering::SeqCst)
            }

            #[inline]
            fn fetch_and(repr: &Self::Repr, value: Self) -> Self {
                repr.fetch_and(value, Ordering::SeqCst)
            }

            #[inline]
            fn fetch_or(repr: &Self::Repr, value: Self) -> Self {
                repr.fetch_or(value, Ordering::SeqCst)
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$int>::wrapping_add(self, rhs)
            }

            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$int>::wrapping_sub(self, rhs)
            }
        }
    };
}

impl_atom!(u32, AtomicU32);
impl_atom!(u64, AtomicU64);
impl_atom!(usize, AtomicUsize);

/// A fixed-width atomic integer.
///
/// The read-modify-write operations (`fetch_*`, `increment`, `decrement`) are
/// always full barriers, matching the interlocked primitives the scheduler's
/// counter protocol was designed against. `load`, `store` and
/// `compare_exchange` take an explicit ordering.
pub struct AtomicCell<T: Atom> {
    value: T::Repr,
}

impl<T: Atom> AtomicCell<T> {
    pub fn new(value: T) -> Self {
        AtomicCell {
            value: T::into_repr(value),
        }
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> T {
        T::load(&self.value, order)
    }

    #[inline]
    pub fn store(&self, value: T, order: Ordering) {
        T::store(&self.value, value, order);
    }

    /// Atomically replaces the value with `desired` if it equals `*expected`.
    ///
    /// Returns `true` on success, leaving `expected` untouched. On failure
    /// `expected` is overwritten with the value actually observed and `false`
    /// is returned, so a retry loop can decide whether to re-arm or bail.
    #[inline]
    pub fn compare_exchange(&self, expected: &mut T, desired: T, order: Ordering) -> bool {
        match T::compare_exchange(&self.value, *expected, desired, order, failure_order(order)) {
            Ok(_) => true,
            Err(actual) => {
                *expected = actual;
                false
            }
        }
    }

    /// Atomically adds `value`, returning the previous value.
    #[inline]
    pub fn fetch_add(&self, value: T) -> T {
        T::fetch_add(&self.value, value)
    }

    /// Atomically subtracts `value`, returning the previous value.
    #[inline]
    pub fn fetch_sub(&self, value: T) -> T {
        T::fetch_sub(&self.value, value)
    }

    /// Atomically bitwise-ands with `value`, returning the previous value.
    #[inline]
    pub fn fetch_and(&self, value: T) -> T {
        T::fetch_and(&self.value, value)
    }

    /// Atomically bitwise-ors with `value`, returning the previous value.
    #[inline]
    pub fn fetch_or(&self, value: T) -> T {
        T::fetch_or(&self.value, value)
    }

    /// Atomically adds one, returning the *new* value.
    #[inline]
    pub fn increment(&self) -> T {
        self.fetch_add(T::ONE).wrapping_add(T::ONE)
    }

    /// Atomically subtracts one, returning the *new* value.
    #[inline]
    pub fn decrement(&self) -> T {
        self.fetch_sub(T::ONE).wrapping_sub(T::ONE)
    }
}

/// Picks a failure ordering compatible with the requested success ordering.
/// A failed compare-exchange performs only a load, so release semantics
/// degrade to relaxed.
#[inline]
fn failure_order(order: Ordering) -> Ordering {
    match order {
        Ordering::Relaxed | Ordering::Release => Ordering::Relaxed,
        Ordering::Acquire | Ordering::AcqRel => Ordering::Acquire,
        _ => Ordering::SeqCst,
    }
}
