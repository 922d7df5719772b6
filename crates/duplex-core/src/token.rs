//! Ownership tokens for references parked inside a channel
//!
//! A descriptor in flight is stored in the ring as a raw 8-byte handle.
//! `OwnershipToken` is the only type allowed to produce or consume such a
//! handle: `mint` gives up one strong reference, `redeem` takes it back.
//! Each minted reference is redeemed exactly once; a token dropped without
//! being redeemed releases its reference.
//!
//! # Invariant
//!
//! A raw handle fed to `from_raw` must come from `into_raw` on a token of
//! the same `T` and must not be used again afterwards. The ring stores
//! handles as plain bytes, so the type system cannot check this; the
//! channel enforces it by consuming every handle record exactly once.

use core::fmt;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;
use std::sync::Arc;

/// One strong `Arc<T>` reference detached from any owner
pub struct OwnershipToken<T> {
    ptr: NonNull<T>,
    _owns: PhantomData<Arc<T>>,
}

// Safety: the token owns one strong count of an Arc<T>
unsafe impl<T: Send + Sync> Send for OwnershipToken<T> {}
unsafe impl<T: Send + Sync> Sync for OwnershipToken<T> {}

impl<T> OwnershipToken<T> {
    /// Detach one reference from `value`
    pub fn mint(value: Arc<T>) -> Self {
        let raw = Arc::into_raw(value) as *mut T;
        // Safety: Arc::into_raw never returns null
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        Self { ptr, _owns: PhantomData }
    }

    /// Turn the token back into a live reference
    pub fn redeem(self) -> Arc<T> {
        let this = ManuallyDrop::new(self);
        // Safety: ptr came from Arc::into_raw in `mint` and is consumed once
        unsafe { Arc::from_raw(this.ptr.as_ptr()) }
    }

    /// Raw handle this token will encode to, without giving up ownership
    #[inline]
    pub fn handle(&self) -> u64 {
        self.ptr.as_ptr() as usize as u64
    }

    /// Encode the token as a raw handle for storage in the ring
    pub fn into_raw(self) -> u64 {
        let this = ManuallyDrop::new(self);
        this.ptr.as_ptr() as usize as u64
    }

    /// Rebuild a token from a handle produced by `into_raw`.
    ///
    /// # Safety
    ///
    /// `raw` must come from `OwnershipToken::<T>::into_raw` and must not
    /// have been passed to `from_raw` before.
    pub unsafe fn from_raw(raw: u64) -> Self {
        Self {
            ptr: NonNull::new_unchecked(raw as usize as *mut T),
            _owns: PhantomData,
        }
    }

    /// Borrow the referenced value without changing ownership
    pub fn get(&self) -> &T {
        // Safety: the token keeps the allocation alive
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> Drop for OwnershipToken<T> {
    fn drop(&mut self) {
        // Safety: an unredeemed token still owns its strong count
        unsafe { drop(Arc::from_raw(self.ptr.as_ptr())) }
    }
}

impl<T> fmt::Debug for OwnershipToken<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnershipToken").field(&self.ptr).finish()
    }
}
