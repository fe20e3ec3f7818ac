use core::{fmt, marker::PhantomData};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{de::DeserializeOwned, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    alloc::{self, PlatformAllocator, SecretAllocator},
    codec::{Bincode, Codec},
    enclave::Enclave,
    error::{Error, InvalidAccess},
    registry,
};

/// Text rendered in place of a secret by `Display` and `Debug`.
pub const REDACTED: &str = "[SECRET]";

/// Shared state of a cell: its enclave, or `None` once released.
pub(crate) type Slot = Mutex<Option<Enclave>>;

pub(crate) fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<Enclave>> {
    // Nothing can leave the slot half-updated, so a poisoned lock is still usable.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A secure container for one secret value.
///
/// The value is serialized with `C` into locked, read-only memory and the
/// intermediate plaintext is wiped before construction returns. The cell
/// never stores a `T`, only the protected bytes, so it is `Send + Sync`
/// whatever `T` is.
///
/// A cell is either live or released. It is released by [`destroy`],
/// by [`purge`](crate::purge), or when it is dropped; the protected pages
/// are zeroed and unmapped at that point and every later [`expose`] fails
/// with [`InvalidAccess::Destroyed`].
///
/// Formatting a cell with `{}` or `{:?}` always prints `[SECRET]`.
///
/// The value passed to [`new`] is dropped without being wiped, since the
/// cell cannot reach memory owned by the caller. Use [`from_mut`] when the
/// source can be zeroized in place.
///
/// [`new`]: SecureCell::new
/// [`from_mut`]: SecureCell::from_mut
/// [`expose`]: SecureCell::expose
/// [`destroy`]: SecureCell::destroy
pub struct SecureCell<T, C = Bincode> {
    slot: Arc<Slot>,
    _marker: PhantomData<fn() -> (T, C)>,
}

impl<T, C> SecureCell<T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Seals `value` into a new cell.
    ///
    /// # Errors
    /// - [`Error::SerializationFailed`] if `C` cannot encode the value.
    /// - [`Error::ProtectionFailed`] if locked memory cannot be obtained.
    ///
    /// In both cases nothing stays allocated and the plaintext buffer has
    /// already been wiped.
    pub fn new(value: T) -> Result<Self, Error> {
        Self::from_ref(&value)
    }

    /// Seals `*value` into a new cell, then zeroizes `*value` whether or
    /// not sealing succeeded.
    pub fn from_mut(value: &mut T) -> Result<Self, Error>
    where
        T: Zeroize,
    {
        let cell = Self::from_ref(value);
        value.zeroize();
        cell
    }

    fn from_ref(value: &T) -> Result<Self, Error> {
        let mut plaintext = Vec::new();
        let enclave = seal::<T, C, _>(value, &mut plaintext, PlatformAllocator::default())?;

        let slot = Arc::new(Mutex::new(Some(enclave)));
        registry::register(&slot);

        Ok(Self {
            slot,
            _marker: PhantomData,
        })
    }

    /// Decodes and returns a copy of the secret.
    ///
    /// **Every call leaves a new, unprotected copy of the secret in
    /// ordinary memory.** Wiping it is the caller's job; see
    /// [`expose_zeroizing`](SecureCell::expose_zeroizing) for types that
    /// can do it themselves. The cell is left untouched.
    ///
    /// # Errors
    /// [`Error::InvalidAccess`] if the cell has been released or its bytes
    /// no longer decode. Either means the calling code has a lifecycle bug.
    pub fn expose(&self) -> Result<T, Error> {
        let slot = lock_slot(&self.slot);

        let Some(enclave) = slot.as_ref() else {
            log::error!("attempted to expose a destroyed secret");
            return Err(InvalidAccess::Destroyed.into());
        };

        C::decode(enclave.as_bytes()).map_err(|_| {
            log::error!("protected secret bytes failed to decode");
            InvalidAccess::Corrupted.into()
        })
    }

    /// Like [`expose`](SecureCell::expose), but the copy is zeroized when
    /// the returned wrapper is dropped.
    pub fn expose_zeroizing(&self) -> Result<Zeroizing<T>, Error>
    where
        T: Zeroize,
    {
        self.expose().map(Zeroizing::new)
    }
}

impl<T, C> SecureCell<T, C> {
    /// Zeroes and releases the protected memory.
    ///
    /// Waits for in-flight [`expose`](SecureCell::expose) calls. Destroying
    /// a released cell is a no-op that returns `Ok(())`.
    ///
    /// # Errors
    /// [`Error::ProtectionFailed`] if the OS refused to release the pages.
    /// The cell is released regardless.
    pub fn destroy(&self) -> Result<(), Error> {
        let mut slot = lock_slot(&self.slot);
        release(&mut *slot)
    }

    /// Returns `true` once the cell has been destroyed, purged or has
    /// failed to release. A released cell never becomes live again.
    pub fn is_destroyed(&self) -> bool {
        lock_slot(&self.slot).is_none()
    }
}

impl<T, C> Drop for SecureCell<T, C> {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            log::warn!("failed to destroy secret on drop: {err}");
        }
    }
}

impl<T, C> fmt::Display for SecureCell<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T, C> fmt::Debug for SecureCell<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Empties `slot`, zeroing and releasing its enclave if there is one.
///
/// The slot is `None` afterwards even when the OS reports an error.
pub(crate) fn release<A: SecretAllocator>(slot: &mut Option<Enclave<A>>) -> Result<(), Error> {
    match slot.take() {
        Some(enclave) => enclave.destroy().map_err(Error::from),
        None => Ok(()),
    }
}

/// Wipes the borrowed buffer when dropped, including on unwind.
struct WipeOnDrop<'a>(&'a mut Vec<u8>);

impl Drop for WipeOnDrop<'_> {
    fn drop(&mut self) {
        alloc::wipe_vec(self.0);
    }
}

/// Encodes `value` into `plaintext`, copies it into a new enclave and
/// wipes `plaintext` on every exit path.
fn seal<T, C, A>(value: &T, plaintext: &mut Vec<u8>, allocator: A) -> Result<Enclave<A>, Error>
where
    T: Serialize + ?Sized,
    C: Codec,
    A: SecretAllocator,
{
    let mut plaintext = WipeOnDrop(plaintext);

    C::encode_into(value, &mut *plaintext.0).map_err(|_| Error::SerializationFailed)?;
    Ok(Enclave::new_in(plaintext.0.as_slice(), allocator)?)
}
