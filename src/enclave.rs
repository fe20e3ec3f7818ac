use std::io;

use crate::alloc::{LockedMemory, PlatformAllocator, SealedMemory, SecretAllocator};

/// A sealed memory region holding the bytes of exactly one secret.
///
/// The bytes are copied into freshly allocated locked pages which are then
/// made read-only. They stay there until [`Enclave::destroy`] is called or
/// the enclave is dropped, at which point the pages are zeroed and handed
/// back to the system.
pub struct Enclave<A: SecretAllocator = PlatformAllocator> {
    memory: SealedMemory<A>,
}

impl<A: SecretAllocator + Default> Enclave<A> {
    /// Copies `bytes` into a new enclave.
    ///
    /// The caller remains responsible for wiping its own copy of `bytes`.
    pub fn new(bytes: &[u8]) -> io::Result<Self> {
        Self::new_in(bytes, A::default())
    }
}

impl<A: SecretAllocator> Enclave<A> {
    /// Copies `bytes` into a new enclave backed by `allocator`.
    pub fn new_in(bytes: &[u8], allocator: A) -> io::Result<Self> {
        let mut memory = LockedMemory::with_length_in(bytes.len(), allocator)?;
        memory.as_bytes_mut().copy_from_slice(bytes);

        Ok(Self {
            memory: memory.into_read_only()?,
        })
    }

    /// Number of protected bytes.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    /// Returns `true` if the enclave protects no bytes.
    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Read-only view of the protected bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.memory.as_bytes()
    }

    /// Overwrites the protected bytes with zeros and releases the pages.
    ///
    /// The enclave is gone even when an error is returned.
    pub fn destroy(self) -> io::Result<()> {
        self.memory.release()
    }
}
