//! Generic container for sensitive values (credentials, tokens, keys).
//!
//! A [`SecureCell`] serializes its value into locked, read-only memory that
//! is kept out of swap and core dumps, wipes the intermediate plaintext
//! before construction returns, and zeroes the protected pages exactly once
//! when the cell is destroyed or dropped.
//!
//! ```
//! use secret_cell::SecureCell;
//!
//! let password = SecureCell::<String>::new("correct horse battery staple".into())?;
//!
//! assert_eq!(password.to_string(), "[SECRET]");
//! assert_eq!(password.expose()?, "correct horse battery staple");
//!
//! password.destroy()?;
//! assert!(password.expose().is_err());
//! # Ok::<(), secret_cell::Error>(())
//! ```
//!
//! This narrows the window in which a secret is exposed; it does not
//! protect against an attacker that can already read the process memory.

pub mod alloc;
mod cell;
pub mod codec;
mod enclave;
mod error;
mod interrupt;
mod registry;

pub use cell::{SecureCell, REDACTED};
pub use codec::{Bincode, Codec};
pub use enclave::Enclave;
pub use error::{Error, InvalidAccess};
pub use interrupt::catch_interrupt;
pub use registry::purge;
