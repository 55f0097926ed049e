//! The closed error taxonomy shared by every layer of this crate.
//!
//! Backends translate their native failures into this enum at the boundary (see
//! [`crate::kvs::mem`] and [`crate::kvs::sled_backend`]); callers never see a backend-specific
//! error type.

use std::fmt;

/// The single error type returned by every fallible operation in this crate.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The transaction conflicted with another transaction's writes and should be retried.
	#[error("transaction conflict")]
	TransactionConflict,

	/// A retry loop exhausted its attempt budget without committing.
	#[error("transaction too old, retry limit exceeded")]
	TransactionTooOld,

	/// The requested key does not exist.
	#[error("key not found")]
	KeyNotFound,

	/// The operation is not valid in the transaction's current state, or an unsupported option
	/// or atomic operation was requested.
	#[error("invalid operation: {0}")]
	InvalidOperation(String),

	/// The transaction was already committed or cancelled.
	#[error("transaction already finished")]
	TxFinished,

	/// An error surfaced by the underlying storage backend that does not map cleanly onto a
	/// more specific variant.
	#[error("backend error: {0}")]
	BackendError(String),

	/// The tuple decoder reached the end of the buffer before a well-formed element finished.
	#[error("unexpected end of data")]
	UnexpectedEndOfData,

	/// A tuple type-code byte did not match any known variant.
	#[error("invalid type code: {0:#04x}")]
	InvalidTypeCode(u8),

	/// A decoded integer did not fit the target width.
	#[error("integer overflow")]
	IntegerOverflow,

	/// A decoded byte string was not valid UTF-8 where a `String` element was expected.
	#[error("invalid utf-8 in string element")]
	InvalidUtf8,

	/// [`crate::bytes::strinc`] was called with a key made entirely of `0xFF` bytes (or empty).
	#[error("cannot increment key: no strict upper bound exists")]
	CannotIncrementKey,

	/// A [`crate::subspace::Subspace::unpack`] call was given a key outside the subspace.
	#[error("key does not start with the subspace prefix")]
	PrefixMismatch,
}

impl Error {
	/// Whether a caller may reasonably retry the operation that produced this error.
	///
	/// This is the single predicate [`crate::kvs::engine::Engine::with_transaction`] uses to
	/// decide whether to loop again or propagate.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Error::TransactionConflict | Error::TransactionTooOld)
	}
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A lightweight formatter for keys in trace/warn log lines, mirroring the teacher's
/// `Sprintable` helper without dragging in a full hex-dump dependency.
pub(crate) struct SprintKey<'a>(pub &'a [u8]);

impl fmt::Display for SprintKey<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for b in self.0 {
			if b.is_ascii_graphic() {
				write!(f, "{}", *b as char)?;
			} else {
				write!(f, "\\x{b:02x}")?;
			}
		}
		Ok(())
	}
}
