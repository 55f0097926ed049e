//! The Transaction Core: write-buffered, snapshot-isolated transactions over one of the
//! backends below, dispatched through [`transaction::Transaction`].

pub mod engine;
#[cfg(feature = "kv-mem")]
pub mod mem;
pub mod mutation;
pub mod options;
#[cfg(feature = "kv-sled")]
pub mod sled_backend;
pub mod transaction;
pub mod writeop;

pub use engine::Engine;
pub use options::{ConflictRangeType, DatabaseOptions, MutationType, StreamingMode, TransactionOption};
pub use transaction::Transaction;
pub use writeop::WriteOp;

/// A transaction's lifecycle state. Committed and cancelled are both terminal but distinct:
/// re-committing a cancelled transaction is an error, while re-committing or re-cancelling an
/// already-committed (or already-cancelled) one is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TxState {
	Active,
	Committed,
	Cancelled,
}

impl TxState {
	pub(crate) fn is_active(self) -> bool {
		self == TxState::Active
	}
}

/// Governs what happens when a writable transaction is dropped without being committed or
/// cancelled.
#[derive(Default, Clone, Copy)]
pub enum Check {
	/// Silently trace the occurrence.
	#[default]
	None,
	/// Log a warning.
	Warn,
	/// Panic, capturing a backtrace in debug builds. The default in debug builds, so bugs that
	/// leak unterminated transactions fail loudly in development and tests.
	Panic,
}
