//! The option, streaming-mode, and atomic-mutation enumerations of the external contract (§6).

/// Options that apply to an [`crate::kvs::engine::Engine`] as a whole, inherited by every
/// transaction it creates unless overridden.
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct DatabaseOptions {
	/// Maximum number of attempts `with_transaction` makes before raising `TransactionTooOld`.
	pub transaction_retry_limit: Option<i32>,
}

/// Per-transaction options, set with [`crate::kvs::transaction::Transaction::set_option`].
///
/// Unknown/unsupported combinations are rejected with `Error::InvalidOperation` at the call
/// site; backends that cannot honor a recognized option still accept it and treat it as inert.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum TransactionOption {
	/// Milliseconds after which reads on this transaction start failing with a retryable error.
	Timeout(i64),
	/// Treat this transaction as low priority; default-priority transactions go first.
	PriorityBatch,
	/// Treat this transaction as highest priority.
	PrioritySystemImmediate,
	ReadPriorityLow,
	ReadPriorityHigh,
	/// Allow this transaction to read/write keys in the reserved `0xFF`-prefixed range.
	AccessSystemKeys,
	/// Ask the backing store not to cache pages touched by this transaction's reads.
	ReadServerSideCacheDisable,
	/// Disable read-your-writes for this transaction; reads go straight to the snapshot.
	ReadYourWritesDisable,
	/// The next write performed will not generate a write-conflict range (unused by the
	/// in-process backends here, which have no conflict ranges, but accepted as inert).
	NextWriteNoWriteConflictRange,
}

/// Hints describing how eagerly a range scan should be materialized. Both backends in this
/// crate ignore streaming mode (ranges are always materialized eagerly) but accept and store it
/// so callers written against a streaming backend still compile and run correctly here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum StreamingMode {
	WantAll,
	Iterator,
	Exact,
	Small,
	Medium,
	Large,
	Serial,
}

impl Default for StreamingMode {
	fn default() -> Self {
		StreamingMode::Iterator
	}
}

/// An atomic read-modify-write mutation, applied by
/// [`crate::kvs::transaction::Transaction::atomic_op`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum MutationType {
	/// Little-endian integer addition; the shorter of existing value/param is zero-extended.
	Add,
	BitAnd,
	BitOr,
	BitXor,
	/// Little-endian numeric comparison; the larger value is stored.
	Max,
	/// Little-endian numeric comparison; the smaller value is stored.
	Min,
	/// Lexicographic comparison; the smaller byte string is stored.
	ByteMin,
	/// Lexicographic comparison; the larger byte string is stored.
	ByteMax,
	/// Appends the parameter to the existing value if the result fits under the size limit.
	AppendIfFits,
	/// Clears the key if its current value equals the parameter.
	CompareAndClear,
	/// Splices the transaction's post-commit versionstamp into the key at the offset encoded in
	/// the key's trailing 4 little-endian bytes, then sets that key to `param`.
	SetVersionstampedKey,
	/// Splices the versionstamp into `param` at the offset encoded in its trailing 4 little-endian
	/// bytes, then sets `key` to the result.
	SetVersionstampedValue,
}

/// The maximum size, in bytes, a value may grow to via [`MutationType::AppendIfFits`].
pub const APPEND_IF_FITS_LIMIT: usize = 100_000;

/// Which conflict set [`crate::kvs::transaction::Transaction::add_conflict_range`] adds to.
///
/// Neither backend in this crate performs native conflict detection (the engine serializes
/// writers instead, see [`crate::kvs::engine::Engine::create_transaction`]), so this is accepted
/// and recorded but never consulted — the documented inert concession for a method a backend
/// cannot honor (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictRangeType {
	Read,
	Write,
}
