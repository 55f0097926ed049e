//! `Transaction`: the backend-agnostic façade dispatched over [`Inner`], mirroring the
//! `Transactor`/`Inner` shape used to multiplex storage engines.

use crate::bytes::{Key, Val};
use crate::error::{SprintKey, Result};
use crate::keyselector::KeySelector;
use crate::kvs::options::{ConflictRangeType, MutationType, TransactionOption};
use crate::kvs::Check;
use tracing::instrument;

#[allow(clippy::large_enum_variant)]
pub(super) enum Inner {
	#[cfg(feature = "kv-mem")]
	Mem(super::mem::Transaction),
	#[cfg(feature = "kv-sled")]
	Sled(super::sled_backend::Transaction),
}

macro_rules! expand_inner {
	( $v:expr, $arm:pat_param => $b:block ) => {
		match $v {
			#[cfg(feature = "kv-mem")]
			Inner::Mem($arm) => $b,
			#[cfg(feature = "kv-sled")]
			Inner::Sled($arm) => $b,
		}
	};
}

/// A write-buffered, snapshot-isolated handle onto a backend.
///
/// Every write goes through the internal buffer first and is only visible to other transactions
/// once [`Transaction::commit`] succeeds; within this transaction, reads always observe its own
/// buffered writes (read-your-writes), unless [`TransactionOption::ReadYourWritesDisable`] is
/// set.
#[non_exhaustive]
pub struct Transaction {
	pub(super) inner: Inner,
	read_your_writes: bool,
}

impl Transaction {
	pub(super) fn new(inner: Inner) -> Self {
		Transaction {
			inner,
			read_your_writes: true,
		}
	}

	/// Governs Drop-time behaviour for a transaction that is neither committed nor cancelled.
	pub fn check_level(&mut self, check: Check) {
		expand_inner!(&mut self.inner, v => { v.check_level(check) })
	}

	pub fn closed(&self) -> bool {
		expand_inner!(&self.inner, v => { v.closed() })
	}

	pub fn writeable(&self) -> bool {
		expand_inner!(&self.inner, v => { v.writeable() })
	}

	/// Sets a per-transaction option. Recognized but backend-inert options (most of them, for
	/// the in-process backends here) are accepted and stored without effect beyond
	/// `ReadYourWritesDisable`, which this layer enforces directly.
	pub fn set_option(&mut self, option: TransactionOption) -> Result<()> {
		if option == TransactionOption::ReadYourWritesDisable {
			self.read_your_writes = false;
		}
		Ok(())
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::transaction", skip(self, key), fields(key = %SprintKey(key.as_ref())))]
	pub async fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Val>> {
		if !self.read_your_writes {
			return expand_inner!(&mut self.inner, v => { v.get_committed(key.as_ref()).await });
		}
		expand_inner!(&mut self.inner, v => { v.get(key.as_ref()).await })
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::transaction", skip(self, key, value))]
	pub async fn set(&mut self, key: impl Into<Key>, value: impl Into<Val>) -> Result<()> {
		expand_inner!(&mut self.inner, v => { v.set(key.into(), value.into()).await })
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::transaction", skip(self, key))]
	pub async fn clear(&mut self, key: impl Into<Key>) -> Result<()> {
		expand_inner!(&mut self.inner, v => { v.clear(key.into()).await })
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::transaction", skip(self, begin, end))]
	pub async fn clear_range(&mut self, begin: impl Into<Key>, end: impl Into<Key>) -> Result<()> {
		expand_inner!(&mut self.inner, v => { v.clear_range(begin.into(), end.into()).await })
	}

	/// Resolves `begin`/`end` as [`KeySelector`]s against the backend, returning up to `limit`
	/// pairs (`0` means unlimited) in forward or reverse iteration order.
	#[instrument(level = "trace", target = "tuplekv::kvs::transaction", skip(self, begin, end))]
	pub async fn get_range(
		&mut self,
		begin: &KeySelector,
		end: &KeySelector,
		limit: usize,
		reverse: bool,
	) -> Result<Vec<(Key, Val)>> {
		expand_inner!(&mut self.inner, v => { v.get_range(begin, end, limit, reverse).await })
	}

	/// Convenience wrapper over [`Transaction::get_range`] for a plain half-open byte range.
	pub async fn get_range_bytes(
		&mut self,
		begin: impl Into<Key>,
		end: impl Into<Key>,
		limit: usize,
		reverse: bool,
	) -> Result<Vec<(Key, Val)>> {
		let begin = KeySelector::first_greater_or_equal(begin.into());
		let end = KeySelector::first_greater_or_equal(end.into());
		self.get_range(&begin, &end, limit, reverse).await
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::transaction", skip(self, key, param))]
	pub async fn atomic_op(
		&mut self,
		key: impl Into<Key>,
		op: MutationType,
		param: impl Into<Val>,
	) -> Result<()> {
		expand_inner!(&mut self.inner, v => { v.atomic_op(key.into(), op, param.into()).await })
	}

	/// The 10-byte versionstamp assigned at commit. `None` before commit, or if this
	/// transaction never queued a versionstamped mutation.
	pub fn get_versionstamp(&self) -> Option<[u8; 10]> {
		expand_inner!(&self.inner, v => { v.get_versionstamp() })
	}

	/// Resolves `selector` to the nearest actual key, or an empty key if it falls past the end
	/// of the key space.
	#[instrument(level = "trace", target = "tuplekv::kvs::transaction", skip(self, selector))]
	pub async fn get_key(&mut self, selector: &KeySelector) -> Result<Key> {
		expand_inner!(&mut self.inner, v => { v.get_key(selector).await })
	}

	/// The logical version this transaction's reads are consistent with.
	pub fn get_read_version(&self) -> Result<i64> {
		expand_inner!(&self.inner, v => { v.get_read_version() })
	}

	/// Requests that this transaction read as of `version`. Inert on both backends here: neither
	/// keeps multiple historical versions around, so the request is accepted and ignored rather
	/// than rejected.
	pub fn set_read_version(&mut self, version: i64) -> Result<()> {
		expand_inner!(&mut self.inner, v => { v.set_read_version(version) })
	}

	/// The version assigned at commit. `None` before commit.
	pub fn get_committed_version(&self) -> Result<Option<i64>> {
		expand_inner!(&self.inner, v => { v.get_committed_version() })
	}

	/// Declares that this transaction's correctness depends on `[begin, end)` not having changed
	/// (or, for `kind == Write`, not being written to by a concurrent transaction). Accepted and
	/// discarded by both backends here — see [`ConflictRangeType`].
	pub fn add_conflict_range(
		&mut self,
		begin: impl Into<Key>,
		end: impl Into<Key>,
		kind: ConflictRangeType,
	) -> Result<()> {
		expand_inner!(&mut self.inner, v => { v.add_conflict_range(begin.into(), end.into(), kind) })
	}

	/// A best-effort estimate of the on-disk size, in bytes, of `[begin, end)`.
	pub async fn get_estimated_range_size_bytes(
		&mut self,
		begin: impl Into<Key>,
		end: impl Into<Key>,
	) -> Result<i64> {
		expand_inner!(&mut self.inner, v => { v.get_estimated_range_size_bytes(begin.into(), end.into()).await })
	}

	/// Key boundaries splitting `[begin, end)` into chunks of roughly `chunk_size` bytes each.
	pub async fn get_range_split_points(
		&mut self,
		begin: impl Into<Key>,
		end: impl Into<Key>,
		chunk_size: i64,
	) -> Result<Vec<Key>> {
		expand_inner!(&mut self.inner, v => { v.get_range_split_points(begin.into(), end.into(), chunk_size).await })
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::transaction", skip(self))]
	pub async fn commit(&mut self) -> Result<()> {
		expand_inner!(&mut self.inner, v => { v.commit().await })
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::transaction", skip(self))]
	pub async fn cancel(&mut self) -> Result<()> {
		expand_inner!(&mut self.inner, v => { v.cancel().await })
	}
}
