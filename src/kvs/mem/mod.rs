#![cfg(feature = "kv-mem")]
//! The in-memory backend: a `BTreeMap` guarded by an async mutex, used as both the default
//! backend and the reference implementation of exact [`crate::keyselector::KeySelector`]
//! resolution (the "materialize-and-merge" strategy, applied against the full key space).

use crate::bytes::{Key, Val};
use crate::error::{Error, Result};
use crate::keyselector::{resolve_range, KeySelector};
use crate::kvs::mutation::apply as apply_mutation;
use crate::kvs::options::{ConflictRangeType, MutationType};
use crate::kvs::writeop::{apply_ops, resolve_versionstamps, WriteOp};
use crate::kvs::{Check, TxState};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{instrument, trace, warn};

const TARGET: &str = "tuplekv::kvs::mem";

#[non_exhaustive]
pub struct Datastore {
	data: Arc<Mutex<BTreeMap<Key, Val>>>,
	write_lock: Arc<Mutex<()>>,
	version_counter: Arc<AtomicU64>,
}

#[non_exhaustive]
pub struct Transaction {
	state: TxState,
	write: bool,
	check: Check,
	data: Arc<Mutex<BTreeMap<Key, Val>>>,
	/// Snapshot captured at transaction start; reads never see writes committed by other
	/// transactions after this point.
	snapshot: BTreeMap<Key, Val>,
	buffer: Vec<WriteOp>,
	version_counter: Arc<AtomicU64>,
	/// The version counter's value at transaction start, stood in for a real MVCC read version.
	read_version: i64,
	assigned_versionstamp: Option<[u8; 10]>,
	/// Held for the transaction's lifetime when writable, serializing writers at the engine
	/// level; the backend itself performs no conflict detection.
	_write_guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for Transaction {
	fn drop(&mut self) {
		if self.state.is_active() && self.write {
			if std::thread::panicking() {
				return;
			}
			match self.check {
				Check::None => {
					trace!(target: TARGET, "a transaction was dropped without being committed or cancelled");
				}
				Check::Warn => {
					warn!(target: TARGET, "a transaction was dropped without being committed or cancelled");
				}
				Check::Panic => {
					#[cfg(debug_assertions)]
					{
						let backtrace = std::backtrace::Backtrace::force_capture();
						if let std::backtrace::BacktraceStatus::Captured = backtrace.status() {
							println!("{backtrace}");
						}
					}
					panic!("a transaction was dropped without being committed or cancelled");
				}
			}
		}
	}
}

impl Datastore {
	pub fn new() -> Self {
		Datastore {
			data: Arc::new(Mutex::new(BTreeMap::new())),
			write_lock: Arc::new(Mutex::new(())),
			version_counter: Arc::new(AtomicU64::new(0)),
		}
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::mem", skip(self))]
	pub async fn transaction(&self, write: bool) -> Result<Transaction> {
		let write_guard = if write {
			Some(Arc::clone(&self.write_lock).lock_owned().await)
		} else {
			None
		};
		let snapshot = self.data.lock().await.clone();
		#[cfg(not(debug_assertions))]
		let check = Check::Warn;
		#[cfg(debug_assertions)]
		let check = Check::Panic;
		Ok(Transaction {
			state: TxState::Active,
			write,
			check,
			data: Arc::clone(&self.data),
			snapshot,
			buffer: Vec::new(),
			version_counter: Arc::clone(&self.version_counter),
			read_version: self.version_counter.load(AtomicOrdering::SeqCst) as i64,
			assigned_versionstamp: None,
			_write_guard: write_guard,
		})
	}
}

impl Default for Datastore {
	fn default() -> Self {
		Self::new()
	}
}

impl Transaction {
	pub fn check_level(&mut self, check: Check) {
		self.check = check;
	}

	pub fn closed(&self) -> bool {
		!self.state.is_active()
	}

	pub fn writeable(&self) -> bool {
		self.write
	}

	fn require_open(&self) -> Result<()> {
		if !self.state.is_active() {
			return Err(Error::TxFinished);
		}
		Ok(())
	}

	/// Cancelling an already-committed or already-cancelled transaction is a no-op.
	#[instrument(level = "trace", target = "tuplekv::kvs::mem", skip(self))]
	pub async fn cancel(&mut self) -> Result<()> {
		if !self.state.is_active() {
			return Ok(());
		}
		self.state = TxState::Cancelled;
		self.buffer.clear();
		self._write_guard = None;
		Ok(())
	}

	/// Committing an already-committed transaction is a no-op; committing a cancelled one fails.
	#[instrument(level = "trace", target = "tuplekv::kvs::mem", skip(self))]
	pub async fn commit(&mut self) -> Result<()> {
		match self.state {
			TxState::Committed => return Ok(()),
			TxState::Cancelled => {
				return Err(Error::InvalidOperation("transaction was already cancelled".into()))
			}
			TxState::Active => {}
		}
		if !self.write {
			return Err(Error::InvalidOperation("read-only transactions cannot commit writes".into()));
		}
		self.state = TxState::Committed;
		let needs_stamp =
			self.buffer.iter().any(|op| {
				matches!(op, WriteOp::SetVersionstampedKey(..) | WriteOp::SetVersionstampedValue(..))
			});
		let buffer = if needs_stamp {
			let stamp = self.next_versionstamp();
			self.assigned_versionstamp = Some(stamp);
			resolve_versionstamps(std::mem::take(&mut self.buffer), stamp)
		} else {
			std::mem::take(&mut self.buffer)
		};
		let mut data = self.data.lock().await;
		apply_ops(&mut data, &buffer);
		drop(data);
		self._write_guard = None;
		Ok(())
	}

	fn next_versionstamp(&self) -> [u8; 10] {
		let v = self.version_counter.fetch_add(1, AtomicOrdering::SeqCst);
		let mut stamp = [0u8; 10];
		stamp[..8].copy_from_slice(&v.to_be_bytes());
		stamp
	}

	/// The versionstamp assigned at commit, or `None` before commit or for a transaction that
	/// never used a versionstamped mutation.
	pub fn get_versionstamp(&self) -> Option<[u8; 10]> {
		self.assigned_versionstamp
	}

	/// The logical version this transaction reads as-of: the store's version counter at the
	/// moment the snapshot was captured.
	pub fn get_read_version(&self) -> Result<i64> {
		Ok(self.read_version)
	}

	/// Inert here: this backend has no concept of reading as of an arbitrary past version, so the
	/// request is accepted and ignored rather than rejected.
	pub fn set_read_version(&mut self, _version: i64) -> Result<()> {
		Ok(())
	}

	/// The version assigned at commit, derived from the high 8 bytes of the versionstamp. `None`
	/// before commit.
	pub fn get_committed_version(&self) -> Result<Option<i64>> {
		Ok(self.assigned_versionstamp.map(|stamp| {
			let mut buf = [0u8; 8];
			buf.copy_from_slice(&stamp[..8]);
			i64::from_be_bytes(buf)
		}))
	}

	/// No native conflict-range tracking exists for this backend (the engine serializes writers
	/// instead); accepted and discarded.
	pub fn add_conflict_range(&mut self, _begin: Vec<u8>, _end: Vec<u8>, _kind: ConflictRangeType) -> Result<()> {
		self.require_open()?;
		Ok(())
	}

	/// Resolves `selector` to the nearest actual key in the effective (snapshot + buffer) view,
	/// or an empty key if the resolved position falls past the end of the key space.
	#[instrument(level = "trace", target = "tuplekv::kvs::mem", skip(self))]
	pub async fn get_key(&mut self, selector: &KeySelector) -> Result<Key> {
		self.require_open()?;
		let view = self.effective();
		let keys: Vec<Vec<u8>> = view.keys().cloned().collect();
		let idx = selector.resolve(&keys);
		Ok(keys.get(idx).cloned().unwrap_or_default())
	}

	/// The sum of key and value lengths over `[begin, end)` in the effective view. Exact for
	/// this backend since the whole key space is already materialized per transaction.
	pub async fn get_estimated_range_size_bytes(&mut self, begin: Vec<u8>, end: Vec<u8>) -> Result<i64> {
		self.require_open()?;
		let view = self.effective();
		let size: usize =
			view.range(begin..end).map(|(k, v)| k.len() + v.len()).sum();
		Ok(size as i64)
	}

	/// Evenly spaced split points over `[begin, end)`, each chunk holding roughly `chunk_size`
	/// bytes of key+value data.
	pub async fn get_range_split_points(&mut self, begin: Vec<u8>, end: Vec<u8>, chunk_size: i64) -> Result<Vec<Key>> {
		self.require_open()?;
		if chunk_size <= 0 {
			return Ok(Vec::new());
		}
		let view = self.effective();
		let mut points = Vec::new();
		let mut running = 0i64;
		for (k, v) in view.range(begin..end) {
			running += (k.len() + v.len()) as i64;
			if running >= chunk_size {
				points.push(k.clone());
				running = 0;
			}
		}
		Ok(points)
	}

	/// Builds the effective view (snapshot merged with this transaction's own writes so far).
	fn effective(&self) -> BTreeMap<Key, Val> {
		let mut view = self.snapshot.clone();
		apply_ops(&mut view, &self.buffer);
		view
	}

	/// Scans the buffer in reverse insertion order for the most recent write to `key`,
	/// implementing read-your-writes without rebuilding the whole effective view.
	fn buffered_value(&self, key: &[u8]) -> Option<Option<Val>> {
		for op in self.buffer.iter().rev() {
			match op {
				WriteOp::Set(k, v) if k == key => return Some(Some(v.clone())),
				WriteOp::Clear(k) if k == key => return Some(None),
				WriteOp::ClearRange(begin, end) if key >= begin.as_slice() && key < end.as_slice() => {
					return Some(None)
				}
				_ => {}
			}
		}
		None
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::mem", skip(self, key))]
	pub async fn get(&mut self, key: &[u8]) -> Result<Option<Val>> {
		self.require_open()?;
		if let Some(v) = self.buffered_value(key) {
			return Ok(v);
		}
		Ok(self.snapshot.get(key).cloned())
	}

	/// Reads the snapshot directly, ignoring this transaction's own buffered writes.
	pub async fn get_committed(&mut self, key: &[u8]) -> Result<Option<Val>> {
		self.require_open()?;
		Ok(self.snapshot.get(key).cloned())
	}

	/// A no-op once this transaction has reached a terminal state, rather than an error: only
	/// lifecycle operations and reads are expected to notice a transaction is finished.
	#[instrument(level = "trace", target = "tuplekv::kvs::mem", skip(self, key, value))]
	pub async fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
		if !self.write {
			return Err(Error::InvalidOperation("transaction is read-only".into()));
		}
		if !self.state.is_active() {
			return Ok(());
		}
		self.buffer.push(WriteOp::Set(key, value));
		Ok(())
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::mem", skip(self, key))]
	pub async fn clear(&mut self, key: Vec<u8>) -> Result<()> {
		if !self.write {
			return Err(Error::InvalidOperation("transaction is read-only".into()));
		}
		if !self.state.is_active() {
			return Ok(());
		}
		self.buffer.push(WriteOp::Clear(key));
		Ok(())
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::mem", skip(self))]
	pub async fn clear_range(&mut self, begin: Vec<u8>, end: Vec<u8>) -> Result<()> {
		if !self.write {
			return Err(Error::InvalidOperation("transaction is read-only".into()));
		}
		if !self.state.is_active() {
			return Ok(());
		}
		self.buffer.push(WriteOp::ClearRange(begin, end));
		Ok(())
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::mem", skip(self))]
	pub async fn get_range(
		&mut self,
		begin: &KeySelector,
		end: &KeySelector,
		limit: usize,
		reverse: bool,
	) -> Result<Vec<(Key, Val)>> {
		self.require_open()?;
		let view = self.effective();
		let keys: Vec<Vec<u8>> = view.keys().cloned().collect();
		let indices = resolve_range(&keys, begin, end, limit, reverse);
		Ok(indices
			.into_iter()
			.map(|i| {
				let k = &keys[i];
				(k.clone(), view.get(k).cloned().expect("index came from view.keys()"))
			})
			.collect())
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::mem", skip(self, key, param))]
	pub async fn atomic_op(&mut self, key: Vec<u8>, op: MutationType, param: Vec<u8>) -> Result<()> {
		if !self.write {
			return Err(Error::InvalidOperation("transaction is read-only".into()));
		}
		if !self.state.is_active() {
			return Ok(());
		}
		match op {
			MutationType::SetVersionstampedKey => {
				self.buffer.push(WriteOp::SetVersionstampedKey(key, param));
				return Ok(());
			}
			MutationType::SetVersionstampedValue => {
				self.buffer.push(WriteOp::SetVersionstampedValue(key, param));
				return Ok(());
			}
			_ => {}
		}
		let existing = self.get(&key).await?;
		match apply_mutation(existing.as_deref(), op, &param)? {
			Some(new_value) => self.set(key, new_value).await,
			None => self.clear(key).await,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn last_write_wins_within_a_transaction() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		tx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
		tx.set(b"a".to_vec(), b"2".to_vec()).await.unwrap();
		assert_eq!(tx.get(b"a").await.unwrap(), Some(b"2".to_vec()));
		tx.commit().await.unwrap();

		let mut tx2 = ds.transaction(false).await.unwrap();
		assert_eq!(tx2.get(b"a").await.unwrap(), Some(b"2".to_vec()));
	}

	#[tokio::test]
	async fn reads_do_not_see_writes_from_other_committed_transactions_started_later() {
		let ds = Datastore::new();
		let mut reader = ds.transaction(false).await.unwrap();
		let mut writer = ds.transaction(true).await.unwrap();
		writer.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
		writer.commit().await.unwrap();
		assert_eq!(reader.get(b"a").await.unwrap(), None);
	}

	#[tokio::test]
	async fn cancel_discards_the_buffer() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		tx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
		tx.cancel().await.unwrap();

		let mut check = ds.transaction(false).await.unwrap();
		assert_eq!(check.get(b"a").await.unwrap(), None);
	}

	#[tokio::test]
	async fn clear_range_boundary_is_half_open() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		for k in ["a", "b", "c"] {
			tx.set(k.as_bytes().to_vec(), b"v".to_vec()).await.unwrap();
		}
		tx.clear_range(b"a".to_vec(), b"c".to_vec()).await.unwrap();
		tx.commit().await.unwrap();

		let mut check = ds.transaction(false).await.unwrap();
		assert_eq!(check.get(b"a").await.unwrap(), None);
		assert_eq!(check.get(b"b").await.unwrap(), None);
		assert_eq!(check.get(b"c").await.unwrap(), Some(b"v".to_vec()));
	}

	#[tokio::test]
	async fn reverse_range_with_limit_returns_the_highest_keys_first() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		for k in ["1", "2", "3", "4"] {
			tx.set(k.as_bytes().to_vec(), k.as_bytes().to_vec()).await.unwrap();
		}
		let pairs = tx
			.get_range(
				&KeySelector::first_greater_or_equal(b"0".to_vec()),
				&KeySelector::first_greater_or_equal(b"9".to_vec()),
				2,
				true,
			)
			.await
			.unwrap();
		assert_eq!(pairs, vec![(b"4".to_vec(), b"4".to_vec()), (b"3".to_vec(), b"3".to_vec())]);
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn atomic_add_is_little_endian() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		tx.set(b"counter".to_vec(), 5u32.to_le_bytes().to_vec()).await.unwrap();
		tx.atomic_op(b"counter".to_vec(), MutationType::Add, 3u32.to_le_bytes().to_vec())
			.await
			.unwrap();
		let value = tx.get(b"counter").await.unwrap().unwrap();
		assert_eq!(u32::from_le_bytes(value.try_into().unwrap()), 8);
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn set_versionstamped_key_is_invisible_until_commit_then_resolved() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		let mut template = b"prefix/".to_vec();
		template.extend_from_slice(&[0u8; 10]);
		let offset = 7u32;
		template.extend_from_slice(&offset.to_le_bytes());
		tx.atomic_op(template, MutationType::SetVersionstampedKey, b"value".to_vec()).await.unwrap();
		assert!(tx.get_range(
			&KeySelector::first_greater_or_equal(b"prefix/".to_vec()),
			&KeySelector::first_greater_or_equal(b"prefix0".to_vec()),
			0,
			false
		)
		.await
		.unwrap()
		.is_empty());
		tx.commit().await.unwrap();
		assert!(tx.get_versionstamp().is_some());

		let mut check = ds.transaction(false).await.unwrap();
		let pairs = check
			.get_range(
				&KeySelector::first_greater_or_equal(b"prefix/".to_vec()),
				&KeySelector::first_greater_or_equal(b"prefix0".to_vec()),
				0,
				false,
			)
			.await
			.unwrap();
		assert_eq!(pairs.len(), 1);
		assert_eq!(&pairs[0].0[..7], b"prefix/");
	}

	#[tokio::test]
	async fn commit_then_cancel_is_a_no_op() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		tx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
		tx.commit().await.unwrap();
		tx.cancel().await.unwrap();

		let mut check = ds.transaction(false).await.unwrap();
		assert_eq!(check.get(b"a").await.unwrap(), Some(b"1".to_vec()));
	}

	#[tokio::test]
	async fn cancel_then_commit_raises_invalid_operation() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		tx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
		tx.cancel().await.unwrap();
		assert!(matches!(tx.commit().await, Err(Error::InvalidOperation(_))));
	}

	#[tokio::test]
	async fn double_commit_is_a_no_op() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		tx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
		tx.commit().await.unwrap();
		tx.commit().await.unwrap();

		let mut check = ds.transaction(false).await.unwrap();
		assert_eq!(check.get(b"a").await.unwrap(), Some(b"1".to_vec()));
	}

	#[tokio::test]
	async fn double_cancel_is_a_no_op() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		tx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
		tx.cancel().await.unwrap();
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn writes_after_cancel_are_silently_discarded() {
		let ds = Datastore::new();
		let mut tx = ds.transaction(true).await.unwrap();
		tx.cancel().await.unwrap();
		tx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
		tx.clear(b"b".to_vec()).await.unwrap();
		tx.clear_range(b"c".to_vec(), b"d".to_vec()).await.unwrap();
		tx.atomic_op(b"e".to_vec(), MutationType::Add, 1u32.to_le_bytes().to_vec()).await.unwrap();
	}
}
