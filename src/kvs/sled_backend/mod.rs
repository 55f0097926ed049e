#![cfg(feature = "kv-sled")]
//! The `sled`-backed on-disk backend.
//!
//! Unlike [`crate::kvs::mem`], this backend never materializes the whole key space: reads go
//! straight to the live `sled::Tree` (safe because the engine serializes writers, so nothing
//! else can mutate the store mid-transaction) merged with this transaction's own buffer, and
//! range scans approximate the four canonical [`KeySelector`] shapes directly against sled's
//! native range query rather than resolving offsets against a fully listed key sequence — the
//! documented concession for backends that cannot cheaply list every key.

use crate::bytes::{Key, Val};
use crate::error::{Error, Result};
use crate::keyselector::KeySelector;
use crate::kvs::mutation::apply as apply_mutation;
use crate::kvs::options::{ConflictRangeType, MutationType};
use crate::kvs::writeop::{apply_ops, resolve_versionstamps, WriteOp};
use crate::kvs::{Check, TxState};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{instrument, trace, warn};

const TARGET: &str = "tuplekv::kvs::sled";

#[non_exhaustive]
pub struct Datastore {
	db: sled::Db,
	write_lock: Arc<Mutex<()>>,
	version_counter: Arc<AtomicU64>,
	_tempdir: Option<tempfile::TempDir>,
}

#[non_exhaustive]
pub struct Transaction {
	state: TxState,
	write: bool,
	check: Check,
	db: sled::Db,
	buffer: Vec<WriteOp>,
	version_counter: Arc<AtomicU64>,
	read_version: i64,
	assigned_versionstamp: Option<[u8; 10]>,
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
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let db = sled::open(path).map_err(|e| Error::BackendError(e.to_string()))?;
		Ok(Datastore {
			db,
			write_lock: Arc::new(Mutex::new(())),
			version_counter: Arc::new(AtomicU64::new(0)),
			_tempdir: None,
		})
	}

	/// Opens a backend rooted in a fresh temporary directory, removed when the returned
	/// `Datastore` is dropped. Useful for tests and short-lived processes.
	pub fn temporary() -> Result<Self> {
		let dir = tempfile::tempdir().map_err(|e| Error::BackendError(e.to_string()))?;
		let db = sled::open(dir.path()).map_err(|e| Error::BackendError(e.to_string()))?;
		Ok(Datastore {
			db,
			write_lock: Arc::new(Mutex::new(())),
			version_counter: Arc::new(AtomicU64::new(0)),
			_tempdir: Some(dir),
		})
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::sled", skip(self))]
	pub async fn transaction(&self, write: bool) -> Result<Transaction> {
		let write_guard = if write {
			Some(Arc::clone(&self.write_lock).lock_owned().await)
		} else {
			None
		};
		#[cfg(not(debug_assertions))]
		let check = Check::Warn;
		#[cfg(debug_assertions)]
		let check = Check::Panic;
		Ok(Transaction {
			state: TxState::Active,
			write,
			check,
			db: self.db.clone(),
			buffer: Vec::new(),
			version_counter: Arc::clone(&self.version_counter),
			read_version: self.version_counter.load(AtomicOrdering::SeqCst) as i64,
			assigned_versionstamp: None,
			_write_guard: write_guard,
		})
	}
}

/// Maps a [`KeySelector`] to a native `sled` range bound. Only the two canonical "forward"
/// shapes (`first_greater_or_equal`, `first_greater_than`) are resolved exactly; every other
/// selector — including `last_less_or_equal`/`last_less_than` and any non-canonical offset —
/// degrades to treating the key as an inclusive/exclusive bound directly, which is equivalent
/// to `first_greater_or_equal` at that key. Callers needing exact offset resolution should use
/// the in-memory backend.
fn approximate_bound(sel: &KeySelector, as_begin: bool) -> Bound<Vec<u8>> {
	let is_canonical_fge = !sel.or_equal && sel.offset == 1;
	let is_canonical_fgt = sel.or_equal && sel.offset == 1;
	if is_canonical_fgt {
		if as_begin {
			Bound::Excluded(sel.key.clone())
		} else {
			Bound::Included(sel.key.clone())
		}
	} else {
		if !is_canonical_fge {
			warn!(
				target: TARGET,
				offset = sel.offset,
				or_equal = sel.or_equal,
				"range selector is not a canonical forward shape; approximating as first_greater_or_equal"
			);
		}
		if as_begin {
			Bound::Included(sel.key.clone())
		} else {
			Bound::Excluded(sel.key.clone())
		}
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
	#[instrument(level = "trace", target = "tuplekv::kvs::sled", skip(self))]
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
	#[instrument(level = "trace", target = "tuplekv::kvs::sled", skip(self))]
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
		if self.buffer.is_empty() {
			self._write_guard = None;
			return Ok(());
		}
		let needs_stamp = self
			.buffer
			.iter()
			.any(|op| matches!(op, WriteOp::SetVersionstampedKey(..) | WriteOp::SetVersionstampedValue(..)));
		let buffer = if needs_stamp {
			let stamp = self.next_versionstamp();
			self.assigned_versionstamp = Some(stamp);
			resolve_versionstamps(std::mem::take(&mut self.buffer), stamp)
		} else {
			std::mem::take(&mut self.buffer)
		};

		let mut touched: BTreeSet<Vec<u8>> = BTreeSet::new();
		let mut affected: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
		for op in &buffer {
			match op {
				WriteOp::Set(k, _) | WriteOp::Clear(k) => {
					touched.insert(k.clone());
				}
				WriteOp::ClearRange(begin, end) => {
					for entry in self.db.range(begin.clone()..end.clone()) {
						let (k, v) = entry.map_err(|e| Error::BackendError(e.to_string()))?;
						touched.insert(k.to_vec());
						affected.insert(k.to_vec(), v.to_vec());
					}
				}
				WriteOp::SetVersionstampedKey(..) | WriteOp::SetVersionstampedValue(..) => {
					unreachable!("resolved into Set above")
				}
			}
		}
		for k in &touched {
			if !affected.contains_key(k) {
				if let Some(v) = self.db.get(k).map_err(|e| Error::BackendError(e.to_string()))? {
					affected.insert(k.clone(), v.to_vec());
				}
			}
		}
		apply_ops(&mut affected, &buffer);
		let mut all_keys: BTreeSet<Vec<u8>> = touched;
		all_keys.extend(affected.keys().cloned());

		self.db
			.transaction(|tx| {
				for k in &all_keys {
					match affected.get(k) {
						Some(v) => {
							tx.insert(k.as_slice(), v.as_slice())?;
						}
						None => {
							tx.remove(k.as_slice())?;
						}
					}
				}
				Ok::<(), sled::transaction::ConflictableTransactionError<Error>>(())
			})
			.map_err(|e| Error::BackendError(e.to_string()))?;
		self.db.flush_async().await.map_err(|e| Error::BackendError(e.to_string()))?;
		self._write_guard = None;
		Ok(())
	}

	fn next_versionstamp(&self) -> [u8; 10] {
		let v = self.version_counter.fetch_add(1, AtomicOrdering::SeqCst);
		let mut stamp = [0u8; 10];
		stamp[..8].copy_from_slice(&v.to_be_bytes());
		stamp
	}

	pub fn get_versionstamp(&self) -> Option<[u8; 10]> {
		self.assigned_versionstamp
	}

	pub fn get_read_version(&self) -> Result<i64> {
		Ok(self.read_version)
	}

	pub fn set_read_version(&mut self, _version: i64) -> Result<()> {
		Ok(())
	}

	pub fn get_committed_version(&self) -> Result<Option<i64>> {
		Ok(self.assigned_versionstamp.map(|stamp| {
			let mut buf = [0u8; 8];
			buf.copy_from_slice(&stamp[..8]);
			i64::from_be_bytes(buf)
		}))
	}

	/// No native conflict-range tracking: `sled`'s own transactions already serialize through
	/// the engine-level write lock, so this is accepted and discarded.
	pub fn add_conflict_range(&mut self, _begin: Vec<u8>, _end: Vec<u8>, _kind: ConflictRangeType) -> Result<()> {
		self.require_open()?;
		Ok(())
	}

	/// Resolves `selector` against `sled`'s native ordered tree. Only the two canonical backward
	/// shapes (`last_less_or_equal`, `last_less_than`) seek backward; every other shape —
	/// including the two forward canonical selectors and any non-canonical offset — degrades to
	/// a forward `key >= k` seek, the same concession [`approximate_bound`] documents for
	/// [`Transaction::get_range`].
	#[instrument(level = "trace", target = "tuplekv::kvs::sled", skip(self))]
	pub async fn get_key(&mut self, selector: &KeySelector) -> Result<Key> {
		self.require_open()?;
		let is_llt = !selector.or_equal && selector.offset == 0;
		let is_lle = selector.or_equal && selector.offset == 0;
		let found = if is_llt {
			self.db
				.range((Bound::Unbounded, Bound::Excluded(selector.key.clone())))
				.next_back()
				.transpose()
				.map_err(|e| Error::BackendError(e.to_string()))?
		} else if is_lle {
			self.db
				.range((Bound::Unbounded, Bound::Included(selector.key.clone())))
				.next_back()
				.transpose()
				.map_err(|e| Error::BackendError(e.to_string()))?
		} else {
			let bound = approximate_bound(selector, true);
			self.db
				.range((bound, Bound::Unbounded))
				.next()
				.transpose()
				.map_err(|e| Error::BackendError(e.to_string()))?
		};
		Ok(found.map(|(k, _)| k.to_vec()).unwrap_or_default())
	}

	/// Best-effort sum of key and value lengths over `[begin, end)`, walking the native range
	/// directly rather than a materialized buffer-merged view.
	pub async fn get_estimated_range_size_bytes(&mut self, begin: Vec<u8>, end: Vec<u8>) -> Result<i64> {
		self.require_open()?;
		let mut size = 0i64;
		for entry in self.db.range(begin..end) {
			let (k, v) = entry.map_err(|e| Error::BackendError(e.to_string()))?;
			size += (k.len() + v.len()) as i64;
		}
		Ok(size)
	}

	pub async fn get_range_split_points(&mut self, begin: Vec<u8>, end: Vec<u8>, chunk_size: i64) -> Result<Vec<Key>> {
		self.require_open()?;
		if chunk_size <= 0 {
			return Ok(Vec::new());
		}
		let mut points = Vec::new();
		let mut running = 0i64;
		for entry in self.db.range(begin..end) {
			let (k, v) = entry.map_err(|e| Error::BackendError(e.to_string()))?;
			running += (k.len() + v.len()) as i64;
			if running >= chunk_size {
				points.push(k.to_vec());
				running = 0;
			}
		}
		Ok(points)
	}

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

	#[instrument(level = "trace", target = "tuplekv::kvs::sled", skip(self, key))]
	pub async fn get(&mut self, key: &[u8]) -> Result<Option<Val>> {
		self.require_open()?;
		if let Some(v) = self.buffered_value(key) {
			return Ok(v);
		}
		self.db.get(key).map(|o| o.map(|v| v.to_vec())).map_err(|e| Error::BackendError(e.to_string()))
	}

	/// Reads the live store directly, ignoring this transaction's own buffered writes.
	pub async fn get_committed(&mut self, key: &[u8]) -> Result<Option<Val>> {
		self.require_open()?;
		self.db.get(key).map(|o| o.map(|v| v.to_vec())).map_err(|e| Error::BackendError(e.to_string()))
	}

	/// A no-op once this transaction has reached a terminal state, rather than an error: only
	/// lifecycle operations and reads are expected to notice a transaction is finished.
	#[instrument(level = "trace", target = "tuplekv::kvs::sled", skip(self, key, value))]
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

	#[instrument(level = "trace", target = "tuplekv::kvs::sled", skip(self, key))]
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

	#[instrument(level = "trace", target = "tuplekv::kvs::sled", skip(self))]
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

	#[instrument(level = "trace", target = "tuplekv::kvs::sled", skip(self))]
	pub async fn get_range(
		&mut self,
		begin: &KeySelector,
		end: &KeySelector,
		limit: usize,
		reverse: bool,
	) -> Result<Vec<(Key, Val)>> {
		self.require_open()?;
		let lower = approximate_bound(begin, true);
		let upper = approximate_bound(end, false);
		let mut view: BTreeMap<Key, Val> = BTreeMap::new();
		for entry in self.db.range((lower.clone(), upper.clone())) {
			let (k, v) = entry.map_err(|e| Error::BackendError(e.to_string()))?;
			view.insert(k.to_vec(), v.to_vec());
		}
		let window_ops: Vec<WriteOp> = self
			.buffer
			.iter()
			.filter(|op| match op {
				WriteOp::Set(k, _) | WriteOp::Clear(k) => in_window(k, &lower, &upper),
				WriteOp::ClearRange(..) => true,
				WriteOp::SetVersionstampedKey(..) | WriteOp::SetVersionstampedValue(..) => false,
			})
			.cloned()
			.collect();
		apply_ops(&mut view, &window_ops);

		let mut pairs: Vec<(Key, Val)> = view.into_iter().collect();
		if reverse {
			pairs.reverse();
		}
		if limit > 0 && pairs.len() > limit {
			pairs.truncate(limit);
		}
		Ok(pairs)
	}

	#[instrument(level = "trace", target = "tuplekv::kvs::sled", skip(self, key, param))]
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

fn in_window(key: &[u8], lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
	let above_lower = match lower {
		Bound::Included(k) => key >= k.as_slice(),
		Bound::Excluded(k) => key > k.as_slice(),
		Bound::Unbounded => true,
	};
	let below_upper = match upper {
		Bound::Included(k) => key <= k.as_slice(),
		Bound::Excluded(k) => key < k.as_slice(),
		Bound::Unbounded => true,
	};
	above_lower && below_upper
}
