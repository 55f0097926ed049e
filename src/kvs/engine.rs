//! `Engine`: owns a backend datastore and drives the bounded retry loop described for
//! [`Engine::with_transaction`].

use crate::error::Result;
use crate::kvs::options::DatabaseOptions;
use crate::kvs::transaction::{Inner, Transaction};
use std::future::Future;
use tracing::{instrument, trace};

const TARGET: &str = "tuplekv::kvs::engine";

/// The minimum number of attempts [`Engine::with_transaction`] guarantees before giving up with
/// [`Error::TransactionTooOld`].
pub const MIN_RETRY_ATTEMPTS: u32 = 100;

enum Database {
	#[cfg(feature = "kv-mem")]
	Mem(super::mem::Datastore),
	#[cfg(feature = "kv-sled")]
	Sled(super::sled_backend::Datastore),
}

/// An open backend plus the options new transactions inherit.
#[non_exhaustive]
pub struct Engine {
	database: Database,
	options: DatabaseOptions,
}

impl Engine {
	/// Opens the default in-memory backend.
	#[cfg(feature = "kv-mem")]
	pub fn new_mem() -> Self {
		Engine {
			database: Database::Mem(super::mem::Datastore::new()),
			options: DatabaseOptions::default(),
		}
	}

	/// Opens (or creates) a `sled`-backed on-disk database at `path`.
	#[cfg(feature = "kv-sled")]
	pub fn new_sled(path: impl AsRef<std::path::Path>) -> Result<Self> {
		Ok(Engine {
			database: Database::Sled(super::sled_backend::Datastore::open(path)?),
			options: DatabaseOptions::default(),
		})
	}

	/// Opens an ephemeral `sled`-backed database rooted in a fresh temporary directory.
	#[cfg(feature = "kv-sled")]
	pub fn new_sled_temporary() -> Result<Self> {
		Ok(Engine {
			database: Database::Sled(super::sled_backend::Datastore::temporary()?),
			options: DatabaseOptions::default(),
		})
	}

	pub fn with_options(mut self, options: DatabaseOptions) -> Self {
		self.options = options;
		self
	}

	/// Starts a new transaction. For a writable transaction, this blocks until any previously
	/// created writable transaction on this engine has reached a terminal state — the
	/// engine-level serialization that lets every backend here skip native conflict detection.
	#[instrument(level = "trace", target = "tuplekv::kvs::engine", skip(self))]
	pub async fn create_transaction(&self, write: bool) -> Result<Transaction> {
		let inner = match &self.database {
			#[cfg(feature = "kv-mem")]
			Database::Mem(ds) => Inner::Mem(ds.transaction(write).await?),
			#[cfg(feature = "kv-sled")]
			Database::Sled(ds) => Inner::Sled(ds.transaction(write).await?),
		};
		Ok(Transaction::new(inner))
	}

	/// Runs `f` in a fresh writable transaction, retrying on [`Error::is_retryable`] errors up
	/// to the configured (or [`MIN_RETRY_ATTEMPTS`]-floor) attempt budget, and committing on
	/// success.
	///
	/// `f` must be idempotent with respect to anything outside the transaction: it may run more
	/// than once. `f` hands its transaction back alongside its `Result` rather than consuming it,
	/// so this loop can always reach a terminal state on it: if `f` returns `Ok`, the transaction
	/// is committed, retrying with a brand new transaction if the commit itself conflicts; if `f`
	/// returns `Err`, the transaction is cancelled and, if the error is retryable, the closure
	/// runs again; otherwise the error propagates immediately.
	#[instrument(level = "trace", target = "tuplekv::kvs::engine", skip(self, f))]
	pub async fn with_transaction<F, Fut, T>(&self, mut f: F) -> Result<T>
	where
		F: FnMut(Transaction) -> Fut,
		Fut: Future<Output = (Transaction, Result<T>)>,
	{
		let limit = self.options.transaction_retry_limit.map(|n| n as u32).unwrap_or(MIN_RETRY_ATTEMPTS).max(MIN_RETRY_ATTEMPTS);
		let mut attempt = 0;
		loop {
			attempt += 1;
			let tx = self.create_transaction(true).await?;
			let (mut tx, result) = f(tx).await;
			match result {
				Ok(value) => match tx.commit().await {
					Ok(()) => return Ok(value),
					Err(e) if e.is_retryable() && attempt < limit => {
						trace!(target: TARGET, attempt, "commit conflicted, retrying");
						continue;
					}
					Err(e) => return Err(e),
				},
				Err(e) => {
					let _ = tx.cancel().await;
					if e.is_retryable() && attempt < limit {
						trace!(target: TARGET, attempt, "transaction body failed retryably, retrying");
						continue;
					}
					return Err(e);
				}
			}
		}
	}
}
