//! An ordered key-value transaction layer with a FoundationDB-shaped interface: a type-tagged
//! Tuple Layer codec for composite keys, prefix-scoped Subspaces, relative KeySelector
//! addressing, and write-buffered, snapshot-isolated transactions over pluggable backends.

pub mod bytes;
pub mod error;
pub mod keyselector;
pub mod kvs;
pub mod subspace;
pub mod tuple;

pub use bytes::{Key, Val};
pub use error::{Error, Result};
pub use keyselector::KeySelector;
pub use kvs::{
	Check, ConflictRangeType, DatabaseOptions, Engine, MutationType, StreamingMode, Transaction,
	TransactionOption,
};
pub use subspace::Subspace;
pub use tuple::{Element, Tuple};
