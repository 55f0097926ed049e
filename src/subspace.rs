//! Subspace: a prefix-scoped key namespace built on the Tuple Layer.

use crate::bytes::strinc;
use crate::error::Result;
use crate::tuple::Tuple;
use crate::Error;

/// A byte-string prefix defining a scoped keyspace. Two subspaces are equal iff their prefixes
/// are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Subspace {
	prefix: Vec<u8>,
}

impl Subspace {
	/// Creates a subspace from a raw byte prefix.
	pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
		Subspace {
			prefix: prefix.into(),
		}
	}

	/// Creates a subspace whose prefix is the packed encoding of `tuple`.
	pub fn from_tuple(tuple: &Tuple) -> Self {
		Subspace {
			prefix: tuple.pack(),
		}
	}

	pub fn prefix(&self) -> &[u8] {
		&self.prefix
	}

	/// A child subspace whose prefix extends this one with the packed tuple of `elements`.
	pub fn child(&self, elements: &Tuple) -> Subspace {
		let mut prefix = self.prefix.clone();
		prefix.extend(elements.pack());
		Subspace {
			prefix,
		}
	}

	/// `prefix ∥ pack(tuple)`.
	pub fn pack(&self, tuple: &Tuple) -> Vec<u8> {
		let mut out = self.prefix.clone();
		out.extend(tuple.pack());
		out
	}

	/// Decodes the suffix of `key` as a tuple, failing with [`Error::PrefixMismatch`] if `key`
	/// does not begin with this subspace's prefix.
	pub fn unpack(&self, key: &[u8]) -> Result<Tuple> {
		let suffix = key.strip_prefix(self.prefix.as_slice()).ok_or(Error::PrefixMismatch)?;
		Tuple::unpack(suffix)
	}

	/// Whether `key` begins with this subspace's prefix.
	pub fn contains(&self, key: &[u8]) -> bool {
		key.starts_with(&self.prefix)
	}

	/// The range of keys strictly within this subspace, excluding the bare prefix key itself:
	/// `(prefix ∥ [0x00], strinc(prefix))`.
	pub fn range(&self) -> Result<(Vec<u8>, Vec<u8>)> {
		let mut begin = self.prefix.clone();
		begin.push(0x00);
		let end = if self.prefix.is_empty() {
			vec![0xff]
		} else {
			strinc(&self.prefix)?
		};
		Ok((begin, end))
	}

	/// The range of keys at or under this subspace, including the bare prefix key itself:
	/// `(prefix, strinc(prefix))`.
	pub fn prefix_range(&self) -> Result<(Vec<u8>, Vec<u8>)> {
		let end = if self.prefix.is_empty() {
			vec![0xff]
		} else {
			strinc(&self.prefix)?
		};
		Ok((self.prefix.clone(), end))
	}

	/// The range `(prefix ∥ pack(from), prefix ∥ pack(to))`.
	pub fn range_for(&self, from: &Tuple, to: &Tuple) -> (Vec<u8>, Vec<u8>) {
		(self.pack(from), self.pack(to))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tuple::Element;

	#[test]
	fn child_extends_prefix_with_packed_tuple() {
		let root = Subspace::new(b"app".to_vec());
		let child = root.child(&Tuple::new().append(Element::String("users".into())));
		assert!(child.prefix().starts_with(b"app"));
		assert_ne!(child.prefix(), root.prefix());
	}

	#[test]
	fn pack_and_unpack_round_trip() {
		let sub = Subspace::new(b"ns".to_vec());
		let tuple = Tuple::new().append(Element::Int(7)).append(Element::String("x".into()));
		let key = sub.pack(&tuple);
		let decoded = sub.unpack(&key).unwrap();
		assert_eq!(decoded, tuple);
	}

	#[test]
	fn unpack_rejects_keys_outside_the_subspace() {
		let sub = Subspace::new(b"ns".to_vec());
		assert!(matches!(sub.unpack(b"other"), Err(Error::PrefixMismatch)));
	}

	#[test]
	fn range_excludes_bare_prefix_but_prefix_range_includes_it() {
		let sub = Subspace::new(b"ns".to_vec());
		let (begin, end) = sub.range().unwrap();
		assert!(begin.as_slice() > sub.prefix());
		let (pbegin, pend) = sub.prefix_range().unwrap();
		assert_eq!(pbegin, sub.prefix());
		assert_eq!(end, pend);
	}

	#[test]
	fn contains_checks_prefix_membership() {
		let sub = Subspace::new(b"ns".to_vec());
		assert!(sub.contains(b"nsfoo"));
		assert!(!sub.contains(b"other"));
	}
}
