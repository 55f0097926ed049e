//! The write buffer: the sequence of pending mutations a transaction accumulates before commit.

/// A single buffered mutation. Transactions never touch a backend directly; every write goes
/// through this enum first and is only realized against the backend at commit time.
#[derive(Clone, Debug)]
pub enum WriteOp {
	Set(Vec<u8>, Vec<u8>),
	Clear(Vec<u8>),
	ClearRange(Vec<u8>, Vec<u8>),
	/// `key` carries a 4-byte little-endian offset as its trailing bytes, pointing at the 10
	/// bytes (within `key` minus those trailing 4) to be overwritten with the commit
	/// versionstamp once one is assigned.
	SetVersionstampedKey(Vec<u8>, Vec<u8>),
	/// Same offset convention as [`WriteOp::SetVersionstampedKey`], applied to `value` instead.
	SetVersionstampedValue(Vec<u8>, Vec<u8>),
}

/// Applies `ops`, in order, onto `view` (a sorted, deduplicated key/value map materialized as a
/// `BTreeMap`). This is the "materialize-and-merge" realization strategy shared by every backend
/// in this crate: a transaction's writes are folded onto whatever view of the backing data it is
/// working from, rather than mutating the backend until commit.
pub fn apply_ops(view: &mut std::collections::BTreeMap<Vec<u8>, Vec<u8>>, ops: &[WriteOp]) {
	for op in ops {
		match op {
			WriteOp::Set(k, v) => {
				view.insert(k.clone(), v.clone());
			}
			WriteOp::Clear(k) => {
				view.remove(k);
			}
			WriteOp::ClearRange(begin, end) => {
				let keys: Vec<Vec<u8>> =
					view.range(begin.clone()..end.clone()).map(|(k, _)| k.clone()).collect();
				for k in keys {
					view.remove(&k);
				}
			}
			// Not visible pre-commit: the versionstamp is unassigned until the transaction
			// commits, so these never appear in a read-your-writes merge.
			WriteOp::SetVersionstampedKey(..) | WriteOp::SetVersionstampedValue(..) => {}
		}
	}
}

/// Resolves every versionstamp placeholder in `ops` against `stamp`, producing the concrete
/// [`WriteOp::Set`] list a backend actually applies at commit.
pub fn resolve_versionstamps(ops: Vec<WriteOp>, stamp: [u8; 10]) -> Vec<WriteOp> {
	ops.into_iter()
		.map(|op| match op {
			WriteOp::SetVersionstampedKey(template, value) => {
				WriteOp::Set(splice_versionstamp(template, stamp), value)
			}
			WriteOp::SetVersionstampedValue(key, template) => {
				WriteOp::Set(key, splice_versionstamp(template, stamp))
			}
			other => other,
		})
		.collect()
}

/// Strips the trailing 4-byte little-endian offset from `template` and overwrites the 10 bytes
/// at that offset with `stamp`.
fn splice_versionstamp(mut template: Vec<u8>, stamp: [u8; 10]) -> Vec<u8> {
	let len = template.len();
	assert!(len >= 4, "versionstamp template too short for a trailing offset");
	let offset_bytes: [u8; 4] = template[len - 4..].try_into().expect("checked length");
	let offset = u32::from_le_bytes(offset_bytes) as usize;
	template.truncate(len - 4);
	assert!(offset + 10 <= template.len(), "versionstamp offset out of bounds");
	template[offset..offset + 10].copy_from_slice(&stamp);
	template
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	fn map(pairs: &[(&[u8], &[u8])]) -> BTreeMap<Vec<u8>, Vec<u8>> {
		pairs.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect()
	}

	#[test]
	fn set_then_clear_is_last_write_wins() {
		let mut view = map(&[]);
		apply_ops(
			&mut view,
			&[WriteOp::Set(b"a".to_vec(), b"1".to_vec()), WriteOp::Clear(b"a".to_vec())],
		);
		assert!(view.is_empty());
	}

	#[test]
	fn clear_range_removes_only_the_covered_keys() {
		let mut view = map(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
		apply_ops(&mut view, &[WriteOp::ClearRange(b"a".to_vec(), b"c".to_vec())]);
		assert_eq!(view.len(), 1);
		assert_eq!(view.get(b"c".as_slice()), Some(&b"3".to_vec()));
	}

	#[test]
	fn versionstamp_splice_overwrites_the_offset_and_drops_the_suffix() {
		let mut template = vec![0u8; 10];
		template.extend_from_slice(&0u32.to_le_bytes());
		let resolved = splice_versionstamp(template, [7u8; 10]);
		assert_eq!(resolved, vec![7u8; 10]);
	}
}
