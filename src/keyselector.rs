//! KeySelector: relative key addressing and resolution against a sorted key sequence.

/// A relative key reference: `key` plus an `(or_equal, offset)` pair. Four factory functions
/// normalize the four canonical FoundationDB selector shapes.
///
/// The `(or_equal, offset)` encoding here is `{FGE=(false,1), FGT=(true,1), LLE=(true,0),
/// LLT=(false,0)}` — see the design notes on the disambiguation between this and a superficially
/// similar but non-working encoding; only this one satisfies [`KeySelector::resolve`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySelector {
	pub key: Vec<u8>,
	pub or_equal: bool,
	pub offset: i64,
}

impl KeySelector {
	pub fn new(key: impl Into<Vec<u8>>, or_equal: bool, offset: i64) -> Self {
		KeySelector {
			key: key.into(),
			or_equal,
			offset,
		}
	}

	/// The first key `>= key`.
	pub fn first_greater_or_equal(key: impl Into<Vec<u8>>) -> Self {
		KeySelector::new(key, false, 1)
	}

	/// The first key `> key`.
	pub fn first_greater_than(key: impl Into<Vec<u8>>) -> Self {
		KeySelector::new(key, true, 1)
	}

	/// The last key `<= key`.
	pub fn last_less_or_equal(key: impl Into<Vec<u8>>) -> Self {
		KeySelector::new(key, true, 0)
	}

	/// The last key `< key`.
	pub fn last_less_than(key: impl Into<Vec<u8>>) -> Self {
		KeySelector::new(key, false, 0)
	}

	/// Resolves this selector against the ascending, deduplicated key sequence `keys`, returning
	/// an index in `[0, keys.len()]` (where `keys.len()` means "past the end").
	///
	/// `base` is the last index `i` with `keys[i] <= key` (if `or_equal`) or `keys[i] < key`
	/// (otherwise); `-1` means "before all keys". The resolved index is `base + offset`, clamped
	/// to the valid range.
	pub fn resolve(&self, keys: &[Vec<u8>]) -> usize {
		let base: i64 = if self.or_equal {
			upper_bound(keys, &self.key) as i64 - 1
		} else {
			lower_bound(keys, &self.key) as i64 - 1
		};
		let resolved = base + self.offset;
		resolved.clamp(0, keys.len() as i64) as usize
	}
}

/// First index `i` with `keys[i] >= key`.
fn lower_bound(keys: &[Vec<u8>], key: &[u8]) -> usize {
	keys.partition_point(|k| k.as_slice() < key)
}

/// First index `i` with `keys[i] > key`.
fn upper_bound(keys: &[Vec<u8>], key: &[u8]) -> usize {
	keys.partition_point(|k| k.as_slice() <= key)
}

/// Resolves a forward (begin inclusive, end exclusive) or reverse range of `[begin, end)` against
/// `keys`, returning the indices to emit in iteration order and truncating to `limit` (`0` means
/// unlimited) after direction is applied.
pub fn resolve_range(
	keys: &[Vec<u8>],
	begin: &KeySelector,
	end: &KeySelector,
	limit: usize,
	reverse: bool,
) -> Vec<usize> {
	let start_idx = begin.resolve(keys);
	let end_idx = end.resolve(keys);
	if start_idx >= end_idx {
		return Vec::new();
	}
	let mut indices: Vec<usize> = if reverse {
		(start_idx..end_idx).rev().collect()
	} else {
		(start_idx..end_idx).collect()
	};
	if limit > 0 && indices.len() > limit {
		indices.truncate(limit);
	}
	indices
}

#[cfg(test)]
mod tests {
	use super::*;

	fn keys(values: &[&str]) -> Vec<Vec<u8>> {
		values.iter().map(|s| s.as_bytes().to_vec()).collect()
	}

	#[test]
	fn first_greater_or_equal_matches_exact_key() {
		let k = keys(&["a", "b", "c"]);
		let sel = KeySelector::first_greater_or_equal(b"b".to_vec());
		assert_eq!(sel.resolve(&k), 1);
	}

	#[test]
	fn first_greater_or_equal_between_keys_lands_on_next() {
		let k = keys(&["a", "c", "e"]);
		let sel = KeySelector::first_greater_or_equal(b"b".to_vec());
		assert_eq!(sel.resolve(&k), 1);
	}

	#[test]
	fn first_greater_than_skips_the_exact_match() {
		let k = keys(&["a", "b", "c"]);
		let sel = KeySelector::first_greater_than(b"b".to_vec());
		assert_eq!(sel.resolve(&k), 2);
	}

	#[test]
	fn last_less_or_equal_matches_exact_key() {
		let k = keys(&["a", "b", "c"]);
		let sel = KeySelector::last_less_or_equal(b"b".to_vec());
		assert_eq!(sel.resolve(&k), 1);
	}

	#[test]
	fn last_less_than_skips_the_exact_match() {
		let k = keys(&["a", "b", "c"]);
		let sel = KeySelector::last_less_than(b"b".to_vec());
		assert_eq!(sel.resolve(&k), 0);
	}

	#[test]
	fn resolution_clamps_before_the_start_and_past_the_end() {
		let k = keys(&["m"]);
		assert_eq!(KeySelector::last_less_than(b"a".to_vec()).resolve(&k), 0);
		assert_eq!(KeySelector::first_greater_than(b"z".to_vec()).resolve(&k), 1);
	}

	#[test]
	fn offsets_walk_past_the_base_index() {
		let k = keys(&["a", "b", "c", "d"]);
		let sel = KeySelector::new(b"b".to_vec(), false, 3); // FGE with offset pushed forward
		assert_eq!(sel.resolve(&k), 3);
	}

	#[test]
	fn reverse_range_with_limit_enumerates_highest_first() {
		let k = keys(&["1", "2", "3", "4", "5"]);
		let begin = KeySelector::first_greater_or_equal(b"1".to_vec());
		let end = KeySelector::first_greater_or_equal(b"6".to_vec());
		let indices = resolve_range(&k, &begin, &end, 2, true);
		assert_eq!(indices, vec![4, 3]);
	}

	#[test]
	fn forward_range_is_empty_when_start_is_not_before_end() {
		let k = keys(&["a", "b", "c"]);
		let begin = KeySelector::first_greater_or_equal(b"c".to_vec());
		let end = KeySelector::first_greater_or_equal(b"a".to_vec());
		assert!(resolve_range(&k, &begin, &end, 0, false).is_empty());
	}
}
