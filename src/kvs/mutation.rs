//! The read-modify-write math behind [`crate::kvs::options::MutationType`].
//!
//! Every backend in this crate evaluates atomic operations the same way: read the current
//! value through the transaction's normal read path (so it participates in read-your-writes
//! like any other read), compute the new value here, then buffer it as an ordinary `Set`.
//! Pulling that arithmetic into one place keeps the two backends from drifting apart on the
//! FoundationDB-compatible semantics a caller expects from e.g. `Add`.

use crate::error::{Error, Result};
use crate::kvs::options::{MutationType, APPEND_IF_FITS_LIMIT};

/// Computes the result of applying `op` with parameter `param` to `existing`.
///
/// Returns `Ok(None)` when the mutation leaves the key absent (`CompareAndClear` when it
/// matches), `Ok(Some(value))` for a resulting `Set`, or an error for a malformed operand.
pub fn apply(existing: Option<&[u8]>, op: MutationType, param: &[u8]) -> Result<Option<Vec<u8>>> {
	match op {
		MutationType::Add => Ok(Some(little_endian_op(existing, param, |a, b| a.wrapping_add(b)))),
		MutationType::BitAnd => Ok(Some(bytewise_op(existing, param, |a, b| a & b))),
		MutationType::BitOr => Ok(Some(bytewise_op(existing, param, |a, b| a | b))),
		MutationType::BitXor => Ok(Some(bytewise_op(existing, param, |a, b| a ^ b))),
		MutationType::Max => {
			Ok(Some(little_endian_select(existing, param, |a, b| a >= b)))
		}
		MutationType::Min => {
			Ok(Some(little_endian_select(existing, param, |a, b| a <= b)))
		}
		MutationType::ByteMax => Ok(Some(lexicographic_select(existing, param, true))),
		MutationType::ByteMin => Ok(Some(lexicographic_select(existing, param, false))),
		MutationType::AppendIfFits => {
			let mut combined = existing.unwrap_or(&[]).to_vec();
			combined.extend_from_slice(param);
			if combined.len() > APPEND_IF_FITS_LIMIT {
				return Ok(existing.map(|v| v.to_vec()));
			}
			Ok(Some(combined))
		}
		MutationType::CompareAndClear => {
			if existing == Some(param) {
				Ok(None)
			} else {
				Ok(existing.map(|v| v.to_vec()))
			}
		}
		MutationType::SetVersionstampedKey | MutationType::SetVersionstampedValue => Err(
			Error::InvalidOperation("versionstamp mutations are not evaluated by atomic_op".into()),
		),
	}
}

/// Widens `existing`/`param` to the longer of the two lengths (zero-extended at the high end,
/// since values are little-endian) and combines them byte-wise.
fn bytewise_op(existing: Option<&[u8]>, param: &[u8], f: impl Fn(u8, u8) -> u8) -> Vec<u8> {
	let existing = existing.unwrap_or(&[]);
	let len = existing.len().max(param.len());
	let mut out = Vec::with_capacity(len);
	for i in 0..len {
		let a = existing.get(i).copied().unwrap_or(0);
		let b = param.get(i).copied().unwrap_or(0);
		out.push(f(a, b));
	}
	out
}

fn to_u128_le(bytes: &[u8]) -> u128 {
	let mut buf = [0u8; 16];
	let n = bytes.len().min(16);
	buf[..n].copy_from_slice(&bytes[..n]);
	u128::from_le_bytes(buf)
}

fn little_endian_op(existing: Option<&[u8]>, param: &[u8], f: impl Fn(u128, u128) -> u128) -> Vec<u8> {
	let len = existing.map(|v| v.len()).unwrap_or(param.len()).max(param.len());
	let a = to_u128_le(existing.unwrap_or(&[]));
	let b = to_u128_le(param);
	let result = f(a, b);
	result.to_le_bytes()[..len.min(16)].to_vec()
}

fn little_endian_select(existing: Option<&[u8]>, param: &[u8], keep_existing_if: impl Fn(u128, u128) -> bool) -> Vec<u8> {
	match existing {
		None => param.to_vec(),
		Some(existing) => {
			let a = to_u128_le(existing);
			let b = to_u128_le(param);
			if keep_existing_if(a, b) {
				existing.to_vec()
			} else {
				param.to_vec()
			}
		}
	}
}

fn lexicographic_select(existing: Option<&[u8]>, param: &[u8], keep_larger: bool) -> Vec<u8> {
	match existing {
		None => param.to_vec(),
		Some(existing) => {
			let existing_is_larger = existing > param;
			if existing_is_larger == keep_larger {
				existing.to_vec()
			} else {
				param.to_vec()
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn add_is_little_endian_and_wraps() {
		let existing = 1u32.to_le_bytes();
		let param = 2u32.to_le_bytes();
		let result = apply(Some(&existing), MutationType::Add, &param).unwrap().unwrap();
		assert_eq!(u32::from_le_bytes(result.try_into().unwrap()), 3);
	}

	#[test]
	fn add_with_no_existing_value_seeds_from_param() {
		let param = 9u32.to_le_bytes();
		let result = apply(None, MutationType::Add, &param).unwrap().unwrap();
		assert_eq!(u32::from_le_bytes(result.try_into().unwrap()), 9);
	}

	#[test]
	fn byte_max_picks_lexicographically_larger() {
		let result = apply(Some(b"abc"), MutationType::ByteMax, b"abd").unwrap().unwrap();
		assert_eq!(result, b"abd");
	}

	#[test]
	fn numeric_max_compares_as_little_endian_integers() {
		// 0x00FF = 255 (LE) vs 0x0001 = 1 (LE); byte-wise "0001" > "00FF" but numerically 255 > 1.
		let result = apply(Some(&[0xff, 0x00]), MutationType::Max, &[0x01, 0x00]).unwrap().unwrap();
		assert_eq!(result, vec![0xff, 0x00]);
	}

	#[test]
	fn compare_and_clear_matches_clears_and_mismatch_keeps() {
		assert_eq!(apply(Some(b"x"), MutationType::CompareAndClear, b"x").unwrap(), None);
		assert_eq!(
			apply(Some(b"x"), MutationType::CompareAndClear, b"y").unwrap(),
			Some(b"x".to_vec())
		);
	}

	#[test]
	fn append_if_fits_rejects_oversized_growth() {
		let existing = vec![0u8; APPEND_IF_FITS_LIMIT - 1];
		let param = vec![0u8; 5];
		let result = apply(Some(&existing), MutationType::AppendIfFits, &param).unwrap();
		assert_eq!(result, Some(existing));
	}
}
