//! The Tuple Layer: a type-tagged, order-preserving binary codec for heterogeneous typed
//! composite keys.
//!
//! The type-code table, integer encoding, float encoding, and nested-tuple escaping below are a
//! Rust-native reimplementation of the FoundationDB tuple layer's wire format (the same format
//! implemented by `foundationdb::tuple::Element`), generalized to live independently of any
//! particular backend.

use crate::bytes::{escape_and_terminate, unescape_until_terminator};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use uuid::Uuid;

const NULL: u8 = 0x00;
const BYTES: u8 = 0x01;
const STRING: u8 = 0x02;
const NESTED: u8 = 0x05;
const NEG_INT_START: u8 = 0x0c;
const INT_ZERO: u8 = 0x14;
const POS_INT_END: u8 = 0x1c;
const FLOAT: u8 = 0x20;
const DOUBLE: u8 = 0x21;
const FALSE: u8 = 0x26;
const TRUE: u8 = 0x27;
const UUID_CODE: u8 = 0x30;

/// A single tuple element.
///
/// Variants are ordered the way [`Element::type_rank`] reports them, which is also the order
/// the encoded type-code bytes sort in: `Null < Bytes < String < Nested < Int < Float32 <
/// Float64 < Bool(false) < Bool(true) < Uuid`.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Element {
	Null,
	Bytes(Vec<u8>),
	String(String),
	Tuple(Tuple),
	Int(i64),
	Float32(f32),
	Float64(f64),
	Bool(bool),
	Uuid(Uuid),
}

impl From<Vec<u8>> for Element {
	fn from(v: Vec<u8>) -> Self {
		Element::Bytes(v)
	}
}
impl From<&str> for Element {
	fn from(v: &str) -> Self {
		Element::String(v.to_owned())
	}
}
impl From<String> for Element {
	fn from(v: String) -> Self {
		Element::String(v)
	}
}
impl From<i64> for Element {
	fn from(v: i64) -> Self {
		Element::Int(v)
	}
}
impl From<f32> for Element {
	fn from(v: f32) -> Self {
		Element::Float32(v)
	}
}
impl From<f64> for Element {
	fn from(v: f64) -> Self {
		Element::Float64(v)
	}
}
impl From<bool> for Element {
	fn from(v: bool) -> Self {
		Element::Bool(v)
	}
}
impl From<Uuid> for Element {
	fn from(v: Uuid) -> Self {
		Element::Uuid(v)
	}
}
impl From<Tuple> for Element {
	fn from(v: Tuple) -> Self {
		Element::Tuple(v)
	}
}

/// An ordered, value-semantic sequence of [`Element`]s.
///
/// Two tuples are equal iff their packed bytes are equal (I3/I4 in the design notes): this is
/// what makes `+0.0` and `-0.0` distinct elements while a `NaN` compares equal to itself.
#[derive(Clone, Debug, Default)]
pub struct Tuple {
	elements: Vec<Element>,
}

impl Tuple {
	pub fn new() -> Self {
		Tuple {
			elements: Vec::new(),
		}
	}

	pub fn from_elements(elements: Vec<Element>) -> Self {
		Tuple {
			elements,
		}
	}

	pub fn len(&self) -> usize {
		self.elements.len()
	}

	pub fn is_empty(&self) -> bool {
		self.elements.is_empty()
	}

	pub fn elements(&self) -> &[Element] {
		&self.elements
	}

	/// Returns a new tuple with `element` appended. Pure: `self` is untouched.
	pub fn append(&self, element: impl Into<Element>) -> Tuple {
		let mut elements = self.elements.clone();
		elements.push(element.into());
		Tuple {
			elements,
		}
	}

	/// Returns a new tuple with every element of `other` appended in order.
	pub fn append_tuple(&self, other: &Tuple) -> Tuple {
		let mut elements = self.elements.clone();
		elements.extend(other.elements.iter().cloned());
		Tuple {
			elements,
		}
	}

	/// Decodes element `i`, or [`Element::Null`] if `i` is out of range.
	pub fn subscript(&self, i: usize) -> Element {
		self.elements.get(i).cloned().unwrap_or(Element::Null)
	}

	/// Concatenates the per-element encodings of this tuple.
	pub fn pack(&self) -> Vec<u8> {
		let mut out = Vec::new();
		for e in &self.elements {
			encode_element(e, &mut out);
		}
		out
	}

	/// Decodes a complete tuple from a packed byte string in a single forward pass.
	pub fn unpack(bytes: &[u8]) -> Result<Tuple> {
		let mut elements = Vec::new();
		let mut cursor = 0;
		while cursor < bytes.len() {
			let (element, consumed) = decode_element(&bytes[cursor..])?;
			elements.push(element);
			cursor += consumed;
		}
		Ok(Tuple {
			elements,
		})
	}
}

impl PartialEq for Tuple {
	fn eq(&self, other: &Self) -> bool {
		self.pack() == other.pack()
	}
}
impl Eq for Tuple {}

impl std::hash::Hash for Tuple {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.pack().hash(state)
	}
}

impl PartialOrd for Tuple {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for Tuple {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.pack().cmp(&other.pack())
	}
}

fn encode_element(e: &Element, out: &mut Vec<u8>) {
	match e {
		Element::Null => out.push(NULL),
		Element::Bytes(b) => {
			out.push(BYTES);
			out.extend(escape_and_terminate(b));
		}
		Element::String(s) => {
			out.push(STRING);
			out.extend(escape_and_terminate(s.as_bytes()));
		}
		Element::Tuple(t) => {
			out.push(NESTED);
			out.extend(escape_and_terminate(&t.pack()));
		}
		Element::Int(v) => encode_int(*v, out),
		Element::Float32(v) => {
			out.push(FLOAT);
			let mut buf = [0u8; 4];
			BigEndian::write_u32(&mut buf, v.to_bits());
			adjust_float_bytes(&mut buf, true);
			out.extend_from_slice(&buf);
		}
		Element::Float64(v) => {
			out.push(DOUBLE);
			let mut buf = [0u8; 8];
			BigEndian::write_u64(&mut buf, v.to_bits());
			adjust_float_bytes(&mut buf, true);
			out.extend_from_slice(&buf);
		}
		Element::Bool(false) => out.push(FALSE),
		Element::Bool(true) => out.push(TRUE),
		Element::Uuid(u) => {
			out.push(UUID_CODE);
			out.extend_from_slice(u.as_bytes());
		}
	}
}

fn decode_element(buf: &[u8]) -> Result<(Element, usize)> {
	let code = *buf.first().ok_or(Error::UnexpectedEndOfData)?;
	let rest = &buf[1..];
	match code {
		NULL => Ok((Element::Null, 1)),
		BYTES => {
			let (payload, consumed) = unescape_until_terminator(rest)?;
			Ok((Element::Bytes(payload), 1 + consumed))
		}
		STRING => {
			let (payload, consumed) = unescape_until_terminator(rest)?;
			let s = String::from_utf8(payload).map_err(|_| Error::InvalidUtf8)?;
			Ok((Element::String(s), 1 + consumed))
		}
		NESTED => {
			let (payload, consumed) = unescape_until_terminator(rest)?;
			let inner = Tuple::unpack(&payload)?;
			Ok((Element::Tuple(inner), 1 + consumed))
		}
		NEG_INT_START..=POS_INT_END => decode_int(code, rest),
		FLOAT => {
			if rest.len() < 4 {
				return Err(Error::UnexpectedEndOfData);
			}
			let mut buf4 = [0u8; 4];
			buf4.copy_from_slice(&rest[..4]);
			adjust_float_bytes(&mut buf4, false);
			let bits = BigEndian::read_u32(&buf4);
			Ok((Element::Float32(f32::from_bits(bits)), 5))
		}
		DOUBLE => {
			if rest.len() < 8 {
				return Err(Error::UnexpectedEndOfData);
			}
			let mut buf8 = [0u8; 8];
			buf8.copy_from_slice(&rest[..8]);
			adjust_float_bytes(&mut buf8, false);
			let bits = BigEndian::read_u64(&buf8);
			Ok((Element::Float64(f64::from_bits(bits)), 9))
		}
		FALSE => Ok((Element::Bool(false), 1)),
		TRUE => Ok((Element::Bool(true), 1)),
		UUID_CODE => {
			if rest.len() < 16 {
				return Err(Error::UnexpectedEndOfData);
			}
			let mut buf16 = [0u8; 16];
			buf16.copy_from_slice(&rest[..16]);
			Ok((Element::Uuid(Uuid::from_bytes(buf16)), 17))
		}
		other => Err(Error::InvalidTypeCode(other)),
	}
}

/// Flips the sign bit for positive numbers, inverts every bit for negative ones (including
/// `-0.0`). Decoding applies the same transform in reverse, which happens to be identical:
/// inverting-or-flipping is its own inverse once you know which branch the original value took,
/// and the branch is recoverable from the *encoded* top bit, hence the `encode` flag here only
/// changes which bit we inspect to pick the branch.
fn adjust_float_bytes(buf: &mut [u8], encode: bool) {
	let negative_before_encoding = if encode {
		buf[0] & 0x80 != 0
	} else {
		buf[0] & 0x80 == 0
	};
	if negative_before_encoding {
		for b in buf.iter_mut() {
			*b = !*b;
		}
	} else {
		buf[0] ^= 0x80;
	}
}

fn bytes_needed(magnitude: u64) -> u8 {
	for n in 1..=8u8 {
		if n == 8 || magnitude <= (1u64 << (n * 8)) - 1 {
			return n;
		}
	}
	unreachable!()
}

fn encode_int(v: i64, out: &mut Vec<u8>) {
	if v == 0 {
		out.push(INT_ZERO);
		return;
	}
	if v > 0 {
		let magnitude = v as u64;
		let n = bytes_needed(magnitude);
		out.push(INT_ZERO + n);
		let mut buf = [0u8; 8];
		BigEndian::write_u64(&mut buf, magnitude);
		out.extend_from_slice(&buf[8 - n as usize..]);
	} else {
		let magnitude = (-(v as i128)) as u64;
		let n = bytes_needed(magnitude);
		out.push(INT_ZERO - n);
		if n == 8 {
			out.extend_from_slice(&v.to_be_bytes());
		} else {
			let ceiling = (1u64 << (n * 8)) - 1;
			let payload = ceiling - magnitude;
			let mut buf = [0u8; 8];
			BigEndian::write_u64(&mut buf, payload);
			out.extend_from_slice(&buf[8 - n as usize..]);
		}
	}
}

fn decode_int(code: u8, rest: &[u8]) -> Result<(Element, usize)> {
	if code == INT_ZERO {
		return Ok((Element::Int(0), 1));
	}
	if code > INT_ZERO {
		let n = (code - INT_ZERO) as usize;
		if rest.len() < n {
			return Err(Error::UnexpectedEndOfData);
		}
		let mut buf = [0u8; 8];
		buf[8 - n..].copy_from_slice(&rest[..n]);
		let magnitude = BigEndian::read_u64(&buf);
		let v = i64::try_from(magnitude).map_err(|_| Error::IntegerOverflow)?;
		Ok((Element::Int(v), 1 + n))
	} else {
		let n = (INT_ZERO - code) as usize;
		if rest.len() < n {
			return Err(Error::UnexpectedEndOfData);
		}
		if n == 8 {
			let mut buf = [0u8; 8];
			buf.copy_from_slice(&rest[..8]);
			return Ok((Element::Int(i64::from_be_bytes(buf)), 9));
		}
		let mut buf = [0u8; 8];
		buf[8 - n..].copy_from_slice(&rest[..n]);
		let payload = BigEndian::read_u64(&buf);
		let ceiling = (1u64 << (n * 8)) - 1;
		let magnitude = ceiling - payload;
		let v = i64::try_from(magnitude).map_err(|_| Error::IntegerOverflow)?;
		Ok((Element::Int(-v), 1 + n))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pack_one(e: Element) -> Vec<u8> {
		Tuple::from_elements(vec![e]).pack()
	}

	#[test]
	fn integers_round_trip_across_the_i64_range() {
		for v in [
			0,
			1,
			-1,
			255,
			256,
			-256,
			i64::MAX,
			i64::MIN,
			i64::MIN + 1,
			1 << 32,
			-(1i64 << 40),
		] {
			let packed = pack_one(Element::Int(v));
			let unpacked = Tuple::unpack(&packed).unwrap();
			match unpacked.subscript(0) {
				Element::Int(got) => assert_eq!(got, v, "round trip of {v}"),
				other => panic!("expected Int, got {other:?}"),
			}
		}
	}

	#[test]
	fn integer_encoding_preserves_numeric_order() {
		let values = [i64::MIN, -1_000_000_000_000, -256, -1, 0, 1, 256, 1_000_000_000_000, i64::MAX];
		let mut encoded: Vec<_> = values.iter().map(|&v| pack_one(Element::Int(v))).collect();
		let sorted = {
			let mut c = encoded.clone();
			c.sort();
			c
		};
		assert_eq!(encoded, sorted, "packed order must match numeric order");
		// also check strictly increasing, not just non-decreasing
		encoded.dedup();
		assert_eq!(encoded.len(), values.len());
	}

	#[test]
	fn float_order_matches_numeric_order_including_signed_zero() {
		let values = [f64::NEG_INFINITY, -1.0, -0.0, 0.0, 1.0, f64::INFINITY];
		let encoded: Vec<_> = values.iter().map(|&v| pack_one(Element::Float64(v))).collect();
		let mut sorted = encoded.clone();
		sorted.sort();
		assert_eq!(encoded, sorted);
		// -0.0 and +0.0 must be distinct encodings (I3)
		assert_ne!(encoded[2], encoded[3]);
	}

	#[test]
	fn float_round_trip_preserves_bit_pattern() {
		for v in [0.0f64, -0.0, 1.5, -1.5, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
			let packed = pack_one(Element::Float64(v));
			let unpacked = Tuple::unpack(&packed).unwrap();
			match unpacked.subscript(0) {
				Element::Float64(got) => assert_eq!(got.to_bits(), v.to_bits()),
				other => panic!("expected Float64, got {other:?}"),
			}
		}
	}

	#[test]
	fn type_ordering_across_the_full_schema() {
		let tuples = vec![
			Tuple::new().append(Element::Null),
			Tuple::new().append(Element::Bytes(vec![])),
			Tuple::new().append(Element::String(String::new())),
			Tuple::new().append(Element::Tuple(Tuple::new())),
			Tuple::new().append(Element::Int(0)),
			Tuple::new().append(Element::Float32(0.0)),
			Tuple::new().append(Element::Float64(0.0)),
			Tuple::new().append(Element::Bool(false)),
			Tuple::new().append(Element::Bool(true)),
			Tuple::new().append(Element::Uuid(Uuid::nil())),
		];
		let packed: Vec<_> = tuples.iter().map(|t| t.pack()).collect();
		for w in packed.windows(2) {
			assert!(w[0] < w[1], "{:?} should sort before {:?}", w[0], w[1]);
		}
	}

	#[test]
	fn nested_tuple_with_embedded_null_round_trips() {
		let outer = Tuple::new()
			.append(Element::String("hello\0world".to_string()))
			.append(Element::String("after".to_string()));
		let nested = Tuple::new().append(Element::Tuple(outer.clone()));
		let packed = nested.pack();
		// the inner null byte must appear escaped as 00 FF somewhere inside the nested payload
		assert!(packed.windows(2).any(|w| w == [0x00, 0xff]));
		let unpacked = Tuple::unpack(&packed).unwrap();
		match unpacked.subscript(0) {
			Element::Tuple(inner) => assert_eq!(inner, outer),
			other => panic!("expected Tuple, got {other:?}"),
		}
	}

	#[test]
	fn unpack_then_pack_is_a_bijection_for_a_mixed_tuple() {
		let t = Tuple::new()
			.append(Element::Null)
			.append(Element::Bytes(vec![1, 0, 2, 0, 0, 3]))
			.append(Element::String("a\0b".to_string()))
			.append(Element::Int(-12345))
			.append(Element::Float32(3.25))
			.append(Element::Float64(-7.5))
			.append(Element::Bool(true))
			.append(Element::Uuid(Uuid::from_u128(42)));
		let packed = t.pack();
		let unpacked = Tuple::unpack(&packed).unwrap();
		assert_eq!(unpacked, t);
		assert_eq!(unpacked.pack(), packed);
	}

	#[test]
	fn subscript_out_of_range_is_null() {
		let t = Tuple::new().append(Element::Int(1));
		assert!(matches!(t.subscript(5), Element::Null));
	}

	#[test]
	fn invalid_type_code_is_rejected() {
		assert!(matches!(Tuple::unpack(&[0xee]), Err(Error::InvalidTypeCode(0xee))));
	}

	#[test]
	fn truncated_buffer_is_rejected() {
		assert!(matches!(Tuple::unpack(&[BYTES]), Err(Error::UnexpectedEndOfData)));
		assert!(matches!(Tuple::unpack(&[INT_ZERO + 2, 0x01]), Err(Error::UnexpectedEndOfData)));
	}

	#[test]
	fn invalid_utf8_in_string_is_rejected() {
		let mut buf = vec![STRING];
		buf.extend_from_slice(&[0xff, 0xfe, 0x00]);
		assert!(matches!(Tuple::unpack(&buf), Err(Error::InvalidUtf8)));
	}
}
