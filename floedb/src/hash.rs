//! Integrity checksum used by every persisted record.

use byteorder::{ByteOrder, LittleEndian};
use hex_slice::AsHex;

/// Polynomial rolling hash with base 257 modulo 2^32.
///
/// Every record written to disk carries this value computed over its
/// remaining bytes. The modulo is realized by `u32` wrapping arithmetic.
pub fn polynomial_rolling_hash(data: &[u8]) -> u32 {
	let mut hash_val = 0u32;
	for b in data {
		hash_val = hash_val.wrapping_mul(257).wrapping_add(*b as u32);
	}
	hash_val
}

/// Describes a checksum mismatch for corruption errors.
pub fn mismatch(expected: u32, got: u32) -> String {
	let mut expected_bytes = [0u8; 4];
	let mut got_bytes = [0u8; 4];
	LittleEndian::write_u32(&mut expected_bytes, expected);
	LittleEndian::write_u32(&mut got_bytes, got);

	format!("Expected: {:02x}, Got: {:02x}", expected_bytes.as_hex(), got_bytes.as_hex())
}

#[cfg(test)]
mod tests {
	use super::polynomial_rolling_hash;

	#[test]
	fn test_known_values() {
		assert_eq!(0, polynomial_rolling_hash(b""));
		assert_eq!(97, polynomial_rolling_hash(b"a"));
		assert_eq!(97 * 257 + 98, polynomial_rolling_hash(b"ab"));
	}

	#[test]
	fn test_wraps_instead_of_overflowing() {
		let data = [0xffu8; 64];
		let _ = polynomial_rolling_hash(&data);
	}

	quickcheck! {
		fn quickcheck_single_byte_flip_changes_hash(data: Vec<u8>, index: usize) -> bool {
			if data.is_empty() {
				return true;
			}
			let index = index % data.len();
			let mut flipped = data.clone();
			flipped[index] ^= 0x01;

			polynomial_rolling_hash(&data) != polynomial_rolling_hash(&flipped)
		}
	}
}
