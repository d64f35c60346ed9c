//! Utility functions for hex validation, field encoding and Poseidon hashing.

use anyhow::{Context, Result};
use halo2_gadgets::poseidon::primitives::{
    self as poseidon, ConstantLength, P128Pow5T3 as PoseidonSpec,
};
use pasta_curves::group::ff::PrimeField;
use pasta_curves::pallas;

fn is_valid_hex_string(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_hexdigit())
}

fn strip_hex_prefix(input: &str) -> &str {
    input
        .trim()
        .strip_prefix("0x")
        .or_else(|| input.trim().strip_prefix("0X"))
        .unwrap_or_else(|| input.trim())
}

/// Validates and strips hex prefix from a string.
///
/// # Errors
/// Returns an error if:
/// - The hex string has incorrect length
/// - The hex string contains non-hex characters
///
/// # Examples
///
/// ```
/// use mrln::utils::validate_and_strip_hex;
///
/// let result = validate_and_strip_hex("0x1234abcd", 8).unwrap();
/// assert_eq!(result, "1234abcd");
/// ```
pub fn validate_and_strip_hex(input: &str, expected_len: usize) -> Result<String> {
    let stripped = strip_hex_prefix(input);

    if stripped.len() != expected_len {
        return Err(anyhow::anyhow!(
            "Invalid hex string: must be {} characters (got {})",
            expected_len,
            stripped.len()
        ));
    }

    if !is_valid_hex_string(stripped) {
        return Err(anyhow::anyhow!(
            "Invalid hex string: contains non-hex characters"
        ));
    }

    Ok(stripped.to_string())
}

const BASE_U64: u64 = 256;

/// Converts 32 bytes to a Pallas base field element.
///
/// The input is read as a big-endian base-256 number and reduced modulo the
/// field order, so every byte string maps to some element. Use
/// [`field_from_hex`] when a canonical encoding is required.
#[inline]
#[must_use]
pub fn bytes_to_field(bytes: &[u8; 32]) -> pallas::Base {
    let mut value = pallas::Base::zero();
    let base = pallas::Base::from(BASE_U64);

    for &byte in bytes.iter() {
        value = value * base + pallas::Base::from(byte as u64);
    }

    value
}

/// Converts a field element to its canonical 32-byte little-endian representation.
#[inline]
#[must_use]
pub fn field_to_bytes(field: pallas::Base) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    let repr = field.to_repr();
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

/// Hex encoding of the canonical representation of a field element.
#[must_use]
pub fn field_to_hex(field: pallas::Base) -> String {
    hex::encode(field_to_bytes(field))
}

/// Parses a field element from 64 hex characters of canonical little-endian bytes.
///
/// # Errors
/// Fails on malformed hex and on encodings that are not reduced modulo the
/// field order.
///
/// # Examples
///
/// ```
/// use mrln::utils::{field_from_hex, field_to_hex};
/// use pasta_curves::pallas;
///
/// let value = pallas::Base::from(1337);
/// assert_eq!(field_from_hex(&field_to_hex(value)).unwrap(), value);
/// ```
pub fn field_from_hex(input: &str) -> Result<pallas::Base> {
    let stripped = validate_and_strip_hex(input, 64)?;
    let bytes = hex::decode(stripped).context("Failed to decode field element hex")?;

    let mut repr = <pallas::Base as PrimeField>::Repr::default();
    repr.as_mut().copy_from_slice(&bytes);

    Option::from(pallas::Base::from_repr(repr))
        .ok_or_else(|| anyhow::anyhow!("Not a canonical field element: {}", input.trim()))
}

/// Poseidon hash of a single field element.
#[inline]
#[must_use]
pub fn poseidon_hash1(value: pallas::Base) -> pallas::Base {
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<1>, 3, 2>::init().hash([value])
}

/// Poseidon hash of two field elements with `P128Pow5T3` parameters.
///
/// Used for rate commitments and for every Merkle node.
///
/// # Example
///
/// ```
/// use mrln::utils::poseidon_hash;
/// use pasta_curves::pallas;
///
/// let left = pallas::Base::from(1);
/// let right = pallas::Base::from(2);
/// assert_ne!(poseidon_hash(left, right), poseidon_hash(right, left));
/// ```
#[inline]
#[must_use]
pub fn poseidon_hash(left: pallas::Base, right: pallas::Base) -> pallas::Base {
    let inputs = [left, right];
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<2>, 3, 2>::init().hash(inputs)
}

/// Poseidon hash of three field elements.
#[inline]
#[must_use]
pub fn poseidon_hash3(a: pallas::Base, b: pallas::Base, c: pallas::Base) -> pallas::Base {
    poseidon::Hash::<_, PoseidonSpec, ConstantLength<3>, 3, 2>::init().hash([a, b, c])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_and_strip_hex_valid() {
        let result = validate_and_strip_hex("0x1234abcd", 8);
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "1234abcd");
    }

    #[test]
    fn test_validate_and_strip_hex_with_whitespace() {
        let result = validate_and_strip_hex("  0X1234ABCD  ", 8);
        assert_eq!(result.unwrap(), "1234ABCD");
    }

    #[test]
    fn test_validate_and_strip_hex_wrong_length() {
        let result = validate_and_strip_hex("0x1234abcd", 10);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be 10 characters"));
    }

    #[test]
    fn test_validate_and_strip_hex_invalid_characters() {
        let result = validate_and_strip_hex("0x1234xyzw", 8);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("non-hex characters"));
    }

    #[test]
    fn test_field_hex_round_trip() {
        let value = poseidon_hash(pallas::Base::from(7), pallas::Base::from(11));
        let encoded = field_to_hex(value);
        assert_eq!(encoded.len(), 64);
        assert_eq!(field_from_hex(&format!("0x{encoded}")).unwrap(), value);
    }

    #[test]
    fn test_field_from_hex_rejects_non_canonical() {
        // 0xff..ff is larger than the Pallas modulus.
        let result = field_from_hex(&"ff".repeat(32));
        assert!(result.unwrap_err().to_string().contains("canonical"));
    }

    #[test]
    fn test_bytes_to_field_distinct() {
        let one = bytes_to_field(&[1u8; 32]);
        let two = bytes_to_field(&[2u8; 32]);
        assert_ne!(one, pallas::Base::zero());
        assert_ne!(one, two);
    }

    #[test]
    fn test_hash_arities_are_domain_separated() {
        let a = pallas::Base::from(5);
        let zero = pallas::Base::zero();
        assert_ne!(poseidon_hash1(a), poseidon_hash(a, zero));
        assert_ne!(poseidon_hash(a, zero), poseidon_hash3(a, zero, zero));
    }
}
