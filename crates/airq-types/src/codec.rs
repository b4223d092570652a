//! Fixed-layout decoding of notification payloads.
//!
//! Every telemetry characteristic carries a packed sequence of little-endian
//! IEEE-754 `f32` values. A [`FieldLayout`] names the byte offset of each
//! field; [`decode`] turns a payload into a fixed-arity array of floats.
//!
//! Payloads longer than a layout requires are accepted and the trailing bytes
//! are never read.
//!
//! ```
//! use airq_types::codec::{self, PARTICULATE_LAYOUT};
//!
//! let mut payload = Vec::new();
//! for v in [1.0f32, 2.5, 3.0, 4.0] {
//!     payload.extend_from_slice(&v.to_le_bytes());
//! }
//! assert_eq!(codec::decode(&PARTICULATE_LAYOUT, &payload).unwrap(), [1.0, 2.5, 3.0, 4.0]);
//! assert!(codec::decode(&PARTICULATE_LAYOUT, &payload[..15]).is_err());
//! ```

use bytes::Buf;

use crate::error::{ParseError, ParseResult};

/// Width of one encoded field in bytes.
pub const F32_WIDTH: usize = 4;

/// Byte layout of a payload made of `N` little-endian `f32` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout<const N: usize> {
    /// Layout name used in error messages.
    pub name: &'static str,
    /// Byte offset of each field, in output order.
    pub offsets: [usize; N],
}

impl<const N: usize> FieldLayout<N> {
    /// Create a layout of `N` consecutive fields starting at offset 0.
    pub const fn packed(name: &'static str) -> Self {
        let mut offsets = [0usize; N];
        let mut i = 0;
        while i < N {
            offsets[i] = i * F32_WIDTH;
            i += 1;
        }
        Self { name, offsets }
    }

    /// Minimum payload length this layout can be decoded from.
    pub const fn min_len(&self) -> usize {
        let mut end = 0;
        let mut i = 0;
        while i < N {
            let field_end = self.offsets[i] + F32_WIDTH;
            if field_end > end {
                end = field_end;
            }
            i += 1;
        }
        end
    }
}

/// Particulate payload: pm1, pm2.5, pm4, pm10 (16 bytes).
pub const PARTICULATE_LAYOUT: FieldLayout<4> = FieldLayout::packed("particulate");

/// Environmental payload: temperature, humidity (8 bytes).
pub const ENVIRONMENTAL_LAYOUT: FieldLayout<2> = FieldLayout::packed("environmental");

/// Gas payload: VOC index, NOx index, CO2 (12 bytes).
pub const GAS_LAYOUT: FieldLayout<3> = FieldLayout::packed("gas");

/// Decode `payload` according to `layout`.
///
/// # Errors
///
/// Returns [`ParseError::MalformedPayload`] if `payload` is shorter than
/// [`FieldLayout::min_len`].
#[must_use = "decoding returns a Result that should be handled"]
pub fn decode<const N: usize>(layout: &FieldLayout<N>, payload: &[u8]) -> ParseResult<[f32; N]> {
    let expected = layout.min_len();
    if payload.len() < expected {
        return Err(ParseError::MalformedPayload {
            layout: layout.name,
            expected,
            actual: payload.len(),
        });
    }

    let mut values = [0.0f32; N];
    for (value, &offset) in values.iter_mut().zip(layout.offsets.iter()) {
        let mut field = &payload[offset..offset + F32_WIDTH];
        *value = field.get_f32_le();
    }
    Ok(values)
}

/// Encode values as packed little-endian `f32`s.
///
/// Used by the simulator and tests to build payloads in the wire format.
pub fn encode(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&PARTICULATE_LAYOUT, &data);
            let _ = decode(&ENVIRONMENTAL_LAYOUT, &data);
            let _ = decode(&GAS_LAYOUT, &data);
        }

        #[test]
        fn decode_fails_exactly_below_min_len(data in proptest::collection::vec(any::<u8>(), 0..32)) {
            let result = decode(&GAS_LAYOUT, &data);
            prop_assert_eq!(result.is_ok(), data.len() >= 12);
        }

        #[test]
        fn decode_reads_encoded_values(a in -1.0e6f32..1.0e6, b in -1.0e6f32..1.0e6, c in -1.0e6f32..1.0e6) {
            let payload = encode(&[a, b, c]);
            prop_assert_eq!(decode(&GAS_LAYOUT, &payload).unwrap(), [a, b, c]);
        }
    }
}
