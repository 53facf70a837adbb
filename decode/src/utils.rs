// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Utilities to make decoding payloads and diagnostic maps less terrible.

use crate::Error;

mod private {
    pub trait ScalableSealed: Sized + Copy + Into<f32> {}
}

pub trait Scalable: private::ScalableSealed {
    fn from_bytes(buf: [u8; 2]) -> Self;
    fn from_f32(x: f32) -> Self;
    fn to_bytes(self) -> [u8; 2];
}

impl private::ScalableSealed for i16 {}

impl Scalable for i16 {
    fn from_bytes(buf: [u8; 2]) -> Self {
        Self::from_be_bytes(buf)
    }

    fn from_f32(x: f32) -> Self {
        x.round() as Self
    }

    fn to_bytes(self) -> [u8; 2] {
        self.to_be_bytes()
    }
}

impl private::ScalableSealed for u16 {}

impl Scalable for u16 {
    fn from_bytes(buf: [u8; 2]) -> Self {
        Self::from_be_bytes(buf)
    }

    fn from_f32(x: f32) -> Self {
        x.round() as Self
    }

    fn to_bytes(self) -> [u8; 2] {
        self.to_be_bytes()
    }
}

/// Decode a big-endian 2-byte word into a float with a defined scale factor.
pub fn decode_with_scale<T: Scalable>(buf: [u8; 2], scale: f32) -> f32 {
    T::from_bytes(buf).into() * scale
}

/// The inverse of [`decode_with_scale`], saturating at the range of `T`.
pub fn encode_with_scale<T: Scalable>(value: f32, scale: f32) -> [u8; 2] {
    T::from_f32(value / scale).to_bytes()
}

/// Return the 2-byte word at `offset` of `buf`.
pub(crate) fn word(buf: &[u8], offset: usize) -> Result<[u8; 2], Error> {
    buf.get(offset..offset + 2)
        .and_then(|w| w.try_into().ok())
        .ok_or(Error::Truncated {
            expected: offset + 2,
            actual: buf.len(),
        })
}

/// Check that a payload holds at least `expected` bytes.
pub(crate) const fn check_len(buf: &[u8], expected: usize) -> Result<(), Error> {
    if buf.len() < expected {
        Err(Error::Truncated {
            expected,
            actual: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// A helper macro to generate an enum from a single-byte field.
///
/// Firmware reports several small enumerations as a raw byte. Values outside
/// the known set are kept in the listed catch-all variants, so that new
/// firmware never fails to decode.
///
/// It also generates `From<u8>`, `From<$name> for u8` and `Display`
/// implementations.
///
/// # Example
/// ```ignore
/// pon_decode::byte_enum! {
///     name = Foo,
///     description = "A byte representing foo",
///     variants = {
///         1, First, "The first value",
///         2, Second, "The second value",
///     },
///     other_variants = { Unknown: _ },
/// }
/// ```
#[macro_export]
macro_rules! byte_enum {
    (
        name = $name:ident,
        description = $docstring:literal,
        variants = { $( $bits:literal, $variant:ident, $display:literal $(,)? ),+ },
        other_variants = { $( $other_variant:ident : $other_pattern:pat $(,)? ),* }
        $(,)?
    ) => {
        #[doc = $docstring]
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        #[cfg_attr(
            any(feature = "api-traits", test),
            derive(schemars::JsonSchema, serde::Deserialize, serde::Serialize)
        )]
        #[cfg_attr(
            any(feature = "api-traits", test),
            serde(rename_all = "snake_case"),
        )]
        pub enum $name {
            $(
                #[cfg_attr(
                    any(feature = "api-traits", test),
                    serde(rename = $display)
                )]
                $variant
            ),+,
            $($other_variant(u8)),+
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter) -> ::core::fmt::Result {
                use $name::*;
                #[deny(overlapping_range_endpoints)]
                match self {
                    $( $variant => write!(f, "{}", $display), )+
                    $( $other_variant(x) => write!(f, "{} ({x:02x})", stringify!($other_variant)), )+
                }
            }
        }

        impl ::core::convert::From<u8> for $name {
            fn from(x: u8) -> Self {
                use $name::*;
                #[deny(overlapping_range_endpoints)]
                match x {
                    $( $bits => $variant, )+
                    $( $other_pattern => $other_variant(x), )+
                }
            }
        }

        impl ::core::convert::From<$name> for u8 {
            fn from(x: $name) -> u8 {
                use $name::*;
                #[deny(overlapping_range_endpoints)]
                match x {
                    $( $variant => $bits, )+
                    $( $other_variant(x) => x, )+
                }
            }
        }
    };
}
