use rand::Rng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Shr;
use std::str::FromStr;

use crate::Error;

macro_rules! uint_impl {
    ($name:ident, $bytes:expr) => {
        /// Fixed-width unsigned integer, stored big-endian so the derived
        /// ordering is the numeric ordering.
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; $bytes]);

        impl $name {
            pub const BYTES: usize = $bytes;

            pub fn zero() -> Self {
                $name([0u8; $bytes])
            }

            pub fn one() -> Self {
                let mut out = [0u8; $bytes];
                out[$bytes - 1] = 1;
                $name(out)
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub fn from_bytes(bytes: [u8; $bytes]) -> Self {
                $name(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $bytes] {
                &self.0
            }

            pub fn random<R: Rng>(rng: &mut R) -> Self {
                let mut out = [0u8; $bytes];
                rng.fill(&mut out[..]);
                $name(out)
            }

            /// Wrapping subtraction; `zero - one` yields the all-ones value
            /// used to derive the mining target.
            pub fn wrapping_sub(&self, other: &Self) -> Self {
                let mut out = [0u8; $bytes];
                let mut borrow = 0i16;
                for i in (0..$bytes).rev() {
                    let diff = self.0[i] as i16 - other.0[i] as i16 - borrow;
                    if diff < 0 {
                        out[i] = (diff + 256) as u8;
                        borrow = 1;
                    } else {
                        out[i] = diff as u8;
                        borrow = 0;
                    }
                }
                $name(out)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, Error> {
                let bytes = hex::decode(s)?;
                if bytes.len() != $bytes {
                    return Err(Error::BadUintLength {
                        expected: $bytes,
                        got: bytes.len(),
                    });
                }
                let mut out = [0u8; $bytes];
                out.copy_from_slice(&bytes);
                Ok($name(out))
            }
        }

        impl From<[u8; $bytes]> for $name {
            fn from(bytes: [u8; $bytes]) -> Self {
                $name(bytes)
            }
        }

        impl Shr<u32> for $name {
            type Output = $name;

            fn shr(self, shift: u32) -> $name {
                if shift as usize >= $bytes * 8 {
                    return $name::zero();
                }
                let mut out = [0u8; $bytes];
                let byte_shift = (shift / 8) as usize;
                let bit_shift = shift % 8;
                for src in 0..$bytes {
                    let dst = src + byte_shift;
                    if dst >= $bytes {
                        break;
                    }
                    out[dst] |= self.0[src] >> bit_shift;
                    if bit_shift > 0 && dst + 1 < $bytes {
                        out[dst + 1] |= self.0[src] << (8 - bit_shift);
                    }
                }
                $name(out)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                $name::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $name::from_hex(&s).map_err(de::Error::custom)
            }
        }
    };
}

uint_impl!(Uint160, 20);
uint_impl!(Uint256, 32);
