use num_bigint_dig::BigUint;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::{Uint160, Uint256};

/// SHA-256 applied twice, the digest used for every hash in the system.
pub fn sha256d(data: &[u8]) -> Uint256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(&first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    Uint256::from_bytes(out)
}

/// RIPEMD-160 over SHA-256, used to derive key-ids from public keys.
pub fn hash160(data: &[u8]) -> Uint160 {
    let sha = Sha256::digest(data);
    let ripe = Ripemd160::digest(&sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&ripe);
    Uint160::from_bytes(out)
}

/// Fiat-Shamir challenge over big integers: the lowercase hex representations
/// are concatenated and double-hashed, and the digest is read back as a
/// 256-bit unsigned integer.
pub fn hash_bigints(values: &[&BigUint]) -> BigUint {
    let mut concat = String::new();
    for value in values {
        concat.push_str(&value.to_str_radix(16));
    }
    let digest = sha256d(concat.as_bytes());
    BigUint::from_bytes_be(digest.as_bytes())
}
