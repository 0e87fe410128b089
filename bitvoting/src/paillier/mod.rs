//! Threshold Paillier cryptosystem.
//!
//! Decryption requires t of l trustees: the secret exponent d is shared with
//! a degree t-1 polynomial, every trustee raises a ciphertext to its share,
//! and any t partial decryptions recombine via integer Lagrange coefficients.
//! Encryptions carry a non-interactive proof that the plaintext is 0 or 1,
//! partial decryptions carry a proof of correct share use.

mod arith;
mod decrypt;
mod encrypt;
mod keygen;

pub use arith::*;
pub use decrypt::*;
pub use encrypt::*;
pub use keygen::*;

use num_bigint_dig::BigUint;

/// Bit length of freshly generated election keys.
pub const PAILLIER_BITS: usize = 1024;

/// Per-trustee verification value v_i = v^(delta * s_i) mod n^2, published so
/// anyone can check a partial decryption proof.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VerificationKey {
    pub id: u32,
    #[serde(with = "crate::biguint_hex")]
    pub v: BigUint,
}

/// Public half of a threshold Paillier key.
///
/// Besides the modulus this carries everything verifiers and trustees need:
/// the generator v of the squares of Z*_{n^2}, the per-trustee verification
/// values, delta = l! and the constant (4 delta^2)^-1 mod n used when
/// combining partial decryptions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaillierPublicKey {
    pub bits: usize,
    /// Number of decryption servers (l).
    pub servers: u32,
    /// Number of servers needed to decrypt (t <= l).
    pub threshold: u32,
    #[serde(with = "crate::biguint_hex")]
    pub n: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub n_squared: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub n_plus_one: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub delta: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub combine_const: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub v: BigUint,
    pub verification_keys: Vec<VerificationKey>,
}

impl PaillierPublicKey {
    pub fn verification_key(&self, id: u32) -> Option<&VerificationKey> {
        self.verification_keys.iter().find(|key| key.id == id)
    }
}

/// One trustee's share s_i = f(i) of the secret exponent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PaillierPartialKey {
    pub id: u32,
    #[serde(with = "crate::biguint_hex")]
    pub share: BigUint,
}

/// Ciphertext with a Fiat-Shamir set-membership proof that the encrypted
/// plaintext is one of two public values (0 or 1 for ballots).
/// (e1, v1) answer for the first plaintext, (e2, v2) for the second.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CiphertextProof {
    #[serde(with = "crate::biguint_hex")]
    pub c: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub e: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub e1: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub v1: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub e2: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub v2: BigUint,
}

/// A trustee's partial decryption c_i = c^(2 delta s_i) together with the
/// equality-of-discrete-logs proof that the right share was used.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartialDecryptionProof {
    pub id: u32,
    #[serde(with = "crate::biguint_hex")]
    pub decryption: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub c4: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub ci2: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub e: BigUint,
    #[serde(with = "crate::biguint_hex")]
    pub z: BigUint,
}

/// Multiply two ciphertexts; the product decrypts to the sum of the
/// plaintexts.
pub fn homomorphic_mul(public: &PaillierPublicKey, a: &BigUint, b: &BigUint) -> BigUint {
    (a * b) % &public.n_squared
}

/// Non-rerandomized encryption of zero, the neutral element for
/// homomorphic summation.
pub fn ciphertext_one() -> BigUint {
    BigUint::from(1u32)
}
