use num_bigint_dig::{BigInt, BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::Rng;

use super::{pow_mod_signed, PaillierPartialKey, PaillierPublicKey, PartialDecryptionProof};
use crate::{hash_bigints, Error};

/// Raise a ciphertext to a trustee's share: c_i = c^(2 delta s_i) mod n^2.
pub fn partial_decrypt(
    public: &PaillierPublicKey,
    key: &PaillierPartialKey,
    ciphertext: &BigUint,
) -> BigUint {
    let exponent = BigUint::from(2u32) * &public.delta * &key.share;
    ciphertext.modpow(&exponent, &public.n_squared)
}

/// Partial decryption plus an equality-of-discrete-logs proof that the
/// trustee raised the ciphertext to its registered share.
pub fn partial_decrypt_with_proof<R: Rng>(
    public: &PaillierPublicKey,
    key: &PaillierPartialKey,
    ciphertext: &BigUint,
    rng: &mut R,
) -> PartialDecryptionProof {
    let n_squared = &public.n_squared;

    // blinding exponent; 3b + 256 bits hides z = r + e s delta statistically
    let r = rng.gen_biguint(3 * public.bits + 256);

    let c4 = ciphertext.modpow(&BigUint::from(4u32), n_squared);
    let a = c4.modpow(&r, n_squared);
    let b = public.v.modpow(&r, n_squared);

    let decryption = partial_decrypt(public, key, ciphertext);
    let ci2 = decryption.modpow(&BigUint::from(2u32), n_squared);

    let e = hash_bigints(&[&a, &b, &c4, &ci2]);
    let z = &r + &e * &key.share * &public.delta;

    PartialDecryptionProof {
        id: key.id,
        decryption,
        c4,
        ci2,
        e,
        z,
    }
}

/// Verify a partial decryption proof: recompute both commitments from the
/// transcript and compare the re-hashed challenge.
pub fn verify_partial_decryption(
    public: &PaillierPublicKey,
    proof: &PartialDecryptionProof,
) -> bool {
    let n_squared = &public.n_squared;

    let verification_key = match public.verification_key(proof.id) {
        Some(key) => key,
        None => return false,
    };

    // the combined value and the proven value must agree
    if proof.ci2 != proof.decryption.modpow(&BigUint::from(2u32), n_squared) {
        return false;
    }

    let minus_e = -BigInt::from(proof.e.clone());
    let ci2_pow = match pow_mod_signed(&proof.ci2, &minus_e, n_squared) {
        Ok(value) => value,
        Err(_) => return false,
    };
    let vi_pow = match pow_mod_signed(&verification_key.v, &minus_e, n_squared) {
        Ok(value) => value,
        Err(_) => return false,
    };

    let a = (proof.c4.modpow(&proof.z, n_squared) * ci2_pow) % n_squared;
    let b = (public.v.modpow(&proof.z, n_squared) * vi_pow) % n_squared;

    hash_bigints(&[&a, &b, &proof.c4, &proof.ci2]) == proof.e
}

/// Combine partial decryptions into the plaintext.
///
/// The first `threshold` entries are interpolated at zero with integer
/// Lagrange coefficients lambda_i = delta * prod(-j) / prod(i - j); the delta
/// factor makes every coefficient an integer. Callers enforce the threshold;
/// combining fewer shares yields an unrelated value.
pub fn combine(
    public: &PaillierPublicKey,
    partials: &[PartialDecryptionProof],
) -> Result<BigUint, Error> {
    if partials.is_empty() {
        return Err(Error::NotEnoughShares {
            needed: public.threshold as usize,
            found: 0,
        });
    }
    let count = partials.len().min(public.threshold as usize);
    let partials = &partials[..count];
    let delta = BigInt::from(public.delta.clone());

    let mut combined = BigUint::one();
    for (i, partial) in partials.iter().enumerate() {
        let mut numerator = delta.clone();
        let mut denominator = BigInt::one();
        for (j, other) in partials.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator *= -BigInt::from(other.id);
            denominator *= BigInt::from(partial.id as i64) - BigInt::from(other.id as i64);
        }
        let lambda = &numerator / &denominator;
        debug_assert!((&numerator % &denominator).is_zero());

        let exponent = lambda * BigInt::from(2);
        let factor = pow_mod_signed(&partial.decryption, &exponent, &public.n_squared)?;
        combined = (combined * factor) % &public.n_squared;
    }

    if combined.is_zero() {
        return Err(Error::NotInvertible);
    }

    // L(c') = (c' - 1) / n, then multiply away 4 delta^2
    let l = (combined - BigUint::one()) / &public.n;
    Ok((l * &public.combine_const) % &public.n)
}

#[cfg(test)]
mod tests {
    use super::super::{encrypt, homomorphic_mul, keygen};
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn honest_partials_verify_and_tampered_ones_fail() {
        let mut rng = StdRng::seed_from_u64(31);
        let (public, partials) = keygen(256, 3, 3, &mut rng).unwrap();
        let (ciphertext, _) = encrypt(&public, &BigUint::from(1u32), &mut rng);

        let proof = partial_decrypt_with_proof(&public, &partials[0], &ciphertext, &mut rng);
        assert!(verify_partial_decryption(&public, &proof));

        // flipping any byte of ci^2 must break the proof
        let mut tampered = proof.clone();
        tampered.ci2 += BigUint::from(1u32);
        assert!(!verify_partial_decryption(&public, &tampered));

        // an unknown server id has no verification key
        let mut unknown = proof;
        unknown.id = 17;
        assert!(!verify_partial_decryption(&public, &unknown));
    }

    #[test]
    fn combine_recovers_the_plaintext() {
        let mut rng = StdRng::seed_from_u64(32);
        let (public, keys) = keygen(256, 3, 3, &mut rng).unwrap();

        for plaintext in 0u32..=3 {
            let plaintext = BigUint::from(plaintext);
            let (ciphertext, _) = encrypt(&public, &plaintext, &mut rng);
            let shares: Vec<_> = keys
                .iter()
                .map(|key| partial_decrypt_with_proof(&public, key, &ciphertext, &mut rng))
                .collect();
            assert_eq!(combine(&public, &shares).unwrap(), plaintext);
        }
    }

    #[test]
    fn combine_below_threshold_yields_garbage() {
        let mut rng = StdRng::seed_from_u64(33);
        let (public, keys) = keygen(256, 3, 3, &mut rng).unwrap();

        let plaintext = BigUint::from(4u32);
        let (ciphertext, _) = encrypt(&public, &plaintext, &mut rng);
        let shares: Vec<_> = keys
            .iter()
            .take(2)
            .map(|key| partial_decrypt_with_proof(&public, key, &ciphertext, &mut rng))
            .collect();

        assert_ne!(combine(&public, &shares).unwrap(), plaintext);
        assert!(combine(&public, &[]).is_err());
    }

    #[test]
    fn homomorphic_sum_decrypts_to_plaintext_sum() {
        let mut rng = StdRng::seed_from_u64(34);
        let (public, keys) = keygen(256, 2, 2, &mut rng).unwrap();

        let (a, _) = encrypt(&public, &BigUint::from(2u32), &mut rng);
        let (b, _) = encrypt(&public, &BigUint::from(3u32), &mut rng);
        let product = homomorphic_mul(&public, &a, &b);

        let shares: Vec<_> = keys
            .iter()
            .map(|key| partial_decrypt_with_proof(&public, key, &product, &mut rng))
            .collect();
        assert_eq!(combine(&public, &shares).unwrap(), BigUint::from(5u32));
    }
}
