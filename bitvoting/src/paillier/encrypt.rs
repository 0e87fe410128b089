use num_bigint_dig::{BigInt, BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::Zero;
use rand::Rng;

use super::{mod_inverse, pow_mod_signed, CiphertextProof, PaillierPublicKey};
use crate::{hash_bigints, Error};

/// Draw a blinding factor below n.
fn random_unit<R: Rng>(public: &PaillierPublicKey, rng: &mut R) -> BigUint {
    loop {
        let r = rng.gen_biguint(public.bits);
        if !r.is_zero() && r < public.n {
            return r;
        }
    }
}

/// Plain Paillier encryption c = (n+1)^m * r^n mod n^2.
/// Returns the ciphertext and the blinding factor used.
pub fn encrypt<R: Rng>(
    public: &PaillierPublicKey,
    plaintext: &BigUint,
    rng: &mut R,
) -> (BigUint, BigUint) {
    let r = random_unit(public, rng);
    let g_m = public.n_plus_one.modpow(plaintext, &public.n_squared);
    let r_n = r.modpow(&public.n, &public.n_squared);
    ((g_m * r_n) % &public.n_squared, r)
}

/// Encrypt one of two public plaintexts and prove set membership without
/// revealing which one was chosen (Fiat-Shamir OR-composition: the proof leg
/// for the other plaintext is simulated with a random challenge share).
///
/// `chosen` selects the first (0) or second (1) plaintext.
pub fn encrypt_with_proof<R: Rng>(
    public: &PaillierPublicKey,
    m1: &BigUint,
    m2: &BigUint,
    chosen: usize,
    rng: &mut R,
) -> Result<CiphertextProof, Error> {
    assert!(chosen < 2);
    let n = &public.n;
    let n_squared = &public.n_squared;

    let m_chosen = if chosen == 0 { m1 } else { m2 };
    let m_other = if chosen == 0 { m2 } else { m1 };

    let (c, r) = encrypt(public, m_chosen, rng);

    let rho = random_unit(public, rng);
    let e_sim = rng.gen_biguint_below(n);
    let v_sim = random_unit(public, rng);

    // simulated leg: u = v^n * (n+1)^(m*e) * c^(-e) mod n^2
    let c_inverse = mod_inverse(&c, n_squared)?;
    let u_sim = (v_sim.modpow(n, n_squared)
        * public.n_plus_one.modpow(&(m_other * &e_sim), n_squared)
        * c_inverse.modpow(&e_sim, n_squared))
        % n_squared;

    // honest leg commitment
    let u_real = rho.modpow(n, n_squared);

    // challenge binds the commitments in plaintext order
    let (u_first, u_second) = if chosen == 0 {
        (&u_real, &u_sim)
    } else {
        (&u_sim, &u_real)
    };
    let e = hash_bigints(&[u_first, u_second, &c, m1, m2]);

    // honest challenge share: e - e_sim = k*n + e_real
    let e_unreduced = BigInt::from(e.clone()) - BigInt::from(e_sim.clone());
    let n_int = BigInt::from(n.clone());
    let e_real = e_unreduced
        .mod_floor(&n_int)
        .to_biguint()
        .ok_or(Error::NotInvertible)?;
    let k = &e_unreduced / &n_int;

    // v = rho * r^e_real * (n+1)^k mod n
    let g_k = pow_mod_signed(&public.n_plus_one, &k, n)?;
    let v_real = (rho * r.modpow(&e_real, n) * g_k) % n;

    let (e1, v1, e2, v2) = if chosen == 0 {
        (e_real, v_real, e_sim, v_sim)
    } else {
        (e_sim, v_sim, e_real, v_real)
    };

    Ok(CiphertextProof {
        c,
        e,
        e1,
        v1,
        e2,
        v2,
    })
}

/// Encrypt a ballot answer (0 or 1) with its membership proof.
pub fn encrypt_binary_with_proof<R: Rng>(
    public: &PaillierPublicKey,
    answer: u64,
    rng: &mut R,
) -> Result<CiphertextProof, Error> {
    encrypt_with_proof(
        public,
        &BigUint::from(0u32),
        &BigUint::from(1u32),
        answer as usize,
        rng,
    )
}

/// Check a set-membership proof against two public plaintexts: both
/// commitments are recomputed from the transcript, the challenge is re-hashed
/// and its split across the two legs is checked mod n.
pub fn verify_encryption_for(
    public: &PaillierPublicKey,
    proof: &CiphertextProof,
    m1: &BigUint,
    m2: &BigUint,
) -> bool {
    let n = &public.n;
    let n_squared = &public.n_squared;

    if proof.c.is_zero() || proof.c >= *n_squared {
        return false;
    }
    let c_inverse = match mod_inverse(&proof.c, n_squared) {
        Ok(inverse) => inverse,
        Err(_) => return false,
    };

    let u1 = (proof.v1.modpow(n, n_squared)
        * public.n_plus_one.modpow(&(m1 * &proof.e1), n_squared)
        * c_inverse.modpow(&proof.e1, n_squared))
        % n_squared;
    let u2 = (proof.v2.modpow(n, n_squared)
        * public.n_plus_one.modpow(&(m2 * &proof.e2), n_squared)
        * c_inverse.modpow(&proof.e2, n_squared))
        % n_squared;

    let expected = hash_bigints(&[&u1, &u2, &proof.c, m1, m2]);
    if expected != proof.e {
        return false;
    }

    (&proof.e1 + &proof.e2) % n == &proof.e % n
}

/// Check the 0-or-1 membership proof of a ballot ciphertext.
pub fn verify_encryption(public: &PaillierPublicKey, proof: &CiphertextProof) -> bool {
    verify_encryption_for(public, proof, &BigUint::from(0u32), &BigUint::from(1u32))
}

#[cfg(test)]
mod tests {
    use super::super::keygen;
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn binary_proofs_verify() {
        let mut rng = StdRng::seed_from_u64(21);
        let (public, _) = keygen(256, 3, 3, &mut rng).unwrap();

        for answer in [0u64, 1] {
            let proof = encrypt_binary_with_proof(&public, answer, &mut rng).unwrap();
            assert!(verify_encryption(&public, &proof));
        }
    }

    #[test]
    fn out_of_set_plaintext_fails() {
        let mut rng = StdRng::seed_from_u64(22);
        let (public, _) = keygen(256, 2, 2, &mut rng).unwrap();

        // a transcript whose ciphertext actually encrypts 2
        let mut proof = encrypt_binary_with_proof(&public, 1, &mut rng).unwrap();
        let (two, _) = encrypt(&public, &BigUint::from(2u32), &mut rng);
        proof.c = two;
        assert!(!verify_encryption(&public, &proof));
    }

    #[test]
    fn tampered_transcript_fails() {
        let mut rng = StdRng::seed_from_u64(23);
        let (public, _) = keygen(256, 2, 2, &mut rng).unwrap();

        let good = encrypt_binary_with_proof(&public, 0, &mut rng).unwrap();
        let mut bad = good.clone();
        bad.e1 += BigUint::from(1u32);
        assert!(!verify_encryption(&public, &bad));

        let mut bad = good;
        bad.v2 += BigUint::from(1u32);
        assert!(!verify_encryption(&public, &bad));
    }
}
