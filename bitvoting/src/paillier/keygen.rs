use num_bigint_dig::prime::probably_prime;
use num_bigint_dig::{BigUint, RandBigInt, RandPrime};
use num_integer::Integer;
use num_traits::One;
use rand::Rng;

use super::{mod_inverse, PaillierPartialKey, PaillierPublicKey, VerificationKey};
use crate::Error;

const MILLER_RABIN_ROUNDS: usize = 10;

/// Generate a safe prime pair (p', p) with p = 2p' + 1, both probable primes.
/// p' is drawn at modulus_bits/2 - 1 bits so p fits in half the modulus.
fn gen_safe_prime<R: Rng>(rng: &mut R, modulus_bits: usize) -> (BigUint, BigUint) {
    loop {
        let half: BigUint = rng.gen_prime(modulus_bits / 2 - 1);
        let prime = (&half << 1usize) + BigUint::one();
        if probably_prime(&prime, MILLER_RABIN_ROUNDS) {
            return (half, prime);
        }
    }
}

/// Evaluate f(x) = sum a_i x^i mod nm at a small integer point.
fn evaluate_polynomial(coefficients: &[BigUint], x: u32, nm: &BigUint) -> BigUint {
    let x = BigUint::from(x);
    let mut sum = BigUint::from(0u32);
    let mut power = BigUint::one();
    for coefficient in coefficients {
        sum += coefficient * &power;
        power *= &x;
    }
    sum % nm
}

fn factorial(value: u32) -> BigUint {
    (1..=value).fold(BigUint::one(), |acc, i| acc * BigUint::from(i))
}

/// Generate a threshold Paillier key: a public key and one partial private
/// key per decryption server.
///
/// The secret exponent d satisfies d = 0 (mod m) and d = 1 (mod n) via the
/// Chinese remainder theorem, and is shared with a random polynomial of
/// degree threshold - 1 over Z_{nm}.
pub fn keygen<R: Rng>(
    bits: usize,
    servers: u32,
    threshold: u32,
    rng: &mut R,
) -> Result<(PaillierPublicKey, Vec<PaillierPartialKey>), Error> {
    assert!(servers >= 1 && threshold >= 1 && threshold <= servers);

    // safe prime pairs until n = pq has full bit length and all four
    // primes are pairwise distinct
    let (n, m) = loop {
        let (p1, p) = gen_safe_prime(rng, bits);
        let (q1, q) = loop {
            let (q1, q) = gen_safe_prime(rng, bits);
            if p != q && p != q1 && q != p1 && q1 != p1 {
                break (q1, q);
            }
        };

        let n = &p * &q;
        if n.bits() == bits {
            break (n, &p1 * &q1);
        }
    };

    let n_squared = &n * &n;
    let n_plus_one = &n + BigUint::one();
    let nm = &n * &m;
    let delta = factorial(servers);

    // d = m * (m^-1 mod n)
    let m_inverse = mod_inverse(&m, &n)?;
    let d = &m * &m_inverse;

    // polynomial with constant term d, random coefficients below nm
    let mut coefficients = Vec::with_capacity(threshold as usize);
    coefficients.push(d);
    for _ in 1..threshold {
        coefficients.push(rng.gen_biguint_below(&nm));
    }

    // generator of the squares of Z*_{n^2}: square of a random unit
    // (the Shoup heuristic)
    let v = loop {
        let r = rng.gen_biguint(4 * bits);
        if r.gcd(&n).is_one() {
            break r.modpow(&BigUint::from(2u32), &n_squared);
        }
    };

    let mut partial_keys = Vec::with_capacity(servers as usize);
    let mut verification_keys = Vec::with_capacity(servers as usize);
    for id in 1..=servers {
        let share = evaluate_polynomial(&coefficients, id, &nm);
        let v_i = v.modpow(&(&delta * &share), &n_squared);
        verification_keys.push(VerificationKey { id, v: v_i });
        partial_keys.push(PaillierPartialKey { id, share });
    }

    let four_delta_squared = BigUint::from(4u32) * &delta * &delta;
    let combine_const = mod_inverse(&(four_delta_squared % &n), &n)?;

    let public = PaillierPublicKey {
        bits,
        servers,
        threshold,
        n,
        n_squared,
        n_plus_one,
        delta,
        combine_const,
        v,
        verification_keys,
    };

    Ok((public, partial_keys))
}
