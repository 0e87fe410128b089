use num_bigint_dig::{BigInt, BigUint, ModInverse, Sign};
use num_traits::One;

use crate::Error;

/// Modular inverse, failing when the value shares a factor with the modulus.
pub fn mod_inverse(value: &BigUint, modulus: &BigUint) -> Result<BigUint, Error> {
    value
        .mod_inverse(modulus)
        .and_then(|inverse| inverse.to_biguint())
        .ok_or(Error::NotInvertible)
}

/// Modular exponentiation with a signed exponent: negative exponents go
/// through the inverse of the base.
pub fn pow_mod_signed(
    base: &BigUint,
    exponent: &BigInt,
    modulus: &BigUint,
) -> Result<BigUint, Error> {
    match exponent.sign() {
        Sign::NoSign => Ok(BigUint::one()),
        Sign::Plus => {
            let magnitude = exponent
                .to_biguint()
                .ok_or(Error::NotInvertible)?;
            Ok(base.modpow(&magnitude, modulus))
        }
        Sign::Minus => {
            let magnitude = (-exponent)
                .to_biguint()
                .ok_or(Error::NotInvertible)?;
            let inverse = mod_inverse(base, modulus)?;
            Ok(inverse.modpow(&magnitude, modulus))
        }
    }
}
