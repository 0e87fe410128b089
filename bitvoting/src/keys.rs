use rand::{CryptoRng, Rng};
use secp256k1::ecdsa;
use secp256k1::{Message, SECP256K1};

use crate::{hash160, Error, Uint160, Uint256, VerifyError};

/// Every signing key carries exactly one role; transactions only accept
/// signatures made by keys of the role prescribed for their type.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Unknown,
    Trustee,
    Election,
    Vote,
    Mining,
}

/// The RIPEMD160(SHA256(..)) digest of a public key's encoded bytes.
/// The role is not part of the id.
pub type KeyId = Uint160;

/// A secp256k1 public key in compressed (33 byte) or uncompressed (65 byte)
/// encoding, tagged with its role.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey {
    #[serde(with = "crate::bytes_hex")]
    bytes: Vec<u8>,
    role: Role,
}

impl PublicKey {
    pub fn from_bytes(bytes: Vec<u8>, role: Role) -> Result<Self, Error> {
        secp256k1::PublicKey::from_slice(&bytes)?;
        Ok(PublicKey { bytes, role })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Key-id over the encoded key bytes only.
    pub fn key_id(&self) -> KeyId {
        hash160(&self.bytes)
    }

    fn parse(&self) -> Result<secp256k1::PublicKey, VerifyError> {
        secp256k1::PublicKey::from_slice(&self.bytes).map_err(|_| VerifyError::SignatureInvalid)
    }
}

/// DER-encoded ECDSA signature.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Signature(#[serde(with = "crate::bytes_hex")] pub Vec<u8>);

impl Signature {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A secp256k1 private scalar plus its role. The scalar is validated on
/// construction against the curve order: never zero, never above n - 1.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignKey {
    #[serde(with = "seckey_hex")]
    secret: secp256k1::SecretKey,
    role: Role,
}

impl SignKey {
    pub fn from_bytes(bytes: &[u8], role: Role) -> Result<Self, Error> {
        let secret = secp256k1::SecretKey::from_slice(bytes)?;
        Ok(SignKey { secret, role })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    /// Produce a DER-encoded ECDSA signature over the given digest.
    /// Signatures are low-S normalized.
    pub fn sign(&self, hash: &Uint256) -> Signature {
        let message = Message::from_digest(*hash.as_bytes());
        let signature = SECP256K1.sign_ecdsa(&message, &self.secret);
        Signature(signature.serialize_der().to_vec())
    }
}

/// A signing key together with its public half.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignKeyPair {
    pub key: SignKey,
    pub public: PublicKey,
}

impl SignKeyPair {
    /// Generate a fresh keypair of the given role.
    pub fn generate<R: Rng + CryptoRng>(role: Role, rng: &mut R) -> Self {
        let secret = secp256k1::SecretKey::new(rng);
        let public = secp256k1::PublicKey::from_secret_key(SECP256K1, &secret);
        SignKeyPair {
            key: SignKey { secret, role },
            public: PublicKey {
                bytes: public.serialize().to_vec(),
                role,
            },
        }
    }

    pub fn role(&self) -> Role {
        self.key.role
    }

    pub fn key_id(&self) -> KeyId {
        self.public.key_id()
    }
}

/// Verify a DER signature against a digest and public key.
///
/// The DER bytes are parsed leniently, re-serialized, and compared with the
/// input; any non-canonical encoding is rejected before the curve check.
pub fn verify_signature(
    public: &PublicKey,
    hash: &Uint256,
    signature: &Signature,
) -> Result<(), VerifyError> {
    if signature.is_empty() {
        return Err(VerifyError::SignatureInvalid);
    }
    let parsed =
        ecdsa::Signature::from_der_lax(&signature.0).map_err(|_| VerifyError::SignatureInvalid)?;
    if parsed.serialize_der().as_ref() != signature.0.as_slice() {
        return Err(VerifyError::NonCanonicalSignature);
    }

    let message = Message::from_digest(*hash.as_bytes());
    let key = public.parse()?;
    SECP256K1
        .verify_ecdsa(&message, &parsed, &key)
        .map_err(|_| VerifyError::SignatureInvalid)
}

mod seckey_hex {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        key: &secp256k1::SecretKey,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key.secret_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<secp256k1::SecretKey, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(de::Error::custom)?;
        secp256k1::SecretKey::from_slice(&bytes).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sign_and_verify_round_trip() {
        let mut rng = StdRng::seed_from_u64(1);
        let pair = SignKeyPair::generate(Role::Vote, &mut rng);
        let hash = crate::sha256d(b"payload");

        let signature = pair.key.sign(&hash);
        verify_signature(&pair.public, &hash, &signature).unwrap();

        // any flipped digest bit must fail
        let mut tampered = *hash.as_bytes();
        tampered[7] ^= 0x01;
        let tampered = Uint256::from_bytes(tampered);
        assert!(verify_signature(&pair.public, &tampered, &signature).is_err());
    }

    #[test]
    fn produced_signatures_are_low_s() {
        let mut rng = StdRng::seed_from_u64(2);
        let pair = SignKeyPair::generate(Role::Mining, &mut rng);

        for i in 0..16u8 {
            let hash = crate::sha256d(&[i]);
            let signature = pair.key.sign(&hash);
            let mut parsed = ecdsa::Signature::from_der(&signature.0).unwrap();
            let serialized_before = parsed.serialize_der().to_vec();
            parsed.normalize_s();
            assert_eq!(serialized_before, parsed.serialize_der().to_vec());
        }
    }

    #[test]
    fn non_canonical_der_is_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let pair = SignKeyPair::generate(Role::Election, &mut rng);
        let hash = crate::sha256d(b"x");
        let signature = pair.key.sign(&hash);

        // pad the DER encoding; the content still parses leniently but the
        // re-serialize-and-compare check must reject it
        let mut padded = signature.0.clone();
        padded[1] += 1; // claimed length
        padded.push(0x00);
        let result = verify_signature(&pair.public, &hash, &Signature(padded));
        assert!(result.is_err());
    }

    #[test]
    fn key_id_ignores_role() {
        let mut rng = StdRng::seed_from_u64(4);
        let pair = SignKeyPair::generate(Role::Trustee, &mut rng);
        let relabeled =
            PublicKey::from_bytes(pair.public.as_bytes().to_vec(), Role::Vote).unwrap();
        assert_eq!(pair.public.key_id(), relabeled.key_id());
        assert_ne!(pair.public, relabeled);
    }

    #[test]
    fn keypair_serde_round_trip() {
        let mut rng = StdRng::seed_from_u64(5);
        let pair = SignKeyPair::generate(Role::Vote, &mut rng);
        let bytes = serde_cbor::to_vec(&pair).unwrap();
        let back: SignKeyPair = serde_cbor::from_slice(&bytes).unwrap();
        assert_eq!(pair.public, back.public);
        assert_eq!(pair.key.secret_bytes(), back.key.secret_bytes());
    }
}
