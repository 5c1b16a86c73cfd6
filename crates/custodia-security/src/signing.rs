// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Export signing keys.
//
// The audit ledger holds one signer for its whole lifetime so that every
// export it produces verifies against the same public key.
//
// `ring` verifies both schemes and generates/signs with ECDSA P-256, but it
// cannot generate RSA keys; RSA key generation and PKCS#1 v1.5 signing come
// from the `rsa` crate.  Public keys are exported in the DER forms `ring`
// expects: PKCS#1 `RSAPublicKey` for RSA and an uncompressed SEC1 point for
// P-256.

use custodia_core::config::SigningScheme;
use custodia_core::error::{CustodiaError, Result};
use ring::rand::SystemRandom;
use ring::signature::{
    self, ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair, UnparsedPublicKey,
};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs1v15::SigningKey;
use rsa::sha2::Sha256;
use rsa::signature::{SignatureEncoding, Signer};
use tracing::{debug, instrument};

/// RSA modulus size for audit export keys.
pub const RSA_KEY_BITS: usize = 2048;

/// A long-lived key that signs audit exports.
pub trait LogSigner: Send + Sync {
    /// Sign `message`, returning the raw signature bytes.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;

    /// DER public key matching [`scheme`](Self::scheme).
    fn public_key_der(&self) -> &[u8];

    fn scheme(&self) -> SigningScheme;
}

/// Generate a fresh signer for `scheme`.
pub fn generate_signer(scheme: SigningScheme) -> Result<Box<dyn LogSigner>> {
    Ok(match scheme {
        SigningScheme::Rsa2048Sha256 => Box::new(RsaLogSigner::generate()?),
        SigningScheme::EcdsaP256Sha256 => Box::new(EcdsaLogSigner::generate()?),
    })
}

/// RSA-2048 / PKCS#1 v1.5 / SHA-256 signer.
pub struct RsaLogSigner {
    signing_key: SigningKey<Sha256>,
    public_key_der: Vec<u8>,
}

impl RsaLogSigner {
    #[instrument]
    pub fn generate() -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| CustodiaError::Signing(format!("RSA key generation failed: {e}")))?;

        let public_key_der = private_key
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| CustodiaError::Signing(format!("public key encoding failed: {e}")))?
            .as_bytes()
            .to_vec();

        debug!(bits = RSA_KEY_BITS, pubkey_len = public_key_der.len(), "RSA signing key generated");
        Ok(Self {
            signing_key: SigningKey::<Sha256>::new(private_key),
            public_key_der,
        })
    }
}

impl LogSigner for RsaLogSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let sig = self
            .signing_key
            .try_sign(message)
            .map_err(|e| CustodiaError::Signing(format!("RSA signing failed: {e}")))?;
        Ok(sig.to_vec())
    }

    fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    fn scheme(&self) -> SigningScheme {
        SigningScheme::Rsa2048Sha256
    }
}

/// ECDSA P-256 / SHA-256 signer (ASN.1 DER signatures).
pub struct EcdsaLogSigner {
    key_pair: EcdsaKeyPair,
    public_key_der: Vec<u8>,
    rng: SystemRandom,
}

impl EcdsaLogSigner {
    /// Generate a fresh P-256 key pair using the OS CSPRNG.
    #[instrument]
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();

        let pkcs8_document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|e| CustodiaError::Signing(format!("key generation failed: {e}")))?;

        let key_pair = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_ASN1_SIGNING,
            pkcs8_document.as_ref(),
            &rng,
        )
        .map_err(|e| CustodiaError::Signing(format!("key parsing failed: {e}")))?;

        let public_key_der = key_pair.public_key().as_ref().to_vec();
        debug!(pubkey_len = public_key_der.len(), "ECDSA P-256 signing key generated");

        Ok(Self {
            key_pair,
            public_key_der,
            rng,
        })
    }
}

impl LogSigner for EcdsaLogSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let sig = self
            .key_pair
            .sign(&self.rng, message)
            .map_err(|e| CustodiaError::Signing(format!("ECDSA signing failed: {e}")))?;
        Ok(sig.as_ref().to_vec())
    }

    fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    fn scheme(&self) -> SigningScheme {
        SigningScheme::EcdsaP256Sha256
    }
}

/// Check `sig` over `message` against a DER public key.
pub fn verify_signature(
    scheme: SigningScheme,
    public_key_der: &[u8],
    message: &[u8],
    sig: &[u8],
) -> Result<()> {
    let algorithm: &'static dyn signature::VerificationAlgorithm = match scheme {
        SigningScheme::Rsa2048Sha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        SigningScheme::EcdsaP256Sha256 => &signature::ECDSA_P256_SHA256_ASN1,
    };
    UnparsedPublicKey::new(algorithm, public_key_der)
        .verify(message, sig)
        .map_err(|_| CustodiaError::IntegrityViolation("signature does not verify".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsa_sign_and_verify() {
        let signer = RsaLogSigner::generate().expect("key generation failed");
        let message = b"[{\"event\":\"LOGIN\"}]";
        let sig = signer.sign(message).expect("signing failed");

        assert_eq!(sig.len(), RSA_KEY_BITS / 8);
        verify_signature(signer.scheme(), signer.public_key_der(), message, &sig)
            .expect("signature verification failed");
        assert!(
            verify_signature(signer.scheme(), signer.public_key_der(), b"other", &sig).is_err()
        );
    }

    #[test]
    fn ecdsa_sign_and_verify() {
        let signer = EcdsaLogSigner::generate().expect("key generation failed");

        // Uncompressed P-256 public key: 1 (0x04) + 32 + 32 = 65 bytes.
        assert_eq!(signer.public_key_der().len(), 65);
        assert_eq!(signer.public_key_der()[0], 0x04, "must be uncompressed point");

        let sig = signer.sign(b"audit export").expect("signing failed");
        verify_signature(signer.scheme(), signer.public_key_der(), b"audit export", &sig)
            .expect("signature verification failed");
    }

    #[test]
    fn signature_does_not_verify_under_another_key() {
        let a = EcdsaLogSigner::generate().expect("gen a");
        let b = EcdsaLogSigner::generate().expect("gen b");
        assert_ne!(a.public_key_der(), b.public_key_der());

        let sig = a.sign(b"payload").unwrap();
        assert!(verify_signature(b.scheme(), b.public_key_der(), b"payload", &sig).is_err());
    }

    #[test]
    fn generate_signer_honours_scheme() {
        let signer = generate_signer(SigningScheme::EcdsaP256Sha256).unwrap();
        assert_eq!(signer.scheme(), SigningScheme::EcdsaP256Sha256);
    }
}
