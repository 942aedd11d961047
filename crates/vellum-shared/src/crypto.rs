//! Password-based note encryption.
//!
//! Content is sealed with XChaCha20-Poly1305 under a key derived from the
//! note password with Argon2id. Password verification uses a separate salted
//! Argon2id verifier so that checking a password never touches the content.
//!
//! Encrypted blob layout (base64 of):
//!
//! ```text
//! version(1) | m_kib(u32 BE) | t(u32 BE) | p(u32 BE) | salt(16) | nonce(24) | ciphertext+tag
//! ```
//!
//! Artifact text form: `v1$<m_kib>$<t>$<p>$<salt b64>$<hash b64>`.

use std::fmt;
use std::str::FromStr;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::constants::{
    ARTIFACT_VERSION, BLOB_VERSION, DEFAULT_KDF_ITERATIONS, DEFAULT_KDF_MEMORY_KIB,
    DEFAULT_KDF_PARALLELISM, MAX_KDF_ITERATIONS, MAX_KDF_MEMORY_KIB, MAX_KDF_PARALLELISM,
    NONCE_SIZE, SALT_SIZE, SYMMETRIC_KEY_SIZE, TAG_SIZE, VERIFIER_SIZE,
};
use crate::error::CryptoError;

const HEADER_SIZE: usize = 1 + 4 * 3;
const MIN_BLOB_SIZE: usize = HEADER_SIZE + SALT_SIZE + NONCE_SIZE + TAG_SIZE;

// ---------------------------------------------------------------------------
// KDF parameters
// ---------------------------------------------------------------------------

/// Argon2id cost parameters. Stored alongside every artifact and blob so a
/// parameter change never strands existing notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfParams {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    /// Reject parameters that argon2 would refuse or that would let stored
    /// data demand unbounded work.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.parallelism == 0 || self.parallelism > MAX_KDF_PARALLELISM {
            return Err(CryptoError::KeyDerivation(format!(
                "parallelism {} out of range",
                self.parallelism
            )));
        }
        if self.iterations == 0 || self.iterations > MAX_KDF_ITERATIONS {
            return Err(CryptoError::KeyDerivation(format!(
                "iterations {} out of range",
                self.iterations
            )));
        }
        if self.memory_kib < 8 * self.parallelism || self.memory_kib > MAX_KDF_MEMORY_KIB {
            return Err(CryptoError::KeyDerivation(format!(
                "memory {} KiB out of range",
                self.memory_kib
            )));
        }
        Ok(())
    }

    fn argon2(&self) -> Result<Argon2<'static>, CryptoError> {
        self.validate()?;
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(SYMMETRIC_KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::new(
            DEFAULT_KDF_MEMORY_KIB,
            DEFAULT_KDF_ITERATIONS,
            DEFAULT_KDF_PARALLELISM,
        )
    }
}

fn derive_bytes(
    password: &[u8],
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; SYMMETRIC_KEY_SIZE]>, CryptoError> {
    let mut out = Zeroizing::new([0u8; SYMMETRIC_KEY_SIZE]);
    params
        .argon2()?
        .hash_password_into(password, salt, out.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(out)
}

fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// ---------------------------------------------------------------------------
// Session key
// ---------------------------------------------------------------------------

/// Content key derived from a password, kept only while a note is unlocked.
/// Lets the session re-seal edits without holding on to the password.
pub struct SessionKey {
    key: Zeroizing<[u8; SYMMETRIC_KEY_SIZE]>,
    salt: [u8; SALT_SIZE],
    params: KdfParams,
}

impl SessionKey {
    pub fn params(&self) -> KdfParams {
        self.params
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Password artifact
// ---------------------------------------------------------------------------

/// Salted verifier for a password. Sufficient to check a password, useless
/// for recovering it or the content key.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordArtifact {
    params: KdfParams,
    salt: [u8; SALT_SIZE],
    hash: [u8; VERIFIER_SIZE],
}

impl PasswordArtifact {
    pub fn params(&self) -> KdfParams {
        self.params
    }
}

impl fmt::Debug for PasswordArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordArtifact")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PasswordArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}${}${}${}${}${}",
            ARTIFACT_VERSION,
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            STANDARD.encode(self.salt),
            STANDARD.encode(self.hash),
        )
    }
}

impl FromStr for PasswordArtifact {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |why: &str| CryptoError::MalformedArtifact(why.to_string());

        let parts: Vec<&str> = s.split('$').collect();
        if parts.len() != 6 {
            return Err(malformed("expected 6 fields"));
        }
        if parts[0] != ARTIFACT_VERSION {
            return Err(malformed("unknown artifact version"));
        }

        let num = |field: &str| field.parse::<u32>().map_err(|_| malformed("bad parameter"));
        let params = KdfParams::new(num(parts[1])?, num(parts[2])?, num(parts[3])?);
        params
            .validate()
            .map_err(|e| CryptoError::MalformedArtifact(e.to_string()))?;

        let salt: [u8; SALT_SIZE] = STANDARD
            .decode(parts[4])
            .map_err(|_| malformed("bad salt encoding"))?
            .try_into()
            .map_err(|_| malformed("bad salt length"))?;
        let hash: [u8; VERIFIER_SIZE] = STANDARD
            .decode(parts[5])
            .map_err(|_| malformed("bad hash encoding"))?
            .try_into()
            .map_err(|_| malformed("bad hash length"))?;

        Ok(Self { params, salt, hash })
    }
}

// ---------------------------------------------------------------------------
// Cipher
// ---------------------------------------------------------------------------

/// Symmetric note cipher. Stateless apart from the KDF parameters used for
/// newly created artifacts and blobs.
#[derive(Debug, Clone, Default)]
pub struct Cipher {
    params: KdfParams,
}

impl Cipher {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Derive a verifier under a fresh random salt.
    pub fn derive_verifier(&self, password: &str) -> Result<PasswordArtifact, CryptoError> {
        self.derive_verifier_with_salt(password, generate_salt())
    }

    /// Deterministic for a given password and salt.
    pub fn derive_verifier_with_salt(
        &self,
        password: &str,
        salt: [u8; SALT_SIZE],
    ) -> Result<PasswordArtifact, CryptoError> {
        let hash = derive_bytes(password.as_bytes(), &salt, &self.params)?;
        Ok(PasswordArtifact {
            params: self.params,
            salt,
            hash: *hash,
        })
    }

    /// Constant-time check of `password` against `artifact`.
    pub fn verify(&self, password: &str, artifact: &PasswordArtifact) -> bool {
        match derive_bytes(password.as_bytes(), &artifact.salt, &artifact.params) {
            Ok(candidate) => candidate.as_slice().ct_eq(&artifact.hash).into(),
            Err(_) => false,
        }
    }

    /// Like [`Cipher::verify`], parsing the stored artifact first.
    pub fn verify_encoded(&self, password: &str, artifact: &str) -> Result<bool, CryptoError> {
        let artifact = PasswordArtifact::from_str(artifact)?;
        Ok(self.verify(password, &artifact))
    }

    /// Derive a fresh content key for `password`.
    pub fn derive_key(&self, password: &str) -> Result<SessionKey, CryptoError> {
        let salt = generate_salt();
        let key = derive_bytes(password.as_bytes(), &salt, &self.params)?;
        Ok(SessionKey {
            key,
            salt,
            params: self.params,
        })
    }

    /// Encrypt `plaintext` under a key derived from `password`.
    pub fn encrypt(&self, plaintext: &str, password: &str) -> Result<String, CryptoError> {
        let key = self.derive_key(password)?;
        self.seal(&key, plaintext)
    }

    /// Encrypt with already-derived key material. Each call uses a new nonce.
    pub fn seal(&self, key: &SessionKey, plaintext: &str) -> Result<String, CryptoError> {
        let raw: &[u8; SYMMETRIC_KEY_SIZE] = &key.key;
        let cipher = XChaCha20Poly1305::new(raw.into());
        let nonce_bytes = generate_nonce();
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut output = Vec::with_capacity(MIN_BLOB_SIZE + plaintext.len());
        output.push(BLOB_VERSION);
        output.extend_from_slice(&key.params.memory_kib.to_be_bytes());
        output.extend_from_slice(&key.params.iterations.to_be_bytes());
        output.extend_from_slice(&key.params.parallelism.to_be_bytes());
        output.extend_from_slice(&key.salt);
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(output))
    }

    /// Decrypt a blob produced by [`Cipher::encrypt`] or [`Cipher::seal`].
    pub fn decrypt(&self, blob: &str, password: &str) -> Result<String, CryptoError> {
        let (plaintext, _key) = self.open(blob, password)?;
        Ok(plaintext.to_string())
    }

    /// Decrypt and hand back the derived key so the caller can re-seal later.
    pub fn open(
        &self,
        blob: &str,
        password: &str,
    ) -> Result<(Zeroizing<String>, SessionKey), CryptoError> {
        let parts = BlobParts::parse(blob)?;
        let key = derive_bytes(password.as_bytes(), &parts.salt, &parts.params)?;

        let raw: &[u8; SYMMETRIC_KEY_SIZE] = &key;
        let cipher = XChaCha20Poly1305::new(raw.into());
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(XNonce::from_slice(&parts.nonce), parts.ciphertext.as_slice())
                .map_err(|_| CryptoError::DecryptionFailed)?,
        );

        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| CryptoError::MalformedBlob("plaintext is not UTF-8".into()))?;

        Ok((
            Zeroizing::new(text.to_string()),
            SessionKey {
                key,
                salt: parts.salt,
                params: parts.params,
            },
        ))
    }
}

struct BlobParts {
    params: KdfParams,
    salt: [u8; SALT_SIZE],
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

impl BlobParts {
    fn parse(blob: &str) -> Result<Self, CryptoError> {
        let data = STANDARD
            .decode(blob.trim())
            .map_err(|_| CryptoError::MalformedBlob("invalid base64".into()))?;

        if data.len() < MIN_BLOB_SIZE {
            return Err(CryptoError::MalformedBlob(format!(
                "{} bytes is shorter than the {} byte minimum",
                data.len(),
                MIN_BLOB_SIZE
            )));
        }
        if data[0] != BLOB_VERSION {
            return Err(CryptoError::MalformedBlob(format!(
                "unknown blob version {}",
                data[0]
            )));
        }

        let word = |at: usize| u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let params = KdfParams::new(word(1), word(5), word(9));
        params
            .validate()
            .map_err(|e| CryptoError::MalformedBlob(e.to_string()))?;

        let (salt, rest) = data[HEADER_SIZE..].split_at(SALT_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let mut salt_arr = [0u8; SALT_SIZE];
        salt_arr.copy_from_slice(salt);
        let mut nonce_arr = [0u8; NONCE_SIZE];
        nonce_arr.copy_from_slice(nonce);

        Ok(Self {
            params,
            salt: salt_arr,
            nonce: nonce_arr,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> Cipher {
        Cipher::new(KdfParams::new(64, 1, 1))
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let c = cipher();
        for plaintext in ["", "hello", "Ünïcødé ✓ note\nwith lines", &"x".repeat(10_000)] {
            let blob = c.encrypt(plaintext, "secret123").unwrap();
            assert_eq!(c.decrypt(&blob, "secret123").unwrap(), plaintext);
        }
    }

    #[test]
    fn test_encryption_is_randomized() {
        let c = cipher();
        let a = c.encrypt("same", "secret123").unwrap();
        let b = c.encrypt("same", "secret123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_password_fails() {
        let c = cipher();
        let blob = c.encrypt("Secret message", "secret123").unwrap();
        assert_eq!(
            c.decrypt(&blob, "secret124").unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let c = cipher();
        let blob = c.encrypt("Important data", "secret123").unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();
        let len = raw.len();
        raw[len - 1] ^= 0xFF;
        let tampered = STANDARD.encode(raw);

        assert_eq!(
            c.decrypt(&tampered, "secret123").unwrap_err(),
            CryptoError::DecryptionFailed
        );
    }

    #[test]
    fn test_truncated_and_garbage_blobs_are_structural_errors() {
        let c = cipher();
        let blob = c.encrypt("data", "secret123").unwrap();
        let raw = STANDARD.decode(&blob).unwrap();
        let truncated = STANDARD.encode(&raw[..MIN_BLOB_SIZE - 1]);

        for bad in ["", "not base64 !!", truncated.as_str()] {
            let err = c.decrypt(bad, "secret123").unwrap_err();
            assert!(err.is_structural(), "{bad:?} gave {err:?}");
        }
    }

    #[test]
    fn test_absurd_kdf_parameters_rejected() {
        let c = cipher();
        let blob = c.encrypt("data", "secret123").unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();
        raw[1..5].copy_from_slice(&u32::MAX.to_be_bytes());

        let err = c.decrypt(&STANDARD.encode(raw), "secret123").unwrap_err();
        assert!(matches!(err, CryptoError::MalformedBlob(_)));
    }

    #[test]
    fn test_blob_decrypts_under_different_configured_params() {
        let old = Cipher::new(KdfParams::new(64, 2, 1));
        let new = Cipher::new(KdfParams::new(128, 1, 1));
        let blob = old.encrypt("kept", "secret123").unwrap();
        assert_eq!(new.decrypt(&blob, "secret123").unwrap(), "kept");
    }

    #[test]
    fn test_seal_reuses_session_key() {
        let c = cipher();
        let blob = c.encrypt("v1", "secret123").unwrap();
        let (plain, key) = c.open(&blob, "secret123").unwrap();
        assert_eq!(plain.as_str(), "v1");

        let resealed = c.seal(&key, "v2").unwrap();
        assert_eq!(c.decrypt(&resealed, "secret123").unwrap(), "v2");
    }

    #[test]
    fn test_verifier_accepts_only_its_password() {
        let c = cipher();
        let artifact = c.derive_verifier("secret123").unwrap();
        assert!(c.verify("secret123", &artifact));
        assert!(!c.verify("secret12", &artifact));
        assert!(!c.verify("", &artifact));
    }

    #[test]
    fn test_verifier_deterministic_for_fixed_salt() {
        let c = cipher();
        let salt = [7u8; SALT_SIZE];
        let a = c.derive_verifier_with_salt("secret123", salt).unwrap();
        let b = c.derive_verifier_with_salt("secret123", salt).unwrap();
        let other = c.derive_verifier_with_salt("secret124", salt).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, other);
    }

    #[test]
    fn test_artifact_text_form_round_trips() {
        let c = cipher();
        let artifact = c.derive_verifier("secret123").unwrap();
        let text = artifact.to_string();
        assert!(text.starts_with("v1$64$1$1$"));

        let parsed: PasswordArtifact = text.parse().unwrap();
        assert_eq!(parsed, artifact);
        assert!(c.verify_encoded("secret123", &text).unwrap());
    }

    #[test]
    fn test_legacy_integer_hash_is_malformed_artifact() {
        let c = cipher();
        let err = c.verify_encoded("secret123", "-1234567").unwrap_err();
        assert!(matches!(err, CryptoError::MalformedArtifact(_)));
    }

    #[test]
    fn test_artifact_is_independent_of_content_key() {
        let c = cipher();
        let artifact = c.derive_verifier("secret123").unwrap();
        let blob = c.encrypt("payload", "secret123").unwrap();
        let raw = STANDARD.decode(&blob).unwrap();
        let blob_salt = &raw[HEADER_SIZE..HEADER_SIZE + SALT_SIZE];
        assert_ne!(blob_salt, &artifact.salt[..]);
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let c = cipher();
        let artifact = c.derive_verifier("secret123").unwrap();
        let shown = format!("{artifact:?}");
        assert!(!shown.contains(&STANDARD.encode(artifact.hash)));
    }
}
