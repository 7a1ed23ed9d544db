use crate::config::KdfParams;
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose};
use chacha20poly1305::{
    KeyInit, XChaCha20Poly1305, XNonce,
    aead::{Aead, AeadCore, OsRng},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

const ENVELOPE_VERSION: u32 = 1;
const KDF_ALGO: &str = "argon2id";
const NONCE_LEN: usize = 24;

// Верхние границы параметров KDF: и для config.json, и для чужого шифротекста.
pub(crate) const MAX_MEMORY_MIB: u32 = 1024;
pub(crate) const MAX_ITERATIONS: u32 = 64;
pub(crate) const MAX_PARALLELISM: u32 = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("password must not be empty")]
    EmptyPassword,
    #[error("invalid password")]
    InvalidPassword,
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
    #[error("kdf parameters out of range: {0}")]
    KdfParams(String),
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("encrypt error: {0}")]
    Encrypt(String),
}

/// Симметричное шифрование текста ключом, выведенным из пароля.
///
/// Шифротекст должен быть самоописывающим: `decrypt` получает только его и пароль.
/// Неверный пароль это обычный исход (`Err`), а не паника.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &str, password: &str) -> Result<String, CryptoError>;
    fn decrypt(&self, ciphertext: &str, password: &str) -> Result<Zeroizing<String>, CryptoError>;
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    kdf: EnvelopeKdf,
    nonce: String,
    ciphertext: String,
}

#[derive(Serialize, Deserialize)]
struct EnvelopeKdf {
    algo: String,
    memory_mib: u32,
    iterations: u32,
    parallelism: u32,
    salt: String,
}

/// Argon2id + XChaCha20-Poly1305, соль и nonce лежат внутри шифротекста.
#[derive(Debug, Clone)]
pub struct XChaChaCipher {
    kdf: KdfParams,
}

impl XChaChaCipher {
    /// Параметры вне границ `check_kdf` отвергаются: `decrypt` такой шифротекст не примет.
    pub fn new(kdf: KdfParams) -> Result<Self, CryptoError> {
        check_kdf(&kdf)?;
        Ok(Self { kdf })
    }
}

/// Проверить параметры KDF: каждый в диапазоне 1..=MAX.
pub(crate) fn check_kdf(kdf: &KdfParams) -> Result<(), CryptoError> {
    let bounds = [
        ("memory_mib", kdf.memory_mib, MAX_MEMORY_MIB),
        ("iterations", kdf.iterations, MAX_ITERATIONS),
        ("parallelism", kdf.parallelism, MAX_PARALLELISM),
    ];
    for (name, value, max) in bounds {
        if !(1..=max).contains(&value) {
            return Err(CryptoError::KdfParams(format!(
                "{name} = {value}, expected 1..={max}"
            )));
        }
    }
    Ok(())
}

impl Cipher for XChaChaCipher {
    fn encrypt(&self, plaintext: &str, password: &str) -> Result<String, CryptoError> {
        if password.is_empty() {
            return Err(CryptoError::EmptyPassword);
        }
        check_kdf(&self.kdf)?;

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = derive_key(password, &salt, &self.kdf)?;

        let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.as_slice()));
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            kdf: EnvelopeKdf {
                algo: KDF_ALGO.to_string(),
                memory_mib: self.kdf.memory_mib,
                iterations: self.kdf.iterations,
                parallelism: self.kdf.parallelism,
                salt: general_purpose::STANDARD.encode(salt),
            },
            nonce: general_purpose::STANDARD.encode(nonce),
            ciphertext: general_purpose::STANDARD.encode(&ciphertext),
        };

        let json =
            serde_json::to_vec(&envelope).map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        Ok(general_purpose::STANDARD.encode(json))
    }

    fn decrypt(&self, ciphertext: &str, password: &str) -> Result<Zeroizing<String>, CryptoError> {
        let envelope = parse_envelope(ciphertext)?;
        let kdf = &envelope.kdf;

        let salt = decode_field("salt", &kdf.salt)?;
        let nonce_bytes = decode_field("nonce", &envelope.nonce)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::Malformed(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce_bytes.len()
            )));
        }
        let ct = decode_field("ciphertext", &envelope.ciphertext)?;

        let params = KdfParams {
            memory_mib: kdf.memory_mib,
            iterations: kdf.iterations,
            parallelism: kdf.parallelism,
        };
        let key = derive_key(password, &salt, &params)?;

        let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(key.as_slice()));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(XNonce::from_slice(&nonce_bytes), ct.as_ref())
                .map_err(|_| CryptoError::InvalidPassword)?,
        );

        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| CryptoError::Malformed("plaintext is not utf-8".to_string()))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}

fn parse_envelope(ciphertext: &str) -> Result<Envelope, CryptoError> {
    let raw = general_purpose::STANDARD
        .decode(ciphertext.trim())
        .map_err(|e| CryptoError::Malformed(format!("base64: {e}")))?;
    let envelope: Envelope = serde_json::from_slice(&raw)
        .map_err(|e| CryptoError::Malformed(format!("envelope: {e}")))?;

    if envelope.version != ENVELOPE_VERSION {
        return Err(CryptoError::Malformed(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }
    let kdf = &envelope.kdf;
    if kdf.algo != KDF_ALGO {
        return Err(CryptoError::Malformed(format!("unsupported kdf '{}'", kdf.algo)));
    }
    check_kdf(&KdfParams {
        memory_mib: kdf.memory_mib,
        iterations: kdf.iterations,
        parallelism: kdf.parallelism,
    })
    .map_err(|e| CryptoError::Malformed(e.to_string()))?;
    Ok(envelope)
}

fn decode_field(field: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    general_purpose::STANDARD
        .decode(value)
        .map_err(|e| CryptoError::Malformed(format!("{field}: {e}")))
}

/// Деривация 32-байтного ключа из пароля (Argon2id).
fn derive_key(
    password: &str,
    salt: &[u8],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let params = Params::new(
        kdf.memory_mib.saturating_mul(1024), // m_cost в KiB
        kdf.iterations,
        kdf.parallelism,
        Some(32),
    )
    .map_err(|e| CryptoError::Kdf(format!("argon2 params error: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut out[..])
        .map_err(|e| CryptoError::Kdf(format!("argon2 error: {e}")))?;
    Ok(out)
}

#[cfg(test)]
pub(crate) fn test_cipher() -> XChaChaCipher {
    XChaChaCipher::new(KdfParams {
        memory_mib: 1,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap()
}
