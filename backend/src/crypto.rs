//! Cryptography module for backup encryption
//!
//! Provides AES-256-GCM encryption with Argon2id key derivation.
//! Encrypted artifacts are laid out as `salt ‖ nonce ‖ ciphertext`, the
//! salt being freshly generated for every encryption so decryption can
//! recover it from the file itself.

use crate::config::{
    ENCRYPTED_SUFFIX, KDF_ITERATIONS, KDF_MEMORY_KIB, KDF_PARALLELISM, NONCE_SIZE, SALT_SIZE,
};
use crate::error::{AppError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use std::path::{Path, PathBuf};
use tokio::fs;

const KEY_SIZE: usize = 32; // AES-256

/// Encrypt data with AES-256-GCM
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let key = derive_key(password, &salt)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| AppError::Generic(format!("Cipher initialization failed: {}", e)))?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| AppError::Generic(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt data produced by [`encrypt`].
///
/// A wrong password, a truncated payload and a tampered payload all yield
/// [`AppError::Decryption`].
pub fn decrypt(data: &[u8], password: &str) -> Result<Vec<u8>> {
    if data.len() < SALT_SIZE + NONCE_SIZE {
        return Err(AppError::Decryption);
    }

    let (salt, rest) = data.split_at(SALT_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

    let key = derive_key(password, salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| AppError::Generic(format!("Cipher initialization failed: {}", e)))?;

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| AppError::Decryption)
}

/// Encrypt a file, writing `<path>.encrypted` next to it.
pub async fn encrypt_file(path: &Path, password: &str) -> Result<PathBuf> {
    let plaintext = fs::read(path).await?;
    let encrypted = encrypt(&plaintext, password)?;

    let out_path = PathBuf::from(format!("{}{}", path.display(), ENCRYPTED_SUFFIX));
    fs::write(&out_path, encrypted).await?;

    tracing::debug!("Encrypted {:?} -> {:?}", path, out_path);
    Ok(out_path)
}

/// Decrypt a file, writing the plaintext next to it.
///
/// The output drops the `.encrypted` suffix, or gains `.decrypted` when the
/// input has no such suffix. Nothing is written when decryption fails.
pub async fn decrypt_file(path: &Path, password: &str) -> Result<PathBuf> {
    let data = fs::read(path).await?;
    let plaintext = decrypt(&data, password)?;

    let out_path = decrypted_path(path);
    fs::write(&out_path, plaintext).await?;

    tracing::debug!("Decrypted {:?} -> {:?}", path, out_path);
    Ok(out_path)
}

/// Whether a file name signals an encrypted artifact
pub fn is_encrypted_name(name: &str) -> bool {
    name.ends_with(ENCRYPTED_SUFFIX)
}

fn decrypted_path(path: &Path) -> PathBuf {
    let display = path.display().to_string();
    match display.strip_suffix(ENCRYPTED_SUFFIX) {
        Some(stripped) if !stripped.is_empty() => PathBuf::from(stripped),
        _ => PathBuf::from(format!("{}.decrypted", display)),
    }
}

/// Derive a 256-bit key from password and salt using Argon2id
fn kdf() -> Result<Argon2<'static>> {
    let params = Params::new(
        KDF_MEMORY_KIB,
        KDF_ITERATIONS,
        KDF_PARALLELISM,
        Some(KEY_SIZE),
    )
    .map_err(|e| AppError::Generic(format!("Invalid key derivation parameters: {}", e)))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; KEY_SIZE]> {
    let mut key = [0u8; KEY_SIZE];
    kdf()?
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| AppError::Generic(format!("Key derivation failed: {}", e)))?;
    Ok(key)
}
