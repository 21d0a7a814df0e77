//! Symmetric encryption of archived files

use fernet::Fernet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::pipeline::error::CipherError;

/// Reversible byte transform applied to assets before they are stored.
///
/// `decrypt(encrypt(b)) == b` for every `b`, including the empty input.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// Fernet (AES-128-CBC + HMAC-SHA256) tokens, stored as their ASCII form
pub struct FernetCipher {
    fernet: Fernet,
}

impl std::fmt::Debug for FernetCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FernetCipher").finish_non_exhaustive()
    }
}

impl FernetCipher {
    /// Build a cipher from a url-safe base64 encoded 32-byte key
    pub fn new(key: &str) -> Result<Self, CipherError> {
        let fernet = Fernet::new(key.trim()).ok_or(CipherError::InvalidKey)?;
        Ok(Self { fernet })
    }

    /// Generate a fresh random key
    pub fn generate_key() -> String {
        Fernet::generate_key()
    }
}

impl Cipher for FernetCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(self.fernet.encrypt(plaintext).into_bytes())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let token = std::str::from_utf8(ciphertext)
            .map_err(|_| CipherError::Decrypt("token is not ASCII".to_string()))?;
        self.fernet
            .decrypt(token.trim())
            .map_err(|_| CipherError::Decrypt("invalid token or wrong key".to_string()))
    }
}

/// Outcome of [`decrypt_dir`]
#[derive(Debug, Default)]
pub struct DecryptSummary {
    /// Files written to the output directory
    pub written: Vec<PathBuf>,

    /// Input files that could not be decrypted
    pub failed: Vec<PathBuf>,
}

/// Output name for a decrypted file: `photo.jpg` becomes `photo.decrypted.jpg`
pub fn decrypted_file_name(name: &Path) -> PathBuf {
    let stem = name.file_stem().unwrap_or(name.as_os_str()).to_string_lossy();
    match name.extension() {
        Some(ext) => PathBuf::from(format!("{}.decrypted.{}", stem, ext.to_string_lossy())),
        None => PathBuf::from(format!("{}.decrypted", stem)),
    }
}

/// Decrypt every regular file in `input` into `output`.
///
/// Files that fail to decrypt are reported and skipped.
#[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
pub async fn decrypt_dir(
    cipher: &dyn Cipher,
    input: &Path,
    output: &Path,
) -> Result<DecryptSummary, CipherError> {
    fs::create_dir_all(output).await?;

    let mut entries = fs::read_dir(input).await?;
    let mut summary = DecryptSummary::default();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let ciphertext = fs::read(&path).await?;
        match cipher.decrypt(&ciphertext) {
            Ok(plaintext) => {
                let target = output.join(decrypted_file_name(Path::new(&entry.file_name())));
                fs::write(&target, plaintext).await?;
                summary.written.push(target);
            }
            Err(e) => {
                warn!(file = %path.display(), "Skipping file: {}", e);
                summary.failed.push(path);
            }
        }
    }

    info!(
        written = summary.written.len(),
        failed = summary.failed.len(),
        "Decryption finished"
    );
    Ok(summary)
}
