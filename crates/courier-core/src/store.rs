use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const NONCE_LEN: usize = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("io")]
    Io,
    #[error("codec")]
    Codec,
    #[error("crypto")]
    Crypto,
}

#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; 32],
}

impl MasterKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

pub trait KeyProvider: Send + Sync {
    fn get_or_create_master_key(&self) -> Result<MasterKey, StorageError>;
    fn get_master_key(&self) -> Result<MasterKey, StorageError>;
}

#[derive(Serialize, Deserialize, Default)]
struct Stored {
    entries: HashMap<String, Vec<u8>>,
}

pub struct EncryptedStore {
    path: PathBuf,
    data: Stored,
    namespace: String,
    key: MasterKey,
}

impl EncryptedStore {
    pub fn open(
        path: impl AsRef<Path>,
        namespace: &str,
        key_provider: &dyn KeyProvider,
    ) -> Result<Self, StorageError> {
        let mut base = path.as_ref().to_path_buf();
        fs::create_dir_all(&base).map_err(|_| StorageError::Io)?;
        base.push(format!("{}-store.bin", namespace));
        let key = key_provider.get_or_create_master_key()?;
        let data = if base.exists() {
            let sealed = fs::read(&base).map_err(|_| StorageError::Io)?;
            Self::unseal(&key, &sealed)?
        } else {
            Stored::default()
        };
        Ok(Self {
            path: base,
            data,
            namespace: namespace.to_string(),
            key,
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.entries.get(key).cloned())
    }

    pub fn put(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.data.entries.insert(key.to_string(), value.to_vec());
        self.flush()
    }

    pub fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.data.entries.remove(key);
        self.flush()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }

    fn flush(&self) -> Result<(), StorageError> {
        let plain = serde_json::to_vec(&self.data).map_err(|_| StorageError::Codec)?;
        let sealed = Self::seal(&self.key, &plain)?;
        fs::write(&self.path, sealed).map_err(|_| StorageError::Io)?;
        Ok(())
    }

    fn seal(key: &MasterKey, plain: &[u8]) -> Result<Vec<u8>, StorageError> {
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plain)
            .map_err(|_| StorageError::Crypto)?;
        let mut out = nonce.to_vec();
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unseal(key: &MasterKey, sealed: &[u8]) -> Result<Stored, StorageError> {
        if sealed.len() < NONCE_LEN {
            return Err(StorageError::Crypto);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
        let plain = cipher
            .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| StorageError::Crypto)?;
        serde_json::from_slice(&plain).map_err(|_| StorageError::Codec)
    }
}
