//! Password-sealed single-file record store.
//!
//! Layout: a fixed 128-byte header followed by an XChaCha20-Poly1305
//! ciphertext of the JSON payload. The key is derived with Argon2id from the
//! vault password and the salt stored in the header. Every mutation rewrites
//! the file under a fresh nonce before it returns.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{decrypt, derive_key, encrypt, generate_nonce, generate_salt, KdfParams};
use crate::error::{LockError, Result};
use crate::store::RecordStore;

pub const VAULT_MAGIC: &[u8] = b"ALOCK01\0";
pub const VAULT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultHeader {
    pub vault_version: u32,
    pub kdf: KdfParams,
    pub salt: [u8; 32],
    pub nonce: [u8; 24],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultPayload {
    vault_id: String,
    created_at: DateTime<Utc>,
    last_modified: DateTime<Utc>,
    #[serde(default)]
    records: BTreeMap<String, String>,
}

struct VaultInner {
    header: VaultHeader,
    payload: VaultPayload,
    key: Zeroizing<Vec<u8>>,
}

pub struct Vault {
    path: PathBuf,
    inner: Mutex<VaultInner>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("path", &self.path).finish()
    }
}

impl Vault {
    pub fn create_new<P: AsRef<Path>>(path: P, password: &str) -> Result<Self> {
        Self::create_with_params(path, password, KdfParams::default())
    }

    pub fn create_with_params<P: AsRef<Path>>(
        path: P,
        password: &str,
        kdf: KdfParams,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(LockError::Vault(format!(
                "vault already exists at {}",
                path.display()
            )));
        }
        let salt = generate_salt();
        let key = derive_key(password, &salt, kdf)?;
        let now = Utc::now();
        let inner = VaultInner {
            header: VaultHeader {
                vault_version: VAULT_VERSION,
                kdf,
                salt,
                nonce: generate_nonce(),
            },
            payload: VaultPayload {
                vault_id: Uuid::new_v4().to_string(),
                created_at: now,
                last_modified: now,
                records: BTreeMap::new(),
            },
            key,
        };
        let vault = Self {
            path,
            inner: Mutex::new(inner),
        };
        {
            let mut guard = vault.inner.lock();
            let records = guard.payload.records.clone();
            persist(&vault.path, &mut guard, records)?;
        }
        Ok(vault)
    }

    pub fn open<P: AsRef<Path>>(path: P, password: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file =
            File::open(&path).map_err(|e| LockError::Vault(format!("open vault: {e}")))?;
        let mut header_buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = VaultHeader::from_bytes(&header_buf)?;
        let mut ciphertext = Vec::new();
        file.read_to_end(&mut ciphertext)?;

        let key = derive_key(password, &header.salt, header.kdf)?;
        let plaintext = Zeroizing::new(decrypt(&key, &header.nonce, &ciphertext).map_err(|_| {
            LockError::Vault("decrypt vault: wrong password or corrupt file".into())
        })?);
        let payload: VaultPayload = serde_json::from_slice(&plaintext)?;
        debug!(vault_id = %payload.vault_id, records = payload.records.len(), "vault opened");
        Ok(Self {
            path,
            inner: Mutex::new(VaultInner {
                header,
                payload,
                key,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn vault_id(&self) -> String {
        self.inner.lock().payload.vault_id.clone()
    }

    pub fn header(&self) -> VaultHeader {
        self.inner.lock().header.clone()
    }

    fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let mut guard = self.inner.lock();
        let mut records = guard.payload.records.clone();
        apply(&mut records);
        persist(&self.path, &mut guard, records)
    }
}

/// Seal `records` into the vault file and, only once the write succeeded,
/// make them the in-memory view.
fn persist(path: &Path, inner: &mut VaultInner, records: BTreeMap<String, String>) -> Result<()> {
    let mut payload = inner.payload.clone();
    payload.records = records;
    payload.last_modified = Utc::now();
    let plaintext = Zeroizing::new(serde_json::to_vec(&payload)?);

    // Fresh nonce for every save; XChaCha20-Poly1305 must never reuse one.
    let mut header = inner.header.clone();
    header.nonce = generate_nonce();
    let ciphertext = encrypt(&inner.key, &header.nonce, &plaintext)?;

    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(&ciphertext)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    inner.header = header;
    inner.payload = payload;
    Ok(())
}

impl RecordStore for Vault {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let guard = self.inner.lock();
        match guard.payload.records.get(key) {
            Some(value) => Ok(Some(general_purpose::STANDARD.decode(value)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let encoded = general_purpose::STANDARD.encode(value);
        self.mutate(|records| {
            records.insert(key.to_string(), encoded);
        })
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.mutate(|records| {
            records.remove(key);
        })
    }

    fn delete_many(&self, keys: &[String]) -> Result<()> {
        self.mutate(|records| {
            for key in keys {
                records.remove(key);
            }
        })
    }

    fn clear(&self) -> Result<()> {
        self.mutate(|records| records.clear())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let guard = self.inner.lock();
        guard
            .payload
            .records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Ok::<_, LockError>((k.clone(), general_purpose::STANDARD.decode(v)?)))
            .collect()
    }
}

impl VaultHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[..VAULT_MAGIC.len()].copy_from_slice(VAULT_MAGIC);
        buf[8..12].copy_from_slice(&self.vault_version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.kdf.time_cost.to_le_bytes());
        buf[16..20].copy_from_slice(&self.kdf.memory_cost.to_le_bytes());
        buf[20..24].copy_from_slice(&self.kdf.parallelism.to_le_bytes());
        buf[24..56].copy_from_slice(&self.salt);
        buf[56..80].copy_from_slice(&self.nonce);
        // remaining bytes stay zero
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != HEADER_SIZE {
            return Err(LockError::Vault("invalid header size".into()));
        }
        if &buf[..VAULT_MAGIC.len()] != VAULT_MAGIC {
            return Err(LockError::Vault("invalid magic".into()));
        }
        let vault_version = read_u32(buf, 8)?;
        if vault_version != VAULT_VERSION {
            return Err(LockError::Vault(format!(
                "vault version mismatch: found {vault_version}, expected {VAULT_VERSION}"
            )));
        }
        let mut salt = [0u8; 32];
        salt.copy_from_slice(&buf[24..56]);
        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(&buf[56..80]);
        Ok(Self {
            vault_version,
            kdf: KdfParams {
                time_cost: read_u32(buf, 12)?,
                memory_cost: read_u32(buf, 16)?,
                parallelism: read_u32(buf, 20)?,
            },
            salt,
            nonce,
        })
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let bytes: [u8; 4] = buf
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| LockError::Vault(format!("header truncated at {offset}")))?;
    Ok(u32::from_le_bytes(bytes))
}
