//! Accessors for the persisted [`SecuritySettings`] record.
//!
//! Pure plumbing over the record store: no validation, no hashing. Every
//! setter is a read-modify-write of the single settings record and is
//! persisted before it returns.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::error::{LockError, Result};
use crate::settings::{AuthMethod, SecuritySettings};
use crate::store::RecordStore;

const SETTINGS_KEY: &str = "security.settings";

pub struct CredentialStore {
    store: Arc<dyn RecordStore>,
    // serialises read-modify-write cycles on the settings record
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Current settings, or defaults when nothing has been stored.
    pub fn load(&self) -> Result<SecuritySettings> {
        match self.store.get(SETTINGS_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| LockError::CorruptRecord {
                key: SETTINGS_KEY.into(),
                reason: e.to_string(),
            }),
            None => Ok(SecuritySettings::default()),
        }
    }

    fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut SecuritySettings),
    {
        let _guard = self.write_lock.lock();
        let mut settings = self.load()?;
        apply(&mut settings);
        let data = serde_json::to_vec(&settings)?;
        self.store.put(SETTINGS_KEY, &data)
    }

    pub fn auth_method(&self) -> Result<AuthMethod> {
        Ok(self.load()?.auth_method)
    }

    pub fn set_auth_method(&self, method: AuthMethod) -> Result<()> {
        debug!(%method, "auth method updated");
        self.update(|s| s.auth_method = method)
    }

    pub fn pin_hash(&self) -> Result<Option<String>> {
        Ok(self.load()?.pin_hash)
    }

    pub fn set_pin_hash(&self, hash: &str) -> Result<()> {
        self.update(|s| s.pin_hash = Some(hash.to_string()))
    }

    pub fn pattern_hash(&self) -> Result<Option<String>> {
        Ok(self.load()?.pattern_hash)
    }

    pub fn set_pattern_hash(&self, hash: &str) -> Result<()> {
        self.update(|s| s.pattern_hash = Some(hash.to_string()))
    }

    pub fn recovery_pin_hash(&self) -> Result<Option<String>> {
        Ok(self.load()?.recovery_pin_hash)
    }

    pub fn set_recovery_pin_hash(&self, hash: &str) -> Result<()> {
        self.update(|s| s.recovery_pin_hash = Some(hash.to_string()))
    }

    pub fn security_question(&self) -> Result<Option<String>> {
        Ok(self.load()?.security_question)
    }

    pub fn set_security_question(&self, question: &str) -> Result<()> {
        self.update(|s| s.security_question = Some(question.to_string()))
    }

    pub fn security_answer_hash(&self) -> Result<Option<String>> {
        Ok(self.load()?.security_answer_hash)
    }

    pub fn set_security_answer_hash(&self, hash: &str) -> Result<()> {
        self.update(|s| s.security_answer_hash = Some(hash.to_string()))
    }

    pub fn biometric_enabled(&self) -> Result<bool> {
        Ok(self.load()?.biometric_enabled)
    }

    pub fn set_biometric_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|s| s.biometric_enabled = enabled)
    }

    /// Store a method-specific hash and make that method active in one write.
    pub(crate) fn set_method_hash(&self, method: AuthMethod, hash: &str) -> Result<()> {
        self.update(|s| {
            match method {
                AuthMethod::Pin => s.pin_hash = Some(hash.to_string()),
                AuthMethod::Pattern => s.pattern_hash = Some(hash.to_string()),
                AuthMethod::None | AuthMethod::Biometric => return,
            }
            s.auth_method = method;
        })
    }

    pub(crate) fn set_question_and_answer(&self, question: &str, answer_hash: &str) -> Result<()> {
        self.update(|s| {
            s.security_question = Some(question.to_string());
            s.security_answer_hash = Some(answer_hash.to_string());
        })
    }

    /// Drop the whole settings record; every getter reports defaults afterwards.
    pub fn clear_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.delete(SETTINGS_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> CredentialStore {
        CredentialStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn getters_default_before_any_write() {
        let creds = store();
        assert_eq!(creds.auth_method().unwrap(), AuthMethod::None);
        assert_eq!(creds.pin_hash().unwrap(), None);
        assert_eq!(creds.security_question().unwrap(), None);
        assert!(!creds.biometric_enabled().unwrap());
    }

    #[test]
    fn setters_persist_independently() {
        let backing = Arc::new(MemoryStore::new());
        let creds = CredentialStore::new(backing.clone());
        creds.set_pin_hash("p").unwrap();
        creds.set_pattern_hash("q").unwrap();
        creds.set_auth_method(AuthMethod::Pattern).unwrap();
        creds.set_biometric_enabled(true).unwrap();

        let reopened = CredentialStore::new(backing);
        assert_eq!(reopened.pin_hash().unwrap().as_deref(), Some("p"));
        assert_eq!(reopened.pattern_hash().unwrap().as_deref(), Some("q"));
        assert_eq!(reopened.auth_method().unwrap(), AuthMethod::Pattern);
        assert!(reopened.biometric_enabled().unwrap());
    }

    #[test]
    fn clear_all_restores_defaults() {
        let creds = store();
        creds.set_pin_hash("p").unwrap();
        creds.set_security_question("q").unwrap();
        creds.set_auth_method(AuthMethod::Pin).unwrap();
        creds.clear_all().unwrap();
        assert_eq!(creds.load().unwrap(), SecuritySettings::default());
    }

    #[test]
    fn corrupt_record_is_reported() {
        let backing = Arc::new(MemoryStore::new());
        backing.put(SETTINGS_KEY, b"not json").unwrap();
        let creds = CredentialStore::new(backing);
        assert!(matches!(
            creds.auth_method(),
            Err(LockError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn concurrent_setters_do_not_lose_updates() {
        let creds = Arc::new(store());
        let a = {
            let creds = creds.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    creds.set_pin_hash("pin").unwrap();
                }
            })
        };
        let b = {
            let creds = creds.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    creds.set_recovery_pin_hash("recovery").unwrap();
                }
            })
        };
        a.join().unwrap();
        b.join().unwrap();
        let s = creds.load().unwrap();
        assert_eq!(s.pin_hash.as_deref(), Some("pin"));
        assert_eq!(s.recovery_pin_hash.as_deref(), Some("recovery"));
    }
}
