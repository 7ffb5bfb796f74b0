//! Secret hashing, verification, and the account-recovery machine.

use tracing::{debug, info, warn};

use crate::config::LockerConfig;
use crate::credentials::CredentialStore;
use crate::crypto::hash_secret;
use crate::error::{LockError, Result};
use crate::settings::AuthMethod;

/// Case-fold and trim a security answer. Applied on both the write and the
/// read path.
pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    AwaitingAnswer,
    AwaitingRecoveryPin,
    AwaitingNewSecret,
    Reset,
}

pub enum RecoveryStart {
    Started(RecoveryFlow),
    /// No security question and recovery PIN pair has been configured.
    Unavailable,
}

/// Result of feeding one input into the recovery machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryProgress {
    Advanced(RecoveryState),
    Failed { failures: u32 },
}

/// One recovery attempt. Holds no secrets, only its position and the number
/// of failed inputs so far; lockout policy is the caller's.
#[derive(Debug)]
pub struct RecoveryFlow {
    state: RecoveryState,
    failures: u32,
    question: String,
}

impl RecoveryFlow {
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    fn expect(&self, expected: RecoveryState) -> Result<()> {
        if self.state != expected {
            return Err(LockError::RecoveryStep {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    fn step(&mut self, ok: bool, next: RecoveryState) -> RecoveryProgress {
        if ok {
            self.state = next;
            RecoveryProgress::Advanced(next)
        } else {
            self.failures += 1;
            RecoveryProgress::Failed {
                failures: self.failures,
            }
        }
    }
}

pub struct CredentialVerifier {
    credentials: CredentialStore,
    config: LockerConfig,
}

impl CredentialVerifier {
    pub fn new(credentials: CredentialStore, config: LockerConfig) -> Self {
        Self {
            credentials,
            config,
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn config(&self) -> &LockerConfig {
        &self.config
    }

    pub fn hash(secret: &str) -> String {
        hash_secret(secret)
    }

    /// Check `secret` against the policy for `method`.
    pub fn validate_secret(&self, method: AuthMethod, secret: &str) -> Result<()> {
        match method {
            AuthMethod::Pin => self.validate_pin(secret),
            AuthMethod::Pattern => self.validate_pattern(secret),
            AuthMethod::None | AuthMethod::Biometric => Err(LockError::UnsupportedMethod(method)),
        }
    }

    fn validate_pin(&self, pin: &str) -> Result<()> {
        let (min, max) = (self.config.min_pin_length, self.config.max_pin_length);
        if !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(LockError::InvalidSecret("PIN must contain only digits".into()));
        }
        if pin.len() < min || pin.len() > max {
            return Err(LockError::InvalidSecret(format!(
                "PIN must be {min} to {max} digits"
            )));
        }
        Ok(())
    }

    /// A pattern is the sequence of visited cells of a 3x3 grid, written as
    /// digits `0`-`8`; a cell can be visited once.
    fn validate_pattern(&self, pattern: &str) -> Result<()> {
        let min = self.config.min_pattern_length;
        let mut seen = [false; 9];
        for c in pattern.chars() {
            let cell = match c.to_digit(10) {
                Some(d) if d < 9 => d as usize,
                _ => {
                    return Err(LockError::InvalidSecret(format!(
                        "pattern cell {c:?} is not on the grid"
                    )))
                }
            };
            if seen[cell] {
                return Err(LockError::InvalidSecret("pattern repeats a cell".into()));
            }
            seen[cell] = true;
        }
        if pattern.len() < min {
            return Err(LockError::InvalidSecret(format!(
                "pattern must connect at least {min} dots"
            )));
        }
        Ok(())
    }

    /// Hash `secret`, store it in the slot for `method`, and make `method`
    /// the active one. Replaces any earlier hash for that method.
    pub fn setup(&self, method: AuthMethod, secret: &str) -> Result<()> {
        self.validate_secret(method, secret)?;
        self.credentials.set_method_hash(method, &hash_secret(secret))?;
        info!(%method, "credential configured");
        Ok(())
    }

    /// [`setup`](Self::setup) for an entry that was typed twice.
    pub fn setup_confirmed(&self, method: AuthMethod, secret: &str, confirm: &str) -> Result<()> {
        self.validate_secret(method, secret)?;
        if secret != confirm {
            return Err(LockError::InvalidSecret(format!(
                "{} entries do not match",
                method.to_string().to_lowercase()
            )));
        }
        self.setup(method, secret)
    }

    /// `false` when nothing is stored for `method`; store failures propagate.
    pub fn verify(&self, method: AuthMethod, attempt: &str) -> Result<bool> {
        let settings = self.credentials.load()?;
        let Some(stored) = settings.hash_for(method) else {
            debug!(%method, "verify against unconfigured method");
            return Ok(false);
        };
        Ok(stored == hash_secret(attempt))
    }

    pub fn setup_recovery_pin(&self, pin: &str) -> Result<()> {
        self.validate_pin(pin)?;
        self.credentials.set_recovery_pin_hash(&hash_secret(pin))
    }

    pub fn verify_recovery_pin(&self, pin: &str) -> Result<bool> {
        match self.credentials.recovery_pin_hash()? {
            Some(stored) => Ok(stored == hash_secret(pin)),
            None => Ok(false),
        }
    }

    pub fn setup_security_question(&self, question: &str, answer: &str) -> Result<()> {
        if question.trim().is_empty() {
            return Err(LockError::InvalidSecret("security question is empty".into()));
        }
        let normalized = normalize_answer(answer);
        if normalized.is_empty() {
            return Err(LockError::InvalidSecret("security answer is empty".into()));
        }
        self.credentials
            .set_question_and_answer(question, &hash_secret(&normalized))
    }

    pub fn verify_security_answer(&self, answer: &str) -> Result<bool> {
        match self.credentials.security_answer_hash()? {
            Some(stored) => Ok(stored == hash_secret(&normalize_answer(answer))),
            None => Ok(false),
        }
    }

    /// Turn biometric unlock on or off. Turning it on also makes it the
    /// active method.
    pub fn enable_biometric(&self, enabled: bool) -> Result<()> {
        self.credentials.set_biometric_enabled(enabled)?;
        if enabled {
            self.credentials.set_auth_method(AuthMethod::Biometric)?;
        }
        Ok(())
    }

    pub fn is_auth_configured(&self) -> Result<bool> {
        let settings = self.credentials.load()?;
        Ok(match settings.auth_method {
            AuthMethod::Pin | AuthMethod::Pattern => {
                settings.hash_for(settings.auth_method).is_some()
            }
            AuthMethod::Biometric => settings.biometric_enabled,
            AuthMethod::None => false,
        })
    }

    pub fn recovery_available(&self) -> Result<bool> {
        Ok(self.credentials.load()?.recovery_configured())
    }

    pub fn begin_recovery(&self) -> Result<RecoveryStart> {
        let settings = self.credentials.load()?;
        match settings.security_question {
            Some(question) if settings.recovery_configured() => {
                info!("recovery flow started");
                Ok(RecoveryStart::Started(RecoveryFlow {
                    state: RecoveryState::AwaitingAnswer,
                    failures: 0,
                    question,
                }))
            }
            _ => Ok(RecoveryStart::Unavailable),
        }
    }

    pub fn recovery_answer(
        &self,
        flow: &mut RecoveryFlow,
        answer: &str,
    ) -> Result<RecoveryProgress> {
        flow.expect(RecoveryState::AwaitingAnswer)?;
        let ok = self.verify_security_answer(answer)?;
        let progress = flow.step(ok, RecoveryState::AwaitingRecoveryPin);
        if !ok {
            warn!(failures = flow.failures, "recovery answer rejected");
        }
        Ok(progress)
    }

    pub fn recovery_pin(&self, flow: &mut RecoveryFlow, pin: &str) -> Result<RecoveryProgress> {
        flow.expect(RecoveryState::AwaitingRecoveryPin)?;
        let ok = self.verify_recovery_pin(pin)?;
        let progress = flow.step(ok, RecoveryState::AwaitingNewSecret);
        if !ok {
            warn!(failures = flow.failures, "recovery pin rejected");
        }
        Ok(progress)
    }

    /// Terminal step: replace the secret for the active method. When the
    /// active method has no secret (biometric or none), the new secret
    /// becomes a PIN.
    pub fn complete_recovery(
        &self,
        flow: &mut RecoveryFlow,
        new_secret: &str,
    ) -> Result<AuthMethod> {
        flow.expect(RecoveryState::AwaitingNewSecret)?;
        let current = self.credentials.auth_method()?;
        let method = if current.takes_secret() {
            current
        } else {
            AuthMethod::Pin
        };
        self.setup(method, new_secret)?;
        flow.state = RecoveryState::Reset;
        info!(%method, "credential reset through recovery");
        Ok(method)
    }
}
