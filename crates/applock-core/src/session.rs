//! One challenge, from presentation to unlock.
//!
//! A [`LockSession`] is created per [`ChallengeRequest`] and simply dropped
//! when the challenge surface goes away; it never holds plaintext, and grace
//! is only granted on a successful unlock.

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::config::LockerConfig;
use crate::error::{LockError, Result};
use crate::grace::GraceCache;
use crate::monitor::ChallengeRequest;
use crate::settings::AuthMethod;
use crate::verifier::{
    CredentialVerifier, RecoveryFlow, RecoveryProgress, RecoveryStart, RecoveryState,
};

/// Where a session stands. A rejected entry is reported through
/// [`SessionOutcome::Rejected`] and the session goes straight back to
/// `Presenting` with its attempt count kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Presenting(AuthMethod),
    Verifying,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    None,
    Question,
    RecoveryPin,
    Reset,
}

impl From<RecoveryState> for RecoveryStep {
    fn from(state: RecoveryState) -> Self {
        match state {
            RecoveryState::AwaitingAnswer => RecoveryStep::Question,
            RecoveryState::AwaitingRecoveryPin => RecoveryStep::RecoveryPin,
            RecoveryState::AwaitingNewSecret | RecoveryState::Reset => RecoveryStep::Reset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Unlocked,
    Rejected { attempts: u32, recovery_offered: bool },
    Cancelled,
}

/// Single-shot result from the platform biometric prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometricOutcome {
    Success,
    Failure,
    Cancel,
}

#[derive(Debug)]
pub struct LockSession {
    package_id: String,
    method: AuthMethod,
    auth_configured: bool,
    biometric_enabled: bool,
    attempt_count: u32,
    recovery_step: RecoveryStep,
    state: SessionState,
    recovery: Option<RecoveryFlow>,
}

impl LockSession {
    pub fn package_id(&self) -> &str {
        &self.package_id
    }

    /// Auth method captured when the session was opened.
    pub fn method(&self) -> AuthMethod {
        self.method
    }

    /// `false` means the user must go through setup, not retry.
    pub fn auth_configured(&self) -> bool {
        self.auth_configured
    }

    /// Whether a biometric result may be fed into this session.
    pub fn biometric_enabled(&self) -> bool {
        self.biometric_enabled
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn recovery_step(&self) -> RecoveryStep {
        self.recovery_step
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn recovery_question(&self) -> Option<&str> {
        self.recovery.as_ref().map(|flow| flow.question())
    }

    pub fn recovery_failures(&self) -> u32 {
        self.recovery.as_ref().map(|flow| flow.failures()).unwrap_or(0)
    }

    pub fn is_unlocked(&self) -> bool {
        self.state == SessionState::Unlocked
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_unlocked() {
            return Err(LockError::SessionClosed(self.package_id.clone()));
        }
        Ok(())
    }
}

pub struct LockSessionController {
    verifier: Arc<CredentialVerifier>,
    grace: Arc<GraceCache>,
    recovery_offer_after: u32,
}

impl LockSessionController {
    pub fn new(
        verifier: Arc<CredentialVerifier>,
        grace: Arc<GraceCache>,
        config: &LockerConfig,
    ) -> Self {
        Self {
            verifier,
            grace,
            recovery_offer_after: config.recovery_offer_after,
        }
    }

    pub fn open(&self, request: &ChallengeRequest) -> Result<LockSession> {
        let settings = self.verifier.credentials().load()?;
        let method = settings.auth_method;
        let auth_configured = self.verifier.is_auth_configured()?;
        info!(package = %request.package_id, %method, "challenge presented");
        Ok(LockSession {
            package_id: request.package_id.clone(),
            method,
            auth_configured,
            biometric_enabled: settings.biometric_enabled,
            attempt_count: 0,
            recovery_step: RecoveryStep::None,
            state: SessionState::Presenting(method),
            recovery: None,
        })
    }

    /// Advisory only; nothing is locked out.
    pub fn recovery_offer_available(&self, session: &LockSession) -> bool {
        session.attempt_count >= self.recovery_offer_after
    }

    /// Check a PIN or pattern entry. A store failure leaves the session where
    /// it was and is returned as an error.
    pub fn submit(&self, session: &mut LockSession, attempt: &str) -> Result<SessionOutcome> {
        session.ensure_open()?;
        if !session.method.takes_secret() {
            return Err(LockError::UnsupportedMethod(session.method));
        }
        let previous = session.state;
        session.state = SessionState::Verifying;
        match self.verifier.verify(session.method, attempt) {
            Ok(ok) => Ok(self.finish(session, ok)),
            Err(err) => {
                session.state = previous;
                Err(err)
            }
        }
    }

    /// Feed the biometric prompt's result into the session. Refused unless
    /// biometric unlock was enabled and configured when the session opened.
    pub fn biometric_result(
        &self,
        session: &mut LockSession,
        outcome: BiometricOutcome,
    ) -> Result<SessionOutcome> {
        session.ensure_open()?;
        if !session.auth_configured || !session.biometric_enabled {
            warn!(
                package = %session.package_id,
                "biometric result for a session without biometric unlock"
            );
            return Err(LockError::UnsupportedMethod(AuthMethod::Biometric));
        }
        Ok(match outcome {
            BiometricOutcome::Success => self.finish(session, true),
            BiometricOutcome::Failure => self.finish(session, false),
            BiometricOutcome::Cancel => SessionOutcome::Cancelled,
        })
    }

    /// Wait for the biometric prompt's single result. A prompt that goes away
    /// without answering counts as cancelled.
    pub async fn await_biometric(
        &self,
        session: &mut LockSession,
        result: oneshot::Receiver<BiometricOutcome>,
    ) -> Result<SessionOutcome> {
        let outcome = result.await.unwrap_or(BiometricOutcome::Cancel);
        self.biometric_result(session, outcome)
    }

    fn finish(&self, session: &mut LockSession, ok: bool) -> SessionOutcome {
        if ok {
            session.state = SessionState::Unlocked;
            session.recovery = None;
            self.grace.mark_unlocked_default(&session.package_id);
            info!(package = %session.package_id, attempts = session.attempt_count, "unlocked");
            return SessionOutcome::Unlocked;
        }
        session.attempt_count += 1;
        session.state = SessionState::Presenting(session.method);
        let recovery_offered = self.recovery_offer_available(session);
        warn!(
            package = %session.package_id,
            attempts = session.attempt_count,
            recovery_offered,
            "unlock attempt rejected"
        );
        SessionOutcome::Rejected {
            attempts: session.attempt_count,
            recovery_offered,
        }
    }

    /// Start recovery for this session. `Ok(false)` when recovery was never
    /// configured.
    pub fn begin_recovery(&self, session: &mut LockSession) -> Result<bool> {
        session.ensure_open()?;
        match self.verifier.begin_recovery()? {
            RecoveryStart::Started(flow) => {
                session.recovery_step = flow.state().into();
                session.recovery = Some(flow);
                Ok(true)
            }
            RecoveryStart::Unavailable => Ok(false),
        }
    }

    fn flow<'a>(session: &'a mut LockSession) -> Result<&'a mut RecoveryFlow> {
        session.recovery.as_mut().ok_or(LockError::RecoveryNotStarted)
    }

    pub fn recovery_answer(
        &self,
        session: &mut LockSession,
        answer: &str,
    ) -> Result<RecoveryProgress> {
        let flow = Self::flow(session)?;
        let progress = self.verifier.recovery_answer(flow, answer)?;
        let state = flow.state();
        session.recovery_step = state.into();
        Ok(progress)
    }

    pub fn recovery_pin(&self, session: &mut LockSession, pin: &str) -> Result<RecoveryProgress> {
        let flow = Self::flow(session)?;
        let progress = self.verifier.recovery_pin(flow, pin)?;
        let state = flow.state();
        session.recovery_step = state.into();
        Ok(progress)
    }

    /// Set the new secret. The session is not unlocked: it goes back to
    /// presenting the (possibly new) method with a fresh attempt count.
    pub fn complete_recovery(
        &self,
        session: &mut LockSession,
        new_secret: &str,
    ) -> Result<AuthMethod> {
        let flow = Self::flow(session)?;
        let method = self.verifier.complete_recovery(flow, new_secret)?;
        session.recovery = None;
        session.recovery_step = RecoveryStep::Reset;
        session.method = method;
        session.auth_configured = true;
        session.attempt_count = 0;
        session.state = SessionState::Presenting(method);
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialStore;
    use crate::monitor::ChallengeReason;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn controller() -> (LockSessionController, Arc<CredentialVerifier>, Arc<GraceCache>) {
        let verifier = Arc::new(CredentialVerifier::new(
            CredentialStore::new(Arc::new(MemoryStore::new())),
            LockerConfig::default(),
        ));
        let grace = Arc::new(GraceCache::new(Duration::from_secs(5)));
        let controller =
            LockSessionController::new(verifier.clone(), grace.clone(), &LockerConfig::default());
        (controller, verifier, grace)
    }

    fn request(id: &str) -> ChallengeRequest {
        ChallengeRequest {
            package_id: id.into(),
            reason: ChallengeReason::Locked,
        }
    }

    #[test]
    fn wrong_then_right_pin() {
        let (ctl, verifier, grace) = controller();
        verifier.setup(AuthMethod::Pin, "1234").unwrap();
        let mut session = ctl.open(&request("com.bank")).unwrap();
        assert_eq!(session.state(), SessionState::Presenting(AuthMethod::Pin));
        assert!(session.auth_configured());

        assert_eq!(
            ctl.submit(&mut session, "0000").unwrap(),
            SessionOutcome::Rejected {
                attempts: 1,
                recovery_offered: false
            }
        );
        assert!(!grace.contains("com.bank"));
        assert_eq!(session.state(), SessionState::Presenting(AuthMethod::Pin));
        assert_eq!(session.attempt_count(), 1);
        assert_eq!(ctl.submit(&mut session, "1234").unwrap(), SessionOutcome::Unlocked);
        assert!(grace.contains("com.bank"));
        assert!(matches!(
            ctl.submit(&mut session, "1234"),
            Err(LockError::SessionClosed(_))
        ));
    }

    #[test]
    fn recovery_offered_after_threshold() {
        let (ctl, verifier, _) = controller();
        verifier.setup(AuthMethod::Pin, "1234").unwrap();
        let mut session = ctl.open(&request("com.bank")).unwrap();
        ctl.submit(&mut session, "1111").unwrap();
        ctl.submit(&mut session, "2222").unwrap();
        assert!(!ctl.recovery_offer_available(&session));
        assert_eq!(
            ctl.submit(&mut session, "3333").unwrap(),
            SessionOutcome::Rejected {
                attempts: 3,
                recovery_offered: true
            }
        );
        // still allowed to retry
        assert_eq!(ctl.submit(&mut session, "1234").unwrap(), SessionOutcome::Unlocked);
    }

    #[test]
    fn unconfigured_session_is_flagged() {
        let (ctl, _, _) = controller();
        let mut session = ctl.open(&request("com.bank")).unwrap();
        assert!(!session.auth_configured());
        assert!(matches!(
            ctl.submit(&mut session, "1234"),
            Err(LockError::UnsupportedMethod(AuthMethod::None))
        ));
    }

    #[test]
    fn biometric_result_refused_when_biometric_is_off() {
        let (ctl, verifier, grace) = controller();
        verifier.setup(AuthMethod::Pin, "1234").unwrap();
        let mut session = ctl.open(&request("com.bank")).unwrap();
        assert!(!session.biometric_enabled());
        assert!(matches!(
            ctl.biometric_result(&mut session, BiometricOutcome::Success),
            Err(LockError::UnsupportedMethod(AuthMethod::Biometric))
        ));
        assert!(!session.is_unlocked());
        assert_eq!(session.attempt_count(), 0);
        assert!(!grace.contains("com.bank"));
    }

    #[test]
    fn biometric_result_refused_without_any_credentials() {
        let (ctl, _, grace) = controller();
        let mut session = ctl.open(&request("com.bank")).unwrap();
        assert!(matches!(
            ctl.biometric_result(&mut session, BiometricOutcome::Success),
            Err(LockError::UnsupportedMethod(AuthMethod::Biometric))
        ));
        assert!(!grace.contains("com.bank"));
    }

    #[test]
    fn biometric_result_refused_once_biometric_is_disabled() {
        let (ctl, verifier, grace) = controller();
        verifier.enable_biometric(true).unwrap();
        verifier.enable_biometric(false).unwrap();
        let mut session = ctl.open(&request("com.photos")).unwrap();
        assert!(ctl
            .biometric_result(&mut session, BiometricOutcome::Success)
            .is_err());
        assert!(!grace.contains("com.photos"));
    }

    #[test]
    fn biometric_results_drive_the_same_machine() {
        let (ctl, verifier, grace) = controller();
        verifier.enable_biometric(true).unwrap();
        let mut session = ctl.open(&request("com.photos")).unwrap();
        assert_eq!(
            ctl.biometric_result(&mut session, BiometricOutcome::Cancel).unwrap(),
            SessionOutcome::Cancelled
        );
        assert_eq!(session.attempt_count(), 0);
        assert!(matches!(
            ctl.biometric_result(&mut session, BiometricOutcome::Failure).unwrap(),
            SessionOutcome::Rejected { attempts: 1, .. }
        ));
        assert_eq!(
            ctl.biometric_result(&mut session, BiometricOutcome::Success).unwrap(),
            SessionOutcome::Unlocked
        );
        assert!(grace.contains("com.photos"));
    }

    #[tokio::test]
    async fn dropped_biometric_sender_cancels() {
        let (ctl, verifier, grace) = controller();
        verifier.enable_biometric(true).unwrap();
        let mut session = ctl.open(&request("com.photos")).unwrap();

        let (tx, rx) = oneshot::channel();
        drop(tx);
        assert_eq!(
            ctl.await_biometric(&mut session, rx).await.unwrap(),
            SessionOutcome::Cancelled
        );

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(BiometricOutcome::Success);
        });
        assert_eq!(
            ctl.await_biometric(&mut session, rx).await.unwrap(),
            SessionOutcome::Unlocked
        );
        assert!(grace.contains("com.photos"));
    }

    #[test]
    fn unlock_with_out_of_range_grace_does_not_panic() {
        let verifier = Arc::new(CredentialVerifier::new(
            CredentialStore::new(Arc::new(MemoryStore::new())),
            LockerConfig::default(),
        ));
        verifier.setup(AuthMethod::Pin, "1234").unwrap();
        let grace = Arc::new(GraceCache::new(Duration::MAX));
        let ctl = LockSessionController::new(verifier, grace.clone(), &LockerConfig::default());
        let mut session = ctl.open(&request("com.bank")).unwrap();
        assert_eq!(ctl.submit(&mut session, "1234").unwrap(), SessionOutcome::Unlocked);
        assert!(!grace.contains("com.bank"));
    }

    #[test]
    fn store_failure_is_not_a_rejection() {
        let store = Arc::new(MemoryStore::new());
        let verifier = Arc::new(CredentialVerifier::new(
            CredentialStore::new(store.clone()),
            LockerConfig::default(),
        ));
        verifier.setup(AuthMethod::Pin, "1234").unwrap();
        let grace = Arc::new(GraceCache::new(Duration::from_secs(5)));
        let ctl = LockSessionController::new(verifier, grace.clone(), &LockerConfig::default());
        let mut session = ctl.open(&request("com.bank")).unwrap();

        store.fail_reads(true);
        assert!(ctl.submit(&mut session, "1234").is_err());
        assert_eq!(session.attempt_count(), 0);
        assert_eq!(session.state(), SessionState::Presenting(AuthMethod::Pin));
        assert!(!grace.contains("com.bank"));
    }

    #[test]
    fn recovery_through_session() {
        let (ctl, verifier, _) = controller();
        verifier.setup(AuthMethod::Pin, "1111").unwrap();
        let mut session = ctl.open(&request("com.bank")).unwrap();
        assert!(!ctl.begin_recovery(&mut session).unwrap());
        assert!(matches!(
            ctl.recovery_answer(&mut session, "x"),
            Err(LockError::RecoveryNotStarted)
        ));

        verifier.setup_security_question("pet name", "Rex").unwrap();
        verifier.setup_recovery_pin("1357").unwrap();
        assert!(ctl.begin_recovery(&mut session).unwrap());
        assert_eq!(session.recovery_step(), RecoveryStep::Question);
        assert_eq!(session.recovery_question(), Some("pet name"));

        ctl.recovery_answer(&mut session, " REX").unwrap();
        assert_eq!(session.recovery_step(), RecoveryStep::RecoveryPin);
        ctl.recovery_pin(&mut session, "0000").unwrap();
        assert_eq!(session.recovery_failures(), 1);
        assert_eq!(session.recovery_step(), RecoveryStep::RecoveryPin);
        ctl.recovery_pin(&mut session, "1357").unwrap();
        assert_eq!(session.recovery_step(), RecoveryStep::Reset);

        assert_eq!(ctl.complete_recovery(&mut session, "2468").unwrap(), AuthMethod::Pin);
        assert!(!session.is_unlocked());
        assert_eq!(ctl.submit(&mut session, "2468").unwrap(), SessionOutcome::Unlocked);
    }
}
