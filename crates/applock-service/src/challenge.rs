//! Terminal stand-in for the lock screen.
//!
//! Prompts go through the controlling terminal (rpassword), never stdin,
//! because stdin carries the foreground event stream while `run` is active.

use anyhow::Result;
use applock_core::error::LockError;
use applock_core::monitor::{ChallengeReason, ChallengeRequest};
use applock_core::session::{BiometricOutcome, LockSession, SessionOutcome};
use applock_core::verifier::RecoveryProgress;
use applock_core::{AppLocker, AuthMethod};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::prompt;

const RECOVER_KEYWORD: &str = "recover";

fn store_unreadable_notice(package_id: &str) -> String {
    format!("{package_id} stays locked: the credential store could not be read")
}

async fn ask(text: String) -> Result<Zeroizing<String>> {
    tokio::task::spawn_blocking(move || prompt::secret(&text)).await?
}

pub(crate) async fn handle(locker: Arc<AppLocker>, request: ChallengeRequest) -> Result<()> {
    let sessions = locker.sessions();
    let mut session = match sessions.open(&request) {
        Ok(session) => session,
        Err(err) => {
            println!("{}", store_unreadable_notice(&request.package_id));
            return Err(err.into());
        }
    };
    if !session.auth_configured() {
        warn!(package = %request.package_id, "no unlock method configured");
        println!(
            "{} is locked but no unlock method is set up; run `applock-service setup-pin`",
            request.package_id
        );
        return Ok(());
    }
    match request.reason {
        ChallengeReason::Locked => println!("{} is locked", request.package_id),
        ChallengeReason::LookupFailed => {
            println!("{} could not be checked; unlock to continue", request.package_id)
        }
    }

    loop {
        let outcome = if session.method() == AuthMethod::Biometric {
            let (tx, rx) = oneshot::channel();
            let entry =
                ask("Biometric [y = match, n = no match, recover, empty = cancel]: ".into())
                    .await?;
            if entry.as_str() == RECOVER_KEYWORD {
                recover(&locker, &mut session).await?;
                continue;
            }
            let outcome = match entry.as_str() {
                "y" => Some(BiometricOutcome::Success),
                "n" => Some(BiometricOutcome::Failure),
                _ => None,
            };
            // no answer drops the sender: treated as cancel
            if let Some(outcome) = outcome {
                let _ = tx.send(outcome);
            } else {
                drop(tx);
            }
            sessions.await_biometric(&mut session, rx).await?
        } else {
            let entry = ask(format!(
                "Enter {} (empty to cancel, '{RECOVER_KEYWORD}' if forgotten): ",
                session.method()
            ))
            .await?;
            if entry.is_empty() {
                SessionOutcome::Cancelled
            } else if entry.as_str() == RECOVER_KEYWORD {
                recover(&locker, &mut session).await?;
                continue;
            } else {
                sessions.submit(&mut session, &entry)?
            }
        };

        match outcome {
            SessionOutcome::Unlocked => {
                println!("{} unlocked", session.package_id());
                return Ok(());
            }
            SessionOutcome::Rejected {
                attempts,
                recovery_offered,
            } => {
                println!("Wrong {} (attempt {attempts})", session.method());
                if recovery_offered {
                    println!(
                        "Forgot it? Enter '{RECOVER_KEYWORD}' to reset with your recovery details"
                    );
                }
            }
            SessionOutcome::Cancelled => {
                info!(package = %session.package_id(), "challenge dismissed");
                println!("Cancelled; {} stays locked", session.package_id());
                return Ok(());
            }
        }
    }
}

/// Walk the user through question, recovery PIN and new secret. Returns
/// without unlocking; an empty entry at any step abandons recovery.
pub(crate) async fn recover(locker: &AppLocker, session: &mut LockSession) -> Result<()> {
    let sessions = locker.sessions();
    if !sessions.begin_recovery(session)? {
        println!("Recovery is not set up; run `applock-service setup-recovery` first");
        return Ok(());
    }
    let question = session.recovery_question().unwrap_or_default().to_string();

    loop {
        let answer = ask(format!("{question} ")).await?;
        if answer.is_empty() {
            return Ok(());
        }
        match sessions.recovery_answer(session, &answer)? {
            RecoveryProgress::Advanced(_) => break,
            RecoveryProgress::Failed { failures } => {
                println!("Incorrect answer ({failures} failed)")
            }
        }
    }

    loop {
        let pin = ask("Recovery PIN: ".into()).await?;
        if pin.is_empty() {
            return Ok(());
        }
        match sessions.recovery_pin(session, &pin)? {
            RecoveryProgress::Advanced(_) => break,
            RecoveryProgress::Failed { failures } => {
                println!("Incorrect recovery PIN ({failures} failed)")
            }
        }
    }

    let label = if session.method().takes_secret() {
        session.method()
    } else {
        AuthMethod::Pin
    };
    loop {
        let first = ask(format!("New {label}: ")).await?;
        if first.is_empty() {
            return Ok(());
        }
        let confirm = ask(format!("Confirm new {label}: ")).await?;
        if *first != *confirm {
            println!("Entries do not match");
            continue;
        }
        match sessions.complete_recovery(session, &first) {
            Ok(method) => {
                println!("{method} reset; use it to unlock");
                return Ok(());
            }
            Err(LockError::InvalidSecret(reason)) => println!("{reason}"),
            Err(err) => return Err(err.into()),
        }
    }
}
