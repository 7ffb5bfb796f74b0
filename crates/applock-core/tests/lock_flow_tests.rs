//! End-to-end lock flows across registry, monitor, session and grace.
//!
//! Tests cover:
//!  1. Locked app → challenge → wrong PIN → right PIN → grace suppresses
//!  2. Grace expiry re-challenges
//!  3. Store read failure fails locked
//!  4. Vault-backed state survives reopen
//!  5. Forgotten PIN recovered, then used to unlock
//!  6. Async monitor feeding sessions

use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::{mpsc, watch};

use applock_core::crypto::KdfParams;
use applock_core::grace::ManualClock;
use applock_core::monitor::{spawn_monitor, ChallengeReason, ChallengeRequest};
use applock_core::session::{SessionOutcome, SessionState};
use applock_core::verifier::RecoveryProgress;
use applock_core::{AppLocker, AuthMethod, LockerConfig, MemoryStore, RecordStore, Vault};

fn locker_with_clock() -> (AppLocker, Arc<MemoryStore>, Arc<ManualClock>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new());
    let locker =
        AppLocker::with_clock(store.clone(), LockerConfig::default(), clock.clone()).unwrap();
    (locker, store, clock)
}

fn fast_kdf() -> KdfParams {
    KdfParams {
        time_cost: 1,
        memory_cost: 8192,
        parallelism: 1,
    }
}

// ─── Test 1: full unlock path ───────────────────────────────────────────────

#[test]
fn test_challenge_unlock_and_grace() {
    let (locker, _, _) = locker_with_clock();
    locker.verifier().setup(AuthMethod::Pin, "1234").unwrap();
    locker.registry().lock_app("com.bank", "Bank").unwrap();

    let request = locker.monitor().on_event("com.bank").expect("challenge");
    assert_eq!(request.reason, ChallengeReason::Locked);

    let sessions = locker.sessions();
    let mut session = sessions.open(&request).unwrap();
    assert_eq!(session.state(), SessionState::Presenting(AuthMethod::Pin));

    // locker's own challenge surface comes to the front; ignored
    assert!(locker
        .monitor()
        .on_event("com.darklock.applock.LockScreenActivity")
        .is_none());

    assert!(matches!(
        sessions.submit(&mut session, "9999").unwrap(),
        SessionOutcome::Rejected { attempts: 1, .. }
    ));
    assert!(!locker.grace().contains("com.bank"));
    assert_eq!(sessions.submit(&mut session, "1234").unwrap(), SessionOutcome::Unlocked);
    assert!(locker.grace().contains("com.bank"));

    // user bounces out and back within the grace window
    assert!(locker.monitor().on_event("com.launcher").is_none());
    assert!(locker.monitor().on_event("com.bank").is_none());
}

// ─── Test 2: grace expiry ───────────────────────────────────────────────────

#[test]
fn test_grace_expiry_rechallenges() {
    let (locker, _, clock) = locker_with_clock();
    locker.verifier().setup(AuthMethod::Pin, "1234").unwrap();
    locker.registry().lock_app("com.bank", "Bank").unwrap();

    let request = locker.monitor().on_event("com.bank").unwrap();
    let mut session = locker.sessions().open(&request).unwrap();
    locker.sessions().submit(&mut session, "1234").unwrap();

    locker.monitor().on_event("com.launcher");
    clock.advance(Duration::from_secs(5));
    assert!(locker.monitor().on_event("com.bank").is_some());
}

// ─── Test 3: fail locked ────────────────────────────────────────────────────

#[test]
fn test_store_failure_fails_locked() {
    let (locker, store, _) = locker_with_clock();
    locker.registry().lock_app("com.bank", "Bank").unwrap();
    store.fail_reads(true);
    assert_eq!(
        locker.monitor().on_event("com.notes"),
        Some(ChallengeRequest {
            package_id: "com.notes".into(),
            reason: ChallengeReason::LookupFailed,
        })
    );
    assert!(locker.sessions().open(&ChallengeRequest {
        package_id: "com.notes".into(),
        reason: ChallengeReason::LookupFailed,
    })
    .is_err());
}

// ─── Test 4: vault-backed persistence ───────────────────────────────────────

#[test]
fn test_vault_backed_state_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.dat");
    {
        let vault: Arc<dyn RecordStore> =
            Arc::new(Vault::create_with_params(&path, "long enough password", fast_kdf()).unwrap());
        let locker = AppLocker::open(vault).unwrap();
        locker.verifier().setup(AuthMethod::Pattern, "0125").unwrap();
        locker.registry().lock_app("com.mail", "Mail").unwrap();
    }

    let vault: Arc<dyn RecordStore> = Arc::new(Vault::open(&path, "long enough password").unwrap());
    let locker = AppLocker::open(vault).unwrap();
    assert_eq!(locker.credentials().auth_method().unwrap(), AuthMethod::Pattern);
    assert!(locker.verifier().verify(AuthMethod::Pattern, "0125").unwrap());
    assert!(locker.registry().is_locked("com.mail").unwrap());

    assert!(Vault::open(&path, "wrong password here").is_err());
}

// ─── Test 5: recovery ───────────────────────────────────────────────────────

#[test]
fn test_recovery_then_unlock_with_new_pin() {
    let (locker, _, _) = locker_with_clock();
    let verifier = locker.verifier();
    verifier.setup(AuthMethod::Pin, "1111").unwrap();
    verifier.setup_security_question("First school?", "Hillside").unwrap();
    verifier.setup_recovery_pin("8642").unwrap();
    locker.registry().lock_app("com.bank", "Bank").unwrap();

    let sessions = locker.sessions();
    let request = locker.monitor().on_event("com.bank").unwrap();
    let mut session = sessions.open(&request).unwrap();
    for attempt in ["0000", "2222", "3333"] {
        sessions.submit(&mut session, attempt).unwrap();
    }
    assert!(sessions.recovery_offer_available(&session));

    assert!(sessions.begin_recovery(&mut session).unwrap());
    assert!(matches!(
        sessions.recovery_answer(&mut session, "hillside  ").unwrap(),
        RecoveryProgress::Advanced(_)
    ));
    assert!(matches!(
        sessions.recovery_pin(&mut session, "8642").unwrap(),
        RecoveryProgress::Advanced(_)
    ));
    assert_eq!(sessions.complete_recovery(&mut session, "5555").unwrap(), AuthMethod::Pin);
    assert!(!locker.grace().contains("com.bank"));

    assert!(!verifier.verify(AuthMethod::Pin, "1111").unwrap());
    assert_eq!(sessions.submit(&mut session, "5555").unwrap(), SessionOutcome::Unlocked);
    assert!(locker.grace().contains("com.bank"));
}

// ─── Test 6: async monitor ──────────────────────────────────────────────────

#[tokio::test]
async fn test_async_monitor_feeds_sessions() {
    let (locker, _, _) = locker_with_clock();
    locker.verifier().setup(AuthMethod::Pin, "4321").unwrap();
    locker.registry().lock_app("com.bank", "Bank").unwrap();

    let (tx, rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (task, mut challenges) = spawn_monitor(locker.monitor().clone(), rx, shutdown_rx);

    tx.send("com.bank".to_string()).await.unwrap();
    let request = tokio::time::timeout(Duration::from_secs(5), challenges.recv())
        .await
        .unwrap()
        .unwrap();
    let mut session = locker.sessions().open(&request).unwrap();
    assert_eq!(
        locker.sessions().submit(&mut session, "4321").unwrap(),
        SessionOutcome::Unlocked
    );

    tx.send("com.launcher".to_string()).await.unwrap();
    tx.send("com.bank".to_string()).await.unwrap();
    drop(tx);
    task.await.unwrap();
    assert!(challenges.try_recv().is_err());
    let _ = shutdown_tx;
}
