use anyhow::{anyhow, bail, Result};
use applock_core::config::save_config;
use applock_core::grace::spawn_sweeper;
use applock_core::monitor::{spawn_monitor, ChallengeReason, ChallengeRequest};
use applock_core::paths::{log_dir, vault_path};
use applock_core::registry::InstalledApp;
use applock_core::{AppLocker, AuthMethod, LockerConfig, RecordStore, Vault};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod challenge;
mod prompt;

#[derive(Parser, Debug)]
#[command(author, version, about = "Darklock App Lock Service", long_about = None)]
struct Cli {
    /// Directory holding vault.dat (defaults to the platform data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a new encrypted vault
    Init,
    /// Set a PIN as the unlock method
    SetupPin,
    /// Set a pattern (cells 0-8, e.g. 0125) as the unlock method
    SetupPattern,
    /// Use biometric unlock
    Biometric {
        #[arg(long)]
        disable: bool,
    },
    /// Set the security question and recovery PIN
    SetupRecovery {
        #[arg(long)]
        question: String,
    },
    /// Lock an app
    Lock {
        package_id: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Keep an app known but stop challenging it
    Unlock { package_id: String },
    /// Flip an app's lock flag
    Toggle { package_id: String },
    /// Forget an app
    Remove { package_id: String },
    /// List locked apps
    List {
        /// Include known apps that are not locked
        #[arg(long)]
        all: bool,
        #[arg(long)]
        search: Option<String>,
    },
    /// Show installed apps that could be locked
    Candidates {
        /// JSON array of {packageId, displayName, system, updatedSystem}
        #[arg(long)]
        installed: PathBuf,
    },
    /// Show or change locker settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show credential and registry status
    Status,
    /// Reset a forgotten PIN or pattern
    Recover,
    /// Clear every credential and locked app
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Run the foreground monitor, one package id per stdin line
    Run,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Set { key: String, value: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstalledEntry {
    package_id: String,
    display_name: String,
    #[serde(default)]
    system: bool,
    #[serde(default)]
    updated_system: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    vault_id: String,
    auth_method: AuthMethod,
    auth_configured: bool,
    biometric_enabled: bool,
    recovery_configured: bool,
    locked_apps: usize,
    known_apps: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let data_dir = cli.data_dir.as_deref();
    match cli.command {
        Commands::Init => init_command(data_dir),
        Commands::SetupPin => setup_secret_command(data_dir, AuthMethod::Pin),
        Commands::SetupPattern => setup_secret_command(data_dir, AuthMethod::Pattern),
        Commands::Biometric { disable } => {
            let (locker, _) = open_locker(data_dir)?;
            locker.verifier().enable_biometric(!disable)?;
            println!(
                "Biometric unlock {}; active method is {}",
                if disable { "disabled" } else { "enabled" },
                locker.credentials().auth_method()?
            );
            Ok(())
        }
        Commands::SetupRecovery { question } => setup_recovery_command(data_dir, &question),
        Commands::Lock { package_id, name } => {
            let (locker, _) = open_locker(data_dir)?;
            let name = name.unwrap_or_else(|| package_id.clone());
            locker.registry().lock_app(&package_id, &name)?;
            println!("Locked {name} ({package_id})");
            Ok(())
        }
        Commands::Unlock { package_id } => {
            let (locker, _) = open_locker(data_dir)?;
            locker.registry().set_locked(&package_id, false)?;
            println!("{package_id} is no longer locked");
            Ok(())
        }
        Commands::Toggle { package_id } => {
            let (locker, _) = open_locker(data_dir)?;
            match locker.registry().toggle(&package_id)? {
                Some(true) => println!("{package_id} locked"),
                Some(false) => println!("{package_id} unlocked"),
                None => bail!("{package_id} is not a known app"),
            }
            Ok(())
        }
        Commands::Remove { package_id } => {
            let (locker, _) = open_locker(data_dir)?;
            if !locker.registry().remove(&package_id)? {
                bail!("{package_id} is not a known app");
            }
            println!("Removed {package_id}");
            Ok(())
        }
        Commands::List { all, search } => list_command(data_dir, all, search.as_deref()),
        Commands::Candidates { installed } => candidates_command(data_dir, &installed),
        Commands::Config { action } => config_command(data_dir, action),
        Commands::Status => status_command(data_dir),
        Commands::Recover => recover_command(data_dir).await,
        Commands::Reset { yes } => {
            if !yes {
                bail!("reset clears every credential and locked app; pass --yes to confirm");
            }
            let (locker, _) = open_locker(data_dir)?;
            locker.full_reset()?;
            println!("All security settings and locked apps cleared");
            Ok(())
        }
        Commands::Run => run_command(data_dir).await,
    }
}

fn open_locker(data_dir: Option<&Path>) -> Result<(AppLocker, Arc<Vault>)> {
    let path = vault_path(data_dir)?;
    if !path.exists() {
        bail!("vault missing at {}; run init first", path.display());
    }
    let password = prompt::password_once("Enter vault password: ")?;
    let vault = Arc::new(Vault::open(&path, &password)?);
    let store: Arc<dyn RecordStore> = vault.clone();
    Ok((AppLocker::open(store)?, vault))
}

fn init_command(data_dir: Option<&Path>) -> Result<()> {
    let path = vault_path(data_dir)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        let logs = match data_dir {
            Some(dir) => dir.join("logs"),
            None => log_dir()?,
        };
        std::fs::create_dir_all(logs)?;
    }
    if path.exists() {
        bail!("vault already exists at {}", path.display());
    }
    let password = prompt::password_twice("Create vault password: ")?;
    let vault = Vault::create_new(&path, &password)?;
    save_config(&vault, &LockerConfig::default())?;
    println!("Vault created at {}", path.display());
    println!("Vault ID: {}", vault.vault_id());
    println!("Next: set an unlock method with `setup-pin` or `setup-pattern`");
    Ok(())
}

fn setup_secret_command(data_dir: Option<&Path>, method: AuthMethod) -> Result<()> {
    let (locker, _) = open_locker(data_dir)?;
    let config = locker.config();
    match method {
        AuthMethod::Pin => println!(
            "PIN must be {}-{} digits",
            config.min_pin_length, config.max_pin_length
        ),
        _ => println!(
            "Pattern is at least {} cells numbered 0-8, no repeats",
            config.min_pattern_length
        ),
    }
    let first = prompt::secret(&format!("New {method}: "))?;
    let confirm = prompt::secret(&format!("Confirm {method}: "))?;
    locker.verifier().setup_confirmed(method, &first, &confirm)?;
    println!("{method} set");
    if !locker.verifier().recovery_available()? {
        warn!("no recovery configured; a forgotten {method} can only be cleared with reset");
    }
    Ok(())
}

fn setup_recovery_command(data_dir: Option<&Path>, question: &str) -> Result<()> {
    let (locker, _) = open_locker(data_dir)?;
    let answer = prompt::secret(&format!("{question} "))?;
    let pin = prompt::secret("Recovery PIN: ")?;
    let confirm = prompt::secret("Confirm recovery PIN: ")?;
    if *pin != *confirm {
        bail!("recovery PINs do not match");
    }
    // validate the PIN before touching the question so a bad PIN leaves
    // nothing half-configured
    locker.verifier().validate_secret(AuthMethod::Pin, &pin)?;
    locker.verifier().setup_security_question(question, &answer)?;
    locker.verifier().setup_recovery_pin(&pin)?;
    println!("Recovery configured");
    Ok(())
}

fn list_command(data_dir: Option<&Path>, all: bool, search: Option<&str>) -> Result<()> {
    let (locker, _) = open_locker(data_dir)?;
    let registry = locker.registry();
    let mut records = match search {
        Some(query) => registry.search(query)?,
        None if all => registry.list_all()?,
        None => registry.list_locked()?,
    };
    if search.is_some() && !all {
        records.retain(|r| r.locked);
    }
    if records.is_empty() {
        println!("No apps");
        return Ok(());
    }
    for record in records {
        println!(
            "{:<8} {:<32} {:<40} {}",
            if record.locked { "locked" } else { "-" },
            record.display_name,
            record.package_id,
            record.added_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn candidates_command(data_dir: Option<&Path>, installed: &Path) -> Result<()> {
    let data = std::fs::read(installed)?;
    let entries: Vec<InstalledEntry> = serde_json::from_slice(&data)?;
    let installed: Vec<InstalledApp> = entries
        .into_iter()
        .map(|e| InstalledApp {
            package_id: e.package_id,
            display_name: e.display_name,
            system: e.system,
            updated_system: e.updated_system,
        })
        .collect();
    let (locker, _) = open_locker(data_dir)?;
    let own = locker.config().own_package_id.clone();
    for record in locker.registry().candidates(&installed, &own)? {
        println!("{:<32} {}", record.display_name, record.package_id);
    }
    Ok(())
}

fn config_command(data_dir: Option<&Path>, action: ConfigAction) -> Result<()> {
    let (locker, vault) = open_locker(data_dir)?;
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(locker.config())?);
        }
        ConfigAction::Set { key, value } => {
            let mut doc = serde_json::to_value(locker.config())?;
            let fields = doc
                .as_object_mut()
                .ok_or_else(|| anyhow!("config is not an object"))?;
            if !fields.contains_key(&key) {
                bail!("unknown config key {key}");
            }
            let parsed = serde_json::from_str(&value)
                .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
            fields.insert(key.clone(), parsed);
            let config: LockerConfig = serde_json::from_value(doc)?;
            save_config(vault.as_ref(), &config)?;
            info!(%key, "config updated");
            println!("{key} = {value}");
        }
    }
    Ok(())
}

fn status_command(data_dir: Option<&Path>) -> Result<()> {
    let (locker, vault) = open_locker(data_dir)?;
    let settings = locker.credentials().load()?;
    let known = locker.registry().list_all()?;
    let report = StatusReport {
        vault_id: vault.vault_id(),
        auth_method: settings.auth_method,
        auth_configured: locker.verifier().is_auth_configured()?,
        biometric_enabled: settings.biometric_enabled,
        recovery_configured: settings.recovery_configured(),
        locked_apps: known.iter().filter(|r| r.locked).count(),
        known_apps: known.len(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn recover_command(data_dir: Option<&Path>) -> Result<()> {
    let (locker, _) = open_locker(data_dir)?;
    let request = ChallengeRequest {
        package_id: locker.config().own_package_id.clone(),
        reason: ChallengeReason::Locked,
    };
    let mut session = locker.sessions().open(&request)?;
    challenge::recover(&locker, &mut session).await
}

async fn run_command(data_dir: Option<&Path>) -> Result<()> {
    let (locker, _) = open_locker(data_dir)?;
    let locker = Arc::new(locker);
    if !locker.verifier().is_auth_configured()? {
        warn!("no unlock method configured; locked apps cannot be opened until one is set up");
    }

    let (event_tx, event_rx) = mpsc::channel(64);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (monitor_task, mut challenges) =
        spawn_monitor(locker.monitor().clone(), event_rx, shutdown_rx);
    let (sweeper_task, sweeper) =
        spawn_sweeper(locker.grace().clone(), locker.config().sweep_interval());

    let reader_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if event_tx.send(line.trim().to_string()).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "reading foreground events failed");
                    break;
                }
            }
        }
    });

    info!(
        locked = locker.registry().list_locked()?.len(),
        "service started; reading foreground package ids from stdin"
    );
    loop {
        tokio::select! {
            request = challenges.recv() => match request {
                Some(request) => {
                    if let Err(err) = challenge::handle(locker.clone(), request).await {
                        error!(error = %err, "challenge failed, app stays locked");
                    }
                }
                None => break,
            },
            _ = signal::ctrl_c() => {
                info!("service stopping");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = sweeper.shutdown_tx.send(true);
    reader_task.abort();
    let _ = monitor_task.await;
    let _ = sweeper_task.await;
    Ok(())
}
