use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use crate::error::{LockError, Result};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "darklock";
pub const APP_NAME: &str = "applock";

pub const VAULT_FILE: &str = "vault.dat";

pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| LockError::Config("cannot determine data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("logs"))
}

/// `vault.dat` under `dir`, or under the platform data directory.
pub fn vault_path(dir: Option<&Path>) -> Result<PathBuf> {
    let base = match dir {
        Some(dir) => dir.to_path_buf(),
        None => data_dir()?,
    };
    Ok(base.join(VAULT_FILE))
}
