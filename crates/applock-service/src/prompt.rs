use anyhow::{anyhow, bail, Result};
use zeroize::Zeroizing;

pub(crate) const PASSWORD_ENV: &str = "APPLOCK_VAULT_PASSWORD";
pub(crate) const PASSWORD_CONFIRM_ENV: &str = "APPLOCK_VAULT_PASSWORD_CONFIRM";

const MIN_PASSWORD_LEN: usize = 12;

pub(crate) fn secret(prompt: &str) -> Result<Zeroizing<String>> {
    let value = Zeroizing::new(
        rpassword::prompt_password(prompt).map_err(|e| anyhow!("prompt: {e}"))?,
    );
    Ok(trimmed(&value))
}

fn trimmed(value: &Zeroizing<String>) -> Zeroizing<String> {
    Zeroizing::new(value.trim().to_string())
}

pub(crate) fn password_once(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = Zeroizing::new(
        rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if pw.len() < MIN_PASSWORD_LEN {
        bail!("password too short; minimum {MIN_PASSWORD_LEN} characters");
    }
    Ok(pw)
}

pub(crate) fn password_twice(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        if !pw.is_empty() {
            if let Ok(confirm) = std::env::var(PASSWORD_CONFIRM_ENV) {
                if confirm != pw {
                    bail!("password confirmation mismatch");
                }
            }
            return Ok(Zeroizing::new(pw));
        }
    }
    let first = password_once(prompt)?;
    let second = Zeroizing::new(
        rpassword::prompt_password("Confirm password: ")
            .map_err(|e| anyhow!("password prompt: {e}"))?,
    );
    if *first != *second {
        bail!("passwords do not match");
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trimmed_copy_is_zeroizing() {
        let raw = Zeroizing::new("  1234\n".to_string());
        let value: Zeroizing<String> = trimmed(&raw);
        assert_eq!(value.as_str(), "1234");
    }
}
