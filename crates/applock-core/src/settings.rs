use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthMethod {
    #[default]
    None,
    Pin,
    Pattern,
    Biometric,
}

impl AuthMethod {
    /// Methods whose secret is hashed and stored.
    pub fn takes_secret(self) -> bool {
        matches!(self, AuthMethod::Pin | AuthMethod::Pattern)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMethod::None => "NONE",
            AuthMethod::Pin => "PIN",
            AuthMethod::Pattern => "PATTERN",
            AuthMethod::Biometric => "BIOMETRIC",
        };
        f.write_str(name)
    }
}

impl FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(AuthMethod::None),
            "pin" => Ok(AuthMethod::Pin),
            "pattern" => Ok(AuthMethod::Pattern),
            "biometric" => Ok(AuthMethod::Biometric),
            other => Err(format!("unknown auth method: {other}")),
        }
    }
}

/// The singleton security record. Only hashes are ever held here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_pin_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_answer_hash: Option<String>,
    #[serde(default)]
    pub biometric_enabled: bool,
}

impl SecuritySettings {
    /// Stored hash for a secret-bearing method; `None` for the others.
    pub fn hash_for(&self, method: AuthMethod) -> Option<&str> {
        match method {
            AuthMethod::Pin => self.pin_hash.as_deref(),
            AuthMethod::Pattern => self.pattern_hash.as_deref(),
            AuthMethod::None | AuthMethod::Biometric => None,
        }
    }

    pub fn recovery_configured(&self) -> bool {
        self.security_question.is_some()
            && self.security_answer_hash.is_some()
            && self.recovery_pin_hash.is_some()
    }
}
