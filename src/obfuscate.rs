//! A concrete `Obfuscator` redacting sensitive `key=value` tokens from free
//! text (§4.5.2, applied to stderr lines and error messages before logging).

use crate::traits::Obfuscator;

const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "auth",
];

/// Scans whitespace-separated `key=value` tokens and replaces the value with
/// `***` when the key (case-insensitively) matches a sensitive name. Anything
/// not shaped like `key=value` passes through unchanged.
pub struct SubstringObfuscator {
    sensitive_keys: Vec<String>,
}

impl Default for SubstringObfuscator {
    fn default() -> Self {
        Self {
            sensitive_keys: DEFAULT_SENSITIVE_KEYS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SubstringObfuscator {
    pub fn with_keys(sensitive_keys: Vec<String>) -> Self {
        Self { sensitive_keys }
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.sensitive_keys.iter().any(|candidate| key.contains(candidate.as_str()))
    }
}

impl Obfuscator for SubstringObfuscator {
    fn redact(&self, input: &str) -> String {
        input
            .split(' ')
            .map(|token| match token.split_once('=') {
                Some((key, _value)) if self.is_sensitive(key) => format!("{key}=***"),
                _ => token.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
