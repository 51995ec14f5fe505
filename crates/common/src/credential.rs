//! Per-service credential generation

use rand::rngs::OsRng;
use rand::Rng;
use std::fmt;

/// Characters a generated credential is drawn from. The symbols are safe
/// inside single-quoted shell strings and secret-store payloads.
pub const CREDENTIAL_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_.+=@%";

/// Shortest credential ever produced
pub const MIN_CREDENTIAL_LEN: usize = 16;

/// Length used by the provisioning workflow
pub const DEFAULT_CREDENTIAL_LEN: usize = 20;

/// A generated secret. Formatting never reveals the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// The raw secret, for the one place it is shown and the one store it is pushed to
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Generate a credential from the operating system CSPRNG.
pub fn generate_credential(len: usize) -> Credential {
    generate_with(&mut OsRng, len)
}

/// Generate a credential from the given random source.
pub fn generate_with<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Credential {
    let len = len.max(MIN_CREDENTIAL_LEN);
    let value = (0..len)
        .map(|_| CREDENTIAL_ALPHABET[rng.gen_range(0..CREDENTIAL_ALPHABET.len())] as char)
        .collect();

    Credential(value)
}
