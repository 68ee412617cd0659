//! Chat credential and its local persistence
//!
//! The credential is an opaque secret forwarded to the chat endpoint. It is
//! kept in a single file named by [`CREDENTIAL_KEY`] inside the data
//! directory and is never logged.

use std::fmt;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Well-known storage key for the chat credential
pub const CREDENTIAL_KEY: &str = "openrouter_api_key";

/// Opaque secret authorizing remote chat requests
pub struct Credential(SecretString);

impl Credential {
    /// Build a credential from user input, trimming surrounding whitespace
    ///
    /// # Errors
    ///
    /// Returns error if the input is blank
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::Credential("credential must not be empty".to_string()));
        }
        Ok(Self(SecretString::from(trimmed.to_string())))
    }

    /// Reveal the secret for transmission
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self(SecretString::from(self.expose().to_string()))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// File-backed credential storage
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store the credential under [`CREDENTIAL_KEY`] inside `data_dir`
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(CREDENTIAL_KEY),
        }
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored credential, if any
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read
    pub fn load(&self) -> Result<Option<Credential>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Credential::new(&content).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Credential(format!(
                "failed to read {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Persist the credential, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns error if the data directory or file cannot be written
    pub fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, credential.expose())?;
        restrict_permissions(&self.path)?;

        tracing::debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    /// Remove the stored credential; succeeds if none is stored
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "credential cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
