//! Last-used connection parameters, persisted as JSON.

use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::{Credentials, DEFAULT_PORT};

/// Connection parameters remembered between runs.
///
/// # Example
///
/// ```
/// use pgnet_client::settings::ConnectionSettings;
///
/// let settings: ConnectionSettings = serde_json::from_str(r#"{"username": "alice"}"#).unwrap();
/// assert_eq!(settings.username, "alice");
/// assert_eq!(settings.port, 38929);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Connect to a remote server rather than a local one.
    pub online: bool,
    /// Username to log in as.
    pub username: String,
    /// Server host name or IP address.
    pub address: String,
    /// Server port.
    pub port: u16,
    /// Expected server public key. Empty skips verification.
    pub pubkey: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            online: false,
            username: "admin".into(),
            address: "localhost".into(),
            port: DEFAULT_PORT,
            pubkey: String::new(),
        }
    }
}

impl ConnectionSettings {
    /// Read settings from `path`.
    ///
    /// A missing file yields the defaults. So does an unreadable one, after
    /// logging a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`](crate::ClientError::Io) if the file exists
    /// but cannot be read.
    pub fn load_from_disk(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no saved connection settings");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!(path = %path.display(), "ignoring unparsable connection settings: {e}");
                Ok(Self::default())
            }
        }
    }

    /// Write settings to `path` as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`](crate::ClientError::Io) if the file cannot
    /// be written.
    pub fn save_to_disk(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Login parameters for these settings, with an optional password.
    pub fn credentials(&self, password: Option<&str>) -> Credentials {
        let mut credentials = Credentials::new(self.username.as_str());
        credentials.password = password.map(str::to_string);
        if !self.pubkey.is_empty() {
            credentials.verify_pubkey = Some(self.pubkey.clone());
        }
        credentials
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!("pgnet-settings-{}.json", uuid::Uuid::new_v4()))
    }

    #[test]
    fn missing_file_gives_defaults() {
        let settings = ConnectionSettings::load_from_disk(temp_path()).unwrap();
        assert_eq!(settings, ConnectionSettings::default());
        assert_eq!(settings.username, "admin");
        assert_eq!(settings.address, "localhost");
        assert_eq!(settings.port, 38929);
        assert!(!settings.online);
    }

    #[test]
    fn save_then_load() {
        let path = temp_path();
        let settings = ConnectionSettings {
            online: true,
            username: "alice".into(),
            address: "example.org".into(),
            port: 4000,
            pubkey: "KEY".into(),
        };
        settings.save_to_disk(&path).unwrap();
        let loaded = ConnectionSettings::load_from_disk(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let path = temp_path();
        std::fs::write(&path, "{ not json").unwrap();
        let loaded = ConnectionSettings::load_from_disk(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, ConnectionSettings::default());
    }

    #[test]
    fn credentials_skip_empty_pubkey() {
        let settings = ConnectionSettings::default();
        let credentials = settings.credentials(Some("pw"));
        assert_eq!(credentials.username, "admin");
        assert_eq!(credentials.password.as_deref(), Some("pw"));
        assert_eq!(credentials.verify_pubkey, None);
    }
}
