use crate::domain::token::Token;
use crate::infrastructure::error::InfraError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persistent home of the single session token. Every write goes through
/// here; nothing else touches the backing storage.
pub trait TokenStore: Send + Sync {
    fn load_token(&self) -> Result<Option<Token>, InfraError>;
    fn save_token(&self, token: &Token) -> Result<(), InfraError>;
    fn delete_token(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service_name: String,
    account_name: String,
}

impl KeyringTokenStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new("worknest", "token")
    }
}

impl TokenStore for KeyringTokenStore {
    fn load_token(&self) -> Result<Option<Token>, InfraError> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(Token::parse(&value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }

    fn save_token(&self, token: &Token) -> Result<(), InfraError> {
        self.entry()?
            .set_password(token.as_str())
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

/// Key-value JSON file, the desktop counterpart of browser local storage.
/// Writes land in a sibling temp file that is renamed over the original, so
/// readers see either the old or the new document, never a partial one.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    key: String,
    write_guard: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(path: impl AsRef<Path>, key: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            key: key.into(),
            write_guard: Mutex::new(()),
        }
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, InfraError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<(), InfraError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        let formatted = serde_json::to_string_pretty(entries)?;
        fs::write(&temp_path, format!("{formatted}\n"))?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, apply: F) -> Result<(), InfraError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self
            .write_guard
            .lock()
            .map_err(|error| InfraError::Credential(format!("token file lock poisoned: {error}")))?;
        let mut entries = self.read_entries()?;
        apply(&mut entries);
        self.write_entries(&entries)
    }
}

impl TokenStore for FileTokenStore {
    fn load_token(&self) -> Result<Option<Token>, InfraError> {
        Ok(self
            .read_entries()?
            .get(&self.key)
            .and_then(|value| Token::parse(value)))
    }

    fn save_token(&self, token: &Token) -> Result<(), InfraError> {
        self.update(|entries| {
            entries.insert(self.key.clone(), token.as_str().to_string());
        })
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        if !self.path.exists() {
            return Ok(());
        }
        self.update(|entries| {
            entries.remove(&self.key);
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    token: Mutex<Option<Token>>,
}

impl InMemoryTokenStore {
    pub fn with_token(token: Token) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl TokenStore for InMemoryTokenStore {
    fn load_token(&self) -> Result<Option<Token>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }

    fn save_token(&self, token: &Token) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = Some(token.clone());
        Ok(())
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        let mut guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        *guard = None;
        Ok(())
    }
}
