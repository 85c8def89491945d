// src/credentials.rs
//! Credential gate: tracks whether a usable API key is selected.
//!
//! The flag is set once at startup by `probe` and cleared only when a remote
//! call proves the key invalid. Consumers read the flag; they never ask the
//! selector directly.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// API key with a redacted `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Returns `None` for blank input.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

/// Host capability for choosing an API key.
#[async_trait]
pub trait KeySelector: Send + Sync {
    async fn has_selected_key(&self) -> Result<bool, String>;

    /// Returns once the user dismisses the prompt. Callers assume success.
    async fn open_select_key(&self) -> Result<(), String>;

    fn current_key(&self) -> Option<ApiKey>;
}

/// Key fixed by configuration; selection is not possible.
pub struct StaticKeySelector {
    key: Option<ApiKey>,
}

impl StaticKeySelector {
    pub fn new(key: Option<ApiKey>) -> Self {
        Self { key }
    }
}

#[async_trait]
impl KeySelector for StaticKeySelector {
    async fn has_selected_key(&self) -> Result<bool, String> {
        Ok(self.key.is_some())
    }

    async fn open_select_key(&self) -> Result<(), String> {
        Err("API key selection utility is not available. Set GEMINI_API_KEY instead.".to_string())
    }

    fn current_key(&self) -> Option<ApiKey> {
        self.key.clone()
    }
}

/// Prompts for a key on the terminal without echoing it. The key is kept in
/// memory only.
pub struct TerminalKeySelector {
    key: RwLock<Option<ApiKey>>,
}

impl TerminalKeySelector {
    pub fn new(initial: Option<ApiKey>) -> Self {
        Self {
            key: RwLock::new(initial),
        }
    }
}

#[async_trait]
impl KeySelector for TerminalKeySelector {
    async fn has_selected_key(&self) -> Result<bool, String> {
        Ok(self.current_key().is_some())
    }

    async fn open_select_key(&self) -> Result<(), String> {
        let entered = tokio::task::spawn_blocking(|| rpassword::prompt_password("Gemini API key: "))
            .await
            .map_err(|e| format!("Key prompt failed: {}", e))?
            .map_err(|e| format!("Failed to read API key: {}", e))?;

        match ApiKey::new(entered) {
            Some(key) => {
                let mut slot = self.key.write().map_err(|_| "API key slot poisoned".to_string())?;
                *slot = Some(key);
                Ok(())
            }
            None => {
                tracing::warn!("Empty API key entered; keeping the previous selection");
                Ok(())
            }
        }
    }

    fn current_key(&self) -> Option<ApiKey> {
        self.key.read().ok().and_then(|slot| slot.clone())
    }
}

pub struct CredentialGate {
    present: AtomicBool,
    configured: Option<ApiKey>,
    selector: Option<Arc<dyn KeySelector>>,
}

impl CredentialGate {
    /// New gate, flag cleared until `probe` runs. `configured` is the key from
    /// the environment, used whenever the selector has none.
    pub fn new(configured: Option<ApiKey>, selector: Option<Arc<dyn KeySelector>>) -> Self {
        Self {
            present: AtomicBool::new(false),
            configured,
            selector,
        }
    }

    /// Sets the flag from the selector. Without a selector the gate assumes a
    /// key is present so restricted hosts stay usable.
    pub async fn probe(&self) -> bool {
        let present = match &self.selector {
            Some(selector) => match selector.has_selected_key().await {
                Ok(selected) => selected,
                Err(e) => {
                    tracing::warn!("API key probe failed: {}", e);
                    false
                }
            },
            None => {
                tracing::warn!("⚠️ No key selector available. Assuming an API key is set.");
                true
            }
        };
        self.present.store(present, Ordering::SeqCst);
        tracing::info!("🔑 Credential present: {}", present);
        present
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::SeqCst)
    }

    /// Forces re-selection before the next generation.
    pub fn revoke(&self) {
        if self.present.swap(false, Ordering::SeqCst) {
            tracing::warn!("🔒 API key marked invalid; a new key must be selected");
        }
    }

    pub async fn request_selection(&self) -> Result<(), String> {
        let selector = self
            .selector
            .as_ref()
            .ok_or_else(|| "API key selection utility is not available.".to_string())?;
        selector.open_select_key().await?;
        self.present.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn api_key(&self) -> Option<ApiKey> {
        self.selector
            .as_ref()
            .and_then(|s| s.current_key())
            .or_else(|| self.configured.clone())
    }
}
