//! Auth provider registry with rotation on upstream rejection.
//!
//! Providers come from `config/auth_roles.json`; an `oauth` provider reads
//! its access token from `config/credentials.json`. The registry hands out
//! the current provider's headers and rotates to the next non-failed
//! provider when callers report an auth failure, gated by a cooldown so a
//! burst of 403s does not spin through the whole list. When every provider
//! has failed the failure set is cleared and selection restarts at the
//! first provider.
//!
//! The registry never performs network calls; it is shared process-wide
//! behind an `Arc` and guards its rotation state with a mutex.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;

use vh_domain::{Error, Result};

/// Default cooldown between rotations (seconds).
const ROTATION_COOLDOWN_SECS: u64 = 60;

/// Purpose used by the vacancy/employer fetch path.
pub const PURPOSE_DOWNLOAD: &str = "download";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    AccessToken,
    Oauth,
    Other(String),
}

impl ProviderKind {
    fn parse(s: &str) -> Self {
        match s {
            "access_token" => Self::AccessToken,
            "oauth" => Self::Oauth,
            other => Self::Other(other.to_string()),
        }
    }

    /// Selection preference within a purpose: access_token, then oauth,
    /// then everything else.
    fn preference(&self) -> u8 {
        match self {
            Self::AccessToken => 0,
            Self::Oauth => 1,
            Self::Other(_) => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Provider {
    pub name: String,
    pub kind: ProviderKind,
    pub token: Option<String>,
    pub priority: i64,
    pub allowed_for: Vec<String>,
}

impl Provider {
    fn serves(&self, purpose: &str) -> bool {
        self.allowed_for.iter().any(|p| p == purpose)
    }
}

// ── File formats ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
struct AuthFile {
    #[serde(default)]
    auth_providers: HashMap<String, AuthFileEntry>,
}

#[derive(Debug, Deserialize)]
struct AuthFileEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default = "default_priority")]
    priority: i64,
    #[serde(default = "default_allowed_for")]
    allowed_for: Vec<String>,
}

fn default_priority() -> i64 {
    100
}

fn default_allowed_for() -> Vec<String> {
    vec![PURPOSE_DOWNLOAD.to_string()]
}

#[derive(Debug, Deserialize, Default)]
struct CredentialsFile {
    #[serde(default)]
    access_token: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RotationState {
    current_index: usize,
    failed: HashSet<String>,
    last_rotation: Option<Instant>,
}

pub struct AuthRegistry {
    providers: Vec<Provider>,
    /// Token resolved from the credentials file for `oauth` providers.
    oauth_token: Option<String>,
    cooldown: Duration,
    state: Mutex<RotationState>,
}

impl AuthRegistry {
    pub fn new(providers: Vec<Provider>, oauth_token: Option<String>) -> Self {
        Self {
            providers,
            oauth_token,
            cooldown: Duration::from_secs(ROTATION_COOLDOWN_SECS),
            state: Mutex::new(RotationState {
                current_index: 0,
                failed: HashSet::new(),
                last_rotation: None,
            }),
        }
    }

    #[cfg(test)]
    fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Build an empty registry (no auth headers will be emitted).
    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Load providers and credentials from disk. Missing files degrade to
    /// an empty registry; malformed JSON is an error.
    pub fn load(auth_path: &Path, credentials_path: &Path) -> Result<Self> {
        let auth: AuthFile = read_json_or_default(auth_path)?;
        let creds: CredentialsFile = read_json_or_default(credentials_path)?;

        let providers = auth
            .auth_providers
            .into_iter()
            .map(|(name, entry)| Provider {
                name,
                kind: ProviderKind::parse(&entry.kind),
                token: entry.token,
                priority: entry.priority,
                allowed_for: entry.allowed_for,
            })
            .collect();

        Ok(Self::new(providers, creds.access_token))
    }

    /// Providers serving `purpose`, ordered by kind preference then
    /// ascending priority.
    fn providers_for(&self, purpose: &str) -> Vec<&Provider> {
        let mut out: Vec<&Provider> =
            self.providers.iter().filter(|p| p.serves(purpose)).collect();
        out.sort_by_key(|p| (p.kind.preference(), p.priority, p.name.clone()));
        out
    }

    /// The currently selected provider for `purpose`, or `None` when no
    /// provider serves it. Resets an out-of-range index to the front.
    pub fn choose_provider(&self, purpose: &str) -> Option<Provider> {
        let providers = self.providers_for(purpose);
        if providers.is_empty() {
            return None;
        }
        let mut state = self.state.lock();
        if state.current_index >= providers.len() {
            state.current_index = 0;
        }
        Some(providers[state.current_index].clone())
    }

    /// Authorization headers for the current provider, empty when auth is
    /// unconfigured or the selected provider has no usable token.
    pub fn headers(&self, purpose: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        let Some(provider) = self.choose_provider(purpose) else {
            return headers;
        };
        let token = match provider.kind {
            ProviderKind::AccessToken => provider.token.clone(),
            ProviderKind::Oauth => {
                if self.oauth_token.is_none() {
                    tracing::warn!(
                        provider = %provider.name,
                        "oauth provider selected but no access_token in credentials"
                    );
                }
                self.oauth_token.clone()
            }
            ProviderKind::Other(_) => None,
        };
        if let Some(token) = token {
            headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
        headers
    }

    /// Record a failure for `name` and rotate when the cooldown allows it.
    pub fn mark_provider_failed(&self, name: &str) {
        if name.is_empty() {
            return;
        }
        let should_rotate = {
            let mut state = self.state.lock();
            state.failed.insert(name.to_string());
            tracing::warn!(provider = %name, "auth provider marked failed");
            state
                .last_rotation
                .map_or(true, |at| at.elapsed() > self.cooldown)
        };
        if should_rotate {
            self.rotate_to_next_provider(PURPOSE_DOWNLOAD);
        }
    }

    /// Advance to the next provider not in the failed set, scanning
    /// cyclically from the current index. When every provider has failed
    /// the set is cleared and the first provider is selected again.
    pub fn rotate_to_next_provider(&self, purpose: &str) -> Option<Provider> {
        let providers = self.providers_for(purpose);
        if providers.len() <= 1 {
            tracing::debug!("one or zero auth providers, nothing to rotate to");
            return self.choose_provider(purpose);
        }

        let mut state = self.state.lock();
        let len = providers.len();
        let current = state.current_index.min(len - 1);

        for step in 1..len {
            let idx = (current + step) % len;
            if !state.failed.contains(&providers[idx].name) {
                state.current_index = idx;
                state.last_rotation = Some(Instant::now());
                tracing::info!(provider = %providers[idx].name, index = idx, "rotated auth provider");
                return Some(providers[idx].clone());
            }
        }

        tracing::warn!("all auth providers failed, resetting failure state");
        state.failed.clear();
        state.current_index = 0;
        state.last_rotation = Some(Instant::now());
        Some(providers[0].clone())
    }

    /// Operator hook: forget failures and return to the first provider.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.current_index = 0;
        state.failed.clear();
        state.last_rotation = None;
        tracing::info!("auth rotation state reset");
    }

    pub fn provider_count(&self, purpose: &str) -> usize {
        self.providers_for(purpose).len()
    }
}

fn read_json_or_default<T: Default + serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| Error::Auth(format!("parsing {}: {e}", path.display())))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str, kind: ProviderKind, priority: i64) -> Provider {
        Provider {
            name: name.into(),
            kind,
            token: Some(format!("tok-{name}")),
            priority,
            allowed_for: vec![PURPOSE_DOWNLOAD.into()],
        }
    }

    fn two_provider_registry() -> AuthRegistry {
        AuthRegistry::new(
            vec![
                provider("a", ProviderKind::AccessToken, 1),
                provider("b", ProviderKind::AccessToken, 2),
            ],
            None,
        )
        .with_cooldown(Duration::ZERO)
    }

    #[test]
    fn empty_registry_has_no_provider_and_no_headers() {
        let reg = AuthRegistry::empty();
        assert!(reg.choose_provider(PURPOSE_DOWNLOAD).is_none());
        assert!(reg.headers(PURPOSE_DOWNLOAD).is_empty());
    }

    #[test]
    fn access_token_preferred_over_oauth_regardless_of_priority() {
        let reg = AuthRegistry::new(
            vec![
                provider("oauthy", ProviderKind::Oauth, 1),
                provider("tokeny", ProviderKind::AccessToken, 50),
            ],
            Some("from-creds".into()),
        );
        assert_eq!(reg.choose_provider(PURPOSE_DOWNLOAD).unwrap().name, "tokeny");
    }

    #[test]
    fn priority_breaks_ties_within_kind() {
        let reg = AuthRegistry::new(
            vec![
                provider("low", ProviderKind::AccessToken, 10),
                provider("high", ProviderKind::AccessToken, 1),
            ],
            None,
        );
        assert_eq!(reg.choose_provider(PURPOSE_DOWNLOAD).unwrap().name, "high");
    }

    #[test]
    fn headers_emit_bearer_token() {
        let reg = two_provider_registry();
        let headers = reg.headers(PURPOSE_DOWNLOAD);
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer tok-a");
    }

    #[test]
    fn oauth_provider_uses_credentials_token() {
        let reg = AuthRegistry::new(
            vec![Provider {
                token: None,
                ..provider("o", ProviderKind::Oauth, 1)
            }],
            Some("cred-token".into()),
        );
        let headers = reg.headers(PURPOSE_DOWNLOAD);
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer cred-token");
    }

    #[test]
    fn purpose_filtering_excludes_other_providers() {
        let mut p = provider("uploads-only", ProviderKind::AccessToken, 1);
        p.allowed_for = vec!["upload".into()];
        let reg = AuthRegistry::new(vec![p], None);
        assert!(reg.choose_provider(PURPOSE_DOWNLOAD).is_none());
        assert_eq!(reg.provider_count("upload"), 1);
    }

    #[test]
    fn mark_failed_rotates_to_a_different_provider() {
        let reg = two_provider_registry();
        let first = reg.choose_provider(PURPOSE_DOWNLOAD).unwrap();
        reg.mark_provider_failed(&first.name);
        let next = reg.choose_provider(PURPOSE_DOWNLOAD).unwrap();
        assert_ne!(first.name, next.name);
    }

    #[test]
    fn cooldown_defers_rotation() {
        let reg = AuthRegistry::new(
            vec![
                provider("a", ProviderKind::AccessToken, 1),
                provider("b", ProviderKind::AccessToken, 2),
                provider("c", ProviderKind::AccessToken, 3),
            ],
            None,
        )
        .with_cooldown(Duration::from_secs(3600));

        reg.mark_provider_failed("a"); // no prior rotation — rotates to b
        assert_eq!(reg.choose_provider(PURPOSE_DOWNLOAD).unwrap().name, "b");

        reg.mark_provider_failed("b"); // within cooldown — stays on b
        assert_eq!(reg.choose_provider(PURPOSE_DOWNLOAD).unwrap().name, "b");
    }

    #[test]
    fn rotation_skips_failed_providers() {
        let reg = AuthRegistry::new(
            vec![
                provider("a", ProviderKind::AccessToken, 1),
                provider("b", ProviderKind::AccessToken, 2),
                provider("c", ProviderKind::AccessToken, 3),
            ],
            None,
        )
        .with_cooldown(Duration::ZERO);

        reg.mark_provider_failed("b");
        let rotated = reg.rotate_to_next_provider(PURPOSE_DOWNLOAD).unwrap();
        assert_eq!(rotated.name, "c");
    }

    #[test]
    fn all_failed_clears_set_and_restarts_at_first() {
        let reg = two_provider_registry();
        reg.mark_provider_failed("a");
        // Both providers are now failed: the rotation inside this call
        // clears the set and restarts at the first provider.
        reg.mark_provider_failed("b");
        assert_eq!(reg.choose_provider(PURPOSE_DOWNLOAD).unwrap().name, "a");
        // The failure set was cleared, so a rotation now lands on "b".
        assert_eq!(reg.rotate_to_next_provider(PURPOSE_DOWNLOAD).unwrap().name, "b");
    }

    #[test]
    fn reset_returns_to_first_provider() {
        let reg = two_provider_registry();
        reg.mark_provider_failed("a");
        assert_eq!(reg.choose_provider(PURPOSE_DOWNLOAD).unwrap().name, "b");
        reg.reset();
        assert_eq!(reg.choose_provider(PURPOSE_DOWNLOAD).unwrap().name, "a");
    }

    #[test]
    fn load_from_disk_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let auth_path = dir.path().join("auth_roles.json");
        let creds_path = dir.path().join("credentials.json");

        std::fs::write(
            &auth_path,
            r#"{
                "auth_providers": {
                    "main": {"type": "access_token", "token": "t1", "priority": 1},
                    "backup": {"type": "oauth", "priority": 2, "allowed_for": ["download", "upload"]}
                }
            }"#,
        )
        .unwrap();
        std::fs::write(&creds_path, r#"{"access_token": "oauth-tok"}"#).unwrap();

        let reg = AuthRegistry::load(&auth_path, &creds_path).unwrap();
        assert_eq!(reg.provider_count(PURPOSE_DOWNLOAD), 2);
        assert_eq!(reg.choose_provider(PURPOSE_DOWNLOAD).unwrap().name, "main");

        let empty = AuthRegistry::load(&dir.path().join("nope.json"), &creds_path).unwrap();
        assert_eq!(empty.provider_count(PURPOSE_DOWNLOAD), 0);
    }
}
