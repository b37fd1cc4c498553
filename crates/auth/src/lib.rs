mod error;

pub use error::AuthError;

use anyhow::Result;

#[derive(Debug, Clone)]
pub enum Credential {
    ApiKey(String),
}

impl Credential {
    pub fn header_value(&self) -> String {
        let Credential::ApiKey(key) = self;
        key.clone()
    }
}

/// Resolve a credential for a provider. An explicit config key wins;
/// otherwise the provider's environment variable is consulted. Credentials
/// are always resolved at the point of use (inside the worker), never
/// shipped across an isolation boundary.
pub fn resolve_credential(provider: &str, config_key: Option<&str>) -> Result<Credential> {
    if let Some(key) = config_key {
        return Ok(Credential::ApiKey(key.to_string()));
    }

    let def = cadre_config::find_provider_def(provider).ok_or_else(|| AuthError::UnknownProvider {
        provider: provider.to_string(),
    })?;

    match std::env::var(def.env_var) {
        Ok(key) if !key.is_empty() => Ok(Credential::ApiKey(key)),
        _ => Err(AuthError::NoCredential {
            provider: provider.to_string(),
            env_var: def.env_var.to_string(),
        }
        .into()),
    }
}

/// Resolve the base URL for a provider: config override, then the
/// provider's base-URL environment variable, then the built-in default.
pub fn resolve_base_url(provider: &str, config_url: Option<&str>) -> Option<String> {
    if let Some(url) = config_url {
        return Some(url.to_string());
    }
    let def = cadre_config::find_provider_def(provider)?;
    if let Some(env) = def.base_url_env {
        if let Ok(url) = std::env::var(env) {
            if !url.is_empty() {
                return Some(url);
            }
        }
    }
    if def.default_base_url.is_empty() {
        None
    } else {
        Some(def.default_base_url.to_string())
    }
}
