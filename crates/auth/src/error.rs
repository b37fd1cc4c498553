#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No API key found for provider '{provider}'. Set {env_var} or configure in ~/.config/cadre/config.toml")]
    NoCredential { provider: String, env_var: String },

    #[error("Unknown provider '{provider}'")]
    UnknownProvider { provider: String },
}
