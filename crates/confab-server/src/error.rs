use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{provider} credentials missing: set `{field}` in the config or the {env_var} environment variable")]
    MissingCredential {
        provider: &'static str,
        field: &'static str,
        env_var: &'static str,
    },
}
