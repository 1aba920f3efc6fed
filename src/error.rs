use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("missing required environment variable(s): {}", .0.join(", "))]
    MissingEnv(Vec<&'static str>),

    #[error("Config error: {0}")]
    Config(String),

    #[error("failed to launch worker `{}`: {source}", executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_lists_every_key() {
        let err = ConsoleError::MissingEnv(vec!["API_KEY", "PRIVATE_KEY"]);
        assert_eq!(
            err.to_string(),
            "missing required environment variable(s): API_KEY, PRIVATE_KEY"
        );
    }

    #[test]
    fn spawn_error_names_the_executable() {
        let err = ConsoleError::Spawn {
            executable: PathBuf::from("/opt/node/aioznode"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("failed to launch worker `/opt/node/aioznode`"));
    }
}
