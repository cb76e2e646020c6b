//! Command-line and environment configuration.

use clap::Parser;

/// Environment variable consulted when the connection string is not passed as the sole argument.
pub const CONNECTION_STRING_ENV: &str = "AzureStorageConnectionString";

/// Container used when no container name argument is given.
pub const DEFAULT_CONTAINER_NAME: &str = "testbotstorage";

/// Environment variable selecting the log format (`text` or `json`).
pub const LOG_FORMAT_ENV: &str = "BLOBPROBE_LOG_FORMAT";

/// Positional arguments accepted by the probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Parser)]
#[command(
    name = "blobprobe",
    version,
    about = "Continuously read and write a fixed key against blob storage until a key is pressed"
)]
pub struct ProbeArgs {
    /// Storage connection string (otherwise read from AzureStorageConnectionString).
    pub connection_string: Option<String>,

    /// Blob container to probe.
    pub container_name: Option<String>,
}

/// Startup configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Neither the argument nor the environment provided a usable connection string.
    #[error(
        "ERROR: No valid connection string supplied. Pass as an arg or set \"AzureStorageConnectionString\" environment variable."
    )]
    MissingConnectionString,
}

/// Resolved probe configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Connection string handed to the storage backend.
    pub connection_string: String,
    /// Container (namespace) holding the probe records.
    pub container_name: String,
}

impl std::fmt::Debug for ProbeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeConfig")
            .field("connection_string", &"<redacted>")
            .field("container_name", &self.container_name)
            .finish()
    }
}

impl ProbeConfig {
    /// Resolve configuration from parsed arguments and the value of
    /// [`CONNECTION_STRING_ENV`].
    ///
    /// The connection string comes from the first argument only when it is the
    /// sole argument; with zero or two arguments it comes from the environment.
    /// The container name is the second argument, or [`DEFAULT_CONTAINER_NAME`].
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingConnectionString`] when the resolved
    /// connection string is absent or empty.
    pub fn resolve(args: &ProbeArgs, env_value: Option<String>) -> Result<Self, ConfigError> {
        let connection_string = match (&args.connection_string, &args.container_name) {
            (Some(from_arg), None) => Some(from_arg.clone()),
            _ => env_value,
        }
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingConnectionString)?;

        let container_name = args
            .container_name
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string());

        Ok(Self {
            connection_string,
            container_name,
        })
    }

    /// Resolve configuration, reading [`CONNECTION_STRING_ENV`] from the process environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingConnectionString`] as [`ProbeConfig::resolve`] does.
    pub fn from_env(args: &ProbeArgs) -> Result<Self, ConfigError> {
        Self::resolve(args, std::env::var(CONNECTION_STRING_ENV).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(values: &[&str]) -> ProbeArgs {
        let argv = std::iter::once("blobprobe").chain(values.iter().copied());
        ProbeArgs::try_parse_from(argv).expect("valid arguments")
    }

    #[test]
    fn no_args_reads_environment() {
        let config = ProbeConfig::resolve(&args(&[]), Some("from-env".into())).expect("resolved");
        assert_eq!(config.connection_string, "from-env");
        assert_eq!(config.container_name, DEFAULT_CONTAINER_NAME);
    }

    #[test]
    fn no_args_and_no_environment_fails() {
        assert_eq!(
            ProbeConfig::resolve(&args(&[]), None),
            Err(ConfigError::MissingConnectionString)
        );
    }

    #[test]
    fn empty_environment_fails() {
        assert_eq!(
            ProbeConfig::resolve(&args(&[]), Some(String::new())),
            Err(ConfigError::MissingConnectionString)
        );
    }

    #[test]
    fn single_arg_wins_over_environment() {
        let config = ProbeConfig::resolve(&args(&["from-arg"]), Some("from-env".into()))
            .expect("resolved");
        assert_eq!(config.connection_string, "from-arg");
        assert_eq!(config.container_name, "testbotstorage");
    }

    #[test]
    fn single_arg_used_verbatim() {
        let raw = "AccountName=a;AccountKey=YQ==;EndpointSuffix=core.windows.net";
        let config = ProbeConfig::resolve(&args(&[raw]), None).expect("resolved");
        assert_eq!(config.connection_string, raw);
    }

    #[test]
    fn empty_single_arg_fails() {
        assert_eq!(
            ProbeConfig::resolve(&args(&[""]), Some("from-env".into())),
            Err(ConfigError::MissingConnectionString)
        );
    }

    #[test]
    fn two_args_take_container_and_environment_connection() {
        let config = ProbeConfig::resolve(&args(&["ignored", "mycontainer"]), Some("from-env".into()))
            .expect("resolved");
        assert_eq!(config.connection_string, "from-env");
        assert_eq!(config.container_name, "mycontainer");
    }

    #[test]
    fn two_args_without_environment_fails() {
        assert_eq!(
            ProbeConfig::resolve(&args(&["conn", "mycontainer"]), None),
            Err(ConfigError::MissingConnectionString)
        );
    }

    #[test]
    fn three_args_rejected_by_parser() {
        assert!(ProbeArgs::try_parse_from(["blobprobe", "a", "b", "c"]).is_err());
    }

    #[test]
    fn missing_message_names_variable() {
        assert_eq!(
            ConfigError::MissingConnectionString.to_string(),
            "ERROR: No valid connection string supplied. Pass as an arg or set \"AzureStorageConnectionString\" environment variable."
        );
    }

    #[test]
    fn debug_redacts_connection_string() {
        let config = ProbeConfig::resolve(&args(&["secret-conn"]), None).expect("resolved");
        assert!(!format!("{config:?}").contains("secret-conn"));
    }
}
