use std::path::{Path, PathBuf};

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::stream::accumulator::OverlapPolicy;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "penyidik.yaml";

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Klien streaming asisten AI penyidik", long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Agent service base URL
    #[arg(long, env = "AGENT_API_URL")]
    pub base_url: Option<String>,

    /// Agent to run
    #[arg(long, env = "AGENT_ID")]
    pub agent_id: Option<String>,

    /// Wall-clock limit for a single run, in seconds
    #[arg(long, env = "RUN_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Session list file
    #[arg(long, env = "SESSION_STORE")]
    pub session_store: Option<PathBuf>,

    /// Investigator user id
    #[arg(long, env = "USER_ID")]
    pub user_id: Option<String>,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub log_json: Option<bool>,

    /// Continue an existing session
    #[arg(long)]
    pub session: Option<String>,

    /// File to attach (repeatable)
    #[arg(short, long = "file")]
    pub files: Vec<PathBuf>,

    /// Message to send; reads from stdin when omitted
    pub message: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub chat: ChatConfig,
    pub session: SessionConfig,
    pub identity: IdentityConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub agent_id: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub min_message_chars: usize,
    pub overlap_policy: OverlapPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// In-memory session list when unset.
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    /// Anonymous id is generated when unset.
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Self::from_cli(&cli)
    }

    /// Layer defaults, the YAML file, `PENYIDIK_` env vars, then CLI values.
    pub fn from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("api.base_url", "http://localhost:7777")?
            .set_default("api.agent_id", "penyidik")?
            .set_default("api.timeout_secs", 600)?
            .set_default("chat.min_message_chars", 3)?
            .set_default("chat.overlap_policy", "append_on_reset")?
            .set_default("log.json", false)?;

        // An explicit path must exist; the working-directory default is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::from(path.as_path()).format(FileFormat::Yaml)),
            None => builder.add_source(
                File::from(Path::new(DEFAULT_CONFIG_FILE))
                    .format(FileFormat::Yaml)
                    .required(false),
            ),
        };

        // E.g. PENYIDIK_API__BASE_URL=https://agen.polri.go.id
        builder = builder.add_source(
            Environment::with_prefix("PENYIDIK")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = &cli.base_url {
            builder = builder.set_override("api.base_url", url.as_str())?;
        }
        if let Some(agent) = &cli.agent_id {
            builder = builder.set_override("api.agent_id", agent.as_str())?;
        }
        if let Some(secs) = cli.timeout_secs {
            builder = builder.set_override("api.timeout_secs", secs)?;
        }
        if let Some(path) = &cli.session_store {
            builder = builder.set_override("session.store_path", path.to_string_lossy().as_ref())?;
        }
        if let Some(user) = &cli.user_id {
            builder = builder.set_override("identity.user_id", user.as_str())?;
        }
        if let Some(json) = cli.log_json {
            builder = builder.set_override("log.json", json)?;
        }

        let cfg = builder.build()?;
        let app: Self = cfg.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "api.base_url cannot be empty".to_string(),
            ));
        }
        if self.api.agent_id.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "api.agent_id cannot be empty".to_string(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "api.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_message_and_files() {
        let cli = Cli::try_parse_from([
            "penyidik-ai",
            "--file",
            "bukti.pdf",
            "-f",
            "foto.jpg",
            "apa",
            "isi",
            "dokumen",
        ])
        .unwrap();
        assert_eq!(cli.files.len(), 2);
        assert_eq!(cli.message.join(" "), "apa isi dokumen");
    }

    #[test]
    fn test_missing_explicit_config_file_fails() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/penyidik.yaml")),
            ..Cli::default()
        };
        assert!(AppConfig::from_cli(&cli).is_err());
    }
}
