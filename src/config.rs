//! Command line, environment and analysis-file configuration.
//!
//! Every `serve` option can also come from an environment variable, and a `.env`
//! file in the working directory is read before arguments are parsed.

use crate::error::ConfigError;
use crate::evaluator::StatusPolicy;
use crate::parameters::ParameterLimits;
use crate::scoring::ScoringPolicy;
use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Secret used when none is configured; the server warns when it is still in place.
pub const DEFAULT_SECRET: &str = "change_this";

#[derive(Debug, Parser)]
#[command(name = "wqam", version, about = "Water quality analysis and monitoring service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API
    Serve(ServeConfig),
    /// Create an active administrator, or promote and reset an existing account
    CreateAdmin(CreateAdminArgs),
    /// Analyze a lab report offline and print the report as JSON
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct UserStoreArgs {
    /// JSON file holding user accounts
    #[arg(long, env = "DATABASE_URL", default_value = "database/users.json")]
    pub database: PathBuf,

    /// Secret mixed into every password hash
    #[arg(long, env = "JWT_SECRET", default_value = DEFAULT_SECRET, hide_env_values = true)]
    pub secret_key: String,
}

#[derive(Debug, Clone, Args)]
pub struct AnalysisArgs {
    /// Pre-trained pollution model (JSON)
    #[arg(long, env = "WQAM_MODEL_PATH", default_value = "ml/model/water_model.json")]
    pub model_path: PathBuf,

    /// JSON file overriding thresholds and scoring policy
    #[arg(long, env = "WQAM_ANALYSIS_CONFIG")]
    pub analysis_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct ServeConfig {
    /// Address to listen on
    #[arg(long, env = "WQAM_BIND", default_value = "127.0.0.1:8000")]
    pub bind: String,

    /// Origin allowed by CORS; repeat or comma-separate for several
    #[arg(long, env = "FRONTEND_URL", default_value = "http://localhost:5173", value_delimiter = ',')]
    pub frontend_url: Vec<String>,

    #[command(flatten)]
    pub users: UserStoreArgs,

    #[command(flatten)]
    pub analysis: AnalysisArgs,

    /// Persist report history to this gzip snapshot
    #[arg(long, env = "WQAM_REPORT_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Keep at most this many reports
    #[arg(
        long,
        env = "WQAM_HISTORY_LIMIT",
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub history_limit: Option<usize>,

    /// Bearer token lifetime in hours, at most one year
    #[arg(
        long,
        env = "WQAM_SESSION_HOURS",
        default_value_t = 24,
        value_parser = clap::value_parser!(i64).range(1..=8760)
    )]
    pub session_hours: i64,

    /// Largest accepted upload in megabytes
    #[arg(long, env = "WQAM_MAX_UPLOAD_MB", default_value_t = 20)]
    pub max_upload_mb: usize,

    /// Ensure this administrator exists at startup
    #[arg(long, env = "WQAM_ADMIN_USERNAME", requires = "admin_password")]
    pub admin_username: Option<String>,

    #[arg(long, env = "WQAM_ADMIN_PASSWORD", hide_env_values = true, requires = "admin_username")]
    pub admin_password: Option<String>,
}

impl ServeConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Args)]
pub struct CreateAdminArgs {
    #[command(flatten)]
    pub users: UserStoreArgs,

    #[arg(long)]
    pub username: String,

    #[arg(long)]
    pub password: String,
}

#[derive(Debug, Clone, Args)]
pub struct AnalyzeArgs {
    /// CSV, Excel or PDF lab report
    pub input: PathBuf,

    /// Also write the PDF report here
    #[arg(long)]
    pub pdf: Option<PathBuf>,

    /// Also write the XLSX export here
    #[arg(long)]
    pub xlsx: Option<PathBuf>,

    /// Name recorded as the uploader
    #[arg(long, default_value = "cli")]
    pub user: String,

    #[command(flatten)]
    pub analysis: AnalysisArgs,
}

/// Threshold and policy overrides read from `--analysis-config`.
///
/// ```json
/// {
///   "thresholds": { "pH": { "min": 6.8, "max": 8.2 } },
///   "status": { "average_margin": 0.25 },
///   "scoring": { "warning_weight": 1, "critical_weight": 3 }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub thresholds: BTreeMap<String, ParameterLimits>,
    pub status: StatusPolicy,
    pub scoring: ScoringPolicy,
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Format {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["wqam", "serve"]).unwrap();
        let Command::Serve(config) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(config.session_hours, 24);
        assert_eq!(config.max_upload_bytes(), 20 * 1024 * 1024);
        assert!(config.history_limit.is_none());
    }

    #[test]
    fn serve_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "wqam",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--frontend-url",
            "http://a.test,http://b.test",
            "--history-limit",
            "50",
            "--admin-username",
            "root",
            "--admin-password",
            "secret",
        ])
        .unwrap();
        let Command::Serve(config) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.frontend_url, vec!["http://a.test", "http://b.test"]);
        assert_eq!(config.history_limit, Some(50));
        assert_eq!(config.admin_username.as_deref(), Some("root"));
    }

    #[test]
    fn out_of_range_limits_are_rejected() {
        assert!(Cli::try_parse_from(["wqam", "serve", "--history-limit", "0"]).is_err());
        assert!(Cli::try_parse_from(["wqam", "serve", "--session-hours", "0"]).is_err());
        assert!(Cli::try_parse_from(["wqam", "serve", "--session-hours", "9999999999999"]).is_err());

        let cli = Cli::try_parse_from(["wqam", "serve", "--session-hours", "8760"]).unwrap();
        let Command::Serve(config) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(config.session_hours, 8760);
    }

    #[test]
    fn admin_username_requires_password() {
        assert!(Cli::try_parse_from(["wqam", "serve", "--admin-username", "root"]).is_err());
    }

    #[test]
    fn analyze_takes_input_and_outputs() {
        let cli = Cli::try_parse_from(["wqam", "analyze", "lab.csv", "--pdf", "out.pdf"]).unwrap();
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.input, PathBuf::from("lab.csv"));
        assert_eq!(args.pdf, Some(PathBuf::from("out.pdf")));
        assert_eq!(args.user, "cli");
    }

    #[test]
    fn analysis_config_sections_are_optional() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"status": {{"average_margin": 0.5}}}}"#).unwrap();
        let config = AnalysisConfig::load(file.path()).unwrap();
        assert_eq!(config.status.average_margin, 0.5);
        assert_eq!(config.scoring, ScoringPolicy::default());
        assert!(config.thresholds.is_empty());
    }

    #[test]
    fn malformed_analysis_config_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            AnalysisConfig::load(file.path()),
            Err(ConfigError::Format { .. })
        ));
    }
}
