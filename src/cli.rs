//! Command-line interface definitions for the video ingester.
//!
//! Every option can also come from the environment (a `.env` file in the
//! working directory is read first). Flags given here override the YAML
//! settings file.

use clap::Parser;

use crate::config::Settings;
use crate::sources::SourceName;

/// Scrape recent videos from institutional portals, store them, and submit
/// new ones for analysis.
///
/// # Examples
///
/// ```sh
/// # Every source, then the submitter
/// video_ingest --analysis-url https://api.example/analysis --api-token TOKEN
///
/// # Two sources only, no submission
/// video_ingest --source eu-commission --source ecb --skip-submit
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "videos.db")]
    pub database: String,

    /// Sources to ingest (repeatable); all when omitted
    #[arg(short, long = "source", value_enum)]
    pub sources: Vec<SourceName>,

    /// Videos processed per source
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Videos submitted for analysis per run
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Optional path to a YAML settings file
    #[arg(short, long, env = "INGEST_CONFIG")]
    pub config: Option<String>,

    /// Analysis service submission endpoint
    #[arg(long, env = "ANALYSIS_URL")]
    pub analysis_url: Option<String>,

    /// Bearer token for the analysis service
    #[arg(long, env = "API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Analysis workspace header value
    #[arg(long, env = "ANALYSIS_WORKSPACE")]
    pub workspace: Option<String>,

    /// NATO Multimedia login email
    #[arg(long, env = "NATO_EMAIL")]
    pub nato_email: Option<String>,

    /// NATO Multimedia login password
    #[arg(long, env = "NATO_PASSWORD", hide_env_values = true)]
    pub nato_password: Option<String>,

    /// Only submit already stored videos
    #[arg(long)]
    pub skip_ingest: bool,

    /// Only ingest; do not contact the analysis service
    #[arg(long)]
    pub skip_submit: bool,

    /// Drive sources with headless Chromium instead of plain HTTP
    #[cfg(feature = "browser")]
    #[arg(long, env = "INGEST_BROWSER")]
    pub browser: bool,
}

impl Cli {
    /// Selected sources, defaulting to the full roster.
    pub fn selected_sources(&self) -> Vec<SourceName> {
        if self.sources.is_empty() {
            SourceName::all()
        } else {
            let mut unique = Vec::with_capacity(self.sources.len());
            for source in &self.sources {
                if !unique.contains(source) {
                    unique.push(*source);
                }
            }
            unique
        }
    }

    /// Apply command-line overrides to `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(limit) = self.limit {
            settings.limit = limit;
        }
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
        if let Some(workspace) = &self.workspace {
            settings.analysis.workspace = workspace.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["video_ingest", "--database", "/tmp/v.db"]);

        assert_eq!(cli.database, "/tmp/v.db");
        assert!(cli.sources.is_empty());
        assert_eq!(cli.selected_sources().len(), 6);
        assert!(!cli.skip_ingest);
        assert!(!cli.skip_submit);
    }

    #[cfg(feature = "browser")]
    #[test]
    fn test_cli_browser_flag() {
        let cli = Cli::parse_from(["video_ingest", "--browser", "-s", "eu-parliament"]);
        assert!(cli.browser);
    }

    #[test]
    fn test_cli_repeated_sources() {
        let cli = Cli::parse_from([
            "video_ingest",
            "--source",
            "eu-commission",
            "-s",
            "council-of-europe",
            "--source",
            "eu-commission",
        ]);

        assert_eq!(
            cli.selected_sources(),
            vec![SourceName::EuCommission, SourceName::CouncilOfEurope]
        );
    }

    #[test]
    fn test_cli_rejects_unknown_source() {
        assert!(Cli::try_parse_from(["video_ingest", "--source", "cnn"]).is_err());
    }

    #[test]
    fn test_cli_overrides_settings() {
        let cli = Cli::parse_from([
            "video_ingest",
            "-l",
            "10",
            "--batch-size",
            "2",
            "--workspace",
            "prod-fr",
            "--skip-submit",
        ]);
        let mut settings = Settings::default();
        cli.apply(&mut settings);

        assert_eq!(settings.limit, 10);
        assert_eq!(settings.batch_size, 2);
        assert_eq!(settings.analysis.workspace, "prod-fr");
        assert_eq!(settings.retry.max_attempts, 3);
        assert!(cli.skip_submit);
    }
}
