//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::llm::ProviderKind;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};

/// Bugsmith - turn plain-language problem descriptions into bug reports
///
/// Streams the model's analysis as it is written, then prints a
/// structured report. Also rolls up test status for a list of issues.
///
/// Examples:
///   bugsmith generate "Login fails with 500 error on mobile"
///   bugsmith generate "Cart total is wrong" --attach cart.png --format sse
///   bugsmith rollup QA-101 QA-102 QA-103 --tracker-url https://tracker.example.com
///   bugsmith --provider openai --base-url http://localhost:8000 generate "..."
///   bugsmith --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .bugsmith.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Model to generate with
    #[arg(short, long, env = "BUGSMITH_MODEL", global = true)]
    pub model: Option<String>,

    /// Upstream endpoint base URL
    #[arg(long, value_name = "URL", env = "BUGSMITH_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Upstream wire format
    #[arg(long, value_enum, global = true)]
    pub provider: Option<ProviderKind>,

    /// Temperature for generation (0.0 - 2.0)
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// Overall generation deadline in seconds
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Generate a default .bugsmith.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Generate a bug report from a description
    Generate(GenerateArgs),
    /// Look up test status for issue keys
    Rollup(RollupArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct GenerateArgs {
    /// What went wrong, in your own words
    pub description: String,

    /// Screenshot to attach (png, jpg, gif, webp); repeatable
    #[arg(short, long = "attach", value_name = "FILE")]
    pub attach: Vec<PathBuf>,

    /// JSON file with earlier conversation turns
    #[arg(long, value_name = "FILE")]
    pub history: Option<PathBuf>,

    /// How to print the event stream
    #[arg(long, value_enum, default_value = "text")]
    pub format: GenerateFormat,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RollupArgs {
    /// Issue keys to look up
    #[arg(required = true, value_name = "KEY")]
    pub keys: Vec<String>,

    /// Maximum lookups in flight
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Issue tracker base URL
    #[arg(long, value_name = "URL", env = "BUGSMITH_TRACKER_URL")]
    pub tracker_url: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: RollupFormat,

    /// Re-run the rollup every SECS seconds until interrupted
    #[arg(long, value_name = "SECS")]
    pub watch: Option<u64>,
}

/// Output format for `generate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum GenerateFormat {
    /// Narrative as it streams, then a Markdown preview (default)
    #[default]
    Text,
    /// Server-sent event frames
    Sse,
    /// One JSON event per line
    Json,
    /// Only the finished report, as pretty JSON
    Report,
}

/// Output format for `rollup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RollupFormat {
    /// Markdown table (default)
    #[default]
    Table,
    /// JSON array of rows
    Json,
}

/// MIME type for a supported attachment, by file extension.
pub fn media_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref base_url) = self.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err("Base URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 2.0".to_string());
            }
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        match self.command {
            Some(Command::Generate(ref generate)) => generate.validate(),
            Some(Command::Rollup(ref rollup)) => rollup.validate(),
            None => Err("A sub-command is required (generate or rollup)".to_string()),
        }
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

impl GenerateArgs {
    fn validate(&self) -> Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("Description must not be empty".to_string());
        }

        for path in &self.attach {
            if !path.is_file() {
                return Err(format!("Attachment does not exist: {}", path.display()));
            }
            if media_type_for(path).is_none() {
                return Err(format!(
                    "Unsupported attachment type (expected png, jpg, gif or webp): {}",
                    path.display()
                ));
            }
        }

        if let Some(ref history) = self.history {
            if !history.is_file() {
                return Err(format!("History file does not exist: {}", history.display()));
            }
        }

        Ok(())
    }
}

impl RollupArgs {
    fn validate(&self) -> Result<(), String> {
        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.watch == Some(0) {
            return Err("Watch interval must be at least 1 second".to_string());
        }

        if let Some(key) = self.keys.iter().find(|k| k.trim().is_empty()) {
            return Err(format!("Invalid issue key: {:?}", key));
        }

        if let Some(ref url) = self.tracker_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Tracker URL must start with 'http://' or 'https://'".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_generate() {
        let args = parse(&["bugsmith", "-v", "generate", "Login fails", "--format", "sse"]);
        assert!(args.verbose);
        match args.command {
            Some(Command::Generate(ref generate)) => {
                assert_eq!(generate.description, "Login fails");
                assert_eq!(generate.format, GenerateFormat::Sse);
                assert!(generate.attach.is_empty());
            }
            ref other => panic!("unexpected command: {:?}", other),
        }
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_report_format() {
        let args = parse(&["bugsmith", "generate", "Cart empties", "--format", "report"]);
        match args.command {
            Some(Command::Generate(ref generate)) => {
                assert_eq!(generate.format, GenerateFormat::Report);
            }
            ref other => panic!("unexpected command: {:?}", other),
        }
        let args = parse(&["bugsmith", "generate", "Cart empties"]);
        assert!(matches!(
            args.command,
            Some(Command::Generate(ref generate)) if generate.format == GenerateFormat::Text
        ));
    }

    #[test]
    fn test_parse_rollup() {
        let args = parse(&["bugsmith", "rollup", "QA-1", "QA-2", "--watch", "30"]);
        match args.command {
            Some(Command::Rollup(ref rollup)) => {
                assert_eq!(rollup.keys, vec!["QA-1", "QA-2"]);
                assert_eq!(rollup.watch, Some(30));
                assert_eq!(rollup.concurrency, None);
            }
            ref other => panic!("unexpected command: {:?}", other),
        }
        assert!(Args::try_parse_from(["bugsmith", "rollup"]).is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let args = parse(&["bugsmith", "--verbose", "--quiet", "generate", "x"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(parse(&["bugsmith", "--base-url", "localhost", "generate", "x"])
            .validate()
            .is_err());
        assert!(parse(&["bugsmith", "--timeout", "0", "generate", "x"])
            .validate()
            .is_err());
        assert!(parse(&["bugsmith", "generate", "   "]).validate().is_err());
        assert!(parse(&["bugsmith", "rollup", "--concurrency", "0", "QA-1"])
            .validate()
            .is_err());
        assert!(parse(&["bugsmith", "generate", "x", "--attach", "/no/such/file.png"])
            .validate()
            .is_err());
        assert!(parse(&["bugsmith"]).validate().is_err());
        assert!(parse(&["bugsmith", "--init-config"]).validate().is_ok());
    }

    #[test]
    fn test_media_type_for() {
        assert_eq!(media_type_for(Path::new("shot.PNG")), Some("image/png"));
        assert_eq!(media_type_for(Path::new("a/b.jpeg")), Some("image/jpeg"));
        assert_eq!(media_type_for(Path::new("notes.txt")), None);
        assert_eq!(media_type_for(Path::new("noext")), None);
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&["bugsmith", "generate", "x"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
