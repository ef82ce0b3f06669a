//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: drive a run through the whole pipeline
//! - status / history: inspect recorded runs
//! - cancel: stop a run before its next stage
//! - engage: reply to comments and message likers of a published run
//! - check: report which providers are configured

use clap::{Args, Parser, Subcommand};
use linkflow::domain::SourceDescriptor;
use std::path::PathBuf;

/// Linkflow - LinkedIn content workflow orchestrator
#[derive(Parser, Debug)]
#[command(name = "linkflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Where the source text comes from; exactly one is required
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// Inline text
    #[arg(long)]
    pub text: Option<String>,

    /// Apple Notes note title
    #[arg(long)]
    pub note: Option<String>,

    /// Google Docs URL or document id
    #[arg(long)]
    pub doc: Option<String>,
}

impl SourceArgs {
    pub fn descriptor(&self) -> Option<SourceDescriptor> {
        if let Some(text) = &self.text {
            return Some(SourceDescriptor::PlainText { text: text.clone() });
        }
        if let Some(title) = &self.note {
            return Some(SourceDescriptor::AppleNotes {
                note_title: title.clone(),
            });
        }
        self.doc.as_ref().map(|locator| SourceDescriptor::GoogleDocs {
            locator: locator.clone(),
        })
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read a source, generate a post, draft and publish it
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Idempotency key; rerunning with the same id resumes or replays
        #[arg(long)]
        run_id: Option<String>,

        /// Generate an image for the post
        #[arg(long)]
        image: bool,

        /// Reply to comments once published
        #[arg(long)]
        engage: bool,

        /// Extra context for the generator
        #[arg(long)]
        context: Option<String>,

        /// Use in-process stub providers instead of real services
        #[arg(long)]
        dry_run: bool,
    },

    /// Show a run and its history entries
    Status {
        /// Run ID to check
        id: String,

        /// Show every history entry
        #[arg(short, long)]
        detailed: bool,
    },

    /// List recent runs
    History {
        /// Number of runs to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Cancel a run before its next stage
    Cancel {
        /// Run ID to cancel
        id: String,

        /// Reason recorded in history
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Reply to comments and/or message likers of a published run
    Engage {
        /// Run ID whose post to engage on
        id: String,

        /// Reply to comments
        #[arg(long)]
        replies: bool,

        /// Message likers
        #[arg(long)]
        messages: bool,

        /// Cap on likers messaged
        #[arg(long)]
        max_likers: Option<usize>,

        /// Scan again for new comments/likers
        #[arg(long, default_value_t = 0)]
        round: u32,
    },

    /// Report which credentials and endpoints are configured
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_with_text() {
        let cli = Cli::try_parse_from(["linkflow", "run", "--text", "Launch announcement", "--image"]).unwrap();
        match cli.command {
            Commands::Run {
                source,
                image,
                engage,
                dry_run,
                run_id,
                ..
            } => {
                assert!(image);
                assert!(!engage);
                assert!(!dry_run);
                assert!(run_id.is_none());
                assert_eq!(
                    source.descriptor(),
                    Some(SourceDescriptor::PlainText {
                        text: "Launch announcement".to_string()
                    })
                );
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_run_requires_one_source() {
        assert!(Cli::try_parse_from(["linkflow", "run"]).is_err());
        assert!(Cli::try_parse_from(["linkflow", "run", "--text", "a", "--note", "b"]).is_err());
    }

    #[test]
    fn test_run_with_note_and_id() {
        let cli = Cli::try_parse_from(["linkflow", "run", "--note", "Ideas", "--run-id", "run-7", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Run {
                source,
                run_id,
                dry_run,
                ..
            } => {
                assert_eq!(run_id.as_deref(), Some("run-7"));
                assert!(dry_run);
                assert!(matches!(source.descriptor(), Some(SourceDescriptor::AppleNotes { .. })));
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_history_default_limit() {
        let cli = Cli::try_parse_from(["linkflow", "history"]).unwrap();
        assert!(matches!(cli.command, Commands::History { limit: 20 }));
    }

    #[test]
    fn test_cancel_with_reason() {
        let cli = Cli::try_parse_from(["linkflow", "cancel", "run-1", "-r", "typo"]).unwrap();
        match cli.command {
            Commands::Cancel { id, reason } => {
                assert_eq!(id, "run-1");
                assert_eq!(reason.as_deref(), Some("typo"));
            }
            _ => panic!("Expected cancel command"),
        }
    }

    #[test]
    fn test_engage_flags() {
        let cli = Cli::try_parse_from(["linkflow", "engage", "run-1", "--messages", "--max-likers", "3"]).unwrap();
        match cli.command {
            Commands::Engage {
                replies,
                messages,
                max_likers,
                ..
            } => {
                assert!(!replies);
                assert!(messages);
                assert_eq!(max_likers, Some(3));
            }
            _ => panic!("Expected engage command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["linkflow", "-v", "-c", "/tmp/linkflow.yml", "check"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/linkflow.yml")));
        assert!(matches!(cli.command, Commands::Check));
    }
}
