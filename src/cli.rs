use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "docvec",
    about = "Chunk, embed and search your documents locally"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Embedding backend: hash or ollama
    #[arg(long, global = true)]
    pub embedder: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index files or directories
    Ingest(IngestArgs),
    /// Find the chunks nearest to a query
    Search(SearchArgs),
    /// Delete a document and make its chunks unsearchable
    Delete(DeleteArgs),
    /// List indexed documents
    List(ListArgs),
    /// Show one document
    Show(ShowArgs),
    /// Show index statistics
    Status(StatusArgs),
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Permanently erase the records of deleted documents
    ///
    /// Deleted documents normally stay listed (`list --all`) with their id,
    /// filename and deletion time. Pruning removes that history for good;
    /// chunk ids are still never reused.
    Prune,
    /// Remove the index, keeping settings
    Reset(ResetArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Files or directories to index
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Only pick up files matching this glob inside directories
    /// (repeatable; replaces the default .md/.txt/.pdf filter)
    #[arg(long = "include", value_name = "GLOB")]
    pub include: Vec<String>,

    /// Output a JSON report
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Documents --

#[derive(Debug, Parser)]
pub struct DeleteArgs {
    /// Document id or unique id prefix
    pub document: String,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Include deleted documents
    #[arg(long)]
    pub all: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Document id or unique id prefix
    pub document: String,

    /// Print the document's chunks
    #[arg(long)]
    pub chunks: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every setting and its effective value
    List,
    /// Show the effective value of one setting
    Get {
        key: String,
    },
    /// Persist a setting in config.redb
    Set {
        key: String,
        value: String,
    },
    /// Remove a persisted setting (revert to default)
    Unset {
        key: String,
    },
}

// -- Reset --

#[derive(Debug, Parser)]
pub struct ResetArgs {
    /// Do not copy the current index into backup/ first
    #[arg(long)]
    pub no_backup: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docvec",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["docvec", "search", "hello"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "hello");
                assert_eq!(args.count, 10);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_ingest_with_globals() {
        let cli = Cli::parse_from([
            "docvec",
            "ingest",
            "notes",
            "a.txt",
            "--include",
            "*.rst",
            "--embedder",
            "ollama",
            "-vv",
        ]);
        assert_eq!(cli.embedder.as_deref(), Some("ollama"));
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Ingest(args) => {
                assert_eq!(args.paths.len(), 2);
                assert_eq!(args.include, ["*.rst"]);
            }
            _ => panic!("expected ingest command"),
        }
    }

    #[test]
    fn ingest_requires_a_path() {
        assert!(Cli::try_parse_from(["docvec", "ingest"]).is_err());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["docvec", "-q", "-v", "status"]).is_err());
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
