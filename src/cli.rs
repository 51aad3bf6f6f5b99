use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

#[derive(Debug, Parser)]
#[command(version)]
#[command(about = "Validate and compile a provenance-checked wire-format specification document")]
pub struct Cli {
    /// Verbosity:
    /// -v -> Debug
    /// -vv -> Trace
    /// -q -> Warn
    /// -qq -> Error
    /// -qqq -> Off
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct DocumentArg {
    /// Path to the specification document
    #[arg(short, long, default_value = "spec.yaml")]
    pub document: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct SnapshotArg {
    /// Pinned source checkout the citations are verified against
    #[arg(short, long, default_value = "snapshot")]
    pub snapshot: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct OutDirArg {
    /// Directory holding the generated artifacts and manifest
    #[arg(short, long, default_value = "generated")]
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct LintArgs {
    /// External structural-lint command; skipped when absent
    #[arg(long, requires = "ruleset")]
    pub lint_cmd: Option<String>,

    /// Ruleset path handed to the lint command
    #[arg(long)]
    pub ruleset: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every validation stage; one error line per finding, non-zero exit on failure
    Validate {
        #[command(flatten)]
        document: DocumentArg,
        #[command(flatten)]
        snapshot: SnapshotArg,
        #[command(flatten)]
        out_dir: OutDirArg,
        #[command(flatten)]
        lint: LintArgs,
    },
    /// Render the artifacts and replace the manifest
    Compile {
        #[command(flatten)]
        document: DocumentArg,
        #[command(flatten)]
        snapshot: SnapshotArg,
        #[command(flatten)]
        out_dir: OutDirArg,
        #[command(flatten)]
        lint: LintArgs,

        /// Re-read cited lines from the snapshot and inline them into the full rendering
        #[arg(long)]
        inline_excerpts: bool,

        /// Skip the validation pass before compiling
        #[arg(long)]
        no_verify: bool,
    },
    /// Fill missing citation line ranges by deterministic resolution
    Fill {
        #[command(flatten)]
        document: DocumentArg,
        #[command(flatten)]
        snapshot: SnapshotArg,

        /// Report the proposed ranges without writing the document
        #[arg(long)]
        dry_run: bool,
    },
}
