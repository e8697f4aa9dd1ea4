//! CLI struct definitions for the todoport command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "todoport",
    version = env!("CARGO_PKG_VERSION"),
    about = "Move a TodoApp dataset into a namespaced schema and rewrite source references to match."
)]
pub(crate) struct Cli {
    /// Config file (defaults to ./todoport.toml when present).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Migrate legacy rows into the destination schema
    #[clap(name = "migrate", visible_alias = "m")]
    Migrate(MigrateCli),

    /// Compare the migration plan with the destination schema
    #[clap(name = "verify")]
    Verify(VerifyCli),

    /// Show the migration plan, its digest and ordering warnings
    #[clap(name = "plan")]
    Plan(FormatCli),

    /// List enum domains and their mapping rules
    #[clap(name = "catalog")]
    Catalog(FormatCli),

    /// Map a single legacy value through an enum domain
    #[clap(name = "map")]
    Map {
        #[clap(long)]
        domain: String,
        #[clap(long)]
        value: String,
    },

    /// Rewrite data-access table references in application source
    #[clap(name = "rewrite", visible_alias = "r")]
    Rewrite(RewriteCli),

    /// Print subsystem schemas as JSON
    #[clap(name = "schema")]
    Schema,

    /// Show version information
    #[clap(name = "version")]
    Version,
}

#[derive(clap::Args, Debug)]
pub(crate) struct FormatCli {
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct MigrateCli {
    /// Legacy database file. Attached to the destination as the source namespace.
    #[clap(long)]
    pub source: Option<PathBuf>,
    /// Destination database file.
    #[clap(long)]
    pub dest: Option<PathBuf>,
    /// Namespace the source is attached under (default: 'legacy').
    #[clap(long)]
    pub source_namespace: Option<String>,
    /// Run every table and report, then roll back all writes.
    #[clap(long)]
    pub dry_run: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
    /// Also write the JSON report to this file.
    #[clap(long)]
    pub report_out: Option<PathBuf>,
    /// Journal file (default: .todoport/events.jsonl).
    #[clap(long)]
    pub journal: Option<PathBuf>,
    /// Do not append to the journal.
    #[clap(long)]
    pub no_journal: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct VerifyCli {
    /// Destination database file.
    #[clap(long)]
    pub dest: Option<PathBuf>,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RewriteCli {
    /// Source tree to scan (defaults to the current directory).
    #[clap(long)]
    pub root: Option<PathBuf>,
    /// Namespace prefix, including any separator (default: 'TODOAAPP.').
    #[clap(long)]
    pub prefix: Option<String>,
    /// Table name to rewrite. Repeatable; defaults to the plan's tables.
    #[clap(long = "table")]
    pub tables: Vec<String>,
    /// Call name treated as data access. Repeatable; defaults to from/access/table.
    #[clap(long = "accessor")]
    pub accessors: Vec<String>,
    /// Report what would change without writing files.
    #[clap(long)]
    pub dry_run: bool,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
    /// Journal file (default: .todoport/events.jsonl).
    #[clap(long)]
    pub journal: Option<PathBuf>,
    /// Do not append to the journal.
    #[clap(long)]
    pub no_journal: bool,
}
