use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "memodb",
    about = "Content-addressed object store with memoized function results",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store URI (e.g. sqlite:/tmp/example.db); defaults to $MEMODB_STORE.
    #[arg(long, global = true)]
    pub store: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print a value's canonical CBOR bytes
    Get(GetArgs),
    /// Store a value read as CBOR, print its CID
    Put(PutArgs),
    /// Bind a head or call to a value
    Set(SetArgs),
    /// Delete a head binding
    Delete(DeleteArgs),
    /// Drop all cached call results for a function
    Invalidate(InvalidateArgs),
    /// List all heads, one URI per line
    ListHeads,
    /// List functions with cached call results
    ListFuncs,
    /// List cached calls for a function
    ListCalls(ListCallsArgs),
    /// Print the names referencing a value
    RefsTo(RefsToArgs),
    /// Print root names and paths leading to a value
    PathsTo(PathsToArgs),
    /// Bundle the store into an archive file
    Export(ExportArgs),
}

#[derive(Args)]
pub struct GetArgs {
    /// Name URI: /cid/…, /head/…, or /call/…
    pub name: String,
    /// Write output here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Allow binary output on a terminal
    #[arg(short = 'f')]
    pub force: bool,
}

#[derive(Args)]
pub struct PutArgs {
    /// Input URI: "-" for stdin, file:<path>, or a name URI
    #[arg(default_value = "-")]
    pub input: String,
}

#[derive(Args)]
pub struct SetArgs {
    /// Target name URI (/head/… or /call/…)
    pub name: String,
    /// Input URI: "-" for stdin, file:<path>, or a name URI
    #[arg(default_value = "-")]
    pub input: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    /// Head URI (/head/…)
    pub name: String,
}

#[derive(Args)]
pub struct InvalidateArgs {
    pub func: String,
}

#[derive(Args)]
pub struct ListCallsArgs {
    pub func: String,
}

#[derive(Args)]
pub struct RefsToArgs {
    /// Name URI of the target value
    pub name: String,
}

#[derive(Args)]
pub struct PathsToArgs {
    /// Name URI of the target value
    pub name: String,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Path of the archive file to write
    pub path: PathBuf,
}
