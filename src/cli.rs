use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Stage-scoped deployment runs of a declarative infrastructure engine", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stage to operate on
    #[arg(short, long, global = true, env = "STAGEHAND_STAGE", default_value = "dev")]
    pub stage: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy the app to the stage
    Deploy(DeployArgs),

    /// Tear down everything the stage manages
    Destroy,

    /// Reconcile state with the live provider attributes
    Refresh,

    /// Adopt an existing resource into the stage's state
    Import(ImportArgs),

    /// Force-release the stage lock after a crashed run
    Cancel,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct DeployArgs {
    /// Dev mode - skip program minification and track source files
    #[arg(long)]
    pub dev: bool,
}

#[derive(Parser)]
pub struct ImportArgs {
    /// Resource type token, e.g. aws:s3:Bucket
    #[arg(value_name = "TYPE")]
    pub ty: String,

    /// Logical name the resource will be addressed by
    pub name: String,

    /// Provider-assigned identifier of the live resource
    pub id: String,

    /// Parent resource as <type>::<name>
    #[arg(short, long)]
    pub parent: Option<String>,
}
