mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use cmd::deploy::DeployArgs;
use cmd::params::ParamsSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "stagehand",
    about = "Stage-aware stack deployment: plan, apply, reconcile, validate",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from stagehand.yaml or .git/)
    #[arg(long, global = true, env = "STAGEHAND_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Map changed paths to affected units
    Detect {
        /// Changed paths
        paths: Vec<String>,

        /// Read additional paths from a file, one per line ('-' for stdin)
        #[arg(long)]
        paths_from: Option<PathBuf>,

        /// Select every registered unit
        #[arg(long)]
        all: bool,

        /// Comma-separated unit names, overriding path matching
        #[arg(long)]
        units: Option<String>,
    },

    /// Compute the dependency-ordered execution plan
    Plan {
        #[arg(long)]
        stage: String,

        /// Unit names to plan for
        units: Vec<String>,

        /// Plan every registered unit
        #[arg(long)]
        all: bool,
    },

    /// Run the pipeline: detect, plan, apply, reconcile, validate
    Deploy {
        #[arg(long)]
        stage: String,

        /// Changed paths
        paths: Vec<String>,

        /// Read additional paths from a file, one per line ('-' for stdin)
        #[arg(long)]
        paths_from: Option<PathBuf>,

        /// Deploy every registered unit
        #[arg(long)]
        all: bool,

        /// Comma-separated unit names, overriding path matching
        #[arg(long)]
        units: Option<String>,

        #[arg(long)]
        region: Option<String>,

        /// Concurrent provisioning calls for independent units
        #[arg(long)]
        max_parallelism: Option<usize>,

        /// Print the plan and stop
        #[arg(long)]
        dry_run: bool,

        /// Skip parameter reconciliation after apply
        #[arg(long)]
        skip_reconcile: bool,

        /// Skip table validation after apply
        #[arg(long)]
        skip_validate: bool,
    },

    /// Manage the shared parameter store
    Params {
        #[command(subcommand)]
        subcommand: ParamsSubcommand,
    },

    /// Check that the data layer matches expectations
    Validate {
        #[arg(long)]
        stage: String,

        /// Comma-separated unit names; default checks the whole registry
        #[arg(long)]
        units: Option<String>,

        #[arg(long)]
        region: Option<String>,
    },

    /// Inspect and validate stagehand.yaml
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let root_path = cli.root.as_deref();
    let root = root::resolve_root(root_path);

    let result = match cli.command {
        Commands::Detect {
            paths,
            paths_from,
            all,
            units,
        } => cmd::detect::run(
            &root,
            &paths,
            paths_from.as_deref(),
            all,
            units.as_deref(),
            cli.json,
        ),
        Commands::Plan { stage, units, all } => {
            cmd::plan::run(&root, &stage, &units, all, cli.json)
        }
        Commands::Deploy {
            stage,
            paths,
            paths_from,
            all,
            units,
            region,
            max_parallelism,
            dry_run,
            skip_reconcile,
            skip_validate,
        } => cmd::deploy::run(
            &root,
            DeployArgs {
                stage: &stage,
                paths: &paths,
                paths_from: paths_from.as_deref(),
                all,
                units: units.as_deref(),
                region: region.as_deref(),
                max_parallelism,
                dry_run,
                skip_reconcile,
                skip_validate,
            },
            cli.json,
        ),
        Commands::Params { subcommand } => cmd::params::run(&root, subcommand, cli.json),
        Commands::Validate {
            stage,
            units,
            region,
        } => cmd::validate::run(&root, &stage, units.as_deref(), region.as_deref(), cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
