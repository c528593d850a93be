use clap::{Parser, Subcommand};

mod commands;
mod offline;

#[derive(Parser)]
#[command(
    name = "topogrid",
    about = "Topogrid — network lab orchestrator",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the node creation dependencies of a topology.
    ///
    /// Builds the dependency graph offline (nothing is deployed) and
    /// exits non-zero when the dependencies contain a cycle.
    Deps {
        /// Topology file
        #[arg(short, long)]
        topo: String,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("topogrid=info".parse()?)
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Deps { topo, format } => commands::deps::deps(&topo, &format),
    }
}
