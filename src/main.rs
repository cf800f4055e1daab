mod analysis;
mod cache;
mod completion;
mod config;
mod github;
mod prompt;
mod report;
mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

/// wikinalysis: turns a GitHub repository into an LLM-written markdown wiki
/// and answers follow-up questions about it.
#[derive(Parser, Debug)]
#[command(name = "wikinalysis", version, about)]
struct Cli {
    /// Config file (default: ./.wikinalysis.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (/api/analyze, /api/chat, /health)
    Serve {
        /// Listen address, overriding [server].bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Generate the wiki for one repository and print or save it
    Analyze {
        /// owner/repo or https://github.com/owner/repo
        url: String,

        /// GitHub token for this run (default: config or GITHUB_TOKEN)
        #[arg(long)]
        github_token: Option<String>,

        /// Optional output file path for the markdown wiki
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("loading configuration");
    let mut config = config::Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            server::run(&config).await?;
        }
        Command::Analyze {
            url,
            github_token,
            output,
        } => {
            let span = info_span!("wiki_analyze", url = %url);
            async {
                let analyzer = analysis::Analyzer::from_config(&config)?;

                info!("running analysis");
                let result = analyzer.analyze(&url, github_token).await?;
                info!(files = result.file_tree.len(), "analysis complete");

                report::output(&result, output.as_deref())?;
                info!("done");
                Ok::<(), Box<dyn std::error::Error>>(())
            }
            .instrument(span)
            .await?;
        }
    }

    Ok(())
}
