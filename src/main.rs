#[cfg(not(target_arch = "wasm32"))]
mod cmd;
#[cfg(not(target_arch = "wasm32"))]
mod progress;

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use clap::{Parser, Subcommand};
    use std::path::PathBuf;
    use std::process;
    use tracing_subscriber::EnvFilter;

    use browser_llm::{Config, ParaphraseStyle};

    use crate::cmd;

    #[derive(Parser)]
    #[command(name = "browser-llm")]
    #[command(version)]
    #[command(about = "Drive the browser LLM session model from the terminal", long_about = None)]
    struct Cli {
        /// YAML config file (defaults to the user config dir)
        #[arg(short, long, global = true)]
        config: Option<PathBuf>,

        #[arg(short, long, action = clap::ArgAction::Count, global = true)]
        verbose: u8,

        #[command(subcommand)]
        command: Commands,
    }

    #[derive(Subcommand)]
    enum Commands {
        /// Run a session against the scripted worker
        Simulate {
            prompts: Vec<String>,
            #[arg(long)]
            paraphrase: Option<String>,
            #[arg(long, default_value = "standard")]
            style: String,
            /// Fail the capability probe
            #[arg(long)]
            unsupported: bool,
            /// No pacing between tokens
            #[arg(long)]
            fast: bool,
        },
        /// Feed a JSON-lines event log through a session
        Replay {
            file: PathBuf,
            /// Print commands the session would post
            #[arg(long)]
            commands: bool,
        },
        /// Show the prompt a paraphrase request renders to
        Prompt {
            text: String,
            #[arg(long, default_value = "standard")]
            style: String,
        },
        Version,
    }

    fn init_logging(verbose: u8) {
        let filter = std::env::var("BROWSER_LLM_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| {
                EnvFilter::new(match verbose {
                    0 => "warn",
                    1 => "debug",
                    _ => "trace",
                })
            });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    async fn execute(cli: Cli) -> anyhow::Result<()> {
        let mut config = Config::load(cli.config.as_deref())?;

        match cli.command {
            Commands::Simulate {
                prompts,
                paraphrase,
                style,
                unsupported,
                fast,
            } => {
                if fast {
                    config.token_interval_ms = 0;
                }
                let style: ParaphraseStyle = style.parse()?;
                cmd::simulate(config, prompts, paraphrase.map(|text| (text, style)), unsupported).await
            }
            Commands::Replay { file, commands } => cmd::replay(config, &file, commands),
            Commands::Prompt { text, style } => cmd::prompt(&text, style.parse()?),
            Commands::Version => cmd::version(),
        }
    }

    #[tokio::main]
    pub async fn main() {
        let cli = Cli::parse();
        init_logging(cli.verbose);

        if let Err(e) = execute(cli).await {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    cli::main();
}

#[cfg(target_arch = "wasm32")]
fn main() {}
