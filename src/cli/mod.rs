use clap::{Parser, Subcommand};

pub mod config;
pub mod run;

#[derive(Parser)]
#[command(name = "vestibule")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Introduction gatekeeper bot for community chats", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot service
    Run {
        /// Path to config file (default: <data dir>/vestibule/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Bot token; overrides VESTIBULE_BOT_TOKEN and the config file
        #[arg(long)]
        token: Option<String>,

        /// Path to the SQLite database (overrides the config file)
        #[arg(long)]
        database: Option<String>,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            config,
            token,
            database,
        } => run::execute(config, token, database).await,
        Commands::Version => {
            println!("vestibule {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
