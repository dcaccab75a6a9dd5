use clap::{Parser, Subcommand};
use tracing::error;

use ticktick_mcp_server::{
    commands,
    configuration::Settings,
    observability::{get_subscriber, init_subscriber},
};

/// TickTick MCP adapter and associated commands
#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// Increase logging verbosity
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Extra configuration file to load
    #[clap(short, long)]
    config_file: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the OAuth2 authorization flow and store the credentials
    Auth,
    /// Verify the stored credentials against the TickTick API
    Check,
    /// Serve the MCP tool surface on stdio
    Serve,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let settings =
        Settings::new_from_file(cli.config_file.clone()).expect("Cannot load configuration");
    let log_directive = match cli.verbose {
        0 => settings.application.log_directive.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    init_subscriber(get_subscriber(&log_directive));

    let result = match &cli.command {
        Commands::Auth => commands::auth::authorize(&settings).await,
        Commands::Check => commands::check::check_connection(&settings).await,
        Commands::Serve => commands::serve::serve(&settings).await,
    };

    if let Err(error) = result {
        error!("ticktick-mcp-server failed: {error:?}");
        std::process::exit(1);
    }
    Ok(())
}
