mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use devspace_common::config::DEFAULT_SERVER_URL;

#[derive(Parser)]
#[command(name = "devspace-cli")]
#[command(about = "Devspace CLI - Run workspace files remotely and manage language settings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local source file to a user's workspace and run it
    Run {
        /// Local source file
        file: String,

        /// User whose workspace receives the file
        #[arg(short, long)]
        user: String,

        /// Language (inferred from the file extension if omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// Path inside the workspace (defaults to the file name)
        #[arg(short, long)]
        remote_path: Option<String>,

        /// File whose contents become the program's stdin
        #[arg(short, long)]
        input: Option<String>,

        /// WebSocket endpoint of the server
        #[arg(short, long, default_value = DEFAULT_SERVER_URL)]
        server: String,
    },

    /// Write the default config/languages.json
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,

        /// Overwrite an existing languages.json
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// List supported languages and their images
    Languages {
        /// languages.json to read (built-in defaults if absent)
        #[arg(short, long, default_value = devspace_common::config::DEFAULT_LANGUAGES_CONFIG)]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            user,
            language,
            remote_path,
            input,
            server,
        } => {
            let exit_code = commands::run_file(&commands::RunOptions {
                file: &file,
                user: &user,
                language: language.as_deref(),
                remote_path: remote_path.as_deref(),
                input: input.as_deref(),
                server: &server,
            })
            .await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
        Commands::Init { path, force } => {
            commands::init_project(&path, force)?;
        }
        Commands::Languages { config } => {
            commands::list_languages(&config)?;
        }
    }

    Ok(())
}
