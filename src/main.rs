use std::process::ExitCode;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use console::style;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod aws_sso;
mod config;
mod credentials;
mod error;
mod login;
mod service;
mod token_cache;
mod ui;

use aws_sso::SsoFactory;
use config::AwsPaths;
use login::AwsCliLogin;
use service::{CredentialService, Outcome};
use ui::{ConsoleLogger, DialoguerPrompter, ProfilePrompter};

#[derive(Parser)]
#[command(name = "aws-tool", author, version, about, long_about = None)]
struct Args {
    #[arg(short = 'v', long, global = true, action = ArgAction::Count, help = "Increase verbosity (-v info, -vv debug, -vvv trace)")]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch role credentials for an SSO profile into ~/.aws/credentials
    GetRoleCredential {
        #[arg(long, help = "Setting the profile")]
        profile: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::GetRoleCredential { profile } => {
            let paths = AwsPaths::from_env()?;
            let service = CredentialService::new(
                &paths,
                AwsCliLogin::new(ConsoleLogger),
                SsoFactory,
                ConsoleLogger,
            );

            let profile = match profile {
                Some(profile) => profile,
                None => {
                    let names = service.load_config()?.profile_names();
                    DialoguerPrompter.choose(&names)?
                }
            };
            println!("\nUsing config by profile => {}\n", style(&profile).green());

            match service.start(Some(&profile), Utc::now()).await? {
                Outcome::Reused { expiration } | Outcome::Refreshed { expiration } => {
                    tracing::info!(%profile, %expiration, "credentials ready")
                }
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // RUST_LOG wins over -v
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(verbose >= 2)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}
