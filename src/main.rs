use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{debug, info};

use cine_gateway::api::auth::SessionClient;
use cine_gateway::api::movies::{MoviesClient, DEFAULT_PAGE_LIMIT};
use cine_gateway::api::tmdb::TmdbClient;
use cine_gateway::api::watchlist::WatchlistClient;
use cine_gateway::config::GatewayConfig;
use cine_gateway::utils;
use cine_gateway::{Gateway, SessionEvent};

#[derive(Parser)]
#[command(name = "cinectl", version, about = "Movie catalog client")]
struct AppCli {
    /// Config file path
    #[arg(short, long, default_value = "cinectl.json", global = true)]
    config: String,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store tokens
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Create an account (does not sign in)
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget tokens and session state
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Show local session state without contacting the backend
    Status,
    /// List the local catalog
    Movies {
        #[arg(long)]
        q: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: u32,
    },
    /// Show a profile's watchlist
    Watchlist {
        #[arg(long)]
        profile: String,
    },
    /// Popular titles from the movie database
    Popular {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Authenticated GET of any backend path
    Get { path: String },
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(
    command: Commands,
    config: &GatewayConfig,
    gateway: &Gateway,
    session: &SessionClient,
) -> Result<()> {
    match command {
        Commands::Login { email, password } => {
            let user = session.login(&email, &password).await?;
            info!(user_id = %user.id, "signed in");
            print_json(&json!({ "user": user, "profiles": session.profiles() }))?;
        }
        Commands::Register {
            name,
            email,
            password,
        } => {
            session.register(&name, &email, &password).await?;
            println!("account created; run `cinectl login` to sign in");
        }
        Commands::Logout => {
            session.logout();
            println!("signed out");
        }
        Commands::Whoami => {
            let user = session.me().await?;
            print_json(&user)?;
        }
        Commands::Status => {
            let creds = gateway.credentials();
            print_json(&json!({
                "base_url": config.base_url,
                "storage_path": config.storage_path,
                "has_access_token": creds.get_access_token().is_some(),
                "has_refresh_token": creds.get_refresh_token().is_some(),
                "access_token_age_secs": creds.last_rotated().map(|_| creds.age_seconds()),
                "user": session.current_user(),
                "current_profile": session.current_profile(),
            }))?;
        }
        Commands::Movies { q, page, limit } => {
            let movies = MoviesClient::new(gateway.clone());
            print_json(&movies.list(q.as_deref(), page, limit).await?)?;
        }
        Commands::Watchlist { profile } => {
            let watchlist = WatchlistClient::new(gateway.clone());
            let items = watchlist.list(&profile).await?;
            let rows: Vec<Value> = items
                .iter()
                .map(|i| {
                    json!({
                        "id": i.id,
                        "source": i.source.as_str(),
                        "title": i.title,
                        "year": i.year,
                        "rating": i.rating,
                    })
                })
                .collect();
            print_json(&rows)?;
        }
        Commands::Popular { page } => {
            let tmdb = TmdbClient::from_config(gateway.clone(), config);
            print_json(&tmdb.popular(page).await?)?;
        }
        Commands::Get { path } => {
            let value: Value = gateway.get_json(&path).await?;
            print_json(&value)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    utils::logging::init(if args.verbose { "debug" } else { "info" });

    let config = GatewayConfig::load(&args.config)?;
    debug!(base_url = %config.base_url, "configuration loaded");

    let gateway = Gateway::from_config(&config)?;
    let session = SessionClient::new(gateway.clone());
    let mut events = gateway.subscribe();

    let outcome = run(args.command, &config, &gateway, &session).await;

    let mut ended = false;
    while let Ok(event) = events.try_recv() {
        ended |= event == SessionEvent::Ended;
    }
    if ended {
        session.end_session("session ended");
        eprintln!("session ended; run `cinectl login` to sign in again");
    }

    outcome
}
