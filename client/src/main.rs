//! bfstats - player stats, leaderboards and server lists from the FESL and
//! Theater backends

use anyhow::{Context, Result};
use bfstats::config::Config;
use bfstats::output::{self, Format, Outcome, PlayerStats};
use bfstats::protocol::{Namespace, TheaterEndpoint};
use bfstats::{ClientOptions, Credentials, FeslClient, TheaterClient, blocking};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bfstats")]
#[command(version)]
#[command(about = "Query player stats and game servers from the FESL and Theater backends", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "bfstats.toml")]
    config: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Use the blocking client instead of the async one
    #[arg(long)]
    blocking: bool,

    /// Lookup namespace, overriding the configured one
    #[arg(long)]
    namespace: Option<Namespace>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Exact persona lookup by names, or by ids with --ids
    Lookup {
        #[arg(required = true)]
        users: Vec<String>,
        #[arg(long)]
        ids: bool,
    },
    /// Partial name search; `*` is a wildcard
    Search { name: String },
    /// Stats of players given by user id or name
    Stats {
        #[arg(required = true)]
        users: Vec<String>,
        /// Comma separated stat keys; the configured catalog when omitted
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,
    },
    /// Players ranked by one stat
    Leaderboard {
        #[arg(long, default_value = "score")]
        sort_by: String,
        #[arg(long, default_value_t = 1)]
        min: u32,
        #[arg(long, default_value_t = 20)]
        max: u32,
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,
    },
    /// Lobbies of the configured platform
    Lobbies,
    /// Game servers in one lobby
    Servers { lobby_id: u64 },
    /// Settings and players of one game server
    Server { lobby_id: u64, game_id: u64 },
}

impl Command {
    fn uses_theater(&self) -> bool {
        matches!(
            self,
            Self::Lobbies | Self::Servers { .. } | Self::Server { .. }
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!("Loaded configuration from {:?}", args.config);

    let credentials = config.credentials()?;
    let mut options = config.options();
    if let Some(namespace) = args.namespace {
        options.namespace = namespace;
    }
    info!(
        "Using platform {} with namespace {}",
        options.platform, options.namespace
    );

    let outcome = if args.blocking {
        let command = args.command.clone();
        tokio::task::spawn_blocking(move || run_blocking(command, credentials, &options))
            .await
            .context("Blocking client panicked")??
    } else {
        run_async(args.command, credentials, &options).await?
    };

    output::render(&outcome, args.format, std::io::stdout().lock())
}

fn parse_ids(users: &[String]) -> Result<Vec<i64>> {
    users
        .iter()
        .map(|user| {
            user.parse()
                .with_context(|| format!("{user:?} is not a user id"))
        })
        .collect()
}

async fn run_async(
    command: Command,
    credentials: Credentials,
    options: &ClientOptions,
) -> Result<Outcome> {
    let mut fesl = FeslClient::connect(credentials, options).await?;
    let login = fesl.login().await?;
    info!("Logged in as {:?}", login.account.display_name);

    let namespace = fesl.namespace();
    let outcome = match command {
        Command::Lookup { users, ids: true } => {
            let ids = parse_ids(&users)?;
            Outcome::Personas(fesl.lookup_user_ids(&ids, namespace).await?)
        }
        Command::Lookup { users, ids: false } => {
            Outcome::Personas(fesl.lookup_usernames(&users, namespace).await?)
        }
        Command::Search { name } => Outcome::Hits(fesl.search_name(&name, namespace).await?),
        Command::Stats { users, keys } => {
            let mut ids = Vec::with_capacity(users.len());
            for user in &users {
                let id = match user.parse() {
                    Ok(id) => id,
                    Err(_) => fesl.lookup_username(user, namespace).await?.user_id,
                };
                ids.push(id);
            }
            let records = fesl.get_stats_many(&ids, &keys).await?;
            Outcome::Stats(
                ids.into_iter()
                    .zip(records)
                    .map(|(user_id, stats)| PlayerStats { user_id, stats })
                    .collect(),
            )
        }
        Command::Leaderboard {
            sort_by,
            min,
            max,
            keys,
        } => Outcome::Leaderboard(fesl.get_leaderboard(min, max, &sort_by, &keys).await?),
        command => {
            debug_assert!(command.uses_theater());
            let endpoint = fesl.theater_details()?;
            let login_key = fesl.login_key()?;
            let outcome = run_theater_async(command, &endpoint, &login_key, options).await;
            fesl.close().await?;
            return outcome;
        }
    };

    fesl.close().await?;
    Ok(outcome)
}

async fn run_theater_async(
    command: Command,
    endpoint: &TheaterEndpoint,
    login_key: &str,
    options: &ClientOptions,
) -> Result<Outcome> {
    let mut theater = TheaterClient::connect(endpoint, options).await?;
    theater.authenticate(login_key).await?;

    // Servers can only be listed in lobbies seen on this connection
    let lobbies = theater.get_lobbies().await?;
    let outcome = match command {
        Command::Servers { lobby_id } => Outcome::Servers(theater.get_servers(lobby_id).await?),
        Command::Server { lobby_id, game_id } => Outcome::Details(Box::new(
            theater.get_server_details(lobby_id, game_id).await?,
        )),
        _ => Outcome::Lobbies(lobbies),
    };

    theater.close().await?;
    Ok(outcome)
}

fn run_blocking(
    command: Command,
    credentials: Credentials,
    options: &ClientOptions,
) -> Result<Outcome> {
    let mut fesl = blocking::FeslClient::connect(credentials, options)?;
    let login = fesl.login()?;
    info!("Logged in as {:?}", login.account.display_name);

    let namespace = fesl.namespace();
    let outcome = match command {
        Command::Lookup { users, ids: true } => {
            let ids = parse_ids(&users)?;
            Outcome::Personas(fesl.lookup_user_ids(&ids, namespace)?)
        }
        Command::Lookup { users, ids: false } => {
            Outcome::Personas(fesl.lookup_usernames(&users, namespace)?)
        }
        Command::Search { name } => Outcome::Hits(fesl.search_name(&name, namespace)?),
        Command::Stats { users, keys } => {
            let mut rows = Vec::with_capacity(users.len());
            for user in &users {
                let user_id = match user.parse() {
                    Ok(id) => id,
                    Err(_) => fesl.lookup_username(user, namespace)?.user_id,
                };
                let stats = fesl.get_stats(user_id, &keys)?;
                rows.push(PlayerStats { user_id, stats });
            }
            Outcome::Stats(rows)
        }
        Command::Leaderboard {
            sort_by,
            min,
            max,
            keys,
        } => Outcome::Leaderboard(fesl.get_leaderboard(min, max, &sort_by, &keys)?),
        command => {
            let endpoint = fesl.theater_details()?;
            let login_key = fesl.login_key()?;
            let outcome = run_theater_blocking(command, &endpoint, &login_key, options);
            fesl.close()?;
            return outcome;
        }
    };

    fesl.close()?;
    Ok(outcome)
}

fn run_theater_blocking(
    command: Command,
    endpoint: &TheaterEndpoint,
    login_key: &str,
    options: &ClientOptions,
) -> Result<Outcome> {
    let mut theater = blocking::TheaterClient::connect(endpoint, options)?;
    theater.authenticate(login_key)?;

    let lobbies = theater.get_lobbies()?;
    let outcome = match command {
        Command::Servers { lobby_id } => Outcome::Servers(theater.get_servers(lobby_id)?),
        Command::Server { lobby_id, game_id } => {
            Outcome::Details(Box::new(theater.get_server_details(lobby_id, game_id)?))
        }
        _ => Outcome::Lobbies(lobbies),
    };

    theater.close()?;
    Ok(outcome)
}
