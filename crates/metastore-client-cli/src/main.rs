//! Metastore client CLI
//!
//! Opens a connection with the same configuration file a service would use,
//! then pings the server, pages the event feed, mints a delegation token or
//! checks the configuration without connecting.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use metastore_client_core::auth::token::{InMemoryTokenStore, TokenStore};
use metastore_client_core::config::{LoggingConfig, MetaVar};
use metastore_client_core::metrics::ClientMetrics;
use metastore_client_core::notification::NotificationFilter;
use metastore_client_core::{
    ClientConfig, EndpointResolver, HookRegistry, MetastoreClient, MetastoreConnector,
    NotificationEvent, NotificationEventRequest,
};

/// Check and exercise a metastore through the client connector.
#[derive(Parser)]
#[command(name = "metastore-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "metastore.yaml")]
    config: PathBuf,

    /// Override the configured URIs (comma-separated).
    #[arg(long)]
    uris: Option<String>,

    /// File of `signature:token` lines to preload into the token store.
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Print the client metrics in Prometheus text format on exit.
    #[arg(long)]
    metrics: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and print the current notification event id.
    Ping,

    /// Page the notification event feed.
    Events {
        /// Cursor: events after this id are returned.
        #[arg(long, default_value_t = 0)]
        from: i64,

        /// Maximum number of events per page.
        #[arg(long)]
        max: Option<i32>,

        /// Tolerate gaps in the event ids instead of failing.
        #[arg(long)]
        allow_gaps: bool,

        /// Only print events of this type. May be repeated.
        #[arg(long = "event-type")]
        event_types: Vec<String>,

        /// Ask the server to leave out events of this type. May be repeated.
        #[arg(long = "skip-type")]
        skip_types: Vec<String>,

        /// Restrict the feed to one database.
        #[arg(long)]
        db: Option<String>,
    },

    /// Mint a delegation token.
    Token {
        /// User the token is issued for.
        #[arg(long)]
        owner: String,

        /// User allowed to renew the token.
        #[arg(long)]
        renewer: String,
    },

    /// Validate the configuration and print the resolved endpoints.
    CheckConfig,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ClientConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(uris) = &args.uris {
        config.uris = uris.clone();
    }

    let log_config = match args.verbose {
        0 => config.logging.clone(),
        1 => LoggingConfig {
            level: "debug".to_string(),
            ..config.logging.clone()
        },
        _ => LoggingConfig {
            level: "trace".to_string(),
            ..config.logging.clone()
        },
    };
    setup_tracing(&log_config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        uris = %config.uris,
        sasl = config.use_sasl,
        tls = config.tls.enabled,
        "starting metastore client"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(args, config))
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn run(args: Args, config: ClientConfig) -> anyhow::Result<()> {
    if matches!(args.command, Command::CheckConfig) {
        return check_config(&config).await;
    }

    let metrics = Arc::new(ClientMetrics::new());
    let mut builder = MetastoreClient::builder(config).metrics(Arc::clone(&metrics));
    if let Some(path) = &args.token_file {
        let store: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::from_file(path)?);
        builder = builder.token_store(store);
    }
    let mut client = builder.connect().await.context("connecting to the metastore")?;
    if let Some(endpoint) = client.connected_endpoint() {
        info!(endpoint = %endpoint, "connected");
    }

    let result = match args.command {
        Command::Ping => ping(&mut client).await,
        Command::Events {
            from,
            max,
            allow_gaps,
            event_types,
            skip_types,
            db,
        } => {
            let request = NotificationEventRequest {
                event_type_skip_list: skip_types,
                db_name: db,
                ..NotificationEventRequest::new(from, max)
            };
            events(&mut client, &request, allow_gaps, event_types).await
        }
        Command::Token { owner, renewer } => token(&mut client, &owner, &renewer).await,
        Command::CheckConfig => Ok(()),
    };

    client.close().await;
    if args.metrics {
        print!("{}", metrics.encode()?);
    }
    result
}

async fn ping(client: &mut MetastoreClient) -> anyhow::Result<()> {
    let event_id = client.get_current_notification_event_id().await?;
    println!("current event id: {event_id}");
    Ok(())
}

async fn events(
    client: &mut MetastoreClient,
    request: &NotificationEventRequest,
    allow_gaps: bool,
    event_types: Vec<String>,
) -> anyhow::Result<()> {
    let wanted = !event_types.is_empty();
    let by_type = move |event: &NotificationEvent| {
        event_types.iter().any(|t| t.eq_ignore_ascii_case(&event.event_type))
    };
    let by_type: &NotificationFilter = &by_type;
    let filter = wanted.then_some(by_type);

    let batch = client
        .get_next_notification(request, allow_gaps, filter)
        .await?;
    for event in &batch.events {
        println!(
            "{}\t{}\t{}\t{}.{}",
            event.event_id,
            event.event_time,
            event.event_type,
            event.db_name.as_deref().unwrap_or("-"),
            event.table_name.as_deref().unwrap_or("-"),
        );
    }
    println!("last event id: {}", batch.last_event_id);
    Ok(())
}

async fn token(client: &mut MetastoreClient, owner: &str, renewer: &str) -> anyhow::Result<()> {
    match client.get_delegation_token(owner, renewer).await? {
        Some(token) => println!("{token}"),
        None => anyhow::bail!("the metastore did not issue a token"),
    }
    Ok(())
}

async fn check_config(config: &ClientConfig) -> anyhow::Result<()> {
    config.validate()?;
    let hooks = HookRegistry::default();
    hooks.load_filter(config)?;

    for var in MetaVar::ALL {
        let value = config.get_as_string(var);
        if var.is_secret() && !value.is_empty() {
            println!("{} = <redacted>", var.key());
        } else {
            println!("{} = {value}", var.key());
        }
    }
    if config.is_embedded() {
        println!("no URIs configured: embedded mode only");
        return Ok(());
    }

    let resolver =
        EndpointResolver::new(config.uri_selection).with_hook(hooks.load_uri_resolver(config));
    let endpoints = resolver.resolve(&config.uri_list()).await?;
    for (i, endpoint) in endpoints.iter().enumerate() {
        println!("endpoint {i}: {endpoint}");
    }
    Ok(())
}
