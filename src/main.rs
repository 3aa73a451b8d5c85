use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use list_access::access::{AccessEvaluator, EvaluatorConfig};
use list_access::config::AppConfig;
use list_access::schema::Schema;
use list_access::store::{ItemStore, MemoryStore, SqliteStore};
use list_access::{create_app, demo, AppState, Executor};

#[derive(Parser, Debug)]
#[command(author, version, about = "access-controlled list API", long_about = None)]
struct Cli {
    /// Port to listen on, overriding APP_PORT
    #[arg(long)]
    port: Option<u16>,
    /// SQLite URL, overriding DATABASE_URL
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API (default)
    Serve,
    /// Print a bearer token for a session, for local testing
    Token {
        /// Session id
        id: String,
        /// Extra session data as a JSON object, e.g. '{"isAdmin": true}'
        #[arg(long, default_value = "{}")]
        data: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Token { id, data } => {
            let data: serde_json::Value = serde_json::from_str(&data).context("--data must be valid JSON")?;
            println!("{}", config.jwt.encode(&id, data)?);
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    init_tracing();

    let schema = Schema::new(demo::lists()).context("invalid list configuration")?;
    for list in schema.lists() {
        tracing::info!(list_key = %list.key(), fields = list.fields().len(), "list loaded");
    }

    let store: Arc<dyn ItemStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("using sqlite store");
            Arc::new(SqliteStore::connect(url).await.context("failed to connect to database")?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, items are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let evaluator = AccessEvaluator::new(EvaluatorConfig::default().with_rule_timeout(config.rule_timeout));
    let executor = Executor::new(Arc::new(schema), evaluator, store);
    let app = create_app(AppState::new(executor, config.jwt));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
