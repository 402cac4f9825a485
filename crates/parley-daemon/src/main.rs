//! # parleyd
//!
//! Parley relay binary: loads settings, wires the collaborators, and runs
//! the hub, bridge, and HTTP/WebSocket listener until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use parley_auth::JwtValidator;
use parley_core::UserId;
use parley_core::collab::PubSubTransport;
use parley_core::logging::init_subscriber;
use parley_server::bridge::{Bridge, MemoryPubSub, RedisPubSub};
use parley_server::shutdown::DEFAULT_DRAIN_TIMEOUT;
use parley_server::{Hub, ParleyServer, ServerConfig, Services};
use parley_settings::{
    AuthSettings, ParleySettings, TransportKind, load_settings_from_path, resolve_data_path,
    settings_path,
};
use parley_store::{Database, SqliteChatStore};

/// Parley real-time chat relay.
#[derive(Parser, Debug)]
#[command(name = "parleyd", about = "Parley real-time chat relay", version)]
struct Cli {
    /// Settings file (defaults to `~/.parley/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (the default).
    Serve(ServeArgs),
    /// Print a bearer token for a user.
    MintToken(MintTokenArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// `SQLite` database path (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MintTokenArgs {
    /// User id to put in the token subject.
    #[arg(long)]
    user: String,

    /// Optional email claim.
    #[arg(long)]
    email: Option<String>,

    /// Lifetime in seconds (defaults to `auth.tokenTtlSecs`).
    #[arg(long)]
    ttl_secs: Option<u64>,
}

fn load(path: Option<&Path>) -> Result<ParleySettings> {
    let path = path.map_or_else(settings_path, Path::to_path_buf);
    load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))
}

fn apply_serve_args(settings: &mut ParleySettings, args: ServeArgs) {
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(path) = args.db_path {
        settings.store.db_path = path.to_string_lossy().into_owned();
    }
}

async fn connect_transport(settings: &ParleySettings) -> Result<Arc<dyn PubSubTransport>> {
    Ok(match settings.bridge.transport {
        TransportKind::Memory => {
            info!("using in-process transport; cross-instance delivery disabled");
            Arc::new(MemoryPubSub::new(settings.bridge.memory_buffer))
        }
        TransportKind::Redis => Arc::new(
            RedisPubSub::connect(&settings.bridge.redis_url)
                .await
                .context("failed to connect to redis")?,
        ),
    })
}

async fn serve(mut settings: ParleySettings, args: ServeArgs) -> Result<()> {
    apply_serve_args(&mut settings, args);
    if settings.auth.jwt_secret == AuthSettings::default().jwt_secret {
        warn!("auth.jwtSecret is the built-in default; set PARLEY_JWT_SECRET in production");
    }

    let metrics = parley_server::metrics::install_recorder();

    let db_path = resolve_data_path(&settings.store.db_path);
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let store = Arc::new(SqliteChatStore::new(db));
    let transport = connect_transport(&settings).await?;

    let config = ServerConfig::from_settings(&settings);
    let (hub, hub_task) = Hub::spawn(
        config.mailbox_capacity,
        store.clone(),
        transport.clone(),
        config.membership_fallback,
    );
    let services = Services {
        auth: Arc::new(JwtValidator::new(&settings.auth.jwt_secret)),
        store: store.clone(),
        membership: store.clone(),
        identity: store,
        transport: transport.clone(),
    };
    let server = ParleyServer::new(config, hub.clone(), services).with_metrics(metrics);

    let bridge = Bridge::new(transport, hub)
        .start(server.shutdown().token())
        .await
        .context("failed to subscribe to the transport")?;
    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    info!("parley listening on http://{addr} (ws://{addr}/ws)");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    let report = server
        .shutdown()
        .drain(vec![handle, bridge, hub_task], DEFAULT_DRAIN_TIMEOUT)
        .await;
    info!(
        finished = report.finished,
        failed = report.failed,
        abandoned = report.abandoned,
        "shutdown complete"
    );
    Ok(())
}

fn mint_token(settings: &ParleySettings, args: &MintTokenArgs) -> Result<String> {
    let ttl = Duration::from_secs(args.ttl_secs.unwrap_or(settings.auth.token_ttl_secs));
    JwtValidator::new(&settings.auth.jwt_secret)
        .issue(&UserId::from(args.user.as_str()), args.email.as_deref(), ttl)
        .context("failed to mint token")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(cli.config.as_deref())?;
    init_subscriber(&settings.logging.level, settings.logging.json);

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => serve(settings, args).await,
        Command::MintToken(args) => {
            println!("{}", mint_token(&settings, &args)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::collab::AuthValidator;

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::parse_from(["parleyd"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn cli_serve_overrides() {
        let cli = Cli::parse_from([
            "parleyd", "serve", "--host", "0.0.0.0", "--port", "9000", "--db-path", "/tmp/p.db",
        ]);
        let Some(Command::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        let mut settings = ParleySettings::default();
        apply_serve_args(&mut settings, args);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.store.db_path, "/tmp/p.db");
    }

    #[test]
    fn cli_global_config_after_subcommand() {
        let cli = Cli::parse_from(["parleyd", "serve", "--config", "/etc/parley.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/parley.json")));
    }

    #[test]
    fn cli_mint_token_requires_user() {
        assert!(Cli::try_parse_from(["parleyd", "mint-token"]).is_err());
        let cli = Cli::parse_from(["parleyd", "mint-token", "--user", "u1", "--ttl-secs", "30"]);
        let Some(Command::MintToken(args)) = cli.command else {
            panic!("expected mint-token");
        };
        assert_eq!(args.user, "u1");
        assert_eq!(args.ttl_secs, Some(30));
        assert_eq!(args.email, None);
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"port":7001}}"#).unwrap();
        let settings = load(Some(&path)).unwrap();
        assert_eq!(settings.server.port, 7001);
    }

    #[test]
    fn load_reports_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{").unwrap();
        let err = load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("failed to load settings"));
    }

    #[tokio::test]
    async fn minted_token_validates() {
        let settings = ParleySettings::default();
        let args = MintTokenArgs {
            user: "u_7".into(),
            email: Some("u7@example.com".into()),
            ttl_secs: Some(60),
        };
        let token = mint_token(&settings, &args).unwrap();
        let user = JwtValidator::new(&settings.auth.jwt_secret)
            .validate(&token)
            .await
            .unwrap();
        assert_eq!(user, UserId::from("u_7"));
    }

    #[test]
    fn mint_token_rejects_empty_user() {
        let args = MintTokenArgs {
            user: String::new(),
            email: None,
            ttl_secs: None,
        };
        assert!(mint_token(&ParleySettings::default(), &args).is_err());
    }

    #[tokio::test]
    async fn memory_transport_by_default() {
        let transport = connect_transport(&ParleySettings::default()).await.unwrap();
        transport.publish("group:1", "{}").await.unwrap();
    }
}
