//! supported-versions CLI - inspect and enforce signed supported-versions
//! policies for workspace servers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use supported_versions_core::{
    BuiltinSource, ChannelEventSink, EventBindings, InMemoryServerRegistry, InboundEvent, PolicyVerifier,
    ServerRef, StatusReport, SupportedVersionsConfig, SupportedVersionsEngine,
    SupportedVersionsError, SupportedVersionsEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// supported-versions - signed supported-versions policy checks.
///
/// Fetches the policy for a workspace server from the server itself, then
/// the vendor cloud, then the local cache, then the bundled token, and
/// reports whether the server version is still supported.
#[derive(Parser)]
#[command(name = "supported-versions")]
#[command(version = VERSION)]
#[command(about = "Signed supported-versions policy checks for workspace servers")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Persistent policy cache file
    #[arg(long, global = true)]
    cache_file: Option<PathBuf>,

    /// Bundled policy token file, instead of the compiled-in one
    #[arg(long, global = true)]
    builtin: Option<PathBuf>,

    /// Vendor cloud endpoint
    #[arg(long, global = true)]
    cloud: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full policy cascade for one server
    Check {
        /// Server URL
        url: String,

        /// Language for rendered warnings
        #[arg(long, default_value = "en")]
        language: String,
    },

    /// Verify a policy token and print its contents
    Decode {
        /// File holding the compact token
        token: PathBuf,

        /// RSA public key (PEM) instead of the embedded vendor key
        #[arg(long)]
        key: Option<PathBuf>,
    },

    /// Evaluate a server version offline against cached or bundled policy
    Status {
        /// Server URL
        url: String,

        /// Server version to evaluate
        #[arg(long)]
        server_version: String,

        /// Workspace unique id
        #[arg(long)]
        unique_id: Option<String>,

        /// Language for rendered warnings
        #[arg(long, default_value = "en")]
        language: String,

        /// Evaluate as of this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Read inbound events as JSON lines on stdin, print outbound events
    Serve {
        /// Servers to register
        #[arg(long = "server", required = true)]
        servers: Vec<String>,
    },
}

impl Cli {
    fn config(&self) -> SupportedVersionsConfig {
        let mut config = SupportedVersionsConfig {
            timeout: Duration::from_secs(self.timeout),
            cache_file: self.cache_file.clone(),
            ..SupportedVersionsConfig::default()
        };
        if let Some(cloud) = &self.cloud {
            config.cloud_endpoint = cloud.clone();
        }
        if let Some(builtin) = &self.builtin {
            config.builtin = BuiltinSource::File(builtin.clone());
        }
        config
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

fn print_event(event: &SupportedVersionsEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Failed to serialize event: {}", e),
        }
        return;
    }

    match event {
        SupportedVersionsEvent::Loading { .. } => println!("  loading"),
        SupportedVersionsEvent::VersionUpdated { version, .. } => {
            println!("  version:      {}", version)
        },
        SupportedVersionsEvent::UniqueIdUpdated { unique_id, .. } => {
            println!("  unique id:    {}", unique_id)
        },
        SupportedVersionsEvent::SupportedVersionsUpdated {
            supported_versions,
            source,
            cached_origin,
            ..
        } => match cached_origin {
            Some(origin) => println!(
                "  policy:       {} (cached, originally {}, issued {})",
                source, origin, supported_versions.timestamp
            ),
            None => println!(
                "  policy:       {} (issued {})",
                source, supported_versions.timestamp
            ),
        },
        SupportedVersionsEvent::SupportedVersionsError { .. } => {
            println!("  \x1b[33mwarning:\x1b[0m no fresh policy, data may be stale")
        },
    }
}

fn print_report(report: &StatusReport) {
    let status = if report.supported {
        "\x1b[32mSUPPORTED\x1b[0m"
    } else {
        "\x1b[31mUNSUPPORTED\x1b[0m"
    };

    println!("\nRESULT");
    println!("------");
    println!("  server:       {}", report.url);
    println!(
        "  version:      {}",
        report.version.as_deref().unwrap_or("unknown")
    );
    println!("  status:       {}", status);
    if let Some(expiration) = report.expiration {
        println!("  expiration:   {}", expiration.to_rfc3339());
    }
    if let Some(source) = report.source {
        println!("  evaluated on: {} policy", source);
    }
    if let Some(message) = &report.message {
        println!();
        println!("  {}", message.title);
        println!("  {}", message.subtitle);
        println!("  {}", message.description);
        if let Some(link) = &message.link {
            println!("  {}", link);
        }
    }
}

async fn run_check(
    cli: &Cli,
    url: &str,
    language: &str,
    json: bool,
) -> Result<(), SupportedVersionsError> {
    let registry = Arc::new(InMemoryServerRegistry::new());
    registry.insert(ServerRef::new(url));
    let (sink, mut events) = ChannelEventSink::new();

    let engine = SupportedVersionsEngine::new(cli.config(), registry, Arc::new(sink))?;

    if !json {
        println!("\nSUPPORTED VERSIONS CHECK");
        println!("========================\n");
        println!("Server: {}\n", url);
    }

    let outcome = engine.update_supported_versions_data(url).await;
    while let Ok(event) = events.try_recv() {
        print_event(&event, json);
    }

    let report = engine.status_report(url, language, Utc::now()).await;
    match (&report, json) {
        (Some(report), true) => print_json(report),
        (Some(report), false) => {
            print_report(report);
            if !outcome.is_fresh() {
                println!("\n  (evaluated without a fresh policy)");
            }
        },
        (None, _) => {},
    }
    Ok(())
}

async fn run_decode(token: &Path, key: Option<&Path>) -> Result<(), SupportedVersionsError> {
    let verifier = match key {
        Some(path) => {
            let pem = tokio::fs::read(path)
                .await
                .map_err(|e| SupportedVersionsError::Config {
                    message: format!("Failed to read {}: {}", path.display(), e),
                })?;
            PolicyVerifier::from_rsa_pem(&pem)?
        },
        None => PolicyVerifier::embedded()?,
    };

    let raw = tokio::fs::read_to_string(token)
        .await
        .map_err(|e| SupportedVersionsError::Config {
            message: format!("Failed to read {}: {}", token.display(), e),
        })?;

    let doc = verifier.decode(&raw)?;
    print_json(&doc);
    Ok(())
}

async fn run_status(
    cli: &Cli,
    server: ServerRef,
    language: &str,
    at: DateTime<Utc>,
    json: bool,
) -> Result<(), SupportedVersionsError> {
    let url = server.url.clone();
    let registry = Arc::new(InMemoryServerRegistry::new());
    registry.insert(server);
    let (sink, _events) = ChannelEventSink::new();

    let engine = SupportedVersionsEngine::new(cli.config(), registry, Arc::new(sink))?;
    if let Some(report) = engine.status_report(&url, language, at).await {
        if json {
            print_json(&report);
        } else {
            print_report(&report);
        }
    }
    Ok(())
}

async fn run_serve(cli: &Cli, servers: &[String]) -> Result<(), SupportedVersionsError> {
    let registry = Arc::new(InMemoryServerRegistry::new());
    for url in servers {
        registry.insert(ServerRef::new(url.as_str()));
    }
    let (sink, mut outbound) = ChannelEventSink::new();

    let engine = Arc::new(SupportedVersionsEngine::new(
        cli.config(),
        registry,
        Arc::new(sink),
    )?);
    let bindings = EventBindings::with_engine(engine);

    let (tx, rx) = mpsc::unbounded_channel::<InboundEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            print_event(&event, true);
        }
    });
    let dispatcher = tokio::spawn(bindings.run(rx));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundEvent>(line) {
            Ok(event) => {
                if tx.send(event).is_err() {
                    break;
                }
            },
            Err(e) => eprintln!("Ignoring malformed event: {}", e),
        }
    }

    // EOF: let accepted checks finish, then flush what they emitted. The
    // outbound channel closes once the last engine handle is gone.
    drop(tx);
    let _ = dispatcher.await;
    let _ = printer.await;
    Ok(())
}

/// Log filter for the chosen level; `RUST_LOG` directives take precedence.
fn log_filter(level: tracing::Level, directives: Option<&str>) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(level.into()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let json_output = cli.format == "json";

    // Logs go to stderr so JSON output stays parseable
    let level = if json_output {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(level, directives.as_deref()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Check { url, language } => run_check(&cli, url, language, json_output).await,
        Commands::Decode { token, key } => run_decode(token, key.as_deref()).await,
        Commands::Status {
            url,
            server_version,
            unique_id,
            language,
            at,
        } => {
            let server = ServerRef {
                version: Some(server_version.clone()),
                unique_id: unique_id.clone(),
                ..ServerRef::new(url.as_str())
            };
            let at = at.unwrap_or_else(Utc::now);
            run_status(&cli, server, language, at, json_output).await
        },
        Commands::Serve { servers } => run_serve(&cli, servers).await,
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
