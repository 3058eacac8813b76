use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use grainfather_exporter::api::{create_router, ApiState};
use grainfather_exporter::auth::Authenticator;
use grainfather_exporter::config::{load_config, ExporterConfig};
use grainfather_exporter::credentials::{CredentialStore, StaticToken, TokenSource};
use grainfather_exporter::device::DeviceLocator;
use grainfather_exporter::measurement::MeasurementCache;
use grainfather_exporter::pipeline::{PipelineState, Supervisor};
use grainfather_exporter::stream::{EventSource, EventStream, HttpEventSource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "grainfather-exporter")]
#[command(version)]
#[command(about = "Prometheus exporter for Grainfather fermentation controllers", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true, env = "GRAINFATHER_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    secrets: Secrets,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct Secrets {
    /// Grainfather account email
    #[arg(long, global = true, env = "GRAINFATHER_USERNAME")]
    username: Option<String>,

    /// Grainfather account password
    #[arg(long, global = true, env = "GRAINFATHER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Pre-issued Particle access token (skips the login exchange)
    #[arg(long, global = true, env = "PARTICLE_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and print the device access token
    Auth,

    /// Wait for one measurement from the monitored device and print it
    Particle,

    /// Run the exporter
    #[command(alias = "prometheus")]
    Serve {
        /// Address for the metrics endpoint
        #[arg(long, env = "GRAINFATHER_LISTEN_ADDRESS")]
        listen_address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grainfather_exporter=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match &cli.command {
        Commands::Auth => run_auth(&config, &cli.secrets).await,
        Commands::Particle => run_particle(&config, &cli.secrets).await,
        Commands::Serve { .. } => run_serve(config, &cli.secrets).await,
    }
}

/// File (or defaults) first, then command-line overrides.
fn resolve_config(cli: &Cli) -> Result<ExporterConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ExporterConfig::default(),
    };
    if let Commands::Serve {
        listen_address: Some(address),
    } = &cli.command
    {
        config.server.listen_address = address.clone();
    }
    Ok(config)
}

fn authenticator(config: &ExporterConfig, secrets: &Secrets) -> Result<Authenticator> {
    let (Some(username), Some(password)) = (&secrets.username, &secrets.password) else {
        bail!("--username and --password (or GRAINFATHER_USERNAME / GRAINFATHER_PASSWORD) are required");
    };
    let client = config
        .http
        .rest_client()
        .context("Failed to build HTTP client")?;
    Ok(Authenticator::new(
        client,
        config.grainfather.base_url.clone(),
        username.clone(),
        password.clone(),
    ))
}

fn token_source(config: &ExporterConfig, secrets: &Secrets) -> Result<Arc<dyn TokenSource>> {
    if let Some(token) = &secrets.token {
        info!("Using pre-issued access token");
        return Ok(Arc::new(StaticToken::new(token.clone())));
    }
    Ok(Arc::new(authenticator(config, secrets)?))
}

async fn run_auth(config: &ExporterConfig, secrets: &Secrets) -> Result<()> {
    let authenticator = authenticator(config, secrets)?;
    let credential = authenticator.issue().await.context("Login failed")?;

    println!("token:      {}", credential.bearer_token);
    println!("expires at: {}", credential.expires_at.to_rfc3339());
    Ok(())
}

async fn run_particle(config: &ExporterConfig, secrets: &Secrets) -> Result<()> {
    let credentials = Arc::new(
        CredentialStore::new(token_source(config, secrets)?)
            .with_refresh_margin(config.refresh_margin()),
    );
    let credential = credentials.valid().await.context("Login failed")?;

    let locator = DeviceLocator::new(
        config.http.rest_client().context("Failed to build HTTP client")?,
        config.particle.base_url.clone(),
    );
    let settings = config.pipeline_settings();
    let device = locator
        .locate(&credential, settings.device_selection)
        .await
        .context("Failed to resolve device")?;
    info!(device_id = %device.id, device_name = %device.name, "Waiting for a measurement");

    let events: Arc<dyn EventSource> = Arc::new(HttpEventSource::new(
        config.http.stream_client().context("Failed to build HTTP client")?,
        config.particle.base_url.clone(),
        config.stream.idle_timeout(),
    )
    .with_response_timeout(config.http.timeout()));
    let mut stream = EventStream::new(events, credentials, device, settings.reconnect);
    let measurement = stream.next().await.context("Event stream failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&measurement).context("Failed to encode measurement")?
    );
    Ok(())
}

async fn run_serve(config: ExporterConfig, secrets: &Secrets) -> Result<()> {
    info!(
        grainfather_url = %config.grainfather.base_url,
        particle_url = %config.particle.base_url,
        listen_address = %config.server.listen_address,
        "Configuration loaded"
    );

    let credentials = Arc::new(
        CredentialStore::new(token_source(&config, secrets)?)
            .with_refresh_margin(config.refresh_margin()),
    );
    let cache = Arc::new(MeasurementCache::new());
    let state = Arc::new(PipelineState::new(credentials, cache));

    let locator = Arc::new(DeviceLocator::new(
        config.http.rest_client().context("Failed to build HTTP client")?,
        config.particle.base_url.clone(),
    ));
    let events: Arc<dyn EventSource> = Arc::new(HttpEventSource::new(
        config.http.stream_client().context("Failed to build HTTP client")?,
        config.particle.base_url.clone(),
        config.stream.idle_timeout(),
    )
    .with_response_timeout(config.http.timeout()));
    let pipeline_handle = Supervisor::new(
        Arc::clone(&state),
        locator,
        events,
        config.pipeline_settings(),
    )
    .spawn();

    // Start HTTP server
    let router = create_router(ApiState::new(state));
    let listener = tokio::net::TcpListener::bind(&config.server.listen_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_address))?;
    info!(address = %config.server.listen_address, "Metrics endpoint listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    pipeline_handle.abort();
    info!("Exporter stopped");

    Ok(())
}
