use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use nanopub_replica::app::App;
use nanopub_replica::backend::TripleStore;
use nanopub_replica::config::{Config, ConfigLoader, EndpointType, ResolvedConfig};
use nanopub_replica::error::ReplicaError;
use nanopub_replica::memory::MemoryTripleStore;
use nanopub_replica::output::JsonOutput;
use nanopub_replica::rdf4j::Rdf4jTripleStore;
use nanopub_replica::registry::RegistryHttpClient;

#[derive(Parser)]
#[command(name = "np-replica")]
#[command(about = "Replicates a nanopublication registry into triple-store repositories")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct OverrideArgs {
    #[arg(long, env = "ENDPOINT_BASE", global = true)]
    endpoint_base: Option<String>,

    #[arg(long, env = "ENDPOINT_TYPE", global = true)]
    endpoint_type: Option<String>,

    #[arg(long, env = "REGISTRY_FIXED_URL", global = true)]
    registry_url: Option<String>,

    #[arg(long, env = "INIT_WAIT_SECONDS", global = true)]
    init_wait_seconds: Option<u64>,

    #[arg(long, env = "LOAD_DIR", global = true)]
    load_dir: Option<String>,

    #[arg(long, global = true)]
    cache_capacity: Option<usize>,

    #[arg(long, global = true)]
    update_interval_seconds: Option<u64>,
}

impl From<OverrideArgs> for Config {
    fn from(args: OverrideArgs) -> Self {
        Config {
            endpoint_base: args.endpoint_base,
            endpoint_type: args.endpoint_type,
            registry_url: args.registry_url,
            init_wait_seconds: args.init_wait_seconds,
            load_dir: args.load_dir,
            cache_capacity: args.cache_capacity,
            update_interval_seconds: args.update_interval_seconds,
            ..Config::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the replication service until interrupted (default)")]
    Run,
    #[command(about = "Print loading state, load counter and gauges as JSON")]
    Status,
    #[command(about = "List repositories and the type or key each derived one covers")]
    Repos,
    #[command(about = "Fetch single nanopublications from the registry and load them")]
    Load(LoadArgs),
}

#[derive(Args)]
struct LoadArgs {
    #[arg(required = true)]
    uris: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ReplicaError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ReplicaError) -> u8 {
    match error {
        ReplicaError::MissingConfig(_)
        | ReplicaError::ConfigRead(_)
        | ReplicaError::ConfigParse(_)
        | ReplicaError::UnknownEndpointType(_) => 2,
        error if error.is_transient() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref(), cli.overrides.into())?;
    let store = open_store(&config)?;
    let registry = RegistryHttpClient::new(&config.registry_url)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_service(config, store, registry),
        Commands::Status => {
            let app = App::new(config, store, registry)?;
            JsonOutput::print_status(&app.status()).into_diagnostic()
        }
        Commands::Repos => {
            let app = App::new(config, store, registry)?;
            JsonOutput::print_repos(&app.repos()?).into_diagnostic()
        }
        Commands::Load(args) => {
            let app = App::new(config, store, registry)?;
            let result = app.load(&args.uris);
            JsonOutput::print_load(&result).into_diagnostic()
        }
    }
}

fn open_store(config: &ResolvedConfig) -> Result<Arc<dyn TripleStore>, ReplicaError> {
    Ok(match config.endpoint_type {
        EndpointType::Rdf4j => Arc::new(Rdf4jTripleStore::new(&config.endpoint_base)?),
        EndpointType::Memory => Arc::new(MemoryTripleStore::new()),
    })
}

fn run_service(
    config: ResolvedConfig,
    store: Arc<dyn TripleStore>,
    registry: RegistryHttpClient,
) -> miette::Result<()> {
    tracing::info!(
        endpoint = %config.endpoint_base,
        registry = %config.registry_url,
        "starting"
    );
    let app = App::new(config, store, registry)?;
    let token = app.shutdown_token();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, shutting down");
        token.raise();
    })
    .into_diagnostic()?;
    match app.launch() {
        Ok(()) => app.wait(),
        Err(ReplicaError::Shutdown) => {}
        Err(err) => {
            app.shutdown();
            return Err(err.into());
        }
    }
    app.shutdown();
    Ok(())
}
