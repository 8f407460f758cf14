/// Version injected at compile time via CLOUDMAP_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDMAP_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cloudmap::config::Config;
use cloudmap::mapping::{items_at, MapMode};
use cloudmap::remote::format_remote_error;
use cloudmap::remote::http::HttpRemoteClient;
use cloudmap::resource::{get_registry, Registry, ResourceDescriptor, ResourceOps};
use cloudmap::{EngineError, RequestMapper, ResourceState, ResponseMapper};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Declarative field mapping and call orchestration for cloud APIs
#[derive(Parser, Debug)]
#[command(name = "cloudmap", version, about, long_about = None)]
struct Args {
    /// API endpoint to call
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    /// Region sent with every call
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Directory of additional descriptor files (JSON or YAML)
    #[arg(long, global = true)]
    descriptors: Option<PathBuf>,

    /// Run in read-only mode (block all write operations)
    #[arg(long, global = true)]
    readonly: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List known resource descriptors
    Resources,
    /// Print the parameter map for a state file
    Map {
        #[arg(long)]
        resource: String,
        #[arg(long)]
        state: PathBuf,
        /// Map for an update instead of a create
        #[arg(long)]
        update: bool,
        /// Fields changed since the last sync (update only)
        #[arg(long, value_delimiter = ',')]
        changed: Vec<String>,
    },
    /// Print the resource state(s) for a raw response file
    Unmap {
        #[arg(long)]
        resource: String,
        #[arg(long)]
        response: PathBuf,
        /// Treat the response as a list response
        #[arg(long)]
        list: bool,
        /// Key list results by this field
        #[arg(long, requires = "list")]
        identity: Option<String>,
    },
    /// Create an entity from a state file
    Create {
        #[arg(long)]
        resource: String,
        #[arg(long)]
        state: PathBuf,
    },
    /// Read one entity by identity
    Read {
        #[arg(long)]
        resource: String,
        #[arg(long)]
        id: String,
    },
    /// List every entity of a type
    List {
        #[arg(long)]
        resource: String,
    },
    /// Delete one entity by identity
    Delete {
        #[arg(long)]
        resource: String,
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudmap {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudmap").join("cloudmap.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudmap").join("cloudmap.log");
    }
    PathBuf::from("cloudmap.log")
}

/// Read a JSON or YAML document (YAML by `.yaml`/`.yml` extension)
fn read_document(path: &Path) -> Result<Value> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => {
            serde_yaml::from_str(&content).with_context(|| format!("Invalid YAML in {:?}", path))
        }
        _ => serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path)),
    }
}

fn read_state(path: &Path) -> Result<ResourceState> {
    match read_document(path)? {
        Value::Object(values) => Ok(ResourceState::from_values(values)),
        other => bail!("State file {:?} must hold an object, found {}", path, other),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_registry(descriptors: Option<&Path>) -> Result<Registry> {
    let mut registry = get_registry().clone();
    if let Some(dir) = descriptors {
        registry
            .load_dir(dir)
            .with_context(|| format!("Failed to load descriptors from {:?}", dir))?;
    }
    Ok(registry)
}

fn lookup(registry: &Registry, key: &str) -> Result<Arc<ResourceDescriptor>> {
    match registry.get(key) {
        Some(descriptor) => Ok(descriptor),
        None => bail!(
            "Unknown resource `{}`. Known resources: {}",
            key,
            registry.keys().collect::<Vec<_>>().join(", ")
        ),
    }
}

/// Lifecycle driver wired from flags and the config file
fn build_ops(
    args: &Args,
    config: &Config,
    descriptor: Arc<ResourceDescriptor>,
) -> Result<ResourceOps<HttpRemoteClient>> {
    let endpoint = config.effective_endpoint(args.endpoint.as_deref());
    let mut client = HttpRemoteClient::new(&endpoint)?;
    if let Some(region) = config.effective_region(args.region.as_deref()) {
        client = client.with_region(region);
    }
    tracing::info!("Using endpoint: {}", endpoint);

    let mut ops = ResourceOps::new(descriptor, Arc::new(client))
        .with_retry(config.retry_policy())
        .with_classifier(Arc::new(config.classifier()));
    if let Some(page_size) = config.page_size {
        ops = ops.with_page_size(page_size);
    }
    Ok(ops)
}

/// Engine errors with remote failures rendered for humans
fn friendly(err: EngineError) -> anyhow::Error {
    anyhow::anyhow!(format_remote_error(&err))
}

fn ensure_writable(args: &Args, operation: &str) -> Result<()> {
    if args.readonly {
        bail!("Read-only mode: {} is blocked", operation);
    }
    Ok(())
}

async fn run(args: &Args) -> Result<()> {
    let config = Config::load();
    let registry = load_registry(args.descriptors.as_deref())?;

    match &args.command {
        Command::Resources => {
            for descriptor in registry.iter() {
                println!("{:<12} {}", descriptor.key, descriptor.display_name);
            }
        }
        Command::Map {
            resource,
            state,
            update,
            changed,
        } => {
            let descriptor = lookup(&registry, resource)?;
            let mut state = read_state(state)?;
            let mode = if *update {
                state.mark_clean();
                for field in changed {
                    state.mark_changed(field);
                }
                MapMode::Update
            } else {
                MapMode::Create
            };
            let params = RequestMapper::default().map(
                &state,
                descriptor.tree(),
                descriptor.transforms(),
                mode,
            )?;
            print_json(&params)?;
        }
        Command::Unmap {
            resource,
            response,
            list,
            identity,
        } => {
            let descriptor = lookup(&registry, resource)?;
            let raw = read_document(response)?;
            let mapper = ResponseMapper::default();
            let (tree, rules) = (descriptor.tree(), descriptor.responses());

            if *list {
                let items = match (&raw, &descriptor.list) {
                    (Value::Array(items), _) => items.as_slice(),
                    (_, Some(list)) => items_at(&raw, &list.items_path),
                    (_, None) => bail!("`{}` declares no list items path", resource),
                };
                match identity {
                    Some(identity) => {
                        let keyed = mapper.unmap_keyed(items, tree, rules, identity)?;
                        let rendered: serde_json::Map<String, Value> = keyed
                            .into_iter()
                            .map(|(k, state)| (k, state.to_value()))
                            .collect();
                        print_json(&rendered)?;
                    }
                    None => {
                        let states = mapper.unmap_list(items, tree, rules)?;
                        let rendered: Vec<Value> = states.iter().map(|s| s.to_value()).collect();
                        print_json(&rendered)?;
                    }
                }
            } else {
                print_json(&mapper.unmap(&raw, tree, rules)?.to_value())?;
            }
        }
        Command::Create { resource, state } => {
            ensure_writable(args, "create")?;
            let ops = build_ops(args, &config, lookup(&registry, resource)?)?;
            let mut state = read_state(state)?;
            ops.create(&mut state).await.map_err(friendly)?;
            print_json(&state.to_value())?;
        }
        Command::Read { resource, id } => {
            let descriptor = lookup(&registry, resource)?;
            let identity_field = descriptor.identity.field.clone();
            let ops = build_ops(args, &config, descriptor)?;
            let mut state = ResourceState::new().with_id(id.as_str());
            if !ops.read(&mut state).await.map_err(friendly)? {
                bail!("{} `{}` not found", identity_field, id);
            }
            print_json(&state.to_value())?;
        }
        Command::List { resource } => {
            let ops = build_ops(args, &config, lookup(&registry, resource)?)?;
            let states = ops.list(&ResourceState::new()).await.map_err(friendly)?;
            let rendered: Vec<Value> = states.iter().map(|s| s.to_value()).collect();
            print_json(&rendered)?;
            eprintln!("{} item(s)", states.len());
        }
        Command::Delete { resource, id } => {
            ensure_writable(args, "delete")?;
            let ops = build_ops(args, &config, lookup(&registry, resource)?)?;
            let mut state = ResourceState::new().with_id(id.as_str());
            let outcome = ops.delete(&mut state).await.map_err(friendly)?;
            if outcome.gone() {
                println!("{} was already gone", id);
            } else {
                println!("Deleted {}", id);
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    if let Err(err) = run(&args).await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }

    Ok(())
}
