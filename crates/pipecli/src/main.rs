use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipecore::{GraphDefinition, GraphNodeSpec, PipelineEvent, RunContext, StreamSink, Value, SINK_KEY};
use piperuntime::{
    ComponentRegistry, DirPipelineStore, InMemoryPipelineStore, JsonPrototypeSource, PipelineRuntime,
    PipelineStore, RuntimeConfig,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Pipeline Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline file
    Run {
        /// Path to pipeline JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// JSON array of component prototypes to load before compiling
        #[arg(short, long)]
        components: Option<PathBuf>,

        /// Directory holding nested pipeline definitions (<id>.json)
        #[arg(short, long)]
        pipelines: Option<PathBuf>,

        /// Initial context as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Runtime configuration JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Cancel the run after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Compile a pipeline file without running it
    Validate {
        /// Path to pipeline JSON file
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long)]
        components: Option<PathBuf>,

        #[arg(short, long)]
        pipelines: Option<PathBuf>,
    },

    /// List available component kinds
    Components,

    /// Create a new example pipeline
    Init {
        /// Output file path
        #[arg(short, long, default_value = "pipeline.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            components,
            pipelines,
            input,
            config,
            timeout_ms,
            verbose,
        } => {
            init_tracing(verbose);

            let mut config = match config {
                Some(path) => load_config(&path)?,
                None => RuntimeConfig::default(),
            };
            if timeout_ms.is_some() {
                config.run_timeout_ms = timeout_ms;
            }
            run_pipeline(file, components, pipelines, input, config).await?;
        }

        Commands::Validate {
            file,
            components,
            pipelines,
        } => {
            init_tracing(false);
            validate_pipeline(file, components, pipelines).await?;
        }

        Commands::Components => {
            list_components().await;
        }

        Commands::Init { output } => {
            create_example_pipeline(output)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

fn load_definition(file: &Path) -> Result<GraphDefinition> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading pipeline {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing pipeline {}", file.display()))
}

async fn build_runtime(
    components: Option<PathBuf>,
    pipelines: Option<PathBuf>,
    config: RuntimeConfig,
) -> Result<PipelineRuntime> {
    let mut registry = ComponentRegistry::new();
    pipenodes::register_all(&mut registry).await;
    tracing::debug!(kinds = ?registry.list_kinds(), "Registered component kinds");

    if let Some(path) = components {
        let count = registry.reload(&JsonPrototypeSource::new(path)).await?;
        println!("📦 Loaded {} component prototypes", count);
    }

    let store: Arc<dyn PipelineStore> = match pipelines {
        Some(dir) => Arc::new(DirPipelineStore::new(dir)),
        None => Arc::new(InMemoryPipelineStore::new()),
    };
    Ok(PipelineRuntime::with_store(Arc::new(registry), store, config))
}

fn parse_input(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(input) = input else {
        return Ok(HashMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(&input)? {
        serde_json::Value::Object(obj) => Ok(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        _ => Err(anyhow::anyhow!("Input must be a JSON object")),
    }
}

async fn run_pipeline(
    file: PathBuf,
    components: Option<PathBuf>,
    pipelines: Option<PathBuf>,
    input: Option<String>,
    config: RuntimeConfig,
) -> Result<()> {
    println!("🚀 Loading pipeline from: {}", file.display());

    let definition = load_definition(&file)?;
    println!("📋 Pipeline: {} ({})", definition.name, definition.id);
    println!("   Nodes: {}", definition.nodes.len());
    println!();

    let runtime = build_runtime(components, pipelines, config).await?;
    let ctx = RunContext::with_values(parse_input(input)?);

    let (sink, mut stream) = tokio::sync::mpsc::unbounded_channel();
    ctx.insert_extension::<StreamSink>(SINK_KEY, Arc::new(sink));
    let stream_task = tokio::spawn(async move {
        while let Some(value) = stream.recv().await {
            println!("  📨 {}", value.to_json());
        }
    });

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PipelineEvent::RunStarted { pipeline_id, .. } => {
                    println!("▶️  Run started: {}", pipeline_id);
                }
                PipelineEvent::NodeStarted { node_id, component, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, component);
                }
                PipelineEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                PipelineEvent::NodeSkipped { node_id, .. } => {
                    println!("  ⏭️  Node {} skipped", node_id);
                }
                PipelineEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                PipelineEvent::RunCompleted {
                    success,
                    ended_early,
                    duration_ms,
                    ..
                } => {
                    if !success {
                        println!("💥 Run failed after {}ms", duration_ms);
                    } else if ended_early {
                        println!("🏁 Run ended early after {}ms", duration_ms);
                    } else {
                        println!("✨ Run completed successfully in {}ms", duration_ms);
                    }
                }
            }
        }
    });

    let result = runtime.run_definition(&definition, ctx.clone()).await;

    // Let buffered events print before tearing the listeners down
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();
    stream_task.abort();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(error) = ctx.error() {
                println!("   Context error: {}", error.to_json());
            }
            return Err(e.into());
        }
    };

    println!();
    println!("📊 Run Summary:");
    println!("   Run ID: {}", outcome.run_id);
    println!("   Executed: {}", outcome.executed.join(" → "));
    let mut statuses: Vec<_> = outcome.statuses.iter().collect();
    statuses.sort_by(|a, b| a.0.cmp(b.0));
    for (node_id, status) in statuses {
        println!("     {}: {:?}", node_id, status);
    }
    println!();
    println!("📤 Context:");
    println!("{}", serde_json::to_string_pretty(&outcome.summary().context)?);

    Ok(())
}

async fn validate_pipeline(
    file: PathBuf,
    components: Option<PathBuf>,
    pipelines: Option<PathBuf>,
) -> Result<()> {
    println!("🔍 Validating pipeline: {}", file.display());

    let definition = load_definition(&file)?;
    let runtime = build_runtime(components, pipelines, RuntimeConfig::default()).await?;
    let graph = runtime.compile(&definition).await?;

    println!("✅ Pipeline is valid:");
    println!("   Name: {}", definition.name);
    println!("   Root: {}", graph.root());
    println!("   Nodes: {}", graph.len());

    Ok(())
}

async fn list_components() {
    println!("📦 Available Component Kinds:");
    println!();

    let mut registry = ComponentRegistry::new();
    pipenodes::register_all(&mut registry).await;

    for kind in registry.list_kinds() {
        if let Some(metadata) = registry.get_metadata(&kind) {
            println!("  • {} ({})", kind, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", kind);
        }
    }
}

fn create_example_pipeline(output: PathBuf) -> Result<()> {
    let mut definition = GraphDefinition::new("example");
    definition.name = "Example Pipeline".to_string();
    definition.description = Some("Sets a greeting, branches on it and logs the result".to_string());

    definition.add_node(
        GraphNodeSpec::new("greet")
            .with_component("context.set")
            .with_parameter(serde_json::json!({ "values": { "greeting": "hello", "count": 3 } })),
    );
    definition.add_node(
        GraphNodeSpec::new("log")
            .with_component("debug.log")
            .with_parameter(serde_json::json!({ "message": "Greeting set", "keys": ["greeting"] })),
    );
    definition.add_node(
        GraphNodeSpec::new("emit")
            .with_component("stream.emit")
            .with_parameter(serde_json::json!({ "key": "greeting" })),
    );
    definition.connect("greet", "log");
    definition.connect_when("greet", "emit", "count > 2");

    let json = serde_json::to_string_pretty(&definition)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example pipeline: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  pipeline run --file {}", output.display());

    Ok(())
}
