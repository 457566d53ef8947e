// crates/flowcli/src/main.rs

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use flowcore::{
    ExecutionEvent, ExecutionRecord, NodeEvent, TriggerConfig, Value, Workflow, WorkflowNode,
};
use flownodes::catalog;
use flowruntime::{scheduler, FlowRuntime, NodeRegistry, RuntimeConfig, TriggerRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Classroom workflow engine CLI", long_about = None)]
struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file once
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Trigger context (or webhook payload) as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Identity recorded as the caller of a manual run
        #[arg(long = "as", default_value = "cli")]
        triggered_by: String,

        /// Call the AI service at this URL instead of echoing AI nodes
        #[arg(long, env = "AI_SERVICE_URL")]
        ai_service_url: Option<String>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },

    /// Preview the next ticks of a cron expression
    NextTicks {
        /// Five-field cron expression, e.g. "0 8 * * 1-5"
        expression: String,

        #[arg(short, long, default_value_t = 5)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Run {
            file,
            input,
            triggered_by,
            ai_service_url,
        } => {
            run_workflow(&file, input, triggered_by, ai_service_url).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes()?;
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }

        Commands::NextTicks { expression, count } => {
            for tick in scheduler::upcoming(&expression, Utc::now(), count)? {
                println!("{}", tick.to_rfc3339());
            }
        }
    }

    Ok(())
}

/// Catalog with echo adapters, optionally backed by the real AI service
fn build_registry(ai_service_url: Option<&str>) -> Result<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    flownodes::register_catalog(&mut registry)?;
    if let Some(url) = ai_service_url {
        flownodes::register_ai_adapters(&mut registry, url)?;
    }
    flownodes::register_echo_adapters(&mut registry)?;
    flownodes::register_sample_options(&mut registry);
    Ok(registry)
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&workflow_json)
        .with_context(|| format!("parsing {}", file.display()))
}

async fn run_workflow(
    file: &Path,
    input: Option<String>,
    triggered_by: String,
    ai_service_url: Option<String>,
) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let mut workflow = load_workflow(file)?;
    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    match &ai_service_url {
        Some(url) => println!("   AI service: {}", url),
        None => println!("   AI service: not configured, AI nodes are echoed"),
    }
    println!();

    let payload: serde_json::Value = match input {
        Some(input_str) => serde_json::from_str(&input_str).context("parsing --input")?,
        None => serde_json::Value::Null,
    };
    if !payload.is_object() && !payload.is_null() {
        bail!("Input must be a JSON object");
    }

    let registry = build_registry(ai_service_url.as_deref())?;
    let runtime = FlowRuntime::new(Arc::new(registry), RuntimeConfig::from_env());

    // A one-off local run ignores the activation flag
    workflow.is_active = true;
    let request = match &workflow.trigger {
        TriggerConfig::Manual => {
            TriggerRequest::manual(workflow.id, triggered_by, Value::map_from_json(payload))
        }
        TriggerConfig::Webhook { .. } => TriggerRequest::webhook(workflow.id, payload),
        TriggerConfig::Schedule { .. } => TriggerRequest::schedule(workflow.id, Utc::now()),
    };
    let workflow_id = workflow.id;
    for warning in runtime.register_workflow(workflow).await? {
        println!("   ⚠️  {}", warning);
    }
    tracing::debug!("Running workflow {} from {}", workflow_id, file.display());

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let finished = matches!(event, ExecutionEvent::ExecutionFinished { .. });
            print_event(event);
            if finished {
                break;
            }
        }
    });

    let record = runtime.execute(request).await?;
    let _ = event_task.await;

    print_summary(&record);
    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::ExecutionStarted { triggered_by, .. } => {
            println!("▶️  Execution started by {}", triggered_by);
        }
        ExecutionEvent::NodeStarted {
            node_id, node_type, ..
        } => {
            println!("  ⚡ Starting node: {} ({})", node_id, node_type);
        }
        ExecutionEvent::NodeSucceeded {
            node_id,
            duration_ms,
            ..
        } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeSkipped { node_id, .. } => {
            println!("  ⏭️  Node {} skipped", node_id);
        }
        ExecutionEvent::NodeRetrying {
            node_id,
            attempt,
            delay_ms,
            error,
            ..
        } => {
            println!(
                "  🔁 Node {} attempt {} failed ({}), retrying in {}ms",
                node_id, attempt, error, delay_ms
            );
        }
        ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
            NodeEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", node_id, message);
            }
            NodeEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", node_id, message);
            }
            NodeEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {}% - {}", node_id, percent, msg);
                } else {
                    println!("     📊 [{}] {}%", node_id, percent);
                }
            }
        },
        ExecutionEvent::ExecutionFinished {
            status,
            duration_ms,
            ..
        } => {
            println!("✨ Execution {} in {}ms", status, duration_ms);
        }
    }
}

fn print_summary(record: &ExecutionRecord) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", record.id);
    println!("   Status: {}", record.status);
    if let Some(error) = &record.error {
        println!("   Error: {}", error);
    }

    println!();
    println!("📤 Nodes:");
    for (node_id, result) in &record.node_results {
        println!("   {} [{}]", node_id, result.status);
        if let Some(error) = &result.error {
            println!("     error: {}", error);
        }
        let mut outputs: Vec<_> = result.output.iter().collect();
        outputs.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in outputs {
            println!("     {}: {}", key, value);
        }
    }
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let registry = build_registry(None)?;
    let result = flowruntime::validate(&workflow, &registry);

    for warning in &result.warnings {
        println!("   ⚠️  {}", warning);
    }
    for error in &result.errors {
        println!("   ❌ {}", error);
    }

    if !result.is_valid() {
        bail!("{} validation error(s)", result.errors.len());
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    Ok(())
}

fn list_nodes() -> Result<()> {
    println!("📦 Available Node Types:");

    let registry = build_registry(None)?;
    let mut category = "";
    for def in registry.definitions() {
        if def.category.label() != category {
            category = def.category.label();
            println!();
            println!("{}", category);
        }
        println!("  • {} ({})", def.node_type, def.label);
        if !def.description.is_empty() {
            println!("    {}", def.description);
        }
        for field in &def.fields {
            let required = if field.required { ", required" } else { "" };
            println!("      - {} [{}{}]", field.name, field.field_type, required);
        }
        if !def.output_variables.is_empty() {
            let vars: Vec<_> = def
                .output_variables
                .iter()
                .map(|v| format!("{{{{{}}}}}", v.name))
                .collect();
            println!("      ⇒ {}", vars.join(", "));
        }
    }
    Ok(())
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Low score follow-up", TriggerConfig::Manual)
        .with_description("Emails the teacher when an exam average drops below 50");

    let start = workflow.add_node(WorkflowNode::new("start", catalog::MANUAL_TRIGGER));
    let results = workflow.add_node(
        WorkflowNode::new("results", catalog::GET_EXAM_RESULTS)
            .with_name("Fetch Results")
            .with_field("examId", "exam-midterm"),
    );
    let check = workflow.add_node(
        WorkflowNode::new("check", catalog::CONDITION)
            .with_name("Average Below 50?")
            .with_field("variable", "{{results.avgScore}}")
            .with_field("operator", "lt")
            .with_field("value", "50"),
    );
    let email = workflow.add_node(
        WorkflowNode::new("email", catalog::SEND_EMAIL)
            .with_name("Alert Teacher")
            .with_field("to", "teacher@school.edu")
            .with_field("subject", "Midterm average is {{results.avgScore}}")
            .with_field(
                "body",
                "{{results.resultCount}} submissions, lowest score {{results.minScore}}.",
            ),
    );
    let notify = workflow.add_node(
        WorkflowNode::new("notify", catalog::SEND_NOTIFICATION)
            .with_name("All Good")
            .with_field("recipientId", "{{start.triggeredBy}}")
            .with_field("title", "Midterm results look fine"),
    );

    workflow.connect(start, "out", results.clone(), "in");
    workflow.connect(results, "out", check.clone(), "in");
    workflow.connect(check.clone(), "true", email, "in");
    workflow.connect(check, "false", notify, "in");

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  flow run --file {} --as teacher1", output.display());

    Ok(())
}
