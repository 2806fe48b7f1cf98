//! CLI command definitions and handlers for the `cascade` binary.
//!
//! Uses clap derive macros for argument parsing. Two commands:
//! `cascade run <workflow> --input <json>` executes a workflow and prints
//! the final output; `cascade validate <workflow>` performs structural and
//! template checks without constructing a provider.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value, json};

use cascade_core::llm::BoxProvider;
use cascade_core::workflow::definition::{check_templates, load_workflow_file};
use cascade_core::workflow::template::JexlTemplateEngine;
use cascade_core::workflow::{RunFailure, StepError, WorkflowEngine};
use cascade_infra::llm::OpenAiCompatibleProvider;
use cascade_types::config::RunConfig;

/// Run declarative AI workflow pipelines.
#[derive(Parser)]
#[command(name = "cascade", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of plain text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Bridge tracing spans to OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow and print its final output.
    Run {
        /// Path to the workflow YAML file.
        workflow: PathBuf,

        /// Input bindings as an inline JSON object.
        #[arg(long)]
        input: Option<String>,

        /// Input bindings read from a JSON file.
        #[arg(long, conflicts_with = "input")]
        input_file: Option<PathBuf>,

        /// Provider backend to use.
        #[arg(long, value_enum, default_value_t = ProviderKind::Openai)]
        provider: ProviderKind,

        /// Model override (defaults to the run config default).
        #[arg(long)]
        model: Option<String>,

        /// Base URL for the `local` provider.
        #[arg(long, default_value = "http://localhost:11434/v1")]
        base_url: Option<String>,
    },

    /// Check a workflow's structure and templates without running it.
    Validate {
        /// Path to the workflow YAML file.
        workflow: PathBuf,
    },
}

/// Selectable provider backends.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ProviderKind {
    Openai,
    Gemini,
    Local,
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub async fn run(
    workflow_path: &Path,
    input: Option<&str>,
    input_file: Option<&Path>,
    provider_kind: &ProviderKind,
    model: Option<&str>,
    base_url: Option<&str>,
    json_output: bool,
) -> anyhow::Result<()> {
    let definition = load_workflow_file(workflow_path)
        .with_context(|| format!("failed to load workflow '{}'", workflow_path.display()))?;

    let input = parse_input(input, input_file)?;

    let mut config = RunConfig::default();
    if let Some(model) = model {
        config.default_model = model.to_string();
    }

    let provider = build_provider(provider_kind, &config, base_url)?;
    let engine = WorkflowEngine::new(provider, config);

    tracing::info!(
        workflow = definition.name.as_str(),
        path = %workflow_path.display(),
        "executing workflow"
    );

    match engine.execute(&definition, input).await {
        Ok(result) => {
            if json_output {
                let report = json!({
                    "run_id": result.run_id.to_string(),
                    "workflow": result.workflow_name,
                    "status": "completed",
                    "output": result.output,
                    "steps": result.steps,
                    "usage": result.usage,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                match &result.output {
                    Value::String(text) => println!("{text}"),
                    other => println!("{}", serde_json::to_string_pretty(other)?),
                }
            }
            Ok(())
        }
        Err(failure) => {
            report_failure(&failure, json_output);
            bail!("workflow run failed");
        }
    }
}

fn parse_input(
    input: Option<&str>,
    input_file: Option<&Path>,
) -> anyhow::Result<Map<String, Value>> {
    let raw = match (input, input_file) {
        (Some(inline), _) => inline.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file '{}'", path.display()))?,
        (None, None) => return Ok(Map::new()),
    };

    let value: Value =
        serde_json::from_str(&raw).context("input is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        _ => bail!("input must be a JSON object"),
    }
}

fn build_provider(
    kind: &ProviderKind,
    config: &RunConfig,
    base_url: Option<&str>,
) -> anyhow::Result<BoxProvider> {
    let provider = match kind {
        ProviderKind::Openai => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY must be set for the openai provider")?;
            OpenAiCompatibleProvider::openai(&api_key, &config.default_model)
        }
        ProviderKind::Gemini => {
            let api_key = std::env::var("GEMINI_API_KEY")
                .context("GEMINI_API_KEY must be set for the gemini provider")?;
            OpenAiCompatibleProvider::gemini(&api_key, &config.default_model)
        }
        ProviderKind::Local => {
            let base_url = base_url.unwrap_or("http://localhost:11434/v1");
            OpenAiCompatibleProvider::local(base_url, &config.default_model)
        }
    };
    Ok(BoxProvider::new(provider))
}

/// Print a run failure with enough context for post-mortem: the
/// originating step, the error kind, and per-index errors for collections.
fn report_failure(failure: &RunFailure, json_output: bool) {
    if json_output {
        let report = match failure {
            RunFailure::Input(message) => json!({
                "status": "failed",
                "kind": "input",
                "error": message,
            }),
            RunFailure::Step {
                error,
                partial_steps,
                usage,
            } => {
                let item_errors = match error {
                    StepError::ItemProcessing { errors, .. } => json!(errors),
                    _ => Value::Null,
                };
                json!({
                    "status": "failed",
                    "kind": error.kind(),
                    "step_id": error.step_id(),
                    "error": error.to_string(),
                    "item_errors": item_errors,
                    "partial_steps": partial_steps,
                    "usage": usage,
                })
            }
        };
        eprintln!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        return;
    }

    match failure {
        RunFailure::Input(message) => eprintln!("error: {message}"),
        RunFailure::Step { error, .. } => {
            eprintln!("error: {error}");
            if let StepError::ItemProcessing { errors, .. } = error {
                for item in errors {
                    eprintln!("  item {}: {}", item.index, item.message);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

pub fn validate(workflow_path: &Path, json_output: bool) -> anyhow::Result<()> {
    let definition = load_workflow_file(workflow_path)
        .with_context(|| format!("invalid workflow '{}'", workflow_path.display()))?;

    let engine = JexlTemplateEngine::new();
    check_templates(&definition, &engine)
        .with_context(|| format!("template check failed in '{}'", workflow_path.display()))?;

    if json_output {
        println!(
            "{}",
            json!({
                "status": "valid",
                "workflow": definition.name,
                "steps": definition.steps.len(),
            })
        );
    } else {
        println!(
            "{}: valid ({} top-level step(s))",
            definition.name,
            definition.steps.len()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
