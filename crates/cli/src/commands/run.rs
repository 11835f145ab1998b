//! `stepwise task`: run one task and print its answer.

use std::path::PathBuf;
use std::sync::Arc;
use stepwise_agent::run_task;
use stepwise_config::AppConfig;
use stepwise_core::error::ProviderError;
use stepwise_core::event::{Event, EventBus, EventKind, EventPayload};
use stepwise_core::provider::Provider;
use stepwise_core::task::{FailureKind, TaskId, TaskStatus};
use stepwise_providers::build_provider;
use stepwise_tools::ToolCatalog;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::EngineArgs;
use crate::console::ConsoleSink;

/// Returns `Ok(false)` when the task itself failed.
pub async fn run(
    task: Option<String>,
    file: Option<PathBuf>,
    engine: &EngineArgs,
    verbose: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    apply_overrides(&mut config, engine);
    config.validate()?;

    let task = read_task(task, file).await?;
    let task_config = config.task_config();

    let bus = Arc::new(EventBus::new());
    bus.subscribe(EventKind::ALL, Arc::new(ConsoleSink::new(verbose)));

    let built = build_providers(
        &task_config.model,
        task_config.vision_model.as_deref(),
        &config,
    );
    let (provider, model, catalog) = match built {
        Ok(built) => built,
        Err(e) => {
            report_setup_failure(&bus, &e);
            return Ok(false);
        }
    };

    let result = run_task(&task, task_config, provider, |builder| {
        builder.model(model).tools(catalog).event_bus(Arc::clone(&bus))
    })
    .await;

    info!(
        status = %result.status,
        iterations = result.iterations,
        tool_calls = result.tool_calls,
        prompt_tokens = result.usage.prompt_tokens,
        completion_tokens = result.usage.completion_tokens,
        "Task finished"
    );

    match result.status {
        TaskStatus::Completed => {
            println!("\n{}", result.answer);
            Ok(true)
        }
        TaskStatus::IterationLimit => {
            eprintln!("Iteration limit reached without a final answer; last model output follows.");
            println!("\n{}", result.answer);
            Ok(true)
        }
        TaskStatus::Failed => Ok(false),
    }
}

/// The main provider, its bare model name, and the tool catalog.
///
/// `describe_image` gets its own provider when a vision model is set.
fn build_providers(
    model: &str,
    vision_model: Option<&str>,
    config: &AppConfig,
) -> Result<(Arc<dyn Provider>, String, ToolCatalog), ProviderError> {
    let (provider, model) = build_provider(model, config)?;

    let mut catalog = ToolCatalog::new();
    if let Some(vision_model) = vision_model {
        let (vision_provider, vision_name) = build_provider(vision_model, config)?;
        catalog = catalog.with_vision(vision_provider, vision_name);
    }
    Ok((provider, model, catalog))
}

/// Publish a provider setup error the way the engine publishes its own
/// setup failures.
fn report_setup_failure(bus: &EventBus, error: &ProviderError) {
    let task_id = TaskId::new();
    warn!(%task_id, "Provider setup failed: {error}");
    bus.emit(&Event::new(
        task_id,
        EventPayload::TaskFailed {
            kind: FailureKind::Configuration,
            message: error.to_string(),
        },
    ));
}

fn apply_overrides(config: &mut AppConfig, args: &EngineArgs) {
    if let Some(mode) = &args.mode {
        config.mode = mode.clone();
    }
    if let Some(model) = &args.model_name {
        config.default_model = model.clone();
    }
    if let Some(vision) = &args.vision_model_name {
        config.vision_model = Some(vision.clone());
    }
    if let Some(n) = args.max_iterations {
        config.engine.max_iterations = n;
    }
    if let Some(n) = args.compact_every {
        config.engine.compact_every = Some(n);
    }
    if let Some(n) = args.max_working_memory_tokens {
        config.engine.max_working_memory_tokens = Some(n);
    }
    if args.no_stream {
        config.engine.stream = false;
    }
}

/// The task text from the argument, the file, or stdin, in that order.
async fn read_task(
    task: Option<String>,
    file: Option<PathBuf>,
) -> Result<String, Box<dyn std::error::Error>> {
    let text = match (task, file) {
        (Some(task), _) => task,
        (None, Some(path)) => tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| format!("Failed to read task file {}: {e}", path.display()))?,
        (None, None) => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let text = text.trim();
    if text.is_empty() {
        return Err("No task given: pass it as an argument, with --file, or on stdin".into());
    }
    Ok(text.to_string())
}
