use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testcraft::cli::commands::{MethodsCommand, RunCommand, StatusCommand, ValidateCommand};
use testcraft::cli::method::RunSelection;
use testcraft::cli::output::*;
use testcraft::cli::{Cli, Command};
use testcraft::core::config::PlansConfig;
use testcraft::core::context::RunContext;
use testcraft::core::error::Error;
use testcraft::core::plan::Plan;
use testcraft::core::step::StepKind;
use testcraft::execution::workdir::{self, RunRecord};
use testcraft::execution::{RunEngine, RunEvent};
use testcraft::library::{GitFetcher, LibraryCache};
use testcraft::persistence::{create_summary, PersistenceBackend};
use testcraft::plugin::Registries;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over the verbosity counters
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    let result = match &cli.command {
        Command::Run(cmd) => run_plans(cmd, cli.quiet).await,
        Command::Validate(cmd) => validate_plans(cmd),
        Command::Methods(cmd) => list_methods(cmd),
        Command::Status(cmd) => show_status(cmd).await,
    };

    if let Err(err) = result {
        match err.downcast_ref::<Error>() {
            Some(domain) => eprintln!("{} {}", CROSS, style(domain.render_chain()).red()),
            None => eprintln!("{} {}", CROSS, style(format!("{:#}", err)).red()),
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn open_store() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = testcraft::persistence::SqliteRunStore::with_default_path()
            .await
            .context("Failed to open run history")?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(testcraft::persistence::InMemoryPersistence::new()))
    }
}

/// Workdir of the run: resumed with `--id`, freshly allocated otherwise
fn prepare_workdir(cmd: &RunCommand, root: &Path) -> Result<(String, PathBuf)> {
    let Some(id) = &cmd.id else {
        return Ok(workdir::allocate_run(root, cmd.dry)?);
    };
    let (id, run_workdir) = workdir::resolve_run(root, id);
    if cmd.dry {
        return Ok((id, run_workdir));
    }
    if cmd.scratch && run_workdir.exists() {
        info!(workdir = %run_workdir.display(), "Removing run workdir");
        std::fs::remove_dir_all(&run_workdir)
            .with_context(|| format!("Failed to remove '{}'", run_workdir.display()))?;
    }
    std::fs::create_dir_all(&run_workdir)
        .with_context(|| format!("Failed to create '{}'", run_workdir.display()))?;
    Ok((id, run_workdir))
}

async fn run_plans(cmd: &RunCommand, quiet: bool) -> Result<()> {
    let registries = Arc::new(Registries::builtin());
    let selection = RunSelection::parse(&registries, &cmd.segments)?;
    if let Some(help) = &selection.help {
        print!("{}", help);
        return Ok(());
    }

    let root = workdir::workdir_root(cmd.workdir_root.as_deref());
    let (id, run_workdir) = prepare_workdir(cmd, &root)?;
    let previous = RunRecord::load(&run_workdir)?;

    let plans_file = match (&cmd.file, previous.as_ref().and_then(|r| r.plans_file.clone())) {
        (Some(file), _) => std::path::absolute(file).unwrap_or_else(|_| file.clone()),
        (None, Some(file)) => file,
        (None, None) => {
            return Err(Error::specification("No plans file given, use --file.").into());
        }
    };
    let config = PlansConfig::from_file(&plans_file)?;

    let mut environment = config.environment.clone();
    if let Some(previous) = &previous {
        environment.extend(previous.environment.clone());
    }
    environment.extend(cmd.environment.iter().cloned());

    let libraries = Arc::new(LibraryCache::new(
        run_workdir.join("libraries"),
        Arc::new(GitFetcher::default()),
    ));
    let mut run = RunContext::new(id.clone(), run_workdir.clone(), libraries);
    run.environment = environment;
    run.dry = cmd.dry;
    run.test_filter = selection.test_filter.clone();

    let mut plans = Vec::new();
    for (name, plan_config) in config.enabled_plans() {
        if !selection.wants_plan(name) {
            debug!(plan = %name, "Plan filtered out");
            continue;
        }
        let mut plan = Plan::from_config(name, plan_config, &registries, run.plan_workdir(name), &selection.steps)?;
        for step in plan.steps.iter_mut() {
            step.enabled = selection.runs_step(step.kind, cmd.all);
            step.force |= cmd.force;
        }
        plans.push(plan);
    }
    if plans.is_empty() {
        return Err(Error::specification("No plans matched.").into());
    }

    if !cmd.dry {
        let record = RunRecord {
            plans_file: Some(plans_file.clone()),
            plans: plans.iter().map(|p| p.name.clone()).collect(),
            environment: run.environment.clone(),
            created_at: previous.map(|r| r.created_at).unwrap_or_else(chrono::Utc::now),
        };
        record.save(&run_workdir)?;
    }

    let engine = RunEngine::new(registries.clone(), cmd.strategy());
    let progress = (!quiet && plans.len() > 1).then(|| create_progress_bar(plans.len()));
    let handler_progress = progress.clone();
    engine.add_event_handler(move |event: RunEvent| {
        if quiet {
            return;
        }
        let line = format_run_event(&event);
        match &handler_progress {
            Some(bar) => {
                bar.println(line);
                if matches!(event, RunEvent::PlanCompleted { .. } | RunEvent::PlanFailed { .. }) {
                    bar.inc(1);
                }
            }
            None => println!("{}", line),
        }
    });

    let report = engine.execute(Arc::new(run), plans).await;
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    if !cmd.no_history && !cmd.dry {
        let summary = create_summary(&report);
        match open_store().await {
            Ok(store) => {
                if let Err(err) = store.save_run(&summary).await {
                    warn!("Failed to save run to history: {:#}", err);
                }
            }
            Err(err) => warn!("{:#}", err),
        }
    }

    let results = report.into_result()?;
    if !quiet {
        println!("\n{} {} {}", INFO, style(&id).bold(), format_results(&results));
    }
    if !results.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_plans(cmd: &ValidateCommand) -> Result<()> {
    let registries = Registries::builtin();
    let config = PlansConfig::from_file(&cmd.file)?;

    let mut plans = Vec::new();
    for (name, plan_config) in &config.plans {
        let plan = Plan::from_config(name, plan_config, &registries, PathBuf::from(name), &BTreeMap::new())?;
        plans.push((plan, plan_config.enabled));
    }

    if cmd.json {
        let data: Vec<_> = plans
            .iter()
            .map(|(plan, enabled)| {
                let steps: serde_json::Map<String, serde_json::Value> = plan
                    .steps
                    .iter()
                    .map(|step| {
                        let phases: Vec<_> = step
                            .phases
                            .iter()
                            .map(|phase| serde_json::json!({ "name": phase.data.name, "how": phase.data.how }))
                            .collect();
                        (step.kind.to_string(), serde_json::Value::Array(phases))
                    })
                    .collect();
                serde_json::json!({ "name": plan.name, "enabled": enabled, "steps": steps })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "plans": data }))?);
        return Ok(());
    }

    println!("{} Plans file is valid!", CHECK);
    for (plan, enabled) in &plans {
        let title = match &plan.summary {
            Some(summary) => format!("{} {}", style(&plan.name).bold(), style(summary).dim()),
            None => style(&plan.name).bold().to_string(),
        };
        if *enabled {
            println!("  {}", title);
        } else {
            println!("  {} {}", title, style("(disabled)").yellow());
        }
        for step in &plan.steps {
            let methods: Vec<String> = step
                .phases
                .iter()
                .map(|phase| format!("{} ({})", phase.data.name, phase.data.how))
                .collect();
            println!("    {:<10} {}", style(step.kind).cyan(), methods.join(", "));
        }
    }
    Ok(())
}

fn list_methods(cmd: &MethodsCommand) -> Result<()> {
    let registries = Registries::builtin();

    if cmd.json {
        let data: serde_json::Map<String, serde_json::Value> = StepKind::ALL
            .iter()
            .map(|step| {
                let methods: Vec<_> = registries
                    .methods(*step)
                    .iter()
                    .map(|m| serde_json::json!({ "name": m.name, "order": m.order, "doc": m.doc }))
                    .collect();
                (step.to_string(), serde_json::Value::Array(methods))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    for step in StepKind::ALL {
        println!("{}", style(step).bold().cyan());
        for method in registries.methods(step) {
            println!("{}", format_method(method));
        }
    }
    Ok(())
}

async fn show_status(cmd: &StatusCommand) -> Result<()> {
    let store = open_store().await?;
    let runs = store.list_runs(cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Recent runs (showing latest {}):", INFO, cmd.limit);
    for summary in &runs {
        println!("  {}", format_run_summary(summary));
    }
    Ok(())
}
