//! Command-line interface: argument parsing, tracing setup, and the
//! command handlers themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use levelgrid_core::{GuideService, SubmitGuide};
use levelgrid_extract::extract_text;
use levelgrid_genai::GenerationClient;
use levelgrid_prompts::{PromptRegistry, PromptUpdate};
use levelgrid_shared::{
    AppConfig, GenerationOptions, RoleId, RunId, RunRecord, RunState, config_file_path,
    init_config, load_config, resolve_db_path,
};
use levelgrid_storage::Store;

#[derive(Parser)]
#[command(name = "levelgrid", version, about = "Leveling guides into example-rich role grids", long_about = None)]
pub(crate) struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub(crate) log_format: LogFormat,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process a leveling guide file into an active role grid
    Process {
        /// Guide document (.txt, .md, or .csv)
        file: PathBuf,

        /// Company the role belongs to
        #[arg(long)]
        company_id: String,

        /// Role title, e.g. "Software Engineer"
        #[arg(long)]
        role_name: String,

        /// Company website, used as context for example generation
        #[arg(long)]
        company_url: String,
    },

    /// Show the current status of a processing run
    Status {
        /// Run id printed by `process`
        run_id: String,
    },

    /// Request cancellation of a processing run
    Cancel {
        /// Run id printed by `process`
        run_id: String,
    },

    /// List active roles for a company
    Roles {
        /// Company to list roles for
        #[arg(long)]
        company_id: String,
    },

    /// Print the full grid of a role: levels, competencies, examples
    Show {
        /// Role id
        role_id: String,
    },

    /// Show quality metrics recorded for a role's examples
    Metrics {
        /// Role id
        role_id: String,

        /// Only rows produced by this prompt version id
        #[arg(long)]
        prompt_id: Option<String>,

        /// Only rows produced by this prompt version number
        #[arg(long)]
        prompt_version: Option<i64>,
    },

    /// Inspect and version the prompts used for parsing and generation
    Prompts {
        #[command(subcommand)]
        action: PromptsAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Housekeeping for processing run records
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum PromptsAction {
    /// List the active version of every prompt
    List,

    /// Show all versions of a prompt, newest first
    History {
        /// Prompt key, e.g. "parse_guide"
        key: String,
    },

    /// Create and activate a new version with the given overrides
    Update {
        /// Prompt key to update
        key: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Short description of the change
        #[arg(long)]
        description: Option<String>,

        /// System message sent with every request
        #[arg(long)]
        system_message: Option<String>,

        /// User message template with {{variable}} placeholders
        #[arg(long)]
        user_message_template: Option<String>,

        /// Model name, e.g. "gpt-4o"
        #[arg(long)]
        model: Option<String>,

        /// Sampling temperature
        #[arg(long)]
        temperature: Option<f64>,
    },

    /// Make a previously stored version the active one
    Activate {
        /// Version id, as shown by `prompts history`
        version_id: String,
    },

    /// Store the built-in prompts for any key that has no versions yet
    Seed,
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults
    Init,

    /// Show resolved configuration
    Show,
}

#[derive(Subcommand)]
pub(crate) enum RunsAction {
    /// Delete finished run records older than the given age
    Evict {
        /// Minimum age in days
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

pub(crate) fn init_tracing(cli: &Cli) {
    let filter = match cli.verbose {
        0 => "levelgrid=info",
        1 => "levelgrid=debug",
        _ => "levelgrid=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Process {
            file,
            company_id,
            role_name,
            company_url,
        } => cmd_process(&file, &company_id, &role_name, &company_url).await,
        Command::Status { run_id } => cmd_status(&run_id).await,
        Command::Cancel { run_id } => cmd_cancel(&run_id).await,
        Command::Roles { company_id } => cmd_roles(&company_id).await,
        Command::Show { role_id } => cmd_show(&role_id).await,
        Command::Metrics {
            role_id,
            prompt_id,
            prompt_version,
        } => cmd_metrics(&role_id, prompt_id.as_deref(), prompt_version).await,
        Command::Prompts { action } => match action {
            PromptsAction::List => cmd_prompts_list().await,
            PromptsAction::History { key } => cmd_prompts_history(&key).await,
            PromptsAction::Update {
                key,
                name,
                description,
                system_message,
                user_message_template,
                model,
                temperature,
            } => {
                let update = PromptUpdate {
                    name,
                    description,
                    system_message,
                    user_message_template,
                    model,
                    temperature,
                };
                cmd_prompts_update(&key, update).await
            }
            PromptsAction::Activate { version_id } => cmd_prompts_activate(&version_id).await,
            PromptsAction::Seed => cmd_prompts_seed().await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
        Command::Runs { action } => match action {
            RunsAction::Evict { days } => cmd_runs_evict(days).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

async fn open_store(config: &AppConfig) -> Result<Arc<Store>> {
    let db_path = resolve_db_path(config)?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("cannot create data directory '{}': {e}", parent.display()))?;
    }
    let store = Store::open(&db_path).await?;
    Ok(Arc::new(store))
}

/// Builds the full processing service. Requires an API key, so only the
/// `process` command goes through here.
async fn build_service(config: &AppConfig) -> Result<GuideService> {
    let store = open_store(config).await?;
    let client = GenerationClient::from_config(&config.openai)?;
    let options = GenerationOptions::from(config);
    Ok(GuideService::new(store, client, options))
}

fn parse_run_id(raw: &str) -> Result<RunId> {
    raw.parse::<RunId>()
        .map_err(|_| eyre!("'{raw}' is not a valid run id"))
}

fn parse_role_id(raw: &str) -> Result<RoleId> {
    raw.parse::<RoleId>()
        .map_err(|_| eyre!("'{raw}' is not a valid role id"))
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

async fn cmd_process(
    file: &Path,
    company_id: &str,
    role_name: &str,
    company_url: &str,
) -> Result<()> {
    Url::parse(company_url).map_err(|e| eyre!("invalid company URL '{company_url}': {e}"))?;

    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| eyre!("'{}' is not a usable file name", file.display()))?;
    if filename.to_lowercase().ends_with(".pdf") {
        return Err(eyre!(
            "PDF files are not supported. Export the guide as .txt, .md, or .csv and try again."
        ));
    }

    let config = load_config()?;
    let service = build_service(&config).await?;

    let bytes =
        std::fs::read(file).map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let raw_text = extract_text(&bytes, filename);

    info!(
        file = %file.display(),
        company_id,
        role_name,
        "submitting leveling guide"
    );

    let run_id = service
        .submit_guide(SubmitGuide {
            company_id: company_id.to_string(),
            role_name: role_name.to_string(),
            company_url: company_url.to_string(),
            raw_text,
        })
        .await?;

    println!("Run started: {run_id}");

    let progress = CliProgress::new();
    let run = watch_run(&service, &run_id, &progress).await?;
    progress.finish();

    match run.state {
        RunState::Completed => {
            println!();
            println!("  Guide processed successfully!");
            println!("  Role:    {role_name}");
            if let Some(role_id) = &run.result_role_id {
                println!("  Role id: {role_id}");
                println!();
                println!("  Inspect it with: levelgrid show {role_id}");
            }
            if let Some(warning) = &run.warning {
                println!();
                println!("  {warning}");
            }
            println!();
            Ok(())
        }
        _ => Err(eyre!("processing failed: {}", run.message)),
    }
}

/// Polls the run until it reaches a terminal state, keeping the spinner
/// message in sync. Ctrl-C requests cancellation instead of killing the
/// process, so the run winds down and its record ends up failed rather
/// than stuck mid-flight.
async fn watch_run(
    service: &GuideService,
    run_id: &RunId,
    progress: &CliProgress,
) -> Result<RunRecord> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                progress.set_message("Cancelling run...".to_string());
                service.cancel_run(run_id).await;
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }

        let run = service.run_status(run_id).await?;
        if run.state.is_terminal() {
            return Ok(run);
        }
        progress.set_message(run.message.clone());
    }
}

// ---------------------------------------------------------------------------
// Status / Cancel
// ---------------------------------------------------------------------------

async fn cmd_status(run_id: &str) -> Result<()> {
    let run_id = parse_run_id(run_id)?;
    let config = load_config()?;
    let store = open_store(&config).await?;

    let run = store
        .get_run(&run_id.to_string())
        .await?
        .ok_or_else(|| eyre!("run '{run_id}' not found"))?;

    println!();
    println!("  Run:     {}", run.id);
    println!("  Role:    {} ({})", run.role_name, run.company_id);
    println!("  State:   {}", run.state.as_str());
    println!("  Message: {}", run.message);
    if let Some(warning) = &run.warning {
        println!("  Warning: {warning}");
    }
    if let Some(role_id) = &run.result_role_id {
        println!("  Role id: {role_id}");
    }
    println!("  Updated: {}", run.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!();
    Ok(())
}

async fn cmd_cancel(run_id: &str) -> Result<()> {
    let run_id = parse_run_id(run_id)?;
    let config = load_config()?;
    let store = open_store(&config).await?;

    let run = store
        .get_run(&run_id.to_string())
        .await?
        .ok_or_else(|| eyre!("run '{run_id}' not found"))?;

    if run.state.is_terminal() {
        println!("Run {run_id} already finished ({}).", run.state.as_str());
        return Ok(());
    }

    // Cancellation tokens live in the process that owns the run, so a
    // separate invocation cannot flip them. Ctrl-C in `process` can.
    println!("Run {run_id} is still processing.");
    println!("Cancellation only reaches runs owned by this process; press Ctrl-C in the `process` command to cancel its run.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

async fn cmd_roles(company_id: &str) -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config).await?;

    let roles = store.list_active_roles(company_id).await?;
    if roles.is_empty() {
        println!("No active roles for company '{company_id}'.");
        return Ok(());
    }

    println!("{:<38} {:<34} {}", "ID", "NAME", "UPDATED");
    for role in roles {
        println!(
            "{:<38} {:<34} {}",
            role.id,
            role.name,
            role.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn cmd_show(role_id: &str) -> Result<()> {
    let role_id = parse_role_id(role_id)?.to_string();
    let config = load_config()?;
    let store = open_store(&config).await?;

    let role = store
        .get_role(&role_id)
        .await?
        .ok_or_else(|| eyre!("role '{role_id}' not found"))?;
    let levels = store.list_levels(&role_id).await?;
    let competencies = store.list_competencies(&role_id).await?;
    let definitions = store.list_definitions(&role_id).await?;
    let examples = store.list_examples(&role_id).await?;

    println!();
    println!("  {} ({})", role.name, role.state.as_str());
    println!("  Company: {}", role.company_id);
    println!("  Created: {}", role.created_at.format("%Y-%m-%d %H:%M"));
    println!();

    for level in &levels {
        println!("  {}", level.name);
        for competency in &competencies {
            let definition = definitions
                .iter()
                .find(|d| d.level_id == level.id && d.competency_id == competency.id);
            if let Some(definition) = definition {
                println!("    {}", competency.name);
                println!("      {}", definition.requirement);
                let cell_examples = examples
                    .iter()
                    .filter(|e| e.level_id == level.id && e.competency_id == competency.id);
                for example in cell_examples {
                    println!("      - {}", example.content);
                }
            }
        }
        println!();
    }
    Ok(())
}

async fn cmd_metrics(
    role_id: &str,
    prompt_id: Option<&str>,
    prompt_version: Option<i64>,
) -> Result<()> {
    let role_id = parse_role_id(role_id)?.to_string();
    let config = load_config()?;
    let store = open_store(&config).await?;

    if store.get_role(&role_id).await?.is_none() {
        return Err(eyre!("role '{role_id}' not found"));
    }

    let rows = store
        .list_quality_metrics(&role_id, prompt_id, prompt_version)
        .await?;
    if rows.is_empty() {
        println!("No quality metrics recorded for role '{role_id}'.");
        return Ok(());
    }

    for m in &rows {
        println!();
        println!("  Definition: {}", m.definition_id);
        println!(
            "    Prompt:       {} v{} ({}, temperature {:.1})",
            m.prompt_key, m.prompt_version, m.prompt_model, m.prompt_temperature
        );
        println!("    Examples:     {}", m.examples_count);
        println!(
            "    Avg length:   {} chars, {} words",
            m.avg_length_chars, m.avg_length_words
        );
        println!(
            "    Signal terms: {} action verbs, {} artifacts, {} generic phrases",
            m.action_verb_count, m.artifact_term_count, m.generic_phrase_count
        );
        println!("    Uniqueness:   {:.2}", m.uniqueness_score);
        println!(
            "    Densities:    verbs {:.2} per 100 words, artifacts {:.2} per example, generic {:.2} per example",
            m.action_verb_density, m.artifact_density, m.generic_density
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

async fn prompt_registry(config: &AppConfig) -> Result<PromptRegistry> {
    let store = open_store(config).await?;
    Ok(PromptRegistry::new(store))
}

async fn cmd_prompts_list() -> Result<()> {
    let config = load_config()?;
    let registry = prompt_registry(&config).await?;

    let prompts = registry.list_active().await?;
    if prompts.is_empty() {
        println!("No prompts stored. Run `levelgrid prompts seed` to load the built-in set.");
        return Ok(());
    }

    for prompt in prompts {
        println!();
        println!("  {} v{}", prompt.key, prompt.version);
        println!("    Name:        {}", prompt.name);
        println!("    Model:       {}", prompt.model);
        println!("    Temperature: {:.1}", prompt.temperature);
        println!("    Id:          {}", prompt.id);
    }
    println!();
    Ok(())
}

async fn cmd_prompts_history(key: &str) -> Result<()> {
    let config = load_config()?;
    let registry = prompt_registry(&config).await?;

    let versions = registry.history(key).await?;
    if versions.is_empty() {
        println!("No versions stored for prompt '{key}'.");
        return Ok(());
    }

    println!("{:<4} {:<8} {:<38} {:<12} {}", "", "VERSION", "ID", "MODEL", "DESCRIPTION");
    for v in versions {
        let marker = if v.is_active { "*" } else { "" };
        println!(
            "{:<4} {:<8} {:<38} {:<12} {}",
            marker, v.version, v.id, v.model, v.description
        );
    }
    Ok(())
}

async fn cmd_prompts_update(key: &str, update: PromptUpdate) -> Result<()> {
    if update.name.is_none()
        && update.description.is_none()
        && update.system_message.is_none()
        && update.user_message_template.is_none()
        && update.model.is_none()
        && update.temperature.is_none()
    {
        return Err(eyre!(
            "nothing to update; pass at least one of --name, --description, --system-message, --user-message-template, --model, --temperature"
        ));
    }

    let config = load_config()?;
    let registry = prompt_registry(&config).await?;

    let version = registry.update(key, update).await?;
    println!("Created and activated {} v{} ({}).", version.key, version.version, version.id);
    Ok(())
}

async fn cmd_prompts_activate(version_id: &str) -> Result<()> {
    let config = load_config()?;
    let registry = prompt_registry(&config).await?;

    let version = registry.activate(version_id).await?;
    println!("Activated {} v{}.", version.key, version.version);
    Ok(())
}

async fn cmd_prompts_seed() -> Result<()> {
    let config = load_config()?;
    let registry = prompt_registry(&config).await?;

    let seeded = registry.seed_defaults().await?;
    if seeded == 0 {
        println!("All prompt keys already have stored versions.");
    } else {
        println!("Seeded {seeded} built-in prompt(s).");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config = load_config()?;
    let rendered = toml::to_string_pretty(&config)?;

    println!("Config file: {}", config_file_path()?.display());
    println!();
    println!("{rendered}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

async fn cmd_runs_evict(days: u32) -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config).await?;

    let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
    let evicted = store.evict_runs(cutoff).await?;
    println!("Evicted {evicted} run(s) older than {days} day(s).");
    Ok(())
}

// ---------------------------------------------------------------------------
// Progress display
// ---------------------------------------------------------------------------

struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap()
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn set_message(&self, message: String) {
        self.spinner.set_message(message);
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}
