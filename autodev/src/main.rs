//! `autodev` command line: start, resume, review, and inspect sessions.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};

use autodev::exit_codes;
use autodev::io::assistant::ClaudeCli;
use autodev::io::checkpoint::open_store;
use autodev::io::config::{AutodevConfig, DEFAULT_CONFIG_FILE, load_with_env};
use autodev::io::llm::AnthropicClient;
use autodev::io::workspace::{Workspace, read_optional, validate_session_id, write_json};
use autodev::logging;
use autodev::workflow::{RunOutcome, RunStatus, SessionInfo, Workflow, list_sessions, session_status};

#[derive(Parser)]
#[command(
    name = "autodev",
    version,
    about = "Turn a requirement into a PRD, a design, and code"
)]
struct Cli {
    /// TOML config file; missing means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Pause after the PM and architect stages for feedback.
    #[arg(long, global = true)]
    human_loop: bool,
    /// Run the whole dev loop in one coder invocation.
    #[arg(long, global = true)]
    batch_coding: bool,
    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new session from a requirement.
    Start {
        requirement: String,
        #[arg(long)]
        session_id: Option<String>,
        /// Existing project the coder should work in.
        #[arg(long)]
        project_dir: Option<PathBuf>,
        /// Also write the run summary as JSON to this file.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Resume a paused or interrupted session.
    Continue {
        session: String,
        /// Feedback for the stage that just finished.
        #[arg(long)]
        feedback: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run the PRD reviewers and revise the PRD with their notes.
    Review { session: String },
    /// Show where a session stands.
    Status {
        session: String,
        #[arg(long)]
        json: bool,
    },
    /// Print a session artifact.
    Show {
        session: String,
        #[arg(long, value_enum, default_value_t = Artifact::Prd)]
        artifact: Artifact,
    },
    /// List sessions in the workspace.
    List,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Artifact {
    Prd,
    Design,
    Tasks,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    let mut config = load_with_env(&cli.config)?;
    if cli.human_loop {
        config.workflow.human_in_loop = true;
    }
    if cli.batch_coding {
        config.workflow.batch_coding = true;
    }
    logging::init(&config.logging.level, config.logging.file.as_deref(), cli.verbose)?;

    match cli.command {
        Command::Start {
            requirement,
            session_id,
            project_dir,
            output,
        } => cmd_start(&config, &requirement, session_id.as_deref(), project_dir, output.as_deref()),
        Command::Continue {
            session,
            feedback,
            output,
        } => cmd_continue(&config, &session, feedback.as_deref(), output.as_deref()),
        Command::Review { session } => cmd_review(&config, &session),
        Command::Status { session, json } => cmd_status(&config, &session, json),
        Command::Show { session, artifact } => cmd_show(&config, &session, artifact),
        Command::List => cmd_list(&config),
    }
}

/// Run `f` against a workflow wired to the real collaborators.
fn with_workflow<F>(config: &AutodevConfig, f: F) -> Result<RunOutcome>
where
    F: FnOnce(&Workflow<'_>) -> Result<RunOutcome>,
{
    let llm = AnthropicClient::new(&config.llm)?;
    let assistant = ClaudeCli::new(&config.assistant, config.models.coder.clone());
    let store = open_store(config);
    let workflow = Workflow::new(config, &llm, &assistant, store.as_ref())?;
    f(&workflow)
}

fn cmd_start(
    config: &AutodevConfig,
    requirement: &str,
    session_id: Option<&str>,
    project_dir: Option<PathBuf>,
    output: Option<&Path>,
) -> Result<i32> {
    let outcome = with_workflow(config, |workflow| {
        workflow.start(requirement, session_id, project_dir)
    })?;
    report(&outcome, output)
}

fn cmd_continue(
    config: &AutodevConfig,
    session: &str,
    feedback: Option<&str>,
    output: Option<&Path>,
) -> Result<i32> {
    let outcome = with_workflow(config, |workflow| workflow.resume(session, feedback))?;
    report(&outcome, output)
}

fn cmd_review(config: &AutodevConfig, session: &str) -> Result<i32> {
    let outcome = with_workflow(config, |workflow| workflow.review(session))?;
    report(&outcome, None)
}

fn cmd_status(config: &AutodevConfig, session: &str, json: bool) -> Result<i32> {
    let store = open_store(config);
    let workspace = Workspace::new(&config.workspace_root);
    let info = session_status(store.as_ref(), &workspace, session)?
        .ok_or_else(|| anyhow!("session {session} not found"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_info(&info);
    }
    Ok(exit_codes::OK)
}

fn cmd_show(config: &AutodevConfig, session: &str, artifact: Artifact) -> Result<i32> {
    validate_session_id(session)?;
    let paths = Workspace::new(&config.workspace_root).session(session);
    if !paths.exists() {
        bail!("session {session} not found");
    }
    let path = match artifact {
        Artifact::Prd => &paths.prd,
        Artifact::Design => &paths.design,
        Artifact::Tasks => &paths.tasks,
    };
    let contents = read_optional(path)?
        .with_context(|| format!("{} has not been written yet", path.display()))?;
    print!("{contents}");
    Ok(exit_codes::OK)
}

fn cmd_list(config: &AutodevConfig) -> Result<i32> {
    let store = open_store(config);
    let workspace = Workspace::new(&config.workspace_root);
    let sessions = list_sessions(store.as_ref(), &workspace)?;
    if sessions.is_empty() {
        println!("no sessions in {}", workspace.root().display());
        return Ok(exit_codes::OK);
    }
    for info in sessions {
        println!(
            "{}\t{}\t{}/{} tasks\t{}",
            info.session_id, info.stage, info.tasks_completed, info.tasks_total, info.source
        );
    }
    Ok(exit_codes::OK)
}

/// Print the outcome, optionally save it as JSON, and pick the exit code.
fn report(outcome: &RunOutcome, output: Option<&Path>) -> Result<i32> {
    let info = outcome.info();
    print_info(&info);
    match &outcome.status {
        RunStatus::Interrupted { next } => println!(
            "paused before {next}; run `autodev continue {}` to resume",
            info.session_id
        ),
        RunStatus::Completed => println!("workflow complete"),
        RunStatus::Failed { error } => eprintln!("stage failed: {error}"),
    }
    if let Some(path) = output {
        write_json(path, &info)?;
    }
    Ok(match outcome.status {
        RunStatus::Failed { .. } => exit_codes::ERROR,
        _ => exit_codes::OK,
    })
}

fn print_info(info: &SessionInfo) {
    println!("session:   {}", info.session_id);
    println!("stage:     {}", info.stage);
    if let Some(next) = info.next {
        println!("next:      {next}");
    }
    println!(
        "tasks:     {}/{} completed ({} coding iterations)",
        info.tasks_completed, info.tasks_total, info.coding_iterations
    );
    for (label, path) in [
        ("prd", &info.prd_path),
        ("design", &info.design_path),
        ("tasks", &info.tasks_path),
        ("code", &info.code_directory),
    ] {
        if let Some(path) = path {
            println!("{label:<10} {}", path.display());
        }
    }
    if let Some(halt) = &info.halt {
        println!("halted:    {halt:?}");
    }
    if let Some(error) = &info.error {
        println!("error:     {error}");
    }
}
