//! End-to-end runs of the workflow with scripted LLM and assistant.

use autodev::core::state::SessionState;
use autodev::core::types::{GraphNode, HaltReason, Stage, TaskStatus};
use autodev::error::ProviderError;
use autodev::io::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use autodev::io::config::AutodevConfig;
use autodev::io::task_store::{load_tasks, write_tasks};
use autodev::io::workspace::write_text;
use autodev::recovery::ResumeStrategy;
use autodev::test_support::{
    CHAIN_TASKS_JSON, SAMPLE_PRD, ScriptedAssistant, ScriptedLlm, assistant_ok, design_response,
    task, test_config,
};
use autodev::workflow::{RunStatus, Workflow};

const DONE: &str = "Implemented the task. Created file src/store.rs. All tests passed.";

const CYCLE_TASKS_JSON: &str = r#"[
  {"id": "a", "title": "A", "dependencies": ["b"]},
  {"id": "b", "title": "B", "dependencies": ["a"]}
]"#;

fn ok_runs(count: usize) -> ScriptedAssistant {
    ScriptedAssistant::new((0..count).map(|_| Ok(assistant_ok(DONE))).collect())
}

fn config(temp: &tempfile::TempDir) -> AutodevConfig {
    test_config(temp.path())
}

#[test]
fn requirement_runs_through_all_stages() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(&temp);
    let llm = ScriptedLlm::replying(&[SAMPLE_PRD, design_response(CHAIN_TASKS_JSON).as_str()]);
    let assistant = ok_runs(2);
    let store = FileCheckpointStore::new(&config.data_root);
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");

    let outcome = workflow
        .start("Build a todo CLI", Some("s1"), None)
        .expect("start");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.next, None);
    let state = &outcome.state;
    assert_eq!(state.stage, Stage::Done);
    assert_eq!(state.completed_tasks, vec!["t1".to_string(), "t2".to_string()]);
    assert_eq!(state.coding_output.as_deref(), Some("Completed 2 tasks"));
    assert_eq!(state.halt, None);
    assert_eq!(state.error, None);
    assert!(state.messages.contains(&"[PM_Agent] Completed successfully".to_string()));
    assert!(state.messages.contains(&"[Architect_Agent] Completed successfully".to_string()));

    let paths = workflow.workspace().session("s1");
    assert!(paths.prd.is_file());
    assert!(paths.design.is_file());
    let saved = load_tasks(&paths.tasks).expect("load").expect("present");
    assert!(saved.iter().all(|task| task.status == TaskStatus::Completed));

    let checkpoint = store.load("s1").expect("checkpoint");
    assert_eq!(checkpoint.next, None);
    assert_eq!(checkpoint.state.stage, Stage::Done);
    assert_eq!(checkpoint.state.completed_tasks, outcome.state.completed_tasks);

    // t2 is only handed over after t1 finished.
    let prompts: Vec<String> = assistant.requests().into_iter().map(|r| r.prompt).collect();
    assert!(prompts[0].contains("- ID: t1"));
    assert!(prompts[1].contains("- ID: t2"));
    llm.assert_drained().expect("llm drained");
    assistant.assert_drained().expect("assistant drained");
}

/// Mutually dependent tasks stop the dev stage without running anything.
#[test]
fn dependency_cycle_halts_without_invoking_assistant() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(&temp);
    let llm = ScriptedLlm::replying(&[SAMPLE_PRD, design_response(CYCLE_TASKS_JSON).as_str()]);
    let assistant = ScriptedAssistant::default();
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");

    let outcome = workflow.start("Build it", Some("cyc"), None).expect("start");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state.stage, Stage::Done);
    assert!(matches!(
        outcome.state.halt,
        Some(HaltReason::CircularDependency { ref pending }) if pending.len() == 2
    ));
    assert!(
        outcome
            .state
            .coding_output
            .as_deref()
            .unwrap_or("")
            .contains("circular dependencies")
    );
    assert!(outcome.state.completed_tasks.is_empty());
    assert!(assistant.requests().is_empty());
}

/// With a cap of one, exactly one task is attempted.
#[test]
fn iteration_cap_of_one_runs_single_task() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = config(&temp);
    config.workflow.max_coding_iterations = 1;
    let llm = ScriptedLlm::replying(&[SAMPLE_PRD, design_response(CHAIN_TASKS_JSON).as_str()]);
    let assistant = ok_runs(1);
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");

    let outcome = workflow.start("Build it", Some("cap"), None).expect("start");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(assistant.requests().len(), 1);
    assert_eq!(outcome.state.coding_iterations, 1);
    assert_eq!(outcome.state.completed_tasks, vec!["t1".to_string()]);
    assert_eq!(
        outcome.state.halt,
        Some(HaltReason::IterationCap {
            completed: 1,
            total: 2
        })
    );
    assert_eq!(
        outcome.state.coding_output.as_deref(),
        Some("Reached maximum iterations. Completed 1/2 tasks")
    );
}

#[test]
fn human_review_pauses_and_feedback_revises_prd() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = config(&temp);
    config.workflow.human_in_loop = true;
    let revised = format!("{SAMPLE_PRD}\n## Tags\nTodos carry tags.\n");
    let llm = ScriptedLlm::replying(&[
        SAMPLE_PRD,
        revised.as_str(),
        design_response(CHAIN_TASKS_JSON).as_str(),
    ]);
    let assistant = ok_runs(2);
    let store = FileCheckpointStore::new(&config.data_root);
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");

    let first = workflow.start("Build a todo CLI", Some("hitl"), None).expect("start");
    assert_eq!(
        first.status,
        RunStatus::Interrupted {
            next: GraphNode::Architect
        }
    );
    assert_eq!(first.state.stage, Stage::Prd);
    assert_eq!(store.load("hitl").expect("checkpoint").next, Some(GraphNode::Architect));

    let second = workflow
        .resume("hitl", Some("Please add tagging"))
        .expect("resume with feedback");
    assert_eq!(
        second.status,
        RunStatus::Interrupted {
            next: GraphNode::Architect
        }
    );
    assert_eq!(second.state.prd_iteration, 2);
    assert_eq!(second.state.prd_feedback, None);
    assert!(second.state.prd_content.as_deref().unwrap_or("").contains("## Tags"));
    assert!(llm.requests()[1].prompt.contains("Please add tagging"));

    let third = workflow.resume("hitl", None).expect("resume to design");
    assert_eq!(
        third.status,
        RunStatus::Interrupted {
            next: GraphNode::Coder
        }
    );
    assert_eq!(third.state.stage, Stage::Design);

    let last = workflow.resume("hitl", None).expect("resume to end");
    assert_eq!(last.status, RunStatus::Completed);
    assert_eq!(last.state.completed_count(), 2);

    let again = workflow.resume("hitl", None).expect("resume finished session");
    assert_eq!(again.status, RunStatus::Completed);
    assert_eq!(again.strategy, ResumeStrategy::Checkpoint);
    llm.assert_drained().expect("llm drained");
}

/// Batch mode finishes the task list in one coder node.
#[test]
fn batch_coding_completes_in_single_node() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = config(&temp);
    config.workflow.batch_coding = true;
    let llm = ScriptedLlm::replying(&[SAMPLE_PRD, design_response(CHAIN_TASKS_JSON).as_str()]);
    let assistant = ok_runs(2);
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");

    let outcome = workflow.start("Build it", Some("batch"), None).expect("start");

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state.completed_count(), 2);
    // PM, architect, one coder node.
    assert_eq!(store.len("batch"), 3);
    let coder_messages = outcome
        .state
        .messages
        .iter()
        .filter(|m| m.as_str() == "[Coder_Agent] Completed successfully")
        .count();
    assert_eq!(coder_messages, 1);
}

/// No checkpoint, but a task file with one finished task.
#[test]
fn dev_session_resumes_from_artifacts() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(&temp);
    let llm = ScriptedLlm::default();
    let assistant = ok_runs(1);
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");

    let paths = workflow.workspace().session("art");
    write_text(&paths.prd, SAMPLE_PRD).expect("prd");
    write_text(&paths.design, "# Design\n").expect("design");
    let mut done = task("t1", &[]);
    done.status = TaskStatus::Completed;
    write_tasks(&paths.tasks, &[done, task("t2", &["t1"])]).expect("tasks");

    let outcome = workflow.resume("art", None).expect("resume");

    assert_eq!(outcome.strategy, ResumeStrategy::Artifacts);
    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.state.completed_count(), 2);
    let requests = assistant.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].prompt.contains("- ID: t2"));
    assert!(llm.requests().is_empty());
    assert!(store.load("art").is_none());
}

#[test]
fn empty_session_directory_cannot_resume() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(&temp);
    let llm = ScriptedLlm::default();
    let assistant = ScriptedAssistant::default();
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");
    std::fs::create_dir_all(workflow.workspace().session("bare").dir).expect("mkdir");

    let err = workflow.resume("bare", None).expect_err("no artifacts");
    assert!(format!("{err:#}").contains("no checkpoint and no artifacts"));
    let err = workflow.resume("ghost", None).expect_err("unknown");
    assert!(format!("{err:#}").contains("not found"));
}

/// A PM failure halts the run; resuming retries the PM.
#[test]
fn failed_stage_halts_and_resume_retries() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = config(&temp);
    config.workflow.human_in_loop = true;
    let llm = ScriptedLlm::new(vec![Err(ProviderError::RateLimited)]);
    let assistant = ScriptedAssistant::default();
    let store = FileCheckpointStore::new(&config.data_root);
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");

    let failed = workflow.start("Build it", Some("retry"), None).expect("start");
    let RunStatus::Failed { error } = &failed.status else {
        panic!("expected failure, got {:?}", failed.status);
    };
    assert!(error.contains("rate limited"), "{error}");
    assert_eq!(failed.next, Some(GraphNode::Pm));
    assert_eq!(failed.state.retry_count, 1);
    assert_eq!(store.load("retry").expect("checkpoint").next, Some(GraphNode::Pm));

    llm.push(Ok(SAMPLE_PRD.to_string()));
    let resumed = workflow.resume("retry", None).expect("resume");
    assert_eq!(
        resumed.status,
        RunStatus::Interrupted {
            next: GraphNode::Architect
        }
    );
    assert_eq!(resumed.state.error, None);
    assert_eq!(resumed.state.retry_count, 0);
}

#[test]
fn duplicate_session_id_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(&temp);
    let llm = ScriptedLlm::default();
    let assistant = ScriptedAssistant::default();
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");
    std::fs::create_dir_all(workflow.workspace().session("dup").dir).expect("mkdir");

    let err = workflow.start("Build it", Some("dup"), None).expect_err("exists");
    assert!(format!("{err:#}").contains("already exists"));
    let err = workflow.start("   ", None, None).expect_err("empty");
    assert!(format!("{err:#}").contains("must not be empty"));
    assert!(llm.requests().is_empty());
}

#[test]
fn review_round_revises_prd_with_all_reviews() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = config(&temp);
    config.workflow.human_in_loop = true;
    let revised = format!("{SAMPLE_PRD}\n## Risks\nFile corruption.\n");
    let llm = ScriptedLlm::replying(&[
        SAMPLE_PRD,
        "product notes",
        "dev notes",
        "qa notes",
        revised.as_str(),
    ]);
    let assistant = ScriptedAssistant::default();
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");
    workflow.start("Build a todo CLI", Some("rev"), None).expect("start");

    let outcome = workflow.review("rev").expect("review");

    assert_eq!(
        outcome.status,
        RunStatus::Interrupted {
            next: GraphNode::Architect
        }
    );
    assert_eq!(outcome.state.prd_iteration, 2);
    assert!(outcome.state.prd_reviews.is_empty());
    let reviews = std::fs::read_to_string(workflow.workspace().session("rev").reviews)
        .expect("reviews file");
    assert!(reviews.contains("## QA Engineer Review"));
    let revision_prompt = &llm.requests()[4].prompt;
    assert!(revision_prompt.contains("qa notes"));
    assert!(revision_prompt.contains("product notes"));
    llm.assert_drained().expect("llm drained");
}

#[test]
fn status_and_list_report_sessions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = config(&temp);
    config.workflow.human_in_loop = true;
    let llm = ScriptedLlm::replying(&[SAMPLE_PRD]);
    let assistant = ScriptedAssistant::default();
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");
    workflow.start("Build it", Some("a1"), None).expect("start");
    write_text(&workflow.workspace().session("b2").prd, SAMPLE_PRD).expect("prd");

    let info = workflow.status("a1").expect("status").expect("present");
    assert_eq!(info.source, "checkpoint");
    assert_eq!(info.stage, Stage::Prd);
    assert_eq!(info.next, Some(GraphNode::Architect));
    assert_eq!(info.requirement, "Build it");

    let sessions = workflow.list().expect("list");
    let ids: Vec<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "b2"]);
    assert_eq!(sessions[1].source, "artifacts");
    assert!(workflow.status("nope").expect("status").is_none());
}

#[test]
fn step_limit_yields_interrupted_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = config(&temp);
    config.workflow.max_graph_steps = 2;
    let llm = ScriptedLlm::replying(&[SAMPLE_PRD, design_response(CHAIN_TASKS_JSON).as_str()]);
    let assistant = ok_runs(2);
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");

    let first = workflow.start("Build it", Some("lim"), None).expect("start");
    assert_eq!(
        first.status,
        RunStatus::Interrupted {
            next: GraphNode::Coder
        }
    );
    assert!(assistant.requests().is_empty());

    let second = workflow.resume("lim", None).expect("resume");
    assert_eq!(second.status, RunStatus::Completed);
    assert_eq!(second.state.completed_count(), 2);
}

#[test]
fn single_step_advances_one_node() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(&temp);
    let llm = ScriptedLlm::replying(&[SAMPLE_PRD]);
    let assistant = ScriptedAssistant::default();
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");
    let mut state = SessionState::new("one", "Build it");

    let result = workflow.step(&mut state, GraphNode::Pm).expect("step");

    assert_eq!(
        result,
        autodev::workflow::StepResult::Advanced {
            next: Some(GraphNode::Architect)
        }
    );
    assert_eq!(state.stage, Stage::Prd);
    assert_eq!(store.len("one"), 1);
}

/// Feedback on a PRD-only session reaches the architect that runs next.
#[test]
fn prd_session_feedback_reaches_architect_on_artifact_resume() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = config(&temp);
    let llm = ScriptedLlm::replying(&[design_response(CHAIN_TASKS_JSON).as_str()]);
    let assistant = ScriptedAssistant::default();
    let store = MemoryCheckpointStore::new();
    let workflow = Workflow::new(&config, &llm, &assistant, &store).expect("workflow");
    write_text(&workflow.workspace().session("prd").prd, SAMPLE_PRD).expect("prd");

    let outcome = workflow
        .resume("prd", Some("Use SQLite for storage"))
        .expect("resume");

    assert_eq!(outcome.strategy, ResumeStrategy::Artifacts);
    assert_eq!(
        outcome.status,
        RunStatus::Interrupted {
            next: GraphNode::Coder
        }
    );
    assert_eq!(outcome.state.stage, Stage::Design);
    assert_eq!(outcome.state.prd_feedback, None);
    assert_eq!(outcome.state.design_feedback, None);
    assert!(llm.requests()[0].prompt.contains("Use SQLite for storage"));
    assert!(assistant.requests().is_empty());
}
