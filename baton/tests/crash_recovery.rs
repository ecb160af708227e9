//! Crash-safety: an interrupted session is recovered explicitly and the
//! project resumes exactly where the last checkpoint left it.

use std::fs;

use baton::core::types::ToolCall;
use baton::io::checkpoint::CheckpointManager;
use baton::io::config::BatonConfig;
use baton::io::init::BatonPaths;
use baton::io::journal::{EntryKind, Journal};
use baton::io::registry_store::{load_registry, write_registry};
use baton::orchestrator::{Orchestrator, Plan, plan_next};
use baton::recovery::revert_project;
use baton::test_support::{ScriptedAgent, ScriptedTurn, ScriptedVerifier, TestRepo, registry_with};

fn initialized_project() -> (TestRepo, BatonPaths) {
    let repo = TestRepo::new().expect("repo");
    let paths = repo
        .init_project(Some(&registry_with(&[("add todo", false, 0), ("delete todo", false, 0)])))
        .expect("project");
    fs::write(repo.root().join("init.sh"), "true\n").expect("init.sh");
    repo.git(&["add", "-A"]).expect("git add");
    repo.git(&["commit", "--quiet", "-m", "initializer output"])
        .expect("git commit");
    (repo, paths)
}

#[test]
fn interrupted_session_resumes_on_the_same_task() {
    let (repo, paths) = initialized_project();
    let config = BatonConfig::default();
    let agent = ScriptedAgent::new(vec![ScriptedTurn::done(
        "add todo works",
        vec![ToolCall::MarkPassed {
            task_id: "T1".to_string(),
        }],
    )]);
    let verifier = ScriptedVerifier::red_green();
    let orchestrator = Orchestrator::new(&paths, &config, &agent, &verifier);
    orchestrator.step().expect("first session");

    let planned = plan_next(&paths, &config).expect("plan");
    let Plan::Code(next) = &planned else {
        panic!("expected a coder plan, got {planned:?}");
    };
    assert_eq!(next.id, "T2");
    let checkpoint = CheckpointManager::new(repo.root())
        .head()
        .expect("head")
        .expect("checkpoint");

    // Session 2 starts, records its attempt and writes half a feature, then the process dies.
    let mut registry = load_registry(&paths.registry_path).expect("registry");
    registry.record_attempt("T2").expect("attempt");
    write_registry(&paths.registry_path, &registry).expect("write registry");
    fs::create_dir_all(repo.root().join("src")).expect("src");
    fs::write(repo.root().join("src/delete.js"), "half").expect("partial work");

    let err = match orchestrator.step() {
        Ok(result) => panic!("dirty tree must be refused, got {result:?}"),
        Err(err) => err,
    };
    let message = format!("{err:#}");
    assert!(message.contains(&format!("baton revert {}", checkpoint.short_id())));

    revert_project(&paths, &checkpoint.commit_id).expect("revert");

    assert!(!repo.root().join("src/delete.js").exists());
    let registry = load_registry(&paths.registry_path).expect("registry");
    assert!(registry.get("T1").expect("T1").passes);
    assert_eq!(registry.get("T2").expect("T2").attempts, 1);
    match plan_next(&paths, &config).expect("plan") {
        Plan::Code(task) => assert_eq!(task.id, next.id),
        other => panic!("expected the same task, got {other:?}"),
    }
    let entries = Journal::new(&paths.journal_path).entries().expect("journal");
    assert_eq!(entries.last().map(|entry| entry.kind), Some(EntryKind::Recovery));
}

#[test]
fn aborted_session_is_checkpointed_and_the_next_one_retries() {
    let (repo, paths) = initialized_project();
    let config = BatonConfig::default();
    let agent = ScriptedAgent::new(vec![
        ScriptedTurn::working(
            "starting",
            vec![ToolCall::WriteFile {
                path: "src/add.js".to_string(),
                contents: "partial".to_string(),
            }],
        ),
        ScriptedTurn::Fail("agent process killed".to_string()),
        ScriptedTurn::done(
            "add todo works",
            vec![ToolCall::MarkPassed {
                task_id: "T1".to_string(),
            }],
        ),
    ]);
    let verifier = ScriptedVerifier::red_green();
    let orchestrator = Orchestrator::new(&paths, &config, &agent, &verifier);

    orchestrator.step().expect("aborted session");
    assert!(!repo.root().join("src/add.js").exists());
    repo.git(&["diff", "--quiet", "HEAD"]).expect("clean after abort");

    orchestrator.step().expect("retry session");

    let task = load_registry(&paths.registry_path)
        .expect("registry")
        .get("T1")
        .cloned()
        .expect("T1");
    assert!(task.passes);
    assert_eq!(task.attempts, 2);
    let indexes: Vec<u32> = Journal::new(&paths.journal_path)
        .entries()
        .expect("journal")
        .iter()
        .map(|entry| entry.session_index)
        .collect();
    assert_eq!(indexes, vec![1, 2]);
}
