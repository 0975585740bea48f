//! The nightly pipeline: plan → implement → validate → repair → document →
//! publish.
//!
//! Stage transitions live here; everything with side effects sits behind the
//! `ModelClient`, `ValidationRunner`, and `Notifier` seams so the whole
//! machine runs against scripted collaborators in tests.

use std::path::Path;

use anyhow::Result;
use chrono::{Local, Utc};
use tracing::{info, instrument, warn};

use crate::core::artifact::parse_artifacts;
use crate::core::conversation::Conversation;
use crate::core::types::{RunStatus, Stage, ValidationResult};
use crate::io::config::Config;
use crate::io::git::Git;
use crate::io::memory::MemoryStore;
use crate::io::model::ModelClient;
use crate::io::notify::Notifier;
use crate::io::run_log::{RunLog, RunSummary, generate_run_id};
use crate::io::validation::ValidationRunner;
use crate::io::workspace::{apply_artifacts, ensure_ignore_rules, project_listing};
use crate::prompts;
use crate::session::{Session, SessionError};

const MAX_LISTING_ENTRIES: usize = 400;

/// Date-scoped branch name for a run starting now: `<prefix>/<YYYY-MM-DD>`,
/// dated in local time.
pub fn branch_name(config: &Config) -> String {
    format!("{}/{}", config.branch.prefix, Local::now().format("%Y-%m-%d"))
}

/// Outcome of a run that reached publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: String,
    pub branch: String,
    pub status: RunStatus,
    /// Paths written this run, in order of first appearance.
    pub files: Vec<String>,
    pub repair_attempts: u32,
    pub pushed: bool,
}

/// Execute one full nightly run in `root`.
///
/// With `dry_run` the working tree is still committed on the dated branch, but
/// nothing is pushed.
///
/// Errors out only on a non-recoverable model-service failure (distinguishable
/// as [`SessionError`]) or on broken local plumbing (git, filesystem). Failing
/// tests never error: they drive the repair loop and the terminal status.
#[instrument(skip_all, fields(root = %root.display(), dry_run))]
pub fn run_pipeline<M, V, N>(
    root: &Path,
    config: &Config,
    model: &M,
    validation: &V,
    notifier: &N,
    dry_run: bool,
) -> Result<RunReport>
where
    M: ModelClient,
    V: ValidationRunner,
    N: Notifier,
{
    let started_at = Utc::now();
    let run_id = generate_run_id();
    let branch = branch_name(config);
    info!(run_id = %run_id, branch = %branch, "run starting");

    let git = Git::new(root);
    git.ensure_branch(&branch)?;
    ensure_ignore_rules(root)?;
    let run_log = RunLog::create(root, &run_id)?;

    let memory = MemoryStore::new(root, config.memory.max_turns);
    let seed = if config.memory.enabled {
        let turns = memory.load().unwrap_or_else(|err| {
            warn!(err = %err, "could not load memory, starting fresh");
            Vec::new()
        });
        Conversation::from_turns(turns)
    } else {
        Conversation::new()
    };

    let mut session = Session::new(model, config.retry.policy(), seed);
    let outcome = drive_stages(root, config, &mut session, validation, &run_log);

    if config.memory.enabled
        && let Err(err) = memory.save(session.conversation())
    {
        warn!(err = %err, "could not save memory");
    }

    let stages = match outcome {
        Ok(stages) => stages,
        Err(err) => {
            if let Some(session_err) = err.downcast_ref::<SessionError>() {
                let kind = match session_err {
                    SessionError::Fatal { .. } => "misconfigured or rejected",
                    SessionError::Exhausted { .. } => "service unavailable",
                };
                send_notification(
                    notifier,
                    &format!("nightshift on {branch}: run aborted, {kind}: {session_err}"),
                );
            }
            return Err(err);
        }
    };

    // PUBLISH
    info!(stage = Stage::Publish.as_str(), status = ?stages.status, "publishing");
    let mut committed = false;
    let mut pushed = false;
    if stages.status == RunStatus::RepairFailed && !config.publish.push_on_repair_failure {
        info!("repair failed and pushing is disabled, leaving branch local");
    } else {
        let message = format!("nightshift: {} (run {run_id})", stages.status.describe());
        committed = git.commit_all(&message)?;
        if committed && dry_run {
            info!("dry run, skipping push");
        } else if committed {
            git.push(&config.branch.remote, &branch)?;
            pushed = true;
        }
    }

    // A run that committed nothing is "nothing to commit", except the two
    // statuses that are informative on their own.
    let status = match (stages.status, committed) {
        (RunStatus::RepairFailed, _) => RunStatus::RepairFailed,
        (RunStatus::NoFiles, _) => RunStatus::NoFiles,
        (status, true) => status,
        (_, false) => RunStatus::NoChanges,
    };

    let report = RunReport {
        run_id: run_id.clone(),
        branch: branch.clone(),
        status,
        files: stages.files,
        repair_attempts: stages.repair_attempts,
        pushed,
    };

    let summary = RunSummary {
        run_id,
        branch,
        status: report.status,
        files: report.files.clone(),
        repair_attempts: report.repair_attempts,
        pushed: report.pushed,
        started_at: started_at.to_rfc3339(),
        finished_at: Utc::now().to_rfc3339(),
    };
    if let Err(err) = run_log.write_summary(&summary) {
        warn!(err = %err, "could not write run summary");
    }

    send_notification(notifier, &terminal_message(&report));
    info!(status = ?report.status, pushed = report.pushed, "run finished");
    Ok(report)
}

struct StageOutcome {
    status: RunStatus,
    files: Vec<String>,
    repair_attempts: u32,
}

fn drive_stages<M: ModelClient, V: ValidationRunner>(
    root: &Path,
    config: &Config,
    session: &mut Session<'_, M>,
    validation: &V,
    run_log: &RunLog,
) -> Result<StageOutcome> {
    // PLAN: a missing plan artifact is suboptimal, never fatal.
    let listing = project_listing(root, MAX_LISTING_ENTRIES)?;
    let plan_files = exchange(root, session, run_log, Stage::Plan, 0, &prompts::plan(&listing))?;
    if plan_files.is_empty() {
        info!("no plan artifact produced, continuing");
    }

    // IMPLEMENT
    let mut files = exchange(
        root,
        session,
        run_log,
        Stage::Implement,
        0,
        &prompts::implement(),
    )?;

    let mut repair_attempts = 0u32;
    let status = if files.is_empty() {
        info!("no implementation files, skipping validation");
        RunStatus::NoFiles
    } else {
        // VALIDATE / REPAIR
        let mut result = run_validation(validation, run_log, 0)?;
        if result.passed {
            RunStatus::Success
        } else {
            let mut repaired = false;
            while repair_attempts < config.repair.max_attempts {
                repair_attempts += 1;
                info!(
                    attempt = repair_attempts,
                    bound = config.repair.max_attempts,
                    "repair attempt"
                );
                let prompt = prompts::repair(&result.log, config.repair.failure_log_limit_bytes);
                let fixed = exchange(root, session, run_log, Stage::Repair, repair_attempts, &prompt)?;
                merge_paths(&mut files, fixed);
                result = run_validation(validation, run_log, repair_attempts)?;
                if result.passed {
                    repaired = true;
                    break;
                }
            }
            if repaired {
                RunStatus::Repaired
            } else {
                warn!("repair attempts exhausted, flagging for review");
                RunStatus::RepairFailed
            }
        }
    };

    // DOCUMENT: always runs, outcome never changes the status.
    let doc_files = exchange(
        root,
        session,
        run_log,
        Stage::Document,
        0,
        &prompts::document(&files),
    )?;
    merge_paths(&mut files, doc_files);

    Ok(StageOutcome {
        status,
        files,
        repair_attempts,
    })
}

/// One conversational exchange: send the stage prompt, transcribe the reply,
/// extract artifacts, and write them to the working tree.
fn exchange<M: ModelClient>(
    root: &Path,
    session: &mut Session<'_, M>,
    run_log: &RunLog,
    stage: Stage,
    round: u32,
    prompt: &str,
) -> Result<Vec<String>> {
    info!(stage = stage.as_str(), round, "sending stage prompt");
    let reply = session.send(prompt).map_err(anyhow::Error::new)?;
    if let Err(err) = run_log.write_stage_response(stage, round, &reply) {
        warn!(stage = stage.as_str(), err = %err, "could not write transcript");
    }
    let artifacts = parse_artifacts(&reply);
    let written = apply_artifacts(root, &artifacts)?;
    info!(stage = stage.as_str(), files = written.len(), "stage complete");
    Ok(written)
}

fn run_validation<V: ValidationRunner>(
    validation: &V,
    run_log: &RunLog,
    round: u32,
) -> Result<ValidationResult> {
    let result = validation.run()?;
    if let Err(err) = run_log.write_validation_log(round, &result.log) {
        warn!(err = %err, "could not write validation log");
    }
    info!(round, passed = result.passed, "validation finished");
    Ok(result)
}

fn merge_paths(files: &mut Vec<String>, additions: Vec<String>) {
    for path in additions {
        if !files.contains(&path) {
            files.push(path);
        }
    }
}

fn terminal_message(report: &RunReport) -> String {
    let mut details = vec![format!("{} file(s)", report.files.len())];
    if report.repair_attempts > 0 {
        details.push(format!("{} repair attempt(s)", report.repair_attempts));
    }
    details.push(if report.pushed {
        "pushed".to_string()
    } else {
        "not pushed".to_string()
    });
    format!(
        "nightshift on {}: {} ({})",
        report.branch,
        report.status.describe(),
        details.join(", ")
    )
}

fn send_notification<N: Notifier>(notifier: &N, message: &str) {
    // Best-effort by contract: a lost message never fails the run.
    if let Err(err) = notifier.notify(message) {
        warn!(err = %err, "notification delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::{PublishConfig, RepairConfig};
    use crate::io::model::ModelError;
    use crate::test_support::{
        RecordingNotifier, ScriptedModel, ScriptedValidation, TestRepo, file_block,
    };

    fn test_config() -> Config {
        let mut config = Config::default();
        config.retry.rate_limit_wait_secs = 0;
        config.retry.rate_limit_increment_secs = 0;
        config.retry.transient_wait_secs = 0;
        config
    }

    fn passing() -> ValidationResult {
        ValidationResult {
            passed: true,
            log: "all good".to_string(),
        }
    }

    fn failing() -> ValidationResult {
        ValidationResult {
            passed: false,
            log: "assert 1 == 2".to_string(),
        }
    }

    #[test]
    fn empty_implementation_skips_validation_and_repair() {
        let repo = TestRepo::with_remote().expect("repo");
        let model = ScriptedModel::new(vec![
            Ok("no plan tonight".to_string()),
            Ok("nothing to implement".to_string()),
            Ok("nothing to document".to_string()),
        ]);
        let validation = ScriptedValidation::new(Vec::new());
        let notifier = RecordingNotifier::new();

        let report = run_pipeline(
            repo.root(),
            &test_config(),
            &model,
            &validation,
            &notifier,
            false,
        )
        .expect("run");

        assert_eq!(validation.calls(), 0);
        assert_eq!(model.calls(), 3);
        assert_eq!(report.status, RunStatus::NoFiles);
        assert!(report.files.is_empty());
        assert_eq!(notifier.messages().len(), 1);
    }

    #[test]
    fn no_files_status_survives_a_noop_publish() {
        let repo = TestRepo::new().expect("repo");
        // Pre-commit the scaffolding so the publish step finds a clean tree.
        ensure_ignore_rules(repo.root()).expect("ignore rules");
        let git = Git::new(repo.root());
        git.commit_all("scaffolding").expect("commit");

        let model = ScriptedModel::new(vec![
            Ok("plan".to_string()),
            Ok("nothing to implement".to_string()),
            Ok("docs".to_string()),
        ]);
        let validation = ScriptedValidation::new(Vec::new());
        let notifier = RecordingNotifier::new();

        let report = run_pipeline(
            repo.root(),
            &test_config(),
            &model,
            &validation,
            &notifier,
            false,
        )
        .expect("run");

        assert_eq!(report.status, RunStatus::NoFiles);
        assert!(!report.pushed);
        assert!(notifier.messages()[0].contains("no implementation files"));
    }

    #[test]
    fn dry_run_commits_locally_but_never_pushes() {
        let repo = TestRepo::with_remote().expect("repo");
        let model = ScriptedModel::new(vec![
            Ok("plan".to_string()),
            Ok(file_block("src/greet.py", "def greet():\n    return 'hi'")),
            Ok("docs".to_string()),
        ]);
        let validation = ScriptedValidation::new(vec![passing()]);
        let notifier = RecordingNotifier::new();

        let report = run_pipeline(
            repo.root(),
            &test_config(),
            &model,
            &validation,
            &notifier,
            true,
        )
        .expect("run");

        assert_eq!(report.status, RunStatus::Success);
        assert!(!report.pushed);
        assert!(!repo.remote_branch_exists(&report.branch).expect("remote"));
        // The commit still happened on the local branch.
        assert!(!Git::new(repo.root()).has_staged_changes().expect("status"));
        assert!(notifier.messages()[0].contains("not pushed"));
    }

    #[test]
    fn passing_validation_publishes_success() {
        let repo = TestRepo::with_remote().expect("repo");
        let model = ScriptedModel::new(vec![
            Ok(file_block("PLAN.md", "tonight: add greeting")),
            Ok(file_block("src/greet.py", "def greet():\n    return 'hi'")),
            Ok("docs are fine".to_string()),
        ]);
        let validation = ScriptedValidation::new(vec![passing()]);
        let notifier = RecordingNotifier::new();

        let report = run_pipeline(
            repo.root(),
            &test_config(),
            &model,
            &validation,
            &notifier,
            false,
        )
        .expect("run");

        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.files, vec!["src/greet.py".to_string()]);
        assert!(report.pushed);
        assert!(repo.root().join("src/greet.py").is_file());
        assert!(repo.remote_branch_exists(&report.branch).expect("remote"));

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains(&report.branch));
        assert!(messages[0].contains("validation passed"));
    }

    #[test]
    fn repair_loop_is_bounded_and_flags_for_review() {
        let repo = TestRepo::with_remote().expect("repo");
        let mut config = test_config();
        config.repair = RepairConfig {
            max_attempts: 2,
            ..RepairConfig::default()
        };

        let model = ScriptedModel::new(vec![
            Ok("plan".to_string()),
            Ok(file_block("src/broken.py", "raise Exception")),
            Ok(file_block("src/broken.py", "still broken")),
            Ok(file_block("src/broken.py", "broken again")),
            Ok("docs".to_string()),
        ]);
        let validation = ScriptedValidation::new(vec![failing(), failing(), failing()]);
        let notifier = RecordingNotifier::new();

        let report =
            run_pipeline(repo.root(), &config, &model, &validation, &notifier, false)
                .expect("run");

        // Initial validation plus one rerun per bounded repair attempt.
        assert_eq!(validation.calls(), 3);
        assert_eq!(report.repair_attempts, 2);
        assert_eq!(report.status, RunStatus::RepairFailed);
        assert!(report.pushed, "default policy pushes for review");
        assert!(notifier.messages()[0].contains("human review"));
    }

    #[test]
    fn failed_validation_then_repair_reports_repaired() {
        let repo = TestRepo::with_remote().expect("repo");
        let model = ScriptedModel::new(vec![
            Ok("plan".to_string()),
            Ok(file_block("src/a.py", "broken")),
            Ok(file_block("src/a.py", "fixed")),
            Ok("docs".to_string()),
        ]);
        let validation = ScriptedValidation::new(vec![failing(), passing()]);
        let notifier = RecordingNotifier::new();

        let report = run_pipeline(
            repo.root(),
            &test_config(),
            &model,
            &validation,
            &notifier,
            false,
        )
        .expect("run");

        assert_eq!(report.status, RunStatus::Repaired);
        assert_eq!(report.repair_attempts, 1);
        let body = std::fs::read_to_string(repo.root().join("src/a.py")).expect("read");
        assert_eq!(body, "fixed");
    }

    #[test]
    fn repair_failure_push_can_be_disabled() {
        let repo = TestRepo::new().expect("repo");
        let mut config = test_config();
        config.repair = RepairConfig {
            max_attempts: 1,
            ..RepairConfig::default()
        };
        config.publish = PublishConfig {
            push_on_repair_failure: false,
        };

        let model = ScriptedModel::new(vec![
            Ok("plan".to_string()),
            Ok(file_block("src/a.py", "broken")),
            Ok(file_block("src/a.py", "still broken")),
            Ok("docs".to_string()),
        ]);
        let validation = ScriptedValidation::new(vec![failing(), failing()]);
        let notifier = RecordingNotifier::new();

        let report =
            run_pipeline(repo.root(), &config, &model, &validation, &notifier, false)
                .expect("run");

        assert_eq!(report.status, RunStatus::RepairFailed);
        assert!(!report.pushed);
        assert!(notifier.messages()[0].contains("not pushed"));
    }

    #[test]
    fn fatal_error_aborts_with_failure_notification() {
        let repo = TestRepo::new().expect("repo");
        let model = ScriptedModel::always(ModelError::Fatal {
            reason: "invalid api key".to_string(),
        });
        let validation = ScriptedValidation::new(Vec::new());
        let notifier = RecordingNotifier::new();

        let err = run_pipeline(
            repo.root(),
            &test_config(),
            &model,
            &validation,
            &notifier,
            false,
        )
        .expect_err("abort");

        assert!(err.downcast_ref::<SessionError>().is_some());
        assert_eq!(model.calls(), 1);
        assert_eq!(validation.calls(), 0);

        let messages = notifier.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("aborted"));
        assert!(messages[0].contains("invalid api key"));
    }

    #[test]
    fn exhaustion_notification_mentions_unavailability() {
        let repo = TestRepo::new().expect("repo");
        let mut config = test_config();
        config.retry.max_attempts = 2;

        let model = ScriptedModel::always(ModelError::RateLimited {
            reason: "quota exceeded".to_string(),
        });
        let validation = ScriptedValidation::new(Vec::new());
        let notifier = RecordingNotifier::new();

        let err = run_pipeline(repo.root(), &config, &model, &validation, &notifier, false)
            .expect_err("abort");

        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::Exhausted { attempts: 2, .. })
        ));
        assert!(notifier.messages()[0].contains("service unavailable"));
    }

    #[test]
    fn memory_carries_the_conversation_tail_across_runs() {
        let repo = TestRepo::with_remote().expect("repo");
        let mut config = test_config();
        config.memory.enabled = true;

        let model = ScriptedModel::new(vec![
            Ok("plan".to_string()),
            Ok("nothing".to_string()),
            Ok("docs".to_string()),
        ]);
        let validation = ScriptedValidation::new(Vec::new());
        let notifier = RecordingNotifier::new();

        run_pipeline(repo.root(), &config, &model, &validation, &notifier, false)
            .expect("run");

        let memory = MemoryStore::new(repo.root(), 12);
        let turns = memory.load().expect("load");
        assert!(!turns.is_empty());
        assert!(turns.iter().any(|t| t.text == "plan"));
    }

    #[test]
    fn memory_is_off_by_default() {
        let repo = TestRepo::with_remote().expect("repo");
        let model = ScriptedModel::new(vec![
            Ok("plan".to_string()),
            Ok("nothing".to_string()),
            Ok("docs".to_string()),
        ]);
        let validation = ScriptedValidation::new(Vec::new());
        let notifier = RecordingNotifier::new();

        run_pipeline(
            repo.root(),
            &test_config(),
            &model,
            &validation,
            &notifier,
            false,
        )
        .expect("run");

        assert!(!repo.root().join(".nightshift/memory.json").exists());
    }
}
