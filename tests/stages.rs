mod support;

use std::path::Path;

use codesign_pipeline::report::RecordingSink;
use codesign_pipeline::stages::{
    NotarizeParams, NotarizeStage, SignParams, SignStage, StageExecutor, StageKind, StapleParams,
    StapleStage,
};
use codesign_pipeline::{InvocationResult, PipelineError, PipelineResult, ProcessInvoker};
use support::{ScriptedInvoker, api_key_fixture, artifacts};

const PROGRAM: &str = "/opt/rcodesign";

fn notarize_stage(key: &Path, staple: bool) -> NotarizeStage {
    NotarizeStage::new(NotarizeParams {
        api_key_file: Some(key.to_path_buf()),
        staple,
        ..NotarizeParams::default()
    })
}

#[test]
fn sign_rejects_multiple_artifacts_without_invoking() {
    let invoker = ScriptedInvoker::succeeding();
    let sink = RecordingSink::new();
    let executor = StageExecutor::new(Path::new(PROGRAM), &invoker, &sink);

    let err = executor
        .execute(
            &SignStage::new(SignParams::default()),
            &artifacts(&["a.app", "b.app"]),
            0,
        )
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::TooManyArtifacts {
            stage: StageKind::Sign,
            count: 2
        }
    ));
    assert!(err.is_precondition());
    assert!(invoker.calls().is_empty());
    assert!(sink.reports().is_empty());
}

#[test]
fn sign_failure_surfaces_exit_code_and_streams() {
    let invoker = ScriptedInvoker::new(|_| InvocationResult::new(3, "partial", "bad certificate"));
    let sink = RecordingSink::new();
    let executor = StageExecutor::new(Path::new(PROGRAM), &invoker, &sink);

    let err = executor
        .execute(
            &SignStage::new(SignParams::default()),
            &artifacts(&["App.app"]),
            0,
        )
        .unwrap_err();

    match err {
        PipelineError::SubprocessFailed {
            stage,
            artifact,
            exit_status,
            stdout,
            stderr,
        } => {
            assert_eq!(stage, StageKind::Sign);
            assert_eq!(artifact, "App.app");
            assert_eq!(exit_status, 3);
            assert_eq!(stdout, "partial");
            assert_eq!(stderr, "bad certificate");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(invoker.calls().len(), 1);
}

#[test]
fn notarize_without_key_file_fails_before_invoking() {
    let invoker = ScriptedInvoker::succeeding();
    let sink = RecordingSink::new();
    let executor = StageExecutor::new(Path::new(PROGRAM), &invoker, &sink);

    let err = executor
        .execute(
            &NotarizeStage::new(NotarizeParams::default()),
            &artifacts(&["a.dmg", "b.dmg"]),
            0,
        )
        .unwrap_err();

    assert!(matches!(err, PipelineError::MissingCredential { .. }));
    assert!(invoker.calls().is_empty());
}

#[test]
fn notarize_aggregates_only_failed_artifacts_and_reports_all() {
    let (_temp, key) = api_key_fixture();
    let invoker = ScriptedInvoker::failing_for("two.dmg");
    let sink = RecordingSink::new();
    let executor = StageExecutor::new(Path::new(PROGRAM), &invoker, &sink);

    let err = executor
        .execute(
            &notarize_stage(&key, false),
            &artifacts(&["one.dmg", "two.dmg", "three.dmg"]),
            0,
        )
        .unwrap_err();

    match &err {
        PipelineError::StageFailed { stage, failed } => {
            assert_eq!(*stage, StageKind::Notarize);
            assert_eq!(failed, &vec!["two.dmg".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("two.dmg"));
    assert!(!err.to_string().contains("one.dmg"));
    assert_eq!(invoker.calls().len(), 3);

    let reports = sink.reports_for(StageKind::Notarize);
    assert_eq!(reports.len(), 3);
    let names: Vec<&str> = reports.iter().map(|r| r.artifact.as_str()).collect();
    assert_eq!(names, vec!["one.dmg", "two.dmg", "three.dmg"]);
    assert!(reports[0].success);
    assert!(reports[2].success);

    let failed = &reports[1];
    assert!(!failed.success);
    assert_eq!(failed.exit_status, Some(1));
    assert_eq!(failed.stdout, "submission id 42");
    assert_eq!(failed.stderr, "two.dmg rejected");
    assert!(failed.body().contains(&"exit code: 1".to_string()));
}

#[test]
fn notarize_names_every_failed_artifact() {
    let (_temp, key) = api_key_fixture();
    let invoker = ScriptedInvoker::new(|args| {
        let code = if args.last().is_some_and(|a| a.ends_with(".pkg")) { 1 } else { 0 };
        InvocationResult::new(code, "", "")
    });
    let sink = RecordingSink::new();
    let executor = StageExecutor::new(Path::new(PROGRAM), &invoker, &sink);

    let err = executor
        .execute(
            &notarize_stage(&key, false),
            &artifacts(&["a.pkg", "b.dmg", "c.pkg"]),
            2,
        )
        .unwrap_err();

    match err {
        PipelineError::StageFailed { failed, .. } => {
            assert_eq!(failed, vec!["a.pkg".to_string(), "c.pkg".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn notarize_success_returns_outcomes_in_order() {
    let (_temp, key) = api_key_fixture();
    let invoker = ScriptedInvoker::succeeding();
    let sink = RecordingSink::new();
    let executor = StageExecutor::new(Path::new(PROGRAM), &invoker, &sink);

    let outcomes = executor
        .execute(
            &notarize_stage(&key, true),
            &artifacts(&["x.dmg", "y.dmg"]),
            1,
        )
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].artifact, "x.dmg");
    assert_eq!(outcomes[1].artifact, "y.dmg");
    assert!(outcomes.iter().all(|o| o.success));
    for call in invoker.calls_for("notary-submit") {
        assert!(call.contains(&"--staple".to_string()));
        assert!(!call.contains(&"--wait".to_string()));
    }
}

struct UnlaunchableInvoker;

impl ProcessInvoker for UnlaunchableInvoker {
    fn invoke(&self, program: &Path, _args: &[String]) -> PipelineResult<InvocationResult> {
        Err(PipelineError::Spawn {
            program: program.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        })
    }
}

#[test]
fn launch_failures_are_carried_per_artifact() {
    let sink = RecordingSink::new();
    let executor = StageExecutor::new(Path::new(PROGRAM), &UnlaunchableInvoker, &sink);

    let err = executor
        .execute(
            &StapleStage::new(StapleParams::default()),
            &artifacts(&["a.dmg", "b.dmg"]),
            0,
        )
        .unwrap_err();

    assert!(matches!(err, PipelineError::StageFailed { ref failed, .. } if failed.len() == 2));
    let reports = sink.reports();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.exit_status.is_none()));
    assert!(
        reports[0]
            .detail
            .as_deref()
            .is_some_and(|d| d.contains("/opt/rcodesign"))
    );
}

#[test]
fn sign_launch_failure_is_reported_before_failing() {
    let sink = RecordingSink::new();
    let executor = StageExecutor::new(Path::new(PROGRAM), &UnlaunchableInvoker, &sink);

    let err = executor
        .execute(
            &SignStage::new(SignParams::default()),
            &artifacts(&["App.app"]),
            0,
        )
        .unwrap_err();

    assert!(matches!(err, PipelineError::Spawn { .. }));
    let reports = sink.reports_for(StageKind::Sign);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].artifact, "App.app");
    assert!(!reports[0].success);
    assert_eq!(reports[0].exit_status, None);
    assert!(
        reports[0]
            .detail
            .as_deref()
            .is_some_and(|d| d.contains("no such file"))
    );
}

#[test]
fn multi_artifact_stage_rejects_empty_input() {
    let invoker = ScriptedInvoker::succeeding();
    let sink = RecordingSink::new();
    let executor = StageExecutor::new(Path::new(PROGRAM), &invoker, &sink);

    let err = executor
        .execute(&StapleStage::new(StapleParams::default()), &[], 0)
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::NoArtifacts {
            stage: StageKind::Staple
        }
    ));
}
