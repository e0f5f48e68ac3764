//! End-to-end runs of the execution core against the simulated driver and a
//! scripted grounding client.

use std::time::Duration;

use handeye_hal::{SimDriver, SimJournal};
use handeye_perception::ScriptedGrounding;
use handeye_runtime::{ControllerConfig, Sandbox, SandboxConfig, TacticalController};
use handeye_types::{Action, ErrorKind, ExecutionReport, GoalError, SandboxState};

fn instant_controller(grounding: ScriptedGrounding, max_attempts: u32) -> (TacticalController, SimJournal) {
    let driver = SimDriver::new("sim");
    let journal = driver.journal();
    let config = ControllerConfig {
        max_attempts,
        verify_delay: Duration::ZERO,
        driver_faults_fatal: false,
    };
    (
        TacticalController::new(Box::new(driver), Box::new(grounding), config),
        journal,
    )
}

async fn run(
    grounding: ScriptedGrounding,
    config: SandboxConfig,
    script: &str,
) -> (ExecutionReport, SimJournal) {
    let (controller, journal) = instant_controller(grounding, 2);
    let sandbox = Sandbox::new(controller, config);
    let report = sandbox.execute(script).expect("fresh sandbox is idle").await;
    (report, journal)
}

#[tokio::test]
async fn scenario_a_single_goal_verified_first_time() {
    let (report, _) = run(
        ScriptedGrounding::new(),
        SandboxConfig::default(),
        "step('open app')",
    )
    .await;

    assert!(report.succeeded);
    assert_eq!(report.log, vec!["open app: true"]);
    assert_eq!(report.statistics.total_steps, 1);
    assert_eq!(report.statistics.total_retries, 0);
    assert_eq!(report.error, None);
    assert_eq!(report.state, SandboxState::Completed);
}

#[tokio::test]
async fn scenario_b_loop_with_one_failed_verification() {
    let grounding = ScriptedGrounding::new().then_verify(false);
    let (report, journal) = run(
        grounding,
        SandboxConfig::default(),
        "for i in 0..3: step('like post')",
    )
    .await;

    assert!(report.succeeded);
    assert_eq!(report.log, vec!["like post: true"; 3]);
    assert_eq!(report.statistics.total_steps, 3);
    assert_eq!(report.statistics.total_retries, 1);
    assert_eq!(journal.dispatched().len(), 4);
}

#[tokio::test]
async fn scenario_c_out_of_bounds_tap_never_reaches_the_driver() {
    let grounding = ScriptedGrounding::new().with_default_action(Action::tap(1.5, 0.5));
    let (report, journal) = run(grounding, SandboxConfig::default(), "step('like post')").await;

    assert!(!report.succeeded);
    match report.error {
        Some(ErrorKind::Safety(e)) => {
            assert_eq!(e.field, "tap.point.x");
            assert!((e.value - 1.5).abs() < f64::EPSILON);
        }
        other => panic!("expected SafetyError, got {other:?}"),
    }
    assert!(journal.dispatched().is_empty());
    assert_eq!(report.log, vec!["like post: false"]);
}

#[tokio::test]
async fn scenario_d_disallowed_capability_is_rejected_up_front() {
    let script = "\
step('open app')
f = open('/etc/passwd')
step('like post')
";
    let (report, journal) = run(ScriptedGrounding::new(), SandboxConfig::default(), script).await;

    assert!(!report.succeeded);
    assert!(matches!(
        report.error,
        Some(ErrorKind::SandboxViolation { line: 2, .. })
    ));
    assert!(report.log.is_empty());
    assert_eq!(report.statistics.total_steps, 0);
    assert!(journal.events().is_empty());
}

#[tokio::test]
async fn scenario_d_import_and_attribute_escape_routes() {
    for script in [
        "import os\nstep('a')",
        "from subprocess import run",
        "x = 'a'\nx.join(['b'])",
        "__import__('os')",
        "exec('step(1)')",
    ] {
        let (report, journal) =
            run(ScriptedGrounding::new(), SandboxConfig::default(), script).await;
        assert!(
            matches!(report.error, Some(ErrorKind::SandboxViolation { .. })),
            "{script:?} gave {:?}",
            report.error
        );
        assert!(journal.events().is_empty());
    }
}

#[tokio::test]
async fn scenario_e_verification_never_succeeds() {
    let grounding = ScriptedGrounding::new().with_default_verdict(false);
    let (mut controller, _) = instant_controller(grounding, 2);

    match controller.execute_goal("like post").await {
        Err(GoalError::MaxRetry(e)) => assert_eq!(e.attempts, 2),
        other => panic!("expected MaxRetryError, got {other:?}"),
    }
    assert_eq!(controller.statistics().total_failures, 1);
    assert_eq!(controller.statistics().total_retries, 1);
}

#[tokio::test]
async fn scenario_e_through_the_sandbox_with_abort_policy() {
    let grounding = ScriptedGrounding::new().with_default_verdict(false);
    let config = SandboxConfig {
        abort_on_exhausted_retries: true,
        ..SandboxConfig::default()
    };
    let (report, _) = run(grounding, config, "step('like post')\nstep('never')\n").await;

    assert!(!report.succeeded);
    assert!(matches!(report.error, Some(ErrorKind::MaxRetry(ref e)) if e.attempts == 2));
    assert_eq!(report.log, vec!["like post: false"]);
    assert_eq!(report.statistics.total_failures, 1);
    assert_eq!(report.statistics.total_steps, 1);
}

#[tokio::test]
async fn retries_grow_by_attempts_minus_one_for_any_budget() {
    for max_attempts in 1..=5 {
        let grounding = ScriptedGrounding::new().with_default_verdict(false);
        let (mut controller, journal) = instant_controller(grounding, max_attempts);
        let err = controller.execute_goal("unreachable").await.unwrap_err();

        assert!(matches!(err, GoalError::MaxRetry(ref e) if e.attempts == max_attempts));
        let stats = controller.statistics();
        assert_eq!(stats.total_retries, u64::from(max_attempts - 1));
        assert_eq!(stats.total_attempts, u64::from(max_attempts));
        assert_eq!(journal.dispatched().len(), max_attempts as usize);
    }
}

#[tokio::test]
async fn out_of_bounds_points_are_never_dispatched() {
    let bad = [
        (-0.001, 0.5),
        (1.001, 0.5),
        (0.5, -1.0),
        (0.5, 7.0),
        (f64::NAN, 0.5),
        (0.5, f64::NEG_INFINITY),
    ];
    for (x, y) in bad {
        let grounding = ScriptedGrounding::new().with_default_action(Action::tap(x, y));
        let (mut controller, journal) = instant_controller(grounding, 2);
        let err = controller.execute_goal("tap").await.unwrap_err();
        assert!(matches!(err, GoalError::Safety(_)), "({x}, {y})");
        assert!(journal.dispatched().is_empty(), "({x}, {y})");
    }
}

#[tokio::test]
async fn identical_runs_produce_identical_logs() {
    let script = "\
for i in range(4):
    ok = step(f'goal {i}')
    if not ok:
        log('retry later')
";
    let scripted = || {
        ScriptedGrounding::new()
            .then_verify(false)
            .then_verify(false)
            .then_verify(true)
            .then_verify(false)
    };

    let (first, _) = run(scripted(), SandboxConfig::default(), script).await;
    let (second, _) = run(scripted(), SandboxConfig::default(), script).await;

    assert!(first.succeeded);
    assert_eq!(first.log, second.log);
    assert_eq!(first.output, second.output);
    assert_eq!(first.log[0], "goal 0: false");
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_settle_aborts_the_script() {
    let (controller, journal) = {
        let driver = SimDriver::new("sim");
        let journal = driver.journal();
        let config = ControllerConfig {
            verify_delay: Duration::from_secs(30),
            ..ControllerConfig::default()
        };
        (
            TacticalController::new(
                Box::new(driver),
                Box::new(ScriptedGrounding::new()),
                config,
            ),
            journal,
        )
    };
    let sandbox = Sandbox::new(controller, SandboxConfig::default());
    let cancel = tokio_util::sync::CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let report = sandbox
        .execute_with_cancel("step('a')\nstep('b')\n", cancel)
        .expect("idle")
        .await;

    assert_eq!(report.error, Some(ErrorKind::Cancelled));
    assert_eq!(report.log, vec!["a: false"]);
    assert_eq!(journal.dispatched().len(), 1);
    assert!(matches!(sandbox.state(), SandboxState::Aborted(_)));
}
