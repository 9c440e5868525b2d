use std::sync::Arc;
use std::time::Duration;

use runpad::backend::{ExecutionBackend, ExecutionFault, InitError};
use runpad::controller::{BackendKind, ControllerError, RunOutcome};
use runpad::types::{ExecutionResult, OutputLine, RunStatus};
use tokio::sync::Notify;

use super::{FakeInterpreter, FakeRuntime, Harness, captured};

const INIT_FAILURE: &str =
    "Error: Failed to initialize Python runtime. Please reload and try again.";

fn completed(outcome: RunOutcome) -> runpad::controller::RunReport {
    match outcome {
        RunOutcome::Completed(report) => report,
        other => panic!("expected a completed run, got {other:?}"),
    }
}

#[tokio::test]
async fn test_first_run_bootstraps_then_executes() {
    let startup = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRuntime::new()
            .gated_startup(startup.clone())
            .gated_runs(gate.clone())
            .returning(captured("3\n", "", None)),
        FakeInterpreter::new(),
    );
    h.set_source("x = 1+2\nprint(x)");
    assert_eq!(h.controller.status(), RunStatus::Idle);

    let controller = h.controller.clone();
    let task = tokio::spawn(async move { controller.run().await });

    h.wait_for(RunStatus::Initializing).await;
    assert_eq!(h.controller.status_text(), "Loading Python...");
    assert!(h.controller.is_busy());
    startup.notify_one();

    h.wait_for(RunStatus::Running).await;
    assert_eq!(h.controller.status_text(), "Running Python...");
    gate.notify_one();

    let report = completed(task.await.unwrap());
    assert!(!report.faulted);
    assert_eq!(report.backend, BackendKind::ManagedRuntime);
    assert_eq!(report.lines, vec![OutputLine::success("3")]);

    assert_eq!(h.controller.status(), RunStatus::Ready);
    assert_eq!(h.output(), vec![OutputLine::success("3")]);
    assert_eq!(h.runtime().bootstrap_count(), 1);
    assert_eq!(h.runtime().executed(), vec!["x = 1+2\nprint(x)"]);
}

#[tokio::test]
async fn test_second_run_reuses_bootstrap() {
    let h = Harness::new(
        FakeRuntime::new().returning(captured("ok\n", "", None)),
        FakeInterpreter::new(),
    );
    h.set_source("print('ok')");

    completed(h.controller.run().await);
    completed(h.controller.run().await);

    assert_eq!(h.runtime().bootstrap_count(), 1);
    assert_eq!(h.runtime().executed().len(), 2);
}

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());
    h.set_source("print(1)");
    completed(h.controller.run().await);
    assert_eq!(h.controller.status(), RunStatus::Ready);

    h.set_source("   \n\t  ");
    assert_eq!(h.controller.run().await, RunOutcome::EmptyInput);

    assert_eq!(h.controller.status(), RunStatus::Ready);
    assert_eq!(
        h.output(),
        vec![OutputLine::error("Please enter some Python code to run.")]
    );
    assert_eq!(h.runtime().executed().len(), 1);
}

#[tokio::test]
async fn test_empty_input_does_not_bootstrap() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());
    h.set_source("");

    assert_eq!(h.controller.run().await, RunOutcome::EmptyInput);
    assert_eq!(h.controller.status(), RunStatus::Idle);
    assert_eq!(h.runtime().bootstrap_count(), 0);
}

#[tokio::test]
async fn test_raised_exception_renders_error_lines() {
    let traceback = "Traceback (most recent call last):\n  File \"<exec>\", line 1, in <module>\nNameError: name 'y' is not defined";
    let h = Harness::new(
        FakeRuntime::new().returning(ExecutionResult::Fault(ExecutionFault::Raised(
            traceback.to_owned(),
        ))),
        FakeInterpreter::new(),
    );
    h.set_source("print(y)");

    let report = completed(h.controller.run().await);
    assert!(report.faulted);

    let output = h.output();
    assert_eq!(output.len(), 3);
    assert!(output.iter().all(OutputLine::is_error));
    assert!(output.last().unwrap().text().contains("NameError"));
    assert_eq!(h.controller.status(), RunStatus::Ready);
}

#[tokio::test]
async fn test_stderr_takes_precedence_over_stdout() {
    let h = Harness::new(
        FakeRuntime::new().returning(captured("printed\n", "warning: careful\n", None)),
        FakeInterpreter::new(),
    );
    h.set_source("import sys");

    let report = completed(h.controller.run().await);

    // Error text on stderr is not a fault
    assert!(!report.faulted);
    assert_eq!(h.output(), vec![OutputLine::error("warning: careful")]);
}

#[tokio::test]
async fn test_trailing_value_rendered_without_stdout() {
    let h = Harness::new(
        FakeRuntime::new().returning(captured("", "", Some("42"))),
        FakeInterpreter::new(),
    );
    h.set_source("6 * 7");

    completed(h.controller.run().await);
    assert_eq!(h.output(), vec![OutputLine::success("42")]);
}

#[tokio::test]
async fn test_silent_run_reports_no_output() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());
    h.set_source("x = 1");

    completed(h.controller.run().await);
    assert_eq!(
        h.output_texts(),
        vec!["Code executed successfully (no output)"]
    );
}

#[tokio::test]
async fn test_managed_source_is_not_trimmed() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());
    let source = "\nif True:\n    print(1)\n   ";
    h.set_source(source);

    completed(h.controller.run().await);
    assert_eq!(h.runtime().executed(), vec![source]);
}

#[tokio::test]
async fn test_c_output_is_streamed() {
    let h = Harness::with_selection(
        FakeRuntime::new(),
        FakeInterpreter::new().streaming(&["Hello", " from C\n", "Line 2\n"]),
        BackendKind::EmbeddedInterpreter,
    );
    h.set_source("\n  int main() { return 0; }  \n");

    let report = completed(h.controller.run().await);
    assert!(!report.faulted);
    assert_eq!(report.backend, BackendKind::EmbeddedInterpreter);
    assert_eq!(h.output_texts(), vec!["Hello from C", "Line 2", " "]);
    assert!(h.output().iter().all(|l| !l.is_error()));

    assert_eq!(h.interpreter().executed(), vec!["int main() { return 0; }"]);
    assert_eq!(h.controller.status(), RunStatus::Ready);
    assert_eq!(h.runtime().bootstrap_count(), 0);
}

#[tokio::test]
async fn test_c_fault_discards_partial_output() {
    let h = Harness::with_selection(
        FakeRuntime::new(),
        FakeInterpreter::new()
            .streaming(&["partial\n"])
            .faulting(ExecutionFault::Interpreter(
                "main.c:1: error: expected ';'".to_owned(),
            )),
        BackendKind::EmbeddedInterpreter,
    );
    h.set_source("int main() { return 0 }");

    let report = completed(h.controller.run().await);
    assert!(report.faulted);
    assert_eq!(
        h.output(),
        vec![OutputLine::error("Error: main.c:1: error: expected ';'")]
    );
    assert_eq!(h.controller.status(), RunStatus::Ready);
}

#[tokio::test]
async fn test_timeout_fault_is_rendered() {
    let h = Harness::with_selection(
        FakeRuntime::new(),
        FakeInterpreter::new().faulting(ExecutionFault::TimedOut(10.0)),
        BackendKind::EmbeddedInterpreter,
    );
    h.set_source("int main() { for (;;); }");

    completed(h.controller.run().await);
    assert_eq!(
        h.output_texts(),
        vec!["Error: execution timed out after 10.0s"]
    );
}

#[tokio::test]
async fn test_init_failure_is_latched() {
    let h = Harness::new(
        FakeRuntime::new().failing(InitError::Exited),
        FakeInterpreter::new(),
    );
    h.set_source("print(1)");

    assert_eq!(
        h.controller.run().await,
        RunOutcome::InitFailed(InitError::Exited)
    );
    assert_eq!(h.controller.status(), RunStatus::Failed);
    assert_eq!(h.controller.status_text(), "Failed to load");
    assert_eq!(h.output(), vec![OutputLine::error(INIT_FAILURE)]);
    assert_eq!(h.controller.init_failure(), Some(InitError::Exited));

    // No automatic retry, even once the runtime could start
    h.runtime().heal();
    assert_eq!(
        h.controller.run().await,
        RunOutcome::InitFailed(InitError::Exited)
    );
    assert_eq!(h.output(), vec![OutputLine::error(INIT_FAILURE)]);
    assert_eq!(h.runtime().bootstrap_count(), 1);
    assert!(h.runtime().executed().is_empty());
}

#[tokio::test]
async fn test_retry_initialization_recovers() {
    let h = Harness::new(
        FakeRuntime::new()
            .failing(InitError::StartupTimeout(15.0))
            .returning(captured("back\n", "", None)),
        FakeInterpreter::new(),
    );
    h.set_source("print('back')");
    h.controller.run().await;
    assert_eq!(h.controller.status(), RunStatus::Failed);

    // Still broken: the failure is reported and latched again
    assert_eq!(
        h.controller.retry_initialization().await,
        Err(ControllerError::Init(InitError::StartupTimeout(15.0)))
    );
    assert_eq!(h.controller.status(), RunStatus::Failed);

    h.runtime().heal();
    assert_eq!(h.controller.retry_initialization().await, Ok(()));
    assert_eq!(h.controller.status(), RunStatus::Ready);
    assert_eq!(h.controller.init_failure(), None);

    completed(h.controller.run().await);
    assert_eq!(h.output_texts(), vec!["back"]);
    assert_eq!(h.runtime().bootstrap_count(), 3);
}

#[tokio::test]
async fn test_run_ignored_while_busy() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRuntime::new()
            .gated_runs(gate.clone())
            .returning(captured("done\n", "", None)),
        FakeInterpreter::new(),
    );
    h.set_source("print('done')");

    let controller = h.controller.clone();
    let first = tokio::spawn(async move { controller.run().await });
    h.wait_for(RunStatus::Running).await;

    assert_eq!(h.controller.run().await, RunOutcome::Ignored);
    assert_eq!(h.controller.retry_initialization().await, Err(ControllerError::Busy));

    gate.notify_one();
    completed(first.await.unwrap());

    assert_eq!(h.runtime().executed().len(), 1);
    assert_eq!(h.output_texts(), vec!["done"]);
    assert_eq!(h.controller.status(), RunStatus::Ready);
}

#[tokio::test]
async fn test_run_ignored_while_initializing() {
    let startup = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRuntime::new().gated_startup(startup.clone()),
        FakeInterpreter::new(),
    );
    h.set_source("print(1)");

    let controller = h.controller.clone();
    let first = tokio::spawn(async move { controller.run().await });
    h.wait_for(RunStatus::Initializing).await;

    assert_eq!(h.controller.run().await, RunOutcome::Ignored);

    startup.notify_one();
    completed(first.await.unwrap());
    assert_eq!(h.runtime().bootstrap_count(), 1);
}

#[tokio::test]
async fn test_warmup_moves_idle_to_ready() {
    let startup = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRuntime::new().gated_startup(startup.clone()),
        FakeInterpreter::new(),
    );

    h.controller.start();
    tokio::task::yield_now().await;

    // Warm-up is silent until it settles
    assert_eq!(h.controller.status(), RunStatus::Idle);
    assert!(!h.controller.is_busy());

    startup.notify_one();
    h.wait_for(RunStatus::Ready).await;
    assert_eq!(h.runtime().bootstrap_count(), 1);
    assert!(h.shows_placeholder());
}

#[tokio::test]
async fn test_warmup_failure_marks_failed() {
    let h = Harness::new(
        FakeRuntime::new().failing(InitError::CommandNotFound("python3".to_owned())),
        FakeInterpreter::new(),
    );
    h.set_source("print(1)");

    h.controller.start();
    h.wait_for(RunStatus::Failed).await;
    assert_eq!(h.output(), vec![OutputLine::error(INIT_FAILURE)]);

    assert!(matches!(
        h.controller.run().await,
        RunOutcome::InitFailed(InitError::CommandNotFound(_))
    ));
    assert_eq!(h.runtime().bootstrap_count(), 1);
}

#[tokio::test]
async fn test_run_during_warmup_joins_bootstrap() {
    let startup = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRuntime::new()
            .gated_startup(startup.clone())
            .returning(captured("joined\n", "", None)),
        FakeInterpreter::new(),
    );
    h.set_source("print('joined')");

    h.controller.start();
    tokio::task::yield_now().await;

    let controller = h.controller.clone();
    let run = tokio::spawn(async move { controller.run().await });
    h.wait_for(RunStatus::Initializing).await;

    startup.notify_one();
    completed(run.await.unwrap());

    h.wait_for(RunStatus::Ready).await;
    assert_eq!(h.runtime().bootstrap_count(), 1);
    assert_eq!(h.output_texts(), vec!["joined"]);
}

#[tokio::test]
async fn test_warmup_with_embedded_selected() {
    let h = Harness::with_selection(
        FakeRuntime::new(),
        FakeInterpreter::new(),
        BackendKind::EmbeddedInterpreter,
    );

    h.controller.start();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !h.runtime().is_prepared() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("warm-up never finished");

    h.controller
        .switch_backend(BackendKind::ManagedRuntime)
        .unwrap();
    assert_eq!(h.controller.status(), RunStatus::Ready);
}

#[tokio::test]
async fn test_status_channel_reports_transitions() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());
    let rx = h.controller.subscribe();
    assert_eq!(*rx.borrow(), RunStatus::Idle);

    h.set_source("print(1)");
    completed(h.controller.run().await);
    assert_eq!(*rx.borrow(), RunStatus::Ready);
}

#[tokio::test]
async fn test_dispose_ignores_later_requests() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());
    h.set_source("print(1)");
    completed(h.controller.run().await);

    h.controller.dispose().await;
    assert!(!h.runtime().is_prepared());

    assert_eq!(h.controller.run().await, RunOutcome::Ignored);
    assert_eq!(
        h.controller.switch_backend(BackendKind::EmbeddedInterpreter),
        Err(ControllerError::Disposed)
    );
    assert_eq!(h.runtime().executed().len(), 1);
}

#[tokio::test]
async fn test_dropped_run_releases_controller() {
    let gate = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRuntime::new()
            .gated_runs(gate.clone())
            .returning(captured("ok\n", "", None)),
        FakeInterpreter::new(),
    );
    h.set_source("print('ok')");

    let abandoned = tokio::time::timeout(Duration::from_millis(50), h.controller.run()).await;
    assert!(abandoned.is_err());

    assert_eq!(h.controller.status(), RunStatus::Ready);
    assert!(!h.controller.is_busy());
    h.controller
        .switch_backend(BackendKind::EmbeddedInterpreter)
        .unwrap();
    h.controller
        .switch_backend(BackendKind::ManagedRuntime)
        .unwrap();

    gate.notify_one();
    let report = completed(h.controller.run().await);
    assert_eq!(report.lines, vec![OutputLine::success("ok")]);
    assert_eq!(h.runtime().executed().len(), 2);
}

#[tokio::test]
async fn test_dropped_bootstrap_returns_to_idle() {
    let startup = Arc::new(Notify::new());
    let h = Harness::new(
        FakeRuntime::new().gated_startup(startup.clone()),
        FakeInterpreter::new(),
    );
    h.set_source("print(1)");

    let controller = h.controller.clone();
    let run = tokio::spawn(async move { controller.run().await });
    h.wait_for(RunStatus::Initializing).await;
    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());

    assert_eq!(h.controller.status(), RunStatus::Idle);
    assert_eq!(h.controller.init_failure(), None);

    startup.notify_one();
    completed(h.controller.run().await);
    assert_eq!(h.controller.status(), RunStatus::Ready);
    assert_eq!(h.runtime().bootstrap_count(), 1);
}

#[tokio::test]
async fn test_fault_shows_error_status_until_next_run() {
    let h = Harness::new(
        FakeRuntime::new().returning(ExecutionResult::Fault(ExecutionFault::Raised(
            "ZeroDivisionError: division by zero".to_owned(),
        ))),
        FakeInterpreter::new(),
    );
    h.set_source("1 / 0");

    let report = completed(h.controller.run().await);
    assert!(report.faulted);
    assert_eq!(h.controller.status(), RunStatus::Ready);
    assert!(!h.controller.is_busy());
    assert_eq!(h.controller.status_text(), "Error");

    h.runtime().respond(captured("ok\n", "", None));
    completed(h.controller.run().await);
    assert_eq!(h.controller.status_text(), "Ready");
}

#[tokio::test]
async fn test_switch_clears_error_status() {
    let h = Harness::with_selection(
        FakeRuntime::new(),
        FakeInterpreter::new().faulting(ExecutionFault::Interpreter("boom".to_owned())),
        BackendKind::EmbeddedInterpreter,
    );
    h.set_source("int main() { return 0; }");

    completed(h.controller.run().await);
    assert_eq!(h.controller.status_text(), "Error");

    h.controller
        .switch_backend(BackendKind::ManagedRuntime)
        .unwrap();
    assert_eq!(h.controller.status_text(), "Idle");
}
