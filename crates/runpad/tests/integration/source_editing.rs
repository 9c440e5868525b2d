use runpad::console::ConsoleView;
use runpad::controller::{AttachOptions, BackendKind, RunController, RunOutcome};
use runpad::source::TextBuffer;

use super::{FakeInterpreter, FakeRuntime, Harness, PY_TEMPLATE};

#[test]
fn test_new_controller_seeds_blank_buffer() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());

    assert_eq!(h.source(), PY_TEMPLATE);
    assert_eq!(h.buffer.lock().unwrap().mode(), "python");
    assert!(h.shows_placeholder());
    assert_eq!(h.view.lock().unwrap().render_count(), 1);
}

#[test]
fn test_examples_follow_selection() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());

    let titles: Vec<_> = h.controller.examples().into_iter().map(|e| e.title).collect();
    assert_eq!(titles, vec!["Hello World", "Fibonacci"]);

    h.controller
        .switch_backend(BackendKind::EmbeddedInterpreter)
        .unwrap();
    let examples = h.controller.examples();
    assert_eq!(examples.len(), 1);
    assert_eq!(examples[0].backend, BackendKind::EmbeddedInterpreter);
}

#[test]
fn test_load_example_replaces_and_focuses() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());
    h.buffer.lock().unwrap().push_line("print('draft')");

    let fibonacci = h.controller.examples().remove(1);
    h.controller.load_example(&fibonacci.code);

    assert_eq!(h.source(), fibonacci.code);
    assert!(h.buffer.lock().unwrap().is_focused());
}

#[test]
fn test_clear_source_empties_and_focuses() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());

    h.controller.clear_source();

    assert_eq!(h.source(), "");
    assert!(h.buffer.lock().unwrap().is_focused());
}

#[tokio::test]
async fn test_source_is_read_at_run_time() {
    let h = Harness::new(FakeRuntime::new(), FakeInterpreter::new());

    h.set_source("print(1)");
    h.controller.run().await;
    h.buffer.lock().unwrap().push_line("print(2)");
    h.controller.run().await;

    assert_eq!(
        h.runtime().executed(),
        vec!["print(1)", "print(1)\nprint(2)\n"]
    );
}

#[tokio::test]
async fn test_one_shot_keeps_blank_source_blank() {
    let view = ConsoleView::shared(10);
    let buffer = TextBuffer::shared("  \n", "");
    let controller = RunController::with_options(
        FakeRuntime::new(),
        FakeInterpreter::new(),
        view.clone(),
        buffer.clone(),
        BackendKind::EmbeddedInterpreter,
        AttachOptions::one_shot(),
    );

    assert_eq!(buffer.lock().unwrap().text(), "  \n");
    assert_eq!(buffer.lock().unwrap().mode(), "c");
    assert!(view.lock().unwrap().is_placeholder());
    assert_eq!(view.lock().unwrap().render_count(), 0);

    assert_eq!(controller.run().await, RunOutcome::EmptyInput);
    assert_eq!(
        view.lock().unwrap().texts(),
        vec!["Please enter some C code to run."]
    );
    assert!(controller.embedded().executed().is_empty());
}
