//! Event reporting: sequences, custom sinks, and buffered replay.

mod common;

use std::sync::Arc;

use appwire::{
    invoke, nop_logger, provide, supply, with_logger, App, Ctx, Event, EventSink,
};
use common::{event_names, recording_logger, setup_tracing, RecordingSink};

#[tokio::test]
async fn chained_pipeline_reports_the_documented_sequence() {
    let (events, logger) = recording_logger();
    let mut app = App::new((
        logger,
        supply("hello".to_string()),
        provide(|s: Arc<String>| s.len() as i64),
        invoke(|n: Arc<i64>| assert_eq!(*n, 5)),
    ));
    assert!(app.err().is_none(), "unexpected: {:?}", app.err());

    let ctx = Ctx::new();
    app.start(&ctx).await.unwrap();

    let recorded = events.lock().unwrap().clone();
    let names = event_names(&recorded);
    assert_eq!(
        names,
        vec![
            "Supplied",
            "Provided",
            "LoggerInitialized",
            "Invoking",
            "Invoked",
            "Started"
        ]
    );

    // The invoke succeeded.
    let invoked_err = recorded.iter().find_map(|event| match event {
        Event::Invoked { err, .. } => Some(err.clone()),
        _ => None,
    });
    assert_eq!(invoked_err, Some(None));
}

#[tokio::test]
async fn wire_events_replay_to_the_graph_built_sink_in_order() {
    let (events, logger) = recording_logger();
    let app = App::new((
        supply(1u32),
        supply("two".to_string()),
        // The logger option appears last; earlier events must still
        // reach it, in emission order.
        logger,
    ));
    assert!(app.err().is_none());
    drop(app);

    let recorded = events.lock().unwrap().clone();
    let names = event_names(&recorded);
    assert_eq!(names, vec!["Supplied", "Supplied", "LoggerInitialized"]);
}

#[test]
fn logger_may_depend_on_graph_values() {
    struct Prefixed {
        prefix: Arc<String>,
        inner: RecordingSink,
    }

    impl EventSink for Prefixed {
        fn log_event(&self, event: &Event) {
            assert!(!self.prefix.is_empty());
            self.inner.log_event(event);
        }
    }

    let events = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let app = App::new((
        supply("app: ".to_string()),
        with_logger(move |prefix: Arc<String>| Prefixed {
            prefix,
            inner: RecordingSink::new(sink_events.clone()),
        }),
    ));
    assert!(app.err().is_none(), "unexpected: {:?}", app.err());

    let recorded = events.lock().unwrap().clone();
    assert!(!recorded.is_empty());
}

#[test]
fn failed_logger_construction_is_a_wire_error() {
    // The wire events fall back to the tracing sink here.
    setup_tracing();
    let app = App::new((
        with_logger(|_missing: Arc<u128>| appwire::NopSink),
        supply(1u8),
    ));
    assert!(app.err().is_some());
}

#[test]
fn nop_logger_silences_reporting() {
    // Nothing to observe directly; the app must still wire cleanly.
    let app = App::new((
        nop_logger(),
        supply(6u64),
        invoke(|n: Arc<u64>| assert_eq!(*n, 6)),
    ));
    assert!(app.err().is_none());
}

#[tokio::test]
async fn failed_hooks_surface_in_events() {
    let (events, logger) = recording_logger();
    let mut app = App::new((
        logger,
        invoke(|lc: Arc<appwire::Lifecycle>| {
            lc.append(appwire::Hook::new().on_start(|_ctx| async { Err("flat".into()) }));
        }),
    ));
    assert!(app.err().is_none());

    let ctx = Ctx::new();
    assert!(app.start(&ctx).await.is_err());

    let recorded = events.lock().unwrap().clone();
    let names = event_names(&recorded);
    assert!(names.contains(&"HookStarting"));
    assert!(names.contains(&"RollingBack"));
    assert!(names.contains(&"RolledBack"));
    let started_err = recorded.iter().find_map(|event| match event {
        Event::Started { err } => Some(err.clone()),
        _ => None,
    });
    assert!(matches!(started_err, Some(Some(ref msg)) if msg.contains("flat")));
}

#[test]
fn provided_events_carry_module_paths() {
    let (events, logger) = recording_logger();
    struct Repo;
    let app = App::new((
        logger,
        appwire::module("storage", provide(|| Repo)),
    ));
    assert!(app.err().is_none());

    let recorded = events.lock().unwrap().clone();
    let module = recorded.iter().find_map(|event| match event {
        Event::Provided { module, .. } => Some(module.clone()),
        _ => None,
    });
    assert_eq!(module.as_deref(), Some("storage"));
}
