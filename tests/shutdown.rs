//! Shutdown fanout through the application surface.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use appwire::{
    exit_code, invoke, provide, supply, with_exit, App, CoreError, Ctx, Hook, Lifecycle, OsSignal,
    Shutdowner, SignalSource,
};

#[tokio::test]
async fn shutdown_reaches_every_waiter() {
    let app = App::new(supply(1u8));
    assert!(app.err().is_none());

    let mut first = app.wait();
    let mut second = app.wait();

    app.shutdowner().shutdown([exit_code(4)]).unwrap();

    let a = first.recv().await.unwrap();
    let b = second.recv().await.unwrap();
    assert_eq!(a.exit_code, 4);
    assert_eq!(b, a);
    assert_eq!(a.source, SignalSource::Programmatic);
}

#[tokio::test]
async fn blocked_waiters_are_counted_but_broadcast_sticks() {
    let app = App::new(supply(1u8));
    let mut first = app.wait();
    let mut second = app.wait();

    // Buffers of one accept the first broadcast untouched.
    app.shutdowner().shutdown([exit_code(7)]).unwrap();

    // Nobody read; the second broadcast finds both buffers full.
    let err = app.shutdowner().shutdown([exit_code(7)]).unwrap_err();
    match err {
        CoreError::BlockedChannels { unsent, total, signal } => {
            assert_eq!(unsent, 2);
            assert_eq!(total, 2);
            assert_eq!(signal.exit_code, 7);
        }
        other => panic!("unexpected: {}", other),
    }

    // Both channels still deliver the buffered signal.
    assert_eq!(first.recv().await.unwrap().exit_code, 7);
    assert_eq!(second.recv().await.unwrap().exit_code, 7);
}

#[tokio::test]
async fn late_waiters_are_seeded_with_the_last_signal() {
    let app = App::new(supply(1u8));
    app.shutdowner().shutdown([exit_code(2)]).unwrap();

    let mut late = app.wait();
    assert_eq!(late.recv().await.unwrap().exit_code, 2);
}

#[tokio::test]
async fn done_carries_the_os_portion() {
    let app = App::new(supply(1u8));
    let mut done = app.done();
    app.shutdowner().shutdown([]).unwrap();
    assert_eq!(done.recv().await.unwrap(), OsSignal::Interrupt);
}

#[tokio::test]
async fn shutdown_from_a_hook_is_observed_after_start() {
    let mut app = App::new(invoke(|lc: Arc<Lifecycle>, sd: Arc<Shutdowner>| {
        let sd = sd.as_ref().clone();
        lc.append(Hook::new().on_start(move |_ctx| async move {
            sd.shutdown([exit_code(5)]).ok();
            Ok(())
        }));
    }));
    assert!(app.err().is_none(), "unexpected: {:?}", app.err());

    let mut waiter = app.wait();
    let ctx = Ctx::new();
    app.start(&ctx).await.unwrap();

    assert_eq!(waiter.recv().await.unwrap().exit_code, 5);
    app.stop(&ctx).await.unwrap();
}

#[tokio::test]
async fn run_exits_with_the_broadcast_exit_code() {
    let observed = Arc::new(AtomicI32::new(i32::MIN));
    let exit_slot = observed.clone();

    let app = App::new((
        supply(1u8),
        with_exit(move |code| {
            exit_slot.store(code, Ordering::SeqCst);
        }),
    ));
    assert!(app.err().is_none());

    let shutdowner = app.shutdowner();
    let runner = tokio::spawn(app.run());

    // Give start a moment, then request shutdown.
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdowner.shutdown([exit_code(3)]).unwrap();

    runner.await.unwrap();
    assert_eq!(observed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn run_exits_one_on_start_failure() {
    let observed = Arc::new(AtomicI32::new(i32::MIN));
    let exit_slot = observed.clone();

    let app = App::new((
        invoke(|lc: Arc<Lifecycle>| {
            lc.append(Hook::new().on_start(|_ctx| async { Err("refused".into()) }));
        }),
        with_exit(move |code| {
            exit_slot.store(code, Ordering::SeqCst);
        }),
    ));
    assert!(app.err().is_none());

    app.run().await;
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_hooks_can_overlap_with_relay_shutdown() {
    struct Flusher;

    let mut app = App::new((
        provide(|lc: Arc<Lifecycle>| {
            lc.append(
                Hook::new()
                    .on_start(|_ctx| async { Ok(()) })
                    .on_stop(|_ctx| async {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok(())
                    }),
            );
            Flusher
        }),
        invoke(|_f: Arc<Flusher>| {}),
    ));
    assert!(app.err().is_none());

    let ctx = Ctx::with_timeout(Duration::from_secs(2));
    app.start(&ctx).await.unwrap();
    app.stop(&ctx).await.unwrap();
}
