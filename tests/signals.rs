//! OS signal delivery through the relay. These tests raise real
//! signals against the test process, so they are serialized and
//! unix-only.

#![cfg(unix)]

use std::process::Command;
use std::time::Duration;

use appwire::{supply, App, Ctx, OsSignal, SignalSource};
use serial_test::serial;

fn raise(signal: &str) {
    let status = Command::new("kill")
        .arg(format!("-{signal}"))
        .arg(std::process::id().to_string())
        .status()
        .expect("kill must spawn");
    assert!(status.success());
}

#[tokio::test]
#[serial]
async fn sigterm_is_relayed_to_waiters() {
    let mut app = App::new(supply(1u8));
    assert!(app.err().is_none());

    let ctx = Ctx::with_timeout(Duration::from_secs(5));
    app.start(&ctx).await.unwrap();

    let mut waiter = app.wait();
    // Give the relay a beat to register its handlers.
    tokio::time::sleep(Duration::from_millis(50)).await;
    raise("TERM");

    let signal = tokio::time::timeout(Duration::from_secs(5), waiter.recv())
        .await
        .expect("signal within deadline")
        .expect("channel open");
    assert_eq!(signal.source, SignalSource::Os(OsSignal::Terminate));
    assert_eq!(signal.exit_code, 0);

    app.stop(&ctx).await.unwrap();
}

#[tokio::test]
#[serial]
async fn sigint_reaches_done_waiters() {
    let mut app = App::new(supply(2u8));
    let ctx = Ctx::with_timeout(Duration::from_secs(5));
    app.start(&ctx).await.unwrap();

    let mut done = app.done();
    tokio::time::sleep(Duration::from_millis(50)).await;
    raise("INT");

    let signal = tokio::time::timeout(Duration::from_secs(5), done.recv())
        .await
        .expect("signal within deadline")
        .expect("channel open");
    assert_eq!(signal, OsSignal::Interrupt);

    app.stop(&ctx).await.unwrap();
}
