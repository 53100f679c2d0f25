mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{wait_until, ScriptedIo, WriteStep};
use sluice::{FileSink, SinkConfig};

#[test]
fn reopen_swaps_descriptor_and_closes_old_one() {
    let io = Arc::new(ScriptedIo::new());
    let sink = FileSink::open_with_io(SinkConfig::path("/logs/app.log"), Arc::clone(&io))
        .expect("open");
    let first = io.fd_of_open(0);
    let second = io.fd_of_open(1);

    sink.write(b"before").expect("write");
    sink.reopen_as("/logs/app.log.1").expect("reopen");
    sink.write(b"after").expect("write");
    sink.end().expect("end");

    assert_eq!(io.opens(), vec![
        PathBuf::from("/logs/app.log"),
        PathBuf::from("/logs/app.log.1"),
    ]);
    assert_eq!(io.delivered_to(first), b"before");
    assert_eq!(io.delivered_to(second), b"after");
    // Old descriptor closed only after the new one was confirmed, then the
    // new one on end.
    assert_eq!(io.closed(), vec![first, second]);
}

#[test]
fn reopen_without_argument_reuses_backing_path() {
    let io = Arc::new(ScriptedIo::new());
    let sink = FileSink::open_with_io(SinkConfig::path("/logs/app.log"), Arc::clone(&io))
        .expect("open");

    sink.reopen().expect("reopen");
    assert_eq!(io.opens(), vec![
        PathBuf::from("/logs/app.log"),
        PathBuf::from("/logs/app.log"),
    ]);
    sink.destroy().expect("destroy");
}

#[test]
fn reopen_creates_parent_directories_when_configured() {
    let io = Arc::new(ScriptedIo::new());
    let sink = FileSink::open_with_io(
        SinkConfig {
            create_dirs: true,
            ..SinkConfig::path("/logs/day-1/app.log")
        },
        Arc::clone(&io),
    )
    .expect("open");

    sink.reopen_as("/logs/day-2/app.log").expect("reopen");
    assert_eq!(io.created_dirs(), vec![
        PathBuf::from("/logs/day-1"),
        PathBuf::from("/logs/day-2"),
    ]);
    sink.destroy().expect("destroy");
}

#[test]
fn reopen_is_ignored_during_shutdown() {
    let io = Arc::new(ScriptedIo::new());
    let sink = FileSink::open_with_io(SinkConfig::path("/logs/app.log"), Arc::clone(&io))
        .expect("open");

    sink.end().expect("end");
    sink.reopen_as("/logs/app.log.1").expect("ignored");
    assert_eq!(io.opens().len(), 1);
}

#[test]
fn open_failure_during_reopen_keeps_old_descriptor_in_service() {
    let io = Arc::new(ScriptedIo::new());
    let sink = FileSink::open_with_io(SinkConfig::path("/logs/app.log"), Arc::clone(&io))
        .expect("open");
    let first = io.fd_of_open(0);

    let errors = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let count = Arc::clone(&errors);
    sink.on_error(move |_| {
        count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });

    io.fail_next_open();
    sink.reopen_as("/logs/denied.log").expect("reopen request");
    assert_eq!(errors.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Writes continue on the original descriptor.
    sink.write(b"still here").expect("write");
    assert_eq!(io.delivered_to(first), b"still here");
    assert!(io.closed().is_empty());
    sink.end().expect("end");
}

#[test]
fn reopen_mid_write_waits_for_the_inflight_write() {
    let io = Arc::new(ScriptedIo::new());
    io.script([WriteStep::Hold]);
    let sink = FileSink::open_with_io(
        SinkConfig::deferred("/logs/app.log"),
        Arc::clone(&io),
    )
    .expect("open");
    let first = io.fd_of_open(0);
    let second = io.fd_of_open(1);

    sink.write(b"held bytes").expect("write");
    assert!(wait_until(|| io.write_attempts() == 1), "dispatch started");

    // Rotation requested while the write is parked inside the OS call: the
    // swap must wait for it.
    sink.reopen_as("/logs/app.log.1").expect("reopen");
    assert_eq!(io.opens().len(), 1);
    assert!(io.closed().is_empty());

    io.release_holds();
    assert!(wait_until(|| io.opens().len() == 2), "reopen ran after release");
    assert!(wait_until(|| io.closed() == vec![first]), "old fd closed");
    assert_eq!(io.delivered_to(first), b"held bytes");

    sink.write(b"fresh file").expect("write");
    assert!(wait_until(|| io.delivered_to(second) == b"fresh file"));
    sink.end().expect("end");
}
