mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use backmeup::cron::CronSchedule;
use backmeup::events::{ChannelSink, EventSink, FanoutSink, RunEvent, TracingSink};
use backmeup::integrity::DigestAlgorithm;
use backmeup::job::{ArtifactKind, ExecCapture};
use backmeup::pipeline::RunCtx;
use backmeup::scheduler::Scheduler;

use common::{LocalConnector, files_in, job, settings};

fn every_second() -> CronSchedule {
    CronSchedule::parse("* * * * * *").expect("cron")
}

#[test]
fn overlapping_ticks_are_skipped() {
    let (tx, rx) = mpsc::channel();
    let mut sched = Scheduler::new(Arc::new(ChannelSink::new(tx)));
    let started = Arc::new(AtomicUsize::new(0));

    let s = started.clone();
    sched
        .schedule("slow", &every_second(), move || {
            s.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2500));
        })
        .expect("schedule");

    thread::sleep(Duration::from_millis(4500));
    sched.shutdown();

    let events: Vec<RunEvent> = rx.try_iter().collect();
    assert!(matches!(events.first(), Some(RunEvent::JobScheduled { job, .. }) if job == "slow"));
    let skipped = events
        .iter()
        .filter(|e| matches!(e, RunEvent::TickSkipped { .. }))
        .count();
    assert!(skipped >= 1, "expected skipped ticks, got {events:?}");
    let runs = started.load(Ordering::SeqCst);
    assert!((1..=2).contains(&runs), "runs = {runs}");
}

#[test]
fn shutdown_stops_ticking() {
    let (tx, _rx) = mpsc::channel();
    let mut sched = Scheduler::new(Arc::new(ChannelSink::new(tx)));
    let ticks = Arc::new(AtomicUsize::new(0));

    let t = ticks.clone();
    sched
        .schedule("fast", &every_second(), move || {
            t.fetch_add(1, Ordering::SeqCst);
        })
        .expect("schedule");
    let handle = sched.shutdown_handle();

    thread::sleep(Duration::from_millis(2200));
    let start = Instant::now();
    handle.trigger();
    sched.wait();
    assert!(start.elapsed() < Duration::from_secs(1), "shutdown was not prompt");

    let seen = ticks.load(Ordering::SeqCst);
    assert!(seen >= 1, "no tick fired");
    thread::sleep(Duration::from_millis(1500));
    assert_eq!(ticks.load(Ordering::SeqCst), seen);
}

#[test]
fn independent_jobs_each_get_their_ticks() {
    let (tx, rx) = mpsc::channel();
    let mut sched = Scheduler::new(Arc::new(ChannelSink::new(tx)));
    let a = Arc::new(AtomicUsize::new(0));
    let b = Arc::new(AtomicUsize::new(0));

    let a2 = a.clone();
    sched
        .schedule("a", &every_second(), move || {
            a2.fetch_add(1, Ordering::SeqCst);
        })
        .expect("schedule a");
    let b2 = b.clone();
    sched
        .schedule("b", &every_second(), move || {
            // A slow job must not hold the other one back.
            b2.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_secs(5));
        })
        .expect("schedule b");
    assert_eq!(sched.len(), 2);

    thread::sleep(Duration::from_millis(3300));
    let fired_a = a.load(Ordering::SeqCst);
    sched.shutdown();

    assert!(fired_a >= 2, "a fired {fired_a} times");
    assert_eq!(b.load(Ordering::SeqCst), 1);
    let skipped_b = rx
        .try_iter()
        .filter(|e| matches!(e, RunEvent::TickSkipped { job } if job == "b"))
        .count();
    assert!(skipped_b >= 1);
}

#[test]
fn scheduled_job_runs_the_pipeline() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let backup = tmp.path().join("backup");
    let (tx, rx) = mpsc::channel();
    let sink: Arc<dyn EventSink> = Arc::new(FanoutSink::new(vec![
        Arc::new(ChannelSink::new(tx)),
        Arc::new(TracingSink),
    ]));
    let ctx = RunCtx::new(
        Arc::new(settings(
            &backup,
            &tmp.path().join("remote"),
            DigestAlgorithm::Sha512,
        )),
        Arc::new(LocalConnector::default()),
        sink.clone(),
    );

    let mut j = job(
        "tick_example",
        ArtifactKind::Exec(ExecCapture {
            command: "echo tick".into(),
        }),
    );
    j.schedule = every_second();

    let mut sched = Scheduler::new(sink);
    sched.schedule_job(Arc::new(j), ctx).expect("schedule");

    let deadline = Instant::now() + Duration::from_secs(10);
    let stored = loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(left) {
            Ok(RunEvent::RunFinished { ok, error, stored, .. }) => {
                assert!(ok, "run failed: {error:?}");
                break stored.expect("stored path");
            }
            Ok(_) => continue,
            Err(e) => panic!("no run finished: {e}"),
        }
    };
    sched.shutdown();

    assert!(stored.is_file());
    assert!(files_in(&backup.join("tick_example")).contains(&stored));
}
