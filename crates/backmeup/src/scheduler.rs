//! One timer thread per job.
//!
//! Each timer sleeps until its cron expression next matches, then hands the
//! tick to a fresh run thread. A tick that arrives while the previous run of
//! the same job is still going is skipped and reported, never queued.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::cron::CronSchedule;
use crate::error::{Error, Result};
use crate::events::{EventSink, RunEvent};
use crate::job::JobSpec;
use crate::pipeline::{RunCtx, run_job_reported};

/// Stops every timer of a scheduler; clones share the same flag.
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn trigger(&self) {
        let (flag, cv) = &*self.inner;
        if let Ok(mut g) = flag.lock() {
            *g = true;
        }
        cv.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.0.lock().map(|g| *g).unwrap_or(true)
    }

    /// Sleep until `deadline` or shutdown, whichever is first. Returns true on
    /// shutdown.
    pub fn sleep_until(&self, deadline: Instant) -> bool {
        let (flag, cv) = &*self.inner;
        let Ok(mut g) = flag.lock() else {
            return true;
        };
        loop {
            if *g {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            g = match cv.wait_timeout(g, deadline - now) {
                Ok((g, _)) => g,
                Err(_) => return true,
            };
        }
    }
}

pub struct Scheduler {
    sink: Arc<dyn EventSink>,
    shutdown: Shutdown,
    timers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            shutdown: Shutdown::default(),
            timers: Vec::new(),
        }
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Register a timer that calls `on_tick` each time `cron` matches.
    pub fn schedule<F>(&mut self, name: &str, cron: &CronSchedule, on_tick: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let first = cron.next_after(&Local::now()).ok_or_else(|| {
            Error::config(format!(
                "job '{name}': cron expression '{cron}' never fires"
            ))
        })?;
        self.sink.emit(RunEvent::JobScheduled {
            job: name.to_string(),
            cron: cron.to_string(),
            next: Some(first),
        });

        let timer = Timer {
            name: name.to_string(),
            cron: cron.clone(),
            on_tick: Arc::new(on_tick),
            sink: self.sink.clone(),
            shutdown: self.shutdown.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("timer-{name}"))
            .spawn(move || timer.run())
            .map_err(|e| Error::config(format!("failed to start timer for '{name}': {e}")))?;
        self.timers.push(handle);
        Ok(())
    }

    pub fn schedule_job(&mut self, job: Arc<JobSpec>, ctx: RunCtx) -> Result<()> {
        let name = job.name.clone();
        let cron = job.schedule.clone();
        self.schedule(&name, &cron, move || {
            // Failures are already reported through the sink.
            let _ = run_job_reported(&job, &ctx);
        })
    }

    /// Block until every timer has exited, i.e. after shutdown.
    pub fn wait(self) {
        for handle in self.timers {
            let _ = handle.join();
        }
    }

    /// Stop all timers and wait for in-flight runs to finish.
    pub fn shutdown(self) {
        self.shutdown.trigger();
        self.wait();
    }
}

struct Timer {
    name: String,
    cron: CronSchedule,
    on_tick: Arc<dyn Fn() + Send + Sync>,
    sink: Arc<dyn EventSink>,
    shutdown: Shutdown,
}

impl Timer {
    fn run(self) {
        let mut in_flight: Option<JoinHandle<()>> = None;
        let mut last_fire: Option<DateTime<Local>> = None;

        loop {
            let now = Local::now();
            // Never fire the same instant twice if the clock wakes us early.
            let from = match last_fire {
                Some(t) if t > now => t,
                _ => now,
            };
            let Some(next) = self.cron.next_after(&from) else {
                tracing::warn!(job = %self.name, cron = %self.cron, "no further runs; timer stopped");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            if self.shutdown.sleep_until(Instant::now() + wait) {
                break;
            }
            last_fire = Some(next);

            if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                self.sink.emit(RunEvent::TickSkipped {
                    job: self.name.clone(),
                });
                continue;
            }
            if let Some(done) = in_flight.take() {
                self.reap(done);
            }

            let on_tick = self.on_tick.clone();
            match thread::Builder::new()
                .name(format!("run-{}", self.name))
                .spawn(move || on_tick())
            {
                Ok(h) => in_flight = Some(h),
                Err(e) => {
                    tracing::error!(job = %self.name, error = %e, "failed to start run thread")
                }
            }
        }

        if let Some(h) = in_flight.take() {
            self.reap(h);
        }
    }

    fn reap(&self, handle: JoinHandle<()>) {
        if handle.join().is_err() {
            self.sink.emit(RunEvent::RunFinished {
                job: self.name.clone(),
                ok: false,
                error: Some("run panicked".into()),
                elapsed_ms: 0,
                stored: None,
            });
        }
    }
}
