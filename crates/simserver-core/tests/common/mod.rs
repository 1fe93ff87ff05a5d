//! Scripted fake engine for session tests
//!
//! Mimics the parts of ngspice's shared-library behaviour the session relies
//! on: additive `save` lists cleared by `delete all`, background commands
//! running on their own thread, run-state notifications around every run,
//! `bg_halt` stopping the thread, and a controlled-exit notice on `quit`.

#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};
use simserver_core::{
    CallbackAdapter, CircuitFile, Complex64, Engine, ExitNotice, Result, SampleValue, SimError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One callback the fake engine will deliver
#[derive(Debug, Clone)]
pub enum Event {
    Log(String),
    Status(String),
    Announce(String, Vec<String>),
    Samples(Vec<SampleValue>),
    Exit(ExitNotice),
}

/// How sample batches are paced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Deliver everything immediately
    Free,
    /// Deliver with a pause between batches
    Sleep(Duration),
    /// Deliver one batch per permit granted with [`FakeEngine::advance`]
    Manual,
}

/// Value of `v(out)` at transient step `i`
pub fn vout(i: usize) -> f64 {
    (i as f64 * 0.01).sin() * 5.0
}

#[derive(Default)]
struct Shared {
    commands: Mutex<Vec<String>>,
    saved: Mutex<Vec<String>>,
    adapter: Mutex<Option<Arc<CallbackAdapter>>>,
    running: AtomicBool,
    halt: AtomicBool,
    permits: Mutex<usize>,
    permit_cv: Condvar,
    delivered: AtomicUsize,
    late_fired: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable fake engine; clones share state so tests can inspect it after
/// the session took ownership.
#[derive(Clone)]
pub struct FakeEngine {
    shared: Arc<Shared>,
    pacing: Pacing,
    script: Option<Arc<Vec<Event>>>,
    late_callback: bool,
    fail_prefix: Option<&'static str>,
}

impl FakeEngine {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            pacing,
            script: None,
            late_callback: false,
            fail_prefix: None,
        }
    }

    /// Play `events` for `bg_run` instead of the built-in transient
    pub fn with_script(mut self, events: Vec<Event>) -> Self {
        self.script = Some(Arc::new(events));
        self
    }

    /// Deliver one more callback after noticing a halt request
    pub fn with_late_callback(mut self) -> Self {
        self.late_callback = true;
        self
    }

    /// Fail every command starting with `prefix`
    pub fn failing(mut self, prefix: &'static str) -> Self {
        self.fail_prefix = Some(prefix);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.shared.commands.lock().clone()
    }

    /// The effective save list, as the engine would apply it
    pub fn saved(&self) -> Vec<String> {
        self.shared.saved.lock().clone()
    }

    pub fn callbacks(&self) -> Option<Arc<CallbackAdapter>> {
        self.shared.adapter.lock().clone()
    }

    pub fn delivered(&self) -> usize {
        self.shared.delivered.load(Ordering::SeqCst)
    }

    pub fn late_callback_fired(&self) -> bool {
        self.shared.late_fired.load(Ordering::SeqCst)
    }

    /// Grant `n` more sample batches in manual pacing
    pub fn advance(&self, n: usize) {
        *self.shared.permits.lock() += n;
        self.shared.permit_cv.notify_all();
    }

    /// Wait until `n` sample batches have been delivered in total
    pub fn wait_delivered(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.delivered() < n {
            assert!(Instant::now() < deadline, "fake engine stalled at {}", self.delivered());
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Wait for the background worker to finish
    pub fn join(&self) {
        let worker = self.shared.worker.lock().take();
        if let Some(worker) = worker {
            worker.join().expect("fake worker panicked");
        }
    }

    fn start(&self, events: Vec<Event>) {
        self.join();
        let adapter = match self.callbacks() {
            Some(adapter) => adapter,
            None => return,
        };
        let shared = Arc::clone(&self.shared);
        let pacing = self.pacing;
        let late = self.late_callback;

        shared.halt.store(false, Ordering::SeqCst);
        shared.running.store(true, Ordering::SeqCst);

        let worker = std::thread::spawn(move || {
            adapter.run_state_changed(false);
            for event in events {
                if shared.halt.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    Event::Log(line) => adapter.log_line(&line),
                    Event::Status(line) => adapter.status_line(&line),
                    Event::Announce(name, fields) => adapter.vectors_announced(&name, fields),
                    Event::Samples(values) => {
                        if !wait_permit(&shared, pacing) {
                            break;
                        }
                        adapter.samples(&values);
                        shared.delivered.fetch_add(1, Ordering::SeqCst);
                    }
                    Event::Exit(notice) => {
                        shared.running.store(false, Ordering::SeqCst);
                        adapter.exited(notice);
                        return;
                    }
                }
            }
            let halted = shared.halt.load(Ordering::SeqCst);
            adapter.run_state_changed(true);
            shared.running.store(false, Ordering::SeqCst);

            if halted && late {
                // Give the session time to detach, then fire anyway
                std::thread::sleep(Duration::from_millis(20));
                adapter.samples(&[SampleValue::real(-1.0), SampleValue::real(-1.0)]);
                adapter.log_line("late line");
                shared.late_fired.store(true, Ordering::SeqCst);
            }
        });
        *self.shared.worker.lock() = Some(worker);
    }

    fn vectors_for(&self, scale: &str, default: &[&str]) -> Vec<String> {
        let saved = self.saved();
        let mut names = vec![scale.to_string()];
        if saved.is_empty() {
            names.extend(default.iter().map(|s| s.to_string()));
        } else {
            names.extend(saved.into_iter().filter(|s| s != scale));
        }
        names
    }

    fn transient(&self, step: f64, stop: f64, start: f64) -> Vec<Event> {
        let names = self.vectors_for("time", &["v(out)", "v(in)"]);
        let points = ((stop - start) / step).round() as usize + 1;
        let mut events = vec![
            Event::Log("Doing analysis at TEMP = 27.000000 and TNOM = 27.000000".into()),
            Event::Announce("tran1".into(), names.clone()),
        ];
        for i in 0..points {
            let mut values = vec![SampleValue::real(start + step * i as f64).scale()];
            values.extend((1..names.len()).map(|_| SampleValue::real(vout(i))));
            events.push(Event::Samples(values));
            if i % 250 == 0 {
                events.push(Event::Status(format!("tran: {}%", i * 100 / points.max(1))));
            }
        }
        events
    }

    fn ac(&self, points: usize, fstart: f64, fstop: f64) -> Vec<Event> {
        let names = self.vectors_for("frequency", &["v(2)"]);
        let mut events = vec![Event::Announce("ac1".into(), names.clone())];
        for i in 0..points {
            let f = fstart + (fstop - fstart) * i as f64 / (points.max(2) - 1) as f64;
            let mut values = vec![SampleValue::complex(Complex64::new(f, 0.0)).scale()];
            values.extend(
                (1..names.len()).map(|_| SampleValue::complex(Complex64::new(1.0 / (1.0 + f), -0.1))),
            );
            events.push(Event::Samples(values));
        }
        events
    }

    fn dc(&self, start: f64, stop: f64, incr: f64) -> Vec<Event> {
        let names = self.vectors_for("v-sweep", &["v(1)"]);
        let points = ((stop - start) / incr).round() as usize + 1;
        let mut events = Vec::new();
        // Two sweep segments, announced as separate groups
        for segment in 0..2 {
            events.push(Event::Announce(format!("dc{}", segment + 1), names.clone()));
            for i in 0..points {
                let v = start + incr * i as f64;
                let mut values = vec![SampleValue::real(v).scale()];
                values.extend((1..names.len()).map(|_| SampleValue::real(v * (segment + 1) as f64)));
                events.push(Event::Samples(values));
            }
        }
        events
    }

    fn op(&self) -> Vec<Event> {
        let names = self.vectors_for("v(1)", &[]);
        vec![
            Event::Announce("op1".into(), names.clone()),
            Event::Samples(names.iter().map(|_| SampleValue::real(5.0)).collect()),
        ]
    }
}

fn wait_permit(shared: &Shared, pacing: Pacing) -> bool {
    match pacing {
        Pacing::Free => true,
        Pacing::Sleep(d) => {
            std::thread::sleep(d);
            !shared.halt.load(Ordering::SeqCst)
        }
        Pacing::Manual => {
            let mut permits = shared.permits.lock();
            while *permits == 0 {
                if shared.halt.load(Ordering::SeqCst) {
                    return false;
                }
                shared.permit_cv.wait_for(&mut permits, Duration::from_millis(5));
            }
            *permits -= 1;
            true
        }
    }
}

fn args(command: &str) -> Vec<f64> {
    command
        .split_whitespace()
        .skip(1)
        .filter_map(|s| s.parse().ok())
        .collect()
}

impl Engine for FakeEngine {
    fn init(&mut self, callbacks: Arc<CallbackAdapter>) -> Result<()> {
        *self.shared.adapter.lock() = Some(callbacks);
        Ok(())
    }

    fn command(&mut self, command: &str) -> Result<()> {
        self.shared.commands.lock().push(command.to_string());
        if self.fail_prefix.is_some_and(|p| command.starts_with(p)) {
            return Err(SimError::CommandFailed {
                command: command.to_string(),
                code: 1,
            });
        }

        let word = command.split_whitespace().next().unwrap_or_default();
        match word {
            "delete" => self.shared.saved.lock().clear(),
            "save" => self
                .shared
                .saved
                .lock()
                .extend(command.split_whitespace().skip(1).map(str::to_string)),
            "bg_halt" => {
                self.shared.halt.store(true, Ordering::SeqCst);
                self.shared.permit_cv.notify_all();
            }
            "quit" => {
                if let Some(adapter) = self.callbacks() {
                    adapter.exited(ExitNotice {
                        status: 0,
                        immediate: false,
                        exit_upon_quit: true,
                    });
                }
            }
            "bg_tran" => {
                let a = args(command);
                self.start(self.transient(a[0], a[1], a[2]));
            }
            "bg_run" => {
                let events = match &self.script {
                    Some(script) => script.as_ref().clone(),
                    None => self.transient(1e-6, 1e-4, 0.0),
                };
                self.start(events);
            }
            "bg_ac" => {
                let parts: Vec<&str> = command.split_whitespace().collect();
                let points: usize = parts[2].parse().unwrap_or(1);
                let fstart: f64 = parts[3].parse().unwrap_or(1.0);
                let fstop: f64 = parts[4].parse().unwrap_or(1e3);
                self.start(self.ac(points, fstart, fstop));
            }
            "bg_dc" => {
                let a = args(command);
                self.start(self.dc(a[0], a[1], a[2]));
            }
            "bg_op" => self.start(self.op()),
            _ => {}
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

/// A session config pointed at a fresh temporary directory
pub fn config(dir: &tempfile::TempDir) -> simserver_core::SessionConfig {
    simserver_core::SessionConfig::default()
        .with_work_dir(dir.path())
        .with_halt_timeout(Duration::from_secs(2))
        .with_halt_poll_interval(Duration::from_millis(1))
}

pub fn rc_circuit() -> Vec<CircuitFile> {
    vec![CircuitFile::new(
        "bar.sp",
        "* test\nV1 1 0 AC 1 sin(0 5 1k)\nR1 1 2 1k\nC2 2 0 1u\n.end\n",
    )]
}

/// Poll until the run finishes, returning every delta
pub fn poll_to_end(handle: &simserver_core::RunHandle) -> Vec<simserver_core::ReadResult> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut deltas = Vec::new();
    loop {
        let delta = handle.read().expect("read failed");
        let more = delta.more;
        deltas.push(delta);
        if !more {
            return deltas;
        }
        assert!(Instant::now() < deadline, "run did not finish");
        std::thread::sleep(Duration::from_millis(1));
    }
}
