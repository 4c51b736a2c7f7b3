use crate::mirror::ops::Operations;
use crate::mirror::result_error::result::Result;
use crate::mirror::scheduler::BackupScheduler;
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

struct ManagerEntry<O: Operations + Send + Sync + 'static> {
    scheduler: Arc<BackupScheduler<O>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<O: Operations + Send + Sync + 'static> ManagerEntry<O> {
    fn worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_worker(&self) {
        let handle = self.worker().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

/// Owns a named set of schedulers, each bound to its own worker thread, and
/// coordinates group start/stop. The registry itself is mutated only through
/// `add`/`remove` and is meant to be driven by a single control thread.
pub struct Overseer<O: Operations + Send + Sync + 'static> {
    managers: HashMap<String, ManagerEntry<O>>,
    poll_interval: Duration,
}

impl<O: Operations + Send + Sync + 'static> Default for Overseer<O> {
    fn default() -> Self {
        Self::new(default_poll_interval())
    }
}

impl<O: Operations + Send + Sync + 'static> Overseer<O> {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            managers: HashMap::new(),
            poll_interval,
        }
    }

    /// Register a scheduler under its own name. Adding a duplicate name is a
    /// no-op that reports failure; it never overwrites.
    pub fn add(&mut self, scheduler: Arc<BackupScheduler<O>>) -> bool {
        let name = scheduler.name().to_string();
        if self.managers.contains_key(&name) {
            warn!("Manager {:?} is already registered", name);
            return false;
        }
        self.managers.insert(
            name,
            ManagerEntry {
                scheduler,
                worker: Mutex::new(None),
            },
        );
        true
    }

    /// Unregister a scheduler, stopping it first unless told otherwise.
    /// Fails when the name is unknown or the stop fails.
    pub fn remove(&mut self, name: &str, stop_manager: bool) -> bool {
        if !self.managers.contains_key(name) {
            return false;
        }
        if stop_manager && !self.stop(name, true) {
            return false;
        }
        self.managers.remove(name).is_some()
    }

    pub fn manager_names(&self) -> Vec<String> {
        self.managers.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<BackupScheduler<O>>> {
        self.managers.get(name).map(|entry| &entry.scheduler)
    }

    pub fn is_manager_active(&self, name: &str) -> bool {
        self.managers
            .get(name)
            .map(|entry| entry.scheduler.is_active())
            .unwrap_or(false)
    }

    /// Launch the worker for one scheduler. The worker starts the scheduler,
    /// polls `active` until it goes false, and defensively re-stops on the
    /// way out. Fails when the name is unknown or the worker already runs.
    pub fn start(&self, name: &str) -> bool {
        let Some(entry) = self.managers.get(name) else {
            return false;
        };
        let mut worker = entry.worker();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            info!("Worker for {:?} is already alive", name);
            return false;
        }

        let scheduler = entry.scheduler.clone();
        let poll_interval = self.poll_interval;
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                scheduler.start();
                while scheduler.is_active() {
                    std::thread::sleep(poll_interval);
                }
                // The scheduler stopped itself (or was stopped externally)
                // before the loop could observe it; nothing left to do but a
                // defensive re-stop.
                if scheduler.stop() {
                    info!(
                        manager = %scheduler.name(),
                        "Scheduler was still running after its worker loop exited"
                    );
                }
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                true
            }
            Err(e) => {
                error!("Cannot spawn worker for {:?}: {}", name, e);
                false
            }
        }
    }

    /// Stop one scheduler (blocking until its in-flight cycle is done) and
    /// optionally wait for its worker to exit.
    pub fn stop(&self, name: &str, wait_for_worker: bool) -> bool {
        let Some(entry) = self.managers.get(name) else {
            return false;
        };
        let result = entry.scheduler.stop();
        if wait_for_worker {
            entry.join_worker();
        }
        result
    }

    pub fn start_all(&self) {
        for name in self.managers.keys() {
            info!("Starting manager: {}", name);
            self.start(name);
        }
    }

    /// Stop every scheduler, then wait for every worker. The stop requests
    /// all land before the first join blocks, so the schedulers wind down
    /// concurrently instead of one at a time.
    pub fn stop_all(&self, wait_for_workers: bool) {
        for (name, entry) in &self.managers {
            info!("Stopping manager: {}", name);
            entry.scheduler.request_stop();
        }
        if wait_for_workers {
            for (name, entry) in &self.managers {
                info!("Waiting for manager: {}", name);
                entry.scheduler.wait_idle();
                entry.join_worker();
                info!("Manager stopped: {}", name);
            }
        }
    }

    /// Start everything, then block until either an interrupt arrives or
    /// `max_time` elapses, and wind everything down.
    pub fn run_all(&self, max_time: Option<Duration>) -> Result<()> {
        self.start_all();

        match max_time {
            None => {
                let (tx, rx) = mpsc::channel();
                ctrlc::set_handler(move || {
                    let _ = tx.send(());
                })?;
                let _ = rx.recv();
                info!("Caught interrupt... stopping backups");
                self.stop_all(true);
            }
            Some(max_time) => {
                // One-shot deferred stop once the run window elapses.
                std::thread::sleep(max_time);
                self.stop_all(true);
            }
        }

        info!("Program terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::cycle::CopyCycle;
    use crate::mirror::naming::RelevantBackups;
    use crate::mirror::scheduler::SchedulerConfig;
    use globset::GlobSet;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::time::Instant;

    /// Operations whose copies block until released, so tests can hold
    /// schedulers mid-cycle.
    struct GatedState {
        started_tx: Mutex<Sender<String>>,
        gates: Mutex<HashMap<String, Receiver<()>>>,
        copies: AtomicUsize,
        next_id: AtomicUsize,
    }

    #[derive(Clone)]
    struct GatedOps(Arc<GatedState>);

    impl GatedOps {
        fn new() -> (Self, Receiver<String>) {
            let (started_tx, started_rx) = channel();
            (
                GatedOps(Arc::new(GatedState {
                    started_tx: Mutex::new(started_tx),
                    gates: Mutex::new(HashMap::new()),
                    copies: AtomicUsize::new(0),
                    next_id: AtomicUsize::new(0),
                })),
                started_rx,
            )
        }

        fn gate(&self, dest_dir: &str) -> Sender<()> {
            let (tx, rx) = channel();
            self.0
                .gates
                .lock()
                .unwrap()
                .insert(dest_dir.to_string(), rx);
            tx
        }
    }

    impl Operations for GatedOps {
        fn src_exists(&self, _path: &Path) -> bool {
            true
        }

        fn dest_exists(&self, _path: &Path) -> bool {
            true
        }

        fn src_mod_time(&self, _path: &Path, _exclusions: Option<&GlobSet>) -> f64 {
            1.0
        }

        fn copy(&self, _src: &Path, dest: &Path) -> bool {
            let dest_dir = dest
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let _ = self.0.started_tx.lock().unwrap().send(dest_dir.clone());
            if let Some(gate) = self.0.gates.lock().unwrap().get(&dest_dir) {
                let _ = gate.recv();
            }
            self.0.copies.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn delete_dest(&self, _path: &Path) -> bool {
            true
        }

        fn backup_names(&self, _src: &Path, _dest_dir: &Path) -> Vec<PathBuf> {
            Vec::new()
        }

        fn relevant_backup_names(
            &self,
            _src: &Path,
            _names: &[PathBuf],
            dest_dir: &Path,
        ) -> Option<RelevantBackups> {
            let id = self.0.next_id.fetch_add(1, Ordering::SeqCst);
            Some(RelevantBackups {
                oldest: None,
                next: dest_dir.join(format!("snap.{id:04}.bak")),
            })
        }

        fn finalize(&self, _cycle: &CopyCycle) {}
    }

    fn scheduler(
        name: &str,
        ops: GatedOps,
    ) -> Arc<BackupScheduler<GatedOps>> {
        let config = SchedulerConfig::builder()
            .name(name)
            .src("/data/world")
            .dest_dir(format!("/backups/{name}"))
            .backup_time(Duration::from_millis(15))
            .backup_retry_time(Duration::from_millis(10))
            .build();
        BackupScheduler::new(config, ops).unwrap()
    }

    fn wait_until<F: Fn() -> bool>(pred: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        pred()
    }

    const WAIT: Duration = Duration::from_secs(5);

    fn overseer_with(
        names: &[&str],
        ops: &GatedOps,
    ) -> Overseer<GatedOps> {
        let mut overseer = Overseer::new(Duration::from_millis(5));
        for name in names {
            assert!(overseer.add(scheduler(name, ops.clone())));
        }
        overseer
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let (ops, _started_rx) = GatedOps::new();
        let mut overseer = Overseer::default();
        assert!(overseer.add(scheduler("alpha", ops.clone())));
        assert!(!overseer.add(scheduler("alpha", ops)));
        assert_eq!(overseer.manager_names(), vec!["alpha".to_string()]);
    }

    #[test]
    fn test_unknown_names_fail() {
        let (ops, _started_rx) = GatedOps::new();
        let overseer: Overseer<GatedOps> = Overseer::default();
        drop(ops);
        assert!(!overseer.start("ghost"));
        assert!(!overseer.stop("ghost", true));
        assert!(!overseer.is_manager_active("ghost"));
        assert!(overseer.get("ghost").is_none());
    }

    #[test]
    fn test_start_twice_fails_while_worker_alive() {
        let (ops, started_rx) = GatedOps::new();
        let gate = ops.gate("/backups/alpha");
        let overseer = overseer_with(&["alpha"], &ops);

        assert!(overseer.start("alpha"));
        started_rx.recv_timeout(WAIT).unwrap();
        assert!(!overseer.start("alpha"));

        gate.send(()).unwrap();
        overseer.stop_all(true);
        assert!(!overseer.is_manager_active("alpha"));
    }

    #[test]
    fn test_stop_all_requests_before_joining() {
        // Scenario E: all three schedulers must receive the stop request
        // before the first join blocks, even while every copy is stuck.
        let (ops, started_rx) = GatedOps::new();
        let names = ["alpha", "beta", "gamma"];
        let gates: Vec<_> = names
            .iter()
            .map(|name| ops.gate(&format!("/backups/{name}")))
            .collect();
        let overseer = Arc::new(overseer_with(&names, &ops));

        overseer.start_all();
        for _ in 0..names.len() {
            started_rx.recv_timeout(WAIT).unwrap();
        }

        let stopper = {
            let overseer = overseer.clone();
            std::thread::spawn(move || overseer.stop_all(true))
        };

        // With every copy still blocked, every scheduler goes inactive: the
        // requests were all delivered before any join completed.
        assert!(wait_until(
            || names.iter().all(|name| !overseer.is_manager_active(name)),
            WAIT
        ));
        assert!(!stopper.is_finished());

        for gate in &gates {
            gate.send(()).unwrap();
        }
        stopper.join().unwrap();
        assert_eq!(ops.0.copies.load(Ordering::SeqCst), names.len());
    }

    #[test]
    fn test_run_all_with_max_time_winds_down() {
        let (ops, _started_rx) = GatedOps::new();
        let overseer = overseer_with(&["alpha", "beta"], &ops);

        overseer
            .run_all(Some(Duration::from_millis(60)))
            .unwrap();

        assert!(!overseer.is_manager_active("alpha"));
        assert!(!overseer.is_manager_active("beta"));
        assert!(ops.0.copies.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_remove_stops_and_unregisters() {
        let (ops, _started_rx) = GatedOps::new();
        let mut overseer = overseer_with(&["alpha"], &ops);

        assert!(overseer.start("alpha"));
        assert!(wait_until(|| overseer.is_manager_active("alpha"), WAIT));
        assert!(overseer.remove("alpha", true));
        assert!(overseer.manager_names().is_empty());
        assert!(!overseer.remove("alpha", true));
    }
}
