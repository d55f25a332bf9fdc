//! Persistent worker threads driven round by round.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use engine_cpu::{WorkStatus, Worker, WorkerKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sleep between `work` calls that found nothing to do.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// A round to run, tagged with its epoch.
#[derive(Clone, Copy, Debug)]
pub struct RoundJob {
    pub epoch: u64,
}

/// Sent by every worker when it leaves a round.
#[derive(Clone, Debug)]
pub struct WorkerReport {
    pub worker: u32,
    pub name: &'static str,
    pub kind: WorkerKind,
    pub epoch: u64,
    /// `Found` or `Stopped`.
    pub status: WorkStatus,
    /// `work` calls that made progress.
    pub steps: u64,
}

/// Worker threads kept alive between rounds.
///
/// Each worker gets its own job channel; `start_round` dispatches to all of
/// them and `next_report` hands back one report per worker.
pub struct WorkerPool {
    job_senders: Vec<Sender<RoundJob>>,
    result_rx: Receiver<WorkerReport>,
    epoch: Arc<AtomicU64>,
    handles: Vec<thread::JoinHandle<()>>,
    producers: usize,
    consumers: usize,
}

impl WorkerPool {
    /// Load every worker and spawn a thread for each one that loaded.
    ///
    /// Fails unless at least one producer and one consumer are available.
    pub fn new(workers: Vec<Box<dyn Worker>>) -> anyhow::Result<Self> {
        let mut loaded = Vec::with_capacity(workers.len());
        for mut worker in workers {
            match worker.load() {
                Ok(()) => loaded.push(worker),
                Err(e) => log::error!(
                    "{} worker {} failed to load, leaving it out: {e:#}",
                    worker.name(),
                    worker.id()
                ),
            }
        }

        let producers = loaded
            .iter()
            .filter(|w| w.kind() == WorkerKind::Producer)
            .count();
        let consumers = loaded.len() - producers;
        if producers == 0 {
            anyhow::bail!("no sieve worker could be started");
        }
        if consumers == 0 {
            anyhow::bail!("no test worker could be started");
        }

        let (result_tx, result_rx) = bounded(loaded.len() * 4);
        let epoch = Arc::new(AtomicU64::new(0));
        let mut job_senders = Vec::with_capacity(loaded.len());
        let mut handles = Vec::with_capacity(loaded.len());

        log::info!(
            "Creating persistent worker pool: {} producers + {} consumers",
            producers,
            consumers
        );

        for worker in loaded {
            let (job_tx, job_rx) = bounded::<RoundJob>(1);
            job_senders.push(job_tx);
            let tx = result_tx.clone();
            let current = epoch.clone();
            let name = format!("{}-{}", worker.name(), worker.id());
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || worker_loop(worker, job_rx, tx, current))?;
            handles.push(handle);
        }

        Ok(Self {
            job_senders,
            result_rx,
            epoch,
            handles,
            producers,
            consumers,
        })
    }

    /// Dispatch a new round to every worker. The caller must have installed the
    /// round's block and collected the previous round's reports.
    pub fn start_round(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        for tx in &self.job_senders {
            let _ = tx.send(RoundJob { epoch });
        }
        log::debug!(
            "Round dispatched to {} workers (epoch {})",
            self.job_senders.len(),
            epoch
        );
        epoch
    }

    /// Wait up to `timeout` for the next report of the current epoch.
    pub fn next_report(&self, timeout: Duration) -> Result<WorkerReport, RecvTimeoutError> {
        let current = self.epoch.load(Ordering::SeqCst);
        loop {
            let report = self.result_rx.recv_timeout(timeout)?;
            if report.epoch == current {
                return Ok(report);
            }
            log::debug!(
                "discarding stale report from worker {} (epoch {} != {})",
                report.worker,
                report.epoch,
                current
            );
        }
    }

    pub fn worker_count(&self) -> usize {
        self.job_senders.len()
    }

    pub fn producer_count(&self) -> usize {
        self.producers
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers
    }

    /// Close the job channels and join every thread.
    pub fn shutdown(mut self) {
        self.job_senders.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    mut worker: Box<dyn Worker>,
    job_rx: Receiver<RoundJob>,
    result_tx: Sender<WorkerReport>,
    current_epoch: Arc<AtomicU64>,
) {
    let (name, id) = (worker.name(), worker.id());
    log::debug!("{name} worker {id} started (persistent)");

    while let Ok(job) = job_rx.recv() {
        if current_epoch.load(Ordering::SeqCst) != job.epoch {
            log::debug!("{name} worker {id} skipping stale round {}", job.epoch);
            continue;
        }

        worker.init();
        let mut steps = 0u64;
        let status = loop {
            match worker.work() {
                WorkStatus::Progress => steps += 1,
                WorkStatus::Idle => thread::sleep(IDLE_BACKOFF),
                done @ (WorkStatus::Found | WorkStatus::Stopped) => break done,
            }
        };

        let _ = result_tx.send(WorkerReport {
            worker: id,
            name,
            kind: worker.kind(),
            epoch: job.epoch,
            status,
            steps,
        });
    }

    worker.shutdown();
    log::debug!("{name} worker {id} exited");
}
