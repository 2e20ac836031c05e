//! Remote application of allocated endpoints.
//!
//! A job either configures a tap (ensure, clear, set) or tears it down
//! (clear, remove). Jobs are grouped by worker. A worker's jobs run in plan
//! order on one connection, so two writes to the same VM's taps never race.
//! Different workers may run concurrently.

use log::{debug, warn};
use rayon::prelude::*;

use crate::alloc::VlanId;
use crate::inventory::Worker;
use crate::remote::{HostConnector, RemoteConfigExecutor, RemoteError};
use super::report::{RemoteAction, StepOutcome, StepRecord};

/// What a batch does to each of its taps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Configure,
    Teardown,
}

/// One endpoint to configure or tear down.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub vm: String,
    pub worker: Worker,
    pub tap: String,
    pub vlan: VlanId,
}

impl Job {
    fn record(&self, action: RemoteAction, outcome: StepOutcome) -> StepRecord {
        StepRecord {
            vm: self.vm.clone(),
            worker: self.worker.name.clone(),
            tap: self.tap.clone(),
            action,
            outcome,
        }
    }
}

/// Runs every job and returns its steps, indexed like `jobs`.
pub(crate) fn run_jobs<C: HostConnector>(
    connector: &C,
    jobs: &[Job],
    mode: Mode,
    parallel: bool,
) -> Vec<Vec<StepRecord>> {
    let batches = batch_by_worker(jobs);
    let run = |(worker, indices): &(&Worker, Vec<usize>)| run_batch(connector, worker, indices, jobs, mode);

    let results: Vec<Vec<(usize, Vec<StepRecord>)>> = if parallel && batches.len() > 1 {
        debug!("Applying {} jobs on {} workers in parallel", jobs.len(), batches.len());
        batches.par_iter().map(run).collect()
    } else {
        batches.iter().map(run).collect()
    };

    let mut ordered = vec![Vec::new(); jobs.len()];
    for (index, steps) in results.into_iter().flatten() {
        ordered[index] = steps;
    }
    ordered
}

/// Job indices per worker, workers in first-seen order.
fn batch_by_worker(jobs: &[Job]) -> Vec<(&Worker, Vec<usize>)> {
    let mut batches: Vec<(&Worker, Vec<usize>)> = Vec::new();
    for (index, job) in jobs.iter().enumerate() {
        match batches.iter_mut().find(|(w, _)| w.name == job.worker.name) {
            Some((_, indices)) => indices.push(index),
            None => batches.push((&job.worker, vec![index])),
        }
    }
    batches
}

fn run_batch<C: HostConnector>(
    connector: &C,
    worker: &Worker,
    indices: &[usize],
    jobs: &[Job],
    mode: Mode,
) -> Vec<(usize, Vec<StepRecord>)> {
    match connector.connect(worker) {
        Ok(mut executor) => indices
            .iter()
            .map(|&i| {
                let steps = match mode {
                    Mode::Configure => apply_job(executor.as_mut(), &jobs[i]),
                    Mode::Teardown => teardown_job(executor.as_mut(), &jobs[i]),
                };
                (i, steps)
            })
            .collect(),
        Err(error) => {
            warn!("{}", error);
            indices
                .iter()
                .map(|&i| (i, unreachable(&jobs[i], error.clone(), mode)))
                .collect()
        }
    }
}

fn skipped_tagging(job: &Job) -> [StepRecord; 2] {
    [
        job.record(RemoteAction::ClearVlan, StepOutcome::Skipped),
        job.record(RemoteAction::SetVlan { vlan: job.vlan }, StepOutcome::Skipped),
    ]
}

fn unreachable(job: &Job, error: RemoteError, mode: Mode) -> Vec<StepRecord> {
    match mode {
        Mode::Configure => {
            let mut steps = vec![job.record(RemoteAction::EnsureTap, StepOutcome::Failed(error))];
            steps.extend(skipped_tagging(job));
            steps
        }
        Mode::Teardown => vec![
            job.record(RemoteAction::ClearVlan, StepOutcome::Failed(error)),
            job.record(RemoteAction::RemoveTap, StepOutcome::Skipped),
        ],
    }
}

fn apply_job(executor: &mut dyn RemoteConfigExecutor, job: &Job) -> Vec<StepRecord> {
    let ensured = match executor.ensure_tap_exists(&job.vm, &job.tap) {
        Ok(true) => StepOutcome::Done,
        Ok(false) => StepOutcome::Failed(RemoteError::TapMissing(job.tap.clone())),
        Err(e) => StepOutcome::Failed(e),
    };

    if let StepOutcome::Failed(error) = &ensured {
        warn!("Cannot ensure tap {} on {} ({}): {}", job.tap, job.vm, job.worker.name, error);
        let mut steps = vec![job.record(RemoteAction::EnsureTap, ensured)];
        steps.extend(skipped_tagging(job));
        return steps;
    }

    // Drop whatever tag the port carried before retagging it
    let cleared = StepOutcome::from(executor.clear_port_vlan(&job.tap));
    if let StepOutcome::Failed(error) = &cleared {
        warn!("Cannot clear VLAN on {} ({}): {}", job.tap, job.vm, error);
    }

    let tagged = StepOutcome::from(executor.set_port_vlan(&job.tap, job.vlan));
    match &tagged {
        StepOutcome::Failed(error) => {
            warn!("Cannot tag {} ({}) with VLAN {}: {}", job.tap, job.vm, job.vlan, error)
        }
        _ => debug!("Tagged {} ({}) with VLAN {}", job.tap, job.vm, job.vlan),
    }

    vec![
        job.record(RemoteAction::EnsureTap, ensured),
        job.record(RemoteAction::ClearVlan, cleared),
        job.record(RemoteAction::SetVlan { vlan: job.vlan }, tagged),
    ]
}

/// Untags the port, then deletes it. The delete runs even when the clear
/// failed.
fn teardown_job(executor: &mut dyn RemoteConfigExecutor, job: &Job) -> Vec<StepRecord> {
    let cleared = StepOutcome::from(executor.clear_port_vlan(&job.tap));
    if let StepOutcome::Failed(error) = &cleared {
        warn!("Cannot clear VLAN {} on {} ({}): {}", job.vlan, job.tap, job.vm, error);
    }
    let removed = StepOutcome::from(executor.remove_tap(&job.tap));
    match &removed {
        StepOutcome::Failed(error) => warn!("Cannot remove tap {} ({}): {}", job.tap, job.vm, error),
        _ => debug!("Removed tap {} ({})", job.tap, job.vm),
    }
    vec![
        job.record(RemoteAction::ClearVlan, cleared),
        job.record(RemoteAction::RemoveTap, removed),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedConnector {
        unreachable: &'static str,
        missing_tap: &'static str,
        calls: Mutex<Vec<String>>,
    }

    struct ScriptedExecutor<'a> {
        worker: String,
        parent: &'a ScriptedConnector,
    }

    impl HostConnector for ScriptedConnector {
        fn connect(&self, worker: &Worker) -> Result<Box<dyn RemoteConfigExecutor + '_>, RemoteError> {
            if worker.name == self.unreachable {
                return Err(RemoteError::Connect {
                    worker: worker.name.clone(),
                    reason: "timed out".to_string(),
                });
            }
            Ok(Box::new(ScriptedExecutor {
                worker: worker.name.clone(),
                parent: self,
            }))
        }
    }

    impl RemoteConfigExecutor for ScriptedExecutor<'_> {
        fn ensure_tap_exists(&mut self, _vm: &str, tap: &str) -> Result<bool, RemoteError> {
            self.parent.calls.lock().unwrap().push(format!("{} ensure {}", self.worker, tap));
            Ok(tap != self.parent.missing_tap)
        }

        fn set_port_vlan(&mut self, tap: &str, vlan: VlanId) -> Result<(), RemoteError> {
            self.parent.calls.lock().unwrap().push(format!("{} set {} {}", self.worker, tap, vlan));
            Ok(())
        }

        fn clear_port_vlan(&mut self, tap: &str) -> Result<(), RemoteError> {
            self.parent.calls.lock().unwrap().push(format!("{} clear {}", self.worker, tap));
            Ok(())
        }

        fn remove_tap(&mut self, tap: &str) -> Result<(), RemoteError> {
            self.parent.calls.lock().unwrap().push(format!("{} remove {}", self.worker, tap));
            Ok(())
        }
    }

    fn worker(name: &str) -> Worker {
        Worker {
            name: name.to_string(),
            address: "10.0.0.1".to_string(),
            ssh_port: 22,
            cpus: 0,
            ram_mb: 0,
        }
    }

    fn job(vm: &str, worker_name: &str, tap: &str, vlan: VlanId) -> Job {
        Job {
            vm: vm.to_string(),
            worker: worker(worker_name),
            tap: tap.to_string(),
            vlan,
        }
    }

    fn connector(unreachable: &'static str, missing_tap: &'static str) -> ScriptedConnector {
        ScriptedConnector {
            unreachable,
            missing_tap,
            calls: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn test_steps_in_job_order() {
        let connector = connector("", "");
        let jobs = vec![
            job("VM1", "w1", "t1", 100),
            job("VM2", "w2", "t2", 100),
            job("VM1", "w1", "t3", 101),
        ];
        for parallel in [false, true] {
            let results = run_jobs(&connector, &jobs, Mode::Configure, parallel);
            assert_eq!(results.len(), 3);
            for (job, steps) in jobs.iter().zip(&results) {
                assert_eq!(steps.len(), 3);
                assert!(steps.iter().all(|s| s.tap == job.tap && s.is_done()));
                assert_eq!(steps[2].action, RemoteAction::SetVlan { vlan: job.vlan });
            }
        }
    }

    #[test]
    fn test_same_worker_runs_sequentially_in_order() {
        let connector = connector("", "");
        let jobs = vec![job("VM1", "w1", "t1", 100), job("VM1", "w1", "t2", 101)];
        run_jobs(&connector, &jobs, Mode::Configure, true);
        let calls = connector.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec!["w1 ensure t1", "w1 clear t1", "w1 set t1 100", "w1 ensure t2", "w1 clear t2", "w1 set t2 101"]
        );
    }

    #[test]
    fn test_unreachable_worker_does_not_block_others() {
        let connector = connector("w2", "");
        let jobs = vec![job("VM1", "w1", "t1", 100), job("VM2", "w2", "t2", 100)];
        let results = run_jobs(&connector, &jobs, Mode::Configure, false);
        assert!(results[0].iter().all(StepRecord::is_done));
        assert!(matches!(results[1][0].outcome, StepOutcome::Failed(RemoteError::Connect { .. })));
        assert_eq!(results[1][1].outcome, StepOutcome::Skipped);
        assert_eq!(results[1][2].outcome, StepOutcome::Skipped);
    }

    #[test]
    fn test_missing_tap_skips_tagging() {
        let connector = connector("", "t2");
        let jobs = vec![job("VM1", "w1", "t2", 100)];
        let results = run_jobs(&connector, &jobs, Mode::Configure, false);
        assert_eq!(
            results[0][0].outcome,
            StepOutcome::Failed(RemoteError::TapMissing("t2".to_string()))
        );
        let calls = connector.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["w1 ensure t2"]);
    }

    #[test]
    fn test_teardown_clears_then_removes() {
        let connector = connector("", "");
        let jobs = vec![job("VM1", "w1", "t1", 100), job("VM2", "w1", "t2", 101)];
        let results = run_jobs(&connector, &jobs, Mode::Teardown, false);
        assert!(results.iter().all(|steps| steps.len() == 2 && steps.iter().all(StepRecord::is_done)));
        assert_eq!(results[1][1].action, RemoteAction::RemoveTap);
        let calls = connector.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["w1 clear t1", "w1 remove t1", "w1 clear t2", "w1 remove t2"]);
    }

    #[test]
    fn test_teardown_on_unreachable_worker() {
        let connector = connector("w1", "");
        let results = run_jobs(&connector, &[job("VM1", "w1", "t1", 100)], Mode::Teardown, false);
        assert!(matches!(results[0][0].outcome, StepOutcome::Failed(RemoteError::Connect { .. })));
        assert_eq!(results[0][1].outcome, StepOutcome::Skipped);
    }
}
