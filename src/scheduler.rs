use crate::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use crate::workload::Workload;
use std::cmp::Reverse;

/// Kernel-level scheduling policy.
///
/// Decides which pending workload the dispatcher pulls next. Ties are broken
/// by submission order (lowest pending index wins).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display)]
pub enum SchedulingPolicy {
    /// Dispatch in submission order.
    #[default]
    #[strum(serialize = "FIFO")]
    Fifo,
    /// Dispatch the highest-priority workload first.
    #[strum(serialize = "Priority")]
    Priority,
    /// Rotate a cursor over the pending list.
    #[strum(serialize = "Round-Robin")]
    RoundRobin,
    /// Dispatch the workload with the fewest estimated instructions first.
    #[strum(serialize = "Shortest-Job-First")]
    ShortestJobFirst,
}

#[derive(Debug, Default)]
struct Buckets {
    pending: Vec<Arc<Workload>>,
    running: Vec<Arc<Workload>>,
    completed: Vec<Arc<Workload>>,
    /// Round-robin cursor. Carries over between pulls and advances past the
    /// removed slot, so consecutive pulls walk the surviving entries.
    cursor: usize,
}

/// Workload admission queue with pluggable ordering.
///
/// Workloads move through three buckets: pending on submission, running once
/// pulled by the dispatcher, completed when their last block retires. All
/// three live behind a single mutex; `has_pending` reads a lock-free hint
/// that may lag behind the buckets by one transition.
#[derive(Debug)]
pub struct WorkloadScheduler {
    policy: SchedulingPolicy,
    buckets: Mutex<Buckets>,
    pending_hint: AtomicUsize,
}

impl Default for WorkloadScheduler {
    fn default() -> Self {
        Self::new(SchedulingPolicy::default())
    }
}

impl WorkloadScheduler {
    #[must_use]
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self {
            policy,
            buckets: Mutex::new(Buckets::default()),
            pending_hint: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    pub fn add_workload(&self, workload: Arc<Workload>) {
        let mut buckets = self.buckets.lock();
        buckets.pending.push(workload);
        self.pending_hint
            .store(buckets.pending.len(), Ordering::Release);
    }

    /// Lock-free pending check.
    ///
    /// A hint only: callers that need an exact answer must pull under the
    /// bucket lock via [`get_next_workload`](Self::get_next_workload).
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending_hint.load(Ordering::Acquire) > 0
    }

    /// Pull one pending workload according to the policy and move it to the
    /// running bucket.
    #[must_use]
    pub fn get_next_workload(&self) -> Option<Arc<Workload>> {
        let mut buckets = self.buckets.lock();
        if buckets.pending.is_empty() {
            return None;
        }

        let index = match self.policy {
            SchedulingPolicy::Fifo => 0,
            SchedulingPolicy::Priority => {
                buckets
                    .pending
                    .iter()
                    .enumerate()
                    .max_by_key(|(i, workload)| (workload.priority(), Reverse(*i)))
                    .map(|(i, _)| i)?
            }
            SchedulingPolicy::RoundRobin => {
                let index = buckets.cursor % buckets.pending.len();
                buckets.cursor += index + 1;
                index
            }
            SchedulingPolicy::ShortestJobFirst => {
                buckets
                    .pending
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, workload)| workload.estimated_instructions())
                    .map(|(i, _)| i)?
            }
        };

        let workload = buckets.pending.remove(index);
        buckets.running.push(Arc::clone(&workload));
        self.pending_hint
            .store(buckets.pending.len(), Ordering::Release);
        log::debug!(
            "scheduler[{}]: pulled workload {} ({} pending)",
            self.policy,
            workload,
            buckets.pending.len()
        );
        Some(workload)
    }

    /// Move a workload from pending to running. No effect if it is not
    /// pending.
    pub fn mark_running(&self, workload: &Arc<Workload>) {
        let mut buckets = self.buckets.lock();
        if let Some(position) = buckets
            .pending
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, workload))
        {
            let workload = buckets.pending.remove(position);
            buckets.running.push(workload);
            self.pending_hint
                .store(buckets.pending.len(), Ordering::Release);
        }
    }

    /// Move a workload from running to completed. No effect if it is not
    /// running.
    pub fn mark_completed(&self, workload: &Arc<Workload>) {
        let mut buckets = self.buckets.lock();
        if let Some(position) = buckets
            .running
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, workload))
        {
            let workload = buckets.running.remove(position);
            buckets.completed.push(workload);
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.buckets.lock().pending.len()
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        self.buckets.lock().running.len()
    }

    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.buckets.lock().completed.len()
    }

    #[must_use]
    pub fn completed_workloads(&self) -> Vec<Arc<Workload>> {
        self.buckets.lock().completed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{KernelConfig, WorkloadKind};

    fn workload(name: &str, priority: i32, estimated_instructions: u64) -> Arc<Workload> {
        let mut workload = Workload::new(
            name,
            WorkloadKind::Custom,
            KernelConfig::new(1u32, (32, 1, 1)),
        );
        workload.set_priority(priority);
        workload.set_estimated_instructions(estimated_instructions);
        Arc::new(workload)
    }

    fn submit_seed(scheduler: &WorkloadScheduler) {
        scheduler.add_workload(workload("A", 1, 1000));
        scheduler.add_workload(workload("B", 5, 500));
        scheduler.add_workload(workload("C", 3, 200));
        scheduler.add_workload(workload("D", 5, 900));
    }

    fn drain(scheduler: &WorkloadScheduler) -> Vec<String> {
        let mut order = Vec::new();
        while let Some(workload) = scheduler.get_next_workload() {
            order.push(workload.name().to_string());
        }
        order
    }

    #[test]
    fn fifo_dispatch_order() {
        let scheduler = WorkloadScheduler::new(SchedulingPolicy::Fifo);
        submit_seed(&scheduler);
        assert_eq!(drain(&scheduler), ["A", "B", "C", "D"]);
    }

    #[test]
    fn priority_dispatch_order() {
        let scheduler = WorkloadScheduler::new(SchedulingPolicy::Priority);
        submit_seed(&scheduler);
        // B and D tie at priority 5, B was submitted first
        assert_eq!(drain(&scheduler), ["B", "D", "C", "A"]);
    }

    #[test]
    fn round_robin_dispatch_order() {
        let scheduler = WorkloadScheduler::new(SchedulingPolicy::RoundRobin);
        submit_seed(&scheduler);
        assert_eq!(drain(&scheduler), ["A", "C", "D", "B"]);
    }

    #[test]
    fn shortest_job_first_dispatch_order() {
        let scheduler = WorkloadScheduler::new(SchedulingPolicy::ShortestJobFirst);
        submit_seed(&scheduler);
        assert_eq!(drain(&scheduler), ["C", "B", "D", "A"]);
    }

    #[test]
    fn default_policy_is_fifo() {
        let scheduler = WorkloadScheduler::default();
        assert_eq!(scheduler.policy(), SchedulingPolicy::Fifo);
    }

    #[test]
    fn buckets_conserve_workloads() {
        let scheduler = WorkloadScheduler::new(SchedulingPolicy::Fifo);
        submit_seed(&scheduler);
        let submitted = 4;

        let total = |s: &WorkloadScheduler| {
            s.pending_count() + s.running_count() + s.completed_count()
        };
        assert_eq!(total(&scheduler), submitted);

        let first = scheduler.get_next_workload().unwrap();
        assert_eq!(scheduler.pending_count(), 3);
        assert_eq!(scheduler.running_count(), 1);
        assert_eq!(total(&scheduler), submitted);

        scheduler.mark_completed(&first);
        assert_eq!(scheduler.running_count(), 0);
        assert_eq!(scheduler.completed_count(), 1);
        assert_eq!(total(&scheduler), submitted);
    }

    #[test]
    fn mark_operations_are_idempotent() {
        let scheduler = WorkloadScheduler::new(SchedulingPolicy::Fifo);
        let tracked = workload("tracked", 0, 0);
        let stranger = workload("stranger", 0, 0);
        scheduler.add_workload(Arc::clone(&tracked));

        // not in any bucket, both are no-ops
        scheduler.mark_running(&stranger);
        scheduler.mark_completed(&stranger);
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(scheduler.completed_count(), 0);

        scheduler.mark_running(&tracked);
        scheduler.mark_running(&tracked);
        assert_eq!(scheduler.running_count(), 1);

        scheduler.mark_completed(&tracked);
        scheduler.mark_completed(&tracked);
        assert_eq!(scheduler.completed_count(), 1);
    }

    #[test]
    fn pending_hint_tracks_bucket() {
        let scheduler = WorkloadScheduler::new(SchedulingPolicy::Fifo);
        assert!(!scheduler.has_pending());
        scheduler.add_workload(workload("w", 0, 0));
        assert!(scheduler.has_pending());
        let _ = scheduler.get_next_workload().unwrap();
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn policy_display_names() {
        assert_eq!(SchedulingPolicy::Fifo.to_string(), "FIFO");
        assert_eq!(SchedulingPolicy::Priority.to_string(), "Priority");
        assert_eq!(SchedulingPolicy::RoundRobin.to_string(), "Round-Robin");
        assert_eq!(
            SchedulingPolicy::ShortestJobFirst.to_string(),
            "Shortest-Job-First"
        );
    }
}
