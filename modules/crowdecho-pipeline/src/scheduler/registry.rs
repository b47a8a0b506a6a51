//! Typed per-tenant job registry: `(job class, tenant) -> handles`, so
//! lookup and removal are O(1) instead of string-matching over job ids.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::AbortHandle;
use uuid::Uuid;

use crowdecho_common::TenantRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobClass {
    Fetch,
    Classify,
    AggregateAlert,
}

/// Unique key for a tenant's recurring job of one class. At most one cron
/// schedule and one in-flight run exist per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub class: JobClass,
    pub tenant: TenantRef,
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}/{}", self.class, self.tenant)
    }
}

#[derive(Default)]
pub struct JobRegistry {
    cron_jobs: Mutex<HashMap<JobKey, Uuid>>,
    active_runs: Mutex<HashMap<JobKey, AbortHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cron schedule under a key, returning the id of any schedule
    /// it replaced so the caller can deregister it from the scheduler.
    pub fn register_cron(&self, key: JobKey, scheduler_job_id: Uuid) -> Option<Uuid> {
        self.cron_jobs
            .lock()
            .expect("registry lock")
            .insert(key, scheduler_job_id)
    }

    pub fn remove_cron(&self, key: JobKey) -> Option<Uuid> {
        self.cron_jobs.lock().expect("registry lock").remove(&key)
    }

    pub fn cron_registered(&self, key: JobKey) -> bool {
        self.cron_jobs.lock().expect("registry lock").contains_key(&key)
    }

    /// Track an in-flight run. Returns false (and leaves the existing run in
    /// place) when one is already active for this key.
    pub fn track_run(&self, key: JobKey, handle: AbortHandle) -> bool {
        let mut runs = self.active_runs.lock().expect("registry lock");
        if runs.contains_key(&key) {
            return false;
        }
        runs.insert(key, handle);
        true
    }

    pub fn run_active(&self, key: JobKey) -> bool {
        self.active_runs.lock().expect("registry lock").contains_key(&key)
    }

    pub fn finish_run(&self, key: JobKey) {
        self.active_runs.lock().expect("registry lock").remove(&key);
    }

    /// Detach the in-flight run's abort handle, if any, for termination.
    pub fn take_run(&self, key: JobKey) -> Option<AbortHandle> {
        self.active_runs.lock().expect("registry lock").remove(&key)
    }

    /// Every key with a registered schedule, for the kill-all sweep.
    pub fn cron_keys(&self) -> Vec<JobKey> {
        self.cron_jobs.lock().expect("registry lock").keys().copied().collect()
    }

    /// Every key with an in-flight run, for the kill-all sweep.
    pub fn active_keys(&self) -> Vec<JobKey> {
        self.active_runs.lock().expect("registry lock").keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(class: JobClass) -> JobKey {
        JobKey {
            class,
            tenant: TenantRef::User(Uuid::new_v4()),
        }
    }

    #[test]
    fn register_replaces_and_returns_previous() {
        let registry = JobRegistry::new();
        let k = key(JobClass::Fetch);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(registry.register_cron(k, first), None);
        assert_eq!(registry.register_cron(k, second), Some(first));
        assert_eq!(registry.remove_cron(k), Some(second));
        assert_eq!(registry.remove_cron(k), None);
    }

    #[test]
    fn keys_are_scoped_per_tenant_and_class() {
        let registry = JobRegistry::new();
        let tenant = TenantRef::Org(Uuid::new_v4());
        let fetch = JobKey { class: JobClass::Fetch, tenant };
        let classify = JobKey { class: JobClass::Classify, tenant };

        registry.register_cron(fetch, Uuid::new_v4());
        registry.register_cron(classify, Uuid::new_v4());
        assert_eq!(registry.cron_keys().len(), 2);

        registry.remove_cron(fetch);
        assert_eq!(registry.cron_keys(), vec![classify]);
    }

    #[tokio::test]
    async fn second_run_for_same_key_is_rejected() {
        let registry = JobRegistry::new();
        let k = key(JobClass::Classify);

        let task = tokio::spawn(async { tokio::time::sleep(std::time::Duration::from_secs(60)).await });
        assert!(registry.track_run(k, task.abort_handle()));
        assert!(!registry.track_run(k, task.abort_handle()));
        assert!(registry.run_active(k));

        registry.take_run(k).expect("run is tracked").abort();
        assert!(!registry.run_active(k));
    }
}
