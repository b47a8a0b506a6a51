//! Job lifecycle manager: owns the cron scheduler, the typed job registry,
//! and the failure handling that lets a broken tenant configuration disable
//! itself instead of retrying forever.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use crowdecho_common::{TenantRef, Window};
use crowdecho_store::PreferencesRow;

use crate::alerting::AlertingEngine;
use crate::classify::ClassifyRunner;
use crate::fetcher::SourceFetcher;
use crate::ingest::IngestEngine;
use crate::metrics::MetricsAggregator;
use crate::scheduler::lease::{LeaseMap, CLASSIFY_LEASE_DURATION};
use crate::scheduler::policy::RetryPolicy;
use crate::scheduler::registry::{JobClass, JobKey, JobRegistry};
use crate::traits::{Classifier, ContentSource, FeedbackStore, NotifySink};

/// Class-wide cadences. Tenant ingestion runs on the tenant's own cron;
/// classification and aggregation tick on fixed schedules.
const CLASSIFY_SCHEDULE: &str = "0 */15 * * * *";
const AGGREGATE_SCHEDULE: &str = "0 5 * * * *";

/// Shared dependencies every job run needs. One Arc travels into each cron
/// closure; no other in-process state outlives a run.
pub struct PipelineDeps {
    pub store: Arc<dyn FeedbackStore>,
    pub source: Arc<dyn ContentSource>,
    pub classifier: Arc<dyn Classifier>,
    pub sink: Arc<dyn NotifySink>,
    pub registry: JobRegistry,
    pub leases: LeaseMap,
    pub classify_policy: RetryPolicy,
    pub page_size: u32,
}

pub struct JobManager {
    scheduler: JobScheduler,
    deps: Arc<PipelineDeps>,
}

impl JobManager {
    pub async fn new(
        store: Arc<dyn FeedbackStore>,
        source: Arc<dyn ContentSource>,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn NotifySink>,
        page_size: u32,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            deps: Arc::new(PipelineDeps {
                store,
                source,
                classifier,
                sink,
                registry: JobRegistry::new(),
                leases: LeaseMap::new(CLASSIFY_LEASE_DURATION),
                classify_policy: RetryPolicy::classification(),
                page_size,
            }),
        })
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        Ok(())
    }

    /// Switch a tenant's ingestion on: persist the cron, then register (or
    /// replace) the recurring fetch job under the tenant's key.
    pub async fn start_ingestion(&self, tenant: TenantRef, cron: &str) -> Result<()> {
        self.deps.store.upsert_ingestion_schedule(tenant, cron).await?;
        self.register_job(
            JobKey {
                class: JobClass::Fetch,
                tenant,
            },
            cron,
        )
        .await
    }

    /// Switch a tenant's ingestion off: deregister the schedule, terminate
    /// any in-flight run (it is marked failed with a "stopped by user" reason
    /// so the failure handler runs), then clear the active flag.
    pub async fn stop_ingestion(&self, tenant: TenantRef) -> Result<()> {
        let key = JobKey {
            class: JobClass::Fetch,
            tenant,
        };
        self.stop_job(key).await;
        self.deps.store.set_ingestion_active(tenant, false).await?;
        info!(tenant = %tenant, "Ingestion stopped");
        Ok(())
    }

    /// Privileged sweep: deregister every schedule and terminate every
    /// in-flight run for every tenant. Safe to run repeatedly; a second
    /// sweep finds an empty registry and does nothing.
    pub async fn kill_all(&self) -> Result<()> {
        let mut keys = self.deps.registry.cron_keys();
        for key in self.deps.registry.active_keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        info!(jobs = keys.len(), "Kill-all sweep starting");

        for key in keys {
            self.stop_job(key).await;
            if key.class == JobClass::Fetch {
                if let Err(e) = self.deps.store.set_ingestion_active(key.tenant, false).await {
                    warn!(job = %key, error = %e, "Failed to clear ingestion flag");
                }
            }
        }
        Ok(())
    }

    /// Register the recurring jobs one tenant's preferences call for.
    pub async fn register_tenant_jobs(&self, prefs: &PreferencesRow) -> Result<()> {
        let tenant = prefs.tenant();

        if prefs.ingestion_active {
            match &prefs.ingestion_cron {
                Some(cron) => {
                    self.register_job(
                        JobKey {
                            class: JobClass::Fetch,
                            tenant,
                        },
                        cron,
                    )
                    .await?
                }
                None => warn!(tenant = %tenant, "Ingestion active but no cron configured"),
            }
        }

        if prefs.trigger_categorization {
            self.register_job(
                JobKey {
                    class: JobClass::Classify,
                    tenant,
                },
                CLASSIFY_SCHEDULE,
            )
            .await?;
        }

        self.register_job(
            JobKey {
                class: JobClass::AggregateAlert,
                tenant,
            },
            AGGREGATE_SCHEDULE,
        )
        .await
    }

    /// Register a recurring job under its key, replacing any schedule already
    /// registered there so a changed cron string never leaves a stale twin.
    async fn register_job(&self, key: JobKey, cron: &str) -> Result<()> {
        if let Some(old) = self.deps.registry.remove_cron(key) {
            if let Err(e) = self.scheduler.remove(&old).await {
                warn!(job = %key, error = %e, "Failed to deregister replaced schedule");
            }
        }

        let deps = self.deps.clone();
        let job = Job::new_async(cron, move |_uuid, _lock| {
            let deps = deps.clone();
            Box::pin(async move {
                spawn_run(deps, key);
            })
        })?;

        let id = self.scheduler.add(job).await?;
        self.deps.registry.register_cron(key, id);
        info!(job = %key, cron, "Recurring job registered");
        Ok(())
    }

    /// Whether a recurring schedule is registered under this key. Status
    /// read for admin surfaces and tests.
    pub fn has_schedule(&self, key: JobKey) -> bool {
        self.deps.registry.cron_registered(key)
    }

    /// Whether a run is currently in flight for this key.
    pub fn run_active(&self, key: JobKey) -> bool {
        self.deps.registry.run_active(key)
    }

    async fn stop_job(&self, key: JobKey) {
        if let Some(id) = self.deps.registry.remove_cron(key) {
            if let Err(e) = self.scheduler.remove(&id).await {
                warn!(job = %key, error = %e, "Failed to deregister schedule");
            }
        }
        if let Some(run) = self.deps.registry.take_run(key) {
            warn!(job = %key, "Terminating active run: stopped by user");
            run.abort();
        }
    }
}

/// Launch one run for a key. A tick that finds the previous run still active
/// skips instead of overlapping it. The watcher task routes the outcome to
/// the class's failure handler, including cancellation, which surfaces as a
/// "stopped by user" failure rather than a silent drop.
fn spawn_run(deps: Arc<PipelineDeps>, key: JobKey) {
    if deps.registry.run_active(key) {
        warn!(job = %key, "Previous run still active, skipping tick");
        return;
    }

    let run_deps = deps.clone();
    let task = tokio::spawn(async move {
        match key.class {
            JobClass::Fetch => run_fetch_cycle(&run_deps, key.tenant).await,
            JobClass::Classify => run_classify_cycle(&run_deps, key.tenant).await,
            JobClass::AggregateAlert => run_aggregate_alert_cycle(&run_deps, key.tenant).await,
        }
    });

    if !deps.registry.track_run(key, task.abort_handle()) {
        // Lost a race with a concurrent tick; keep the older run.
        task.abort();
        return;
    }

    tokio::spawn(async move {
        let result = task.await;
        deps.registry.finish_run(key);
        match result {
            Ok(Ok(())) => debug!(job = %key, "Run complete"),
            Ok(Err(e)) => handle_job_failure(&deps, key, &format!("{e:#}")).await,
            Err(join_err) if join_err.is_cancelled() => {
                handle_job_failure(&deps, key, "stopped by user").await
            }
            Err(join_err) => handle_job_failure(&deps, key, &format!("panicked: {join_err}")).await,
        }
    });
}

/// Self-healing downgrade: a failed fetch stops re-triggering a broken
/// configuration, an exhausted classification job stops burning its retry
/// budget. The tenant sees the disabled flag on a status read and must
/// explicitly re-enable.
async fn handle_job_failure(deps: &PipelineDeps, key: JobKey, reason: &str) {
    error!(job = %key, reason, "Job failed");

    let downgrade = match key.class {
        JobClass::Fetch => {
            warn!(tenant = %key.tenant, "Disabling ingestion after job failure");
            deps.store.set_ingestion_active(key.tenant, false).await
        }
        JobClass::Classify => {
            warn!(tenant = %key.tenant, "Disabling categorization after job failure");
            deps.store.set_trigger_categorization(key.tenant, false).await
        }
        JobClass::AggregateAlert => Ok(()),
    };

    if let Err(e) = downgrade {
        error!(job = %key, error = %e, "Failed to apply self-healing downgrade");
    }
}

async fn run_fetch_cycle(deps: &PipelineDeps, tenant: TenantRef) -> Result<()> {
    let channels = deps.store.watched_channels(tenant).await?;
    if channels.is_empty() {
        info!(tenant = %tenant, "No watched channels, nothing to fetch");
        return Ok(());
    }

    let fetcher = SourceFetcher::new(deps.source.as_ref(), deps.page_size);
    let batches = fetcher.fetch_channels(&channels).await;

    let engine = IngestEngine::new(deps.store.clone(), deps.source.clone());
    engine.ingest(tenant, &batches).await?;
    Ok(())
}

async fn run_classify_cycle(deps: &PipelineDeps, tenant: TenantRef) -> Result<()> {
    let prefs = deps.store.preferences(tenant).await?;
    if !prefs.map(|p| p.trigger_categorization).unwrap_or(false) {
        debug!(tenant = %tenant, "Categorization trigger is off, skipping");
        return Ok(());
    }

    let Some(_lease) = deps.leases.acquire(tenant) else {
        info!(tenant = %tenant, "Classification lease held, skipping tick");
        return Ok(());
    };

    let runner = ClassifyRunner::new(
        deps.store.clone(),
        deps.classifier.clone(),
        deps.sink.clone(),
    );
    let policy = deps.classify_policy;

    let mut attempt = 1u32;
    loop {
        match runner.run(tenant).await {
            Ok(_) => return Ok(()),
            Err(e) if attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    tenant = %tenant,
                    attempt,
                    error = %e,
                    backoff_secs = delay.as_secs(),
                    "Classification run failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e.context(format!(
                    "classification retry budget exhausted after {} attempts",
                    policy.max_attempts
                )))
            }
        }
    }
}

async fn run_aggregate_alert_cycle(deps: &PipelineDeps, tenant: TenantRef) -> Result<()> {
    let Some(prefs) = deps.store.preferences(tenant).await? else {
        debug!(tenant = %tenant, "No preferences, skipping aggregation");
        return Ok(());
    };

    let now = Utc::now();
    let aggregator = MetricsAggregator::new(deps.store.clone());
    aggregator
        .aggregate(tenant, Window::Hours(prefs.window_hours as u32), now)
        .await?;

    let engine = AlertingEngine::new(deps.store.clone(), deps.sink.clone());
    engine.tick(tenant, now).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{default_preferences, test_tenant, CapturingSink, MemoryStore, MockClassifier, MockSource};

    fn deps_with_store(store: Arc<MemoryStore>) -> PipelineDeps {
        PipelineDeps {
            store,
            source: Arc::new(MockSource::new()),
            classifier: Arc::new(MockClassifier::uniform("Battery", "Widget", 3.0)),
            sink: Arc::new(CapturingSink::new()),
            registry: JobRegistry::new(),
            leases: LeaseMap::new(CLASSIFY_LEASE_DURATION),
            classify_policy: RetryPolicy::classification(),
            page_size: 25,
        }
    }

    #[tokio::test]
    async fn fetch_failure_disables_ingestion() {
        let store = Arc::new(MemoryStore::new());
        let tenant = test_tenant();
        store.seed_preferences(default_preferences(tenant));
        let deps = deps_with_store(store.clone());

        let key = JobKey {
            class: JobClass::Fetch,
            tenant,
        };
        handle_job_failure(&deps, key, "boom").await;

        let prefs = store.stored_preferences(tenant).unwrap();
        assert!(!prefs.ingestion_active);
        assert!(prefs.trigger_categorization, "only the failing class is downgraded");
    }

    #[tokio::test]
    async fn classify_failure_disables_categorization() {
        let store = Arc::new(MemoryStore::new());
        let tenant = test_tenant();
        store.seed_preferences(default_preferences(tenant));
        let deps = deps_with_store(store.clone());

        let key = JobKey {
            class: JobClass::Classify,
            tenant,
        };
        handle_job_failure(&deps, key, "retry budget exhausted").await;

        let prefs = store.stored_preferences(tenant).unwrap();
        assert!(!prefs.trigger_categorization);
        assert!(prefs.ingestion_active, "ingestion is untouched");
    }
}
