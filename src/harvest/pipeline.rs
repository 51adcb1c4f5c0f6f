//! Harvest driver.
//!
//! This module provides the [`HarvestPipeline`] coordinator that runs one
//! harvest end to end:
//! - Capabilities reading and constellation enumeration
//! - Sub-request fan-out on a bounded worker pool with per-task timeout
//! - Single-threaded fan-in reconciliation into a [`MetadataCatalog`]
//! - Structured logging via `tracing`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use crate::catalog::MetadataCatalog;
use crate::config::HarvestConfig;
use crate::executor::{HarvestScheduler, ScheduleSummary, SchedulerError, TaskFuture, TaskOutcome};
use crate::harvest::capabilities::{CapabilitiesDocument, CapabilitiesError, CapabilitiesReader};
use crate::harvest::constellation::{ConstellationEnumerator, Enumeration, EnumerationPolicy, Probe};
use crate::harvest::formats::ResponseDocument;
use crate::harvest::location::{normalize_srs, srs_id};
use crate::harvest::reconcile::{ReconcileStats, ResponseReconciler};
use crate::harvest::request::{bbox_filter, OperationKind, RequestBuilder, SubRequest};
use crate::model::SosService;
use crate::traits::{OperationExecutor, ReferencingHelper};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Identifies one sub-request across fan-out and fan-in.
///
/// Ordered by operation first, so fan-in applies feature responses before
/// availability and observation responses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskKey {
    pub operation: OperationKind,
    pub probe: Probe,
}

/// Complete harvest result.
#[derive(Debug)]
pub struct HarvestResult {
    /// Frozen catalog
    pub catalog: MetadataCatalog,

    /// Timing and coverage statistics
    pub stats: HarvestStats,
}

/// Statistics about one harvest.
#[derive(Debug, Default, Clone)]
pub struct HarvestStats {
    /// Total time spent on the harvest (milliseconds)
    pub total_duration_ms: u64,

    /// Time from first submission to last collected outcome (milliseconds)
    pub fan_out_duration_ms: u64,

    /// Offering entries skipped as malformed
    pub offerings_skipped: usize,

    /// Work items produced by enumeration
    pub probes: usize,

    /// Per-outcome task counts. A task whose payload could not be
    /// reconciled counts as failed, not completed.
    pub tasks: ScheduleSummary,

    /// What fan-in did to the catalog
    pub reconcile: ReconcileStats,
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Fatal harvest errors; everything else degrades the catalog instead.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// Capabilities missing or unreadable
    #[error("Capabilities unusable: {0}")]
    Capabilities(#[from] CapabilitiesError),

    /// Worker pool could not be created
    #[error("Worker pool unavailable: {0}")]
    WorkerPool(#[from] SchedulerError),
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// One-service harvest coordinator.
///
/// # Example
///
/// ```ignore
/// use sensorweb_harvester::{EpsgReferencing, HarvestPipeline, SosService};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let pipeline = HarvestPipeline::new(Arc::new(executor), Arc::new(EpsgReferencing))
///     .with_timeout(Duration::from_secs(30))
///     .with_concurrency(8);
///
/// let result = pipeline
///     .execute(SosService::new("http://sos.example.org", "2.0.0"), &capabilities)
///     .await?;
/// println!("Harvested {} stations", result.catalog.station_count());
/// ```
pub struct HarvestPipeline {
    executor: Arc<dyn OperationExecutor>,
    referencing: Arc<dyn ReferencingHelper>,
    policy: EnumerationPolicy,
    concurrency: usize,

    /// Maximum wait per sub-request, measured from submission
    task_timeout: Duration,
}

impl HarvestPipeline {
    /// Creates a pipeline.
    ///
    /// Default configuration:
    /// - Policy: cross product
    /// - Concurrency: 8 workers
    /// - Timeout: 30 seconds per sub-request
    pub fn new(
        executor: Arc<dyn OperationExecutor>,
        referencing: Arc<dyn ReferencingHelper>,
    ) -> Self {
        Self {
            executor,
            referencing,
            policy: EnumerationPolicy::CrossProduct,
            concurrency: 8,
            task_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(
        config: &HarvestConfig,
        executor: Arc<dyn OperationExecutor>,
        referencing: Arc<dyn ReferencingHelper>,
    ) -> Self {
        Self::new(executor, referencing)
            .with_policy(config.harvest.policy)
            .with_concurrency(config.harvest.concurrency)
            .with_timeout(Duration::from_millis(config.harvest.timeout_ms))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, workers: usize) -> Self {
        self.concurrency = workers;
        self
    }

    pub fn with_policy(mut self, policy: EnumerationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Harvests one service.
    ///
    /// # Errors
    ///
    /// Only fatal conditions are returned: unusable capabilities or a
    /// worker pool that cannot be created. Timed-out and failed
    /// sub-requests leave the catalog partially covered instead.
    #[instrument(skip_all, fields(service = %service.url, policy = ?self.policy))]
    pub async fn execute(
        &self,
        mut service: SosService,
        capabilities: &CapabilitiesDocument,
    ) -> Result<HarvestResult, PipelineError> {
        let start = Instant::now();
        let mut stats = HarvestStats::default();

        // ====================================================================
        // Stage 1: Enumeration
        // ====================================================================

        let contents = CapabilitiesReader::read(capabilities)?;
        let scheduler = HarvestScheduler::new(self.concurrency, self.task_timeout)?;
        stats.offerings_skipped = contents.skipped;

        if service.label.is_none() {
            service.label = contents.title.clone();
        }

        let mut enumeration = ConstellationEnumerator::new(self.policy).enumerate(&contents);
        stats.probes = enumeration.probes.len();

        let lookup = std::mem::take(&mut enumeration.lookup);
        let mut catalog = MetadataCatalog::new(service, lookup, self.task_timeout);

        let srs = match &enumeration.bbox {
            Some(bbox) => match normalize_srs(&bbox.srs) {
                Ok(code) => Some(code),
                Err(e) => {
                    error!(error = %e, "Could not insert spatial metadata");
                    None
                }
            },
            None => {
                warn!("No bounding box advertised, reference system unknown");
                None
            }
        };
        if let Err(e) = catalog.set_srs(srs) {
            warn!(error = %e, "Reference system not stored");
        }

        // ====================================================================
        // Stage 2: Fan-out
        // ====================================================================

        let tasks = self.build_tasks(catalog.service(), &enumeration);
        info!(tasks = tasks.len(), "Sending sub-requests");

        let fan_out_start = Instant::now();
        let outcomes = scheduler.schedule(tasks).await;
        stats.fan_out_duration_ms = fan_out_start.elapsed().as_millis() as u64;
        stats.tasks = ScheduleSummary::of(&outcomes);

        // ====================================================================
        // Stage 3: Fan-in
        // ====================================================================

        stats.reconcile = self.reconcile_all(&mut catalog, &enumeration, outcomes);
        let rejected = stats.reconcile.responses_rejected;
        stats.tasks.completed = stats.tasks.completed.saturating_sub(rejected);
        stats.tasks.failed += rejected;

        catalog.log_summary();
        catalog.mark_complete();

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            duration_ms = stats.total_duration_ms,
            stations = catalog.station_count(),
            timed_out = stats.tasks.timed_out,
            failed = stats.tasks.failed,
            "Harvest completed"
        );

        Ok(HarvestResult { catalog, stats })
    }

    fn build_tasks(
        &self,
        service: &SosService,
        enumeration: &Enumeration,
    ) -> Vec<(TaskKey, TaskFuture<ResponseDocument>)> {
        let builder = RequestBuilder::new(service);
        let mut requests: Vec<(TaskKey, SubRequest)> = Vec::new();

        for probe in &enumeration.probes {
            match probe {
                Probe::Constellation(constellation) => {
                    let filter = enumeration.bbox_for(&constellation.offering).and_then(|bbox| {
                        match srs_id(&bbox.srs, self.referencing.as_ref()) {
                            Ok(id) => Some(bbox_filter(bbox, id)),
                            Err(e) => {
                                debug!(error = %e, offering = %constellation.offering, "Spatial filter omitted");
                                None
                            }
                        }
                    });
                    requests.push((
                        TaskKey {
                            operation: OperationKind::GetFeatureOfInterest,
                            probe: probe.clone(),
                        },
                        builder.features_for_constellation(constellation, filter.as_deref()),
                    ));
                }
                Probe::Phenomenon(phenomenon) => {
                    for request in [
                        builder.features_for_phenomenon(phenomenon),
                        builder.data_availability(phenomenon),
                        builder.empty_observation(phenomenon),
                    ] {
                        requests.push((
                            TaskKey {
                                operation: request.operation,
                                probe: probe.clone(),
                            },
                            request,
                        ));
                    }
                }
            }
        }

        requests
            .into_iter()
            .map(|(key, request)| {
                let executor = Arc::clone(&self.executor);
                let body: TaskFuture<ResponseDocument> =
                    Box::pin(async move { executor.execute(request).await });
                (key, body)
            })
            .collect()
    }

    fn reconcile_all(
        &self,
        catalog: &mut MetadataCatalog,
        enumeration: &Enumeration,
        outcomes: BTreeMap<TaskKey, TaskOutcome<ResponseDocument>>,
    ) -> ReconcileStats {
        let reconciler =
            ResponseReconciler::new(&enumeration.procedure_offerings, self.referencing.as_ref());
        let mut stats = ReconcileStats::default();
        let mut timeseries = Vec::new();

        for (key, outcome) in outcomes {
            let document = match outcome {
                TaskOutcome::Completed(document) => document,
                TaskOutcome::TimedOut | TaskOutcome::Failed(_) => {
                    warn!(operation = %key.operation, probe = ?key.probe, "Get no result");
                    continue;
                }
            };
            match reconciler.reconcile(catalog, key.operation, &key.probe, document, &mut stats) {
                Ok(found) => timeseries.extend(found),
                Err(e) => {
                    warn!(operation = %key.operation, probe = ?key.probe, error = %e, "Response not reconciled");
                    stats.responses_rejected += 1;
                }
            }
        }

        if let Err(e) = reconciler.attach_timeseries(catalog, timeseries, &mut stats) {
            warn!(error = %e, "Timeseries not attached");
        }
        stats
    }
}

// ============================================================================
// Tests
// ============================================================================
