//! Merging completed task payloads into the catalog.
//!
//! Reconciliation runs on the harvest driver after fan-in, never inside a
//! worker. Every merge is keyed by domain id, so results of one kind can be
//! applied in any order.

use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::MetadataCatalog;
use crate::harvest::constellation::{Probe, ProcedureOfferings};
use crate::harvest::formats::{
    DataAvailability, FeatureCollection, ObservationCollection, ResponseDocument,
};
use crate::harvest::location::{resolve_location, ResolvedLocation};
use crate::harvest::request::OperationKind;
use crate::model::{Station, Timeseries};
use crate::traits::ReferencingHelper;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("Expected a {expected} response, got {actual}")]
    UnexpectedResponse {
        expected: OperationKind,
        actual: OperationKind,
    },

    #[error("Unknown {kind} '{id}'")]
    UnknownEntity { kind: &'static str, id: String },

    #[error("No station for '{0}'")]
    UnknownStation(String),

    #[error("Catalog is complete and can no longer be modified")]
    CatalogFrozen,
}

/// Counters of what reconciliation did to the catalog.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub stations_created: usize,
    pub features_created: usize,
    pub constellations_attached: usize,
    pub locations_reprojected: usize,
    pub locations_assumed_canonical: usize,
    pub timeseries_emitted: usize,
    pub timeseries_attached: usize,
    pub timeseries_dropped: usize,
    pub records_dropped: usize,
    pub members_dropped: usize,
    pub units_set: usize,
    pub responses_rejected: usize,
}

impl ReconcileStats {
    pub fn merge(&mut self, other: ReconcileStats) {
        self.stations_created += other.stations_created;
        self.features_created += other.features_created;
        self.constellations_attached += other.constellations_attached;
        self.locations_reprojected += other.locations_reprojected;
        self.locations_assumed_canonical += other.locations_assumed_canonical;
        self.timeseries_emitted += other.timeseries_emitted;
        self.timeseries_attached += other.timeseries_attached;
        self.timeseries_dropped += other.timeseries_dropped;
        self.records_dropped += other.records_dropped;
        self.members_dropped += other.members_dropped;
        self.units_set += other.units_set;
        self.responses_rejected += other.responses_rejected;
    }
}

pub struct ResponseReconciler<'a> {
    procedure_offerings: &'a ProcedureOfferings,
    referencing: &'a dyn ReferencingHelper,
}

impl<'a> ResponseReconciler<'a> {
    pub fn new(
        procedure_offerings: &'a ProcedureOfferings,
        referencing: &'a dyn ReferencingHelper,
    ) -> Self {
        Self {
            procedure_offerings,
            referencing,
        }
    }

    /// Applies one completed payload.
    ///
    /// Feature and observation responses are merged directly; availability
    /// responses yield timeseries which are returned so they can be attached
    /// once all stations are known.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::UnexpectedResponse`] when the payload does not
    /// answer `expected`; [`ReconcileError::CatalogFrozen`] after completion.
    pub fn reconcile(
        &self,
        catalog: &mut MetadataCatalog,
        expected: OperationKind,
        probe: &Probe,
        document: ResponseDocument,
        stats: &mut ReconcileStats,
    ) -> Result<Vec<Timeseries>, ReconcileError> {
        let actual = document.kind();
        match (expected, document) {
            (OperationKind::GetFeatureOfInterest, ResponseDocument::FeatureOfInterest(fc)) => {
                self.reconcile_features(catalog, probe, fc, stats)?;
                Ok(Vec::new())
            }
            (OperationKind::GetDataAvailability, ResponseDocument::DataAvailability(da)) => {
                Ok(self.reconcile_availability(catalog, probe.phenomenon(), da, stats))
            }
            (OperationKind::GetObservation, ResponseDocument::Observation(oc)) => {
                self.reconcile_observations(catalog, oc, stats)?;
                Ok(Vec::new())
            }
            _ => Err(ReconcileError::UnexpectedResponse { expected, actual }),
        }
    }

    /// Creates stations and features, and attaches the probed constellation
    /// bound to each member's feature id.
    pub fn reconcile_features(
        &self,
        catalog: &mut MetadataCatalog,
        probe: &Probe,
        collection: FeatureCollection,
        stats: &mut ReconcileStats,
    ) -> Result<(), ReconcileError> {
        for member in collection.members {
            let id = member.id.trim();
            if id.is_empty() {
                warn!(probe = ?probe, "Feature member without id dropped");
                stats.members_dropped += 1;
                continue;
            }

            if catalog.station(id).is_none() {
                let resolved = member
                    .shape
                    .as_ref()
                    .and_then(|shape| resolve_location(shape, self.referencing));
                let Some(resolved) = resolved else {
                    warn!(feature = id, "Feature has no readable point geometry, dropped");
                    stats.members_dropped += 1;
                    continue;
                };
                match &resolved {
                    ResolvedLocation::Reprojected(_) => stats.locations_reprojected += 1,
                    ResolvedLocation::AssumedCanonical(_) => {
                        stats.locations_assumed_canonical += 1
                    }
                }
                if catalog.insert_station(Station::new(id, resolved.into_location()))? {
                    stats.stations_created += 1;
                }
            }

            if catalog.upsert_feature(id, member.name.as_deref())? {
                stats.features_created += 1;
            }

            if let Some(constellation) = probe.constellation() {
                match catalog.attach_constellation(id, constellation.with_feature(id)) {
                    Ok(true) => stats.constellations_attached += 1,
                    Ok(false) => {}
                    Err(ReconcileError::CatalogFrozen) => return Err(ReconcileError::CatalogFrozen),
                    Err(e) => {
                        warn!(error = %e, station = id, "Constellation not attached");
                    }
                }
            }
        }
        Ok(())
    }

    /// Expands availability records into timeseries via the
    /// procedure-to-offerings index.
    pub fn reconcile_availability(
        &self,
        catalog: &MetadataCatalog,
        phenomenon: &str,
        availability: DataAvailability,
        stats: &mut ReconcileStats,
    ) -> Vec<Timeseries> {
        let mut timeseries = Vec::new();
        for record in availability.members {
            let feature = record.feature_of_interest.trim();
            let procedure = record.procedure.trim();

            if let Some(observed) = record.observed_property.as_deref().map(str::trim) {
                if observed != phenomenon {
                    warn!(
                        observed,
                        phenomenon, "Availability record for another phenomenon dropped"
                    );
                    stats.records_dropped += 1;
                    continue;
                }
            }

            let Some(offerings) = self.procedure_offerings.offerings_of(procedure) else {
                warn!(
                    procedure,
                    phenomenon, "Procedure doesn't exist in capabilities document"
                );
                stats.records_dropped += 1;
                continue;
            };

            for offering in offerings {
                timeseries.push(Timeseries::new(
                    phenomenon,
                    procedure,
                    offering,
                    feature,
                    catalog.service().clone(),
                ));
            }
        }
        stats.timeseries_emitted += timeseries.len();
        debug!(phenomenon, count = timeseries.len(), "Timeseries from data availability");
        timeseries
    }

    /// Attaches each timeseries to the station owning its feature.
    pub fn attach_timeseries(
        &self,
        catalog: &mut MetadataCatalog,
        timeseries: Vec<Timeseries>,
        stats: &mut ReconcileStats,
    ) -> Result<(), ReconcileError> {
        for ts in timeseries {
            let label = format!("{} @ {}", ts.category, ts.feature);
            match catalog.attach_timeseries(ts) {
                Ok(true) => stats.timeseries_attached += 1,
                Ok(false) => {}
                Err(ReconcileError::CatalogFrozen) => return Err(ReconcileError::CatalogFrozen),
                Err(e) => {
                    warn!(timeseries = %label, error = %e, "Timeseries not added");
                    stats.timeseries_dropped += 1;
                }
            }
        }
        Ok(())
    }

    /// Sets units of measure on the shared phenomenon entries.
    pub fn reconcile_observations(
        &self,
        catalog: &mut MetadataCatalog,
        observations: ObservationCollection,
        stats: &mut ReconcileStats,
    ) -> Result<(), ReconcileError> {
        for member in observations.members {
            let phenomenon = member.observed_property.trim();
            let uom = member.uom.unwrap_or_default();
            match catalog.set_unit_of_measure(phenomenon, uom) {
                Ok(()) => stats.units_set += 1,
                Err(ReconcileError::CatalogFrozen) => return Err(ReconcileError::CatalogFrozen),
                Err(e) => {
                    warn!(error = %e, "Unit of measure dropped");
                    stats.members_dropped += 1;
                }
            }
        }
        Ok(())
    }
}
