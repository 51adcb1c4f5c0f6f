//! Harvest module - discovery and reconciliation of service metadata.
//!
//! Stages, leaves first:
//! - **Capabilities**: [`CapabilitiesReader`] turns the capabilities document into offerings
//! - **Enumeration**: [`ConstellationEnumerator`] derives probes and lookup indices
//! - **Requests**: [`RequestBuilder`] describes each sub-request
//! - **Reconciliation**: [`ResponseReconciler`] merges responses into the catalog
//! - **Pipeline**: [`HarvestPipeline`] drives one harvest end to end

pub mod capabilities;
pub mod constellation;
pub mod formats;
pub mod location;
pub mod pipeline;
pub mod reconcile;
pub mod request;

// Re-export commonly used types
pub use capabilities::{
    CapabilitiesDocument, CapabilitiesError, CapabilitiesReader, ObservationOffering,
    ServiceContents,
};
pub use constellation::{
    ConstellationEnumerator, Enumeration, EnumerationPolicy, LookupTables, Probe,
    ProcedureOfferings,
};
pub use formats::{
    AvailabilityRecord, DataAvailability, FeatureCollection, ObservationCollection,
    ObservationMember, PointGeometry, ResponseDocument, SamplingFeature,
};
pub use location::{normalize_srs, EpsgReferencing, ResolvedLocation, SrsError};
pub use pipeline::{HarvestPipeline, HarvestResult, HarvestStats, PipelineError, TaskKey};
pub use reconcile::{ReconcileError, ReconcileStats, ResponseReconciler};
pub use request::{OperationKind, RequestBuilder, SubRequest};
