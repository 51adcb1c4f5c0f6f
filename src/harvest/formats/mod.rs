//! Parsed response shapes supplied by the operation executor.
//!
//! Services answer the three sub-request kinds with different documents:
//! - `FeatureOfInterest` - sampling features with optional point geometry
//! - `DataAvailability` - (feature, procedure) pairs that actually have data
//! - `Observation` - observation members carrying unit-of-measure annotations

use serde::{Deserialize, Serialize};

use crate::harvest::request::OperationKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseDocument {
    FeatureOfInterest(FeatureCollection),
    DataAvailability(DataAvailability),
    Observation(ObservationCollection),
}

impl ResponseDocument {
    /// Operation this document answers.
    pub fn kind(&self) -> OperationKind {
        match self {
            ResponseDocument::FeatureOfInterest(_) => OperationKind::GetFeatureOfInterest,
            ResponseDocument::DataAvailability(_) => OperationKind::GetDataAvailability,
            ResponseDocument::Observation(_) => OperationKind::GetObservation,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub members: Vec<SamplingFeature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingFeature {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub shape: Option<PointGeometry>,
}

/// A GML-style point: whitespace separated coordinates plus an SRS name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointGeometry {
    pub pos: String,
    #[serde(default)]
    pub srs_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataAvailability {
    #[serde(default)]
    pub members: Vec<AvailabilityRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRecord {
    pub feature_of_interest: String,
    pub procedure: String,
    #[serde(default)]
    pub observed_property: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationCollection {
    #[serde(default)]
    pub members: Vec<ObservationMember>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationMember {
    pub observed_property: String,
    #[serde(default)]
    pub uom: Option<String>,
}
