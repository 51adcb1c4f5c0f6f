//! Pure construction of sub-request descriptions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{BoundingBox, ParameterConstellation, SosService};

pub const WATERML_2_FORMAT: &str = "http://www.opengis.net/waterml/2.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    GetFeatureOfInterest,
    GetDataAvailability,
    GetObservation,
}

impl OperationKind {
    pub fn operation_name(&self) -> &'static str {
        match self {
            OperationKind::GetFeatureOfInterest => "GetFeatureOfInterest",
            OperationKind::GetDataAvailability => "GetDataAvailability",
            OperationKind::GetObservation => "GetObservation",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation_name())
    }
}

/// Abstract request handed to the operation executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubRequest {
    pub operation: OperationKind,
    pub url: String,
    pub version: String,
    pub parameters: BTreeMap<String, String>,
}

impl SubRequest {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

pub struct RequestBuilder<'a> {
    service: &'a SosService,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(service: &'a SosService) -> Self {
        Self { service }
    }

    fn base(&self, operation: OperationKind) -> SubRequest {
        let mut parameters = BTreeMap::new();
        parameters.insert("service".to_string(), "SOS".to_string());
        parameters.insert("version".to_string(), self.service.version.clone());
        SubRequest {
            operation,
            url: self.service.url.clone(),
            version: self.service.version.clone(),
            parameters,
        }
    }

    /// Feature-of-interest request for one constellation, optionally scoped
    /// to a spatial filter.
    pub fn features_for_constellation(
        &self,
        constellation: &ParameterConstellation,
        bbox_filter: Option<&str>,
    ) -> SubRequest {
        let mut request = self.base(OperationKind::GetFeatureOfInterest);
        request
            .parameters
            .insert("phenomenon".to_string(), constellation.phenomenon.clone());
        request
            .parameters
            .insert("procedure".to_string(), constellation.procedure.clone());
        if let Some(filter) = bbox_filter {
            request
                .parameters
                .insert("bbox".to_string(), filter.to_string());
        }
        request
    }

    pub fn features_for_phenomenon(&self, phenomenon: &str) -> SubRequest {
        self.observed_property(OperationKind::GetFeatureOfInterest, phenomenon)
    }

    pub fn data_availability(&self, phenomenon: &str) -> SubRequest {
        self.observed_property(OperationKind::GetDataAvailability, phenomenon)
    }

    /// Observation request answered without values, used for its metadata.
    pub fn empty_observation(&self, phenomenon: &str) -> SubRequest {
        let mut request = self.observed_property(OperationKind::GetObservation, phenomenon);
        request
            .parameters
            .insert("responseFormat".to_string(), WATERML_2_FORMAT.to_string());
        request
    }

    fn observed_property(&self, operation: OperationKind, phenomenon: &str) -> SubRequest {
        let mut request = self.base(operation);
        request
            .parameters
            .insert("observedProperty".to_string(), phenomenon.to_string());
        request
    }
}

/// Spatial filter value scoping a feature query to `bbox`.
///
/// `srs_id` is the numeric EPSG code of the box's reference system.
pub fn bbox_filter(bbox: &BoundingBox, srs_id: u32) -> String {
    format!(
        "om:featureOfInterest/*/sams:shape,{},{},{},{},urn:ogc:def:crs:EPSG::{}",
        bbox.lower_corner[0], bbox.lower_corner[1], bbox.upper_corner[0], bbox.upper_corner[1], srs_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> SosService {
        SosService::new("http://sos.example.org/service", "2.0.0")
    }

    #[test]
    fn test_constellation_request() {
        let service = service();
        let builder = RequestBuilder::new(&service);
        let c = ParameterConstellation::new("off", "proc", "phen");

        let request = builder.features_for_constellation(&c, Some("filter"));

        assert_eq!(request.operation, OperationKind::GetFeatureOfInterest);
        assert_eq!(request.url, "http://sos.example.org/service");
        assert_eq!(request.parameter("service"), Some("SOS"));
        assert_eq!(request.parameter("version"), Some("2.0.0"));
        assert_eq!(request.parameter("phenomenon"), Some("phen"));
        assert_eq!(request.parameter("procedure"), Some("proc"));
        assert_eq!(request.parameter("bbox"), Some("filter"));
    }

    #[test]
    fn test_phenomenon_requests() {
        let service = service();
        let builder = RequestBuilder::new(&service);

        let gda = builder.data_availability("P1");
        assert_eq!(gda.operation, OperationKind::GetDataAvailability);
        assert_eq!(gda.parameter("observedProperty"), Some("P1"));

        let go = builder.empty_observation("P1");
        assert_eq!(go.operation, OperationKind::GetObservation);
        assert_eq!(go.parameter("responseFormat"), Some(WATERML_2_FORMAT));

        let foi = builder.features_for_phenomenon("P1");
        assert_eq!(foi.parameter("observedProperty"), Some("P1"));
        assert_eq!(foi.parameter("procedure"), None);
    }

    #[test]
    fn test_bbox_filter_string() {
        let bbox = BoundingBox {
            lower_corner: [6.5, 50.25],
            upper_corner: [8.0, 52.0],
            srs: "urn:ogc:def:crs:EPSG::4326".to_string(),
        };
        assert_eq!(
            bbox_filter(&bbox, 4326),
            "om:featureOfInterest/*/sams:shape,6.5,50.25,8,52,urn:ogc:def:crs:EPSG::4326"
        );
    }
}
