//! Reading the parsed capabilities document into raw identifier lists.
//!
//! The transport layer delivers capabilities as a JSON-shaped document.
//! The document as a whole must be readable, but each offering entry is
//! decoded on its own so one malformed entry only costs that offering.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::BoundingBox;

#[derive(Error, Debug)]
pub enum CapabilitiesError {
    /// The document could not be decoded at all
    #[error("Unreadable capabilities document: {0}")]
    Unreadable(String),

    /// The document carries no contents section
    #[error("Capabilities document has no contents section")]
    MissingContents,

    /// A single offering entry is malformed
    #[error("Malformed offering entry #{index}: {reason}")]
    MalformedOffering { index: usize, reason: String },
}

/// Capabilities as handed over by the transport collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitiesDocument {
    /// Service title, used as the label of the service reference
    #[serde(default)]
    pub title: Option<String>,

    /// Offering entries, kept raw until [`CapabilitiesReader::read`]
    #[serde(default)]
    pub contents: Option<Vec<serde_json::Value>>,
}

/// One observation offering as advertised by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationOffering {
    pub identifier: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub observed_properties: Vec<String>,
    #[serde(default)]
    pub procedures: Vec<String>,
    #[serde(default)]
    pub features_of_interest: Vec<String>,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
}

/// Offerings that survived reading, in document order.
#[derive(Debug, Clone, Default)]
pub struct ServiceContents {
    pub title: Option<String>,
    pub offerings: Vec<ObservationOffering>,
    /// Number of entries that were skipped as malformed
    pub skipped: usize,
}

pub struct CapabilitiesReader;

impl CapabilitiesReader {
    /// Decodes a capabilities document from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilitiesError::Unreadable`] when the text is not a
    /// capabilities document.
    pub fn from_json(text: &str) -> Result<CapabilitiesDocument, CapabilitiesError> {
        serde_json::from_str(text).map_err(|e| CapabilitiesError::Unreadable(e.to_string()))
    }

    /// Extracts all readable offerings; malformed entries are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilitiesError::MissingContents`] when the document has
    /// no contents section. That is fatal for the harvest.
    pub fn read(document: &CapabilitiesDocument) -> Result<ServiceContents, CapabilitiesError> {
        let entries = document
            .contents
            .as_ref()
            .ok_or(CapabilitiesError::MissingContents)?;

        info!(entries = entries.len(), "Reading offering entries");
        let mut contents = ServiceContents {
            title: document.title.clone(),
            ..Default::default()
        };

        for (index, entry) in entries.iter().enumerate() {
            match Self::read_offering(index, entry) {
                Ok(offering) => contents.offerings.push(offering),
                Err(e) => {
                    warn!(error = %e, "Skipping offering");
                    contents.skipped += 1;
                }
            }
        }

        debug!(
            offerings = contents.offerings.len(),
            skipped = contents.skipped,
            "Capabilities read"
        );
        Ok(contents)
    }

    fn read_offering(
        index: usize,
        entry: &serde_json::Value,
    ) -> Result<ObservationOffering, CapabilitiesError> {
        let malformed = |reason: String| CapabilitiesError::MalformedOffering { index, reason };

        let mut offering: ObservationOffering =
            serde_json::from_value(entry.clone()).map_err(|e| malformed(e.to_string()))?;

        offering.identifier = offering.identifier.trim().to_string();
        if offering.identifier.is_empty() {
            return Err(malformed("empty identifier".to_string()));
        }

        for ids in [
            &mut offering.observed_properties,
            &mut offering.procedures,
            &mut offering.features_of_interest,
        ] {
            ids.iter_mut().for_each(|id| *id = id.trim().to_string());
            ids.retain(|id| !id.is_empty());
        }

        if let Some(bbox) = &offering.bounding_box {
            let ordered = bbox.lower_corner[0] <= bbox.upper_corner[0]
                && bbox.lower_corner[1] <= bbox.upper_corner[1];
            if !ordered {
                return Err(malformed("inverted bounding box".to_string()));
            }
        }

        Ok(offering)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "title": "Pegel Online",
        "contents": [
            {
                "identifier": " off-1 ",
                "title": "Water levels",
                "observedProperties": ["P1", "P2", ""],
                "procedures": ["Proc1"],
                "featuresOfInterest": ["F1"],
                "boundingBox": {
                    "lower_corner": [6.0, 50.0],
                    "upper_corner": [8.0, 52.0],
                    "srs": "urn:ogc:def:crs:EPSG::4326"
                }
            },
            { "title": "no identifier" },
            { "identifier": "" },
            {
                "identifier": "inverted",
                "boundingBox": {
                    "lower_corner": [9.0, 50.0],
                    "upper_corner": [8.0, 52.0],
                    "srs": "EPSG:4326"
                }
            },
            { "identifier": "off-2", "procedures": ["Proc2"] }
        ]
    }"#;

    #[test]
    fn test_read_skips_malformed_offerings() {
        let doc = CapabilitiesReader::from_json(DOC).unwrap();
        let contents = CapabilitiesReader::read(&doc).unwrap();

        assert_eq!(contents.title.as_deref(), Some("Pegel Online"));
        assert_eq!(contents.offerings.len(), 2);
        assert_eq!(contents.skipped, 3);

        let first = &contents.offerings[0];
        assert_eq!(first.identifier, "off-1");
        assert_eq!(first.observed_properties, vec!["P1", "P2"]);
        assert!(first.bounding_box.is_some());
    }

    #[test]
    fn test_missing_contents_is_fatal() {
        let doc = CapabilitiesReader::from_json(r#"{"title": "x"}"#).unwrap();
        assert!(matches!(
            CapabilitiesReader::read(&doc),
            Err(CapabilitiesError::MissingContents)
        ));
    }

    #[test]
    fn test_unreadable_document() {
        assert!(matches!(
            CapabilitiesReader::from_json("<Capabilities/>"),
            Err(CapabilitiesError::Unreadable(_))
        ));
    }
}
