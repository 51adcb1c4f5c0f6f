use serde::{Deserialize, Serialize};

/// Reference to the service a harvested entity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SosService {
    pub url: String,
    pub version: String,
    pub label: Option<String>,
}

impl SosService {
    pub fn new(url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            version: version.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    pub id: String,
    pub label: String,
}

impl Offering {
    /// Creates an offering, using the id as label when no title is known.
    pub fn new(id: impl Into<String>, title: Option<&str>) -> Self {
        let id = id.into();
        let label = match title {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => id.clone(),
        };
        Self { id, label }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phenomenon {
    pub id: String,
    pub label: String,
    /// Filled in from observation responses; empty string when the service
    /// reported an observation without a unit.
    pub unit_of_measure: Option<String>,
}

impl Phenomenon {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let label = match id.rfind('#') {
            Some(pos) => id[pos + 1..].to_string(),
            None => id.clone(),
        };
        Self {
            id,
            label,
            unit_of_measure: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: String,
}

impl Procedure {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub label: String,
}

impl Feature {
    /// Creates a feature, falling back to the id when the response carried no name.
    pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
        let id = id.into();
        let label = match name {
            Some(n) if !n.trim().is_empty() => n.trim().to_string(),
            _ => id.clone(),
        };
        Self { id, label }
    }
}

/// A point in a named spatial reference system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EastingNorthing {
    /// x, longitude for geographic systems
    pub easting: f64,
    /// y, latitude for geographic systems
    pub northing: f64,
}

impl EastingNorthing {
    pub fn new(easting: f64, northing: f64) -> Self {
        Self { easting, northing }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub point: EastingNorthing,
    pub srs: String,
}

/// One (offering, procedure, phenomenon, [feature]) combination.
///
/// Ordering and hashing cover all four fields so constellations can key
/// task maps directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterConstellation {
    pub offering: String,
    pub procedure: String,
    pub phenomenon: String,
    pub feature: Option<String>,
}

impl ParameterConstellation {
    pub fn new(
        offering: impl Into<String>,
        procedure: impl Into<String>,
        phenomenon: impl Into<String>,
    ) -> Self {
        Self {
            offering: offering.into(),
            procedure: procedure.into(),
            phenomenon: phenomenon.into(),
            feature: None,
        }
    }

    /// Returns a copy of this constellation bound to `feature`.
    pub fn with_feature(&self, feature: impl Into<String>) -> Self {
        Self {
            feature: Some(feature.into()),
            ..self.clone()
        }
    }
}

/// A fully specified timeseries discovered through data availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeseries {
    pub phenomenon: String,
    pub procedure: String,
    pub offering: String,
    pub feature: String,
    pub category: String,
    pub service: SosService,
}

impl Timeseries {
    pub fn new(
        phenomenon: impl Into<String>,
        procedure: impl Into<String>,
        offering: impl Into<String>,
        feature: impl Into<String>,
        service: SosService,
    ) -> Self {
        let phenomenon = phenomenon.into();
        let procedure = procedure.into();
        let category = format!("{} ({})", local_name(&phenomenon), local_name(&procedure));
        Self {
            phenomenon,
            procedure,
            offering: offering.into(),
            feature: feature.into(),
            category,
            service,
        }
    }

    /// The constellation this timeseries is an instance of.
    pub fn constellation(&self) -> ParameterConstellation {
        ParameterConstellation::new(&self.offering, &self.procedure, &self.phenomenon)
            .with_feature(&self.feature)
    }
}

/// A geolocated grouping of constellations sharing a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub location: Location,
    constellations: Vec<ParameterConstellation>,
    timeseries: Vec<Timeseries>,
}

impl Station {
    pub fn new(id: impl Into<String>, location: Location) -> Self {
        Self {
            id: id.into(),
            location,
            constellations: Vec::new(),
            timeseries: Vec::new(),
        }
    }

    pub fn constellations(&self) -> &[ParameterConstellation] {
        &self.constellations
    }

    pub fn timeseries(&self) -> &[Timeseries] {
        &self.timeseries
    }

    /// Appends a constellation; returns `false` if it was already attached.
    pub(crate) fn add_constellation(&mut self, constellation: ParameterConstellation) -> bool {
        if self.constellations.contains(&constellation) {
            return false;
        }
        self.constellations.push(constellation);
        true
    }

    pub(crate) fn add_timeseries(&mut self, timeseries: Timeseries) -> bool {
        if self.timeseries.contains(&timeseries) {
            return false;
        }
        self.timeseries.push(timeseries);
        true
    }
}

/// Axis-aligned box in the reference system named by `srs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lower_corner: [f64; 2],
    pub upper_corner: [f64; 2],
    pub srs: String,
}

impl BoundingBox {
    /// Component-wise min/max union; the reference system of `self` is kept.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            lower_corner: [
                self.lower_corner[0].min(other.lower_corner[0]),
                self.lower_corner[1].min(other.lower_corner[1]),
            ],
            upper_corner: [
                self.upper_corner[0].max(other.upper_corner[0]),
                self.upper_corner[1].max(other.upper_corner[1]),
            ],
            srs: self.srs.clone(),
        }
    }
}

/// Substring after the last `/`, `#` or `:` of an identifier.
pub fn local_name(id: &str) -> &str {
    match id.rfind(['/', '#', ':']) {
        Some(pos) if pos + 1 < id.len() => &id[pos + 1..],
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phenomenon_label_after_last_hash() {
        let p = Phenomenon::new("http://example.org/def#sub#WaterLevel");
        assert_eq!(p.label, "WaterLevel");
        assert!(p.unit_of_measure.is_none());

        let plain = Phenomenon::new("Discharge");
        assert_eq!(plain.label, "Discharge");
    }

    #[test]
    fn test_with_feature_only_changes_feature() {
        let original = ParameterConstellation::new("off", "proc", "phen");
        let bound = original.with_feature("foi-1");

        assert_eq!(bound.offering, original.offering);
        assert_eq!(bound.procedure, original.procedure);
        assert_eq!(bound.phenomenon, original.phenomenon);
        assert_eq!(bound.feature.as_deref(), Some("foi-1"));
        assert!(original.feature.is_none());
        assert_ne!(bound, original);
    }

    #[test]
    fn test_timeseries_category() {
        let ts = Timeseries::new(
            "urn:ogc:def:phenomenon:OGC:Waterlevel",
            "http://example.org/procedure/Gauge_17",
            "off",
            "foi",
            SosService::new("http://sos", "2.0.0"),
        );
        assert_eq!(ts.category, "Waterlevel (Gauge_17)");
        assert_eq!(ts.constellation().feature.as_deref(), Some("foi"));
    }

    #[test]
    fn test_bbox_union() {
        let a = BoundingBox {
            lower_corner: [0.0, 5.0],
            upper_corner: [10.0, 10.0],
            srs: "EPSG:4326".to_string(),
        };
        let b = BoundingBox {
            lower_corner: [-3.0, 6.0],
            upper_corner: [4.0, 12.0],
            srs: "EPSG:3857".to_string(),
        };
        let u = a.union(&b);
        assert_eq!(u.lower_corner, [-3.0, 5.0]);
        assert_eq!(u.upper_corner, [10.0, 12.0]);
        assert_eq!(u.srs, "EPSG:4326");
    }

    #[test]
    fn test_station_dedups_constellations() {
        let mut station = Station::new(
            "st",
            Location {
                point: EastingNorthing::new(7.0, 51.0),
                srs: "EPSG:4326".to_string(),
            },
        );
        let c = ParameterConstellation::new("o", "p", "ph").with_feature("st");
        assert!(station.add_constellation(c.clone()));
        assert!(!station.add_constellation(c));
        assert_eq!(station.constellations().len(), 1);
    }

    #[test]
    fn test_local_name_trailing_separator() {
        assert_eq!(local_name("a/b/"), "a/b/");
        assert_eq!(local_name("urn:x:y"), "y");
    }
}
