//! The metadata catalog: single point of truth for one harvested service.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::harvest::constellation::LookupTables;
use crate::harvest::reconcile::ReconcileError;
use crate::model::{
    Feature, Offering, ParameterConstellation, Phenomenon, Procedure, SosService, Station,
    Timeseries,
};

#[derive(Debug, Clone, Serialize)]
pub struct MetadataCatalog {
    service: SosService,
    srs: Option<String>,
    stations: BTreeMap<String, Station>,
    #[serde(flatten)]
    lookup: LookupTables,
    complete: bool,
    #[serde(skip)]
    timeout: Duration,
}

impl MetadataCatalog {
    /// Creates an empty catalog seeded with the enumerated lookup tables.
    pub fn new(service: SosService, lookup: LookupTables, timeout: Duration) -> Self {
        Self {
            service,
            srs: None,
            stations: BTreeMap::new(),
            lookup,
            complete: false,
            timeout,
        }
    }

    pub fn service(&self) -> &SosService {
        &self.service
    }

    /// `None` means unknown; consumers assume the canonical system.
    pub fn srs(&self) -> Option<&str> {
        self.srs.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn station(&self, id: &str) -> Option<&Station> {
        self.stations.get(id)
    }

    /// The station owning `feature_id`; station ids equal feature ids.
    pub fn station_by_feature(&self, feature_id: &str) -> Option<&Station> {
        self.lookup
            .features
            .get(feature_id)
            .and_then(|feature| self.stations.get(&feature.id))
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    /// Stations for the given ids, skipping unknown ones.
    pub fn stations_by_ids<S: AsRef<str>>(&self, ids: &[S]) -> Vec<&Station> {
        ids.iter()
            .filter_map(|id| self.stations.get(id.as_ref()))
            .collect()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn timeseries(&self) -> impl Iterator<Item = &Timeseries> {
        self.stations.values().flat_map(|s| s.timeseries().iter())
    }

    pub fn feature(&self, id: &str) -> Option<&Feature> {
        self.lookup.features.get(id)
    }

    pub fn phenomenon(&self, id: &str) -> Option<&Phenomenon> {
        self.lookup.phenomena.get(id)
    }

    pub fn procedure(&self, id: &str) -> Option<&Procedure> {
        self.lookup.procedures.get(id)
    }

    pub fn offering(&self, id: &str) -> Option<&Offering> {
        self.lookup.offerings.get(id)
    }

    pub fn lookup(&self) -> &LookupTables {
        &self.lookup
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    // ------------------------------------------------------------------
    // Mutation, reconciliation phase only
    // ------------------------------------------------------------------

    fn ensure_open(&self) -> Result<(), ReconcileError> {
        if self.complete {
            return Err(ReconcileError::CatalogFrozen);
        }
        Ok(())
    }

    pub(crate) fn set_srs(&mut self, srs: Option<String>) -> Result<(), ReconcileError> {
        self.ensure_open()?;
        self.srs = srs;
        Ok(())
    }

    /// Inserts `station` unless one with the same id exists.
    ///
    /// Returns `true` when the station was created.
    pub(crate) fn insert_station(&mut self, station: Station) -> Result<bool, ReconcileError> {
        self.ensure_open()?;
        if self.stations.contains_key(&station.id) {
            return Ok(false);
        }
        self.stations.insert(station.id.clone(), station);
        Ok(true)
    }

    /// Resolves or creates a feature. A name from a response replaces a
    /// placeholder label taken from the id.
    pub(crate) fn upsert_feature(
        &mut self,
        id: &str,
        name: Option<&str>,
    ) -> Result<bool, ReconcileError> {
        self.ensure_open()?;
        match self.lookup.features.get_mut(id) {
            Some(existing) => {
                let named = Feature::new(id, name);
                if existing.label == existing.id && named.label != named.id {
                    existing.label = named.label;
                }
                Ok(false)
            }
            None => {
                self.lookup
                    .features
                    .insert(id.to_string(), Feature::new(id, name));
                Ok(true)
            }
        }
    }

    /// Attaches `constellation` to the station `station_id`.
    ///
    /// Every referenced entity must already be in the lookup tables.
    pub(crate) fn attach_constellation(
        &mut self,
        station_id: &str,
        constellation: ParameterConstellation,
    ) -> Result<bool, ReconcileError> {
        self.ensure_open()?;
        self.check_references(&constellation)?;
        let station = self
            .stations
            .get_mut(station_id)
            .ok_or_else(|| ReconcileError::UnknownStation(station_id.to_string()))?;
        Ok(station.add_constellation(constellation))
    }

    /// Attaches `timeseries` and the constellation it implies to the
    /// station owning its feature.
    pub(crate) fn attach_timeseries(
        &mut self,
        timeseries: Timeseries,
    ) -> Result<bool, ReconcileError> {
        self.ensure_open()?;
        let constellation = timeseries.constellation();
        self.check_references(&constellation)?;
        let station = self
            .stations
            .get_mut(&timeseries.feature)
            .ok_or_else(|| ReconcileError::UnknownStation(timeseries.feature.clone()))?;
        station.add_constellation(constellation);
        Ok(station.add_timeseries(timeseries))
    }

    pub(crate) fn set_unit_of_measure(
        &mut self,
        phenomenon: &str,
        uom: String,
    ) -> Result<(), ReconcileError> {
        self.ensure_open()?;
        let entry = self
            .lookup
            .phenomena
            .get_mut(phenomenon)
            .ok_or_else(|| ReconcileError::UnknownEntity {
                kind: "phenomenon",
                id: phenomenon.to_string(),
            })?;
        entry.unit_of_measure = Some(uom);
        Ok(())
    }

    fn check_references(&self, c: &ParameterConstellation) -> Result<(), ReconcileError> {
        let unknown = |kind: &'static str, id: &str| ReconcileError::UnknownEntity {
            kind,
            id: id.to_string(),
        };
        if !self.lookup.offerings.contains_key(&c.offering) {
            return Err(unknown("offering", &c.offering));
        }
        if !self.lookup.procedures.contains_key(&c.procedure) {
            return Err(unknown("procedure", &c.procedure));
        }
        if !self.lookup.phenomena.contains_key(&c.phenomenon) {
            return Err(unknown("phenomenon", &c.phenomenon));
        }
        if let Some(feature) = &c.feature {
            if !self.lookup.features.contains_key(feature) {
                return Err(unknown("feature", feature));
            }
        }
        Ok(())
    }

    /// Freezes the catalog. Called once every task reached a terminal outcome.
    pub(crate) fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub(crate) fn log_summary(&self) {
        info!(
            service = %self.service.url,
            srs = self.srs.as_deref().unwrap_or("unknown"),
            offerings = self.lookup.offerings.len(),
            phenomena = self.lookup.phenomena.len(),
            procedures = self.lookup.procedures.len(),
            features = self.lookup.features.len(),
            stations = self.stations.len(),
            timeseries = self.timeseries().count(),
            "Service summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EastingNorthing, Location};

    fn catalog() -> MetadataCatalog {
        let mut lookup = LookupTables::default();
        lookup
            .offerings
            .insert("O".to_string(), Offering::new("O", Some("Offering")));
        lookup
            .procedures
            .insert("Proc".to_string(), Procedure::new("Proc"));
        lookup
            .phenomena
            .insert("P".to_string(), Phenomenon::new("P"));
        MetadataCatalog::new(
            SosService::new("http://sos", "2.0.0"),
            lookup,
            Duration::from_secs(5),
        )
    }

    fn station(id: &str, x: f64) -> Station {
        Station::new(
            id,
            Location {
                point: EastingNorthing::new(x, 0.0),
                srs: "EPSG:4326".to_string(),
            },
        )
    }

    #[test]
    fn test_first_station_wins() {
        let mut c = catalog();
        assert!(c.insert_station(station("S1", 1.0)).unwrap());
        assert!(!c.insert_station(station("S1", 99.0)).unwrap());
        assert_eq!(c.station("S1").unwrap().location.point.easting, 1.0);
        assert_eq!(c.station_count(), 1);
    }

    #[test]
    fn test_attach_requires_known_entities() {
        let mut c = catalog();
        c.upsert_feature("S1", None).unwrap();
        c.insert_station(station("S1", 1.0)).unwrap();

        let good = ParameterConstellation::new("O", "Proc", "P").with_feature("S1");
        assert!(c.attach_constellation("S1", good).unwrap());

        let bad = ParameterConstellation::new("O", "Nope", "P").with_feature("S1");
        assert!(matches!(
            c.attach_constellation("S1", bad),
            Err(ReconcileError::UnknownEntity {
                kind: "procedure",
                ..
            })
        ));
        assert_eq!(c.station("S1").unwrap().constellations().len(), 1);
    }

    #[test]
    fn test_feature_label_upgraded_from_placeholder() {
        let mut c = catalog();
        assert!(c.upsert_feature("F1", None).unwrap());
        assert!(!c.upsert_feature("F1", Some("Köln")).unwrap());
        assert_eq!(c.feature("F1").unwrap().label, "Köln");
        assert!(!c.upsert_feature("F1", Some("Cologne")).unwrap());
        assert_eq!(c.feature("F1").unwrap().label, "Köln");
    }

    #[test]
    fn test_frozen_catalog_rejects_mutation() {
        let mut c = catalog();
        c.mark_complete();
        assert!(c.is_complete());
        assert!(matches!(
            c.insert_station(station("S1", 1.0)),
            Err(ReconcileError::CatalogFrozen)
        ));
        assert!(matches!(
            c.set_unit_of_measure("P", "m".to_string()),
            Err(ReconcileError::CatalogFrozen)
        ));
    }

    #[test]
    fn test_queries_and_json_export() {
        let mut c = catalog();
        c.upsert_feature("S1", Some("Gauge")).unwrap();
        c.insert_station(station("S1", 1.0)).unwrap();
        c.insert_station(station("S2", 2.0)).unwrap();
        c.set_srs(Some("EPSG:4326".to_string())).unwrap();

        assert_eq!(c.station_by_feature("S1").unwrap().id, "S1");
        assert!(c.station_by_feature("S2").is_none());
        let picked = c.stations_by_ids(&["S2", "missing", "S1"]);
        assert_eq!(
            picked.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["S2", "S1"]
        );

        let json = c.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["srs"], "EPSG:4326");
        assert_eq!(value["stations"]["S1"]["id"], "S1");
        assert_eq!(value["phenomena"]["P"]["label"], "P");
    }
}
