//! Deriving the query constellations and lookup indices from capabilities.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::harvest::capabilities::ServiceContents;
use crate::model::{BoundingBox, Feature, Offering, ParameterConstellation, Phenomenon, Procedure};

/// How the service is probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumerationPolicy {
    /// One probe per (offering, procedure, phenomenon)
    #[default]
    CrossProduct,
    /// One probe per distinct phenomenon, expanded from data availability
    PhenomenonKeyed,
}

/// A unit of fan-out work produced by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Probe {
    Constellation(ParameterConstellation),
    Phenomenon(String),
}

impl Probe {
    pub fn phenomenon(&self) -> &str {
        match self {
            Probe::Constellation(c) => &c.phenomenon,
            Probe::Phenomenon(id) => id,
        }
    }

    pub fn constellation(&self) -> Option<&ParameterConstellation> {
        match self {
            Probe::Constellation(c) => Some(c),
            Probe::Phenomenon(_) => None,
        }
    }
}

/// Domain id to entity tables, one per entity kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupTables {
    pub offerings: BTreeMap<String, Offering>,
    pub phenomena: BTreeMap<String, Phenomenon>,
    pub procedures: BTreeMap<String, Procedure>,
    pub features: BTreeMap<String, Feature>,
}

/// Procedure id to the offerings that list it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureOfferings(BTreeMap<String, Vec<String>>);

impl ProcedureOfferings {
    pub fn insert(&mut self, procedure: &str, offering: &str) {
        let offerings = self.0.entry(procedure.to_string()).or_default();
        if !offerings.iter().any(|o| o == offering) {
            offerings.push(offering.to_string());
        }
    }

    pub fn offerings_of(&self, procedure: &str) -> Option<&[String]> {
        self.0.get(procedure).map(Vec::as_slice)
    }

    /// Rebuilds full constellations for a (phenomenon, procedure, feature)
    /// triple. `None` if the procedure is unknown.
    pub fn expand(
        &self,
        phenomenon: &str,
        procedure: &str,
        feature: &str,
    ) -> Option<Vec<ParameterConstellation>> {
        self.offerings_of(procedure).map(|offerings| {
            offerings
                .iter()
                .map(|offering| {
                    ParameterConstellation::new(offering, procedure, phenomenon)
                        .with_feature(feature)
                })
                .collect()
        })
    }
}

/// Everything enumeration hands to the later stages.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    pub lookup: LookupTables,
    pub probes: Vec<Probe>,
    /// Union of all offering boxes
    pub bbox: Option<BoundingBox>,
    pub offering_boxes: BTreeMap<String, BoundingBox>,
    pub procedure_offerings: ProcedureOfferings,
}

impl Enumeration {
    /// Box used to scope spatial queries for `offering`.
    pub fn bbox_for(&self, offering: &str) -> Option<&BoundingBox> {
        self.offering_boxes.get(offering).or(self.bbox.as_ref())
    }
}

pub struct ConstellationEnumerator {
    policy: EnumerationPolicy,
}

impl ConstellationEnumerator {
    pub fn new(policy: EnumerationPolicy) -> Self {
        Self { policy }
    }

    pub fn enumerate(&self, contents: &ServiceContents) -> Enumeration {
        let mut enumeration = Enumeration::default();
        let mut constellations = BTreeSet::new();
        let mut phenomena = BTreeSet::new();

        for (i, offering) in contents.offerings.iter().enumerate() {
            if i % 100 == 0 {
                debug!(entry = i, "Enumerating offerings");
            }
            let offering_id = offering.identifier.as_str();
            let lookup = &mut enumeration.lookup;

            lookup
                .offerings
                .entry(offering_id.to_string())
                .or_insert_with(|| Offering::new(offering_id, offering.title.as_deref()));
            for id in &offering.observed_properties {
                lookup
                    .phenomena
                    .entry(id.clone())
                    .or_insert_with(|| Phenomenon::new(id.as_str()));
                phenomena.insert(id.clone());
            }
            for id in &offering.procedures {
                lookup
                    .procedures
                    .entry(id.clone())
                    .or_insert_with(|| Procedure::new(id.as_str()));
                enumeration.procedure_offerings.insert(id, offering_id);
            }
            for id in &offering.features_of_interest {
                lookup
                    .features
                    .entry(id.clone())
                    .or_insert_with(|| Feature::new(id.as_str(), None));
            }

            if let Some(bbox) = &offering.bounding_box {
                enumeration.bbox = Some(match enumeration.bbox.take() {
                    Some(acc) => acc.union(bbox),
                    None => bbox.clone(),
                });
                enumeration
                    .offering_boxes
                    .insert(offering_id.to_string(), bbox.clone());
            }

            if self.policy == EnumerationPolicy::CrossProduct {
                for procedure in &offering.procedures {
                    for phenomenon in &offering.observed_properties {
                        constellations.insert(ParameterConstellation::new(
                            offering_id,
                            procedure,
                            phenomenon,
                        ));
                    }
                }
            }
        }

        enumeration.probes = match self.policy {
            EnumerationPolicy::CrossProduct => {
                constellations.into_iter().map(Probe::Constellation).collect()
            }
            EnumerationPolicy::PhenomenonKeyed => {
                phenomena.into_iter().map(Probe::Phenomenon).collect()
            }
        };

        let lookup = &enumeration.lookup;
        info!(
            policy = ?self.policy,
            offerings = lookup.offerings.len(),
            phenomena = lookup.phenomena.len(),
            procedures = lookup.procedures.len(),
            features = lookup.features.len(),
            probes = enumeration.probes.len(),
            "Enumeration finished"
        );
        enumeration
    }
}
