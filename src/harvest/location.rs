//! Location and reference-system normalization.

use thiserror::Error;
use tracing::debug;

use crate::harvest::formats::PointGeometry;
use crate::model::{EastingNorthing, Location};
use crate::traits::{ReferencingError, ReferencingHelper};

const EPSG_PREFIX: &str = "EPSG:";
const WGS84: &str = "EPSG:4326";
const EARTH_RADIUS_M: f64 = 6_378_137.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SrsError {
    #[error("Cannot derive an EPSG code from '{0}'")]
    Unparseable(String),
}

/// Result of location resolution, keeping track of which path was taken.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedLocation {
    Reprojected(Location),
    /// Reprojection failed; raw coordinates are taken as canonical
    AssumedCanonical(Location),
}

impl ResolvedLocation {
    pub fn location(&self) -> &Location {
        match self {
            ResolvedLocation::Reprojected(l) | ResolvedLocation::AssumedCanonical(l) => l,
        }
    }

    pub fn into_location(self) -> Location {
        match self {
            ResolvedLocation::Reprojected(l) | ResolvedLocation::AssumedCanonical(l) => l,
        }
    }

    pub fn is_reprojected(&self) -> bool {
        matches!(self, ResolvedLocation::Reprojected(_))
    }
}

/// Parses the first two whitespace separated numbers of a GML `pos`.
pub fn parse_pos(pos: &str) -> Option<EastingNorthing> {
    let mut values = pos.split_whitespace().map(str::parse::<f64>);
    match (values.next(), values.next()) {
        (Some(Ok(x)), Some(Ok(y))) if x.is_finite() && y.is_finite() => {
            Some(EastingNorthing::new(x, y))
        }
        _ => None,
    }
}

/// Normalizes a point geometry into the helper's canonical system.
///
/// Returns `None` only when the coordinates themselves are unreadable.
pub fn resolve_location(
    geometry: &PointGeometry,
    referencing: &dyn ReferencingHelper,
) -> Option<ResolvedLocation> {
    let raw = parse_pos(&geometry.pos)?;
    let canonical = referencing.canonical_code().to_string();

    let reprojected = geometry
        .srs_name
        .as_deref()
        .ok_or_else(|| ReferencingError::UnknownSrs("<none>".to_string()))
        .and_then(|name| referencing.extract_code(name))
        .and_then(|code| referencing.transform(raw, &code));

    Some(match reprojected {
        Ok(point) => ResolvedLocation::Reprojected(Location {
            point,
            srs: canonical,
        }),
        Err(e) => {
            debug!(error = %e, srs = %canonical, "Could not transform, keeping raw coordinates");
            ResolvedLocation::AssumedCanonical(Location {
                point: raw,
                srs: canonical,
            })
        }
    })
}

/// Harvest-wide SRS code from a bounding-box reference code.
///
/// `EPSG:`-prefixed codes pass through; otherwise the trailing
/// colon-separated segment must be numeric and is re-prefixed.
pub fn normalize_srs(code: &str) -> Result<String, SrsError> {
    let code = code.trim();
    if code.starts_with(EPSG_PREFIX) {
        return Ok(code.to_string());
    }
    match code.rsplit(':').next() {
        Some(last) if !last.is_empty() && last.bytes().all(|b| b.is_ascii_digit()) => {
            Ok(format!("{}{}", EPSG_PREFIX, last))
        }
        _ => Err(SrsError::Unparseable(code.to_string())),
    }
}

/// Numeric EPSG id out of any code form the helper understands.
pub fn srs_id(code: &str, referencing: &dyn ReferencingHelper) -> Result<u32, ReferencingError> {
    let extracted = referencing.extract_code(code)?;
    extracted
        .trim_start_matches(EPSG_PREFIX)
        .parse()
        .map_err(|_| ReferencingError::UnknownSrs(code.to_string()))
}

/// Built-in helper covering the reference systems services commonly use.
///
/// Canonical system is WGS84; only identity and spherical Web Mercator
/// are transformed.
#[derive(Debug, Default, Clone, Copy)]
pub struct EpsgReferencing;

impl ReferencingHelper for EpsgReferencing {
    fn extract_code(&self, srs_name: &str) -> Result<String, ReferencingError> {
        let name = srs_name.trim();
        let unknown = || ReferencingError::UnknownSrs(srs_name.to_string());

        let digits = if let Some(rest) = name.strip_prefix(EPSG_PREFIX) {
            rest
        } else if name.to_ascii_lowercase().starts_with("urn:ogc:def:crs:epsg:") {
            // urn:ogc:def:crs:EPSG:[version]:<code>
            name.rsplit(':').next().ok_or_else(unknown)?
        } else if name.contains("/def/crs/EPSG/") {
            name.rsplit('/').next().ok_or_else(unknown)?
        } else {
            return Err(unknown());
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(unknown());
        }
        Ok(format!("{}{}", EPSG_PREFIX, digits))
    }

    fn transform(
        &self,
        point: EastingNorthing,
        from_code: &str,
    ) -> Result<EastingNorthing, ReferencingError> {
        match from_code {
            WGS84 => Ok(point),
            "EPSG:3857" | "EPSG:900913" => {
                let lon = (point.easting / EARTH_RADIUS_M).to_degrees();
                let lat = (2.0 * (point.northing / EARTH_RADIUS_M).exp().atan()
                    - std::f64::consts::FRAC_PI_2)
                    .to_degrees();
                Ok(EastingNorthing::new(lon, lat))
            }
            other => Err(ReferencingError::Transform {
                from: other.to_string(),
                reason: "no transformation available".to_string(),
            }),
        }
    }

    fn canonical_code(&self) -> &str {
        WGS84
    }
}
