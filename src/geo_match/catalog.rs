use geo::{Centroid, Coord, Intersects, Line, LineString, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{LocatorError, Result};
use crate::types::Position;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Indoor,
    Outdoor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Circle,
    Zone,
}

/// Geometry as supplied by the caller, before validation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Boundary {
    Circle { center: Position, radius_m: f64 },
    Zone { corners: Vec<Position> },
}

/// One named place in the caller's catalog
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: String,
    pub name: String,
    pub category: Category,
    #[serde(flatten)]
    pub boundary: Boundary,
}

impl LocationRecord {
    pub fn circle(id: &str, name: &str, category: Category, center: Position, radius_m: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            category,
            boundary: Boundary::Circle { center, radius_m },
        }
    }

    pub fn zone(id: &str, name: &str, category: Category, corners: Vec<Position>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            category,
            boundary: Boundary::Zone { corners },
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self.boundary {
            Boundary::Circle { .. } => RecordKind::Circle,
            Boundary::Zone { .. } => RecordKind::Zone,
        }
    }
}

/// Validated geometry used for matching
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Circle { center: Position, radius_m: f64 },
    Zone { corners: [Position; 4], centroid: Position },
}

#[derive(Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    pub record: LocationRecord,
    pub shape: Shape,
}

impl CatalogEntry {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn category(&self) -> Category {
        self.record.category
    }

    /// Center for circles, centroid for zones
    pub fn anchor(&self) -> Position {
        match &self.shape {
            Shape::Circle { center, .. } => *center,
            Shape::Zone { centroid, .. } => *centroid,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RejectedRecord {
    pub id: String,
    pub reason: String,
}

/// Read-only set of valid location records, in caller order.
///
/// Malformed records are dropped at load time and kept aside in `rejected()`;
/// they never take part in matching.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    rejected: Vec<RejectedRecord>,
}

impl Catalog {
    pub fn from_records(records: Vec<LocationRecord>) -> Self {
        let mut entries = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();
        let mut seen_ids = HashSet::new();

        for record in records {
            let checked = if seen_ids.contains(&record.id) {
                Err(LocatorError::MalformedCatalogEntry {
                    id: record.id.clone(),
                    reason: "duplicate id".to_string(),
                })
            } else {
                validate(&record)
            };

            match checked {
                Ok(shape) => {
                    seen_ids.insert(record.id.clone());
                    entries.push(CatalogEntry { record, shape });
                }
                Err(err) => {
                    log::warn!("[catalog] rejected: {}", err);
                    let reason = match err {
                        LocatorError::MalformedCatalogEntry { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    rejected.push(RejectedRecord { id: record.id, reason });
                }
            }
        }

        log::info!("[catalog] {} valid entries, {} rejected", entries.len(), rejected.len());
        Catalog { entries, rejected }
    }

    /// Parse a JSON array of records and validate them
    pub fn from_json_str(json: &str) -> Result<Self> {
        let records: Vec<LocationRecord> =
            serde_json::from_str(json).map_err(|e| LocatorError::CatalogParse(e.to_string()))?;
        Ok(Self::from_records(records))
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn rejected(&self) -> &[RejectedRecord] {
        &self.rejected
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter().filter(move |e| e.category() == category)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

fn malformed(record: &LocationRecord, reason: impl Into<String>) -> LocatorError {
    LocatorError::MalformedCatalogEntry { id: record.id.clone(), reason: reason.into() }
}

pub fn validate(record: &LocationRecord) -> Result<Shape> {
    match &record.boundary {
        Boundary::Circle { center, radius_m } => {
            if !center.is_valid() {
                return Err(malformed(record, "center out of range"));
            }
            if !radius_m.is_finite() || *radius_m <= 0.0 {
                return Err(malformed(record, format!("non-positive radius {}", radius_m)));
            }
            Ok(Shape::Circle { center: *center, radius_m: *radius_m })
        }
        Boundary::Zone { corners } => {
            let corners: [Position; 4] = corners
                .as_slice()
                .try_into()
                .map_err(|_| malformed(record, format!("zone needs 4 corners, got {}", corners.len())))?;

            if corners.iter().any(|c| !c.is_valid()) {
                return Err(malformed(record, "corner out of range"));
            }
            for i in 0..4 {
                for j in (i + 1)..4 {
                    if corners[i] == corners[j] {
                        return Err(malformed(record, "repeated corner"));
                    }
                }
            }

            let projected = project_corners(&corners);
            if is_self_intersecting(&projected) {
                return Err(malformed(record, "self-intersecting quadrilateral"));
            }
            if signed_area(&projected).abs() < 1e-14 {
                return Err(malformed(record, "degenerate quadrilateral"));
            }

            Ok(Shape::Zone { corners, centroid: zone_centroid(&corners) })
        }
    }
}

/// Local equirectangular frame: x = lon · cos(mean lat), y = lat (degrees).
pub fn project_corners(corners: &[Position; 4]) -> [Coord<f64>; 4] {
    let mean_lat = corners.iter().map(|c| c.latitude).sum::<f64>() / 4.0;
    let scale = mean_lat.to_radians().cos();
    (*corners).map(|c| Coord { x: c.longitude * scale, y: c.latitude })
}

fn is_self_intersecting(p: &[Coord<f64>; 4]) -> bool {
    // Only opposite edges can cross in a quadrilateral
    let e01 = Line::new(p[0], p[1]);
    let e12 = Line::new(p[1], p[2]);
    let e23 = Line::new(p[2], p[3]);
    let e30 = Line::new(p[3], p[0]);
    e01.intersects(&e23) || e12.intersects(&e30)
}

fn signed_area(p: &[Coord<f64>; 4]) -> f64 {
    let mut twice = 0.0;
    for i in 0..4 {
        let a = p[i];
        let b = p[(i + 1) % 4];
        twice += a.x * b.y - b.x * a.y;
    }
    twice / 2.0
}

fn zone_centroid(corners: &[Position; 4]) -> Position {
    let ring: Vec<Coord<f64>> = corners
        .iter()
        .map(|c| Coord { x: c.longitude, y: c.latitude })
        .collect();
    Polygon::new(LineString::from(ring), vec![])
        .centroid()
        .map(Position::from_point)
        .unwrap_or_else(|| {
            let lat = corners.iter().map(|c| c.latitude).sum::<f64>() / 4.0;
            let lon = corners.iter().map(|c| c.longitude).sum::<f64>() / 4.0;
            Position::new(lat, lon)
        })
}
