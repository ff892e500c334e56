use geo::{Coord, HaversineDistance};
use std::sync::Arc;

use super::catalog::{project_corners, Catalog, CatalogEntry, Category, Shape};
use crate::types::Position;

/// Great-circle distance in metres
pub fn haversine_distance(a: Position, b: Position) -> f64 {
    a.to_point().haversine_distance(&b.to_point())
}

/// Nearest candidate by distance to its anchor, if within `max_distance_m`.
///
/// Ties go to the earliest candidate in iteration order.
pub fn match_nearest<'a, I>(position: Position, candidates: I, max_distance_m: f64) -> Option<&'a CatalogEntry>
where
    I: IntoIterator<Item = &'a CatalogEntry>,
{
    let mut best: Option<(&CatalogEntry, f64)> = None;
    for candidate in candidates {
        let distance = haversine_distance(position, candidate.anchor());
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((candidate, distance)),
        }
    }

    best.filter(|(_, distance)| *distance <= max_distance_m)
        .map(|(candidate, _)| candidate)
}

/// Ray-casting point-in-quadrilateral test in a local equirectangular frame.
///
/// Longitude is scaled by cos(mean latitude) of the four corners. The result
/// does not depend on which corner the ring starts from.
pub fn contains_zone(position: Position, corners: &[Position; 4]) -> bool {
    let ring = project_corners(corners);
    let mean_lat = corners.iter().map(|c| c.latitude).sum::<f64>() / 4.0;
    let p = Coord { x: position.longitude * mean_lat.to_radians().cos(), y: position.latitude };

    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Resolves positions against the catalog.
///
/// Policy, restricted to one category:
/// 1. Zones containing the position; the first in catalog order wins when
///    several overlap.
/// 2. Otherwise circles whose center lies within their own radius; the
///    nearest wins, ties by catalog order.
#[derive(Clone, Debug)]
pub struct GeoMatcher {
    catalog: Arc<Catalog>,
}

impl GeoMatcher {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn resolve(&self, position: Position, category: Category) -> Option<&CatalogEntry> {
        let mut containing = self.catalog.in_category(category).filter(|entry| match &entry.shape {
            Shape::Zone { corners, .. } => contains_zone(position, corners),
            Shape::Circle { .. } => false,
        });

        if let Some(zone) = containing.next() {
            let overlaps: Vec<&str> = containing.map(|e| e.id()).collect();
            if !overlaps.is_empty() {
                log::debug!("[match] {} overlaps {:?}, keeping {}", zone.id(), overlaps, zone.id());
            }
            return Some(zone);
        }

        self.nearest_circle(position, category)
    }

    fn nearest_circle(&self, position: Position, category: Category) -> Option<&CatalogEntry> {
        let mut best: Option<(&CatalogEntry, f64)> = None;
        for entry in self.catalog.in_category(category) {
            let Shape::Circle { center, radius_m } = &entry.shape else { continue };
            let distance = haversine_distance(position, *center);
            if distance > *radius_m {
                continue;
            }
            match best {
                Some((_, best_distance)) if distance >= best_distance => {}
                _ => best = Some((entry, distance)),
            }
        }
        best.map(|(entry, _)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_reckoning::{offset_position, EARTH_RADIUS_M};
    use crate::geo_match::catalog::LocationRecord;

    const ORIGIN: Position = Position { latitude: 10.7626, longitude: 106.6822 };

    /// Position `east`/`north` metres from ORIGIN
    fn at(east: f64, north: f64) -> Position {
        offset_position(ORIGIN, east, north, EARTH_RADIUS_M)
    }

    fn rect(id: &str, category: Category, sw: (f64, f64), ne: (f64, f64)) -> LocationRecord {
        LocationRecord::zone(
            id,
            id,
            category,
            vec![at(sw.0, sw.1), at(ne.0, sw.1), at(ne.0, ne.1), at(sw.0, ne.1)],
        )
    }

    fn zone_corners(record: &LocationRecord) -> [Position; 4] {
        match &record.boundary {
            crate::geo_match::Boundary::Zone { corners } => corners.as_slice().try_into().unwrap(),
            _ => panic!("not a zone"),
        }
    }

    #[test]
    fn test_match_nearest_picks_closest() {
        let catalog = Catalog::from_records(vec![
            LocationRecord::circle("far", "Far", Category::Outdoor, at(100.0, 0.0), 5.0),
            LocationRecord::circle("near", "Near", Category::Outdoor, at(20.0, 0.0), 5.0),
        ]);
        let found = match_nearest(ORIGIN, catalog.entries(), 50.0).unwrap();
        assert_eq!(found.id(), "near");
    }

    #[test]
    fn test_match_nearest_respects_max_distance() {
        let catalog = Catalog::from_records(vec![LocationRecord::circle(
            "a", "A", Category::Outdoor, at(30.0, 0.0), 5.0,
        )]);
        assert!(match_nearest(ORIGIN, catalog.entries(), 29.0).is_none());
        assert!(match_nearest(ORIGIN, catalog.entries(), 31.0).is_some());
        assert!(match_nearest(ORIGIN, std::iter::empty(), 1000.0).is_none());
    }

    #[test]
    fn test_match_nearest_tie_goes_to_first() {
        let catalog = Catalog::from_records(vec![
            LocationRecord::circle("first", "First", Category::Outdoor, at(10.0, 0.0), 5.0),
            LocationRecord::circle("second", "Second", Category::Outdoor, at(10.0, 0.0), 5.0),
        ]);
        assert_eq!(match_nearest(ORIGIN, catalog.entries(), 50.0).unwrap().id(), "first");

        let reversed: Vec<&CatalogEntry> = catalog.entries().iter().rev().collect();
        assert_eq!(match_nearest(ORIGIN, reversed, 50.0).unwrap().id(), "second");
    }

    #[test]
    fn test_contains_zone_inside_and_outside() {
        let record = rect("r", Category::Indoor, (-10.0, -10.0), (10.0, 10.0));
        let corners = zone_corners(&record);
        assert!(contains_zone(ORIGIN, &corners));
        assert!(contains_zone(at(9.0, -9.0), &corners));
        assert!(!contains_zone(at(11.0, 0.0), &corners));
        assert!(!contains_zone(at(0.0, -25.0), &corners));
    }

    #[test]
    fn test_contains_zone_cyclic_relabel() {
        let corners = [at(-10.0, -5.0), at(12.0, -8.0), at(15.0, 9.0), at(-7.0, 11.0)];
        let probes = [at(0.0, 0.0), at(14.0, 8.0), at(-9.0, 10.0), at(20.0, 0.0), at(0.0, -20.0), at(-9.5, -4.0)];
        for shift in 0..4 {
            let rotated = [
                corners[shift % 4],
                corners[(shift + 1) % 4],
                corners[(shift + 2) % 4],
                corners[(shift + 3) % 4],
            ];
            for probe in &probes {
                assert_eq!(contains_zone(*probe, &rotated), contains_zone(*probe, &corners));
            }
        }
    }

    #[test]
    fn test_contains_zone_concave_quad() {
        // Arrowhead: the notch at the right is outside
        let corners = [at(0.0, 0.0), at(20.0, -10.0), at(10.0, 0.0), at(20.0, 10.0)];
        assert!(contains_zone(at(5.0, 0.0), &corners));
        assert!(!contains_zone(at(15.0, 0.0), &corners));
    }

    #[test]
    fn test_resolve_prefers_zone_over_circle() {
        let catalog = Arc::new(Catalog::from_records(vec![
            LocationRecord::circle("circle", "Circle", Category::Indoor, ORIGIN, 50.0),
            rect("zone", Category::Indoor, (-5.0, -5.0), (5.0, 5.0)),
        ]));
        let matcher = GeoMatcher::new(catalog);
        assert_eq!(matcher.resolve(ORIGIN, Category::Indoor).unwrap().id(), "zone");
        // Outside the zone but inside the circle
        assert_eq!(matcher.resolve(at(20.0, 0.0), Category::Indoor).unwrap().id(), "circle");
        assert!(matcher.resolve(at(80.0, 0.0), Category::Indoor).is_none());
    }

    #[test]
    fn test_resolve_filters_by_category() {
        let catalog = Arc::new(Catalog::from_records(vec![
            rect("room", Category::Indoor, (-5.0, -5.0), (5.0, 5.0)),
            LocationRecord::circle("yard", "Yard", Category::Outdoor, ORIGIN, 50.0),
        ]));
        let matcher = GeoMatcher::new(catalog);
        assert_eq!(matcher.resolve(ORIGIN, Category::Outdoor).unwrap().id(), "yard");
        assert_eq!(matcher.resolve(ORIGIN, Category::Indoor).unwrap().id(), "room");
    }

    #[test]
    fn test_resolve_overlapping_zones_first_wins() {
        let catalog = Arc::new(Catalog::from_records(vec![
            rect("a", Category::Indoor, (-10.0, -10.0), (10.0, 10.0)),
            rect("b", Category::Indoor, (-5.0, -5.0), (15.0, 15.0)),
        ]));
        let matcher = GeoMatcher::new(catalog);
        assert_eq!(matcher.resolve(at(2.0, 2.0), Category::Indoor).unwrap().id(), "a");
        assert_eq!(matcher.resolve(at(12.0, 12.0), Category::Indoor).unwrap().id(), "b");
    }

    #[test]
    fn test_resolve_circle_uses_own_radius() {
        let catalog = Arc::new(Catalog::from_records(vec![
            // Closer but small
            LocationRecord::circle("small", "Small", Category::Outdoor, at(10.0, 0.0), 3.0),
            LocationRecord::circle("big", "Big", Category::Outdoor, at(-30.0, 0.0), 40.0),
        ]));
        let matcher = GeoMatcher::new(catalog);
        assert_eq!(matcher.resolve(ORIGIN, Category::Outdoor).unwrap().id(), "big");
        assert_eq!(matcher.resolve(at(9.0, 0.0), Category::Outdoor).unwrap().id(), "small");
    }
}
