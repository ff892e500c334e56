pub mod catalog;
pub mod matcher;

pub use catalog::{
    Boundary, Catalog, CatalogEntry, Category, LocationRecord, RecordKind, RejectedRecord, Shape,
};
pub use matcher::{contains_zone, haversine_distance, match_nearest, GeoMatcher};
