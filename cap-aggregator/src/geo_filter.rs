use crate::geometry::{contains_point, GeoPoint};
use crate::types::{AggregatorOptions, AlertStub};

/// Keeps alerts whose area covers a reference point.
///
/// An alert without any polygon cannot be located and always passes. An
/// alert with polygons passes iff at least one of them contains the point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFilter {
    point: GeoPoint,
}

impl GeoFilter {
    pub fn new(point: GeoPoint) -> Self {
        Self { point }
    }

    pub fn from_options(options: &AggregatorOptions) -> Option<Self> {
        options.reference_point().map(Self::new)
    }

    pub fn point(&self) -> GeoPoint {
        self.point
    }

    pub fn keep(&self, stub: &AlertStub) -> bool {
        let mut polygons = stub.polygons().peekable();
        if polygons.peek().is_none() {
            return true;
        }
        polygons.any(|polygon| contains_point(self.point, polygon))
    }

    /// Drop rejected stubs in place, preserving the order of the rest.
    /// Returns the number removed.
    pub fn apply(&self, items: &mut Vec<AlertStub>) -> usize {
        let before = items.len();
        items.retain(|stub| self.keep(stub));
        before - items.len()
    }
}
