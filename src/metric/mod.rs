//! Distance metrics usable by the KD-tree and the flat index.
//!
//! Metrics are identified on the wire by `(module path, class name)` plus an
//! optional parameter map, and rebuilt through a [`MetricRegistry`].

pub mod registry;

use std::fmt;

use serde_json::{Map, Value};

use crate::error::{CodecError, Result};

pub use registry::{default_registry, MetricFactory, MetricRegistry};

/// Module path under which the built-in metrics are registered.
pub const METRIC_MODULE: &str = "neighbors_json::metric";

/// Constructor parameters of a metric (`{"p": 3.0}` for Minkowski).
pub type MetricParams = Map<String, Value>;

/// Type identity of a metric: where to find it and how to rebuild it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricIdentity {
    pub module: String,
    pub name: String,
    pub params: MetricParams,
}

impl MetricIdentity {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            params: MetricParams::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for MetricIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module, self.name)
    }
}

/// A distance over points of equal dimension.
///
/// Trees work in "reduced" distance (for Euclidean, the squared distance),
/// which preserves ordering and is cheaper to compute. `reduce` receives the
/// absolute per-coordinate differences, which also lets the KD-tree compute
/// a lower bound to a bounding box from per-axis gaps.
pub trait DistanceMetric: fmt::Debug + Send + Sync {
    fn identity(&self) -> MetricIdentity;

    fn reduce(&self, diffs: &mut dyn Iterator<Item = f64>) -> f64;

    fn rdist_to_dist(&self, rdist: f64) -> f64;

    fn dist_to_rdist(&self, dist: f64) -> f64;

    fn box_clone(&self) -> Box<dyn DistanceMetric>;

    fn rdist(&self, a: &[f64], b: &[f64]) -> f64 {
        self.reduce(&mut a.iter().zip(b).map(|(x, y)| (x - y).abs()))
    }

    fn dist(&self, a: &[f64], b: &[f64]) -> f64 {
        self.rdist_to_dist(self.rdist(a, b))
    }
}

impl Clone for Box<dyn DistanceMetric> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EuclideanDistance;

impl DistanceMetric for EuclideanDistance {
    fn identity(&self) -> MetricIdentity {
        MetricIdentity::new(METRIC_MODULE, "EuclideanDistance")
    }

    fn reduce(&self, diffs: &mut dyn Iterator<Item = f64>) -> f64 {
        diffs.map(|d| d * d).sum()
    }

    fn rdist_to_dist(&self, rdist: f64) -> f64 {
        rdist.sqrt()
    }

    fn dist_to_rdist(&self, dist: f64) -> f64 {
        dist * dist
    }

    fn box_clone(&self) -> Box<dyn DistanceMetric> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ManhattanDistance;

impl DistanceMetric for ManhattanDistance {
    fn identity(&self) -> MetricIdentity {
        MetricIdentity::new(METRIC_MODULE, "ManhattanDistance")
    }

    fn reduce(&self, diffs: &mut dyn Iterator<Item = f64>) -> f64 {
        diffs.sum()
    }

    fn rdist_to_dist(&self, rdist: f64) -> f64 {
        rdist
    }

    fn dist_to_rdist(&self, dist: f64) -> f64 {
        dist
    }

    fn box_clone(&self) -> Box<dyn DistanceMetric> {
        Box::new(*self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChebyshevDistance;

impl DistanceMetric for ChebyshevDistance {
    fn identity(&self) -> MetricIdentity {
        MetricIdentity::new(METRIC_MODULE, "ChebyshevDistance")
    }

    fn reduce(&self, diffs: &mut dyn Iterator<Item = f64>) -> f64 {
        diffs.fold(0.0, f64::max)
    }

    fn rdist_to_dist(&self, rdist: f64) -> f64 {
        rdist
    }

    fn dist_to_rdist(&self, dist: f64) -> f64 {
        dist
    }

    fn box_clone(&self) -> Box<dyn DistanceMetric> {
        Box::new(*self)
    }
}

/// Minkowski distance of finite order `p >= 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinkowskiDistance {
    p: f64,
}

impl MinkowskiDistance {
    pub fn new(p: f64) -> Result<Self> {
        if !p.is_finite() || p < 1.0 {
            return Err(CodecError::MetricResolution {
                module: METRIC_MODULE.into(),
                name: "MinkowskiDistance".into(),
                reason: format!("p must be a finite number >= 1, got {p}"),
            });
        }
        Ok(Self { p })
    }

    pub fn p(&self) -> f64 {
        self.p
    }
}

impl DistanceMetric for MinkowskiDistance {
    fn identity(&self) -> MetricIdentity {
        MetricIdentity::new(METRIC_MODULE, "MinkowskiDistance").with_param("p", self.p)
    }

    fn reduce(&self, diffs: &mut dyn Iterator<Item = f64>) -> f64 {
        diffs.map(|d| d.powf(self.p)).sum()
    }

    fn rdist_to_dist(&self, rdist: f64) -> f64 {
        rdist.powf(1.0 / self.p)
    }

    fn dist_to_rdist(&self, dist: f64) -> f64 {
        dist.powf(self.p)
    }

    fn box_clone(&self) -> Box<dyn DistanceMetric> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_known_distances() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert_approx_eq!(EuclideanDistance.dist(&a, &b), 5.0);
        assert_approx_eq!(EuclideanDistance.rdist(&a, &b), 25.0);
        assert_approx_eq!(ManhattanDistance.dist(&a, &b), 7.0);
        assert_approx_eq!(ChebyshevDistance.dist(&a, &b), 4.0);
        let m3 = MinkowskiDistance::new(3.0).unwrap();
        assert_approx_eq!(m3.dist(&a, &b), (27.0f64 + 64.0).powf(1.0 / 3.0));
    }

    #[test]
    fn test_rdist_conversions_invert() {
        let m = MinkowskiDistance::new(2.5).unwrap();
        assert_approx_eq!(m.rdist_to_dist(m.dist_to_rdist(1.7)), 1.7);
        assert_approx_eq!(EuclideanDistance.rdist_to_dist(EuclideanDistance.dist_to_rdist(2.0)), 2.0);
    }

    #[test]
    fn test_minkowski_rejects_bad_order() {
        assert!(MinkowskiDistance::new(0.5).is_err());
        assert!(MinkowskiDistance::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_identity_carries_params() {
        let id = MinkowskiDistance::new(3.0).unwrap().identity();
        assert_eq!(id.name, "MinkowskiDistance");
        assert_eq!(id.params.get("p"), Some(&Value::from(3.0)));
        assert!(EuclideanDistance.identity().params.is_empty());
    }
}
