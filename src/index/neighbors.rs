//! Flat nearest-neighbor index that optionally delegates to a KD-tree.
//!
//! `NearestNeighbors` keeps the caller's constructor parameters verbatim and
//! interprets them through [`NeighborsParams`]. Fitting resolves the effective
//! metric and query strategy and, for the tree strategy, builds a [`KdTree`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{CodecError, Result};
use crate::index::kdtree::KdTree;
use crate::index::traits::StatefulTree;
use crate::metric::{default_registry, DistanceMetric, MetricParams};
use crate::types::{FitMethod, Matrix, Neighbor};

/// Above this dimensionality `auto` picks brute force.
const AUTO_BRUTE_MAX_DIMS: usize = 15;

/// Requested query strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    Auto,
    KdTree,
    BallTree,
    Brute,
}

/// Typed view of the constructor parameter bag. Unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborsParams {
    pub n_neighbors: usize,
    #[serde(with = "extended_float")]
    pub radius: f64,
    pub algorithm: Algorithm,
    pub leaf_size: usize,
    pub metric: String,
    #[serde(with = "extended_float")]
    pub p: f64,
    pub metric_params: Option<MetricParams>,
    pub n_jobs: Option<i64>,
}

impl Default for NeighborsParams {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            radius: 1.0,
            algorithm: Algorithm::Auto,
            leaf_size: 30,
            metric: "minkowski".to_string(),
            p: 2.0,
            metric_params: None,
            n_jobs: None,
        }
    }
}

/// JSON numbers plus the strings `inf` and `-inf` for the infinities.
mod extended_float {
    use serde::{de, ser, Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            Err(ser::Error::custom("NaN has no JSON representation"))
        } else if *value > 0.0 {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(text) => parse(&text).ok_or_else(|| {
                de::Error::custom(format!("expected a number, `inf` or `-inf`, got `{text}`"))
            }),
        }
    }

    pub fn parse(text: &str) -> Option<f64> {
        match text.to_ascii_lowercase().as_str() {
            "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
            "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        }
    }

    pub fn from_value(value: &Value) -> Option<f64> {
        value.as_f64().or_else(|| value.as_str().and_then(parse))
    }
}

/// Attributes produced by `fit`.
#[derive(Debug)]
pub struct FitState {
    pub fit_x: Matrix,
    pub n_samples_fit: usize,
    pub n_features_in: usize,
    pub effective_metric: String,
    pub effective_metric_params: MetricParams,
    pub fit_method: FitMethod,
    pub feature_names_in: Option<Vec<String>>,
    pub tree: Option<KdTree>,
    /// Instance of `effective_metric`, used by brute-force queries.
    pub metric: Box<dyn DistanceMetric>,
}

#[derive(Debug)]
pub struct NearestNeighbors {
    params: Map<String, Value>,
    settings: NeighborsParams,
    fit: Option<FitState>,
}

impl NearestNeighbors {
    /// Construct from typed settings. The parameter bag is their JSON form,
    /// so it reads back into the same settings.
    pub fn new(settings: NeighborsParams) -> Result<Self> {
        match serde_json::to_value(&settings)
            .map_err(|e| CodecError::schema("params", e.to_string()))?
        {
            Value::Object(params) => Self::from_params(params),
            other => Err(CodecError::schema(
                "params",
                format!("settings serialized to {other}"),
            )),
        }
    }

    /// Construct from a raw parameter bag, which is kept as given.
    pub fn from_params(params: Map<String, Value>) -> Result<Self> {
        let settings: NeighborsParams = serde_json::from_value(Value::Object(params.clone()))
            .map_err(|e| CodecError::schema("params", e.to_string()))?;
        if settings.n_neighbors == 0 {
            return Err(CodecError::schema("params", "n_neighbors must be positive"));
        }
        if settings.leaf_size == 0 {
            return Err(CodecError::schema("params", "leaf_size must be positive"));
        }
        Ok(Self {
            params,
            settings,
            fit: None,
        })
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn settings(&self) -> &NeighborsParams {
        &self.settings
    }

    pub fn is_fitted(&self) -> bool {
        self.fit.is_some()
    }

    pub fn fit_state(&self) -> Option<&FitState> {
        self.fit.as_ref()
    }

    pub fn tree(&self) -> Option<&KdTree> {
        self.fit.as_ref().and_then(|f| f.tree.as_ref())
    }

    /// Install fitted attributes restored from elsewhere.
    pub fn set_fit_state(&mut self, fit: FitState) {
        self.fit = Some(fit);
    }

    pub fn fit(&mut self, points: Matrix) -> Result<&mut Self> {
        self.fit_inner(points, None)
    }

    /// Fit and remember column names; one name per column.
    pub fn fit_with_feature_names(
        &mut self,
        points: Matrix,
        names: Vec<String>,
    ) -> Result<&mut Self> {
        if names.len() != points.ncols() {
            return Err(CodecError::DimensionMismatch {
                expected: points.ncols(),
                actual: names.len(),
            });
        }
        self.fit_inner(points, Some(names))
    }

    fn fit_inner(&mut self, points: Matrix, names: Option<Vec<String>>) -> Result<&mut Self> {
        let (n, d) = points.shape();
        if n == 0 || d == 0 {
            return Err(CodecError::Index(format!(
                "cannot fit on a {n}x{d} matrix"
            )));
        }
        if points.as_slice().iter().any(|v| !v.is_finite()) {
            return Err(CodecError::Index("input contains non-finite values".into()));
        }

        let (effective_metric, effective_metric_params) = self.effective_metric();
        let metric = default_registry().by_short_name(&effective_metric, &effective_metric_params)?;

        let fit_method = match self.settings.algorithm {
            Algorithm::Brute => FitMethod::Brute,
            Algorithm::KdTree => FitMethod::KdTree,
            Algorithm::BallTree => {
                return Err(CodecError::Index("the ball_tree algorithm is not supported".into()))
            }
            Algorithm::Auto => {
                if d > AUTO_BRUTE_MAX_DIMS || self.settings.n_neighbors >= n / 2 {
                    FitMethod::Brute
                } else {
                    FitMethod::KdTree
                }
            }
        };

        let tree = match fit_method {
            FitMethod::KdTree => Some(KdTree::build(
                points.clone(),
                self.settings.leaf_size,
                metric.clone(),
            )?),
            FitMethod::Brute => None,
        };

        debug!(
            samples = n,
            features = d,
            metric = %effective_metric,
            method = %fit_method,
            "fitted nearest-neighbors index"
        );

        self.fit = Some(FitState {
            fit_x: points,
            n_samples_fit: n,
            n_features_in: d,
            effective_metric,
            effective_metric_params,
            fit_method,
            feature_names_in: names,
            tree,
            metric,
        });
        Ok(self)
    }

    /// Minkowski with p of 1, 2 or infinity collapses to its named metric.
    fn effective_metric(&self) -> (String, MetricParams) {
        let mut params = self.settings.metric_params.clone().unwrap_or_default();
        if self.settings.metric != "minkowski" {
            return (self.settings.metric.clone(), params);
        }
        let p = params
            .remove("p")
            .and_then(|v| extended_float::from_value(&v))
            .unwrap_or(self.settings.p);
        let name = if p == 1.0 {
            "manhattan"
        } else if p == 2.0 {
            "euclidean"
        } else if p == f64::INFINITY {
            "chebyshev"
        } else {
            params.insert("p".to_string(), Value::from(p));
            "minkowski"
        };
        (name.to_string(), params)
    }

    /// The `k` (default `n_neighbors`) nearest fitted points to `point`.
    pub fn kneighbors(&self, point: &[f64], k: Option<usize>) -> Result<Vec<Neighbor>> {
        let fit = self
            .fit
            .as_ref()
            .ok_or_else(|| CodecError::Index("index is not fitted".into()))?;
        let k = k.unwrap_or(self.settings.n_neighbors);
        if k == 0 {
            return Err(CodecError::Index("k must be positive".into()));
        }
        if k > fit.n_samples_fit {
            return Err(CodecError::Index(format!(
                "k={k} exceeds the number of fitted points ({})",
                fit.n_samples_fit
            )));
        }

        if let Some(tree) = &fit.tree {
            return tree.query(point, k);
        }

        if point.len() != fit.n_features_in {
            return Err(CodecError::DimensionMismatch {
                expected: fit.n_features_in,
                actual: point.len(),
            });
        }
        let mut hits: Vec<Neighbor> = fit
            .fit_x
            .rows()
            .enumerate()
            .map(|(index, row)| Neighbor {
                index,
                distance: fit.metric.dist(point, row),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.index.cmp(&b.index)));
        hits.truncate(k);
        Ok(hits)
    }

    pub fn kneighbors_many(&self, points: &Matrix, k: Option<usize>) -> Result<Vec<Vec<Neighbor>>> {
        points.rows().map(|p| self.kneighbors(p, k)).collect()
    }
}
