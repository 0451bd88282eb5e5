use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;
use tracing::debug;

use super::{
    ChebyshevDistance, DistanceMetric, EuclideanDistance, ManhattanDistance, MetricIdentity,
    MetricParams, MinkowskiDistance, METRIC_MODULE,
};
use crate::error::{CodecError, Result};

/// Builds a metric from its stored constructor parameters.
pub type MetricFactory = fn(&MetricParams) -> Result<Box<dyn DistanceMetric>>;

lazy_static! {
    static ref DEFAULT_REGISTRY: MetricRegistry = MetricRegistry::with_defaults();
}

/// The process-wide registry holding the built-in metrics and the default
/// module aliases.
pub fn default_registry() -> &'static MetricRegistry {
    &DEFAULT_REGISTRY
}

/// Maps `(module path, class name)` to a metric factory.
///
/// Module aliases let payloads written under another module path (e.g. the
/// Python `sklearn.metrics._dist_metrics`) resolve to the native metrics.
#[derive(Clone, Default)]
pub struct MetricRegistry {
    modules: HashMap<String, HashMap<String, MetricFactory>>,
    aliases: HashMap<String, String>,
    short_names: HashMap<String, (String, String)>,
}

impl fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<String> = self
            .modules
            .iter()
            .flat_map(|(m, names)| names.keys().map(move |n| format!("{m}::{n}")))
            .collect();
        entries.sort();
        f.debug_struct("MetricRegistry")
            .field("metrics", &entries)
            .field("aliases", &self.aliases)
            .finish()
    }
}

impl MetricRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in metrics, their short names, and the sklearn module aliases.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(METRIC_MODULE, "EuclideanDistance", euclidean)
            .register(METRIC_MODULE, "ManhattanDistance", manhattan)
            .register(METRIC_MODULE, "ChebyshevDistance", chebyshev)
            .register(METRIC_MODULE, "MinkowskiDistance", minkowski);

        for short in ["euclidean", "l2"] {
            registry.register_short_name(short, METRIC_MODULE, "EuclideanDistance");
        }
        for short in ["manhattan", "cityblock", "l1"] {
            registry.register_short_name(short, METRIC_MODULE, "ManhattanDistance");
        }
        for short in ["chebyshev", "infinity"] {
            registry.register_short_name(short, METRIC_MODULE, "ChebyshevDistance");
        }
        for short in ["minkowski", "p"] {
            registry.register_short_name(short, METRIC_MODULE, "MinkowskiDistance");
        }

        registry
            .alias_module("sklearn.metrics._dist_metrics", METRIC_MODULE)
            .alias_module("sklearn.neighbors._dist_metrics", METRIC_MODULE);
        registry
    }

    pub fn register(&mut self, module: &str, name: &str, factory: MetricFactory) -> &mut Self {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), factory);
        self
    }

    /// Resolve `alias` as if it were `target` when looking up modules.
    pub fn alias_module(&mut self, alias: &str, target: &str) -> &mut Self {
        self.aliases.insert(alias.to_string(), target.to_string());
        self
    }

    /// Make a metric reachable by a short configuration name such as `l2`.
    pub fn register_short_name(&mut self, short: &str, module: &str, name: &str) -> &mut Self {
        self.short_names
            .insert(short.to_string(), (module.to_string(), name.to_string()));
        self
    }

    pub fn contains(&self, module: &str, name: &str) -> bool {
        self.lookup(module, name).is_some()
    }

    fn module(&self, module: &str) -> Option<&HashMap<String, MetricFactory>> {
        self.modules.get(module).or_else(|| {
            self.aliases
                .get(module)
                .and_then(|target| self.modules.get(target))
        })
    }

    fn lookup(&self, module: &str, name: &str) -> Option<MetricFactory> {
        self.module(module)?.get(name).copied()
    }

    /// Instantiate the metric named by `identity`.
    pub fn resolve(&self, identity: &MetricIdentity) -> Result<Box<dyn DistanceMetric>> {
        let MetricIdentity {
            module,
            name,
            params,
        } = identity;

        let names = self.module(module).ok_or_else(|| CodecError::MetricResolution {
            module: module.clone(),
            name: name.clone(),
            reason: "module is not registered".into(),
        })?;

        let factory = names.get(name).ok_or_else(|| CodecError::MetricResolution {
            module: module.clone(),
            name: name.clone(),
            reason: "module has no metric with this name".into(),
        })?;

        debug!(metric = %identity, params = params.len(), "resolved distance metric");
        factory(params)
    }

    /// Instantiate a metric by short name (`euclidean`, `l1`, `minkowski`, ...).
    pub fn by_short_name(
        &self,
        short: &str,
        params: &MetricParams,
    ) -> Result<Box<dyn DistanceMetric>> {
        let (module, name) =
            self.short_names
                .get(short)
                .ok_or_else(|| CodecError::MetricResolution {
                    module: String::new(),
                    name: short.to_string(),
                    reason: "no metric registered under this short name".into(),
                })?;
        self.resolve(&MetricIdentity {
            module: module.clone(),
            name: name.clone(),
            params: params.clone(),
        })
    }
}

fn reject_params(name: &str, params: &MetricParams, allowed: &[&str]) -> Result<()> {
    match params.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(CodecError::MetricResolution {
            module: METRIC_MODULE.into(),
            name: name.into(),
            reason: format!("unexpected parameter `{key}`"),
        }),
        None => Ok(()),
    }
}

fn euclidean(params: &MetricParams) -> Result<Box<dyn DistanceMetric>> {
    reject_params("EuclideanDistance", params, &[])?;
    Ok(Box::new(EuclideanDistance))
}

fn manhattan(params: &MetricParams) -> Result<Box<dyn DistanceMetric>> {
    reject_params("ManhattanDistance", params, &[])?;
    Ok(Box::new(ManhattanDistance))
}

fn chebyshev(params: &MetricParams) -> Result<Box<dyn DistanceMetric>> {
    reject_params("ChebyshevDistance", params, &[])?;
    Ok(Box::new(ChebyshevDistance))
}

fn minkowski(params: &MetricParams) -> Result<Box<dyn DistanceMetric>> {
    reject_params("MinkowskiDistance", params, &["p"])?;
    let p = match params.get("p") {
        None => 2.0,
        Some(v) => v.as_f64().ok_or_else(|| CodecError::MetricResolution {
            module: METRIC_MODULE.into(),
            name: "MinkowskiDistance".into(),
            reason: format!("parameter `p` must be a number, got {v}"),
        })?,
    };
    Ok(Box::new(MinkowskiDistance::new(p)?))
}
