//! Immutable per-tick snapshot of declared assets and their dependencies.
//!
//! An [`AssetGraph`] is validated once at construction (no duplicates, no
//! dangling upstreams, no cycles) and never mutated afterwards. Declarations
//! that change between ticks produce a new snapshot; an evaluation in progress
//! keeps reading the one it started with.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::graph::NodeIndex;

use crate::asset::{AssetDefinition, AssetKey, FreshnessPolicy};
use crate::dag::Dag;
use crate::error::{Error, Result};

/// Validated, read-only asset dependency graph.
#[derive(Debug, Clone)]
pub struct AssetGraph {
    dag: Dag<AssetKey>,
    definitions: HashMap<AssetKey, AssetDefinition>,
    /// Full topological order, computed once at construction.
    order: Vec<AssetKey>,
}

impl AssetGraph {
    /// Builds a graph from declarations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateAsset`], [`Error::DanglingDependency`] or
    /// [`Error::CycleDetected`] when the declarations violate graph integrity.
    #[tracing::instrument(skip_all)]
    pub fn from_definitions(definitions: impl IntoIterator<Item = AssetDefinition>) -> Result<Self> {
        let mut dag: Dag<AssetKey> = Dag::new();
        let mut by_key: HashMap<AssetKey, AssetDefinition> = HashMap::new();

        let mut declared: Vec<AssetDefinition> = definitions.into_iter().collect();
        // Insert nodes in key order so node indices do not depend on declaration order.
        declared.sort_by(|a, b| a.key.cmp(&b.key));

        for def in declared {
            if by_key.contains_key(&def.key) {
                return Err(Error::DuplicateAsset {
                    asset: def.key.to_string(),
                });
            }
            dag.add_node(def.key.clone());
            by_key.insert(def.key.clone(), def);
        }

        let mut keys: Vec<&AssetKey> = by_key.keys().collect();
        keys.sort();
        for key in keys {
            let to = dag.get_index(key).ok_or_else(|| Error::AssetNotFound {
                asset: key.to_string(),
            })?;
            let Some(def) = by_key.get(key) else {
                continue;
            };
            for upstream in &def.deps {
                let from = dag
                    .get_index(upstream)
                    .ok_or_else(|| Error::DanglingDependency {
                        asset: key.to_string(),
                        upstream: upstream.to_string(),
                    })?;
                dag.add_edge(from, to)?;
            }
        }

        let order = dag
            .toposort()?
            .into_iter()
            .map(|idx| dag.weight(idx).cloned())
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            nodes = dag.node_count(),
            edges = dag.edge_count(),
            "asset graph validated"
        );

        Ok(Self {
            dag,
            definitions: by_key,
            order,
        })
    }

    /// Returns the number of assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dag.node_count()
    }

    /// Returns true if the graph has no assets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dag.node_count() == 0
    }

    /// Returns the number of dependency edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    /// Returns true if `key` is declared.
    #[must_use]
    pub fn contains(&self, key: &AssetKey) -> bool {
        self.definitions.contains_key(key)
    }

    /// Returns the declaration of `key`.
    #[must_use]
    pub fn definition(&self, key: &AssetKey) -> Option<&AssetDefinition> {
        self.definitions.get(key)
    }

    /// Returns the freshness policy of `key`, if any.
    #[must_use]
    pub fn policy(&self, key: &AssetKey) -> Option<FreshnessPolicy> {
        self.definitions.get(key).and_then(|d| d.freshness_policy)
    }

    /// Iterates over assets carrying a freshness policy, in topological order.
    pub fn policy_assets(&self) -> impl Iterator<Item = (&AssetKey, FreshnessPolicy)> + '_ {
        self.order
            .iter()
            .filter_map(|key| self.policy(key).map(|policy| (key, policy)))
    }

    /// Returns all keys in topological order (dependencies first).
    #[must_use]
    pub fn topological_keys(&self) -> &[AssetKey] {
        &self.order
    }

    /// Returns the direct upstreams of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetNotFound`] for an undeclared key.
    pub fn upstreams(&self, key: &AssetKey) -> Result<BTreeSet<AssetKey>> {
        let idx = self.index(key)?;
        self.collect(self.dag.upstream_indices(idx))
    }

    /// Returns the direct downstreams of `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetNotFound`] for an undeclared key.
    pub fn downstreams(&self, key: &AssetKey) -> Result<BTreeSet<AssetKey>> {
        let idx = self.index(key)?;
        self.collect(self.dag.downstream_indices(idx))
    }

    /// Orders `subset` topologically (dependencies first) using only the edges
    /// between members of the subset.
    ///
    /// Ties are broken by asset key, so the result does not depend on the
    /// iteration order of `subset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AssetNotFound`] if a key is undeclared, or
    /// [`Error::CycleDetected`] if the induced subgraph is cyclic (which the
    /// construction-time validation makes unreachable).
    pub fn topological_order<'a>(
        &self,
        subset: impl IntoIterator<Item = &'a AssetKey>,
    ) -> Result<Vec<AssetKey>> {
        let indices = subset
            .into_iter()
            .map(|key| self.index(key))
            .collect::<Result<HashSet<NodeIndex>>>()?;
        self.dag
            .toposort_subset(&indices)?
            .into_iter()
            .map(|idx| self.dag.weight(idx).cloned())
            .collect()
    }

    fn index(&self, key: &AssetKey) -> Result<NodeIndex> {
        self.dag.get_index(key).ok_or_else(|| Error::AssetNotFound {
            asset: key.to_string(),
        })
    }

    fn collect(&self, indices: impl Iterator<Item = NodeIndex>) -> Result<BTreeSet<AssetKey>> {
        indices.map(|idx| self.dag.weight(idx).cloned()).collect()
    }
}
