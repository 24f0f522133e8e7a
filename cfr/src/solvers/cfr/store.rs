use std::{
    collections::HashMap,
    hash::{
        BuildHasherDefault,
        Hash,
        Hasher,
    },
    sync::Arc,
};

use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use wyhash::WyHash;

use super::node::{
    InformationSetNode,
    NodeStatistics,
};
use crate::{
    error::SolverError,
    games::{
        ActionId,
        InfoSetKey,
    },
    policy::UpdateRule,
};

const SHARDS: usize = 16;

pub type NodeCell<K> = Arc<RwLock<InformationSetNode<K>>>;

type NodeMap<K> = HashMap<(usize, K), NodeCell<K>, BuildHasherDefault<WyHash>>;

/// Information sets of every player, created on first visit and kept for the whole run.
pub struct InformationSetStore<K: InfoSetKey> {
    shards: Vec<RwLock<NodeMap<K>>>,
}

impl<K: InfoSetKey> Default for InformationSetStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: InfoSetKey> InformationSetStore<K> {
    pub fn new() -> Self {
        InformationSetStore {
            shards: (0..SHARDS).map(|_| RwLock::new(NodeMap::<K>::default())).collect(),
        }
    }

    fn shard(&self, player: usize, key: &K) -> &RwLock<NodeMap<K>> {
        let mut hasher = WyHash::with_seed(0);
        player.hash(&mut hasher);
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }

    pub fn lookup(&self, player: usize, key: &K) -> Option<NodeCell<K>> {
        self.shard(player, key).read().get(&(player, key.clone())).cloned()
    }

    pub fn lookup_or_insert(&self, player: usize, key: &K, actions: &[ActionId]) -> NodeCell<K> {
        if let Some(node) = self.lookup(player, key) {
            return node;
        }
        let mut shard = self.shard(player, key).write();
        Arc::clone(shard.entry((player, key.clone())).or_insert_with(|| {
            Arc::new(RwLock::new(InformationSetNode::new(player, key.clone(), actions.to_vec())))
        }))
    }

    pub fn current_policy(&self, player: usize, key: &K) -> Option<Vec<f64>> {
        self.lookup(player, key).map(|node| node.read().get_policy().to_vec())
    }

    pub fn average_policy(&self, player: usize, key: &K) -> Option<Vec<f64>> {
        self.lookup(player, key).map(|node| node.read().stats.to_average_strategy())
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every node, ordered by `(player, key)`.
    pub fn nodes(&self) -> Vec<NodeCell<K>> {
        let mut entries: Vec<((usize, K), NodeCell<K>)> = self
            .shards
            .iter()
            .flat_map(|s| {
                s.read().iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, node)| node).collect()
    }

    /// Applies `rule` to every node touched during the iteration. Nodes are independent,
    /// so the result does not depend on the order rayon visits them in.
    pub fn update_all(
        &self,
        rule: &dyn UpdateRule,
        weight_by_inverse_reach: bool,
    ) -> Result<usize, SolverError> {
        let nodes: Vec<NodeCell<K>> = self
            .shards
            .iter()
            .flat_map(|s| s.read().values().cloned().collect::<Vec<_>>())
            .collect();
        nodes
            .par_iter()
            .map(|cell| -> Result<usize, SolverError> {
                let mut node = cell.write();
                if !node.stats.is_touched() {
                    return Ok(0);
                }
                rule.update(&mut node.stats, weight_by_inverse_reach)?;
                Ok(1)
            })
            .try_reduce(|| 0, |a, b| Ok(a + b))
    }

    pub fn snapshot(&self) -> StoreSnapshot<K> {
        let nodes = self
            .nodes()
            .iter()
            .map(|cell| {
                let node = cell.read();
                NodeSnapshot {
                    player: node.player(),
                    info_set: node.info_set().clone(),
                    actions: node.get_actions().to_vec(),
                    cumulative_regret: node.stats.cumulative_regret().to_vec(),
                    policy: node.stats.policy().to_vec(),
                    cumulative_strategy: node.stats.cumulative_strategy().to_vec(),
                    value_range: node.stats.value_range(),
                }
            })
            .collect();
        StoreSnapshot {
            nodes,
        }
    }

    pub fn restore(snapshot: StoreSnapshot<K>) -> Self {
        let store = InformationSetStore::new();
        for node in snapshot.nodes {
            let stats = NodeStatistics::restore(
                node.cumulative_regret,
                node.policy,
                node.cumulative_strategy,
                node.value_range,
            );
            let key = (node.player, node.info_set.clone());
            let cell = Arc::new(RwLock::new(InformationSetNode::from_parts(
                node.player,
                node.info_set,
                node.actions,
                stats,
            )));
            store.shard(key.0, &key.1).write().insert(key, cell);
        }
        store
    }
}

/// Serializable state of one information set. Per-iteration accumulators are not part
/// of it: snapshots are taken between iterations, when they are zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "K: InfoSetKey")]
pub struct NodeSnapshot<K> {
    pub player: usize,
    pub info_set: K,
    pub actions: Vec<ActionId>,
    pub cumulative_regret: Vec<f64>,
    pub policy: Vec<f64>,
    pub cumulative_strategy: Vec<f64>,
    pub value_range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "K: InfoSetKey")]
pub struct StoreSnapshot<K> {
    pub nodes: Vec<NodeSnapshot<K>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        policy::{
            PerturbationSchedule,
            RegretMatching,
        },
        solvers::cfr::node::RegretSample,
    };

    #[test]
    fn test_lookup_or_insert_is_idempotent() {
        let store = InformationSetStore::<String>::new();
        assert!(store.lookup(0, &"a".to_string()).is_none());
        let a = store.lookup_or_insert(0, &"a".to_string(), &[1, 2]);
        let b = store.lookup_or_insert(0, &"a".to_string(), &[1, 2]);
        assert!(Arc::ptr_eq(&a, &b));
        // the same key for another player is another node
        store.lookup_or_insert(1, &"a".to_string(), &[1, 2, 3]);
        assert_eq!(2, store.len());
        assert_eq!(Some(vec![0.5, 0.5]), store.current_policy(0, &"a".to_string()));
        assert_eq!(Some(vec![1.0 / 3.0; 3]), store.current_policy(1, &"a".to_string()));
    }

    #[test]
    fn test_update_all_skips_untouched_nodes() {
        let store = InformationSetStore::<String>::new();
        let a = store.lookup_or_insert(0, &"a".to_string(), &[1, 2]);
        store.lookup_or_insert(0, &"b".to_string(), &[1, 2]);
        a.read().stats.accumulate(&RegretSample::new(vec![1.0, -1.0], vec![1.0, -1.0], 1.0));

        let mut rule = RegretMatching::default();
        rule.prepare(0, &PerturbationSchedule::None);
        assert_eq!(1, store.update_all(&rule, false).unwrap());
        assert_eq!(Some(vec![1.0, 0.0]), store.current_policy(0, &"a".to_string()));
        assert_eq!(Some(vec![0.5, 0.5]), store.current_policy(0, &"b".to_string()));
        assert_eq!(0, store.update_all(&rule, false).unwrap());
    }

    #[test]
    fn test_nodes_are_sorted() {
        let store = InformationSetStore::<String>::new();
        for (player, key) in [(1, "b"), (0, "z"), (1, "a"), (0, "c")] {
            store.lookup_or_insert(player, &key.to_string(), &[1]);
        }
        let order: Vec<(usize, String)> = store
            .nodes()
            .iter()
            .map(|n| {
                let n = n.read();
                (n.player(), n.info_set().clone())
            })
            .collect();
        assert_eq!(
            vec![
                (0, "c".to_string()),
                (0, "z".to_string()),
                (1, "a".to_string()),
                (1, "b".to_string())
            ],
            order
        );
    }

    #[test]
    fn test_snapshot_round_trip() {
        let store = InformationSetStore::<String>::new();
        let a = store.lookup_or_insert(0, &"a".to_string(), &[1, 2]);
        store.lookup_or_insert(1, &"never visited".to_string(), &[1, 2]);
        a.read().stats.accumulate(&RegretSample::new(vec![0.1, 0.7], vec![-0.3, 0.9], 0.3));
        let mut rule = RegretMatching::default();
        rule.prepare(0, &PerturbationSchedule::None);
        store.update_all(&rule, false).unwrap();

        let snapshot = store.snapshot();
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: StoreSnapshot<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, restored);
        assert_eq!(None, restored.nodes[1].value_range);

        let store = InformationSetStore::restore(restored);
        assert_eq!(snapshot, store.snapshot());
    }
}
