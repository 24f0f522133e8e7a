use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    fmt::Debug,
    hash::BuildHasherDefault,
};

use serde::{
    de::DeserializeOwned,
    Deserialize,
    Serialize,
};
use wyhash::WyHash;

use super::buffer::Observation;
use crate::{
    error::{
        ensure_finite,
        SolverError,
    },
    pool::Recycle,
    solvers::cfr::node::regret_matching,
};

pub const DEFAULT_RIDGE: f64 = 1e-3;

/// Learns per-action regret from observations.
pub trait RegretRegressor: Debug + Clone + Send + Sync + Serialize + DeserializeOwned {
    /// Replaces the current fit with one over `observations`.
    fn fit(&mut self, observations: &[Observation]) -> Result<(), SolverError>;

    /// Predicted regret, or `None` when nothing was ever fitted for this action.
    fn predict(
        &self,
        player: usize,
        decision_index: usize,
        action_index: usize,
        encoding: &[f64],
    ) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionHead {
    player: usize,
    decision_index: usize,
    action_index: usize,
    coefficients: Vec<f64>,
    bias: f64,
}

impl RegressionHead {
    fn key(&self) -> (usize, usize, usize) {
        (self.player, self.decision_index, self.action_index)
    }
}

/// Weighted ridge regression, one independent linear head per
/// `(player, decision_index, action)`. The bias is not regularized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    ridge: f64,
    /// Sorted by key.
    heads: Vec<RegressionHead>,
}

impl Default for LinearRegressor {
    fn default() -> Self {
        Self::new(DEFAULT_RIDGE)
    }
}

impl LinearRegressor {
    pub fn new(ridge: f64) -> Self {
        LinearRegressor {
            ridge: ridge.max(0.0),
            heads: vec![],
        }
    }

    pub fn num_heads(&self) -> usize {
        self.heads.len()
    }

    fn fit_head(
        &self,
        key: (usize, usize, usize),
        observations: &[&Observation],
    ) -> Result<RegressionHead, SolverError> {
        let features = observations[0].encoding.len();
        let n = features + 1;
        let mut gram = vec![0.0; n * n];
        let mut moment = vec![0.0; n];
        let mut x = vec![0.0; n];
        for obs in observations {
            if obs.encoding.len() != features {
                let context = format!(
                    "encoding length {} of {:?}, expected {}",
                    obs.encoding.len(),
                    key,
                    features
                );
                return Err(SolverError::numeric(context, &obs.encoding));
            }
            ensure_finite("observation", &[obs.regret, obs.weight])?;
            x[..features].copy_from_slice(&obs.encoding);
            x[features] = 1.0;
            for i in 0..n {
                let wx = obs.weight * x[i];
                moment[i] += wx * obs.regret;
                for j in 0..n {
                    gram[i * n + j] += wx * x[j];
                }
            }
        }
        for i in 0..features {
            gram[i * n + i] += self.ridge;
        }

        let solution = solve(gram, moment, n)
            .ok_or_else(|| SolverError::numeric(format!("singular system for {:?}", key), &[]))?;
        ensure_finite("regression coefficients", &solution)?;
        Ok(RegressionHead {
            player: key.0,
            decision_index: key.1,
            action_index: key.2,
            coefficients: solution[..features].to_vec(),
            bias: solution[features],
        })
    }
}

/// Gaussian elimination with partial pivoting on a row-major `n x n` system.
fn solve(mut a: Vec<f64>, mut b: Vec<f64>, n: usize) -> Option<Vec<f64>> {
    for col in 0..n {
        let pivot =
            (col..n).max_by(|&i, &j| a[i * n + col].abs().total_cmp(&a[j * n + col].abs()))?;
        if a[pivot * n + col].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap(col * n + k, pivot * n + k);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[row * n + col] / a[col * n + col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row * n + k] -= factor * a[col * n + k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for k in row + 1..n {
            sum -= a[row * n + k] * x[k];
        }
        x[row] = sum / a[row * n + row];
    }
    Some(x)
}

impl RegretRegressor for LinearRegressor {
    fn fit(&mut self, observations: &[Observation]) -> Result<(), SolverError> {
        let mut groups: BTreeMap<(usize, usize, usize), Vec<&Observation>> = BTreeMap::new();
        for obs in observations.iter().filter(|o| o.weight > 0.0) {
            groups.entry((obs.player, obs.decision_index, obs.action_index)).or_default().push(obs);
        }
        let heads = groups
            .iter()
            .map(|(key, group)| self.fit_head(*key, group))
            .collect::<Result<Vec<_>, _>>()?;
        self.heads = heads;
        Ok(())
    }

    fn predict(
        &self,
        player: usize,
        decision_index: usize,
        action_index: usize,
        encoding: &[f64],
    ) -> Option<f64> {
        let index = self
            .heads
            .binary_search_by_key(&(player, decision_index, action_index), |h| h.key())
            .ok()?;
        let head = &self.heads[index];
        if head.coefficients.len() != encoding.len() {
            return None;
        }
        let dot: f64 = head.coefficients.iter().zip(encoding).map(|(c, x)| c * x).sum();
        Some(head.bias + dot)
    }
}

type CacheKey = (usize, usize, Vec<u64>);

/// Memoized policies of one model generation.
///
/// Every entry carries the generation it was computed under and is ignored once the
/// model moved on.
#[derive(Debug, Clone, Default)]
pub struct PolicyCache {
    entries: HashMap<CacheKey, (u64, Vec<f64>), BuildHasherDefault<WyHash>>,
    hits: usize,
    misses: usize,
}

impl PolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(player: usize, decision_index: usize, encoding: &[f64]) -> CacheKey {
        (player, decision_index, encoding.iter().map(|f| f.to_bits()).collect())
    }

    pub fn get(
        &mut self,
        generation: u64,
        player: usize,
        decision_index: usize,
        encoding: &[f64],
    ) -> Option<Vec<f64>> {
        let key = Self::key(player, decision_index, encoding);
        match self.entries.get(&key) {
            Some((stamp, policy)) if *stamp == generation => {
                let policy = policy.clone();
                self.hits += 1;
                return Some(policy);
            }
            Some(_) => {
                self.entries.remove(&key);
            }
            None => {}
        }
        self.misses += 1;
        None
    }

    pub fn insert(
        &mut self,
        generation: u64,
        player: usize,
        decision_index: usize,
        encoding: &[f64],
        policy: Vec<f64>,
    ) {
        self.entries.insert(Self::key(player, decision_index, encoding), (generation, policy));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

impl Recycle for PolicyCache {
    fn reset(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

/// Regret regressor plus the generation counter that versions its policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "R: RegretRegressor")]
pub struct DeepModel<R: RegretRegressor = LinearRegressor> {
    regressor: R,
    generation: u64,
    epsilon: f64,
}

impl<R: RegretRegressor> DeepModel<R> {
    pub fn new(regressor: R) -> Self {
        DeepModel {
            regressor,
            generation: 0,
            epsilon: 0.0,
        }
    }

    pub fn regressor(&self) -> &R {
        &self.regressor
    }

    /// Bumped by every refit and every change of the exploration floor.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) {
        if epsilon != self.epsilon {
            self.epsilon = epsilon;
            self.generation += 1;
        }
    }

    pub fn refit(&mut self, observations: &[Observation]) -> Result<(), SolverError> {
        self.regressor.fit(observations)?;
        self.generation += 1;
        Ok(())
    }

    /// Regret-matched policy over `actions_len` actions. Decisions the regressor knows
    /// nothing about are played uniformly.
    pub fn query(
        &self,
        player: usize,
        decision_index: usize,
        encoding: &[f64],
        actions_len: usize,
        cache: Option<&mut PolicyCache>,
    ) -> Result<Vec<f64>, SolverError> {
        let mut cache = cache;
        if let Some(cache) = cache.as_deref_mut() {
            if let Some(policy) = cache.get(self.generation, player, decision_index, encoding) {
                return Ok(policy);
            }
        }

        let predictions: Vec<Option<f64>> = (0..actions_len)
            .map(|a| self.regressor.predict(player, decision_index, a, encoding))
            .collect();
        let policy = if predictions.iter().all(Option::is_none) {
            vec![1.0 / actions_len as f64; actions_len]
        } else {
            let regrets: Vec<f64> = predictions.iter().map(|p| p.unwrap_or(0.0)).collect();
            let mut policy = vec![0.0; actions_len];
            regret_matching(&regrets, self.epsilon, &mut policy);
            policy
        };
        ensure_finite("model policy", &policy)?;

        if let Some(cache) = cache {
            cache.insert(self.generation, player, decision_index, encoding, policy.clone());
        }
        Ok(policy)
    }
}
