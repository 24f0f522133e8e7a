use std::{
    fmt::Display,
    sync::atomic::{
        AtomicBool,
        AtomicU64,
        Ordering,
    },
};

use more_asserts::debug_assert_ge;

use crate::{
    error::{
        ensure_finite,
        SolverError,
    },
    games::{
        ActionId,
        InfoSetKey,
    },
};

/// `f64` with lock-free read-modify-write operations.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        AtomicF64(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    fn update(&self, f: impl Fn(f64) -> f64) {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = f(f64::from_bits(current)).to_bits();
            match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn fetch_add(&self, delta: f64) {
        self.update(|v| v + delta);
    }

    pub fn fetch_min(&self, value: f64) {
        self.update(|v| v.min(value));
    }

    pub fn fetch_max(&self, value: f64) {
        self.update(|v| v.max(value));
    }
}

/// One visit's worth of regret for the acting player at an information set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegretSample {
    /// Per-action regret, already scaled by counterfactual reach where the traversal
    /// enumerates opponents and chance.
    pub regrets: Vec<f64>,
    /// Per-action value for the acting player; feeds the observed value range.
    pub action_values: Vec<f64>,
    /// Inverse of the acting player's own reach, zero when the node is unreachable.
    pub inverse_reach: f64,
    /// Own reach, used to weight the average strategy.
    pub reach: f64,
}

impl RegretSample {
    pub fn new(regrets: Vec<f64>, action_values: Vec<f64>, reach: f64) -> Self {
        let inverse_reach = if reach > 0.0 {
            1.0 / reach
        } else {
            0.0
        };
        RegretSample {
            regrets,
            action_values,
            inverse_reach,
            reach,
        }
    }

    /// A visit that only contributes to the average strategy.
    pub fn strategy_only(reach: f64) -> Self {
        RegretSample {
            reach,
            ..Default::default()
        }
    }
}

/// Non-atomic mirror of the per-iteration accumulators, used by backends that
/// aggregate locally before flushing into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRegret {
    pub regret: Vec<f64>,
    pub weighted_regret: Vec<f64>,
    pub inverse_reach: Vec<f64>,
    pub reach: f64,
    pub value_min: f64,
    pub value_max: f64,
    pub regret_observed: bool,
    pub touched: bool,
}

impl PendingRegret {
    pub fn new(actions_len: usize) -> Self {
        PendingRegret {
            regret: vec![0.0; actions_len],
            weighted_regret: vec![0.0; actions_len],
            inverse_reach: vec![0.0; actions_len],
            reach: 0.0,
            value_min: f64::INFINITY,
            value_max: f64::NEG_INFINITY,
            regret_observed: false,
            touched: false,
        }
    }

    pub fn record(&mut self, sample: &RegretSample) {
        for (i, regret) in sample.regrets.iter().enumerate() {
            self.regret[i] += regret;
            self.weighted_regret[i] += sample.inverse_reach * regret;
            self.inverse_reach[i] += sample.inverse_reach;
        }
        for value in &sample.action_values {
            self.value_min = self.value_min.min(*value);
            self.value_max = self.value_max.max(*value);
        }
        self.reach += sample.reach;
        self.regret_observed |= !sample.regrets.is_empty();
        self.touched = true;
    }

    pub fn reset(&mut self) {
        let actions_len = self.regret.len();
        *self = PendingRegret::new(actions_len);
    }
}

/// Regret and policy tables of one information set.
///
/// The accumulators are written through `&self` while trajectories are consumed; every
/// other field changes only through `&mut self`, i.e. inside the update phase.
#[derive(Debug)]
pub struct NodeStatistics {
    cumulative_regret: Vec<f64>,
    policy: Vec<f64>,
    cumulative_strategy: Vec<f64>,

    value_min: AtomicF64,
    value_max: AtomicF64,

    pending_regret: Vec<AtomicF64>,
    pending_weighted_regret: Vec<AtomicF64>,
    pending_inverse_reach: Vec<AtomicF64>,
    pending_reach: AtomicF64,
    regret_observed: AtomicBool,
    touched: AtomicBool,
}

impl NodeStatistics {
    pub fn new(actions_len: usize) -> Self {
        let zeros = || (0..actions_len).map(|_| AtomicF64::new(0.0)).collect::<Vec<_>>();
        NodeStatistics {
            cumulative_regret: vec![0.0; actions_len],
            policy: vec![1.0 / actions_len as f64; actions_len],
            cumulative_strategy: vec![0.0; actions_len],
            value_min: AtomicF64::new(f64::INFINITY),
            value_max: AtomicF64::new(f64::NEG_INFINITY),
            pending_regret: zeros(),
            pending_weighted_regret: zeros(),
            pending_inverse_reach: zeros(),
            pending_reach: AtomicF64::new(0.0),
            regret_observed: AtomicBool::new(false),
            touched: AtomicBool::new(false),
        }
    }

    pub fn actions_len(&self) -> usize {
        self.policy.len()
    }

    pub fn policy(&self) -> &[f64] {
        &self.policy
    }

    pub fn cumulative_regret(&self) -> &[f64] {
        &self.cumulative_regret
    }

    pub fn cumulative_strategy(&self) -> &[f64] {
        &self.cumulative_strategy
    }

    /// Observed range of action values, if any value has been recorded.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let (lo, hi) = (self.value_min.load(), self.value_max.load());
        if lo <= hi {
            Some((lo, hi))
        } else {
            None
        }
    }

    pub fn is_touched(&self) -> bool {
        self.touched.load(Ordering::Acquire)
    }

    /// Folds one visit into the per-iteration sums.
    pub fn accumulate(&self, sample: &RegretSample) {
        for (i, regret) in sample.regrets.iter().enumerate() {
            self.pending_regret[i].fetch_add(*regret);
            self.pending_weighted_regret[i].fetch_add(sample.inverse_reach * regret);
            self.pending_inverse_reach[i].fetch_add(sample.inverse_reach);
        }
        for value in &sample.action_values {
            self.value_min.fetch_min(*value);
            self.value_max.fetch_max(*value);
        }
        self.pending_reach.fetch_add(sample.reach);
        if !sample.regrets.is_empty() {
            self.regret_observed.store(true, Ordering::Release);
        }
        self.touched.store(true, Ordering::Release);
    }

    /// Folds locally aggregated sums into the per-iteration sums.
    pub fn merge(&self, pending: &PendingRegret) {
        if !pending.touched {
            return;
        }
        for i in 0..self.actions_len() {
            self.pending_regret[i].fetch_add(pending.regret[i]);
            self.pending_weighted_regret[i].fetch_add(pending.weighted_regret[i]);
            self.pending_inverse_reach[i].fetch_add(pending.inverse_reach[i]);
        }
        if pending.value_min <= pending.value_max {
            self.value_min.fetch_min(pending.value_min);
            self.value_max.fetch_max(pending.value_max);
        }
        self.pending_reach.fetch_add(pending.reach);
        if pending.regret_observed {
            self.regret_observed.store(true, Ordering::Release);
        }
        self.touched.store(true, Ordering::Release);
    }

    /// The regret to fold into the cumulative regret for this iteration.
    ///
    /// With inverse-reach weighting the sum of weighted regrets is divided by the summed
    /// weights; an action whose weight sum is zero gets half the observed value range.
    /// A node visited only for its average strategy has no regret to fold in.
    pub fn normalized_regret(&self, weight_by_inverse_reach: bool) -> Vec<f64> {
        if !self.regret_observed.load(Ordering::Acquire) {
            return vec![0.0; self.actions_len()];
        }
        if !weight_by_inverse_reach {
            return self.pending_regret.iter().map(|r| r.load()).collect();
        }
        let fallback = self.value_range().map(|(lo, hi)| 0.5 * (hi - lo)).unwrap_or(0.0);
        self.pending_weighted_regret
            .iter()
            .zip(self.pending_inverse_reach.iter())
            .map(|(numerator, denominator)| {
                let denominator = denominator.load();
                if denominator == 0.0 {
                    fallback
                } else {
                    numerator.load() / denominator
                }
            })
            .collect()
    }

    pub fn pending_reach(&self) -> f64 {
        self.pending_reach.load()
    }

    pub fn cumulative_regret_mut(&mut self) -> &mut [f64] {
        &mut self.cumulative_regret
    }

    pub fn cumulative_strategy_mut(&mut self) -> &mut [f64] {
        &mut self.cumulative_strategy
    }

    /// Adds `weight * reach * policy` to the average-strategy numerator, using the policy
    /// that was played during the iteration.
    pub fn accumulate_strategy(&mut self, weight: f64) {
        let reach = self.pending_reach.load();
        if reach == 0.0 {
            return;
        }
        for (sum, prob) in self.cumulative_strategy.iter_mut().zip(self.policy.iter()) {
            *sum += weight * reach * prob;
        }
    }

    /// Recomputes the policy from the cumulative regret.
    pub fn recompute_policy(&mut self, epsilon: f64) -> Result<(), SolverError> {
        regret_matching(&self.cumulative_regret, epsilon, &mut self.policy);
        ensure_finite("regret matching", &self.policy)
    }

    pub fn reset_pending(&mut self) {
        for i in 0..self.actions_len() {
            self.pending_regret[i].store(0.0);
            self.pending_weighted_regret[i].store(0.0);
            self.pending_inverse_reach[i].store(0.0);
        }
        self.pending_reach.store(0.0);
        self.regret_observed.store(false, Ordering::Release);
        self.touched.store(false, Ordering::Release);
    }

    pub fn to_average_strategy(&self) -> Vec<f64> {
        let normalizing_sum: f64 = self.cumulative_strategy.iter().sum();
        if normalizing_sum == 0.0 {
            let actions_len = self.actions_len();
            return vec![1.0 / actions_len as f64; actions_len];
        }
        self.cumulative_strategy.iter().map(|s| s / normalizing_sum).collect()
    }

    pub(crate) fn restore(
        cumulative_regret: Vec<f64>,
        policy: Vec<f64>,
        cumulative_strategy: Vec<f64>,
        value_range: Option<(f64, f64)>,
    ) -> Self {
        let mut stats = NodeStatistics::new(policy.len());
        stats.cumulative_regret = cumulative_regret;
        stats.policy = policy;
        stats.cumulative_strategy = cumulative_strategy;
        if let Some((lo, hi)) = value_range {
            stats.value_min.store(lo);
            stats.value_max.store(hi);
        }
        stats
    }
}

/// Regret matching with an optional exploration floor.
///
/// `π[a] = ε + (1 − |A|ε) · R⁺[a] / ΣR⁺`, uniform when no regret is positive. A
/// non-finite regret yields an all-NaN policy for the caller to reject.
pub fn regret_matching(regrets: &[f64], epsilon: f64, policy: &mut [f64]) {
    if regrets.iter().any(|r| !r.is_finite()) {
        policy.fill(f64::NAN);
        return;
    }
    let actions_len = regrets.len();
    let epsilon = epsilon.clamp(0.0, 1.0 / actions_len as f64);
    let normalizing_sum: f64 = regrets.iter().map(|r| r.max(0.0)).sum();
    if normalizing_sum > 0.0 {
        let scale = 1.0 - actions_len as f64 * epsilon;
        for (p, r) in policy.iter_mut().zip(regrets.iter()) {
            *p = epsilon + scale * (r.max(0.0) / normalizing_sum);
            debug_assert_ge!(*p, 0.0);
        }
    } else {
        policy.fill(1.0 / actions_len as f64);
    }
}

/// An information set owned by the store.
#[derive(Debug)]
pub struct InformationSetNode<K: InfoSetKey> {
    player: usize,
    info_set: K,
    actions: Vec<ActionId>,
    pub stats: NodeStatistics,
}

impl<K: InfoSetKey> InformationSetNode<K> {
    pub fn new(player: usize, info_set: K, actions: Vec<ActionId>) -> Self {
        let stats = NodeStatistics::new(actions.len());
        Self {
            player,
            info_set,
            actions,
            stats,
        }
    }

    pub(crate) fn from_parts(
        player: usize,
        info_set: K,
        actions: Vec<ActionId>,
        stats: NodeStatistics,
    ) -> Self {
        Self {
            player,
            info_set,
            actions,
            stats,
        }
    }

    pub fn player(&self) -> usize {
        self.player
    }

    pub fn info_set(&self) -> &K {
        &self.info_set
    }

    pub fn get_actions(&self) -> &[ActionId] {
        &self.actions
    }

    pub fn get_policy(&self) -> &[f64] {
        self.stats.policy()
    }
}

impl<K: InfoSetKey> std::cmp::Eq for InformationSetNode<K> {}

impl<K: InfoSetKey> std::cmp::PartialEq for InformationSetNode<K> {
    fn eq(&self, other: &Self) -> bool {
        self.player == other.player && self.info_set.eq(&other.info_set)
    }
}

impl<K: InfoSetKey> std::cmp::PartialOrd for InformationSetNode<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: InfoSetKey> std::cmp::Ord for InformationSetNode<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.player, &self.info_set).cmp(&(other.player, &other.info_set))
    }
}

impl<K: InfoSetKey> Display for InformationSetNode<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.info_set)?;

        let avg_strategy = self.stats.to_average_strategy();
        write!(f, " Avg Strategy[")?;
        for (i, act) in self.actions.iter().enumerate() {
            write!(f, "{}: {:.03}, ", act, avg_strategy[i])?;
        }
        write!(f, "]")?;

        write!(f, " Policy[")?;
        for (i, act) in self.actions.iter().enumerate() {
            write!(f, "{}: {:.03}, ", act, self.stats.policy()[i])?;
        }
        write!(f, "]")
    }
}
