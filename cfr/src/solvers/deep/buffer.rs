use std::hash::Hasher;

use rand::{
    Rng,
    SeedableRng,
};
use serde::{
    Deserialize,
    Serialize,
};
use wyhash::{
    WyHash,
    WyRng,
};

/// One sampled regret of one action, the unit the regressor is fitted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub encoding: Vec<f64>,
    pub player: usize,
    pub decision_index: usize,
    pub action_index: usize,
    pub regret: f64,
    pub weight: f64,
}

/// Fixed-capacity reservoir over every observation ever pushed.
///
/// Once full, the `n`-th observation replaces a uniformly chosen slot with probability
/// `capacity / n`, so the buffer stays a uniform sample of the whole stream. The
/// replacement draw for the `n`-th push depends only on the seed and `n`, so a
/// deserialized buffer continues exactly where the original left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationBuffer {
    observations: Vec<Observation>,
    capacity: usize,
    seen: u64,
    seed: u64,
}

impl ObservationBuffer {
    pub fn new(capacity: usize, seed: u64) -> Self {
        ObservationBuffer {
            observations: Vec::new(),
            capacity,
            seen: 0,
            seed,
        }
    }

    fn replacement_rng(&self) -> WyRng {
        let mut hasher = WyHash::with_seed(self.seed);
        hasher.write_u64(self.seen);
        WyRng::seed_from_u64(hasher.finish())
    }

    pub fn push(&mut self, observation: Observation) {
        self.seen += 1;
        if self.observations.len() < self.capacity {
            self.observations.push(observation);
            return;
        }
        if self.capacity == 0 {
            return;
        }
        let slot = self.replacement_rng().gen_range(0..self.seen);
        if slot < self.capacity as u64 {
            self.observations[slot as usize] = observation;
        }
    }

    pub fn extend(&mut self, observations: impl IntoIterator<Item = Observation>) {
        for observation in observations {
            self.push(observation);
        }
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Observations pushed so far, kept or not.
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(regret: f64) -> Observation {
        Observation {
            encoding: vec![1.0],
            player: 0,
            decision_index: 0,
            action_index: 0,
            regret,
            weight: 1.0,
        }
    }

    #[test]
    fn test_fills_up_to_capacity() {
        let mut buffer = ObservationBuffer::new(4, 7);
        buffer.extend((0..3).map(|i| observation(i as f64)));
        assert_eq!(3, buffer.len());
        assert_eq!(
            vec![0.0, 1.0, 2.0],
            buffer.observations().iter().map(|o| o.regret).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_reservoir_is_bounded_and_reproducible() {
        let fill = || {
            let mut buffer = ObservationBuffer::new(16, 7);
            buffer.extend((0..1000).map(|i| observation(i as f64)));
            buffer
        };
        let a = fill();
        let b = fill();
        assert_eq!(16, a.len());
        assert_eq!(1000, a.seen());
        assert_eq!(a.observations(), b.observations());
        // something from the tail of the stream must have made it in
        assert!(a.observations().iter().any(|o| o.regret >= 16.0));
    }

    #[test]
    fn test_deserialized_buffer_continues_the_stream() {
        let mut straight = ObservationBuffer::new(8, 3);
        straight.extend((0..200).map(|i| observation(i as f64)));

        let mut first = ObservationBuffer::new(8, 3);
        first.extend((0..100).map(|i| observation(i as f64)));
        let json = serde_json::to_string(&first).unwrap();
        let mut resumed: ObservationBuffer = serde_json::from_str(&json).unwrap();
        assert_eq!(first, resumed);
        resumed.extend((100..200).map(|i| observation(i as f64)));
        assert_eq!(straight, resumed);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut buffer = ObservationBuffer::new(0, 7);
        buffer.push(observation(1.0));
        assert!(buffer.is_empty());
        assert_eq!(1, buffer.seen());
    }
}
