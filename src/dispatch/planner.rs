//! Per-worker assignment planning.
//!
//! Every worker runs the same multiset of task instances, but in its own
//! order, so no two workers behave identically step for step. Small
//! sequences draw from the full set of distinct orderings; larger ones draw
//! from a fixed-size sample of random shuffles instead of enumerating a
//! factorial number of permutations.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::{DispatchConfig, MAX_EXHAUSTIVE_LIMIT};
use crate::task::{Assignment, TaskDefinition, TaskInstance};

/// Expands task sequences and spreads orderings across workers.
#[derive(Debug, Clone, Copy)]
pub struct AssignmentPlanner {
    exhaustive_limit: usize,
    sample_pool_size: usize,
}

impl Default for AssignmentPlanner {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl AssignmentPlanner {
    /// Create a planner. `exhaustive_limit` is clamped to
    /// [`MAX_EXHAUSTIVE_LIMIT`] and the sample pool holds at least one ordering.
    pub fn new(exhaustive_limit: usize, sample_pool_size: usize) -> Self {
        Self {
            exhaustive_limit: exhaustive_limit.min(MAX_EXHAUSTIVE_LIMIT),
            sample_pool_size: sample_pool_size.max(1),
        }
    }

    /// Create a planner from the dispatch thresholds.
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.exhaustive_limit, config.sample_pool_size)
    }

    /// Flatten repetitions into one instance per occurrence, keeping source order.
    pub fn expand(sequence: &[TaskDefinition]) -> Vec<TaskInstance> {
        sequence
            .iter()
            .flat_map(|def| {
                std::iter::repeat_with(|| TaskInstance::new(def.name.clone()))
                    .take(def.repetition as usize)
            })
            .collect()
    }

    /// Plan `worker_count` assignments using a freshly seeded generator.
    pub fn plan(&self, sequence: &[TaskDefinition], worker_count: usize) -> Vec<Assignment> {
        let mut rng = rand::rngs::StdRng::from_entropy();
        self.plan_with_rng(sequence, worker_count, &mut rng)
    }

    /// Plan `worker_count` assignments drawing randomness from `rng`.
    pub fn plan_with_rng<R: Rng + ?Sized>(
        &self,
        sequence: &[TaskDefinition],
        worker_count: usize,
        rng: &mut R,
    ) -> Vec<Assignment> {
        let instances = Self::expand(sequence);
        let pool = self.ordering_pool(&instances, rng);
        pool.iter().cycle().take(worker_count).cloned().collect()
    }

    /// Orderings that assignments are drawn from, never empty.
    pub fn ordering_pool<R: Rng + ?Sized>(
        &self,
        instances: &[TaskInstance],
        rng: &mut R,
    ) -> Vec<Assignment> {
        if instances.len() <= 1 {
            return vec![instances.to_vec()];
        }

        if instances.len() > self.exhaustive_limit {
            return (0..self.sample_pool_size)
                .map(|_| {
                    let mut ordering = instances.to_vec();
                    ordering.shuffle(rng);
                    ordering
                })
                .collect();
        }

        let mut pool = distinct_permutations(instances);
        pool.shuffle(rng);
        pool
    }
}

/// All distinct orderings of a multiset, each exactly once.
fn distinct_permutations(instances: &[TaskInstance]) -> Vec<Assignment> {
    let mut current = instances.to_vec();
    current.sort();

    let mut all = vec![current.clone()];
    while next_permutation(&mut current) {
        all.push(current.clone());
    }
    all
}

/// Advance to the next lexicographic permutation in place. Returns `false`
/// once the slice is back at its last (descending) arrangement.
fn next_permutation<T: Ord>(items: &mut [T]) -> bool {
    if items.len() < 2 {
        return false;
    }

    let mut pivot = items.len() - 1;
    while pivot > 0 && items[pivot - 1] >= items[pivot] {
        pivot -= 1;
    }
    if pivot == 0 {
        return false;
    }

    let mut successor = items.len() - 1;
    while items[successor] <= items[pivot - 1] {
        successor -= 1;
    }
    items.swap(pivot - 1, successor);
    items[pivot..].reverse();
    true
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn counts(assignment: &Assignment) -> HashMap<&str, usize> {
        let mut map = HashMap::new();
        for inst in assignment {
            *map.entry(inst.name.as_str()).or_insert(0) += 1;
        }
        map
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn expand_keeps_source_order() {
        let seq = vec![TaskDefinition::new("a", 2), TaskDefinition::new("b", 1)];
        let names: Vec<String> = AssignmentPlanner::expand(&seq)
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["a", "a", "b"]);
    }

    #[test]
    fn empty_sequence_gives_empty_assignments() {
        let plans = AssignmentPlanner::default().plan_with_rng(&[], 3, &mut rng());
        assert_eq!(plans.len(), 3);
        assert!(plans.iter().all(|a| a.is_empty()));
    }

    #[test]
    fn single_instance_is_identical_everywhere() {
        let seq = vec![TaskDefinition::new("only", 1)];
        let plans = AssignmentPlanner::default().plan_with_rng(&seq, 4, &mut rng());
        assert_eq!(plans.len(), 4);
        for plan in &plans {
            assert_eq!(plan, &vec![TaskInstance::new("only")]);
        }
    }

    #[test]
    fn zero_workers_gives_no_assignments() {
        let seq = vec![TaskDefinition::new("a", 3)];
        assert!(
            AssignmentPlanner::default()
                .plan_with_rng(&seq, 0, &mut rng())
                .is_empty()
        );
    }

    #[test]
    fn small_pool_is_distinct_and_complete() {
        // {a, a, b, c}: 4! / 2! = 12 distinct orderings.
        let instances = AssignmentPlanner::expand(&[
            TaskDefinition::new("a", 2),
            TaskDefinition::new("b", 1),
            TaskDefinition::new("c", 1),
        ]);
        let pool = AssignmentPlanner::default().ordering_pool(&instances, &mut rng());
        assert_eq!(pool.len(), 12);
        let unique: HashSet<&Assignment> = pool.iter().collect();
        assert_eq!(unique.len(), pool.len());
        for ordering in &pool {
            assert_eq!(counts(ordering), counts(&instances));
        }
    }

    #[test]
    fn seven_instances_enumerate_exhaustively() {
        let instances = AssignmentPlanner::expand(&[TaskDefinition::new("x", 7)]);
        let pool = AssignmentPlanner::default().ordering_pool(&instances, &mut rng());
        assert_eq!(pool.len(), 1);

        let distinct: Vec<TaskInstance> = (0..7).map(|i| TaskInstance::new(format!("t{i}"))).collect();
        let pool = AssignmentPlanner::default().ordering_pool(&distinct, &mut rng());
        assert_eq!(pool.len(), 5040);
    }

    #[test]
    fn large_sequence_samples_fixed_pool() {
        let instances = AssignmentPlanner::expand(&[
            TaskDefinition::new("a", 5),
            TaskDefinition::new("b", 4),
        ]);
        let pool = AssignmentPlanner::default().ordering_pool(&instances, &mut rng());
        assert_eq!(pool.len(), 100);
        for ordering in &pool {
            assert_eq!(counts(ordering), counts(&instances));
        }
    }

    #[test]
    fn oversized_exhaustive_limit_falls_back_to_sampling() {
        let planner = AssignmentPlanner::new(12, 30);
        let distinct: Vec<TaskInstance> = (0..12).map(|i| TaskInstance::new(format!("t{i}"))).collect();
        let pool = planner.ordering_pool(&distinct, &mut rng());
        assert_eq!(pool.len(), 30);
    }

    #[test]
    fn assignments_cycle_through_pool() {
        let seq = vec![TaskDefinition::new("a", 1), TaskDefinition::new("b", 1)];
        let plans = AssignmentPlanner::default().plan_with_rng(&seq, 5, &mut rng());
        assert_eq!(plans.len(), 5);
        // Pool of two orderings, reused round-robin.
        assert_eq!(plans[0], plans[2]);
        assert_eq!(plans[1], plans[3]);
        assert_ne!(plans[0], plans[1]);
        for plan in &plans {
            assert_eq!(plan.len(), 2);
        }
    }

    #[test]
    fn next_permutation_walks_lexicographically() {
        let mut items = vec![1, 2, 3];
        let mut seen = vec![items.clone()];
        while next_permutation(&mut items) {
            seen.push(items.clone());
        }
        assert_eq!(
            seen,
            vec![
                vec![1, 2, 3],
                vec![1, 3, 2],
                vec![2, 1, 3],
                vec![2, 3, 1],
                vec![3, 1, 2],
                vec![3, 2, 1],
            ]
        );
    }
}
