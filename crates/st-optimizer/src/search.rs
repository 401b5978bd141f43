//! Search space definitions and proposer strategies.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use st_types::{validation_error, ParameterSet, TuneResult};

/// One named dimension with a continuous range `[low, high]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as injected into the simulation (e.g. "enemy_w").
    pub name: String,
    pub low: f64,
    pub high: f64,
}

impl ParameterDef {
    pub fn bounds(&self) -> (f64, f64) {
        (self.low, self.high)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        rng.gen_range(self.low..=self.high)
    }

    /// `steps` evenly spaced values from `low` to `high` inclusive.
    fn steps(&self, steps: usize) -> Vec<f64> {
        let steps = steps.max(2);
        (0..steps)
            .map(|i| {
                let t = i as f64 / (steps - 1) as f64;
                self.low + t * (self.high - self.low)
            })
            .collect()
    }
}

/// Ordered parameter dimensions. Suggestions always lie inside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    /// The AI controller parameters tuned for the game.
    pub fn standard() -> Self {
        Self::new()
            .add_float("occlusion_penalty", 0.0, 20.0)
            .add_float("enemy_w", 20.0, 80.0)
            .add_float("enemy_h", 15.0, 50.0)
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            low,
            high,
        });
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    /// Reject empty, inverted or non-finite ranges and duplicate names.
    pub fn validate(&self) -> TuneResult<()> {
        if self.parameters.is_empty() {
            return Err(validation_error!("search space has no parameters"));
        }
        for (i, param) in self.parameters.iter().enumerate() {
            let (low, high) = param.bounds();
            if !low.is_finite() || !high.is_finite() || low > high {
                return Err(validation_error!(
                    "invalid range [{low}, {high}] for '{}'",
                    param.name
                ));
            }
            if self.parameters[..i].iter().any(|p| p.name == param.name) {
                return Err(validation_error!("duplicate parameter '{}'", param.name));
            }
        }
        Ok(())
    }

    /// Whether `params` names exactly this space's parameters, each within
    /// its declared bounds.
    pub fn contains(&self, params: &ParameterSet) -> bool {
        params.len() == self.parameters.len()
            && self
                .parameters
                .iter()
                .all(|p| params.get(&p.name).map_or(false, |v| p.contains(v)))
    }

    /// Total number of grid points with `steps` values per axis.
    pub fn grid_size(&self, steps: usize) -> Option<usize> {
        self.parameters
            .iter()
            .try_fold(1usize, |total, _| total.checked_mul(steps.max(2)))
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// The proposer contract: suggest candidates, learn from reported scores.
///
/// The orchestrator only talks to this trait, so any strategy (grid,
/// random, model-based) can be swapped in. Suggestions must respect the
/// declared bounds of the search space.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of parameter sets to evaluate. May return
    /// fewer than `count` (or none) when the strategy is exhausted.
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet>;

    /// Report a completed trial so adaptive strategies can learn.
    fn report(&mut self, _params: &ParameterSet, _objective: f64) {}

    /// Strategy name as stored in the study.
    fn name(&self) -> &str;
}

/// Build a strategy by name: "grid", "random" or "bayesian".
pub fn build_strategy(
    name: &str,
    space: SearchSpace,
    exploration_weight: f64,
    grid_steps: usize,
    rng_seed: Option<u64>,
) -> TuneResult<Box<dyn SearchStrategy>> {
    space.validate()?;
    match name {
        "grid" => Ok(Box::new(GridSearch::new(space, grid_steps))),
        "random" => Ok(Box::new(RandomSearch::new(space, rng_seed))),
        "bayesian" => Ok(Box::new(BayesianSearch::new(
            space,
            exploration_weight,
            rng_seed,
        ))),
        other => Err(validation_error!(
            "unknown search strategy '{other}' (expected grid, random or bayesian)"
        )),
    }
}

// ---- Grid search ----

/// Exhaustive grid search over evenly spaced points.
///
/// Points already reported (e.g. replayed from a resumed study) are skipped.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<ParameterSet>,
    seen: Vec<ParameterSet>,
}

impl GridSearch {
    pub fn new(space: SearchSpace, float_steps: usize) -> Self {
        Self {
            cursor: 0,
            combos: Self::build_grid(&space, float_steps),
            seen: Vec::new(),
        }
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<ParameterSet> {
        let mut result: Vec<ParameterSet> = vec![ParameterSet::new()];
        for param in &space.parameters {
            let values = param.steps(float_steps);

            // Cartesian product
            let mut next = Vec::with_capacity(result.len() * values.len());
            for existing in &result {
                for value in &values {
                    let mut combo = existing.clone();
                    combo.insert(param.name.clone(), *value);
                    next.push(combo);
                }
            }
            result = next;
        }
        result
    }

    pub fn remaining(&self) -> usize {
        self.combos[self.cursor..]
            .iter()
            .filter(|c| !self.seen.contains(c))
            .count()
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        let mut batch = Vec::with_capacity(count);
        while batch.len() < count && self.cursor < self.combos.len() {
            let combo = &self.combos[self.cursor];
            self.cursor += 1;
            if !self.seen.contains(combo) {
                batch.push(combo.clone());
            }
        }
        batch
    }

    fn report(&mut self, params: &ParameterSet, _objective: f64) {
        self.seen.push(params.clone());
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Uniform sampling inside the bounds, optionally reproducible.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: SearchSpace, rng_seed: Option<u64>) -> Self {
        Self {
            space,
            rng: rng_from(rng_seed),
        }
    }

    fn sample_one(space: &SearchSpace, rng: &mut StdRng) -> ParameterSet {
        space
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.sample(rng)))
            .collect()
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count)
            .map(|_| Self::sample_one(&self.space, &mut self.rng))
            .collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Explore/exploit search ----

/// Explore/exploit search biased toward the lowest score so far.
///
/// With probability `exploration_weight` a uniform sample is drawn;
/// otherwise the best-known point is perturbed by up to 10% of each range.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: SearchSpace,
    observations: Vec<(ParameterSet, f64)>,
    exploration_weight: f64,
    rng: StdRng,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, exploration_weight: f64, rng_seed: Option<u64>) -> Self {
        Self {
            space,
            observations: Vec::new(),
            exploration_weight,
            rng: rng_from(rng_seed),
        }
    }

    fn best(&self) -> Option<&ParameterSet> {
        self.observations
            .iter()
            .filter(|(_, objective)| objective.is_finite())
            .reduce(|best, candidate| {
                if candidate.1 < best.1 {
                    candidate
                } else {
                    best
                }
            })
            .map(|(params, _)| params)
    }

    /// Exploitation: perturb the best-known point.
    fn exploit(&mut self) -> ParameterSet {
        let Some(base) = self.best().cloned() else {
            return RandomSearch::sample_one(&self.space, &mut self.rng);
        };

        let mut perturbed = ParameterSet::new();
        for param in &self.space.parameters {
            let value = match base.get(&param.name) {
                Some(v) => {
                    let noise = self.rng.gen_range(-0.1..0.1) * (param.high - param.low);
                    (v + noise).clamp(param.low, param.high)
                }
                // Missing base value: sample this dimension fresh.
                None => param.sample(&mut self.rng),
            };
            perturbed.insert(param.name.clone(), value);
        }
        perturbed
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParameterSet> {
        (0..count)
            .map(|_| {
                if self.observations.is_empty() || self.rng.gen::<f64>() < self.exploration_weight {
                    RandomSearch::sample_one(&self.space, &mut self.rng)
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &ParameterSet, objective: f64) {
        self.observations.push((params.clone(), objective));
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_search_produces_correct_count() {
        let space = SearchSpace::new()
            .add_float("a", 1.0, 3.0)
            .add_float("b", 10.0, 11.0);
        assert_eq!(space.grid_size(3), Some(9));

        let mut gs = GridSearch::new(space, 3);
        let batch = gs.suggest(100);
        assert_eq!(batch.len(), 9);
        assert_eq!(batch[0], ParameterSet::new().with("a", 1.0).with("b", 10.0));
        assert_eq!(batch[1], ParameterSet::new().with("a", 1.0).with("b", 10.5));
        assert!(gs.suggest(1).is_empty());
    }

    #[test]
    fn grid_search_skips_reported_points() {
        let space = SearchSpace::new().add_float("x", 1.0, 5.0);
        let mut gs = GridSearch::new(space, 5);
        gs.report(&ParameterSet::new().with("x", 1.0), 3.0);
        gs.report(&ParameterSet::new().with("x", 2.0), 2.0);
        assert_eq!(gs.remaining(), 3);

        let batch = gs.suggest(10);
        let xs: Vec<f64> = batch.iter().map(|p| p.get("x").unwrap()).collect();
        assert_eq!(xs, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = SearchSpace::standard();
        let mut rs = RandomSearch::new(space.clone(), Some(1));
        let suggestions = rs.suggest(200);
        assert_eq!(suggestions.len(), 200);
        for params in &suggestions {
            assert!(space.contains(params), "out of bounds: {params}");
        }
    }

    #[test]
    fn seeded_random_search_is_reproducible() {
        let mut a = RandomSearch::new(SearchSpace::standard(), Some(42));
        let mut b = RandomSearch::new(SearchSpace::standard(), Some(42));
        assert_eq!(a.suggest(5), b.suggest(5));
    }

    #[test]
    fn bayesian_search_exploits_best_minimum() {
        let space = SearchSpace::new().add_float("x", 0.0, 100.0);
        let mut bs = BayesianSearch::new(space, 0.0, Some(7));

        bs.report(&ParameterSet::new().with("x", 10.0), 1.0);
        bs.report(&ParameterSet::new().with("x", 90.0), 50.0);

        for params in bs.suggest(50) {
            let x = params.get("x").unwrap();
            assert!((0.0..=20.0).contains(&x), "expected a perturbation of x=10, got {x}");
        }
    }

    #[test]
    fn bayesian_search_ignores_non_finite_scores() {
        let space = SearchSpace::new().add_float("x", 0.0, 100.0);
        let mut bs = BayesianSearch::new(space, 0.0, Some(3));
        bs.report(&ParameterSet::new().with("x", 90.0), f64::NEG_INFINITY);
        bs.report(&ParameterSet::new().with("x", 50.0), 5.0);
        for params in bs.suggest(20) {
            let x = params.get("x").unwrap();
            assert!((40.0..=60.0).contains(&x), "got {x}");
        }
    }

    #[test]
    fn penalized_points_are_not_exploited() {
        let space = SearchSpace::new().add_float("x", 0.0, 100.0);
        let mut bs = BayesianSearch::new(space, 0.0, Some(11));
        bs.report(&ParameterSet::new().with("x", 90.0), 1.0e6);
        bs.report(&ParameterSet::new().with("x", 20.0), 30.0);
        for params in bs.suggest(20) {
            let x = params.get("x").unwrap();
            assert!((10.0..=30.0).contains(&x), "got {x}");
        }
    }

    #[test]
    fn validate_rejects_bad_spaces() {
        assert!(SearchSpace::new().validate().is_err());
        assert!(SearchSpace::new().add_float("x", 2.0, 1.0).validate().is_err());
        assert!(SearchSpace::new().add_float("x", 0.0, f64::INFINITY).validate().is_err());
        assert!(SearchSpace::new()
            .add_float("x", 0.0, 1.0)
            .add_float("x", 0.0, 2.0)
            .validate()
            .is_err());
        assert!(SearchSpace::standard().validate().is_ok());
    }

    #[test]
    fn build_strategy_by_name() {
        for name in ["grid", "random", "bayesian"] {
            let strategy = build_strategy(name, SearchSpace::standard(), 0.3, 3, None).unwrap();
            assert_eq!(strategy.name(), name);
        }
        assert!(build_strategy("tpe", SearchSpace::standard(), 0.3, 3, None).is_err());
    }
}
