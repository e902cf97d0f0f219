//! Heuristic backend: simulated annealing on the penalized (QUBO) form of the
//! flow program.
//!
//! Two moves are mixed: flipping one edge, which may unbalance assets and is
//! paid for through the penalty, and adding or removing a whole short cycle,
//! which never does. Only balanced states are ever recorded as the answer, so
//! the result always conserves flow even when the walk ends unbalanced.
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::flow::FlowProblem;
use super::{Budget, CycleSolver, WEIGHT_EPSILON};
use crate::arb::error::ArbError;

/// Tuning of the annealing schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnnealingConfig {
    /// Seed of the random stream; fixed seed means reproducible output
    pub seed: u64,
    /// Independent runs, each starting from the empty selection
    pub restarts: usize,
    /// Steps per run, as a multiple of the number of candidate edges
    pub sweeps: usize,
    /// Starting temperature, relative to the largest edge weight
    pub initial_temperature: f64,
    /// Final temperature as a fraction of the starting one
    pub final_temperature_ratio: f64,
    /// Penalty per squared imbalance, relative to the largest edge weight
    pub penalty_scale: f64,
    /// Probability of a whole-cycle move instead of a single flip
    pub cycle_move_probability: f64,
    /// Longest cycle, in edges, offered as a whole-cycle move
    pub max_cycle_len: usize,
    /// Most cycles enumerated for whole-cycle moves
    pub max_cycles: usize,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            restarts: 4,
            sweeps: 500,
            initial_temperature: 1.0,
            final_temperature_ratio: 1e-3,
            penalty_scale: 2.0,
            cycle_move_probability: 0.3,
            max_cycle_len: 4,
            max_cycles: 10_000,
        }
    }
}

impl AnnealingConfig {
    /// Checks the schedule parameters
    ///
    /// # Errors
    /// * If any parameter is out of range
    pub fn validate(&self) -> Result<(), ArbError> {
        let invalid = |reason: &str| Err(ArbError::InvalidConfig(format!("annealing: {reason}")));
        if self.restarts == 0 || self.sweeps == 0 {
            return invalid("restarts and sweeps must be positive");
        }
        if !(self.initial_temperature.is_finite() && self.initial_temperature > 0.0) {
            return invalid("initialTemperature must be positive");
        }
        if !(self.final_temperature_ratio > 0.0 && self.final_temperature_ratio <= 1.0) {
            return invalid("finalTemperatureRatio must be in (0, 1]");
        }
        if !(self.penalty_scale.is_finite() && self.penalty_scale > 0.0) {
            return invalid("penaltyScale must be positive");
        }
        if !(0.0..=1.0).contains(&self.cycle_move_probability) {
            return invalid("cycleMoveProbability must be in [0, 1]");
        }
        if self.max_cycle_len < 2 {
            return invalid("maxCycleLen must be at least 2");
        }
        Ok(())
    }
}

/// Simulated-annealing solver
#[derive(Debug, Clone, Default)]
pub struct Annealing {
    /// Schedule
    config: AnnealingConfig,
}

impl Annealing {
    /// Creates a solver with the given schedule
    #[must_use]
    pub const fn new(config: AnnealingConfig) -> Self {
        Self { config }
    }
}

impl CycleSolver for Annealing {
    fn name(&self) -> &'static str {
        "annealing"
    }

    /// The step count is fixed by the schedule, so only the wall-clock part
    /// of `budget` applies. Running out of time ends the search early with the
    /// best balanced selection seen so far.
    fn solve(&self, problem: &FlowProblem<'_>, budget: Budget) -> Result<Vec<bool>, ArbError> {
        let cyclic = problem.cyclic_edges();
        let movable: Vec<usize> = (0..problem.len()).filter(|i| cyclic[*i]).collect();
        let mut best = vec![false; problem.len()];
        if movable.is_empty() {
            return Ok(best);
        }

        let cycles = problem.short_cycles(self.config.max_cycle_len, self.config.max_cycles);
        let max_weight = movable
            .iter()
            .map(|i| problem.weight(*i))
            .fold(0.0_f64, f64::max);
        let penalty = self.config.penalty_scale * max_weight;
        let start_temperature = self.config.initial_temperature * max_weight;
        let steps = self.config.sweeps * movable.len();
        #[allow(clippy::cast_precision_loss)]
        let cooling = self.config.final_temperature_ratio.powf(1.0 / steps as f64);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut meter = Budget {
            max_iterations: u64::MAX,
            timeout: budget.timeout,
        }
        .start(self.name());
        let mut best_weight = 0.0;

        'restarts: for restart in 0..self.config.restarts {
            let mut state = State::new(problem);
            let mut temperature = start_temperature;

            for _ in 0..steps {
                if let Err(err) = meter.tick() {
                    warn!("annealing: {err}, stopping at restart {restart}");
                    break 'restarts;
                }

                let use_cycle = !cycles.is_empty() && rng.random_bool(self.config.cycle_move_probability);
                if use_cycle {
                    let cycle = &cycles[rng.random_range(0..cycles.len())];
                    if let Some(delta) = state.cycle_delta(problem, cycle) {
                        if accept(delta, temperature, &mut rng) {
                            state.toggle_cycle(problem, cycle);
                        }
                    }
                } else {
                    let edge = movable[rng.random_range(0..movable.len())];
                    let delta = state.flip_delta(problem, edge, penalty);
                    if accept(delta, temperature, &mut rng) {
                        state.flip(problem, edge);
                    }
                }

                if state.imbalanced == 0 && state.weight > best_weight + WEIGHT_EPSILON {
                    best.clone_from(&state.selected);
                    best_weight = problem.objective(&best);
                }
                temperature *= cooling;
            }
        }

        debug!(
            "annealing: {} steps, best weight {best_weight:.6}",
            meter.iterations()
        );
        Ok(best)
    }
}

/// Metropolis acceptance rule
fn accept(delta: f64, temperature: f64, rng: &mut StdRng) -> bool {
    delta <= 0.0 || rng.random::<f64>() < (-delta / temperature).exp()
}

/// Current point of an annealing run
struct State {
    /// Selected edges
    selected: Vec<bool>,
    /// In-degree minus out-degree per asset
    balance: Vec<i64>,
    /// Number of assets with a non-zero balance
    imbalanced: usize,
    /// Summed weight of selected edges
    weight: f64,
}

impl State {
    /// The empty selection
    fn new(problem: &FlowProblem<'_>) -> Self {
        Self {
            selected: vec![false; problem.len()],
            balance: vec![0; problem.asset_count()],
            imbalanced: 0,
            weight: 0.0,
        }
    }

    /// Energy change of flipping one edge
    #[allow(clippy::cast_precision_loss)]
    fn flip_delta(&self, problem: &FlowProblem<'_>, edge: usize, penalty: f64) -> f64 {
        let (bs, bt) = (
            self.balance[problem.source(edge)],
            self.balance[problem.target(edge)],
        );
        // Adding raises the target balance and lowers the source balance by one
        let (sign, weight_change) = if self.selected[edge] {
            (-1, problem.weight(edge))
        } else {
            (1, -problem.weight(edge))
        };
        let squared_change: i64 = (2 * sign * bt + 1) + (-2 * sign * bs + 1);
        weight_change + penalty * squared_change as f64
    }

    /// Flips one edge
    fn flip(&mut self, problem: &FlowProblem<'_>, edge: usize) {
        let (source, target) = (problem.source(edge), problem.target(edge));
        let sign: i64 = if self.selected[edge] { -1 } else { 1 };
        for (asset, change) in [(source, -sign), (target, sign)] {
            if self.balance[asset] != 0 {
                self.imbalanced -= 1;
            }
            self.balance[asset] += change;
            if self.balance[asset] != 0 {
                self.imbalanced += 1;
            }
        }
        if self.selected[edge] {
            self.weight -= problem.weight(edge);
        } else {
            self.weight += problem.weight(edge);
        }
        self.selected[edge] = !self.selected[edge];
    }

    /// Energy change of toggling a whole cycle, if the cycle is entirely
    /// selected (removal) or entirely unselected (addition)
    fn cycle_delta(&self, problem: &FlowProblem<'_>, cycle: &[usize]) -> Option<f64> {
        let weight: f64 = cycle.iter().map(|e| problem.weight(*e)).sum();
        if cycle.iter().all(|e| self.selected[*e]) {
            Some(weight)
        } else if cycle.iter().all(|e| !self.selected[*e]) {
            Some(-weight)
        } else {
            None
        }
    }

    /// Toggles a whole cycle; balances are unchanged
    fn toggle_cycle(&mut self, problem: &FlowProblem<'_>, cycle: &[usize]) {
        for &edge in cycle {
            let sign = if self.selected[edge] { -1.0 } else { 1.0 };
            self.selected[edge] = !self.selected[edge];
            self.weight += sign * problem.weight(edge);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::arb::graph::ArbitrageGraph;
    use crate::arb::optimizer::branch_bound::BranchAndBound;
    use crate::arb::test_helpers::*;

    #[test]
    fn test_finds_perfect_cycle() {
        let graph = triangle();
        let problem = FlowProblem::new(&graph);
        let x = Annealing::default().solve(&problem, budget()).unwrap();
        assert_eq!(x, vec![true, true, true]);
    }

    #[test]
    fn test_excludes_unbalancing_chord() {
        let graph = triangle_with_chord();
        let problem = FlowProblem::new(&graph);
        let x = Annealing::default().solve(&problem, budget()).unwrap();
        assert_eq!(x, vec![true, false, true, true]);
    }

    #[test]
    fn test_flip_only_walk_stays_feasible() {
        let config = AnnealingConfig {
            cycle_move_probability: 0.0,
            ..AnnealingConfig::default()
        };
        let graph = triangle_with_chord();
        let problem = FlowProblem::new(&graph);
        let x = Annealing::new(config).solve(&problem, budget()).unwrap();
        assert!(problem.is_feasible(&x));
    }

    #[test]
    fn test_flip_delta_matches_energy() {
        let graph = triangle_with_chord();
        let problem = FlowProblem::new(&graph);
        let penalty = 0.3;
        let qubo = problem.qubo(penalty);
        let mut state = State::new(&problem);
        let mut rng = StdRng::seed_from_u64(9);

        for _ in 0..50 {
            let edge = rng.random_range(0..problem.len());
            let before = qubo.energy(&state.selected);
            let delta = state.flip_delta(&problem, edge, penalty);
            state.flip(&problem, edge);
            assert!((qubo.energy(&state.selected) - before - delta).abs() < 1e-9);

            let unbalanced = problem.balances(&state.selected).iter().filter(|b| **b != 0).count();
            assert_eq!(state.imbalanced, unbalanced);
        }
    }

    #[test]
    fn test_same_seed_same_answer() {
        let graph = graph(&[
            ("A", "B", 0.02),
            ("B", "A", 0.02),
            ("B", "C", 0.01),
            ("C", "B", 0.01),
            ("C", "A", 0.03),
            ("A", "C", 0.03),
        ]);
        let problem = FlowProblem::new(&graph);
        let first = Annealing::default().solve(&problem, budget()).unwrap();
        assert_eq!(Annealing::default().solve(&problem, budget()).unwrap(), first);
    }

    #[test]
    fn test_always_feasible_and_close_to_exact() {
        let mut rng = StdRng::seed_from_u64(23);
        let symbols = ["A", "B", "C", "D", "E", "F"];
        for _ in 0..20 {
            let mut edges = Vec::new();
            for from in symbols {
                for to in symbols {
                    if from != to && rng.random_bool(0.3) {
                        edges.push(edge(from, to, rng.random_range(0.001..0.1)));
                    }
                }
            }
            let graph = ArbitrageGraph::from_edges(edges);
            let problem = FlowProblem::new(&graph);
            let heuristic = Annealing::default().solve(&problem, budget()).unwrap();
            let exact = BranchAndBound.solve(&problem, budget()).unwrap();

            assert!(problem.is_feasible(&heuristic));
            assert!(problem.objective(&heuristic) <= problem.objective(&exact) + 1e-9);
        }
    }

    #[test]
    fn test_validate() {
        assert!(AnnealingConfig::default().validate().is_ok());
        let config = AnnealingConfig {
            cycle_move_probability: 1.5,
            ..AnnealingConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err().to_string(),
            "Invalid configuration: annealing: cycleMoveProbability must be in [0, 1]"
        );
    }
}
