//! Exact backend: depth-first branch and bound over the edge variables.
//!
//! Edges are decided heaviest first, "take" before "skip". A branch is cut
//! when its weight plus every undecided edge cannot beat the incumbent, or
//! when some asset can no longer be balanced by the undecided edges left.
use log::debug;

use super::flow::FlowProblem;
use super::{Budget, CycleSolver, Meter, WEIGHT_EPSILON};
use crate::arb::error::ArbError;

/// Branch-and-bound solver, optimal whenever it finishes within budget
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchAndBound;

impl CycleSolver for BranchAndBound {
    fn name(&self) -> &'static str {
        "branch-and-bound"
    }

    fn solve(&self, problem: &FlowProblem<'_>, budget: Budget) -> Result<Vec<bool>, ArbError> {
        let mut search = Search::new(problem, budget.start(self.name()));
        search.branch(0)?;
        debug!(
            "branch-and-bound: {} nodes, best weight {:.6}",
            search.meter.iterations(),
            search.best_weight
        );
        Ok(search.best)
    }
}

/// Mutable state of one branch-and-bound run
struct Search<'p, 'g> {
    /// The program being solved
    problem: &'p FlowProblem<'g>,
    /// Edge indices in decision order; edges on no cycle are left out
    order: Vec<usize>,
    /// `suffix[k]` is the summed weight of `order[k..]`
    suffix: Vec<f64>,
    /// Current partial assignment
    current: Vec<bool>,
    /// Weight of the current partial assignment
    current_weight: f64,
    /// In-degree minus out-degree per asset under `current`
    balance: Vec<i64>,
    /// Undecided edges entering each asset
    open_in: Vec<i64>,
    /// Undecided edges leaving each asset
    open_out: Vec<i64>,
    /// Best complete assignment so far
    best: Vec<bool>,
    /// Weight of `best`
    best_weight: f64,
    /// Budget meter
    meter: Meter,
}

impl<'p, 'g> Search<'p, 'g> {
    /// Sets up the search with the empty selection as incumbent
    fn new(problem: &'p FlowProblem<'g>, meter: Meter) -> Self {
        let cyclic = problem.cyclic_edges();
        let mut order: Vec<usize> = (0..problem.len()).filter(|i| cyclic[*i]).collect();
        // Heaviest first; ties keep graph order so runs are reproducible
        order.sort_by(|a, b| problem.weight(*b).total_cmp(&problem.weight(*a)).then(a.cmp(b)));

        let mut suffix = vec![0.0; order.len() + 1];
        for k in (0..order.len()).rev() {
            suffix[k] = suffix[k + 1] + problem.weight(order[k]);
        }

        let assets = problem.asset_count();
        let mut open_in = vec![0; assets];
        let mut open_out = vec![0; assets];
        for &i in &order {
            open_in[problem.target(i)] += 1;
            open_out[problem.source(i)] += 1;
        }

        Self {
            problem,
            order,
            suffix,
            current: vec![false; problem.len()],
            current_weight: 0.0,
            balance: vec![0; assets],
            open_in,
            open_out,
            best: vec![false; problem.len()],
            best_weight: 0.0,
            meter,
        }
    }

    /// Whether an asset can still reach balance with its undecided edges
    fn balanceable(&self, asset: usize) -> bool {
        let balance = self.balance[asset];
        -self.open_in[asset] <= balance && balance <= self.open_out[asset]
    }

    /// Decides `order[depth..]`
    fn branch(&mut self, depth: usize) -> Result<(), ArbError> {
        self.meter.tick()?;

        if self.current_weight + self.suffix[depth] <= self.best_weight + WEIGHT_EPSILON {
            return Ok(());
        }
        if depth == self.order.len() {
            // Every asset was balanceable with nothing left open, so balanced
            self.best.clone_from(&self.current);
            self.best_weight = self.current_weight;
            return Ok(());
        }

        let edge = self.order[depth];
        let (source, target) = (self.problem.source(edge), self.problem.target(edge));
        self.open_out[source] -= 1;
        self.open_in[target] -= 1;

        // Take the edge
        self.current[edge] = true;
        self.current_weight += self.problem.weight(edge);
        self.balance[source] -= 1;
        self.balance[target] += 1;
        let taken = if self.balanceable(source) && self.balanceable(target) {
            self.branch(depth + 1)
        } else {
            Ok(())
        };
        self.current[edge] = false;
        self.current_weight -= self.problem.weight(edge);
        self.balance[source] += 1;
        self.balance[target] -= 1;

        // Skip the edge
        let skipped = match taken {
            Ok(()) if self.balanceable(source) && self.balanceable(target) => self.branch(depth + 1),
            other => other,
        };

        self.open_out[source] += 1;
        self.open_in[target] += 1;
        skipped
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::arb::graph::ArbitrageGraph;
    use crate::arb::test_helpers::*;

    /// Best feasible objective by enumerating every subset
    fn brute_force(problem: &FlowProblem<'_>) -> f64 {
        let mut best = 0.0_f64;
        for mask in 0_u32..(1 << problem.len()) {
            let x: Vec<bool> = (0..problem.len()).map(|i| mask & (1 << i) != 0).collect();
            if problem.is_feasible(&x) {
                best = best.max(problem.objective(&x));
            }
        }
        best
    }

    #[test]
    fn test_selects_perfect_cycle() {
        let graph = triangle();
        let problem = FlowProblem::new(&graph);
        let x = BranchAndBound.solve(&problem, budget()).unwrap();
        assert_eq!(x, vec![true, true, true]);
        assert!((problem.objective(&x) - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_excludes_unbalancing_chord() {
        let graph = triangle_with_chord();
        let problem = FlowProblem::new(&graph);
        let x = BranchAndBound.solve(&problem, budget()).unwrap();
        // Pair order: A->B, A->C, B->C, C->A
        assert_eq!(x, vec![true, false, true, true]);
        assert!(problem.is_feasible(&x));
    }

    #[test]
    fn test_acyclic_graph_selects_nothing() {
        let graph = graph(&[("A", "B", 0.5), ("B", "C", 0.5), ("A", "C", 0.5)]);
        let problem = FlowProblem::new(&graph);
        let x = BranchAndBound.solve(&problem, budget()).unwrap();
        assert!(x.iter().all(|selected| !selected));
    }

    #[test]
    fn test_budget_exhaustion() {
        let graph = triangle_with_chord();
        let problem = FlowProblem::new(&graph);
        let tiny = Budget {
            max_iterations: 1,
            ..budget()
        };
        let err = BranchAndBound.solve(&problem, tiny).unwrap_err();
        assert!(matches!(err, ArbError::OptimizationTimeout { backend: "branch-and-bound", .. }));
    }

    #[test]
    fn test_matches_brute_force_on_random_graphs() {
        let mut rng = StdRng::seed_from_u64(17);
        let symbols = ["A", "B", "C", "D", "E"];
        for _ in 0..60 {
            let mut edges = Vec::new();
            for from in symbols {
                for to in symbols {
                    if from != to && rng.random_bool(0.35) {
                        edges.push(edge(from, to, rng.random_range(0.001..0.1)));
                    }
                }
            }
            let graph = ArbitrageGraph::from_edges(edges);
            let problem = FlowProblem::new(&graph);
            let x = BranchAndBound.solve(&problem, budget()).unwrap();

            assert!(problem.is_feasible(&x));
            assert!((problem.objective(&x) - brute_force(&problem)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_deterministic() {
        let graph = graph(&[
            ("A", "B", 0.02),
            ("B", "A", 0.02),
            ("B", "C", 0.01),
            ("C", "B", 0.01),
            ("C", "A", 0.03),
            ("A", "C", 0.03),
        ]);
        let problem = FlowProblem::new(&graph);
        let first = BranchAndBound.solve(&problem, budget()).unwrap();
        for _ in 0..5 {
            assert_eq!(BranchAndBound.solve(&problem, budget()).unwrap(), first);
        }
    }
}
