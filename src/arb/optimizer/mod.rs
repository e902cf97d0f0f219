//! # Cycle Optimizer
//!
//! Picks what to trade from an [`ArbitrageGraph`]: either the best single path
//! between two configured assets, or the most profitable set of edges that
//! conserves flow at every asset (and therefore decomposes into closed
//! cycles). The cycle strategy is solved by a pluggable [`CycleSolver`]; every
//! solver's output passes the same feasibility gate before it is trusted.

/// Heuristic backend: seeded simulated annealing
pub mod annealing;
/// Exact backend: branch and bound
pub mod branch_bound;
/// The binary flow-conservation program
pub mod flow;
/// Single-path strategy
pub mod path;

use std::time::{Duration, Instant};

use log::{info, warn};
use serde::Serialize;

use super::error::ArbError;
use super::graph::{ArbitrageGraph, Edge};
use super::types::Asset;
use crate::config::{EngineConfig, OptimizerBackend, Strategy};
use annealing::Annealing;
use branch_bound::BranchAndBound;
use flow::FlowProblem;

/// Absolute tolerance when comparing objective values
pub const WEIGHT_EPSILON: f64 = 1e-12;

/// Why a pass found nothing to trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoOpportunity {
    /// The graph has no edges at all
    EmptyGraph,
    /// No path connects the configured start and end assets
    NoPath,
    /// No non-empty flow-conserving edge subset exists
    NoFeasibleCycle,
}

/// A path from the start asset to the end asset
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSelection {
    /// Visited assets, start first and end last
    pub assets: Vec<Asset>,
    /// The edges walked, in order
    pub edges: Vec<Edge>,
    /// Sum of edge weights
    pub total_weight: f64,
}

/// A flow-conserving subset of edges, unordered
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSelection {
    /// Selected edges, in graph order
    pub edges: Vec<Edge>,
    /// Sum of edge weights
    pub total_weight: f64,
    /// Name of the backend that produced the selection
    pub backend: &'static str,
}

/// Result of one optimization pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Selection {
    /// Best single path
    Path(PathSelection),
    /// Best set of closed cycles
    Cycles(CycleSelection),
    /// Nothing worth trading
    NoOpportunity {
        /// Why nothing was found
        reason: NoOpportunity,
    },
}

impl Selection {
    /// Total weight, 0 when there is no opportunity
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        match self {
            Self::Path(path) => path.total_weight,
            Self::Cycles(cycles) => cycles.total_weight,
            Self::NoOpportunity { .. } => 0.0,
        }
    }

    /// Selected edges, empty when there is no opportunity
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        match self {
            Self::Path(path) => &path.edges,
            Self::Cycles(cycles) => &cycles.edges,
            Self::NoOpportunity { .. } => &[],
        }
    }

    /// Whether there is something to trade
    #[must_use]
    pub const fn is_opportunity(&self) -> bool {
        !matches!(self, Self::NoOpportunity { .. })
    }

    /// Shorthand for a [`Selection::NoOpportunity`]
    #[must_use]
    pub const fn none(reason: NoOpportunity) -> Self {
        Self::NoOpportunity { reason }
    }
}

/// Iteration and wall-clock limits of one solve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    /// Search nodes (or annealing steps) allowed
    pub max_iterations: u64,
    /// Wall time allowed
    pub timeout: Duration,
}

impl Budget {
    /// Starts metering a solve against this budget
    #[must_use]
    pub fn start(&self, backend: &'static str) -> Meter {
        Meter {
            backend,
            budget: *self,
            iterations: 0,
            started: Instant::now(),
        }
    }
}

/// Counts iterations of a running solve
#[derive(Debug)]
pub struct Meter {
    /// Backend being metered, for error reporting
    backend: &'static str,
    /// Limits
    budget: Budget,
    /// Iterations so far
    iterations: u64,
    /// When the solve started
    started: Instant,
}

impl Meter {
    /// Records one iteration
    ///
    /// # Errors
    /// * If the iteration or time budget is exhausted
    pub fn tick(&mut self) -> Result<(), ArbError> {
        self.iterations += 1;
        // Checking the clock on every step would dominate small solves
        let out_of_time = self.iterations % 1024 == 0 && self.started.elapsed() > self.budget.timeout;
        if self.iterations > self.budget.max_iterations || out_of_time {
            return Err(ArbError::OptimizationTimeout {
                backend: self.backend,
                iterations: self.iterations,
                elapsed: self.started.elapsed(),
            });
        }
        Ok(())
    }

    /// Iterations so far
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iterations
    }
}

/// A backend for the flow-conservation program.
///
/// Implementations return one boolean per edge of the problem. They should
/// return a flow-conserving assignment; the optimizer rejects any that is not.
pub trait CycleSolver: Send + Sync {
    /// Short backend name for logs and audit records
    fn name(&self) -> &'static str;

    /// Solves the program within `budget`
    ///
    /// # Errors
    /// * [`ArbError::OptimizationTimeout`] if the budget runs out before a
    ///   solution can be returned
    fn solve(&self, problem: &FlowProblem<'_>, budget: Budget) -> Result<Vec<bool>, ArbError>;
}

/// Strategy dispatch, backend selection and the feasibility gate
pub struct Optimizer {
    /// Cycle or path
    strategy: Strategy,
    /// Path endpoints, set for the path strategy
    endpoints: Option<(Asset, Asset)>,
    /// Primary cycle backend
    solver: Box<dyn CycleSolver>,
    /// Backend tried when the primary one runs out of budget
    fallback: Option<Box<dyn CycleSolver>>,
    /// Limits of every solve
    budget: Budget,
}

impl Optimizer {
    /// Creates an optimizer from explicit parts
    #[must_use]
    pub fn new(
        strategy: Strategy,
        endpoints: Option<(Asset, Asset)>,
        solver: Box<dyn CycleSolver>,
        fallback: Option<Box<dyn CycleSolver>>,
        budget: Budget,
    ) -> Self {
        Self {
            strategy,
            endpoints,
            solver,
            fallback,
            budget,
        }
    }

    /// Creates the optimizer described by a configuration
    ///
    /// # Errors
    /// * If the path strategy is selected without both endpoints
    pub fn from_config(config: &EngineConfig) -> Result<Self, ArbError> {
        let endpoints = match (config.strategy, &config.path_start, &config.path_end) {
            (Strategy::Path, Some(start), Some(end)) => Some((start.clone(), end.clone())),
            (Strategy::Path, _, _) => {
                return Err(ArbError::InvalidConfig(
                    "path strategy requires pathStart and pathEnd".to_string(),
                ))
            }
            (Strategy::Cycle, _, _) => None,
        };
        let annealing = || Box::new(Annealing::new(config.annealing.clone())) as Box<dyn CycleSolver>;
        let (solver, fallback) = match config.optimizer_backend {
            OptimizerBackend::Exact => (
                Box::new(BranchAndBound) as Box<dyn CycleSolver>,
                config.fallback_to_heuristic.then(annealing),
            ),
            OptimizerBackend::Heuristic => (annealing(), None),
        };
        let budget = Budget {
            max_iterations: config.max_iterations,
            timeout: config.optimizer_timeout(),
        };
        Ok(Self::new(config.strategy, endpoints, solver, fallback, budget))
    }

    /// Runs the configured strategy on a graph
    ///
    /// # Errors
    /// * [`ArbError::OptimizationTimeout`] if the budget runs out and no
    ///   fallback backend is configured
    /// * [`ArbError::InfeasibleSolution`] if a backend returns an assignment
    ///   that does not conserve flow
    pub fn optimize(&self, graph: &ArbitrageGraph) -> Result<Selection, ArbError> {
        if graph.is_empty() {
            info!("optimizer: graph is empty, nothing to select");
            return Ok(Selection::none(NoOpportunity::EmptyGraph));
        }

        match (self.strategy, &self.endpoints) {
            (Strategy::Path, Some((start, end))) => {
                let mut meter = self.budget.start("path");
                let selection = path::best_path(graph, start, end, &mut meter)?;
                info!(
                    "optimizer: path search {start} -> {end} took {} iterations, weight {:.6}",
                    meter.iterations(),
                    selection.total_weight()
                );
                Ok(selection)
            }
            _ => self.optimize_cycles(graph),
        }
    }

    /// Solves the flow-conservation program and gates the result
    fn optimize_cycles(&self, graph: &ArbitrageGraph) -> Result<Selection, ArbError> {
        let problem = FlowProblem::new(graph);
        let started = Instant::now();

        let (assignment, backend) = match self.solver.solve(&problem, self.budget) {
            Ok(assignment) => (assignment, self.solver.name()),
            Err(err @ ArbError::OptimizationTimeout { .. }) => match &self.fallback {
                Some(fallback) => {
                    // The fallback shares the pass's time budget
                    let remaining = Budget {
                        timeout: self.budget.timeout.saturating_sub(started.elapsed()),
                        ..self.budget
                    };
                    warn!(
                        "optimizer: {err}, falling back to {} with {:?} left",
                        fallback.name(),
                        remaining.timeout
                    );
                    (fallback.solve(&problem, remaining)?, fallback.name())
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        };

        if !problem.is_feasible(&assignment) {
            return Err(ArbError::InfeasibleSolution { backend });
        }

        let edges = problem.selected_edges(&assignment);
        if edges.is_empty() {
            info!("optimizer: {backend} found no flow-conserving cycle");
            return Ok(Selection::none(NoOpportunity::NoFeasibleCycle));
        }

        let total_weight = problem.objective(&assignment);
        info!(
            "optimizer: {backend} selected {} of {} edges, weight {total_weight:.6}",
            edges.len(),
            problem.len()
        );
        Ok(Selection::Cycles(CycleSelection {
            edges,
            total_weight,
            backend,
        }))
    }
}
