//! One optimization pass: snapshot in, graph, selection and dispatch plan out.
//!
//! A pass owns every value it creates. Nothing is shared between passes, so
//! independent engines can run side by side on different threads.
use chrono::{DateTime, Utc};
use log::info;
use serde::Serialize;

use super::dispatch::{DispatchPlan, Dispatcher};
use super::error::ArbError;
use super::graph::{ArbitrageGraph, BuildReport, GraphBuilder};
use super::optimizer::{Optimizer, Selection};
use super::types::MarketSnapshot;
use crate::config::EngineConfig;

/// Everything one pass produced, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassOutcome {
    /// Timestamp of the snapshot the pass ran on
    pub observed_at: DateTime<Utc>,
    /// Trade size the pass was normalized against
    pub trade_size: f64,
    /// Where every candidate pair ended up
    pub report: BuildReport,
    /// The graph the optimizer saw
    pub graph: ArbitrageGraph,
    /// What the optimizer selected
    pub selection: Selection,
    /// What the dispatcher decided
    pub plan: DispatchPlan,
}

/// Graph builder, optimizer and dispatcher for a fixed configuration
pub struct Engine {
    /// Trade size every pass is normalized against
    trade_size: f64,
    /// Snapshot to graph
    builder: GraphBuilder,
    /// Graph to selection
    optimizer: Optimizer,
    /// Selection to plan
    dispatcher: Dispatcher,
}

impl Engine {
    /// Validates the configuration and assembles the pipeline
    ///
    /// # Errors
    /// * If the configuration is invalid
    pub fn new(config: &EngineConfig) -> Result<Self, ArbError> {
        config.validate()?;
        Ok(Self {
            trade_size: config.trade_size,
            builder: GraphBuilder::new(config.trade_pairs.clone(), config.trade_size)?,
            optimizer: Optimizer::from_config(config)?,
            dispatcher: Dispatcher::new(config.min_profit_threshold, config.trade_size),
        })
    }

    /// Runs one pass over a snapshot. Nothing is emitted; hand the plan to
    /// [`Dispatcher::emit`] to execute it.
    ///
    /// # Errors
    /// * If the snapshot holds malformed data
    /// * If the optimizer runs out of budget without a fallback, or a backend
    ///   returns an infeasible selection
    pub fn run_pass(&self, snapshot: &MarketSnapshot) -> Result<PassOutcome, ArbError> {
        let (graph, report) = self.builder.build(snapshot)?;
        let (selection, plan) = self.evaluate(&graph)?;
        info!(
            "engine: pass at {} (size {}) -> {:?}, {} instructions",
            snapshot.observed_at,
            self.trade_size,
            plan.decision,
            plan.instructions().count()
        );
        Ok(PassOutcome {
            observed_at: snapshot.observed_at,
            trade_size: self.trade_size,
            report,
            graph,
            selection,
            plan,
        })
    }

    /// Optimizes and plans an already built graph
    ///
    /// # Errors
    /// * See [`Engine::run_pass`]
    pub fn evaluate(&self, graph: &ArbitrageGraph) -> Result<(Selection, DispatchPlan), ArbError> {
        let selection = self.optimizer.optimize(graph)?;
        let plan = self.dispatcher.plan(&selection)?;
        Ok((selection, plan))
    }

    /// The dispatcher, for emitting accepted plans
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::arb::dispatch::PlanDecision;
    use crate::arb::optimizer::NoOpportunity;
    use crate::arb::test_helpers::*;
    use crate::config::{OptimizerBackend, Strategy};

    fn path_config(start: &str, end: &str) -> EngineConfig {
        EngineConfig {
            strategy: Strategy::Path,
            path_start: Some(start.into()),
            path_end: Some(end.into()),
            ..EngineConfig::default()
        }
    }

    /// Rising prices A < B < C with deep pools along A->B->C only
    fn rising_chain() -> MarketSnapshot {
        snapshot(
            &[("A", 1.0), ("B", 1.05), ("C", 1.1)],
            &[("A", "B", 1e12, 1e12), ("B", "C", 1e12, 1e12)],
        )
    }

    #[test]
    fn test_mispriced_majors_have_no_opportunity() {
        let snapshot = snapshot(
            &[("ETH", 2000.0), ("USDT", 1.0), ("FLR", 0.02)],
            &[("ETH", "USDT", 1e12, 1e12), ("USDT", "FLR", 1e12, 1e12)],
        );
        let outcome = Engine::new(&EngineConfig::default()).unwrap().run_pass(&snapshot).unwrap();

        assert!(outcome.graph.is_empty());
        assert_eq!(outcome.selection, Selection::none(NoOpportunity::EmptyGraph));
        assert_eq!(outcome.plan.decision, PlanDecision::NoOpportunity);
        assert!(outcome.plan.is_empty());
    }

    #[test]
    fn test_perfect_cycle_planned_as_one_circuit() {
        let engine = Engine::new(&EngineConfig::default()).unwrap();
        let (selection, plan) = engine.evaluate(&triangle()).unwrap();

        assert!((selection.total_weight() - 0.10).abs() < 1e-9);
        assert_eq!(plan.decision, PlanDecision::Accepted);
        assert_eq!(plan.batches.len(), 1);
        assert!(plan.batches[0].closed);
    }

    #[test]
    fn test_chord_left_out_of_plan() {
        let engine = Engine::new(&EngineConfig::default()).unwrap();
        let (selection, plan) = engine.evaluate(&triangle_with_chord()).unwrap();

        assert_eq!(selection.edges().len(), 3);
        assert!(plan
            .instructions()
            .all(|instruction| !(instruction.from_asset.as_str() == "A" && instruction.to_asset.as_str() == "C")));
    }

    #[test]
    fn test_heuristic_backend_agrees_on_small_graph() {
        let config = EngineConfig {
            optimizer_backend: OptimizerBackend::Heuristic,
            ..EngineConfig::default()
        };
        let (selection, _) = Engine::new(&config).unwrap().evaluate(&triangle_with_chord()).unwrap();
        assert!((selection.total_weight() - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_path_strategy_over_chord_graph() {
        let engine = Engine::new(&path_config("A", "C")).unwrap();
        let (selection, plan) = engine.evaluate(&triangle_with_chord()).unwrap();

        assert!((selection.total_weight() - 0.08).abs() < 1e-12);
        assert_eq!(plan.instructions().count(), 2);
    }

    #[test]
    fn test_path_strategy_end_to_end() {
        let outcome = Engine::new(&path_config("A", "C"))
            .unwrap()
            .run_pass(&rising_chain())
            .unwrap();

        assert_eq!(outcome.report.admitted, 2);
        let Selection::Path(path) = &outcome.selection else {
            panic!("expected a path, got {:?}", outcome.selection);
        };
        assert_eq!(path.assets, vec!["A".into(), "B".into(), "C".into()]);
        let expected = 0.05 + (1.1 / 1.05 - 1.0);
        assert!((path.total_weight - expected).abs() < 1e-6);
        assert_eq!(outcome.plan.decision, PlanDecision::Accepted);
    }

    #[test]
    fn test_path_strategy_on_thirty_asset_snapshot() {
        let symbols: Vec<String> = (0..30).map(|i| format!("T{i:02}")).collect();
        let price_args: Vec<(&str, f64)> = symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| (symbol.as_str(), 1.0 + 0.01 * i as f64))
            .collect();
        let pool_args: Vec<(&str, &str, f64, f64)> = symbols
            .iter()
            .flat_map(|from| symbols.iter().map(move |to| (from.as_str(), to.as_str(), 1e12, 1e12)))
            .filter(|(from, to, _, _)| from != to)
            .collect();

        let outcome = Engine::new(&path_config("T00", "T29"))
            .unwrap()
            .run_pass(&snapshot(&price_args, &pool_args))
            .unwrap();

        assert_eq!(outcome.report.admitted, 435);
        // Compounding makes the direct hop beat any chain of smaller ones
        let Selection::Path(path) = &outcome.selection else {
            panic!("expected a path, got {:?}", outcome.selection);
        };
        assert_eq!(path.assets, vec!["T00".into(), "T29".into()]);
        assert!((path.total_weight - 0.29).abs() < 1e-6);
        assert_eq!(outcome.plan.decision, PlanDecision::Accepted);
    }

    #[test]
    fn test_threshold_gates_the_plan() {
        let config = EngineConfig {
            min_profit_threshold: 0.5,
            ..path_config("A", "C")
        };
        let outcome = Engine::new(&config).unwrap().run_pass(&rising_chain()).unwrap();

        assert!(outcome.selection.is_opportunity());
        assert_eq!(outcome.plan.decision, PlanDecision::BelowThreshold);
        assert!(outcome.plan.is_empty());
    }

    #[test]
    fn test_data_error_aborts_pass() {
        let snapshot = snapshot(&[("A", 1.0), ("B", 2.0)], &[("A", "B", 100.0, -5.0)]);
        let err = Engine::new(&EngineConfig::default()).unwrap().run_pass(&snapshot).unwrap_err();
        assert!(matches!(err, ArbError::PairData { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig {
            trade_size: 0.0,
            ..EngineConfig::default()
        };
        assert!(matches!(Engine::new(&config), Err(ArbError::InvalidConfig(_))));
    }

    #[test]
    fn test_passes_are_deterministic() {
        let engine = Engine::new(&path_config("A", "C")).unwrap();
        let first = engine.run_pass(&rising_chain()).unwrap();
        for _ in 0..3 {
            assert_eq!(engine.run_pass(&rising_chain()).unwrap(), first);
        }
    }
}
