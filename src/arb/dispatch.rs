//! # Dispatcher
//!
//! Turns a [`Selection`] into ordered trade instructions. A selection below
//! the profit threshold yields an empty plan. A cycle selection arrives as an
//! unordered, balanced edge set; it is split into connected components and
//! each component is walked as one closed Eulerian circuit, so every batch
//! starts and ends on the same asset.
use std::collections::BTreeMap;

use chrono::Utc;
use eyre::Result;
use log::{debug, info};
use serde::Serialize;

use super::cost::EdgeCosts;
use super::error::ArbError;
use super::graph::Edge;
use super::ledger::{TradeLedger, TradeRecord};
use super::optimizer::Selection;
use super::types::Asset;

/// One trade handed to the executor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeInstruction {
    /// Asset sold
    pub from_asset: Asset,
    /// Asset bought
    pub to_asset: Asset,
    /// Net profit rate of the edge the trade comes from
    pub estimated_profit_rate: f64,
    /// Cost breakdown of that edge
    pub costs: EdgeCosts,
    /// Index of the batch inside the plan
    pub batch: usize,
    /// Position inside the batch
    pub leg: usize,
}

/// Instructions that must be executed in order, one after the other
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeBatch {
    /// Whether the last trade returns to the first trade's asset
    pub closed: bool,
    /// Summed profit rate of the batch
    pub total_weight: f64,
    /// The trades, in execution order
    pub instructions: Vec<TradeInstruction>,
}

/// Outcome of the threshold gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlanDecision {
    /// Instructions were produced
    Accepted,
    /// A selection exists but earns less than the threshold
    BelowThreshold,
    /// The optimizer found nothing
    NoOpportunity,
}

/// Everything the dispatcher decided for one selection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPlan {
    /// Whether the selection is traded
    pub decision: PlanDecision,
    /// Total weight of the selection
    pub total_weight: f64,
    /// Threshold it was compared against
    pub threshold: f64,
    /// Independent batches, empty unless accepted
    pub batches: Vec<TradeBatch>,
}

impl DispatchPlan {
    /// Every instruction, batch by batch
    pub fn instructions(&self) -> impl Iterator<Item = &TradeInstruction> {
        self.batches.iter().flat_map(|batch| batch.instructions.iter())
    }

    /// Whether there is nothing to execute
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Executes trades on behalf of the dispatcher
pub trait TradeExecutor {
    /// Submits one trade and returns its transaction reference
    ///
    /// # Errors
    /// * If the trade could not be submitted
    fn execute(&mut self, instruction: &TradeInstruction) -> Result<String>;
}

/// Executor that only logs and hands out sequential references
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    /// Trades submitted so far, used to number references
    submitted: u64,
}

impl DryRunExecutor {
    /// Creates an executor that has submitted nothing yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TradeExecutor for DryRunExecutor {
    fn execute(&mut self, instruction: &TradeInstruction) -> Result<String> {
        self.submitted += 1;
        let reference = format!("dry-run-{}", self.submitted);
        info!(
            "dry run: {} -> {} (batch {}, leg {}), estimated rate {:.6}, ref {reference}",
            instruction.from_asset,
            instruction.to_asset,
            instruction.batch,
            instruction.leg,
            instruction.estimated_profit_rate
        );
        Ok(reference)
    }
}

/// Threshold gate and instruction ordering
#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Minimum total weight for a selection to be traded
    min_profit_threshold: f64,
    /// Trade size, used to turn rates into expected profit
    trade_size: f64,
}

impl Dispatcher {
    /// Creates a dispatcher gating on `min_profit_threshold`, with expected
    /// profit computed against `trade_size`
    #[must_use]
    pub const fn new(min_profit_threshold: f64, trade_size: f64) -> Self {
        Self {
            min_profit_threshold,
            trade_size,
        }
    }

    /// Decides whether to trade a selection and in which order
    ///
    /// # Errors
    /// * [`ArbError::UnbalancedSelection`] if a cycle selection does not
    ///   conserve flow, so it cannot be walked as closed circuits
    pub fn plan(&self, selection: &Selection) -> Result<DispatchPlan, ArbError> {
        let total_weight = selection.total_weight();
        let mut plan = DispatchPlan {
            decision: PlanDecision::NoOpportunity,
            total_weight,
            threshold: self.min_profit_threshold,
            batches: Vec::new(),
        };

        let walks = match selection {
            Selection::NoOpportunity { reason } => {
                info!("dispatch: no opportunity ({reason:?})");
                return Ok(plan);
            }
            Selection::Path(path) => vec![path.edges.iter().collect()],
            Selection::Cycles(cycles) => circuits(&cycles.edges)?,
        };

        if walks.iter().all(Vec::is_empty) {
            return Ok(plan);
        }
        if total_weight < self.min_profit_threshold {
            info!(
                "dispatch: weight {total_weight:.6} below threshold {:.6}, nothing emitted",
                self.min_profit_threshold
            );
            plan.decision = PlanDecision::BelowThreshold;
            return Ok(plan);
        }

        plan.decision = PlanDecision::Accepted;
        plan.batches = walks
            .into_iter()
            .enumerate()
            .map(|(batch, walk)| to_batch(batch, &walk))
            .collect();
        info!(
            "dispatch: accepted weight {total_weight:.6} as {} batches, {} instructions",
            plan.batches.len(),
            plan.instructions().count()
        );
        Ok(plan)
    }

    /// Sends every instruction of an accepted plan to the executor and records
    /// each one in the ledger, stopping at the first failure
    ///
    /// # Errors
    /// * If the executor rejects a trade
    /// * If the ledger cannot store a record
    pub fn emit(
        &self,
        plan: &DispatchPlan,
        executor: &mut dyn TradeExecutor,
        ledger: &mut dyn TradeLedger,
    ) -> Result<Vec<TradeRecord>> {
        let mut records = Vec::new();
        for instruction in plan.instructions() {
            let reference = executor.execute(instruction)?;
            let record = TradeRecord::new(instruction, reference, self.trade_size, Utc::now());
            ledger.record(record.clone())?;
            records.push(record);
        }
        Ok(records)
    }
}

/// Numbers the legs of one walk
fn to_batch(batch: usize, walk: &[&Edge]) -> TradeBatch {
    let instructions = walk
        .iter()
        .enumerate()
        .map(|(leg, edge)| TradeInstruction {
            from_asset: edge.source().clone(),
            to_asset: edge.target().clone(),
            estimated_profit_rate: edge.weight,
            costs: edge.costs,
            batch,
            leg,
        })
        .collect();
    TradeBatch {
        closed: walk.first().map(|edge| edge.source()) == walk.last().map(|edge| edge.target()),
        total_weight: walk.iter().map(|edge| edge.weight).sum(),
        instructions,
    }
}

/// Splits a balanced edge set into one closed walk per connected component.
///
/// Walks start at the smallest asset of their component and always leave an
/// asset along its smallest unused destination first (Hierholzer), so the
/// output only depends on the edge set.
fn circuits(edges: &[Edge]) -> Result<Vec<Vec<&Edge>>, ArbError> {
    let mut degrees: BTreeMap<&Asset, (usize, usize)> = BTreeMap::new();
    for edge in edges {
        degrees.entry(edge.target()).or_default().0 += 1;
        degrees.entry(edge.source()).or_default().1 += 1;
    }
    if let Some((asset, (in_degree, out_degree))) =
        degrees.iter().find(|(_, (in_degree, out_degree))| in_degree != out_degree)
    {
        return Err(ArbError::UnbalancedSelection {
            asset: (*asset).clone(),
            in_degree: *in_degree,
            out_degree: *out_degree,
        });
    }

    // Unused outgoing edges, largest destination last so `pop` takes the smallest
    let mut unused: BTreeMap<&Asset, Vec<&Edge>> = BTreeMap::new();
    for edge in edges {
        unused.entry(edge.source()).or_default().push(edge);
    }
    for outgoing in unused.values_mut() {
        outgoing.sort_by(|a, b| b.target().cmp(a.target()));
    }

    let mut walks = Vec::new();
    for &start in degrees.keys() {
        if unused.get(start).is_some_and(|outgoing| !outgoing.is_empty()) {
            let walk = hierholzer(start, &mut unused);
            debug!("dispatch: circuit from {start} with {} legs", walk.len());
            walks.push(walk);
        }
    }
    Ok(walks)
}

/// Consumes every edge reachable from `start` into one closed walk
fn hierholzer<'e>(start: &'e Asset, unused: &mut BTreeMap<&'e Asset, Vec<&'e Edge>>) -> Vec<&'e Edge> {
    let mut stack: Vec<(&Asset, Option<&Edge>)> = vec![(start, None)];
    let mut walk = Vec::new();
    while let Some(&(asset, arrived_by)) = stack.last() {
        match unused.get_mut(asset).and_then(Vec::pop) {
            Some(edge) => stack.push((edge.target(), Some(edge))),
            None => {
                stack.pop();
                walk.extend(arrived_by);
            }
        }
    }
    walk.reverse();
    walk
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::arb::ledger::MemoryLedger;
    use crate::arb::optimizer::{CycleSelection, NoOpportunity, PathSelection};
    use crate::arb::test_helpers::*;

    fn cycles(edges: &[(&str, &str, f64)]) -> Selection {
        let edges: Vec<Edge> = graph(edges).edges().cloned().collect();
        Selection::Cycles(CycleSelection {
            total_weight: edges.iter().map(|edge| edge.weight).sum(),
            edges,
            backend: "test",
        })
    }

    fn legs(batch: &TradeBatch) -> Vec<String> {
        batch
            .instructions
            .iter()
            .map(|instruction| format!("{}->{}", instruction.from_asset, instruction.to_asset))
            .collect()
    }

    #[test]
    fn test_triangle_walk_order() {
        let plan = Dispatcher::new(0.0, 10.0)
            .plan(&cycles(&[("A", "B", 0.03), ("B", "C", 0.05), ("C", "A", 0.02)]))
            .unwrap();

        assert_eq!(plan.decision, PlanDecision::Accepted);
        assert_eq!(plan.batches.len(), 1);
        let batch = &plan.batches[0];
        assert!(batch.closed);
        assert_eq!(legs(batch), vec!["A->B", "B->C", "C->A"]);
        assert_eq!(
            batch.instructions.iter().map(|i| i.leg).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!((batch.total_weight - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_disjoint_cycles_dispatched_independently() {
        let plan = Dispatcher::new(0.0, 10.0)
            .plan(&cycles(&[
                ("A", "B", 0.01),
                ("B", "A", 0.01),
                ("X", "Y", 0.02),
                ("Y", "Z", 0.02),
                ("Z", "X", 0.02),
            ]))
            .unwrap();

        assert_eq!(plan.batches.len(), 2);
        assert_eq!(legs(&plan.batches[0]), vec!["A->B", "B->A"]);
        assert_eq!(legs(&plan.batches[1]), vec!["X->Y", "Y->Z", "Z->X"]);
        assert!(plan.batches.iter().all(|batch| batch.closed));
        assert_eq!(plan.instructions().last().unwrap().batch, 1);
    }

    #[test]
    fn test_cycles_sharing_an_asset_form_one_circuit() {
        // A->B->A and A->C->A meet at A
        let plan = Dispatcher::new(0.0, 10.0)
            .plan(&cycles(&[
                ("A", "B", 0.01),
                ("B", "A", 0.01),
                ("A", "C", 0.01),
                ("C", "A", 0.01),
            ]))
            .unwrap();

        assert_eq!(plan.batches.len(), 1);
        assert_eq!(legs(&plan.batches[0]), vec!["A->B", "B->A", "A->C", "C->A"]);
    }

    #[test]
    fn test_below_threshold_emits_nothing() {
        let plan = Dispatcher::new(0.5, 10.0).plan(&cycles(&[("A", "B", 0.1), ("B", "A", 0.1)])).unwrap();
        assert_eq!(plan.decision, PlanDecision::BelowThreshold);
        assert!(plan.is_empty());
        assert!((plan.total_weight - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let plan = Dispatcher::new(0.25, 10.0).plan(&cycles(&[("A", "B", 0.125), ("B", "A", 0.125)])).unwrap();
        assert_eq!(plan.decision, PlanDecision::Accepted);
    }

    #[test]
    fn test_no_opportunity_passes_through() {
        let plan = Dispatcher::new(0.0, 10.0)
            .plan(&Selection::none(NoOpportunity::NoFeasibleCycle))
            .unwrap();
        assert_eq!(plan.decision, PlanDecision::NoOpportunity);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_path_kept_in_order() {
        let edges = vec![edge("A", "B", 0.03), edge("B", "C", 0.05)];
        let selection = Selection::Path(PathSelection {
            assets: vec!["A".into(), "B".into(), "C".into()],
            edges,
            total_weight: 0.08,
        });
        let plan = Dispatcher::new(0.0, 10.0).plan(&selection).unwrap();
        assert_eq!(plan.batches.len(), 1);
        assert!(!plan.batches[0].closed);
        assert_eq!(legs(&plan.batches[0]), vec!["A->B", "B->C"]);
    }

    #[test]
    fn test_unbalanced_selection_rejected() {
        let err = Dispatcher::new(0.0, 10.0)
            .plan(&cycles(&[("A", "B", 0.03), ("B", "C", 0.05)]))
            .unwrap_err();
        assert_eq!(
            err,
            ArbError::UnbalancedSelection {
                asset: "A".into(),
                in_degree: 0,
                out_degree: 1,
            }
        );
    }

    #[test]
    fn test_emit_records_every_instruction() {
        let dispatcher = Dispatcher::new(0.0, 10.0);
        let plan = dispatcher
            .plan(&cycles(&[("A", "B", 0.03), ("B", "C", 0.05), ("C", "A", 0.02)]))
            .unwrap();

        let mut ledger = MemoryLedger::new();
        let records = dispatcher
            .emit(&plan, &mut DryRunExecutor::new(), &mut ledger)
            .unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].reference, "dry-run-1");
        assert_eq!(records[2].reference, "dry-run-3");
        assert!((records[1].expected_profit - 0.5).abs() < 1e-12);
        assert_eq!(ledger.records().unwrap(), records);
        assert!((ledger.reconcile().unwrap().expected_total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_emit_stops_on_executor_failure() {
        struct Failing;
        impl TradeExecutor for Failing {
            fn execute(&mut self, _instruction: &TradeInstruction) -> Result<String> {
                eyre::bail!("node unreachable")
            }
        }

        let dispatcher = Dispatcher::new(0.0, 10.0);
        let plan = dispatcher.plan(&cycles(&[("A", "B", 0.1), ("B", "A", 0.1)])).unwrap();
        let mut ledger = MemoryLedger::new();
        let err = dispatcher.emit(&plan, &mut Failing, &mut ledger).unwrap_err();
        assert_eq!(err.to_string(), "node unreachable");
        assert!(ledger.records().unwrap().is_empty());
    }
}
