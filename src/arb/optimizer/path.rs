use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use super::{Meter, NoOpportunity, PathSelection, Selection, WEIGHT_EPSILON};
use crate::arb::error::ArbError;
use crate::arb::graph::{ArbitrageGraph, Edge};
use crate::arb::types::Asset;

/// Outgoing edges per asset, ordered by destination
type Adjacency<'a> = BTreeMap<&'a Asset, Vec<&'a Edge>>;

/// A complete path and its weight
type Candidate<'a> = (Vec<&'a Edge>, f64);

/// Best simple path from `start` to `end`, maximizing cumulative weight.
///
/// Ties on weight go to the path with fewer edges, then to the
/// lexicographically smaller asset sequence. When `start == end` the best
/// simple cycle through `start` is returned.
///
/// If no cycle is reachable from `start` the heaviest path is found in one
/// sweep over a topological order. Otherwise simple paths are enumerated
/// depth first. Both charge one meter tick per edge examined.
///
/// # Errors
/// * [`ArbError::OptimizationTimeout`] if the meter runs out
pub fn best_path(
    graph: &ArbitrageGraph,
    start: &Asset,
    end: &Asset,
    meter: &mut Meter,
) -> Result<Selection, ArbError> {
    let adjacency = graph.adjacency();
    let best = search(&adjacency, start, end, meter)?;

    Ok(best.map_or(Selection::none(NoOpportunity::NoPath), |(edges, total_weight)| {
        let assets = std::iter::once(start.clone())
            .chain(edges.iter().map(|edge| edge.target().clone()))
            .collect();
        Selection::Path(PathSelection {
            assets,
            edges: edges.into_iter().cloned().collect(),
            total_weight,
        })
    }))
}

/// Picks the search that fits the shape of the graph reachable from `start`
fn search<'a>(
    adjacency: &Adjacency<'a>,
    start: &'a Asset,
    end: &'a Asset,
    meter: &mut Meter,
) -> Result<Option<Candidate<'a>>, ArbError> {
    match topological_order(adjacency, start, meter)? {
        // Nothing leads back to start
        Some(_) if start == end => Ok(None),
        Some(order) => heaviest_in_order(adjacency, &order, start, end, meter),
        None => {
            let mut search = PathSearch {
                adjacency,
                end,
                visited: BTreeSet::from([start]),
                path: Vec::new(),
                weight: 0.0,
                best: None,
                meter,
            };
            search.extend(start)?;
            Ok(search.best)
        }
    }
}

/// Assets reachable from `start`, in topological order. `None` if a cycle is
/// reachable.
fn topological_order<'a>(
    adjacency: &Adjacency<'a>,
    start: &'a Asset,
    meter: &mut Meter,
) -> Result<Option<Vec<&'a Asset>>, ArbError> {
    /// Depth-first visit; `false` once a back edge is seen
    fn visit<'a>(
        adjacency: &Adjacency<'a>,
        asset: &'a Asset,
        finished: &mut BTreeMap<&'a Asset, bool>,
        postorder: &mut Vec<&'a Asset>,
        meter: &mut Meter,
    ) -> Result<bool, ArbError> {
        finished.insert(asset, false);
        for &edge in adjacency.get(asset).into_iter().flatten() {
            meter.tick()?;
            match finished.get(edge.target()) {
                Some(false) => return Ok(false),
                Some(true) => {}
                None => {
                    if !visit(adjacency, edge.target(), finished, postorder, meter)? {
                        return Ok(false);
                    }
                }
            }
        }
        finished.insert(asset, true);
        postorder.push(asset);
        Ok(true)
    }

    let mut finished = BTreeMap::new();
    let mut postorder = Vec::new();
    if !visit(adjacency, start, &mut finished, &mut postorder, meter)? {
        return Ok(None);
    }
    postorder.reverse();
    Ok(Some(postorder))
}

/// Heaviest path to `end` over an acyclic graph, relaxing edges in
/// topological order. Keeping only the best path into each asset is exact
/// because appending the same edge to two paths preserves their ranking.
fn heaviest_in_order<'a>(
    adjacency: &Adjacency<'a>,
    order: &[&'a Asset],
    start: &'a Asset,
    end: &'a Asset,
    meter: &mut Meter,
) -> Result<Option<Candidate<'a>>, ArbError> {
    let mut best: BTreeMap<&'a Asset, Candidate<'a>> = BTreeMap::from([(start, (Vec::new(), 0.0))]);

    for &asset in order {
        if asset == end {
            continue;
        }
        let Some((path, weight)) = best.get(asset).cloned() else {
            continue;
        };
        for &edge in adjacency.get(asset).into_iter().flatten() {
            meter.tick()?;
            let mut extended = path.clone();
            extended.push(edge);
            let extended_weight = weight + edge.weight;
            if beats(&extended, extended_weight, best.get(edge.target())) {
                best.insert(edge.target(), (extended, extended_weight));
            }
        }
    }

    Ok(best.remove(end))
}

/// Depth-first enumeration state
struct PathSearch<'a, 's> {
    /// Outgoing edges per asset
    adjacency: &'s Adjacency<'a>,
    /// Destination asset
    end: &'a Asset,
    /// Assets on the current path
    visited: BTreeSet<&'a Asset>,
    /// Edges of the current path
    path: Vec<&'a Edge>,
    /// Weight of the current path
    weight: f64,
    /// Best complete path so far
    best: Option<Candidate<'a>>,
    /// Budget meter
    meter: &'s mut Meter,
}

impl<'a> PathSearch<'a, '_> {
    /// Tries every edge out of `asset`
    fn extend(&mut self, asset: &'a Asset) -> Result<(), ArbError> {
        let adjacency = self.adjacency;
        for &edge in adjacency.get(asset).into_iter().flatten() {
            self.meter.tick()?;
            let next = edge.target();
            if next == self.end {
                self.path.push(edge);
                self.weight += edge.weight;
                self.offer();
                self.path.pop();
                self.weight -= edge.weight;
            } else if !self.visited.contains(next) {
                self.visited.insert(next);
                self.path.push(edge);
                self.weight += edge.weight;
                self.extend(next)?;
                self.path.pop();
                self.weight -= edge.weight;
                self.visited.remove(next);
            }
        }
        Ok(())
    }

    /// Keeps the current path if it beats the best one
    fn offer(&mut self) {
        if beats(&self.path, self.weight, self.best.as_ref()) {
            // Recompute from scratch so the reported weight carries no
            // accumulated rounding from the add/subtract walk
            let weight = self.path.iter().map(|edge| edge.weight).sum();
            self.best = Some((self.path.clone(), weight));
        }
    }
}

/// Whether `path` ranks above `best`: heavier, then fewer edges, then the
/// lexicographically smaller asset sequence
fn beats(path: &[&Edge], weight: f64, best: Option<&Candidate<'_>>) -> bool {
    let Some((best, best_weight)) = best else {
        return true;
    };
    match compare_weight(weight, *best_weight) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match path.len().cmp(&best.len()) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => path
                .iter()
                .map(|edge| edge.target())
                .lt(best.iter().map(|edge| edge.target())),
        },
    }
}

/// Compares two weights, treating differences within epsilon as equal
fn compare_weight(a: f64, b: f64) -> Ordering {
    if (a - b).abs() <= WEIGHT_EPSILON {
        Ordering::Equal
    } else if a > b {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}
