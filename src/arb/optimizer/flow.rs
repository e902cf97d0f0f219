//! The cycle-selection program: one binary variable per edge, maximize the
//! summed weight of selected edges subject to in-degree = out-degree at
//! every asset.
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use crate::arb::graph::{ArbitrageGraph, Edge};
use crate::arb::types::Asset;

/// Indexed view of a graph as a binary flow-conservation program
#[derive(Debug, Clone)]
pub struct FlowProblem<'g> {
    /// Edges, one per variable, in graph order
    edges: Vec<&'g Edge>,
    /// Assets, one per constraint, in symbol order
    assets: Vec<&'g Asset>,
    /// Index into `assets` of each edge's source
    sources: Vec<usize>,
    /// Index into `assets` of each edge's target
    targets: Vec<usize>,
}

impl<'g> FlowProblem<'g> {
    /// Indexes the edges and assets of a graph
    #[must_use]
    pub fn new(graph: &'g ArbitrageGraph) -> Self {
        let assets: Vec<&Asset> = graph.assets().into_iter().collect();
        let index: HashMap<&Asset, usize> = assets.iter().enumerate().map(|(i, a)| (*a, i)).collect();
        let edges: Vec<&Edge> = graph.edges().collect();
        let sources = edges.iter().map(|e| index[e.source()]).collect();
        let targets = edges.iter().map(|e| index[e.target()]).collect();
        Self {
            edges,
            assets,
            sources,
            targets,
        }
    }

    /// Number of variables (edges)
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether there are no variables
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Number of constraints (assets)
    #[must_use]
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    /// Weight of edge `i`
    #[must_use]
    pub fn weight(&self, i: usize) -> f64 {
        self.edges[i].weight
    }

    /// Asset index of the source of edge `i`
    #[must_use]
    pub fn source(&self, i: usize) -> usize {
        self.sources[i]
    }

    /// Asset index of the target of edge `i`
    #[must_use]
    pub fn target(&self, i: usize) -> usize {
        self.targets[i]
    }

    /// Summed weight of the selected edges
    #[must_use]
    pub fn objective(&self, assignment: &[bool]) -> f64 {
        self.selected(assignment).map(|i| self.weight(i)).sum()
    }

    /// In-degree minus out-degree of every asset within the selection
    #[must_use]
    pub fn balances(&self, assignment: &[bool]) -> Vec<i64> {
        let mut balances = vec![0; self.assets.len()];
        for i in self.selected(assignment) {
            balances[self.targets[i]] += 1;
            balances[self.sources[i]] -= 1;
        }
        balances
    }

    /// Whether the assignment has one entry per edge and conserves flow at
    /// every asset
    #[must_use]
    pub fn is_feasible(&self, assignment: &[bool]) -> bool {
        assignment.len() == self.len() && self.balances(assignment).iter().all(|b| *b == 0)
    }

    /// The selected edges, cloned out of the graph
    #[must_use]
    pub fn selected_edges(&self, assignment: &[bool]) -> Vec<Edge> {
        self.selected(assignment).map(|i| self.edges[i].clone()).collect()
    }

    /// Indices of the selected edges
    fn selected<'a>(&self, assignment: &'a [bool]) -> impl Iterator<Item = usize> + 'a {
        assignment.iter().enumerate().filter(|(_, x)| **x).map(|(i, _)| i)
    }

    /// Marks the edges that lie on some directed cycle.
    ///
    /// Any other edge is zero in every feasible assignment, so solvers can fix
    /// it up front. An edge lies on a cycle iff both endpoints share a strongly
    /// connected component.
    #[must_use]
    pub fn cyclic_edges(&self) -> Vec<bool> {
        let components = self.strongly_connected_components();
        (0..self.len())
            .map(|i| components[self.sources[i]] == components[self.targets[i]])
            .collect()
    }

    /// Component id per asset (Kosaraju, iterative)
    fn strongly_connected_components(&self) -> Vec<usize> {
        let n = self.assets.len();
        let mut forward = vec![Vec::new(); n];
        let mut backward = vec![Vec::new(); n];
        for i in 0..self.len() {
            forward[self.sources[i]].push(self.targets[i]);
            backward[self.targets[i]].push(self.sources[i]);
        }

        // First pass: finishing order on the forward graph
        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        for root in 0..n {
            if visited[root] {
                continue;
            }
            visited[root] = true;
            let mut stack = vec![(root, 0)];
            while let Some((node, next)) = stack.pop() {
                if let Some(&succ) = forward[node].get(next) {
                    stack.push((node, next + 1));
                    if !visited[succ] {
                        visited[succ] = true;
                        stack.push((succ, 0));
                    }
                } else {
                    order.push(node);
                }
            }
        }

        // Second pass: flood the reversed graph in reverse finishing order
        let mut component = vec![usize::MAX; n];
        let mut count = 0;
        for &root in order.iter().rev() {
            if component[root] != usize::MAX {
                continue;
            }
            component[root] = count;
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                for &pred in &backward[node] {
                    if component[pred] == usize::MAX {
                        component[pred] = count;
                        stack.push(pred);
                    }
                }
            }
            count += 1;
        }
        component
    }

    /// Elementary cycles of at most `max_len` edges, each as a list of edge
    /// indices, stopping after `limit` cycles. Every cycle is reported once,
    /// starting from its lowest-indexed asset.
    #[must_use]
    pub fn short_cycles(&self, max_len: usize, limit: usize) -> Vec<Vec<usize>> {
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); self.assets.len()];
        for i in 0..self.len() {
            outgoing[self.sources[i]].push(i);
        }

        let mut cycles = Vec::new();
        let mut path = Vec::new();
        let mut on_path = vec![false; self.assets.len()];
        for start in 0..self.assets.len() {
            self.extend_cycles(start, start, max_len, limit, &outgoing, &mut on_path, &mut path, &mut cycles);
            if cycles.len() >= limit {
                break;
            }
        }
        cycles
    }

    /// Depth-first step of [`Self::short_cycles`]
    #[allow(clippy::too_many_arguments)]
    fn extend_cycles(
        &self,
        start: usize,
        node: usize,
        max_len: usize,
        limit: usize,
        outgoing: &[Vec<usize>],
        on_path: &mut [bool],
        path: &mut Vec<usize>,
        cycles: &mut Vec<Vec<usize>>,
    ) {
        if path.len() >= max_len {
            return;
        }
        on_path[node] = true;
        for &edge in &outgoing[node] {
            if cycles.len() >= limit {
                break;
            }
            let next = self.targets[edge];
            if next == start {
                let mut cycle = path.clone();
                cycle.push(edge);
                cycles.push(cycle);
            } else if next > start && !on_path[next] {
                path.push(edge);
                self.extend_cycles(start, next, max_len, limit, outgoing, on_path, path, cycles);
                path.pop();
            }
        }
        on_path[node] = false;
    }

    /// Renders the program in LP text format
    #[must_use]
    pub fn to_lp_string(&self) -> String {
        let mut lp = String::new();
        let _ = writeln!(lp, "\\ Problem name: arbitrage_cycles");
        for (i, edge) in self.edges.iter().enumerate() {
            let _ = writeln!(lp, "\\ x_{i}: {}", edge.pair);
        }

        let _ = writeln!(lp, "\nMaximize");
        let objective: Vec<String> = (0..self.len())
            .map(|i| format!("{} x_{i}", self.weight(i)))
            .collect();
        let _ = writeln!(lp, " obj: {}", objective.join(" + "));

        let _ = writeln!(lp, "\nSubject To");
        for (node, asset) in self.assets.iter().enumerate() {
            let mut terms = String::new();
            for i in 0..self.len() {
                if self.targets[i] == node {
                    let _ = write!(terms, "{}x_{i}", if terms.is_empty() { "" } else { " + " });
                }
            }
            for i in 0..self.len() {
                if self.sources[i] == node {
                    let _ = write!(terms, "{}x_{i}", if terms.is_empty() { "- " } else { " - " });
                }
            }
            let _ = writeln!(lp, " flow_{asset}: {terms} = 0");
        }

        let _ = writeln!(lp, "\nBounds");
        for i in 0..self.len() {
            let _ = writeln!(lp, " 0 <= x_{i} <= 1");
        }

        let _ = writeln!(lp, "\nBinaries");
        let names: Vec<String> = (0..self.len()).map(|i| format!("x_{i}")).collect();
        let _ = writeln!(lp, " {}", names.join(" "));
        let _ = writeln!(lp, "End");
        lp
    }

    /// Expands the program into an unconstrained minimization with the flow
    /// constraints moved into a quadratic penalty:
    /// `-Σ w_e x_e + penalty · Σ_n (in_n(x) - out_n(x))²`
    #[must_use]
    pub fn qubo(&self, penalty: f64) -> Qubo {
        // Each edge enters one asset and leaves another, so x_e² appears twice
        let linear: Vec<f64> = (0..self.len())
            .map(|i| -self.weight(i) + 2.0 * penalty)
            .collect();

        let mut incidence: Vec<Vec<(usize, f64)>> = vec![Vec::new(); self.assets.len()];
        for i in 0..self.len() {
            incidence[self.targets[i]].push((i, 1.0));
            incidence[self.sources[i]].push((i, -1.0));
        }

        let mut quadratic = BTreeMap::new();
        for terms in &incidence {
            for (a, &(i, ci)) in terms.iter().enumerate() {
                for &(j, cj) in &terms[a + 1..] {
                    let key = (i.min(j), i.max(j));
                    *quadratic.entry(key).or_insert(0.0) += 2.0 * penalty * ci * cj;
                }
            }
        }
        quadratic.retain(|_, coefficient| *coefficient != 0.0);

        Qubo { linear, quadratic }
    }
}

/// Quadratic unconstrained binary objective, to be minimized
#[derive(Debug, Clone, PartialEq)]
pub struct Qubo {
    /// Coefficient of `x_i`
    pub linear: Vec<f64>,
    /// Coefficient of `x_i · x_j`, keyed with `i < j`
    pub quadratic: BTreeMap<(usize, usize), f64>,
}

impl Qubo {
    /// Objective value of an assignment
    #[must_use]
    pub fn energy(&self, assignment: &[bool]) -> f64 {
        let linear: f64 = self
            .linear
            .iter()
            .zip(assignment)
            .filter(|(_, x)| **x)
            .map(|(c, _)| c)
            .sum();
        let quadratic: f64 = self
            .quadratic
            .iter()
            .filter(|((i, j), _)| assignment[*i] && assignment[*j])
            .map(|(_, c)| c)
            .sum();
        linear + quadratic
    }
}
