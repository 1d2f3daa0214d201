//! Generic worklist solver for instruction-level data flow analyses.
//!
//! An analysis supplies a bottom value, an entry value, a join and a per-instruction transfer
//! function; the solver iterates to a fixed point in either direction over the reachable part
//! of a method's control flow graph. Every node starts on the worklist, so loops without an exit
//! and loops through the entry instruction are visited like any other code. Termination relies on
//! each analysis using a lattice of finite height.

use std::collections::VecDeque;

use crate::ir::{Code, ControlFlowGraph, EdgeKind, Insn};

/// Direction in which facts propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    /// From the entry towards exits; joins over control flow predecessors.
    Forward,
    /// From exits towards the entry; joins over control flow successors.
    Backward,
}

/// A data flow analysis over the instructions of one method body.
///
/// For forward analyses the in-value of a node is the join of its predecessors' out-values and
/// `out = transfer(in)`. For backward analyses "in" is the value after the instruction (joined
/// over successors) and "out" the value before it.
pub(crate) trait DataFlowAnalysis {
    type Value: Clone + PartialEq;

    const DIRECTION: Direction;

    /// Bottom value, contributed by neighbours that have not been processed yet.
    fn initial(&self) -> Self::Value;

    /// Value flowing into the entry instruction (forward) or out of exit instructions (backward).
    fn entry(&self) -> Self::Value;

    fn join(&self, left: &Self::Value, right: &Self::Value) -> Self::Value;

    fn transfer(&self, value: &Self::Value, index: usize, insn: &Insn) -> Self::Value;

    /// Value carried along one edge, given the source node's in- and out-values.
    fn flow(&self, _kind: EdgeKind, _source_in: &Self::Value, source_out: &Self::Value) -> Self::Value {
        source_out.clone()
    }
}

/// Per-instruction fixed point. Unreachable instructions have no values.
#[derive(Clone, Debug)]
pub(crate) struct AnalysisResults<V> {
    in_values: Vec<Option<V>>,
    out_values: Vec<Option<V>>,
    iterations: usize,
}

impl<V> AnalysisResults<V> {
    pub(crate) fn in_value(&self, index: usize) -> Option<&V> {
        self.in_values.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn out_value(&self, index: usize) -> Option<&V> {
        self.out_values.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Worklist solver state for one analysis run.
pub(crate) struct DataFlowSolver<'a, A: DataFlowAnalysis> {
    analysis: &'a A,
    in_values: Vec<Option<A::Value>>,
    out_values: Vec<Option<A::Value>>,
    worklist: VecDeque<usize>,
    in_worklist: Vec<bool>,
    iterations: usize,
}

impl<'a, A: DataFlowAnalysis> DataFlowSolver<'a, A> {
    pub(crate) fn new(analysis: &'a A) -> Self {
        Self {
            analysis,
            in_values: Vec::new(),
            out_values: Vec::new(),
            worklist: VecDeque::new(),
            in_worklist: Vec::new(),
            iterations: 0,
        }
    }

    pub(crate) fn solve(mut self, code: &Code, cfg: &ControlFlowGraph) -> AnalysisResults<A::Value> {
        let len = cfg.len;
        self.in_values = vec![None; len];
        self.out_values = vec![None; len];
        self.in_worklist = vec![false; len];

        let mut nodes: Vec<usize> = (0..len).filter(|index| cfg.reachable[*index]).collect();
        if A::DIRECTION == Direction::Backward {
            nodes.reverse();
        }
        for node in nodes {
            self.push(node);
        }

        let edge_kinds = cfg.edge_kinds();
        while let Some(node) = self.worklist.pop_front() {
            self.in_worklist[node] = false;
            self.iterations += 1;

            let sources = self.sources(cfg, node);
            let is_boundary = match A::DIRECTION {
                Direction::Forward => node == 0,
                Direction::Backward => sources.is_empty(),
            };
            let mut value = if is_boundary || sources.is_empty() {
                Some(self.analysis.entry())
            } else {
                None
            };
            for &source in &sources {
                let edge = match A::DIRECTION {
                    Direction::Forward => (source, node),
                    Direction::Backward => (node, source),
                };
                let kind = edge_kinds.get(&edge).copied().unwrap_or(EdgeKind::FallThrough);
                let contribution = match (&self.in_values[source], &self.out_values[source]) {
                    (Some(source_in), Some(source_out)) => {
                        self.analysis.flow(kind, source_in, source_out)
                    }
                    _ => self.analysis.initial(),
                };
                value = Some(match value {
                    Some(current) => self.analysis.join(&current, &contribution),
                    None => contribution,
                });
            }
            let Some(value) = value else {
                continue;
            };

            let out = self
                .analysis
                .transfer(&value, node, &code.instructions[node]);
            self.in_values[node] = Some(value);
            if self.out_values[node].as_ref() != Some(&out) {
                self.out_values[node] = Some(out);
                for target in self.targets(cfg, node) {
                    self.push(target);
                }
            }
        }

        AnalysisResults {
            in_values: self.in_values,
            out_values: self.out_values,
            iterations: self.iterations,
        }
    }

    fn push(&mut self, node: usize) {
        if !self.in_worklist[node] {
            self.in_worklist[node] = true;
            self.worklist.push_back(node);
        }
    }

    /// Reachable nodes whose out-values feed `node`.
    fn sources(&self, cfg: &ControlFlowGraph, node: usize) -> Vec<usize> {
        let neighbours = match A::DIRECTION {
            Direction::Forward => &cfg.predecessors[node],
            Direction::Backward => &cfg.successors[node],
        };
        neighbours
            .iter()
            .copied()
            .filter(|neighbour| cfg.reachable[*neighbour])
            .collect()
    }

    fn targets(&self, cfg: &ControlFlowGraph, node: usize) -> Vec<usize> {
        let neighbours = match A::DIRECTION {
            Direction::Forward => &cfg.successors[node],
            Direction::Backward => &cfg.predecessors[node],
        };
        neighbours
            .iter()
            .copied()
            .filter(|neighbour| cfg.reachable[*neighbour])
            .collect()
    }
}

/// Runs `analysis` to a fixed point over `code`.
pub(crate) fn solve<A: DataFlowAnalysis>(
    analysis: &A,
    code: &Code,
    cfg: &ControlFlowGraph,
) -> AnalysisResults<A::Value> {
    DataFlowSolver::new(analysis).solve(code, cfg)
}
