use std::collections::{BTreeSet, HashMap, VecDeque};

use anyhow::Result;

use crate::error::InvariantViolation;
use crate::ir::{BasicBlock, Code, ControlFlowGraph, EdgeKind, FlowEdge, Insn, LabelId};
use crate::opcodes;

/// Build an instruction-level control flow graph for a method body.
pub(crate) fn build_cfg(code: &Code) -> Result<ControlFlowGraph> {
    let positions = code.label_positions();
    let resolve = |label: LabelId| -> Result<usize> {
        positions
            .get(&label)
            .copied()
            .ok_or_else(|| InvariantViolation::MissingLabel { label: label.0 }.into())
    };

    let len = code.instructions.len();
    let mut edges = Vec::new();
    let mut leaders = BTreeSet::new();
    if len > 0 {
        leaders.insert(0);
    }
    for (index, insn) in code.instructions.iter().enumerate() {
        let targets = branch_targets(insn, &resolve)?;
        let falls_through = !is_exit(insn) && !is_unconditional_branch(insn);
        for target in &targets {
            edges.push(FlowEdge {
                from: index,
                to: *target,
                kind: EdgeKind::Branch,
            });
            leaders.insert(*target);
        }
        if falls_through && index + 1 < len {
            edges.push(FlowEdge {
                from: index,
                to: index + 1,
                kind: EdgeKind::FallThrough,
            });
        }
        if !targets.is_empty() || is_exit(insn) {
            leaders.insert(index + 1);
        }
    }

    for handler in &code.try_catch {
        let start = resolve(handler.start)?;
        let end = resolve(handler.end)?;
        let target = resolve(handler.handler)?;
        leaders.insert(target);
        for index in start..end.min(len) {
            if !code.instructions[index].is_label() {
                edges.push(FlowEdge {
                    from: index,
                    to: target,
                    kind: EdgeKind::Exception,
                });
            }
        }
    }

    let mut seen = BTreeSet::new();
    edges.retain(|edge| seen.insert((edge.from, edge.to, edge.kind)));

    let mut successors = vec![Vec::new(); len];
    let mut predecessors = vec![Vec::new(); len];
    for edge in &edges {
        if !successors[edge.from].contains(&edge.to) {
            successors[edge.from].push(edge.to);
            predecessors[edge.to].push(edge.from);
        }
    }

    let mut reachable = vec![false; len];
    let mut queue = VecDeque::new();
    if len > 0 {
        reachable[0] = true;
        queue.push_back(0);
    }
    while let Some(node) = queue.pop_front() {
        for &next in &successors[node] {
            if !reachable[next] {
                reachable[next] = true;
                queue.push_back(next);
            }
        }
    }

    let leader_list: Vec<usize> = leaders.into_iter().filter(|index| *index < len).collect();
    let mut blocks = Vec::new();
    for (position, start) in leader_list.iter().enumerate() {
        let end = leader_list.get(position + 1).copied().unwrap_or(len);
        blocks.push(BasicBlock { start: *start, end });
    }

    Ok(ControlFlowGraph {
        len,
        edges,
        successors,
        predecessors,
        reachable,
        blocks,
    })
}

impl ControlFlowGraph {
    /// Kind of every edge, preferring normal flow over exceptional flow.
    pub(crate) fn edge_kinds(&self) -> HashMap<(usize, usize), EdgeKind> {
        let mut kinds = HashMap::new();
        for edge in &self.edges {
            kinds
                .entry((edge.from, edge.to))
                .and_modify(|kind: &mut EdgeKind| *kind = (*kind).min(edge.kind))
                .or_insert(edge.kind);
        }
        kinds
    }
}

fn branch_targets(insn: &Insn, resolve: &dyn Fn(LabelId) -> Result<usize>) -> Result<Vec<usize>> {
    let targets = match insn {
        Insn::Jump { target, .. } => vec![resolve(*target)?],
        Insn::TableSwitch {
            default, targets, ..
        }
        | Insn::LookupSwitch {
            default, targets, ..
        } => {
            let mut resolved = vec![resolve(*default)?];
            for target in targets {
                let index = resolve(*target)?;
                if !resolved.contains(&index) {
                    resolved.push(index);
                }
            }
            resolved
        }
        _ => Vec::new(),
    };
    Ok(targets)
}

pub(crate) fn is_exit(insn: &Insn) -> bool {
    matches!(
        insn.opcode(),
        Some(
            opcodes::IRETURN
                | opcodes::LRETURN
                | opcodes::FRETURN
                | opcodes::DRETURN
                | opcodes::ARETURN
                | opcodes::RETURN
                | opcodes::ATHROW
                | opcodes::RET
        )
    )
}

pub(crate) fn is_unconditional_branch(insn: &Insn) -> bool {
    matches!(
        insn,
        Insn::Jump {
            opcode: opcodes::GOTO,
            ..
        } | Insn::TableSwitch { .. }
            | Insn::LookupSwitch { .. }
    )
}
