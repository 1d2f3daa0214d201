use std::collections::BTreeSet;

use anyhow::Result;

use crate::analysis::dataflow::{AnalysisResults, DataFlowAnalysis, Direction, solve};
use crate::cfg::build_cfg;
use crate::ir::{Code, Insn};

/// Backward analysis of the local slots read on some path before being overwritten.
///
/// `in_value(i)` is the set live after instruction `i`, `out_value(i)` the set live before it.
pub(crate) struct LiveVariableAnalysis;

impl DataFlowAnalysis for LiveVariableAnalysis {
    type Value = BTreeSet<u16>;

    const DIRECTION: Direction = Direction::Backward;

    fn initial(&self) -> BTreeSet<u16> {
        BTreeSet::new()
    }

    fn entry(&self) -> BTreeSet<u16> {
        BTreeSet::new()
    }

    fn join(&self, left: &BTreeSet<u16>, right: &BTreeSet<u16>) -> BTreeSet<u16> {
        left.union(right).copied().collect()
    }

    fn transfer(&self, value: &BTreeSet<u16>, _index: usize, insn: &Insn) -> BTreeSet<u16> {
        let mut live = value.clone();
        if insn.is_load() {
            if let Insn::Var { var, .. } = insn {
                live.insert(*var);
            }
        } else if insn.is_store() {
            if let Insn::Var { var, .. } = insn {
                live.remove(var);
            }
        } else if let Insn::Iinc { var, .. } = insn {
            live.insert(*var);
        }
        live
    }
}

pub(crate) fn live_variables(code: &Code) -> Result<AnalysisResults<BTreeSet<u16>>> {
    let cfg = build_cfg(code)?;
    Ok(solve(&LiveVariableAnalysis, code, &cfg))
}

/// Indices of reachable stores whose slot is not live afterwards.
pub(crate) fn dead_stores(code: &Code) -> Result<Vec<usize>> {
    let live = live_variables(code)?;
    let stores = code
        .instructions
        .iter()
        .enumerate()
        .filter_map(|(index, insn)| match insn {
            Insn::Var { var, .. } if insn.is_store() => {
                let after = live.in_value(index)?;
                (!after.contains(var)).then_some(index)
            }
            _ => None,
        })
        .collect();
    Ok(stores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insn::{delete_expression, is_pure};
    use crate::opcodes;
    use crate::test_support::{code, iconst, jump, label, op, var};

    #[test]
    fn store_overwritten_before_any_read_is_dead() {
        let body = code(vec![
            iconst(1),
            var(opcodes::ISTORE, 1),
            iconst(2),
            var(opcodes::ISTORE, 1),
            var(opcodes::ILOAD, 1),
            op(opcodes::IRETURN),
        ]);

        assert_eq!(dead_stores(&body).expect("analysis"), vec![1]);
    }

    #[test]
    fn reads_on_any_path_keep_a_store_alive() {
        let body = code(vec![
            iconst(1),
            var(opcodes::ISTORE, 1),
            var(opcodes::ILOAD, 0),
            jump(opcodes::IFEQ, 0),
            var(opcodes::ILOAD, 1),
            op(opcodes::IRETURN),
            label(0),
            iconst(0),
            op(opcodes::IRETURN),
        ]);

        assert!(dead_stores(&body).expect("analysis").is_empty());
        let live = live_variables(&body).expect("analysis");
        assert!(live.in_value(1).expect("live").contains(&1));
        assert!(!live.in_value(6).expect("live").contains(&1));
    }

    #[test]
    fn iinc_reads_its_local() {
        let body = code(vec![
            iconst(0),
            var(opcodes::ISTORE, 1),
            Insn::Iinc { var: 1, incr: 1 },
            op(opcodes::RETURN),
        ]);

        assert!(dead_stores(&body).expect("analysis").is_empty());
    }

    #[test]
    fn deleting_a_dead_store_leaves_the_slot_dead() {
        let mut body = code(vec![
            var(opcodes::ILOAD, 0),
            iconst(3),
            op(opcodes::IADD),
            var(opcodes::ISTORE, 1),
            iconst(2),
            var(opcodes::ISTORE, 1),
            var(opcodes::ILOAD, 1),
            op(opcodes::IRETURN),
        ]);
        let dead = dead_stores(&body).expect("analysis");
        assert_eq!(dead, vec![3]);

        assert!(delete_expression(&mut body.instructions, 3, is_pure));

        let live = live_variables(&body).expect("analysis");
        assert!(!live.out_value(0).expect("live").contains(&1));
        assert!(dead_stores(&body).expect("analysis").is_empty());
    }
}
