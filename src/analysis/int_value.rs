use std::collections::BTreeSet;

use crate::analysis::frame::{Interpreter, Kind, Slot};
use crate::insn::int_constant;
use crate::ir::Insn;
use crate::opcodes;

/// Largest number of distinct values tracked before a set collapses to unknown.
const MAX_TRACKED_VALUES: usize = 1;

/// Possible values of an int, or unknown.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum IntValueSet {
    Unknown,
    Constant(BTreeSet<i32>),
}

impl IntValueSet {
    pub(crate) fn of(value: i32) -> Self {
        IntValueSet::Constant(BTreeSet::from([value]))
    }

    pub(crate) fn singleton(&self) -> Option<i32> {
        match self {
            IntValueSet::Constant(values) if values.len() == 1 => values.first().copied(),
            _ => None,
        }
    }

    pub(crate) fn union(&self, other: &IntValueSet) -> IntValueSet {
        match (self, other) {
            (IntValueSet::Constant(left), IntValueSet::Constant(right)) => {
                let values: BTreeSet<i32> = left.union(right).copied().collect();
                if values.len() > MAX_TRACKED_VALUES {
                    IntValueSet::Unknown
                } else {
                    IntValueSet::Constant(values)
                }
            }
            _ => IntValueSet::Unknown,
        }
    }

    fn map(&self, mut f: impl FnMut(i32) -> Option<i32>) -> IntValueSet {
        let IntValueSet::Constant(values) = self else {
            return IntValueSet::Unknown;
        };
        let mut mapped = BTreeSet::new();
        for value in values {
            match f(*value) {
                Some(result) => {
                    mapped.insert(result);
                }
                None => return IntValueSet::Unknown,
            }
        }
        IntValueSet::Constant(mapped)
    }
}

/// Propagates small sets of known int values, seeded with known parameter values.
#[derive(Debug, Default)]
pub(crate) struct IntInterpreter {
    /// Indexed by argument slot, excluding the receiver.
    parameters: Vec<IntValueSet>,
}

impl IntInterpreter {
    pub(crate) fn new(parameters: Vec<IntValueSet>) -> Self {
        Self { parameters }
    }
}

impl Interpreter for IntInterpreter {
    type Value = IntValueSet;

    fn new_value(&self, _kind: Kind) -> IntValueSet {
        IntValueSet::Unknown
    }

    fn new_parameter_value(&self, is_instance: bool, local: u16, _kind: Kind) -> IntValueSet {
        let slot = match (is_instance, local) {
            (true, 0) => return IntValueSet::Unknown,
            (true, local) => local - 1,
            (false, local) => local,
        };
        self.parameters
            .get(slot as usize)
            .cloned()
            .unwrap_or(IntValueSet::Unknown)
    }

    fn new_operation(&self, _index: usize, insn: &Insn, _kind: Kind) -> IntValueSet {
        int_constant(insn).map_or(IntValueSet::Unknown, IntValueSet::of)
    }

    fn copy_operation(&self, _index: usize, _insn: &Insn, value: &Slot<IntValueSet>) -> IntValueSet {
        value.value.clone()
    }

    fn unary_operation(
        &self,
        _index: usize,
        insn: &Insn,
        value: &Slot<IntValueSet>,
        _result: Kind,
    ) -> IntValueSet {
        match insn {
            Insn::Iinc { incr, .. } => value
                .value
                .map(|v| Some(v.wrapping_add(i32::from(*incr)))),
            Insn::Simple(opcodes::INEG) => value.value.map(|v| Some(v.wrapping_neg())),
            Insn::Simple(opcodes::I2B) => value.value.map(|v| Some(i32::from(v as i8))),
            Insn::Simple(opcodes::I2C) => value.value.map(|v| Some(i32::from(v as u16))),
            Insn::Simple(opcodes::I2S) => value.value.map(|v| Some(i32::from(v as i16))),
            _ => IntValueSet::Unknown,
        }
    }

    fn binary_operation(
        &self,
        _index: usize,
        insn: &Insn,
        left: &Slot<IntValueSet>,
        right: &Slot<IntValueSet>,
        _result: Kind,
    ) -> IntValueSet {
        let (IntValueSet::Constant(lefts), IntValueSet::Constant(rights)) =
            (&left.value, &right.value)
        else {
            return IntValueSet::Unknown;
        };
        let Some(opcode) = insn.opcode() else {
            return IntValueSet::Unknown;
        };
        let mut values = BTreeSet::new();
        for v1 in lefts {
            for v2 in rights {
                match evaluate(opcode, *v1, *v2) {
                    Some(result) => {
                        values.insert(result);
                    }
                    None => return IntValueSet::Unknown,
                }
            }
        }
        IntValueSet::Constant(values)
    }

    fn nary_operation(
        &self,
        _index: usize,
        _insn: &Insn,
        _values: &[Slot<IntValueSet>],
        _result: Kind,
    ) -> IntValueSet {
        IntValueSet::Unknown
    }

    fn merge(&self, left: &IntValueSet, right: &IntValueSet) -> IntValueSet {
        if left == right {
            left.clone()
        } else {
            left.union(right)
        }
    }
}

fn evaluate(opcode: u8, v1: i32, v2: i32) -> Option<i32> {
    let result = match opcode {
        opcodes::IADD => v1.wrapping_add(v2),
        opcodes::ISUB => v1.wrapping_sub(v2),
        opcodes::IMUL => v1.wrapping_mul(v2),
        opcodes::IDIV if v2 != 0 => v1.wrapping_div(v2),
        opcodes::IREM if v2 != 0 => v1.wrapping_rem(v2),
        opcodes::ISHL => v1.wrapping_shl(v2 as u32),
        opcodes::ISHR => v1.wrapping_shr(v2 as u32),
        opcodes::IUSHR => (v1 as u32).wrapping_shr(v2 as u32) as i32,
        opcodes::IAND => v1 & v2,
        opcodes::IOR => v1 | v2,
        opcodes::IXOR => v1 ^ v2,
        _ => return None,
    };
    Some(result)
}

/// Outcome of a conditional branch over every combination of known operand values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum IntBranchResult {
    AlwaysTaken,
    NeverTaken,
    Unknown,
}

impl IntBranchResult {
    fn from_counts(taken: usize, not_taken: usize) -> Self {
        match (taken, not_taken) {
            (0, 0) => IntBranchResult::Unknown,
            (_, 0) => IntBranchResult::AlwaysTaken,
            (0, _) => IntBranchResult::NeverTaken,
            _ => IntBranchResult::Unknown,
        }
    }
}

/// Evaluates `ifeq`..`ifle` against every value in `values`.
pub(crate) fn evaluate_unary(opcode: u8, values: &BTreeSet<i32>) -> IntBranchResult {
    let mut taken = 0;
    let mut not_taken = 0;
    for value in values {
        let outcome = match opcode {
            opcodes::IFEQ => *value == 0,
            opcodes::IFNE => *value != 0,
            opcodes::IFLT => *value < 0,
            opcodes::IFGE => *value >= 0,
            opcodes::IFGT => *value > 0,
            opcodes::IFLE => *value <= 0,
            _ => return IntBranchResult::Unknown,
        };
        if outcome {
            taken += 1;
        } else {
            not_taken += 1;
        }
    }
    IntBranchResult::from_counts(taken, not_taken)
}

/// Evaluates `if_icmpeq`..`if_icmple` against every pair of values.
pub(crate) fn evaluate_binary(
    opcode: u8,
    lefts: &BTreeSet<i32>,
    rights: &BTreeSet<i32>,
) -> IntBranchResult {
    let mut taken = 0;
    let mut not_taken = 0;
    for left in lefts {
        for right in rights {
            let outcome = match opcode {
                opcodes::IF_ICMPEQ => left == right,
                opcodes::IF_ICMPNE => left != right,
                opcodes::IF_ICMPLT => left < right,
                opcodes::IF_ICMPGE => left >= right,
                opcodes::IF_ICMPGT => left > right,
                opcodes::IF_ICMPLE => left <= right,
                _ => return IntBranchResult::Unknown,
            };
            if outcome {
                taken += 1;
            } else {
                not_taken += 1;
            }
        }
    }
    IntBranchResult::from_counts(taken, not_taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::frame::analyze_frames;
    use crate::ir::ACC_STATIC;
    use crate::test_support::{code, iconst, jump, label, method, op, var};

    fn stack_top(interpreter: &IntInterpreter, body: Vec<Insn>, desc: &str, at: usize) -> IntValueSet {
        let method = method("m", desc, ACC_STATIC, Some(code(body)));
        let frames = analyze_frames(interpreter, &method).expect("frames");
        let frame = frames.before(at).expect("frame");
        frame.peek(0).expect("value").value.clone()
    }

    #[test]
    fn arithmetic_on_known_values_is_exact() {
        let body = vec![
            iconst(6),
            iconst(7),
            op(opcodes::IMUL),
            op(opcodes::I2B),
            op(opcodes::POP),
            op(opcodes::RETURN),
        ];

        let value = stack_top(&IntInterpreter::default(), body, "()V", 4);

        assert_eq!(value, IntValueSet::of(42));
    }

    #[test]
    fn division_by_zero_is_unknown() {
        let body = vec![
            iconst(1),
            iconst(0),
            op(opcodes::IDIV),
            op(opcodes::POP),
            op(opcodes::RETURN),
        ];

        let value = stack_top(&IntInterpreter::default(), body, "()V", 3);

        assert_eq!(value, IntValueSet::Unknown);
    }

    #[test]
    fn parameters_seed_known_values_and_iinc_updates_them() {
        let body = vec![
            Insn::Iinc { var: 1, incr: 2 },
            var(opcodes::ILOAD, 1),
            op(opcodes::POP),
            op(opcodes::RETURN),
        ];
        let interpreter = IntInterpreter::new(vec![IntValueSet::Unknown, IntValueSet::of(5)]);

        let value = stack_top(&interpreter, body, "(II)V", 2);

        assert_eq!(value, IntValueSet::of(7));
    }

    #[test]
    fn second_distinct_value_collapses_to_unknown() {
        let body = vec![
            var(opcodes::ILOAD, 0),
            jump(opcodes::IFEQ, 0),
            iconst(1),
            jump(opcodes::GOTO, 1),
            label(0),
            iconst(2),
            label(1),
            op(opcodes::POP),
            op(opcodes::RETURN),
        ];

        let value = stack_top(&IntInterpreter::default(), body, "(I)V", 7);

        assert_eq!(value, IntValueSet::Unknown);
    }

    #[test]
    fn branches_evaluate_over_all_values() {
        let zero = BTreeSet::from([0]);
        let three = BTreeSet::from([3]);

        assert_eq!(
            evaluate_unary(opcodes::IFEQ, &zero),
            IntBranchResult::AlwaysTaken
        );
        assert_eq!(
            evaluate_unary(opcodes::IFLT, &three),
            IntBranchResult::NeverTaken
        );
        assert_eq!(
            evaluate_binary(opcodes::IF_ICMPGE, &three, &zero),
            IntBranchResult::AlwaysTaken
        );
        assert_eq!(
            evaluate_unary(opcodes::IFEQ, &BTreeSet::from([0, 1])),
            IntBranchResult::Unknown
        );
    }
}
