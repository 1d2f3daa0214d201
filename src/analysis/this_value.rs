use crate::analysis::frame::{Interpreter, Kind, Slot};
use crate::ir::Insn;
use crate::opcodes;

/// Tracks whether a value is the receiver of the method being analysed. The value is `true`
/// only for local 0 of an instance method and copies of it pushed by loads and stack shuffles.
pub(crate) struct ThisInterpreter;

impl Interpreter for ThisInterpreter {
    type Value = bool;

    fn new_value(&self, _kind: Kind) -> bool {
        false
    }

    fn new_parameter_value(&self, is_instance: bool, local: u16, _kind: Kind) -> bool {
        is_instance && local == 0
    }

    fn new_operation(&self, _index: usize, _insn: &Insn, _kind: Kind) -> bool {
        false
    }

    /// The receiver may flow from a local to the stack but not back.
    fn copy_operation(&self, _index: usize, insn: &Insn, value: &Slot<bool>) -> bool {
        insn.opcode() != Some(opcodes::ASTORE) && value.value
    }

    fn unary_operation(&self, _index: usize, _insn: &Insn, _value: &Slot<bool>, _result: Kind) -> bool {
        false
    }

    fn binary_operation(
        &self,
        _index: usize,
        _insn: &Insn,
        _left: &Slot<bool>,
        _right: &Slot<bool>,
        _result: Kind,
    ) -> bool {
        false
    }

    fn nary_operation(&self, _index: usize, _insn: &Insn, _values: &[Slot<bool>], _result: Kind) -> bool {
        false
    }

    fn merge(&self, left: &bool, right: &bool) -> bool {
        *left && *right
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::frame::analyze_frames;
    use crate::test_support::{code, field_insn, method, op, var};

    #[test]
    fn receiver_survives_loads_and_dup_but_not_stores() {
        let body = code(vec![
            var(opcodes::ALOAD, 0),
            op(opcodes::DUP),
            var(opcodes::ASTORE, 1),
            var(opcodes::ALOAD, 1),
            field_insn(opcodes::GETFIELD, "A", "next", "LA;"),
            op(opcodes::POP),
            op(opcodes::POP),
            op(opcodes::RETURN),
        ]);
        let method = method("<init>", "()V", 0, Some(body));

        let frames = analyze_frames(&ThisInterpreter, &method).expect("frames");

        let after_dup = frames.after(1).expect("frame");
        assert!(after_dup.stack.iter().all(|slot| slot.value));
        assert_eq!(frames.after(2).expect("frame").local(1).map(|slot| slot.value), Some(false));
        assert!(!frames.after(4).expect("frame").peek(0).expect("value").value);
    }
}
