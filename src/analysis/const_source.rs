use crate::analysis::frame::{Interpreter, Kind, Slot};
use crate::insn::int_constant;
use crate::ir::Insn;

/// Where a stack or local value came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ConstSource {
    Unknown,
    /// A method parameter, possibly merged with other values.
    Arg,
    /// Pushed by the integer constant instruction at this index and not copied since.
    Insn(usize),
}

/// Tracks integer constants that flow unchanged into their consumer. Copies lose the source, so
/// a constant stored to a local and reloaded is `Unknown`.
pub(crate) struct ConstSourceInterpreter;

impl Interpreter for ConstSourceInterpreter {
    type Value = ConstSource;

    fn new_value(&self, _kind: Kind) -> ConstSource {
        ConstSource::Unknown
    }

    fn new_parameter_value(&self, _is_instance: bool, _local: u16, _kind: Kind) -> ConstSource {
        ConstSource::Arg
    }

    fn new_operation(&self, index: usize, insn: &Insn, _kind: Kind) -> ConstSource {
        if int_constant(insn).is_some() {
            ConstSource::Insn(index)
        } else {
            ConstSource::Unknown
        }
    }

    fn copy_operation(&self, _index: usize, _insn: &Insn, _value: &Slot<ConstSource>) -> ConstSource {
        ConstSource::Unknown
    }

    fn unary_operation(
        &self,
        _index: usize,
        _insn: &Insn,
        _value: &Slot<ConstSource>,
        _result: Kind,
    ) -> ConstSource {
        ConstSource::Unknown
    }

    fn binary_operation(
        &self,
        _index: usize,
        _insn: &Insn,
        _left: &Slot<ConstSource>,
        _right: &Slot<ConstSource>,
        _result: Kind,
    ) -> ConstSource {
        ConstSource::Unknown
    }

    fn nary_operation(
        &self,
        _index: usize,
        _insn: &Insn,
        _values: &[Slot<ConstSource>],
        _result: Kind,
    ) -> ConstSource {
        ConstSource::Unknown
    }

    fn merge(&self, left: &ConstSource, right: &ConstSource) -> ConstSource {
        match (left, right) {
            (ConstSource::Arg, _) | (_, ConstSource::Arg) => ConstSource::Arg,
            _ if left == right => *left,
            _ => ConstSource::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::frame::analyze_frames;
    use crate::ir::ACC_STATIC;
    use crate::opcodes;
    use crate::test_support::{code, iconst, invoke, jump, label, method, op, var};

    #[test]
    fn literal_arguments_keep_their_source() {
        let body = code(vec![
            iconst(3),
            var(opcodes::ILOAD, 0),
            invoke(opcodes::INVOKESTATIC, "A", "f", "(II)V"),
            op(opcodes::RETURN),
        ]);
        let method = method("m", "(I)V", ACC_STATIC, Some(body));

        let frames = analyze_frames(&ConstSourceInterpreter, &method).expect("frames");
        let call = frames.before(2).expect("frame");

        assert_eq!(call.stack[0].value, ConstSource::Insn(0));
        assert_eq!(call.stack[1].value, ConstSource::Unknown);
        assert_eq!(call.local(0).map(|slot| slot.value), Some(ConstSource::Arg));
    }

    #[test]
    fn different_sources_merge_to_unknown() {
        let body = code(vec![
            var(opcodes::ILOAD, 0),
            jump(opcodes::IFEQ, 0),
            iconst(1),
            jump(opcodes::GOTO, 1),
            label(0),
            iconst(2),
            label(1),
            op(opcodes::POP),
            op(opcodes::RETURN),
        ]);
        let method = method("m", "(I)V", ACC_STATIC, Some(body));

        let frames = analyze_frames(&ConstSourceInterpreter, &method).expect("frames");

        assert_eq!(
            frames.before(7).expect("frame").stack[0].value,
            ConstSource::Unknown
        );
    }

    #[test]
    fn arguments_dominate_merges() {
        let interpreter = ConstSourceInterpreter;

        assert_eq!(
            interpreter.merge(&ConstSource::Insn(4), &ConstSource::Arg),
            ConstSource::Arg
        );
        assert_eq!(
            interpreter.merge(&ConstSource::Insn(4), &ConstSource::Insn(4)),
            ConstSource::Insn(4)
        );
    }
}
