//! Abstract interpreter over the operand stack and local variables.
//!
//! The interpreter strategy decides what a value is; [`FrameAnalysis`] only moves values between
//! slots the way the JVM does and runs as an ordinary forward data flow analysis whose value is a
//! frame, or `None` while the instruction has not been reached.

use std::cell::Cell;

use anyhow::{Context, Result};

use crate::analysis::dataflow::{AnalysisResults, DataFlowAnalysis, Direction, solve};
use crate::cfg::build_cfg;
use crate::descriptor::{MethodType, Type};
use crate::ir::{Constant, EdgeKind, Insn, MethodNode};
use crate::opcodes;

/// Computational type of a stack or local slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Kind {
    Int,
    Float,
    Long,
    Double,
    Reference,
    ReturnAddress,
}

impl Kind {
    pub(crate) fn size(self) -> usize {
        match self {
            Kind::Long | Kind::Double => 2,
            _ => 1,
        }
    }

    pub(crate) fn of(ty: &Type) -> Option<Kind> {
        match ty {
            Type::Void => None,
            Type::Long => Some(Kind::Long),
            Type::Double => Some(Kind::Double),
            Type::Float => Some(Kind::Float),
            Type::Object(_) | Type::Array(_) => Some(Kind::Reference),
            _ => Some(Kind::Int),
        }
    }

    fn of_desc(desc: &str) -> Option<Kind> {
        Type::parse(desc).ok().as_ref().and_then(Kind::of)
    }
}

/// A value together with its computational type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Slot<V> {
    pub(crate) kind: Kind,
    pub(crate) value: V,
}

/// Locals and operand stack at one program point.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Frame<V> {
    pub(crate) locals: Vec<Option<Slot<V>>>,
    pub(crate) stack: Vec<Slot<V>>,
}

impl<V: Clone> Frame<V> {
    pub(crate) fn local(&self, index: u16) -> Option<&Slot<V>> {
        self.locals.get(index as usize).and_then(Option::as_ref)
    }

    /// Stack entry `depth` values below the top (0 is the top).
    pub(crate) fn peek(&self, depth: usize) -> Option<&Slot<V>> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.stack.get(index))
    }

    fn pop(&mut self) -> Option<Slot<V>> {
        self.stack.pop()
    }

    fn pop_many(&mut self, count: usize) -> Option<Vec<Slot<V>>> {
        let start = self.stack.len().checked_sub(count)?;
        Some(self.stack.split_off(start))
    }

    fn push(&mut self, kind: Kind, value: V) {
        self.stack.push(Slot { kind, value });
    }

    fn set_local(&mut self, index: u16, slot: Slot<V>) {
        let index = index as usize;
        let needed = index + slot.kind.size();
        if self.locals.len() < needed {
            self.locals.resize(needed, None);
        }
        if index > 0
            && self.locals[index - 1]
                .as_ref()
                .is_some_and(|previous| previous.kind.size() == 2)
        {
            self.locals[index - 1] = None;
        }
        if slot.kind.size() == 2 {
            self.locals[index + 1] = None;
        }
        self.locals[index] = Some(slot);
    }
}

/// Value strategy plugged into [`FrameAnalysis`].
pub(crate) trait Interpreter {
    type Value: Clone + PartialEq;

    /// Value of unknown origin, e.g. a caught exception.
    fn new_value(&self, kind: Kind) -> Self::Value;

    /// Parameter in `local`; the receiver of an instance method is local 0.
    fn new_parameter_value(&self, is_instance: bool, local: u16, kind: Kind) -> Self::Value;

    /// Value produced from nothing on the stack: constants, `new`, `getstatic`.
    fn new_operation(&self, index: usize, insn: &Insn, kind: Kind) -> Self::Value;

    /// Loads, stores and stack shuffles.
    fn copy_operation(&self, index: usize, insn: &Insn, value: &Slot<Self::Value>) -> Self::Value;

    fn unary_operation(
        &self,
        index: usize,
        insn: &Insn,
        value: &Slot<Self::Value>,
        result: Kind,
    ) -> Self::Value;

    fn binary_operation(
        &self,
        index: usize,
        insn: &Insn,
        left: &Slot<Self::Value>,
        right: &Slot<Self::Value>,
        result: Kind,
    ) -> Self::Value;

    /// Calls and `multianewarray`.
    fn nary_operation(
        &self,
        index: usize,
        insn: &Insn,
        values: &[Slot<Self::Value>],
        result: Kind,
    ) -> Self::Value;

    fn merge(&self, left: &Self::Value, right: &Self::Value) -> Self::Value;
}

/// Forward analysis computing a frame before and after every reachable instruction.
pub(crate) struct FrameAnalysis<'a, I: Interpreter> {
    interpreter: &'a I,
    entry: Frame<I::Value>,
    malformed: Cell<Option<usize>>,
}

impl<'a, I: Interpreter> FrameAnalysis<'a, I> {
    fn new(interpreter: &'a I, method: &MethodNode, max_locals: u16) -> Result<Self> {
        let method_type = MethodType::parse(&method.desc)?;
        let mut entry = Frame {
            locals: vec![None; max_locals as usize],
            stack: Vec::new(),
        };
        let is_instance = !method.is_static();
        let mut local = 0u16;
        if is_instance {
            let value = interpreter.new_parameter_value(true, 0, Kind::Reference);
            entry.set_local(0, Slot {
                kind: Kind::Reference,
                value,
            });
            local = 1;
        }
        for argument in &method_type.arguments {
            let Some(kind) = Kind::of(argument) else {
                anyhow::bail!("void argument in {}", method.desc);
            };
            let value = interpreter.new_parameter_value(is_instance, local, kind);
            entry.set_local(local, Slot { kind, value });
            local += argument.size();
        }
        Ok(Self {
            interpreter,
            entry,
            malformed: Cell::new(None),
        })
    }

    fn merge_frames(&self, left: &Frame<I::Value>, right: &Frame<I::Value>) -> Frame<I::Value> {
        if left.stack.len() != right.stack.len() {
            self.malformed.set(Some(usize::MAX));
            return left.clone();
        }
        let len = left.locals.len().max(right.locals.len());
        let locals = (0..len)
            .map(|index| {
                match (
                    left.locals.get(index).and_then(Option::as_ref),
                    right.locals.get(index).and_then(Option::as_ref),
                ) {
                    (Some(a), Some(b)) if a.kind == b.kind => Some(Slot {
                        kind: a.kind,
                        value: self.interpreter.merge(&a.value, &b.value),
                    }),
                    _ => None,
                }
            })
            .collect();
        let stack = left
            .stack
            .iter()
            .zip(&right.stack)
            .map(|(a, b)| Slot {
                kind: a.kind,
                value: self.interpreter.merge(&a.value, &b.value),
            })
            .collect();
        Frame { locals, stack }
    }

    fn execute(&self, frame: &mut Frame<I::Value>, index: usize, insn: &Insn) -> Option<()> {
        let interpreter = self.interpreter;
        match insn {
            Insn::Label(_) => {}
            Insn::Simple(opcode) => self.execute_simple(frame, index, insn, *opcode)?,
            Insn::Int { opcode, .. } => {
                if *opcode == opcodes::NEWARRAY {
                    let length = frame.pop()?;
                    let value =
                        interpreter.unary_operation(index, insn, &length, Kind::Reference);
                    frame.push(Kind::Reference, value);
                } else {
                    let value = interpreter.new_operation(index, insn, Kind::Int);
                    frame.push(Kind::Int, value);
                }
            }
            Insn::Var { opcode, var } => match *opcode {
                opcodes::ILOAD..=opcodes::ALOAD => {
                    let local = frame.local(*var)?.clone();
                    let value = interpreter.copy_operation(index, insn, &local);
                    frame.push(local.kind, value);
                }
                opcodes::ISTORE..=opcodes::ASTORE => {
                    let stored = frame.pop()?;
                    let value = interpreter.copy_operation(index, insn, &stored);
                    frame.set_local(*var, Slot {
                        kind: stored.kind,
                        value,
                    });
                }
                _ => return None,
            },
            Insn::Iinc { var, .. } => {
                let local = frame.local(*var)?.clone();
                let value = interpreter.unary_operation(index, insn, &local, Kind::Int);
                frame.set_local(*var, Slot {
                    kind: Kind::Int,
                    value,
                });
            }
            Insn::Type { opcode, .. } => match *opcode {
                opcodes::NEW => {
                    let value = interpreter.new_operation(index, insn, Kind::Reference);
                    frame.push(Kind::Reference, value);
                }
                opcodes::INSTANCEOF => {
                    let operand = frame.pop()?;
                    let value = interpreter.unary_operation(index, insn, &operand, Kind::Int);
                    frame.push(Kind::Int, value);
                }
                _ => {
                    let operand = frame.pop()?;
                    let value =
                        interpreter.unary_operation(index, insn, &operand, Kind::Reference);
                    frame.push(Kind::Reference, value);
                }
            },
            Insn::Field { opcode, desc, .. } => {
                let kind = Kind::of_desc(desc)?;
                match *opcode {
                    opcodes::GETSTATIC => {
                        let value = interpreter.new_operation(index, insn, kind);
                        frame.push(kind, value);
                    }
                    opcodes::PUTSTATIC => {
                        frame.pop()?;
                    }
                    opcodes::GETFIELD => {
                        let receiver = frame.pop()?;
                        let value = interpreter.unary_operation(index, insn, &receiver, kind);
                        frame.push(kind, value);
                    }
                    _ => {
                        frame.pop_many(2)?;
                    }
                }
            }
            Insn::Method { opcode, desc, .. } => {
                let method_type = MethodType::parse(desc).ok()?;
                let receiver = usize::from(*opcode != opcodes::INVOKESTATIC);
                self.invoke(frame, index, insn, &method_type, receiver)?;
            }
            Insn::InvokeDynamic { desc, .. } => {
                let method_type = MethodType::parse(desc).ok()?;
                self.invoke(frame, index, insn, &method_type, 0)?;
            }
            Insn::Jump { opcode, .. } => match *opcode {
                opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => {
                    frame.pop()?;
                }
                opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => {
                    frame.pop_many(2)?;
                }
                opcodes::GOTO => {}
                _ => return None,
            },
            Insn::Ldc(constant) => {
                let kind = match constant {
                    Constant::Int(_) => Kind::Int,
                    Constant::Float(_) => Kind::Float,
                    Constant::Long(_) => Kind::Long,
                    Constant::Double(_) => Kind::Double,
                    _ => Kind::Reference,
                };
                let value = interpreter.new_operation(index, insn, kind);
                frame.push(kind, value);
            }
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => {
                frame.pop()?;
            }
            Insn::MultiANewArray { dims, .. } => {
                let values = frame.pop_many(*dims as usize)?;
                let value = interpreter.nary_operation(index, insn, &values, Kind::Reference);
                frame.push(Kind::Reference, value);
            }
        }
        Some(())
    }

    fn invoke(
        &self,
        frame: &mut Frame<I::Value>,
        index: usize,
        insn: &Insn,
        method_type: &MethodType,
        receiver: usize,
    ) -> Option<()> {
        let values = frame.pop_many(method_type.arguments.len() + receiver)?;
        if let Some(kind) = Kind::of(&method_type.return_type) {
            let value = self.interpreter.nary_operation(index, insn, &values, kind);
            frame.push(kind, value);
        }
        Some(())
    }

    fn execute_simple(
        &self,
        frame: &mut Frame<I::Value>,
        index: usize,
        insn: &Insn,
        opcode: u8,
    ) -> Option<()> {
        let interpreter = self.interpreter;
        let copy = |slot: &Slot<I::Value>| Slot {
            kind: slot.kind,
            value: interpreter.copy_operation(index, insn, slot),
        };
        match opcode {
            opcodes::NOP | opcodes::RETURN => {}
            opcodes::ACONST_NULL..=opcodes::DCONST_1 => {
                let kind = match opcode {
                    opcodes::ACONST_NULL => Kind::Reference,
                    opcodes::LCONST_0 | opcodes::LCONST_1 => Kind::Long,
                    opcodes::FCONST_0..=opcodes::FCONST_2 => Kind::Float,
                    opcodes::DCONST_0 | opcodes::DCONST_1 => Kind::Double,
                    _ => Kind::Int,
                };
                let value = interpreter.new_operation(index, insn, kind);
                frame.push(kind, value);
            }
            opcodes::IALOAD..=opcodes::SALOAD => {
                let kind = match opcode {
                    opcodes::LALOAD => Kind::Long,
                    opcodes::FALOAD => Kind::Float,
                    opcodes::DALOAD => Kind::Double,
                    opcodes::AALOAD => Kind::Reference,
                    _ => Kind::Int,
                };
                self.binary(frame, index, insn, kind)?;
            }
            opcodes::IASTORE..=opcodes::SASTORE => {
                frame.pop_many(3)?;
            }
            opcodes::POP => {
                frame.pop()?;
            }
            opcodes::POP2 => {
                if frame.pop()?.kind.size() == 1 {
                    frame.pop()?;
                }
            }
            opcodes::DUP => {
                let value = frame.pop()?;
                let duplicate = copy(&value);
                frame.stack.push(value);
                frame.stack.push(duplicate);
            }
            opcodes::DUP_X1 => {
                let first = frame.pop()?;
                let second = frame.pop()?;
                frame.stack.push(copy(&first));
                frame.stack.push(second);
                frame.stack.push(first);
            }
            opcodes::DUP_X2 => {
                let first = frame.pop()?;
                let second = frame.pop()?;
                if second.kind.size() == 1 {
                    let third = frame.pop()?;
                    frame.stack.push(copy(&first));
                    frame.stack.push(third);
                } else {
                    frame.stack.push(copy(&first));
                }
                frame.stack.push(second);
                frame.stack.push(first);
            }
            opcodes::DUP2 => {
                let first = frame.pop()?;
                if first.kind.size() == 1 {
                    let second = frame.pop()?;
                    let (copy_second, copy_first) = (copy(&second), copy(&first));
                    frame.stack.push(second);
                    frame.stack.push(first);
                    frame.stack.push(copy_second);
                    frame.stack.push(copy_first);
                } else {
                    let duplicate = copy(&first);
                    frame.stack.push(first);
                    frame.stack.push(duplicate);
                }
            }
            opcodes::DUP2_X1 => {
                let first = frame.pop()?;
                if first.kind.size() == 1 {
                    let second = frame.pop()?;
                    let third = frame.pop()?;
                    frame.stack.push(copy(&second));
                    frame.stack.push(copy(&first));
                    frame.stack.push(third);
                    frame.stack.push(second);
                } else {
                    let second = frame.pop()?;
                    frame.stack.push(copy(&first));
                    frame.stack.push(second);
                }
                frame.stack.push(first);
            }
            opcodes::DUP2_X2 => {
                let first = frame.pop()?;
                if first.kind.size() == 1 {
                    let second = frame.pop()?;
                    let third = frame.pop()?;
                    frame.stack.push(copy(&second));
                    frame.stack.push(copy(&first));
                    if third.kind.size() == 1 {
                        let fourth = frame.pop()?;
                        frame.stack.push(fourth);
                    }
                    frame.stack.push(third);
                    frame.stack.push(second);
                } else {
                    let second = frame.pop()?;
                    frame.stack.push(copy(&first));
                    if second.kind.size() == 1 {
                        let third = frame.pop()?;
                        frame.stack.push(third);
                    }
                    frame.stack.push(second);
                }
                frame.stack.push(first);
            }
            opcodes::SWAP => {
                let first = frame.pop()?;
                let second = frame.pop()?;
                frame.stack.push(copy(&first));
                frame.stack.push(copy(&second));
            }
            opcodes::IADD..=opcodes::DREM => {
                self.binary(frame, index, insn, arithmetic_kind(opcode - opcodes::IADD))?;
            }
            opcodes::INEG..=opcodes::DNEG => {
                self.unary(frame, index, insn, arithmetic_kind(opcode - opcodes::INEG))?;
            }
            opcodes::ISHL..=opcodes::LXOR => {
                let kind = if (opcode - opcodes::ISHL) % 2 == 0 {
                    Kind::Int
                } else {
                    Kind::Long
                };
                self.binary(frame, index, insn, kind)?;
            }
            opcodes::I2L..=opcodes::I2S => {
                let kind = match opcode {
                    opcodes::I2L | opcodes::F2L | opcodes::D2L => Kind::Long,
                    opcodes::I2F | opcodes::L2F | opcodes::D2F => Kind::Float,
                    opcodes::I2D | opcodes::L2D | opcodes::F2D => Kind::Double,
                    _ => Kind::Int,
                };
                self.unary(frame, index, insn, kind)?;
            }
            opcodes::LCMP..=opcodes::DCMPG => {
                self.binary(frame, index, insn, Kind::Int)?;
            }
            opcodes::IRETURN..=opcodes::ARETURN
            | opcodes::ATHROW
            | opcodes::MONITORENTER
            | opcodes::MONITOREXIT => {
                frame.pop()?;
            }
            opcodes::ARRAYLENGTH => {
                self.unary(frame, index, insn, Kind::Int)?;
            }
            _ => return None,
        }
        Some(())
    }

    fn unary(
        &self,
        frame: &mut Frame<I::Value>,
        index: usize,
        insn: &Insn,
        kind: Kind,
    ) -> Option<()> {
        let operand = frame.pop()?;
        let value = self.interpreter.unary_operation(index, insn, &operand, kind);
        frame.push(kind, value);
        Some(())
    }

    fn binary(
        &self,
        frame: &mut Frame<I::Value>,
        index: usize,
        insn: &Insn,
        kind: Kind,
    ) -> Option<()> {
        let right = frame.pop()?;
        let left = frame.pop()?;
        let value = self
            .interpreter
            .binary_operation(index, insn, &left, &right, kind);
        frame.push(kind, value);
        Some(())
    }
}

fn arithmetic_kind(relative: u8) -> Kind {
    match relative % 4 {
        0 => Kind::Int,
        1 => Kind::Long,
        2 => Kind::Float,
        _ => Kind::Double,
    }
}

impl<I: Interpreter> DataFlowAnalysis for FrameAnalysis<'_, I> {
    type Value = Option<Frame<I::Value>>;

    const DIRECTION: Direction = Direction::Forward;

    fn initial(&self) -> Self::Value {
        None
    }

    fn entry(&self) -> Self::Value {
        Some(self.entry.clone())
    }

    fn join(&self, left: &Self::Value, right: &Self::Value) -> Self::Value {
        match (left, right) {
            (Some(left), Some(right)) => Some(self.merge_frames(left, right)),
            (Some(frame), None) | (None, Some(frame)) => Some(frame.clone()),
            (None, None) => None,
        }
    }

    fn transfer(&self, value: &Self::Value, index: usize, insn: &Insn) -> Self::Value {
        let mut frame = value.clone()?;
        if self.execute(&mut frame, index, insn).is_none() {
            if self.malformed.get().is_none() {
                self.malformed.set(Some(index));
            }
            return None;
        }
        Some(frame)
    }

    fn flow(&self, kind: EdgeKind, source_in: &Self::Value, source_out: &Self::Value) -> Self::Value {
        if kind != EdgeKind::Exception {
            return source_out.clone();
        }
        source_in.as_ref().map(|frame| Frame {
            locals: frame.locals.clone(),
            stack: vec![Slot {
                kind: Kind::Reference,
                value: self.interpreter.new_value(Kind::Reference),
            }],
        })
    }
}

/// Frames before and after every reachable instruction of one method.
pub(crate) struct Frames<V> {
    results: AnalysisResults<Option<Frame<V>>>,
}

impl<V> Frames<V> {
    pub(crate) fn before(&self, index: usize) -> Option<&Frame<V>> {
        self.results.in_value(index).and_then(Option::as_ref)
    }

    pub(crate) fn after(&self, index: usize) -> Option<&Frame<V>> {
        self.results.out_value(index).and_then(Option::as_ref)
    }
}

/// Interprets `method` with `interpreter`. Methods the interpreter cannot model (subroutines,
/// inconsistent stacks, unknown opcodes) are reported as errors so callers can skip them.
pub(crate) fn analyze_frames<I: Interpreter>(
    interpreter: &I,
    method: &MethodNode,
) -> Result<Frames<I::Value>> {
    let code = method
        .code
        .as_ref()
        .with_context(|| format!("{}{} has no code", method.name, method.desc))?;
    if code.has_subroutines() {
        anyhow::bail!("{}{} uses jsr/ret subroutines", method.name, method.desc);
    }
    let cfg = build_cfg(code)?;
    let analysis = FrameAnalysis::new(interpreter, method, code.max_locals)?;
    let results = solve(&analysis, code, &cfg);
    if let Some(index) = analysis.malformed.get() {
        anyhow::bail!(
            "cannot interpret {}{} at instruction {}",
            method.name,
            method.desc,
            index
        );
    }
    Ok(Frames { results })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_STATIC, LabelId, TryCatch};
    use crate::test_support::{code, code_with_handlers, iconst, label, method, op, var};

    /// Tracks the index of the instruction that last produced or copied each value.
    struct Origin;

    impl Interpreter for Origin {
        type Value = Option<usize>;

        fn new_value(&self, _kind: Kind) -> Option<usize> {
            None
        }

        fn new_parameter_value(&self, _is_instance: bool, _local: u16, _kind: Kind) -> Option<usize> {
            None
        }

        fn new_operation(&self, index: usize, _insn: &Insn, _kind: Kind) -> Option<usize> {
            Some(index)
        }

        fn copy_operation(&self, _index: usize, _insn: &Insn, value: &Slot<Option<usize>>) -> Option<usize> {
            value.value
        }

        fn unary_operation(
            &self,
            index: usize,
            _insn: &Insn,
            _value: &Slot<Option<usize>>,
            _result: Kind,
        ) -> Option<usize> {
            Some(index)
        }

        fn binary_operation(
            &self,
            index: usize,
            _insn: &Insn,
            _left: &Slot<Option<usize>>,
            _right: &Slot<Option<usize>>,
            _result: Kind,
        ) -> Option<usize> {
            Some(index)
        }

        fn nary_operation(
            &self,
            index: usize,
            _insn: &Insn,
            _values: &[Slot<Option<usize>>],
            _result: Kind,
        ) -> Option<usize> {
            Some(index)
        }

        fn merge(&self, left: &Option<usize>, right: &Option<usize>) -> Option<usize> {
            if left == right { *left } else { None }
        }
    }

    #[test]
    fn wide_values_take_two_local_slots() {
        let body = code(vec![
            op(opcodes::LCONST_1),
            var(opcodes::LSTORE, 1),
            iconst(2),
            var(opcodes::ISTORE, 2),
            op(opcodes::RETURN),
        ]);
        let method = method("m", "(I)V", ACC_STATIC, Some(body));

        let frames = analyze_frames(&Origin, &method).expect("frames");

        let after_long = frames.after(1).expect("frame");
        assert_eq!(after_long.local(1).map(|slot| slot.kind), Some(Kind::Long));
        assert!(after_long.local(2).is_none());
        let after_int = frames.after(3).expect("frame");
        assert!(after_int.local(1).is_none());
        assert_eq!(after_int.local(2).map(|slot| slot.value), Some(Some(2)));
    }

    #[test]
    fn parameters_fill_locals_in_descriptor_order() {
        let body = code(vec![op(opcodes::RETURN)]);
        let method = method("m", "(JLjava/lang/String;)V", 0, Some(body));

        let frames = analyze_frames(&Origin, &method).expect("frames");
        let entry = frames.before(0).expect("frame");

        assert_eq!(entry.local(0).map(|slot| slot.kind), Some(Kind::Reference));
        assert_eq!(entry.local(1).map(|slot| slot.kind), Some(Kind::Long));
        assert_eq!(entry.local(3).map(|slot| slot.kind), Some(Kind::Reference));
    }

    #[test]
    fn dup_x1_and_swap_shuffle_values() {
        let body = code(vec![
            iconst(1),
            iconst(2),
            op(opcodes::DUP_X1),
            op(opcodes::SWAP),
            op(opcodes::POP2),
            op(opcodes::POP),
            op(opcodes::RETURN),
        ]);
        let method = method("m", "()V", ACC_STATIC, Some(body));

        let frames = analyze_frames(&Origin, &method).expect("frames");

        let values = |index: usize| -> Vec<Option<usize>> {
            frames
                .after(index)
                .expect("frame")
                .stack
                .iter()
                .map(|slot| slot.value)
                .collect()
        };
        assert_eq!(values(2), vec![Some(1), Some(0), Some(1)]);
        assert_eq!(values(3), vec![Some(1), Some(1), Some(0)]);
        assert!(frames.after(5).expect("frame").stack.is_empty());
    }

    #[test]
    fn handler_sees_locals_before_the_throwing_instruction() {
        let body = code_with_handlers(
            vec![
                iconst(1),
                var(opcodes::ISTORE, 0),
                label(0),
                iconst(5),
                var(opcodes::ISTORE, 0),
                op(opcodes::RETURN),
                label(1),
                label(2),
                op(opcodes::POP),
                op(opcodes::RETURN),
            ],
            vec![TryCatch {
                start: LabelId(0),
                end: LabelId(1),
                handler: LabelId(2),
                catch_type: None,
            }],
        );
        let method = method("m", "()V", ACC_STATIC, Some(body));

        let frames = analyze_frames(&Origin, &method).expect("frames");
        let handler = frames.before(7).expect("frame");

        assert_eq!(handler.stack.len(), 1);
        assert_eq!(handler.stack[0].kind, Kind::Reference);
        // Local 0 holds either the first or the second constant.
        assert_eq!(handler.local(0).map(|slot| slot.value), Some(None));
    }

    #[test]
    fn stack_underflow_is_reported() {
        let body = code(vec![op(opcodes::POP), op(opcodes::RETURN)]);
        let method = method("m", "()V", ACC_STATIC, Some(body));

        assert!(analyze_frames(&Origin, &method).is_err());
    }
}
