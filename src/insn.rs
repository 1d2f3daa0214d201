//! Instruction-list helpers shared by the passes: stack effects, purity, expression slicing and
//! body rewrites that keep labels and handlers consistent.

use std::ops::Range;

use anyhow::{Context, Result};

use crate::cfg::build_cfg;
use crate::descriptor::{MethodType, Type};
use crate::ir::{Constant, Insn, MethodNode};
use crate::opcodes;

/// Operand stack effect of one instruction, in slots.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct StackMetadata {
    pub(crate) pops: i32,
    pub(crate) pushes: i32,
}

const fn effect(pops: i32, pushes: i32) -> Option<StackMetadata> {
    Some(StackMetadata { pops, pushes })
}

/// Stack effect of `insn`, or `None` for instructions whose effect depends on the stack shape
/// (`jsr`) or on a malformed descriptor.
pub(crate) fn stack_metadata(insn: &Insn) -> Option<StackMetadata> {
    match insn {
        Insn::Label(_) | Insn::Iinc { .. } => effect(0, 0),
        Insn::Simple(opcode) => simple_metadata(*opcode),
        Insn::Int { .. } => match insn.opcode() {
            Some(opcodes::NEWARRAY) => effect(1, 1),
            _ => effect(0, 1),
        },
        Insn::Var { opcode, .. } => match *opcode {
            opcodes::LLOAD | opcodes::DLOAD => effect(0, 2),
            opcodes::ILOAD | opcodes::FLOAD | opcodes::ALOAD => effect(0, 1),
            opcodes::LSTORE | opcodes::DSTORE => effect(2, 0),
            opcodes::ISTORE | opcodes::FSTORE | opcodes::ASTORE => effect(1, 0),
            opcodes::RET => effect(0, 0),
            _ => None,
        },
        Insn::Type { opcode, .. } => match *opcode {
            opcodes::NEW => effect(0, 1),
            _ => effect(1, 1),
        },
        Insn::Field { opcode, desc, .. } => {
            let size = i32::from(Type::parse(desc).ok()?.size());
            let receiver = i32::from(matches!(*opcode, opcodes::GETFIELD | opcodes::PUTFIELD));
            match *opcode {
                opcodes::PUTFIELD | opcodes::PUTSTATIC => effect(receiver + size, 0),
                _ => effect(receiver, size),
            }
        }
        Insn::Method { opcode, desc, .. } => {
            let method_type = MethodType::parse(desc).ok()?;
            let receiver = i32::from(*opcode != opcodes::INVOKESTATIC);
            effect(
                receiver + i32::from(method_type.arguments_size()),
                i32::from(method_type.return_type.size()),
            )
        }
        Insn::InvokeDynamic { desc, .. } => {
            let method_type = MethodType::parse(desc).ok()?;
            effect(
                i32::from(method_type.arguments_size()),
                i32::from(method_type.return_type.size()),
            )
        }
        Insn::Jump { opcode, .. } => match *opcode {
            opcodes::GOTO => effect(0, 0),
            opcodes::JSR => effect(0, 1),
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => effect(2, 0),
            _ => effect(1, 0),
        },
        Insn::Ldc(Constant::Long(_) | Constant::Double(_)) => effect(0, 2),
        Insn::Ldc(_) => effect(0, 1),
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => effect(1, 0),
        Insn::MultiANewArray { dims, .. } => effect(i32::from(*dims), 1),
    }
}

fn simple_metadata(opcode: u8) -> Option<StackMetadata> {
    match opcode {
        opcodes::NOP | opcodes::RETURN => effect(0, 0),
        opcodes::ACONST_NULL..=opcodes::ICONST_5
        | opcodes::FCONST_0..=opcodes::FCONST_2 => effect(0, 1),
        opcodes::LCONST_0 | opcodes::LCONST_1 | opcodes::DCONST_0 | opcodes::DCONST_1 => {
            effect(0, 2)
        }
        opcodes::LALOAD | opcodes::DALOAD => effect(2, 2),
        opcodes::IALOAD..=opcodes::SALOAD => effect(2, 1),
        opcodes::LASTORE | opcodes::DASTORE => effect(4, 0),
        opcodes::IASTORE..=opcodes::SASTORE => effect(3, 0),
        opcodes::POP => effect(1, 0),
        opcodes::POP2 => effect(2, 0),
        opcodes::DUP => effect(1, 2),
        opcodes::DUP_X1 => effect(2, 3),
        opcodes::DUP_X2 => effect(3, 4),
        opcodes::DUP2 => effect(2, 4),
        opcodes::DUP2_X1 => effect(3, 5),
        opcodes::DUP2_X2 => effect(4, 6),
        opcodes::SWAP => effect(2, 2),
        opcodes::IADD..=opcodes::DREM => {
            if (opcode - opcodes::IADD) % 2 == 0 {
                effect(2, 1)
            } else {
                effect(4, 2)
            }
        }
        opcodes::INEG | opcodes::FNEG => effect(1, 1),
        opcodes::LNEG | opcodes::DNEG => effect(2, 2),
        opcodes::LSHL | opcodes::LSHR | opcodes::LUSHR => effect(3, 2),
        opcodes::ISHL..=opcodes::LXOR => {
            if (opcode - opcodes::ISHL) % 2 == 0 {
                effect(2, 1)
            } else {
                effect(4, 2)
            }
        }
        opcodes::I2L | opcodes::I2D | opcodes::F2L | opcodes::F2D => effect(1, 2),
        opcodes::I2F | opcodes::F2I | opcodes::I2B | opcodes::I2C | opcodes::I2S => effect(1, 1),
        opcodes::L2I | opcodes::L2F | opcodes::D2I | opcodes::D2F => effect(2, 1),
        opcodes::L2D | opcodes::D2L => effect(2, 2),
        opcodes::LCMP | opcodes::DCMPL | opcodes::DCMPG => effect(4, 1),
        opcodes::FCMPL | opcodes::FCMPG => effect(2, 1),
        opcodes::LRETURN | opcodes::DRETURN => effect(2, 0),
        opcodes::IRETURN | opcodes::FRETURN | opcodes::ARETURN => effect(1, 0),
        opcodes::ARRAYLENGTH => effect(1, 1),
        opcodes::ATHROW | opcodes::MONITORENTER | opcodes::MONITOREXIT => effect(1, 0),
        _ => None,
    }
}

/// True for instructions without side effects. Division and remainder count as pure: the
/// obfuscated code never relies on their divide-by-zero exception.
pub(crate) fn is_pure(insn: &Insn) -> bool {
    match insn {
        Insn::Label(_) | Insn::Ldc(_) => true,
        Insn::Int { opcode, .. } => *opcode != opcodes::NEWARRAY,
        Insn::Var { opcode, .. } => (opcodes::ILOAD..=opcodes::ALOAD).contains(opcode),
        Insn::Type { opcode, .. } => matches!(*opcode, opcodes::NEW | opcodes::INSTANCEOF),
        Insn::Field { opcode, .. } => *opcode == opcodes::GETSTATIC,
        Insn::Simple(opcode) => matches!(
            *opcode,
            opcodes::NOP..=opcodes::DCONST_1
                | opcodes::POP..=opcodes::SWAP
                | opcodes::IADD..=opcodes::LXOR
                | opcodes::I2L..=opcodes::DCMPG
        ),
        _ => false,
    }
}

/// True when control always continues with the next instruction.
pub(crate) fn is_sequential(insn: &Insn) -> bool {
    match insn {
        Insn::Label(_)
        | Insn::Jump { .. }
        | Insn::TableSwitch { .. }
        | Insn::LookupSwitch { .. } => false,
        _ => !crate::cfg::is_exit(insn),
    }
}

/// Value pushed by an integer constant instruction.
pub(crate) fn int_constant(insn: &Insn) -> Option<i32> {
    match insn {
        Insn::Int {
            opcode: opcodes::BIPUSH | opcodes::SIPUSH,
            operand,
        } => Some(*operand),
        Insn::Ldc(Constant::Int(value)) => Some(*value),
        Insn::Simple(opcode @ opcodes::ICONST_M1..=opcodes::ICONST_5) => {
            Some(i32::from(*opcode) - i32::from(opcodes::ICONST_0))
        }
        _ => None,
    }
}

/// Range of straight-line instructions ending at `last` that produce the operands `last`
/// consumes (or, with a non-zero `initial_height`, that produce that many slots ending at
/// `last`). Every instruction before `last` must pass `filter`.
pub(crate) fn get_expression(
    instructions: &[Insn],
    last: usize,
    filter: impl Fn(&Insn) -> bool,
    initial_height: i32,
) -> Option<Range<usize>> {
    let mut height = initial_height;
    let mut index = last;
    loop {
        let metadata = stack_metadata(instructions.get(index)?)?;
        if index != last || initial_height != 0 {
            height -= metadata.pushes;
        }
        height += metadata.pops;
        if height == 0 {
            return Some(index..last + 1);
        }
        index = index.checked_sub(1)?;
        let previous = &instructions[index];
        if !is_sequential(previous) || !filter(previous) {
            return None;
        }
    }
}

/// Expressions producing each argument of the call at `invoke`, in argument order.
pub(crate) fn argument_expressions(
    instructions: &[Insn],
    invoke: usize,
    filter: impl Fn(&Insn) -> bool,
) -> Option<Vec<Range<usize>>> {
    let desc = match instructions.get(invoke)? {
        Insn::Method { desc, .. } | Insn::InvokeDynamic { desc, .. } => desc,
        _ => return None,
    };
    let method_type = MethodType::parse(desc).ok()?;
    let mut expressions = Vec::new();
    let mut end = invoke;
    for argument in method_type.arguments.iter().rev() {
        let last = end.checked_sub(1)?;
        let expression = get_expression(instructions, last, &filter, i32::from(argument.size()))?;
        end = expression.start;
        expressions.push(expression);
    }
    expressions.reverse();
    Some(expressions)
}

/// Deletes `last` together with the expression feeding it.
pub(crate) fn delete_expression(
    instructions: &mut Vec<Insn>,
    last: usize,
    filter: impl Fn(&Insn) -> bool,
) -> bool {
    let Some(expression) = get_expression(instructions, last, filter, 0) else {
        return false;
    };
    instructions.drain(expression);
    true
}

/// Replaces `last` and the expression feeding it with `replacement`.
pub(crate) fn replace_expression(
    instructions: &mut Vec<Insn>,
    last: usize,
    replacement: Insn,
    filter: impl Fn(&Insn) -> bool,
) -> bool {
    let Some(expression) = get_expression(instructions, last, filter, 0) else {
        return false;
    };
    instructions.splice(expression, [replacement]);
    true
}

/// Local variable index of argument `argument` in a method with `method_type`.
pub(crate) fn argument_local(is_static: bool, method_type: &MethodType, argument: usize) -> u16 {
    let receiver = u16::from(!is_static);
    receiver
        + method_type
            .arguments
            .iter()
            .take(argument)
            .map(Type::size)
            .sum::<u16>()
}

/// Drops argument `argument` from the descriptor and renumbers locals. The removed slot becomes
/// the highest local; `max_locals` shrinks only if nothing still uses it.
pub(crate) fn remove_argument(method: &mut MethodNode, argument: usize) -> Result<()> {
    let mut method_type = MethodType::parse(&method.desc)?;
    if argument >= method_type.arguments.len() {
        anyhow::bail!(
            "{}{} has no argument {}",
            method.name,
            method.desc,
            argument
        );
    }
    let local = argument_local(method.is_static(), &method_type, argument);
    let removed = method_type.arguments.remove(argument);
    let size = removed.size();
    method.desc = method_type.descriptor();

    let Some(code) = method.code.as_mut() else {
        return Ok(());
    };
    let new_local = code
        .max_locals
        .checked_sub(size)
        .with_context(|| format!("max_locals too small in {}", method.name))?;
    let remap = |var: u16| -> u16 {
        if var > local {
            var - size
        } else if var == local {
            new_local
        } else {
            var
        }
    };

    let mut new_local_used = false;
    for insn in &mut code.instructions {
        let var = match insn {
            Insn::Var { var, .. } | Insn::Iinc { var, .. } => var,
            _ => continue,
        };
        *var = remap(*var);
        if *var == new_local {
            new_local_used = true;
        }
    }
    if !new_local_used {
        code.max_locals -= size;
    }
    Ok(())
}

/// Deletes unreachable instructions and try-catch blocks whose range no longer covers any real
/// instruction, until nothing changes. Returns whether anything was removed.
pub(crate) fn remove_dead_code(method: &mut MethodNode) -> Result<bool> {
    let Some(code) = method.code.as_mut() else {
        return Ok(false);
    };
    let mut removed_any = false;
    loop {
        let cfg = build_cfg(code)?;
        let dead: Vec<usize> = code
            .instructions
            .iter()
            .enumerate()
            .filter(|(index, insn)| !cfg.reachable[*index] && !insn.is_label())
            .map(|(index, _)| index)
            .collect();
        let mut changed = !dead.is_empty();
        code.remove_all(dead);

        let positions = code.label_positions();
        let instructions = &code.instructions;
        let before = code.try_catch.len();
        code.try_catch.retain(|block| {
            match (positions.get(&block.start), positions.get(&block.end)) {
                (Some(start), Some(end)) => instructions
                    .get(*start..*end)
                    .is_none_or(|body| body.iter().any(|insn| !insn.is_label())),
                _ => true,
            }
        });
        changed |= code.try_catch.len() != before;

        if !changed {
            return Ok(removed_any);
        }
        removed_any = true;
    }
}
