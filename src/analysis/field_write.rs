use std::collections::BTreeMap;

use anyhow::Result;

use crate::analysis::dataflow::{DataFlowAnalysis, Direction, solve};
use crate::analysis::frame::Frames;
use crate::cfg::build_cfg;
use crate::classpath::ClassPath;
use crate::ir::{ClassNode, Insn, MemberDesc, MethodNode};
use crate::opcodes;

/// Number of writes a field has seen along the paths reaching a program point.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FieldWriteCount {
    Never,
    ExactlyOnce,
    OnceOrMore,
}

pub(crate) type FieldWrites = BTreeMap<MemberDesc, FieldWriteCount>;

/// Counts writes to the fields declared by `class` inside one of its constructors or static
/// initializer. Only writes through the receiver (or any `putstatic`) count as a single write;
/// writes through another reference immediately reach `OnceOrMore`.
pub(crate) struct FieldWriteAnalysis<'a> {
    classpath: &'a ClassPath,
    class: &'a ClassNode,
    receivers: &'a Frames<bool>,
}

impl<'a> FieldWriteAnalysis<'a> {
    pub(crate) fn new(classpath: &'a ClassPath, class: &'a ClassNode, receivers: &'a Frames<bool>) -> Self {
        Self {
            classpath,
            class,
            receivers,
        }
    }

    fn declaring_owner(&self, owner: &str, member: &MemberDesc) -> Option<String> {
        self.classpath
            .resolve(owner)?
            .resolve_field(self.classpath, member)
    }
}

impl DataFlowAnalysis for FieldWriteAnalysis<'_> {
    type Value = FieldWrites;

    const DIRECTION: Direction = Direction::Forward;

    fn initial(&self) -> FieldWrites {
        FieldWrites::new()
    }

    fn entry(&self) -> FieldWrites {
        self.class
            .fields
            .iter()
            .map(|field| (field.member_desc(), FieldWriteCount::Never))
            .collect()
    }

    fn join(&self, left: &FieldWrites, right: &FieldWrites) -> FieldWrites {
        if left == right {
            return left.clone();
        }
        let mut joined = left.clone();
        for (member, count) in right {
            joined
                .entry(member.clone())
                .and_modify(|existing| {
                    if existing != count {
                        *existing = FieldWriteCount::OnceOrMore;
                    }
                })
                .or_insert(*count);
        }
        joined
    }

    fn transfer(&self, value: &FieldWrites, index: usize, insn: &Insn) -> FieldWrites {
        let Insn::Field {
            opcode,
            owner,
            name,
            desc,
        } = insn
        else {
            return value.clone();
        };
        if *opcode != opcodes::PUTFIELD && *opcode != opcodes::PUTSTATIC {
            return value.clone();
        }
        let member = MemberDesc::new(name.clone(), desc.clone());
        if self.declaring_owner(owner, &member).as_deref() != Some(self.class.name.as_str()) {
            return value.clone();
        }

        let is_this = *opcode == opcodes::PUTSTATIC
            || self
                .receivers
                .before(index)
                .and_then(|frame| frame.peek(1))
                .is_some_and(|slot| slot.value);

        let count = value
            .get(&member)
            .copied()
            .unwrap_or(FieldWriteCount::Never);
        let next = match (is_this, count) {
            (true, FieldWriteCount::Never) => FieldWriteCount::ExactlyOnce,
            _ => FieldWriteCount::OnceOrMore,
        };
        let mut writes = value.clone();
        writes.insert(member, next);
        writes
    }
}

/// Field write counts reaching every `return` of `method`.
pub(crate) fn field_writes_at_exits(
    classpath: &ClassPath,
    class: &ClassNode,
    method: &MethodNode,
    receivers: &Frames<bool>,
) -> Result<Vec<FieldWrites>> {
    let Some(code) = method.code.as_ref() else {
        return Ok(Vec::new());
    };
    let cfg = build_cfg(code)?;
    let analysis = FieldWriteAnalysis::new(classpath, class, receivers);
    let results = solve(&analysis, code, &cfg);
    Ok(code
        .instructions
        .iter()
        .enumerate()
        .filter(|(_, insn)| insn.opcode() == Some(opcodes::RETURN))
        .filter_map(|(index, _)| results.out_value(index).cloned())
        .collect())
}
