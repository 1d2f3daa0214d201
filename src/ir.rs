use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use serde::Serialize;

use crate::opcodes;

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_PRIVATE: u16 = 0x0002;
pub(crate) const ACC_PROTECTED: u16 = 0x0004;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_FINAL: u16 = 0x0010;
pub(crate) const ACC_SUPER: u16 = 0x0020;
pub(crate) const ACC_VOLATILE: u16 = 0x0040;
pub(crate) const ACC_NATIVE: u16 = 0x0100;
pub(crate) const ACC_INTERFACE: u16 = 0x0200;

/// Mask covering the four visibility levels.
pub(crate) const VISIBILITY_MASK: u16 = ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED;

/// Owner-independent signature of a field or method.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub(crate) struct MemberDesc {
    pub(crate) name: String,
    pub(crate) desc: String,
}

impl MemberDesc {
    pub(crate) fn new(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desc: desc.into(),
        }
    }
}

impl fmt::Display for MemberDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.desc)
    }
}

/// Concrete declaration site: owner class plus member signature.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub(crate) struct MemberRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) desc: String,
}

impl MemberRef {
    pub(crate) fn new(owner: impl Into<String>, desc: &MemberDesc) -> Self {
        Self {
            owner: owner.into(),
            name: desc.name.clone(),
            desc: desc.desc.clone(),
        }
    }

    pub(crate) fn member_desc(&self) -> MemberDesc {
        MemberDesc::new(self.name.clone(), self.desc.clone())
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} {}", self.owner, self.name, self.desc)
    }
}

impl FromStr for MemberRef {
    type Err = anyhow::Error;

    /// Parses `owner.name descriptor`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (qualified, desc) = value
            .split_once(' ')
            .with_context(|| format!("member reference without descriptor: {value}"))?;
        let (owner, name) = qualified
            .rsplit_once('.')
            .with_context(|| format!("member reference without owner: {value}"))?;
        if owner.is_empty() || name.is_empty() || desc.is_empty() {
            anyhow::bail!("malformed member reference: {value}");
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        })
    }
}

/// Mutable class definition owned by a library.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct ClassNode {
    pub(crate) version: (u16, u16),
    pub(crate) access: u16,
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) fields: Vec<FieldNode>,
    pub(crate) methods: Vec<MethodNode>,
    /// Methods named by method handles in the constant pool. They can be called through
    /// `invokedynamic` or `MethodHandle.invoke` without a call instruction.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) method_handles: Vec<MemberRef>,
}

impl ClassNode {
    pub(crate) fn new(name: impl Into<String>, super_name: Option<&str>) -> Self {
        Self {
            version: (50, 0),
            access: ACC_PUBLIC | ACC_SUPER,
            name: name.into(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            method_handles: Vec::new(),
        }
    }

    pub(crate) fn is_interface(&self) -> bool {
        self.access & ACC_INTERFACE != 0
    }

    pub(crate) fn field(&self, desc: &MemberDesc) -> Option<&FieldNode> {
        self.fields
            .iter()
            .find(|field| field.name == desc.name && field.desc == desc.desc)
    }

    pub(crate) fn field_mut(&mut self, desc: &MemberDesc) -> Option<&mut FieldNode> {
        self.fields
            .iter_mut()
            .find(|field| field.name == desc.name && field.desc == desc.desc)
    }

    pub(crate) fn method(&self, desc: &MemberDesc) -> Option<&MethodNode> {
        self.methods
            .iter()
            .find(|method| method.name == desc.name && method.desc == desc.desc)
    }

    pub(crate) fn method_mut(&mut self, desc: &MemberDesc) -> Option<&mut MethodNode> {
        self.methods
            .iter_mut()
            .find(|method| method.name == desc.name && method.desc == desc.desc)
    }
}

/// Field declaration.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct FieldNode {
    pub(crate) access: u16,
    pub(crate) name: String,
    pub(crate) desc: String,
}

impl FieldNode {
    pub(crate) fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    pub(crate) fn member_desc(&self) -> MemberDesc {
        MemberDesc::new(self.name.clone(), self.desc.clone())
    }
}

/// Method declaration with an optional body.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct MethodNode {
    pub(crate) access: u16,
    pub(crate) name: String,
    pub(crate) desc: String,
    pub(crate) code: Option<Code>,
}

impl MethodNode {
    pub(crate) fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    pub(crate) fn is_native(&self) -> bool {
        self.access & ACC_NATIVE != 0
    }

    pub(crate) fn member_desc(&self) -> MemberDesc {
        MemberDesc::new(self.name.clone(), self.desc.clone())
    }
}

/// Label identity inside one method body.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub(crate) struct LabelId(pub(crate) u32);

/// Symbolic method body. Branches refer to `Insn::Label` entries, never to offsets.
#[derive(Clone, Debug, Default, Serialize)]
pub(crate) struct Code {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) instructions: Vec<Insn>,
    pub(crate) try_catch: Vec<TryCatch>,
    pub(crate) next_label: u32,
}

impl Code {
    pub(crate) fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    /// Map from label to its index in `instructions`.
    pub(crate) fn label_positions(&self) -> HashMap<LabelId, usize> {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(index, insn)| match insn {
                Insn::Label(label) => Some((*label, index)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn has_subroutines(&self) -> bool {
        self.instructions.iter().any(|insn| {
            matches!(insn.opcode(), Some(opcodes::JSR | opcodes::RET))
        })
    }

    /// Removes the instructions at `indices`, which may be unsorted and contain duplicates.
    pub(crate) fn remove_all(&mut self, indices: impl IntoIterator<Item = usize>) {
        let mut indices: Vec<usize> = indices.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        for index in indices.into_iter().rev() {
            self.instructions.remove(index);
        }
    }
}

/// Exception handler over a label range.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct TryCatch {
    pub(crate) start: LabelId,
    pub(crate) end: LabelId,
    pub(crate) handler: LabelId,
    pub(crate) catch_type: Option<String>,
}

/// Constant loaded by `ldc`, `ldc_w` or `ldc2_w`. Floating point values keep their bits.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) enum Constant {
    Int(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    String(String),
    /// Internal name or array descriptor.
    Class(String),
    MethodType(String),
    /// Method handles and dynamic constants, kept by tag only.
    Opaque(u8),
}

/// One symbolic instruction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) enum Insn {
    Label(LabelId),
    /// Opcode without operands.
    Simple(u8),
    /// `bipush`, `sipush` and `newarray`.
    Int { opcode: u8, operand: i32 },
    /// Local variable access, normalised to the indexed form.
    Var { opcode: u8, var: u16 },
    Iinc { var: u16, incr: i16 },
    /// `new`, `anewarray`, `checkcast` and `instanceof`.
    Type { opcode: u8, desc: String },
    Field {
        opcode: u8,
        owner: String,
        name: String,
        desc: String,
    },
    Method {
        opcode: u8,
        owner: String,
        name: String,
        desc: String,
        interface: bool,
    },
    InvokeDynamic { name: String, desc: String },
    Jump { opcode: u8, target: LabelId },
    Ldc(Constant),
    TableSwitch {
        low: i32,
        high: i32,
        default: LabelId,
        targets: Vec<LabelId>,
    },
    LookupSwitch {
        default: LabelId,
        keys: Vec<i32>,
        targets: Vec<LabelId>,
    },
    MultiANewArray { desc: String, dims: u8 },
}

impl Insn {
    /// Opcode of a real instruction, `None` for labels.
    pub(crate) fn opcode(&self) -> Option<u8> {
        match self {
            Insn::Label(_) => None,
            Insn::Simple(opcode)
            | Insn::Int { opcode, .. }
            | Insn::Var { opcode, .. }
            | Insn::Type { opcode, .. }
            | Insn::Field { opcode, .. }
            | Insn::Method { opcode, .. }
            | Insn::Jump { opcode, .. } => Some(*opcode),
            Insn::Iinc { .. } => Some(opcodes::IINC),
            Insn::InvokeDynamic { .. } => Some(opcodes::INVOKEDYNAMIC),
            Insn::Ldc(_) => Some(opcodes::LDC),
            Insn::TableSwitch { .. } => Some(opcodes::TABLESWITCH),
            Insn::LookupSwitch { .. } => Some(opcodes::LOOKUPSWITCH),
            Insn::MultiANewArray { .. } => Some(opcodes::MULTIANEWARRAY),
        }
    }

    pub(crate) fn is_label(&self) -> bool {
        matches!(self, Insn::Label(_))
    }

    /// Owner and signature of a field or method instruction.
    pub(crate) fn member_ref(&self) -> Option<MemberRef> {
        match self {
            Insn::Field {
                owner, name, desc, ..
            }
            | Insn::Method {
                owner, name, desc, ..
            } => Some(MemberRef {
                owner: owner.clone(),
                name: name.clone(),
                desc: desc.clone(),
            }),
            _ => None,
        }
    }

    pub(crate) fn is_store(&self) -> bool {
        matches!(
            self,
            Insn::Var {
                opcode: opcodes::ISTORE..=opcodes::ASTORE,
                ..
            }
        )
    }

    pub(crate) fn is_load(&self) -> bool {
        matches!(
            self,
            Insn::Var {
                opcode: opcodes::ILOAD..=opcodes::ALOAD,
                ..
            }
        )
    }
}

/// Edge classification used for CFG inspection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum EdgeKind {
    FallThrough,
    Branch,
    Exception,
}

/// Edge between two instruction indices.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct FlowEdge {
    pub(crate) from: usize,
    pub(crate) to: usize,
    pub(crate) kind: EdgeKind,
}

/// Basic block covering a half-open range of instruction indices.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct BasicBlock {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

/// Instruction-level control flow graph for one method body.
#[derive(Clone, Debug)]
pub(crate) struct ControlFlowGraph {
    pub(crate) len: usize,
    pub(crate) edges: Vec<FlowEdge>,
    pub(crate) successors: Vec<Vec<usize>>,
    pub(crate) predecessors: Vec<Vec<usize>>,
    pub(crate) reachable: Vec<bool>,
    pub(crate) blocks: Vec<BasicBlock>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_ref_parses_owner_name_and_descriptor() {
        let member: MemberRef = "a/b/C.<init> (I)V".parse().expect("parse member");

        assert_eq!(member.owner, "a/b/C");
        assert_eq!(member.name, "<init>");
        assert_eq!(member.desc, "(I)V");
        assert_eq!(member.to_string(), "a/b/C.<init> (I)V");
    }

    #[test]
    fn member_ref_rejects_missing_descriptor() {
        assert!("a/b/C.field".parse::<MemberRef>().is_err());
        assert!(".x I".parse::<MemberRef>().is_err());
    }

    #[test]
    fn remove_all_tolerates_duplicates() {
        let mut code = Code {
            instructions: vec![
                Insn::Simple(opcodes::NOP),
                Insn::Simple(opcodes::ICONST_0),
                Insn::Simple(opcodes::POP),
                Insn::Simple(opcodes::RETURN),
            ],
            ..Code::default()
        };

        code.remove_all([2, 1, 2]);

        assert_eq!(
            code.instructions,
            vec![Insn::Simple(opcodes::NOP), Insn::Simple(opcodes::RETURN)]
        );
    }
}
