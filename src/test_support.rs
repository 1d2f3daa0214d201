//! Builders for hand-written class fixtures.

use crate::bytecode::local_extent;
use crate::classpath::{ClassPath, Runtime};
use crate::ir::{ClassNode, Code, FieldNode, Insn, LabelId, MethodNode, TryCatch};
use crate::library::Library;
use crate::opcodes;

pub(crate) fn class(name: &str, super_name: Option<&str>) -> ClassNode {
    ClassNode::new(name, super_name)
}

pub(crate) fn field(name: &str, desc: &str, access: u16) -> FieldNode {
    FieldNode {
        access,
        name: name.to_string(),
        desc: desc.to_string(),
    }
}

pub(crate) fn method(name: &str, desc: &str, access: u16, code: Option<Code>) -> MethodNode {
    MethodNode {
        access,
        name: name.to_string(),
        desc: desc.to_string(),
        code,
    }
}

/// Body from `instructions`; labels must use ids below 100.
pub(crate) fn code(instructions: Vec<Insn>) -> Code {
    let max_locals = instructions
        .iter()
        .filter_map(local_extent)
        .max()
        .unwrap_or(0)
        .max(4);
    Code {
        max_stack: 8,
        max_locals,
        instructions,
        try_catch: Vec::new(),
        next_label: 100,
    }
}

pub(crate) fn code_with_handlers(instructions: Vec<Insn>, try_catch: Vec<TryCatch>) -> Code {
    Code {
        try_catch,
        ..code(instructions)
    }
}

pub(crate) fn classpath_of(classes: Vec<ClassNode>) -> ClassPath {
    let mut library = Library::new("client");
    for class in classes {
        library.add(class);
    }
    ClassPath::new(vec![library], Vec::new(), Runtime::default())
}

pub(crate) fn label(id: u32) -> Insn {
    Insn::Label(LabelId(id))
}

pub(crate) fn op(opcode: u8) -> Insn {
    Insn::Simple(opcode)
}

pub(crate) fn iconst(value: i32) -> Insn {
    match value {
        -1..=5 => Insn::Simple((opcodes::ICONST_0 as i32 + value) as u8),
        _ => Insn::Int {
            opcode: opcodes::BIPUSH,
            operand: value,
        },
    }
}

pub(crate) fn var(opcode: u8, var: u16) -> Insn {
    Insn::Var { opcode, var }
}

pub(crate) fn jump(opcode: u8, target: u32) -> Insn {
    Insn::Jump {
        opcode,
        target: LabelId(target),
    }
}

pub(crate) fn field_insn(opcode: u8, owner: &str, name: &str, desc: &str) -> Insn {
    Insn::Field {
        opcode,
        owner: owner.to_string(),
        name: name.to_string(),
        desc: desc.to_string(),
    }
}

pub(crate) fn invoke(opcode: u8, owner: &str, name: &str, desc: &str) -> Insn {
    Insn::Method {
        opcode,
        owner: owner.to_string(),
        name: name.to_string(),
        desc: desc.to_string(),
        interface: false,
    }
}

/// Big-endian writer for hand-assembled class files.
#[derive(Default)]
struct ClassFileBytes(Vec<u8>);

impl ClassFileBytes {
    fn u8(&mut self, value: u8) -> &mut Self {
        self.0.push(value);
        self
    }

    fn u16(&mut self, value: u16) -> &mut Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn u32(&mut self, value: u32) -> &mut Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    fn utf8(&mut self, value: &str) -> &mut Self {
        self.u8(1).u16(value.len() as u16);
        self.0.extend_from_slice(value.as_bytes());
        self
    }

    fn code(&mut self, max_stack: u16, max_locals: u16, code: &[u8]) -> &mut Self {
        // Attribute name "Code" lives at pool index 13.
        self.u16(13).u32(12 + code.len() as u32);
        self.u16(max_stack).u16(max_locals).u32(code.len() as u32);
        self.0.extend_from_slice(code);
        self.u16(0).u16(0)
    }
}

/// `class <name> { int x; <name>() {} int get() { return x; } }` compiled by hand.
pub(crate) fn class_bytes(name: &str, field_desc: &str) -> Vec<u8> {
    let mut bytes = ClassFileBytes::default();
    bytes.u32(0xCAFE_BABE).u16(0).u16(52).u16(16);
    bytes.utf8(name); // 1
    bytes.u8(7).u16(1); // 2
    bytes.utf8("java/lang/Object"); // 3
    bytes.u8(7).u16(3); // 4
    bytes.utf8("x"); // 5
    bytes.utf8(field_desc); // 6
    bytes.utf8("<init>"); // 7
    bytes.utf8("()V"); // 8
    bytes.u8(12).u16(7).u16(8); // 9
    bytes.u8(10).u16(4).u16(9); // 10
    bytes.u8(12).u16(5).u16(6); // 11
    bytes.u8(9).u16(2).u16(11); // 12
    bytes.utf8("Code"); // 13
    bytes.utf8("get"); // 14
    bytes.utf8("()I"); // 15

    bytes.u16(0x0021).u16(2).u16(4).u16(0);
    bytes.u16(1).u16(0).u16(5).u16(6).u16(0);
    bytes.u16(2);
    bytes.u16(0x0001).u16(7).u16(8).u16(1);
    bytes.code(1, 1, &[0x2a, 0xb7, 0x00, 0x0a, 0xb1]);
    bytes.u16(0x0001).u16(14).u16(15).u16(1);
    bytes.code(1, 1, &[0x2a, 0xb4, 0x00, 0x0c, 0xac]);
    bytes.u16(0);
    bytes.0
}
