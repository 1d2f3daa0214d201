use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};

use crate::descriptor::MethodType;
use crate::ir::{Code, Constant, Insn, LabelId, MemberRef, TryCatch};
use crate::opcodes;

/// Decoded constant pool entry.
#[derive(Clone, Debug)]
pub(crate) enum PoolEntry {
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, desc: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { name_and_type: u16 },
    InvokeDynamic { name_and_type: u16 },
    Module,
}

/// Constant pool decoded from raw class file bytes.
#[derive(Clone, Debug, Default)]
pub(crate) struct ConstantPool {
    entries: Vec<PoolEntry>,
}

/// Class header fields that follow the constant pool.
#[derive(Clone, Debug)]
pub(crate) struct ClassHeader {
    pub(crate) minor: u16,
    pub(crate) major: u16,
    pub(crate) pool: ConstantPool,
    pub(crate) access: u16,
    pub(crate) this_class: u16,
    pub(crate) super_class: u16,
}

pub(crate) fn parse_header(data: &[u8]) -> Result<ClassHeader> {
    let mut offset = 0usize;
    let magic = read_u32_at(data, &mut offset)?;
    if magic != 0xCAFE_BABE {
        anyhow::bail!("invalid class file magic");
    }
    let minor = read_u16_at(data, &mut offset)?;
    let major = read_u16_at(data, &mut offset)?;
    let pool = ConstantPool::parse(data, &mut offset)?;
    let access = read_u16_at(data, &mut offset)?;
    let this_class = read_u16_at(data, &mut offset)?;
    let super_class = read_u16_at(data, &mut offset)?;
    Ok(ClassHeader {
        minor,
        major,
        pool,
        access,
        this_class,
        super_class,
    })
}

impl ConstantPool {
    fn parse(data: &[u8], offset: &mut usize) -> Result<ConstantPool> {
        let count = read_u16_at(data, offset)?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(PoolEntry::Unusable);
        let mut index = 1u16;
        while index < count {
            let tag = read_u8_at(data, offset)?;
            let entry = match tag {
                1 => {
                    let len = read_u16_at(data, offset)? as usize;
                    let bytes = read_bytes_at(data, offset, len)?;
                    PoolEntry::Utf8(String::from_utf8_lossy(bytes).to_string())
                }
                3 => PoolEntry::Integer(read_u32_at(data, offset)? as i32),
                4 => PoolEntry::Float(read_u32_at(data, offset)?),
                5 | 6 => {
                    let high = read_u32_at(data, offset)? as u64;
                    let low = read_u32_at(data, offset)? as u64;
                    let bits = (high << 32) | low;
                    entries.push(if tag == 5 {
                        PoolEntry::Long(bits as i64)
                    } else {
                        PoolEntry::Double(bits)
                    });
                    // Eight-byte constants take two slots.
                    index += 2;
                    entries.push(PoolEntry::Unusable);
                    continue;
                }
                7 => PoolEntry::Class(read_u16_at(data, offset)?),
                8 => PoolEntry::String(read_u16_at(data, offset)?),
                9 | 10 | 11 => {
                    let class = read_u16_at(data, offset)?;
                    let name_and_type = read_u16_at(data, offset)?;
                    match tag {
                        9 => PoolEntry::FieldRef {
                            class,
                            name_and_type,
                        },
                        10 => PoolEntry::MethodRef {
                            class,
                            name_and_type,
                        },
                        _ => PoolEntry::InterfaceMethodRef {
                            class,
                            name_and_type,
                        },
                    }
                }
                12 => {
                    let name = read_u16_at(data, offset)?;
                    let desc = read_u16_at(data, offset)?;
                    PoolEntry::NameAndType { name, desc }
                }
                15 => {
                    let kind = read_u8_at(data, offset)?;
                    let reference = read_u16_at(data, offset)?;
                    PoolEntry::MethodHandle { kind, reference }
                }
                16 => PoolEntry::MethodType(read_u16_at(data, offset)?),
                17 | 18 => {
                    let _bootstrap = read_u16_at(data, offset)?;
                    let name_and_type = read_u16_at(data, offset)?;
                    if tag == 17 {
                        PoolEntry::Dynamic { name_and_type }
                    } else {
                        PoolEntry::InvokeDynamic { name_and_type }
                    }
                }
                19 | 20 => {
                    read_bytes_at(data, offset, 2)?;
                    PoolEntry::Module
                }
                _ => anyhow::bail!("unsupported constant pool tag: {}", tag),
            };
            entries.push(entry);
            index += 1;
        }
        Ok(ConstantPool { entries })
    }

    fn entry(&self, index: u16) -> Result<&PoolEntry> {
        self.entries
            .get(index as usize)
            .with_context(|| format!("constant pool index {index} out of range"))
    }

    pub(crate) fn utf8(&self, index: u16) -> Result<String> {
        match self.entry(index)? {
            PoolEntry::Utf8(value) => Ok(value.clone()),
            other => anyhow::bail!("expected utf8 at {index}, found {other:?}"),
        }
    }

    pub(crate) fn class_name(&self, index: u16) -> Result<String> {
        match self.entry(index)? {
            PoolEntry::Class(name) => self.utf8(*name),
            other => anyhow::bail!("expected class at {index}, found {other:?}"),
        }
    }

    fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.entry(index)? {
            PoolEntry::NameAndType { name, desc } => Ok((self.utf8(*name)?, self.utf8(*desc)?)),
            other => anyhow::bail!("expected name and type at {index}, found {other:?}"),
        }
    }

    /// Owner, name, descriptor and interface flag of a field or method reference.
    pub(crate) fn member(&self, index: u16) -> Result<(String, String, String, bool)> {
        let (class, name_and_type, interface) = match self.entry(index)? {
            PoolEntry::FieldRef {
                class,
                name_and_type,
            }
            | PoolEntry::MethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, false),
            PoolEntry::InterfaceMethodRef {
                class,
                name_and_type,
            } => (*class, *name_and_type, true),
            other => anyhow::bail!("expected member reference at {index}, found {other:?}"),
        };
        let owner = self.class_name(class)?;
        let (name, desc) = self.name_and_type(name_and_type)?;
        Ok((owner, name, desc, interface))
    }

    /// Methods named by the pool's method handles: bootstrap methods, lambda bodies and method
    /// references. Field handles are left out.
    pub(crate) fn method_handles(&self) -> Result<Vec<MemberRef>> {
        let mut handles = Vec::new();
        for entry in &self.entries {
            let PoolEntry::MethodHandle { kind, reference } = entry else {
                continue;
            };
            // REF_invokeVirtual through REF_invokeInterface.
            if !(5..=9).contains(kind) {
                continue;
            }
            let (owner, name, desc, _) = self.member(*reference)?;
            handles.push(MemberRef { owner, name, desc });
        }
        Ok(handles)
    }

    fn invoke_dynamic(&self, index: u16) -> Result<(String, String)> {
        match self.entry(index)? {
            PoolEntry::InvokeDynamic { name_and_type } => self.name_and_type(*name_and_type),
            other => anyhow::bail!("expected invokedynamic at {index}, found {other:?}"),
        }
    }

    fn constant(&self, index: u16) -> Result<Constant> {
        let constant = match self.entry(index)? {
            PoolEntry::Integer(value) => Constant::Int(*value),
            PoolEntry::Float(bits) => Constant::Float(*bits),
            PoolEntry::Long(value) => Constant::Long(*value),
            PoolEntry::Double(bits) => Constant::Double(*bits),
            PoolEntry::String(value) => Constant::String(self.utf8(*value)?),
            PoolEntry::Class(name) => Constant::Class(self.utf8(*name)?),
            PoolEntry::MethodType(desc) => Constant::MethodType(self.utf8(*desc)?),
            PoolEntry::MethodHandle { .. } => Constant::Opaque(15),
            PoolEntry::Dynamic { .. } => Constant::Opaque(17),
            other => anyhow::bail!("unloadable constant at {index}: {other:?}"),
        };
        Ok(constant)
    }
}

/// Exception table row with raw offsets.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RawHandler {
    pub(crate) start_pc: u16,
    pub(crate) end_pc: u16,
    pub(crate) handler_pc: u16,
    pub(crate) catch_type: u16,
}

/// Decodes a `Code` attribute into the symbolic instruction list.
pub(crate) fn decode_code(
    code: &[u8],
    handlers: &[RawHandler],
    pool: &ConstantPool,
    is_static: bool,
    desc: &str,
) -> Result<Code> {
    let mut starts = Vec::new();
    let mut targets = BTreeSet::new();
    let mut offset = 0usize;
    while offset < code.len() {
        starts.push(offset);
        if let Some(branch) = branch_targets(code, offset)? {
            targets.extend(branch);
        }
        offset += opcode_length(code, offset)?;
    }
    for handler in handlers {
        targets.insert(handler.start_pc as usize);
        targets.insert(handler.end_pc as usize);
        targets.insert(handler.handler_pc as usize);
    }

    let mut result = Code::default();
    let mut labels = BTreeMap::new();
    for target in targets {
        if target != code.len() && starts.binary_search(&target).is_err() {
            anyhow::bail!("branch target {target} is not an instruction boundary");
        }
        labels.insert(target, result.new_label());
    }
    let label_at = |target: usize| -> Result<LabelId> {
        labels
            .get(&target)
            .copied()
            .with_context(|| format!("missing label for offset {target}"))
    };

    let mut max_locals = MethodType::parse(desc)?.arguments_size() + u16::from(!is_static);
    for &start in &starts {
        if let Some(label) = labels.get(&start) {
            result.instructions.push(Insn::Label(*label));
        }
        let insn = decode_insn(code, start, pool, &label_at)
            .with_context(|| format!("decode instruction at offset {start}"))?;
        if let Some(extent) = local_extent(&insn) {
            max_locals = max_locals.max(extent);
        }
        result.instructions.push(insn);
    }
    if let Some(label) = labels.get(&code.len()) {
        result.instructions.push(Insn::Label(*label));
    }

    for handler in handlers {
        let catch_type = if handler.catch_type == 0 {
            None
        } else {
            Some(pool.class_name(handler.catch_type)?)
        };
        result.try_catch.push(TryCatch {
            start: label_at(handler.start_pc as usize)?,
            end: label_at(handler.end_pc as usize)?,
            handler: label_at(handler.handler_pc as usize)?,
            catch_type,
        });
    }
    result.max_locals = max_locals;
    Ok(result)
}

/// One past the highest local slot touched by `insn`.
pub(crate) fn local_extent(insn: &Insn) -> Option<u16> {
    match insn {
        Insn::Var { opcode, var } => {
            let size = match *opcode {
                opcodes::LLOAD | opcodes::DLOAD | opcodes::LSTORE | opcodes::DSTORE => 2,
                _ => 1,
            };
            Some(var + size)
        }
        Insn::Iinc { var, .. } => Some(var + 1),
        _ => None,
    }
}

fn decode_insn(
    code: &[u8],
    offset: usize,
    pool: &ConstantPool,
    label_at: &dyn Fn(usize) -> Result<LabelId>,
) -> Result<Insn> {
    let opcode = code[offset];
    let insn = match opcode {
        opcodes::BIPUSH => Insn::Int {
            opcode,
            operand: code_byte(code, offset + 1)? as i8 as i32,
        },
        opcodes::SIPUSH => Insn::Int {
            opcode,
            operand: read_i16(code, offset + 1)? as i32,
        },
        opcodes::NEWARRAY => Insn::Int {
            opcode,
            operand: code_byte(code, offset + 1)? as i32,
        },
        opcodes::LDC => Insn::Ldc(pool.constant(code_byte(code, offset + 1)? as u16)?),
        opcodes::LDC_W | opcodes::LDC2_W => Insn::Ldc(pool.constant(read_u16(code, offset + 1)?)?),
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Insn::Var {
                opcode,
                var: code_byte(code, offset + 1)? as u16,
            }
        }
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let relative = opcode - opcodes::ILOAD_0;
            Insn::Var {
                opcode: opcodes::ILOAD + relative / 4,
                var: (relative % 4) as u16,
            }
        }
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            let relative = opcode - opcodes::ISTORE_0;
            Insn::Var {
                opcode: opcodes::ISTORE + relative / 4,
                var: (relative % 4) as u16,
            }
        }
        opcodes::IINC => Insn::Iinc {
            var: code_byte(code, offset + 1)? as u16,
            incr: code_byte(code, offset + 2)? as i8 as i16,
        },
        opcodes::WIDE => {
            let inner = code_byte(code, offset + 1)?;
            let var = read_u16(code, offset + 2)?;
            if inner == opcodes::IINC {
                Insn::Iinc {
                    var,
                    incr: read_i16(code, offset + 4)?,
                }
            } else {
                Insn::Var { opcode: inner, var }
            }
        }
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => Insn::Jump {
            opcode,
            target: label_at((offset as i64 + read_i16(code, offset + 1)? as i64) as usize)?,
        },
        opcodes::GOTO_W | opcodes::JSR_W => Insn::Jump {
            opcode: if opcode == opcodes::GOTO_W {
                opcodes::GOTO
            } else {
                opcodes::JSR
            },
            target: label_at((offset as i64 + read_i32(code, offset + 1)? as i64) as usize)?,
        },
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let default = label_at((offset as i64 + read_i32(code, base)? as i64) as usize)?;
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let mut targets = Vec::new();
            let mut cursor = base + 12;
            for _ in low..=high {
                targets.push(label_at(
                    (offset as i64 + read_i32(code, cursor)? as i64) as usize,
                )?);
                cursor += 4;
            }
            Insn::TableSwitch {
                low,
                high,
                default,
                targets,
            }
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let default = label_at((offset as i64 + read_i32(code, base)? as i64) as usize)?;
            let pairs = read_i32(code, base + 4)?;
            let mut keys = Vec::new();
            let mut targets = Vec::new();
            let mut cursor = base + 8;
            for _ in 0..pairs {
                keys.push(read_i32(code, cursor)?);
                targets.push(label_at(
                    (offset as i64 + read_i32(code, cursor + 4)? as i64) as usize,
                )?);
                cursor += 8;
            }
            Insn::LookupSwitch {
                default,
                keys,
                targets,
            }
        }
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let (owner, name, desc, _) = pool.member(read_u16(code, offset + 1)?)?;
            Insn::Field {
                opcode,
                owner,
                name,
                desc,
            }
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEINTERFACE => {
            let (owner, name, desc, interface) = pool.member(read_u16(code, offset + 1)?)?;
            Insn::Method {
                opcode,
                owner,
                name,
                desc,
                interface,
            }
        }
        opcodes::INVOKEDYNAMIC => {
            let (name, desc) = pool.invoke_dynamic(read_u16(code, offset + 1)?)?;
            Insn::InvokeDynamic { name, desc }
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
            Insn::Type {
                opcode,
                desc: pool.class_name(read_u16(code, offset + 1)?)?,
            }
        }
        opcodes::MULTIANEWARRAY => Insn::MultiANewArray {
            desc: pool.class_name(read_u16(code, offset + 1)?)?,
            dims: code_byte(code, offset + 3)?,
        },
        _ => Insn::Simple(opcode),
    };
    Ok(insn)
}

fn branch_targets(code: &[u8], offset: usize) -> Result<Option<Vec<usize>>> {
    let opcode = code[offset];
    let relative = |delta: i64| (offset as i64 + delta) as usize;
    let targets = match opcode {
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            vec![relative(read_i16(code, offset + 1)? as i64)]
        }
        opcodes::GOTO_W | opcodes::JSR_W => vec![relative(read_i32(code, offset + 1)? as i64)],
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let mut targets = vec![relative(read_i32(code, base)? as i64)];
            let mut cursor = base + 12;
            for _ in low..=high {
                targets.push(relative(read_i32(code, cursor)? as i64));
                cursor += 4;
            }
            targets
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let pairs = read_i32(code, base + 4)?;
            let mut targets = vec![relative(read_i32(code, base)? as i64)];
            let mut cursor = base + 8;
            for _ in 0..pairs {
                targets.push(relative(read_i32(code, cursor + 4)? as i64));
                cursor += 8;
            }
            targets
        }
        _ => return Ok(None),
    };
    Ok(Some(targets))
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        opcodes::BIPUSH => 2,
        opcodes::SIPUSH => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        opcodes::RET => 2,
        opcodes::TABLESWITCH => {
            let base = offset + 1 + padding(offset);
            let low = read_i32(code, base + 4)?;
            let high = read_i32(code, base + 8)?;
            let count = high
                .checked_sub(low)
                .and_then(|v| v.checked_add(1))
                .filter(|count| *count >= 0)
                .context("invalid tableswitch range")?;
            1 + padding(offset) + 12 + count as usize * 4
        }
        opcodes::LOOKUPSWITCH => {
            let base = offset + 1 + padding(offset);
            let pairs = read_i32(code, base + 4)?;
            if pairs < 0 {
                anyhow::bail!("invalid lookupswitch pair count");
            }
            1 + padding(offset) + 8 + pairs as usize * 8
        }
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::NEW => 3,
        opcodes::NEWARRAY => 2,
        opcodes::ANEWARRAY => 3,
        opcodes::ARRAYLENGTH | opcodes::ATHROW => 1,
        opcodes::CHECKCAST | opcodes::INSTANCEOF => 3,
        opcodes::MONITORENTER | opcodes::MONITOREXIT => 1,
        opcodes::WIDE => {
            if code_byte(code, offset + 1)? == opcodes::IINC {
                6
            } else {
                4
            }
        }
        opcodes::MULTIANEWARRAY => 4,
        opcodes::IFNULL | opcodes::IFNONNULL => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    if offset + length > code.len() {
        anyhow::bail!("instruction at {offset} runs past the end of the code");
    }
    Ok(length)
}

pub(crate) fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn code_byte(code: &[u8], offset: usize) -> Result<u8> {
    code.get(offset)
        .copied()
        .with_context(|| format!("unexpected end of code at {offset}"))
}

pub(crate) fn read_u16(code: &[u8], offset: usize) -> Result<u16> {
    let bytes = code
        .get(offset..offset + 2)
        .with_context(|| format!("unexpected end of code at {offset}"))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(code: &[u8], offset: usize) -> Result<u32> {
    let bytes = code
        .get(offset..offset + 4)
        .with_context(|| format!("unexpected end of code at {offset}"))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    Ok(read_u16(code, offset)? as i16)
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    Ok(read_u32(code, offset)? as i32)
}

fn read_u8_at(data: &[u8], offset: &mut usize) -> Result<u8> {
    let value = code_byte(data, *offset)?;
    *offset += 1;
    Ok(value)
}

fn read_u16_at(data: &[u8], offset: &mut usize) -> Result<u16> {
    let value = read_u16(data, *offset)?;
    *offset += 2;
    Ok(value)
}

fn read_u32_at(data: &[u8], offset: &mut usize) -> Result<u32> {
    let value = read_u32(data, *offset)?;
    *offset += 4;
    Ok(value)
}

fn read_bytes_at<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let bytes = data
        .get(*offset..*offset + len)
        .with_context(|| format!("unexpected end of class file at {}", *offset))?;
    *offset += len;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_field() -> ConstantPool {
        ConstantPool {
            entries: vec![
                PoolEntry::Unusable,
                PoolEntry::Utf8("Owner".to_string()),
                PoolEntry::Class(1),
                PoolEntry::Utf8("value".to_string()),
                PoolEntry::Utf8("I".to_string()),
                PoolEntry::NameAndType { name: 3, desc: 4 },
                PoolEntry::FieldRef {
                    class: 2,
                    name_and_type: 5,
                },
                PoolEntry::Integer(70000),
            ],
        }
    }

    #[test]
    fn method_handles_name_their_target_methods() {
        let mut pool = pool_with_field();
        pool.entries.extend([
            PoolEntry::Utf8("run".to_string()),
            PoolEntry::Utf8("(I)V".to_string()),
            PoolEntry::NameAndType { name: 8, desc: 9 },
            PoolEntry::MethodRef {
                class: 2,
                name_and_type: 10,
            },
            // REF_invokeStatic, then a REF_getField handle that is skipped.
            PoolEntry::MethodHandle {
                kind: 6,
                reference: 11,
            },
            PoolEntry::MethodHandle {
                kind: 1,
                reference: 6,
            },
        ]);

        let handles = pool.method_handles().expect("handles");

        assert_eq!(
            handles,
            vec![MemberRef {
                owner: "Owner".to_string(),
                name: "run".to_string(),
                desc: "(I)V".to_string(),
            }]
        );
    }

    #[test]
    fn decode_normalizes_short_forms_and_creates_labels() {
        // iload_1; ifeq +8; aload_0; iconst_1; putfield #6; return
        let code = [
            0x1b, 0x99, 0x00, 0x08, 0x2a, 0x04, 0xb5, 0x00, 0x06, 0xb1,
        ];
        let decoded =
            decode_code(&code, &[], &pool_with_field(), false, "(I)V").expect("decode");

        let label = match &decoded.instructions[1] {
            Insn::Jump { opcode, target } => {
                assert_eq!(*opcode, opcodes::IFEQ);
                *target
            }
            other => panic!("unexpected instruction {other:?}"),
        };
        assert_eq!(
            decoded.instructions[0],
            Insn::Var {
                opcode: opcodes::ILOAD,
                var: 1
            }
        );
        assert_eq!(decoded.instructions[5], Insn::Label(label));
        assert_eq!(decoded.instructions[6], Insn::Simple(opcodes::RETURN));
        assert_eq!(
            decoded.instructions[4],
            Insn::Field {
                opcode: opcodes::PUTFIELD,
                owner: "Owner".to_string(),
                name: "value".to_string(),
                desc: "I".to_string(),
            }
        );
        assert_eq!(decoded.max_locals, 2);
    }

    #[test]
    fn decode_maps_handlers_to_labels() {
        // ldc #7; pop; return
        let code = [0x12, 0x07, 0x57, 0xb1];
        let handlers = [RawHandler {
            start_pc: 0,
            end_pc: 3,
            handler_pc: 3,
            catch_type: 0,
        }];
        let decoded =
            decode_code(&code, &handlers, &pool_with_field(), true, "()V").expect("decode");

        assert_eq!(decoded.try_catch.len(), 1);
        assert_eq!(decoded.instructions[1], Insn::Ldc(Constant::Int(70000)));
        let positions = decoded.label_positions();
        assert_eq!(positions[&decoded.try_catch[0].start], 0);
        assert_eq!(positions[&decoded.try_catch[0].end], 3);
    }

    #[test]
    fn decode_rejects_target_inside_instruction() {
        // goto +1 lands in the middle of itself
        let code = [0xa7, 0x00, 0x01, 0xb1];
        assert!(decode_code(&code, &[], &pool_with_field(), true, "()V").is_err());
    }

    #[test]
    fn padding_aligns_switch_operands() {
        assert_eq!(padding(0), 3);
        assert_eq!(padding(3), 0);
        assert_eq!(padding(5), 2);
    }
}
