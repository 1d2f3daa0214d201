use std::fmt;

use anyhow::{Context, Result};

/// Field or argument type parsed from a descriptor.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) enum Type {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
    Object(String),
    Array(Box<Type>),
}

impl Type {
    pub(crate) fn parse(desc: &str) -> Result<Type> {
        let mut cursor = Cursor::new(desc);
        let ty = cursor.next_type()?;
        if !cursor.is_done() {
            anyhow::bail!("trailing characters in descriptor {desc}");
        }
        Ok(ty)
    }

    /// Number of local variable or stack slots taken by a value of this type.
    pub(crate) fn size(&self) -> u16 {
        match self {
            Type::Void => 0,
            Type::Long | Type::Double => 2,
            _ => 1,
        }
    }

    /// Types loaded with `iload` and stored as a JVM int.
    pub(crate) fn is_int_sort(&self) -> bool {
        matches!(
            self,
            Type::Boolean | Type::Byte | Type::Char | Type::Short | Type::Int
        )
    }

    /// Array nesting depth and innermost element type.
    pub(crate) fn element(&self) -> (usize, &Type) {
        let mut dimensions = 0;
        let mut current = self;
        while let Type::Array(inner) = current {
            dimensions += 1;
            current = inner;
        }
        (dimensions, current)
    }

    pub(crate) fn descriptor(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Boolean => f.write_str("Z"),
            Type::Byte => f.write_str("B"),
            Type::Char => f.write_str("C"),
            Type::Short => f.write_str("S"),
            Type::Int => f.write_str("I"),
            Type::Long => f.write_str("J"),
            Type::Float => f.write_str("F"),
            Type::Double => f.write_str("D"),
            Type::Void => f.write_str("V"),
            Type::Object(name) => write!(f, "L{name};"),
            Type::Array(inner) => write!(f, "[{inner}"),
        }
    }
}

/// Parsed method descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodType {
    pub(crate) arguments: Vec<Type>,
    pub(crate) return_type: Type,
}

impl MethodType {
    pub(crate) fn parse(desc: &str) -> Result<MethodType> {
        let mut cursor = Cursor::new(desc);
        cursor.expect(b'(')?;
        let mut arguments = Vec::new();
        while cursor.peek() != Some(b')') {
            arguments.push(cursor.next_type()?);
        }
        cursor.expect(b')')?;
        let return_type = cursor.next_type()?;
        if !cursor.is_done() {
            anyhow::bail!("trailing characters in method descriptor {desc}");
        }
        Ok(MethodType {
            arguments,
            return_type,
        })
    }

    /// Slots taken by the arguments, excluding the receiver.
    pub(crate) fn arguments_size(&self) -> u16 {
        self.arguments.iter().map(Type::size).sum()
    }

    pub(crate) fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for argument in &self.arguments {
            out.push_str(&argument.to_string());
        }
        out.push(')');
        out.push_str(&self.return_type.to_string());
        out
    }
}

struct Cursor<'a> {
    desc: &'a str,
    position: usize,
}

impl<'a> Cursor<'a> {
    fn new(desc: &'a str) -> Self {
        Self { desc, position: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.desc.as_bytes().get(self.position).copied()
    }

    fn is_done(&self) -> bool {
        self.position == self.desc.len()
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek() != Some(byte) {
            anyhow::bail!(
                "expected '{}' at {} in descriptor {}",
                byte as char,
                self.position,
                self.desc
            );
        }
        self.position += 1;
        Ok(())
    }

    fn next_type(&mut self) -> Result<Type> {
        let byte = self
            .peek()
            .with_context(|| format!("unexpected end of descriptor {}", self.desc))?;
        self.position += 1;
        let ty = match byte {
            b'Z' => Type::Boolean,
            b'B' => Type::Byte,
            b'C' => Type::Char,
            b'S' => Type::Short,
            b'I' => Type::Int,
            b'J' => Type::Long,
            b'F' => Type::Float,
            b'D' => Type::Double,
            b'V' => Type::Void,
            b'L' => {
                let rest = &self.desc[self.position..];
                let end = rest
                    .find(';')
                    .with_context(|| format!("unterminated class name in {}", self.desc))?;
                let name = &rest[..end];
                if name.is_empty() {
                    anyhow::bail!("empty class name in descriptor {}", self.desc);
                }
                self.position += end + 1;
                Type::Object(name.to_string())
            }
            b'[' => Type::Array(Box::new(self.next_type()?)),
            other => anyhow::bail!(
                "invalid descriptor character '{}' in {}",
                other as char,
                self.desc
            ),
        };
        Ok(ty)
    }
}

/// Rewrites every class name embedded in a field or method descriptor.
pub(crate) fn remap_descriptor(desc: &str, mut map: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(desc.len());
    let mut rest = desc;
    while let Some(start) = rest.find('L') {
        out.push_str(&rest[..=start]);
        let tail = &rest[start + 1..];
        match tail.find(';') {
            Some(end) => {
                out.push_str(&map(&tail[..end]));
                out.push(';');
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(tail);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Rewrites an operand that is either an internal name or an array descriptor.
pub(crate) fn remap_internal_name(name: &str, mut map: impl FnMut(&str) -> String) -> String {
    if name.starts_with('[') {
        remap_descriptor(name, map)
    } else {
        map(name)
    }
}

/// Simple name of an internal class name (`a/b/C` -> `C`).
pub(crate) fn simple_name(name: &str) -> &str {
    name.rsplit_once('/').map_or(name, |(_, simple)| simple)
}

/// Package prefix including the trailing slash (`a/b/C` -> `a/b/`).
pub(crate) fn package_prefix(name: &str) -> &str {
    name.rfind('/').map_or("", |index| &name[..=index])
}
