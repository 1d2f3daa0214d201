//! Glob filters over class and member names.
//!
//! ## Syntax
//!
//! - Class globs match internal names: `*` stays inside one package segment, `**` crosses `/`.
//! - Member globs are `owner.name descriptor`, e.g. `**.<clinit> *` or `client.<init> *`. The
//!   owner part follows the class syntax; name and descriptor are matched as plain text where
//!   `*` matches anything.

use std::collections::BTreeSet;

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use thiserror::Error;

use crate::classpath::ClassPath;
use crate::ir::{Constant, Insn};
use crate::opcodes;

/// Error type for filter construction.
#[derive(Debug, Error)]
pub(crate) enum FilterError {
    /// Invalid glob pattern syntax.
    #[error("invalid glob pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

pub(crate) trait ClassFilter {
    fn matches(&self, name: &str) -> bool;
}

pub(crate) trait MemberFilter {
    fn matches(&self, owner: &str, name: &str, desc: &str) -> bool;
}

/// Class filter built from a list of class globs.
#[derive(Debug)]
pub(crate) struct GlobClassFilter {
    patterns: Vec<String>,
    set: GlobSet,
}

impl GlobClassFilter {
    pub(crate) fn new(patterns: &[String]) -> Result<Self, FilterError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(
                GlobBuilder::new(pattern)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| invalid(pattern, e))?,
            );
        }
        let set = builder.build().map_err(|e| FilterError::InvalidPattern {
            pattern: patterns.join(", "),
            message: e.to_string(),
        })?;
        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    pub(crate) fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl ClassFilter for GlobClassFilter {
    fn matches(&self, name: &str) -> bool {
        self.set.is_match(name)
    }
}

#[derive(Debug)]
struct MemberGlob {
    owner: GlobMatcher,
    name: GlobMatcher,
    desc: GlobMatcher,
}

/// Member filter built from a list of `owner.name descriptor` globs.
#[derive(Debug)]
pub(crate) struct GlobMemberFilter {
    patterns: Vec<String>,
    globs: Vec<MemberGlob>,
}

impl GlobMemberFilter {
    pub(crate) fn new(patterns: &[String]) -> Result<Self, FilterError> {
        let globs = patterns
            .iter()
            .map(|pattern| parse_member_glob(pattern))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns: patterns.to_vec(),
            globs,
        })
    }

    pub(crate) fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl MemberFilter for GlobMemberFilter {
    fn matches(&self, owner: &str, name: &str, desc: &str) -> bool {
        self.globs.iter().any(|glob| {
            glob.owner.is_match(owner) && glob.name.is_match(name) && glob.desc.is_match(desc)
        })
    }
}

fn parse_member_glob(pattern: &str) -> Result<MemberGlob, FilterError> {
    let malformed = || FilterError::InvalidPattern {
        pattern: pattern.to_string(),
        message: "expected 'owner.name descriptor'".to_string(),
    };
    let (qualified, desc) = pattern.split_once(' ').ok_or_else(malformed)?;
    let (owner, name) = qualified.rsplit_once('.').ok_or_else(malformed)?;
    if owner.is_empty() || name.is_empty() || desc.is_empty() {
        return Err(malformed());
    }

    let owner = GlobBuilder::new(owner)
        .literal_separator(true)
        .build()
        .map_err(|e| invalid(pattern, e))?
        .compile_matcher();
    let name = GlobBuilder::new(name)
        .build()
        .map_err(|e| invalid(pattern, e))?
        .compile_matcher();
    // `[` opens a character class in glob syntax but is an array marker in descriptors.
    let desc = GlobBuilder::new(&desc.replace('[', "[[]"))
        .build()
        .map_err(|e| invalid(pattern, e))?
        .compile_matcher();
    Ok(MemberGlob { owner, name, desc })
}

fn invalid(pattern: &str, error: globset::Error) -> FilterError {
    FilterError::InvalidPattern {
        pattern: pattern.to_string(),
        message: error.kind().to_string(),
    }
}

/// Protects the constructors of owned classes loaded through `Class.forName("literal")`.
#[derive(Debug, Default)]
pub(crate) struct ReflectedConstructorFilter {
    classes: BTreeSet<String>,
}

impl ReflectedConstructorFilter {
    pub(crate) fn create(classpath: &ClassPath) -> Self {
        let mut classes = BTreeSet::new();
        for class in classpath.own_classes() {
            for method in &class.methods {
                let Some(code) = method.code.as_ref() else {
                    continue;
                };
                for name in class_for_name_literals(&code.instructions) {
                    let internal = name.replace('.', "/");
                    if classpath
                        .resolve(&internal)
                        .is_some_and(|metadata| !metadata.is_dependency())
                    {
                        classes.insert(internal);
                    }
                }
            }
        }
        tracing::info!(classes = ?classes, "identified constructors invoked with reflection");
        Self { classes }
    }

    pub(crate) fn classes(&self) -> &BTreeSet<String> {
        &self.classes
    }
}

impl MemberFilter for ReflectedConstructorFilter {
    fn matches(&self, owner: &str, name: &str, _desc: &str) -> bool {
        name == "<init>" && self.classes.contains(owner)
    }
}

/// Indices of `ldc "name"` instructions directly followed by `Class.forName(String)`, ignoring
/// labels in between.
pub(crate) fn class_for_name_sites(instructions: &[Insn]) -> Vec<usize> {
    let real: Vec<(usize, &Insn)> = instructions
        .iter()
        .enumerate()
        .filter(|(_, insn)| !insn.is_label())
        .collect();
    real.windows(2)
        .filter_map(|pair| {
            let [(index, ldc), (_, call)] = pair else {
                return None;
            };
            (matches!(ldc, Insn::Ldc(Constant::String(_))) && is_class_for_name(call))
                .then_some(*index)
        })
        .collect()
}

fn class_for_name_literals(instructions: &[Insn]) -> Vec<String> {
    class_for_name_sites(instructions)
        .into_iter()
        .filter_map(|index| match &instructions[index] {
            Insn::Ldc(Constant::String(name)) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn is_class_for_name(insn: &Insn) -> bool {
    matches!(
        insn,
        Insn::Method { opcode: opcodes::INVOKESTATIC, owner, name, desc, .. }
            if owner == "java/lang/Class"
                && name == "forName"
                && desc == "(Ljava/lang/String;)Ljava/lang/Class;"
    )
}
