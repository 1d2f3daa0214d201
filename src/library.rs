use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use serde::Serialize;

use crate::error::InvariantViolation;
use crate::ir::{
    ACC_FINAL, ACC_PUBLIC, ACC_STATIC, ACC_SUPER, ClassNode, Code, FieldNode, Insn, MemberRef,
    MethodNode,
};
use crate::opcodes;
use crate::remap::{Remapper, remap_class, remap_code, remap_field, remap_method};

/// Name-keyed collection of classes forming one deliverable unit.
#[derive(Clone, Debug, Default, Serialize)]
pub(crate) struct Library {
    pub(crate) name: String,
    classes: BTreeMap<String, ClassNode>,
}

impl Library {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<&ClassNode> {
        self.classes.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut ClassNode> {
        self.classes.get_mut(name)
    }

    /// Adds `class`, returning the previous class of the same name.
    pub(crate) fn add(&mut self, class: ClassNode) -> Option<ClassNode> {
        self.classes.insert(class.name.clone(), class)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ClassNode> {
        self.classes.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    /// Rewrites every class through `remapper` and re-keys the library. Static members whose
    /// owner changes are moved to their new class, together with their simple initializers.
    pub(crate) fn remap(&mut self, remapper: &dyn Remapper) -> Result<()> {
        let mut relocation = Relocation::default();
        for class in self.classes.values_mut() {
            relocation.extract_fields(class, remapper);
            relocation.extract_methods(class, remapper);
        }

        let classes = std::mem::take(&mut self.classes);
        for (_, mut class) in classes {
            remap_class(&mut class, remapper);
            if self.classes.contains_key(&class.name) {
                return Err(InvariantViolation::NameCollision {
                    library: self.name.clone(),
                    name: class.name,
                }
                .into());
            }
            self.classes.insert(class.name.clone(), class);
        }

        let moved_fields = relocation.fields.len();
        let moved_methods = relocation.methods.len();
        relocation.splice(&mut self.classes)?;
        remove_empty_clinits(&mut self.classes);
        if moved_fields + moved_methods > 0 {
            tracing::debug!(
                library = %self.name,
                fields = moved_fields,
                methods = moved_methods,
                "relocated static members"
            );
        }

        for class in self.classes.values() {
            check_members_unique(class)?;
        }
        Ok(())
    }
}

struct Initializer {
    instructions: Vec<Insn>,
    max_stack: u16,
}

impl Initializer {
    fn dependencies(&self) -> Vec<MemberRef> {
        self.instructions
            .iter()
            .filter(|insn| insn.opcode() == Some(opcodes::GETSTATIC))
            .filter_map(Insn::member_ref)
            .collect()
    }
}

struct MovedField {
    owner: String,
    node: FieldNode,
    version: (u16, u16),
    initializer: Option<Initializer>,
}

struct MovedMethod {
    owner: String,
    node: MethodNode,
    version: (u16, u16),
}

/// Static members taken out of their classes, keyed by their renamed reference.
#[derive(Default)]
struct Relocation {
    fields: Vec<(MemberRef, MovedField)>,
    field_index: HashMap<MemberRef, usize>,
    methods: Vec<MovedMethod>,
}

impl Relocation {
    fn extract_fields(&mut self, class: &mut ClassNode, remapper: &dyn Remapper) {
        if class.name.contains('/') {
            return;
        }
        let owner = class.name.clone();
        let new_owner = remapper.map_type(&owner);

        let mut moving = Vec::new();
        let mut kept = Vec::new();
        for field in std::mem::take(&mut class.fields) {
            let holder = remapper.map_field_owner(&owner, &field.name, &field.desc);
            if holder == new_owner {
                kept.push(field);
            } else {
                let range = remapper.field_initializer(&owner, &field.name, &field.desc);
                moving.push((field, holder, range));
            }
        }
        class.fields = kept;
        if moving.is_empty() {
            return;
        }

        let mut clinit = class
            .methods
            .iter_mut()
            .find(|method| method.name == "<clinit>")
            .and_then(|method| method.code.as_mut());
        let max_stack = clinit.as_ref().map_or(0, |code| code.max_stack);

        // Later ranges first, so earlier indices stay valid.
        let mut order: Vec<usize> = (0..moving.len()).collect();
        order.sort_by_key(|index| {
            std::cmp::Reverse(moving[*index].2.as_ref().map_or(0, |range| range.start))
        });
        let mut initializers: Vec<Option<Initializer>> = (0..moving.len()).map(|_| None).collect();
        for index in order {
            let (Some(range), Some(code)) = (moving[index].2.clone(), clinit.as_deref_mut()) else {
                continue;
            };
            if range.end > code.instructions.len() {
                continue;
            }
            let mut extracted = Code {
                instructions: code.instructions.drain(range).collect(),
                ..Code::default()
            };
            remap_code(&mut extracted, remapper);
            initializers[index] = Some(Initializer {
                instructions: extracted.instructions,
                max_stack,
            });
        }

        for ((mut field, holder, _), initializer) in moving.into_iter().zip(initializers) {
            remap_field(&mut field, &owner, remapper);
            let key = MemberRef {
                owner: holder.clone(),
                name: field.name.clone(),
                desc: field.desc.clone(),
            };
            self.field_index.insert(key.clone(), self.fields.len());
            self.fields.push((
                key,
                MovedField {
                    owner: holder,
                    node: field,
                    version: class.version,
                    initializer,
                },
            ));
        }
    }

    fn extract_methods(&mut self, class: &mut ClassNode, remapper: &dyn Remapper) {
        if class.name.contains('/') {
            return;
        }
        let owner = class.name.clone();
        let new_owner = remapper.map_type(&owner);
        let mut kept = Vec::new();
        for mut method in std::mem::take(&mut class.methods) {
            let holder = remapper.map_method_owner(&owner, &method.name, &method.desc);
            if holder == new_owner {
                kept.push(method);
                continue;
            }
            remap_method(&mut method, &owner, remapper);
            self.methods.push(MovedMethod {
                owner: holder,
                node: method,
                version: class.version,
            });
        }
        class.methods = kept;
    }

    fn splice(mut self, classes: &mut BTreeMap<String, ClassNode>) -> Result<()> {
        let mut fields: Vec<Option<MovedField>> = std::mem::take(&mut self.fields)
            .into_iter()
            .map(|(_, field)| Some(field))
            .collect();
        let mut spliced = HashSet::new();
        for index in 0..fields.len() {
            splice_field(index, &mut fields, &self.field_index, &mut spliced, classes)?;
        }
        for method in self.methods {
            let class = classes
                .entry(method.owner.clone())
                .or_insert_with(|| holder_class(&method.owner));
            class.version = class.version.max(method.version);
            class.methods.push(method.node);
        }
        Ok(())
    }
}

/// Splices field `index` after every relocated field its initializer reads.
fn splice_field(
    index: usize,
    fields: &mut [Option<MovedField>],
    field_index: &HashMap<MemberRef, usize>,
    spliced: &mut HashSet<usize>,
    classes: &mut BTreeMap<String, ClassNode>,
) -> Result<()> {
    if !spliced.insert(index) {
        return Ok(());
    }
    let Some(field) = fields.get_mut(index).and_then(Option::take) else {
        return Ok(());
    };
    if let Some(initializer) = &field.initializer {
        for dependency in initializer.dependencies() {
            if let Some(dependency) = field_index.get(&dependency) {
                splice_field(*dependency, fields, field_index, spliced, classes)?;
            }
        }
    }

    let class = classes
        .entry(field.owner.clone())
        .or_insert_with(|| holder_class(&field.owner));
    if let Some(initializer) = field.initializer {
        let code = clinit_code(class);
        let tail = single_tail_return(code).ok_or_else(|| {
            InvariantViolation::UnsplicableInitializer {
                class: field.owner.clone(),
            }
        })?;
        code.max_stack = code.max_stack.max(initializer.max_stack);
        code.instructions.splice(tail..tail, initializer.instructions);
    }
    class.version = class.version.max(field.version);
    class.fields.push(field.node);
    Ok(())
}

fn holder_class(name: &str) -> ClassNode {
    let mut class = ClassNode::new(name, Some("java/lang/Object"));
    class.version = (45, 3);
    class.access = ACC_PUBLIC | ACC_SUPER | ACC_FINAL;
    class
}

fn clinit_code(class: &mut ClassNode) -> &mut Code {
    let position = match class.methods.iter().position(|method| method.name == "<clinit>") {
        Some(position) => position,
        None => {
            class.methods.push(MethodNode {
                access: ACC_STATIC,
                name: "<clinit>".to_string(),
                desc: "()V".to_string(),
                code: None,
            });
            class.methods.len() - 1
        }
    };
    class.methods[position].code.get_or_insert_with(|| Code {
        instructions: vec![Insn::Simple(opcodes::RETURN)],
        ..Code::default()
    })
}

/// Index of the only `return`, provided no real instruction follows it.
fn single_tail_return(code: &Code) -> Option<usize> {
    let mut returns = code
        .instructions
        .iter()
        .enumerate()
        .filter(|(_, insn)| insn.opcode() == Some(opcodes::RETURN));
    let (index, _) = returns.next()?;
    if returns.next().is_some() {
        return None;
    }
    code.instructions[index + 1..]
        .iter()
        .all(Insn::is_label)
        .then_some(index)
}

fn remove_empty_clinits(classes: &mut BTreeMap<String, ClassNode>) {
    for class in classes.values_mut() {
        class.methods.retain(|method| {
            if method.name != "<clinit>" {
                return true;
            }
            let first = method
                .code
                .as_ref()
                .and_then(|code| code.instructions.iter().find(|insn| !insn.is_label()));
            first.and_then(Insn::opcode) != Some(opcodes::RETURN)
        });
    }
}

fn check_members_unique(class: &ClassNode) -> Result<()> {
    let mut seen = HashSet::new();
    for field in &class.fields {
        if !seen.insert((&field.name, &field.desc)) {
            return Err(InvariantViolation::MemberCollision {
                class: class.name.clone(),
                member: format!("{} {}", field.name, field.desc),
            }
            .into());
        }
    }
    seen.clear();
    for method in &class.methods {
        if !seen.insert((&method.name, &method.desc)) {
            return Err(InvariantViolation::MemberCollision {
                class: class.name.clone(),
                member: format!("{} {}", method.name, method.desc),
            }
            .into());
        }
    }
    Ok(())
}
