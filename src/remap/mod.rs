//! Name mapping: the `Remapper` seam, class rewriting and the generators behind the typed
//! remapper used by the `remap` pass.

use std::ops::Range;

use crate::descriptor::{remap_descriptor, remap_internal_name};
use crate::filter::class_for_name_sites;
use crate::ir::{ClassNode, Code, Constant, FieldNode, Insn, MethodNode};

pub(crate) mod class_mapping;
pub(crate) mod field_mapping;
pub(crate) mod method_mapping;
pub(crate) mod name_generator;
pub(crate) mod name_map;
pub(crate) mod static_scrambling;
pub(crate) mod typed;

/// Maps class and member names. Member lookups take the names as they appear before renaming.
pub(crate) trait Remapper {
    fn map_type(&self, name: &str) -> String;

    fn map_field_name(&self, owner: &str, name: &str, desc: &str) -> String;

    fn map_method_name(&self, owner: &str, name: &str, desc: &str) -> String;

    fn map_field_owner(&self, owner: &str, _name: &str, _desc: &str) -> String {
        self.map_type(owner)
    }

    fn map_method_owner(&self, owner: &str, _name: &str, _desc: &str) -> String {
        self.map_type(owner)
    }

    /// Range of the owner's `<clinit>` that initializes a relocated static field.
    fn field_initializer(&self, _owner: &str, _name: &str, _desc: &str) -> Option<Range<usize>> {
        None
    }

    fn map_desc(&self, desc: &str) -> String {
        remap_descriptor(desc, |name| self.map_type(name))
    }

    fn map_internal_name(&self, name: &str) -> String {
        remap_internal_name(name, |name| self.map_type(name))
    }
}

/// Rewrites the class header and every member of `class`.
pub(crate) fn remap_class(class: &mut ClassNode, remapper: &dyn Remapper) {
    let owner = class.name.clone();
    for field in &mut class.fields {
        remap_field(field, &owner, remapper);
    }
    for method in &mut class.methods {
        remap_method(method, &owner, remapper);
    }
    for handle in &mut class.method_handles {
        let new_owner = remapper.map_method_owner(&handle.owner, &handle.name, &handle.desc);
        handle.name = remapper.map_method_name(&handle.owner, &handle.name, &handle.desc);
        handle.desc = remapper.map_desc(&handle.desc);
        handle.owner = new_owner;
    }
    class.name = remapper.map_type(&owner);
    class.super_name = class
        .super_name
        .as_deref()
        .map(|name| remapper.map_type(name));
    for interface in &mut class.interfaces {
        *interface = remapper.map_type(interface);
    }
}

/// Renames a field declared by `owner` (the pre-renaming class name).
pub(crate) fn remap_field(field: &mut FieldNode, owner: &str, remapper: &dyn Remapper) {
    field.name = remapper.map_field_name(owner, &field.name, &field.desc);
    field.desc = remapper.map_desc(&field.desc);
}

/// Renames a method declared by `owner` and rewrites its body.
pub(crate) fn remap_method(method: &mut MethodNode, owner: &str, remapper: &dyn Remapper) {
    method.name = remapper.map_method_name(owner, &method.name, &method.desc);
    method.desc = remapper.map_desc(&method.desc);
    if let Some(code) = method.code.as_mut() {
        remap_code(code, remapper);
    }
}

pub(crate) fn remap_code(code: &mut Code, remapper: &dyn Remapper) {
    let reflected = class_for_name_sites(&code.instructions);
    for (index, insn) in code.instructions.iter_mut().enumerate() {
        if reflected.contains(&index) {
            if let Insn::Ldc(Constant::String(name)) = insn {
                *name = remapper.map_type(&name.replace('.', "/")).replace('/', ".");
            }
            continue;
        }
        remap_insn(insn, remapper);
    }
    for block in &mut code.try_catch {
        if let Some(catch_type) = block.catch_type.as_mut() {
            *catch_type = remapper.map_type(catch_type);
        }
    }
}

pub(crate) fn remap_insn(insn: &mut Insn, remapper: &dyn Remapper) {
    match insn {
        Insn::Type { desc, .. } => *desc = remapper.map_internal_name(desc),
        Insn::Field {
            owner, name, desc, ..
        } => {
            let new_owner = remapper.map_field_owner(owner, name, desc);
            *name = remapper.map_field_name(owner, name, desc);
            *desc = remapper.map_desc(desc);
            *owner = new_owner;
        }
        Insn::Method {
            owner, name, desc, ..
        } => {
            let new_owner = if owner.starts_with('[') {
                remapper.map_internal_name(owner)
            } else {
                remapper.map_method_owner(owner, name, desc)
            };
            *name = remapper.map_method_name(owner, name, desc);
            *desc = remapper.map_desc(desc);
            *owner = new_owner;
        }
        Insn::InvokeDynamic { desc, .. } | Insn::MultiANewArray { desc, .. } => {
            *desc = remapper.map_desc(desc);
        }
        Insn::Ldc(Constant::Class(name)) => *name = remapper.map_internal_name(name),
        Insn::Ldc(Constant::MethodType(desc)) => *desc = remapper.map_desc(desc),
        _ => {}
    }
}
