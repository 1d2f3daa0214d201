//! Relocation of scrambled static members into synthetic `StaticN` holder classes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Range;

use crate::classpath::ClassPath;
use crate::disjoint_set::PartitionId;
use crate::filter::MemberFilter;
use crate::insn::{get_expression, is_sequential};
use crate::ir::{Code, Insn, MemberDesc, MemberRef};
use crate::opcodes;
use crate::partition::MemberSets;
use crate::remap::name_generator::NameGenerator;
use crate::remap::name_map::NameMap;

pub(crate) const MAX_FIELDS_PER_CLASS: usize = 500;
pub(crate) const MAX_METHODS_PER_CLASS: usize = 50;

/// Holder chosen for a relocated static field and the `<clinit>` range that initializes it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct StaticField {
    pub(crate) owner: String,
    pub(crate) initializer: Option<Range<usize>>,
}

#[derive(Debug, Default)]
struct Slot {
    current: Option<String>,
    used: usize,
}

/// Hands out holder class names. Fields and methods fill separate holders, numbered from one
/// counter for the whole run.
#[derive(Debug)]
pub(crate) struct HolderAllocator {
    generator: NameGenerator,
    max_fields: usize,
    max_methods: usize,
    fields: Slot,
    methods: Slot,
}

impl Default for HolderAllocator {
    fn default() -> Self {
        Self::new(MAX_FIELDS_PER_CLASS, MAX_METHODS_PER_CLASS)
    }
}

impl HolderAllocator {
    pub(crate) fn new(max_fields: usize, max_methods: usize) -> Self {
        Self {
            generator: NameGenerator::new(),
            max_fields,
            max_methods,
            fields: Slot::default(),
            methods: Slot::default(),
        }
    }

    pub(crate) fn next_field(&mut self) -> String {
        Self::next(&mut self.generator, &mut self.fields, self.max_fields)
    }

    pub(crate) fn next_method(&mut self) -> String {
        Self::next(&mut self.generator, &mut self.methods, self.max_methods)
    }

    fn next(generator: &mut NameGenerator, slot: &mut Slot, max: usize) -> String {
        let name = match slot.current.take() {
            Some(name) if slot.used < max => name,
            _ => {
                slot.used = 0;
                generator.generate("Static")
            }
        };
        slot.used += 1;
        slot.current = Some(name.clone());
        name
    }
}

/// Picks holders for the static members of scrambled libraries.
pub(crate) struct StaticUnscrambler<'a> {
    classpath: &'a ClassPath,
    excluded_fields: &'a dyn MemberFilter,
    excluded_methods: &'a dyn MemberFilter,
    scrambled_libraries: &'a BTreeSet<String>,
    name_map: &'a NameMap,
    holders: HolderAllocator,
}

impl<'a> StaticUnscrambler<'a> {
    pub(crate) fn new(
        classpath: &'a ClassPath,
        excluded_fields: &'a dyn MemberFilter,
        excluded_methods: &'a dyn MemberFilter,
        scrambled_libraries: &'a BTreeSet<String>,
        name_map: &'a NameMap,
        holders: HolderAllocator,
    ) -> Self {
        Self {
            classpath,
            excluded_fields,
            excluded_methods,
            scrambled_libraries,
            name_map,
            holders,
        }
    }

    pub(crate) fn unscramble_fields(&mut self, fields: &MemberSets) -> HashMap<PartitionId, StaticField> {
        let mut relocated = HashMap::new();
        for library in self.classpath.libraries() {
            if !self.scrambled_libraries.contains(&library.name) {
                continue;
            }
            for class in library.iter() {
                if class.name.contains('/') {
                    continue;
                }
                let (simple, complex) = class
                    .methods
                    .iter()
                    .find(|method| method.name == "<clinit>")
                    .and_then(|clinit| clinit.code.as_ref())
                    .map(|code| extract_initializers(code, &class.name))
                    .unwrap_or_default();

                for field in &class.fields {
                    if !field.is_static()
                        || self.excluded_fields.matches(&class.name, &field.name, &field.desc)
                    {
                        continue;
                    }
                    let desc = field.member_desc();
                    if complex.contains(&desc) {
                        continue;
                    }
                    let Some(partition) = fields.partition(&MemberRef::new(class.name.clone(), &desc))
                    else {
                        continue;
                    };
                    let default = self.holders.next_field();
                    let owner = self
                        .name_map
                        .map_field_owner(fields.members(partition), default);
                    relocated.insert(
                        partition,
                        StaticField {
                            owner,
                            initializer: simple.get(&desc).cloned(),
                        },
                    );
                }
            }
        }
        tracing::debug!(fields = relocated.len(), "chose holders for static fields");
        relocated
    }

    pub(crate) fn unscramble_methods(&mut self, methods: &MemberSets) -> HashMap<PartitionId, String> {
        let mut relocated = HashMap::new();
        for library in self.classpath.libraries() {
            if !self.scrambled_libraries.contains(&library.name) {
                continue;
            }
            for class in library.iter() {
                if class.name.contains('/') {
                    continue;
                }
                for method in &class.methods {
                    if !method.is_static()
                        || method.is_native()
                        || self
                            .excluded_methods
                            .matches(&class.name, &method.name, &method.desc)
                    {
                        continue;
                    }
                    let member = MemberRef::new(class.name.clone(), &method.member_desc());
                    let Some(partition) = methods.partition(&member) else {
                        continue;
                    };
                    let default = self.holders.next_method();
                    let owner = self
                        .name_map
                        .map_method_owner(methods.members(partition), default);
                    relocated.insert(partition, owner);
                }
            }
        }
        tracing::debug!(methods = relocated.len(), "chose holders for static methods");
        relocated
    }
}

/// Indices of the leading straight-line run and of the straight-line run before a final
/// `return`.
fn entry_exit_blocks(instructions: &[Insn]) -> HashSet<usize> {
    let mut blocks: HashSet<usize> = instructions
        .iter()
        .take_while(|insn| is_sequential(insn))
        .enumerate()
        .map(|(index, _)| index)
        .collect();
    let Some((last, body)) = instructions.split_last() else {
        return blocks;
    };
    if last.opcode() != Some(opcodes::RETURN) {
        return blocks;
    }
    let exit_len = body
        .iter()
        .rev()
        .take_while(|insn| is_sequential(insn))
        .count();
    blocks.extend(body.len() - exit_len..body.len());
    blocks
}

/// Splits the static fields written by `owner`'s static initializer into simple initializers,
/// which can move with their field, and complex ones, which pin the field in place.
pub(crate) fn extract_initializers(
    code: &Code,
    owner: &str,
) -> (BTreeMap<MemberDesc, Range<usize>>, HashSet<MemberDesc>) {
    let instructions = &code.instructions;
    let blocks = entry_exit_blocks(instructions);

    let mut simple: BTreeMap<MemberDesc, Range<usize>> = BTreeMap::new();
    let mut complex: HashSet<MemberDesc> = instructions
        .iter()
        .enumerate()
        .filter(|(index, _)| !blocks.contains(index))
        .filter_map(|(_, insn)| owned_field(insn, owner))
        .collect();

    let mut putstatics: Vec<usize> = blocks
        .iter()
        .copied()
        .filter(|index| {
            matches!(
                &instructions[*index],
                Insn::Field { opcode: opcodes::PUTSTATIC, owner: field_owner, .. } if field_owner == owner
            )
        })
        .collect();
    putstatics.sort_unstable();

    for index in putstatics {
        let Some(desc) = owned_field(&instructions[index], owner) else {
            continue;
        };
        if complex.contains(&desc) {
            continue;
        }
        if simple.remove(&desc).is_some() {
            complex.insert(desc);
            continue;
        }
        match get_expression(instructions, index, |_| true, 0) {
            Some(range) => {
                simple.insert(desc, range);
            }
            None => {
                complex.insert(desc);
            }
        }
    }

    let overlapping: Vec<MemberDesc> = simple
        .iter()
        .filter(|(field, range)| {
            simple.iter().any(|(other, other_range)| {
                other != *field && range.start < other_range.end && other_range.start < range.end
            })
        })
        .map(|(field, _)| field.clone())
        .collect();
    for field in overlapping {
        simple.remove(&field);
        complex.insert(field);
    }

    (simple, complex)
}

fn owned_field(insn: &Insn, owner: &str) -> Option<MemberDesc> {
    match insn {
        Insn::Field {
            owner: field_owner,
            name,
            desc,
            ..
        } if field_owner == owner => Some(MemberDesc::new(name.clone(), desc.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::Runtime;
    use crate::filter::GlobMemberFilter;
    use crate::ir::{ACC_NATIVE, ACC_STATIC};
    use crate::library::Library;
    use crate::test_support::{class, code, field, field_insn, iconst, jump, label, method, op};

    fn desc(name: &str) -> MemberDesc {
        MemberDesc::new(name, "I")
    }

    #[test]
    fn initializers_outside_entry_and_exit_blocks_are_complex() {
        let body = code(vec![
            iconst(5),
            field_insn(opcodes::PUTSTATIC, "a", "b", "I"),
            op(opcodes::ICONST_0),
            jump(opcodes::IFEQ, 1),
            iconst(2),
            field_insn(opcodes::PUTSTATIC, "a", "d", "I"),
            label(1),
            iconst(7),
            field_insn(opcodes::PUTSTATIC, "a", "e", "I"),
            iconst(8),
            field_insn(opcodes::PUTSTATIC, "a", "e", "I"),
            field_insn(opcodes::GETSTATIC, "a", "b", "I"),
            field_insn(opcodes::PUTSTATIC, "a", "f", "I"),
            op(opcodes::RETURN),
        ]);

        let (simple, complex) = extract_initializers(&body, "a");

        assert_eq!(simple.get(&desc("b")), Some(&(0..2)));
        assert_eq!(simple.get(&desc("f")), Some(&(11..13)));
        assert!(complex.contains(&desc("d")));
        assert!(complex.contains(&desc("e")));
        assert_eq!(simple.len(), 2);
    }

    #[test]
    fn overlapping_initializers_are_complex() {
        let body = code(vec![
            op(opcodes::ICONST_1),
            op(opcodes::DUP),
            field_insn(opcodes::PUTSTATIC, "a", "x", "I"),
            field_insn(opcodes::PUTSTATIC, "a", "y", "I"),
            op(opcodes::RETURN),
        ]);

        let (simple, complex) = extract_initializers(&body, "a");

        assert!(simple.is_empty());
        assert!(complex.contains(&desc("x")));
        assert!(complex.contains(&desc("y")));
    }

    #[test]
    fn holders_roll_over_when_full() {
        let mut holders = HolderAllocator::new(2, 1);

        assert_eq!(holders.next_field(), "Static1");
        assert_eq!(holders.next_method(), "Static2");
        assert_eq!(holders.next_field(), "Static1");
        assert_eq!(holders.next_field(), "Static3");
        assert_eq!(holders.next_method(), "Static4");
    }

    #[test]
    fn only_default_package_classes_of_scrambled_libraries_move() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("b", "I", ACC_STATIC));
        a.fields.push(field("c", "I", ACC_STATIC));
        a.fields.push(field("keep", "I", ACC_STATIC));
        a.fields.push(field("inst", "I", 0));
        a.methods.push(method("m", "()V", ACC_STATIC, None));
        a.methods.push(method("n", "()V", ACC_STATIC | ACC_NATIVE, None));
        a.methods.push(method(
            "<clinit>",
            "()V",
            ACC_STATIC,
            Some(code(vec![
                iconst(3),
                field_insn(opcodes::PUTSTATIC, "a", "b", "I"),
                op(opcodes::RETURN),
            ])),
        ));
        let mut packaged = class("p/q", Some("java/lang/Object"));
        packaged.fields.push(field("z", "I", ACC_STATIC));
        let mut library = Library::new("client");
        library.add(a);
        library.add(packaged);
        let classpath = ClassPath::new(vec![library], Vec::new(), Runtime::default());
        let fields = MemberSets::fields(&classpath);
        let methods = MemberSets::methods(&classpath);
        let excluded_fields = GlobMemberFilter::new(&["**.keep *".to_string()]).expect("filter");
        let excluded_methods =
            GlobMemberFilter::new(&["**.<clinit> *".to_string()]).expect("filter");
        let scrambled = BTreeSet::from(["client".to_string()]);
        let names = NameMap::from_json(r#"{"methods": {"a.m ()V": {"owner": "Util", "name": "m"}}}"#)
            .expect("name map");
        let mut unscrambler = StaticUnscrambler::new(
            &classpath,
            &excluded_fields,
            &excluded_methods,
            &scrambled,
            &names,
            HolderAllocator::default(),
        );

        let relocated_fields = unscrambler.unscramble_fields(&fields);
        let relocated_methods = unscrambler.unscramble_methods(&methods);

        let field_of = |value: &str| {
            let member: MemberRef = value.parse().expect("member");
            fields
                .partition(&member)
                .and_then(|partition| relocated_fields.get(&partition))
                .cloned()
        };
        assert_eq!(
            field_of("a.b I"),
            Some(StaticField {
                owner: "Static1".to_string(),
                initializer: Some(0..2),
            })
        );
        assert_eq!(
            field_of("a.c I"),
            Some(StaticField {
                owner: "Static1".to_string(),
                initializer: None,
            })
        );
        assert_eq!(field_of("a.keep I"), None);
        assert_eq!(field_of("a.inst I"), None);
        assert_eq!(field_of("p/q.z I"), None);

        let m = methods
            .partition(&"a.m ()V".parse().expect("member"))
            .expect("partition");
        assert_eq!(relocated_methods.get(&m).map(String::as_str), Some("Util"));
        assert_eq!(relocated_methods.len(), 1);
    }
}
