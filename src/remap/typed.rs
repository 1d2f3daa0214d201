use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use crate::classpath::ClassPath;
use crate::disjoint_set::PartitionId;
use crate::ir::{Insn, MemberRef};
use crate::partition::MemberSets;
use crate::profile::Profile;
use crate::remap::Remapper;
use crate::remap::class_mapping::ClassMappingGenerator;
use crate::remap::field_mapping::FieldMappingGenerator;
use crate::remap::method_mapping::MethodMappingGenerator;
use crate::remap::name_map::{MemberMapping, NameMap};
use crate::remap::static_scrambling::{HolderAllocator, StaticField, StaticUnscrambler};
use crate::report::{Diagnostic, Rule};

/// Remapper combining generated class, field and method names with static relocation. Member
/// lookups go through the partitions computed before renaming.
pub(crate) struct TypedRemapper {
    fields: MemberSets,
    methods: MemberSets,
    field_refs: HashMap<MemberRef, PartitionId>,
    method_refs: HashMap<MemberRef, PartitionId>,
    classes: BTreeMap<String, String>,
    field_names: HashMap<PartitionId, String>,
    method_names: HashMap<PartitionId, String>,
    static_fields: HashMap<PartitionId, StaticField>,
    static_methods: HashMap<PartitionId, String>,
}

impl TypedRemapper {
    pub(crate) fn create(
        classpath: &ClassPath,
        profile: &Profile,
        name_map: &NameMap,
    ) -> (Self, Vec<Diagnostic>) {
        let fields = MemberSets::fields(classpath);
        let methods = MemberSets::methods(classpath);

        let classes =
            ClassMappingGenerator::new(classpath, &profile.excluded_classes, name_map).generate();
        let field_names = FieldMappingGenerator::new(
            classpath,
            &profile.excluded_fields,
            name_map,
            &fields,
            &classes,
        )
        .generate();
        let method_names =
            MethodMappingGenerator::new(classpath, &profile.excluded_methods, name_map, &methods)
                .generate();

        let mut diagnostics = Vec::new();
        let max_len = profile.max_obfuscated_name_len;
        for (name, mapped) in &classes {
            if let Some(message) = suspicious(name, mapped, max_len) {
                diagnostics.push(Diagnostic::class(Rule::SuspiciousRename, name.clone(), message));
            }
        }
        for (sets, names) in [(&fields, &field_names), (&methods, &method_names)] {
            let mut renamed: Vec<(&MemberRef, &String)> = names
                .iter()
                .filter_map(|(partition, mapped)| Some((sets.canonical(*partition)?, mapped)))
                .collect();
            renamed.sort();
            for (member, mapped) in renamed {
                if let Some(message) = suspicious(&member.name, mapped, max_len) {
                    diagnostics.push(Diagnostic::member(
                        Rule::SuspiciousRename,
                        member.clone(),
                        message,
                    ));
                }
            }
        }

        let mut unscrambler = StaticUnscrambler::new(
            classpath,
            &profile.excluded_fields,
            &profile.excluded_methods,
            &profile.scrambled_libraries,
            name_map,
            HolderAllocator::default(),
        );
        let static_fields = unscrambler.unscramble_fields(&fields);
        let static_methods = unscrambler.unscramble_methods(&methods);

        let (field_refs, method_refs) = reference_tables(classpath, &fields, &methods);
        tracing::info!(
            classes = classes.len(),
            fields = field_names.len(),
            methods = method_names.len(),
            static_fields = static_fields.len(),
            static_methods = static_methods.len(),
            "generated name mapping"
        );

        let remapper = Self {
            fields,
            methods,
            field_refs,
            method_refs,
            classes,
            field_names,
            method_names,
            static_fields,
            static_methods,
        };
        (remapper, diagnostics)
    }

    fn field_partition(&self, owner: &str, name: &str, desc: &str) -> Option<PartitionId> {
        let member = MemberRef {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        };
        self.fields
            .partition(&member)
            .or_else(|| self.field_refs.get(&member).copied())
    }

    fn method_partition(&self, owner: &str, name: &str, desc: &str) -> Option<PartitionId> {
        let member = MemberRef {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        };
        self.methods
            .partition(&member)
            .or_else(|| self.method_refs.get(&member).copied())
    }

    /// The mapping this run applied, keyed by each partition's canonical member, in the curated
    /// name map format.
    pub(crate) fn name_map(&self) -> NameMap {
        let mut names = NameMap {
            classes: self.classes.clone(),
            ..NameMap::default()
        };
        for (partition, members) in self.fields.iter() {
            let name = self.field_names.get(&partition);
            let owner = self
                .static_fields
                .get(&partition)
                .map(|field| field.owner.clone());
            if let (Some(member), Some(name)) = (members.first(), name) {
                names.fields.insert(
                    member.clone(),
                    MemberMapping {
                        owner,
                        name: name.clone(),
                    },
                );
            }
        }
        for (partition, members) in self.methods.iter() {
            let name = self.method_names.get(&partition);
            let owner = self.static_methods.get(&partition).cloned();
            if let (Some(member), Some(name)) = (members.first(), name) {
                names.methods.insert(
                    member.clone(),
                    MemberMapping {
                        owner,
                        name: name.clone(),
                    },
                );
            }
        }
        names
    }
}

impl Remapper for TypedRemapper {
    fn map_type(&self, name: &str) -> String {
        self.classes
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn map_field_name(&self, owner: &str, name: &str, desc: &str) -> String {
        self.field_partition(owner, name, desc)
            .and_then(|partition| self.field_names.get(&partition))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn map_method_name(&self, owner: &str, name: &str, desc: &str) -> String {
        self.method_partition(owner, name, desc)
            .and_then(|partition| self.method_names.get(&partition))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    fn map_field_owner(&self, owner: &str, name: &str, desc: &str) -> String {
        self.field_partition(owner, name, desc)
            .and_then(|partition| self.static_fields.get(&partition))
            .map_or_else(|| self.map_type(owner), |field| field.owner.clone())
    }

    fn map_method_owner(&self, owner: &str, name: &str, desc: &str) -> String {
        self.method_partition(owner, name, desc)
            .and_then(|partition| self.static_methods.get(&partition))
            .cloned()
            .unwrap_or_else(|| self.map_type(owner))
    }

    fn field_initializer(&self, owner: &str, name: &str, desc: &str) -> Option<Range<usize>> {
        self.field_partition(owner, name, desc)
            .and_then(|partition| self.static_fields.get(&partition))
            .and_then(|field| field.initializer.clone())
    }
}

/// Partitions of member references that name an inheriting class rather than a declaration,
/// such as a static method called through a subclass.
fn reference_tables(
    classpath: &ClassPath,
    fields: &MemberSets,
    methods: &MemberSets,
) -> (HashMap<MemberRef, PartitionId>, HashMap<MemberRef, PartitionId>) {
    let mut field_refs = HashMap::new();
    let mut method_refs = HashMap::new();
    for class in classpath.own_classes() {
        for method in &class.methods {
            let Some(code) = method.code.as_ref() else {
                continue;
            };
            for insn in &code.instructions {
                let (sets, table) = match insn {
                    Insn::Field { .. } => (fields, &mut field_refs),
                    Insn::Method { .. } => (methods, &mut method_refs),
                    _ => continue,
                };
                let Some(member) = insn.member_ref() else {
                    continue;
                };
                if sets.partition(&member).is_some() || table.contains_key(&member) {
                    continue;
                }
                if let Some(partition) = sets.resolve(classpath, &member) {
                    table.insert(member, partition);
                }
            }
        }
    }
    (field_refs, method_refs)
}

fn suspicious(name: &str, mapped: &str, max_len: usize) -> Option<String> {
    let simple = name.rsplit('/').next().unwrap_or(name);
    (simple.chars().count() > max_len && name != mapped)
        .then(|| format!("renaming probably unobfuscated name {name} to {mapped}"))
}
