use std::collections::{BTreeMap, HashMap};

use crate::classpath::ClassPath;
use crate::descriptor::{Type, simple_name};
use crate::disjoint_set::PartitionId;
use crate::filter::MemberFilter;
use crate::ir::MemberRef;
use crate::partition::MemberSets;
use crate::remap::name_generator::{NameGenerator, capitalize, indefinite_article};
use crate::remap::name_map::NameMap;

/// Names field partitions after their type: `anInt3`, `aString7`, `aClass5Array2`.
pub(crate) struct FieldMappingGenerator<'a> {
    classpath: &'a ClassPath,
    excluded_fields: &'a dyn MemberFilter,
    name_map: &'a NameMap,
    fields: &'a MemberSets,
    class_mapping: &'a BTreeMap<String, String>,
    generator: NameGenerator,
}

impl<'a> FieldMappingGenerator<'a> {
    pub(crate) fn new(
        classpath: &'a ClassPath,
        excluded_fields: &'a dyn MemberFilter,
        name_map: &'a NameMap,
        fields: &'a MemberSets,
        class_mapping: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            classpath,
            excluded_fields,
            name_map,
            fields,
            class_mapping,
            generator: NameGenerator::new(),
        }
    }

    pub(crate) fn generate(mut self) -> HashMap<PartitionId, String> {
        let mut mapping = HashMap::new();
        for (partition, members) in self.fields.iter() {
            if !self.is_renamable(members) {
                continue;
            }
            let Some(first) = members.first() else {
                continue;
            };
            let Ok(ty) = Type::parse(&first.desc) else {
                tracing::debug!(field = %first, "skipping field with malformed descriptor");
                continue;
            };
            let Some(generated) = self.generate_name(&ty) else {
                continue;
            };
            mapping.insert(partition, self.name_map.map_field_name(members, generated));
        }
        mapping
    }

    fn is_renamable(&self, members: &[MemberRef]) -> bool {
        members.iter().all(|field| {
            !self
                .excluded_fields
                .matches(&field.owner, &field.name, &field.desc)
                && self
                    .classpath
                    .resolve(&field.owner)
                    .is_some_and(|class| !class.is_dependency())
        })
    }

    fn generate_name(&mut self, ty: &Type) -> Option<String> {
        let (dimensions, element) = ty.element();
        let element_name = match element {
            Type::Boolean => "boolean".to_string(),
            Type::Byte => "byte".to_string(),
            Type::Char => "char".to_string(),
            Type::Short => "short".to_string(),
            Type::Int => "int".to_string(),
            Type::Long => "long".to_string(),
            Type::Float => "float".to_string(),
            Type::Double => "double".to_string(),
            Type::Object(name) => {
                let mapped = self.class_mapping.get(name).unwrap_or(name);
                simple_name(mapped).to_string()
            }
            Type::Void | Type::Array(_) => return None,
        };
        let prefix = format!("{element_name}{}", "Array".repeat(dimensions));
        Some(
            self.generator
                .generate(&format!("{}{}", indefinite_article(&prefix), capitalize(&prefix))),
        )
    }
}
