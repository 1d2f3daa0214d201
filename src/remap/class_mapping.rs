use std::collections::BTreeMap;

use crate::classpath::{ClassMetadata, ClassPath};
use crate::descriptor::{package_prefix, simple_name};
use crate::filter::ClassFilter;
use crate::ir::ACC_NATIVE;
use crate::remap::name_generator::NameGenerator;
use crate::remap::name_map::NameMap;

/// Names every renamable owned class after its super class (`Class1_Sub2`) or as `Class`/`Interface`
/// plus a counter, keeping the package.
pub(crate) struct ClassMappingGenerator<'a> {
    classpath: &'a ClassPath,
    excluded_classes: &'a dyn ClassFilter,
    name_map: &'a NameMap,
    generator: NameGenerator,
    mapping: BTreeMap<String, String>,
}

impl<'a> ClassMappingGenerator<'a> {
    pub(crate) fn new(
        classpath: &'a ClassPath,
        excluded_classes: &'a dyn ClassFilter,
        name_map: &'a NameMap,
    ) -> Self {
        Self {
            classpath,
            excluded_classes,
            name_map,
            generator: NameGenerator::new(),
            mapping: BTreeMap::new(),
        }
    }

    pub(crate) fn generate(mut self) -> BTreeMap<String, String> {
        let names: Vec<String> = self
            .classpath
            .own_classes()
            .map(|class| class.name.clone())
            .collect();
        for name in names {
            if let Some(class) = self.classpath.resolve(&name) {
                self.populate(&class);
            }
        }

        let name_map = self.name_map;
        self.mapping
            .into_iter()
            .map(|(name, generated)| {
                let mapped = name_map.map_class_name(&name, generated);
                (name, mapped)
            })
            .collect()
    }

    fn populate(&mut self, class: &ClassMetadata) -> String {
        let name = class.name();
        if let Some(mapped) = self.mapping.get(name) {
            return mapped.clone();
        }
        if !self.is_renamable(class) {
            return name.to_string();
        }
        let mapped = self.generate_name(class);
        self.mapping.insert(name.to_string(), mapped.clone());
        mapped
    }

    fn is_renamable(&self, class: &ClassMetadata) -> bool {
        if class.is_dependency() || self.excluded_classes.matches(class.name()) {
            return false;
        }
        !class
            .methods()
            .any(|method| class.method_access(method).is_some_and(|access| access & ACC_NATIVE != 0))
    }

    fn generate_name(&mut self, class: &ClassMetadata) -> String {
        let package = package_prefix(class.name()).to_string();
        let super_class = class
            .super_class(self.classpath)
            .filter(|parent| parent.name() != "java/lang/Object");
        let prefix = match super_class {
            Some(parent) => {
                let parent_name = self.populate(&parent);
                format!("{}_Sub", simple_name(&parent_name))
            }
            None if class.is_interface() => "Interface".to_string(),
            None => "Class".to_string(),
        };
        self.generator.generate(&format!("{package}{prefix}"))
    }
}
