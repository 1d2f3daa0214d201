use std::collections::HashMap;

use crate::classpath::ClassPath;
use crate::disjoint_set::PartitionId;
use crate::filter::MemberFilter;
use crate::ir::{ACC_NATIVE, MemberRef};
use crate::partition::MemberSets;
use crate::remap::name_map::NameMap;

/// Names method partitions `method1`, `method2`, ... in partition order.
pub(crate) struct MethodMappingGenerator<'a> {
    classpath: &'a ClassPath,
    excluded_methods: &'a dyn MemberFilter,
    name_map: &'a NameMap,
    methods: &'a MemberSets,
    index: u32,
}

impl<'a> MethodMappingGenerator<'a> {
    pub(crate) fn new(
        classpath: &'a ClassPath,
        excluded_methods: &'a dyn MemberFilter,
        name_map: &'a NameMap,
        methods: &'a MemberSets,
    ) -> Self {
        Self {
            classpath,
            excluded_methods,
            name_map,
            methods,
            index: 0,
        }
    }

    pub(crate) fn generate(mut self) -> HashMap<PartitionId, String> {
        let mut mapping = HashMap::new();
        for (partition, members) in self.methods.iter() {
            if !self.is_renamable(members) {
                continue;
            }
            self.index += 1;
            let generated = format!("method{}", self.index);
            mapping.insert(partition, self.name_map.map_method_name(members, generated));
        }
        mapping
    }

    fn is_renamable(&self, members: &[MemberRef]) -> bool {
        members.iter().all(|method| {
            if method.name == "<init>" || method.name == "<clinit>" {
                return false;
            }
            if self
                .excluded_methods
                .matches(&method.owner, &method.name, &method.desc)
            {
                return false;
            }
            let Some(owner) = self.classpath.resolve(&method.owner) else {
                return false;
            };
            if owner.is_dependency() {
                return false;
            }
            owner
                .method_access(&method.member_desc())
                .is_none_or(|access| access & ACC_NATIVE == 0)
        })
    }
}
