use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use crate::classpath::{ClassMetadata, ClassPath, MemberKind};
use crate::disjoint_set::{DisjointSet, PartitionId};
use crate::ir::{ACC_STATIC, MemberDesc, MemberRef};

/// Fields or methods grouped into partitions that must be renamed, kept or removed together.
#[derive(Debug)]
pub(crate) struct MemberSets {
    kind: MemberKind,
    set: DisjointSet<MemberRef>,
    partitions: Vec<(PartitionId, Vec<MemberRef>)>,
    positions: HashMap<PartitionId, usize>,
}

impl MemberSets {
    pub(crate) fn fields(classpath: &ClassPath) -> Self {
        Self::build(classpath, MemberKind::Field)
    }

    pub(crate) fn methods(classpath: &ClassPath) -> Self {
        Self::build(classpath, MemberKind::Method)
    }

    fn build(classpath: &ClassPath, kind: MemberKind) -> Self {
        let mut set = DisjointSet::new();
        let mut ancestors = HashMap::new();
        for class in classpath.own_classes() {
            if let Some(metadata) = classpath.resolve(&class.name) {
                populate(classpath, &mut set, &mut ancestors, &metadata, kind);
            }
        }
        let partitions = set.partitions();
        let positions = partitions
            .iter()
            .enumerate()
            .map(|(position, (id, _))| (*id, position))
            .collect();
        tracing::debug!(
            kind = ?kind,
            members = set.len(),
            partitions = set.partition_count(),
            "built member partitions"
        );
        Self {
            kind,
            set,
            partitions,
            positions,
        }
    }

    /// Partition holding exactly `member`.
    pub(crate) fn partition(&self, member: &MemberRef) -> Option<PartitionId> {
        self.set.get(member)
    }

    /// Partition of a reference site, falling back to the declaring class found by member resolution.
    pub(crate) fn resolve(&self, classpath: &ClassPath, member: &MemberRef) -> Option<PartitionId> {
        if let Some(partition) = self.partition(member) {
            return Some(partition);
        }
        let owner = classpath.resolve(&member.owner)?;
        let desc = member.member_desc();
        let declaring = match self.kind {
            MemberKind::Field => owner.resolve_field(classpath, &desc),
            MemberKind::Method => owner.resolve_method(classpath, &desc),
        }?;
        self.partition(&MemberRef::new(declaring, &desc))
    }

    pub(crate) fn members(&self, partition: PartitionId) -> &[MemberRef] {
        self.positions
            .get(&partition)
            .map_or(&[], |position| self.partitions[*position].1.as_slice())
    }

    /// First member inserted into the partition, used as its stable key.
    pub(crate) fn canonical(&self, partition: PartitionId) -> Option<&MemberRef> {
        self.members(partition).first()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (PartitionId, &[MemberRef])> {
        self.partitions
            .iter()
            .map(|(id, members)| (*id, members.as_slice()))
    }

    pub(crate) fn len(&self) -> usize {
        self.partitions.len()
    }
}

/// Unions `class` members with inherited ones and returns the signatures its subclasses inherit.
fn populate(
    classpath: &ClassPath,
    set: &mut DisjointSet<MemberRef>,
    ancestors: &mut HashMap<String, Rc<BTreeSet<MemberDesc>>>,
    class: &ClassMetadata,
    kind: MemberKind,
) -> Rc<BTreeSet<MemberDesc>> {
    if let Some(cached) = ancestors.get(class.name()) {
        return cached.clone();
    }
    // Placeholder breaks cycles in malformed hierarchies.
    ancestors.insert(class.name().to_string(), Rc::new(BTreeSet::new()));

    let mut inheritable = BTreeSet::new();
    for ancestor in class.super_class_and_interfaces(classpath) {
        let inherited = populate(classpath, set, ancestors, &ancestor, kind);
        for member in inherited.iter() {
            if is_hidden(class, member, kind) {
                continue;
            }
            set.union(
                MemberRef::new(class.name(), member),
                MemberRef::new(ancestor.name(), member),
            );
            inheritable.insert(member.clone());
        }
    }

    let declared: Vec<(MemberDesc, u16)> = match kind {
        MemberKind::Field => class
            .fields()
            .filter_map(|desc| class.field_access(desc).map(|access| (desc.clone(), access)))
            .collect(),
        MemberKind::Method => class
            .methods()
            .filter_map(|desc| class.method_access(desc).map(|access| (desc.clone(), access)))
            .collect(),
    };
    for (desc, access) in declared {
        set.add(MemberRef::new(class.name(), &desc));
        let inherits = match kind {
            MemberKind::Field => true,
            MemberKind::Method => {
                access & ACC_STATIC == 0 && desc.name != "<init>" && desc.name != "<clinit>"
            }
        };
        if inherits {
            inheritable.insert(desc);
        } else {
            inheritable.remove(&desc);
        }
    }

    let inheritable = Rc::new(inheritable);
    ancestors.insert(class.name().to_string(), inheritable.clone());
    inheritable
}

/// Fields are hidden by any redeclaration; methods only by a static one.
fn is_hidden(class: &ClassMetadata, member: &MemberDesc, kind: MemberKind) -> bool {
    match kind {
        MemberKind::Field => class.field_access(member).is_some(),
        MemberKind::Method => class
            .method_access(member)
            .is_some_and(|access| access & ACC_STATIC != 0),
    }
}
