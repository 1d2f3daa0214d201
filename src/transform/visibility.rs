use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

use crate::classpath::{ClassPath, MemberKind};
use crate::descriptor::package_prefix;
use crate::disjoint_set::PartitionId;
use crate::filter::{MemberFilter, ReflectedConstructorFilter};
use crate::ir::{ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC, ACC_STATIC, Insn, MemberRef, VISIBILITY_MASK};
use crate::partition::MemberSets;
use crate::report::{Diagnostic, Rule};
use crate::transform::{PassContext, Transformer};

/// Access level, weakest first.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum Access {
    Private,
    Package,
    Protected,
    Public,
}

impl Access {
    pub(crate) fn of(access: u16) -> Access {
        if access & ACC_PUBLIC != 0 {
            Access::Public
        } else if access & ACC_PROTECTED != 0 {
            Access::Protected
        } else if access & ACC_PRIVATE != 0 {
            Access::Private
        } else {
            Access::Package
        }
    }

    fn flags(self) -> u16 {
        match self {
            Access::Private => ACC_PRIVATE,
            Access::Package => 0,
            Access::Protected => ACC_PROTECTED,
            Access::Public => ACC_PUBLIC,
        }
    }
}

/// Narrows every owned field and method partition to the weakest access its reference sites
/// and inherited obligations allow.
pub(crate) struct VisibilityTransformer;

impl Transformer for VisibilityTransformer {
    fn name(&self) -> &'static str {
        "visibility"
    }

    fn transform(&self, classpath: &mut ClassPath, context: &mut PassContext) -> Result<()> {
        let reflected = ReflectedConstructorFilter::create(classpath);
        let mut changes = Vec::new();
        for kind in [MemberKind::Field, MemberKind::Method] {
            let sets = match kind {
                MemberKind::Field => MemberSets::fields(classpath),
                MemberKind::Method => MemberSets::methods(classpath),
            };
            let sites = reference_sites(classpath, &sets, kind);
            for (partition, members) in sets.iter() {
                let Some(access) =
                    required_access(classpath, context, &reflected, kind, members, sites.get(&partition))
                else {
                    continue;
                };
                for member in members {
                    changes.push((kind, member.clone(), access));
                }
            }
        }

        let mut narrowed = 0usize;
        let mut widened = 0usize;
        for (kind, member, access) in changes {
            let Some(class) = classpath.class_node_mut(&member.owner) else {
                continue;
            };
            let desc = member.member_desc();
            let flags = match kind {
                MemberKind::Field => class.field_mut(&desc).map(|field| &mut field.access),
                MemberKind::Method => class.method_mut(&desc).map(|method| &mut method.access),
            };
            let Some(flags) = flags else {
                continue;
            };
            let current = Access::of(*flags);
            if current == access {
                continue;
            }
            if access < current {
                narrowed += 1;
            } else {
                widened += 1;
            }
            *flags = (*flags & !VISIBILITY_MASK) | access.flags();
        }
        tracing::info!(narrowed, widened, "updated member visibility");

        for (owner, sites) in unresolved_owners(classpath) {
            context.diagnostics.report(Diagnostic::class(
                Rule::UnresolvedReference,
                owner.clone(),
                format!(
                    "{} left {sites} references to unresolved class {owner} untouched",
                    self.name()
                ),
            ));
        }
        Ok(())
    }
}

/// Class containing each reference and the owner named by the instruction, per partition.
fn reference_sites(
    classpath: &ClassPath,
    sets: &MemberSets,
    kind: MemberKind,
) -> HashMap<PartitionId, Vec<(String, String)>> {
    let mut sites: HashMap<PartitionId, Vec<(String, String)>> = HashMap::new();
    for class in classpath.own_classes() {
        for method in &class.methods {
            let Some(code) = method.code.as_ref() else {
                continue;
            };
            for insn in &code.instructions {
                let matches_kind = match kind {
                    MemberKind::Field => matches!(insn, Insn::Field { .. }),
                    MemberKind::Method => matches!(insn, Insn::Method { .. }),
                };
                if !matches_kind {
                    continue;
                }
                let Some(member) = insn.member_ref() else {
                    continue;
                };
                if let Some(partition) = sets.resolve(classpath, &member) {
                    sites
                        .entry(partition)
                        .or_default()
                        .push((class.name.clone(), member.owner));
                }
            }
        }
    }
    sites
}

/// Owners named by field and method references that resolve nowhere, with their site counts.
fn unresolved_owners(classpath: &ClassPath) -> BTreeMap<String, usize> {
    let mut unresolved = BTreeMap::new();
    for class in classpath.own_classes() {
        for method in &class.methods {
            let Some(code) = method.code.as_ref() else {
                continue;
            };
            for member in code.instructions.iter().filter_map(|insn| insn.member_ref()) {
                if member.owner.starts_with('[') || classpath.resolve(&member.owner).is_some() {
                    continue;
                }
                *unresolved.entry(member.owner).or_insert(0) += 1;
            }
        }
    }
    unresolved
}

/// Weakest access every declaration of the partition can share, or `None` to leave it alone.
fn required_access(
    classpath: &ClassPath,
    context: &PassContext,
    reflected: &ReflectedConstructorFilter,
    kind: MemberKind,
    members: &[MemberRef],
    sites: Option<&Vec<(String, String)>>,
) -> Option<Access> {
    let profile = context.profile;
    let mut declarations = Vec::new();
    let mut required = Access::Private;
    for member in members {
        if member.name == "<clinit>" {
            return None;
        }
        let excluded = match kind {
            MemberKind::Field => profile
                .excluded_fields
                .matches(&member.owner, &member.name, &member.desc),
            MemberKind::Method => profile
                .excluded_methods
                .matches(&member.owner, &member.name, &member.desc),
        };
        if excluded {
            return None;
        }
        let metadata = classpath.resolve(&member.owner)?;
        let desc = member.member_desc();
        let access = match kind {
            MemberKind::Field => metadata.field_access(&desc),
            MemberKind::Method => metadata.method_access(&desc),
        };
        let Some(access) = access else {
            continue;
        };
        if metadata.is_dependency() {
            // Overriding may not reduce the access of an external declaration.
            required = required.max(Access::of(access));
            continue;
        }
        if metadata.is_interface()
            || profile
                .entry_points
                .matches(&member.owner, &member.name, &member.desc)
            || reflected.matches(&member.owner, &member.name, &member.desc)
        {
            required = Access::Public;
        }
        declarations.push((member.owner.clone(), access));
    }
    if declarations.is_empty() {
        return None;
    }

    if kind == MemberKind::Method {
        let is_instance = declarations
            .iter()
            .any(|(_, access)| access & ACC_STATIC == 0)
            && members.iter().all(|member| member.name != "<init>");
        // Private instance methods are not dispatched virtually.
        if is_instance {
            required = required.max(Access::Package);
        }
        let packages: Vec<&str> = declarations
            .iter()
            .map(|(owner, _)| package_prefix(owner))
            .collect();
        if declarations.len() > 1 && packages.iter().any(|package| *package != packages[0]) {
            required = required.max(Access::Protected);
        }
    }

    for (site_class, site_owner) in sites.into_iter().flatten() {
        for (owner, access) in &declarations {
            let level = site_access(classpath, site_class, site_owner, owner, *access);
            required = required.max(level);
        }
    }
    Some(required)
}

/// Weakest access letting code in `site_class` reach a member of `owner` through `site_owner`.
fn site_access(
    classpath: &ClassPath,
    site_class: &str,
    site_owner: &str,
    owner: &str,
    access: u16,
) -> Access {
    if site_class == owner {
        return Access::Private;
    }
    if package_prefix(site_class) == package_prefix(owner) {
        return Access::Package;
    }
    let (Some(site), Some(declaring)) = (classpath.resolve(site_class), classpath.resolve(owner))
    else {
        return Access::Public;
    };
    if declaring.is_assignable_from(classpath, &site) {
        let through_subclass = access & ACC_STATIC != 0
            || classpath
                .resolve(site_owner)
                .is_some_and(|target| site.is_assignable_from(classpath, &target));
        if through_subclass {
            return Access::Protected;
        }
    }
    Access::Public
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_INTERFACE, ClassNode};
    use crate::opcodes;
    use crate::profile::Profile;
    use crate::remap::name_map::NameMap;
    use crate::test_support::{class, classpath_of, code, field, field_insn, invoke, method, op, var};

    fn run(classes: Vec<ClassNode>) -> ClassPath {
        let mut classpath = classpath_of(classes);
        let profile = Profile::builtin().expect("profile");
        let names = NameMap::default();
        let mut context = PassContext::new(&profile, &names);
        VisibilityTransformer
            .transform(&mut classpath, &mut context)
            .expect("transform");
        classpath
    }

    fn method_access(classpath: &ClassPath, owner: &str, name: &str) -> Access {
        let class = classpath.class_node(owner).expect("class");
        let method = class
            .methods
            .iter()
            .find(|method| method.name == name)
            .expect("method");
        Access::of(method.access)
    }

    #[test]
    fn field_used_only_by_its_class_becomes_private() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("b", "I", ACC_PUBLIC | ACC_STATIC));
        a.methods.push(method(
            "c",
            "()I",
            ACC_PUBLIC | ACC_STATIC,
            Some(code(vec![
                field_insn(opcodes::GETSTATIC, "a", "b", "I"),
                op(opcodes::IRETURN),
            ])),
        ));

        let classpath = run(vec![a]);

        let class = classpath.class_node("a").expect("class");
        assert_eq!(Access::of(class.fields[0].access), Access::Private);
        assert_eq!(class.fields[0].access & ACC_STATIC, ACC_STATIC);
        assert_eq!(method_access(&classpath, "a", "c"), Access::Private);
    }

    #[test]
    fn access_from_another_package_stays_public() {
        let mut a = class("x/a", Some("java/lang/Object"));
        a.methods.push(method(
            "f",
            "()V",
            ACC_PUBLIC | ACC_STATIC,
            Some(code(vec![op(opcodes::RETURN)])),
        ));
        let mut b = class("y/b", Some("java/lang/Object"));
        b.methods.push(method(
            "g",
            "()V",
            ACC_STATIC,
            Some(code(vec![
                invoke(opcodes::INVOKESTATIC, "x/a", "f", "()V"),
                op(opcodes::RETURN),
            ])),
        ));

        let classpath = run(vec![a, b]);

        assert_eq!(method_access(&classpath, "x/a", "f"), Access::Public);
    }

    #[test]
    fn subclass_in_another_package_needs_protected() {
        let mut a = class("x/a", Some("java/lang/Object"));
        a.fields.push(field("v", "I", ACC_PUBLIC));
        let mut b = class("y/b", Some("x/a"));
        b.methods.push(method(
            "g",
            "()I",
            ACC_PUBLIC,
            Some(code(vec![
                var(opcodes::ALOAD, 0),
                field_insn(opcodes::GETFIELD, "y/b", "v", "I"),
                op(opcodes::IRETURN),
            ])),
        ));

        let classpath = run(vec![a, b]);

        let class = classpath.class_node("x/a").expect("class");
        assert_eq!(Access::of(class.fields[0].access), Access::Protected);
    }

    #[test]
    fn interface_methods_and_runtime_overrides_stay_public() {
        let mut i = class("i", Some("java/lang/Object"));
        i.access |= ACC_INTERFACE;
        i.methods.push(method("f", "()V", ACC_PUBLIC, None));
        let mut a = class("a", Some("java/lang/Object"));
        a.interfaces.push("i".to_string());
        a.methods.push(method("f", "()V", ACC_PUBLIC, Some(code(vec![op(opcodes::RETURN)]))));
        a.methods.push(method(
            "toString",
            "()Ljava/lang/String;",
            ACC_PUBLIC,
            Some(code(vec![op(opcodes::ACONST_NULL), op(opcodes::ARETURN)])),
        ));

        let classpath = run(vec![i, a]);

        assert_eq!(method_access(&classpath, "a", "f"), Access::Public);
        assert_eq!(method_access(&classpath, "i", "f"), Access::Public);
        assert_eq!(method_access(&classpath, "a", "toString"), Access::Public);
    }

    #[test]
    fn references_to_missing_classes_are_reported_once_per_class() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(method(
            "f",
            "()V",
            ACC_PUBLIC | ACC_STATIC,
            Some(code(vec![
                invoke(opcodes::INVOKESTATIC, "x/Missing", "g", "()V"),
                invoke(opcodes::INVOKESTATIC, "x/Missing", "h", "()V"),
                op(opcodes::RETURN),
            ])),
        ));
        let mut classpath = classpath_of(vec![a]);
        let profile = Profile::builtin().expect("profile");
        let names = NameMap::default();
        let mut context = PassContext::new(&profile, &names);

        VisibilityTransformer
            .transform(&mut classpath, &mut context)
            .expect("transform");

        assert_eq!(context.diagnostics.count(Rule::UnresolvedReference), 1);
        let diagnostic = context.diagnostics.iter().next().expect("diagnostic");
        assert!(diagnostic.message.contains("2 references to unresolved class x/Missing"));
    }
}
