use std::collections::{BTreeSet, HashSet, VecDeque};

use anyhow::Result;

use crate::classpath::ClassPath;
use crate::disjoint_set::PartitionId;
use crate::filter::{MemberFilter, ReflectedConstructorFilter};
use crate::insn::remove_dead_code;
use crate::ir::{Insn, MemberRef};
use crate::partition::MemberSets;
use crate::report::{Diagnostic, Rule};
use crate::transform::{PassContext, Transformer, dynamic_classes, handle_targets, method_node};

/// Deletes method partitions that no live code can call. Liveness starts at protected
/// partitions and follows the calls in their reachable instructions.
pub(crate) struct UnusedMethodTransformer;

impl Transformer for UnusedMethodTransformer {
    fn name(&self) -> &'static str {
        "unused_method"
    }

    fn transform(&self, classpath: &mut ClassPath, context: &mut PassContext) -> Result<()> {
        let reflected = ReflectedConstructorFilter::create(classpath);
        let dynamic = dynamic_classes(classpath);
        for class in &dynamic {
            context.diagnostics.report(Diagnostic::class(
                Rule::UnsupportedShape,
                class.clone(),
                format!("{} kept every method of {class}: invokedynamic", self.name()),
            ));
        }

        let methods = MemberSets::methods(classpath);
        let mut protected: HashSet<PartitionId> = methods
            .iter()
            .filter(|(_, members)| is_protected(classpath, context, &reflected, &dynamic, members))
            .map(|(partition, _)| partition)
            .collect();
        protected.extend(handle_targets(classpath, &methods));
        let live = reachable_partitions(classpath, &methods, &protected, context, self.name());

        let doomed: Vec<MemberRef> = methods
            .iter()
            .filter(|(partition, _)| !live.contains(partition))
            .flat_map(|(_, members)| members.iter().cloned())
            .collect();
        let mut removed = 0usize;
        for member in doomed {
            let Some(class) = classpath.class_node_mut(&member.owner) else {
                continue;
            };
            let before = class.methods.len();
            class
                .methods
                .retain(|method| method.name != member.name || method.desc != member.desc);
            if class.methods.len() != before {
                tracing::debug!(method = %member, "removed unused method");
                removed += 1;
            }
        }
        tracing::info!(removed, live = live.len(), "removed unused methods");
        Ok(())
    }
}

/// Partitions reachable from `roots` through calls in reachable instructions.
fn reachable_partitions(
    classpath: &ClassPath,
    methods: &MemberSets,
    roots: &HashSet<PartitionId>,
    context: &mut PassContext,
    pass: &str,
) -> HashSet<PartitionId> {
    let mut live = roots.clone();
    let mut pending: VecDeque<PartitionId> = roots.iter().copied().collect();
    while let Some(partition) = pending.pop_front() {
        for member in methods.members(partition) {
            let Some(method) = method_node(classpath, member) else {
                continue;
            };
            if method.code.is_none() {
                continue;
            }
            let mut body = method.clone();
            if let Err(error) = remove_dead_code(&mut body) {
                context.skip_method(pass, &member.owner, method, &error);
                body = method.clone();
            }
            let Some(code) = body.code.as_ref() else {
                continue;
            };
            for insn in &code.instructions {
                if !matches!(insn, Insn::Method { .. }) {
                    continue;
                }
                let Some(callee) = insn
                    .member_ref()
                    .and_then(|callee| methods.resolve(classpath, &callee))
                else {
                    continue;
                };
                if live.insert(callee) {
                    pending.push_back(callee);
                }
            }
        }
    }
    live
}

fn is_protected(
    classpath: &ClassPath,
    context: &PassContext,
    reflected: &ReflectedConstructorFilter,
    dynamic: &BTreeSet<String>,
    members: &[MemberRef],
) -> bool {
    members.iter().any(|member| {
        let Some(class) = classpath.class_node(&member.owner) else {
            // Declared or inherited from a dependency or the runtime.
            return true;
        };
        let native = class
            .method(&member.member_desc())
            .is_some_and(|method| method.is_native());
        native
            || dynamic.contains(&member.owner)
            || context
                .profile
                .entry_points
                .matches(&member.owner, &member.name, &member.desc)
            || context
                .profile
                .excluded_methods
                .matches(&member.owner, &member.name, &member.desc)
            || reflected.matches(&member.owner, &member.name, &member.desc)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC, ClassNode};
    use crate::opcodes;
    use crate::profile::Profile;
    use crate::remap::name_map::NameMap;
    use crate::test_support::{class, classpath_of, code, invoke, jump, label, method, op};

    fn run(classes: Vec<ClassNode>) -> ClassPath {
        let mut classpath = classpath_of(classes);
        let profile = Profile::builtin().expect("profile");
        let names = NameMap::default();
        let mut context = PassContext::new(&profile, &names);
        UnusedMethodTransformer
            .transform(&mut classpath, &mut context)
            .expect("transform");
        classpath
    }

    fn method_names(classpath: &ClassPath, owner: &str) -> Vec<String> {
        classpath
            .class_node(owner)
            .expect("class")
            .methods
            .iter()
            .map(|method| method.name.clone())
            .collect()
    }

    fn returning(name: &str, access: u16) -> crate::ir::MethodNode {
        method(name, "()V", access, Some(code(vec![op(opcodes::RETURN)])))
    }

    #[test]
    fn chains_of_unused_methods_are_removed() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(method(
            "b",
            "()V",
            ACC_STATIC,
            Some(code(vec![
                invoke(opcodes::INVOKESTATIC, "a", "c", "()V"),
                op(opcodes::RETURN),
            ])),
        ));
        a.methods.push(returning("c", ACC_STATIC));
        a.methods.push(method(
            "main",
            "([Ljava/lang/String;)V",
            ACC_PUBLIC | ACC_STATIC,
            Some(code(vec![op(opcodes::RETURN)])),
        ));

        let classpath = run(vec![a]);

        assert_eq!(method_names(&classpath, "a"), vec!["main"]);
    }

    #[test]
    fn recursion_does_not_keep_a_method_alive() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(method(
            "b",
            "()V",
            ACC_STATIC,
            Some(code(vec![
                invoke(opcodes::INVOKESTATIC, "a", "b", "()V"),
                op(opcodes::RETURN),
            ])),
        ));

        let classpath = run(vec![a]);

        assert!(method_names(&classpath, "a").is_empty());
    }

    #[test]
    fn overrides_of_runtime_methods_are_kept() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(method(
            "toString",
            "()Ljava/lang/String;",
            ACC_PUBLIC,
            Some(code(vec![op(opcodes::ACONST_NULL), op(opcodes::ARETURN)])),
        ));

        let classpath = run(vec![a]);

        assert_eq!(method_names(&classpath, "a"), vec!["toString"]);
    }

    #[test]
    fn unreferenced_override_survives_through_its_partition() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(returning("f", ACC_PUBLIC));
        let mut b = class("b", Some("a"));
        b.methods.push(returning("f", ACC_PUBLIC));
        let mut c = class("c", Some("java/lang/Object"));
        c.methods.push(method(
            "main",
            "([Ljava/lang/String;)V",
            ACC_PUBLIC | ACC_STATIC,
            Some(code(vec![
                op(opcodes::ACONST_NULL),
                invoke(opcodes::INVOKEVIRTUAL, "a", "f", "()V"),
                op(opcodes::RETURN),
            ])),
        ));

        let classpath = run(vec![a, b, c]);

        assert_eq!(method_names(&classpath, "a"), vec!["f"]);
        assert_eq!(method_names(&classpath, "b"), vec!["f"]);
    }

    fn main_calling(instructions: Vec<Insn>) -> crate::ir::MethodNode {
        let mut body = instructions;
        body.push(op(opcodes::RETURN));
        method("main", "([Ljava/lang/String;)V", ACC_PUBLIC | ACC_STATIC, Some(code(body)))
    }

    #[test]
    fn excluded_methods_are_kept_without_being_entry_points() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(returning("keep", 0));
        a.methods.push(returning("drop", 0));
        let mut classpath = classpath_of(vec![a]);
        let profile = Profile::from_json(r#"{"excluded_methods": ["**.keep *"]}"#).expect("profile");
        let names = NameMap::default();
        let mut context = PassContext::new(&profile, &names);

        UnusedMethodTransformer
            .transform(&mut classpath, &mut context)
            .expect("transform");

        assert_eq!(method_names(&classpath, "a"), vec!["keep"]);
    }

    #[test]
    fn dead_methods_calling_each_other_are_removed() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(method(
            "b",
            "()V",
            ACC_STATIC,
            Some(code(vec![
                invoke(opcodes::INVOKESTATIC, "a", "c", "()V"),
                op(opcodes::RETURN),
            ])),
        ));
        a.methods.push(method(
            "c",
            "()V",
            ACC_STATIC,
            Some(code(vec![
                invoke(opcodes::INVOKESTATIC, "a", "b", "()V"),
                op(opcodes::RETURN),
            ])),
        ));
        a.methods.push(main_calling(Vec::new()));

        let classpath = run(vec![a]);

        assert_eq!(method_names(&classpath, "a"), vec!["main"]);
    }

    #[test]
    fn calls_in_unreachable_code_do_not_keep_the_callee() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(main_calling(vec![
            jump(opcodes::GOTO, 0),
            invoke(opcodes::INVOKESTATIC, "a", "b", "()V"),
            label(0),
        ]));
        a.methods.push(returning("b", ACC_STATIC));

        let classpath = run(vec![a]);

        assert_eq!(method_names(&classpath, "a"), vec!["main"]);
    }

    #[test]
    fn method_handle_targets_are_kept() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(main_calling(Vec::new()));
        a.method_handles.push("b.run ()V".parse().expect("member"));
        let mut b = class("b", Some("java/lang/Object"));
        b.methods.push(method(
            "run",
            "()V",
            ACC_STATIC,
            Some(code(vec![
                invoke(opcodes::INVOKESTATIC, "b", "helper", "()V"),
                op(opcodes::RETURN),
            ])),
        ));
        b.methods.push(returning("helper", ACC_STATIC));
        b.methods.push(returning("unused", ACC_STATIC));

        let classpath = run(vec![a, b]);

        assert_eq!(method_names(&classpath, "b"), vec!["run", "helper"]);
    }
}
