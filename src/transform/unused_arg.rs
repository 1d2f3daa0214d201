use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::Result;

use crate::analysis::const_source::{ConstSource, ConstSourceInterpreter};
use crate::analysis::frame::analyze_frames;
use crate::classpath::ClassPath;
use crate::descriptor::MethodType;
use crate::disjoint_set::PartitionId;
use crate::filter::MemberFilter;
use crate::insn::{argument_expressions, argument_local, remove_argument};
use crate::ir::{Insn, MemberRef, MethodNode};
use crate::partition::MemberSets;
use crate::transform::{PassContext, Transformer, method_bodies, method_node, method_node_mut};

/// Removes int arguments that no implementation reads and every caller passes as a literal
/// constant. Call sites lose the constant, declarations lose the parameter.
pub(crate) struct UnusedArgTransformer;

impl Transformer for UnusedArgTransformer {
    fn name(&self) -> &'static str {
        "unused_arg"
    }

    fn transform(&self, classpath: &mut ClassPath, context: &mut PassContext) -> Result<()> {
        let methods = MemberSets::methods(classpath);
        let mut usage = ArgumentUsage::default();
        let mut sites = Vec::new();

        for (partition, members) in methods.iter() {
            if !is_removable_partition(classpath, context, members) {
                usage.retain_all(partition);
            }
        }
        for member in method_bodies(classpath) {
            let Some(method) = method_node(classpath, &member) else {
                continue;
            };
            if let Some(partition) = methods.partition(&member) {
                usage.retain_read(partition, method);
            }
            let Some(code) = method.code.as_ref() else {
                continue;
            };
            let frames = match analyze_frames(&ConstSourceInterpreter, method) {
                Ok(frames) => frames,
                Err(error) => {
                    context.skip_method(self.name(), &member.owner, method, &error);
                    for insn in &code.instructions {
                        if let Some(callee) = callee(classpath, &methods, insn) {
                            usage.retain_all(callee);
                        }
                    }
                    continue;
                }
            };
            for (index, insn) in code.instructions.iter().enumerate() {
                let Some(callee) = callee(classpath, &methods, insn) else {
                    continue;
                };
                let sources = frames.before(index).and_then(|frame| {
                    argument_sources(insn, |depth| frame.peek(depth).map(|slot| slot.value))
                });
                let Some(sources) = sources else {
                    usage.retain_all(callee);
                    continue;
                };
                let expressions = argument_expressions(&code.instructions, index, |_| true);
                for (argument, source) in sources.iter().enumerate() {
                    let direct = match (source, &expressions) {
                        (ConstSource::Insn(constant), Some(expressions)) => {
                            expressions.get(argument) == Some(&(*constant..*constant + 1))
                        }
                        _ => false,
                    };
                    if !direct {
                        usage.retain(callee, argument);
                    }
                }
                sites.push(CallSite {
                    caller: member.clone(),
                    index,
                    callee,
                    sources,
                });
            }
        }

        let removals = usage.removable(classpath, &methods);
        if removals.is_empty() {
            tracing::info!(removed = 0, "removed unused arguments");
            return Ok(());
        }

        let mut edits: BTreeMap<MemberRef, Vec<(usize, String, Vec<usize>)>> = BTreeMap::new();
        for site in sites {
            let Some(arguments) = removals.get(&site.callee) else {
                continue;
            };
            let Some(member) = methods.canonical(site.callee) else {
                continue;
            };
            let desc = strip_arguments(&member.desc, arguments)?;
            let constants = arguments
                .iter()
                .filter_map(|argument| match site.sources.get(*argument) {
                    Some(ConstSource::Insn(index)) => Some(*index),
                    _ => None,
                })
                .collect();
            edits
                .entry(site.caller)
                .or_default()
                .push((site.index, desc, constants));
        }
        for (caller, calls) in edits {
            let Some(method) = method_node_mut(classpath, &caller) else {
                continue;
            };
            let Some(code) = method.code.as_mut() else {
                continue;
            };
            let mut constants = Vec::new();
            for (index, desc, removed) in calls {
                if let Some(Insn::Method { desc: current, .. }) = code.instructions.get_mut(index) {
                    *current = desc;
                }
                constants.extend(removed);
            }
            code.remove_all(constants);
        }

        let mut removed = 0usize;
        for (partition, arguments) in &removals {
            for member in methods.members(*partition) {
                let Some(method) = method_node_mut(classpath, member) else {
                    continue;
                };
                for argument in arguments.iter().rev() {
                    remove_argument(method, *argument)?;
                }
                removed += arguments.len();
            }
        }
        tracing::info!(removed, partitions = removals.len(), "removed unused arguments");
        Ok(())
    }
}

/// Call whose arguments are all pushed by known instructions, as seen by the caller.
struct CallSite {
    caller: MemberRef,
    index: usize,
    callee: PartitionId,
    sources: Vec<ConstSource>,
}

/// Argument positions that must stay, per method partition.
#[derive(Debug, Default)]
struct ArgumentUsage {
    retained: HashMap<PartitionId, BTreeSet<usize>>,
    all: HashSet<PartitionId>,
}

impl ArgumentUsage {
    fn retain(&mut self, partition: PartitionId, argument: usize) {
        self.retained.entry(partition).or_default().insert(argument);
    }

    fn retain_all(&mut self, partition: PartitionId) {
        self.all.insert(partition);
    }

    /// Keeps the arguments `method` reads and every argument that is not an int.
    fn retain_read(&mut self, partition: PartitionId, method: &MethodNode) {
        let Ok(method_type) = MethodType::parse(&method.desc) else {
            self.retain_all(partition);
            return;
        };
        let Some(code) = method.code.as_ref() else {
            return;
        };
        if code.has_subroutines() {
            self.retain_all(partition);
            return;
        }
        let read: HashSet<u16> = code
            .instructions
            .iter()
            .filter_map(|insn| match insn {
                Insn::Var { var, .. } if insn.is_load() => Some(*var),
                Insn::Iinc { var, .. } => Some(*var),
                _ => None,
            })
            .collect();
        for argument in 0..method_type.arguments.len() {
            let local = argument_local(method.is_static(), &method_type, argument);
            if read.contains(&local) {
                self.retain(partition, argument);
            }
        }
    }

    /// Removable argument positions of each partition, ascending.
    fn removable(
        &self,
        classpath: &ClassPath,
        methods: &MemberSets,
    ) -> BTreeMap<PartitionId, Vec<usize>> {
        let mut removals = BTreeMap::new();
        let mut claimed = HashSet::new();
        for (partition, members) in methods.iter() {
            if self.all.contains(&partition) {
                continue;
            }
            let Some(canonical) = members.first() else {
                continue;
            };
            let Ok(method_type) = MethodType::parse(&canonical.desc) else {
                continue;
            };
            let retained = self.retained.get(&partition);
            let arguments: Vec<usize> = method_type
                .arguments
                .iter()
                .enumerate()
                .filter(|(argument, ty)| {
                    ty.is_int_sort() && !retained.is_some_and(|kept| kept.contains(argument))
                })
                .map(|(argument, _)| argument)
                .collect();
            if arguments.is_empty() {
                continue;
            }
            let Ok(desc) = strip_arguments(&canonical.desc, &arguments) else {
                continue;
            };
            let stripped: Vec<MemberRef> = members
                .iter()
                .map(|member| MemberRef {
                    owner: member.owner.clone(),
                    name: member.name.clone(),
                    desc: desc.clone(),
                })
                .collect();
            let clashes = stripped.iter().any(|member| {
                methods.resolve(classpath, member).is_some() || claimed.contains(member)
            });
            if clashes {
                tracing::debug!(method = %canonical, desc, "argument removal would clash");
                continue;
            }
            claimed.extend(stripped);
            removals.insert(partition, arguments);
        }
        removals
    }
}

/// Partitions whose signature this pass may change: every member is an owned, non-native,
/// non-excluded method, and none is an entry point or an initializer.
fn is_removable_partition(classpath: &ClassPath, context: &PassContext, members: &[MemberRef]) -> bool {
    let profile = context.profile;
    members.iter().all(|member| {
        if member.name == "<clinit>" {
            return false;
        }
        if profile
            .entry_points
            .matches(&member.owner, &member.name, &member.desc)
            || profile
                .excluded_methods
                .matches(&member.owner, &member.name, &member.desc)
        {
            return false;
        }
        let Some(class) = classpath.class_node(&member.owner) else {
            return false;
        };
        !class
            .method(&member.member_desc())
            .is_some_and(MethodNode::is_native)
    })
}

fn callee(classpath: &ClassPath, methods: &MemberSets, insn: &Insn) -> Option<PartitionId> {
    if !matches!(insn, Insn::Method { .. }) {
        return None;
    }
    methods.resolve(classpath, &insn.member_ref()?)
}

/// Source of each argument of the call `insn`, in argument order.
fn argument_sources(insn: &Insn, peek: impl Fn(usize) -> Option<ConstSource>) -> Option<Vec<ConstSource>> {
    let Insn::Method { desc, .. } = insn else {
        return None;
    };
    let method_type = MethodType::parse(desc).ok()?;
    let count = method_type.arguments.len();
    (0..count).map(|argument| peek(count - 1 - argument)).collect()
}

/// `desc` without the arguments at `arguments`.
fn strip_arguments(desc: &str, arguments: &[usize]) -> Result<String> {
    let mut method_type = MethodType::parse(desc)?;
    for argument in arguments.iter().rev() {
        if *argument < method_type.arguments.len() {
            method_type.arguments.remove(*argument);
        }
    }
    Ok(method_type.descriptor())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC, ClassNode};
    use crate::opcodes;
    use crate::profile::Profile;
    use crate::remap::name_map::NameMap;
    use crate::test_support::{class, classpath_of, code, iconst, invoke, method, op, var};

    fn run(classes: Vec<ClassNode>) -> ClassPath {
        let mut classpath = classpath_of(classes);
        let profile = Profile::builtin().expect("profile");
        let names = NameMap::default();
        let mut context = PassContext::new(&profile, &names);
        UnusedArgTransformer
            .transform(&mut classpath, &mut context)
            .expect("transform");
        classpath
    }

    fn main_calling(call: Vec<Insn>) -> MethodNode {
        let mut body = call;
        body.push(op(opcodes::RETURN));
        method("main", "([Ljava/lang/String;)V", ACC_PUBLIC | ACC_STATIC, Some(code(body)))
    }

    fn find<'a>(classpath: &'a ClassPath, name: &str) -> &'a MethodNode {
        classpath
            .class_node("a")
            .expect("class")
            .methods
            .iter()
            .find(|method| method.name == name)
            .expect("method")
    }

    #[test]
    fn constant_argument_never_read_is_removed_from_call_and_declaration() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(main_calling(vec![
            var(opcodes::ALOAD, 0),
            iconst(42),
            iconst(7),
            invoke(opcodes::INVOKESTATIC, "a", "f", "(Ljava/lang/Object;II)I"),
            op(opcodes::POP),
        ]));
        a.methods.push(method(
            "f",
            "(Ljava/lang/Object;II)I",
            ACC_STATIC,
            Some(code(vec![var(opcodes::ILOAD, 2), op(opcodes::IRETURN)])),
        ));

        let classpath = run(vec![a]);

        let f = find(&classpath, "f");
        assert_eq!(f.desc, "(Ljava/lang/Object;I)I");
        assert_eq!(
            f.code.as_ref().expect("code").instructions,
            vec![var(opcodes::ILOAD, 1), op(opcodes::IRETURN)]
        );
        assert_eq!(
            find(&classpath, "main").code.as_ref().expect("code").instructions,
            vec![
                var(opcodes::ALOAD, 0),
                iconst(7),
                invoke(opcodes::INVOKESTATIC, "a", "f", "(Ljava/lang/Object;I)I"),
                op(opcodes::POP),
                op(opcodes::RETURN),
            ]
        );
    }

    #[test]
    fn argument_computed_by_the_caller_is_kept() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(main_calling(vec![
            var(opcodes::ALOAD, 0),
            op(opcodes::ARRAYLENGTH),
            invoke(opcodes::INVOKESTATIC, "a", "f", "(I)V"),
        ]));
        a.methods.push(method(
            "f",
            "(I)V",
            ACC_STATIC,
            Some(code(vec![op(opcodes::RETURN)])),
        ));

        let classpath = run(vec![a]);

        assert_eq!(find(&classpath, "f").desc, "(I)V");
    }

    #[test]
    fn removal_is_skipped_when_the_stripped_signature_exists() {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods.push(main_calling(vec![
            iconst(1),
            invoke(opcodes::INVOKESTATIC, "a", "f", "(I)V"),
            invoke(opcodes::INVOKESTATIC, "a", "f", "()V"),
        ]));
        a.methods.push(method("f", "(I)V", ACC_STATIC, Some(code(vec![op(opcodes::RETURN)]))));
        a.methods.push(method("f", "()V", ACC_STATIC, Some(code(vec![op(opcodes::RETURN)]))));

        let classpath = run(vec![a]);

        let descs: Vec<&str> = classpath
            .class_node("a")
            .expect("class")
            .methods
            .iter()
            .filter(|method| method.name == "f")
            .map(|method| method.desc.as_str())
            .collect();
        assert_eq!(descs, vec!["(I)V", "()V"]);
    }
}
