use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Result;

use crate::analysis::frame::{Frames, analyze_frames};
use crate::analysis::int_value::{
    IntBranchResult, IntInterpreter, IntValueSet, evaluate_binary, evaluate_unary,
};
use crate::classpath::ClassPath;
use crate::descriptor::MethodType;
use crate::disjoint_set::PartitionId;
use crate::filter::{MemberFilter, ReflectedConstructorFilter};
use crate::insn::{delete_expression, is_pure, remove_dead_code, replace_expression};
use crate::ir::{Insn, LabelId, MethodNode};
use crate::opcodes;
use crate::partition::MemberSets;
use crate::report::{Diagnostic, Rule};
use crate::transform::{
    PassContext, Transformer, dynamic_classes, handle_targets, method_bodies, method_node,
    method_node_mut,
};

/// Propagates integer constants passed at every reachable call site into the callee and folds
/// conditional branches whose outcome is then fixed.
pub(crate) struct ConstantArgTransformer;

impl Transformer for ConstantArgTransformer {
    fn name(&self) -> &'static str {
        "constant_arg"
    }

    fn transform(&self, classpath: &mut ClassPath, context: &mut PassContext) -> Result<()> {
        let methods = MemberSets::methods(classpath);
        let arguments = collect_arguments(classpath, &methods, context);

        let mut simplified = 0usize;
        for member in method_bodies(classpath) {
            let Some(method) = method_node(classpath, &member) else {
                continue;
            };
            let parameters = methods
                .partition(&member)
                .and_then(|partition| arguments.known(partition))
                .unwrap_or_default();
            let frames = match analyze_frames(&IntInterpreter::new(parameters), method) {
                Ok(frames) => frames,
                Err(error) => {
                    context.skip_method(self.name(), &member.owner, method, &error);
                    continue;
                }
            };
            let folds = fixed_branches(method, &frames);
            if folds.is_empty() {
                continue;
            }
            let mut method = method.clone();
            simplified += folds.len();
            fold_branches(&mut method, folds);
            remove_dead_code(&mut method)?;
            if let Some(target) = method_node_mut(classpath, &member) {
                *target = method;
            }
        }
        tracing::info!(
            simplified,
            partitions = arguments.values.len(),
            "simplified branches on constant arguments"
        );
        Ok(())
    }
}

/// Argument values seen for each method partition, indexed by argument slot without the
/// receiver. Partitions called from outside the analysed code are pinned to unknown.
#[derive(Debug, Default)]
struct ArgumentValues {
    values: HashMap<PartitionId, Vec<IntValueSet>>,
    pinned: HashSet<PartitionId>,
}

impl ArgumentValues {
    /// Parameters of `partition`, or `None` when nothing useful is known.
    fn known(&self, partition: PartitionId) -> Option<Vec<IntValueSet>> {
        if self.pinned.contains(&partition) {
            return None;
        }
        self.values.get(&partition).cloned()
    }

    fn pin(&mut self, partition: PartitionId) -> bool {
        self.values.remove(&partition);
        self.pinned.insert(partition)
    }

    /// Merges one call site. Returns whether the partition's parameters changed.
    fn merge(&mut self, partition: PartitionId, site: Vec<IntValueSet>) -> bool {
        if self.pinned.contains(&partition) {
            return false;
        }
        match self.values.get_mut(&partition) {
            None => {
                self.values.insert(partition, site);
                true
            }
            Some(existing) => {
                let mut changed = false;
                for (current, incoming) in existing.iter_mut().zip(site) {
                    let merged = current.union(&incoming);
                    if merged != *current {
                        *current = merged;
                        changed = true;
                    }
                }
                changed
            }
        }
    }
}

fn collect_arguments(
    classpath: &ClassPath,
    methods: &MemberSets,
    context: &mut PassContext,
) -> ArgumentValues {
    let profile = context.profile;
    let reflected = ReflectedConstructorFilter::create(classpath);
    let dynamic = dynamic_classes(classpath);
    for class in &dynamic {
        context.diagnostics.report(Diagnostic::class(
            Rule::UnsupportedShape,
            class.clone(),
            format!("constant_arg treated every method of {class} as externally called: invokedynamic"),
        ));
    }
    let handles = handle_targets(classpath, methods);
    let mut arguments = ArgumentValues::default();
    let mut pending = VecDeque::new();
    let mut queued = HashSet::new();

    for (partition, members) in methods.iter() {
        let external = handles.contains(&partition)
            || members.iter().any(|member| {
                member.name == "<clinit>"
                    || dynamic.contains(&member.owner)
                    || profile
                        .entry_points
                        .matches(&member.owner, &member.name, &member.desc)
                    || reflected.matches(&member.owner, &member.name, &member.desc)
                    || classpath
                        .resolve(&member.owner)
                        .is_none_or(|class| class.is_dependency())
            });
        if external {
            arguments.pin(partition);
            if queued.insert(partition) {
                pending.push_back(partition);
            }
        }
    }

    let mut failed = HashSet::new();
    while let Some(partition) = pending.pop_front() {
        queued.remove(&partition);
        let parameters = arguments.known(partition).unwrap_or_default();
        for member in methods.members(partition) {
            let Some(method) = method_node(classpath, member) else {
                continue;
            };
            if method.code.is_none() {
                continue;
            }
            let interpreter = IntInterpreter::new(parameters.clone());
            let sites = match analyze_frames(&interpreter, method) {
                Ok(frames) => call_sites(classpath, methods, method, Some(&frames)),
                Err(error) => {
                    if failed.insert(member.clone()) {
                        context.skip_method("constant_arg", &member.owner, method, &error);
                    }
                    call_sites(classpath, methods, method, None)
                }
            };
            for (callee, values) in sites {
                let changed = match values {
                    Some(values) => arguments.merge(callee, values),
                    None => arguments.pin(callee),
                };
                if changed && queued.insert(callee) {
                    pending.push_back(callee);
                }
            }
        }
    }
    arguments
}

/// Callee partition and argument values of every reachable call in `method`. Without frames the
/// values are unknown and the callee must be pinned.
fn call_sites(
    classpath: &ClassPath,
    methods: &MemberSets,
    method: &MethodNode,
    frames: Option<&Frames<IntValueSet>>,
) -> Vec<(PartitionId, Option<Vec<IntValueSet>>)> {
    let Some(code) = method.code.as_ref() else {
        return Vec::new();
    };
    let mut sites = Vec::new();
    for (index, insn) in code.instructions.iter().enumerate() {
        let Insn::Method { name, .. } = insn else {
            continue;
        };
        if name == "<clinit>" {
            continue;
        }
        let Some(callee) = insn
            .member_ref()
            .and_then(|member| methods.resolve(classpath, &member))
        else {
            continue;
        };
        let values = match frames {
            Some(frames) => {
                let Some(frame) = frames.before(index) else {
                    continue;
                };
                slot_values(insn, |depth| frame.peek(depth).map(|slot| slot.value.clone()))
            }
            None => None,
        };
        sites.push((callee, values));
    }
    sites
}

/// Lays the stack values of a call's arguments out by argument slot.
fn slot_values(
    insn: &Insn,
    peek: impl Fn(usize) -> Option<IntValueSet>,
) -> Option<Vec<IntValueSet>> {
    let Insn::Method { desc, .. } = insn else {
        return None;
    };
    let method_type = MethodType::parse(desc).ok()?;
    let count = method_type.arguments.len();
    let mut values = Vec::new();
    for (position, argument) in method_type.arguments.iter().enumerate() {
        let value = if argument.is_int_sort() {
            peek(count - 1 - position)?
        } else {
            IntValueSet::Unknown
        };
        values.push(value);
        for _ in 1..argument.size() {
            values.push(IntValueSet::Unknown);
        }
    }
    Some(values)
}

/// Conditional branch at an instruction index and whether it is always taken.
struct Fold {
    index: usize,
    target: LabelId,
    operands: usize,
    taken: bool,
}

fn fixed_branches(method: &MethodNode, frames: &Frames<IntValueSet>) -> Vec<Fold> {
    let Some(code) = method.code.as_ref() else {
        return Vec::new();
    };
    let mut folds = Vec::new();
    for (index, insn) in code.instructions.iter().enumerate() {
        let Insn::Jump { opcode, target } = insn else {
            continue;
        };
        let Some(frame) = frames.before(index) else {
            continue;
        };
        let constant = |depth: usize| match frame.peek(depth).map(|slot| &slot.value) {
            Some(IntValueSet::Constant(values)) => Some(values.clone()),
            _ => None,
        };
        let (result, operands) = match *opcode {
            opcodes::IFEQ..=opcodes::IFLE => match constant(0) {
                Some(values) => (evaluate_unary(*opcode, &values), 1),
                None => continue,
            },
            opcodes::IF_ICMPEQ..=opcodes::IF_ICMPLE => match (constant(1), constant(0)) {
                (Some(lefts), Some(rights)) => (evaluate_binary(*opcode, &lefts, &rights), 2),
                _ => continue,
            },
            _ => continue,
        };
        let taken = match result {
            IntBranchResult::AlwaysTaken => true,
            IntBranchResult::NeverTaken => false,
            IntBranchResult::Unknown => continue,
        };
        folds.push(Fold {
            index,
            target: *target,
            operands,
            taken,
        });
    }
    folds
}

/// Rewrites each fold, last first so earlier indices stay valid. The operand expression goes
/// with the branch when it is pure; otherwise its values are popped.
fn fold_branches(method: &mut MethodNode, mut folds: Vec<Fold>) {
    let Some(code) = method.code.as_mut() else {
        return;
    };
    folds.sort_by_key(|fold| fold.index);
    for fold in folds.into_iter().rev() {
        let goto = Insn::Jump {
            opcode: opcodes::GOTO,
            target: fold.target,
        };
        if fold.taken {
            if replace_expression(&mut code.instructions, fold.index, goto.clone(), is_pure) {
                continue;
            }
            let mut replacement = vec![Insn::Simple(opcodes::POP); fold.operands];
            replacement.push(goto);
            code.instructions.splice(fold.index..fold.index + 1, replacement);
        } else {
            if delete_expression(&mut code.instructions, fold.index, is_pure) {
                continue;
            }
            let replacement = vec![Insn::Simple(opcodes::POP); fold.operands];
            code.instructions.splice(fold.index..fold.index + 1, replacement);
        }
    }
}
