use std::collections::{BTreeSet, HashSet};
use std::time::Instant;

use anyhow::{Context, Result};

use crate::classpath::ClassPath;
use crate::disjoint_set::PartitionId;
use crate::ir::{Insn, MemberRef, MethodNode};
use crate::partition::MemberSets;
use crate::profile::Profile;
use crate::remap::name_map::NameMap;
use crate::report::{Diagnostic, Diagnostics, Rule};

pub(crate) mod constant_arg;
pub(crate) mod final_field;
pub(crate) mod remap;
pub(crate) mod unused_arg;
pub(crate) mod unused_local;
pub(crate) mod unused_method;
pub(crate) mod visibility;

/// Pass order used when the profile does not list its own.
pub(crate) const DEFAULT_TRANSFORMERS: [&str; 7] = [
    "constant_arg",
    "unused_local",
    "unused_method",
    "unused_arg",
    "remap",
    "visibility",
    "final_field",
];

/// State shared by the passes of one run.
pub(crate) struct PassContext<'a> {
    pub(crate) profile: &'a Profile,
    /// Curated names consulted by `remap`.
    pub(crate) names: &'a NameMap,
    pub(crate) diagnostics: Diagnostics,
    /// Mapping applied by `remap`, once it has run.
    pub(crate) mapping: Option<NameMap>,
}

impl<'a> PassContext<'a> {
    pub(crate) fn new(profile: &'a Profile, names: &'a NameMap) -> Self {
        Self {
            profile,
            names,
            diagnostics: Diagnostics::default(),
            mapping: None,
        }
    }

    /// Records that `pass` left `method` of `owner` untouched because it could not model it.
    pub(crate) fn skip_method(
        &mut self,
        pass: &str,
        owner: &str,
        method: &MethodNode,
        error: &anyhow::Error,
    ) {
        self.diagnostics.report(Diagnostic::member(
            Rule::UnsupportedShape,
            MemberRef::new(owner, &method.member_desc()),
            format!(
                "{pass} skipped {owner}.{}{}: {error:#}",
                method.name, method.desc
            ),
        ));
    }
}

/// One whole-program pass over the class path.
pub(crate) trait Transformer {
    fn name(&self) -> &'static str;
    fn transform(&self, classpath: &mut ClassPath, context: &mut PassContext) -> Result<()>;
}

fn create(name: &str) -> Option<Box<dyn Transformer>> {
    let transformer: Box<dyn Transformer> = match name {
        "constant_arg" => Box::new(constant_arg::ConstantArgTransformer),
        "unused_local" => Box::new(unused_local::UnusedLocalTransformer),
        "unused_method" => Box::new(unused_method::UnusedMethodTransformer),
        "unused_arg" => Box::new(unused_arg::UnusedArgTransformer),
        "remap" => Box::new(remap::RemapTransformer),
        "visibility" => Box::new(visibility::VisibilityTransformer),
        "final_field" => Box::new(final_field::FinalFieldTransformer),
        _ => return None,
    };
    Some(transformer)
}

/// Passes named by the profile, or the default order. Every name is checked before any pass is
/// built, so a typo never leaves a half-transformed class path behind.
pub(crate) fn configured(profile: &Profile) -> Result<Vec<Box<dyn Transformer>>> {
    let names: Vec<&str> = match &profile.transformers {
        Some(names) => names.iter().map(String::as_str).collect(),
        None => DEFAULT_TRANSFORMERS.to_vec(),
    };
    let unknown: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| !DEFAULT_TRANSFORMERS.contains(name))
        .collect();
    if !unknown.is_empty() {
        anyhow::bail!(
            "unknown transformers: {} (available: {})",
            unknown.join(", "),
            DEFAULT_TRANSFORMERS.join(", ")
        );
    }
    names
        .into_iter()
        .map(|name| create(name).with_context(|| format!("unknown transformer: {name}")))
        .collect()
}

pub(crate) fn run_transformers(
    classpath: &mut ClassPath,
    transformers: &[Box<dyn Transformer>],
    context: &mut PassContext,
) -> Result<()> {
    for transformer in transformers {
        let started_at = Instant::now();
        tracing::info!(transformer = transformer.name(), "running transformer");
        transformer
            .transform(classpath, context)
            .with_context(|| format!("transformer {} failed", transformer.name()))?;
        tracing::debug!(
            transformer = transformer.name(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "transformer finished"
        );
    }
    Ok(())
}

/// Owner and signature of every owned method that has a body, in class path order.
pub(crate) fn method_bodies(classpath: &ClassPath) -> Vec<MemberRef> {
    classpath
        .own_classes()
        .flat_map(|class| {
            class
                .methods
                .iter()
                .filter(|method| method.code.is_some())
                .map(|method| MemberRef::new(class.name.clone(), &method.member_desc()))
        })
        .collect()
}

/// Owned method named by `member`.
pub(crate) fn method_node<'a>(classpath: &'a ClassPath, member: &MemberRef) -> Option<&'a MethodNode> {
    classpath
        .class_node(&member.owner)?
        .method(&member.member_desc())
}

pub(crate) fn method_node_mut<'a>(
    classpath: &'a mut ClassPath,
    member: &MemberRef,
) -> Option<&'a mut MethodNode> {
    classpath
        .class_node_mut(&member.owner)?
        .method_mut(&member.member_desc())
}

/// Owned classes whose bytecode uses `invokedynamic`. Their call sites are not modelled.
pub(crate) fn dynamic_classes(classpath: &ClassPath) -> BTreeSet<String> {
    classpath
        .own_classes()
        .filter(|class| {
            class.methods.iter().any(|method| {
                method.code.as_ref().is_some_and(|code| {
                    code.instructions
                        .iter()
                        .any(|insn| matches!(insn, Insn::InvokeDynamic { .. }))
                })
            })
        })
        .map(|class| class.name.clone())
        .collect()
}

/// Method partitions named by a method handle in any owned class.
pub(crate) fn handle_targets(classpath: &ClassPath, methods: &MemberSets) -> HashSet<PartitionId> {
    classpath
        .own_classes()
        .flat_map(|class| class.method_handles.iter())
        .filter_map(|handle| methods.resolve(classpath, handle))
        .collect()
}
