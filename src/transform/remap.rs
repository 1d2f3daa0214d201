use anyhow::Result;

use crate::classpath::ClassPath;
use crate::error::InvariantViolation;
use crate::partition::MemberSets;
use crate::remap::typed::TypedRemapper;
use crate::transform::{PassContext, Transformer};

/// Renames classes, fields and methods and moves scrambled statics into holder classes.
pub(crate) struct RemapTransformer;

impl Transformer for RemapTransformer {
    fn name(&self) -> &'static str {
        "remap"
    }

    fn transform(&self, classpath: &mut ClassPath, context: &mut PassContext) -> Result<()> {
        let (fields_before, methods_before) = partition_counts(classpath);

        let (remapper, diagnostics) = TypedRemapper::create(classpath, context.profile, context.names);
        context.diagnostics.extend(diagnostics);
        context.mapping = Some(remapper.name_map());
        classpath.apply_renaming(&remapper)?;

        let (fields_after, methods_after) = partition_counts(classpath);
        if fields_after != fields_before {
            return Err(InvariantViolation::PartitionMismatch {
                operation: "field remapping",
                expected: fields_before,
                actual: fields_after,
            }
            .into());
        }
        if methods_after != methods_before {
            return Err(InvariantViolation::PartitionMismatch {
                operation: "method remapping",
                expected: methods_before,
                actual: methods_after,
            }
            .into());
        }
        Ok(())
    }
}

/// Field and method partition counts. Static initializers are left out because relocation
/// creates and deletes them.
fn partition_counts(classpath: &ClassPath) -> (usize, usize) {
    let fields = MemberSets::fields(classpath).len();
    let methods = MemberSets::methods(classpath)
        .iter()
        .filter(|(_, members)| {
            members
                .first()
                .is_none_or(|member| member.name != "<clinit>")
        })
        .count();
    (fields, methods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC, MemberRef};
    use crate::opcodes;
    use crate::profile::Profile;
    use crate::remap::name_map::NameMap;
    use crate::report::Rule;
    use crate::test_support::{class, classpath_of, code, field, field_insn, iconst, invoke, method, op};

    #[test]
    fn renaming_updates_declarations_and_references() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("b", "I", ACC_STATIC));
        a.methods.push(method(
            "c",
            "()I",
            ACC_PUBLIC | ACC_STATIC,
            Some(code(vec![
                field_insn(opcodes::GETSTATIC, "a", "b", "I"),
                op(opcodes::IRETURN),
            ])),
        ));
        let mut d = class("d", Some("a"));
        d.methods.push(method(
            "e",
            "()V",
            ACC_STATIC,
            Some(code(vec![
                invoke(opcodes::INVOKESTATIC, "d", "c", "()I"),
                op(opcodes::POP),
                op(opcodes::RETURN),
            ])),
        ));
        let mut classpath = classpath_of(vec![a, d]);
        let profile = Profile::builtin().expect("profile");
        let names = NameMap::default();
        let mut context = PassContext::new(&profile, &names);

        RemapTransformer
            .transform(&mut classpath, &mut context)
            .expect("transform");

        let class1 = classpath.class_node("Class1").expect("renamed class");
        assert_eq!(class1.fields[0].name, "anInt1");
        assert_eq!(class1.methods[0].name, "method1");
        let sub = classpath.class_node("Class1_Sub1").expect("renamed subclass");
        assert_eq!(sub.super_name.as_deref(), Some("Class1"));
        let body = &sub.methods[0].code.as_ref().expect("code").instructions;
        assert_eq!(
            body[0],
            invoke(opcodes::INVOKESTATIC, "Class1_Sub1", "method1", "()I")
        );

        let mapping = context.mapping.expect("mapping");
        assert_eq!(mapping.classes.get("a").map(String::as_str), Some("Class1"));
        let c: MemberRef = "a.c ()I".parse().expect("member");
        assert_eq!(
            mapping.methods.get(&c).map(|mapping| mapping.name.as_str()),
            Some("method1")
        );
        assert_eq!(context.diagnostics.count(Rule::SuspiciousRename), 0);
    }

    #[test]
    fn scrambled_statics_keep_the_partition_count() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("b", "I", ACC_STATIC));
        a.methods.push(method(
            "<clinit>",
            "()V",
            ACC_STATIC,
            Some(code(vec![
                iconst(3),
                field_insn(opcodes::PUTSTATIC, "a", "b", "I"),
                op(opcodes::RETURN),
            ])),
        ));
        let mut classpath = classpath_of(vec![a]);
        let profile = Profile::from_json(
            r#"{"scrambled_libraries": ["client"], "excluded_methods": ["**.<clinit> *"]}"#,
        )
        .expect("profile");
        let names = NameMap::default();
        let mut context = PassContext::new(&profile, &names);

        RemapTransformer
            .transform(&mut classpath, &mut context)
            .expect("transform");

        let holder = classpath.class_node("Static1").expect("holder");
        assert_eq!(holder.fields[0].name, "anInt1");
        assert!(holder.methods.iter().any(|method| method.name == "<clinit>"));
        let class1 = classpath.class_node("Class1").expect("renamed class");
        assert!(class1.fields.is_empty());
        assert!(class1.methods.is_empty());
    }
}
