use std::collections::BTreeSet;

use anyhow::Result;

use crate::analysis::field_write::{FieldWriteCount, FieldWrites, field_writes_at_exits};
use crate::analysis::frame::analyze_frames;
use crate::analysis::this_value::ThisInterpreter;
use crate::classpath::ClassPath;
use crate::descriptor::MethodType;
use crate::ir::{ACC_FINAL, ACC_VOLATILE, ClassNode, Insn, MemberDesc, MemberRef, MethodNode};
use crate::opcodes;
use crate::transform::{PassContext, Transformer};

/// Sets `final` on exactly the fields whose class's initializers write them once on every path
/// and that nothing else ever writes. Every other field loses `final`.
pub(crate) struct FinalFieldTransformer;

impl Transformer for FinalFieldTransformer {
    fn name(&self) -> &'static str {
        "final_field"
    }

    fn transform(&self, classpath: &mut ClassPath, context: &mut PassContext) -> Result<()> {
        let written_elsewhere = foreign_writes(classpath);
        let mut decisions: Vec<(MemberRef, bool)> = Vec::new();
        for class in classpath.own_classes() {
            if class.is_interface() {
                continue;
            }
            for is_static in [false, true] {
                let fields: Vec<MemberDesc> = class
                    .fields
                    .iter()
                    .filter(|field| field.is_static() == is_static)
                    .map(|field| field.member_desc())
                    .collect();
                if fields.is_empty() {
                    continue;
                }
                let initializer = if is_static { "<clinit>" } else { "<init>" };
                let exits = initializer_exits(classpath, class, initializer, context, self.name());
                for desc in fields {
                    let member = MemberRef::new(class.name.clone(), &desc);
                    let single = if written_elsewhere.contains(&member) {
                        false
                    } else {
                        match &exits {
                            InitializerExits::Unanalysable => continue,
                            InitializerExits::Missing => false,
                            InitializerExits::Exits(exits) => writes_once(exits, &desc),
                        }
                    };
                    decisions.push((member, single));
                }
            }
        }

        let mut made_final = 0usize;
        let mut made_mutable = 0usize;
        for (member, single) in &decisions {
            let Some(field) = classpath
                .class_node_mut(&member.owner)
                .and_then(|class| class.field_mut(&member.member_desc()))
            else {
                continue;
            };
            let access = field.access;
            if *single {
                field.access = (field.access | ACC_FINAL) & !ACC_VOLATILE;
            } else {
                field.access &= !ACC_FINAL;
            }
            match (field.access != access, *single) {
                (true, true) => made_final += 1,
                (true, false) => made_mutable += 1,
                _ => {}
            }
        }
        tracing::info!(made_final, made_mutable, "updated final modifiers");
        Ok(())
    }
}

/// True if every exit has `field` written exactly once, or not at all when its constructor
/// delegates to `this(...)`.
fn writes_once(exits: &[(bool, FieldWrites)], field: &MemberDesc) -> bool {
    exits.iter().all(|(delegates, writes)| {
        let count = writes.get(field).copied().unwrap_or(FieldWriteCount::Never);
        if *delegates {
            count == FieldWriteCount::Never
        } else {
            count == FieldWriteCount::ExactlyOnce
        }
    })
}

/// Field write counts at the exits of a class's initializers.
enum InitializerExits {
    /// The class declares no such initializer.
    Missing,
    /// One of the initializers could not be analysed.
    Unanalysable,
    /// Counts at every exit, each tagged with whether its method delegates to another
    /// constructor of the same class.
    Exits(Vec<(bool, FieldWrites)>),
}

fn initializer_exits(
    classpath: &ClassPath,
    class: &ClassNode,
    initializer: &str,
    context: &mut PassContext,
    pass: &str,
) -> InitializerExits {
    let methods: Vec<&MethodNode> = class
        .methods
        .iter()
        .filter(|method| method.name == initializer)
        .collect();
    if methods.is_empty() {
        return InitializerExits::Missing;
    }
    let mut exits = Vec::new();
    for method in methods {
        let outcome = analyze_frames(&ThisInterpreter, method).and_then(|receivers| {
            let delegates = delegates_to_this(class, method, |index, depth| {
                receivers
                    .before(index)
                    .and_then(|frame| frame.peek(depth))
                    .is_some_and(|slot| slot.value)
            });
            let writes = field_writes_at_exits(classpath, class, method, &receivers)?;
            Ok((delegates, writes))
        });
        match outcome {
            Ok((delegates, writes)) => {
                exits.extend(writes.into_iter().map(|writes| (delegates, writes)));
            }
            Err(error) => {
                context.skip_method(pass, &class.name, method, &error);
                return InitializerExits::Unanalysable;
            }
        }
    }
    InitializerExits::Exits(exits)
}

/// True if `method` calls `this(...)`: `invokespecial` of an own constructor on the receiver.
fn delegates_to_this(
    class: &ClassNode,
    method: &MethodNode,
    is_receiver: impl Fn(usize, usize) -> bool,
) -> bool {
    let Some(code) = method.code.as_ref() else {
        return false;
    };
    code.instructions
        .iter()
        .enumerate()
        .any(|(index, insn)| match insn {
            Insn::Method {
                opcode: opcodes::INVOKESPECIAL,
                owner,
                name,
                desc,
                ..
            } if owner == &class.name && name == "<init>" => MethodType::parse(desc)
                .is_ok_and(|method_type| is_receiver(index, method_type.arguments.len())),
            _ => false,
        })
}

/// Fields written anywhere but their own class's matching initializer, by declaring class.
fn foreign_writes(classpath: &ClassPath) -> BTreeSet<MemberRef> {
    let mut written = BTreeSet::new();
    for class in classpath.own_classes() {
        for method in &class.methods {
            let Some(code) = method.code.as_ref() else {
                continue;
            };
            for insn in &code.instructions {
                let Insn::Field {
                    opcode: opcode @ (opcodes::PUTFIELD | opcodes::PUTSTATIC),
                    owner,
                    name,
                    desc,
                } = insn
                else {
                    continue;
                };
                let field = MemberDesc::new(name.clone(), desc.clone());
                let Some(declaring) = classpath
                    .resolve(owner)
                    .and_then(|metadata| metadata.resolve_field(classpath, &field))
                else {
                    continue;
                };
                let initializer = if *opcode == opcodes::PUTSTATIC {
                    "<clinit>"
                } else {
                    "<init>"
                };
                if declaring != class.name || method.name != initializer {
                    written.insert(MemberRef::new(declaring, &field));
                }
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ACC_PUBLIC, ACC_STATIC};
    use crate::profile::Profile;
    use crate::remap::name_map::NameMap;
    use crate::test_support::{class, classpath_of, code, field, field_insn, iconst, invoke, method, op, var};

    fn run(classes: Vec<ClassNode>) -> ClassPath {
        let mut classpath = classpath_of(classes);
        let profile = Profile::builtin().expect("profile");
        let names = NameMap::default();
        let mut context = PassContext::new(&profile, &names);
        FinalFieldTransformer
            .transform(&mut classpath, &mut context)
            .expect("transform");
        classpath
    }

    fn is_final(classpath: &ClassPath, owner: &str, name: &str) -> bool {
        classpath
            .class_node(owner)
            .expect("class")
            .fields
            .iter()
            .find(|field| field.name == name)
            .expect("field")
            .access
            & ACC_FINAL
            != 0
    }

    fn constructor(desc: &str, body: Vec<Insn>) -> MethodNode {
        let mut instructions = vec![
            var(opcodes::ALOAD, 0),
            invoke(opcodes::INVOKESPECIAL, "java/lang/Object", "<init>", "()V"),
        ];
        instructions.extend(body);
        instructions.push(op(opcodes::RETURN));
        method("<init>", desc, ACC_PUBLIC, Some(code(instructions)))
    }

    fn write_x(value: i32) -> Vec<Insn> {
        vec![
            var(opcodes::ALOAD, 0),
            iconst(value),
            field_insn(opcodes::PUTFIELD, "a", "x", "I"),
        ]
    }

    #[test]
    fn field_written_once_in_every_constructor_becomes_final() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("x", "I", 0));
        a.methods.push(constructor("()V", write_x(1)));
        a.methods.push(constructor("(I)V", write_x(2)));

        let classpath = run(vec![a]);

        assert!(is_final(&classpath, "a", "x"));
    }

    #[test]
    fn constructor_without_the_write_keeps_the_field_mutable() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("x", "I", 0));
        a.methods.push(constructor("()V", write_x(1)));
        a.methods.push(constructor("(I)V", Vec::new()));

        let classpath = run(vec![a]);

        assert!(!is_final(&classpath, "a", "x"));
    }

    #[test]
    fn write_outside_the_constructor_keeps_the_field_mutable() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("x", "I", 0));
        a.methods.push(constructor("()V", write_x(1)));
        let mut setter = write_x(3);
        setter.push(op(opcodes::RETURN));
        a.methods.push(method("set", "()V", ACC_PUBLIC, Some(code(setter))));

        let classpath = run(vec![a]);

        assert!(!is_final(&classpath, "a", "x"));
    }

    #[test]
    fn delegating_constructor_relies_on_its_target() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("x", "I", 0));
        a.methods.push(constructor("(I)V", write_x(1)));
        a.methods.push(method(
            "<init>",
            "()V",
            ACC_PUBLIC,
            Some(code(vec![
                var(opcodes::ALOAD, 0),
                iconst(5),
                invoke(opcodes::INVOKESPECIAL, "a", "<init>", "(I)V"),
                op(opcodes::RETURN),
            ])),
        ));

        let classpath = run(vec![a]);

        assert!(is_final(&classpath, "a", "x"));
    }

    #[test]
    fn statics_need_a_single_write_in_the_static_initializer() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("s", "I", ACC_STATIC));
        a.fields.push(field("t", "I", ACC_STATIC));
        a.methods.push(method(
            "<clinit>",
            "()V",
            ACC_STATIC,
            Some(code(vec![
                iconst(1),
                field_insn(opcodes::PUTSTATIC, "a", "s", "I"),
                op(opcodes::RETURN),
            ])),
        ));

        let classpath = run(vec![a]);

        assert!(is_final(&classpath, "a", "s"));
        assert!(!is_final(&classpath, "a", "t"));
    }

    fn access_of(classpath: &ClassPath, owner: &str, name: &str) -> u16 {
        classpath
            .class_node(owner)
            .expect("class")
            .fields
            .iter()
            .find(|field| field.name == name)
            .expect("field")
            .access
    }

    #[test]
    fn final_field_written_in_a_setter_loses_the_flag() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("x", "I", ACC_FINAL));
        a.methods.push(constructor("()V", write_x(1)));
        let mut setter = write_x(3);
        setter.push(op(opcodes::RETURN));
        a.methods.push(method("set", "()V", ACC_PUBLIC, Some(code(setter))));

        let classpath = run(vec![a]);

        assert!(!is_final(&classpath, "a", "x"));
    }

    #[test]
    fn volatile_field_made_final_drops_volatile() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("x", "I", ACC_VOLATILE));
        a.methods.push(constructor("()V", write_x(1)));

        let classpath = run(vec![a]);

        assert_eq!(access_of(&classpath, "a", "x"), ACC_FINAL);
    }

    #[test]
    fn instance_fields_of_a_class_without_constructors_stay_mutable() {
        let mut a = class("a", Some("java/lang/Object"));
        a.fields.push(field("x", "I", 0));
        a.fields.push(field("y", "I", ACC_FINAL));

        let classpath = run(vec![a]);

        assert!(!is_final(&classpath, "a", "x"));
        assert!(!is_final(&classpath, "a", "y"));
    }
}
