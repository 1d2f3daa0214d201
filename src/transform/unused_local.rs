use anyhow::Result;

use crate::analysis::live_variable::dead_stores;
use crate::classpath::ClassPath;
use crate::insn::{delete_expression, is_pure};
use crate::ir::{Code, Insn};
use crate::opcodes;
use crate::transform::{PassContext, Transformer, method_bodies, method_node, method_node_mut};

/// Deletes stores to locals that are never read afterwards. A store whose value has side effects
/// keeps the computation and discards the result with `pop`/`pop2`.
pub(crate) struct UnusedLocalTransformer;

impl Transformer for UnusedLocalTransformer {
    fn name(&self) -> &'static str {
        "unused_local"
    }

    fn transform(&self, classpath: &mut ClassPath, context: &mut PassContext) -> Result<()> {
        let mut removed = 0usize;
        let mut discarded = 0usize;
        for member in method_bodies(classpath) {
            let Some(method) = method_node(classpath, &member) else {
                continue;
            };
            let Some(code) = method.code.as_ref() else {
                continue;
            };
            if code.has_subroutines() {
                let error = anyhow::anyhow!("jsr/ret subroutines");
                context.skip_method(self.name(), &member.owner, method, &error);
                continue;
            }
            let mut code = code.clone();
            let (deleted, popped) = match remove_dead_stores(&mut code) {
                Ok(counts) => counts,
                Err(error) => {
                    context.skip_method(self.name(), &member.owner, method, &error);
                    continue;
                }
            };
            if deleted + popped == 0 {
                continue;
            }
            removed += deleted;
            discarded += popped;
            if let Some(method) = method_node_mut(classpath, &member) {
                method.code = Some(code);
            }
        }
        tracing::info!(removed, discarded, "removed dead stores");
        Ok(())
    }
}

/// Rewrites dead stores until none remain. Returns the number of stores deleted together with
/// their expression and the number replaced by a `pop`.
fn remove_dead_stores(code: &mut Code) -> Result<(usize, usize)> {
    let mut deleted = 0;
    let mut popped = 0;
    loop {
        let dead = dead_stores(code)?;
        if dead.is_empty() {
            return Ok((deleted, popped));
        }
        for index in dead.into_iter().rev() {
            if delete_expression(&mut code.instructions, index, is_pure) {
                deleted += 1;
            } else {
                let pop = match code.instructions[index].opcode() {
                    Some(opcodes::LSTORE | opcodes::DSTORE) => opcodes::POP2,
                    _ => opcodes::POP,
                };
                code.instructions[index] = Insn::Simple(pop);
                popped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::live_variable::live_variables;
    use crate::ir::ACC_STATIC;
    use crate::profile::Profile;
    use crate::remap::name_map::NameMap;
    use crate::test_support::{class, classpath_of, code, iconst, invoke, method, op, var};

    fn run(body: Vec<Insn>) -> Code {
        let mut a = class("a", Some("java/lang/Object"));
        a.methods
            .push(method("m", "(I)I", ACC_STATIC, Some(code(body))));
        let mut classpath = classpath_of(vec![a]);
        let profile = Profile::builtin().expect("profile");
        let names = NameMap::default();
        let mut context = PassContext::new(&profile, &names);

        UnusedLocalTransformer
            .transform(&mut classpath, &mut context)
            .expect("transform");

        classpath.class_node("a").expect("class").methods[0]
            .code
            .clone()
            .expect("code")
    }

    #[test]
    fn pure_dead_store_is_deleted_with_its_expression() {
        let code = run(vec![
            var(opcodes::ILOAD, 0),
            iconst(3),
            op(opcodes::IMUL),
            var(opcodes::ISTORE, 1),
            var(opcodes::ILOAD, 0),
            op(opcodes::IRETURN),
        ]);

        assert_eq!(
            code.instructions,
            vec![var(opcodes::ILOAD, 0), op(opcodes::IRETURN)]
        );
    }

    #[test]
    fn dead_store_of_a_call_keeps_the_call() {
        let code = run(vec![
            invoke(opcodes::INVOKESTATIC, "a", "f", "()I"),
            var(opcodes::ISTORE, 1),
            var(opcodes::ILOAD, 0),
            op(opcodes::IRETURN),
        ]);

        assert_eq!(
            code.instructions,
            vec![
                invoke(opcodes::INVOKESTATIC, "a", "f", "()I"),
                op(opcodes::POP),
                var(opcodes::ILOAD, 0),
                op(opcodes::IRETURN),
            ]
        );
    }

    #[test]
    fn removing_a_store_leaves_no_dead_stores_behind() {
        let code = run(vec![
            iconst(1),
            var(opcodes::ISTORE, 1),
            var(opcodes::ILOAD, 1),
            var(opcodes::ISTORE, 2),
            var(opcodes::ILOAD, 0),
            op(opcodes::IRETURN),
        ]);

        assert!(dead_stores(&code).expect("analysis").is_empty());
        let live = live_variables(&code).expect("analysis");
        for index in 0..code.instructions.len() {
            if let Some(slots) = live.in_value(index) {
                assert!(!slots.contains(&1) && !slots.contains(&2));
            }
        }
        assert_eq!(
            code.instructions,
            vec![var(opcodes::ILOAD, 0), op(opcodes::IRETURN)]
        );
    }
}
