use crate::{
    context::{ControlFlow, ExecContext},
    namespace::{Entity, EntityId, Operand},
    object::AmlValue,
    opcode::Opcode,
    AmlError,
};
use log::{debug, trace};

pub(crate) fn op_noop(_context: &mut ExecContext<'_>, _id: EntityId) -> Result<(), AmlError> {
    Ok(())
}

/// Declarations in a method body are added to the namespace when the table is loaded.
pub(crate) fn op_declaration(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    trace!("Skipping declaration {:?}", context.vm.namespace.get(id)?.opcode());
    Ok(())
}

pub(crate) fn op_breakpoint(_context: &mut ExecContext<'_>, _id: EntityId) -> Result<(), AmlError> {
    debug!("AML breakpoint reached");
    Ok(())
}

pub(crate) fn op_break(context: &mut ExecContext<'_>, _id: EntityId) -> Result<(), AmlError> {
    context.ctrl_flow = ControlFlow::Break;
    Ok(())
}

pub(crate) fn op_continue(context: &mut ExecContext<'_>, _id: EntityId) -> Result<(), AmlError> {
    context.ctrl_flow = ControlFlow::Continue;
    Ok(())
}

pub(crate) fn op_return(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let args = context.operands(id)?;
    context.ret_val = match args.first() {
        Some(value) => context.load(value)?,
        None => AmlValue::Uninitialized,
    };
    context.ctrl_flow = ControlFlow::FnReturn;
    Ok(())
}

/// `If` takes its predicate, its body, and optionally an `Else` instruction that holds the alternative body.
/// The bodies are validated before the predicate is evaluated.
pub(crate) fn op_if(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let args = context.operands(id)?;
    let predicate = args.first().ok_or(AmlError::MissingOperand(Opcode::If))?;
    let then_block = scoped_body(context, args.get(1)).ok_or(AmlError::IfBodyNotScopedEntity)?;
    let else_block = match args.get(2) {
        None | Some(Operand::None) => None,
        Some(operand) => Some(else_body(context, operand).ok_or(AmlError::ElseBodyNotScopedEntity)?),
    };

    if context.load(predicate)?.to_integer(context.integer_width())? != 0 {
        context.exec_block(then_block)
    } else if let Some(else_block) = else_block {
        context.exec_block(else_block)
    } else {
        Ok(())
    }
}

/// `While` re-evaluates its predicate before each iteration. `Break` and `Continue` are consumed here, while
/// `Return` is left for the enclosing method to handle.
pub(crate) fn op_while(context: &mut ExecContext<'_>, id: EntityId) -> Result<(), AmlError> {
    let args = context.operands(id)?;
    let predicate = args.first().ok_or(AmlError::MissingOperand(Opcode::While))?;
    let body = scoped_body(context, args.get(1)).ok_or(AmlError::WhileBodyNotScopedEntity)?;

    loop {
        if context.load(predicate)?.to_integer(context.integer_width())? == 0 {
            break;
        }

        context.exec_block(body)?;

        match context.ctrl_flow {
            ControlFlow::NextOpcode => (),
            ControlFlow::Continue => context.ctrl_flow = ControlFlow::NextOpcode,
            ControlFlow::Break => {
                context.ctrl_flow = ControlFlow::NextOpcode;
                break;
            }
            ControlFlow::FnReturn => break,
        }
    }

    Ok(())
}

fn scoped_body(context: &ExecContext<'_>, operand: Option<&Operand>) -> Option<EntityId> {
    match operand {
        Some(Operand::Expr(body)) if context.vm.namespace.get(*body).ok()?.is_scope() => Some(*body),
        _ => None,
    }
}

/// The alternative body is either an `Else` instruction wrapping a block, or the block itself.
fn else_body(context: &ExecContext<'_>, operand: &Operand) -> Option<EntityId> {
    let Operand::Expr(id) = operand else {
        return None;
    };

    match context.vm.namespace.get(*id).ok()? {
        Entity::Instruction(instruction) if instruction.op == Opcode::Else => {
            scoped_body(context, instruction.args.first())
        }
        entity if entity.is_scope() => Some(*id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use alloc::vec;

    #[test]
    fn if_else() {
        let mut vm = test_vm();
        let root = vm.namespace.root();
        let method = add_method(&mut vm.namespace, root, "TEST", 1);
        let then_block = add_block(&mut vm.namespace, method, Opcode::If);
        add_instruction(&mut vm.namespace, then_block, Opcode::Store, vec![int(1), Operand::Local(0)]);
        let else_block = add_block(&mut vm.namespace, method, Opcode::Else);
        add_instruction(&mut vm.namespace, else_block, Opcode::Store, vec![int(2), Operand::Local(0)]);
        let else_op = add_detached_instruction(&mut vm.namespace, method, Opcode::Else, vec![Operand::Expr(else_block)]);
        add_instruction(
            &mut vm.namespace,
            method,
            Opcode::If,
            vec![Operand::Arg(0), Operand::Expr(then_block), Operand::Expr(else_op)],
        );
        add_instruction(&mut vm.namespace, method, Opcode::Return, vec![Operand::Local(0)]);

        let mut context = ExecContext::new(&mut vm, root);
        assert_eq!(context.invoke(method, vec![AmlValue::Integer(5)]), Ok(Some(AmlValue::Integer(1))));
        assert_eq!(context.invoke(method, vec![AmlValue::Integer(0)]), Ok(Some(AmlValue::Integer(2))));
    }

    #[test]
    fn if_without_else() {
        let mut vm = test_vm();
        let root = vm.namespace.root();
        let method = add_method(&mut vm.namespace, root, "TEST", 1);
        let then_block = add_block(&mut vm.namespace, method, Opcode::If);
        add_instruction(&mut vm.namespace, then_block, Opcode::Return, vec![int(1)]);
        add_instruction(&mut vm.namespace, method, Opcode::If, vec![Operand::Arg(0), Operand::Expr(then_block)]);
        add_instruction(&mut vm.namespace, method, Opcode::Return, vec![int(0)]);

        let mut context = ExecContext::new(&mut vm, root);
        assert_eq!(context.invoke(method, vec![AmlValue::Integer(1)]), Ok(Some(AmlValue::Integer(1))));
        assert_eq!(context.invoke(method, vec![AmlValue::Integer(0)]), Ok(Some(AmlValue::Integer(0))));
    }

    #[test]
    fn malformed_if() {
        let mut vm = test_vm();
        let root = vm.namespace.root();
        let method = add_method(&mut vm.namespace, root, "TEST", 0);
        let block = add_block(&mut vm.namespace, method, Opcode::If);
        let not_a_block = add_detached_instruction(&mut vm.namespace, method, Opcode::Noop, vec![]);
        let bad_if = add_instruction(&mut vm.namespace, method, Opcode::If, vec![int(1), int(2)]);
        let bad_else =
            add_instruction(&mut vm.namespace, method, Opcode::If, vec![int(1), Operand::Expr(block), Operand::Expr(not_a_block)]);

        let mut context = ExecContext::new(&mut vm, root);
        assert_eq!(op_if(&mut context, bad_if), Err(AmlError::IfBodyNotScopedEntity));
        assert_eq!(op_if(&mut context, bad_else), Err(AmlError::ElseBodyNotScopedEntity));
    }

    #[test]
    fn while_with_break_and_continue() {
        /*
         * Local0 = 0
         * Local1 = 0
         * While (Local0 < 10) {
         *     Local0++
         *     If (Local0 == 3) { Continue }
         *     If (Local0 == 6) { Break }
         *     Local1 += Local0
         * }
         * Return (Local1)
         */
        let mut vm = test_vm();
        let root = vm.namespace.root();
        let method = add_method(&mut vm.namespace, root, "TEST", 0);
        add_instruction(&mut vm.namespace, method, Opcode::Store, vec![int(0), Operand::Local(0)]);
        add_instruction(&mut vm.namespace, method, Opcode::Store, vec![int(0), Operand::Local(1)]);

        let body = add_block(&mut vm.namespace, method, Opcode::While);
        add_instruction(&mut vm.namespace, body, Opcode::Increment, vec![Operand::Local(0)]);
        for (value, op) in [(3, Opcode::Continue), (6, Opcode::Break)] {
            let block = add_block(&mut vm.namespace, body, Opcode::If);
            add_instruction(&mut vm.namespace, block, op, vec![]);
            let predicate = add_detached_instruction(&mut vm.namespace, body, Opcode::LEqual, vec![Operand::Local(0), int(value)]);
            add_instruction(&mut vm.namespace, body, Opcode::If, vec![Operand::Expr(predicate), Operand::Expr(block)]);
        }
        add_instruction(
            &mut vm.namespace,
            body,
            Opcode::Add,
            vec![Operand::Local(1), Operand::Local(0), Operand::Local(1)],
        );

        let predicate = add_detached_instruction(&mut vm.namespace, method, Opcode::LLess, vec![Operand::Local(0), int(10)]);
        add_instruction(&mut vm.namespace, method, Opcode::While, vec![Operand::Expr(predicate), Operand::Expr(body)]);
        add_instruction(&mut vm.namespace, method, Opcode::Return, vec![Operand::Local(1)]);

        let mut context = ExecContext::new(&mut vm, root);
        // 1 + 2 + 4 + 5
        assert_eq!(context.invoke(method, vec![]), Ok(Some(AmlValue::Integer(12))));
    }

    #[test]
    fn return_from_inside_loop() {
        let mut vm = test_vm();
        let root = vm.namespace.root();
        let method = add_method(&mut vm.namespace, root, "TEST", 0);
        let body = add_block(&mut vm.namespace, method, Opcode::While);
        add_instruction(&mut vm.namespace, body, Opcode::Return, vec![int(0x42)]);
        add_instruction(&mut vm.namespace, body, Opcode::Store, vec![int(1), Operand::Local(0)]);
        add_instruction(&mut vm.namespace, method, Opcode::While, vec![int(1), Operand::Expr(body)]);
        add_instruction(&mut vm.namespace, method, Opcode::Return, vec![int(0)]);

        let mut context = ExecContext::new(&mut vm, root);
        assert_eq!(context.invoke(method, vec![]), Ok(Some(AmlValue::Integer(0x42))));
    }

    #[test]
    fn malformed_while() {
        let mut vm = test_vm();
        let root = vm.namespace.root();
        let method = add_method(&mut vm.namespace, root, "TEST", 0);
        let not_a_block = add_detached_instruction(&mut vm.namespace, method, Opcode::Noop, vec![]);
        let bad = add_instruction(&mut vm.namespace, method, Opcode::While, vec![int(0), Operand::Expr(not_a_block)]);
        let missing = add_instruction(&mut vm.namespace, method, Opcode::While, vec![]);

        let mut context = ExecContext::new(&mut vm, root);
        assert_eq!(op_while(&mut context, bad), Err(AmlError::WhileBodyNotScopedEntity));
        assert_eq!(op_while(&mut context, missing), Err(AmlError::MissingOperand(Opcode::While)));
    }

    #[test]
    fn stray_break_is_not_a_return() {
        let mut vm = test_vm();
        let root = vm.namespace.root();
        let method = add_method(&mut vm.namespace, root, "TEST", 0);
        add_instruction(&mut vm.namespace, method, Opcode::Break, vec![]);
        add_instruction(&mut vm.namespace, method, Opcode::Return, vec![int(1)]);

        let mut context = ExecContext::new(&mut vm, root);
        assert_eq!(context.invoke(method, vec![]), Ok(None));
        assert_eq!(context.ctrl_flow(), ControlFlow::NextOpcode);
    }
}
