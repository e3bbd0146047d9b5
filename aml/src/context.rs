use crate::{
    dispatch::OpHandler,
    namespace::{AmlName, Entity, EntityId, Operand},
    object::{AmlValue, IntegerWidth, ObjectType},
    opcode::Opcode,
    AmlError,
    VmState,
};
use alloc::vec::Vec;
use core::{array, mem};
use log::{info, trace, warn};

pub const MAX_LOCALS: usize = 8;
pub const MAX_ARGS: usize = 7;

/// How deeply method invocations can nest before the interpreter gives up. AML can recurse, and we'd rather
/// fail the invocation than overflow the stack.
pub const MAX_CALL_DEPTH: usize = 32;

/// What the interpreter does once the current instruction has finished executing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ControlFlow {
    NextOpcode,
    Break,
    Continue,
    FnReturn,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArgSlot {
    Local(u8),
    Method(u8),
}

/// A reference to somewhere a value can be stored: either a slot of the executing method, or an entity in the
/// namespace.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjRef {
    Arg(ArgSlot),
    Named(EntityId),
}

impl ObjRef {
    pub fn is_arg_ref(&self) -> bool {
        matches!(self, ObjRef::Arg(_))
    }
}

/// The state of a single method invocation. Nested invocations get a context of their own, which reborrows the
/// interpreter state from their caller.
pub struct ExecContext<'vm> {
    locals: [AmlValue; MAX_LOCALS],
    args: [AmlValue; MAX_ARGS],
    arg_count: usize,
    pub(crate) ctrl_flow: ControlFlow,
    /// The result of the most recently evaluated instruction, or the operand of a `Return`.
    pub(crate) ret_val: AmlValue,
    scope: EntityId,
    depth: usize,
    pub(crate) vm: &'vm mut VmState,
}

impl<'vm> ExecContext<'vm> {
    pub(crate) fn new(vm: &'vm mut VmState, scope: EntityId) -> ExecContext<'vm> {
        ExecContext {
            locals: array::from_fn(|_| AmlValue::Uninitialized),
            args: array::from_fn(|_| AmlValue::Uninitialized),
            arg_count: 0,
            ctrl_flow: ControlFlow::NextOpcode,
            ret_val: AmlValue::Uninitialized,
            scope,
            depth: 0,
            vm,
        }
    }

    pub fn integer_width(&self) -> IntegerWidth {
        self.vm.integer_width
    }

    pub fn scope(&self) -> EntityId {
        self.scope
    }

    pub(crate) fn set_scope(&mut self, scope: EntityId) {
        self.scope = scope;
    }

    pub fn ctrl_flow(&self) -> ControlFlow {
        self.ctrl_flow
    }

    fn slot(&self, slot: ArgSlot) -> Result<&AmlValue, AmlError> {
        match slot {
            ArgSlot::Local(i) if (i as usize) < MAX_LOCALS => Ok(&self.locals[i as usize]),
            ArgSlot::Method(i) if (i as usize) < self.arg_count => Ok(&self.args[i as usize]),
            _ => Err(AmlError::ArgIndexOutOfBounds(slot)),
        }
    }

    fn slot_mut(&mut self, slot: ArgSlot) -> Result<&mut AmlValue, AmlError> {
        match slot {
            ArgSlot::Local(i) if (i as usize) < MAX_LOCALS => Ok(&mut self.locals[i as usize]),
            ArgSlot::Method(i) if (i as usize) < self.arg_count => Ok(&mut self.args[i as usize]),
            _ => Err(AmlError::ArgIndexOutOfBounds(slot)),
        }
    }

    pub fn resolve(&self, name: &AmlName) -> Result<EntityId, AmlError> {
        self.vm.namespace.resolve(name, self.scope)
    }

    pub(crate) fn handler(&self, op: Opcode) -> Result<OpHandler, AmlError> {
        self.vm.dispatch.as_ref().map(|table| table.handler(op)).ok_or(AmlError::NotInitialized)
    }

    /// The operands of an instruction or invocation. They are cloned out of the namespace so that handlers can
    /// evaluate them while mutating the interpreter state.
    pub(crate) fn operands(&self, id: EntityId) -> Result<Vec<Operand>, AmlError> {
        match self.vm.namespace.get(id)? {
            Entity::Instruction(instruction) => Ok(instruction.args.clone()),
            Entity::Invocation(invocation) => Ok(invocation.args.clone()),
            _ => Err(AmlError::InvalidEntity(id)),
        }
    }

    /// Execute the children of a scope-capable entity in order, stopping early if an instruction changes the
    /// control flow.
    pub(crate) fn exec_block(&mut self, block: EntityId) -> Result<(), AmlError> {
        let children = self.vm.namespace.children(block)?.to_vec();

        for child in children {
            if self.ctrl_flow != ControlFlow::NextOpcode {
                break;
            }

            let op = self.vm.namespace.get(child)?.opcode();
            trace!("Executing {:?}", op);
            let handler = self.handler(op)?;
            handler(self, child)?;
        }

        Ok(())
    }

    /// Run the handler of an instruction and take its result.
    pub(crate) fn evaluate(&mut self, id: EntityId) -> Result<AmlValue, AmlError> {
        let op = self.vm.namespace.get(id)?.opcode();
        let handler = self.handler(op)?;
        handler(self, id)?;
        Ok(mem::replace(&mut self.ret_val, AmlValue::Uninitialized))
    }

    /// Invoke `method` from this context. Returns `None` if the method finished without executing a `Return`.
    pub fn invoke(&mut self, method: EntityId, args: Vec<AmlValue>) -> Result<Option<AmlValue>, AmlError> {
        let Entity::Method(entity) = self.vm.namespace.get(method)? else {
            return Err(AmlError::NotAMethod(method));
        };

        let expected = entity.flags.arg_count();
        if args.len() != expected {
            return Err(AmlError::MethodArgCountIncorrect { expected, got: args.len() });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(AmlError::CallDepthExceeded);
        }

        trace!("Invoking method {:?} with args {:?}", entity.name, args);
        let mut callee = ExecContext::new(&mut *self.vm, method);
        callee.depth = self.depth + 1;
        callee.arg_count = args.len();
        for (slot, arg) in callee.args.iter_mut().zip(args) {
            *slot = arg;
        }

        callee.exec_block(method)?;
        Ok(callee.into_return_value())
    }

    fn into_return_value(self) -> Option<AmlValue> {
        match self.ctrl_flow {
            ControlFlow::FnReturn => Some(self.ret_val),
            ControlFlow::NextOpcode => None,
            flow @ (ControlFlow::Break | ControlFlow::Continue) => {
                warn!("{:?} executed outside of a While loop", flow);
                None
            }
        }
    }

    /// Get the value of an operand, evaluating it if needed. Arguments that hold a reference to a named object
    /// are transparently dereferenced.
    pub(crate) fn load(&mut self, operand: &Operand) -> Result<AmlValue, AmlError> {
        match operand {
            Operand::None => Ok(AmlValue::Uninitialized),
            Operand::Const(value) => Ok(value.clone()),
            Operand::Local(i) => self.slot(ArgSlot::Local(*i)).cloned(),
            Operand::Arg(i) => match self.slot(ArgSlot::Method(*i))? {
                AmlValue::Reference(ObjRef::Named(target)) => {
                    let target = *target;
                    self.load_entity(target)
                }
                value => Ok(value.clone()),
            },
            Operand::Named(name) => {
                let id = self.resolve(name)?;
                self.load_entity(id)
            }
            Operand::Expr(id) => self.load_entity(*id),
            // Debug is write-only
            Operand::Debug => Ok(AmlValue::Uninitialized),
        }
    }

    pub(crate) fn load_entity(&mut self, id: EntityId) -> Result<AmlValue, AmlError> {
        match self.vm.namespace.get(id)? {
            Entity::Named(named) => match named.payload.clone() {
                Operand::Named(name) => Ok(AmlValue::Reference(ObjRef::Named(self.resolve(&name)?))),
                Operand::Expr(inner) if matches!(self.vm.namespace.get(inner)?, Entity::Buffer(_)) => {
                    self.named_buffer(inner).map(AmlValue::Buffer)
                }
                payload => self.load(&payload),
            },
            Entity::Buffer(_) => self.buffer_value(id).map(AmlValue::Buffer),
            Entity::Method(_) => Ok(self.invoke(id, Vec::new())?.unwrap_or(AmlValue::Uninitialized)),
            Entity::Instruction(_) | Entity::Invocation(_) => self.evaluate(id),
            Entity::Scope(_) => Ok(AmlValue::Reference(ObjRef::Named(id))),
        }
    }

    /// Evaluate the size of a buffer entity, and return its contents zero-padded to that size. Contents longer
    /// than the declared size are left intact.
    pub(crate) fn buffer_value(&mut self, id: EntityId) -> Result<Vec<u8>, AmlError> {
        self.sized_buffer(id).map(|(_, data)| data)
    }

    /// The contents of a named buffer. The first time it is used, the buffer's size is evaluated and replaced by
    /// its value, and the padded contents are written back, so the size expression only runs once.
    pub(crate) fn named_buffer(&mut self, id: EntityId) -> Result<Vec<u8>, AmlError> {
        let (size, data) = self.sized_buffer(id)?;
        if let Entity::Buffer(buffer) = self.vm.namespace.get_mut(id)? {
            buffer.size = Operand::Const(AmlValue::Integer(size));
            buffer.data = Some(data.clone());
        }
        Ok(data)
    }

    fn sized_buffer(&mut self, id: EntityId) -> Result<(u64, Vec<u8>), AmlError> {
        let Entity::Buffer(buffer) = self.vm.namespace.get(id)? else {
            return Err(AmlError::InvalidEntity(id));
        };
        let (size, mut data) = (buffer.size.clone(), buffer.data.clone().unwrap_or_default());

        let declared = self.load(&size)?.convert(ObjectType::Integer, self.integer_width())?.as_integer()?;
        let size = usize::try_from(declared).map_err(|_| AmlError::InvalidBufferSize(declared))?;

        if data.len() < size {
            data.try_reserve_exact(size - data.len()).map_err(|_| AmlError::InvalidBufferSize(declared))?;
            data.resize(size, 0);
        }
        Ok((declared, data))
    }

    /// Implements the semantics of `Store`: the value is implicitly converted to the type of the object it is
    /// stored into, if that object is a named integer, string or buffer.
    pub(crate) fn store(&mut self, value: AmlValue, target: &Operand) -> Result<(), AmlError> {
        if value == AmlValue::Uninitialized || *target == Operand::None {
            return Err(AmlError::NilStoreOperands);
        }

        match target {
            Operand::Local(i) => self.store_ref(ObjRef::Arg(ArgSlot::Local(*i)), value),
            Operand::Arg(i) => self.store_ref(ObjRef::Arg(ArgSlot::Method(*i)), value),
            Operand::Named(name) => {
                let id = self.resolve(name)?;
                self.store_ref(ObjRef::Named(id), value)
            }
            Operand::Expr(id) => self.store_ref(ObjRef::Named(*id), value),
            Operand::Debug => {
                info!("[AML Debug] {}", value);
                Ok(())
            }
            Operand::None | Operand::Const(_) => Err(AmlError::InvalidStoreDestination),
        }
    }

    /// Store the result of an operation into its optional `Target` operand.
    pub(crate) fn store_result(&mut self, value: AmlValue, target: Option<&Operand>) -> Result<(), AmlError> {
        match target {
            None | Some(Operand::None) => Ok(()),
            Some(target) => self.store(value, target),
        }
    }

    pub(crate) fn store_ref(&mut self, target: ObjRef, value: AmlValue) -> Result<(), AmlError> {
        match target {
            ObjRef::Arg(slot) => {
                let current = self.slot_mut(slot)?;
                // Arguments passed by reference are stored through
                if let (ArgSlot::Method(_), AmlValue::Reference(ObjRef::Named(referenced))) = (slot, &*current) {
                    let referenced = *referenced;
                    return self.store_named(referenced, value);
                }
                *current = value;
                Ok(())
            }
            ObjRef::Named(id) => self.store_named(id, value),
        }
    }

    fn store_named(&mut self, id: EntityId, value: AmlValue) -> Result<(), AmlError> {
        let width = self.integer_width();
        let payload = match self.vm.namespace.get(id)? {
            Entity::Named(named) => named.payload.clone(),
            Entity::Buffer(_) => return self.store_buffer(id, value),
            _ => return Err(AmlError::InvalidStoreDestination),
        };

        match payload {
            Operand::Const(current) => {
                let typ = current.typ();
                let value = match typ {
                    ObjectType::Integer | ObjectType::String | ObjectType::Buffer if value.typ() != typ => {
                        value.convert(typ, width)?
                    }
                    _ => value,
                };
                if let Entity::Named(named) = self.vm.namespace.get_mut(id)? {
                    named.payload = Operand::Const(value);
                }
                Ok(())
            }
            Operand::Expr(inner) if matches!(self.vm.namespace.get(inner)?, Entity::Buffer(_)) => {
                self.store_buffer(inner, value)
            }
            _ => Err(AmlError::InvalidStoreDestination),
        }
    }

    /// Named buffers keep their size: shorter values are zero-extended, and longer ones truncated.
    fn store_buffer(&mut self, id: EntityId, value: AmlValue) -> Result<(), AmlError> {
        let bytes = value.to_buffer(self.integer_width())?;
        let mut data = self.named_buffer(id)?;

        let length = usize::min(data.len(), bytes.len());
        data[..length].copy_from_slice(&bytes[..length]);
        data[length..].fill(0);

        let Entity::Buffer(buffer) = self.vm.namespace.get_mut(id)? else {
            return Err(AmlError::InvalidStoreDestination);
        };
        buffer.data = Some(data);
        Ok(())
    }

    /// Implements the semantics of `CopyObject`: the destination is replaced by a copy of the value, keeping
    /// the value's type.
    pub(crate) fn copy_object(&mut self, value: AmlValue, target: &Operand) -> Result<(), AmlError> {
        match &value {
            AmlValue::Uninitialized => return Err(AmlError::CopyFailed),
            AmlValue::Reference(reference) if !reference.is_arg_ref() => return Err(AmlError::CopyFailed),
            _ => (),
        }

        let id = match target {
            Operand::None => return Ok(()),
            Operand::Local(i) => return self.slot_mut(ArgSlot::Local(*i)).map(|slot| *slot = value),
            Operand::Arg(i) => return self.slot_mut(ArgSlot::Method(*i)).map(|slot| *slot = value),
            Operand::Debug => {
                info!("[AML Debug] {}", value);
                return Ok(());
            }
            Operand::Named(name) => self.resolve(name)?,
            Operand::Expr(id) => *id,
            Operand::Const(_) => return Err(AmlError::InvalidStoreDestination),
        };

        match self.vm.namespace.get_mut(id)? {
            Entity::Named(named) => {
                named.payload = Operand::Const(value);
                Ok(())
            }
            Entity::Buffer(buffer) => match value {
                AmlValue::Buffer(bytes) => {
                    buffer.size = Operand::Const(AmlValue::Integer(bytes.len() as u64));
                    buffer.data = Some(bytes);
                    Ok(())
                }
                _ => Err(AmlError::CopyFailed),
            },
            _ => Err(AmlError::InvalidStoreDestination),
        }
    }
}
