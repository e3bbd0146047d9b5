//! `aml_vm` executes the control methods defined in a system's AML tables (the DSDT and SSDTs). The bytecode
//! is decoded by an [`AmlParser`] into a tree of entities in a [`Namespace`], which the interpreter then
//! checks and executes.
//!
//! ### Using the interpreter
//! The interpreter needs three things from the host: an [`sdt::TableResolver`] that can find the raw ACPI
//! tables, an [`AmlParser`] that decodes them, and somewhere to write errors to. Once it has been created,
//! [`Interpreter::init`] loads the tables, sets the width of AML integers from the revision of the DSDT, and
//! checks the static objects of the namespace (e.g. by sizing buffers). Methods can then be looked up and
//! invoked by path:
//! ```ignore
//! let mut interpreter = Interpreter::new(error_sink, resolver, parser);
//! interpreter.init()?;
//! let status = interpreter.invoke_method("\\_SB.PCI0._STA", vec![])?;
//! ```

#![no_std]

#[cfg(test)]
extern crate std;

extern crate alloc;

pub mod context;
mod dispatch;
mod expression;
pub mod namespace;
pub mod object;
pub mod opcode;
pub mod parser;
pub mod sdt;
mod statement;
#[cfg(test)]
mod test_utils;

pub use crate::{
    namespace::{AmlName, Entity, EntityId, EntityType, NameSeg, Namespace, Operand},
    object::{AmlValue, IntegerWidth, ObjectType},
    parser::{AmlParser, ParseError},
};

use crate::{
    context::{ArgSlot, ExecContext},
    dispatch::DispatchTable,
    namespace::{NamedEntity, Walker},
    opcode::Opcode,
    sdt::{AmlTable, Signature, TableResolver},
};
use alloc::{boxed::Box, string::String, vec::Vec};
use core::{fmt, str::FromStr};
use log::{debug, info};
use spinning_top::Spinlock;

/// The handle the DSDT is loaded under. SSDTs are loaded under `SSDT_HANDLE`.
pub const DSDT_HANDLE: u8 = 1;
pub const SSDT_HANDLE: u8 = 2;

/// Everything the executing AML can touch. This sits behind the interpreter's lock, and is mutably borrowed
/// by the context of the method being executed.
pub struct VmState {
    pub(crate) namespace: Namespace,
    pub(crate) integer_width: IntegerWidth,
    pub(crate) dispatch: Option<DispatchTable>,
}

impl VmState {
    pub(crate) fn new() -> VmState {
        // Without a DSDT to say otherwise, integers are 64 bits wide
        VmState { namespace: Namespace::new(), integer_width: IntegerWidth::Bits64, dispatch: None }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Stage {
    Created,
    Failed,
    Ready,
}

pub struct Interpreter {
    resolver: Box<dyn TableResolver>,
    parser: Box<dyn AmlParser>,
    error_sink: Box<dyn fmt::Write + Send>,
    state: Spinlock<VmState>,
    stage: Stage,
}

impl Interpreter {
    pub fn new<W, R, P>(error_sink: W, resolver: R, parser: P) -> Interpreter
    where
        W: fmt::Write + Send + 'static,
        R: TableResolver + 'static,
        P: AmlParser + 'static,
    {
        Interpreter {
            resolver: Box::new(resolver),
            parser: Box::new(parser),
            error_sink: Box::new(error_sink),
            state: Spinlock::new(VmState::new()),
            stage: Stage::Created,
        }
    }

    /// Load the DSDT and SSDT into the namespace, and check the static objects they define. This can only be
    /// done once, and errors are also written to the error sink. If initialization fails, no methods can be
    /// invoked.
    pub fn init(&mut self) -> Result<(), AmlError> {
        if self.stage != Stage::Created {
            return Err(AmlError::AlreadyInitialized);
        }

        let result = self.load_tables().and_then(|()| check_entities(self.state.get_mut()));
        match result {
            Ok(()) => self.stage = Stage::Ready,
            Err(ref err) => {
                self.stage = Stage::Failed;
                // There's nowhere else to report a failure to write the error
                let _ = writeln!(self.error_sink, "aml_vm: {}", err);
            }
        }
        result
    }

    fn load_tables(&mut self) -> Result<(), AmlError> {
        let Interpreter { resolver, parser, state, .. } = self;
        let state = state.get_mut();

        for (handle, signature) in [(DSDT_HANDLE, Signature::DSDT), (SSDT_HANDLE, Signature::SSDT)] {
            let Some(bytes) = resolver.lookup_table(signature) else {
                debug!("No {} table found. Skipping.", signature);
                continue;
            };

            let table = AmlTable::new(bytes)?;
            debug!("Loading {} ({} bytes of AML)", signature, table.stream.len());
            parser
                .parse_aml(&mut state.namespace, handle, signature, &table)
                .map_err(|err| AmlError::TableDecode { module: err.module, message: err.message })?;

            if signature == Signature::DSDT {
                state.integer_width = IntegerWidth::from_revision(table.header.revision);
                info!(
                    "DSDT has revision {}: using {}-bit integers",
                    table.header.revision,
                    state.integer_width.bits()
                );
            }
        }

        state.dispatch = Some(DispatchTable::new());
        Ok(())
    }

    pub fn integer_width(&self) -> IntegerWidth {
        self.state.lock().integer_width
    }

    /// Resolve an absolute path, such as `\_SB.PCI0`, to an entity.
    pub fn lookup(&self, path: &str) -> Option<EntityId> {
        self.state.lock().namespace.lookup(path)
    }

    /// Walk the namespace, as [`Namespace::visit`]. The interpreter is locked while the visitor runs.
    pub fn visit<F>(&self, filter: EntityType, visitor: F)
    where
        F: FnMut(usize, EntityId, &Entity) -> bool,
    {
        self.state.lock().namespace.visit(filter, visitor)
    }

    pub fn with_namespace<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Namespace) -> R,
    {
        f(&self.state.lock().namespace)
    }

    /// Invoke the method at `path`, returning its result if it executed a `Return`.
    pub fn invoke_method(&self, path: &str, args: Vec<AmlValue>) -> Result<Option<AmlValue>, AmlError> {
        let name = AmlName::from_str(path)?.normalize()?;
        let method = self.lookup(path).ok_or(AmlError::ObjectDoesNotExist(name))?;
        self.invoke(method, args)
    }

    pub fn invoke(&self, method: EntityId, args: Vec<AmlValue>) -> Result<Option<AmlValue>, AmlError> {
        if self.stage != Stage::Ready {
            return Err(AmlError::NotInitialized);
        }

        let mut state = self.state.lock();
        let root = state.namespace.root();
        ExecContext::new(&mut state, root).invoke(method, args)
    }
}

/// Walk the namespace once the tables are loaded, sizing buffers to their declared length. Method bodies are
/// skipped, as their contents can depend on the arguments they are invoked with. Stops at the first error.
fn check_entities(state: &mut VmState) -> Result<(), AmlError> {
    let root = state.namespace.root();
    let mut context = ExecContext::new(state, root);
    let mut walker = Walker::new(root);

    while let Some((depth, id)) = walker.next() {
        let target = match context.vm.namespace.get(id)? {
            Entity::Named(NamedEntity { payload: Operand::Expr(inner), .. }) => *inner,
            _ => id,
        };

        match context.vm.namespace.get(target)? {
            Entity::Method(_) => continue,
            Entity::Buffer(_) => {
                let scope = enclosing_scope(&context.vm.namespace, target);
                context.set_scope(scope);
                context.named_buffer(target)?;
            }
            _ => (),
        }

        walker.descend(&context.vm.namespace, depth, id);
    }

    Ok(())
}

/// The nearest ancestor of `id` that can hold children, which relative names in its operands are resolved from.
fn enclosing_scope(namespace: &Namespace, id: EntityId) -> EntityId {
    let mut current = id;
    while let Some(parent) = namespace.parent(current) {
        if namespace.get(parent).map_or(false, Entity::is_scope) {
            return parent;
        }
        current = parent;
    }
    namespace.root()
}

#[derive(Clone, PartialEq, Debug)]
pub enum AmlError {
    InvalidTableHeader,
    /// An [`AmlParser`] failed to decode a table.
    TableDecode {
        module: String,
        message: String,
    },
    NotInitialized,
    AlreadyInitialized,

    InvalidNameSeg([u8; 4]),
    InvalidNormalizedName(AmlName),
    RootHasNoParent,
    EmptyNamesAreInvalid,
    ObjectDoesNotExist(AmlName),
    InvalidEntity(EntityId),
    NotAScope(EntityId),
    NotAMethod(EntityId),

    UnsupportedOpcode(Opcode),
    MissingOperand(Opcode),
    NilStoreOperands,
    InvalidStoreDestination,
    CopyFailed,
    ArgIndexOutOfBounds(ArgSlot),
    DivideByZero,
    InvalidBufferSize(u64),

    ConversionFromEmptyString,
    IncompatibleConversion {
        from: ObjectType,
        to: ObjectType,
    },
    ObjectNotOfExpectedType {
        expected: ObjectType,
        got: ObjectType,
    },
    InvalidComparisonType(ObjectType),

    IfBodyNotScopedEntity,
    ElseBodyNotScopedEntity,
    WhileBodyNotScopedEntity,

    MethodArgCountIncorrect {
        expected: usize,
        got: usize,
    },
    CallDepthExceeded,
}

impl fmt::Display for AmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmlError::InvalidTableHeader => write!(f, "invalid table header"),
            AmlError::TableDecode { module, message } => write!(f, "{module}: {message}"),
            AmlError::NotInitialized => write!(f, "interpreter has not been initialized"),
            AmlError::AlreadyInitialized => write!(f, "interpreter has already been initialized"),
            AmlError::InvalidNameSeg(seg) => write!(f, "invalid name segment {seg:x?}"),
            AmlError::InvalidNormalizedName(name) => write!(f, "{name} does not normalize to a valid name"),
            AmlError::RootHasNoParent => write!(f, "the root scope has no parent"),
            AmlError::EmptyNamesAreInvalid => write!(f, "empty names are invalid"),
            AmlError::ObjectDoesNotExist(name) => write!(f, "{name} does not exist"),
            AmlError::InvalidEntity(id) => write!(f, "invalid entity {id:?}"),
            AmlError::NotAScope(id) => write!(f, "entity {id:?} is not a scope"),
            AmlError::NotAMethod(id) => write!(f, "entity {id:?} is not a method"),
            AmlError::UnsupportedOpcode(op) => write!(f, "opcode {op:?} is not supported"),
            AmlError::MissingOperand(op) => write!(f, "{op:?} is missing an operand"),
            AmlError::NilStoreOperands => write!(f, "store: source and/or destination operands are missing"),
            AmlError::InvalidStoreDestination => write!(f, "store: invalid destination"),
            AmlError::CopyFailed => write!(f, "copy: source can't be copied to destination"),
            AmlError::ArgIndexOutOfBounds(slot) => write!(f, "{slot:?} is out of bounds"),
            AmlError::DivideByZero => write!(f, "division by zero"),
            AmlError::InvalidBufferSize(size) => write!(f, "invalid buffer size {size:#x}"),
            AmlError::ConversionFromEmptyString => write!(f, "can't convert from an empty string"),
            AmlError::IncompatibleConversion { from, to } => write!(f, "can't convert {from:?} to {to:?}"),
            AmlError::ObjectNotOfExpectedType { expected, got } => write!(f, "expected {expected:?}, got {got:?}"),
            AmlError::InvalidComparisonType(typ) => {
                write!(f, "logic opcodes can only be applied to Integer, String or Buffer arguments, not {typ:?}")
            }
            AmlError::IfBodyNotScopedEntity => write!(f, "If body is not a scoped entity"),
            AmlError::ElseBodyNotScopedEntity => write!(f, "Else body is not a scoped entity"),
            AmlError::WhileBodyNotScopedEntity => write!(f, "While body is not a scoped entity"),
            AmlError::MethodArgCountIncorrect { expected, got } => {
                write!(f, "method takes {expected} arguments, but {got} were passed")
            }
            AmlError::CallDepthExceeded => write!(f, "maximum method call depth exceeded"),
        }
    }
}
