use crate::{
    context::ExecContext,
    dispatch::DispatchTable,
    namespace::{
        AmlName,
        BufferEntity,
        Entity,
        EntityId,
        Instruction,
        Invocation,
        MethodEntity,
        NameComponent,
        NameSeg,
        NamedEntity,
        Namespace,
        Operand,
        ScopeEntity,
    },
    object::{AmlValue, MethodFlags},
    opcode::Opcode,
    parser::{AmlParser, ParseError},
    sdt::{AmlTable, Signature, TableResolver},
    AmlError,
    VmState,
};
use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};
use core::{fmt, str::FromStr};
use spinning_top::Spinlock;

pub(crate) struct TestResolver {
    pub tables: Vec<(Signature, Vec<u8>)>,
}

impl TableResolver for TestResolver {
    fn lookup_table(&self, signature: Signature) -> Option<&[u8]> {
        self.tables.iter().find(|(table, _)| *table == signature).map(|(_, bytes)| bytes.as_slice())
    }
}

/// A parser that builds the namespace with a closure instead of decoding the table, and records the tables it
/// was handed.
pub(crate) struct TestParser<F> {
    pub build: F,
    pub seen: Arc<Spinlock<Vec<(u8, Signature, usize)>>>,
}

impl<F> TestParser<F>
where
    F: FnMut(&mut Namespace, Signature) -> Result<(), ParseError> + Send,
{
    pub fn new(build: F) -> TestParser<F> {
        TestParser { build, seen: Arc::new(Spinlock::new(Vec::new())) }
    }
}

impl<F> AmlParser for TestParser<F>
where
    F: FnMut(&mut Namespace, Signature) -> Result<(), ParseError> + Send,
{
    fn parse_aml(
        &mut self,
        namespace: &mut Namespace,
        table_handle: u8,
        table_name: Signature,
        table: &AmlTable<'_>,
    ) -> Result<(), ParseError> {
        self.seen.lock().push((table_handle, table_name, table.stream.len()));
        (self.build)(namespace, table_name)
    }
}

#[derive(Clone, Default)]
pub(crate) struct SharedSink(pub Arc<Spinlock<String>>);

impl SharedSink {
    pub fn contents(&self) -> String {
        self.0.lock().clone()
    }
}

impl fmt::Write for SharedSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.lock().push_str(s);
        Ok(())
    }
}

/// Build a table with a valid header and checksum around `body`.
pub(crate) fn make_table(signature: Signature, revision: u8, body: &[u8]) -> Vec<u8> {
    let length = 36 + body.len();
    let mut bytes = Vec::with_capacity(length);
    bytes.extend_from_slice(signature.as_str().as_bytes());
    bytes.extend_from_slice(&(length as u32).to_le_bytes());
    bytes.push(revision);
    bytes.push(0);
    bytes.extend_from_slice(b"RSOSDV");
    bytes.extend_from_slice(b"AMLTEST ");
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(b"RUST");
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(body);

    let sum = bytes.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte));
    bytes[9] = 0u8.wrapping_sub(sum);
    bytes
}

pub(crate) fn test_vm() -> VmState {
    let mut vm = VmState::new();
    vm.dispatch = Some(DispatchTable::new());
    vm
}

/// Evaluate a single instruction in a fresh context at the root of the namespace.
pub(crate) fn run(vm: &mut VmState, op: Opcode, args: Vec<Operand>) -> Result<AmlValue, AmlError> {
    let root = vm.namespace.root();
    let id = add_detached_instruction(&mut vm.namespace, root, op, args);
    ExecContext::new(vm, root).evaluate(id)
}

pub(crate) fn segment_of(name: &str) -> NameSeg {
    NameSeg::from_str(name).unwrap()
}

pub(crate) fn segment(name: &str) -> NameComponent {
    NameComponent::Segment(segment_of(name))
}

pub(crate) fn int(value: u64) -> Operand {
    Operand::Const(AmlValue::Integer(value))
}

pub(crate) fn string(value: &str) -> Operand {
    Operand::Const(AmlValue::String(value.to_string()))
}

pub(crate) fn buffer(bytes: &[u8]) -> Operand {
    Operand::Const(AmlValue::Buffer(bytes.to_vec()))
}

pub(crate) fn named(path: &str) -> Operand {
    Operand::Named(AmlName::from_str(path).unwrap())
}

pub(crate) fn add_scope(namespace: &mut Namespace, parent: EntityId, op: Opcode, name: &str) -> EntityId {
    namespace
        .add_child(parent, Entity::Scope(ScopeEntity { op, name: Some(segment_of(name)), children: vec![] }))
        .unwrap()
}

pub(crate) fn add_name(namespace: &mut Namespace, parent: EntityId, name: &str, payload: Operand) -> EntityId {
    namespace.add_child(parent, Entity::Named(NamedEntity { name: segment_of(name), payload })).unwrap()
}

pub(crate) fn add_method(namespace: &mut Namespace, parent: EntityId, name: &str, arg_count: u8) -> EntityId {
    namespace
        .add_child(
            parent,
            Entity::Method(MethodEntity {
                name: segment_of(name),
                flags: MethodFlags::new(arg_count, false, 0),
                body: vec![],
            }),
        )
        .unwrap()
}

/// Add `Name(name, Buffer(size) { data })`, returning the buffer entity.
pub(crate) fn add_named_buffer(
    namespace: &mut Namespace,
    parent: EntityId,
    name: &str,
    size: Operand,
    data: Option<Vec<u8>>,
) -> EntityId {
    let named = add_name(namespace, parent, name, Operand::None);
    let buffer = namespace.add_detached(named, Entity::Buffer(BufferEntity { size, data })).unwrap();
    if let Entity::Named(entity) = namespace.get_mut(named).unwrap() {
        entity.payload = Operand::Expr(buffer);
    }
    buffer
}

/// An anonymous block, as used for the bodies of `If`, `Else` and `While`.
pub(crate) fn add_block(namespace: &mut Namespace, owner: EntityId, op: Opcode) -> EntityId {
    namespace.add_detached(owner, Entity::Scope(ScopeEntity { op, name: None, children: vec![] })).unwrap()
}

pub(crate) fn add_instruction(namespace: &mut Namespace, parent: EntityId, op: Opcode, args: Vec<Operand>) -> EntityId {
    namespace.add_child(parent, Entity::Instruction(Instruction { op, args })).unwrap()
}

pub(crate) fn add_detached_instruction(
    namespace: &mut Namespace,
    owner: EntityId,
    op: Opcode,
    args: Vec<Operand>,
) -> EntityId {
    namespace.add_detached(owner, Entity::Instruction(Instruction { op, args })).unwrap()
}

pub(crate) fn add_invocation(namespace: &mut Namespace, owner: EntityId, target: &str, args: Vec<Operand>) -> EntityId {
    namespace
        .add_detached(owner, Entity::Invocation(Invocation { target: AmlName::from_str(target).unwrap(), args }))
        .unwrap()
}
