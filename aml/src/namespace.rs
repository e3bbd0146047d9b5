use crate::{
    object::{AmlValue, MethodFlags},
    opcode::Opcode,
    AmlError,
};
use alloc::{
    string::{String, ToString},
    vec,
    vec::Vec,
};
use core::{fmt, str, str::FromStr};

/// A handle to an entity in a [`Namespace`]. Entities are never removed from the namespace, so a handle
/// stays valid for the lifetime of the namespace that produced it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EntityId(u32);

impl EntityId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// An operand of an instruction, or the payload of a named object. Operands are either immediate values,
/// references to the slots of the executing method, names that are resolved when the operand is used, or
/// nested entities (expressions, blocks and buffers) that live in the namespace arena.
#[derive(Clone, PartialEq, Debug)]
pub enum Operand {
    /// Encodes `NullName` targets, where the result of an operation is discarded.
    None,
    Const(AmlValue),
    Local(u8),
    Arg(u8),
    Named(AmlName),
    Expr(EntityId),
    Debug,
}

#[derive(Clone, Debug)]
pub struct ScopeEntity {
    /// `Scope`, `Device`, `Processor`, `PowerRes` or `ThermalZone` for named levels of the namespace. Anonymous
    /// instruction blocks are tagged with the opcode that owns them (`If`, `Else`, `While`).
    pub op: Opcode,
    pub name: Option<NameSeg>,
    pub children: Vec<EntityId>,
}

#[derive(Clone, Debug)]
pub struct NamedEntity {
    pub name: NameSeg,
    pub payload: Operand,
}

#[derive(Clone, Debug)]
pub struct MethodEntity {
    pub name: NameSeg,
    pub flags: MethodFlags,
    pub body: Vec<EntityId>,
}

#[derive(Clone, Debug)]
pub struct BufferEntity {
    /// The declared size of the buffer. This is an arbitrary `TermArg`, and so is only evaluated once an
    /// interpreter is available.
    pub size: Operand,
    pub data: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub struct Instruction {
    pub op: Opcode,
    pub args: Vec<Operand>,
}

#[derive(Clone, Debug)]
pub struct Invocation {
    pub target: AmlName,
    pub args: Vec<Operand>,
}

#[derive(Clone, Debug)]
pub enum Entity {
    Scope(ScopeEntity),
    Named(NamedEntity),
    Method(MethodEntity),
    Buffer(BufferEntity),
    Instruction(Instruction),
    Invocation(Invocation),
}

/// Selects which entities a visitor passed to [`Namespace::visit`] is invoked on.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EntityType {
    Any,
    Scope,
    Device,
    Processor,
    PowerResource,
    ThermalZone,
    Method,
    Named,
    Buffer,
    Instruction,
}

impl Entity {
    pub fn opcode(&self) -> Opcode {
        match self {
            Entity::Scope(scope) => scope.op,
            Entity::Named(_) => Opcode::Name,
            Entity::Method(_) => Opcode::Method,
            Entity::Buffer(_) => Opcode::Buffer,
            Entity::Instruction(instruction) => instruction.op,
            Entity::Invocation(_) => Opcode::MethodCall,
        }
    }

    pub fn name(&self) -> Option<NameSeg> {
        match self {
            Entity::Scope(scope) => scope.name,
            Entity::Named(named) => Some(named.name),
            Entity::Method(method) => Some(method.name),
            Entity::Buffer(_) | Entity::Instruction(_) | Entity::Invocation(_) => None,
        }
    }

    /// Returns the ordered list of child entities if this entity is a scope-capable entity (i.e. it holds a
    /// sequence of instructions).
    pub fn children(&self) -> Option<&[EntityId]> {
        match self {
            Entity::Scope(scope) => Some(&scope.children),
            Entity::Method(method) => Some(&method.body),
            _ => None,
        }
    }

    fn children_mut(&mut self) -> Option<&mut Vec<EntityId>> {
        match self {
            Entity::Scope(scope) => Some(&mut scope.children),
            Entity::Method(method) => Some(&mut method.body),
            _ => None,
        }
    }

    pub fn is_scope(&self) -> bool {
        self.children().is_some()
    }

    pub fn matches(&self, filter: EntityType) -> bool {
        match (filter, self) {
            (EntityType::Any, _) => true,
            (EntityType::Scope, Entity::Scope(scope)) => scope.op == Opcode::Scope,
            (EntityType::Device, Entity::Scope(scope)) => scope.op == Opcode::Device,
            (EntityType::Processor, Entity::Scope(scope)) => scope.op == Opcode::Processor,
            (EntityType::PowerResource, Entity::Scope(scope)) => scope.op == Opcode::PowerRes,
            (EntityType::ThermalZone, Entity::Scope(scope)) => scope.op == Opcode::ThermalZone,
            (EntityType::Method, Entity::Method(_)) => true,
            (EntityType::Named, Entity::Named(_)) => true,
            (EntityType::Buffer, Entity::Buffer(_)) => true,
            (EntityType::Instruction, Entity::Instruction(_) | Entity::Invocation(_)) => true,
            _ => false,
        }
    }

    /// The entities reachable from this one during a traversal: entity-valued operands first, then, for
    /// scope-capable entities, the children in program order.
    fn for_each_nested<F>(&self, mut f: F)
    where
        F: FnMut(EntityId),
    {
        let mut operand = |operand: &Operand| {
            if let Operand::Expr(id) = operand {
                f(*id);
            }
        };

        match self {
            Entity::Named(named) => operand(&named.payload),
            Entity::Buffer(buffer) => operand(&buffer.size),
            Entity::Instruction(instruction) => instruction.args.iter().for_each(operand),
            Entity::Invocation(invocation) => invocation.args.iter().for_each(operand),
            Entity::Scope(_) | Entity::Method(_) => (),
        }

        if let Some(children) = self.children() {
            children.iter().copied().for_each(f);
        }
    }
}

struct Node {
    parent: Option<EntityId>,
    entity: Entity,
}

/// The AML namespace. Entities are stored in an arena and refer to each other by [`EntityId`], which lets
/// the interpreter mutate entities while it walks the tree.
pub struct Namespace {
    nodes: Vec<Node>,
}

impl Namespace {
    /// Create a new AML namespace, with the scopes and objects pre-defined by the ACPI specification.
    pub fn new() -> Namespace {
        let root = Entity::Scope(ScopeEntity { op: Opcode::Scope, name: None, children: Vec::new() });
        let mut namespace = Namespace { nodes: vec![Node { parent: None, entity: root }] };
        let root = namespace.root();

        for name in ["_GPE", "_PR_", "_SB_", "_SI_", "_TZ_"] {
            let scope = ScopeEntity { op: Opcode::Scope, name: Some(NameSeg::from_static(name)), children: Vec::new() };
            namespace.push(root, Entity::Scope(scope), true);
        }

        /*
         * `\_OS` and `\_REV` are queried by firmware to decide which code paths to take. We report the same values
         * as the NT interpreter, which is what firmware is tested against.
         */
        namespace.push(
            root,
            Entity::Named(NamedEntity {
                name: NameSeg::from_static("_OS_"),
                payload: Operand::Const(AmlValue::String("Microsoft Windows NT".to_string())),
            }),
            true,
        );
        namespace.push(
            root,
            Entity::Named(NamedEntity {
                name: NameSeg::from_static("_REV"),
                payload: Operand::Const(AmlValue::Integer(2)),
            }),
            true,
        );

        namespace
    }

    pub fn root(&self) -> EntityId {
        EntityId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, id: EntityId) -> Result<&Entity, AmlError> {
        self.nodes.get(id.index()).map(|node| &node.entity).ok_or(AmlError::InvalidEntity(id))
    }

    pub fn get_mut(&mut self, id: EntityId) -> Result<&mut Entity, AmlError> {
        self.nodes.get_mut(id.index()).map(|node| &mut node.entity).ok_or(AmlError::InvalidEntity(id))
    }

    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.nodes.get(id.index()).and_then(|node| node.parent)
    }

    pub fn children(&self, id: EntityId) -> Result<&[EntityId], AmlError> {
        self.get(id)?.children().ok_or(AmlError::NotAScope(id))
    }

    /// Append `entity` to the children of `parent`, which must be a scope-capable entity. Children are executed
    /// and visited in the order they are added.
    pub fn add_child(&mut self, parent: EntityId, entity: Entity) -> Result<EntityId, AmlError> {
        if !self.get(parent)?.is_scope() {
            return Err(AmlError::NotAScope(parent));
        }
        Ok(self.push(parent, entity, true))
    }

    /// Add an entity that is only reachable through an operand of another entity (e.g. the body of an `If`, or
    /// a nested expression). `owner` is recorded as its parent for the purposes of name resolution.
    pub fn add_detached(&mut self, owner: EntityId, entity: Entity) -> Result<EntityId, AmlError> {
        self.get(owner)?;
        Ok(self.push(owner, entity, false))
    }

    fn push(&mut self, parent: EntityId, entity: Entity, link: bool) -> EntityId {
        let id = EntityId(self.nodes.len() as u32);
        self.nodes.push(Node { parent: Some(parent), entity });

        if link {
            if let Some(children) = self.nodes[parent.index()].entity.children_mut() {
                children.push(id);
            }
        }
        id
    }

    /// Find the first child of `scope` with the given name. Returns `None` if `scope` is not scope-capable.
    pub fn find_child(&self, scope: EntityId, name: NameSeg) -> Option<EntityId> {
        let children = self.children(scope).ok()?;
        children.iter().copied().find(|&child| self.get(child).ok().and_then(Entity::name) == Some(name))
    }

    /// Resolve an absolute path (e.g. `\_SB.PCI0._STA`) to an entity. Empty, relative, or malformed paths, and
    /// paths that don't name an entity, return `None`.
    pub fn lookup(&self, path: &str) -> Option<EntityId> {
        if !path.starts_with('\\') {
            return None;
        }

        if path.len() == 1 {
            return Some(self.root());
        }

        let name = AmlName::from_str(path).ok()?.normalize().ok()?;
        self.resolve(&name, self.root()).ok()
    }

    /// Resolve `name` against the entity `scope`, applying the search rules described in §5.3 of the ACPI
    /// specification to single-segment names.
    pub fn resolve(&self, name: &AmlName, scope: EntityId) -> Result<EntityId, AmlError> {
        if let Some(seg) = name.search_rules_apply() {
            let mut level = Some(scope);
            while let Some(current) = level {
                if let Some(found) = self.find_child(current, seg) {
                    return Ok(found);
                }
                level = self.parent(current);
            }
            return Err(AmlError::ObjectDoesNotExist(name.clone()));
        }

        let mut level = scope;
        for component in &name.0 {
            level = match component {
                NameComponent::Root => self.root(),
                NameComponent::Prefix => self.parent(level).ok_or(AmlError::RootHasNoParent)?,
                NameComponent::Segment(seg) => {
                    self.find_child(level, *seg).ok_or_else(|| AmlError::ObjectDoesNotExist(name.clone()))?
                }
            };
        }

        Ok(level)
    }

    /// Traverse the namespace depth-first, invoking `visitor` on each entity that matches `filter`. Parents are
    /// visited before their children, and siblings in the order they were added. The visitor returns whether
    /// the children of the entity should be visited; entities that don't match the filter are always
    /// descended into.
    pub fn visit<F>(&self, filter: EntityType, mut visitor: F)
    where
        F: FnMut(usize, EntityId, &Entity) -> bool,
    {
        let mut walker = Walker::new(self.root());
        while let Some((depth, id)) = walker.next() {
            let Ok(entity) = self.get(id) else {
                continue;
            };

            let descend = if entity.matches(filter) { visitor(depth, id, entity) } else { true };
            if descend {
                walker.descend(self, depth, id);
            }
        }
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Namespace::new()
    }
}

/// An explicit-stack depth-first walk of the namespace. The walker does not hold a borrow of the namespace
/// between steps, so the caller is free to mutate the entity it was just handed.
pub(crate) struct Walker {
    stack: Vec<(usize, EntityId)>,
}

impl Walker {
    pub(crate) fn new(start: EntityId) -> Walker {
        Walker { stack: vec![(0, start)] }
    }

    pub(crate) fn next(&mut self) -> Option<(usize, EntityId)> {
        self.stack.pop()
    }

    pub(crate) fn descend(&mut self, namespace: &Namespace, depth: usize, id: EntityId) {
        let Ok(entity) = namespace.get(id) else {
            return;
        };

        let mark = self.stack.len();
        let stack = &mut self.stack;
        entity.for_each_nested(|child| stack.push((depth + 1, child)));
        // Popped from the end, so reverse to visit in program order
        self.stack[mark..].reverse();
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const STEM: &str = "│   ";
        const BRANCH: &str = "├── ";
        const END: &str = "└── ";

        fn print_level(
            namespace: &Namespace,
            f: &mut fmt::Formatter<'_>,
            children: &[EntityId],
            indent_stack: String,
        ) -> fmt::Result {
            let named: Vec<_> = children
                .iter()
                .filter_map(|&child| namespace.get(child).ok())
                .filter(|entity| entity.name().is_some())
                .collect();

            for (i, entity) in named.iter().enumerate() {
                let end = i == named.len() - 1;
                let seg = entity.name();
                let name = seg.as_ref().map(NameSeg::as_str).unwrap_or("");
                match entity {
                    Entity::Named(NamedEntity { payload: Operand::Const(value), .. }) => {
                        writeln!(f, "{}{}{}: {}", &indent_stack, if end { END } else { BRANCH }, name, value)?
                    }
                    _ => writeln!(f, "{}{}{}: {:?}", &indent_stack, if end { END } else { BRANCH }, name, entity.opcode())?,
                }

                if let (Entity::Scope(scope), Some(_)) = (entity, entity.name()) {
                    let indent = if end { indent_stack.clone() + "    " } else { indent_stack.clone() + STEM };
                    print_level(namespace, f, &scope.children, indent)?;
                }
            }

            Ok(())
        }

        writeln!(f, "\n    \\:")?;
        print_level(self, f, self.children(self.root()).map_err(|_| fmt::Error)?, String::from("    "))
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct AmlName(Vec<NameComponent>);

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum NameComponent {
    Root,
    Prefix,
    Segment(NameSeg),
}

impl AmlName {
    pub fn root() -> AmlName {
        AmlName(vec![NameComponent::Root])
    }

    pub fn from_name_seg(seg: NameSeg) -> AmlName {
        AmlName(vec![NameComponent::Segment(seg)])
    }

    pub fn from_components(components: Vec<NameComponent>) -> AmlName {
        AmlName(components)
    }

    pub fn as_string(&self) -> String {
        self.0
            .iter()
            .fold(String::new(), |name, component| match component {
                NameComponent::Root => name + "\\",
                NameComponent::Prefix => name + "^",
                NameComponent::Segment(seg) => name + seg.as_str() + ".",
            })
            .trim_end_matches('.')
            .to_string()
    }

    /// An AML path is normal if it does not contain any prefix elements ("^" characters, when
    /// expressed as a string).
    pub fn is_normal(&self) -> bool {
        !self.0.contains(&NameComponent::Prefix)
    }

    pub fn is_absolute(&self) -> bool {
        self.0.first() == Some(&NameComponent::Root)
    }

    /// Special rules apply when searching for paths made up of a single name segment. Returns that segment if
    /// the rules apply.
    pub fn search_rules_apply(&self) -> Option<NameSeg> {
        match self.0.as_slice() {
            [NameComponent::Segment(seg)] => Some(*seg),
            _ => None,
        }
    }

    /// Normalize an AML path, resolving prefix chars. Returns `AmlError::InvalidNormalizedName` if the path
    /// normalizes to an invalid path (e.g. `\^_FOO`)
    pub fn normalize(self) -> Result<AmlName, AmlError> {
        if self.is_normal() {
            return Ok(self);
        }

        let mut normalized = Vec::with_capacity(self.0.len());
        for component in &self.0 {
            match component {
                NameComponent::Prefix => match normalized.last() {
                    Some(NameComponent::Segment(_)) => {
                        normalized.pop();
                    }
                    // A relative name can legitimately start with prefixes, which are resolved later
                    None if !self.is_absolute() => normalized.push(NameComponent::Prefix),
                    Some(NameComponent::Prefix) => normalized.push(NameComponent::Prefix),
                    _ => return Err(AmlError::InvalidNormalizedName(self.clone())),
                },
                other => normalized.push(*other),
            }
        }

        Ok(AmlName(normalized))
    }

    /// Get the parent of this `AmlName`. For example, the parent of `\_SB.PCI0._PRT` is `\_SB.PCI0`.
    pub fn parent(&self) -> Result<AmlName, AmlError> {
        let mut normalized_self = self.clone().normalize()?;

        match normalized_self.0.last() {
            Some(NameComponent::Segment(_)) => {
                normalized_self.0.pop();
                Ok(normalized_self)
            }
            _ => Err(AmlError::RootHasNoParent),
        }
    }
}

impl FromStr for AmlName {
    type Err = AmlError;

    fn from_str(mut string: &str) -> Result<Self, Self::Err> {
        if string.is_empty() {
            return Err(AmlError::EmptyNamesAreInvalid);
        }

        let mut components = Vec::new();

        // If it starts with a \, make it an absolute name
        if let Some(rest) = string.strip_prefix('\\') {
            components.push(NameComponent::Root);
            string = rest;
        }

        if !string.is_empty() {
            for mut part in string.split('.') {
                while let Some(rest) = part.strip_prefix('^') {
                    components.push(NameComponent::Prefix);
                    part = rest;
                }

                components.push(NameComponent::Segment(NameSeg::from_str(part)?));
            }
        }

        Ok(Self(components))
    }
}

impl fmt::Display for AmlName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NameSeg(pub(crate) [u8; 4]);

impl NameSeg {
    pub fn from_str(string: &str) -> Result<NameSeg, AmlError> {
        // Each NameSeg can only have four chars, and must have at least one
        if string.is_empty() || string.len() > 4 {
            return Err(AmlError::InvalidNameSeg([0xff, 0xff, 0xff, 0xff]));
        }

        // We pre-fill the array with '_', so it will already be correct if the length is < 4
        let mut seg = [b'_'; 4];
        seg[..string.len()].copy_from_slice(string.as_bytes());
        NameSeg::from_bytes(seg)
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Result<NameSeg, AmlError> {
        if !is_lead_name_char(bytes[0]) || !bytes[1..].iter().all(|&c| is_name_char(c)) {
            return Err(AmlError::InvalidNameSeg(bytes));
        }
        Ok(NameSeg(bytes))
    }

    /// Only for the names the interpreter itself defines, which are known to be valid.
    fn from_static(name: &'static str) -> NameSeg {
        let mut seg = [b'_'; 4];
        seg.copy_from_slice(&name.as_bytes()[..4]);
        NameSeg(seg)
    }

    pub fn as_str(&self) -> &str {
        // Validated as ASCII on construction
        str::from_utf8(&self.0).unwrap_or("????")
    }
}

pub fn is_lead_name_char(c: u8) -> bool {
    c.is_ascii_uppercase() || c == b'_'
}

pub fn is_name_char(c: u8) -> bool {
    is_lead_name_char(c) || c.is_ascii_digit()
}

impl fmt::Debug for NameSeg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}
