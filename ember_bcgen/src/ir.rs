//! Arena-allocated mid-level IR consumed by the bytecode backend.
//!
//! Blocks and instructions live in flat arenas owned by the [`Function`]
//! and are addressed by stable integer handles ([`BlockId`], [`InstrId`]).
//! Cross-references (operands, branch targets, relocations) store handles,
//! never references, so passes that split blocks or rewrite instructions
//! cannot invalidate each other.
//!
//! The IR arrives register-allocated: register assignments are a side
//! table ([`RegisterFile`]) indexed by instruction handle, with `None`
//! meaning the instruction's result is dead.

use ember_core::Span;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Extra slots the calling convention occupies above the argument
/// registers at the top of the frame (callee closure and `this`).
pub const CALL_EXTRA_REGISTERS: u32 = 2;

/// Handle of a basic block inside a [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Handle of an instruction inside a [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub u32);

/// Identifier id handed over by the module-level string interner.
///
/// Property-access instructions carry these; the backend never sees the
/// string contents, only the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringId(pub u32);

/// A virtual register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Register(pub u32);

impl Register {
    /// Highest index encodable in the short (8-bit) operand form.
    pub const SHORT_MAX: u32 = u8::MAX as u32;

    /// The register index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Whether this register fits an 8-bit operand.
    #[inline]
    pub const fn is_short(self) -> bool {
        self.0 <= Self::SHORT_MAX
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Static type summary of an IR value.
///
/// The upstream type inference produces these; the backend consumes them
/// for the numeric fast-path opcodes and for register clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Type {
    /// A double-precision number.
    Number,
    /// A boolean.
    Boolean,
    /// The `undefined` value.
    Undefined,
    /// The `null` value.
    Null,
    /// A string reference.
    String,
    /// An object reference.
    Object,
    /// An environment record reference.
    Environment,
    /// Statically unknown.
    #[default]
    Any,
}

impl Type {
    /// Whether values of this type are statically known numeric.
    #[inline]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Type::Number)
    }

    /// Whether values of this type never hold a heap pointer.
    #[inline]
    pub const fn is_non_pointer(self) -> bool {
        matches!(
            self,
            Type::Number | Type::Boolean | Type::Undefined | Type::Null
        )
    }
}

/// A literal constant operand.
#[derive(Debug, Clone, Copy)]
pub enum Literal {
    /// `undefined`.
    Undefined,
    /// `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number.
    Number(f64),
    /// An interned string.
    String(StringId),
}

impl Literal {
    /// Whether this number literal is exactly `+0.0`.
    #[inline]
    pub fn is_positive_zero(&self) -> bool {
        matches!(self, Literal::Number(n) if n.to_bits() == 0)
    }

    /// Whether reloading this literal is as cheap as copying a register.
    ///
    /// These are the literals with dedicated zero-operand load opcodes:
    /// undefined, null, booleans, and positive zero.
    #[inline]
    pub fn is_cheap(&self) -> bool {
        match self {
            Literal::Undefined | Literal::Null | Literal::Bool(_) => true,
            Literal::Number(_) => self.is_positive_zero(),
            Literal::String(_) => false,
        }
    }

    /// The static type of this literal.
    pub fn type_of(&self) -> Type {
        match self {
            Literal::Undefined => Type::Undefined,
            Literal::Null => Type::Null,
            Literal::Bool(_) => Type::Boolean,
            Literal::Number(_) => Type::Number,
            Literal::String(_) => Type::String,
        }
    }

    /// The number value if this is a non-negative integer fitting `u8`.
    pub fn as_uint8(&self) -> Option<u8> {
        match self {
            Literal::Number(n)
                if n.fract() == 0.0 && *n >= 0.0 && *n <= 255.0 && n.to_bits() != (-0.0f64).to_bits() =>
            {
                Some(*n as u8)
            }
            _ => None,
        }
    }

    /// The number value if it is an integer fitting `i32`.
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Literal::Number(n)
                if n.fract() == 0.0
                    && *n >= f64::from(i32::MIN)
                    && *n <= f64::from(i32::MAX)
                    && n.to_bits() != (-0.0f64).to_bits() =>
            {
                Some(*n as i32)
            }
            _ => None,
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Undefined, Literal::Undefined) => true,
            (Literal::Null, Literal::Null) => true,
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            // Bitwise equality so that 0.0 and -0.0 stay distinct and NaN
            // reloads of the same payload compare equal.
            (Literal::Number(a), Literal::Number(b)) => a.to_bits() == b.to_bits(),
            (Literal::String(a), Literal::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

/// Binary arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a % b`
    Mod,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-a`
    Negate,
    /// `!a`
    Not,
    /// `~a`
    BitNot,
    /// `typeof a`
    TypeOf,
}

/// Comparison operators, used standalone and fused into branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `a < b`
    Less,
    /// `a <= b`
    LessEqual,
    /// `a > b`
    Greater,
    /// `a >= b`
    GreaterEqual,
    /// `a == b`
    Equal,
    /// `a != b`
    NotEqual,
    /// `a === b`
    StrictEqual,
    /// `a !== b`
    StrictNotEqual,
}

/// A property access key: either an interned identifier or a computed
/// value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKey {
    /// A literal identifier key, eligible for inline caching.
    Id(StringId),
    /// A computed key held in a register.
    Value(InstrId),
}

/// The closed set of instruction kinds the backend accepts.
///
/// Kinds the upstream pipeline must lower away before instruction
/// selection (sparse [`InstrKind::Switch`]) still appear here so the
/// selector's match stays exhaustive and the violation is loud.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    /// Materialize a literal.
    LoadConst(Literal),
    /// Load the i-th parameter.
    LoadParam(u32),
    /// Register copy.
    Mov(InstrId),
    /// Register copy inserted by spill insertion.
    SpillMov(InstrId),
    /// Marks a register written as a side effect of a following
    /// instruction; produces no bytecode.
    ImplicitMov(InstrId),
    /// SSA join; lowered to movs by the upstream allocator, emits nothing.
    Phi(SmallVec<[(InstrId, BlockId); 2]>),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        src: InstrId,
    },
    /// Binary arithmetic.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: InstrId,
        /// Right operand.
        rhs: InstrId,
    },
    /// Comparison producing a boolean.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        lhs: InstrId,
        /// Right operand.
        rhs: InstrId,
    },
    /// Property load.
    GetProperty {
        /// Base object.
        object: InstrId,
        /// Key.
        key: PropertyKey,
    },
    /// Property store.
    SetProperty {
        /// Base object.
        object: InstrId,
        /// Key.
        key: PropertyKey,
        /// Stored value.
        value: InstrId,
    },
    /// Generic call; arguments have been lowered into frame movs.
    Call {
        /// Callee.
        callee: InstrId,
        /// Argument movs, outermost first.
        args: SmallVec<[InstrId; 4]>,
    },
    /// Fixed-arity call (1-4 arguments) encoding argument registers
    /// directly; argument registers are marked by [`InstrKind::ImplicitMov`]s.
    CallN {
        /// Callee.
        callee: InstrId,
        /// Arguments, in call order.
        args: SmallVec<[InstrId; 4]>,
    },
    /// Allocate the function's own environment record.
    CreateEnvironment,
    /// Walk `depth` environments outward from the current scope.
    ResolveEnvironment {
        /// Number of scopes to hop; always at least 1.
        depth: u32,
    },
    /// Read a slot from an environment record.
    LoadFromEnvironment {
        /// Environment record.
        env: InstrId,
        /// Variable slot.
        slot: u32,
    },
    /// Write a slot of an environment record.
    StoreToEnvironment {
        /// Environment record.
        env: InstrId,
        /// Variable slot.
        slot: u32,
        /// Stored value.
        value: InstrId,
    },
    /// Create a closure over an environment.
    CreateClosure {
        /// Captured environment.
        env: InstrId,
        /// Index of the target function in the module.
        function: u32,
    },
    /// First instruction of a handler block; receives the thrown value
    /// and anchors the handler's coverage address.
    Catch,
    /// Marks the lexical end of a try region; emits nothing.
    TryEnd,
    /// A `debugger;` statement.
    Debugger,
    /// Statically unreachable point; encoded only in debug builds.
    Unreachable,
    /// Return a value.
    Ret(InstrId),
    /// Throw a value.
    Throw(InstrId),
    /// Unconditional branch.
    Branch {
        /// Target block.
        target: BlockId,
    },
    /// Two-way branch on a boolean condition.
    CondBranch {
        /// Condition.
        cond: InstrId,
        /// Taken when truthy.
        on_true: BlockId,
        /// Taken when falsy.
        on_false: BlockId,
    },
    /// Fused compare-and-branch.
    CompareBranch {
        /// Comparison operator.
        op: CompareOp,
        /// Left operand.
        lhs: InstrId,
        /// Right operand.
        rhs: InstrId,
        /// Taken when the comparison holds.
        on_true: BlockId,
        /// Taken otherwise.
        on_false: BlockId,
    },
    /// Dense integer switch, pre-selected by the upstream density
    /// heuristic. Case values cover `[min, min + size)` with holes going
    /// to `default`.
    SwitchImm {
        /// Scrutinee.
        value: InstrId,
        /// Default target.
        default: BlockId,
        /// Smallest case value.
        min: u32,
        /// Number of table slots.
        size: u32,
        /// Explicit `(value, target)` pairs.
        cases: Vec<(u32, BlockId)>,
    },
    /// Sparse switch. Must be lowered (to [`InstrKind::SwitchImm`] or a
    /// compare chain) before reaching the selector.
    Switch {
        /// Scrutinee.
        value: InstrId,
        /// Default target.
        default: BlockId,
        /// Sparse `(value, target)` pairs.
        cases: Vec<(u32, BlockId)>,
    },
    /// Enter a try region; control branches to the region body, and the
    /// edge to the handler keeps it reachable.
    TryStart {
        /// First block of the protected region.
        body: BlockId,
        /// Handler block for faults inside the region.
        catch_block: BlockId,
    },
}

impl InstrKind {
    /// Whether this kind terminates a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstrKind::Ret(_)
                | InstrKind::Throw(_)
                | InstrKind::Branch { .. }
                | InstrKind::CondBranch { .. }
                | InstrKind::CompareBranch { .. }
                | InstrKind::SwitchImm { .. }
                | InstrKind::Switch { .. }
                | InstrKind::TryStart { .. }
                | InstrKind::Unreachable
        )
    }

    /// Whether this kind produces a value in its assigned register.
    pub fn has_output(&self) -> bool {
        match self {
            InstrKind::SetProperty { .. }
            | InstrKind::StoreToEnvironment { .. }
            | InstrKind::TryEnd
            | InstrKind::Debugger => false,
            k if k.is_terminator() => false,
            _ => true,
        }
    }

    /// Whether this kind can raise an exception at runtime.
    pub fn may_throw(&self) -> bool {
        matches!(
            self,
            InstrKind::Unary { .. }
                | InstrKind::Binary { .. }
                | InstrKind::Compare { .. }
                | InstrKind::GetProperty { .. }
                | InstrKind::SetProperty { .. }
                | InstrKind::Call { .. }
                | InstrKind::CallN { .. }
                | InstrKind::Throw(_)
                | InstrKind::CompareBranch { .. }
        )
    }

    /// Collect the instruction operands in encoding order.
    pub fn operands(&self) -> SmallVec<[InstrId; 4]> {
        let mut out = SmallVec::new();
        self.for_each_operand(|id| out.push(id));
        out
    }

    /// Visit every instruction operand.
    pub fn for_each_operand(&self, mut f: impl FnMut(InstrId)) {
        match self {
            InstrKind::LoadConst(_)
            | InstrKind::LoadParam(_)
            | InstrKind::CreateEnvironment
            | InstrKind::ResolveEnvironment { .. }
            | InstrKind::Catch
            | InstrKind::TryEnd
            | InstrKind::Debugger
            | InstrKind::Unreachable
            | InstrKind::Branch { .. }
            | InstrKind::TryStart { .. } => {}
            InstrKind::Mov(src)
            | InstrKind::SpillMov(src)
            | InstrKind::ImplicitMov(src)
            | InstrKind::Unary { src, .. }
            | InstrKind::Ret(src)
            | InstrKind::Throw(src) => f(*src),
            InstrKind::Phi(entries) => {
                for (v, _) in entries {
                    f(*v);
                }
            }
            InstrKind::Binary { lhs, rhs, .. } | InstrKind::Compare { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            InstrKind::GetProperty { object, key } => {
                f(*object);
                if let PropertyKey::Value(k) = key {
                    f(*k);
                }
            }
            InstrKind::SetProperty { object, key, value } => {
                f(*object);
                if let PropertyKey::Value(k) = key {
                    f(*k);
                }
                f(*value);
            }
            InstrKind::Call { callee, args } | InstrKind::CallN { callee, args } => {
                f(*callee);
                for a in args {
                    f(*a);
                }
            }
            InstrKind::LoadFromEnvironment { env, .. } => f(*env),
            InstrKind::StoreToEnvironment { env, value, .. } => {
                f(*env);
                f(*value);
            }
            InstrKind::CreateClosure { env, .. } => f(*env),
            InstrKind::CondBranch { cond, .. } => f(*cond),
            InstrKind::CompareBranch { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            InstrKind::SwitchImm { value, .. } | InstrKind::Switch { value, .. } => f(*value),
        }
    }

    /// Visit every instruction operand mutably.
    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut InstrId)) {
        match self {
            InstrKind::LoadConst(_)
            | InstrKind::LoadParam(_)
            | InstrKind::CreateEnvironment
            | InstrKind::ResolveEnvironment { .. }
            | InstrKind::Catch
            | InstrKind::TryEnd
            | InstrKind::Debugger
            | InstrKind::Unreachable
            | InstrKind::Branch { .. }
            | InstrKind::TryStart { .. } => {}
            InstrKind::Mov(src)
            | InstrKind::SpillMov(src)
            | InstrKind::ImplicitMov(src)
            | InstrKind::Unary { src, .. }
            | InstrKind::Ret(src)
            | InstrKind::Throw(src) => f(src),
            InstrKind::Phi(entries) => {
                for (v, _) in entries {
                    f(v);
                }
            }
            InstrKind::Binary { lhs, rhs, .. } | InstrKind::Compare { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstrKind::GetProperty { object, key } => {
                f(object);
                if let PropertyKey::Value(k) = key {
                    f(k);
                }
            }
            InstrKind::SetProperty { object, key, value } => {
                f(object);
                if let PropertyKey::Value(k) = key {
                    f(k);
                }
                f(value);
            }
            InstrKind::Call { callee, args } | InstrKind::CallN { callee, args } => {
                f(callee);
                for a in args {
                    f(a);
                }
            }
            InstrKind::LoadFromEnvironment { env, .. } => f(env),
            InstrKind::StoreToEnvironment { env, value, .. } => {
                f(env);
                f(value);
            }
            InstrKind::CreateClosure { env, .. } => f(env),
            InstrKind::CondBranch { cond, .. } => f(cond),
            InstrKind::CompareBranch { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstrKind::SwitchImm { value, .. } | InstrKind::Switch { value, .. } => f(value),
        }
    }

    /// Replace the operand at `index` (in `operands()` order).
    pub fn replace_operand(&mut self, index: usize, new: InstrId) {
        let mut at = 0usize;
        let mut replaced = false;
        self.for_each_operand_mut(|op| {
            if at == index {
                *op = new;
                replaced = true;
            }
            at += 1;
        });
        debug_assert!(replaced, "operand index {index} out of range");
    }

    /// Collect successor blocks of a terminator (empty for non-terminators).
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        let mut out = SmallVec::new();
        self.for_each_successor(|b| out.push(b));
        out
    }

    /// Visit every successor block of a terminator.
    ///
    /// For `TryStart` the handler edge comes first so the post-order
    /// walk lays the protected body out as the fallthrough.
    pub fn for_each_successor(&self, mut f: impl FnMut(BlockId)) {
        match self {
            InstrKind::Branch { target } => f(*target),
            InstrKind::TryStart { body, catch_block } => {
                f(*catch_block);
                f(*body);
            }
            InstrKind::CondBranch {
                on_true, on_false, ..
            }
            | InstrKind::CompareBranch {
                on_true, on_false, ..
            } => {
                f(*on_true);
                f(*on_false);
            }
            InstrKind::SwitchImm { default, cases, .. }
            | InstrKind::Switch { default, cases, .. } => {
                f(*default);
                for (_, b) in cases {
                    f(*b);
                }
            }
            _ => {}
        }
    }

    /// Visit every successor block of a terminator mutably.
    pub fn for_each_successor_mut(&mut self, mut f: impl FnMut(&mut BlockId)) {
        match self {
            InstrKind::Branch { target } => f(target),
            InstrKind::TryStart { body, catch_block } => {
                f(catch_block);
                f(body);
            }
            InstrKind::CondBranch {
                on_true, on_false, ..
            }
            | InstrKind::CompareBranch {
                on_true, on_false, ..
            } => {
                f(on_true);
                f(on_false);
            }
            InstrKind::SwitchImm { default, cases, .. }
            | InstrKind::Switch { default, cases, .. } => {
                f(default);
                for (_, b) in cases {
                    f(b);
                }
            }
            _ => {}
        }
    }
}

/// An instruction: kind plus the metadata the backend consumes.
#[derive(Debug, Clone)]
pub struct InstrData {
    /// What the instruction does.
    pub kind: InstrKind,
    /// Static result type.
    pub ty: Type,
    /// Source location, when one survived the frontend.
    pub span: Option<Span>,
    /// Statement index for full debug info; 0 when untracked.
    pub statement: u32,
}

/// A basic block: an ordered list of instruction handles ending in a
/// terminator.
#[derive(Debug, Clone, Default)]
pub struct BasicBlockData {
    /// Instructions in execution order.
    pub instrs: Vec<InstrId>,
}

impl BasicBlockData {
    /// The block's terminator, if the block is non-empty.
    pub fn terminator(&self) -> Option<InstrId> {
        self.instrs.last().copied()
    }
}

/// A try region, with nesting bookkeeping already resolved upstream.
#[derive(Debug, Clone)]
pub struct TryRegion {
    /// First block of the protected range.
    pub first: BlockId,
    /// Block immediately following the protected range; `None` when the
    /// region runs to the end of the function.
    pub past_end: Option<BlockId>,
    /// Handler block; its [`InstrKind::Catch`] anchors the handler
    /// address.
    pub catch_block: BlockId,
}

/// An IR function, its blocks and instructions in flat arenas.
#[derive(Debug)]
pub struct Function {
    /// Function name, for the output record.
    pub name: Arc<str>,
    /// Number of declared parameters.
    pub param_count: u32,
    /// Entry block.
    pub entry: BlockId,
    /// Source buffer this function came from, if debug info is wanted.
    pub buffer: Option<ember_core::BufferId>,
    /// Lexically scoped variable names, for full debug info.
    pub variable_names: Vec<Arc<str>>,
    /// Try regions, outermost first.
    pub try_regions: Vec<TryRegion>,
    blocks: Vec<BasicBlockData>,
    instrs: Vec<InstrData>,
}

impl Function {
    /// Create an empty function with one (entry) block.
    pub fn new(name: impl Into<Arc<str>>, param_count: u32) -> Self {
        Self {
            name: name.into(),
            param_count,
            entry: BlockId(0),
            buffer: None,
            variable_names: Vec::new(),
            try_regions: Vec::new(),
            blocks: vec![BasicBlockData::default()],
            instrs: Vec::new(),
        }
    }

    /// Append a new empty block.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlockData::default());
        id
    }

    /// Number of blocks in the arena (including unreachable ones).
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of instructions in the arena (including detached ones).
    pub fn instr_count(&self) -> usize {
        self.instrs.len()
    }

    /// Access a block.
    pub fn block(&self, id: BlockId) -> &BasicBlockData {
        &self.blocks[id.0 as usize]
    }

    /// Access a block mutably.
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlockData {
        &mut self.blocks[id.0 as usize]
    }

    /// Access an instruction.
    pub fn instr(&self, id: InstrId) -> &InstrData {
        &self.instrs[id.0 as usize]
    }

    /// Access an instruction mutably.
    pub fn instr_mut(&mut self, id: InstrId) -> &mut InstrData {
        &mut self.instrs[id.0 as usize]
    }

    /// Create an instruction without placing it in a block.
    pub fn new_instr(&mut self, kind: InstrKind, ty: Type, span: Option<Span>) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        self.instrs.push(InstrData {
            kind,
            ty,
            span,
            statement: 0,
        });
        id
    }

    /// Create an instruction and append it to a block.
    pub fn add_instr(
        &mut self,
        block: BlockId,
        kind: InstrKind,
        ty: Type,
        span: Option<Span>,
    ) -> InstrId {
        let id = self.new_instr(kind, ty, span);
        self.blocks[block.0 as usize].instrs.push(id);
        id
    }

    /// Count how many operand slots reference each instruction.
    pub fn use_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.instrs.len()];
        for data in &self.instrs {
            data.kind.for_each_operand(|op| counts[op.0 as usize] += 1);
        }
        counts
    }

    /// Rewrite every operand referencing `from` to reference `to`.
    pub fn replace_all_uses(&mut self, from: InstrId, to: InstrId) {
        for data in &mut self.instrs {
            data.kind.for_each_operand_mut(|op| {
                if *op == from {
                    *op = to;
                }
            });
        }
    }

    /// Detach a set of instructions from their blocks. The arena entries
    /// stay (handles remain valid) but nothing reaches them anymore.
    pub fn purge_instrs(&mut self, dead: &rustc_hash::FxHashSet<InstrId>) {
        if dead.is_empty() {
            return;
        }
        for block in &mut self.blocks {
            block.instrs.retain(|id| !dead.contains(id));
        }
    }

    /// Split the edge from `pred` to `target` by inserting a detour block
    /// that just branches to `target`.
    ///
    /// The predecessor's terminator is retargeted and phi entries in
    /// `target` that named `pred` are rewritten to the detour, keeping the
    /// merge-point bookkeeping consistent. Returns the detour block.
    pub fn split_edge(&mut self, pred: BlockId, target: BlockId) -> BlockId {
        let detour = self.add_block();
        self.add_instr(detour, InstrKind::Branch { target }, Type::Any, None);

        let term = self.blocks[pred.0 as usize]
            .terminator()
            .expect("split_edge: predecessor has no terminator");
        self.instrs[term.0 as usize].kind.for_each_successor_mut(|b| {
            if *b == target {
                *b = detour;
            }
        });

        for &id in &self.blocks[target.0 as usize].instrs.clone() {
            if let InstrKind::Phi(entries) = &mut self.instrs[id.0 as usize].kind {
                for (_, b) in entries {
                    if *b == pred {
                        *b = detour;
                    }
                }
            }
        }
        detour
    }
}

/// Register assignments for a [`Function`], indexed by instruction handle.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    regs: Vec<Option<Register>>,
    frame_size: u32,
}

impl RegisterFile {
    /// Create an empty register file.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of registers the frame needs.
    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// The register assigned to an instruction, or `None` when its result
    /// is dead.
    pub fn get(&self, id: InstrId) -> Option<Register> {
        self.regs.get(id.0 as usize).copied().flatten()
    }

    /// Whether an instruction has an assigned register.
    pub fn is_allocated(&self, id: InstrId) -> bool {
        self.get(id).is_some()
    }

    /// The register assigned to an instruction; panics if it is dead.
    pub fn register(&self, id: InstrId) -> Register {
        self.get(id).expect("instruction has no assigned register")
    }

    /// Assign a register, growing the frame as needed.
    pub fn assign(&mut self, id: InstrId, reg: Register) {
        if self.regs.len() <= id.0 as usize {
            self.regs.resize(id.0 as usize + 1, None);
        }
        self.regs[id.0 as usize] = Some(reg);
        self.frame_size = self.frame_size.max(reg.0 + 1);
    }

    /// Grow the frame without assigning anything (reserves trailing
    /// call-convention slots).
    pub fn reserve_frame(&mut self, size: u32) {
        self.frame_size = self.frame_size.max(size);
    }

    /// Shift every assignment up by `amount`, freeing the lowest
    /// registers.
    pub fn shift_all(&mut self, amount: u32) {
        for slot in self.regs.iter_mut().flatten() {
            slot.0 += amount;
        }
        self.frame_size += amount;
    }

    /// Renumber every assignment through `map` (identity when the map
    /// returns the input).
    pub fn remap(&mut self, mut map: impl FnMut(Register) -> Register) {
        let mut max = 0;
        for slot in self.regs.iter_mut().flatten() {
            *slot = map(*slot);
            max = max.max(slot.0 + 1);
        }
        self.frame_size = self.frame_size.max(max);
    }

    /// Iterate over `(instruction, register)` assignments.
    pub fn iter(&self) -> impl Iterator<Item = (InstrId, Register)> + '_ {
        self.regs
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.map(|r| (InstrId(i as u32), r)))
    }
}
