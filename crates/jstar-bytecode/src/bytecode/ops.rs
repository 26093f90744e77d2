//! ops.rs — J* VM opcode set.
//!
//! Design goals:
//! - **Readable** (good names, clean `Debug`/`Display`)
//! - **Extensible** (add variants *at the bottom* without breaking IDs)
//! - **Practical**: helpers `mnemonic()`, `stack_delta()`, `is_jump()`,
//!   `jump_target(pc)`, `operand_kind()`...
//!
//! Compat: bincode encoding of this enum depends on variant **order**.
//! If you add an opcode, add it at the bottom. If you change the chunk's
//! overall structure, bump `CHUNK_VERSION` in `chunk.rs`.

#![allow(clippy::manual_strip)]

use serde::{Deserialize, Serialize};

/// Index of a constant in the chunk's constant pool.
pub type ConstIx = u32;
/// Index of a local slot relative to the current frame's base.
pub type LocalIx = u16;
/// Index of a captured upvalue within the current closure.
pub type UpvalueIx = u16;
/// Index of a compiled function in the module's function table.
pub type FuncIx = u32;

/// Call-stack ABI convention:
///
/// - **LoadX/GetX** push a value (+1)
/// - **StoreX/Pop** consume a value (−1)
/// - **BinOp** (Add/Sub/…) consume 2, push 1 (delta −1)
/// - **UnOp** (Neg/Not) consume 1, push 1 (delta 0)
/// - **Call/Invoke/Super** family: depends on the target → delta
///   **indeterminate** (stack is `[.., callee, arg0..argN-1]` → result)
/// - **Jump/JumpIfFalse/JumpIfTrue**: consume the tested condition where
///   applicable, per each opcode's own rule below.
///
/// These rules feed the verifier and tooling (disasm, lints).

/// The J* instruction set.
///
/// **Bincode compat: do not reorder. Add new variants at the bottom.**
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Op {
    // ----- Structure -----
    #[default]
    Nop,
    Return,
    ReturnVoid,

    // ----- Literals -----
    LoadConst(ConstIx),
    LoadTrue,
    LoadFalse,
    LoadNull,

    // ----- Locals / Upvalues / Globals -----
    GetLocal(LocalIx),
    SetLocal(LocalIx),
    GetUpvalue(UpvalueIx),
    SetUpvalue(UpvalueIx),
    /// Operand names the global by constant-pool string index.
    GetGlobal(ConstIx),
    SetGlobal(ConstIx),
    DefineGlobal(ConstIx),

    // ----- Arithmetic -----
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// `^`. No overload: both operands must be numeric.
    Pow,
    Neg,

    // ----- Comparison / logic -----
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    /// `is`: class-membership test along the superclass chain.
    Is,

    // ----- Subscript -----
    SubscrGet,
    SubscrSet,

    // ----- Field access -----
    GetField(ConstIx),
    SetField(ConstIx),

    // ----- Control flow -----
    Jump(i32),
    JumpIfFalse(i32),
    JumpIfTrue(i32),
    /// Duplicates `(iterable, state)` and invokes `__iter__`.
    ForIter,
    /// Tests state truthiness and invokes `__next__` if truthy.
    ForNext,

    // ----- Calls (generic) -----
    /// argc carried as an operand; convention `[.., callee, a0..aN-1] -> result`.
    Call(u8),
    /// `x.name(args)` without materializing a bound method.
    Invoke(ConstIx, u8),
    /// `super.name(args)`, resolved against the frozen superclass constant.
    Super(ConstIx, u8),
    /// Materializes a bound super method without invoking it.
    SuperBind(ConstIx),

    // ----- Calls (small-arity specializations, argc folded into opcode) -----
    Call0, Call1, Call2, Call3, Call4, Call5, Call6, Call7, Call8, Call9, Call10,

    Invoke0(ConstIx), Invoke1(ConstIx), Invoke2(ConstIx), Invoke3(ConstIx), Invoke4(ConstIx),
    Invoke5(ConstIx), Invoke6(ConstIx), Invoke7(ConstIx), Invoke8(ConstIx), Invoke9(ConstIx),
    Invoke10(ConstIx),

    Super0(ConstIx), Super1(ConstIx), Super2(ConstIx), Super3(ConstIx), Super4(ConstIx),
    Super5(ConstIx), Super6(ConstIx), Super7(ConstIx), Super8(ConstIx), Super9(ConstIx),
    Super10(ConstIx),

    // ----- Aggregates -----
    /// Builds a fresh `List` from the top `n` stack values.
    NewList(u16),
    /// Appends the top value onto the list below it (list literal spread).
    AppendList,
    /// Builds a fresh `Tuple` from the top `n` stack values.
    NewTuple(u16),
    /// Builds a fresh empty `Table`.
    NewTable,

    // ----- Classes -----
    NewClass(ConstIx),
    /// Superclass sits below the name on the stack; merges its method table.
    NewSubclass(ConstIx),
    DefMethod(ConstIx),
    /// Defines a method whose implementation is resolved via the native registry.
    NatMethod(ConstIx),
    /// Declares a free (non-method) native function, resolved the same way.
    Native(ConstIx),

    // ----- Closures -----
    MakeClosure(FuncIx, u8),
    /// Closes every open upvalue at or above the current stack top (loop-scope exit).
    CloseUpvalue,

    // ----- Exceptions -----
    SetupExcept(i32),
    SetupEnsure(i32),
    PopHandler,
    EndTry,
    Raise,

    // ----- Stack manipulation -----
    Pop,
    Dup,

    // ----- Function epilogue helpers -----
    /// Destructures the top tuple/list into `n` locals (multiple-assignment).
    Unpack(u8),

    // ----- Imports -----
    Import(ConstIx),
    ImportAs(ConstIx, ConstIx),
    /// Treated as a plain import; subsequent `ImportName` ops copy bindings.
    ImportFrom(ConstIx),
    /// Copies one binding, or all bindings when the name begins with `*`.
    ImportName(ConstIx),

    // ----- Debug / I/O -----
    Print,

    // ----- (Future extensions — ADD AT THE BOTTOM) -----
}

/// Usual limits/constants.
pub const MAX_ARGC: u8 = u8::MAX;
/// Highest small-arity call specialization (`Call0..=Call10`).
pub const MAX_FAST_ARITY: u8 = 10;

impl Op {
    /// Short mnemonic (for assemblers, logs, error messages).
    pub fn mnemonic(&self) -> &'static str {
        use Op::*;
        match *self {
            Nop => "nop",
            Return => "ret",
            ReturnVoid => "retv",
            LoadConst(_) => "ldc",
            LoadTrue => "ldtrue",
            LoadFalse => "ldfalse",
            LoadNull => "ldnull",
            GetLocal(_) => "getl",
            SetLocal(_) => "setl",
            GetUpvalue(_) => "getu",
            SetUpvalue(_) => "setu",
            GetGlobal(_) => "getg",
            SetGlobal(_) => "setg",
            DefineGlobal(_) => "defg",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            Pow => "pow",
            Neg => "neg",
            Eq => "eq",
            Lt => "lt",
            Le => "le",
            Gt => "gt",
            Ge => "ge",
            Not => "not",
            Is => "is",
            SubscrGet => "subscr_get",
            SubscrSet => "subscr_set",
            GetField(_) => "getfield",
            SetField(_) => "setfield",
            Jump(_) => "jmp",
            JumpIfFalse(_) => "jmpf",
            JumpIfTrue(_) => "jmpt",
            ForIter => "for_iter",
            ForNext => "for_next",
            Call(_) => "call",
            Invoke(_, _) => "invoke",
            Super(_, _) => "super",
            SuperBind(_) => "super_bind",
            Call0 => "call_0", Call1 => "call_1", Call2 => "call_2", Call3 => "call_3",
            Call4 => "call_4", Call5 => "call_5", Call6 => "call_6", Call7 => "call_7",
            Call8 => "call_8", Call9 => "call_9", Call10 => "call_10",
            Invoke0(_) => "invoke_0", Invoke1(_) => "invoke_1", Invoke2(_) => "invoke_2",
            Invoke3(_) => "invoke_3", Invoke4(_) => "invoke_4", Invoke5(_) => "invoke_5",
            Invoke6(_) => "invoke_6", Invoke7(_) => "invoke_7", Invoke8(_) => "invoke_8",
            Invoke9(_) => "invoke_9", Invoke10(_) => "invoke_10",
            Super0(_) => "super_0", Super1(_) => "super_1", Super2(_) => "super_2",
            Super3(_) => "super_3", Super4(_) => "super_4", Super5(_) => "super_5",
            Super6(_) => "super_6", Super7(_) => "super_7", Super8(_) => "super_8",
            Super9(_) => "super_9", Super10(_) => "super_10",
            NewList(_) => "new_list",
            AppendList => "append_list",
            NewTuple(_) => "new_tuple",
            NewTable => "new_table",
            NewClass(_) => "new_class",
            NewSubclass(_) => "new_subclass",
            DefMethod(_) => "def_method",
            NatMethod(_) => "nat_method",
            Native(_) => "native",
            MakeClosure(_, _) => "closure",
            CloseUpvalue => "close_upvalue",
            SetupExcept(_) => "setup_except",
            SetupEnsure(_) => "setup_ensure",
            PopHandler => "pop_handler",
            EndTry => "end_try",
            Raise => "raise",
            Pop => "pop",
            Dup => "dup",
            Unpack(_) => "unpack",
            Import(_) => "import",
            ImportAs(_, _) => "import_as",
            ImportFrom(_) => "import_from",
            ImportName(_) => "import_name",
            Print => "print",
        }
    }

    /// Fixed arity for the small-arity call specializations, if this is one.
    pub fn fast_call_arity(&self) -> Option<u8> {
        use Op::*;
        Some(match *self {
            Call0 | Invoke0(_) | Super0(_) => 0,
            Call1 | Invoke1(_) | Super1(_) => 1,
            Call2 | Invoke2(_) | Super2(_) => 2,
            Call3 | Invoke3(_) | Super3(_) => 3,
            Call4 | Invoke4(_) | Super4(_) => 4,
            Call5 | Invoke5(_) | Super5(_) => 5,
            Call6 | Invoke6(_) | Super6(_) => 6,
            Call7 | Invoke7(_) | Super7(_) => 7,
            Call8 | Invoke8(_) | Super8(_) => 8,
            Call9 | Invoke9(_) | Super9(_) => 9,
            Call10 | Invoke10(_) | Super10(_) => 10,
            _ => return None,
        })
    }

    /// Theoretical stack-depth variation (delta).
    ///
    /// `Some(delta)` if static; `None` if it depends on the runtime callee
    /// (calls/invokes, which the evaluator resolves dynamically).
    pub fn stack_delta(&self) -> Option<i32> {
        use Op::*;
        match *self {
            Nop | Jump(_) | ForIter => Some(0),
            JumpIfFalse(_) | JumpIfTrue(_) => Some(-1),
            LoadConst(_) | LoadTrue | LoadFalse | LoadNull => Some(1),
            GetLocal(_) | GetUpvalue(_) | GetGlobal(_) => Some(1),
            SetLocal(_) | SetUpvalue(_) => Some(0),
            SetGlobal(_) | DefineGlobal(_) => Some(-1),
            Add | Sub | Mul | Div | Mod | Pow | Eq | Lt | Le | Gt | Ge | Is => Some(-1),
            Neg | Not => Some(0),
            SubscrGet => Some(-1),
            SubscrSet => Some(-3),
            GetField(_) => Some(0),
            SetField(_) => Some(-2),
            ForNext => Some(1),
            Pop | Print => Some(-1),
            Dup => Some(1),
            NewList(n) => Some(1 - n as i32),
            AppendList => Some(-1),
            NewTuple(n) => Some(1 - n as i32),
            NewTable => Some(1),
            NewClass(_) => Some(1),
            NewSubclass(_) => Some(0), // pops superclass, pushes class
            DefMethod(_) => Some(-1),
            NatMethod(_) => Some(0),
            Native(_) => Some(0),
            MakeClosure(_, _) => Some(1),
            CloseUpvalue => Some(0),
            SetupExcept(_) | SetupEnsure(_) | PopHandler => Some(0),
            EndTry | Raise => None, // unwinding may alter stack arbitrarily
            Unpack(n) => Some(n as i32 - 1),
            Import(_) | ImportAs(_, _) | ImportFrom(_) => Some(0),
            ImportName(_) => Some(1),
            SuperBind(_) => Some(0),
            Return | ReturnVoid => None, // leaves the frame
            Call(_) | Invoke(_, _) | Super(_, _) => None,
            Call0 | Call1 | Call2 | Call3 | Call4 | Call5 | Call6 | Call7 | Call8 | Call9
            | Call10 => None,
            Invoke0(_) | Invoke1(_) | Invoke2(_) | Invoke3(_) | Invoke4(_) | Invoke5(_)
            | Invoke6(_) | Invoke7(_) | Invoke8(_) | Invoke9(_) | Invoke10(_) => None,
            Super0(_) | Super1(_) | Super2(_) | Super3(_) | Super4(_) | Super5(_) | Super6(_)
            | Super7(_) | Super8(_) | Super9(_) | Super10(_) => None,
        }
    }

    /// Is this a jump (pc is mutated)?
    pub fn is_jump(&self) -> bool {
        matches!(self, Op::Jump(_) | Op::JumpIfFalse(_) | Op::JumpIfTrue(_))
    }

    /// The relative offset carried by this jump, if any.
    pub fn jump_offset(&self) -> Option<i32> {
        match *self {
            Op::Jump(ofs) | Op::JumpIfFalse(ofs) | Op::JumpIfTrue(ofs) => Some(ofs),
            _ => None,
        }
    }

    /// Computes the jump **destination**, given the current `pc`.
    ///
    /// The offset is relative to `pc+1`, so `dest = pc + 1 + off`.
    pub fn jump_target(&self, pc: u32) -> Option<u32> {
        self.jump_offset().map(|ofs| {
            let next = pc as i64 + 1;
            let dest = next + ofs as i64;
            if dest < 0 {
                0
            } else {
                dest as u32
            }
        })
    }

    /// Is this a block/trace terminator? (useful for analysis/optimization)
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Return | Op::ReturnVoid)
    }

    /// What kind of immediate operand does this opcode carry?
    pub fn operand_kind(&self) -> OperandKind {
        use Op::*;
        match *self {
            LoadConst(_) | GetGlobal(_) | SetGlobal(_) | DefineGlobal(_) | GetField(_)
            | SetField(_) | NewClass(_) | NewSubclass(_) | DefMethod(_) | NatMethod(_)
            | Native(_) | Import(_) | ImportFrom(_) | ImportName(_) | SuperBind(_) => {
                OperandKind::Const
            }
            GetLocal(_) | SetLocal(_) => OperandKind::Local,
            GetUpvalue(_) | SetUpvalue(_) => OperandKind::Upvalue,
            Jump(_) | JumpIfFalse(_) | JumpIfTrue(_) | SetupExcept(_) | SetupEnsure(_) => {
                OperandKind::RelOffset
            }
            Call(_) => OperandKind::Argc,
            Invoke(_, _) | Super(_, _) => OperandKind::ConstPlusArgc,
            ImportAs(_, _) => OperandKind::ConstPlusConst,
            MakeClosure(_, n) => OperandKind::FuncPlusN(n),
            Invoke0(_) | Invoke1(_) | Invoke2(_) | Invoke3(_) | Invoke4(_) | Invoke5(_)
            | Invoke6(_) | Invoke7(_) | Invoke8(_) | Invoke9(_) | Invoke10(_) => {
                OperandKind::Const
            }
            Super0(_) | Super1(_) | Super2(_) | Super3(_) | Super4(_) | Super5(_) | Super6(_)
            | Super7(_) | Super8(_) | Super9(_) | Super10(_) => OperandKind::Const,
            NewList(_) | NewTuple(_) => OperandKind::Count,
            Unpack(_) => OperandKind::Count,
            _ => OperandKind::None,
        }
    }
}

/// Nature of an opcode's immediate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    None,
    Const,
    Local,
    Upvalue,
    Argc,
    Count,
    RelOffset,
    ConstPlusArgc,
    ConstPlusConst,
    /// Special case: `MakeClosure(func_ix, n_upvalues)`.
    FuncPlusN(u8),
}

/* -------------------------- Human-readable display -------------------------- */

impl core::fmt::Display for Op {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use Op::*;
        match *self {
            Nop => write!(f, "nop"),
            Return => write!(f, "ret"),
            ReturnVoid => write!(f, "retv"),
            LoadConst(ix) => write!(f, "ldc {ix}"),
            LoadTrue => write!(f, "ldtrue"),
            LoadFalse => write!(f, "ldfalse"),
            LoadNull => write!(f, "ldnull"),
            GetLocal(ix) => write!(f, "getl {ix}"),
            SetLocal(ix) => write!(f, "setl {ix}"),
            GetUpvalue(ix) => write!(f, "getu {ix}"),
            SetUpvalue(ix) => write!(f, "setu {ix}"),
            GetGlobal(ix) => write!(f, "getg {ix}"),
            SetGlobal(ix) => write!(f, "setg {ix}"),
            DefineGlobal(ix) => write!(f, "defg {ix}"),
            Add => write!(f, "add"),
            Sub => write!(f, "sub"),
            Mul => write!(f, "mul"),
            Div => write!(f, "div"),
            Mod => write!(f, "mod"),
            Pow => write!(f, "pow"),
            Neg => write!(f, "neg"),
            Eq => write!(f, "eq"),
            Lt => write!(f, "lt"),
            Le => write!(f, "le"),
            Gt => write!(f, "gt"),
            Ge => write!(f, "ge"),
            Not => write!(f, "not"),
            Is => write!(f, "is"),
            SubscrGet => write!(f, "subscr_get"),
            SubscrSet => write!(f, "subscr_set"),
            GetField(ix) => write!(f, "getfield {ix}"),
            SetField(ix) => write!(f, "setfield {ix}"),
            Jump(ofs) => write!(f, "jmp {ofs:+}"),
            JumpIfFalse(ofs) => write!(f, "jmpf {ofs:+}"),
            JumpIfTrue(ofs) => write!(f, "jmpt {ofs:+}"),
            ForIter => write!(f, "for_iter"),
            ForNext => write!(f, "for_next"),
            Call(argc) => write!(f, "call {argc}"),
            Invoke(ix, argc) => write!(f, "invoke {ix} {argc}"),
            Super(ix, argc) => write!(f, "super {ix} {argc}"),
            SuperBind(ix) => write!(f, "super_bind {ix}"),
            Call0 => write!(f, "call_0"), Call1 => write!(f, "call_1"),
            Call2 => write!(f, "call_2"), Call3 => write!(f, "call_3"),
            Call4 => write!(f, "call_4"), Call5 => write!(f, "call_5"),
            Call6 => write!(f, "call_6"), Call7 => write!(f, "call_7"),
            Call8 => write!(f, "call_8"), Call9 => write!(f, "call_9"),
            Call10 => write!(f, "call_10"),
            Invoke0(ix) => write!(f, "invoke_0 {ix}"), Invoke1(ix) => write!(f, "invoke_1 {ix}"),
            Invoke2(ix) => write!(f, "invoke_2 {ix}"), Invoke3(ix) => write!(f, "invoke_3 {ix}"),
            Invoke4(ix) => write!(f, "invoke_4 {ix}"), Invoke5(ix) => write!(f, "invoke_5 {ix}"),
            Invoke6(ix) => write!(f, "invoke_6 {ix}"), Invoke7(ix) => write!(f, "invoke_7 {ix}"),
            Invoke8(ix) => write!(f, "invoke_8 {ix}"), Invoke9(ix) => write!(f, "invoke_9 {ix}"),
            Invoke10(ix) => write!(f, "invoke_10 {ix}"),
            Super0(ix) => write!(f, "super_0 {ix}"), Super1(ix) => write!(f, "super_1 {ix}"),
            Super2(ix) => write!(f, "super_2 {ix}"), Super3(ix) => write!(f, "super_3 {ix}"),
            Super4(ix) => write!(f, "super_4 {ix}"), Super5(ix) => write!(f, "super_5 {ix}"),
            Super6(ix) => write!(f, "super_6 {ix}"), Super7(ix) => write!(f, "super_7 {ix}"),
            Super8(ix) => write!(f, "super_8 {ix}"), Super9(ix) => write!(f, "super_9 {ix}"),
            Super10(ix) => write!(f, "super_10 {ix}"),
            NewList(n) => write!(f, "new_list {n}"),
            AppendList => write!(f, "append_list"),
            NewTuple(n) => write!(f, "new_tuple {n}"),
            NewTable => write!(f, "new_table"),
            NewClass(ix) => write!(f, "new_class {ix}"),
            NewSubclass(ix) => write!(f, "new_subclass {ix}"),
            DefMethod(ix) => write!(f, "def_method {ix}"),
            NatMethod(ix) => write!(f, "nat_method {ix}"),
            Native(ix) => write!(f, "native {ix}"),
            MakeClosure(fi, n) => write!(f, "closure {fi} {n}"),
            CloseUpvalue => write!(f, "close_upvalue"),
            SetupExcept(ofs) => write!(f, "setup_except {ofs:+}"),
            SetupEnsure(ofs) => write!(f, "setup_ensure {ofs:+}"),
            PopHandler => write!(f, "pop_handler"),
            EndTry => write!(f, "end_try"),
            Raise => write!(f, "raise"),
            Pop => write!(f, "pop"),
            Dup => write!(f, "dup"),
            Unpack(n) => write!(f, "unpack {n}"),
            Import(ix) => write!(f, "import {ix}"),
            ImportAs(ix, alias) => write!(f, "import_as {ix} {alias}"),
            ImportFrom(ix) => write!(f, "import_from {ix}"),
            ImportName(ix) => write!(f, "import_name {ix}"),
            Print => write!(f, "print"),
        }
    }
}

/* ------------------------------- Tests ------------------------------- */
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_are_stable() {
        assert_eq!(Op::Add.mnemonic(), "add");
        assert_eq!(Op::LoadTrue.mnemonic(), "ldtrue");
        assert_eq!(Op::Jump(0).mnemonic(), "jmp");
        assert_eq!(Op::Invoke10(3).mnemonic(), "invoke_10");
        assert_eq!(Op::Raise.mnemonic(), "raise");
    }

    #[test]
    fn stack_deltas_basic() {
        assert_eq!(Op::LoadConst(0).stack_delta(), Some(1));
        assert_eq!(Op::Add.stack_delta(), Some(-1));
        assert_eq!(Op::Neg.stack_delta(), Some(0));
        assert_eq!(Op::Pop.stack_delta(), Some(-1));
        assert_eq!(Op::Return.stack_delta(), None);
        assert_eq!(Op::Call(2).stack_delta(), None);
        assert_eq!(Op::NewList(3).stack_delta(), Some(-2));
    }

    #[test]
    fn jump_math() {
        let j = Op::Jump(-2);
        assert_eq!(j.jump_offset(), Some(-2));
        assert_eq!(j.jump_target(10), Some(9)); // 10+1-2 = 9
        let jz = Op::JumpIfFalse(5);
        assert_eq!(jz.jump_target(0), Some(6));
    }

    #[test]
    fn display_is_human() {
        assert_eq!(Op::LoadConst(42).to_string(), "ldc 42");
        assert_eq!(Op::Jump(-3).to_string(), "jmp -3");
        assert_eq!(Op::MakeClosure(7, 2).to_string(), "closure 7 2");
    }

    #[test]
    fn fast_call_arity_roundtrip() {
        assert_eq!(Op::Call0.fast_call_arity(), Some(0));
        assert_eq!(Op::Invoke10(1).fast_call_arity(), Some(10));
        assert_eq!(Op::Call(3).fast_call_arity(), None);
    }
}
