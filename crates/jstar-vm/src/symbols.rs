//! Well-known method names the evaluator resolves directly, without going
//! through the general attribute-lookup path. A fixed, pre-agreed symbol
//! table rather than anything looked up at runtime.

pub const INIT: &str = "init";
/// Field name under which a raised exception's `StackTrace` is stored.
pub const STACKTRACE: &str = "stacktrace";
pub const ITER: &str = "__iter__";
pub const NEXT: &str = "__next__";
pub const STR: &str = "__str__";
pub const EQ: &str = "__eq__";

/// Binary-operator overload symbols. Each has a `__r<name>__` reverse-dispatch
/// counterpart used when the left operand doesn't implement the forward slot
/// (or returns "not implemented").
pub const ADD: &str = "__add__";
pub const RADD: &str = "__radd__";
pub const SUB: &str = "__sub__";
pub const RSUB: &str = "__rsub__";
pub const MUL: &str = "__mul__";
pub const RMUL: &str = "__rmul__";
pub const DIV: &str = "__div__";
pub const RDIV: &str = "__rdiv__";
pub const MOD: &str = "__mod__";
pub const RMOD: &str = "__rmod__";

/// Comparisons have a forward overload only; there is no reverse fallback.
pub const LT: &str = "__lt__";
pub const LE: &str = "__le__";
pub const GT: &str = "__gt__";
pub const GE: &str = "__ge__";

pub const GET: &str = "__get__";
pub const SET: &str = "__set__";
pub const NEG: &str = "__neg__";

/// Returns the `(forward, reverse)` overload symbol pair for a binary
/// arithmetic opcode, keyed by its mnemonic. `^` (exponent) and the
/// comparisons are not covered here: `^` has no overload at all, and
/// comparisons dispatch through `compare_symbol` instead since they have
/// no reverse slot.
pub fn overload_pair(mnemonic: &str) -> Option<(&'static str, &'static str)> {
    Some(match mnemonic {
        "add" => (ADD, RADD),
        "sub" => (SUB, RSUB),
        "mul" => (MUL, RMUL),
        "div" => (DIV, RDIV),
        "mod" => (MOD, RMOD),
        _ => return None,
    })
}

/// Returns the forward-only overload symbol for a comparison opcode.
pub fn compare_symbol(mnemonic: &str) -> Option<&'static str> {
    Some(match mnemonic {
        "lt" => LT,
        "le" => LE,
        "gt" => GT,
        "ge" => GE,
        _ => return None,
    })
}
