//! disasm.rs — human-readable disassembler for J* chunks.
//!
//! Two levels:
//!  - `disassemble_compact(chunk)`: one line per op, constants resolved
//!  - `disassemble_full(chunk, title)`: header + pool + lines + debug + code (with labels)
//!
//! The disassembler aims to be robust:
//!  - Label prefixes for jump targets (L0001, L0002, …)
//!  - `LoadConst`/name-bearing ops annotated with a constant preview
//!  - Invalid constant index detection (`<invalid>`)
//!  - Jump offsets shown alongside their computed destination
//!
//! No external dependency: pure std.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::bytecode::{chunk::Chunk, ConstValue, ops::Op};

/// Compact view: `PC  (line)  OP [annotations…]`
pub fn disassemble_compact(chunk: &Chunk) -> String {
    let mut out = String::new();
    let labels = compute_labels(chunk);

    for (pc_usize, op) in chunk.ops.iter().enumerate() {
        let pc = pc_usize as u32;
        let line = chunk.lines.line_for_pc(pc);
        let line_disp = line.map(|x| x.to_string()).unwrap_or_else(|| "-".into());
        let pretty = fmt_op(chunk, pc, op, &labels);
        let _ = writeln!(out, "{pc:05} (line {line_disp:>4})  {pretty}");
    }
    out
}

/// Full view: header + pool + line table + debug + code (with labels) + compact tail.
pub fn disassemble_full(chunk: &Chunk, title: &str) -> String {
    let mut s = String::new();

    {
        let version = chunk.version();
        let stripped = chunk.flags().stripped;
        let n_ops = chunk.ops.len();
        let n_consts = chunk.consts.len();
        let hash = chunk.compute_hash();
        let _ = writeln!(s, "== {title} ==");
        let _ = writeln!(
            s,
            "• version: {version}   stripped: {stripped}   ops: {n_ops}   consts: {n_consts}   hash: 0x{hash:016x}"
        );
    }

    if chunk.consts.len() > 0 {
        let _ = writeln!(s, "\n# Const Pool");
        for (ix, c) in chunk.consts.iter() {
            let (ty, preview) = fmt_const(c);
            let _ = writeln!(s, "  [{ix:03}] {ty:<5}  {preview}");
        }
    } else {
        let _ = writeln!(s, "\n# Const Pool (empty)");
    }

    {
        let _ = writeln!(s, "\n# Line Table (PC ranges)");
        let mut any = false;
        for (range, line) in chunk.lines.iter_ranges() {
            any = true;
            let _ = writeln!(s, "  [{:05}..{:05})  line {}", range.start, range.end, line);
        }
        if !any {
            let _ = writeln!(s, "  <no line info>");
        }
    }

    {
        let _ = writeln!(s, "\n# Debug");
        if let Some(main) = &chunk.debug.main_file {
            let _ = writeln!(s, "  main_file: {main}");
        }
        if !chunk.debug.files.is_empty() {
            let _ = writeln!(s, "  files ({}):", chunk.debug.files.len());
            for f in &chunk.debug.files {
                let _ = writeln!(s, "    - {f}");
            }
        } else {
            let _ = writeln!(s, "  files: (none)");
        }
        if !chunk.debug.symbols.is_empty() {
            let _ = writeln!(s, "  symbols ({}):", chunk.debug.symbols.len());
            for (sym, pc) in &chunk.debug.symbols {
                let _ = writeln!(s, "    - {pc:05}  {sym}");
            }
        } else {
            let _ = writeln!(s, "  symbols: (none)");
        }
    }

    {
        let _ = writeln!(s, "\n# Code");
        let labels = compute_labels(chunk);

        for (pc_usize, op) in chunk.ops.iter().enumerate() {
            let pc = pc_usize as u32;
            let line = chunk.lines.line_for_pc(pc);
            let line_disp = line.map(|x| x.to_string()).unwrap_or_else(|| "-".into());

            if let Some(lbl) = labels.get(&pc) {
                let _ = writeln!(s, "{lbl}:");
            }

            let pretty = fmt_op(chunk, pc, op, &labels);
            let _ = writeln!(s, "  {pc:05} (line {line_disp:>4})  {pretty}");
        }
    }

    s.push_str("\n# Compact\n");
    s.push_str(&disassemble_compact(chunk));

    s
}

/* ────────────────────────────── Helpers ────────────────────────────── */

/// Returns a map from target PC to label, for every jump destination.
fn compute_labels(chunk: &Chunk) -> HashMap<u32, String> {
    let mut set = HashMap::<u32, String>::new();
    let mut targets = Vec::<u32>::new();

    for (pc_usize, op) in chunk.ops.iter().enumerate() {
        let pc = pc_usize as u32;
        if let Some(dest) = op.jump_target(pc) {
            if (dest as usize) < chunk.ops.len() {
                targets.push(dest);
            }
        }
        if let Op::SetupExcept(off) | Op::SetupEnsure(off) = *op {
            let dest = (pc as i64 + 1 + off as i64).max(0) as u32;
            if (dest as usize) < chunk.ops.len() {
                targets.push(dest);
            }
        }
    }

    targets.sort_unstable();
    targets.dedup();
    for (i, pc) in targets.into_iter().enumerate() {
        set.insert(pc, format!("L{:04}", i + 1));
    }
    set
}

fn label_or_num(labels: &HashMap<u32, String>, dest: u32) -> String {
    labels.get(&dest).cloned().unwrap_or_else(|| dest.to_string())
}

fn const_annex(chunk: &Chunk, ix: u32) -> String {
    match chunk.consts.get(ix) {
        Some(ConstValue::Str(s)) => format!("; \"{}\"", shorten(s, 60)),
        Some(v) => format!("; {}", pretty_const(v, 60)),
        None => "; <invalid>".into(),
    }
}

/// Formats an instruction with useful annotations (const preview, targets, …).
fn fmt_op(chunk: &Chunk, pc: u32, op: &Op, labels: &HashMap<u32, String>) -> String {
    use Op::*;
    match *op {
        LoadConst(ix) => format!("LoadConst {ix}  {}", const_annex(chunk, ix)),
        GetGlobal(ix) | SetGlobal(ix) | DefineGlobal(ix) | GetField(ix) | SetField(ix)
        | NewClass(ix) | NewSubclass(ix) | DefMethod(ix) | NatMethod(ix) | Native(ix)
        | Import(ix) | ImportFrom(ix) | ImportName(ix) | SuperBind(ix) => {
            format!("{}  {}", op, const_annex(chunk, ix))
        }
        ImportAs(ix, alias) => {
            format!("{}  {} as {}", op, const_annex(chunk, ix), const_annex(chunk, alias))
        }
        Invoke(ix, _) | Super(ix, _) | Invoke0(ix) | Invoke1(ix) | Invoke2(ix) | Invoke3(ix)
        | Invoke4(ix) | Invoke5(ix) | Invoke6(ix) | Invoke7(ix) | Invoke8(ix) | Invoke9(ix)
        | Invoke10(ix) | Super0(ix) | Super1(ix) | Super2(ix) | Super3(ix) | Super4(ix)
        | Super5(ix) | Super6(ix) | Super7(ix) | Super8(ix) | Super9(ix) | Super10(ix) => {
            format!("{}  {}", op, const_annex(chunk, ix))
        }
        GetLocal(_) | SetLocal(_) | GetUpvalue(_) | SetUpvalue(_) => op.to_string(),
        MakeClosure(func_ix, n) => format!("MakeClosure func={func_ix} upvalues={n}"),
        Call(argc) => format!("Call argc={argc}"),
        Jump(off) => format!("Jump {off:+}  -> {}", label_or_num(labels, jump_dest(pc, off))),
        JumpIfFalse(off) => {
            format!("JumpIfFalse {off:+}  -> {}", label_or_num(labels, jump_dest(pc, off)))
        }
        JumpIfTrue(off) => {
            format!("JumpIfTrue {off:+}  -> {}", label_or_num(labels, jump_dest(pc, off)))
        }
        SetupExcept(off) => {
            format!("SetupExcept {off:+}  -> {}", label_or_num(labels, jump_dest(pc, off)))
        }
        SetupEnsure(off) => {
            format!("SetupEnsure {off:+}  -> {}", label_or_num(labels, jump_dest(pc, off)))
        }
        other => other.to_string(),
    }
}

fn jump_dest(pc: u32, off: i32) -> u32 {
    (pc as i64 + 1 + off as i64).max(0) as u32
}

/// Returns (short type, short preview) for a constant.
fn fmt_const(c: &ConstValue) -> (&'static str, String) {
    match c {
        ConstValue::Null => ("null", "null".into()),
        ConstValue::Bool(b) => ("bool", format!("{b}")),
        ConstValue::I64(i) => ("i64", format!("{i}")),
        ConstValue::F64(x) => ("f64", format!("{x}")),
        ConstValue::Str(s) => ("str", preview_str(s, 80)),
        ConstValue::Bytes(b) => ("bytes", format!("len={}", b.len())),
    }
}

/// Human-friendly constant preview.
fn pretty_const(c: &ConstValue, str_max: usize) -> String {
    match c {
        ConstValue::Str(s) => format!("\"{}\"", shorten(s, str_max)),
        ConstValue::Bytes(b) => format!("bytes[{}]", b.len()),
        other => format!("{other}"),
    }
}

/// String preview (escaped if needed).
fn preview_str(s: &str, max: usize) -> String {
    let esc = escape_for_preview(s);
    if esc.len() <= max {
        format!("\"{esc}\"")
    } else {
        format!("\"{}…\"", &esc[..max])
    }
}

fn escape_for_preview(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

fn shorten(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}…", &s[..max])
    }
}
