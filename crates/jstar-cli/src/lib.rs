//! jstar-cli/src/lib.rs — CLI front-end for the J* VM.
//!
//! Subcommands:
//!   - `run`    : loads a precompiled `.jsbc` chunk and executes it
//!   - `disasm` : loads a precompiled `.jsbc` chunk and prints its
//!                disassembly
//!
//! No bytecode compiler exists in this workspace, so there's no `build`/
//! `test` subcommand -- this CLI only ever consumes already-compiled
//! chunks. `run`/`disasm` accept the VM's tunables (stack size, initial
//! GC threshold, heap growth rate) as flags, translated into a
//! `VmOptions` before the VM is constructed.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use jstar_bytecode::helpers::read_chunk_from_file;
use jstar_vm::host::{Host, Importer, NativeRegistry as NativeRegistryTrait};
use jstar_vm::{VmOptions, Vm};

/// Entry point of the binary (called from `src/main.rs`).
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Run { file, vm } => cmd_run(file, vm.into()),
        Cmd::Disasm { file } => cmd_disasm(file),
    }
}

#[derive(Parser, Debug)]
#[command(name = "jstar", version, about = "J* VM command-line tool")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run a precompiled bytecode chunk.
    Run {
        /// Path to a `.jsbc` chunk file.
        file: PathBuf,
        #[command(flatten)]
        vm: VmArgs,
    },
    /// Disassemble a precompiled bytecode chunk.
    Disasm {
        /// Path to a `.jsbc` chunk file.
        file: PathBuf,
    },
}

/// Flags mirroring `jstar_vm::VmOptions`'s tunables.
#[derive(Args, Debug, Clone)]
struct VmArgs {
    /// Initial operand-stack capacity, in value slots.
    #[arg(long, default_value_t = VmOptions::default().stack_size)]
    stack_size: usize,
    /// Byte threshold at which the heap first becomes collection-eligible.
    #[arg(long, default_value_t = VmOptions::default().init_gc)]
    init_gc: usize,
    /// Multiplier applied to the GC threshold after a collection.
    #[arg(long, default_value_t = VmOptions::default().heap_grow_rate)]
    heap_grow_rate: f64,
    /// Instruction-fuel budget; execution raises `ProgramInterrupt` at zero.
    #[arg(long)]
    gas: Option<u64>,
    /// Log one `trace`-level line per dispatched instruction.
    #[arg(long)]
    trace: bool,
}

impl From<VmArgs> for VmOptions {
    fn from(a: VmArgs) -> VmOptions {
        VmOptions {
            stack_size: a.stack_size,
            init_gc: a.init_gc,
            heap_grow_rate: a.heap_grow_rate,
            gas: a.gas,
            trace: a.trace,
            ..VmOptions::default()
        }
    }
}

/// Combines the default no-op `Importer`/`Host` behavior with the demo
/// native registry from `jstar-natives` (when the `natives` feature is on),
/// so `native.print`/`native.clock`/etc. resolve for chunks that use them.
#[derive(Default)]
struct CliHost {
    #[cfg(feature = "natives")]
    natives: jstar_natives::NativeRegistry,
}

impl Host for CliHost {}

impl Importer for CliHost {
    fn resolve(&mut self, _name: &str) -> Result<Option<jstar_bytecode::Chunk>, String> {
        Ok(None)
    }
}

impl NativeRegistryTrait for CliHost {
    fn resolve_native(&self, module: &str, name: &str) -> Option<jstar_vm::value::NativeFn> {
        #[cfg(feature = "natives")]
        {
            use jstar_vm::host::NativeRegistry as _;
            return self.natives.resolve_native(module, name);
        }
        #[cfg(not(feature = "natives"))]
        {
            let _ = (module, name);
            None
        }
    }
}

fn cmd_run(file: PathBuf, options: VmOptions) -> Result<()> {
    ensure_exists(&file)?;

    let chunk = read_chunk_from_file(&file)
        .with_context(|| format!("loading chunk {}", file.display()))?;
    let mut vm = Vm::with_host(options, Box::new(CliHost::default()));

    // Spec §5: `evalBreak` is "settable by a signal handler"; wire Ctrl-C
    // straight into the flag `eval_break_handle` hands out, the same way
    // `signal_hook::flag::register` is meant to be used (it flips an
    // `Arc<AtomicBool>` from the signal handler, nothing more).
    if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, vm.eval_break_handle()) {
        tracing::warn!("failed to install SIGINT handler: {e}");
    }

    if let Err(e) = vm.run(chunk) {
        let exc = vm.to_exception_instance(&e);
        return Err(anyhow!("{}", vm.format_exception(&exc)));
    }
    Ok(())
}

fn cmd_disasm(file: PathBuf) -> Result<()> {
    ensure_exists(&file)?;

    let chunk = read_chunk_from_file(&file)
        .with_context(|| format!("loading chunk {}", file.display()))?;
    let title = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("chunk");
    println!("{}", chunk.disassemble(title));
    Ok(())
}

fn ensure_exists(path: &PathBuf) -> Result<()> {
    if !path.exists() {
        Err(anyhow!("file not found: {}", path.display()))
    } else {
        Ok(())
    }
}
