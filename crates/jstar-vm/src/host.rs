//! Collaborator seams: the VM never hard-codes how a module's source is
//! found, how natives resolve, or how diagnostics reach the embedder.
//! These traits are the boundary; `DefaultHost` gives a sane in-process
//! implementation good enough for the CLI and for tests.

use crate::value::{NativeFn, Value};
use crate::Vm;

/// Resolves an import path to a module body. Module discovery (filesystem,
/// embedded registry, network) is entirely up to the embedder; this trait
/// is that seam.
pub trait Importer {
    /// Returns the compiled chunk bytes for `name`, or `None` if no such
    /// module exists. Errors other than "not found" are reported through
    /// the `Err` arm of the caller's `Result`.
    fn resolve(&mut self, name: &str) -> Result<Option<jstar_bytecode::Chunk>, String>;
}

/// Resolves `(module, name)` native-function references emitted by
/// `OP_NATIVE` against a host-maintained registry, per the FFI bridge.
pub trait NativeRegistry {
    fn resolve_native(&self, module: &str, name: &str) -> Option<NativeFn>;
}

/// Sink for VM-level diagnostics the embedder may want to observe
/// (uncaught exceptions, `print` output, GC pressure) without the VM
/// depending on a concrete logging backend. The default implementation
/// routes everything through the `log` crate, matching the rest of the
/// workspace's ambient logging story.
pub trait Host {
    fn on_print(&mut self, s: &str) {
        println!("{s}");
    }

    fn on_uncaught(&mut self, vm: &mut Vm, exc: &Value) {
        log::error!("{}", vm.format_exception(exc));
    }
}

/// A host that can't resolve any import or native and prints to stdout; the
/// baseline used when the embedder doesn't need anything fancier (tests,
/// small scripts, the CLI's default run path).
#[derive(Default)]
pub struct DefaultHost;

impl Host for DefaultHost {}

impl Importer for DefaultHost {
    fn resolve(&mut self, _name: &str) -> Result<Option<jstar_bytecode::Chunk>, String> {
        Ok(None)
    }
}

impl NativeRegistry for DefaultHost {
    fn resolve_native(&self, _module: &str, _name: &str) -> Option<NativeFn> {
        None
    }
}

/// Convenience supertrait so the VM can hold a single trait object instead
/// of three. Blanket-implemented for anything that satisfies all three
/// collaborator traits.
pub trait HostEnv: Host + Importer + NativeRegistry {}
impl<T: Host + Importer + NativeRegistry> HostEnv for T {}

impl crate::Vm {
    /// Routes `s` through the embedder's [`Host::on_print`], the same path
    /// `OP_PRINT` uses. Exposed so natives (which only see `&mut Vm`, not
    /// the host trait object) can implement `native.print` themselves.
    pub fn print(&mut self, s: &str) {
        self.host.on_print(s);
    }

    /// Reports an exception that unwound past the evaluator boundary to
    /// the embedder's [`Host::on_uncaught`], the configured error-reporting
    /// hook realized as a collaborator-trait method rather than a raw
    /// function pointer, matching how `Importer`/`NativeRegistry` are
    /// modeled in this seam. `on_uncaught` itself takes `&mut Vm`, so
    /// the host is swapped out for the duration of the call to avoid an
    /// aliased `&mut self` borrow -- the same save/restore shape
    /// `call_value`'s native dispatch uses around re-entrant host calls.
    pub(crate) fn notify_uncaught(&mut self, exc: &Value) {
        let mut host = std::mem::replace(&mut self.host, Box::new(DefaultHost));
        host.on_uncaught(self, exc);
        self.host = host;
    }
}
