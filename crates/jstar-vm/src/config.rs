//! VM configuration: the tunables that shape a VM instance plus a couple
//! of debugging conveniences (an optional gas counter and an
//! instruction-trace toggle) useful for embedding.

/// Initial stack capacity, the GC's initial threshold and its growth rate,
/// and a callback invoked whenever an exception escapes uncaught.
#[derive(Clone)]
pub struct VmOptions {
    /// Initial operand-stack capacity, in `Value` slots.
    pub stack_size: usize,
    /// Hard cap on call-stack depth before a `StackOverflowException` is
    /// raised.
    pub max_frames: usize,
    /// Byte threshold at which the heap first becomes eligible for
    /// collection. This workspace doesn't run a tracing collector (see
    /// `value.rs`), so this is tracked but not acted on; kept so embedders
    /// configuring a future real collector don't need an API break.
    pub init_gc: usize,
    /// Multiplier applied to the GC threshold after a collection.
    pub heap_grow_rate: f64,
    /// Optional fuel counter: decremented once per dispatched instruction,
    /// execution aborts with `ProgramInterrupt` at zero. `None` means
    /// unmetered; a useful embedding safety valve against runaway guest code.
    pub gas: Option<u64>,
    /// Emit a `trace` line per dispatched instruction when built with the
    /// `trace` feature.
    pub trace: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            stack_size: 1024,
            max_frames: 256,
            init_gc: 1 << 20,
            heap_grow_rate: 2.0,
            gas: None,
            trace: false,
        }
    }
}
