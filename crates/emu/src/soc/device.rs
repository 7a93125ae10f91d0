//! Device-boundary traits.
//!
//! Each external collaborator gets a narrow trait at its seam:
//! 1. **`MmioDevice`** — a register window on the physical memory map,
//!    accessed by offset and power-of-two size.
//! 2. **`CharacterDevice`** — byte-stream console behind the UART and HTIF.
//! 3. **`IrqLine`** — the one capability a device gets for raising its
//!    interrupt: a handle onto a shared PLIC source mask. Devices never see
//!    the machine or the hart.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// A memory-mapped device occupying one window of the physical address map.
///
/// Offsets are window-relative; `size_log2` is 0/1/2/3 for 1/2/4/8-byte
/// accesses. A device refuses sizes it does not implement by returning
/// `Err(())`, which the memory map turns into a load/store access fault.
pub trait MmioDevice {
    /// Short device name for diagnostics (e.g. `"clint"`).
    fn name(&self) -> &'static str;

    /// Reads `1 << size_log2` bytes at `offset`.
    fn read(&mut self, offset: u64, size_log2: u32) -> Result<u64, ()>;

    /// Writes `1 << size_log2` bytes at `offset`.
    fn write(&mut self, offset: u64, value: u64, size_log2: u32) -> Result<(), ()>;

    /// Whether this device may master DMA into guest RAM. Devices that do
    /// must go through the machine's invalidation entry point.
    fn can_dma(&self) -> bool {
        false
    }

    /// Returns the CLINT when this device is one; used by the interrupt
    /// glue to derive MTIP/MSIP.
    fn as_clint_mut(&mut self) -> Option<&mut crate::soc::devices::Clint> {
        None
    }

    /// Returns the PLIC when this device is one.
    fn as_plic_mut(&mut self) -> Option<&mut crate::soc::devices::Plic> {
        None
    }

    /// Returns the HTIF bridge when this device is one.
    fn as_htif_mut(&mut self) -> Option<&mut crate::soc::devices::Htif> {
        None
    }
}

/// Byte-stream console device (terminal, pipe, capture buffer).
pub trait CharacterDevice {
    /// Non-blocking read of up to `buf.len()` bytes; returns bytes read.
    fn read_data(&mut self, buf: &mut [u8]) -> usize;

    /// Writes all of `buf`.
    fn write_data(&mut self, buf: &[u8]);
}

/// A `CharacterDevice` that discards output and never has input. Used when
/// no console is configured.
#[derive(Debug, Default)]
pub struct NullConsole;

impl CharacterDevice for NullConsole {
    fn read_data(&mut self, _buf: &mut [u8]) -> usize {
        0
    }

    fn write_data(&mut self, _buf: &[u8]) {}
}

/// A `CharacterDevice` writing to the host's stdout. The default console
/// for the CLI harness.
#[derive(Debug, Default)]
pub struct StdoutConsole;

impl CharacterDevice for StdoutConsole {
    fn read_data(&mut self, _buf: &mut [u8]) -> usize {
        0
    }

    fn write_data(&mut self, buf: &[u8]) {
        use std::io::Write;
        let mut out = std::io::stdout();
        let _ = out.write_all(buf);
        let _ = out.flush();
    }
}

/// A console handle that several devices can share (the HTIF bridge and
/// the UART both front the same terminal).
#[derive(Clone)]
pub struct SharedConsole(std::rc::Rc<std::cell::RefCell<Box<dyn CharacterDevice>>>);

impl SharedConsole {
    /// Wraps a console for shared ownership.
    pub fn new(inner: Box<dyn CharacterDevice>) -> Self {
        Self(std::rc::Rc::new(std::cell::RefCell::new(inner)))
    }
}

impl CharacterDevice for SharedConsole {
    fn read_data(&mut self, buf: &mut [u8]) -> usize {
        self.0.borrow_mut().read_data(buf)
    }

    fn write_data(&mut self, buf: &[u8]) {
        self.0.borrow_mut().write_data(buf);
    }
}

/// Shared PLIC source mask. Bit `i` set means device source `i + 1` is
/// asserting its line.
pub type IrqSourceMask = Arc<AtomicU32>;

/// Interrupt-lane capability handed to a device at registration.
///
/// The line toggles one source bit in the mask shared with the PLIC; the
/// machine glue folds the mask into `mip` at instruction boundaries.
#[derive(Clone, Debug)]
pub struct IrqLine {
    mask: IrqSourceMask,
    bit: u32,
}

impl IrqLine {
    /// Creates a lane for PLIC source `source` (1..=31) over `mask`.
    ///
    /// # Panics
    ///
    /// Panics if `source` is 0 or above 31 — an internal wiring error, not a
    /// guest-reachable condition.
    pub fn new(mask: IrqSourceMask, source: u32) -> Self {
        assert!(
            (1..=31).contains(&source),
            "PLIC source {source} out of range"
        );
        Self {
            mask,
            bit: source - 1,
        }
    }

    /// Asserts the line.
    pub fn raise(&self) {
        let _ = self.mask.fetch_or(1 << self.bit, Ordering::Relaxed);
    }

    /// Deasserts the line.
    pub fn lower(&self) {
        let _ = self.mask.fetch_and(!(1 << self.bit), Ordering::Relaxed);
    }
}
