//! Host-target interface.
//!
//! Two 64-bit words at the configured base: `tohost` (guest requests) and
//! `fromhost` (host replies). The payload layout is
//! `(device << 56) | (cmd << 48) | data`:
//!
//! * `tohost == 1` — shutdown request; ends the simulation.
//! * device 1, cmd 1 — console write of the low byte; `fromhost` echoes
//!   `(1 << 56) | (1 << 48)`.
//! * device 1, cmd 0 — console read request; cleared without effect here.
//! * anything else is logged and left in `tohost`.

use crate::soc::device::{CharacterDevice, MmioDevice};

/// HTIF device state.
pub struct Htif {
    tohost: u64,
    fromhost: u64,
    console: Box<dyn CharacterDevice>,
    shutdown: bool,
}

impl Htif {
    /// Creates an HTIF bridge writing console bytes to `console`.
    pub fn new(console: Box<dyn CharacterDevice>) -> Self {
        Self {
            tohost: 0,
            fromhost: 0,
            console,
            shutdown: false,
        }
    }

    /// True once the guest has requested shutdown.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown
    }

    /// Host-side delivery of one console byte to the guest.
    pub fn push_fromhost_byte(&mut self, byte: u8) {
        if self.fromhost == 0 {
            self.fromhost = 1 << 56 | u64::from(byte);
        }
    }

    /// Snapshot accessor: `(tohost, fromhost)`.
    pub fn state(&self) -> (u64, u64) {
        (self.tohost, self.fromhost)
    }

    /// Snapshot restore.
    pub fn restore(&mut self, tohost: u64, fromhost: u64) {
        self.tohost = tohost;
        self.fromhost = fromhost;
    }

    fn handle_cmd(&mut self) {
        let device = self.tohost >> 56;
        let cmd = (self.tohost >> 48) & 0xFF;

        if self.tohost == 1 {
            tracing::info!("htif shutdown request");
            self.shutdown = true;
        } else if device == 1 && cmd == 1 {
            let byte = [self.tohost as u8];
            self.console.write_data(&byte);
            self.tohost = 0;
            self.fromhost = device << 56 | cmd << 48;
        } else if device == 1 && cmd == 0 {
            // Keyboard interrupt request; no input source wired here.
            self.tohost = 0;
        } else if self.tohost != 0 {
            tracing::debug!(
                tohost = format_args!("{:#018x}", self.tohost),
                "unsupported htif command"
            );
        }
    }

    fn read32(&self, offset: u64) -> u32 {
        match offset {
            0 => self.tohost as u32,
            4 => (self.tohost >> 32) as u32,
            8 => self.fromhost as u32,
            12 => (self.fromhost >> 32) as u32,
            _ => 0,
        }
    }

    fn write32(&mut self, offset: u64, val: u32) {
        match offset {
            0 => {
                self.tohost = (self.tohost & !0xFFFF_FFFF) | u64::from(val);
                self.handle_cmd();
            }
            4 => {
                self.tohost = (self.tohost & 0xFFFF_FFFF) | (u64::from(val) << 32);
                self.handle_cmd();
            }
            8 => self.fromhost = (self.fromhost & !0xFFFF_FFFF) | u64::from(val),
            12 => self.fromhost = (self.fromhost & 0xFFFF_FFFF) | (u64::from(val) << 32),
            _ => {}
        }
    }
}

impl MmioDevice for Htif {
    fn name(&self) -> &'static str {
        "htif"
    }

    fn as_htif_mut(&mut self) -> Option<&mut Htif> {
        Some(self)
    }

    fn read(&mut self, offset: u64, size_log2: u32) -> Result<u64, ()> {
        match size_log2 {
            2 => Ok(u64::from(self.read32(offset))),
            3 => Ok(u64::from(self.read32(offset)) | u64::from(self.read32(offset + 4)) << 32),
            _ => Err(()),
        }
    }

    fn write(&mut self, offset: u64, value: u64, size_log2: u32) -> Result<(), ()> {
        match size_log2 {
            2 => {
                self.write32(offset, value as u32);
                Ok(())
            }
            3 => {
                // A doubleword store lands the whole command at once.
                match offset {
                    0 => {
                        self.tohost = value;
                        self.handle_cmd();
                    }
                    8 => self.fromhost = value,
                    _ => {}
                }
                Ok(())
            }
            _ => Err(()),
        }
    }
}
