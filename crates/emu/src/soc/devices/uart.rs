//! SiFive-style UART.
//!
//! The small 32-byte register window: TXFIFO writes go straight to the
//! character device, RXFIFO reads pull from it (returning the empty flag in
//! bit 31 when nothing is buffered), and IP reflects receive-watermark
//! status. The interrupt line is PLIC source 3 by convention, raised while
//! the receive watermark is pending and enabled.

use crate::soc::device::{CharacterDevice, IrqLine, MmioDevice};

const REG_TXFIFO: u64 = 0;
const REG_RXFIFO: u64 = 4;
const REG_TXCTRL: u64 = 8;
const REG_RXCTRL: u64 = 12;
const REG_IE: u64 = 16;
const REG_IP: u64 = 20;
const REG_DIV: u64 = 24;

const IE_RXWM: u32 = 2;
const IP_RXWM: u32 = 2;

/// The empty flag returned in RXFIFO bit 31.
const RXFIFO_EMPTY: u32 = 0x8000_0000;

/// SiFive UART device state.
pub struct Uart {
    console: Box<dyn CharacterDevice>,
    irq: IrqLine,
    rx_buf: Option<u8>,
    ie: u32,
    txctrl: u32,
    rxctrl: u32,
    div: u32,
}

impl Uart {
    /// Creates a UART over `console`, raising interrupts on `irq`.
    pub fn new(console: Box<dyn CharacterDevice>, irq: IrqLine) -> Self {
        Self {
            console,
            irq,
            rx_buf: None,
            ie: 0,
            txctrl: 0,
            rxctrl: 0,
            div: 0,
        }
    }

    fn pull_rx(&mut self) {
        if self.rx_buf.is_none() {
            let mut byte = [0u8; 1];
            if self.console.read_data(&mut byte) == 1 {
                self.rx_buf = Some(byte[0]);
            }
        }
    }

    fn ip(&self) -> u32 {
        if self.rx_buf.is_some() { IP_RXWM } else { 0 }
    }

    fn update_irq(&mut self) {
        if self.ie & IE_RXWM != 0 && self.ip() & IP_RXWM != 0 {
            self.irq.raise();
        } else {
            self.irq.lower();
        }
    }
}

impl MmioDevice for Uart {
    fn name(&self) -> &'static str {
        "uart"
    }

    fn read(&mut self, offset: u64, size_log2: u32) -> Result<u64, ()> {
        if size_log2 != 2 {
            return Err(());
        }
        let val = match offset {
            REG_TXFIFO => 0, // transmit never backpressures
            REG_RXFIFO => {
                self.pull_rx();
                let v = match self.rx_buf.take() {
                    Some(b) => u32::from(b),
                    None => RXFIFO_EMPTY,
                };
                self.update_irq();
                v
            }
            REG_TXCTRL => self.txctrl,
            REG_RXCTRL => self.rxctrl,
            REG_IE => self.ie,
            REG_IP => {
                self.pull_rx();
                self.ip()
            }
            REG_DIV => self.div,
            _ => {
                tracing::warn!(offset, "uart: read of unknown register");
                0
            }
        };
        Ok(u64::from(val))
    }

    fn write(&mut self, offset: u64, value: u64, size_log2: u32) -> Result<(), ()> {
        if size_log2 != 2 {
            return Err(());
        }
        let val = value as u32;
        match offset {
            REG_TXFIFO => self.console.write_data(&[val as u8]),
            REG_IE => {
                self.ie = val;
                self.update_irq();
            }
            REG_TXCTRL => self.txctrl = val,
            REG_RXCTRL => self.rxctrl = val,
            REG_DIV => self.div = val,
            _ => tracing::warn!(offset, value, "uart: write of unknown register"),
        }
        Ok(())
    }
}
