//! HTIF shutdown and console behavior driven from guest code.

use crate::common::{self, RAM_BASE};
use pretty_assertions::assert_eq;

/// A `tohost = 1` write terminates the simulation within a few retired
/// instructions.
#[test]
fn tohost_one_terminates_the_run() {
    let mut machine = common::small_machine();
    // li a7, 93 ; li a0, 0 ; write tohost = 1 (the redirected exit path)
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::addi(17, 0, 93),
            common::addi(10, 0, 0),
            common::lui(6, 0x40008), // t1 = HTIF base
            common::addi(5, 0, 1),
            common::sd(5, 6, 0),
            common::SPIN,
        ],
    );

    let retired = machine.step(10);
    assert!(retired <= 10);
    assert!(machine.terminated(), "tohost=1 must power the machine off");
    assert!(machine.harts[0].terminate);
}

/// Console writes through HTIF reach the character device and echo the
/// ack into fromhost.
#[test]
fn htif_console_write_echoes() {
    let sink = common::CaptureSink::default();
    let mut cfg = rvcosim_core::config::MachineConfig::default();
    cfg.memory_size = 4;
    let mut machine = rvcosim_core::soc::machine::MachineBuilder::new(cfg)
        .console(Box::new(sink.clone()))
        .build()
        .unwrap();

    // tohost = (1 << 56) | (1 << 48) | 'H'
    let cmd: u64 = (1 << 56) | (1 << 48) | u64::from(b'H');
    let htif = rvcosim_core::config::map::HTIF_BASE;
    machine.mem.write(htif, cmd, 3).unwrap();

    assert_eq!(sink.contents(), "H");
    assert_eq!(machine.mem.read(htif + 8, 3).unwrap(), (1 << 56) | (1 << 48));
}

/// The UART transmit path reaches the same console.
#[test]
fn uart_tx_reaches_console() {
    let sink = common::CaptureSink::default();
    let mut cfg = rvcosim_core::config::MachineConfig::default();
    cfg.memory_size = 4;
    let mut machine = rvcosim_core::soc::machine::MachineBuilder::new(cfg)
        .console(Box::new(sink.clone()))
        .build()
        .unwrap();

    let uart = rvcosim_core::config::map::UART0_BASE;
    machine.mem.write(uart, u64::from(b'!'), 2).unwrap();
    assert_eq!(sink.contents(), "!");
}

/// Unsupported access sizes on a device window surface as access faults
/// when reached through a load.
#[test]
fn unsupported_device_size_is_an_access_fault() {
    use rvcosim_core::core::cpu::StepOutcome;

    let mut machine = common::small_machine();
    machine.harts[0].csrs.mtvec = RAM_BASE + 0x100;
    common::load_program(
        &mut machine,
        RAM_BASE,
        &[
            common::lui(6, 0x54000),       // UART base
            // lb t0, 0(t1): byte reads are not a SiFive UART access size
            0x0003_0283,
        ],
    );

    let _ = machine.step(1);
    assert_eq!(machine.exec_hart_one(0), StepOutcome::Trapped);
    assert_eq!(machine.harts[0].csrs.mcause, 5, "load access fault");
}
