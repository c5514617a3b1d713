//! COM1 serial output
//!
//! Carries test results and `log` diagnostics out of QEMU. Write-only; the
//! kernel never reads from the UART.

#![cfg(target_os = "none")]

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;

use super::port::Port;

const COM1: u16 = 0x3F8;

pub struct SerialPort {
    data: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    /// Program `base` as a 38400 baud 8N1 UART with FIFOs enabled.
    ///
    /// # Safety
    ///
    /// `base` must be the I/O base of a 16550-compatible UART.
    pub unsafe fn new(base: u16) -> Self {
        let mut interrupt_enable = Port::<u8>::new(base + 1);
        let mut fifo_control = Port::<u8>::new(base + 2);
        let mut line_control = Port::<u8>::new(base + 3);
        let mut modem_control = Port::<u8>::new(base + 4);
        let mut data = Port::<u8>::new(base);

        // SAFETY: documented 16550 initialization against the caller-vouched
        // UART base: disable interrupts, set the divisor via DLAB, 8N1,
        // enable FIFOs, raise DTR/RTS.
        unsafe {
            interrupt_enable.write(0x00);
            line_control.write(0x80);
            data.write(0x03);
            interrupt_enable.write(0x00);
            line_control.write(0x03);
            fifo_control.write(0xC7);
            modem_control.write(0x0B);
        }

        Self {
            data: Port::new(base),
            line_status: Port::new(base + 5),
        }
    }

    fn send(&mut self, byte: u8) {
        // SAFETY: polls the line-status register for transmit-holding-empty
        // and then writes one byte; the constructor vouched for the UART.
        unsafe {
            while self.line_status.read() & 0x20 == 0 {
                core::hint::spin_loop();
            }
            self.data.write(byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.send(b'\r');
            }
            self.send(byte);
        }
        Ok(())
    }
}

lazy_static! {
    // SAFETY: COM1 at 0x3F8 is the standard first UART on PC hardware.
    pub static ref SERIAL: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(COM1) });
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    super::without_interrupts(|| {
        SERIAL
            .lock()
            .write_fmt(args)
            .expect("serial write_fmt failed");
    });
}
