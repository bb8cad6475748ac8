//! COM1 serial port used for debug output and the kernel logger.
//!
//! On bare metal this programs the 16550 UART directly through port I/O
//! (115200 / 3 divisor, 8N1, FIFO enabled). On the host target writes are
//! forwarded to stdout so test output stays visible.

use core::fmt;

use spin::Mutex;

/// I/O base of the first serial port.
#[allow(dead_code)]
const COM1: u16 = 0x3F8;

pub struct SerialPort {
    #[allow(dead_code)]
    base: u16,
}

impl SerialPort {
    pub const fn new(base: u16) -> Self {
        Self { base }
    }

    /// Program the UART: 38400 baud, 8 data bits, no parity, one stop bit,
    /// FIFO on with a 14-byte threshold, modem lines raised.
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub fn init(&mut self) {
        use x86::io::outb;
        // SAFETY: writes target the UART's own register block; the port base
        // is a fixed legacy address not shared with other devices.
        unsafe {
            outb(self.base + 1, 0x00); // disable interrupts
            outb(self.base + 3, 0x80); // DLAB on
            outb(self.base, 0x03); // divisor low (38400 baud)
            outb(self.base + 1, 0x00); // divisor high
            outb(self.base + 3, 0x03); // 8N1, DLAB off
            outb(self.base + 2, 0xC7); // FIFO on, clear, 14-byte threshold
            outb(self.base + 4, 0x0B); // DTR | RTS | OUT2
        }
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    pub fn init(&mut self) {}

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    fn write_byte(&mut self, byte: u8) {
        use x86::io::{inb, outb};
        // SAFETY: polling LSR bit 5 (THR empty) before writing the data
        // register is the documented 16550 transmit sequence.
        unsafe {
            while inb(self.base + 5) & 0x20 == 0 {
                core::hint::spin_loop();
            }
            outb(self.base, byte);
        }
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    #[allow(dead_code)]
    fn write_byte(&mut self, _byte: u8) {}
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        {
            for byte in s.bytes() {
                if byte == b'\n' {
                    self.write_byte(b'\r');
                }
                self.write_byte(byte);
            }
        }
        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        {
            std::print!("{}", s);
        }
        Ok(())
    }
}

static SERIAL1: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));

/// Initialize COM1. Called once, before the first log line.
pub fn init() {
    SERIAL1.lock().init();
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let _ = SERIAL1.lock().write_fmt(args);
}
