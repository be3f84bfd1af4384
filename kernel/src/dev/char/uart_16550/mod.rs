use crate::*;
use core::fmt::{self, Debug, Write};

pub struct Uart16550 {
    pub number: u8,
    port: uart_16550::SerialPort,
}

impl Debug for Uart16550 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uart16550").field("number", &self.number).finish()
    }
}

impl Uart16550 {
    pub const fn new(number: u8) -> Uart16550 {
        Uart16550 {
            number,
            port: unsafe { uart_16550::SerialPort::new(0x3F8 + number as u16) },
        }
    }

    pub fn init_device(&mut self) {
        self.port.init();
    }
}

impl axiom::io::Write for Uart16550 {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        for b in buf {
            self.port.send(*b);
        }
        Ok(buf.len())
    }
}

impl fmt::Write for Uart16550 {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            self.port.send(b);
        }
        Ok(())
    }
}
