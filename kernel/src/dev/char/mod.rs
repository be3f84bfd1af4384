pub mod uart_16550;

pub use self::uart_16550::Uart16550;
