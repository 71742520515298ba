//! Trait abstraction for the uplink serial port to enable testing

use async_trait::async_trait;
use std::io;

/// Byte sink the uplink writes JSON lines to
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Write one line and flush it out
    async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.write_all(line.as_bytes()).await?;
        self.flush().await
    }
}

/// [`SerialPortIO`] over an opened `tokio_serial` stream
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mock uplink port collecting every write
    #[derive(Clone, Default)]
    pub struct MockSerialPort {
        pub written: Arc<Mutex<Vec<u8>>>,
        pub flushes: Arc<Mutex<usize>>,
        pub failing_writes: Arc<Mutex<usize>>,
    }

    impl MockSerialPort {
        pub fn new() -> Self {
            Self::default()
        }

        /// Complete lines written so far
        pub fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.written.lock().unwrap())
                .lines()
                .map(str::to_string)
                .collect()
        }

        pub fn flush_count(&self) -> usize {
            *self.flushes.lock().unwrap()
        }

        /// Fail the next `count` writes with `BrokenPipe`
        pub fn fail_writes(&self, count: usize) {
            *self.failing_writes.lock().unwrap() = count;
        }
    }

    #[async_trait]
    impl SerialPortIO for MockSerialPort {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            let mut failing = self.failing_writes.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Mock write error"));
            }
            self.written.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            *self.flushes.lock().unwrap() += 1;
            Ok(())
        }
    }
}
