//! Byte transport used by the writer loop

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use crate::util::tune_stream;

/// Blocking sink for encoded packets.
///
/// Only the writer thread calls `send`; `close` may be called from any
/// thread and must make a blocked `send` return an error.
pub trait Transport: Send + Sync + 'static {
    /// Write all of `bytes`, blocking up to the configured timeout
    fn send(&self, bytes: &[u8]) -> io::Result<()>;

    /// Bound how long a single `send` may block
    fn set_send_timeout(&self, timeout: Duration) -> io::Result<()>;

    /// Tear the connection down
    fn close(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut stream = self;
        stream.write_all(bytes)
    }

    fn set_send_timeout(&self, timeout: Duration) -> io::Result<()> {
        tune_stream(self, timeout)
    }

    fn close(&self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            // Already gone is as closed as it gets
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_send_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        client.set_send_timeout(Duration::from_secs(1)).unwrap();
        Transport::send(&client, &[3, 0, 1]).unwrap();

        let mut buf = [0u8; 3];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [3, 0, 1]);

        client.close().unwrap();
        assert!(Transport::send(&client, &[3, 0, 1]).is_err());
    }
}
