//! Socket utilities and tuning

use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// Kernel send buffer for client sockets
pub const SEND_BUFFER_SIZE: usize = 1024 * 1024; // 1MB

/// Prepare an accepted client stream for the blocking writer thread
pub fn tune_stream(stream: &TcpStream, write_timeout: Duration) -> io::Result<()> {
    let socket = SockRef::from(stream);

    // Packets are already framed, don't let Nagle hold them back
    socket.set_nodelay(true)?;
    socket.set_send_buffer_size(SEND_BUFFER_SIZE)?;

    // TCP keepalive for connection health
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));
    socket.set_tcp_keepalive(&keepalive)?;

    // A hung peer turns into a write error instead of a stuck writer
    socket.set_write_timeout(Some(write_timeout))?;

    Ok(())
}
