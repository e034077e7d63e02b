// Listener module
// Creates the TCP listener the relay accepts connections on

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;

/// Backlog queue size passed to `listen(2)`
const LISTEN_BACKLOG: i32 = 128;

/// Create a `TcpListener` with `SO_REUSEADDR` enabled.
///
/// Lets a restarted relay bind its port while old connections sit in
/// `TIME_WAIT`.
///
/// # Arguments
///
/// * `addr` - The socket address to bind to
pub fn create_reusable_listener(addr: std::net::SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    // Required before handing the socket to tokio
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
