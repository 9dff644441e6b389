use std::{io, os::unix::net::UnixDatagram};

/// Tell systemd the runner is up, when a notify socket is around. Returns
/// false when the runner is not under systemd supervision.
pub fn notify_ready() -> io::Result<bool> {
    notify("READY=1")
}

fn notify(state: &str) -> io::Result<bool> {
    let Some(socket_path) = std::env::var_os("NOTIFY_SOCKET") else {
        return Ok(false);
    };

    let socket = UnixDatagram::unbound()?;
    socket.send_to(state.as_bytes(), socket_path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_is_delivered_to_the_notify_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.sock");
        let receiver = UnixDatagram::bind(&path).unwrap();

        std::env::set_var("NOTIFY_SOCKET", &path);
        assert!(notify_ready().unwrap());
        std::env::remove_var("NOTIFY_SOCKET");

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"READY=1");
    }
}
