use crate::error::{Result, RpcError};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};
use tracing::{debug, trace};

fn try_bind(addr: SocketAddr) -> std::io::Result<()> {
    TcpListener::bind(addr).map(drop)
}

/// Bind-probe the port on loopback and on the wildcard addresses, so a
/// listener on any interface counts as taken. Every probe listener is
/// dropped before returning. Hosts without IPv6 skip the `[::]` probe.
pub fn is_port_free(port: u16) -> bool {
    let v4 = [
        SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
    ];
    for addr in v4 {
        if let Err(e) = try_bind(addr) {
            trace!(port, %addr, error = %e, "Port unavailable");
            return false;
        }
    }

    let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    match try_bind(v6) {
        Ok(()) => true,
        Err(e) if matches!(e.kind(), ErrorKind::AddrNotAvailable | ErrorKind::Unsupported) => {
            trace!(port, error = %e, "No IPv6, skipping wildcard probe");
            true
        }
        Err(e) => {
            trace!(port, addr = %v6, error = %e, "Port unavailable");
            false
        }
    }
}

/// Pick `preferred` if bindable, else the first bindable port in `start..=end`.
pub fn allocate(preferred: u16, start: u16, end: u16) -> Result<u16> {
    if preferred != 0 && is_port_free(preferred) {
        debug!(port = preferred, "Preferred port is free");
        return Ok(preferred);
    }

    for port in start..=end {
        if port == 0 || port == preferred {
            continue;
        }
        if is_port_free(port) {
            debug!(port, preferred, "Allocated fallback port");
            return Ok(port);
        }
    }

    Err(RpcError::NoPortAvailable {
        preferred,
        start,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupy() -> (TcpListener, u16) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn returns_preferred_when_free() {
        let (listener, port) = occupy();
        drop(listener);
        assert_eq!(allocate(port, port, port).unwrap(), port);
    }

    #[test]
    fn skips_occupied_preferred() {
        let (_held, port) = occupy();
        let end = port.saturating_add(50);
        let chosen = allocate(port, port, end).unwrap();
        assert_ne!(chosen, port);
        assert!(chosen > port && chosen <= end);
    }

    #[test]
    fn exhausted_range_fails() {
        let (_a, port) = occupy();
        let err = allocate(port, port, port).unwrap_err();
        assert!(matches!(err, RpcError::NoPortAvailable { .. }));
    }

    #[test]
    fn probe_releases_port() {
        let (listener, port) = occupy();
        drop(listener);
        assert!(is_port_free(port));
        // a second bind right after the probe must still succeed
        assert!(TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok());
    }

    #[test]
    fn wildcard_listener_marks_port_taken() {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_free(port));
        let err = allocate(port, port, port).unwrap_err();
        assert!(matches!(err, RpcError::NoPortAvailable { .. }));
    }
}
