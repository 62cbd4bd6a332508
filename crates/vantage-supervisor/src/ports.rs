//! Local port allocation for preview servers.

use std::collections::{BTreeSet, HashSet};
use std::net::{Ipv4Addr, TcpListener};
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, SupervisorError};

struct ArenaState {
    next: u16,
    free: BTreeSet<u16>,
    leased: HashSet<u16>,
}

/// Hands out distinct ports from a fixed range.
///
/// A port is leased until its [`PortLease`] is dropped. Before a port is
/// handed out it is checked with a bind on the loopback interface, so ports
/// held by unrelated processes are skipped.
pub struct PortArena {
    range: Range<u16>,
    state: Mutex<ArenaState>,
}

impl std::fmt::Debug for PortArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortArena")
            .field("range", &self.range)
            .field("leased", &self.state.lock().leased.len())
            .finish()
    }
}

impl PortArena {
    pub fn new(range: Range<u16>) -> Self {
        Self {
            state: Mutex::new(ArenaState {
                next: range.start,
                free: BTreeSet::new(),
                leased: HashSet::new(),
            }),
            range,
        }
    }

    pub fn range(&self) -> Range<u16> {
        self.range.clone()
    }

    /// Number of ports currently leased.
    pub fn leased(&self) -> usize {
        self.state.lock().leased.len()
    }

    /// Lease a port that is neither leased nor bound by another process.
    pub fn allocate(self: &Arc<Self>) -> Result<PortLease> {
        let mut state = self.state.lock();

        let candidates: Vec<u16> = state
            .free
            .iter()
            .copied()
            .chain(state.next..self.range.end)
            .collect();

        for port in candidates {
            if state.leased.contains(&port) {
                continue;
            }
            if port >= state.next {
                state.next = port.saturating_add(1);
            }
            if !is_bindable(port) {
                state.free.insert(port);
                continue;
            }
            state.free.remove(&port);
            state.leased.insert(port);
            tracing::debug!(port, "Leased preview port");
            return Ok(PortLease {
                port,
                arena: Arc::clone(self),
            });
        }

        Err(SupervisorError::PortExhausted {
            start: self.range.start,
            end: self.range.end,
        })
    }

    fn release(&self, port: u16) {
        let mut state = self.state.lock();
        if state.leased.remove(&port) {
            state.free.insert(port);
            tracing::debug!(port, "Released preview port");
        }
    }
}

fn is_bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// Exclusive claim on a port. The port returns to the arena on drop.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    arena: Arc<PortArena>,
}

impl PortLease {
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.arena.release(self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A range of `len` ports that were free a moment ago.
    fn free_range(len: u16) -> Range<u16> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let start = listener.local_addr().unwrap().port();
        drop(listener);
        let start = start.min(u16::MAX - len);
        start..start + len
    }

    #[test]
    fn test_leases_are_distinct() {
        let arena = Arc::new(PortArena::new(free_range(8)));
        let a = arena.allocate().unwrap();
        let b = arena.allocate().unwrap();
        assert_ne!(a.port(), b.port());
        assert!(arena.range().contains(&a.port()));
        assert_eq!(arena.leased(), 2);
    }

    #[test]
    fn test_drop_releases_port() {
        let arena = Arc::new(PortArena::new(free_range(1)));
        let lease = arena.allocate().unwrap();
        let port = lease.port();
        assert!(matches!(
            arena.allocate(),
            Err(SupervisorError::PortExhausted { .. })
        ));

        drop(lease);
        assert_eq!(arena.leased(), 0);
        assert_eq!(arena.allocate().unwrap().port(), port);
    }

    #[test]
    fn test_bound_port_is_skipped() {
        let range = free_range(4);
        let squatter = TcpListener::bind((Ipv4Addr::LOCALHOST, range.start));
        let arena = Arc::new(PortArena::new(range.clone()));

        let lease = arena.allocate().unwrap();
        if squatter.is_ok() {
            assert_ne!(lease.port(), range.start);
        }
    }

    #[test]
    fn test_empty_range_is_exhausted() {
        let arena = Arc::new(PortArena::new(5000..5000));
        let err = arena.allocate().unwrap_err();
        assert!(err.to_string().contains("5000..5000"));
    }
}
