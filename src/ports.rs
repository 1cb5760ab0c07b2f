//! Port Allocator (C1).
//!
//! Hands out TCP ports from a configured `[base, base+count)` range by
//! sequentially probing a throwaway bind, the same check the teacher's
//! `gateway::daemon::bind_with_fallback` does for its own single port,
//! generalized to a whole range with multi-holder bookkeeping.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PortError {
    #[error("no_available_port")]
    NoAvailablePort,
    #[error("port {0} is outside the configured range")]
    OutOfRange(u16),
    #[error("port {0} is already held")]
    AlreadyHeld(u16),
}

struct Registry {
    base: u16,
    count: u16,
    held: HashSet<u16>,
}

pub struct PortAllocator {
    inner: Mutex<Registry>,
}

fn probe_bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

impl PortAllocator {
    pub fn new(base: u16, count: u16) -> Self {
        Self {
            inner: Mutex::new(Registry {
                base,
                count,
                held: HashSet::new(),
            }),
        }
    }

    /// Sequentially probe from `base` upward; the first free, bindable port
    /// not already held is reserved and returned.
    pub fn acquire(&self) -> Result<u16, PortError> {
        let mut reg = self.inner.lock().expect("port registry poisoned");
        for offset in 0..reg.count {
            let candidate = reg.base.saturating_add(offset);
            if reg.held.contains(&candidate) {
                continue;
            }
            if probe_bindable(candidate) {
                reg.held.insert(candidate);
                return Ok(candidate);
            }
        }
        Err(PortError::NoAvailablePort)
    }

    /// Reserve a specific port, honouring the request only if it's in range,
    /// free, and currently bindable.
    pub fn acquire_specific(&self, port: u16) -> Result<u16, PortError> {
        let mut reg = self.inner.lock().expect("port registry poisoned");
        if port < reg.base || port >= reg.base.saturating_add(reg.count) {
            return Err(PortError::OutOfRange(port));
        }
        if reg.held.contains(&port) {
            return Err(PortError::AlreadyHeld(port));
        }
        if !probe_bindable(port) {
            return Err(PortError::AlreadyHeld(port));
        }
        reg.held.insert(port);
        Ok(port)
    }

    /// Record a port chosen by a child process after the fact (the child
    /// bound port 0 and reported back what the OS assigned it). Idempotent.
    pub fn record_external(&self, port: u16) {
        let mut reg = self.inner.lock().expect("port registry poisoned");
        reg.held.insert(port);
    }

    /// Release is idempotent: releasing a port that isn't held is a no-op.
    pub fn release(&self, port: u16) {
        let mut reg = self.inner.lock().expect("port registry poisoned");
        reg.held.remove(&port);
    }

    pub fn held_count(&self) -> usize {
        self.inner.lock().expect("port registry poisoned").held.len()
    }

    pub fn is_held(&self, port: u16) -> bool {
        self.inner
            .lock()
            .expect("port registry poisoned")
            .held
            .contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release() {
        let allocator = PortAllocator::new(19500, 5);
        let p = allocator.acquire().unwrap();
        assert!(p >= 19500 && p < 19505);
        assert!(allocator.is_held(p));
        allocator.release(p);
        assert!(!allocator.is_held(p));
    }

    #[test]
    fn exhausted_range_returns_no_available_port() {
        let allocator = PortAllocator::new(19600, 1);
        let first = allocator.acquire().unwrap();
        let second = allocator.acquire();
        assert_eq!(second, Err(PortError::NoAvailablePort));
        allocator.release(first);
        assert!(allocator.acquire().is_ok());
    }

    #[test]
    fn release_is_idempotent() {
        let allocator = PortAllocator::new(19700, 3);
        let p = allocator.acquire().unwrap();
        allocator.release(p);
        allocator.release(p);
        assert!(!allocator.is_held(p));
    }

    #[test]
    fn acquire_specific_out_of_range() {
        let allocator = PortAllocator::new(19800, 2);
        let err = allocator.acquire_specific(20000).unwrap_err();
        assert_eq!(err, PortError::OutOfRange(20000));
    }

    #[test]
    fn acquire_specific_already_held() {
        let allocator = PortAllocator::new(19900, 2);
        let p = allocator.acquire().unwrap();
        let err = allocator.acquire_specific(p).unwrap_err();
        assert_eq!(err, PortError::AlreadyHeld(p));
    }

    #[test]
    fn never_double_allocates_live_port() {
        let allocator = PortAllocator::new(20000, 2);
        let p1 = allocator.acquire().unwrap();
        let p2 = allocator.acquire().unwrap();
        assert_ne!(p1, p2);
    }

    #[test]
    fn record_external_reserves_port() {
        let allocator = PortAllocator::new(20100, 5);
        allocator.record_external(20102);
        assert!(allocator.is_held(20102));
        let p = allocator.acquire().unwrap();
        assert_ne!(p, 20102);
    }
}
