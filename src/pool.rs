//! Persistent connection pool (spec §3 "Persistent connection pool", §4.2).
//!
//! A fixed-capacity ring of parked sockets per host. `rent` hands out a
//! parked socket if one is available, `-1` (headroom, caller must connect)
//! if the pool hasn't reached capacity yet, or `-2` (do not use the pool
//! for this attempt) once capacity is reached. `return_socket` parks a
//! socket back into the ring, or closes it immediately if the pool has
//! been shut down or shrunk below its current contents.

use std::net::TcpStream;
use std::sync::Mutex;

/// Sentinel returned by `rent` meaning "no parked socket, but the pool has
/// headroom — caller must connect fresh".
pub const RENT_NEEDS_CONNECT: i32 = -1;
/// Sentinel returned by `rent` meaning "capacity reached — don't pool this
/// attempt".
pub const RENT_AT_CAPACITY: i32 = -2;

struct Ring {
    // `None` marks an empty slot (the original's `iSock < 0`).
    sockets: Vec<Option<TcpStream>>,
    capacity: usize,
    read_idx: usize,
    write_idx: usize,
    free_window: usize,
    shutdown: bool,
}

/// Advances `*var` to the next ring position, wrapping modulo `len`, and
/// returns the pre-advance value.
fn step(var: &mut usize, len: usize) -> usize {
    let res = *var;
    *var += 1;
    if *var >= len {
        *var = 0;
    }
    res
}

pub struct PersistentConnectionPool {
    ring: Mutex<Ring>,
}

impl PersistentConnectionPool {
    pub fn new(capacity: usize) -> PersistentConnectionPool {
        PersistentConnectionPool {
            ring: Mutex::new(Ring {
                sockets: Vec::new(),
                capacity,
                read_idx: 0,
                write_idx: 0,
                free_window: 0,
                shutdown: false,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().unwrap().capacity
    }

    /// Returns a parked socket, `RENT_NEEDS_CONNECT`, or `RENT_AT_CAPACITY`.
    pub fn rent(&self) -> Result<TcpStream, i32> {
        let mut ring = self.ring.lock().unwrap();
        if ring.free_window > 0 {
            ring.free_window -= 1;
            let len = ring.sockets.len();
            let read_idx = step(&mut ring.read_idx, len);
            return match ring.sockets[read_idx].take() {
                Some(sock) => Ok(sock),
                None => Err(RENT_NEEDS_CONNECT),
            };
        }
        if ring.sockets.len() == ring.capacity {
            return Err(RENT_AT_CAPACITY);
        }
        // Initial "heating": grow the ring by one empty slot.
        ring.sockets.push(None);
        Err(RENT_NEEDS_CONNECT)
    }

    /// Parks `sock` back into the ring, or closes it (by dropping) if the
    /// pool is shut down or has no room for it.
    pub fn return_socket(&self, sock: TcpStream) {
        let mut ring = self.ring.lock().unwrap();
        if ring.free_window >= ring.sockets.len() {
            if ring.sockets.len() == ring.capacity {
                // Overloaded and resized smaller: drop (closes) the socket.
                return;
            }
            ring.sockets.push(None);
            ring.write_idx = ring.sockets.len() - 1;
        }
        ring.free_window += 1;
        let shutdown = ring.shutdown;
        if ring.free_window == 1 {
            ring.read_idx = ring.write_idx;
        }
        let write_idx = ring.write_idx;
        ring.write_idx = (ring.write_idx + 1) % ring.sockets.len();
        ring.sockets[write_idx] = if shutdown { None } else { Some(sock) };
    }

    /// Closes every parked socket (by dropping) and flips the shutdown
    /// flag so future returns close immediately.
    pub fn shutdown(&self) {
        let mut ring = self.ring.lock().unwrap();
        ring.shutdown = true;
        let in_flight = ring.sockets.len() - ring.free_window;
        let mut read_idx = ring.read_idx;
        for _ in 0..in_flight {
            let idx = read_idx;
            read_idx = (read_idx + 1) % ring.sockets.len();
            ring.sockets[idx] = None;
        }
        ring.read_idx = read_idx;
    }

    #[cfg(test)]
    fn free_window(&self) -> usize {
        self.ring.lock().unwrap().free_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn connect_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn rent_needs_connect_until_capacity() {
        let pool = PersistentConnectionPool::new(2);
        assert_eq!(pool.rent().unwrap_err(), RENT_NEEDS_CONNECT);
        assert_eq!(pool.rent().unwrap_err(), RENT_NEEDS_CONNECT);
        assert_eq!(pool.rent().unwrap_err(), RENT_AT_CAPACITY);
    }

    #[test]
    fn round_trip_rent_return() {
        let pool = PersistentConnectionPool::new(2);
        let (a, _server_a) = connect_pair();
        pool.rent().unwrap_err();
        pool.return_socket(a);
        assert_eq!(pool.free_window(), 1);

        let got = pool.rent();
        assert!(got.is_ok());
        assert_eq!(pool.free_window(), 0);
    }

    #[test]
    fn shutdown_drops_parked_and_future_returns() {
        let pool = PersistentConnectionPool::new(1);
        let (a, _server_a) = connect_pair();
        pool.rent().unwrap_err();
        pool.return_socket(a);
        pool.shutdown();
        assert_eq!(pool.free_window(), 1);

        let (b, _server_b) = connect_pair();
        pool.rent().unwrap(); // drains the parked (now-closed) slot
        pool.return_socket(b);
    }
}
