//! A blocking TCP mock agent speaking just enough of the wire protocol
//! to exercise the dispatcher against, modeled on the teacher's
//! `tests/mocks` pattern of a thread-backed stand-in server.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

/// How the mock should behave once a client connects.
pub enum MockBehavior {
    /// Handshake, read the request, then reply with a well-formed OK
    /// header and body.
    ReplyOk(Vec<u8>),
    /// Handshake, read the request, then go silent forever (simulates a
    /// hung peer for timeout tests).
    Silent,
    /// Handshake, then reply with a header whose `length` exceeds the
    /// caller's `max_packet_size` (simulates a corrupt/hostile peer).
    OversizeLength,
    /// Close the socket immediately after accepting, before any
    /// handshake byte is sent.
    RefuseAfterAccept,
}

pub struct MockAgent {
    pub addr: std::net::SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl MockAgent {
    /// Binds an ephemeral port and spawns one accept-and-serve thread
    /// per incoming connection, each driven by `behavior()`.
    pub fn spawn<F>(behavior: F) -> MockAgent
        where F: Fn() -> MockBehavior + Send + 'static
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock agent");
        let addr = listener.local_addr().expect("mock agent local_addr");

        let handle = thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let behavior = behavior();
                thread::spawn(move || serve(stream, behavior));
            }
        });

        MockAgent { addr, handle: Some(handle) }
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        // The listener thread blocks forever in `incoming()`; detach
        // rather than join so test teardown doesn't hang.
        if let Some(h) = self.handle.take() {
            drop(h);
        }
    }
}

fn serve(mut stream: TcpStream, behavior: MockBehavior) {
    match behavior {
        MockBehavior::RefuseAfterAccept => {
            drop(stream);
        }
        MockBehavior::Silent => {
            let mut handshake = [0u8; 4];
            if stream.read_exact(&mut handshake).is_err() {
                return;
            }
            let _ = stream.write_all(&1u32.to_be_bytes());
            // Never answer the query; let the caller's deadline fire.
            thread::sleep(std::time::Duration::from_secs(60));
        }
        MockBehavior::OversizeLength => {
            let mut handshake = [0u8; 4];
            if stream.read_exact(&mut handshake).is_err() {
                return;
            }
            let _ = stream.write_all(&1u32.to_be_bytes());
            let mut header = [0u8; 8];
            header[0..2].copy_from_slice(&0u16.to_be_bytes());
            header[2..4].copy_from_slice(&1u16.to_be_bytes());
            header[4..8].copy_from_slice(&(64 * 1024 * 1024i32).to_be_bytes());
            let _ = stream.write_all(&header);
        }
        MockBehavior::ReplyOk(body) => {
            let mut handshake = [0u8; 4];
            if stream.read_exact(&mut handshake).is_err() {
                return;
            }
            let _ = stream.write_all(&1u32.to_be_bytes());

            // Drain whatever request bytes the client sent; the mock
            // doesn't interpret them.
            let mut scratch = [0u8; 4096];
            let _ = stream.set_read_timeout(Some(std::time::Duration::from_millis(30)));
            let _ = stream.read(&mut scratch);

            let mut header = [0u8; 8];
            header[0..2].copy_from_slice(&0u16.to_be_bytes());
            header[2..4].copy_from_slice(&1u16.to_be_bytes());
            header[4..8].copy_from_slice(&(body.len() as i32).to_be_bytes());
            let _ = stream.write_all(&header);
            let _ = stream.write_all(&body);
        }
    }
}
