//! In-process link-audio subscriber: a UDP receive loop feeding the
//! intercept path.
//!
//! On-device the firmware's own sendto calls are hooked; standalone, the
//! host binds the announced endpoint and receives the same packets. The
//! datagram source doubles as the publisher's reply destination.

use crate::link_audio::LinkAudioIntercept;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct LinkSubscriber {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl LinkSubscriber {
    pub fn spawn(bind: SocketAddr, mut intercept: LinkAudioIntercept) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        let local_addr = socket.local_addr()?;
        log::info!("link subscriber listening on {local_addr}");

        let running = Arc::new(AtomicBool::new(true));
        let run_flag = Arc::clone(&running);

        let thread = std::thread::spawn(move || {
            let mut buf = [0u8; 2048];
            while run_flag.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((n, from)) => {
                        intercept.on_sendto(&buf[..n], Some(local_addr), Some(from));
                    }
                    Err(e)
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        log::warn!("link subscriber recv error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self { running, thread: Some(thread), local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for LinkSubscriber {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}
