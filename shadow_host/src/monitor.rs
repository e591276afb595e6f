//! Link-subscriber watchdog.
//!
//! The standalone subscriber process feeds the intercept path; if it
//! wedges (packets stop for more than five seconds after ever having
//! flowed) or dies, the monitor kills and relaunches it, with a cooldown
//! so a crash-looping child cannot spin the host. The decision logic is
//! a pure state machine with an injected clock; a thin thread drives it
//! against a real child process.

use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const STALE_THRESHOLD_MS: u64 = 5_000;
pub const COOLDOWN_MS: u64 = 10_000;
pub const POLL_INTERVAL_MS: u64 = 100;
pub const KILL_WAIT_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    None,
    /// Ask the child to die; a restart follows after `KILL_WAIT_MS`.
    Kill,
    /// Reap (if needed) and relaunch the child now.
    Restart,
}

#[derive(Debug)]
pub struct MonitorState {
    last_packets: u32,
    last_packet_ms: u64,
    /// High-water mark; staleness only counts once packets ever flowed.
    ever_received: u32,
    cooldown_until_ms: u64,
    kill_pending: bool,
    kill_deadline_ms: u64,
    pub restart_count: u32,
}

impl MonitorState {
    pub fn new(now_ms: u64, packets: u32) -> Self {
        Self {
            last_packets: packets,
            last_packet_ms: now_ms,
            ever_received: packets,
            cooldown_until_ms: 0,
            kill_pending: false,
            kill_deadline_ms: 0,
            restart_count: 0,
        }
    }

    /// One poll: feed the current packet counter and child liveness,
    /// get back what to do.
    pub fn poll(&mut self, now_ms: u64, packets: u32, child_alive: bool) -> MonitorAction {
        if packets != self.last_packets {
            self.last_packets = packets;
            self.last_packet_ms = now_ms;
            if packets > self.ever_received {
                self.ever_received = packets;
            }
        }

        if self.kill_pending {
            if now_ms >= self.kill_deadline_ms {
                self.kill_pending = false;
                return MonitorAction::Restart;
            }
            return MonitorAction::None;
        }

        if self.ever_received > 0
            && now_ms > self.last_packet_ms + STALE_THRESHOLD_MS
            && now_ms >= self.cooldown_until_ms
        {
            log::info!(
                "link audio stale: ever={}, requesting subscriber restart",
                self.ever_received
            );
            self.kill_pending = true;
            self.kill_deadline_ms = now_ms + KILL_WAIT_MS;
            return MonitorAction::Kill;
        }

        if !child_alive && now_ms >= self.cooldown_until_ms {
            log::info!("link subscriber died, restarting");
            return MonitorAction::Restart;
        }

        MonitorAction::None
    }

    /// Record a completed restart; arms the cooldown.
    pub fn restarted(&mut self, now_ms: u64, packets: u32) {
        self.restart_count += 1;
        self.cooldown_until_ms = now_ms + COOLDOWN_MS;
        self.last_packets = packets;
        self.last_packet_ms = now_ms;
        self.kill_pending = false;
        log::info!("link subscriber restarted (#{})", self.restart_count);
    }
}

/// Thread driver around a real child process.
pub struct SubscriberMonitor {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SubscriberMonitor {
    /// Launch the subscriber and keep it alive. `make_command` builds
    /// the child invocation; `packet_counter` samples the intercept
    /// counter; `on_restart` resets intercept state before relaunching.
    pub fn spawn(
        make_command: impl Fn() -> Command + Send + 'static,
        packet_counter: impl Fn() -> u32 + Send + 'static,
        on_restart: impl Fn() + Send + 'static,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let run_flag = Arc::clone(&running);

        let thread = std::thread::spawn(move || {
            let started = Instant::now();
            let now_ms = || started.elapsed().as_millis() as u64;

            let mut child: Option<Child> = match make_command().spawn() {
                Ok(c) => {
                    log::info!("link subscriber launched: pid={}", c.id());
                    Some(c)
                }
                Err(e) => {
                    log::warn!("link subscriber launch failed: {e}");
                    None
                }
            };

            let mut state = MonitorState::new(now_ms(), packet_counter());

            while run_flag.load(Ordering::Relaxed) {
                let alive = match child.as_mut() {
                    Some(c) => matches!(c.try_wait(), Ok(None)),
                    None => false,
                };

                match state.poll(now_ms(), packet_counter(), alive) {
                    MonitorAction::None => {}
                    MonitorAction::Kill => {
                        if let Some(c) = child.as_mut() {
                            let _ = c.kill();
                        }
                    }
                    MonitorAction::Restart => {
                        if let Some(mut c) = child.take() {
                            let _ = c.kill();
                            let _ = c.wait();
                        }
                        on_restart();
                        child = match make_command().spawn() {
                            Ok(c) => {
                                log::info!("link subscriber relaunched: pid={}", c.id());
                                Some(c)
                            }
                            Err(e) => {
                                log::warn!("link subscriber relaunch failed: {e}");
                                None
                            }
                        };
                        state.restarted(now_ms(), packet_counter());
                    }
                }

                std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }

            if let Some(mut c) = child.take() {
                let _ = c.kill();
                let _ = c.wait();
            }
        });

        Self { running, thread: Some(thread) }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for SubscriberMonitor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}
