// Single-threaded readiness loop: socket watches plus one shared timer.

pub mod timer;
pub mod watch;

use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Registry};
use tracing::{debug, warn};

use self::timer::SharedTimer;
use self::watch::fd_for;
use crate::error::InitError;

/// Readiness of one socket as observed by the reactor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Receives the events of one reactor pass.
pub trait EventHandler {
    fn on_socket_ready(&mut self, fd: RawFd, readiness: Readiness);
    fn on_timeout(&mut self);
}

/// Backends the reactor can run on this platform, preferred first.
pub fn supported_methods() -> &'static [&'static str] {
    if cfg!(any(target_os = "linux", target_os = "android", target_os = "illumos")) {
        &["epoll"]
    } else if cfg!(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    )) {
        &["kqueue"]
    } else {
        &["poll"]
    }
}

/// Pick the preferred backend when this platform has it, else the default.
pub fn select_method(preferred: &str) -> &'static str {
    let supported = supported_methods();
    match supported.iter().find(|m| m.eq_ignore_ascii_case(preferred)) {
        Some(method) => *method,
        None => {
            let fallback = supported[0];
            debug!(
                "poll method {:?} unsupported here, falling back to {}",
                preferred, fallback
            );
            fallback
        }
    }
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    timer: SharedTimer,
    method: &'static str,
}

impl Reactor {
    pub fn new(preferred_method: &str, events_capacity: usize) -> Result<Self, InitError> {
        let method = select_method(preferred_method);
        let poll = Poll::new().map_err(InitError::Reactor)?;
        debug!("reactor created, method={}", method);
        Ok(Self {
            poll,
            events: Events::with_capacity(events_capacity.max(1)),
            timer: SharedTimer::new(),
            method,
        })
    }

    /// A handle for registering sockets from outside the loop.
    pub fn registry(&self) -> io::Result<Registry> {
        self.poll.registry().try_clone()
    }

    pub fn timer(&self) -> &SharedTimer {
        &self.timer
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    /// One non-blocking pass over pending readiness and timer events.
    pub fn poll_once<H: EventHandler>(&mut self, handler: &mut H) -> io::Result<usize> {
        self.poll_timeout(Duration::ZERO, handler)
    }

    /// One pass that waits up to `max_wait` for something to happen. The wait
    /// never extends past the timer deadline. Returns the number of events
    /// dispatched.
    pub fn poll_timeout<H: EventHandler>(
        &mut self,
        max_wait: Duration,
        handler: &mut H,
    ) -> io::Result<usize> {
        let wait = match self.timer.remaining(Instant::now()) {
            Some(remaining) => remaining.min(max_wait),
            None => max_wait,
        };

        match self.poll.poll(&mut self.events, Some(wait)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => self.events.clear(),
            Err(e) => {
                warn!("reactor poll failed: {}", e);
                return Err(e);
            }
        }

        let mut dispatched = 0;
        for event in self.events.iter() {
            let readiness = Readiness {
                readable: event.is_readable() || event.is_read_closed(),
                writable: event.is_writable() || event.is_write_closed(),
                error: event.is_error(),
            };
            handler.on_socket_ready(fd_for(event.token()), readiness);
            dispatched += 1;
        }

        if self.timer.fire_if_due(Instant::now()) {
            handler.on_timeout();
            dispatched += 1;
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::watch::{SocketAction, WatchInterest, WatchSet};
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[derive(Default)]
    struct Recorder {
        sockets: Vec<(RawFd, Readiness)>,
        timeouts: usize,
    }

    impl EventHandler for Recorder {
        fn on_socket_ready(&mut self, fd: RawFd, readiness: Readiness) {
            self.sockets.push((fd, readiness));
        }

        fn on_timeout(&mut self) {
            self.timeouts += 1;
        }
    }

    #[test]
    fn test_select_method_falls_back() {
        let native = supported_methods()[0];
        assert_eq!(select_method(native), native);
        assert_eq!(select_method("no-such-backend"), native);
    }

    #[test]
    fn test_poll_once_returns_immediately_when_idle() {
        let mut reactor = Reactor::new("epoll", 16).unwrap();
        let mut recorder = Recorder::default();
        let started = Instant::now();
        assert_eq!(reactor.poll_once(&mut recorder).unwrap(), 0);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(recorder.sockets.is_empty());
        assert_eq!(recorder.timeouts, 0);
    }

    #[test]
    fn test_timer_fires_once() {
        let mut reactor = Reactor::new("epoll", 16).unwrap();
        let mut recorder = Recorder::default();
        reactor.timer().reconfigure(Some(Duration::ZERO));

        // The wait is clamped to the deadline, so each pass lasts about 1ms.
        let started = Instant::now();
        while recorder.timeouts == 0 && started.elapsed() < Duration::from_secs(2) {
            reactor
                .poll_timeout(Duration::from_secs(5), &mut recorder)
                .unwrap();
        }
        assert_eq!(recorder.timeouts, 1);
        assert!(started.elapsed() < Duration::from_secs(2));
        reactor.poll_once(&mut recorder).unwrap();
        assert_eq!(recorder.timeouts, 1);
    }

    #[test]
    fn test_socket_readiness_is_dispatched() {
        let mut reactor = Reactor::new("epoll", 16).unwrap();
        let mut watches = WatchSet::new(reactor.registry().unwrap());
        let (a, mut b) = UnixStream::pair().unwrap();
        watches
            .apply(a.as_raw_fd(), SocketAction::Watch(WatchInterest::Read))
            .unwrap();
        b.write_all(b"x").unwrap();

        let mut recorder = Recorder::default();
        reactor
            .poll_timeout(Duration::from_secs(1), &mut recorder)
            .unwrap();
        assert_eq!(recorder.sockets.len(), 1);
        let (fd, readiness) = recorder.sockets[0];
        assert_eq!(fd, a.as_raw_fd());
        assert!(readiness.readable);
    }
}
