// Socket watches: one persistent reactor registration per descriptor the
// transfer driver is interested in.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

use curl::multi::SocketEvents;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchInterest {
    Read,
    Write,
    Both,
}

impl WatchInterest {
    fn to_mio(self) -> Interest {
        match self {
            WatchInterest::Read => Interest::READABLE,
            WatchInterest::Write => Interest::WRITABLE,
            WatchInterest::Both => Interest::READABLE | Interest::WRITABLE,
        }
    }
}

/// What the driver wants done with a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketAction {
    Watch(WatchInterest),
    Unwatch,
}

impl SocketAction {
    /// `None` when the driver reports no interest at all.
    pub fn from_flags(input: bool, output: bool, remove: bool) -> Option<Self> {
        if remove {
            return Some(SocketAction::Unwatch);
        }
        match (input, output) {
            (true, true) => Some(SocketAction::Watch(WatchInterest::Both)),
            (true, false) => Some(SocketAction::Watch(WatchInterest::Read)),
            (false, true) => Some(SocketAction::Watch(WatchInterest::Write)),
            (false, false) => None,
        }
    }

    pub fn from_driver(events: &SocketEvents) -> Option<Self> {
        Self::from_flags(events.input(), events.output(), events.remove())
    }
}

/// Reactor registration for one descriptor.
#[derive(Debug)]
pub struct SocketWatch {
    fd: RawFd,
    interest: WatchInterest,
}

impl SocketWatch {
    fn register(registry: &Registry, fd: RawFd, interest: WatchInterest) -> io::Result<Self> {
        let token = token_for(fd);
        match registry.register(&mut SourceFd(&fd), token, interest.to_mio()) {
            // Left over from a descriptor number the driver already closed.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                registry.reregister(&mut SourceFd(&fd), token, interest.to_mio())?
            }
            other => other?,
        }
        Ok(Self { fd, interest })
    }

    fn reconfigure(&mut self, registry: &Registry, interest: WatchInterest) -> io::Result<()> {
        let token = token_for(self.fd);
        match registry.reregister(&mut SourceFd(&self.fd), token, interest.to_mio()) {
            // The descriptor was closed and its number reused behind our back.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                registry.register(&mut SourceFd(&self.fd), token, interest.to_mio())?
            }
            other => other?,
        }
        self.interest = interest;
        Ok(())
    }

    fn release(self, registry: &Registry) {
        // The driver may already have closed the descriptor, which drops the
        // registration on its own.
        if let Err(e) = registry.deregister(&mut SourceFd(&self.fd)) {
            debug!("deregister fd {} ignored: {}", self.fd, e);
        }
    }

    pub fn interest(&self) -> WatchInterest {
        self.interest
    }
}

pub fn token_for(fd: RawFd) -> Token {
    Token(fd as usize)
}

pub fn fd_for(token: Token) -> RawFd {
    token.0 as RawFd
}

/// Every watch the transfer driver currently holds, keyed by descriptor.
/// At most one watch exists per descriptor.
pub struct WatchSet {
    registry: Registry,
    watches: HashMap<RawFd, SocketWatch>,
}

impl WatchSet {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            watches: HashMap::new(),
        }
    }

    /// Create, reconfigure or destroy the watch for `fd`.
    pub fn apply(&mut self, fd: RawFd, action: SocketAction) -> io::Result<()> {
        match action {
            SocketAction::Watch(interest) => match self.watches.get_mut(&fd) {
                Some(watch) => {
                    if watch.interest() != interest {
                        debug!("watch fd {} now {:?}", fd, interest);
                    }
                    watch.reconfigure(&self.registry, interest)
                }
                None => {
                    let watch = SocketWatch::register(&self.registry, fd, interest)?;
                    debug!("watch fd {} created for {:?}", fd, interest);
                    self.watches.insert(fd, watch);
                    Ok(())
                }
            },
            SocketAction::Unwatch => {
                if let Some(watch) = self.watches.remove(&fd) {
                    watch.release(&self.registry);
                    debug!("watch fd {} removed", fd);
                }
                Ok(())
            }
        }
    }

    /// Re-arm a watch after its readiness was dispatched. The reactor is
    /// edge-triggered; re-arming makes a socket that is still ready fire again
    /// on the next pass, which is what a persistent watch promises.
    pub fn rearm(&mut self, fd: RawFd) {
        if let Some(watch) = self.watches.get_mut(&fd) {
            let interest = watch.interest();
            if let Err(e) = watch.reconfigure(&self.registry, interest) {
                warn!("rearm fd {} failed: {}", fd, e);
            }
        }
    }

    pub fn interest(&self, fd: RawFd) -> Option<WatchInterest> {
        self.watches.get(&fd).map(SocketWatch::interest)
    }

    pub fn len(&self) -> usize {
        self.watches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    /// Release every watch.
    pub fn clear(&mut self) {
        for (_, watch) in self.watches.drain() {
            watch.release(&self.registry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use mio::{Events, Poll};

    fn watch_set(poll: &Poll) -> WatchSet {
        WatchSet::new(poll.registry().try_clone().unwrap())
    }

    #[test]
    fn test_action_mapping() {
        use WatchInterest::*;
        assert_eq!(SocketAction::from_flags(true, false, false), Some(SocketAction::Watch(Read)));
        assert_eq!(SocketAction::from_flags(false, true, false), Some(SocketAction::Watch(Write)));
        assert_eq!(SocketAction::from_flags(true, true, false), Some(SocketAction::Watch(Both)));
        assert_eq!(SocketAction::from_flags(false, false, true), Some(SocketAction::Unwatch));
        assert_eq!(SocketAction::from_flags(false, false, false), None);
    }

    #[test]
    fn test_one_watch_per_descriptor() {
        let poll = Poll::new().unwrap();
        let mut watches = watch_set(&poll);
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();

        watches.apply(fd, SocketAction::Watch(WatchInterest::Read)).unwrap();
        watches.apply(fd, SocketAction::Watch(WatchInterest::Both)).unwrap();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches.interest(fd), Some(WatchInterest::Both));

        watches.apply(fd, SocketAction::Watch(WatchInterest::Write)).unwrap();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches.interest(fd), Some(WatchInterest::Write));

        watches.apply(fd, SocketAction::Unwatch).unwrap();
        assert!(watches.is_empty());
        // Unwatching twice is harmless.
        watches.apply(fd, SocketAction::Unwatch).unwrap();
    }

    #[test]
    fn test_watch_reports_readiness_and_rearms() {
        let mut poll = Poll::new().unwrap();
        let mut watches = watch_set(&poll);
        let (a, mut b) = UnixStream::pair().unwrap();
        a.set_nonblocking(true).unwrap();
        let fd = a.as_raw_fd();

        watches.apply(fd, SocketAction::Watch(WatchInterest::Read)).unwrap();
        b.write_all(b"ping").unwrap();

        let mut events = Events::with_capacity(8);
        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        let readable: Vec<_> = events
            .iter()
            .filter(|e| e.is_readable())
            .map(|e| fd_for(e.token()))
            .collect();
        assert_eq!(readable, vec![fd]);

        // Unread data plus a rearm fires again.
        watches.rearm(fd);
        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();
        assert!(events.iter().any(|e| fd_for(e.token()) == fd && e.is_readable()));

        watches.clear();
        assert!(watches.is_empty());
    }

    #[test]
    fn test_closed_descriptor_is_released_quietly() {
        let poll = Poll::new().unwrap();
        let mut watches = watch_set(&poll);
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        watches.apply(fd, SocketAction::Watch(WatchInterest::Read)).unwrap();
        drop(a);
        watches.apply(fd, SocketAction::Unwatch).unwrap();
        assert!(watches.is_empty());
    }
}
