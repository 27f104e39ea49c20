// Transfer engine: owns the multi-transfer driver and turns reactor events into
// driver calls, then settles whatever the driver reports as finished.

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use curl::easy::Easy2;
use curl::multi::{Easy2Handle, Events, Multi};
use curl::MultiError;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::form::build_form;
use super::record::{RequestRecord, TransferOutcome};
use super::registry::{Entry, RequestRegistry, TransferId};
use super::request::{Payload, Request};
use super::stats::{StatsCollector, StatsSnapshot};
use crate::config::{EngineConfig, AUTO_REMOVE_CODES};
use crate::error::{InitError, SubmitError};
use crate::reactor::timer::SharedTimer;
use crate::reactor::watch::{SocketAction, WatchSet};
use crate::reactor::{EventHandler, Readiness};

type TransferHandle = Easy2Handle<RequestRecord>;

pub struct TransferEngine {
    // Field order is drop order: in-flight handles detach before the driver
    // is cleaned up.
    registry: RequestRegistry<TransferHandle>,
    multi: Multi,
    watches: Arc<Mutex<WatchSet>>,
    timer: SharedTimer,
    stats: StatsCollector,
    config: EngineConfig,
}

impl TransferEngine {
    /// Build the driver and bind its socket-state and timer callbacks to the
    /// reactor's registry and shared timer.
    pub fn new(
        config: EngineConfig,
        registry: mio::Registry,
        timer: SharedTimer,
    ) -> Result<Self, InitError> {
        let mut multi = Multi::new();
        let watches = Arc::new(Mutex::new(WatchSet::new(registry)));

        let socket_watches = Arc::clone(&watches);
        multi.socket_function(move |socket, events, _token| {
            let Some(action) = SocketAction::from_driver(&events) else {
                return;
            };
            if let Err(e) = socket_watches.lock().apply(socket, action) {
                warn!("watch update for fd {} ({:?}) failed: {}", socket, action, e);
            }
        })?;

        let driver_timer = timer.clone();
        multi.timer_function(move |delay| {
            driver_timer.reconfigure(delay);
            true
        })?;

        Ok(Self {
            registry: RequestRegistry::new(),
            multi,
            watches,
            timer,
            stats: StatsCollector::new(),
            config,
        })
    }

    /// Register a new transfer with the driver. Nothing is sent until the
    /// reactor delivers events for it.
    pub fn submit(&mut self, request: Request) -> Result<TransferId, SubmitError> {
        if request.url.contains('\0') {
            return Err(SubmitError::InvalidUrl(request.url));
        }

        let record = RequestRecord::new(request.discard_body, self.config.max_body_bytes);
        let mut easy = Easy2::new(record);
        self.configure(&mut easy, &request)?;

        let id = self.registry.allocate_id();
        let mut handle = self.multi.add2(easy)?;
        handle.set_token(id.as_token())?;
        if self.registry.insert(id, handle).is_err() {
            return Err(SubmitError::DuplicateTransfer(id));
        }

        self.stats.record_submitted();
        debug!(
            "transfer {} submitted url={} discard_body={}",
            id, request.url, request.discard_body
        );
        Ok(id)
    }

    fn configure(
        &self,
        easy: &mut Easy2<RequestRecord>,
        request: &Request,
    ) -> Result<(), SubmitError> {
        let config = &self.config;
        easy.signal(false)?;
        easy.tcp_keepalive(true)?;
        easy.tcp_keepidle(Duration::from_secs(config.keepalive_idle_secs))?;
        easy.tcp_keepintvl(Duration::from_secs(config.keepalive_interval_secs))?;
        easy.ssl_verify_peer(config.verify_tls)?;
        easy.ssl_verify_host(config.verify_tls)?;
        easy.follow_location(config.follow_redirects)?;
        easy.connect_timeout(Duration::from_millis(config.connect_timeout_ms))?;
        if let Some(proxy) = &config.proxy {
            easy.proxy(proxy)?;
        }
        easy.url(&request.url)?;

        match request.payload() {
            Payload::Form(fields) => {
                if request.body.is_some() {
                    debug!("both form and body given, sending the form");
                }
                easy.httppost(build_form(fields)?)?;
            }
            Payload::Raw(body) => {
                easy.post(true)?;
                easy.post_field_size(body.len() as u64)?;
                easy.post_fields_copy(body)?;
            }
            Payload::Empty => {}
        }
        Ok(())
    }

    /// Settle every transfer the driver reports as finished.
    fn process_completions(&mut self) {
        let mut finished = Vec::new();
        self.multi.messages(|message| {
            if let Some(result) = message.result() {
                match message.token() {
                    Ok(token) => finished.push((TransferId::from_token(token), result)),
                    Err(e) => warn!("finished transfer without a token: {}", e),
                }
            }
        });

        for (id, result) in finished {
            self.complete(id, result);
        }
    }

    fn complete(&mut self, id: TransferId, result: Result<(), curl::Error>) {
        let mut handle = match self.registry.remove(id) {
            Some(Entry::InFlight(handle)) => handle,
            Some(Entry::Completed(record)) => {
                warn!("transfer {} reported finished twice", id);
                self.registry.park_completed(id, record);
                return;
            }
            None => {
                warn!("transfer {} finished but is not registered", id);
                return;
            }
        };

        // Taken before detaching so a failed detach still settles the request.
        let mut record = std::mem::take(handle.get_mut());
        let outcome = match self.multi.remove2(handle) {
            Ok(easy) => {
                let outcome = read_outcome(&easy, result);
                // Releases the driver-side handle; metadata has been read.
                drop(easy);
                outcome
            }
            Err(e) => {
                warn!("transfer {} could not be detached: {}", id, e);
                detach_failure(&e)
            }
        };
        record.finish(outcome);
        self.settle(id, record);
    }

    /// Apply the completion policy to a finished record: auto-remove codes
    /// are released here, everything else waits for a drain.
    fn settle(&mut self, id: TransferId, record: RequestRecord) {
        let auto_remove = AUTO_REMOVE_CODES.contains(&record.response_code());
        let truncated = record.is_truncated();
        self.stats
            .record_completed(record.bytes_seen(), auto_remove, truncated);

        if auto_remove {
            if truncated {
                warn!(
                    "transfer {} url={} response_code={} released with a truncated body ({} of {} bytes kept)",
                    id,
                    record.effective_url(),
                    record.response_code(),
                    record.bytes_received(),
                    record.bytes_seen()
                );
            }
            debug!(
                "transfer {} done url={} response_code={} bytes={}",
                id,
                record.effective_url(),
                record.response_code(),
                record.bytes_seen()
            );
        } else {
            warn!(
                "transfer {} failed url={} response_code={} error={:?}",
                id,
                record.effective_url(),
                record.response_code(),
                record.error_text()
            );
            self.registry.park_completed(id, record);
        }
    }

    /// Take every finished, non-auto-removed record, in submission order.
    pub fn drain_completed(&mut self) -> Vec<(TransferId, RequestRecord)> {
        let drained = self.registry.drain_completed();
        self.stats.record_drained(drained.len());
        drained
    }

    /// Whether `id` is in flight or waiting to be drained.
    pub fn is_tracked(&self, id: TransferId) -> bool {
        self.registry.lookup(id).is_some()
    }

    pub fn active_transfers(&self) -> usize {
        self.registry.in_flight_count()
    }

    pub fn pending_drain(&self) -> usize {
        self.registry.completed_count()
    }

    pub fn watched_sockets(&self) -> usize {
        self.watches.lock().len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(
            self.active_transfers(),
            self.pending_drain(),
            self.watched_sockets(),
        )
    }

    /// Detach every transfer, release the driver's watches and cancel the
    /// timer. The engine is unusable afterwards.
    pub fn shutdown(mut self) {
        let abandoned = self.registry.in_flight_count();
        if abandoned > 0 {
            debug!("abandoning {} in-flight transfers", abandoned);
        }
        self.registry.clear();
        self.timer.cancel();
        let Self { multi, watches, .. } = self;
        drop(multi);
        watches.lock().clear();
    }
}

/// Read the finished transfer's metadata. The error text prefers the
/// transfer's own error buffer over the generic description of the code.
fn read_outcome(easy: &Easy2<RequestRecord>, result: Result<(), curl::Error>) -> TransferOutcome {
    let error = result.err().map(|e| {
        easy.take_error_buf()
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| e.to_string())
    });
    let remote_ip = easy.primary_ip().ok().flatten().unwrap_or_default().to_string();
    let effective_url = easy.effective_url().ok().flatten().unwrap_or_default().to_string();
    TransferOutcome {
        error,
        remote_ip,
        remote_port: easy.primary_port().unwrap_or(0),
        response_code: easy.response_code().unwrap_or(0),
        effective_url,
        announced_length: easy
            .content_length_download()
            .ok()
            .filter(|len| *len >= 0.0)
            .map(|len| len as u64),
    }
}

fn detach_failure(err: &MultiError) -> TransferOutcome {
    TransferOutcome {
        error: Some(format!("transfer could not be detached: {}", err)),
        ..TransferOutcome::default()
    }
}

impl EventHandler for TransferEngine {
    fn on_socket_ready(&mut self, fd: RawFd, readiness: Readiness) {
        let mut events = Events::new();
        events
            .input(readiness.readable)
            .output(readiness.writable)
            .error(readiness.error);
        if let Err(e) = self.multi.action(fd, &events) {
            warn!("socket action on fd {} failed: {}", fd, e);
        }
        self.watches.lock().rearm(fd);
        self.process_completions();
    }

    fn on_timeout(&mut self) {
        if let Err(e) = self.multi.timeout() {
            warn!("timer action failed: {}", e);
        }
        self.process_completions();
    }
}
