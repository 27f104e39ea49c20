// Public engine surface: initialize, submit, poll, drain, shutdown.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::engine::record::RequestRecord;
use crate::engine::registry::TransferId;
use crate::engine::request::Request;
use crate::engine::stats::StatsSnapshot;
use crate::engine::transfer::TransferEngine;
use crate::error::{InitError, NotInitialized, PollError, SubmitError};
use crate::global::GlobalGuard;
use crate::reactor::Reactor;

/// Immutable view of a drained request.
#[derive(Debug, Clone)]
pub struct CompletedRequest {
    /// 1-based position within the drain call that produced it.
    pub index: usize,
    pub id: TransferId,
    /// Transfer failure text, empty when the exchange itself succeeded.
    pub error: String,
    pub ip: String,
    pub port: u16,
    /// 0 when no response was received.
    pub response_code: u32,
    pub url: String,
    /// `None` when the body was discarded or nothing was ever stored.
    pub content: Option<Bytes>,
    /// Content-Length reported by the server, if any. A stored body shorter
    /// than this was cut short.
    pub announced_length: Option<u64>,
    /// Body bytes delivered by the transfer, stored or not.
    pub bytes_seen: u64,
}

impl CompletedRequest {
    fn from_record(index: usize, id: TransferId, mut record: RequestRecord) -> Self {
        let content = if record.discards_body() {
            None
        } else {
            record.take_content()
        };
        Self {
            index,
            id,
            error: record.error_text().to_string(),
            ip: record.remote_ip().to_string(),
            port: record.remote_port(),
            response_code: record.response_code(),
            url: record.effective_url().to_string(),
            announced_length: record.announced_length(),
            bytes_seen: record.bytes_seen(),
            content,
        }
    }
}

// Field order is teardown order: driver, then event base, then global state.
struct EngineCore {
    transfers: TransferEngine,
    reactor: Reactor,
    _global: GlobalGuard,
}

/// Drives many concurrent transfers from the caller's thread. All progress
/// happens inside `poll_once`/`poll_timeout`; the engine never spawns threads.
pub struct Engine {
    config: EngineConfig,
    core: Option<EngineCore>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config, core: None }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.core.is_some()
    }

    /// Set up global state, the reactor and the transfer driver. The reactor
    /// uses `preferred_poll_method` when the platform supports it.
    pub fn initialize(&mut self, preferred_poll_method: &str) -> Result<(), InitError> {
        if self.core.is_some() {
            return Err(InitError::AlreadyInitialized);
        }

        let global = GlobalGuard::acquire()?;
        let reactor = Reactor::new(preferred_poll_method, self.config.events_capacity)?;
        let registry = reactor.registry().map_err(InitError::Reactor)?;
        let transfers =
            TransferEngine::new(self.config.clone(), registry, reactor.timer().clone())?;

        info!("engine initialized, poll method={}", reactor.method());
        self.core = Some(EngineCore {
            transfers,
            reactor,
            _global: global,
        });
        Ok(())
    }

    /// Queue a transfer. Failures of the transfer itself show up later in
    /// `drain_completed`.
    pub fn submit(&mut self, request: Request) -> Result<TransferId, SubmitError> {
        let core = self.core.as_mut().ok_or(NotInitialized)?;
        core.transfers.submit(request)
    }

    /// Run one non-blocking pass of pending socket and timer events.
    pub fn poll_once(&mut self) -> Result<usize, PollError> {
        let core = self.core.as_mut().ok_or(NotInitialized)?;
        Ok(core.reactor.poll_once(&mut core.transfers)?)
    }

    /// Like `poll_once`, but waits up to `max_wait` when nothing is ready.
    pub fn poll_timeout(&mut self, max_wait: Duration) -> Result<usize, PollError> {
        let core = self.core.as_mut().ok_or(NotInitialized)?;
        Ok(core.reactor.poll_timeout(max_wait, &mut core.transfers)?)
    }

    /// Remove and return every finished request that was not auto-removed.
    pub fn drain_completed(&mut self) -> Result<Vec<CompletedRequest>, NotInitialized> {
        let core = self.core.as_mut().ok_or(NotInitialized)?;
        let drained: Vec<_> = core
            .transfers
            .drain_completed()
            .into_iter()
            .enumerate()
            .map(|(i, (id, record))| CompletedRequest::from_record(i + 1, id, record))
            .collect();
        if !drained.is_empty() {
            debug!("drained {} completed requests", drained.len());
        }
        Ok(drained)
    }

    /// Whether `id` is still in flight or waiting to be drained.
    pub fn is_tracked(&self, id: TransferId) -> Result<bool, NotInitialized> {
        let core = self.core.as_ref().ok_or(NotInitialized)?;
        Ok(core.transfers.is_tracked(id))
    }

    pub fn active_transfers(&self) -> Result<usize, NotInitialized> {
        let core = self.core.as_ref().ok_or(NotInitialized)?;
        Ok(core.transfers.active_transfers())
    }

    pub fn stats(&self) -> Result<StatsSnapshot, NotInitialized> {
        let core = self.core.as_ref().ok_or(NotInitialized)?;
        Ok(core.transfers.stats())
    }

    pub fn poll_method(&self) -> Result<&'static str, NotInitialized> {
        let core = self.core.as_ref().ok_or(NotInitialized)?;
        Ok(core.reactor.method())
    }

    /// Release the driver, the timer, the event base and the global state.
    /// In-flight and undrained requests are dropped.
    pub fn shutdown(&mut self) -> Result<(), NotInitialized> {
        let EngineCore {
            transfers,
            reactor,
            _global: global,
        } = self.core.take().ok_or(NotInitialized)?;
        transfers.shutdown();
        drop(reactor);
        drop(global);
        info!("engine shut down");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.core.is_some() {
            let _ = self.shutdown();
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
