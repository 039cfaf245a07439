//! The tile fetcher contract and its worker thread.
//!
//! The engine never performs network I/O itself. A plugin implements
//! [`TileFetcher`]; the engine runs it on a dedicated thread and talks
//! to it exclusively through queued messages, so the map thread never
//! blocks on the network. Results come back through the same queued
//! boundary and are drained by the engine on the map thread.

use crate::error::{EngineError, Result};
use cartograph_core::TileSpec;
use std::collections::BTreeSet;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// Commands posted from the engine to the fetcher thread.
#[derive(Debug)]
pub enum FetchCommand {
    /// Start fetching `added`, stop caring about `removed`.
    UpdateRequests {
        /// Tiles newly wanted by at least one map.
        added: BTreeSet<TileSpec>,
        /// Tiles no map wants anymore. Cancellation is advisory; bytes
        /// that arrive regardless are still accepted.
        removed: BTreeSet<TileSpec>,
    },
    /// Stop the worker loop.
    Shutdown,
}

/// Results published by the fetcher.
#[derive(Debug)]
pub enum FetchEvent {
    /// A tile's bytes arrived.
    Finished {
        /// The fetched tile.
        spec: TileSpec,
        /// Compressed image bytes.
        bytes: Vec<u8>,
        /// Image format of the bytes, e.g. `png`.
        format: String,
    },
    /// A fetch failed.
    Error {
        /// The failed tile.
        spec: TileSpec,
        /// Human-readable cause.
        error: String,
    },
}

/// Cloneable sink the fetcher publishes its results into.
#[derive(Debug, Clone)]
pub struct FetcherEvents {
    sender: mpsc::UnboundedSender<FetchEvent>,
}

impl FetcherEvents {
    /// Publish fetched bytes for `spec`.
    pub fn tile_finished(&self, spec: TileSpec, bytes: Vec<u8>, format: impl Into<String>) {
        let _ = self.sender.send(FetchEvent::Finished {
            spec,
            bytes,
            format: format.into(),
        });
    }

    /// Publish a fetch failure for `spec`.
    pub fn tile_error(&self, spec: TileSpec, error: impl Into<String>) {
        let _ = self.sender.send(FetchEvent::Error {
            spec,
            error: error.into(),
        });
    }
}

/// Byte-level tile fetching, implemented by provider plugins.
///
/// The engine aggregates the request sets of all its maps before they
/// reach the fetcher, so `added`/`removed` are already deduplicated
/// across maps. The fetcher owns its transport; it may satisfy requests
/// synchronously inside this call or hand them to its own machinery and
/// publish into `events` later. It runs on the fetcher thread.
pub trait TileFetcher: Send + 'static {
    /// Reconcile the set of wanted tiles.
    fn update_tile_requests(
        &mut self,
        events: &FetcherEvents,
        added: &BTreeSet<TileSpec>,
        removed: &BTreeSet<TileSpec>,
    );
}

/// The engine's handle on the fetcher thread: command sender, event
/// receiver, and the join handle for shutdown.
pub(crate) struct FetcherHandle {
    commands: mpsc::UnboundedSender<FetchCommand>,
    events: mpsc::UnboundedReceiver<FetchEvent>,
    worker: Option<JoinHandle<()>>,
}

impl FetcherHandle {
    /// Spawn the worker thread around a fetcher implementation.
    pub(crate) fn spawn<F: TileFetcher>(fetcher: F) -> Result<Self> {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let events = FetcherEvents { sender: event_tx };

        let worker = std::thread::Builder::new()
            .name("cartograph-fetcher".into())
            .spawn(move || {
                let mut fetcher = fetcher;
                while let Some(command) = command_rx.blocking_recv() {
                    match command {
                        FetchCommand::UpdateRequests { added, removed } => {
                            fetcher.update_tile_requests(&events, &added, &removed);
                        }
                        FetchCommand::Shutdown => break,
                    }
                }
            })
            .map_err(EngineError::FetcherThread)?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            worker: Some(worker),
        })
    }

    /// Post a request reconciliation to the fetcher thread.
    pub(crate) fn post(&self, added: BTreeSet<TileSpec>, removed: BTreeSet<TileSpec>) {
        let _ = self
            .commands
            .send(FetchCommand::UpdateRequests { added, removed });
    }

    /// Drain every event the fetcher has published so far, in
    /// publication order.
    pub(crate) fn poll(&mut self) -> Vec<FetchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for FetcherHandle {
    fn drop(&mut self) {
        let _ = self.commands.send(FetchCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
