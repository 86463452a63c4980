// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dedicated thread driving an [`EndpointManager`].
//!
//! # Architecture
//!
//! ```text
//!   transport threads / callers            remoting thread
//!   +----------------------+               +-----------------------------+
//!   | RemotingHandle       |  Command(..)  | loop {                      |
//!   |   send / quarantine  | ------------> |   recv_deadline(next_tick)  |
//!   |   inbound_frame ...  |               |   submit + run_pending      |
//!   +----------------------+               |   tick() when due           |
//!                                          | }                           |
//!                                          +-----------------------------+
//! ```
//!
//! The manager is single-threaded: every command goes through one channel
//! and is processed in arrival order. Transports complete outbound
//! association attempts through the same channel. The thread ends when the manager has
//! shut down, on [`RemotingRuntime::stop`], or when the runtime is dropped.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::address::{Address, Uid};
use crate::endpoint::{
    AssociationHandle, CommandSink, DisassociateInfo, EndpointManager, Frame, HandleId,
    ManagerCommand, ManagerState, OutboundEnvelope,
};
use crate::error::RuntimeStopped;

/// Default interval between two manager ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
enum RuntimeMessage {
    Command(ManagerCommand),
    Stop,
}

/// Cloneable sender side of a [`RemotingRuntime`].
#[derive(Debug, Clone)]
pub struct RemotingHandle {
    tx: Sender<RuntimeMessage>,
    running: Arc<AtomicBool>,
}

impl RemotingHandle {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// # Errors
    ///
    /// [`RuntimeStopped`] when the remoting thread has exited.
    pub fn submit(&self, command: ManagerCommand) -> Result<(), RuntimeStopped> {
        self.tx
            .send(RuntimeMessage::Command(command))
            .map_err(|_| RuntimeStopped)
    }

    /// # Errors
    ///
    /// [`RuntimeStopped`] when the remoting thread has exited.
    pub fn send(&self, envelope: OutboundEnvelope) -> Result<(), RuntimeStopped> {
        self.submit(ManagerCommand::Send(envelope))
    }

    /// # Errors
    ///
    /// [`RuntimeStopped`] when the remoting thread has exited.
    pub fn quarantine(&self, address: Address, uid: Option<Uid>) -> Result<(), RuntimeStopped> {
        self.submit(ManagerCommand::Quarantine { address, uid })
    }

    /// # Errors
    ///
    /// [`RuntimeStopped`] when the remoting thread has exited.
    pub fn inbound_association(
        &self,
        handle: Arc<dyn AssociationHandle>,
    ) -> Result<(), RuntimeStopped> {
        self.submit(ManagerCommand::InboundAssociation(handle))
    }

    /// # Errors
    ///
    /// [`RuntimeStopped`] when the remoting thread has exited.
    pub fn inbound_frame(&self, handle: HandleId, frame: Frame) -> Result<(), RuntimeStopped> {
        self.submit(ManagerCommand::InboundFrame { handle, frame })
    }

    /// # Errors
    ///
    /// [`RuntimeStopped`] when the remoting thread has exited.
    pub fn disassociated(&self, handle: HandleId, info: DisassociateInfo) -> Result<(), RuntimeStopped> {
        self.submit(ManagerCommand::Disassociated { handle, info })
    }

    /// Ask the manager to flush and stop every endpoint. The thread exits once
    /// the manager has shut down.
    ///
    /// # Errors
    ///
    /// [`RuntimeStopped`] when the remoting thread has exited.
    pub fn shutdown(&self) -> Result<(), RuntimeStopped> {
        self.submit(ManagerCommand::Shutdown)
    }
}

impl CommandSink for RemotingHandle {
    fn submit_command(&self, command: ManagerCommand) {
        if self.submit(command).is_err() {
            log::debug!("[RemotingHandle::submit_command] Remoting thread gone, completion dropped");
        }
    }
}

/// Owner of the remoting thread.
#[derive(Debug)]
pub struct RemotingRuntime {
    handle: RemotingHandle,
    thread: Option<JoinHandle<EndpointManager>>,
}

impl RemotingRuntime {
    /// Move `manager` onto a new thread ticking it every `tick_interval`.
    ///
    /// # Errors
    ///
    /// The thread could not be spawned.
    pub fn start(mut manager: EndpointManager, tick_interval: Duration) -> io::Result<Self> {
        let (tx, rx) = channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let handle = RemotingHandle {
            tx,
            running: Arc::clone(&running),
        };
        manager.set_command_sink(Some(Arc::new(handle.clone())));
        let thread = thread::Builder::new()
            .name("hdds-remoting".to_string())
            .spawn(move || {
                let mut manager = run(manager, &rx, tick_interval);
                manager.set_command_sink(None);
                running.store(false, Ordering::Release);
                manager
            })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    #[must_use]
    pub fn handle(&self) -> RemotingHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Stop the thread right away, without flushing, and return the manager.
    ///
    /// `None` when the thread panicked.
    pub fn stop(mut self) -> Option<EndpointManager> {
        let _ = self.handle.tx.send(RuntimeMessage::Stop);
        self.join_thread()
    }

    /// Wait for the thread to exit on its own (after a shutdown request) and
    /// return the manager.
    pub fn join(mut self) -> Option<EndpointManager> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Option<EndpointManager> {
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(manager) => Some(manager),
            Err(_) => {
                log::error!("[RemotingRuntime::join] Remoting thread panicked");
                None
            }
        }
    }
}

impl Drop for RemotingRuntime {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.handle.tx.send(RuntimeMessage::Stop);
            let _ = self.join_thread();
        }
    }
}

fn run(mut manager: EndpointManager, rx: &Receiver<RuntimeMessage>, tick_interval: Duration) -> EndpointManager {
    log::debug!(
        "[RemotingRuntime::run] Remoting thread started for {} (tick {:?})",
        manager.local_address(),
        tick_interval
    );
    let mut next_tick = Instant::now() + tick_interval;
    loop {
        match rx.recv_deadline(next_tick) {
            Ok(RuntimeMessage::Command(command)) => {
                manager.submit(command);
                // Batch whatever else is already queued
                let mut stop = false;
                while let Ok(message) = rx.try_recv() {
                    match message {
                        RuntimeMessage::Command(command) => manager.submit(command),
                        RuntimeMessage::Stop => {
                            stop = true;
                            break;
                        }
                    }
                }
                manager.run_pending();
                if stop {
                    break;
                }
            }
            Ok(RuntimeMessage::Stop) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if Instant::now() >= next_tick {
            manager.tick();
            next_tick = Instant::now() + tick_interval;
        }
        if manager.state() == ManagerState::ShutDown {
            break;
        }
    }
    log::debug!(
        "[RemotingRuntime::run] Remoting thread for {} exiting ({:?})",
        manager.local_address(),
        manager.state()
    );
    manager
}
