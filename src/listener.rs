// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Event listeners
//!
//! A listener is the delivery end of a bounded channel. Producers call
//! [`Listener::schedule`], which never blocks. Consumers either wait on a
//! [`ListenerReceiver`] with a timeout or hand a callback to
//! [`Listener::spawn`], which drains the channel on its own task.

use crate::error::{ListenerError, PipeError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Duration;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Sending half of a listener; cheap to clone, clones share identity
pub struct Listener<T> {
    id: u64,
    sender: mpsc::Sender<T>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
        }
    }
}

impl<T> fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl<T: Send + 'static> Listener<T> {
    /// Creates a listener and the receiver its events are delivered to
    pub fn channel(capacity: usize) -> (Self, ListenerReceiver<T>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, sender }, ListenerReceiver { receiver })
    }

    /// Creates a listener whose events are handed to `callback` on a spawned task
    ///
    /// The task ends once every clone of the listener has been dropped.
    pub fn spawn<F>(capacity: usize, mut callback: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (listener, mut receiver) = Self::channel(capacity);
        tokio::spawn(async move {
            while let Some(obj) = receiver.recv().await {
                callback(obj);
            }
        });
        listener
    }

    /// Queues `obj` for delivery without waiting
    pub fn schedule(&self, obj: T) -> Result<(), ListenerError> {
        self.sender.try_send(obj).map_err(|e| match e {
            TrySendError::Full(_) => ListenerError::Full,
            TrySendError::Closed(_) => ListenerError::Closed,
        })
    }
}

impl<T> Listener<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True when both handles deliver to the same receiver
    pub fn same_as(&self, other: &Listener<T>) -> bool {
        self.id == other.id
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half of a listener
#[derive(Debug)]
pub struct ListenerReceiver<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> ListenerReceiver<T> {
    /// Waits up to `timeout` for the next delivered event
    pub async fn wait_for_event(&mut self, timeout: Duration) -> Result<T, PipeError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(obj)) => Ok(obj),
            Ok(None) => Err(PipeError::Failed("listener closed".to_string())),
            Err(_) => Err(PipeError::Timeout),
        }
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns an already delivered event, if any
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}
