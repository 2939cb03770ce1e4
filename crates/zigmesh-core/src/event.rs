// ── Engine events ──
//
// Device and commissioning notifications fanned out over a `broadcast`
// channel. Subscribers that fall behind skip the events they missed.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::wrappers::BroadcastStream;

use crate::commissioning::{HealAction, HealReason};
use crate::model::{ChannelMask, IeeeAddr, NetworkProfile, ShortAddr};

/// Commissioning progress and self-heal activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommissioningEvent {
    PanIdConflictDetected {
        status: i32,
    },
    SelfHealRetry {
        reason: HealReason,
        action: HealAction,
        attempt: u32,
        ok: bool,
        error: Option<String>,
    },
    SelfHealExhausted {
        reason: HealReason,
        attempts: u32,
    },
    /// A trigger arrived while a heal was already running.
    SelfHealSuppressed {
        reason: HealReason,
    },
    /// Guided node fell back to the broad join mask.
    GuidedFallback {
        channel_mask: ChannelMask,
    },
    ProfileSynced {
        profile: NetworkProfile,
    },
}

/// Everything the engine publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    DeviceAdded {
        short_addr: ShortAddr,
        ieee_addr: Option<IeeeAddr>,
    },
    DeviceUpdated {
        short_addr: ShortAddr,
        ieee_addr: Option<IeeeAddr>,
    },
    DiscoveryAbandoned {
        short_addr: ShortAddr,
        attempt: u32,
        error: String,
    },
    Commissioning(CommissioningEvent),
}

/// Subscription handle returned by `Engine::subscribe()`.
pub struct EventStream {
    receiver: broadcast::Receiver<Arc<EngineEvent>>,
}

impl EventStream {
    pub(crate) fn new(receiver: broadcast::Receiver<Arc<EngineEvent>>) -> Self {
        Self { receiver }
    }

    /// Next event without waiting. Lagged gaps are skipped.
    pub fn try_next(&mut self) -> Option<Arc<EngineEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<Arc<EngineEvent>> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Wait for the next event. `None` once the engine is dropped.
    pub async fn recv(&mut self) -> Option<Arc<EngineEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> EngineEventStream {
        EngineEventStream {
            inner: BroadcastStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `broadcast::Receiver`.
pub struct EngineEventStream {
    inner: BroadcastStream<Arc<EngineEvent>>,
}

impl Stream for EngineEventStream {
    type Item = Arc<EngineEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                // Lagged: keep going from the oldest retained event.
                Poll::Ready(Some(Err(_))) => {}
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
