//! Exclusive send path.

use bytes::Bytes;
use log::debug;
use tokio::sync::MutexGuard;

use super::{Connection, GroupCore};
use crate::{
    action::ActionType,
    backend::SendError,
    error::{CoreError, Result},
    flow_control::FlowControlMessage,
    fragment::{FragmentBatch, FragmentSizing, Fragmenter},
    message::{encode_flow_control, encode_flow_control_body, encode_fragment, encode_seqno},
    metrics,
    seqno::Seqno,
};

/// Action whose emission stopped with [`CoreError::Retry`].
struct PendingAction {
    epoch: u64,
    payload: Bytes,
    batch: FragmentBatch,
    emitted: usize,
}

impl PendingAction {
    fn resumes(&self, epoch: u64, action_type: ActionType, payload: &Bytes) -> bool {
        self.epoch == epoch && self.batch.action_type() == action_type && self.payload == *payload
    }
}

pub(super) struct SendState {
    fragmenter: Fragmenter,
    sizing: FragmentSizing,
    pending: Option<PendingAction>,
}

impl SendState {
    pub(super) fn new(sizing: FragmentSizing) -> Self {
        Self {
            fragmenter: Fragmenter::new(sizing.fragment_payload()),
            sizing,
            pending: None,
        }
    }
}

/// Exclusive access to the emitting operations of a [`GroupCore`].
///
/// Obtained from [`GroupCore::send_path`]. Holding the guard serialises
/// emission so fragments of different actions never interleave on the wire.
/// `recv` is not affected and may run concurrently.
pub struct SendPath<'a> {
    core: &'a GroupCore,
    state: MutexGuard<'a, SendState>,
}

impl<'a> SendPath<'a> {
    pub(super) fn new(core: &'a GroupCore, state: MutexGuard<'a, SendState>) -> Self {
        Self { core, state }
    }

    /// On-wire packet size currently in effect.
    #[must_use]
    pub fn packet_size(&self) -> usize { self.state.sizing.packet_size() }

    /// Action bytes carried per fragment.
    #[must_use]
    pub fn fragment_payload(&self) -> usize { self.state.sizing.fragment_payload().get() }

    /// Change the on-wire packet size, returning the usable fragment payload.
    ///
    /// Applies to actions started after the call. An action awaiting a retry
    /// keeps the fragments it was split into.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PacketSizeTooSmall`] if `packet_size` cannot hold
    /// the fragment headers plus one payload byte.
    pub fn set_packet_size(&mut self, packet_size: usize) -> Result<usize> {
        let sizing = FragmentSizing::for_packet_size(packet_size)?;
        self.state.fragmenter.set_max_fragment_size(sizing.fragment_payload());
        self.state.sizing = sizing;
        debug!(
            "packet size set to {packet_size}; fragment payload {}",
            sizing.fragment_payload()
        );
        Ok(sizing.fragment_payload().get())
    }

    /// Emit an application action to the group.
    ///
    /// Returns the number of action bytes emitted once every fragment has
    /// been handed to the backend. This does not mean the group ordered the
    /// action; its outcome arrives through [`GroupCore::recv`].
    ///
    /// After [`CoreError::Retry`], sending the identical action again
    /// resumes with the first fragment the backend did not accept.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ReservedActionType`] for types the core generates itself.
    /// - [`CoreError::MessageTooLarge`] above the configured action size cap.
    /// - [`CoreError::Retry`] when the backend transiently refuses a fragment.
    /// - [`CoreError::NotConnected`] when primary membership is lost mid-send.
    /// - [`CoreError::Cancelled`] when the session closes.
    pub async fn send(&mut self, action_type: ActionType, payload: impl Into<Bytes>) -> Result<usize> {
        if !action_type.is_application() {
            return Err(CoreError::ReservedActionType(action_type));
        }
        self.emit(action_type, payload.into()).await
    }

    /// Announce the highest seqno this node has applied.
    ///
    /// Members record the watermark when the announcement is ordered; see
    /// [`GroupCore::commit_cut`].
    ///
    /// # Errors
    ///
    /// Fails like [`SendPath::send`].
    pub async fn set_last_applied(&mut self, seqno: Seqno) -> Result<usize> {
        self.emit(ActionType::LastApplied, encode_seqno(seqno)?).await
    }

    /// Announce the outcome of a state transfer. A negative `seqno` carries a
    /// failure code.
    ///
    /// # Errors
    ///
    /// Fails like [`SendPath::send`].
    pub async fn send_join(&mut self, seqno: Seqno) -> Result<usize> {
        self.emit(ActionType::Join, encode_seqno(seqno)?).await
    }

    /// Announce that this node has caught up and is ready to serve.
    ///
    /// # Errors
    ///
    /// Fails like [`SendPath::send`].
    pub async fn send_sync(&mut self, seqno: Seqno) -> Result<usize> {
        self.emit(ActionType::Sync, encode_seqno(seqno)?).await
    }

    /// Broadcast an opaque receive-pressure message.
    ///
    /// The message travels as a single backend message: it is never
    /// fragmented, never ordered and never waits for the flow-control gate.
    /// Members surface `body` unchanged; they pause or resume senders only
    /// when it decodes as a [`FlowControlMessage`]. Returns the encoded
    /// message size.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MessageTooLarge`] if the encoded message exceeds
    /// the packet size, and otherwise fails like [`SendPath::send`].
    pub async fn send_flow_control(&mut self, body: impl Into<Bytes>) -> Result<usize> {
        let connection = self.core.connection("send_flow_control")?;
        let encoded = encode_flow_control(&body.into())?;
        let limit = self.state.sizing.packet_size();
        if encoded.len() > limit {
            return Err(CoreError::MessageTooLarge {
                size: encoded.len(),
                limit,
            });
        }
        let size = encoded.len();
        tokio::select! {
            biased;
            () = connection.cancel.cancelled() => return Err(CoreError::Cancelled),
            outcome = connection.multicast.multicast(encoded) => outcome.map_err(send_failure)?,
        }
        debug!("flow control sent: {size} bytes");
        Ok(size)
    }

    /// Broadcast a pause or resume signal that members apply to their
    /// flow-control gate.
    ///
    /// # Errors
    ///
    /// Fails like [`SendPath::send_flow_control`].
    pub async fn send_flow_control_message(&mut self, message: FlowControlMessage) -> Result<usize> {
        debug!(
            "sending flow control: pause={}, queue_len={}",
            message.is_pause(),
            message.queue_len()
        );
        self.send_flow_control(encode_flow_control_body(&message)?)
            .await
    }

    async fn emit(&mut self, action_type: ActionType, payload: Bytes) -> Result<usize> {
        let connection = self.core.connection("send")?;
        let limit = self.core.max_action_size;
        if payload.len() > limit {
            return Err(CoreError::MessageTooLarge {
                size: payload.len(),
                limit,
            });
        }

        let resume = self
            .state
            .pending
            .as_ref()
            .is_some_and(|pending| pending.resumes(connection.epoch, action_type, &payload));
        if resume {
            debug!("resuming {action_type:?} action after retry");
        } else {
            if let Some(abandoned) = self.state.pending.take() {
                debug!(
                    "abandoning action {} after {} of {} fragments",
                    abandoned.batch.action_id(),
                    abandoned.emitted,
                    abandoned.batch.len()
                );
            }
            self.wait_for_gate(&connection).await?;
            let size = payload.len();
            let batch = self
                .state
                .fragmenter
                .fragment(action_type, payload.clone())
                .map_err(|_| CoreError::MessageTooLarge { size, limit })?;
            self.state.pending = Some(PendingAction {
                epoch: connection.epoch,
                payload,
                batch,
                emitted: 0,
            });
        }

        match self.emit_pending(&connection).await {
            Ok(size) => {
                self.state.pending = None;
                metrics::inc_actions_sent();
                Ok(size)
            }
            Err(CoreError::Retry) => Err(CoreError::Retry),
            Err(err) => {
                self.state.pending = None;
                Err(err)
            }
        }
    }

    async fn wait_for_gate(&self, connection: &Connection) -> Result<()> {
        if !self.core.flow_gate.is_paused() {
            return Ok(());
        }
        debug!(
            "send waiting for flow control: paused_by={:?}",
            self.core.flow_gate.paused_by()
        );
        tokio::select! {
            biased;
            () = connection.cancel.cancelled() => Err(CoreError::Cancelled),
            () = self.core.flow_gate.wait_open() => Ok(()),
        }
    }

    async fn emit_pending(&mut self, connection: &Connection) -> Result<usize> {
        let core = self.core;
        let Some(pending) = self.state.pending.as_mut() else {
            return Ok(0);
        };
        while let Some(frame) = pending.batch.fragments().get(pending.emitted) {
            let permit = tokio::select! {
                biased;
                () = connection.cancel.cancelled() => return Err(CoreError::Cancelled),
                permit = core.emitter.acquire() => permit,
            };
            let header = *frame.header();
            let encoded = encode_fragment(&header, frame.payload())?;
            let outcome = tokio::select! {
                biased;
                () = connection.cancel.cancelled() => return Err(CoreError::Cancelled),
                outcome = connection.multicast.multicast(encoded) => outcome,
            };
            drop(permit);
            outcome.map_err(send_failure)?;

            pending.emitted += 1;
            metrics::inc_fragments();
            tracing::debug!(
                action = %header.action_id(),
                index = %header.fragment_index(),
                last = header.is_last_fragment(),
                "fragment emitted"
            );
        }
        Ok(pending.batch.action_size())
    }
}

fn send_failure(err: SendError) -> CoreError {
    match err {
        SendError::Retry => CoreError::Retry,
        SendError::NotConnected => CoreError::NotConnected,
        SendError::Closed => CoreError::Cancelled,
    }
}
