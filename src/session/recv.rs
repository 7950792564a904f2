//! Receive path: backend events in, ordered actions out.
//!
//! A primary view that changes the group identity starts a state exchange.
//! Completed actions are held back until every member has announced its
//! last seqno; the configuration action and the held actions are then
//! released, numbered after the highest announced seqno.

use std::{collections::VecDeque, num::NonZeroUsize, sync::Arc, time::Duration};

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use super::{Connection, GroupCore, lock};
use crate::{
    action::{ActionStatus, ActionType, DeliveryFailure, ReceivedAction},
    backend::{BackendEvent, SendError, View},
    error::{CoreError, Result},
    flow_control::FlowMonitor,
    fragment::{AbandonedAction, Defragmenter, ReassembledAction},
    message::{
        CoreMessage,
        decode_flow_control,
        decode_message,
        decode_seqno,
        encode_configuration,
        encode_state,
    },
    metrics,
    seqno::{MemberId, Seqno},
    sequencer::{Sequencer, StateExchange},
};

/// Pause before offering a refused state message again.
const STATE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Completed action waiting for the group to agree on a base seqno.
struct HeldAction {
    action: ReassembledAction,
    local: bool,
}

pub(super) struct RecvState {
    events: Option<mpsc::Receiver<BackendEvent>>,
    defragmenter: Defragmenter,
    sequencer: Sequencer,
    exchange: Option<StateExchange<HeldAction>>,
    ready: VecDeque<ReceivedAction>,
    monitor: FlowMonitor,
    fresh_monitor: FlowMonitor,
}

impl RecvState {
    pub(super) fn new(max_action_size: NonZeroUsize, monitor: FlowMonitor) -> Self {
        Self {
            events: None,
            defragmenter: Defragmenter::new(max_action_size),
            sequencer: Sequencer::new(),
            exchange: None,
            ready: VecDeque::new(),
            monitor,
            fresh_monitor: monitor,
        }
    }

    pub(super) fn seed(&mut self, sequencer: Sequencer) { self.sequencer = sequencer; }

    /// Start consuming a new backend link, discarding leftovers of the last.
    pub(super) fn attach(&mut self, events: mpsc::Receiver<BackendEvent>) {
        let stale = self.defragmenter.drop_all();
        if !stale.is_empty() {
            debug!("discarded {} partial actions from previous connection", stale.len());
        }
        self.events = Some(events);
        self.exchange = None;
        self.ready.clear();
        self.monitor = self.fresh_monitor;
    }

    /// Stop consuming the backend link so the backend sees the queue close.
    pub(super) fn detach(&mut self) {
        self.events = None;
        self.exchange = None;
    }

    fn backlog(&self) -> usize {
        self.ready.len()
            + self.exchange.as_ref().map_or(0, StateExchange::held_len)
            + self.events.as_ref().map_or(0, mpsc::Receiver::len)
    }
}

/// Multicast the state messages queued by `recv`, in order, until the
/// connection is cancelled.
pub(super) async fn forward_states(
    connection: Arc<Connection>,
    mut queued: mpsc::UnboundedReceiver<Bytes>,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = connection.cancel.cancelled() => return,
            message = queued.recv() => message,
        };
        let Some(message) = message else {
            return;
        };
        loop {
            let outcome = tokio::select! {
                biased;
                () = connection.cancel.cancelled() => return,
                outcome = connection.multicast.multicast(message.clone()) => outcome,
            };
            match outcome {
                Ok(()) => break,
                Err(SendError::Retry) => tokio::select! {
                    biased;
                    () = connection.cancel.cancelled() => return,
                    () = tokio::time::sleep(STATE_RETRY_DELAY) => {}
                },
                Err(err) => {
                    // A later view restarts the exchange.
                    debug!("state message not sent: {err}");
                    break;
                }
            }
        }
    }
}

impl From<HeldAction> for AbandonedAction {
    fn from(held: HeldAction) -> Self {
        let size = held.action.payload().len();
        Self {
            sender: held.action.sender(),
            action_id: held.action.action_id(),
            action_type: held.action.action_type(),
            declared_size: u64::try_from(size).unwrap_or(u64::MAX),
            received: size,
        }
    }
}

impl GroupCore {
    /// Wait for the next action in group order.
    ///
    /// Ordered actions carry [`ActionStatus::Ordered`] with strictly
    /// increasing seqnos. Local actions cut short by membership changes are
    /// reported with [`ActionStatus::Failed`] before any action of the
    /// following view. Flow-control signals and membership views are surfaced
    /// as unordered actions.
    ///
    /// After a new primary group forms, its configuration action and every
    /// later action wait until each member has announced its ordering state,
    /// so every member must keep calling `recv`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] when the session is closed, including
    /// while the call is blocked, and [`CoreError::NotConnected`] if the
    /// backend stops delivering events.
    pub async fn recv(&self) -> Result<ReceivedAction> {
        let connection = self.connection("recv")?;
        let mut receiver = tokio::select! {
            biased;
            () = connection.cancel.cancelled() => return Err(CoreError::Cancelled),
            guard = self.receiver.lock() => guard,
        };

        loop {
            if connection.cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            if let Some(action) = receiver.ready.pop_front() {
                self.observe_backlog(&mut receiver);
                metrics::inc_actions_received(match action.status() {
                    ActionStatus::Failed(_) => metrics::Outcome::Failed,
                    _ => metrics::Outcome::Delivered,
                });
                return Ok(action);
            }

            let Some(events) = receiver.events.as_mut() else {
                return Err(CoreError::NotConnected);
            };
            let event = tokio::select! {
                biased;
                () = connection.cancel.cancelled() => return Err(CoreError::Cancelled),
                event = events.recv() => event,
            };
            let Some(event) = event else {
                warn!("{}: backend event queue closed", self.node_name);
                receiver.events = None;
                return Err(CoreError::NotConnected);
            };
            self.handle_event(&mut receiver, &connection, event);
        }
    }

    fn observe_backlog(&self, receiver: &mut RecvState) {
        let backlog = u64::try_from(receiver.backlog()).unwrap_or(u64::MAX);
        if let Some(signal) = receiver.monitor.observe(backlog) {
            debug!(
                "{}: receive backlog {backlog} calls for pause={}",
                self.node_name,
                signal.is_pause()
            );
            *lock(&self.flow_signal) = Some(signal);
        }
    }

    fn handle_event(&self, receiver: &mut RecvState, connection: &Connection, event: BackendEvent) {
        match event {
            BackendEvent::Message { sender, payload } => {
                self.handle_message(receiver, connection, sender, &payload);
            }
            BackendEvent::View(view) => self.handle_view(receiver, connection, view),
            BackendEvent::MemberLost(member) => self.handle_member_lost(receiver, connection, member),
        }
    }

    fn handle_message(
        &self,
        receiver: &mut RecvState,
        connection: &Connection,
        sender: MemberId,
        bytes: &[u8],
    ) {
        let message = match decode_message(bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!("dropping undecodable message from {sender}: {err}");
                return;
            }
        };
        let local = sender == connection.local;

        match message {
            CoreMessage::Fragment { header, payload } => {
                if !header.action_type().is_ordered() {
                    warn!(
                        "dropping fragment of unorderable {:?} action from {sender}",
                        header.action_type()
                    );
                    return;
                }
                match receiver.defragmenter.push(sender, header, payload) {
                    Ok(Some(action)) => self.deliver(receiver, action, local),
                    Ok(None) => {}
                    Err(err) => warn!("discarding fragment: {err}"),
                }
            }
            CoreMessage::FlowControl { body } => {
                if let Ok(message) = decode_flow_control(body) {
                    if message.is_pause() {
                        metrics::inc_flow_control_pauses();
                    }
                    self.flow_gate.apply(sender, message);
                }
                receiver.ready.push_back(ReceivedAction::flow_control(
                    sender,
                    Bytes::copy_from_slice(body),
                    local,
                ));
            }
            CoreMessage::State { group, last } => {
                let complete = receiver
                    .exchange
                    .as_mut()
                    .is_some_and(|exchange| exchange.record(sender, group, last));
                if complete {
                    self.finish_exchange(receiver);
                }
            }
        }
    }

    fn deliver(&self, receiver: &mut RecvState, action: ReassembledAction, local: bool) {
        if let Some(exchange) = receiver.exchange.as_mut() {
            exchange.hold(HeldAction { action, local });
            return;
        }
        self.number(receiver, action, local);
    }

    fn number(&self, receiver: &mut RecvState, action: ReassembledAction, local: bool) {
        let seqno = receiver.sequencer.assign();
        if action.action_type() == ActionType::LastApplied {
            match decode_seqno(action.payload()) {
                Ok(applied) => self.last_applied.record(action.sender(), applied),
                Err(err) => warn!("malformed last-applied from {}: {err}", action.sender()),
            }
        }
        let (sender, action_id, action_type) =
            (action.sender(), action.action_id(), action.action_type());
        receiver.ready.push_back(ReceivedAction::delivered(
            action_type,
            action.into_payload(),
            ActionStatus::Ordered(seqno),
            sender,
            action_id,
            local,
        ));
    }

    fn handle_view(&self, receiver: &mut RecvState, connection: &Connection, view: View) {
        let group_changed = receiver.sequencer.observe_group(view.group());
        let abandoned = if group_changed {
            receiver.defragmenter.drop_all()
        } else {
            receiver.defragmenter.retain_members(view.members())
        };
        let primary = view.is_primary() && view.contains(connection.local);
        let failure = if primary {
            DeliveryFailure::Restart
        } else {
            DeliveryFailure::NotConnected
        };
        for action in abandoned {
            Self::abandon(receiver, connection, action, failure);
        }
        if let Some(interrupted) = receiver.exchange.take() {
            debug!(
                "{}: state exchange for {} interrupted",
                self.node_name,
                interrupted.group()
            );
            for held in interrupted.abandon() {
                Self::abandon(receiver, connection, held.into(), failure);
            }
        }

        self.flow_gate.retain(view.members());
        self.last_applied.retain(view.members());
        info!(
            "{}: view installed: group={}, primary={}, members={}",
            self.node_name,
            view.group(),
            view.is_primary(),
            view.members().len()
        );
        *lock(&self.membership) = super::Membership {
            view: Some(view.clone()),
            primary,
        };

        if primary && group_changed {
            self.start_exchange(receiver, connection, view);
        } else {
            let last = receiver.sequencer.last();
            Self::push_configuration(receiver, &view, last);
        }
    }

    fn start_exchange(&self, receiver: &mut RecvState, connection: &Connection, view: View) {
        let (group, last) = (view.group(), receiver.sequencer.last());
        match encode_state(group, last) {
            Ok(message) => {
                if connection.states.send(message).is_err() {
                    debug!("{}: state forwarder already stopped", self.node_name);
                }
            }
            Err(err) => warn!("failed to encode state for {group}: {err}"),
        }
        debug!("{}: announcing seqno {last} to group {group}", self.node_name);
        receiver.exchange = Some(StateExchange::new(view));
    }

    fn finish_exchange(&self, receiver: &mut RecvState) {
        let Some(exchange) = receiver.exchange.take() else {
            return;
        };
        let (view, agreed, held) = exchange.finish();
        receiver.sequencer.resume_after(agreed);
        info!(
            "{}: group {} agreed on seqno {agreed}; releasing {} held actions",
            self.node_name,
            view.group(),
            held.len()
        );
        let last = receiver.sequencer.last();
        Self::push_configuration(receiver, &view, last);
        for HeldAction { action, local } in held {
            self.number(receiver, action, local);
        }
    }

    fn push_configuration(receiver: &mut RecvState, view: &View, last: Seqno) {
        match encode_configuration(view, last) {
            Ok(payload) => receiver
                .ready
                .push_back(ReceivedAction::configuration(payload)),
            Err(err) => warn!("failed to encode view for delivery: {err}"),
        }
    }

    fn handle_member_lost(&self, receiver: &mut RecvState, connection: &Connection, member: MemberId) {
        if let Some(action) = receiver.defragmenter.drop_member(member) {
            Self::abandon(receiver, connection, action, DeliveryFailure::NotConnected);
        }
        if member == connection.local {
            warn!("{}: local member {member} lost from the group", self.node_name);
            lock(&self.membership).primary = false;
            return;
        }
        info!("{}: member {member} lost", self.node_name);
        self.flow_gate.forget(member);
        self.last_applied.remove(member);
        let complete = receiver
            .exchange
            .as_mut()
            .is_some_and(|exchange| exchange.forget(member));
        if complete {
            self.finish_exchange(receiver);
        }
    }

    fn abandon(
        receiver: &mut RecvState,
        connection: &Connection,
        action: AbandonedAction,
        failure: DeliveryFailure,
    ) {
        if action.sender != connection.local {
            info!(
                "dropped partial action {} from {} ({}/{} bytes)",
                action.action_id, action.sender, action.received, action.declared_size
            );
            return;
        }
        debug!(
            "local action {} failed with {failure:?} after {}/{} bytes",
            action.action_id, action.received, action.declared_size
        );
        receiver.ready.push_back(ReceivedAction::failed(
            action.action_type,
            usize::try_from(action.declared_size).unwrap_or(usize::MAX),
            failure,
            action.sender,
            action.action_id,
        ));
    }
}
