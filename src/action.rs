//! Application-level actions and their delivery outcome.
//!
//! An action is an opaque payload tagged with an [`ActionType`]. The receive
//! path hands each completed action to the application as a
//! [`ReceivedAction`], whose [`ActionStatus`] says whether the group ordered
//! it or why it was not delivered.

use bincode::{Decode, Encode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    backend::View,
    error::CoreError,
    flow_control::FlowControlMessage,
    fragment::ActionId,
    message,
    seqno::{MemberId, Seqno},
};

/// Kind of action carried through the group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode, Serialize, Deserialize)]
pub enum ActionType {
    /// Regular replication traffic (write-sets).
    Replication,
    /// State transfer request or payload.
    StateTransfer,
    /// Application service and control messages.
    Service,
    /// Last-applied watermark announcement.
    LastApplied,
    /// Completion status of a state snapshot transfer.
    Join,
    /// Node caught up and ready to serve.
    Sync,
    /// Out-of-band receive-pressure signal. Never fragmented or ordered.
    FlowControl,
    /// Membership change reported by the backend. Never sent by members.
    Configuration,
}

impl ActionType {
    /// Whether actions of this type are assigned a sequence number.
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        !matches!(self, Self::FlowControl | Self::Configuration)
    }

    /// Whether the application may pass this type to `send`.
    #[must_use]
    pub const fn is_application(self) -> bool {
        matches!(self, Self::Replication | Self::StateTransfer | Self::Service)
    }
}

/// Reason an action was not delivered to the group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Primary-component membership was lost while the action was in flight.
    NotConnected,
    /// A view change interrupted delivery; the action must be resent.
    Restart,
}

impl From<DeliveryFailure> for CoreError {
    fn from(value: DeliveryFailure) -> Self {
        match value {
            DeliveryFailure::NotConnected => Self::NotConnected,
            DeliveryFailure::Restart => Self::Restart,
        }
    }
}

/// Final disposition of a received action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionStatus {
    /// The group ordered the action at this position.
    Ordered(Seqno),
    /// The action is informational and carries no sequence number.
    Unordered,
    /// The action was not delivered to the group.
    Failed(DeliveryFailure),
}

/// Action surfaced by [`GroupCore::recv`](crate::GroupCore::recv).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedAction {
    action_type: ActionType,
    payload: Bytes,
    size: usize,
    status: ActionStatus,
    sender: Option<MemberId>,
    action_id: Option<ActionId>,
    local: bool,
}

impl ReceivedAction {
    pub(crate) fn delivered(
        action_type: ActionType,
        payload: Bytes,
        status: ActionStatus,
        sender: MemberId,
        action_id: ActionId,
        local: bool,
    ) -> Self {
        Self {
            action_type,
            size: payload.len(),
            payload,
            status,
            sender: Some(sender),
            action_id: Some(action_id),
            local,
        }
    }

    pub(crate) fn failed(
        action_type: ActionType,
        size: usize,
        failure: DeliveryFailure,
        sender: MemberId,
        action_id: ActionId,
    ) -> Self {
        Self {
            action_type,
            payload: Bytes::new(),
            size,
            status: ActionStatus::Failed(failure),
            sender: Some(sender),
            action_id: Some(action_id),
            local: true,
        }
    }

    pub(crate) fn flow_control(sender: MemberId, payload: Bytes, local: bool) -> Self {
        Self {
            action_type: ActionType::FlowControl,
            size: payload.len(),
            payload,
            status: ActionStatus::Unordered,
            sender: Some(sender),
            action_id: None,
            local,
        }
    }

    pub(crate) fn configuration(payload: Bytes) -> Self {
        Self {
            action_type: ActionType::Configuration,
            size: payload.len(),
            payload,
            status: ActionStatus::Unordered,
            sender: None,
            action_id: None,
            local: false,
        }
    }

    /// Return the action type.
    #[must_use]
    pub const fn action_type(&self) -> ActionType { self.action_type }

    /// Borrow the reassembled payload. Empty for failed actions.
    #[must_use]
    pub fn payload(&self) -> &[u8] { &self.payload }

    /// Consume the action, returning the payload bytes.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }

    /// Size of the action in bytes.
    ///
    /// For failed actions this is the size the sender declared, so the
    /// application can account for the abandoned send.
    #[must_use]
    pub const fn size(&self) -> usize { self.size }

    /// Return the delivery status.
    #[must_use]
    pub const fn status(&self) -> ActionStatus { self.status }

    /// Return the sequence number if the group ordered this action.
    #[must_use]
    pub const fn seqno(&self) -> Option<Seqno> {
        match self.status {
            ActionStatus::Ordered(seqno) => Some(seqno),
            _ => None,
        }
    }

    /// Return the failure as an error if the action was not delivered.
    #[must_use]
    pub fn failure(&self) -> Option<CoreError> {
        match self.status {
            ActionStatus::Failed(failure) => Some(failure.into()),
            _ => None,
        }
    }

    /// Member that sent the action. `None` for configuration changes.
    #[must_use]
    pub const fn sender(&self) -> Option<MemberId> { self.sender }

    /// Sender-local identity of the action, when it came from a member.
    #[must_use]
    pub const fn action_id(&self) -> Option<ActionId> { self.action_id }

    /// Whether this session sent the action.
    #[must_use]
    pub const fn is_local(&self) -> bool { self.local }

    /// Decode the seqno carried by `LastApplied`, `Join` and `Sync` actions.
    #[must_use]
    pub fn announced_seqno(&self) -> Option<Seqno> {
        match self.action_type {
            ActionType::LastApplied | ActionType::Join | ActionType::Sync => {
                message::decode_seqno(&self.payload).ok()
            }
            _ => None,
        }
    }

    /// Decode the membership carried by a `Configuration` action.
    #[must_use]
    pub fn view(&self) -> Option<View> {
        self.decoded_configuration().map(|(view, _)| view)
    }

    /// Seqno of the last action ordered before a `Configuration` took
    /// effect. Every member of a primary view reports the same value.
    #[must_use]
    pub fn configuration_seqno(&self) -> Option<Seqno> {
        self.decoded_configuration().map(|(_, last)| last)
    }

    fn decoded_configuration(&self) -> Option<(View, Seqno)> {
        if self.action_type != ActionType::Configuration {
            return None;
        }
        message::decode_configuration(&self.payload).ok()
    }

    /// Decode the signal carried by a `FlowControl` action.
    #[must_use]
    pub fn flow_control_message(&self) -> Option<FlowControlMessage> {
        if self.action_type != ActionType::FlowControl {
            return None;
        }
        message::decode_flow_control(&self.payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(ActionType::Replication, true, true)]
    #[case(ActionType::StateTransfer, true, true)]
    #[case(ActionType::Service, true, true)]
    #[case(ActionType::LastApplied, true, false)]
    #[case(ActionType::FlowControl, false, false)]
    #[case(ActionType::Configuration, false, false)]
    fn action_type_classification(
        #[case] action_type: ActionType,
        #[case] ordered: bool,
        #[case] application: bool,
    ) {
        assert_eq!(action_type.is_ordered(), ordered);
        assert_eq!(action_type.is_application(), application);
    }

    #[test]
    fn failed_action_reports_error_and_no_seqno() {
        let action = ReceivedAction::failed(
            ActionType::Replication,
            5000,
            DeliveryFailure::NotConnected,
            MemberId::new(1),
            ActionId::new(3),
        );
        assert!(action.payload().is_empty());
        assert_eq!(action.size(), 5000);
        assert_eq!(action.seqno(), None);
        assert!(matches!(action.failure(), Some(CoreError::NotConnected)));
        assert!(action.is_local());
    }
}
