#![doc(html_root_url = "https://docs.rs/groupframe/latest")]
//! Public API for the `groupframe` library.
//!
//! This crate provides the group-communication core of a replication
//! stack: it fragments actions to fit the backend's packet size, reassembles
//! them per sender, numbers them in the group's total order, reports actions
//! cut short by membership changes, and carries flow-control signals between
//! members. The membership and transport layer plugs in through the
//! [`Backend`] trait; [`MemoryGroup`] provides an in-process implementation.

pub mod action;
pub mod backend;
pub mod config;
pub mod emission;
pub mod error;
pub mod flow_control;
pub mod fragment;
pub mod message;
pub mod metrics;
#[cfg(unix)]
pub mod poll;
pub mod seqno;
pub mod sequencer;
pub mod session;

pub use action::{ActionStatus, ActionType, DeliveryFailure, ReceivedAction};
pub use backend::{
    Backend,
    BackendEvent,
    BackendLink,
    ConnectError,
    ConnectOptions,
    MemoryGroup,
    Multicast,
    SendError,
    View,
};
pub use config::CoreConfig;
#[cfg(any(test, feature = "test-helpers"))]
pub use emission::Stepper;
pub use emission::EmissionPolicy;
pub use error::{CoreError, Result};
pub use flow_control::{FlowControlMessage, FlowGate, FlowMonitor};
pub use fragment::{
    ActionId,
    Defragmenter,
    FragmentBatch,
    FragmentHeader,
    FragmentIndex,
    FragmentSizing,
    Fragmenter,
    ReassembledAction,
};
pub use seqno::{GroupId, MemberId, Seqno};
pub use sequencer::{LastAppliedTable, Sequencer, StateExchange};
pub use session::{ConnectionState, GroupCore, SendPath};
