use derive_more::Display;

/// Lifecycle position of a [`GroupCore`](crate::GroupCore).
///
/// Transitions are owned by the session: `create` yields [`Created`], `init`
/// moves to [`Initialized`], `open` to [`Open`], `close` to [`Closed`] and
/// `destroy` to [`Destroyed`]. A closed session may be initialised and opened
/// again.
///
/// [`Created`]: ConnectionState::Created
/// [`Initialized`]: ConnectionState::Initialized
/// [`Open`]: ConnectionState::Open
/// [`Closed`]: ConnectionState::Closed
/// [`Destroyed`]: ConnectionState::Destroyed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
pub enum ConnectionState {
    #[display("created")]
    Created,
    #[display("initialized")]
    Initialized,
    #[display("open")]
    Open,
    #[display("closed")]
    Closed,
    #[display("destroyed")]
    Destroyed,
}

impl ConnectionState {
    /// Whether `init` is accepted in this state.
    #[must_use]
    pub const fn accepts_init(self) -> bool {
        matches!(self, Self::Created | Self::Initialized | Self::Closed)
    }

    /// Whether `open` is accepted in this state.
    #[must_use]
    pub const fn accepts_open(self) -> bool {
        matches!(self, Self::Created | Self::Initialized | Self::Closed)
    }
}
