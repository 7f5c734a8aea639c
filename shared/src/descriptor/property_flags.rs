use bitflags::bitflags;

bitflags! {
    /// Per-property synchronization flags
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u16 {
        /// Sent along with the instance definition
        const PUSH_INITIAL = 1 << 0;
        /// Sent only after the peer asks for it
        const ON_DEMAND = 1 << 1;
        /// Flows from server to client
        const SERVER_DIRECTION = 1 << 2;
        /// Flows from client to server
        const CLIENT_DIRECTION = 1 << 3;
        /// Accepted from the peer, never sent
        const RECEIVE_ONLY = 1 << 4;
        /// Sent to the peer, never accepted
        const SEND_ONLY = 1 << 5;
        /// Never changes after initialization; no listener needed
        const CONSTANT = 1 << 6;
        /// Belongs to the type rather than to an instance
        const STATIC = 1 << 7;
        /// Resent in full when the peer's session is rebuilt
        const RESET_STATE = 1 << 8;
    }
}
