use bitflags::bitflags;

bitflags! {
    /// Flags associated with a `Msg` indicating its role or attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MsgFlags: u8 {
        /// More message parts follow this one.
        const MORE = 0b001;
        /// Internal: indicates a protocol command frame.
        const COMMAND = 0b010;
        /// Internal: this frame carries a peer identity, not user data.
        const IDENTITY = 0b100;
    }
}
