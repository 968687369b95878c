//! Operation codes for ChatFusion frames.
//!
//! The opcode is the single leading byte of every frame. Values are part of
//! the wire format and must never be renumbered; gaps (1, 7, 13) are codes
//! the server never receives.
//!
//! # Opcode Groups
//!
//! - `0-3`: Client session (login)
//! - `4-6`: Chat traffic (routed between servers)
//! - `8-15`: Federation (fusion negotiation and leader changes)

/// Frame operation codes
///
/// # Security
///
/// - **Unknown Opcodes**: [`Opcode::from_u8`] returns `None` for unknown
///   values. The decoder turns that into
///   [`DecodeError::UnknownOpcode`](crate::DecodeError::UnknownOpcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    // Client session (0-3)
    /// Login request without credentials
    AnonymousLogin = 0,
    /// Login accepted, carries the server name
    LoginAccepted = 2,
    /// Login refused
    LoginRefused = 3,

    // Chat traffic (4-6)
    /// Message for every logged user of the federation
    PublicMessage = 4,
    /// Message for a single user
    DirectMessage = 5,
    /// One block of a file sent to a single user
    FileBlock = 6,

    // Federation (8-15)
    /// Fusion proposal sent by a leader
    FusionInit = 8,
    /// Fusion accepted
    FusionInitOk = 9,
    /// Fusion rejected
    FusionInitKo = 10,
    /// Fusion redirected to the responder's leader
    FusionInitForward = 11,
    /// Member asks its leader to fuse with a remote server
    FusionRequest = 12,
    /// Leader announces the new federation leader to a member
    FusionChangeLeader = 14,
    /// Migrating member introduces itself to its new leader
    FusionMerge = 15,
}

impl Opcode {
    /// All opcodes, in wire order.
    pub const ALL: [Opcode; 13] = [
        Opcode::AnonymousLogin,
        Opcode::LoginAccepted,
        Opcode::LoginRefused,
        Opcode::PublicMessage,
        Opcode::DirectMessage,
        Opcode::FileBlock,
        Opcode::FusionInit,
        Opcode::FusionInitOk,
        Opcode::FusionInitKo,
        Opcode::FusionInitForward,
        Opcode::FusionRequest,
        Opcode::FusionChangeLeader,
        Opcode::FusionMerge,
    ];

    /// Convert to raw byte
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert from raw byte
    ///
    /// Returns `None` if the value is not a known opcode.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::AnonymousLogin),
            2 => Some(Self::LoginAccepted),
            3 => Some(Self::LoginRefused),
            4 => Some(Self::PublicMessage),
            5 => Some(Self::DirectMessage),
            6 => Some(Self::FileBlock),
            8 => Some(Self::FusionInit),
            9 => Some(Self::FusionInitOk),
            10 => Some(Self::FusionInitKo),
            11 => Some(Self::FusionInitForward),
            12 => Some(Self::FusionRequest),
            14 => Some(Self::FusionChangeLeader),
            15 => Some(Self::FusionMerge),
            _ => None,
        }
    }

    /// Returns true for opcodes exchanged only between servers.
    #[must_use]
    pub const fn is_federation(self) -> bool {
        matches!(
            self,
            Self::FusionInit
                | Self::FusionInitOk
                | Self::FusionInitKo
                | Self::FusionInitForward
                | Self::FusionRequest
                | Self::FusionChangeLeader
                | Self::FusionMerge
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.to_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_opcode() {
        for opcode in Opcode::ALL {
            assert_eq!(Opcode::from_u8(opcode.to_u8()), Some(opcode));
        }
    }

    #[test]
    fn rejects_gaps_and_high_values() {
        for value in [1u8, 7, 13, 16, 0x7f, 0xff] {
            assert_eq!(Opcode::from_u8(value), None);
        }
    }

    #[test]
    fn known_opcode_count_matches_table() {
        let known = (0..=u8::MAX).filter(|v| Opcode::from_u8(*v).is_some()).count();
        assert_eq!(known, Opcode::ALL.len());
    }
}
