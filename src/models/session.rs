use zeroize::{Zeroize, ZeroizeOnDrop};

/// Lifetime of a session that has not been bound to a user yet, in seconds.
pub const FIRST_STAGE_MAX_DURATION: i64 = 60;

/// One client connection lifecycle, as persisted in the session store.
///
/// `client_key` and `server_key` are fixed at handshake time and never
/// rewritten; only `user_id` (once) and `last_accessed` change.
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionRecord {
    /// Opaque lookup key carried inside the token envelope.
    #[zeroize(skip)]
    pub token: String,
    /// `0` while the session is pre-authenticated.
    #[zeroize(skip)]
    pub user_id: i64,
    pub client_key: [u8; 32],
    pub server_key: [u8; 32],
    /// Unix timestamp of the last successful decode.
    #[zeroize(skip)]
    pub last_accessed: i64,
}

impl SessionRecord {
    /// Whether the session has been bound to a user.
    pub fn is_authenticated(&self) -> bool {
        self.user_id != 0
    }

    /// Whether the record is past its lifetime at `now`.
    ///
    /// Pre-authenticated records live for [`FIRST_STAGE_MAX_DURATION`];
    /// every record lives for `expiry` seconds when `expiry > 0`.
    pub fn is_expired(&self, now: i64, expiry: i64) -> bool {
        if !self.is_authenticated() && self.last_accessed < now - FIRST_STAGE_MAX_DURATION {
            return true;
        }
        expiry > 0 && self.last_accessed < now - expiry
    }

    /// The key material handed to the rest of the request.
    pub fn token_data(&self) -> TokenData {
        TokenData {
            client_key: self.client_key,
            server_key: self.server_key,
            user_id: self.user_id,
        }
    }
}

/// What a successfully decoded token yields.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TokenData {
    pub client_key: [u8; 32],
    pub server_key: [u8; 32],
    #[zeroize(skip)]
    pub user_id: i64,
}

/// Counts reported by one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub first_stage: u64,
    pub expired: u64,
}
