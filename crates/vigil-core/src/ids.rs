//! Typed identifiers.
//!
//! Numeric handles are newtypes over the integer width used on the wire.
//! Server-allocated handles come from an [`IdSequence`]; client-chosen ones
//! (subscription ids, call ids, client channel ids) are taken from frames as-is.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $repr:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name($repr);

        impl $name {
            /// Wrap a raw wire value.
            pub const fn new(raw: $repr) -> Self {
                Self(raw)
            }

            /// The raw wire value.
            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl From<$repr> for $name {
            fn from(raw: $repr) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl SequentialId for $name {
            #[allow(clippy::cast_possible_truncation)]
            fn from_sequence(n: u64) -> Self {
                Self(n as $repr)
            }
        }
    };
}

numeric_id!(
    /// A connected client.
    ClientId,
    u32
);
numeric_id!(
    /// A server-advertised channel.
    ChannelId,
    u64
);
numeric_id!(
    /// A channel advertised by a client for client publishing.
    ClientChannelId,
    u32
);
numeric_id!(
    /// A client-chosen subscription handle.
    SubscriptionId,
    u32
);
numeric_id!(
    /// A registered service.
    ServiceId,
    u32
);
numeric_id!(
    /// A client-chosen service call handle.
    CallId,
    u32
);

/// Ids that can be minted from a monotonically increasing counter.
pub trait SequentialId {
    /// Build an id from the next counter value.
    fn from_sequence(n: u64) -> Self;
}

/// Lock-free allocator for server-assigned ids. Starts at 1.
pub struct IdSequence<T> {
    next: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: SequentialId> IdSequence<T> {
    /// Create a sequence whose first id is 1.
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            _marker: PhantomData,
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> T {
        T::from_sequence(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl<T: SequentialId> Default for IdSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies one run of the server. Clients drop cached state when it changes.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh, time-ordered session id.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Use a caller-provided session id.
    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
