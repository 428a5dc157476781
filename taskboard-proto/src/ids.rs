//! Strongly-typed identifiers for boards, tasks, users, and comments.
//!
//! Every identifier wraps a [`Uuid`] and serializes transparently as its
//! hyphenated string form, which is also what row filters compare against.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new time-ordered identifier (UUID v7).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID value.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a board.
    BoardId
);
uuid_id!(
    /// Identifier of a task. Client-generated for optimistic creates.
    TaskId
);
uuid_id!(
    /// Identifier of an authenticated user (profile row id).
    UserId
);
uuid_id!(
    /// Identifier of a comment. Client-generated so the optimistic echo and
    /// the confirmed row share one identity.
    CommentId
);
uuid_id!(
    /// Identifier of a notification row.
    NotificationId
);
