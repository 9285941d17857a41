//! Typed identifiers.
//!
//! Each id wraps a v4 UUID and serializes as its hyphenated string, so an
//! execution id printed in a log line can be pasted back into
//! `stop_script`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! ids {
    ($($(#[doc = $doc:expr])* $name:ident;)+) => {$(
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    )+};
}

ids! {
    /// An [`Event`](crate::event::Event) published on the bus.
    EventId;
    /// A handler subscription, returned by `subscribe` and needed to unsubscribe.
    HandlerId;
    /// One firing of a rule, scene, pattern, routine or fault scenario.
    InstanceId;
    /// One run of a [`Script`](crate::script::Script).
    ExecutionId;
}
