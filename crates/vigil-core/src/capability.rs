//! Server capabilities and the bitset used to gate requests.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A feature the server advertises in `serverInfo`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// Clients may advertise channels and publish message data.
    ClientPublish,
    /// Clients may get and set parameters.
    Parameters,
    /// Clients may subscribe to parameter updates.
    ParametersSubscribe,
    /// The server broadcasts its clock.
    Time,
    /// Clients may call services.
    Services,
    /// Clients may subscribe to connection graph updates.
    ConnectionGraph,
    /// Clients may fetch assets by URI.
    Assets,
}

impl Capability {
    /// Every capability, in bit order.
    pub const ALL: [Capability; 7] = [
        Capability::ClientPublish,
        Capability::Parameters,
        Capability::ParametersSubscribe,
        Capability::Time,
        Capability::Services,
        Capability::ConnectionGraph,
        Capability::Assets,
    ];

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }

    /// Wire name, as sent in `serverInfo.capabilities`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Capability::ClientPublish => "clientPublish",
            Capability::Parameters => "parameters",
            Capability::ParametersSubscribe => "parametersSubscribe",
            Capability::Time => "time",
            Capability::Services => "services",
            Capability::ConnectionGraph => "connectionGraph",
            Capability::Assets => "assets",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fixed set of capabilities. Checking membership is a single mask test.
#[derive(Clone, Copy, Default, Hash, Eq, PartialEq)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether `cap` is in the set.
    pub const fn contains(self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    /// Add a capability.
    pub fn insert(&mut self, cap: Capability) {
        self.0 |= cap.bit();
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, cap: Capability) -> Self {
        self.insert(cap);
        self
    }

    /// Whether the set is empty.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate members in bit order.
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::empty();
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for CapabilitySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let caps = Vec::<Capability>::deserialize(deserializer)?;
        Ok(caps.into_iter().collect())
    }
}
