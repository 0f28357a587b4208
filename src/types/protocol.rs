use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};

/// The name of the protocol that originates the subnets of the router's own
/// interfaces.
pub const CONNECTED: &str = "connected";

//------------ ProtocolKind --------------------------------------------------

/// Whether a routing protocol is an interior or exterior gateway protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Igp,
    Egp,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Igp => write!(f, "IGP"),
            ProtocolKind::Egp => write!(f, "EGP"),
        }
    }
}

//------------ Protocol ------------------------------------------------------

/// A routing protocol instance feeding routes into the pipeline.
///
/// Two Protocol values are equal if their names are equal, regardless of
/// their kind or generation. The generation id is bumped every time the
/// instance restarts, and every route carries the Protocol value (and thus
/// the generation) that was current when the route was learned.
#[derive(Clone, Debug)]
pub struct Protocol {
    name: Arc<str>,
    kind: ProtocolKind,
    genid: u32,
}

impl Protocol {
    pub fn new(name: &str, kind: ProtocolKind) -> Self {
        Self {
            name: name.into(),
            kind,
            genid: 0,
        }
    }

    pub fn with_genid(mut self, genid: u32) -> Self {
        self.genid = genid;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProtocolKind {
        self.kind
    }

    pub fn genid(&self) -> u32 {
        self.genid
    }

    /// Whether this is the protocol of directly connected subnets.
    pub fn is_connected(&self) -> bool {
        &*self.name == CONNECTED
    }

    /// Start a new generation, returning the new generation id.
    pub(crate) fn increment_genid(&mut self) -> u32 {
        self.genid = self.genid.wrapping_add(1);
        self.genid
    }
}

impl PartialEq for Protocol {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Protocol {}

impl Hash for Protocol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/genid={}", self.name, self.kind, self.genid)
    }
}
