//! Session capability set consulted by the wire marshaller

/// OPEN-time negotiated capabilities.
///
/// Only the 4-byte ASN capability is modelled; it decides how AS numbers are
/// encoded in OPEN and AS_PATH. The global `--short-asn` flag clears it.
#[derive(Debug, Clone)]
pub struct Caps {
    as4: bool,
}

impl Default for Caps {
    fn default() -> Self {
        Self { as4: true }
    }
}

impl Caps {
    /// Capability set with 4-byte ASNs enabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or ban the 4-byte ASN capability
    pub fn set_as4(&mut self, enabled: bool) {
        self.as4 = enabled;
    }

    /// Whether 4-byte ASNs are in use
    #[inline]
    pub fn has_as4(&self) -> bool {
        self.as4
    }
}
