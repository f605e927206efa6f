bitflags::bitflags! {
    /// Which modifications a filter may send.
    ///
    /// Some sendmail docs call this an 'action'.
    #[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
    pub struct Capability: u32 {
        /// Add headers (SMFIR_ADDHEADER)
        const SMFIF_ADDHDRS = 0x0000_0001;
        /// Replace the body (SMFIR_REPLBODY)
        const SMFIF_CHGBODY = 0x0000_0002;
        /// Add recipients (SMFIR_ADDRCPT)
        const SMFIF_ADDRCPT = 0x0000_0004;
        /// Remove recipients (SMFIR_DELRCPT)
        const SMFIF_DELRCPT = 0x0000_0008;
        /// Change or delete headers (SMFIR_CHGHEADER)
        const SMFIF_CHGHDRS = 0x0000_0010;
        /// Quarantine message (SMFIR_QUARANTINE)
        const SMFIF_QUARANTINE = 0x0000_0020;
        /// Change the envelope sender (SMFIR_CHGFROM)
        const SMFIF_CHGFROM = 0x0000_0040;
        /// Add recipients with esmtp args (SMFIR_ADDRCPT_PAR)
        const SMFIF_ADDRCPT_PAR = 0x0000_0080;
    }
}

impl Default for Capability {
    /// Everything we know of
    fn default() -> Self {
        Capability::all()
    }
}

/// Whose view of the capabilities a check should consult
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// What the filter asked for during negotiation
    Filter,
    /// What the MTA granted during negotiation
    Mta,
    /// Both sides agree
    Both,
}

/// The capabilities each side of a milter connection brought into the
/// option negotiation.
///
/// A modification may only be sent if both bits are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilitySet {
    /// Requested by the filter
    pub requested: Capability,
    /// Offered by the MTA
    pub granted: Capability,
}

impl Default for CapabilitySet {
    /// Nothing is allowed before the MTA answered
    fn default() -> Self {
        Self::new(Capability::all(), Capability::empty())
    }
}

impl CapabilitySet {
    /// Record both sides of a negotiation
    #[must_use]
    pub fn new(requested: Capability, granted: Capability) -> Self {
        Self { requested, granted }
    }

    /// The capabilities in effect for this connection
    #[must_use]
    pub fn effective(&self) -> Capability {
        self.requested.intersection(self.granted)
    }

    /// Whether `capability` is set on `side`
    #[must_use]
    pub fn allows(&self, capability: Capability, side: Side) -> bool {
        match side {
            Side::Filter => self.requested.contains(capability),
            Side::Mta => self.granted.contains(capability),
            Side::Both => self.effective().contains(capability),
        }
    }
}
