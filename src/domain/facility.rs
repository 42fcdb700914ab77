use borsh::BorshSerialize;
use serde::Serialize;

use crate::{
    domain::{fingerprint::fingerprint, Capability, CapabilityId, Domain, FacilityId},
    error::InputError,
};

/// A manufacturing facility and the capabilities it offers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Facility {
    id: FacilityId,
    name: String,
    domain: Domain,
    capabilities: Vec<Capability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity: Option<u32>,
}

impl Facility {
    /// Creates a facility with no capabilities.
    #[must_use]
    pub fn new(id: impl Into<FacilityId>, name: impl Into<String>, domain: Domain) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            domain,
            capabilities: Vec::new(),
            capacity: None,
        }
    }

    /// Limit the number of units the facility can take on in one plan.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Add a capability described only by its label.
    ///
    /// The capability identifier is derived from its position, skipping
    /// identifiers that are already taken.
    #[must_use]
    pub fn with_capability(mut self, label: &str) -> Self {
        let mut index = self.capabilities.len() + 1;
        let id = loop {
            let candidate = CapabilityId::from(format!("cap-{index}"));
            if self.capability(&candidate).is_none() {
                break candidate;
            }
            index += 1;
        };
        let capability = Capability::new(id, self.id.clone(), label, self.domain.clone());
        self.capabilities.push(capability);
        self
    }

    /// Add a fully described capability.
    ///
    /// # Errors
    ///
    /// Returns an [`InputError`] if the capability belongs to another
    /// facility or reuses an existing capability identifier.
    pub fn with(mut self, capability: Capability) -> Result<Self, InputError> {
        if capability.facility() != &self.id {
            return Err(InputError::new(
                format!("facility {}: capability {}", self.id, capability.id()),
                format!("belongs to facility {}", capability.facility()),
            ));
        }
        if self.capability(capability.id()).is_some() {
            return Err(InputError::new(
                format!("facility {}: capability {}", self.id, capability.id()),
                "duplicate capability identifier",
            ));
        }
        self.capabilities.push(capability);
        Ok(self)
    }

    /// The facility's identifier.
    #[must_use]
    pub const fn id(&self) -> &FacilityId {
        &self.id
    }

    /// The facility's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The domain the facility operates in.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The capabilities the facility offers, in declaration order.
    #[must_use]
    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Look up a capability by identifier.
    #[must_use]
    pub fn capability(&self, id: &CapabilityId) -> Option<&Capability> {
        self.capabilities.iter().find(|capability| capability.id() == id)
    }

    /// The number of units the facility can take on, if limited.
    #[must_use]
    pub const fn capacity(&self) -> Option<u32> {
        self.capacity
    }

    /// Fingerprint of the facility's content.
    ///
    /// Used as the resource-state snapshot a supply tree records for every
    /// facility it relies on.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        #[derive(BorshSerialize)]
        struct FingerprintData<'a> {
            id: &'a str,
            name: &'a str,
            domain: &'a str,
            capacity: Option<u32>,
            capabilities: Vec<(&'a str, &'a str, Option<&'a str>, Option<u64>, Option<u32>)>,
        }

        fingerprint(&FingerprintData {
            id: self.id.as_str(),
            name: &self.name,
            domain: self.domain.as_str(),
            capacity: self.capacity,
            capabilities: self
                .capabilities
                .iter()
                .map(|capability| {
                    (
                        capability.id().as_str(),
                        capability.term().as_str(),
                        capability.ontology(),
                        capability.tolerance().map(f64::to_bits),
                        capability.lead_time_days(),
                    )
                })
                .collect(),
        })
    }
}
