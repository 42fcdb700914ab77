use tracing::debug;

use super::{DesignManifest, DomainPlugin, FacilityManifest};
use crate::{
    domain::{Capability, Design, Domain, Facility, Requirement},
    error::InputError,
    matching::MatchResult,
};

/// Hardware manufacturing: designs are bills of process, facilities are
/// workshops and fabs.
///
/// A capability whose tolerance is coarser than a requirement's cannot
/// satisfy it, however well the labels match.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manufacturing;

impl Manufacturing {
    /// The domain name.
    pub const NAME: &'static str = "manufacturing";
}

impl DomainPlugin for Manufacturing {
    fn domain(&self) -> Domain {
        Domain::new(Self::NAME)
    }

    fn extract_design(&self, manifest: &DesignManifest) -> Result<Design, InputError> {
        manifest.to_design(&self.domain())
    }

    fn extract_facility(&self, manifest: &FacilityManifest) -> Result<Facility, InputError> {
        manifest.to_facility(&self.domain())
    }

    fn refine(
        &self,
        requirement: &Requirement,
        capability: &Capability,
        result: MatchResult,
    ) -> MatchResult {
        if !result.matched() {
            return result;
        }
        match (requirement.tolerance(), capability.tolerance()) {
            (Some(required), Some(held)) if held > required => {
                debug!(
                    requirement = %requirement.id(),
                    capability = %capability.id(),
                    required,
                    held,
                    "Tolerance too coarse"
                );
                result.rejected(format!(
                    "capability holds a tolerance of {held}, coarser than the required {required}"
                ))
            }
            _ => result,
        }
    }
}
