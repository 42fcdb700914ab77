use super::{MatchLayer, MatchResult};
use crate::domain::{Capability, Requirement};

/// Normalized label equality, or equal ontology references.
pub(super) fn exact(requirement: &Requirement, capability: &Capability) -> Option<MatchResult> {
    if requirement.term() == capability.term() {
        return Some(MatchResult::hit(
            requirement,
            capability,
            MatchLayer::Exact,
            1.0,
            format!("'{}' equals '{}'", requirement.term(), capability.term()),
        ));
    }

    match (requirement.ontology(), capability.ontology()) {
        (Some(wanted), Some(offered)) if !wanted.is_empty() && wanted == offered => {
            Some(MatchResult::hit(
                requirement,
                capability,
                MatchLayer::Exact,
                1.0,
                format!("both reference ontology term {wanted}"),
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::domain::Domain;

    fn domain() -> Domain {
        Domain::new("manufacturing")
    }

    #[test_case("CNC machining", "cnc machining"; "case")]
    #[test_case("  CNC   machining ", "CNC machining"; "whitespace")]
    #[test_case("Laser Cutting", "laser cutting"; "identical after normalization")]
    fn normalized_terms_match_exactly(wanted: &str, offered: &str) {
        let requirement = Requirement::new("r1", wanted, domain(), "housing");
        let capability = Capability::new("c1", "fab-01", offered, domain());

        let result = exact(&requirement, &capability).unwrap();
        assert!(result.matched());
        assert_eq!(result.layer(), MatchLayer::Exact);
        assert!((result.confidence() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ontology_references_match() {
        let requirement = Requirement::new("r1", "5-axis milling", domain(), "housing")
            .with_ontology("https://w3id.org/okh/milling");
        let capability = Capability::new("c1", "fab-01", "CNC mill", domain())
            .with_ontology("https://w3id.org/okh/milling");
        assert!(exact(&requirement, &capability).is_some());
    }

    #[test]
    fn different_terms_do_not_match() {
        let requirement = Requirement::new("r1", "CNC machining", domain(), "housing");
        let capability =
            Capability::new("c1", "fab-01", "Computer Numerical Control machining", domain());
        assert!(exact(&requirement, &capability).is_none());
    }
}
