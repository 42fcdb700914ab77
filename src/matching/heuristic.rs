use std::cmp::Ordering;

use super::{MatchLayer, MatchResult};
use crate::{
    domain::{Capability, Requirement, RulePrecedence},
    rules::{CapabilityRule, Reading, RuleSet},
};

/// Resolve the pair through the domain's capability rules.
///
/// When several rules apply, the winner is chosen according to
/// `precedence`; the lowest rule id breaks any remaining tie.
pub(super) fn heuristic(
    rules: &RuleSet,
    requirement: &Requirement,
    capability: &Capability,
    precedence: RulePrecedence,
) -> Option<MatchResult> {
    let hits = rules.lookup(capability.term(), requirement.term());
    let (rule, reading) = hits
        .into_iter()
        .max_by(|a, b| compare(a, b, precedence))?;

    tracing::trace!(rule = rule.id(), ?reading, "Rule applies");

    let how = match reading {
        Reading::Declared => rule.direction().to_string(),
        Reading::Mirrored => "mirrored".to_string(),
    };
    Some(MatchResult::hit(
        requirement,
        capability,
        MatchLayer::Heuristic,
        rule.confidence(),
        format!(
            "rule '{}' ({how}) maps '{}' to '{}'",
            rule.id(),
            capability.term(),
            requirement.term()
        ),
    ))
}

fn compare(
    (a, a_reading): &(&CapabilityRule, Reading),
    (b, b_reading): &(&CapabilityRule, Reading),
    precedence: RulePrecedence,
) -> Ordering {
    let by_reading = match precedence {
        RulePrecedence::HighestConfidence => Ordering::Equal,
        RulePrecedence::DeclaredDirectionFirst => a_reading.cmp(b_reading),
    };
    by_reading
        .then_with(|| a.confidence().total_cmp(&b.confidence()))
        // `max_by` keeps the greater element, so the lower id must compare greater
        .then_with(|| b.id().cmp(a.id()))
}

#[cfg(test)]
mod tests {
    use semver::Version;
    use test_case::test_case;

    use super::*;
    use crate::{domain::Domain, rules::Direction};

    fn domain() -> Domain {
        Domain::new("manufacturing")
    }

    fn rules(rules: Vec<CapabilityRule>) -> RuleSet {
        RuleSet::new(domain(), Version::new(1, 0, 0), "", rules).unwrap()
    }

    fn rule(id: &str, capability: &str, satisfies: &str, confidence: f64, direction: Direction) -> CapabilityRule {
        CapabilityRule::new(id, capability, [satisfies], confidence, direction, &domain()).unwrap()
    }

    #[test]
    fn synonym_rule_matches_at_its_confidence() {
        let set = rules(vec![rule(
            "cnc-synonym",
            "CNC machining",
            "Computer Numerical Control machining",
            0.95,
            Direction::Bidirectional,
        )]);
        let requirement = Requirement::new("r1", "CNC machining", domain(), "housing");
        let capability =
            Capability::new("c1", "fab-01", "Computer Numerical Control machining", domain());

        let result = heuristic(&set, &requirement, &capability, RulePrecedence::default()).unwrap();
        assert_eq!(result.layer(), MatchLayer::Heuristic);
        assert!((result.confidence() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn forward_rules_are_not_mirrored() {
        let set = rules(vec![rule("weld", "tig welding", "welding", 0.8, Direction::Forward)]);
        let requirement = Requirement::new("r1", "tig welding", domain(), "frame");
        let capability = Capability::new("c1", "fab-01", "welding", domain());
        assert!(heuristic(&set, &requirement, &capability, RulePrecedence::default()).is_none());
    }

    #[test_case(RulePrecedence::HighestConfidence, "mirror", 0.9; "highest confidence")]
    #[test_case(RulePrecedence::DeclaredDirectionFirst, "declared", 0.6; "declared direction first")]
    fn precedence_decides_between_rules(precedence: RulePrecedence, winner: &str, confidence: f64) {
        let set = rules(vec![
            rule("declared", "laser cutting", "sheet cutting", 0.6, Direction::Forward),
            rule("mirror", "sheet cutting", "laser cutting", 0.9, Direction::Bidirectional),
        ]);
        let requirement = Requirement::new("r1", "sheet cutting", domain(), "panel");
        let capability = Capability::new("c1", "fab-01", "laser cutting", domain());

        let result = heuristic(&set, &requirement, &capability, precedence).unwrap();
        assert!(result.explanation().contains(winner));
        assert!((result.confidence() - confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn ties_go_to_the_lowest_rule_id() {
        let set = rules(vec![
            rule("b", "laser cutting", "sheet cutting", 0.8, Direction::Forward),
            rule("a", "laser cutting", "sheet cutting", 0.8, Direction::Forward),
        ]);
        let requirement = Requirement::new("r1", "sheet cutting", domain(), "panel");
        let capability = Capability::new("c1", "fab-01", "laser cutting", domain());

        let result = heuristic(&set, &requirement, &capability, RulePrecedence::default()).unwrap();
        assert!(result.explanation().starts_with("rule 'a'"));
    }
}
