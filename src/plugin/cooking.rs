use std::collections::BTreeSet;

use super::{DesignManifest, DomainPlugin, FacilityManifest};
use crate::{
    domain::{Design, Domain, Facility},
    error::InputError,
    supply_tree::SupplyTree,
};

/// Cooking: designs are recipes made of dishes, facilities are kitchens.
///
/// A dish must be prepared in a single kitchen.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cooking;

impl Cooking {
    /// The domain name.
    pub const NAME: &'static str = "cooking";
}

impl DomainPlugin for Cooking {
    fn domain(&self) -> Domain {
        Domain::new(Self::NAME)
    }

    fn extract_design(&self, manifest: &DesignManifest) -> Result<Design, InputError> {
        manifest.to_design(&self.domain())
    }

    fn extract_facility(&self, manifest: &FacilityManifest) -> Result<Facility, InputError> {
        manifest.to_facility(&self.domain())
    }

    fn validate(&self, tree: &SupplyTree, _design: &Design) -> Vec<String> {
        tree.workflows()
            .iter()
            .filter_map(|workflow| {
                let kitchens: BTreeSet<&str> = workflow
                    .nodes
                    .iter()
                    .map(|node| node.facility.as_str())
                    .collect();
                (kitchens.len() > 1).then(|| {
                    format!(
                        "dish {} is split across kitchens {}",
                        workflow.component,
                        kitchens.into_iter().collect::<Vec<_>>().join(", ")
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        matching::{LayeredMatcher, MatchOptions},
        rules::RuleStore,
        scoring::{FacilityScorer, ScoreBoard},
        supply_tree::SolutionAssembler,
    };

    const RECIPE: &str = r"
id: dinner
components:
  - id: risotto
    requirements:
      - label: sauteing
      - label: slow simmering
  - id: salad
    requirements:
      - label: chopping
";

    fn plan(kitchens: &str) -> (Design, SupplyTree) {
        let design = Cooking
            .extract_design(&serde_yaml::from_str(RECIPE).unwrap())
            .unwrap();
        let manifests: Vec<FacilityManifest> = serde_yaml::from_str(kitchens).unwrap();
        let facilities: Vec<Facility> = manifests
            .iter()
            .map(|manifest| Cooking.extract_facility(manifest).unwrap())
            .collect();

        let scorer =
            FacilityScorer::new(Arc::new(LayeredMatcher::new(Arc::new(RuleStore::new()))), 1)
                .unwrap();
        let board: ScoreBoard = facilities
            .iter()
            .map(|facility| {
                scorer.score_local(
                    design.requirements(),
                    facility,
                    design.domain(),
                    &MatchOptions::default(),
                )
            })
            .collect();
        let tree = SolutionAssembler::new(1)
            .assemble(&design, &facilities, &board)
            .remove(0);
        (design, tree)
    }

    #[test]
    fn one_kitchen_per_dish_passes() {
        let (design, tree) = plan(
            r"
- id: bistro
  capabilities:
    - label: sauteing
    - label: slow simmering
- id: deli
  capabilities:
    - label: chopping
",
        );
        assert!(Cooking.validate(&tree, &design).is_empty());
    }

    #[test]
    fn split_dish_is_reported() {
        let (design, tree) = plan(
            r"
- id: bistro
  capabilities:
    - label: sauteing
    - label: chopping
- id: canteen
  capabilities:
    - label: slow simmering
",
        );
        assert_eq!(
            Cooking.validate(&tree, &design),
            vec!["dish risotto is split across kitchens bistro, canteen".to_string()]
        );
    }
}
