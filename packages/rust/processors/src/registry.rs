//! Processor registry: the explicit, compiled-in source table.
//!
//! Registration order is dependency order — the cadastral processor creates
//! the parcel rows every parcel-keyed source upserts against, so it always
//! runs (and completes) first. Resolution of requested source identifiers
//! happens before any I/O; an unknown identifier is a configuration error,
//! not a partial-run failure.

use parcelpipe_shared::{PipelineError, Result};

use crate::{
    BuildingAncillaryLotProcessor, BuildingAreaProcessor, BuildingFloorProcessor,
    BuildingGeneralProcessor, BuildingHeaderProcessor, CadastralProcessor,
    DistrictBoundaryProcessor, GisBuildingProcessor, LandCharacteristicProcessor,
    LandForestProcessor, LandOwnershipProcessor, LandUsePlanProcessor, OfficialLandPriceProcessor,
    ProvinceBoundaryProcessor, RoadCenterLineProcessor, SourceProcessor,
    SubDistrictBoundaryProcessor, TransactionRentalProcessor, TransactionSaleProcessor,
    UseRegionDistrictProcessor,
};

/// All known processors, in dependency order.
pub fn registry() -> Vec<Box<dyn SourceProcessor>> {
    vec![
        // Parcels first: everything below references lots.pnu.
        Box::new(CadastralProcessor),
        // Administrative hierarchy, parent level before child.
        Box::new(ProvinceBoundaryProcessor),
        Box::new(DistrictBoundaryProcessor),
        Box::new(SubDistrictBoundaryProcessor),
        // Per-parcel attribute extracts.
        Box::new(LandCharacteristicProcessor),
        Box::new(LandForestProcessor),
        Box::new(LandUsePlanProcessor),
        Box::new(LandOwnershipProcessor),
        Box::new(OfficialLandPriceProcessor),
        // Building register.
        Box::new(BuildingHeaderProcessor),
        Box::new(BuildingGeneralProcessor),
        Box::new(BuildingFloorProcessor),
        Box::new(BuildingAreaProcessor),
        Box::new(BuildingAncillaryLotProcessor),
        Box::new(GisBuildingProcessor),
        // Spatial layers.
        Box::new(RoadCenterLineProcessor),
        Box::new(UseRegionDistrictProcessor),
        // Transactions (independent of parcels).
        Box::new(TransactionSaleProcessor),
        Box::new(TransactionRentalProcessor),
    ]
}

/// Resolve requested source identifiers to processors, in registry
/// (dependency) order regardless of the order requested. Fails on the first
/// unknown identifier.
pub fn resolve(requested: &[String]) -> Result<Vec<Box<dyn SourceProcessor>>> {
    let all = registry();
    let known: Vec<&'static str> = all.iter().map(|p| p.name()).collect();

    for id in requested {
        if !known.contains(&id.as_str()) {
            return Err(PipelineError::config(format!(
                "unknown source: {id} (known: {})",
                known.join(", ")
            )));
        }
    }

    Ok(all
        .into_iter()
        .filter(|p| requested.iter().any(|id| id == p.name()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadastral_registers_first() {
        let all = registry();
        assert_eq!(all[0].name(), "cadastral");
        assert!(all.len() >= 19);
    }

    #[test]
    fn identifiers_are_unique() {
        let all = registry();
        let mut names: Vec<&str> = all.iter().map(|p| p.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), all.len());
    }

    #[test]
    fn resolve_orders_by_dependency() {
        let resolved = resolve(&[
            "transaction-sale".to_string(),
            "land-use-plan".to_string(),
            "cadastral".to_string(),
        ])
        .expect("resolve");

        let names: Vec<&str> = resolved.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["cadastral", "land-use-plan", "transaction-sale"]);
    }

    #[test]
    fn unknown_source_is_config_error() {
        let err = resolve(&["cadastral".to_string(), "bogus".to_string()])
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::Config { .. }));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn parcel_keyed_sources_follow_cadastral() {
        let all = registry();
        let position = |name: &str| all.iter().position(|p| p.name() == name).unwrap();
        let cadastral = position("cadastral");
        for dependent in [
            "land-use-plan",
            "land-ownership",
            "official-land-price",
            "building-ancillary-lot",
        ] {
            assert!(position(dependent) > cadastral, "{dependent} before cadastral");
        }
    }
}
