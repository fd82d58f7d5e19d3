//! Static plan catalog.
//!
//! Plans are configuration, not state: the reconciler only maps provider
//! price ids onto them and the quota gate only reads their limits.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::ValidationError;

/// Identifier of a plan in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::empty_field("plan_id"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A purchasable plan and the provider prices that map to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    /// Units of quota granted per billing period.
    pub quota_limit: u64,
    pub price_ids: Vec<String>,
}

impl Plan {
    pub fn accepts_price(&self, price_id: &str) -> bool {
        self.price_ids.iter().any(|p| p == price_id)
    }
}

/// Lookup table from plan ids and provider price ids to plans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
    /// Index into `plans`.
    fallback: usize,
}

static STANDARD_CATALOG: Lazy<PlanCatalog> = Lazy::new(|| PlanCatalog {
    plans: vec![
        standard_plan(
            "starter",
            "Starter",
            100,
            &["price_1PTDOEBW9IshQPOYIY96dpIY", "price_1PuUW9BW9IshQPOYxjEGWGdx"],
        ),
        standard_plan(
            "basic",
            "Basic",
            500,
            &["price_1PRPTDBW9IshQPOY344HAEeB", "price_1PuUXgBW9IshQPOYqPLPbsvn"],
        ),
        standard_plan(
            "pro",
            "Pro",
            1000,
            &["price_1PRPUnBW9IshQPOY8lWSpbpb", "price_1PXbcfBW9IshQPOYIVhgP6lD"],
        ),
    ],
    fallback: 0,
});

fn standard_plan(id: &str, name: &str, quota_limit: u64, prices: &[&str]) -> Plan {
    Plan {
        id: PlanId(id.to_string()),
        name: name.to_string(),
        quota_limit,
        price_ids: prices.iter().map(|p| p.to_string()).collect(),
    }
}

impl PlanCatalog {
    /// Builds a catalog, checking that the fallback exists and that no price
    /// id maps to two plans.
    pub fn new(plans: Vec<Plan>, fallback: PlanId) -> Result<Self, ValidationError> {
        let fallback_index = plans.iter().position(|p| p.id == fallback).ok_or_else(|| {
            ValidationError::invalid_format(
                "fallback_plan",
                format!("plan '{}' is not in the catalog", fallback),
            )
        })?;

        let mut seen: Vec<&str> = Vec::new();
        for price in plans.iter().flat_map(|p| p.price_ids.iter()) {
            if seen.contains(&price.as_str()) {
                return Err(ValidationError::invalid_format(
                    "price_ids",
                    format!("price '{}' maps to more than one plan", price),
                ));
            }
            seen.push(price);
        }

        Ok(Self {
            plans,
            fallback: fallback_index,
        })
    }

    /// The Starter / Basic / Pro catalog with monthly and yearly prices.
    pub fn standard() -> Self {
        STANDARD_CATALOG.clone()
    }

    pub fn get(&self, id: &PlanId) -> Option<&Plan> {
        self.plans.iter().find(|p| &p.id == id)
    }

    pub fn plan_for_price(&self, price_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.accepts_price(price_id))
    }

    /// Plan assigned when a checkout carries no price the catalog knows.
    pub fn fallback(&self) -> &Plan {
        &self.plans[self.fallback]
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalog_maps_monthly_and_yearly_prices() {
        let catalog = PlanCatalog::standard();

        let monthly = catalog.plan_for_price("price_1PRPTDBW9IshQPOY344HAEeB").unwrap();
        let yearly = catalog.plan_for_price("price_1PuUXgBW9IshQPOYqPLPbsvn").unwrap();

        assert_eq!(monthly.id.as_str(), "basic");
        assert_eq!(monthly, yearly);
        assert_eq!(monthly.quota_limit, 500);
    }

    #[test]
    fn standard_catalog_limits() {
        let catalog = PlanCatalog::standard();
        let limit = |id: &str| catalog.get(&PlanId::new(id).unwrap()).unwrap().quota_limit;

        assert_eq!(limit("starter"), 100);
        assert_eq!(limit("basic"), 500);
        assert_eq!(limit("pro"), 1000);
    }

    #[test]
    fn unknown_price_has_no_plan() {
        assert!(PlanCatalog::standard().plan_for_price("price_unknown").is_none());
    }

    #[test]
    fn fallback_is_starter() {
        assert_eq!(PlanCatalog::standard().fallback().id.as_str(), "starter");
    }

    #[test]
    fn new_rejects_missing_fallback() {
        let plans = vec![standard_plan("solo", "Solo", 10, &["price_a"])];
        assert!(PlanCatalog::new(plans, PlanId::new("team").unwrap()).is_err());
    }

    #[test]
    fn new_rejects_price_shared_between_plans() {
        let plans = vec![
            standard_plan("solo", "Solo", 10, &["price_a"]),
            standard_plan("team", "Team", 50, &["price_a"]),
        ];
        assert!(PlanCatalog::new(plans, PlanId::new("solo").unwrap()).is_err());
    }

    #[test]
    fn plan_id_rejects_blank() {
        assert!(PlanId::new(" ").is_err());
    }
}
