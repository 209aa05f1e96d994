use thiserror::Error;

use slabmarket_core::IndustryId;

use crate::principal::Principal;
use crate::roles::{Capability, capabilities};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("industry mismatch")]
    IndustryMismatch,

    #[error("forbidden: role '{role}' lacks capability '{capability:?}'")]
    Forbidden {
        role: String,
        capability: Capability,
    },
}

/// Authorize a principal against a target industry and capability.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(
    principal: &Principal,
    industry_id: IndustryId,
    capability: Capability,
) -> Result<(), AuthzError> {
    if principal.industry_id != industry_id {
        return Err(AuthzError::IndustryMismatch);
    }

    if capabilities(principal.role).contains(&capability) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            role: principal.role.to_string(),
            capability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::ActorRole;
    use slabmarket_core::UserId;

    fn principal(role: ActorRole, industry_id: IndustryId) -> Principal {
        Principal::new(UserId::new(), industry_id, role)
    }

    #[test]
    fn same_industry_with_capability_is_allowed() {
        let ind = IndustryId::new();
        let p = principal(ActorRole::InternalSeller, ind);
        authorize(&p, ind, Capability::ConfirmSales).unwrap();
    }

    #[test]
    fn missing_capability_is_forbidden() {
        let ind = IndustryId::new();
        let p = principal(ActorRole::Broker, ind);
        let err = authorize(&p, ind, Capability::AdjustStock).unwrap_err();
        assert!(matches!(err, AuthzError::Forbidden { .. }));
    }

    #[test]
    fn cross_industry_access_is_rejected_before_capability_lookup() {
        let p = principal(ActorRole::AdminIndustry, IndustryId::new());
        let err = authorize(&p, IndustryId::new(), Capability::ViewCatalog).unwrap_err();
        assert_eq!(err, AuthzError::IndustryMismatch);
    }
}
