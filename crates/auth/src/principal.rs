use serde::{Deserialize, Serialize};

use slabmarket_core::{IndustryId, UserId};

use crate::roles::ActorRole;

/// A fully resolved principal for authorization decisions.
///
/// Construction is decoupled from storage and transport: callers derive this
/// from their session/claims before dispatching commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub industry_id: IndustryId,
    pub role: ActorRole,
}

impl Principal {
    pub fn new(user_id: UserId, industry_id: IndustryId, role: ActorRole) -> Self {
        Self {
            user_id,
            industry_id,
            role,
        }
    }
}
