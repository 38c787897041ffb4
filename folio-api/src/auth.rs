//! Authenticated caller identity.
//!
//! Token verification happens upstream; by the time a service method runs
//! the caller has been resolved to a [`RequestContext`].

use folio_core::{AccessError, UserId, UserRole};

/// Who is making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: UserId,
    pub role: UserRole,
}

impl RequestContext {
    pub fn new(user_id: UserId, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn member(user_id: UserId) -> Self {
        Self::new(user_id, UserRole::Member)
    }

    pub fn manager(user_id: UserId) -> Self {
        Self::new(user_id, UserRole::Manager)
    }

    /// Fail unless the caller holds `role` globally.
    pub fn require_role(&self, role: UserRole) -> Result<(), AccessError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AccessError::RoleRequired {
                role: role.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_require_role() {
        let ctx = RequestContext::member(Uuid::new_v4());
        assert!(ctx.require_role(UserRole::Member).is_ok());
        assert_eq!(
            ctx.require_role(UserRole::Manager),
            Err(AccessError::RoleRequired {
                role: "MANAGER".to_string()
            })
        );
        assert!(RequestContext::manager(Uuid::new_v4())
            .require_role(UserRole::Manager)
            .is_ok());
    }
}
