use async_trait::async_trait;

use super::{IdentitySource, PermissionNode, PermissionResolver, ResolveError};

/// Narrow policy capability: may `subject` perform `action` on `object`?
#[async_trait]
pub trait Enforcer: Send + Sync {
    async fn check(&self, subject: i64, object: &str, action: &str) -> Result<bool, ResolveError>;
}

/// Policy backed by role-granted permission nodes.
///
/// Administrators may do anything. Unknown or disabled users may do nothing.
/// Everyone else needs an active node whose path equals `object` and whose
/// method is unset or equals `action`, ignoring case.
#[derive(Clone)]
pub struct RolePolicy {
    resolver: PermissionResolver,
}

impl RolePolicy {
    pub fn new(resolver: PermissionResolver) -> Self {
        Self { resolver }
    }
}

fn grants(node: &PermissionNode, object: &str, action: &str) -> bool {
    node.path == object
        && node
            .method
            .as_deref()
            .is_none_or(|method| method.eq_ignore_ascii_case(action))
}

#[async_trait]
impl Enforcer for RolePolicy {
    async fn check(&self, subject: i64, object: &str, action: &str) -> Result<bool, ResolveError> {
        let Some(identity) = self.resolver.identity(subject).await? else {
            return Ok(false);
        };
        if !identity.active {
            return Ok(false);
        }
        if identity.is_admin {
            return Ok(true);
        }

        let nodes = self.resolver.resolve_permissions(subject, false).await?;
        Ok(nodes.iter().any(|node| grants(node, object, action)))
    }
}
