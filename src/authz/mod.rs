/// Authorization module
///
/// Permission resolution, the shared permission cache, and the request
/// guards that enforce authentication, roles, and permissions.

mod cache;
mod middleware;
mod permissions;

pub use cache::PermissionCache;
pub use middleware::{
    AuthenticatedUser, RequireAuth, RequirePermissions, RequireRole, ADMIN_ROLE,
};
pub use permissions::{PermissionResolver, PgPermissionResolver, StaticPermissionResolver};
