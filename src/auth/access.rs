//! Role routing.
//!
//! Every guarded page and API call goes through [`decide`]. The rules:
//!
//! - Public areas are always allowed.
//! - Without a principal, admin pages redirect to `/login?next=/admin` and
//!   client pages to `/login?next=/portal`.
//! - A client principal in the admin area is sent to `/portal`; an admin
//!   principal in the client area is sent to `/admin`.
//! - Disabled accounts and expired sessions never produce a principal, so
//!   they land in the unauthenticated branch.
//! - A client principal only ever addresses its own client, see
//!   [`tenant_scope`].

use uuid::Uuid;

use crate::auth::Principal;
use crate::db::Role;

/// Coarse area of the application a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Public,
    Admin,
    Client,
}

impl Area {
    /// Landing page of the area.
    pub fn root_path(self) -> &'static str {
        match self {
            Self::Public => "/login",
            Self::Admin => "/admin",
            Self::Client => "/portal",
        }
    }

    /// Area a request path belongs to.
    pub fn for_path(path: &str) -> Self {
        let in_prefix = |prefix: &str| {
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        };
        if in_prefix("/admin") || in_prefix("/api/admin") {
            Self::Admin
        } else if in_prefix("/portal") || in_prefix("/api/portal") {
            Self::Client
        } else {
            Self::Public
        }
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No valid session.
    Unauthenticated,
    /// Valid session, wrong role for the area.
    WrongRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect { to: String, reason: DenyReason },
}

impl RouteDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Landing page for a role, used after login and on role mismatches.
pub fn home_path(role: Role) -> &'static str {
    match role {
        Role::Admin => Area::Admin.root_path(),
        Role::Client => Area::Client.root_path(),
    }
}

fn login_redirect(area: Area) -> RouteDecision {
    RouteDecision::Redirect {
        to: format!("/login?next={}", area.root_path()),
        reason: DenyReason::Unauthenticated,
    }
}

/// Decide whether `principal` may enter `area`.
pub fn decide(principal: Option<&Principal>, area: Area) -> RouteDecision {
    match (area, principal) {
        (Area::Public, _) => RouteDecision::Allow,
        (_, None) => login_redirect(area),
        (Area::Admin, Some(p)) if p.role == Role::Admin => RouteDecision::Allow,
        (Area::Client, Some(p)) if p.role == Role::Client && p.client_id.is_some() => {
            RouteDecision::Allow
        }
        // A client account without a client is unusable; treat it as signed out.
        (Area::Client, Some(p)) if p.role == Role::Client => login_redirect(area),
        (_, Some(p)) => RouteDecision::Redirect {
            to: home_path(p.role).to_string(),
            reason: DenyReason::WrongRole,
        },
    }
}

/// Client a request may operate on.
///
/// Admins address whatever client they ask for. Client principals are pinned
/// to their own client no matter what the request named; `None` means the
/// principal has no tenant at all and must be refused.
pub fn tenant_scope(principal: &Principal, requested: Option<Uuid>) -> Option<Uuid> {
    match principal.role {
        Role::Admin => requested,
        Role::Client => principal.client_id,
    }
}

/// Whether `principal` may read or write data owned by `client_id`.
pub fn can_access_client(principal: &Principal, client_id: Uuid) -> bool {
    match principal.role {
        Role::Admin => true,
        Role::Client => principal.client_id == Some(client_id),
    }
}

/// Where to send a freshly logged-in principal.
///
/// Honors `next` only when it is a local path inside the principal's own
/// area, otherwise falls back to [`home_path`].
pub fn post_login_path(role: Role, next: Option<&str>) -> String {
    let home = home_path(role);
    let Some(next) = next.map(str::trim) else {
        return home.to_string();
    };
    let local = next.starts_with('/') && !next.starts_with("//") && !next.contains('\\');
    let own_area = match role {
        Role::Admin => Area::for_path(next) == Area::Admin,
        Role::Client => Area::for_path(next) == Area::Client,
    };
    if local && own_area {
        next.to_string()
    } else {
        home.to_string()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn principal(role: Role, client_id: Option<Uuid>) -> Principal {
        Principal {
            account_id: Uuid::new_v4(),
            role,
            client_id,
            email: "someone@example.com".to_string(),
            display_name: "Someone".to_string(),
        }
    }

    #[test]
    fn anonymous_is_sent_to_login_with_next() {
        assert_eq!(
            decide(None, Area::Admin),
            RouteDecision::Redirect {
                to: "/login?next=/admin".to_string(),
                reason: DenyReason::Unauthenticated,
            }
        );
        assert_eq!(
            decide(None, Area::Client),
            RouteDecision::Redirect {
                to: "/login?next=/portal".to_string(),
                reason: DenyReason::Unauthenticated,
            }
        );
    }

    #[test]
    fn client_in_admin_area_goes_to_portal() {
        let client = principal(Role::Client, Some(Uuid::new_v4()));
        assert_eq!(
            decide(Some(&client), Area::Admin),
            RouteDecision::Redirect {
                to: "/portal".to_string(),
                reason: DenyReason::WrongRole,
            }
        );
        assert!(decide(Some(&client), Area::Client).is_allowed());
    }

    #[test]
    fn admin_in_client_area_goes_to_admin() {
        let admin = principal(Role::Admin, None);
        assert_eq!(
            decide(Some(&admin), Area::Client),
            RouteDecision::Redirect {
                to: "/admin".to_string(),
                reason: DenyReason::WrongRole,
            }
        );
        assert!(decide(Some(&admin), Area::Admin).is_allowed());
    }

    #[test]
    fn public_is_always_allowed() {
        assert!(decide(None, Area::Public).is_allowed());
        assert!(decide(Some(&principal(Role::Admin, None)), Area::Public).is_allowed());
        assert!(
            decide(Some(&principal(Role::Client, Some(Uuid::new_v4()))), Area::Public)
                .is_allowed()
        );
    }

    #[test]
    fn client_without_tenant_is_treated_as_signed_out() {
        let orphan = principal(Role::Client, None);
        assert_eq!(
            decide(Some(&orphan), Area::Client),
            RouteDecision::Redirect {
                to: "/login?next=/portal".to_string(),
                reason: DenyReason::Unauthenticated,
            }
        );
    }

    #[test]
    fn client_scope_ignores_requested_ids() {
        let own = Uuid::new_v4();
        let other = Uuid::new_v4();
        let client = principal(Role::Client, Some(own));
        assert_eq!(tenant_scope(&client, Some(other)), Some(own));
        assert_eq!(tenant_scope(&client, None), Some(own));
        assert!(can_access_client(&client, own));
        assert!(!can_access_client(&client, other));

        let admin = principal(Role::Admin, None);
        assert_eq!(tenant_scope(&admin, Some(other)), Some(other));
        assert_eq!(tenant_scope(&admin, None), None);
        assert!(can_access_client(&admin, other));
    }

    #[test]
    fn area_for_path() {
        assert_eq!(Area::for_path("/admin"), Area::Admin);
        assert_eq!(Area::for_path("/admin/clients"), Area::Admin);
        assert_eq!(Area::for_path("/api/admin/tasks"), Area::Admin);
        assert_eq!(Area::for_path("/administrator"), Area::Public);
        assert_eq!(Area::for_path("/portal"), Area::Client);
        assert_eq!(Area::for_path("/api/portal/chat"), Area::Client);
        assert_eq!(Area::for_path("/login"), Area::Public);
        assert_eq!(Area::for_path("/api/health"), Area::Public);
    }

    #[test]
    fn post_login_path_only_honors_own_area() {
        assert_eq!(post_login_path(Role::Admin, None), "/admin");
        assert_eq!(post_login_path(Role::Client, None), "/portal");
        assert_eq!(
            post_login_path(Role::Admin, Some("/admin/clients")),
            "/admin/clients"
        );
        assert_eq!(post_login_path(Role::Client, Some("/admin")), "/portal");
        assert_eq!(post_login_path(Role::Admin, Some("/portal")), "/admin");
        assert_eq!(
            post_login_path(Role::Admin, Some("//evil.example/admin")),
            "/admin"
        );
        assert_eq!(
            post_login_path(Role::Client, Some("https://evil.example/portal")),
            "/portal"
        );
    }
}
