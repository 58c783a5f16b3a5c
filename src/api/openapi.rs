use super::handlers::{admin, auth, health, users};
use crate::auth::gate::{admin_required, require_auth, self_or_admin_required, user_required};
use axum::middleware::from_fn;
use utoipa::openapi::{
    ComponentsBuilder, Contact, InfoBuilder, License, OpenApiBuilder, Tag,
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Routes are grouped by gate. Role gates are attached first so they run after
/// `require_auth`, which wraps every protected group.
pub(crate) fn api_router() -> OpenApiRouter {
    let public = OpenApiRouter::new()
        .routes(routes!(health::health))
        .routes(routes!(auth::admin_login))
        .routes(routes!(auth::user_login))
        .routes(routes!(auth::device_login))
        .routes(routes!(auth::refresh))
        .routes(routes!(auth::register));

    let authenticated = OpenApiRouter::new()
        .routes(routes!(auth::logout))
        .routes(routes!(auth::me));

    let user_only = OpenApiRouter::new()
        .routes(routes!(auth::change_password))
        .route_layer(from_fn(user_required));

    let self_or_admin = OpenApiRouter::new()
        .routes(routes!(users::get_user))
        .route_layer(from_fn(self_or_admin_required));

    let admin_only = OpenApiRouter::new()
        .routes(routes!(admin::dashboard))
        .routes(routes!(admin::provision_device))
        .routes(routes!(admin::reset_device_key))
        .routes(routes!(admin::reset_user_password))
        .routes(routes!(admin::revoke_sessions))
        .route_layer(from_fn(admin_required));

    let protected = authenticated
        .merge(user_only)
        .merge(self_or_admin)
        .merge(admin_only)
        .route_layer(from_fn(require_auth));

    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .merge(public)
        .merge(protected);

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and build information".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Sign-in, refresh and logout".to_string());

    let mut users_tag = Tag::new("users");
    users_tag.description = Some("User profiles".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("Provisioning and credential resets".to_string());

    router.get_openapi_mut().tags = Some(vec![health_tag, auth_tag, users_tag, admin_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    let components = ComponentsBuilder::new()
        .security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        )
        .build();

    OpenApiBuilder::new()
        .info(info)
        .components(Some(components))
        .build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let primary = env!("CARGO_PKG_AUTHORS").split(';').next().map(str::trim)?;
    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (
            optional_str(name),
            optional_str(email.trim_end_matches('>')),
        ),
        None => (optional_str(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));

        let contact = spec.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Custodia"));
            assert_eq!(contact.email.as_deref(), Some("team@custodia.dev"));
        }

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
        }
    }

    #[test]
    fn openapi_documents_every_route() {
        let spec = openapi();
        for path in [
            "/health",
            "/api/v1/auth/login",
            "/api/v1/auth/refresh",
            "/api/v1/auth/device",
            "/api/v1/auth/logout",
            "/api/v1/auth/me",
            "/api/v1/user/auth/register",
            "/api/v1/user/auth/login",
            "/api/v1/user/auth/change-password",
            "/api/v1/users/{id}",
            "/api/v1/admin/dashboard",
            "/api/v1/admin/devices",
            "/api/v1/admin/devices/{id}/reset-key",
            "/api/v1/admin/users/{id}/reset-password",
            "/api/v1/admin/principals/{kind}/{id}/revoke",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn openapi_declares_bearer_scheme() {
        let spec = openapi();
        let schemes = spec
            .components
            .map(|components| components.security_schemes)
            .unwrap_or_default();
        assert!(schemes.contains_key("bearer_auth"));
    }

    #[test]
    fn author_parsing() {
        assert_eq!(
            parse_author("Ada <ada@example.com>"),
            (Some("Ada"), Some("ada@example.com"))
        );
        assert_eq!(parse_author("Ada"), (Some("Ada"), None));
        assert_eq!(parse_author(""), (None, None));
    }
}
