//! Client certificate authorization
//!
//! With mutual TLS on, each route group only admits clients whose verified
//! leaf certificate carries one of the group's organizational units (OU).
//! The TLS acceptor attaches a [`ClientIdentity`] to every request on the
//! connection; [`require_ou`] checks it against an [`OuPolicy`].

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};

/// OUs allowed on the privileged routes
pub const ADMIN_OUS: &[&str] = &["titan", "monitoring", "engineering"];

/// OUs allowed on the site binding routes
pub const BINDING_OUS: &[&str] = &["titan", "monitoring", "engineering", "site"];

/// Body returned when a client certificate is not authorized
pub const FORBIDDEN_BODY: &str = "Forbidden\n";

/// What the client proved about itself during the handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    /// OUs of the verified leaf; empty without a client certificate
    pub organizational_units: Vec<String>,
}

impl ClientIdentity {
    pub fn new<I, T>(organizational_units: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            organizational_units: organizational_units.into_iter().map(Into::into).collect(),
        }
    }

    /// Identity from the certificates a client presented (leaf first)
    ///
    /// An unparsable leaf yields no OUs, which no policy admits.
    pub fn from_peer_certificates(certs: Option<&[CertificateDer<'_>]>) -> Self {
        let Some(leaf) = certs.and_then(|chain| chain.first()) else {
            return Self::default();
        };

        match x509_parser::parse_x509_certificate(leaf.as_ref()) {
            Ok((_, cert)) => Self {
                organizational_units: cert
                    .subject()
                    .iter_organizational_unit()
                    .filter_map(|ou| ou.as_str().ok())
                    .map(str::to_string)
                    .collect(),
            },
            Err(e) => {
                warn!(error = %e, "Failed to parse client certificate");
                Self::default()
            }
        }
    }
}

/// Which OUs a route group admits
#[derive(Debug, Clone, Copy)]
pub struct OuPolicy {
    pub name: &'static str,
    pub allowed: &'static [&'static str],
    /// Off when the listener does not verify client certificates
    pub enforce: bool,
}

impl OuPolicy {
    pub fn admin(enforce: bool) -> Self {
        Self {
            name: "admin",
            allowed: ADMIN_OUS,
            enforce,
        }
    }

    pub fn binding(enforce: bool) -> Self {
        Self {
            name: "binding",
            allowed: BINDING_OUS,
            enforce,
        }
    }

    pub fn allows(&self, identity: &ClientIdentity) -> bool {
        identity
            .organizational_units
            .iter()
            .any(|ou| self.allowed.contains(&ou.as_str()))
    }
}

/// Reject requests whose client certificate OU is not in the policy
pub async fn require_ou(
    State(policy): State<OuPolicy>,
    request: Request,
    next: Next,
) -> Response {
    if !policy.enforce {
        return next.run(request).await;
    }

    let identity = request.extensions().get::<ClientIdentity>().cloned();
    let authorized = identity.as_ref().is_some_and(|id| policy.allows(id));
    let ous = identity.map(|id| id.organizational_units);

    if authorized {
        debug!(policy = policy.name, ous = ?ous, "Client authorized");
        return next.run(request).await;
    }

    warn!(
        policy = policy.name,
        path = %request.uri().path(),
        ous = ?ous,
        "Client certificate not authorized"
    );
    (StatusCode::FORBIDDEN, FORBIDDEN_BODY).into_response()
}
