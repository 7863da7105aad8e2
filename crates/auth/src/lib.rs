//! `clubhub-auth` — the identity trust boundary.
//!
//! Token issuance and verification, the edge decision logic, the trust-header
//! contract read by internal services, and role sets. Decoupled from HTTP and
//! storage: the API crate applies these decisions to requests.

pub mod claims;
pub mod edge;
pub mod principal;
pub mod refresh;
pub mod roles;
pub mod secret;
pub mod token;
pub mod trust;
pub mod user;

pub use claims::{TokenClaims, TokenError, validate_claims};
pub use edge::{EdgeDecision, EdgeTrustFilter, PublicPaths, Rejection, extract_bearer};
pub use principal::{AuthenticatedPrincipal, Identity, Principal};
pub use refresh::{InMemoryRefreshStore, RefreshSession, RefreshStore, RefreshToken};
pub use roles::{Role, RoleParseError, RoleSet};
pub use secret::{SecretEncoding, SigningSecret};
pub use token::{IssuedTokens, TokenConfig, TokenService};
pub use trust::{TrustHeaders, parse_authorities, principal_from_headers};
pub use user::{DEFAULT_BCRYPT_COST, PasswordHash, UserAccount, UserStatus, normalize_email};
