use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix every role authority carries, on the wire and in tokens.
pub const ROLE_PREFIX: &str = "ROLE_";

/// Closed set of portal roles.
///
/// On the wire (tokens, trust headers, fact payloads) a role is a flat string
/// such as `ROLE_CLUB_PRESIDENT`. Inside a service it is always this enum; a
/// string that does not match is a [`RoleParseError`] and the caller decides
/// whether to drop it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    Admin,
    Student,
    AcademicAdvisor,
    PendingAcademicAdvisor,
    ClubPresident,
    PendingClubPresident,
    ClubOfficial,
    StudentAffairs,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct RoleParseError(pub String);

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Admin,
        Role::Student,
        Role::AcademicAdvisor,
        Role::PendingAcademicAdvisor,
        Role::ClubPresident,
        Role::PendingClubPresident,
        Role::ClubOfficial,
        Role::StudentAffairs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ROLE_ADMIN",
            Role::Student => "ROLE_STUDENT",
            Role::AcademicAdvisor => "ROLE_ACADEMIC_ADVISOR",
            Role::PendingAcademicAdvisor => "ROLE_PENDING_ACADEMIC_ADVISOR",
            Role::ClubPresident => "ROLE_CLUB_PRESIDENT",
            Role::PendingClubPresident => "ROLE_PENDING_CLUB_PRESIDENT",
            Role::ClubOfficial => "ROLE_CLUB_OFFICIAL",
            Role::StudentAffairs => "ROLE_STUDENT_AFFAIRS",
        }
    }

    /// The pending form this approved role replaces when granted.
    ///
    /// One-way: granting a pending role never touches the approved one, so a
    /// sitting holder keeps it while another request is open.
    pub fn supersedes(&self) -> Option<Role> {
        match self {
            Role::ClubPresident => Some(Role::PendingClubPresident),
            Role::AcademicAdvisor => Some(Role::PendingAcademicAdvisor),
            _ => None,
        }
    }
}

/// Normalize a raw role name into its `ROLE_`-prefixed, upper-case authority.
///
/// Returns `None` for blank input.
pub fn normalize_authority(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let upper = trimmed.to_ascii_uppercase();
    if upper.starts_with(ROLE_PREFIX) {
        Some(upper)
    } else {
        Some(format!("{ROLE_PREFIX}{upper}"))
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_authority(s).ok_or_else(|| RoleParseError(s.to_string()))?;
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| RoleParseError(s.to_string()))
    }
}

impl TryFrom<String> for Role {
    type Error = RoleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token ordering: `ROLE_ADMIN` first, everything else by name.
impl Ord for Role {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        let rank = |r: &Role| (*r != Role::Admin, r.as_str());
        rank(self).cmp(&rank(other))
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Set-semantics role membership.
///
/// Order carries no meaning and duplicates collapse; iteration follows the
/// deterministic token ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn contains_any(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.0.contains(r))
    }

    /// Insert a role. An approved elevated role evicts its pending form.
    ///
    /// Returns `true` if the set changed.
    pub fn grant(&mut self, role: Role) -> bool {
        let evicted = role.supersedes().is_some_and(|other| self.0.remove(&other));
        self.0.insert(role) || evicted
    }

    /// Returns `true` if the role was present.
    pub fn revoke(&mut self, role: Role) -> bool {
        self.0.remove(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    /// Deterministic, ADMIN-first, comma-joined form used in tokens and headers.
    pub fn to_claim(&self) -> String {
        self.0.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(",")
    }

    /// Parse a comma-joined claim, skipping (and reporting) unknown names.
    pub fn parse_claim(claim: &str) -> (RoleSet, Vec<String>) {
        let mut set = RoleSet::new();
        let mut unknown = Vec::new();
        for part in claim.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.parse::<Role>() {
                Ok(role) => {
                    set.0.insert(role);
                }
                Err(_) => unknown.push(part.to_string()),
            }
        }
        (set, unknown)
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Role; N]> for RoleSet {
    fn from(value: [Role; N]) -> Self {
        value.into_iter().collect()
    }
}
