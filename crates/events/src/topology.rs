//! Fabric topology: exchanges, routing keys, queues and the bindings between them.
//!
//! All exchanges are topic exchanges. A binding pattern is a dot-separated
//! list of words where `*` matches exactly one word and `#` matches zero or
//! more words.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    #[serde(rename = "user.exchange")]
    User,
    #[serde(rename = "course.exchange")]
    Course,
    #[serde(rename = "club.exchange")]
    Club,
}

impl Exchange {
    pub const ALL: [Exchange; 3] = [Exchange::User, Exchange::Course, Exchange::Club];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::User => "user.exchange",
            Exchange::Course => "course.exchange",
            Exchange::Club => "club.exchange",
        }
    }
}

impl core::fmt::Display for Exchange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every routing key a publisher in this system uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    UserRegistered,
    RoleAssign,
    RoleRevoke,
    CourseDeleted,
    CourseUpdated,
    ClubDeleted,
    ClubUpdated,
    ClubRoleChange,
    ApprovalOutcome,
}

impl RoutingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKey::UserRegistered => "user.registered",
            RoutingKey::RoleAssign => "user.role.assign",
            RoutingKey::RoleRevoke => "user.role.revoke",
            RoutingKey::CourseDeleted => "course.deleted",
            RoutingKey::CourseUpdated => "course.updated",
            RoutingKey::ClubDeleted => "club.deleted",
            RoutingKey::ClubUpdated => "club.updated",
            RoutingKey::ClubRoleChange => "club.role.change",
            RoutingKey::ApprovalOutcome => "approval.outcome",
        }
    }

    /// The exchange facts with this key are published to.
    pub fn exchange(&self) -> Exchange {
        match self {
            RoutingKey::UserRegistered | RoutingKey::RoleAssign | RoutingKey::RoleRevoke => {
                Exchange::User
            }
            RoutingKey::CourseDeleted | RoutingKey::CourseUpdated => Exchange::Course,
            RoutingKey::ClubDeleted
            | RoutingKey::ClubUpdated
            | RoutingKey::ClubRoleChange
            | RoutingKey::ApprovalOutcome => Exchange::Club,
        }
    }
}

impl core::fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable queues, one per consuming concern.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Queue {
    #[serde(rename = "identity.role-assignments")]
    RoleAssignments,
    #[serde(rename = "portal.user-directory")]
    UserDirectory,
    #[serde(rename = "portal.course-cascade")]
    CourseCascade,
    #[serde(rename = "portal.club-cascade")]
    ClubCascade,
    #[serde(rename = "notification.approvals")]
    ApprovalNotifications,
}

impl Queue {
    pub const ALL: [Queue; 5] = [
        Queue::RoleAssignments,
        Queue::UserDirectory,
        Queue::CourseCascade,
        Queue::ClubCascade,
        Queue::ApprovalNotifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::RoleAssignments => "identity.role-assignments",
            Queue::UserDirectory => "portal.user-directory",
            Queue::CourseCascade => "portal.course-cascade",
            Queue::ClubCascade => "portal.club-cascade",
            Queue::ApprovalNotifications => "notification.approvals",
        }
    }
}

impl core::fmt::Display for Queue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub exchange: Exchange,
    pub pattern: String,
    pub queue: Queue,
}

impl Binding {
    pub fn new(exchange: Exchange, pattern: impl Into<String>, queue: Queue) -> Self {
        Self {
            exchange,
            pattern: pattern.into(),
            queue,
        }
    }

    pub fn matches(&self, exchange: Exchange, routing_key: &str) -> bool {
        self.exchange == exchange && topic_matches(&self.pattern, routing_key)
    }
}

/// Declared bindings. Brokers route with this; nothing else is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    bindings: Vec<Binding>,
}

impl Default for Topology {
    fn default() -> Self {
        Self::standard()
    }
}

impl Topology {
    pub fn empty() -> Self {
        Self { bindings: Vec::new() }
    }

    /// The portal's production wiring.
    pub fn standard() -> Self {
        Self::empty()
            .bind(Exchange::User, "user.role.*", Queue::RoleAssignments)
            .bind(Exchange::User, "user.registered", Queue::UserDirectory)
            .bind(Exchange::Club, "club.role.change", Queue::UserDirectory)
            .bind(Exchange::Course, "course.*", Queue::CourseCascade)
            .bind(Exchange::Club, "club.deleted", Queue::ClubCascade)
            .bind(Exchange::Club, "club.updated", Queue::ClubCascade)
            .bind(Exchange::Club, "approval.#", Queue::ApprovalNotifications)
    }

    pub fn bind(mut self, exchange: Exchange, pattern: impl Into<String>, queue: Queue) -> Self {
        self.bindings.push(Binding::new(exchange, pattern, queue));
        self
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Queues a message lands in; each queue at most once.
    pub fn route(&self, exchange: Exchange, routing_key: &str) -> Vec<Queue> {
        let mut out: Vec<Queue> = Vec::new();
        for b in self.bindings.iter().filter(|b| b.matches(exchange, routing_key)) {
            if !out.contains(&b.queue) {
                out.push(b.queue);
            }
        }
        out
    }

    /// Queues that at least one binding feeds.
    pub fn queues(&self) -> Vec<Queue> {
        let mut out: Vec<Queue> = self.bindings.iter().map(|b| b.queue).collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Topic-exchange pattern match.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&k, key_rest)) if word == "*" || word == k => match_words(rest, key_rest),
            _ => false,
        },
    }
}
