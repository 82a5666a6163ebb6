//! Policy and grouping rule records.

use serde::{Deserialize, Serialize};

use gatekeeper_core::UserId;

use crate::Role;

/// "Who may do what to which resource path".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Role name or user id.
    pub subject: String,
    /// `keyMatch2` resource pattern, e.g. `/api/admin/*`.
    pub object: String,
    /// Regex alternation over methods, e.g. `(GET)|(PUT)`.
    pub action: String,
}

impl PolicyRule {
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }
}

/// Binds a user to a role. A user holds at most one grouping at a time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupingRule {
    pub user: String,
    pub role: String,
}

impl GroupingRule {
    pub fn new(user: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            role: role.into(),
        }
    }

    pub fn for_user(id: UserId, role: &Role) -> Self {
        Self::new(id.as_subject(), role.as_str())
    }
}

/// Every rule in the store at one point in time.
///
/// Rules are kept sorted so two loads of an unchanged store compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicySnapshot {
    pub policies: Vec<PolicyRule>,
    pub groupings: Vec<GroupingRule>,
}

impl PolicySnapshot {
    pub fn new(mut policies: Vec<PolicyRule>, mut groupings: Vec<GroupingRule>) -> Self {
        policies.sort();
        policies.dedup();
        groupings.sort();
        groupings.dedup();
        Self {
            policies,
            groupings,
        }
    }

    pub fn roles_of<'a>(&'a self, user: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.groupings
            .iter()
            .filter(move |g| g.user == user)
            .map(|g| g.role.as_str())
    }
}

/// Rules seeded at first start: admins get every method under the admin
/// prefix, users get read/update under their own path.
pub fn default_policies() -> Vec<PolicyRule> {
    vec![
        PolicyRule::new(Role::ADMIN.as_str(), "/api/admin/*", "(GET)|(POST)|(PUT)|(DELETE)"),
        PolicyRule::new(Role::USER.as_str(), "/api/users/:id/*", "(GET)|(PUT)"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_order_independent() {
        let a = PolicySnapshot::new(
            default_policies(),
            vec![GroupingRule::new("2", "user"), GroupingRule::new("1", "admin")],
        );
        let mut reversed = default_policies();
        reversed.reverse();
        let b = PolicySnapshot::new(
            reversed,
            vec![GroupingRule::new("1", "admin"), GroupingRule::new("2", "user")],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn roles_of_filters_by_user() {
        let snap = PolicySnapshot::new(
            vec![],
            vec![GroupingRule::new("1", "admin"), GroupingRule::new("2", "user")],
        );
        assert_eq!(snap.roles_of("1").collect::<Vec<_>>(), vec!["admin"]);
        assert_eq!(snap.roles_of("3").count(), 0);
    }
}
