use serde::{Deserialize, Serialize};

/// The roles the back office resolves upstream. Closed set: an unknown role
/// string is a request error, not a silently unprivileged actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Admin,
    DataOperations,
    UnitManager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::DataOperations => "data-operations",
            Self::UnitManager => "unit-manager",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "admin" => Some(Self::Admin),
            "data-operations" => Some(Self::DataOperations),
            "unit-manager" => Some(Self::UnitManager),
            _ => None,
        }
    }
}

/// The already-resolved identity a workflow operation runs as. Authentication
/// happens upstream; the workflow never reads ambient session state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor: String,
    pub role: Role,
}

impl ActorContext {
    pub fn new(actor: impl Into<String>, role: Role) -> Self {
        Self { actor: actor.into(), role }
    }
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn roles_round_trip_through_wire_form() {
        for role in [Role::Admin, Role::DataOperations, Role::UnitManager] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
    }

    #[test]
    fn unknown_roles_do_not_parse() {
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn parse_tolerates_surrounding_whitespace() {
        assert_eq!(Role::parse(" admin "), Some(Role::Admin));
    }
}
