/// Role-derived room membership
///
/// Every user follows the settings room (system mode changes) and their own
/// agent room (conversation activity). Supervisors and admins additionally
/// join the admin room, which carries the connected-agents roster.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::topics::{Topic, CONNECTED_AGENTS, CONVERSATION_UPDATES, SYSTEM_MODE};

pub const SETTINGS_ROOM: &str = "settings";
pub const ADMIN_ROOM: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Agent,
    Supervisor,
    Admin,
}

impl Role {
    /// Roles that see the administrative room
    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Supervisor | Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Supervisor => "supervisor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "agent" => Ok(Role::Agent),
            "supervisor" => Ok(Role::Supervisor),
            "admin" | "administrator" => Ok(Role::Admin),
            other => Err(format!("Unknown role '{}'", other)),
        }
    }
}

/// Current-user descriptor supplied by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }
}

pub fn agent_room(user_id: &str) -> String {
    format!("agent:{}", user_id)
}

/// (topic, room) pairs `user` should be subscribed to, in join order
pub fn rooms_for(user: &CurrentUser) -> Vec<(Topic, String)> {
    let mut rooms = vec![(Topic::from(SYSTEM_MODE), SETTINGS_ROOM.to_string())];
    if user.role.is_elevated() {
        rooms.push((Topic::from(CONNECTED_AGENTS), ADMIN_ROOM.to_string()));
    }
    rooms.push((Topic::from(CONVERSATION_UPDATES), agent_room(&user.id)));
    rooms
}
