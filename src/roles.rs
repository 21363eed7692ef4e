//! Self-assignable roles
//!
//! Admins register roles into groups; members toggle them with a command.
//! In exclusive groups, taking one role drops the member's other roles from
//! that group.

use poise::ChoiceParameter;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Group a self-assignable role belongs to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ChoiceParameter,
)]
#[serde(rename_all = "snake_case")]
pub enum RoleGroup {
    #[name = "location"]
    Location,
    #[name = "color"]
    Color,
    #[name = "pronoun"]
    Pronoun,
    #[name = "interest"]
    Interest,
}

impl RoleGroup {
    /// Whether a member may hold several roles of this group at once
    #[must_use]
    pub const fn allows_many(self) -> bool {
        !matches!(self, Self::Location | Self::Color)
    }
}

impl Display for RoleGroup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A role members can toggle on themselves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonRole {
    pub role_id: u64,
    pub guild_id: u64,
    pub group: RoleGroup,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

impl ButtonRole {
    /// Label with the emoji in front, if there is one
    #[must_use]
    pub fn display_label(&self) -> String {
        match &self.emoji {
            Some(emoji) => format!("{emoji} {}", self.label),
            None => self.label.clone(),
        }
    }
}

/// Role changes for one toggle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TogglePlan {
    /// Roles to take away, including the toggled role when it was held
    pub remove: Vec<u64>,
    /// The toggled role, when the member did not have it yet
    pub add: Option<u64>,
}

impl TogglePlan {
    #[must_use]
    pub const fn adds(&self) -> bool {
        self.add.is_some()
    }
}

/// Work out what toggling `target` does for a member holding `held`.
///
/// `group_roles` are the registered roles of `target`'s group in the same
/// guild. In exclusive groups every other held role of the group is removed,
/// whether `target` ends up added or removed.
#[must_use]
pub fn plan_toggle(target: &ButtonRole, group_roles: &[ButtonRole], held: &[u64]) -> TogglePlan {
    let mut remove: Vec<u64> = if target.group.allows_many() {
        Vec::new()
    } else {
        group_roles
            .iter()
            .filter(|role| role.group == target.group && role.role_id != target.role_id)
            .map(|role| role.role_id)
            .filter(|role_id| held.contains(role_id))
            .collect()
    };

    if held.contains(&target.role_id) {
        remove.push(target.role_id);
        TogglePlan { remove, add: None }
    } else {
        TogglePlan {
            remove,
            add: Some(target.role_id),
        }
    }
}

/// Reply sent to the member after a toggle
#[must_use]
pub fn toggle_reply(role: &ButtonRole, plan: &TogglePlan) -> String {
    if plan.adds() {
        format!("added the {} role for you!", role.label)
    } else {
        format!("removed the {} role for you!", role.label)
    }
}

/// One line per group listing its roles, in the order given
#[must_use]
pub fn format_role_menu(roles: &[ButtonRole]) -> String {
    if roles.is_empty() {
        return "No self-assignable roles yet".to_string();
    }
    let mut lines: Vec<String> = Vec::new();
    let mut current: Option<RoleGroup> = None;
    for role in roles {
        if current != Some(role.group) {
            current = Some(role.group);
            let rule = if role.group.allows_many() { "pick any" } else { "pick one" };
            lines.push(format!("**{}** ({rule}):", role.group));
        }
        if let Some(line) = lines.last_mut() {
            line.push(' ');
            line.push_str(&role.display_label());
            line.push(',');
        }
    }
    lines
        .into_iter()
        .map(|line| line.trim_end_matches(',').to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(role_id: u64, group: RoleGroup) -> ButtonRole {
        ButtonRole {
            role_id,
            guild_id: 1,
            group,
            label: format!("role {role_id}"),
            emoji: None,
        }
    }

    #[test]
    fn test_group_names() {
        assert_eq!(RoleGroup::Location.to_string(), "location");
        assert_eq!(RoleGroup::Color.name(), "color");
    }

    #[test]
    fn test_exclusive_groups() {
        assert!(!RoleGroup::Location.allows_many());
        assert!(!RoleGroup::Color.allows_many());
        assert!(RoleGroup::Pronoun.allows_many());
        assert!(RoleGroup::Interest.allows_many());
    }

    #[test]
    fn test_taking_a_color_drops_other_colors() {
        let colors = [role(10, RoleGroup::Color), role(11, RoleGroup::Color), role(12, RoleGroup::Color)];
        let plan = plan_toggle(&colors[0], &colors, &[11, 12, 99]);
        assert_eq!(plan.add, Some(10));
        assert_eq!(plan.remove, vec![11, 12]);
        assert_eq!(toggle_reply(&colors[0], &plan), "added the role 10 role for you!");
    }

    #[test]
    fn test_toggling_held_exclusive_role_removes_it() {
        let places = [role(20, RoleGroup::Location), role(21, RoleGroup::Location)];
        let plan = plan_toggle(&places[1], &places, &[21]);
        assert_eq!(plan.add, None);
        assert_eq!(plan.remove, vec![21]);
        assert_eq!(toggle_reply(&places[1], &plan), "removed the role 21 role for you!");
    }

    #[test]
    fn test_shared_group_keeps_other_roles() {
        let interests = [role(30, RoleGroup::Interest), role(31, RoleGroup::Interest)];
        let plan = plan_toggle(&interests[0], &interests, &[31]);
        assert_eq!(plan.add, Some(30));
        assert!(plan.remove.is_empty());
    }

    #[test]
    fn test_other_groups_are_untouched() {
        let target = role(40, RoleGroup::Color);
        let registered = [target.clone(), role(41, RoleGroup::Location)];
        let plan = plan_toggle(&target, &registered, &[41]);
        assert!(plan.remove.is_empty());
        assert_eq!(plan.add, Some(40));
    }

    #[test]
    fn test_format_role_menu() {
        let mut red = role(1, RoleGroup::Color);
        red.label = "red".to_string();
        red.emoji = Some("🔴".to_string());
        let mut blue = role(2, RoleGroup::Color);
        blue.label = "blue".to_string();
        let mut games = role(3, RoleGroup::Interest);
        games.label = "games".to_string();

        assert_eq!(
            format_role_menu(&[red, blue, games]),
            "**color** (pick one): 🔴 red, blue\n**interest** (pick any): games"
        );
        assert_eq!(format_role_menu(&[]), "No self-assignable roles yet");
    }

    #[test]
    fn test_role_yaml_shape() {
        let mut role = role(50, RoleGroup::Pronoun);
        role.emoji = Some("🌈".to_string());
        let yaml = serde_yaml::to_string(&role).unwrap();
        assert!(yaml.contains("group: pronoun"));
        let back: ButtonRole = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, role);
        assert_eq!(back.display_label(), "🌈 role 50");
    }
}
