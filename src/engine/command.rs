//! The closed set of mutation records.
//!
//! Every change the planner can ask for is one of these variants,
//! carrying only owned values: a command never references the desired or
//! observed state it was derived from. `Display` renders the structured
//! `command=… key=value` form used in logs and dry-run output.

use serde::Serialize;
use std::fmt;

use crate::entity::{Permission, Ruleset};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command")]
pub enum Command {
    AddUserToOrg {
        handle: String,
    },
    RemoveUserFromOrg {
        handle: String,
    },
    CreateTeam {
        name: String,
        members: Vec<String>,
    },
    UpdateTeamAddMember {
        team_slug: String,
        handle: String,
        role: String,
    },
    UpdateTeamRemoveMember {
        team_slug: String,
        handle: String,
    },
    UpdateTeamSetParent {
        team_slug: String,
        parent_slug: Option<String>,
    },
    DeleteTeam {
        team_slug: String,
    },
    CreateRepository {
        name: String,
        writers: Vec<String>,
        readers: Vec<String>,
        public: bool,
    },
    UpdateRepositoryAddTeamAccess {
        repo: String,
        team_slug: String,
        permission: Permission,
    },
    UpdateRepositoryUpdateTeamAccess {
        repo: String,
        team_slug: String,
        permission: Permission,
    },
    UpdateRepositoryRemoveTeamAccess {
        repo: String,
        team_slug: String,
    },
    UpdateRepositoryUpdateBoolProperty {
        repo: String,
        property: String,
        value: bool,
    },
    UpdateRepositorySetExternalUser {
        repo: String,
        handle: String,
        permission: Permission,
    },
    UpdateRepositoryRemoveExternalUser {
        repo: String,
        handle: String,
    },
    DeleteRepository {
        repo: String,
    },
    AddRuleset {
        ruleset: Ruleset,
    },
    UpdateRuleset {
        ruleset: Ruleset,
    },
    DeleteRuleset {
        name: String,
    },
    NoOp,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::AddUserToOrg { .. } => "AddUserToOrg",
            Command::RemoveUserFromOrg { .. } => "RemoveUserFromOrg",
            Command::CreateTeam { .. } => "CreateTeam",
            Command::UpdateTeamAddMember { .. } => "UpdateTeamAddMember",
            Command::UpdateTeamRemoveMember { .. } => "UpdateTeamRemoveMember",
            Command::UpdateTeamSetParent { .. } => "UpdateTeamSetParent",
            Command::DeleteTeam { .. } => "DeleteTeam",
            Command::CreateRepository { .. } => "CreateRepository",
            Command::UpdateRepositoryAddTeamAccess { .. } => "UpdateRepositoryAddTeamAccess",
            Command::UpdateRepositoryUpdateTeamAccess { .. } => "UpdateRepositoryUpdateTeamAccess",
            Command::UpdateRepositoryRemoveTeamAccess { .. } => "UpdateRepositoryRemoveTeamAccess",
            Command::UpdateRepositoryUpdateBoolProperty { .. } => {
                "UpdateRepositoryUpdateBoolProperty"
            }
            Command::UpdateRepositorySetExternalUser { .. } => "UpdateRepositorySetExternalUser",
            Command::UpdateRepositoryRemoveExternalUser { .. } => {
                "UpdateRepositoryRemoveExternalUser"
            }
            Command::DeleteRepository { .. } => "DeleteRepository",
            Command::AddRuleset { .. } => "AddRuleset",
            Command::UpdateRuleset { .. } => "UpdateRuleset",
            Command::DeleteRuleset { .. } => "DeleteRuleset",
            Command::NoOp => "NoOp",
        }
    }

    /// Whether the command removes an organization-scoped object.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Command::RemoveUserFromOrg { .. }
                | Command::DeleteTeam { .. }
                | Command::DeleteRepository { .. }
                | Command::DeleteRuleset { .. }
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command={}", self.kind())?;
        match self {
            Command::AddUserToOrg { handle } | Command::RemoveUserFromOrg { handle } => {
                write!(f, " handle={}", handle)
            }
            Command::CreateTeam { name, members } => {
                write!(f, " name={:?} members=[{}]", name, members.join(", "))
            }
            Command::UpdateTeamAddMember {
                team_slug,
                handle,
                role,
            } => write!(f, " team={} handle={} role={}", team_slug, handle, role),
            Command::UpdateTeamRemoveMember { team_slug, handle } => {
                write!(f, " team={} handle={}", team_slug, handle)
            }
            Command::UpdateTeamSetParent {
                team_slug,
                parent_slug,
            } => write!(
                f,
                " team={} parent={}",
                team_slug,
                parent_slug.as_deref().unwrap_or("none")
            ),
            Command::DeleteTeam { team_slug } => write!(f, " team={}", team_slug),
            Command::CreateRepository {
                name,
                writers,
                readers,
                public,
            } => write!(
                f,
                " name={:?} writers=[{}] readers=[{}] public={}",
                name,
                writers.join(", "),
                readers.join(", "),
                public
            ),
            Command::UpdateRepositoryAddTeamAccess {
                repo,
                team_slug,
                permission,
            }
            | Command::UpdateRepositoryUpdateTeamAccess {
                repo,
                team_slug,
                permission,
            } => write!(
                f,
                " repo={} team={} permission={}",
                repo, team_slug, permission
            ),
            Command::UpdateRepositoryRemoveTeamAccess { repo, team_slug } => {
                write!(f, " repo={} team={}", repo, team_slug)
            }
            Command::UpdateRepositoryUpdateBoolProperty {
                repo,
                property,
                value,
            } => write!(f, " repo={} property={} value={}", repo, property, value),
            Command::UpdateRepositorySetExternalUser {
                repo,
                handle,
                permission,
            } => write!(
                f,
                " repo={} handle={} permission={}",
                repo, handle, permission
            ),
            Command::UpdateRepositoryRemoveExternalUser { repo, handle } => {
                write!(f, " repo={} handle={}", repo, handle)
            }
            Command::DeleteRepository { repo } => write!(f, " repo={}", repo),
            Command::AddRuleset { ruleset } | Command::UpdateRuleset { ruleset } => {
                write!(f, " name={:?}", ruleset.name)
            }
            Command::DeleteRuleset { name } => write!(f, " name={:?}", name),
            Command::NoOp => Ok(()),
        }
    }
}
