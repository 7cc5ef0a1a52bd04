//! Observed remote state.
//!
//! The remote side of a reconciliation is a point-in-time snapshot of
//! the hosted organization, presented through the read-only [`OrgRemote`]
//! trait. [`OrgSnapshot`] is the in-memory implementation; the live
//! loader that fills one from the hosted API (REST + GraphQL paging,
//! bounded worker pool) is an external collaborator.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::entity::{Permission, Ruleset};

/// A team as observed on the hosted platform, keyed by slug.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteTeam {
    pub name: String,
    pub slug: String,
    /// Account handles of the team members.
    #[serde(default)]
    pub members: BTreeSet<String>,
    #[serde(default)]
    pub parent_slug: Option<String>,
}

/// A repository as observed on the hosted platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRepository {
    pub name: String,
    /// Boolean properties by name (`private`, `archived`,
    /// `allow_auto_merge`, `delete_branch_on_merge`,
    /// `allow_update_branch`). Absent keys start absent.
    #[serde(default)]
    pub bool_properties: BTreeMap<String, bool>,
    /// Outside collaborators, account handle to permission.
    #[serde(default)]
    pub external_users: BTreeMap<String, Permission>,
}

impl RemoteRepository {
    pub fn is_archived(&self) -> bool {
        self.bool_properties.get("archived").copied().unwrap_or(false)
    }
}

/// One team's access to one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRepoGrant {
    /// Repository name.
    pub repo: String,
    pub permission: Permission,
}

/// Read interface over the observed remote state.
///
/// Keys are hosted identifiers: team slug, repository name, account
/// handle.
pub trait OrgRemote {
    /// Organization members, account handle keyed by itself.
    fn users(&self) -> &BTreeMap<String, String>;
    fn team_slug_by_name(&self) -> &BTreeMap<String, String>;
    /// Teams keyed by slug.
    fn teams(&self) -> &BTreeMap<String, RemoteTeam>;
    /// Repositories keyed by name.
    fn repositories(&self) -> &BTreeMap<String, RemoteRepository>;
    /// Grants keyed by team slug, then repository name.
    fn team_repositories(&self) -> &BTreeMap<String, BTreeMap<String, TeamRepoGrant>>;
    /// Rulesets keyed by name.
    fn rulesets(&self) -> &BTreeMap<String, Ruleset>;
    /// Installed apps, name to app id.
    fn app_ids(&self) -> &BTreeMap<String, u64>;
}

/// An owned snapshot of the remote organization.
///
/// Serializable so that a snapshot can be kept in a file and the
/// synchronizer driven end-to-end without the hosted API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgSnapshot {
    pub users: BTreeMap<String, String>,
    pub teams: BTreeMap<String, RemoteTeam>,
    pub repositories: BTreeMap<String, RemoteRepository>,
    pub team_repositories: BTreeMap<String, BTreeMap<String, TeamRepoGrant>>,
    pub rulesets: BTreeMap<String, Ruleset>,
    pub app_ids: BTreeMap<String, u64>,
    /// Reverse index over `teams`, rebuilt rather than stored.
    #[serde(skip)]
    team_slug_by_name: BTreeMap<String, String>,
}

impl OrgSnapshot {
    /// Insert a team, keeping the name index consistent.
    pub fn insert_team(&mut self, team: RemoteTeam) {
        self.team_slug_by_name
            .insert(team.name.clone(), team.slug.clone());
        self.teams.insert(team.slug.clone(), team);
    }

    /// Rebuild the name index from the team map. Must be called after
    /// deserializing or after editing `teams` directly.
    pub fn rebuild_index(&mut self) {
        self.team_slug_by_name = self
            .teams
            .values()
            .map(|t| (t.name.clone(), t.slug.clone()))
            .collect();
    }

    /// Load a snapshot from a JSON file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read snapshot file: {}", path.display()))?;
        let mut snapshot: OrgSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Invalid snapshot file: {}", path.display()))?;
        snapshot.rebuild_index();
        Ok(snapshot)
    }

    /// Save the snapshot back to a JSON file.
    pub fn save_file(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize snapshot")?;
        fs::write(path, content)
            .with_context(|| format!("Could not write snapshot file: {}", path.display()))?;
        Ok(())
    }
}

impl OrgRemote for OrgSnapshot {
    fn users(&self) -> &BTreeMap<String, String> {
        &self.users
    }

    fn team_slug_by_name(&self) -> &BTreeMap<String, String> {
        &self.team_slug_by_name
    }

    fn teams(&self) -> &BTreeMap<String, RemoteTeam> {
        &self.teams
    }

    fn repositories(&self) -> &BTreeMap<String, RemoteRepository> {
        &self.repositories
    }

    fn team_repositories(&self) -> &BTreeMap<String, BTreeMap<String, TeamRepoGrant>> {
        &self.team_repositories
    }

    fn rulesets(&self) -> &BTreeMap<String, Ruleset> {
        &self.rulesets
    }

    fn app_ids(&self) -> &BTreeMap<String, u64> {
        &self.app_ids
    }
}
