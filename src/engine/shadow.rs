//! Mutable mirror of the remote state used during planning.
//!
//! The planner mutates the shadow as it emits commands, so that later
//! emissions observe the effect of earlier ones within the same pass: a
//! grant can reference a team that only exists because the pass creates
//! it. The shadow is a deep owned copy; the snapshot it was built from
//! is never touched.

use std::collections::BTreeMap;

use crate::engine::Command;
use crate::entity::{Permission, Ruleset};
use crate::remote::{OrgRemote, OrgSnapshot, RemoteRepository, RemoteTeam, TeamRepoGrant};
use crate::slug;

#[derive(Debug)]
pub struct ShadowRemote {
    state: OrgSnapshot,
}

impl ShadowRemote {
    /// Deep-copy the observed state. The source remains a stable
    /// reference for the rest of the pass.
    pub fn new(remote: &dyn OrgRemote) -> Self {
        let mut state = OrgSnapshot::default();
        state.users = remote.users().clone();
        state.teams = remote.teams().clone();
        state.repositories = remote.repositories().clone();
        state.team_repositories = remote.team_repositories().clone();
        state.rulesets = remote.rulesets().clone();
        state.app_ids = remote.app_ids().clone();
        state.rebuild_index();
        Self { state }
    }

    /// End-of-pass state: the remote as it will look once every planned
    /// command has been applied.
    pub fn into_snapshot(self) -> OrgSnapshot {
        self.state
    }

    /// Apply one mutation record to the mirror.
    pub fn apply(&mut self, cmd: &Command) {
        match cmd {
            Command::AddUserToOrg { handle } => self.add_user_to_org(handle),
            Command::RemoveUserFromOrg { handle } => self.remove_user_from_org(handle),
            Command::CreateTeam { name, members } => self.create_team(name, members),
            Command::UpdateTeamAddMember {
                team_slug, handle, ..
            } => self.update_team_add_member(team_slug, handle),
            Command::UpdateTeamRemoveMember { team_slug, handle } => {
                self.update_team_remove_member(team_slug, handle)
            }
            Command::UpdateTeamSetParent {
                team_slug,
                parent_slug,
            } => self.update_team_set_parent(team_slug, parent_slug.clone()),
            Command::DeleteTeam { team_slug } => self.delete_team(team_slug),
            Command::CreateRepository {
                name,
                writers,
                readers,
                public,
            } => self.create_repository(name, writers, readers, *public),
            Command::UpdateRepositoryAddTeamAccess {
                repo,
                team_slug,
                permission,
            } => self.update_repository_add_team_access(repo, team_slug, *permission),
            Command::UpdateRepositoryUpdateTeamAccess {
                repo,
                team_slug,
                permission,
            } => self.update_repository_update_team_access(repo, team_slug, *permission),
            Command::UpdateRepositoryRemoveTeamAccess { repo, team_slug } => {
                self.update_repository_remove_team_access(repo, team_slug)
            }
            Command::UpdateRepositoryUpdateBoolProperty {
                repo,
                property,
                value,
            } => self.update_repository_update_bool_property(repo, property, *value),
            Command::UpdateRepositorySetExternalUser {
                repo,
                handle,
                permission,
            } => self.update_repository_set_external_user(repo, handle, *permission),
            Command::UpdateRepositoryRemoveExternalUser { repo, handle } => {
                self.update_repository_remove_external_user(repo, handle)
            }
            Command::DeleteRepository { repo } => self.delete_repository(repo),
            Command::AddRuleset { ruleset } | Command::UpdateRuleset { ruleset } => {
                self.upsert_ruleset(ruleset.clone())
            }
            Command::DeleteRuleset { name } => self.delete_ruleset(name),
            Command::NoOp => {}
        }
    }

    pub fn add_user_to_org(&mut self, handle: &str) {
        self.state
            .users
            .insert(handle.to_string(), handle.to_string());
    }

    pub fn remove_user_from_org(&mut self, handle: &str) {
        self.state.users.remove(handle);
    }

    /// Derives the slug, inserts the team into both the slug map and the
    /// name index, and starts an empty grant map for the slug.
    pub fn create_team(&mut self, name: &str, members: &[String]) {
        let team_slug = slug::make(name);
        self.state.insert_team(RemoteTeam {
            name: name.to_string(),
            slug: team_slug.clone(),
            members: members.iter().cloned().collect(),
            parent_slug: None,
        });
        self.state.team_repositories.entry(team_slug).or_default();
    }

    pub fn update_team_add_member(&mut self, team_slug: &str, handle: &str) {
        if let Some(team) = self.state.teams.get_mut(team_slug) {
            team.members.insert(handle.to_string());
        }
    }

    /// Idempotent: removing an absent member is a no-op.
    pub fn update_team_remove_member(&mut self, team_slug: &str, handle: &str) {
        if let Some(team) = self.state.teams.get_mut(team_slug) {
            team.members.remove(handle);
        }
    }

    pub fn update_team_set_parent(&mut self, team_slug: &str, parent_slug: Option<String>) {
        if let Some(team) = self.state.teams.get_mut(team_slug) {
            team.parent_slug = parent_slug;
        }
    }

    /// Removes the team, its reverse name-index entry, and every grant
    /// recorded under its slug.
    pub fn delete_team(&mut self, team_slug: &str) {
        if self.state.teams.remove(team_slug).is_some() {
            self.state.rebuild_index();
            self.state.team_repositories.remove(team_slug);
        }
    }

    pub fn create_repository(
        &mut self,
        name: &str,
        writers: &[String],
        readers: &[String],
        public: bool,
    ) {
        let mut bool_properties = BTreeMap::new();
        bool_properties.insert("private".to_string(), !public);
        bool_properties.insert("archived".to_string(), false);
        self.state.repositories.insert(
            name.to_string(),
            RemoteRepository {
                name: name.to_string(),
                bool_properties,
                external_users: BTreeMap::new(),
            },
        );
        for team_slug in writers {
            self.update_repository_add_team_access(name, team_slug, Permission::Push);
        }
        for team_slug in readers {
            self.update_repository_add_team_access(name, team_slug, Permission::Pull);
        }
    }

    /// Grants on an unknown team slug are silently dropped; the slug
    /// must pre-exist because team creation is planned earlier.
    pub fn update_repository_add_team_access(
        &mut self,
        repo: &str,
        team_slug: &str,
        permission: Permission,
    ) {
        if !self.state.teams.contains_key(team_slug) {
            return;
        }
        self.state
            .team_repositories
            .entry(team_slug.to_string())
            .or_default()
            .insert(
                repo.to_string(),
                TeamRepoGrant {
                    repo: repo.to_string(),
                    permission,
                },
            );
    }

    pub fn update_repository_update_team_access(
        &mut self,
        repo: &str,
        team_slug: &str,
        permission: Permission,
    ) {
        if let Some(grants) = self.state.team_repositories.get_mut(team_slug) {
            if let Some(grant) = grants.get_mut(repo) {
                grant.permission = permission;
            }
        }
    }

    pub fn update_repository_remove_team_access(&mut self, repo: &str, team_slug: &str) {
        if let Some(grants) = self.state.team_repositories.get_mut(team_slug) {
            grants.remove(repo);
        }
    }

    /// Touches only the named property; other keys are left alone.
    pub fn update_repository_update_bool_property(
        &mut self,
        repo: &str,
        property: &str,
        value: bool,
    ) {
        if let Some(repository) = self.state.repositories.get_mut(repo) {
            repository
                .bool_properties
                .insert(property.to_string(), value);
        }
    }

    pub fn update_repository_set_external_user(
        &mut self,
        repo: &str,
        handle: &str,
        permission: Permission,
    ) {
        if let Some(repository) = self.state.repositories.get_mut(repo) {
            repository
                .external_users
                .insert(handle.to_string(), permission);
        }
    }

    pub fn update_repository_remove_external_user(&mut self, repo: &str, handle: &str) {
        if let Some(repository) = self.state.repositories.get_mut(repo) {
            repository.external_users.remove(handle);
        }
    }

    pub fn delete_repository(&mut self, repo: &str) {
        self.state.repositories.remove(repo);
        for grants in self.state.team_repositories.values_mut() {
            grants.remove(repo);
        }
    }

    pub fn upsert_ruleset(&mut self, ruleset: Ruleset) {
        self.state.rulesets.insert(ruleset.name.clone(), ruleset);
    }

    pub fn delete_ruleset(&mut self, name: &str) {
        self.state.rulesets.remove(name);
    }
}

impl OrgRemote for ShadowRemote {
    fn users(&self) -> &BTreeMap<String, String> {
        self.state.users()
    }

    fn team_slug_by_name(&self) -> &BTreeMap<String, String> {
        self.state.team_slug_by_name()
    }

    fn teams(&self) -> &BTreeMap<String, RemoteTeam> {
        self.state.teams()
    }

    fn repositories(&self) -> &BTreeMap<String, RemoteRepository> {
        self.state.repositories()
    }

    fn team_repositories(&self) -> &BTreeMap<String, BTreeMap<String, TeamRepoGrant>> {
        self.state.team_repositories()
    }

    fn rulesets(&self) -> &BTreeMap<String, Ruleset> {
        self.state.rulesets()
    }

    fn app_ids(&self) -> &BTreeMap<String, u64> {
        self.state.app_ids()
    }
}
