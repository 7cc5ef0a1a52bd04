//! Mutation sinks.
//!
//! The executor is where a committed plan leaves the engine. Three
//! implementations: [`LiveExecutor`] maps every record onto the hosted
//! API through the [`OrgApi`] trait, [`DryRunExecutor`] is a null sink,
//! and [`RecorderExecutor`] tallies records per kind for tests.

#![allow(dead_code)]

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

use crate::engine::Command;
use crate::entity::{Permission, Ruleset};

/// Abstract sink of mutation records.
///
/// `apply` attempts one remote mutation and surfaces success or a
/// structured error; it never panics. Failures do not abort the
/// remaining records (the buffer handles that policy).
pub trait Executor {
    fn begin(&mut self) {}
    fn apply(&mut self, cmd: &Command) -> Result<()>;
    fn commit(&mut self) {}
    fn rollback(&mut self, _err: &anyhow::Error) {}
}

/// Interface of the hosted-API client, one method per mutation kind.
///
/// The REST/GraphQL implementation lives outside this crate; anything
/// implementing this trait can sit behind a [`LiveExecutor`].
pub trait OrgApi {
    fn add_user_to_org(&mut self, handle: &str) -> Result<()>;
    fn remove_user_from_org(&mut self, handle: &str) -> Result<()>;
    fn create_team(&mut self, name: &str, members: &[String]) -> Result<()>;
    fn update_team_add_member(&mut self, team_slug: &str, handle: &str, role: &str) -> Result<()>;
    fn update_team_remove_member(&mut self, team_slug: &str, handle: &str) -> Result<()>;
    fn update_team_set_parent(&mut self, team_slug: &str, parent_slug: Option<&str>)
        -> Result<()>;
    fn delete_team(&mut self, team_slug: &str) -> Result<()>;
    fn create_repository(
        &mut self,
        name: &str,
        writers: &[String],
        readers: &[String],
        public: bool,
    ) -> Result<()>;
    fn update_repository_add_team_access(
        &mut self,
        repo: &str,
        team_slug: &str,
        permission: Permission,
    ) -> Result<()>;
    fn update_repository_update_team_access(
        &mut self,
        repo: &str,
        team_slug: &str,
        permission: Permission,
    ) -> Result<()>;
    fn update_repository_remove_team_access(&mut self, repo: &str, team_slug: &str) -> Result<()>;
    fn update_repository_update_bool_property(
        &mut self,
        repo: &str,
        property: &str,
        value: bool,
    ) -> Result<()>;
    fn update_repository_set_external_user(
        &mut self,
        repo: &str,
        handle: &str,
        permission: Permission,
    ) -> Result<()>;
    fn update_repository_remove_external_user(&mut self, repo: &str, handle: &str) -> Result<()>;
    fn delete_repository(&mut self, repo: &str) -> Result<()>;
    fn add_ruleset(&mut self, ruleset: &Ruleset) -> Result<()>;
    fn update_ruleset(&mut self, ruleset: &Ruleset) -> Result<()>;
    fn delete_ruleset(&mut self, name: &str) -> Result<()>;
}

/// Executor backed by a hosted-API client.
pub struct LiveExecutor<C: OrgApi> {
    api: C,
}

impl<C: OrgApi> LiveExecutor<C> {
    pub fn new(api: C) -> Self {
        Self { api }
    }

    pub fn into_inner(self) -> C {
        self.api
    }
}

impl<C: OrgApi> Executor for LiveExecutor<C> {
    fn apply(&mut self, cmd: &Command) -> Result<()> {
        match cmd {
            Command::AddUserToOrg { handle } => self.api.add_user_to_org(handle),
            Command::RemoveUserFromOrg { handle } => self.api.remove_user_from_org(handle),
            Command::CreateTeam { name, members } => self.api.create_team(name, members),
            Command::UpdateTeamAddMember {
                team_slug,
                handle,
                role,
            } => self.api.update_team_add_member(team_slug, handle, role),
            Command::UpdateTeamRemoveMember { team_slug, handle } => {
                self.api.update_team_remove_member(team_slug, handle)
            }
            Command::UpdateTeamSetParent {
                team_slug,
                parent_slug,
            } => self
                .api
                .update_team_set_parent(team_slug, parent_slug.as_deref()),
            Command::DeleteTeam { team_slug } => self.api.delete_team(team_slug),
            Command::CreateRepository {
                name,
                writers,
                readers,
                public,
            } => self.api.create_repository(name, writers, readers, *public),
            Command::UpdateRepositoryAddTeamAccess {
                repo,
                team_slug,
                permission,
            } => self
                .api
                .update_repository_add_team_access(repo, team_slug, *permission),
            Command::UpdateRepositoryUpdateTeamAccess {
                repo,
                team_slug,
                permission,
            } => self
                .api
                .update_repository_update_team_access(repo, team_slug, *permission),
            Command::UpdateRepositoryRemoveTeamAccess { repo, team_slug } => {
                self.api.update_repository_remove_team_access(repo, team_slug)
            }
            Command::UpdateRepositoryUpdateBoolProperty {
                repo,
                property,
                value,
            } => self
                .api
                .update_repository_update_bool_property(repo, property, *value),
            Command::UpdateRepositorySetExternalUser {
                repo,
                handle,
                permission,
            } => self
                .api
                .update_repository_set_external_user(repo, handle, *permission),
            Command::UpdateRepositoryRemoveExternalUser { repo, handle } => {
                self.api.update_repository_remove_external_user(repo, handle)
            }
            Command::DeleteRepository { repo } => self.api.delete_repository(repo),
            Command::AddRuleset { ruleset } => self.api.add_ruleset(ruleset),
            Command::UpdateRuleset { ruleset } => self.api.update_ruleset(ruleset),
            Command::DeleteRuleset { name } => self.api.delete_ruleset(name),
            Command::NoOp => Ok(()),
        }
    }
}

/// Null sink: records are logged and the remote is never touched.
#[derive(Debug, Default)]
pub struct DryRunExecutor;

impl Executor for DryRunExecutor {
    fn apply(&mut self, cmd: &Command) -> Result<()> {
        log::info!("dryrun=true {}", cmd);
        Ok(())
    }
}

/// Test sink collecting records in per-kind counters.
#[derive(Debug, Default)]
pub struct RecorderExecutor {
    pub users_added: BTreeSet<String>,
    pub users_removed: BTreeSet<String>,
    /// Team name to the members it was created with.
    pub teams_created: BTreeMap<String, Vec<String>>,
    pub team_members_added: BTreeMap<String, Vec<String>>,
    pub team_members_removed: BTreeMap<String, Vec<String>>,
    pub team_parents_set: BTreeMap<String, Option<String>>,
    pub teams_deleted: BTreeSet<String>,
    pub repos_created: BTreeSet<String>,
    /// Repository name to the team slugs granted/updated/removed.
    pub repo_teams_added: BTreeMap<String, Vec<String>>,
    pub repo_teams_updated: BTreeMap<String, Vec<String>>,
    pub repo_teams_removed: BTreeMap<String, Vec<String>>,
    pub repo_bool_updates: BTreeMap<String, Vec<(String, bool)>>,
    pub repo_external_set: BTreeMap<String, Vec<String>>,
    pub repo_external_removed: BTreeMap<String, Vec<String>>,
    pub repos_deleted: BTreeSet<String>,
    pub rulesets_added: BTreeSet<String>,
    pub rulesets_updated: BTreeSet<String>,
    pub rulesets_deleted: BTreeSet<String>,
    /// Total records applied, in any kind.
    pub applied: usize,
}

impl RecorderExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Executor for RecorderExecutor {
    fn apply(&mut self, cmd: &Command) -> Result<()> {
        self.applied += 1;
        match cmd {
            Command::AddUserToOrg { handle } => {
                self.users_added.insert(handle.clone());
            }
            Command::RemoveUserFromOrg { handle } => {
                self.users_removed.insert(handle.clone());
            }
            Command::CreateTeam { name, members } => {
                self.teams_created
                    .entry(name.clone())
                    .or_default()
                    .extend(members.iter().cloned());
            }
            Command::UpdateTeamAddMember {
                team_slug, handle, ..
            } => {
                self.team_members_added
                    .entry(team_slug.clone())
                    .or_default()
                    .push(handle.clone());
            }
            Command::UpdateTeamRemoveMember { team_slug, handle } => {
                self.team_members_removed
                    .entry(team_slug.clone())
                    .or_default()
                    .push(handle.clone());
            }
            Command::UpdateTeamSetParent {
                team_slug,
                parent_slug,
            } => {
                self.team_parents_set
                    .insert(team_slug.clone(), parent_slug.clone());
            }
            Command::DeleteTeam { team_slug } => {
                self.teams_deleted.insert(team_slug.clone());
            }
            Command::CreateRepository { name, .. } => {
                self.repos_created.insert(name.clone());
            }
            Command::UpdateRepositoryAddTeamAccess {
                repo, team_slug, ..
            } => {
                self.repo_teams_added
                    .entry(repo.clone())
                    .or_default()
                    .push(team_slug.clone());
            }
            Command::UpdateRepositoryUpdateTeamAccess {
                repo, team_slug, ..
            } => {
                self.repo_teams_updated
                    .entry(repo.clone())
                    .or_default()
                    .push(team_slug.clone());
            }
            Command::UpdateRepositoryRemoveTeamAccess { repo, team_slug } => {
                self.repo_teams_removed
                    .entry(repo.clone())
                    .or_default()
                    .push(team_slug.clone());
            }
            Command::UpdateRepositoryUpdateBoolProperty {
                repo,
                property,
                value,
            } => {
                self.repo_bool_updates
                    .entry(repo.clone())
                    .or_default()
                    .push((property.clone(), *value));
            }
            Command::UpdateRepositorySetExternalUser { repo, handle, .. } => {
                self.repo_external_set
                    .entry(repo.clone())
                    .or_default()
                    .push(handle.clone());
            }
            Command::UpdateRepositoryRemoveExternalUser { repo, handle } => {
                self.repo_external_removed
                    .entry(repo.clone())
                    .or_default()
                    .push(handle.clone());
            }
            Command::DeleteRepository { repo } => {
                self.repos_deleted.insert(repo.clone());
            }
            Command::AddRuleset { ruleset } => {
                self.rulesets_added.insert(ruleset.name.clone());
            }
            Command::UpdateRuleset { ruleset } => {
                self.rulesets_updated.insert(ruleset.name.clone());
            }
            Command::DeleteRuleset { name } => {
                self.rulesets_deleted.insert(name.clone());
            }
            Command::NoOp => {}
        }
        Ok(())
    }
}
