//! Diff planner and pass orchestrator.
//!
//! Planning runs in a fixed dependency order: users, then teams (and
//! their owners sub-teams), then repositories with their grants and
//! properties, then rulesets. Within each kind, deletions are emitted
//! after creations and updates, so the shadow never holds a reference to
//! an object that the same pass already deleted. Every emission is
//! applied to the shadow and appended to the buffer in one step.
//!
//! All iteration feeding command emission walks sorted maps, so
//! identical inputs produce identical command sequences.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::SyncConfig;
use crate::engine::{CancelToken, Command, CommandBuffer, EngineError, Executor, ShadowRemote};
use crate::entity::{Permission, Repository, Ruleset};
use crate::local::OrgLocal;
use crate::remote::{OrgRemote, OrgSnapshot};

/// Remote objects absent from the desired state but left alone because
/// the matching destructive flag is off.
#[derive(Debug, Clone, Default)]
pub struct Unmanaged {
    pub users: BTreeSet<String>,
    pub teams: BTreeSet<String>,
    pub repositories: BTreeSet<String>,
    pub rulesets: BTreeSet<String>,
}

impl Unmanaged {
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
            && self.teams.is_empty()
            && self.repositories.is_empty()
            && self.rulesets.is_empty()
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug)]
pub struct ReconcileReport {
    /// Planned commands, in emission order.
    pub commands: Vec<Command>,
    pub unmanaged: Unmanaged,
    /// The remote as it will look once the plan is applied.
    pub snapshot: OrgSnapshot,
}

/// Compares desired and observed state and drives the difference
/// through an executor.
pub struct Reconciler {
    config: SyncConfig,
}

impl Reconciler {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Run one pass: Begin, plan users/teams/repositories/rulesets,
    /// then Commit (or Rollback on error).
    ///
    /// In dry-run mode every emission is logged but the buffer is never
    /// drained and begin/commit/rollback are not forwarded to the
    /// executor.
    pub fn reconcile(
        &self,
        local: &dyn OrgLocal,
        remote: &dyn OrgRemote,
        executor: &mut dyn Executor,
        dryrun: bool,
        cancel: &CancelToken,
    ) -> Result<ReconcileReport> {
        let mut shadow = ShadowRemote::new(remote);
        let mut buffer = CommandBuffer::new(self.config.max_changesets);
        let mut unmanaged = Unmanaged::default();

        buffer.begin();
        if !dryrun {
            executor.begin();
        }

        if let Err(err) = self.plan(
            local,
            &mut shadow,
            &mut buffer,
            dryrun,
            &mut unmanaged,
            cancel,
        ) {
            buffer.rollback(&err);
            if !dryrun {
                executor.rollback(&err);
            }
            return Err(err);
        }

        if !buffer.is_empty() {
            log::debug!("planned {} commands", buffer.len());
        }

        let commands = buffer.records().to_vec();
        if !dryrun {
            if let Err(gate) = buffer.commit(executor, cancel) {
                let err = anyhow::Error::new(gate);
                executor.rollback(&err);
                return Err(err);
            }
            executor.commit();
        }

        Ok(ReconcileReport {
            commands,
            unmanaged,
            snapshot: shadow.into_snapshot(),
        })
    }

    fn plan(
        &self,
        local: &dyn OrgLocal,
        shadow: &mut ShadowRemote,
        buffer: &mut CommandBuffer,
        dryrun: bool,
        unmanaged: &mut Unmanaged,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.plan_users(local, shadow, buffer, dryrun, unmanaged);
        checkpoint(cancel)?;
        self.plan_teams(local, shadow, buffer, dryrun, unmanaged);
        checkpoint(cancel)?;
        self.plan_repositories(local, shadow, buffer, dryrun, unmanaged);
        checkpoint(cancel)?;
        self.plan_rulesets(shadow, buffer, dryrun, unmanaged);
        Ok(())
    }

    /// Membership first: a user must be in the organization before any
    /// team pass can reference their handle.
    fn plan_users(
        &self,
        local: &dyn OrgLocal,
        shadow: &mut ShadowRemote,
        buffer: &mut CommandBuffer,
        dryrun: bool,
        unmanaged: &mut Unmanaged,
    ) {
        let desired: BTreeSet<String> = local
            .users()
            .values()
            .map(|u| u.github_id.clone())
            .collect();
        let protected: BTreeSet<String> = local
            .users()
            .values()
            .filter(|u| u.protected)
            .map(|u| u.github_id.clone())
            .collect();
        let observed: BTreeSet<String> = shadow.users().keys().cloned().collect();

        for handle in desired.difference(&observed) {
            emit(
                shadow,
                buffer,
                dryrun,
                Command::AddUserToOrg {
                    handle: handle.clone(),
                },
            );
        }

        for handle in observed.difference(&desired) {
            if self.config.destructive_operations.allow_destructive_users
                && !protected.contains(handle)
            {
                emit(
                    shadow,
                    buffer,
                    dryrun,
                    Command::RemoveUserFromOrg {
                        handle: handle.clone(),
                    },
                );
            } else {
                unmanaged.users.insert(handle.clone());
            }
        }
    }

    fn plan_teams(
        &self,
        local: &dyn OrgLocal,
        shadow: &mut ShadowRemote,
        buffer: &mut CommandBuffer,
        dryrun: bool,
        unmanaged: &mut Unmanaged,
    ) {
        let mut managed: BTreeSet<String> = BTreeSet::new();

        for (name, team) in local.teams() {
            let team_slug = team.slug();
            managed.insert(team_slug.clone());
            managed.insert(format!("{}-owners", team_slug));

            let everyone =
                resolve_handles(local, name, team.members.iter().chain(team.owners.iter()));
            let owners = resolve_handles(local, name, team.owners.iter());

            plan_team_members(shadow, buffer, dryrun, name, &team_slug, &everyone);

            let owners_name = team.owners_team_name();
            let owners_slug = format!("{}-owners", team_slug);
            plan_team_members(shadow, buffer, dryrun, &owners_name, &owners_slug, &owners);
        }

        // parent relationships once every local team exists in the shadow
        for (name, team) in local.teams() {
            let parent_name = match &team.parent {
                Some(p) => p,
                None => continue,
            };
            let team_slug = team.slug();
            let parent_slug = match shadow.team_slug_by_name().get(parent_name) {
                Some(s) => s.clone(),
                None => {
                    log::warn!(
                        "team {} references unknown parent team {}, skipping",
                        name,
                        parent_name
                    );
                    continue;
                }
            };
            let current = shadow
                .teams()
                .get(&team_slug)
                .and_then(|t| t.parent_slug.clone());
            if current.as_deref() != Some(parent_slug.as_str()) {
                emit(
                    shadow,
                    buffer,
                    dryrun,
                    Command::UpdateTeamSetParent {
                        team_slug,
                        parent_slug: Some(parent_slug),
                    },
                );
            }
        }

        // deletions last; owners teams follow their parent out
        let remote_slugs: Vec<String> = shadow.teams().keys().cloned().collect();
        for team_slug in remote_slugs {
            if managed.contains(&team_slug) {
                continue;
            }
            if self.config.destructive_operations.allow_destructive_teams {
                emit(shadow, buffer, dryrun, Command::DeleteTeam { team_slug });
            } else {
                unmanaged.teams.insert(team_slug);
            }
        }
    }

    fn plan_repositories(
        &self,
        local: &dyn OrgLocal,
        shadow: &mut ShadowRemote,
        buffer: &mut CommandBuffer,
        dryrun: bool,
        unmanaged: &mut Unmanaged,
    ) {
        // the remote is keyed team -> repos; the diff needs repo -> teams
        let mut teams_per_repo: BTreeMap<String, BTreeMap<String, Permission>> = BTreeMap::new();
        for (team_slug, grants) in shadow.team_repositories() {
            for grant in grants.values() {
                teams_per_repo
                    .entry(grant.repo.clone())
                    .or_default()
                    .insert(team_slug.clone(), grant.permission);
            }
        }

        let mut managed: BTreeSet<String> = BTreeSet::new();
        for (name, repo) in local.repositories() {
            managed.insert(name.clone());

            let writer_slugs = resolve_team_slugs(
                shadow,
                name,
                repo.writers.iter().chain(repo.owner.iter()),
            );
            let mut reader_slugs = resolve_team_slugs(shadow, name, repo.readers.iter());
            // a team appears at most once per repository; write wins
            for s in &writer_slugs {
                reader_slugs.remove(s);
            }

            if !shadow.repositories().contains_key(name) {
                emit(
                    shadow,
                    buffer,
                    dryrun,
                    Command::CreateRepository {
                        name: name.clone(),
                        writers: writer_slugs.iter().cloned().collect(),
                        readers: reader_slugs.iter().cloned().collect(),
                        public: !repo.private,
                    },
                );
                plan_bool_properties(shadow, buffer, dryrun, repo);
                plan_external_users(shadow, buffer, dryrun, repo);
                continue;
            }

            if shadow.repositories()[name].is_archived() {
                // archived repositories are immutable; only unarchival
                // may be planned
                if !repo.archived {
                    emit(
                        shadow,
                        buffer,
                        dryrun,
                        Command::UpdateRepositoryUpdateBoolProperty {
                            repo: name.clone(),
                            property: "archived".to_string(),
                            value: false,
                        },
                    );
                }
                continue;
            }

            let grants = teams_per_repo.get(name).cloned().unwrap_or_default();
            let mut remote_readers: BTreeSet<String> = grants
                .iter()
                .filter(|(_, p)| p.is_read())
                .map(|(s, _)| s.clone())
                .collect();
            let mut remote_writers: BTreeSet<String> = grants
                .iter()
                .filter(|(_, p)| p.is_write())
                .map(|(s, _)| s.clone())
                .collect();

            // reclassify flipped teams before add/remove so a team whose
            // role changed is not dropped and re-granted
            let to_write: Vec<String> =
                remote_readers.intersection(&writer_slugs).cloned().collect();
            for team_slug in to_write {
                emit(
                    shadow,
                    buffer,
                    dryrun,
                    Command::UpdateRepositoryUpdateTeamAccess {
                        repo: name.clone(),
                        team_slug: team_slug.clone(),
                        permission: Permission::Push,
                    },
                );
                remote_readers.remove(&team_slug);
                remote_writers.insert(team_slug);
            }
            let to_read: Vec<String> =
                remote_writers.intersection(&reader_slugs).cloned().collect();
            for team_slug in to_read {
                emit(
                    shadow,
                    buffer,
                    dryrun,
                    Command::UpdateRepositoryUpdateTeamAccess {
                        repo: name.clone(),
                        team_slug: team_slug.clone(),
                        permission: Permission::Pull,
                    },
                );
                remote_writers.remove(&team_slug);
                remote_readers.insert(team_slug);
            }

            for team_slug in remote_readers.difference(&reader_slugs) {
                emit(
                    shadow,
                    buffer,
                    dryrun,
                    Command::UpdateRepositoryRemoveTeamAccess {
                        repo: name.clone(),
                        team_slug: team_slug.clone(),
                    },
                );
            }
            for team_slug in remote_writers.difference(&writer_slugs) {
                emit(
                    shadow,
                    buffer,
                    dryrun,
                    Command::UpdateRepositoryRemoveTeamAccess {
                        repo: name.clone(),
                        team_slug: team_slug.clone(),
                    },
                );
            }
            for team_slug in reader_slugs.difference(&remote_readers) {
                emit(
                    shadow,
                    buffer,
                    dryrun,
                    Command::UpdateRepositoryAddTeamAccess {
                        repo: name.clone(),
                        team_slug: team_slug.clone(),
                        permission: Permission::Pull,
                    },
                );
            }
            for team_slug in writer_slugs.difference(&remote_writers) {
                emit(
                    shadow,
                    buffer,
                    dryrun,
                    Command::UpdateRepositoryAddTeamAccess {
                        repo: name.clone(),
                        team_slug: team_slug.clone(),
                        permission: Permission::Push,
                    },
                );
            }

            plan_bool_properties(shadow, buffer, dryrun, repo);
            plan_external_users(shadow, buffer, dryrun, repo);
        }

        let remote_repos: Vec<String> = shadow.repositories().keys().cloned().collect();
        for name in remote_repos {
            if managed.contains(&name) {
                continue;
            }
            if self
                .config
                .destructive_operations
                .allow_destructive_repositories
            {
                emit(shadow, buffer, dryrun, Command::DeleteRepository { repo: name });
            } else {
                unmanaged.repositories.insert(name);
            }
        }
    }

    fn plan_rulesets(
        &self,
        shadow: &mut ShadowRemote,
        buffer: &mut CommandBuffer,
        dryrun: bool,
        unmanaged: &mut Unmanaged,
    ) {
        if !self.config.enable_rulesets {
            log::debug!("rulesets disabled, skipping");
            return;
        }

        let mut desired: BTreeMap<String, Ruleset> = BTreeMap::new();
        for ruleset in &self.config.rulesets {
            let mut ruleset = ruleset.clone();
            let unknown: Vec<String> = ruleset
                .bypass_apps
                .iter()
                .filter(|app| !shadow.app_ids().contains_key(*app))
                .cloned()
                .collect();
            for app in unknown {
                log::warn!(
                    "ruleset {} references unknown app {}, dropping bypass",
                    ruleset.name,
                    app
                );
                ruleset.bypass_apps.remove(&app);
            }
            desired.insert(ruleset.name.clone(), ruleset);
        }

        for (name, ruleset) in &desired {
            let action = match shadow.rulesets().get(name) {
                None => Some(Command::AddRuleset {
                    ruleset: ruleset.clone(),
                }),
                Some(current) if current != ruleset => Some(Command::UpdateRuleset {
                    ruleset: ruleset.clone(),
                }),
                Some(_) => None,
            };
            if let Some(cmd) = action {
                emit(shadow, buffer, dryrun, cmd);
            }
        }

        let remote_names: Vec<String> = shadow.rulesets().keys().cloned().collect();
        for name in remote_names {
            if desired.contains_key(&name) {
                continue;
            }
            if self.config.destructive_operations.allow_destructive_rulesets {
                emit(shadow, buffer, dryrun, Command::DeleteRuleset { name });
            } else {
                unmanaged.rulesets.insert(name);
            }
        }
    }
}

/// Log, mirror into the shadow, and append to the buffer.
fn emit(shadow: &mut ShadowRemote, buffer: &mut CommandBuffer, dryrun: bool, cmd: Command) {
    log::info!("dryrun={} {}", dryrun, cmd);
    shadow.apply(&cmd);
    buffer.record(cmd);
}

fn checkpoint(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled.into());
    }
    Ok(())
}

/// Map logical user names to account handles; unresolved names are
/// skipped with a warning so one bad reference cannot block the rest of
/// the organization.
fn resolve_handles<'a>(
    local: &dyn OrgLocal,
    team_name: &str,
    names: impl Iterator<Item = &'a String>,
) -> Vec<String> {
    let mut handles = BTreeSet::new();
    for name in names {
        match local.users().get(name) {
            Some(user) => {
                handles.insert(user.github_id.clone());
            }
            None => log::warn!(
                "team {} references unknown user {}, skipping",
                team_name,
                name
            ),
        }
    }
    handles.into_iter().collect()
}

/// Map declared team names to slugs through the shadow, so teams created
/// earlier in the same pass resolve too.
fn resolve_team_slugs<'a>(
    shadow: &ShadowRemote,
    repo_name: &str,
    names: impl Iterator<Item = &'a String>,
) -> BTreeSet<String> {
    let mut slugs = BTreeSet::new();
    for name in names {
        match shadow.team_slug_by_name().get(name) {
            Some(s) => {
                slugs.insert(s.clone());
            }
            None => log::warn!(
                "repository {} references unknown team {}, skipping",
                repo_name,
                name
            ),
        }
    }
    slugs
}

/// Create a team, or converge its member set when it already exists.
/// Removals come before additions, matching the remote-first diff.
fn plan_team_members(
    shadow: &mut ShadowRemote,
    buffer: &mut CommandBuffer,
    dryrun: bool,
    name: &str,
    team_slug: &str,
    desired: &[String],
) {
    if !shadow.teams().contains_key(team_slug) {
        emit(
            shadow,
            buffer,
            dryrun,
            Command::CreateTeam {
                name: name.to_string(),
                members: desired.to_vec(),
            },
        );
        return;
    }

    let current = shadow.teams()[team_slug].members.clone();
    let want: BTreeSet<String> = desired.iter().cloned().collect();

    for handle in current.difference(&want) {
        emit(
            shadow,
            buffer,
            dryrun,
            Command::UpdateTeamRemoveMember {
                team_slug: team_slug.to_string(),
                handle: handle.clone(),
            },
        );
    }
    for handle in want.difference(&current) {
        emit(
            shadow,
            buffer,
            dryrun,
            Command::UpdateTeamAddMember {
                team_slug: team_slug.to_string(),
                handle: handle.clone(),
                role: "member".to_string(),
            },
        );
    }
}

/// `private` and `archived` are always reconciled; the other recognized
/// properties only when the source tree declares them.
fn plan_bool_properties(
    shadow: &mut ShadowRemote,
    buffer: &mut CommandBuffer,
    dryrun: bool,
    repo: &Repository,
) {
    let current = shadow.repositories()[&repo.name].bool_properties.clone();
    for (property, value) in repo.declared_bool_properties() {
        if current.get(property).copied() != Some(value) {
            emit(
                shadow,
                buffer,
                dryrun,
                Command::UpdateRepositoryUpdateBoolProperty {
                    repo: repo.name.clone(),
                    property: property.to_string(),
                    value,
                },
            );
        }
    }
}

fn plan_external_users(
    shadow: &mut ShadowRemote,
    buffer: &mut CommandBuffer,
    dryrun: bool,
    repo: &Repository,
) {
    let current = shadow.repositories()[&repo.name].external_users.clone();

    for (handle, permission) in &repo.external_users {
        if current.get(handle) != Some(permission) {
            emit(
                shadow,
                buffer,
                dryrun,
                Command::UpdateRepositorySetExternalUser {
                    repo: repo.name.clone(),
                    handle: handle.clone(),
                    permission: *permission,
                },
            );
        }
    }
    for handle in current.keys() {
        if !repo.external_users.contains_key(handle) {
            emit(
                shadow,
                buffer,
                dryrun,
                Command::UpdateRepositoryRemoveExternalUser {
                    repo: repo.name.clone(),
                    handle: handle.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RecorderExecutor;
    use crate::entity::{Enforcement, Team, User};
    use crate::remote::{RemoteRepository, RemoteTeam, TeamRepoGrant};

    #[derive(Default)]
    struct LocalMock {
        users: BTreeMap<String, User>,
        external_users: BTreeMap<String, User>,
        teams: BTreeMap<String, Team>,
        repositories: BTreeMap<String, Repository>,
        config: SyncConfig,
    }

    impl OrgLocal for LocalMock {
        fn users(&self) -> &BTreeMap<String, User> {
            &self.users
        }
        fn external_users(&self) -> &BTreeMap<String, User> {
            &self.external_users
        }
        fn teams(&self) -> &BTreeMap<String, Team> {
            &self.teams
        }
        fn repositories(&self) -> &BTreeMap<String, Repository> {
            &self.repositories
        }
        fn repo_config(&self) -> &SyncConfig {
            &self.config
        }
    }

    impl LocalMock {
        fn with_user(mut self, name: &str, handle: &str) -> Self {
            self.users.insert(
                name.to_string(),
                User {
                    name: name.to_string(),
                    github_id: handle.to_string(),
                    protected: false,
                },
            );
            self
        }

        fn with_team(mut self, name: &str, owners: &[&str], members: &[&str]) -> Self {
            self.teams.insert(
                name.to_string(),
                Team {
                    name: name.to_string(),
                    parent: None,
                    owners: owners.iter().map(|s| s.to_string()).collect(),
                    members: members.iter().map(|s| s.to_string()).collect(),
                },
            );
            self
        }

        fn with_repo(mut self, repo: Repository) -> Self {
            self.repositories.insert(repo.name.clone(), repo);
            self
        }
    }

    fn repo(name: &str) -> Repository {
        Repository {
            name: name.to_string(),
            owner: None,
            writers: vec![],
            readers: vec![],
            external_users: BTreeMap::new(),
            private: true,
            archived: false,
            allow_auto_merge: None,
            delete_branch_on_merge: None,
            allow_update_branch: None,
        }
    }

    fn remote_team(name: &str, team_slug: &str, members: &[&str]) -> RemoteTeam {
        RemoteTeam {
            name: name.to_string(),
            slug: team_slug.to_string(),
            members: members.iter().map(|s| s.to_string()).collect(),
            parent_slug: None,
        }
    }

    /// Remote repository with the same property defaults the local
    /// entity has, so a synced pair produces no drift.
    fn remote_repo(name: &str) -> RemoteRepository {
        RemoteRepository {
            name: name.to_string(),
            bool_properties: [
                ("private".to_string(), true),
                ("archived".to_string(), false),
            ]
            .into_iter()
            .collect(),
            external_users: BTreeMap::new(),
        }
    }

    fn grant(remote: &mut OrgSnapshot, team_slug: &str, repo_name: &str, permission: Permission) {
        remote
            .team_repositories
            .entry(team_slug.to_string())
            .or_default()
            .insert(
                repo_name.to_string(),
                TeamRepoGrant {
                    repo: repo_name.to_string(),
                    permission,
                },
            );
    }

    /// Local and remote fully in sync for team `existing` with two
    /// users, the base fixture for the repository scenarios.
    fn synced_fixture() -> (LocalMock, OrgSnapshot) {
        let local = LocalMock::default()
            .with_user("existing.owner", "existing_owner")
            .with_user("existing.member", "existing_member")
            .with_team("existing", &["existing.owner"], &["existing.member"]);

        let mut remote = OrgSnapshot::default();
        remote
            .users
            .insert("existing_owner".to_string(), "existing_owner".to_string());
        remote
            .users
            .insert("existing_member".to_string(), "existing_member".to_string());
        remote.insert_team(remote_team(
            "existing",
            "existing",
            &["existing_owner", "existing_member"],
        ));
        remote.insert_team(remote_team(
            "existing-owners",
            "existing-owners",
            &["existing_owner"],
        ));
        (local, remote)
    }

    /// Add a synced `reader` team to the fixture.
    fn add_reader_team(local: LocalMock, remote: &mut OrgSnapshot) -> LocalMock {
        remote.insert_team(remote_team(
            "reader",
            "reader",
            &["existing_owner", "existing_member"],
        ));
        remote.insert_team(remote_team("reader-owners", "reader-owners", &["existing_owner"]));
        local.with_team("reader", &["existing.owner"], &["existing.member"])
    }

    fn reconcile(local: &LocalMock, remote: &OrgSnapshot) -> (ReconcileReport, RecorderExecutor) {
        let reconciler = Reconciler::new(local.config.clone());
        let mut recorder = RecorderExecutor::new();
        let report = reconciler
            .reconcile(local, remote, &mut recorder, false, &CancelToken::new())
            .unwrap();
        (report, recorder)
    }

    #[test]
    fn test_new_team_creates_users_team_and_owners() {
        let local = LocalMock::default()
            .with_user("alice", "ghA")
            .with_user("bob", "ghB")
            .with_team("new", &["alice"], &["bob"]);
        let remote = OrgSnapshot::default();

        let (report, recorder) = reconcile(&local, &remote);

        assert_eq!(
            report.commands,
            vec![
                Command::AddUserToOrg {
                    handle: "ghA".to_string()
                },
                Command::AddUserToOrg {
                    handle: "ghB".to_string()
                },
                Command::CreateTeam {
                    name: "new".to_string(),
                    members: vec!["ghA".to_string(), "ghB".to_string()],
                },
                Command::CreateTeam {
                    name: "new-owners".to_string(),
                    members: vec!["ghA".to_string()],
                },
            ]
        );
        assert_eq!(recorder.teams_created["new"].len(), 2);
        assert_eq!(recorder.teams_created["new-owners"].len(), 1);
        // read-after-write on the shadow survives into the report
        assert_eq!(
            report.snapshot.team_slug_by_name().get("new"),
            Some(&"new".to_string())
        );
    }

    #[test]
    fn test_new_team_with_non_ascii_slug() {
        let local = LocalMock::default()
            .with_user("alice", "ghA")
            .with_user("bob", "ghB")
            .with_team("nouveauté", &["alice"], &["bob"]);
        let remote = OrgSnapshot::default();

        let (report, recorder) = reconcile(&local, &remote);

        assert_eq!(recorder.teams_created["nouveauté"].len(), 2);
        assert_eq!(recorder.teams_created["nouveauté-owners"].len(), 1);
        assert!(report.snapshot.teams.contains_key("nouveaute"));
        assert!(report.snapshot.teams.contains_key("nouveaute-owners"));
    }

    #[test]
    fn test_existing_team_gains_member() {
        let (mut local, mut remote) = synced_fixture();
        local = local.with_user("existing.owner2", "existing_owner2");
        local.teams.get_mut("existing").unwrap().owners =
            vec!["existing.owner".to_string(), "existing.owner2".to_string()];
        remote.users.insert(
            "existing_owner2".to_string(),
            "existing_owner2".to_string(),
        );

        let (_, recorder) = reconcile(&local, &remote);

        assert!(recorder.teams_created.is_empty());
        assert_eq!(recorder.team_members_added["existing"], ["existing_owner2"]);
        // the owners sub-team converges too
        assert_eq!(
            recorder.team_members_added["existing-owners"],
            ["existing_owner2"]
        );
    }

    #[test]
    fn test_member_removed_from_existing_team() {
        let (mut local, remote) = synced_fixture();
        local.teams.get_mut("existing").unwrap().members = vec![];

        let (_, recorder) = reconcile(&local, &remote);

        assert_eq!(
            recorder.team_members_removed["existing"],
            ["existing_member"]
        );
        assert!(recorder.team_members_removed.get("existing-owners").is_none());
    }

    #[test]
    fn test_team_deletion_is_gated() {
        let local = LocalMock::default();
        let mut remote = OrgSnapshot::default();
        remote.insert_team(remote_team("removing", "removing", &["existing_owner"]));

        let (report, recorder) = reconcile(&local, &remote);
        assert!(recorder.teams_deleted.is_empty());
        assert!(report.unmanaged.teams.contains("removing"));
        assert!(report.snapshot.teams.contains_key("removing"));
    }

    #[test]
    fn test_team_deletion_when_allowed() {
        let mut local = LocalMock::default();
        local.config.destructive_operations.allow_destructive_teams = true;
        let mut remote = OrgSnapshot::default();
        remote.insert_team(remote_team("removing", "removing", &[]));
        remote.insert_team(remote_team("removing-owners", "removing-owners", &[]));

        let (report, recorder) = reconcile(&local, &remote);

        assert_eq!(recorder.teams_deleted.len(), 2);
        assert!(report.unmanaged.is_empty());
        assert!(report.snapshot.teams.is_empty());
    }

    #[test]
    fn test_new_repo_without_owner() {
        let local = LocalMock::default().with_repo(repo("new"));
        let remote = OrgSnapshot::default();

        let (report, recorder) = reconcile(&local, &remote);

        assert_eq!(recorder.repos_created.len(), 1);
        assert!(report.snapshot.repositories.contains_key("new"));
    }

    #[test]
    fn test_new_repo_with_owner_grants_write() {
        let (mut local, remote) = synced_fixture();
        let mut r = repo("new");
        r.owner = Some("existing".to_string());
        local = local.with_repo(r);

        let (report, recorder) = reconcile(&local, &remote);

        assert_eq!(recorder.repos_created.len(), 1);
        assert!(report.commands.contains(&Command::CreateRepository {
            name: "new".to_string(),
            writers: vec!["existing".to_string()],
            readers: vec![],
            public: false,
        }));
        // the shadow records the grant for the rest of the pass
        assert_eq!(
            report.snapshot.team_repositories["existing"]["new"].permission,
            Permission::Push
        );
    }

    #[test]
    fn test_reader_to_writer_flip_updates_in_place() {
        let (mut local, mut remote) = synced_fixture();
        let mut r = repo("myrepo");
        r.owner = Some("existing".to_string());
        local = local.with_repo(r);
        remote
            .repositories
            .insert("myrepo".to_string(), remote_repo("myrepo"));
        grant(&mut remote, "existing", "myrepo", Permission::Pull);

        let (report, recorder) = reconcile(&local, &remote);

        assert_eq!(
            report.commands,
            vec![Command::UpdateRepositoryUpdateTeamAccess {
                repo: "myrepo".to_string(),
                team_slug: "existing".to_string(),
                permission: Permission::Push,
            }]
        );
        assert!(recorder.repo_teams_added.is_empty());
        assert!(recorder.repo_teams_removed.is_empty());
    }

    #[test]
    fn test_writer_to_reader_flip_updates_in_place() {
        let (mut local, mut remote) = synced_fixture();
        let mut r = repo("myrepo");
        r.readers = vec!["existing".to_string()];
        local = local.with_repo(r);
        remote
            .repositories
            .insert("myrepo".to_string(), remote_repo("myrepo"));
        grant(&mut remote, "existing", "myrepo", Permission::Push);

        let (report, _) = reconcile(&local, &remote);

        assert_eq!(
            report.commands,
            vec![Command::UpdateRepositoryUpdateTeamAccess {
                repo: "myrepo".to_string(),
                team_slug: "existing".to_string(),
                permission: Permission::Pull,
            }]
        );
    }

    #[test]
    fn test_add_reader_to_existing_repo() {
        let (mut local, mut remote) = synced_fixture();
        local = add_reader_team(local, &mut remote);
        let mut r = repo("myrepo");
        r.owner = Some("existing".to_string());
        r.readers = vec!["reader".to_string()];
        local = local.with_repo(r);
        remote
            .repositories
            .insert("myrepo".to_string(), remote_repo("myrepo"));
        grant(&mut remote, "existing", "myrepo", Permission::Push);

        let (report, recorder) = reconcile(&local, &remote);

        assert_eq!(
            report.commands,
            vec![Command::UpdateRepositoryAddTeamAccess {
                repo: "myrepo".to_string(),
                team_slug: "reader".to_string(),
                permission: Permission::Pull,
            }]
        );
        assert!(recorder.repo_teams_updated.is_empty());
    }

    #[test]
    fn test_drop_reader_from_existing_repo() {
        let (mut local, mut remote) = synced_fixture();
        local = add_reader_team(local, &mut remote);
        let mut r = repo("myrepo");
        r.owner = Some("existing".to_string());
        local = local.with_repo(r);
        remote
            .repositories
            .insert("myrepo".to_string(), remote_repo("myrepo"));
        grant(&mut remote, "existing", "myrepo", Permission::Push);
        grant(&mut remote, "reader", "myrepo", Permission::Pull);

        let (report, _) = reconcile(&local, &remote);

        assert_eq!(
            report.commands,
            vec![Command::UpdateRepositoryRemoveTeamAccess {
                repo: "myrepo".to_string(),
                team_slug: "reader".to_string(),
            }]
        );
    }

    #[test]
    fn test_repo_deletion_is_gated() {
        let local = LocalMock::default();
        let mut remote = OrgSnapshot::default();
        remote
            .repositories
            .insert("removing".to_string(), remote_repo("removing"));

        let (report, recorder) = reconcile(&local, &remote);
        assert!(recorder.repos_deleted.is_empty());
        assert!(report.unmanaged.repositories.contains("removing"));

        let mut local = LocalMock::default();
        local
            .config
            .destructive_operations
            .allow_destructive_repositories = true;
        let (report, recorder) = reconcile(&local, &remote);
        assert_eq!(recorder.repos_deleted.len(), 1);
        assert!(!report.snapshot.repositories.contains_key("removing"));
    }

    #[test]
    fn test_user_removal_is_gated() {
        let local = LocalMock::default().with_user("alice", "ghA");
        let mut remote = OrgSnapshot::default();
        remote.users.insert("ghA".to_string(), "ghA".to_string());
        remote.users.insert("ghZ".to_string(), "ghZ".to_string());

        let (report, recorder) = reconcile(&local, &remote);
        assert!(recorder.users_removed.is_empty());
        assert!(report.unmanaged.users.contains("ghZ"));

        let mut local = LocalMock::default().with_user("alice", "ghA");
        local.config.destructive_operations.allow_destructive_users = true;
        let (report, recorder) = reconcile(&local, &remote);
        assert_eq!(recorder.users_removed, BTreeSet::from(["ghZ".to_string()]));
        assert!(report.unmanaged.users.is_empty());
    }

    #[test]
    fn test_protected_user_produces_no_commands() {
        let mut local = LocalMock::default().with_user("bot", "ghBot");
        local.users.get_mut("bot").unwrap().protected = true;
        local.config.destructive_operations.allow_destructive_users = true;
        let mut remote = OrgSnapshot::default();
        remote.users.insert("ghBot".to_string(), "ghBot".to_string());

        let (report, _) = reconcile(&local, &remote);
        assert!(report.commands.is_empty());
    }

    #[test]
    fn test_bool_properties_reconciled() {
        let (mut local, mut remote) = synced_fixture();
        let mut r = repo("myrepo");
        r.private = false;
        r.allow_auto_merge = Some(true);
        local = local.with_repo(r);
        remote
            .repositories
            .insert("myrepo".to_string(), remote_repo("myrepo"));

        let (_, recorder) = reconcile(&local, &remote);

        let updates = &recorder.repo_bool_updates["myrepo"];
        assert!(updates.contains(&("private".to_string(), false)));
        assert!(updates.contains(&("allow_auto_merge".to_string(), true)));
        // undeclared optional properties are not reconciled
        assert!(!updates.iter().any(|(p, _)| p == "delete_branch_on_merge"));
        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn test_archived_remote_repo_is_immutable() {
        let (mut local, mut remote) = synced_fixture();
        let mut r = repo("frozen");
        r.archived = true;
        // drift that must be ignored while archived
        r.allow_auto_merge = Some(true);
        r.readers = vec!["existing".to_string()];
        local = local.with_repo(r);
        let mut rr = remote_repo("frozen");
        rr.bool_properties.insert("archived".to_string(), true);
        remote.repositories.insert("frozen".to_string(), rr);

        let (report, _) = reconcile(&local, &remote);
        assert!(report.commands.is_empty());
    }

    #[test]
    fn test_archived_remote_repo_can_be_unarchived() {
        let (mut local, mut remote) = synced_fixture();
        local = local.with_repo(repo("frozen"));
        let mut rr = remote_repo("frozen");
        rr.bool_properties.insert("archived".to_string(), true);
        remote.repositories.insert("frozen".to_string(), rr);

        let (report, _) = reconcile(&local, &remote);
        assert_eq!(
            report.commands,
            vec![Command::UpdateRepositoryUpdateBoolProperty {
                repo: "frozen".to_string(),
                property: "archived".to_string(),
                value: false,
            }]
        );
    }

    #[test]
    fn test_external_users_diffed() {
        let (mut local, mut remote) = synced_fixture();
        let mut r = repo("myrepo");
        r.external_users
            .insert("ghExt".to_string(), Permission::Push);
        r.external_users
            .insert("ghNew".to_string(), Permission::Pull);
        local = local.with_repo(r);
        let mut rr = remote_repo("myrepo");
        rr.external_users
            .insert("ghExt".to_string(), Permission::Pull);
        rr.external_users
            .insert("ghOld".to_string(), Permission::Push);
        remote.repositories.insert("myrepo".to_string(), rr);

        let (report, recorder) = reconcile(&local, &remote);

        assert_eq!(
            recorder.repo_external_set["myrepo"],
            ["ghExt", "ghNew"]
        );
        assert_eq!(recorder.repo_external_removed["myrepo"], ["ghOld"]);
        let ext = &report.snapshot.repositories["myrepo"].external_users;
        assert_eq!(ext.get("ghExt"), Some(&Permission::Push));
        assert!(!ext.contains_key("ghOld"));
    }

    #[test]
    fn test_parent_team_set_after_creation() {
        let local = LocalMock::default()
            .with_user("alice", "ghA")
            .with_team("parent", &["alice"], &[])
            .with_team("child", &["alice"], &[]);
        let mut local = local;
        local.teams.get_mut("child").unwrap().parent = Some("parent".to_string());
        let remote = OrgSnapshot::default();

        let (report, recorder) = reconcile(&local, &remote);

        assert_eq!(
            recorder.team_parents_set.get("child"),
            Some(&Some("parent".to_string()))
        );
        let create_idx = report
            .commands
            .iter()
            .position(|c| matches!(c, Command::CreateTeam { name, .. } if name == "parent"))
            .unwrap();
        let parent_idx = report
            .commands
            .iter()
            .position(|c| matches!(c, Command::UpdateTeamSetParent { .. }))
            .unwrap();
        assert!(create_idx < parent_idx);
        assert_eq!(
            report.snapshot.teams["child"].parent_slug,
            Some("parent".to_string())
        );
    }

    #[test]
    fn test_parent_already_set_is_left_alone() {
        let (mut local, mut remote) = synced_fixture();
        local = local.with_team("infra", &["existing.owner"], &[]);
        local.teams.get_mut("infra").unwrap().parent = Some("existing".to_string());
        let mut t = remote_team("infra", "infra", &["existing_owner"]);
        t.parent_slug = Some("existing".to_string());
        remote.insert_team(t);
        remote.insert_team(remote_team("infra-owners", "infra-owners", &["existing_owner"]));

        let (report, _) = reconcile(&local, &remote);
        assert!(report.commands.is_empty());
    }

    #[test]
    fn test_grant_on_new_team_follows_its_creation() {
        let (mut local, mut remote) = synced_fixture();
        local = local.with_team("newteam", &["existing.owner"], &[]);
        let mut r = repo("myrepo");
        r.writers = vec!["newteam".to_string()];
        local = local.with_repo(r);
        remote
            .repositories
            .insert("myrepo".to_string(), remote_repo("myrepo"));

        let (report, _) = reconcile(&local, &remote);

        let create_idx = report
            .commands
            .iter()
            .position(|c| matches!(c, Command::CreateTeam { name, .. } if name == "newteam"))
            .unwrap();
        let grant_idx = report
            .commands
            .iter()
            .position(|c| {
                matches!(
                    c,
                    Command::UpdateRepositoryAddTeamAccess { team_slug, .. }
                        if team_slug == "newteam"
                )
            })
            .unwrap();
        assert!(create_idx < grant_idx);
    }

    #[test]
    fn test_rulesets_diffed_by_name() {
        let mut local = LocalMock::default();
        local.config.enable_rulesets = true;
        local.config.rulesets = vec![
            Ruleset {
                name: "default".to_string(),
                enforcement: Enforcement::Active,
                bypass_apps: ["release-bot".to_string()].into_iter().collect(),
                include: vec!["main".to_string()],
                exclude: vec![],
                rules: Default::default(),
            },
            Ruleset {
                name: "fresh".to_string(),
                enforcement: Enforcement::Evaluate,
                bypass_apps: Default::default(),
                include: vec!["release/*".to_string()],
                exclude: vec![],
                rules: Default::default(),
            },
        ];

        let mut remote = OrgSnapshot::default();
        remote.app_ids.insert("release-bot".to_string(), 1234);
        // same name, drifted enforcement
        remote.rulesets.insert(
            "default".to_string(),
            Ruleset {
                name: "default".to_string(),
                enforcement: Enforcement::Evaluate,
                bypass_apps: ["release-bot".to_string()].into_iter().collect(),
                include: vec!["main".to_string()],
                exclude: vec![],
                rules: Default::default(),
            },
        );
        remote.rulesets.insert(
            "stale".to_string(),
            Ruleset {
                name: "stale".to_string(),
                enforcement: Enforcement::Active,
                bypass_apps: Default::default(),
                include: vec![],
                exclude: vec![],
                rules: Default::default(),
            },
        );

        let (report, recorder) = reconcile(&local, &remote);
        assert!(recorder.rulesets_added.contains("fresh"));
        assert!(recorder.rulesets_updated.contains("default"));
        assert!(recorder.rulesets_deleted.is_empty());
        assert!(report.unmanaged.rulesets.contains("stale"));

        local.config.destructive_operations.allow_destructive_rulesets = true;
        let (_, recorder) = reconcile(&local, &remote);
        assert!(recorder.rulesets_deleted.contains("stale"));
    }

    #[test]
    fn test_rulesets_skipped_when_disabled() {
        let mut local = LocalMock::default();
        local.config.enable_rulesets = false;
        local.config.rulesets = vec![Ruleset {
            name: "default".to_string(),
            enforcement: Enforcement::Active,
            bypass_apps: Default::default(),
            include: vec!["main".to_string()],
            exclude: vec![],
            rules: Default::default(),
        }];
        let remote = OrgSnapshot::default();

        let (report, _) = reconcile(&local, &remote);
        assert!(report.commands.is_empty());
    }

    #[test]
    fn test_unknown_bypass_app_is_dropped() {
        let mut local = LocalMock::default();
        local.config.enable_rulesets = true;
        local.config.rulesets = vec![Ruleset {
            name: "default".to_string(),
            enforcement: Enforcement::Active,
            bypass_apps: ["ghost-app".to_string()].into_iter().collect(),
            include: vec!["main".to_string()],
            exclude: vec![],
            rules: Default::default(),
        }];
        let remote = OrgSnapshot::default();

        let (report, _) = reconcile(&local, &remote);
        assert!(report.snapshot.rulesets["default"].bypass_apps.is_empty());
    }

    #[test]
    fn test_gate_trip_leaves_executor_untouched() {
        let mut local = LocalMock::default();
        for i in 0..51 {
            local = local.with_user(&format!("user{:02}", i), &format!("gh{:02}", i));
        }
        local.config.max_changesets = 50;
        let remote = OrgSnapshot::default();

        let reconciler = Reconciler::new(local.config.clone());
        let mut recorder = RecorderExecutor::new();
        let err = reconciler
            .reconcile(&local, &remote, &mut recorder, false, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::GateExceeded {
                planned: 51,
                max: 50
            })
        ));
        assert_eq!(recorder.applied, 0);
    }

    #[test]
    fn test_dry_run_never_drains_the_buffer() {
        let local = LocalMock::default().with_user("alice", "ghA");
        let remote = OrgSnapshot::default();

        let reconciler = Reconciler::new(local.config.clone());
        let mut recorder = RecorderExecutor::new();
        let report = reconciler
            .reconcile(&local, &remote, &mut recorder, true, &CancelToken::new())
            .unwrap();

        assert_eq!(report.commands.len(), 1);
        assert_eq!(recorder.applied, 0);
    }

    #[test]
    fn test_cancellation_between_steps() {
        let local = LocalMock::default().with_user("alice", "ghA");
        let remote = OrgSnapshot::default();

        let cancel = CancelToken::new();
        cancel.cancel();

        let reconciler = Reconciler::new(local.config.clone());
        let mut recorder = RecorderExecutor::new();
        let err = reconciler
            .reconcile(&local, &remote, &mut recorder, false, &cancel)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Cancelled)
        ));
        assert_eq!(recorder.applied, 0);
    }

    #[test]
    fn test_second_pass_is_empty() {
        let mut local = LocalMock::default()
            .with_user("alice", "ghA")
            .with_user("bob", "ghB")
            .with_team("platform", &["alice"], &["bob"])
            .with_team("apps", &["bob"], &[]);
        local.teams.get_mut("apps").unwrap().parent = Some("platform".to_string());

        let mut r = repo("tools");
        r.owner = Some("platform".to_string());
        r.readers = vec!["apps".to_string()];
        r.private = false;
        r.allow_auto_merge = Some(true);
        r.external_users
            .insert("ghExt".to_string(), Permission::Pull);
        local = local.with_repo(r);

        local.config.enable_rulesets = true;
        local.config.rulesets = vec![Ruleset {
            name: "default".to_string(),
            enforcement: Enforcement::Active,
            bypass_apps: ["release-bot".to_string()].into_iter().collect(),
            include: vec!["main".to_string()],
            exclude: vec![],
            rules: Default::default(),
        }];
        local.config.destructive_operations = crate::config::DestructiveOperations {
            allow_destructive_users: true,
            allow_destructive_teams: true,
            allow_destructive_repositories: true,
            allow_destructive_rulesets: true,
        };

        let mut remote = OrgSnapshot::default();
        remote.app_ids.insert("release-bot".to_string(), 1234);
        remote.users.insert("ghZ".to_string(), "ghZ".to_string());
        remote.insert_team(remote_team("legacy", "legacy", &["ghZ"]));
        remote
            .repositories
            .insert("attic".to_string(), remote_repo("attic"));

        let (first, _) = reconcile(&local, &remote);
        assert!(!first.commands.is_empty());

        // the remote now looks like the applied plan
        let (second, recorder) = reconcile(&local, &first.snapshot);
        assert!(
            second.commands.is_empty(),
            "second pass should be empty, got: {:?}",
            second.commands
        );
        assert_eq!(recorder.applied, 0);
    }
}
