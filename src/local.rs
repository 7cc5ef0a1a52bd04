//! Desired state: a validated view over the organization description
//! tree.
//!
//! Layout of the tree:
//!
//! ```text
//! org.toml                      synchronizer configuration
//! users/org/*.toml              managed organization members
//! users/protected/*.toml        members that must never be removed
//! users/external/*.toml         outside collaborators
//! teams/<name>/team.toml        one directory per team
//! repositories/*.toml           one file per repository
//! ```

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::entity::{Repository, Team, User};
use crate::slug;

/// Read interface over the validated desired state, keyed by logical
/// name.
pub trait OrgLocal {
    /// Managed organization members, including protected ones.
    fn users(&self) -> &BTreeMap<String, User>;
    /// Outside collaborators; never members of teams.
    fn external_users(&self) -> &BTreeMap<String, User>;
    fn teams(&self) -> &BTreeMap<String, Team>;
    fn repositories(&self) -> &BTreeMap<String, Repository>;
    fn repo_config(&self) -> &SyncConfig;
}

/// Desired state loaded from a directory tree.
#[derive(Debug, Default)]
pub struct DirectoryLocal {
    users: BTreeMap<String, User>,
    external_users: BTreeMap<String, User>,
    teams: BTreeMap<String, Team>,
    repositories: BTreeMap<String, Repository>,
    config: SyncConfig,
}

impl OrgLocal for DirectoryLocal {
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

impl DirectoryLocal {
    /// Load and validate the description tree rooted at `root`.
    ///
    /// Hard problems (unreadable files, duplicate names, colliding team
    /// slugs, external users inside teams) fail the load; soft problems
    /// are returned as warnings and the affected reference is later
    /// skipped by the planner.
    pub fn load(root: &Path) -> Result<(Self, Vec<String>)> {
        let config = SyncConfig::load(&root.join("org.toml"))?;

        let mut local = DirectoryLocal {
            config,
            ..Default::default()
        };
        let mut warnings = Vec::new();

        local.load_users(root)?;
        local.load_teams(root)?;
        local.load_repositories(root)?;
        local.validate(&mut warnings)?;

        Ok((local, warnings))
    }

    fn load_users(&mut self, root: &Path) -> Result<()> {
        for (subdir, protected, external) in [
            ("org", false, false),
            ("protected", true, false),
            ("external", false, true),
        ] {
            let dir = root.join("users").join(subdir);
            for mut user in load_toml_files::<User>(&dir)? {
                user.protected = user.protected || protected;
                if user.github_id.is_empty() {
                    bail!("user {} has no github_id", user.name);
                }
                let target = if external {
                    &mut self.external_users
                } else {
                    &mut self.users
                };
                if target.insert(user.name.clone(), user.clone()).is_some() {
                    bail!("duplicate user definition: {}", user.name);
                }
            }
        }
        Ok(())
    }

    fn load_teams(&mut self, root: &Path) -> Result<()> {
        let dir = root.join("teams");
        if !dir.exists() {
            return Ok(());
        }

        for entry in WalkDir::new(&dir).min_depth(2).max_depth(2) {
            let entry = entry.context("Failed to walk teams directory")?;
            if entry.file_name() != "team.toml" {
                continue;
            }
            let team: Team = load_toml_file(entry.path())?;
            if self.teams.insert(team.name.clone(), team.clone()).is_some() {
                bail!("duplicate team definition: {}", team.name);
            }
        }
        Ok(())
    }

    fn load_repositories(&mut self, root: &Path) -> Result<()> {
        let dir = root.join("repositories");
        for repo in load_toml_files::<Repository>(&dir)? {
            if self
                .repositories
                .insert(repo.name.clone(), repo.clone())
                .is_some()
            {
                bail!("duplicate repository definition: {}", repo.name);
            }
        }
        Ok(())
    }

    fn validate(&self, warnings: &mut Vec<String>) -> Result<()> {
        // team names must not collide once slugified
        let mut slugs: BTreeMap<String, &str> = BTreeMap::new();
        for team in self.teams.values() {
            let s = slug::make(&team.name);
            if s.is_empty() {
                bail!("team name {:?} produces an empty slug", team.name);
            }
            if let Some(other) = slugs.insert(s.clone(), &team.name) {
                bail!("teams {} and {} collide on slug {}", other, team.name, s);
            }
        }

        for team in self.teams.values() {
            for member in team.members.iter().chain(team.owners.iter()) {
                if self.external_users.contains_key(member) {
                    bail!(
                        "external user {} cannot be a member of team {}",
                        member,
                        team.name
                    );
                }
                if !self.users.contains_key(member) {
                    warnings.push(format!(
                        "team {} references unknown user {}",
                        team.name, member
                    ));
                }
            }
            if let Some(parent) = &team.parent {
                if !self.teams.contains_key(parent) {
                    warnings.push(format!(
                        "team {} references unknown parent team {}",
                        team.name, parent
                    ));
                }
            }
        }

        for repo in self.repositories.values() {
            let declared = repo
                .writers
                .iter()
                .chain(repo.readers.iter())
                .chain(repo.owner.iter());
            for team in declared {
                if !self.teams.contains_key(team) {
                    warnings.push(format!(
                        "repository {} references unknown team {}",
                        repo.name, team
                    ));
                }
            }
            for handle in repo.external_users.keys() {
                if !self.external_users.values().any(|u| &u.github_id == handle) {
                    warnings.push(format!(
                        "repository {} references undeclared external user {}",
                        repo.name, handle
                    ));
                }
            }
        }

        Ok(())
    }
}

fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid file: {}", path.display()))
}

fn load_toml_files<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if entry.path().extension().map(|e| e == "toml").unwrap_or(false) {
            out.push(load_toml_file(entry.path())?);
        }
    }
    Ok(out)
}
