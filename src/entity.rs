//! Desired-state entities loaded from the organization description tree.
//!
//! Every entity here is a plain value: the loader builds them, the
//! planner consumes them, and nothing survives past the end of a
//! reconciliation pass.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::slug;

/// Repository permission levels, as the hosted platform names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Pull,
    Triage,
    Push,
    Maintain,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Pull => "pull",
            Permission::Triage => "triage",
            Permission::Push => "push",
            Permission::Maintain => "maintain",
            Permission::Admin => "admin",
        }
    }

    /// The planner only distinguishes two access classes: `pull` is
    /// read, everything else is write.
    pub fn is_read(&self) -> bool {
        matches!(self, Permission::Pull)
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person known to the organization, keyed by logical name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    /// Account handle on the hosted platform.
    pub github_id: String,
    /// Protected users are never candidates for removal from the org.
    #[serde(default)]
    pub protected: bool,
}

/// A team as declared in the source tree.
///
/// Members and owners are logical user names; the planner resolves them
/// to account handles. Every managed team gets a paired
/// `<name>-owners` sub-team whose members are the owners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    /// Logical name of the parent team, if any.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

impl Team {
    pub fn slug(&self) -> String {
        slug::make(&self.name)
    }

    pub fn owners_team_name(&self) -> String {
        format!("{}-owners", self.name)
    }
}

/// A repository as declared in the source tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    /// Team that owns the repository; always granted write access.
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub writers: Vec<String>,
    #[serde(default)]
    pub readers: Vec<String>,
    /// Outside collaborators, account handle to permission.
    #[serde(default)]
    pub external_users: BTreeMap<String, Permission>,
    #[serde(default = "default_private")]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub allow_auto_merge: Option<bool>,
    #[serde(default)]
    pub delete_branch_on_merge: Option<bool>,
    #[serde(default)]
    pub allow_update_branch: Option<bool>,
}

fn default_private() -> bool {
    true
}

impl Repository {
    /// Boolean properties to reconcile for this repository.
    ///
    /// `private` and `archived` are always reconciled; the remaining
    /// properties only when the source tree declares them.
    pub fn declared_bool_properties(&self) -> BTreeMap<&'static str, bool> {
        let mut props = BTreeMap::new();
        props.insert("private", self.private);
        props.insert("archived", self.archived);
        if let Some(v) = self.allow_auto_merge {
            props.insert("allow_auto_merge", v);
        }
        if let Some(v) = self.delete_branch_on_merge {
            props.insert("delete_branch_on_merge", v);
        }
        if let Some(v) = self.allow_update_branch {
            props.insert("allow_update_branch", v);
        }
        props
    }
}

/// Ruleset enforcement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    Disabled,
    Active,
    Evaluate,
}

impl Default for Enforcement {
    fn default() -> Self {
        Enforcement::Evaluate
    }
}

/// Branch protection rules bundled by a ruleset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesetRules {
    #[serde(default)]
    pub required_approving_review_count: Option<u32>,
    #[serde(default)]
    pub required_status_checks: BTreeSet<String>,
    #[serde(default)]
    pub requires_signed_commits: bool,
    #[serde(default)]
    pub requires_linear_history: bool,
    #[serde(default)]
    pub forbids_force_pushes: bool,
    #[serde(default)]
    pub forbids_deletion: bool,
}

/// A named branch-protection / merge-requirement bundle applied by
/// pattern. Diffed field-wise against its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruleset {
    pub name: String,
    #[serde(default)]
    pub enforcement: Enforcement,
    /// App names allowed to bypass the ruleset; resolved against the
    /// remote app map during planning.
    #[serde(default)]
    pub bypass_apps: BTreeSet<String>,
    /// Branch patterns the ruleset applies to.
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub rules: RulesetRules,
}
