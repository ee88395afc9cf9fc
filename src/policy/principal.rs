//! Principal and resource matching for policy selection.

use std::collections::BTreeSet;

use crate::policy::config::{PrincipalSpec, ResourceSpec};
use crate::policy::{Principal, Resource};

impl PrincipalSpec {
    /// Returns `true` if any populated field of this entry matches.
    pub fn matches(&self, principal: &Principal) -> bool {
        if self.any {
            return true;
        }
        if let Some(user) = &self.user {
            if !principal.user_id.is_empty() && *user == principal.user_id {
                return true;
            }
        }
        if let Some(service) = &self.service {
            if !principal.service.is_empty() && *service == principal.service {
                return true;
            }
        }
        if let Some(role) = &self.role {
            if principal.roles.iter().any(|r| r == role) {
                return true;
            }
        }
        false
    }
}

/// Returns `true` if the policy's principal list admits `principal`.
///
/// An empty list admits everyone.
pub fn principals_match(specs: &[PrincipalSpec], principal: &Principal) -> bool {
    specs.is_empty() || specs.iter().any(|spec| spec.matches(principal))
}

impl ResourceSpec {
    /// Returns `true` if every criterion of this entry holds for `resource`.
    pub fn matches(&self, resource: &Resource) -> bool {
        self.matches_identity(resource) && self.tags.is_subset(&resource.tags)
    }

    /// Type, name and namespace criteria, ignoring tags.
    ///
    /// When both an exact name and a pattern are given, either may match.
    pub fn matches_identity(&self, resource: &Resource) -> bool {
        if self.resource_type != resource.resource_type {
            return false;
        }
        let name_ok = match (&self.name, &self.name_pattern) {
            (None, None) => true,
            (Some(name), None) => *name == resource.name,
            (None, Some(pattern)) => pattern.matches(&resource.name),
            (Some(name), Some(pattern)) => {
                *name == resource.name || pattern.matches(&resource.name)
            }
        };
        if !name_ok {
            return false;
        }
        match &self.namespace {
            Some(namespace) => *namespace == resource.namespace,
            None => true,
        }
    }
}

/// Outcome of checking a policy's resource specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceMatch {
    /// Index of the first spec that matched
    Matched(usize),
    /// No spec matched. Carries the tag sets that would have selected the
    /// policy had the resource carried them.
    Mismatch(Vec<BTreeSet<String>>),
}

/// Finds the first resource spec that selects `resource`.
pub fn match_resources(specs: &[ResourceSpec], resource: &Resource) -> ResourceMatch {
    if let Some(index) = specs.iter().position(|spec| spec.matches(resource)) {
        return ResourceMatch::Matched(index);
    }
    let mut unlocking: Vec<BTreeSet<String>> = Vec::new();
    for spec in specs {
        if !spec.tags.is_empty()
            && spec.matches_identity(resource)
            && !unlocking.contains(&spec.tags)
        {
            unlocking.push(spec.tags.clone());
        }
    }
    ResourceMatch::Mismatch(unlocking)
}
