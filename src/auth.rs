//! Pluggable user validation.
//!
//! Credential parsing beyond HTTP Basic, password storage and the
//! authentication policy all live behind the [`DomainController`]
//! contract; the handler only extracts `Authorization: Basic`
//! credentials (via the typed `headers` decoder) and asks the
//! controller whether they are valid for the resolved realm.
//!
//! [`DomainController`]: trait.DomainController.html
use std::collections::HashMap;
use std::fmt::Debug;

use dyn_clone::DynClone;

/// The trait that defines a domain controller.
pub trait DomainController: Debug + Sync + Send + DynClone {
    /// The authentication realm for a request path (the string that
    /// ends up in `WWW-Authenticate`).
    fn realm_for(&self, path: &str) -> String;

    /// The known users of a realm.
    fn users_in(&self, realm: &str) -> Vec<String>;

    /// Validate a username/password pair for a realm.
    fn authenticate(&self, realm: &str, user: &str, password: &str) -> bool;
}

dyn_clone::clone_trait_object!(DomainController);

/// A domain controller holding a simple in-memory realm → user →
/// password table.
#[derive(Debug, Clone, Default)]
pub struct SimpleDomainController {
    users: HashMap<String, HashMap<String, String>>,
}

impl SimpleDomainController {
    pub fn new() -> SimpleDomainController {
        SimpleDomainController::default()
    }

    /// Add a user to a realm.
    pub fn add_user(
        mut self,
        realm: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.users
            .entry(realm.into())
            .or_default()
            .insert(user.into(), password.into());
        self
    }
}

impl DomainController for SimpleDomainController {
    fn realm_for(&self, path: &str) -> String {
        // the realm prefix doubles as the authentication realm.
        path.to_string()
    }

    fn users_in(&self, realm: &str) -> Vec<String> {
        self.users
            .get(realm)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn authenticate(&self, realm: &str, user: &str, password: &str) -> bool {
        self.users
            .get(realm)
            .and_then(|m| m.get(user))
            .map(|p| p == password)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_controller() {
        let dc = SimpleDomainController::new()
            .add_user("/share", "alice", "secret")
            .add_user("/share", "bob", "hunter2");
        assert!(dc.authenticate("/share", "alice", "secret"));
        assert!(!dc.authenticate("/share", "alice", "wrong"));
        assert!(!dc.authenticate("/other", "alice", "secret"));
        let mut users = dc.users_in("/share");
        users.sort();
        assert_eq!(users, vec!["alice", "bob"]);
    }
}
