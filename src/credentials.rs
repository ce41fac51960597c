use std::collections::HashMap;
use std::sync::RwLock;

/// Username/password store shared between the SOCKS5 authenticator and the
/// credential file watcher. Validations take the shared lock; a reload swaps
/// the whole map under the exclusive lock. In-flight authentications that
/// already hold a snapshot keep using it.
pub struct CredentialStore {
    users: RwLock<HashMap<String, String>>,
}

impl CredentialStore {
    pub fn new(users: HashMap<String, String>) -> Self {
        CredentialStore {
            users: RwLock::new(users),
        }
    }

    pub fn validate(&self, user: &str, password: &str) -> bool {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users.get(user).is_some_and(|stored| stored == password)
    }

    pub fn replace(&self, new_users: HashMap<String, String>) {
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        *users = new_users;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(pairs: &[(&str, &str)]) -> CredentialStore {
        CredentialStore::new(
            pairs
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_validate() {
        let creds = store(&[("alice", "secret")]);
        assert!(creds.validate("alice", "secret"));
        assert!(!creds.validate("alice", "wrong"));
        assert!(!creds.validate("bob", "secret"));
    }

    #[test]
    fn test_replace_is_wholesale() {
        let creds = store(&[("alice", "secret")]);
        creds.replace(
            [("bob".to_string(), "hunter2".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(!creds.validate("alice", "secret"));
        assert!(creds.validate("bob", "hunter2"));
    }
}
