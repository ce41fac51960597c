use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use slog_scope::{error, info, warn};

use crate::config;
use crate::credentials::CredentialStore;
use crate::rotator::{self, Rotator};
use crate::routes;

/// Watch the prefix file; each modification reparses it, installs routes for
/// the accepted prefixes, then swaps them into the rotator. Routes go in
/// before the swap so the kernel already accepts any address the rotator may
/// emit afterwards.
pub fn spawn_prefix_watcher(path: PathBuf, rotator: Arc<Rotator>, interface: String) {
    spawn_watch_thread("subnet-watch", path, move |path| {
        reload_prefixes(path, &rotator, &interface);
    });
}

/// Watch the credential file; each modification reparses it and replaces the
/// credential map wholesale.
pub fn spawn_user_watcher(path: PathBuf, store: Arc<CredentialStore>) {
    spawn_watch_thread("user-watch", path, move |path| {
        reload_users(path, &store);
    });
}

fn spawn_watch_thread<F>(name: &str, path: PathBuf, on_modify: F)
where
    F: Fn(&Path) + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || watch_loop(&path, on_modify));
    if let Err(e) = spawned {
        error!("watch_thread_spawn_failed"; "thread" => name, "error" => e.to_string());
    }
}

fn watch_loop<F: Fn(&Path)>(path: &Path, on_modify: F) {
    let (tx, rx) = mpsc::channel();
    let mut watcher = match notify::recommended_watcher(tx) {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("watch_create_failed"; "path" => path.display().to_string(), "error" => e.to_string());
            return;
        }
    };
    if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
        error!("watch_install_failed"; "path" => path.display().to_string(), "error" => e.to_string());
        return;
    }
    info!("watch_started"; "path" => path.display().to_string());

    for event in rx {
        match event {
            Ok(Event {
                kind: EventKind::Modify(_),
                ..
            }) => {
                info!("config_modified"; "path" => path.display().to_string());
                on_modify(path);
            }
            Ok(_) => {}
            Err(e) => warn!("watch_error"; "path" => path.display().to_string(), "error" => e.to_string()),
        }
    }
}

/// Reload step for the prefix file. Parse failures and an empty accepted set
/// keep the previous rotator state; route-install failures are logged but do
/// not block the swap.
pub fn reload_prefixes(path: &Path, rotator: &Rotator, interface: &str) {
    let entries = match config::load_subnets(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("prefix_reload_failed"; "path" => path.display().to_string(), "error" => e.to_string());
            return;
        }
    };
    let (accepted, errors) = rotator::parse_prefixes(&entries);
    for err in &errors {
        warn!("prefix_entry_skipped"; "entry" => err.as_str());
    }
    if accepted.is_empty() {
        warn!("prefix_reload_empty"; "path" => path.display().to_string());
        return;
    }
    if let Err(e) = routes::apply_local_routes(&accepted, interface) {
        warn!("route_add_failed"; "error" => e.to_string());
    }
    let count = accepted.len();
    rotator.update_prefixes(accepted);
    info!("prefix_reload_applied"; "prefixes" => count);
}

/// Reload step for the credential file. A file that fails to parse, or that
/// parses to an empty user map, keeps the previous credentials.
pub fn reload_users(path: &Path, store: &CredentialStore) {
    match config::load_users(path) {
        Ok(users) if users.is_empty() => {
            warn!("user_reload_empty"; "path" => path.display().to_string());
        }
        Ok(users) => {
            let count = users.len();
            store.replace(users);
            info!("user_reload_applied"; "users" => count);
        }
        Err(e) => {
            warn!("user_reload_failed"; "path" => path.display().to_string(), "error" => e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    fn temp_file(tag: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "sixgress-test-{}-{}",
            tag,
            std::process::id()
        ));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_reload_users_replaces_map() {
        let store = CredentialStore::new(HashMap::from([(
            "alice".to_string(),
            "secret".to_string(),
        )]));
        let path = temp_file("users-replace", "users:\n  bob: hunter2\n");
        reload_users(&path, &store);
        assert!(store.validate("bob", "hunter2"));
        assert!(!store.validate("alice", "secret"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_reload_users_keeps_previous_on_parse_error() {
        let store = CredentialStore::new(HashMap::from([(
            "alice".to_string(),
            "secret".to_string(),
        )]));
        let path = temp_file("users-bad", "users: [broken");
        reload_users(&path, &store);
        assert!(store.validate("alice", "secret"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_reload_users_keeps_previous_on_empty_map() {
        let store = CredentialStore::new(HashMap::from([(
            "alice".to_string(),
            "secret".to_string(),
        )]));
        let path = temp_file("users-empty", "users: {}\n");
        reload_users(&path, &store);
        assert!(store.validate("alice", "secret"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_reload_prefixes_keeps_previous_when_all_entries_malformed() {
        let parent: ipnet::Ipv6Net = "2001:db8::/32".parse().unwrap();
        let rotator = Rotator::new(vec![parent], 100).unwrap();
        let path = temp_file("subnets-bad", r#"{"subnets": ["bogus"]}"#);
        reload_prefixes(&path, &rotator, "lo");
        assert!(parent.contains(&rotator.random_address()));
        let _ = fs::remove_file(path);
    }
}
