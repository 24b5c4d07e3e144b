use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use jobkv_model::StoreNode;
use tokio::time::Instant;

use super::keys::{ROOT, ancestors, child_prefix, is_descendant};
use crate::{DeleteOptions, RoleGrant, StoreError, WriteOptions};

#[derive(Debug, Clone)]
pub(super) struct Entry {
    value: Option<String>,
    dir: bool,
    created: u64,
    modified: u64,
    expires: Option<Instant>,
}

impl Entry {
    fn directory(index: u64) -> Self {
        Self {
            value: None,
            dir: true,
            created: index,
            modified: index,
            expires: None,
        }
    }
}

/// One mutation retained for watchers.
#[derive(Debug, Clone)]
pub(super) struct Event {
    pub node: StoreNode,
    /// A directory and its whole subtree went away.
    pub removed_tree: bool,
}

#[derive(Debug, Default)]
pub(super) struct Account {
    pub password: String,
    pub roles: Vec<String>,
}

pub(super) struct State {
    pub entries: BTreeMap<String, Entry>,
    pub index: u64,
    pub history: VecDeque<Event>,
    /// Highest index dropped from `history`.
    pub cleared_up_to: u64,
    history_limit: usize,
    pub accounts: HashMap<String, Account>,
    pub roles: HashMap<String, RoleGrant>,
    pub auth_enabled: bool,
}

/// Whether `event` is visible to a watcher on `key`.
pub(super) fn touches(event: &Event, key: &str, recursive: bool) -> bool {
    let changed = event.node.key.as_str();
    changed == key
        || (recursive && is_descendant(changed, key))
        || (event.removed_tree && is_descendant(key, changed))
}

impl State {
    pub fn new(history_limit: usize, auth_enabled: bool) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(ROOT.to_string(), Entry::directory(0));
        Self {
            entries,
            index: 0,
            history: VecDeque::new(),
            cleared_up_to: 0,
            history_limit,
            accounts: HashMap::new(),
            roles: HashMap::new(),
            auth_enabled,
        }
    }

    fn children<'a>(&'a self, key: &str) -> impl Iterator<Item = (&'a String, &'a Entry)> {
        let prefix = child_prefix(key);
        let skip = prefix.len();
        self.entries
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
            .filter(move |(k, _)| {
                let rest = &k[skip..];
                !rest.is_empty() && !rest.contains('/')
            })
    }

    /// Snapshot of an entry. `list` includes direct children of a directory,
    /// `recursive` extends the listing to the whole subtree.
    pub fn render(&self, key: &str, entry: &Entry, list: bool, recursive: bool) -> StoreNode {
        let now = Instant::now();
        let mut node = StoreNode {
            key: key.to_string(),
            value: entry.value.clone(),
            dir: entry.dir,
            modified_index: entry.modified,
            created_index: entry.created,
            ttl: entry.expires.map(|at| {
                let left = at.saturating_duration_since(now).as_millis();
                left.div_ceil(1000) as i64
            }),
            nodes: Vec::new(),
        };
        if entry.dir && list {
            node.nodes = self
                .children(key)
                .map(|(k, e)| self.render(k, e, recursive, recursive))
                .collect();
        }
        node
    }

    fn record(&mut self, node: StoreNode, removed_tree: bool) {
        self.history.push_back(Event { node, removed_tree });
        while self.history.len() > self.history_limit {
            if let Some(old) = self.history.pop_front() {
                self.cleared_up_to = old.node.modified_index;
            }
        }
    }

    fn remove_tree(&mut self, key: &str) -> Option<Entry> {
        let prefix = child_prefix(key);
        let doomed: Vec<String> = self
            .entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for k in doomed {
            self.entries.remove(&k);
        }
        self.entries.remove(key)
    }

    /// Drop every entry whose lifetime ended. Returns `true` if any did.
    pub fn expire(&mut self, now: Instant) -> bool {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut changed = false;
        for key in expired {
            let Some(entry) = self.remove_tree(&key) else {
                continue;
            };
            self.index += 1;
            let node = StoreNode {
                key,
                dir: entry.dir,
                modified_index: self.index,
                created_index: entry.created,
                ..Default::default()
            };
            self.record(node, entry.dir);
            changed = true;
        }
        changed
    }

    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.values().filter_map(|e| e.expires).min()
    }

    pub fn write(
        &mut self,
        key: &str,
        value: Option<&str>,
        opts: &WriteOptions,
        now: Instant,
    ) -> Result<StoreNode, StoreError> {
        let existing = self.entries.get(key).cloned();

        match (opts.prev_exist, &existing) {
            (Some(false), Some(_)) => {
                return Err(StoreError::AlreadyExists { key: key.into() });
            }
            (Some(true), None) => {
                return Err(StoreError::KeyNotFound {
                    key: key.into(),
                    index: self.index,
                });
            }
            _ => {}
        }
        if let Some(prev) = opts.prev_index {
            match &existing {
                None => {
                    return Err(StoreError::KeyNotFound {
                        key: key.into(),
                        index: self.index,
                    });
                }
                Some(e) if e.modified != prev => {
                    return Err(StoreError::CompareFailed { key: key.into() });
                }
                Some(_) => {}
            }
        }
        if let Some(e) = &existing {
            if e.dir && !(opts.dir && opts.prev_exist == Some(true)) {
                return Err(StoreError::NotAFile { key: key.into() });
            }
            if !e.dir && opts.dir {
                return Err(StoreError::NotADirectory { key: key.into() });
            }
        }
        let parents = ancestors(key);
        for parent in &parents {
            if self.entries.get(parent).is_some_and(|e| !e.dir) {
                return Err(StoreError::NotADirectory {
                    key: parent.clone(),
                });
            }
        }

        self.index += 1;
        let index = self.index;
        for parent in parents {
            self.entries
                .entry(parent)
                .or_insert_with(|| Entry::directory(index));
        }

        let entry = Entry {
            value: (!opts.dir).then(|| value.unwrap_or_default().to_string()),
            dir: opts.dir,
            created: existing.as_ref().map_or(index, |e| e.created),
            modified: index,
            expires: opts.ttl.map(|secs| now + Duration::from_secs(secs)),
        };
        let node = self.render(key, &entry, false, false);
        self.entries.insert(key.to_string(), entry);
        self.record(node.clone(), false);
        Ok(node)
    }

    pub fn remove(&mut self, key: &str, opts: &DeleteOptions) -> Result<StoreNode, StoreError> {
        let Some(entry) = self.entries.get(key).cloned() else {
            return Err(StoreError::KeyNotFound {
                key: key.into(),
                index: self.index,
            });
        };
        if opts.prev_index.is_some_and(|prev| prev != entry.modified) {
            return Err(StoreError::CompareFailed { key: key.into() });
        }
        if entry.dir {
            if !opts.dir && !opts.recursive {
                return Err(StoreError::NotAFile { key: key.into() });
            }
            if !opts.recursive && self.children(key).next().is_some() {
                return Err(StoreError::DirectoryNotEmpty { key: key.into() });
            }
        } else if opts.dir {
            return Err(StoreError::NotADirectory { key: key.into() });
        }

        self.index += 1;
        self.remove_tree(key);
        let node = StoreNode {
            key: key.to_string(),
            dir: entry.dir,
            modified_index: self.index,
            created_index: entry.created,
            ..Default::default()
        };
        self.record(node.clone(), entry.dir);
        Ok(node)
    }
}
