//! Desired-state table and its JSON file store.
//!
//! File format (a flat object, in insertion order):
//! ```json
//! {
//!     "8080_tcp": "10.0.0.5:80",
//!     "53_udp_ipt": "10.0.0.5:5353"
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use portfwd_common::{ForwardingRule, FwdError, FwdResult};

use crate::keys::{decode_rule, encode_target, rule_key, RuleKey};

/// One stored entry, kept exactly as it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    /// Decodes to a rule.
    Rule {
        stored_key: String,
        value: Value,
        key: RuleKey,
        rule: ForwardingRule,
    },
    /// Does not decode, or repeats an identity. Never installed, but
    /// written back untouched.
    Unreadable { stored_key: String, value: Value },
}

impl Entry {
    fn stored_key(&self) -> &str {
        match self {
            Entry::Rule { stored_key, .. } | Entry::Unreadable { stored_key, .. } => stored_key,
        }
    }

    fn value(&self) -> &Value {
        match self {
            Entry::Rule { value, .. } | Entry::Unreadable { value, .. } => value,
        }
    }
}

/// Authoritative list of rules that should be live, in insertion order.
///
/// Entries loaded from the store keep their original key string and value,
/// and entries that do not decode are carried along, so saving never loses
/// or rewrites what was already on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredTable {
    entries: Vec<Entry>,
}

impl DesiredTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &RuleKey) -> Option<&ForwardingRule> {
        self.entries.iter().find_map(|e| match e {
            Entry::Rule { key: k, rule, .. } if k == key => Some(rule),
            _ => None,
        })
    }

    /// Whether `key` is taken, by a rule or by an unreadable entry stored
    /// under that exact key.
    pub fn contains_key(&self, key: &RuleKey) -> bool {
        self.get(key).is_some() || self.position_unreadable(key).is_some()
    }

    /// Appends `rule` under its own key. Returns false, leaving the table
    /// unchanged, if the key is already taken.
    pub fn insert(&mut self, rule: ForwardingRule) -> bool {
        let key = rule_key(&rule);
        if self.contains_key(&key) {
            return false;
        }
        self.entries.push(Entry::Rule {
            stored_key: key.to_string(),
            value: encode_target(&rule.target),
            key,
            rule,
        });
        true
    }

    pub fn remove(&mut self, key: &RuleKey) -> Option<ForwardingRule> {
        let idx = self
            .entries
            .iter()
            .position(|e| matches!(e, Entry::Rule { key: k, .. } if k == key))?;
        match self.entries.remove(idx) {
            Entry::Rule { rule, .. } => Some(rule),
            Entry::Unreadable { .. } => None,
        }
    }

    /// Drops an unreadable entry stored under exactly `key`.
    pub fn remove_unreadable(&mut self, key: &RuleKey) -> bool {
        match self.position_unreadable(key) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    fn position_unreadable(&self, key: &RuleKey) -> Option<usize> {
        self.entries.iter().position(|e| {
            matches!(e, Entry::Unreadable { stored_key, .. } if stored_key == key.as_str())
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RuleKey, &ForwardingRule)> {
        self.entries.iter().filter_map(|e| match e {
            Entry::Rule { key, rule, .. } => Some((key, rule)),
            Entry::Unreadable { .. } => None,
        })
    }

    pub fn rules(&self) -> impl Iterator<Item = &ForwardingRule> {
        self.iter().map(|(_, r)| r)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored entries that are carried but not installed.
    pub fn unreadable(&self) -> usize {
        self.entries.len() - self.len()
    }

    /// Persisted representation.
    pub fn to_json(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|e| (e.stored_key().to_string(), e.value().clone()))
            .collect()
    }

    /// Builds a table from its persisted form.
    pub fn from_json(map: &Map<String, Value>) -> Self {
        let mut table = Self::new();
        for (stored_key, value) in map {
            let entry = match decode_rule(stored_key, value) {
                Ok(rule) => {
                    let key = rule_key(&rule);
                    if table.contains_key(&key) {
                        warn!(key = %stored_key, "Duplicate rule identity in store, not installing it");
                        Entry::Unreadable {
                            stored_key: stored_key.clone(),
                            value: value.clone(),
                        }
                    } else {
                        Entry::Rule {
                            stored_key: stored_key.clone(),
                            value: value.clone(),
                            key,
                            rule,
                        }
                    }
                }
                Err(e) => {
                    warn!(key = %stored_key, "Store entry does not decode, not installing it: {}", e);
                    Entry::Unreadable {
                        stored_key: stored_key.clone(),
                        value: value.clone(),
                    }
                }
            };
            table.entries.push(entry);
        }
        table
    }
}

/// JSON file holding the desired-state table.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the table.
    ///
    /// A missing file is created empty. A file that is not a JSON object is
    /// treated as an empty table.
    pub fn load(&self) -> FwdResult<DesiredTable> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("Store {} not found, creating empty table", self.path.display());
                self.write_raw("{}")?;
                return Ok(DesiredTable::new());
            }
            Err(e) => {
                return Err(FwdError::store(
                    "load",
                    format!("{}: {}", self.path.display(), e),
                ))
            }
        };

        let table = match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => DesiredTable::from_json(&map),
            Ok(other) => {
                warn!(
                    "Store {} holds {} instead of an object, using empty table",
                    self.path.display(),
                    json_kind(&other)
                );
                DesiredTable::new()
            }
            Err(e) => {
                warn!(
                    "Store {} is corrupt ({}), using empty table",
                    self.path.display(),
                    e
                );
                DesiredTable::new()
            }
        };

        debug!(
            "Loaded {} rules from {} ({} unreadable entries kept)",
            table.len(),
            self.path.display(),
            table.unreadable()
        );
        Ok(table)
    }

    /// Writes the table, pretty-printed with 4-space indentation.
    pub fn save(&self, table: &DesiredTable) -> FwdResult<()> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        table
            .to_json()
            .serialize(&mut ser)
            .map_err(|e| FwdError::store("save", e.to_string()))?;

        let content = String::from_utf8(buf).map_err(|e| FwdError::store("save", e.to_string()))?;
        self.write_raw(&content)?;
        debug!("Saved {} rules to {}", table.len(), self.path.display());
        Ok(())
    }

    fn write_raw(&self, content: &str) -> FwdResult<()> {
        fs::write(&self.path, content)
            .map_err(|e| FwdError::store("save", format!("{}: {}", self.path.display(), e)))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::encode_key;
    use portfwd_common::{Method, Protocol, Target};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn relay_rule(port: u16) -> ForwardingRule {
        ForwardingRule::new(port, Protocol::Tcp, Method::Relay, Target::new("10.0.0.5", 80))
    }

    #[test]
    fn test_table_rejects_duplicate_identity() {
        let mut table = DesiredTable::new();
        assert!(table.insert(relay_rule(8080)));
        assert!(!table.insert(relay_rule(8080)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_table_preserves_insertion_order() {
        let mut table = DesiredTable::new();
        for port in [9000, 22, 8080] {
            table.insert(relay_rule(port));
        }
        let ports: Vec<u16> = table.rules().map(|r| r.external_port).collect();
        assert_eq!(ports, vec![9000, 22, 8080]);

        table.remove(&encode_key(22, Protocol::Tcp, Method::Relay));
        let ports: Vec<u16> = table.rules().map(|r| r.external_port).collect();
        assert_eq!(ports, vec![9000, 8080]);
    }

    #[test]
    fn test_load_missing_file_creates_empty_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");
        let store = JsonFileStore::new(&path);

        let table = store.load().unwrap();
        assert!(table.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_load_corrupt_file_is_empty_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");
        fs::write(&path, "{ not json").unwrap();

        let table = JsonFileStore::new(&path).load().unwrap();
        assert!(table.is_empty());

        fs::write(&path, "[1, 2]").unwrap();
        assert!(JsonFileStore::new(&path).load().unwrap().is_empty());
    }

    #[test]
    fn test_save_format() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("ports.json"));

        let mut table = DesiredTable::new();
        table.insert(relay_rule(8080));
        table.insert(ForwardingRule::new(
            53,
            Protocol::Udp,
            Method::Nat,
            Target::new("10.0.0.5", 5353),
        ));
        store.save(&table).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            content,
            "{\n    \"8080_tcp\": \"10.0.0.5:80\",\n    \"53_udp_ipt\": \"10.0.0.5:5353\"\n}"
        );
        assert_eq!(store.load().unwrap(), table);
    }

    #[test]
    fn test_load_mixed_value_forms() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");
        fs::write(
            &path,
            r#"{
                "8080_tcp": "10.0.0.5:80",
                "2222_tcp_ipt": {"ip": "10.0.0.6", "toPort": "22"},
                "bogus": "10.0.0.7:1"
            }"#,
        )
        .unwrap();

        let table = JsonFileStore::new(&path).load().unwrap();
        assert_eq!(table.len(), 2);
        let nat = table
            .get(&encode_key(2222, Protocol::Tcp, Method::Nat))
            .unwrap();
        assert_eq!(nat.target, Target::new("10.0.0.6", 22));
    }

    #[test]
    fn test_save_preserves_stored_keys_and_unreadable_entries() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("ports.json"));
        fs::write(
            store.path(),
            r#"{"8080": "10.0.0.5:80", "22_TCP": "10.0.0.6:22", "2222_tcp_ipt": {"ip": "10.0.0.6", "toPort": 22}}"#,
        )
        .unwrap();

        let mut table = store.load().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.unreadable(), 1);

        table.insert(ForwardingRule::new(
            9000,
            Protocol::Tcp,
            Method::Relay,
            Target::new("10.0.0.7", 90),
        ));
        store.save(&table).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            content,
            "{\n    \"8080\": \"10.0.0.5:80\",\n    \"22_TCP\": \"10.0.0.6:22\",\n    \"2222_tcp_ipt\": {\n        \"ip\": \"10.0.0.6\",\n        \"toPort\": 22\n    },\n    \"9000_tcp\": \"10.0.0.7:90\"\n}"
        );
    }

    #[test]
    fn test_decoded_entry_removed_under_its_stored_key() {
        let mut table = DesiredTable::from_json(
            serde_json::json!({"22_TCP": "10.0.0.6:22"}).as_object().unwrap(),
        );
        assert!(table.remove(&encode_key(22, Protocol::Tcp, Method::Relay)).is_some());
        assert!(table.to_json().is_empty());
    }

    #[test]
    fn test_duplicate_identity_is_kept_but_not_a_rule() {
        let table = DesiredTable::from_json(
            serde_json::json!({"22_tcp": "10.0.0.6:22", "22_TCP": "10.0.0.9:22"})
                .as_object()
                .unwrap(),
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.unreadable(), 1);
        assert_eq!(
            table.get(&encode_key(22, Protocol::Tcp, Method::Relay)).unwrap().target,
            Target::new("10.0.0.6", 22)
        );
        assert_eq!(table.to_json().len(), 2);
    }

    #[test]
    fn test_unreadable_entry_under_canonical_key_blocks_insert() {
        let mut table = DesiredTable::from_json(
            serde_json::json!({"8080_tcp": "garbage"}).as_object().unwrap(),
        );
        let key = encode_key(8080, Protocol::Tcp, Method::Relay);
        assert!(table.contains_key(&key));
        assert!(!table.insert(relay_rule(8080)));

        assert!(table.remove_unreadable(&key));
        assert!(table.insert(relay_rule(8080)));
    }
}
