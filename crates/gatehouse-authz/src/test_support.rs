//! In-memory rule adapter and fixtures for tests that do not need Postgres.
use async_trait::async_trait;
use casbin::error::AdapterError;
use casbin::{Adapter, Filter, Model};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub fn model_path() -> PathBuf {
    PathBuf::from(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/fixtures/rbac_with_domains.conf"
    ))
}

/// Two tenants, one admin role each, and a direct grant for bob.
pub fn seed_rules() -> Vec<(String, Vec<String>)> {
    [
        ("p", vec!["admin", "tenant-a", "/data/*", "read"]),
        ("p", vec!["admin", "tenant-a", "/data/*", "write"]),
        ("p", vec!["admin", "tenant-b", "/data/*", "read"]),
        ("p", vec!["bob", "tenant-b", "/reports/:id", "read"]),
        ("g", vec!["alice", "admin", "tenant-a"]),
        ("g", vec!["carol", "admin", "tenant-b"]),
    ]
    .into_iter()
    .map(|(ptype, rule)| {
        (
            ptype.to_string(),
            rule.into_iter().map(str::to_string).collect(),
        )
    })
    .collect()
}

/// Clonable adapter over a shared rule list; clones observe each other's writes.
#[derive(Clone, Default)]
pub struct RuleSetAdapter {
    rules: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    fail_loads: Arc<Mutex<bool>>,
    is_filtered: bool,
}

impl RuleSetAdapter {
    pub fn seeded() -> Self {
        Self::with_rules(seed_rules())
    }

    pub fn with_rules(rules: Vec<(String, Vec<String>)>) -> Self {
        Self {
            rules: Arc::new(Mutex::new(rules)),
            ..Self::default()
        }
    }

    pub fn push(&self, ptype: &str, rule: &[&str]) {
        self.rules.lock().expect("rules").push((
            ptype.to_string(),
            rule.iter().map(|value| value.to_string()).collect(),
        ));
    }

    pub fn fail_loads(&self, fail: bool) {
        *self.fail_loads.lock().expect("flag") = fail;
    }

    fn snapshot(&self) -> casbin::Result<Vec<(String, Vec<String>)>> {
        if *self.fail_loads.lock().expect("flag") {
            return Err(casbin::Error::from(AdapterError(Box::new(
                std::io::Error::other("rule store unavailable"),
            ))));
        }
        Ok(self.rules.lock().expect("rules").clone())
    }
}

fn matches(ptype: &str, rule: &[String], filter: &Filter<'_>) -> bool {
    let wanted = if ptype.starts_with('p') {
        &filter.p
    } else {
        &filter.g
    };
    wanted
        .iter()
        .enumerate()
        .all(|(idx, value)| {
            value.is_empty() || rule.get(idx).is_some_and(|field| field.as_str() == *value)
        })
}

fn section(ptype: &str) -> &'static str {
    if ptype.starts_with('g') { "g" } else { "p" }
}

#[async_trait]
impl Adapter for RuleSetAdapter {
    async fn load_policy(&mut self, m: &mut dyn Model) -> casbin::Result<()> {
        for (ptype, rule) in self.snapshot()? {
            m.add_policy(section(&ptype), &ptype, rule);
        }
        self.is_filtered = false;
        Ok(())
    }

    async fn load_filtered_policy<'a>(
        &mut self,
        m: &mut dyn Model,
        f: Filter<'a>,
    ) -> casbin::Result<()> {
        for (ptype, rule) in self.snapshot()? {
            if matches(&ptype, &rule, &f) {
                m.add_policy(section(&ptype), &ptype, rule);
            }
        }
        self.is_filtered = true;
        Ok(())
    }

    async fn save_policy(&mut self, _m: &mut dyn Model) -> casbin::Result<()> {
        Ok(())
    }

    async fn clear_policy(&mut self) -> casbin::Result<()> {
        self.rules.lock().expect("rules").clear();
        Ok(())
    }

    fn is_filtered(&self) -> bool {
        self.is_filtered
    }

    async fn add_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        self.rules
            .lock()
            .expect("rules")
            .push((ptype.to_string(), rule));
        Ok(true)
    }

    async fn add_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        let mut stored = self.rules.lock().expect("rules");
        stored.extend(rules.into_iter().map(|rule| (ptype.to_string(), rule)));
        Ok(true)
    }

    async fn remove_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        rule: Vec<String>,
    ) -> casbin::Result<bool> {
        let mut stored = self.rules.lock().expect("rules");
        let before = stored.len();
        stored.retain(|(p, r)| !(p == ptype && *r == rule));
        Ok(stored.len() != before)
    }

    async fn remove_policies(
        &mut self,
        _sec: &str,
        ptype: &str,
        rules: Vec<Vec<String>>,
    ) -> casbin::Result<bool> {
        let mut stored = self.rules.lock().expect("rules");
        let before = stored.len();
        stored.retain(|(p, r)| !(p == ptype && rules.contains(r)));
        Ok(stored.len() != before)
    }

    async fn remove_filtered_policy(
        &mut self,
        _sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: Vec<String>,
    ) -> casbin::Result<bool> {
        let mut stored = self.rules.lock().expect("rules");
        let before = stored.len();
        stored.retain(|(p, r)| {
            let hit = p == ptype
                && field_values.iter().enumerate().all(|(offset, value)| {
                    value.is_empty() || r.get(field_index + offset) == Some(value)
                });
            !hit
        });
        Ok(stored.len() != before)
    }
}
