//! Parameter get/set relay and subscription reference counting.
//!
//! The server holds no parameter values. Reads and writes go to the
//! listener; the bridge only tracks how many clients care about each name
//! so the listener hears about the first subscriber and the last one leaving.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use vigil_core::{ClientId, Parameter};

use crate::listener::ServerListener;

/// Relays parameter requests to the listener.
pub struct ParameterBridge {
    listener: Option<Arc<dyn ServerListener>>,
    interest: DashMap<String, usize>,
}

impl ParameterBridge {
    /// Create a bridge. Without a listener every read is empty.
    pub fn new(listener: Option<Arc<dyn ServerListener>>) -> Self {
        Self {
            listener,
            interest: DashMap::new(),
        }
    }

    /// Read parameters. An empty `names` asks for all of them.
    ///
    /// Unset values are omitted, as are names that were not requested.
    pub fn get(&self, client: ClientId, names: &[String], request_id: Option<&str>) -> Vec<Parameter> {
        let Some(listener) = &self.listener else {
            return Vec::new();
        };
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        listener
            .on_get_parameters(client, names, request_id)
            .into_iter()
            .filter(|p| !p.is_unset())
            .filter(|p| wanted.is_empty() || wanted.contains(p.name.as_str()))
            .collect()
    }

    /// Write parameters and return the post-write state of every name touched.
    ///
    /// Names the listener did not report back are returned unset, which is
    /// how deletions are echoed.
    pub fn set(
        &self,
        client: ClientId,
        parameters: Vec<Parameter>,
        request_id: Option<&str>,
    ) -> Vec<Parameter> {
        let mut requested: Vec<String> = Vec::with_capacity(parameters.len());
        for p in &parameters {
            if !requested.contains(&p.name) {
                requested.push(p.name.clone());
            }
        }
        let mut updated = match &self.listener {
            Some(listener) => listener.on_set_parameters(client, parameters, request_id),
            None => Vec::new(),
        };
        for name in requested {
            if !updated.iter().any(|p| p.name == name) {
                updated.push(Parameter::empty(name));
            }
        }
        updated
    }

    /// Count a client's interest in `names`. Returns the names that had no
    /// subscribers before.
    ///
    /// The listener hears about each such name while its counter is still
    /// locked, so subscribe and unsubscribe hooks for one name never
    /// overtake each other.
    pub fn subscribe(&self, names: &[String]) -> Vec<String> {
        let mut first = Vec::new();
        for name in names {
            let mut count = self.interest.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                if let Some(listener) = &self.listener {
                    listener.on_parameters_subscribe(std::slice::from_ref(name));
                }
                first.push(name.clone());
            }
        }
        first
    }

    /// Drop a client's interest in `names`. Returns the names that now have
    /// no subscribers, each reported to the listener under its counter lock.
    pub fn unsubscribe(&self, names: &[String]) -> Vec<String> {
        let mut last = Vec::new();
        for name in names {
            let Entry::Occupied(mut entry) = self.interest.entry(name.clone()) else {
                continue;
            };
            *entry.get_mut() -= 1;
            if *entry.get() > 0 {
                continue;
            }
            if let Some(listener) = &self.listener {
                listener.on_parameters_unsubscribe(std::slice::from_ref(name));
            }
            let _ = entry.remove();
            last.push(name.clone());
        }
        last
    }

    /// Clients interested in `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.interest.get(name).map_or(0, |c| *c)
    }
}
