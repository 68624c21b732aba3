//! Per-block field store with synchronous watchers
//!
//! Assignments never call watchers while the store is borrowed: `set()` and
//! `update()` apply values and return a `Pending` list of watcher calls that
//! the owner dispatches after releasing its lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{is_valid_field_name, FieldSpec, Value};
use crate::error::{DagError, Result};

/// Watcher callback. Receives every event of one triggering assignment.
pub type WatchFn = Arc<dyn Fn(&[FieldEvent]) -> Result<()> + Send + Sync>;

static NEXT_TRIGGER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

/// One field change.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEvent {
    /// Identity of the assignment (single set or batch) that produced the event
    pub trigger: u64,
    pub field: Arc<str>,
    pub old: Value,
    pub new: Value,
}

struct Watcher {
    id: WatcherId,
    fields: SmallVec<[Arc<str>; 4]>,
    callback: WatchFn,
}

/// Watcher calls produced by an assignment, in watcher registration order.
#[must_use = "watchers only fire when the pending calls are dispatched"]
pub struct Pending {
    calls: Vec<(WatchFn, Vec<FieldEvent>)>,
}

impl Pending {
    /// Call each watcher in turn; the first error stops the rest.
    pub fn dispatch(self) -> Result<()> {
        for (callback, events) in self.calls {
            callback(&events)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Named, typed field values of one block.
pub struct Params {
    owner: Arc<str>,
    specs: Vec<FieldSpec>,
    index: FxHashMap<Arc<str>, usize>,
    values: Vec<Value>,
    watchers: Vec<Watcher>,
    next_watcher: u64,
}

impl Params {
    /// Build the store from declarations; values start at their defaults.
    pub fn new(owner: Arc<str>, specs: Vec<FieldSpec>) -> Result<Self> {
        let mut index = FxHashMap::with_capacity_and_hasher(specs.len(), Default::default());
        let mut values = Vec::with_capacity(specs.len());

        for (i, spec) in specs.iter().enumerate() {
            if !is_valid_field_name(&spec.name) {
                return Err(DagError::InvalidName {
                    name: spec.name.to_string(),
                });
            }
            if index.insert(Arc::clone(&spec.name), i).is_some() {
                return Err(DagError::DuplicateField {
                    block: owner.to_string(),
                    field: spec.name.to_string(),
                });
            }
            if !spec.ty.accepts(&spec.default) {
                return Err(DagError::FieldValue {
                    block: owner.to_string(),
                    field: spec.name.to_string(),
                    expected: spec.ty,
                    found: spec.default.to_string(),
                });
            }
            values.push(spec.default.clone());
        }

        Ok(Self {
            owner,
            specs,
            index,
            values,
            watchers: Vec::new(),
            next_watcher: 0,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Declarations in declaration order.
    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&FieldSpec> {
        self.index.get(name).map(|&i| &self.specs[i])
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        let i = self.position(name)?;
        Ok(&self.values[i])
    }

    /// Assign one field. Watchers of that field each get a single event.
    pub fn set(&mut self, name: &str, value: Value) -> Result<Pending> {
        let i = self.checked(name, &value)?;
        let trigger = NEXT_TRIGGER.fetch_add(1, Ordering::Relaxed);
        let old = std::mem::replace(&mut self.values[i], value);
        let event = FieldEvent {
            trigger,
            field: Arc::clone(&self.specs[i].name),
            old,
            new: self.values[i].clone(),
        };
        Ok(self.pending(&[event]))
    }

    /// Assign several fields atomically.
    ///
    /// Every value is validated before any is applied; each watcher then
    /// fires once with the events for the fields it watches. A field named
    /// twice keeps its last value.
    pub fn update<I, S>(&mut self, values: I) -> Result<Pending>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let mut staged: Vec<(usize, Value)> = Vec::new();
        for (name, value) in values {
            let i = self.checked(name.as_ref(), &value)?;
            match staged.iter_mut().find(|(j, _)| *j == i) {
                Some(slot) => slot.1 = value,
                None => staged.push((i, value)),
            }
        }

        let trigger = NEXT_TRIGGER.fetch_add(1, Ordering::Relaxed);
        let events: Vec<FieldEvent> = staged
            .into_iter()
            .map(|(i, value)| {
                let old = std::mem::replace(&mut self.values[i], value);
                FieldEvent {
                    trigger,
                    field: Arc::clone(&self.specs[i].name),
                    old,
                    new: self.values[i].clone(),
                }
            })
            .collect();

        Ok(self.pending(&events))
    }

    /// Register a watcher on `fields`. Watchers fire in registration order.
    pub fn watch(&mut self, fields: &[Arc<str>], callback: WatchFn) -> Result<WatcherId> {
        for field in fields {
            self.position(field)?;
        }
        let id = WatcherId(self.next_watcher);
        self.next_watcher += 1;

        let mut watched = SmallVec::new();
        for field in fields {
            if !watched.contains(field) {
                watched.push(Arc::clone(field));
            }
        }
        self.watchers.push(Watcher {
            id,
            fields: watched,
            callback,
        });
        Ok(id)
    }

    /// Add fields to an existing watcher.
    pub fn watch_more(&mut self, id: WatcherId, fields: &[Arc<str>]) -> Result<()> {
        for field in fields {
            self.position(field)?;
        }
        if let Some(watcher) = self.watchers.iter_mut().find(|w| w.id == id) {
            for field in fields {
                if !watcher.fields.contains(field) {
                    watcher.fields.push(Arc::clone(field));
                }
            }
        }
        Ok(())
    }

    pub fn unwatch(&mut self, id: WatcherId) -> bool {
        let before = self.watchers.len();
        self.watchers.retain(|w| w.id != id);
        self.watchers.len() != before
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Current values keyed by field name, in declaration order.
    pub fn snapshot(&self) -> Vec<(Arc<str>, Value)> {
        self.specs
            .iter()
            .zip(&self.values)
            .map(|(spec, value)| (Arc::clone(&spec.name), value.clone()))
            .collect()
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| DagError::UnknownField {
                block: self.owner.to_string(),
                field: name.to_string(),
            })
    }

    fn checked(&self, name: &str, value: &Value) -> Result<usize> {
        let i = self.position(name)?;
        let spec = &self.specs[i];
        if !spec.ty.accepts(value) {
            return Err(DagError::FieldValue {
                block: self.owner.to_string(),
                field: name.to_string(),
                expected: spec.ty,
                found: value.to_string(),
            });
        }
        Ok(i)
    }

    fn pending(&self, events: &[FieldEvent]) -> Pending {
        let calls = self
            .watchers
            .iter()
            .filter_map(|w| {
                let matched: Vec<FieldEvent> = events
                    .iter()
                    .filter(|e| w.fields.contains(&e.field))
                    .cloned()
                    .collect();
                (!matched.is_empty()).then(|| (Arc::clone(&w.callback), matched))
            })
            .collect();
        Pending { calls }
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Params")
            .field("owner", &self.owner)
            .field("fields", &self.specs.len())
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use parking_lot::Mutex;
    use serde_json::json;

    fn params() -> Params {
        Params::new(
            Arc::from("src"),
            vec![
                FieldSpec::output("p", FieldType::Int),
                FieldSpec::output("q", FieldType::Int),
                FieldSpec::output("s", FieldType::Str).with_default("x"),
            ],
        )
        .unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<Vec<String>>>>, WatchFn) {
        let seen: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let callback: WatchFn = Arc::new(move |events: &[FieldEvent]| {
            sink.lock()
                .push(events.iter().map(|e| e.field.to_string()).collect());
            Ok(())
        });
        (seen, callback)
    }

    fn names(fields: &[&str]) -> Vec<Arc<str>> {
        fields.iter().map(|f| Arc::from(*f)).collect()
    }

    #[test]
    fn defaults_are_applied() {
        let p = params();
        assert_eq!(p.get("p").unwrap(), &Value::Null);
        assert_eq!(p.get("s").unwrap(), &json!("x"));
    }

    #[test]
    fn unknown_field_is_an_error() {
        let mut p = params();
        assert!(matches!(
            p.set("nope", json!(1)),
            Err(DagError::UnknownField { .. })
        ));
    }

    #[test]
    fn wrong_type_is_rejected_and_value_kept() {
        let mut p = params();
        assert!(matches!(
            p.set("p", json!("text")),
            Err(DagError::FieldValue { .. })
        ));
        assert_eq!(p.get("p").unwrap(), &Value::Null);
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let err = Params::new(
            Arc::from("b"),
            vec![
                FieldSpec::input("a", FieldType::Int),
                FieldSpec::input("a", FieldType::Int),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, DagError::DuplicateField { .. }));
    }

    #[test]
    fn single_sets_fire_once_each() {
        let mut p = params();
        let (seen, cb) = recorder();
        p.watch(&names(&["p", "q"]), cb).unwrap();

        p.set("p", json!(1)).unwrap().dispatch().unwrap();
        p.set("q", json!(2)).unwrap().dispatch().unwrap();

        assert_eq!(*seen.lock(), vec![vec!["p"], vec!["q"]]);
    }

    #[test]
    fn batch_fires_each_watcher_once() {
        let mut p = params();
        let (seen, cb) = recorder();
        p.watch(&names(&["p", "q"]), cb).unwrap();

        let pending = p.update([("p", json!(1)), ("q", json!(2))]).unwrap();
        assert_eq!(pending.len(), 1);
        pending.dispatch().unwrap();

        assert_eq!(*seen.lock(), vec![vec!["p", "q"]]);
    }

    #[test]
    fn batch_events_share_trigger() {
        let mut p = params();
        let triggers: Arc<Mutex<Vec<u64>>> = Arc::default();
        let sink = Arc::clone(&triggers);
        p.watch(
            &names(&["p", "q"]),
            Arc::new(move |events: &[FieldEvent]| {
                sink.lock().extend(events.iter().map(|e| e.trigger));
                Ok(())
            }),
        )
        .unwrap();

        p.update([("p", json!(1)), ("q", json!(2))])
            .unwrap()
            .dispatch()
            .unwrap();
        let t = triggers.lock().clone();
        assert_eq!(t.len(), 2);
        assert_eq!(t[0], t[1]);
    }

    #[test]
    fn invalid_batch_applies_nothing() {
        let mut p = params();
        assert!(p.update([("p", json!(1)), ("q", json!("bad"))]).is_err());
        assert_eq!(p.get("p").unwrap(), &Value::Null);
    }

    #[test]
    fn unwatched_fields_do_not_fire() {
        let mut p = params();
        let (seen, cb) = recorder();
        p.watch(&names(&["p"]), cb).unwrap();

        assert!(p.set("s", json!("y")).unwrap().is_empty());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn watch_more_extends_without_duplicates() {
        let mut p = params();
        let (seen, cb) = recorder();
        let id = p.watch(&names(&["p"]), cb).unwrap();
        p.watch_more(id, &names(&["p", "q"])).unwrap();

        p.update([("p", json!(1)), ("q", json!(2))])
            .unwrap()
            .dispatch()
            .unwrap();
        assert_eq!(*seen.lock(), vec![vec!["p", "q"]]);
        assert!(p.unwatch(id));
        assert_eq!(p.watcher_count(), 0);
    }

    #[test]
    fn event_carries_old_and_new() {
        let mut p = params();
        let got: Arc<Mutex<Vec<FieldEvent>>> = Arc::default();
        let sink = Arc::clone(&got);
        p.watch(
            &names(&["s"]),
            Arc::new(move |events: &[FieldEvent]| {
                sink.lock().extend_from_slice(events);
                Ok(())
            }),
        )
        .unwrap();

        p.set("s", json!("y")).unwrap().dispatch().unwrap();
        let events = got.lock();
        assert_eq!(events[0].old, json!("x"));
        assert_eq!(events[0].new, json!("y"));
    }
}
