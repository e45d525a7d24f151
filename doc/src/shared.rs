//! Shared document — the replicated, multi-writer CAD document.
//!
//! DESIGN
//! ======
//! Three independently observable tables: an ordered object sequence,
//! an options map, and a metadata map. Every object is a replicated
//! record of field-level LWW registers, so concurrent edits to different
//! fields merge automatically and conflicting edits to the same field
//! resolve by logical-clock order. Deletions leave stamped tombstones so
//! a concurrent insert/delete pair resolves the same way on every
//! replica.
//!
//! All mutations run inside a transaction; nested transactions coalesce
//! into the outermost one, which emits exactly one [`DocChange`] to
//! local subscribers and one [`DocUpdate`] op batch to the replication
//! feed. Undo/redo is scoped to the objects table only — option and
//! metadata edits never enter the history.
//!
//! ERROR HANDLING
//! ==============
//! Integrity conflicts (duplicate name on add, absent name on update or
//! remove) are logged and skipped, never raised: a malformed operation
//! must not corrupt the replicated state other clients see, and a no-op
//! emits no change event.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::clock::{LamportClock, Lww, Stamp};
use crate::object::CadObject;
use crate::presence::ClientId;

// =============================================================================
// CHANGE EVENTS
// =============================================================================

/// What happened to a key or object in one change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Add,
    Update,
    Delete,
}

/// One changed object in the objects table.
#[derive(Debug, Clone)]
pub struct ObjectChange {
    /// Object name (the table key).
    pub name: String,
    /// The changed field for field-level updates; `None` for whole-object
    /// add/delete.
    pub key: Option<String>,
    pub action: ChangeAction,
    /// The full object after the change; `None` after a delete or when
    /// the record no longer decodes.
    pub object: Option<CadObject>,
}

/// One changed key in the options or metadata table.
#[derive(Debug, Clone)]
pub struct KeyChange {
    pub key: String,
    pub action: ChangeAction,
}

/// Change notification emitted once per committed transaction,
/// describing the affected tables and keys.
#[derive(Debug, Clone, Default)]
pub struct DocChange {
    pub objects: Vec<ObjectChange>,
    pub options: Vec<KeyChange>,
    pub metadata: Vec<KeyChange>,
}

impl DocChange {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.options.is_empty() && self.metadata.is_empty()
    }
}

// =============================================================================
// REPLICATION OPS
// =============================================================================

/// One replicated operation. Applying an op is idempotent and
/// commutative at field granularity thanks to the stamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocOp {
    InsertObject { fields: Map<String, Value>, stamp: Stamp },
    DeleteObject { name: String, stamp: Stamp },
    SetField { name: String, key: String, value: Value, stamp: Stamp },
    SetOption { key: String, value: Value, stamp: Stamp },
    SetMetadata { key: String, value: Option<String>, stamp: Stamp },
}

/// Op batch for one committed local transaction, relayed to peers by the
/// host's replication provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocUpdate {
    pub ops: Vec<DocOp>,
}

// =============================================================================
// INTERNALS
// =============================================================================

/// Inverse of one objects-table mutation, for undo/redo.
#[derive(Debug, Clone)]
enum UndoOp {
    /// Undo an insert.
    Remove { name: String },
    /// Undo a delete: put the record back at its old position.
    Reinsert { fields: Map<String, Value>, index: usize },
    /// Undo a field write. `None` marks a field that did not exist.
    Restore { name: String, key: String, value: Option<Value> },
}

/// A replicated object record: field name → LWW register.
#[derive(Debug, Clone)]
struct ObjectRecord {
    name: String,
    fields: HashMap<String, Lww<Value>>,
}

impl ObjectRecord {
    fn new(fields: &Map<String, Value>, stamp: Stamp) -> Option<Self> {
        let name = fields.get("name").and_then(Value::as_str)?.to_string();
        let fields = fields
            .iter()
            .map(|(k, v)| (k.clone(), Lww::new(v.clone(), stamp)))
            .collect();
        Some(Self { name, fields })
    }

    /// Current plain field map. Null registers mark removed fields and
    /// are skipped.
    fn to_fields(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter(|(_, reg)| !reg.value.is_null())
            .map(|(k, reg)| (k.clone(), reg.value.clone()))
            .collect()
    }

    fn to_object(&self) -> Option<CadObject> {
        CadObject::from_fields(&self.to_fields())
    }
}

/// In-flight transaction state.
#[derive(Debug, Default)]
struct Txn {
    depth: u32,
    remote: bool,
    change: DocChange,
    ops: Vec<DocOp>,
    undo: Vec<UndoOp>,
}

// =============================================================================
// SHARED DOC
// =============================================================================

/// The replicated shared document.
pub struct SharedDoc {
    clock: LamportClock,
    objects: Vec<ObjectRecord>,
    tombstones: HashMap<String, Stamp>,
    options: HashMap<String, Lww<Value>>,
    metadata: HashMap<String, Lww<Option<String>>>,
    change_subs: Vec<mpsc::UnboundedSender<DocChange>>,
    update_subs: Vec<mpsc::UnboundedSender<DocUpdate>>,
    undo_stack: Vec<Vec<UndoOp>>,
    redo_stack: Vec<Vec<UndoOp>>,
    txn: Option<Txn>,
    replaying: bool,
}

impl SharedDoc {
    #[must_use]
    pub fn new(client: ClientId) -> Self {
        Self {
            clock: LamportClock::new(client),
            objects: Vec::new(),
            tombstones: HashMap::new(),
            options: HashMap::new(),
            metadata: HashMap::new(),
            change_subs: Vec::new(),
            update_subs: Vec::new(),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            txn: None,
            replaying: false,
        }
    }

    /// Subscribe to committed change events, in commit order.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DocChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.change_subs.push(tx);
        rx
    }

    /// Subscribe to the replication feed (one [`DocUpdate`] per local
    /// transaction). Remote applies are not re-broadcast.
    pub fn subscribe_updates(&mut self) -> mpsc::UnboundedReceiver<DocUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.update_subs.push(tx);
        rx
    }

    // --- Transactions ---

    /// Run `f` inside one transaction. All mutations coalesce into a
    /// single change event and a single replication op batch.
    pub fn transact(&mut self, f: impl FnOnce(&mut Self)) {
        self.begin(false);
        f(self);
        self.finish();
    }

    fn begin(&mut self, remote: bool) {
        match &mut self.txn {
            Some(txn) => txn.depth += 1,
            None => self.txn = Some(Txn { remote, ..Txn::default() }),
        }
    }

    /// Close the current transaction level; commit if outermost.
    fn finish(&mut self) {
        if let Some(txn) = &mut self.txn {
            if txn.depth > 0 {
                txn.depth -= 1;
                return;
            }
        }
        let Some(mut txn) = self.txn.take() else {
            return;
        };
        if !txn.remote && !self.replaying && !txn.undo.is_empty() {
            self.undo_stack.push(std::mem::take(&mut txn.undo));
            self.redo_stack.clear();
        }
        self.commit(txn);
    }

    fn commit(&mut self, txn: Txn) {
        if !txn.change.is_empty() {
            let change = txn.change;
            self.change_subs.retain(|tx| tx.send(change.clone()).is_ok());
        }
        if !txn.remote && !txn.ops.is_empty() {
            let update = DocUpdate { ops: txn.ops };
            self.update_subs.retain(|tx| tx.send(update.clone()).is_ok());
        }
    }

    /// Panics only on internal misuse: every mutation path opens a
    /// transaction first.
    fn txn_mut(&mut self) -> &mut Txn {
        self.txn.as_mut().unwrap_or_else(|| unreachable!("mutation outside transaction"))
    }

    // --- Queries ---

    #[must_use]
    pub fn object_exists(&self, name: &str) -> bool {
        self.objects.iter().any(|rec| rec.name == name)
    }

    #[must_use]
    pub fn get_object_by_name(&self, name: &str) -> Option<CadObject> {
        self.objects
            .iter()
            .find(|rec| rec.name == name)
            .and_then(ObjectRecord::to_object)
    }

    /// All objects in table order. Records that no longer decode are
    /// skipped with a warning.
    #[must_use]
    pub fn objects(&self) -> Vec<CadObject> {
        self.objects
            .iter()
            .filter_map(|rec| {
                let obj = rec.to_object();
                if obj.is_none() {
                    warn!(name = %rec.name, "skipping undecodable object record");
                }
                obj
            })
            .collect()
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn get_option(&self, key: &str) -> Option<Value> {
        self.options.get(key).map(|reg| reg.value.clone())
    }

    /// Snapshot of the options table.
    #[must_use]
    pub fn options(&self) -> Map<String, Value> {
        self.options
            .iter()
            .map(|(k, reg)| (k.clone(), reg.value.clone()))
            .collect()
    }

    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata.get(key).and_then(|reg| reg.value.clone())
    }

    /// Snapshot of the metadata table (deleted keys excluded).
    #[must_use]
    pub fn metadata(&self) -> HashMap<String, String> {
        self.metadata
            .iter()
            .filter_map(|(k, reg)| reg.value.clone().map(|v| (k.clone(), v)))
            .collect()
    }

    // --- Object mutations ---

    /// Add one object. A duplicate name is rejected: the table is left
    /// unchanged, the conflict is logged, and no error reaches the
    /// caller.
    pub fn add_object(&mut self, obj: CadObject) {
        self.transact(|doc| doc.insert_object(obj));
    }

    /// Add several objects in one transaction.
    pub fn add_objects(&mut self, objs: Vec<CadObject>) {
        self.transact(|doc| {
            for obj in objs {
                doc.insert_object(obj);
            }
        });
    }

    fn insert_object(&mut self, obj: CadObject) {
        if self.object_exists(&obj.name) {
            error!(name = %obj.name, "there is already an object with this name");
            return;
        }
        let stamp = self.clock.tick();
        let fields = obj.to_fields();
        let Some(record) = ObjectRecord::new(&fields, stamp) else {
            error!("object is missing a name field");
            return;
        };
        self.tombstones.remove(&record.name);
        let name = record.name.clone();
        self.objects.push(record);

        let txn = self.txn_mut();
        txn.change.objects.push(ObjectChange {
            name: name.clone(),
            key: None,
            action: ChangeAction::Add,
            object: Some(obj),
        });
        txn.ops.push(DocOp::InsertObject { fields, stamp });
        txn.undo.push(UndoOp::Remove { name });
    }

    /// Remove an object by name. Absent names are a no-op: no change
    /// event fires.
    pub fn remove_object_by_name(&mut self, name: &str) {
        self.transact(|doc| doc.delete_object(name));
    }

    fn delete_object(&mut self, name: &str) {
        let Some(index) = self.objects.iter().position(|rec| rec.name == name) else {
            return;
        };
        let stamp = self.clock.tick();
        let record = self.objects.remove(index);
        self.tombstones.insert(record.name.clone(), stamp);

        let txn = self.txn_mut();
        txn.change.objects.push(ObjectChange {
            name: record.name.clone(),
            key: None,
            action: ChangeAction::Delete,
            object: None,
        });
        txn.ops.push(DocOp::DeleteObject { name: record.name.clone(), stamp });
        txn.undo.push(UndoOp::Reinsert { fields: record.to_fields(), index });
    }

    /// Update one field of an object by name. Absent objects are a
    /// no-op. The `name` field itself is immutable (it is the table
    /// key); attempts to rewrite it are logged and skipped.
    pub fn update_object_by_name(&mut self, name: &str, key: &str, value: Value) {
        self.transact(|doc| doc.set_object_field(name, key, value));
    }

    fn set_object_field(&mut self, name: &str, key: &str, value: Value) {
        if key == "name" {
            error!(name, "object names are immutable");
            return;
        }
        let stamp = self.clock.tick();
        let Some(record) = self.objects.iter_mut().find(|rec| rec.name == name) else {
            return;
        };
        let previous = record
            .fields
            .get(key)
            .filter(|reg| !reg.value.is_null())
            .map(|reg| reg.value.clone());
        record
            .fields
            .entry(key.to_string())
            .and_modify(|reg| {
                reg.value = value.clone();
                reg.stamp = stamp;
            })
            .or_insert_with(|| Lww::new(value.clone(), stamp));
        let object = record.to_object();

        let txn = self.txn_mut();
        txn.change.objects.push(ObjectChange {
            name: name.to_string(),
            key: Some(key.to_string()),
            action: ChangeAction::Update,
            object,
        });
        txn.ops.push(DocOp::SetField {
            name: name.to_string(),
            key: key.to_string(),
            value,
            stamp,
        });
        txn.undo.push(UndoOp::Restore {
            name: name.to_string(),
            key: key.to_string(),
            value: previous,
        });
    }

    // --- Option mutations (not undoable) ---

    pub fn set_option(&mut self, key: &str, value: Value) {
        self.transact(|doc| doc.put_option(key, value));
    }

    /// Bulk merge into the options table, one transaction.
    pub fn set_options(&mut self, options: Map<String, Value>) {
        self.transact(|doc| {
            for (key, value) in options {
                doc.put_option(&key, value);
            }
        });
    }

    fn put_option(&mut self, key: &str, value: Value) {
        let stamp = self.clock.tick();
        let action = if self.options.contains_key(key) {
            ChangeAction::Update
        } else {
            ChangeAction::Add
        };
        self.options.insert(key.to_string(), Lww::new(value.clone(), stamp));

        let txn = self.txn_mut();
        txn.change.options.push(KeyChange { key: key.to_string(), action });
        txn.ops.push(DocOp::SetOption { key: key.to_string(), value, stamp });
    }

    // --- Metadata mutations (not undoable) ---

    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.transact(|doc| doc.put_metadata(key, Some(value.to_string())));
    }

    /// Delete a metadata key. Absent keys are a no-op.
    pub fn remove_metadata(&mut self, key: &str) {
        if self.get_metadata(key).is_none() {
            return;
        }
        self.transact(|doc| doc.put_metadata(key, None));
    }

    fn put_metadata(&mut self, key: &str, value: Option<String>) {
        let stamp = self.clock.tick();
        let action = match (self.metadata.get(key).and_then(|reg| reg.value.as_ref()), &value) {
            (None, Some(_)) => ChangeAction::Add,
            (Some(_), Some(_)) => ChangeAction::Update,
            (_, None) => ChangeAction::Delete,
        };
        self.metadata.insert(key.to_string(), Lww::new(value.clone(), stamp));

        let txn = self.txn_mut();
        txn.change.metadata.push(KeyChange { key: key.to_string(), action });
        txn.ops.push(DocOp::SetMetadata { key: key.to_string(), value, stamp });
    }

    // --- Replication ---

    /// Merge a remote op batch. Emits one change event for whatever
    /// actually changed; never re-broadcasts to the replication feed and
    /// never touches the undo history.
    pub fn apply_remote(&mut self, update: &DocUpdate) {
        self.begin(true);
        for op in &update.ops {
            self.apply_op(op);
        }
        self.finish();
    }

    fn apply_op(&mut self, op: &DocOp) {
        match op {
            DocOp::InsertObject { fields, stamp } => {
                self.clock.observe(*stamp);
                self.merge_insert(fields, *stamp);
            }
            DocOp::DeleteObject { name, stamp } => {
                self.clock.observe(*stamp);
                self.merge_delete(name, *stamp);
            }
            DocOp::SetField { name, key, value, stamp } => {
                self.clock.observe(*stamp);
                self.merge_field(name, key, value, *stamp);
            }
            DocOp::SetOption { key, value, stamp } => {
                self.clock.observe(*stamp);
                let changed = match self.options.get_mut(key) {
                    Some(reg) => reg.merge(value.clone(), *stamp),
                    None => {
                        self.options.insert(key.clone(), Lww::new(value.clone(), *stamp));
                        true
                    }
                };
                if changed {
                    let change = KeyChange { key: key.clone(), action: ChangeAction::Update };
                    self.txn_mut().change.options.push(change);
                }
            }
            DocOp::SetMetadata { key, value, stamp } => {
                self.clock.observe(*stamp);
                let changed = match self.metadata.get_mut(key) {
                    Some(reg) => reg.merge(value.clone(), *stamp),
                    None => {
                        self.metadata.insert(key.clone(), Lww::new(value.clone(), *stamp));
                        value.is_some()
                    }
                };
                if changed {
                    let action = if value.is_some() { ChangeAction::Update } else { ChangeAction::Delete };
                    let change = KeyChange { key: key.clone(), action };
                    self.txn_mut().change.metadata.push(change);
                }
            }
        }
    }

    fn merge_insert(&mut self, fields: &Map<String, Value>, stamp: Stamp) {
        let Some(name) = fields.get("name").and_then(Value::as_str).map(str::to_string) else {
            warn!("ignoring insert op without a name field");
            return;
        };
        // A tombstone at or above the insert stamp means the delete wins.
        if self.tombstones.get(&name).is_some_and(|ts| *ts >= stamp) {
            return;
        }
        if let Some(record) = self.objects.iter_mut().find(|rec| rec.name == name) {
            // Same object inserted concurrently on two replicas: merge
            // field-wise.
            let mut changed = false;
            for (key, value) in fields {
                match record.fields.get_mut(key) {
                    Some(reg) => changed |= reg.merge(value.clone(), stamp),
                    None => {
                        record.fields.insert(key.clone(), Lww::new(value.clone(), stamp));
                        changed = true;
                    }
                }
            }
            if changed {
                let object = record.to_object();
                self.txn_mut().change.objects.push(ObjectChange {
                    name,
                    key: None,
                    action: ChangeAction::Update,
                    object,
                });
            }
            return;
        }
        let Some(record) = ObjectRecord::new(fields, stamp) else {
            warn!("ignoring undecodable insert op");
            return;
        };
        self.tombstones.remove(&name);
        let object = record.to_object();
        self.objects.push(record);
        self.txn_mut().change.objects.push(ObjectChange {
            name,
            key: None,
            action: ChangeAction::Add,
            object,
        });
    }

    fn merge_delete(&mut self, name: &str, stamp: Stamp) {
        if self.tombstones.get(name).is_some_and(|ts| *ts >= stamp) {
            return;
        }
        self.tombstones.insert(name.to_string(), stamp);
        if let Some(index) = self.objects.iter().position(|rec| rec.name == name) {
            self.objects.remove(index);
            self.txn_mut().change.objects.push(ObjectChange {
                name: name.to_string(),
                key: None,
                action: ChangeAction::Delete,
                object: None,
            });
        }
    }

    fn merge_field(&mut self, name: &str, key: &str, value: &Value, stamp: Stamp) {
        // Field writes to deleted or unknown objects are stale; a
        // tombstoned delete wins over concurrent updates.
        let Some(record) = self.objects.iter_mut().find(|rec| rec.name == name) else {
            return;
        };
        let changed = match record.fields.get_mut(key) {
            Some(reg) => reg.merge(value.clone(), stamp),
            None => {
                record.fields.insert(key.to_string(), Lww::new(value.clone(), stamp));
                true
            }
        };
        if changed {
            let object = record.to_object();
            self.txn_mut().change.objects.push(ObjectChange {
                name: name.to_string(),
                key: Some(key.to_string()),
                action: ChangeAction::Update,
                object,
            });
        }
    }

    // --- Undo / redo (objects table only) ---

    pub fn undo(&mut self) {
        let Some(batch) = self.undo_stack.pop() else {
            return;
        };
        let inverse = self.replay(batch);
        if !inverse.is_empty() {
            self.redo_stack.push(inverse);
        }
    }

    pub fn redo(&mut self) {
        let Some(batch) = self.redo_stack.pop() else {
            return;
        };
        let inverse = self.replay(batch);
        if !inverse.is_empty() {
            self.undo_stack.push(inverse);
        }
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Apply a history batch in reverse order, returning its inverse.
    fn replay(&mut self, batch: Vec<UndoOp>) -> Vec<UndoOp> {
        self.replaying = true;
        self.begin(false);
        for op in batch.into_iter().rev() {
            self.apply_history_op(op);
        }
        let inverse = match &mut self.txn {
            Some(txn) if txn.depth == 0 => std::mem::take(&mut txn.undo),
            _ => Vec::new(),
        };
        self.finish();
        self.replaying = false;
        inverse
    }

    fn apply_history_op(&mut self, op: UndoOp) {
        match op {
            UndoOp::Remove { name } => self.delete_object(&name),
            UndoOp::Reinsert { fields, index } => self.reinsert_object(&fields, index),
            UndoOp::Restore { name, key, value } => {
                let value = value.unwrap_or(Value::Null);
                self.set_object_field(&name, &key, value);
            }
        }
    }

    fn reinsert_object(&mut self, fields: &Map<String, Value>, index: usize) {
        let stamp = self.clock.tick();
        let Some(record) = ObjectRecord::new(fields, stamp) else {
            return;
        };
        if self.object_exists(&record.name) {
            return;
        }
        self.tombstones.remove(&record.name);
        let name = record.name.clone();
        let object = record.to_object();
        let index = index.min(self.objects.len());
        self.objects.insert(index, record);

        let txn = self.txn_mut();
        txn.change.objects.push(ObjectChange {
            name: name.clone(),
            key: None,
            action: ChangeAction::Add,
            object,
        });
        txn.ops.push(DocOp::InsertObject { fields: fields.clone(), stamp });
        txn.undo.push(UndoOp::Remove { name });
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ShapeKind;

    fn box_object(name: &str) -> CadObject {
        let mut parameters = Map::new();
        parameters.insert("Length".into(), serde_json::json!(1.0));
        CadObject {
            name: name.into(),
            shape: ShapeKind::Box,
            parameters,
            visible: true,
            operators: None,
            dependencies: None,
        }
    }

    /// Relay every pending update from `from` into `to`.
    fn relay(rx: &mut mpsc::UnboundedReceiver<DocUpdate>, to: &mut SharedDoc) {
        while let Ok(update) = rx.try_recv() {
            to.apply_remote(&update);
        }
    }

    #[test]
    fn duplicate_add_leaves_table_unchanged() {
        let mut doc = SharedDoc::new(1);
        let mut rx = doc.subscribe();
        doc.add_object(box_object("Box1"));
        assert!(rx.try_recv().is_ok());

        let mut dup = box_object("Box1");
        dup.parameters.insert("Length".into(), serde_json::json!(99.0));
        doc.add_object(dup);

        assert_eq!(doc.object_count(), 1);
        let obj = doc.get_object_by_name("Box1").unwrap();
        assert_eq!(obj.parameters.get("Length"), Some(&serde_json::json!(1.0)));
        // No event fired for the rejected add.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn remove_absent_is_silent_noop() {
        let mut doc = SharedDoc::new(1);
        doc.add_object(box_object("Box1"));
        let mut rx = doc.subscribe();

        doc.remove_object_by_name("NoSuchObject");
        assert_eq!(doc.object_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn update_absent_is_silent_noop() {
        let mut doc = SharedDoc::new(1);
        let mut rx = doc.subscribe();
        doc.update_object_by_name("Ghost", "visible", serde_json::json!(false));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn update_emits_field_level_change() {
        let mut doc = SharedDoc::new(1);
        doc.add_object(box_object("Box1"));
        let mut rx = doc.subscribe();

        doc.update_object_by_name("Box1", "visible", serde_json::json!(false));
        let change = rx.try_recv().unwrap();
        assert_eq!(change.objects.len(), 1);
        assert_eq!(change.objects[0].name, "Box1");
        assert_eq!(change.objects[0].key.as_deref(), Some("visible"));
        assert!(!change.objects[0].object.as_ref().unwrap().visible);
    }

    #[test]
    fn transaction_coalesces_events() {
        let mut doc = SharedDoc::new(1);
        let mut rx = doc.subscribe();
        doc.transact(|doc| {
            doc.add_object(box_object("A"));
            doc.add_object(box_object("B"));
            doc.set_option("axes", serde_json::json!({"visible": true}));
        });
        let change = rx.try_recv().unwrap();
        assert_eq!(change.objects.len(), 2);
        assert_eq!(change.options.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn concurrent_field_edits_converge() {
        let mut a = SharedDoc::new(1);
        let mut b = SharedDoc::new(2);
        let mut a_updates = a.subscribe_updates();
        let mut b_updates = b.subscribe_updates();

        a.add_object(box_object("Box1"));
        relay(&mut a_updates, &mut b);

        // Concurrent conflicting writes to the same field.
        a.update_object_by_name("Box1", "visible", serde_json::json!(false));
        b.update_object_by_name("Box1", "visible", serde_json::json!(true));
        relay(&mut a_updates, &mut b);
        relay(&mut b_updates, &mut a);

        let a_vis = a.get_object_by_name("Box1").unwrap().visible;
        let b_vis = b.get_object_by_name("Box1").unwrap().visible;
        assert_eq!(a_vis, b_vis);
    }

    #[test]
    fn concurrent_edits_to_different_objects_both_survive() {
        let mut a = SharedDoc::new(1);
        let mut b = SharedDoc::new(2);
        let mut a_updates = a.subscribe_updates();
        let mut b_updates = b.subscribe_updates();

        a.add_object(box_object("FromA"));
        b.add_object(box_object("FromB"));
        relay(&mut a_updates, &mut b);
        relay(&mut b_updates, &mut a);

        assert!(a.object_exists("FromA") && a.object_exists("FromB"));
        assert!(b.object_exists("FromA") && b.object_exists("FromB"));
    }

    #[test]
    fn delete_wins_over_concurrent_update() {
        let mut a = SharedDoc::new(1);
        let mut b = SharedDoc::new(2);
        let mut a_updates = a.subscribe_updates();
        let mut b_updates = b.subscribe_updates();

        a.add_object(box_object("Box1"));
        relay(&mut a_updates, &mut b);

        a.remove_object_by_name("Box1");
        b.update_object_by_name("Box1", "visible", serde_json::json!(false));
        relay(&mut a_updates, &mut b);
        relay(&mut b_updates, &mut a);

        assert!(!a.object_exists("Box1"));
        assert!(!b.object_exists("Box1"));
    }

    #[test]
    fn remote_apply_emits_change_but_no_update() {
        let mut a = SharedDoc::new(1);
        let mut b = SharedDoc::new(2);
        let mut a_updates = a.subscribe_updates();
        let mut b_updates = b.subscribe_updates();
        let mut b_changes = b.subscribe();

        a.add_object(box_object("Box1"));
        relay(&mut a_updates, &mut b);

        let change = b_changes.try_recv().unwrap();
        assert_eq!(change.objects[0].name, "Box1");
        assert_eq!(change.objects[0].action, ChangeAction::Add);
        // No echo back onto b's replication feed.
        assert!(b_updates.try_recv().is_err());
    }

    #[test]
    fn undo_scoped_to_objects_table() {
        let mut doc = SharedDoc::new(1);
        doc.add_object(box_object("Box1"));
        doc.set_option("axes", serde_json::json!({"visible": true}));
        doc.set_metadata("annotation:1", "{}");

        doc.undo();
        // The object add is undone; option and metadata edits survive.
        assert!(!doc.object_exists("Box1"));
        assert!(doc.get_option("axes").is_some());
        assert_eq!(doc.get_metadata("annotation:1").as_deref(), Some("{}"));

        doc.redo();
        assert!(doc.object_exists("Box1"));
    }

    #[test]
    fn undo_restores_field_value() {
        let mut doc = SharedDoc::new(1);
        doc.add_object(box_object("Box1"));
        doc.update_object_by_name("Box1", "visible", serde_json::json!(false));

        doc.undo();
        assert!(doc.get_object_by_name("Box1").unwrap().visible);

        doc.undo();
        assert!(!doc.object_exists("Box1"));
    }

    #[test]
    fn undo_of_delete_restores_position() {
        let mut doc = SharedDoc::new(1);
        doc.add_objects(vec![box_object("A"), box_object("B"), box_object("C")]);
        doc.remove_object_by_name("B");
        doc.undo();

        let names: Vec<String> = doc.objects().into_iter().map(|o| o.name).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn metadata_delete_observed_as_key_event() {
        let mut doc = SharedDoc::new(1);
        doc.set_metadata("annotation:xyz", "{\"label\":\"hi\"}");
        let mut rx = doc.subscribe();

        doc.remove_metadata("annotation:xyz");
        let change = rx.try_recv().unwrap();
        assert_eq!(change.metadata[0].key, "annotation:xyz");
        assert_eq!(change.metadata[0].action, ChangeAction::Delete);

        // Deleting again is a no-op.
        doc.remove_metadata("annotation:xyz");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn set_options_bulk_merges() {
        let mut doc = SharedDoc::new(1);
        let mut opts = Map::new();
        opts.insert("axes".into(), serde_json::json!({"visible": true, "size": 5}));
        opts.insert("cameraSettings".into(), serde_json::json!({"type": "Perspective"}));
        doc.set_options(opts);

        assert_eq!(
            doc.get_option("cameraSettings"),
            Some(serde_json::json!({"type": "Perspective"}))
        );
        assert_eq!(doc.options().len(), 2);
    }
}
