//! Persistence: save, insert, update and delete.
//!
//! Writes only what changed since the instance was loaded or last saved.
//! One-to-many and many-to-many collections are reconciled against their
//! baseline ids: removed children get their foreign key cleared, removed
//! link rows are deleted, added ones are written. Database failures during
//! a write are logged and reported as `Ok(false)`; validation and
//! configuration problems are returned as errors.

use std::collections::BTreeSet;

use tablebind_core::{
    AnyModel, AnyModelRef, Error, HookKind, Model, ModelConfig, ModelRef, ModelState, ModelType,
    Original, RelationKind, RelationState, Result, ValidationError, Value,
};
use tablebind_query::{Condition, Delete, Insert, Update};

use crate::Session;
use crate::change_tracker::{has_changed, query_data, snapshot};
use crate::hydrate::{instantiate_fields, relation_slot};

/// A write against a many-to-many link table.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOp {
    /// Insert a link row, ignoring duplicates.
    Link {
        table: String,
        local_column: String,
        local_value: i64,
        remote_column: String,
        remote_value: i64,
    },
    /// Delete the link rows pointing at any of `remote_values`.
    Unlink {
        table: String,
        local_column: String,
        local_value: i64,
        remote_column: String,
        remote_values: Vec<i64>,
    },
}

impl LinkOp {
    pub fn table(&self) -> &str {
        match self {
            LinkOp::Link { table, .. } | LinkOp::Unlink { table, .. } => table,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, LinkOp::Link { .. })
    }

    /// Execute against the session's connection.
    #[tracing::instrument(level = "debug", skip(session))]
    pub fn execute(&self, session: &Session) -> Result<()> {
        let dialect = session.dialect();
        let (sql, params) = match self {
            LinkOp::Link {
                table,
                local_column,
                local_value,
                remote_column,
                remote_value,
            } => Insert::into(table)
                .rows(
                    [local_column.as_str(), remote_column.as_str()],
                    vec![vec![Value::BigInt(*local_value), Value::BigInt(*remote_value)]],
                )
                .ignore_conflicts()
                .build(dialect),
            LinkOp::Unlink {
                table,
                local_column,
                local_value,
                remote_column,
                remote_values,
            } => Delete::from(table)
                .filter(Condition::eq(local_column, *local_value))
                .filter(Condition::is_in(remote_column, remote_values.iter().copied()))
                .build(dialect),
        };
        tracing::trace!(sql = %sql, "Executing link table write");
        session.conn.execute(&sql, &params).map(|_| ())
    }
}

/// Removed and added ids of a collection against its baseline. Zero ids
/// (unsaved members) are ignored on both sides.
pub fn diff_ids(before: &[i64], after: &[i64]) -> (Vec<i64>, Vec<i64>) {
    let before_set: BTreeSet<i64> = before.iter().copied().filter(|id| *id != 0).collect();
    let after_set: BTreeSet<i64> = after.iter().copied().filter(|id| *id != 0).collect();
    let removed = before_set.difference(&after_set).copied().collect();
    let added = after_set.difference(&before_set).copied().collect();
    (removed, added)
}

/// Log a failed write and turn it into `Ok(false)`; pass other errors on.
fn write_failed(result: Result<bool>, model: &str, action: &str) -> Result<bool> {
    match result {
        Err(e) if e.is_persistence() => {
            tracing::error!(model, action, error = %e, "Write failed");
            if let Some(sql) = e.sql() {
                tracing::debug!(sql, "Failed statement");
            }
            Ok(false)
        }
        other => other,
    }
}

impl Session {
    /// Validate, then insert or update `model` inside a transaction.
    ///
    /// Returns `Ok(false)` (after rolling back) when a write failed.
    pub fn save<M: Model>(&self, model: &ModelRef<M>) -> Result<bool> {
        self.save_any(&model.erase())
    }

    /// Insert a new instance. `Ok(false)` if it already has an id.
    pub fn insert<M: Model>(&self, model: &ModelRef<M>) -> Result<bool> {
        self.insert_any(&model.erase())
    }

    /// Write the changed fields of a loaded instance. `Ok(false)` if it was
    /// never loaded or inserted.
    pub fn update<M: Model>(&self, model: &ModelRef<M>) -> Result<bool> {
        self.update_any(&model.erase())
    }

    /// Delete a loaded instance and drop it from the registry.
    pub fn delete<M: Model>(&self, model: &ModelRef<M>) -> Result<bool> {
        self.delete_any(&model.erase())
    }

    /// Check field validations, collecting every failure.
    pub fn validate<M: Model>(&self, model: &ModelRef<M>) -> Result<()> {
        let config = self.metadata::<M>()?;
        validate_fields(&*model.borrow(), &config)
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, owner),
        fields(model = owner.model_type().name())
    )]
    pub(crate) fn save_any(&self, owner: &AnyModelRef) -> Result<bool> {
        let config = self.config_of(owner.model_type())?;
        validate_fields(&*owner.borrow(), &config)?;

        let was_loaded = owner.id().is_some();
        let baseline = owner.borrow().state().clone();
        if let Err(e) = self.conn.begin() {
            return write_failed(Err(e), &config.model, "begin");
        }

        let result = if was_loaded {
            self.update_any(owner)
        } else {
            self.insert_any(owner)
        };

        match result {
            Ok(true) => match self.conn.commit() {
                Ok(()) => Ok(true),
                Err(e) => {
                    self.abandon(owner, &config, was_loaded, baseline);
                    write_failed(Err(e), &config.model, "commit")
                }
            },
            other => {
                self.abandon(owner, &config, was_loaded, baseline);
                other
            }
        }
    }

    /// Roll back a failed save and put back the tracking state taken before
    /// it, so the next save writes the same changes again. A failed insert
    /// leaves the instance transient.
    fn abandon(
        &self,
        owner: &AnyModelRef,
        config: &ModelConfig,
        was_loaded: bool,
        baseline: ModelState,
    ) {
        if let Err(e) = self.conn.rollback() {
            tracing::error!(model = %config.model, error = %e, "Rollback failed");
        }
        let inserted_id = if was_loaded { None } else { owner.id() };
        let mut model = owner.borrow_mut();
        *model.state_mut() = baseline;
        if let Some(id) = inserted_id {
            self.registry.borrow_mut().remove(owner.model_type(), id);
            if let Some(pk) = config.primary_key_property() {
                if let Some(slot) = model.field_mut(&pk.name) {
                    let _ = slot.assign(Value::Null);
                }
            }
        }
    }

    pub(crate) fn insert_any(&self, owner: &AnyModelRef) -> Result<bool> {
        let model_type = owner.model_type();
        let config = self.config_of(model_type)?;
        if owner.id().is_some() {
            return Ok(false);
        }
        tracing::info!(model = %config.model, "Inserting new model");

        instantiate_fields(owner, &config)?;
        self.run_hooks(owner, &config, HookKind::BeforeInsert)?;

        let data = query_data(&*owner.borrow(), &config, false)?;
        let (sql, params) = Insert::into(&config.table).values(&data).build(self.dialect());
        tracing::trace!(sql = %sql, "Executing insert");
        let id = match self.conn.insert(&sql, &params) {
            Ok(id) => id,
            Err(e) => return write_failed(Err(e), &config.model, "insert"),
        };
        if id <= 0 {
            tracing::error!(model = %config.model, "Insert passed, but no id was returned");
            return Ok(false);
        }

        {
            let mut model = owner.borrow_mut();
            model.state_mut().set_id(Some(id));
            if let Some(pk) = config.primary_key_property() {
                if let Some(slot) = model.field_mut(&pk.name) {
                    slot.assign(Value::BigInt(id))?;
                }
            }
        }
        self.registry
            .borrow_mut()
            .insert(model_type, id, owner.clone());

        let reconciled = self.reconcile(owner, &config, id, false);
        if !write_failed(reconciled, &config.model, "reconcile")? {
            return Ok(false);
        }

        snapshot(&mut *owner.borrow_mut(), &config)?;
        self.invalidate(&[config.table.clone()]);
        self.run_hooks(owner, &config, HookKind::AfterInsert)?;
        tracing::debug!(model = %config.model, id, "Inserted");
        Ok(true)
    }

    pub(crate) fn update_any(&self, owner: &AnyModelRef) -> Result<bool> {
        let config = self.config_of(owner.model_type())?;
        let Some(id) = owner.id() else {
            return Ok(false);
        };
        tracing::info!(model = %config.model, id, "Updating model");

        self.run_hooks(owner, &config, HookKind::BeforeUpdate)?;

        let data = query_data(&*owner.borrow(), &config, true)?;
        if data.is_empty() {
            tracing::debug!(model = %config.model, id, "No column changes to write");
        } else {
            let (sql, params) = Update::table(&config.table)
                .set_all(&data)
                .filter(Condition::eq(&config.primary_key, id))
                .build(self.dialect());
            tracing::trace!(sql = %sql, "Executing update");
            if let Err(e) = self.conn.execute(&sql, &params) {
                return write_failed(Err(e), &config.model, "update");
            }
        }

        let reconciled = self.reconcile(owner, &config, id, true);
        if !write_failed(reconciled, &config.model, "reconcile")? {
            return Ok(false);
        }

        snapshot(&mut *owner.borrow_mut(), &config)?;
        self.invalidate(&[config.table.clone(), format!("{}/{}", config.table, id)]);
        self.run_hooks(owner, &config, HookKind::AfterUpdate)?;
        Ok(true)
    }

    pub(crate) fn delete_any(&self, owner: &AnyModelRef) -> Result<bool> {
        let model_type = owner.model_type();
        let config = self.config_of(model_type)?;
        let Some(id) = owner.id() else {
            return Ok(false);
        };
        tracing::info!(model = %config.model, id, "Deleting model");

        self.run_hooks(owner, &config, HookKind::BeforeDelete)?;

        let (sql, params) = Delete::from(&config.table)
            .filter(Condition::eq(&config.primary_key, id))
            .build(self.dialect());
        tracing::trace!(sql = %sql, "Executing delete");
        if let Err(e) = self.conn.execute(&sql, &params) {
            return write_failed(Err(e), &config.model, "delete");
        }

        self.registry.borrow_mut().remove(model_type, id);
        self.invalidate(&[config.table.clone(), format!("{}/{}", config.table, id)]);
        self.run_hooks(owner, &config, HookKind::AfterDelete)?;
        Ok(true)
    }

    fn run_hooks(&self, owner: &AnyModelRef, config: &ModelConfig, kind: HookKind) -> Result<()> {
        for method in config.hooks(kind) {
            tracing::trace!(model = %config.model, hook = ?kind, method = %method, "Running hook");
            owner.borrow_mut().call_hook(method)?;
        }
        Ok(())
    }

    /// Bring child rows and link rows in line with the owner's loaded
    /// collections. With `only_changed`, unchanged collections are skipped
    /// and each is diffed against its baseline; otherwise (insert) every
    /// current member counts as added.
    fn reconcile(
        &self,
        owner: &AnyModelRef,
        config: &ModelConfig,
        owner_id: i64,
        only_changed: bool,
    ) -> Result<bool> {
        for (property, relation) in config.relations() {
            if !relation.kind.is_to_many() || !property.is_persisted() {
                continue;
            }
            let (current, before, target) = {
                let model = owner.borrow();
                let slot = relation_slot(&*model, &property.name)?;
                let RelationState::Many(current) = slot.state() else {
                    continue;
                };
                if only_changed && !has_changed(&*model, config, property)? {
                    continue;
                }
                let before = match model.state().original(&property.name) {
                    Some(Original::Ids(ids)) if only_changed => ids.clone(),
                    _ => Vec::new(),
                };
                (current, before, slot.target())
            };
            let (removed, added) = diff_ids(&before, &current);

            match relation.kind {
                RelationKind::OneToMany => {
                    let table = &relation.target_table;
                    let pk = &relation.target_primary_key;
                    let column = &relation.foreign_key;
                    if !removed.is_empty() {
                        self.set_foreign_key(table, pk, column, Value::Null, &removed)?;
                    }
                    if !added.is_empty() {
                        let owner_value = Value::BigInt(owner_id);
                        self.set_foreign_key(table, pk, column, owner_value, &added)?;
                    }
                }
                RelationKind::ManyToMany => {
                    let through = relation.through.clone().unwrap_or_default();
                    if !removed.is_empty() {
                        LinkOp::Unlink {
                            table: through.clone(),
                            local_column: relation.local_key.clone(),
                            local_value: owner_id,
                            remote_column: relation.foreign_key.clone(),
                            remote_values: removed.clone(),
                        }
                        .execute(self)?;
                    }
                    for remote in &added {
                        LinkOp::Link {
                            table: through.clone(),
                            local_column: relation.local_key.clone(),
                            local_value: owner_id,
                            remote_column: relation.foreign_key.clone(),
                            remote_value: *remote,
                        }
                        .execute(self)?;
                    }
                    self.invalidate(&[through]);
                }
                RelationKind::OneToOne | RelationKind::ManyToOne => {}
            }

            owner
                .borrow_mut()
                .state_mut()
                .set_original(property.name.clone(), Original::Ids(current));
            self.invalidate(&[
                relation.target_table.clone(),
                format!("{}/{}/relations", config.table, owner_id),
            ]);
            self.notify_external_update(target, added.iter().chain(&removed).copied())?;
            tracing::debug!(
                model = %config.model,
                field = %property.name,
                added = added.len(),
                removed = removed.len(),
                "Reconciled collection"
            );
        }
        Ok(true)
    }

    fn set_foreign_key(
        &self,
        table: &str,
        primary_key: &str,
        column: &str,
        value: Value,
        ids: &[i64],
    ) -> Result<()> {
        let (sql, params) = Update::table(table)
            .set(column, value)
            .filter(Condition::is_in(primary_key, ids.iter().copied()))
            .build(self.dialect());
        tracing::trace!(sql = %sql, "Executing foreign key update");
        self.conn.execute(&sql, &params).map(|_| ())
    }

    /// Run the target type's external-update hooks for each affected id.
    fn notify_external_update(
        &self,
        target: ModelType,
        ids: impl Iterator<Item = i64>,
    ) -> Result<()> {
        let config = self.config_of(target)?;
        let hooks = config.hooks(HookKind::AfterExternalUpdate);
        if hooks.is_empty() {
            return Ok(());
        }
        for id in ids {
            for hook in hooks {
                tracing::trace!(model = %config.model, id, hook = %hook, "Running external hook");
                target.call_static_hook(hook, id)?;
            }
        }
        Ok(())
    }
}

/// Run every field's validations, failing with all collected errors.
fn validate_fields(model: &dyn AnyModel, config: &ModelConfig) -> Result<()> {
    let mut errors = ValidationError::new();
    for property in &config.properties {
        if property.validations.is_empty() {
            continue;
        }
        let value = model
            .field(&property.name)
            .and_then(|slot| slot.to_value())
            .unwrap_or(Value::Null);
        for validation in &property.validations {
            validation.check(&config.model, &property.name, &value, &mut errors);
        }
    }
    errors.into_result().map_err(Error::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        MockConnection, ModelA, ModelB, ModelD, ModelE, Tagged, a_row, external_updates,
        reparented,
    };
    use tablebind_core::Row;

    #[test]
    fn diff_ignores_zero_ids() {
        assert_eq!(diff_ids(&[1, 2, 3], &[2, 3, 4, 0]), (vec![1], vec![4]));
        assert_eq!(diff_ids(&[], &[]), (vec![], vec![]));
    }

    #[test]
    fn insert_assigns_id_and_registers() {
        let conn = MockConnection::new();
        conn.set_insert_id(7);
        let session = Session::new(conn.clone());
        let a = session.create(ModelA { name: "new".into(), ..ModelA::default() }).unwrap();

        assert!(session.save(&a).unwrap());
        assert_eq!(a.borrow().model_a_id, Some(7));
        assert_eq!(a.id(), Some(7));
        assert!(session.is_registered::<ModelA>(7));
        assert!(session.changed_properties(&a).unwrap().is_empty());

        let statements = conn.statements();
        assert_eq!(statements[0].0, "BEGIN");
        assert_eq!(statements[1].0, "INSERT INTO \"modelsA\" (\"name\") VALUES (?1)");
        assert_eq!(statements.last().unwrap().0, "COMMIT");
    }

    #[test]
    fn update_writes_only_changed_columns() {
        let conn = MockConnection::new();
        conn.push_rows(vec![a_row(1, "old")]);
        let session = Session::new(conn.clone());
        let a = session.get::<ModelA>(1).unwrap();

        assert!(session.update(&a).unwrap());
        assert!(conn.statements().is_empty());

        a.borrow_mut().name = "new".into();
        assert!(session.update(&a).unwrap());
        let (sql, params) = conn.statements()[0].clone();
        assert_eq!(sql, "UPDATE \"modelsA\" SET \"name\" = ?1 WHERE \"model_a_id\" = ?2");
        assert_eq!(params, vec![Value::Text("new".into()), Value::BigInt(1)]);
        assert!(!session.has_changed(&a, "name").unwrap());
    }

    #[test]
    fn failed_write_rolls_back_and_returns_false() {
        let conn = MockConnection::new();
        conn.fail_writes(true);
        let session = Session::new(conn.clone());
        let a = session.create(ModelA { name: "x".into(), ..ModelA::default() }).unwrap();

        assert!(!session.save(&a).unwrap());
        assert_eq!(a.id(), None);
        assert_eq!(conn.statements().last().unwrap().0, "ROLLBACK");
    }

    #[test]
    fn transient_update_and_delete_are_refused() {
        let session = Session::new(MockConnection::new());
        let a = session.create(ModelA::default()).unwrap();
        assert!(!session.update(&a).unwrap());
        assert!(!session.delete(&a).unwrap());
    }

    #[test]
    fn delete_unregisters() {
        let conn = MockConnection::new();
        conn.push_rows(vec![a_row(1, "gone")]);
        let session = Session::new(conn.clone());
        let a = session.get::<ModelA>(1).unwrap();
        assert!(session.delete(&a).unwrap());
        assert!(!session.is_registered::<ModelA>(1));
        assert_eq!(conn.statements()[0].0, "DELETE FROM \"modelsA\" WHERE \"model_a_id\" = ?1");
    }

    #[test]
    fn one_to_many_reconciliation_moves_foreign_keys() {
        let conn = MockConnection::new();
        conn.push_rows(vec![a_row(1, "owner")]);
        let session = Session::new(conn.clone());
        let a = session.get::<ModelA>(1).unwrap();
        conn.push_rows(vec![
            crate::testing::b_row(5, "x", Some(1)),
            crate::testing::b_row(6, "y", Some(1)),
        ]);
        session.load(&a, "children").unwrap();

        let six = a.borrow().children.get().unwrap().get(6).cloned().unwrap();
        a.borrow_mut().children.remove(&six).unwrap();
        let seven = ModelRef::new(ModelB::default());
        seven.borrow_mut().state.set_id(Some(7));
        a.borrow_mut().children.add(seven).unwrap();

        let notified = reparented();
        assert!(session.update(&a).unwrap());
        assert_eq!(reparented(), notified + 2);
        let statements = conn.statements();
        assert_eq!(
            statements[0].0,
            "UPDATE \"modelsB\" SET \"model_a_id\" = ?1 WHERE \"model_b_id\" IN (?2)"
        );
        assert_eq!(statements[0].1, vec![Value::Null, Value::BigInt(6)]);
        assert_eq!(statements[1].1, vec![Value::BigInt(1), Value::BigInt(7)]);
        assert!(!session.has_changed(&a, "children").unwrap());
    }

    #[test]
    fn many_to_many_links_and_notifies_target() {
        let conn = MockConnection::new();
        conn.set_insert_id(3);
        let session = Session::new(conn.clone());

        let e = ModelRef::new(ModelE::default());
        e.borrow_mut().state.set_id(Some(11));
        let d = session.create(ModelD::default()).unwrap();
        d.borrow_mut().members.add(e).unwrap();

        let before = external_updates();
        assert!(session.save(&d).unwrap());
        let statements = conn.statements();
        assert_eq!(
            statements[2].0,
            "INSERT OR IGNORE INTO \"modelsD_modelsE\" (\"model_d_id\", \"model_e_id\") \
             VALUES (?1, ?2)"
        );
        assert_eq!(statements[2].1, vec![Value::BigInt(3), Value::BigInt(11)]);
        assert_eq!(external_updates(), before + 1);
    }

    fn member(id: i64) -> ModelRef<ModelE> {
        let e = ModelRef::new(ModelE::default());
        e.borrow_mut().state.set_id(Some(id));
        e
    }

    fn link_inserts_after_rollback(conn: &MockConnection) -> Vec<String> {
        conn.statements()
            .into_iter()
            .map(|(sql, _)| sql)
            .skip_while(|sql| sql != "ROLLBACK")
            .filter(|sql| sql.starts_with("INSERT OR IGNORE"))
            .collect()
    }

    #[test]
    fn retried_insert_writes_every_collection() {
        let conn = MockConnection::new();
        conn.set_insert_id(4);
        let session = Session::new(conn.clone());
        let tagged = session.create(Tagged::default()).unwrap();
        tagged.borrow_mut().primary.add(member(11)).unwrap();
        tagged.borrow_mut().secondary.add(member(12)).unwrap();

        conn.fail_matching(Some("tagged_secondary"));
        assert!(!session.save(&tagged).unwrap());
        assert_eq!(tagged.id(), None);
        assert!(!session.is_registered::<Tagged>(4));

        conn.fail_matching(None);
        assert!(session.save(&tagged).unwrap());
        let links = link_inserts_after_rollback(&conn);
        assert_eq!(links.len(), 2);
        assert!(links[0].contains("tagged_primary"));
        assert!(links[1].contains("tagged_secondary"));
    }

    #[test]
    fn failed_update_keeps_collections_changed() {
        let conn = MockConnection::new();
        conn.push_rows(vec![Row::from_pairs([("tagged_id", Value::BigInt(1))])]);
        let session = Session::new(conn.clone());
        let tagged = session.get::<Tagged>(1).unwrap();
        session.load(&tagged, "primary").unwrap();
        session.load(&tagged, "secondary").unwrap();
        tagged.borrow_mut().primary.add(member(11)).unwrap();
        tagged.borrow_mut().secondary.add(member(12)).unwrap();

        conn.fail_matching(Some("tagged_secondary"));
        assert!(!session.save(&tagged).unwrap());
        assert!(session.has_changed(&tagged, "primary").unwrap());
        assert!(session.has_changed(&tagged, "secondary").unwrap());

        conn.fail_matching(None);
        assert!(session.save(&tagged).unwrap());
        assert_eq!(link_inserts_after_rollback(&conn).len(), 2);
        assert!(!session.has_changed(&tagged, "primary").unwrap());
    }
}
