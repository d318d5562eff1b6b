//! Change detection against the per-instance baseline.
//!
//! Every model carries its baseline in [`ModelState`](tablebind_core::ModelState):
//! the value of each field as last loaded or saved. Extend fields keep their
//! baseline column data in the slot itself. The functions here compare the
//! current field values against that baseline and build the column data an
//! INSERT or UPDATE writes.

use std::collections::BTreeMap;

use tablebind_core::{
    AnyModel, Error, FieldSlot, ModelConfig, Original, PropertyConfig, QueryData, RelationState,
    Result, Value,
};

/// Current value of a field, in the shape its baseline is recorded in.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldState {
    Value(Value),
    Id(Option<i64>),
    Ids(Vec<i64>),
    /// Column data of an extend field
    Columns(QueryData),
}

fn slot<'m>(
    model: &'m dyn AnyModel,
    config: &ModelConfig,
    name: &str,
) -> Result<&'m dyn FieldSlot> {
    model
        .field(name)
        .ok_or_else(|| Error::undefined_property(&config.model, name))
}

/// Whether `property` differs from its baseline.
///
/// Unloaded relations and extend values that were never read count as
/// unchanged; a field without a baseline counts as changed.
pub fn has_changed(
    model: &dyn AnyModel,
    config: &ModelConfig,
    property: &PropertyConfig,
) -> Result<bool> {
    let slot = slot(model, config, &property.name)?;
    let original = model.state().original(&property.name);

    if let Some(relation) = slot.as_relation() {
        return Ok(match (relation.state(), original) {
            (RelationState::NotLoaded, _) => false,
            (_, None) => true,
            (RelationState::One(id), Some(Original::Id(before))) => id != *before,
            (RelationState::One(id), Some(Original::Value(before))) => id != before.as_id(),
            (RelationState::Many(ids), Some(Original::Ids(before))) => !same_members(&ids, before),
            _ => true,
        });
    }

    if let Some(extend) = slot.as_extend() {
        if !extend.is_loaded() {
            return Ok(false);
        }
        return Ok(match extend.baseline() {
            Some(baseline) => extend.current()?.as_ref() != Some(&baseline),
            None => true,
        });
    }

    let Some(current) = slot.to_value() else {
        return Ok(false);
    };
    Ok(match original {
        Some(Original::Value(before)) => *before != current,
        _ => true,
    })
}

/// Collections compare by member count, then by sorted ids.
fn same_members(current: &[i64], before: &[i64]) -> bool {
    if current.len() != before.len() {
        return false;
    }
    let mut a = current.to_vec();
    let mut b = before.to_vec();
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

/// Current state of a field, or `None` when it has nothing to report
/// (unloaded relations, unset extend fields).
pub fn field_state(
    model: &dyn AnyModel,
    config: &ModelConfig,
    property: &PropertyConfig,
) -> Result<Option<FieldState>> {
    let slot = slot(model, config, &property.name)?;
    if let Some(relation) = slot.as_relation() {
        return Ok(match relation.state() {
            RelationState::NotLoaded => None,
            RelationState::One(id) => Some(FieldState::Id(id)),
            RelationState::Many(ids) => Some(FieldState::Ids(ids)),
        });
    }
    if let Some(extend) = slot.as_extend() {
        if !extend.is_loaded() {
            return Ok(None);
        }
        return Ok(extend.current()?.map(FieldState::Columns));
    }
    Ok(slot.to_value().map(FieldState::Value))
}

/// Fields that differ from their baseline, with their current state.
pub fn changed_properties(
    model: &dyn AnyModel,
    config: &ModelConfig,
) -> Result<BTreeMap<String, FieldState>> {
    let mut changed = BTreeMap::new();
    for property in &config.properties {
        if !has_changed(model, config, property)? {
            continue;
        }
        if let Some(state) = field_state(model, config, property)? {
            changed.insert(property.name.clone(), state);
        }
    }
    Ok(changed)
}

/// Column data written for `model`.
///
/// With `only_changed`, fields equal to their baseline are left out. Fields
/// that are not persisted, an unset primary key, to-many relations and
/// relations that were never loaded never contribute.
pub fn query_data(
    model: &dyn AnyModel,
    config: &ModelConfig,
    only_changed: bool,
) -> Result<QueryData> {
    let mut data = QueryData::new();
    for property in &config.properties {
        if !property.is_persisted() || property.is_to_many() {
            continue;
        }
        let slot = slot(model, config, &property.name)?;
        if property.is_primary_key && slot.to_value().is_none_or(|v| v.is_null()) {
            continue;
        }
        if only_changed && !has_changed(model, config, property)? {
            continue;
        }

        if let Some(relation) = slot.as_relation() {
            let (Some(relation_config), RelationState::One(id)) =
                (&property.relation, relation.state())
            else {
                continue;
            };
            data.insert(relation_config.local_key.clone(), id.map_or(Value::Null, Value::BigInt));
        } else if let Some(extend) = slot.as_extend() {
            if let Some(columns) = extend.current()? {
                data.extend(columns);
            }
        } else if let Some(value) = slot.to_value() {
            data.insert(property.column.clone(), value);
        }
    }
    Ok(data)
}

/// Record the current value of every loaded, persisted field as its baseline.
pub fn snapshot(model: &mut dyn AnyModel, config: &ModelConfig) -> Result<()> {
    for property in &config.properties {
        if !property.is_persisted() {
            continue;
        }
        let state = field_state(&*model, config, property)?;
        match state {
            Some(FieldState::Value(value)) => model
                .state_mut()
                .set_original(property.name.clone(), Original::Value(value)),
            Some(FieldState::Id(id)) => model
                .state_mut()
                .set_original(property.name.clone(), Original::Id(id)),
            Some(FieldState::Ids(ids)) => model
                .state_mut()
                .set_original(property.name.clone(), Original::Ids(ids)),
            Some(FieldState::Columns(_)) => {
                let extend = model
                    .field_mut(&property.name)
                    .and_then(|slot| slot.as_extend_mut());
                if let Some(extend) = extend {
                    extend.rebase()?;
                }
            }
            None => {}
        }
    }
    Ok(())
}
