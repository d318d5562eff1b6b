//! Hydration of instances from rows, and relation loading.
//!
//! Hydrating a row assigns coerced column values to scalar fields, hands the
//! row to extend fields and binds a [`Loader`] to every relation field.
//! Eager relations are loaded right after; lazy ones when first requested
//! through [`Session::load`]. The instance is registered before its
//! relations are loaded, so cycles between eager relations resolve to the
//! instance being built instead of recursing.

use tablebind_core::coerce::coerce;
use tablebind_core::{
    AnyModel, AnyModelRef, ConfigErrorKind, Error, FactoryBinding, LoadSource, LoadingMode,
    Loader, ModelConfig, ModelType, Original, PropertyConfig, RelationConfig, RelationSlot,
    RelationState, RelationValue, Resolve, Result, Row, TypeError, ValidationError,
    ValidationErrorKind, Value,
};
use tablebind_query::{Condition, Select};

use crate::Session;

pub(crate) fn relation_slot<'m>(
    model: &'m dyn AnyModel,
    field: &str,
) -> Result<&'m dyn RelationSlot> {
    let owner = model.model_type();
    model
        .field(field)
        .and_then(|slot| slot.as_relation())
        .ok_or_else(|| Error::undefined_property(owner.name(), field))
}

pub(crate) fn relation_slot_mut<'m>(
    model: &'m mut dyn AnyModel,
    field: &str,
) -> Result<&'m mut dyn RelationSlot> {
    let owner = model.model_type();
    model
        .field_mut(field)
        .and_then(|slot| slot.as_relation_mut())
        .ok_or_else(|| Error::undefined_property(owner.name(), field))
}

/// Attach the column name to conversion errors.
fn in_column(error: Error, column: &str) -> Error {
    match error {
        Error::Type(TypeError {
            expected,
            actual,
            column: None,
        }) => Error::Type(TypeError {
            expected,
            actual,
            column: Some(column.to_string()),
        }),
        other => other,
    }
}

impl Session {
    /// The instance for `(model, id)`: the registered one if present,
    /// otherwise hydrated from `row` or, without a row, fetched by id.
    pub(crate) fn materialize(
        &self,
        model: ModelType,
        id: i64,
        row: Option<Row>,
    ) -> Result<AnyModelRef> {
        if let Some(existing) = self.registry.borrow().get(model, id) {
            return Ok(existing);
        }

        let config = self.config_of(model)?;
        let row = match row {
            Some(row) => row,
            None => self
                .fetch_row(&config, id, false)?
                .ok_or_else(|| Error::not_found(&config.model, &config.table, Some(id)))?,
        };

        let instance = model.create();
        instance.borrow_mut().state_mut().set_id(Some(id));
        self.registry
            .borrow_mut()
            .insert(model, id, instance.clone());

        if let Err(e) = self.hydrate(&instance, &config, row) {
            self.registry.borrow_mut().remove(model, id);
            return Err(e);
        }
        Ok(instance)
    }

    /// Select the row of `(config, id)`, through the result cache unless
    /// `refresh` is set.
    pub(crate) fn fetch_row(
        &self,
        config: &ModelConfig,
        id: i64,
        refresh: bool,
    ) -> Result<Option<Row>> {
        let select = Select::from(&config.table)
            .filter(Condition::eq(&config.primary_key, id))
            .limit(1);
        let rows = if refresh {
            self.select_uncached(&select)?
        } else {
            self.select_rows(&select, Self::instance_tags(config, id))?
        };
        Ok(rows.into_iter().next())
    }

    /// Fill `instance` from `row`, then load eager relations and
    /// default-construct `instantiate` fields.
    #[tracing::instrument(
        level = "trace",
        skip(self, instance, config, row),
        fields(model = %config.model)
    )]
    pub(crate) fn hydrate(
        &self,
        instance: &AnyModelRef,
        config: &ModelConfig,
        row: Row,
    ) -> Result<()> {
        let mut eager = Vec::new();
        {
            let mut model = instance.borrow_mut();
            for property in &config.properties {
                if !property.is_persisted() {
                    continue;
                }
                if property.is_extend {
                    if let Some(extend) = model
                        .field_mut(&property.name)
                        .and_then(|slot| slot.as_extend_mut())
                    {
                        extend.bind_row(row.clone());
                    }
                    continue;
                }
                if let Some(relation) = &property.relation {
                    bind_relation(&mut *model, property, relation, &row)?;
                    if relation.loading == LoadingMode::Eager {
                        eager.push(property.name.as_str());
                    }
                    continue;
                }

                let Some(raw) = row
                    .get_by_name(&property.name)
                    .or_else(|| row.get_by_name(&property.column))
                else {
                    continue;
                };
                let value = coerce(property.kind, property.nullable, raw.clone())
                    .map_err(|e| in_column(e, &property.column))?;
                if property.is_primary_key {
                    model.state_mut().set_id(value.as_id());
                }

                let owner = model.model_type();
                let slot = model
                    .field_mut(&property.name)
                    .ok_or_else(|| Error::undefined_property(owner.name(), &property.name))?;
                slot.assign(value)
                    .map_err(|e| in_column(e, &property.column))?;
                let stored = slot.to_value().unwrap_or(Value::Null);
                model
                    .state_mut()
                    .set_original(property.name.clone(), Original::Value(stored));
            }
            model.state_mut().set_row(row);
        }

        for field in eager {
            self.load_field(instance, field)?;
        }
        instantiate_fields(instance, config)
    }

    /// Run the pending loader of `field`, if any, and store the result.
    ///
    /// On failure the loader is put back so a later access can retry.
    pub(crate) fn load_field(&self, owner: &AnyModelRef, field: &str) -> Result<()> {
        let (loader, target) = {
            let mut model = owner.borrow_mut();
            let slot = relation_slot_mut(&mut *model, field)?;
            (slot.take_loader(), slot.target())
        };
        let Some(loader) = loader else {
            return Ok(());
        };
        tracing::debug!(
            model = owner.model_type().name(),
            field,
            target = target.name(),
            "Loading relation"
        );

        let result = self.run_loader(owner, target, &loader).and_then(|value| {
            let mut model = owner.borrow_mut();
            let slot = relation_slot_mut(&mut *model, field)?;
            slot.fill(value)?;
            let original = match slot.state() {
                RelationState::One(id) => Original::Id(id),
                RelationState::Many(ids) => Original::Ids(ids),
                RelationState::NotLoaded => return Ok(()),
            };
            model.state_mut().set_original(field.to_string(), original);
            Ok(())
        });

        if result.is_err() {
            if let Ok(slot) = relation_slot_mut(&mut *owner.borrow_mut(), field) {
                slot.bind(loader);
            }
        }
        result
    }

    fn run_loader(
        &self,
        owner: &AnyModelRef,
        target: ModelType,
        loader: &Loader,
    ) -> Result<RelationValue> {
        match &loader.source {
            LoadSource::FactoryMethod(method) => {
                let model = owner.borrow();
                model.call_factory(method, self)
            }
            LoadSource::ById {
                id,
                nullable,
                factory,
            } => {
                let Some(id) = *id else {
                    return if *nullable {
                        Ok(RelationValue::One(None))
                    } else {
                        Err(Error::not_found(target.name(), target.table(), None))
                    };
                };
                let found = match factory {
                    Some(binding) => self.construct(binding, target, id),
                    None => self.find(target, id),
                };
                match found {
                    Ok(model) => Ok(RelationValue::One(Some(model))),
                    Err(e) if e.is_not_found() && *nullable => {
                        tracing::debug!(
                            target = target.name(),
                            id,
                            "Related model missing; leaving relation empty"
                        );
                        Ok(RelationValue::One(None))
                    }
                    Err(e) => Err(e),
                }
            }
            LoadSource::ByForeignKey { column, owner_id } => {
                let config = self.config_of(target)?;
                let tag = relations_tag(owner.model_type(), *owner_id);
                let instances = self.select_instances(
                    target,
                    &config,
                    Select::from(&config.table).filter(Condition::eq(column, *owner_id)),
                    vec![tag],
                )?;
                Ok(RelationValue::Many(instances))
            }
            LoadSource::ThroughLink {
                through,
                local_key,
                foreign_key,
                owner_id,
            } => {
                let tags = vec![through.clone(), relations_tag(owner.model_type(), *owner_id)];
                let link = Select::from(through)
                    .columns([foreign_key.as_str()])
                    .filter(Condition::eq(local_key, *owner_id));
                let ids: Vec<i64> = self
                    .select_rows(&link, tags.clone())?
                    .iter()
                    .filter_map(|row| row.get_by_name(foreign_key).and_then(Value::as_id))
                    .collect();
                if ids.is_empty() {
                    return Ok(RelationValue::Many(Vec::new()));
                }
                let config = self.config_of(target)?;
                let instances = self.select_instances(
                    target,
                    &config,
                    Select::from(&config.table).filter(Condition::is_in(&config.primary_key, ids)),
                    tags,
                )?;
                Ok(RelationValue::Many(instances))
            }
        }
    }

    /// Build an instance through a registered factory.
    pub(crate) fn construct(
        &self,
        binding: &FactoryBinding,
        model: ModelType,
        id: i64,
    ) -> Result<AnyModelRef> {
        let factory = self.factories.borrow().get(&binding.factory).cloned();
        let Some(factory) = factory else {
            return Err(Error::config(
                ConfigErrorKind::MissingFactory,
                model.name(),
                None,
                format!("factory '{}' is not registered", binding.factory),
            ));
        };
        tracing::trace!(
            factory = %binding.factory,
            model = model.name(),
            id,
            "Constructing through factory"
        );
        factory.get_by_id(self, model, id, &binding.options)
    }

    /// Run `select` for `model` and turn the rows into registered instances,
    /// keyed by id. Rows without a primary key or whose instance no longer
    /// exists are skipped.
    pub(crate) fn select_instances(
        &self,
        model: ModelType,
        config: &ModelConfig,
        select: Select,
        extra_tags: Vec<String>,
    ) -> Result<Vec<(i64, AnyModelRef)>> {
        let rows = self.select_rows(&select, Self::query_tags(config, extra_tags))?;
        let mut instances = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(id) = row.get_by_name(&config.primary_key).and_then(Value::as_id) else {
                tracing::warn!(model = %config.model, "Row without primary key skipped");
                continue;
            };
            match self.materialize(model, id, Some(row)) {
                Ok(instance) => instances.push((id, instance)),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(instances)
    }
}

fn relations_tag(owner: ModelType, owner_id: i64) -> String {
    format!("{}/{}/relations", owner.table(), owner_id)
}

/// Bind the loader for one relation field from the owner's row.
fn bind_relation(
    model: &mut dyn AnyModel,
    property: &PropertyConfig,
    relation: &RelationConfig,
    row: &Row,
) -> Result<()> {
    let owner_id = model.id();
    let owner = model.model_type();
    let name = property.name.as_str();

    if relation.kind.is_to_one() {
        let id = row.get_by_name(&relation.local_key).and_then(Value::as_id);
        let source = match (&relation.factory_method, id) {
            (Some(method), _) => LoadSource::FactoryMethod(method.clone()),
            (None, Some(id)) => LoadSource::ById {
                id: Some(id),
                nullable: property.nullable,
                factory: relation.factory.clone(),
            },
            (None, None) if property.nullable => {
                relation_slot_mut(model, name)?.fill(RelationValue::One(None))?;
                model.state_mut().set_original(name, Original::Id(None));
                return Ok(());
            }
            (None, None) => {
                let mut errors = ValidationError::new();
                errors.add(
                    owner.name(),
                    name,
                    ValidationErrorKind::Required,
                    "cannot assign null to a non-nullable relation",
                );
                return Err(Error::Validation(errors));
            }
        };
        relation_slot_mut(model, name)?.bind(Loader::new(name, source));
        model.state_mut().set_original(name, Original::Id(id));
        return Ok(());
    }

    let source = match (&relation.factory_method, owner_id) {
        (Some(method), _) => LoadSource::FactoryMethod(method.clone()),
        (None, Some(owner_id)) => match &relation.through {
            Some(through) => LoadSource::ThroughLink {
                through: through.clone(),
                local_key: relation.local_key.clone(),
                foreign_key: relation.foreign_key.clone(),
                owner_id,
            },
            None => LoadSource::ByForeignKey {
                column: relation.foreign_key.clone(),
                owner_id,
            },
        },
        (None, None) => {
            relation_slot_mut(model, name)?.fill(RelationValue::Many(Vec::new()))?;
            model.state_mut().set_original(name, Original::Ids(Vec::new()));
            return Ok(());
        }
    };
    relation_slot_mut(model, name)?.bind(Loader::new(name, source));
    Ok(())
}

/// Default-construct fields flagged `instantiate` that are still unset, and
/// give unset collections an empty value.
pub(crate) fn instantiate_fields(instance: &AnyModelRef, config: &ModelConfig) -> Result<()> {
    let mut model = instance.borrow_mut();
    for property in &config.properties {
        if !property.instantiate && !property.is_to_many() {
            continue;
        }
        let Some(slot) = model.field_mut(&property.name) else {
            return Err(Error::undefined_property(&config.model, &property.name));
        };
        if !slot.is_unset() {
            continue;
        }
        if property.is_to_many() {
            slot.instantiate();
            continue;
        }
        if property.is_builtin || property.is_date_time || property.is_enum {
            return Err(Error::config(
                ConfigErrorKind::Instantiate,
                &config.model,
                Some(&property.name),
                format!("built-in type {} cannot be instantiated", property.type_name),
            ));
        }
        if !slot.instantiate() {
            return Err(Error::config(
                ConfigErrorKind::Instantiate,
                &config.model,
                Some(&property.name),
                format!("type {} has no default instance", property.type_name),
            ));
        }
    }
    Ok(())
}
