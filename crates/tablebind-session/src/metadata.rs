//! Model metadata resolution and caching.
//!
//! Turns a type's [`ModelDeclaration`] into a fully defaulted and validated
//! [`ModelConfig`]. Resolution happens once per type per session. When an
//! artifact directory is configured, each resolved configuration is also
//! written there as JSON and read back on later resolutions, so the
//! declaration is only walked the first time a type is seen.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tablebind_core::naming::{sanitize_identifier, to_camel_case, to_snake_case};
use tablebind_core::{
    ConfigErrorKind, Error, FieldDeclaration, Hooks, ModelConfig, ModelDeclaration, ModelType,
    PropertyConfig, RelationConfig, RelationDeclaration, RelationKind, Result, TypeKind,
};

/// Per-session cache of resolved model configurations.
#[derive(Debug, Default)]
pub struct MetadataCache {
    configs: RefCell<HashMap<ModelType, Rc<ModelConfig>>>,
    resolving: RefCell<HashSet<ModelType>>,
    artifact_dir: Option<PathBuf>,
}

impl MetadataCache {
    pub fn new(artifact_dir: Option<PathBuf>) -> Self {
        Self {
            configs: RefCell::new(HashMap::new()),
            resolving: RefCell::new(HashSet::new()),
            artifact_dir,
        }
    }

    /// The resolved configuration of `model`.
    pub fn resolve(&self, model: ModelType) -> Result<Rc<ModelConfig>> {
        if let Some(config) = self.configs.borrow().get(&model) {
            return Ok(Rc::clone(config));
        }
        // Re-entered while this type is still being resolved: answer from
        // the declaration without touching the cache.
        if self.resolving.borrow().contains(&model) {
            tracing::trace!(model = model.name(), "Metadata resolution re-entered");
            return build_config(model).map(Rc::new);
        }

        self.resolving.borrow_mut().insert(model);
        let resolved = self.resolve_uncached(model);
        self.resolving.borrow_mut().remove(&model);

        let config = Rc::new(resolved?);
        self.configs.borrow_mut().insert(model, Rc::clone(&config));
        Ok(config)
    }

    /// Primary key column of `model`, from the cache when resolved.
    pub fn primary_key(&self, model: ModelType) -> String {
        match self.configs.borrow().get(&model) {
            Some(config) => config.primary_key.clone(),
            None => primary_key_of(&model.declaration()),
        }
    }

    pub fn is_resolving(&self, model: ModelType) -> bool {
        self.resolving.borrow().contains(&model)
    }

    fn resolve_uncached(&self, model: ModelType) -> Result<ModelConfig> {
        let config = match self.artifact_path(model) {
            Some(path) if path.exists() => match read_artifact(model, &path) {
                Ok(config) => {
                    tracing::trace!(
                        model = model.name(),
                        path = %path.display(),
                        "Loaded metadata artifact"
                    );
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        model = model.name(),
                        error = %e,
                        "Discarding unreadable metadata artifact"
                    );
                    self.build_and_store(model, &path)?
                }
            },
            Some(path) => self.build_and_store(model, &path)?,
            None => self.build(model)?,
        };
        Ok(config)
    }

    fn build(&self, model: ModelType) -> Result<ModelConfig> {
        build_config_with(model, &|target| self.primary_key(target))
    }

    /// Forget every resolved configuration and delete written artifacts.
    pub fn clear(&self) -> Result<()> {
        let models: Vec<ModelType> = self.configs.borrow_mut().drain().map(|(m, _)| m).collect();
        for model in models {
            if let Some(path) = self.artifact_path(model) {
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    pub fn is_resolved(&self, model: ModelType) -> bool {
        self.configs.borrow().contains_key(&model)
    }

    fn artifact_path(&self, model: ModelType) -> Option<PathBuf> {
        self.artifact_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", sanitize_identifier(model.path()))))
    }

    fn build_and_store(&self, model: ModelType, path: &Path) -> Result<ModelConfig> {
        let config = self.build(model)?;
        write_artifact(model, path, &config)?;
        // The stored artifact is what later sessions will see.
        read_artifact(model, path)
    }
}

fn artifact_error(model: ModelType, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::config(
        ConfigErrorKind::Artifact,
        model.name(),
        None,
        format!("metadata artifact {}: {}", path.display(), e),
    )
}

fn write_artifact(model: ModelType, path: &Path, config: &ModelConfig) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| artifact_error(model, path, e))?;
    }
    let json = serde_json::to_string_pretty(config).map_err(|e| artifact_error(model, path, e))?;
    fs::write(path, json).map_err(|e| artifact_error(model, path, e))?;
    tracing::debug!(model = model.name(), path = %path.display(), "Wrote metadata artifact");
    Ok(())
}

fn read_artifact(model: ModelType, path: &Path) -> Result<ModelConfig> {
    let json = fs::read_to_string(path).map_err(|e| artifact_error(model, path, e))?;
    serde_json::from_str(&json).map_err(|e| artifact_error(model, path, e))
}

/// Primary key column of a declaration.
///
/// An explicit key wins. Otherwise the first of `<snake>_id` and
/// `<camelCase>Id` that names a declared field is used, falling back to `id`.
pub fn primary_key_of(decl: &ModelDeclaration) -> String {
    if let Some(pk) = decl.primary_key {
        return pk.to_string();
    }
    let name = decl.model.name();
    [
        format!("{}_id", to_snake_case(name)),
        format!("{}Id", to_camel_case(name)),
    ]
    .into_iter()
    .find(|candidate| decl.field_named(candidate).is_some())
    .unwrap_or_else(|| "id".to_string())
}

/// Link table name for a many-to-many relation without an explicit one.
pub fn default_through_table(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

/// Resolve a model type's declaration into its configuration.
pub fn build_config(model: ModelType) -> Result<ModelConfig> {
    build_config_with(model, &|target| primary_key_of(&target.declaration()))
}

fn build_config_with(
    model: ModelType,
    key_of: &dyn Fn(ModelType) -> String,
) -> Result<ModelConfig> {
    let decl = model.declaration();
    let primary_key = primary_key_of(&decl);

    let properties = decl
        .fields
        .iter()
        .map(|field| build_property(&decl, &primary_key, field, key_of))
        .collect::<Result<Vec<_>>>()?;

    let mut hooks = Hooks::default();
    for (kind, method) in &decl.hooks {
        hooks.push(*kind, *method);
    }
    hooks.extends_serialization = decl.serializers.iter().map(ToString::to_string).collect();

    tracing::debug!(
        model = model.name(),
        table = model.table(),
        primary_key = %primary_key,
        properties = properties.len(),
        "Resolved model metadata"
    );

    Ok(ModelConfig {
        model: model.name().to_string(),
        type_path: model.path().to_string(),
        table: model.table().to_string(),
        primary_key,
        factory: decl.factory_binding()?,
        properties,
        hooks,
        cache_tags: decl.cache_tags.iter().map(ToString::to_string).collect(),
    })
}

fn build_property(
    decl: &ModelDeclaration,
    primary_key: &str,
    field: &FieldDeclaration,
    key_of: &dyn Fn(ModelType) -> String,
) -> Result<PropertyConfig> {
    let owner = decl.model.name();
    let info = field.type_info;
    let kind = info.kind.field_kind();

    let relation = match field.relations.as_slice() {
        [] => {
            if info.kind.model_type().is_some() {
                return Err(Error::config(
                    ConfigErrorKind::RelationTargetMismatch,
                    owner,
                    Some(field.name),
                    format!("field of model type {} declares no relation", info.name),
                ));
            }
            None
        }
        [relation] => Some(build_relation(decl, primary_key, field, relation, key_of)?),
        _ => {
            return Err(Error::config(
                ConfigErrorKind::DuplicateRelation,
                owner,
                Some(field.name),
                "only one relation may be declared per field",
            ));
        }
    };

    let nullable = match field.relations.first() {
        Some(relation) if relation.kind.is_to_one() => info.nullable && !relation.required,
        Some(_) => false,
        None => info.nullable,
    };

    Ok(PropertyConfig {
        name: field.name.to_string(),
        column: to_snake_case(field.name),
        is_primary_key: field.name == primary_key,
        nullable,
        is_builtin: kind.is_builtin(),
        is_extend: matches!(info.kind, TypeKind::Extend),
        is_enum: matches!(info.kind, TypeKind::Enum),
        is_date_time: kind.is_temporal(),
        instantiate: field.instantiate,
        no_db: field.no_db,
        is_virtual: field.is_virtual,
        type_name: info.name.to_string(),
        kind,
        relation,
        validations: field.validations.clone(),
        skip_serializing: field.skip_serializing,
        alias: field.alias.map(str::to_string),
    })
}

fn build_relation(
    decl: &ModelDeclaration,
    owner_pk: &str,
    field: &FieldDeclaration,
    relation: &RelationDeclaration,
    key_of: &dyn Fn(ModelType) -> String,
) -> Result<RelationConfig> {
    let owner = decl.model.name();
    let fail = |kind: ConfigErrorKind, message: String| {
        Err(Error::config(kind, owner, Some(field.name), message))
    };

    let target = match field.type_info.kind {
        TypeKind::Model(target) | TypeKind::Collection(target) => target,
        TypeKind::Scalar(_) | TypeKind::Temporal(_) | TypeKind::Enum | TypeKind::Extend => {
            return fail(
                ConfigErrorKind::ScalarRelation,
                format!(
                    "relation declared on field of type {}, which is not a model",
                    field.type_info.name
                ),
            );
        }
    };

    if let Some(explicit) = relation.target {
        if explicit != target {
            return fail(
                ConfigErrorKind::RelationTargetMismatch,
                format!(
                    "relation targets {} but the field holds {}",
                    explicit.name(),
                    target.name()
                ),
            );
        }
    }

    let is_collection = matches!(field.type_info.kind, TypeKind::Collection(_));
    if relation.kind.is_to_many() != is_collection {
        let expected = if relation.kind.is_to_many() {
            "a model collection"
        } else {
            "a single model"
        };
        return fail(
            ConfigErrorKind::CollectionType,
            format!(
                "{:?} relation requires {}, found {}",
                relation.kind, expected, field.type_info.name
            ),
        );
    }

    if let Some(method) = relation.factory_method {
        if !decl.methods.contains(&method) {
            return fail(
                ConfigErrorKind::MissingFactoryMethod,
                format!("factory method '{method}' is not provided by {owner}"),
            );
        }
    }

    let target_pk = key_of(target);

    let (foreign_key, local_key, through) = match relation.kind {
        RelationKind::OneToOne | RelationKind::ManyToOne => {
            let foreign_key = relation
                .foreign_key
                .map_or_else(|| target_pk.clone(), str::to_string);
            let local_key = relation.local_key.map_or_else(|| foreign_key.clone(), str::to_string);
            (foreign_key, local_key, None)
        }
        RelationKind::OneToMany => {
            let foreign_key = relation.foreign_key.unwrap_or(owner_pk).to_string();
            let local_key = relation.local_key.map_or_else(|| foreign_key.clone(), str::to_string);
            (foreign_key, local_key, None)
        }
        RelationKind::ManyToMany => {
            let foreign_key = relation
                .foreign_key
                .map_or_else(|| target_pk.clone(), str::to_string);
            let local_key = relation.local_key.unwrap_or(owner_pk).to_string();
            let through = relation.through.map_or_else(
                || default_through_table(decl.model.table(), target.table()),
                str::to_string,
            );
            (foreign_key, local_key, Some(through))
        }
    };

    Ok(RelationConfig {
        kind: relation.kind,
        target: target.name().to_string(),
        target_table: target.table().to_string(),
        target_primary_key: target_pk,
        factory: target.declaration().factory_binding()?,
        foreign_key,
        local_key,
        loading: relation.loading,
        factory_method: relation.factory_method.map(str::to_string),
        through,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Link, ModelA, ModelB, ModelD, ModelE, temp_dir};
    use tablebind_core::{HookKind, LoadingMode};

    #[test]
    fn primary_key_is_inferred_from_fields() {
        let config = build_config(ModelType::of::<ModelA>()).unwrap();
        assert_eq!(config.table, "modelsA");
        assert_eq!(config.primary_key, "model_a_id");
        assert!(config.require_property("model_a_id").unwrap().is_primary_key);
        assert!(!config.require_property("name").unwrap().is_primary_key);
    }

    #[test]
    fn primary_key_falls_back_to_id() {
        let config = build_config(ModelType::of::<Link>()).unwrap();
        assert_eq!(config.primary_key, "id");
    }

    #[test]
    fn to_one_keys_default_to_target_primary_key() {
        let config = build_config(ModelType::of::<ModelB>()).unwrap();
        let parent = config.require_property("parent").unwrap();
        let relation = parent.relation.as_ref().unwrap();
        assert_eq!(relation.kind, RelationKind::ManyToOne);
        assert_eq!(relation.target, "ModelA");
        assert_eq!(relation.foreign_key, "model_a_id");
        assert_eq!(relation.local_key, "model_a_id");
        assert_eq!(relation.loading, LoadingMode::Eager);
        assert!(parent.nullable);
    }

    #[test]
    fn one_to_many_keys_default_to_owner_primary_key() {
        let config = build_config(ModelType::of::<ModelA>()).unwrap();
        let children = config.require_property("children").unwrap();
        let relation = children.relation.as_ref().unwrap();
        assert_eq!(relation.foreign_key, "model_a_id");
        assert_eq!(relation.target_table, "modelsB");
        assert_eq!(relation.target_primary_key, "model_b_id");
        assert!(children.is_to_many());
    }

    #[test]
    fn many_to_many_through_table_is_sorted() {
        let d = build_config(ModelType::of::<ModelD>()).unwrap();
        let e = build_config(ModelType::of::<ModelE>()).unwrap();
        let from_d = d.require_property("members").unwrap().relation.clone().unwrap();
        let from_e = e.require_property("groups").unwrap().relation.clone().unwrap();
        assert_eq!(from_d.through.as_deref(), Some("modelsD_modelsE"));
        assert_eq!(from_e.through, from_d.through);
        assert_eq!(from_d.local_key, "model_d_id");
        assert_eq!(from_d.foreign_key, "model_e_id");
        assert_eq!(from_e.local_key, "model_e_id");
        assert_eq!(from_e.foreign_key, "model_d_id");
        assert_eq!(e.hooks(HookKind::AfterExternalUpdate), ["links_changed"]);
    }

    #[test]
    fn reentrant_resolution_bypasses_the_cache() {
        let cache = MetadataCache::new(None);
        let b = ModelType::of::<ModelB>();
        cache.resolving.borrow_mut().insert(b);

        let config = cache.resolve(b).unwrap();
        assert_eq!(config.primary_key, "model_b_id");
        assert!(!cache.is_resolved(b));

        cache.resolving.borrow_mut().clear();
        cache.resolve(b).unwrap();
        assert!(cache.is_resolved(b));
        assert!(!cache.is_resolving(b));
    }

    #[test]
    fn target_keys_do_not_resolve_targets() {
        let cache = MetadataCache::new(None);
        cache.resolve(ModelType::of::<ModelA>()).unwrap();
        assert_eq!(cache.primary_key(ModelType::of::<ModelA>()), "model_a_id");
        assert_eq!(cache.primary_key(ModelType::of::<ModelB>()), "model_b_id");
        assert!(!cache.is_resolved(ModelType::of::<ModelB>()));
    }

    #[test]
    fn default_through_table_order() {
        assert_eq!(default_through_table("b", "a"), "a_b");
        assert_eq!(default_through_table("a", "b"), "a_b");
    }

    #[test]
    fn artifact_is_written_and_reused() {
        let dir = temp_dir("metadata_artifact");
        let cache = MetadataCache::new(Some(dir.clone()));
        let config = cache.resolve(ModelType::of::<ModelA>()).unwrap();
        assert!(cache.is_resolved(ModelType::of::<ModelA>()));

        let files: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert_eq!(files.len(), 1);

        let second = MetadataCache::new(Some(dir.clone()));
        assert_eq!(*second.resolve(ModelType::of::<ModelA>()).unwrap(), *config);

        cache.clear().unwrap();
        assert!(!cache.is_resolved(ModelType::of::<ModelA>()));
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_artifact_is_regenerated() {
        let dir = temp_dir("metadata_corrupt");
        let cache = MetadataCache::new(Some(dir.clone()));
        let path = cache.artifact_path(ModelType::of::<ModelA>()).unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let config = cache.resolve(ModelType::of::<ModelA>()).unwrap();
        assert_eq!(config.primary_key, "model_a_id");
        let _ = fs::remove_dir_all(dir);
    }
}
