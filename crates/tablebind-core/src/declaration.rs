//! Declarations: what a model type says about itself.
//!
//! A [`ModelDeclaration`] is the raw input to metadata resolution. The derive
//! macro emits one per model from its `#[orm(...)]` attributes; it can also be
//! written by hand with the builder methods below. Declarations are not
//! validated here. Defaults (primary key, join columns) and configuration
//! errors are worked out when the session resolves the declaration into a
//! [`ModelConfig`](crate::config::ModelConfig).

use serde::{Deserialize, Serialize};

use crate::error::{ConfigErrorKind, Error, Result};
use crate::field::{FieldSlot, TypeInfo};
use crate::model::ModelType;
use crate::validate::Validation;

/// The type of relationship between two models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    pub const fn is_to_one(self) -> bool {
        matches!(self, RelationKind::OneToOne | RelationKind::ManyToOne)
    }

    pub const fn is_to_many(self) -> bool {
        !self.is_to_one()
    }
}

/// When a relation is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingMode {
    /// During hydration of the owner.
    Eager,
    /// On first access through the session.
    #[default]
    Lazy,
}

/// Lifecycle points a model can hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeInsert,
    AfterInsert,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    /// Fired on the target type when a many-to-many link row pointing at one
    /// of its instances is added or removed.
    AfterExternalUpdate,
}

/// A named factory plus its options, used to construct instances instead of
/// the default by-id load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactoryBinding {
    pub factory: String,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl FactoryBinding {
    pub fn new(factory: impl Into<String>) -> Self {
        Self {
            factory: factory.into(),
            options: serde_json::Map::new(),
        }
    }

    /// Parse the options from a JSON object literal.
    pub fn with_options_json(mut self, model: &str, json: &str) -> Result<Self> {
        match serde_json::from_str::<serde_json::Value>(json) {
            Ok(serde_json::Value::Object(options)) => {
                self.options = options;
                Ok(self)
            }
            Ok(_) => Err(Error::config(
                ConfigErrorKind::MissingFactory,
                model,
                None,
                format!("factory options for '{}' must be a JSON object", self.factory),
            )),
            Err(e) => Err(Error::config(
                ConfigErrorKind::MissingFactory,
                model,
                None,
                format!("invalid factory options for '{}': {}", self.factory, e),
            )),
        }
    }
}

/// A relation attached to a field.
#[derive(Debug, Clone)]
pub struct RelationDeclaration {
    pub kind: RelationKind,
    /// Explicit target type; must agree with the field's type when given.
    pub target: Option<ModelType>,
    pub foreign_key: Option<&'static str>,
    pub local_key: Option<&'static str>,
    /// Link table for many-to-many relations.
    pub through: Option<&'static str>,
    pub loading: LoadingMode,
    /// Method on the owner that produces the related value.
    pub factory_method: Option<&'static str>,
    /// Reject NULL foreign keys at hydration time.
    pub required: bool,
}

impl RelationDeclaration {
    pub const fn new(kind: RelationKind) -> Self {
        Self {
            kind,
            target: None,
            foreign_key: None,
            local_key: None,
            through: None,
            loading: LoadingMode::Lazy,
            factory_method: None,
            required: false,
        }
    }

    pub const fn one_to_one() -> Self {
        Self::new(RelationKind::OneToOne)
    }

    pub const fn many_to_one() -> Self {
        Self::new(RelationKind::ManyToOne)
    }

    pub const fn one_to_many() -> Self {
        Self::new(RelationKind::OneToMany)
    }

    pub const fn many_to_many() -> Self {
        Self::new(RelationKind::ManyToMany)
    }

    pub const fn target(mut self, target: ModelType) -> Self {
        self.target = Some(target);
        self
    }

    pub const fn foreign_key(mut self, column: &'static str) -> Self {
        self.foreign_key = Some(column);
        self
    }

    pub const fn local_key(mut self, column: &'static str) -> Self {
        self.local_key = Some(column);
        self
    }

    pub const fn through(mut self, table: &'static str) -> Self {
        self.through = Some(table);
        self
    }

    pub const fn loading(mut self, loading: LoadingMode) -> Self {
        self.loading = loading;
        self
    }

    pub const fn eager(self) -> Self {
        self.loading(LoadingMode::Eager)
    }

    pub const fn factory_method(mut self, method: &'static str) -> Self {
        self.factory_method = Some(method);
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldDeclaration {
    pub name: &'static str,
    pub type_info: TypeInfo,
    /// Relations attached to the field. More than one is a configuration
    /// error, reported at resolution time.
    pub relations: Vec<RelationDeclaration>,
    /// Not read from or written to the database.
    pub no_db: bool,
    /// Computed; never persisted.
    pub is_virtual: bool,
    /// Default-construct when still unset after hydration.
    pub instantiate: bool,
    pub validations: Vec<Validation>,
    pub skip_serializing: bool,
    /// Key used for this field in serialized output.
    pub alias: Option<&'static str>,
}

impl FieldDeclaration {
    /// Declare a field of slot type `T`.
    pub fn new<T: FieldSlot>(name: &'static str) -> Self {
        Self::with_type(name, T::type_info())
    }

    pub fn with_type(name: &'static str, type_info: TypeInfo) -> Self {
        Self {
            name,
            type_info,
            relations: Vec::new(),
            no_db: false,
            is_virtual: false,
            instantiate: false,
            validations: Vec::new(),
            skip_serializing: false,
            alias: None,
        }
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationDeclaration) -> Self {
        self.relations.push(relation);
        self
    }

    #[must_use]
    pub fn no_db(mut self) -> Self {
        self.no_db = true;
        self
    }

    #[must_use]
    pub fn virtual_field(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    #[must_use]
    pub fn instantiate(mut self) -> Self {
        self.instantiate = true;
        self
    }

    #[must_use]
    pub fn validate(mut self, validation: Validation) -> Self {
        self.validations.push(validation);
        self
    }

    #[must_use]
    pub fn skip_serializing(mut self) -> Self {
        self.skip_serializing = true;
        self
    }

    #[must_use]
    pub fn alias(mut self, alias: &'static str) -> Self {
        self.alias = Some(alias);
        self
    }
}

/// Factory named at the model level, with options as a JSON literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryDeclaration {
    pub name: &'static str,
    pub options: Option<&'static str>,
}

/// Everything a model type declares about itself.
#[derive(Debug, Clone)]
pub struct ModelDeclaration {
    pub model: ModelType,
    pub primary_key: Option<&'static str>,
    pub fields: Vec<FieldDeclaration>,
    pub hooks: Vec<(HookKind, &'static str)>,
    /// Relation factory methods the model provides.
    pub methods: Vec<&'static str>,
    /// Methods that post-process serialized output.
    pub serializers: Vec<&'static str>,
    pub factory: Option<FactoryDeclaration>,
    pub cache_tags: Vec<&'static str>,
}

impl ModelDeclaration {
    pub fn new(model: ModelType) -> Self {
        Self {
            model,
            primary_key: None,
            fields: Vec::new(),
            hooks: Vec::new(),
            methods: Vec::new(),
            serializers: Vec::new(),
            factory: None,
            cache_tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn primary_key(mut self, column: &'static str) -> Self {
        self.primary_key = Some(column);
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldDeclaration) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn hook(mut self, kind: HookKind, method: &'static str) -> Self {
        self.hooks.push((kind, method));
        self
    }

    #[must_use]
    pub fn method(mut self, method: &'static str) -> Self {
        self.methods.push(method);
        self
    }

    #[must_use]
    pub fn serializer(mut self, method: &'static str) -> Self {
        self.serializers.push(method);
        self
    }

    #[must_use]
    pub fn factory(mut self, name: &'static str, options: Option<&'static str>) -> Self {
        self.factory = Some(FactoryDeclaration { name, options });
        self
    }

    #[must_use]
    pub fn cache_tag(mut self, tag: &'static str) -> Self {
        self.cache_tags.push(tag);
        self
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldDeclaration> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve the model-level factory binding, parsing its options.
    pub fn factory_binding(&self) -> Result<Option<FactoryBinding>> {
        self.factory
            .map(|decl| {
                let binding = FactoryBinding::new(decl.name);
                match decl.options {
                    Some(json) => binding.with_options_json(self.model.name(), json),
                    None => Ok(binding),
                }
            })
            .transpose()
    }
}
