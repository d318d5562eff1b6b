//! Resolved model configuration.
//!
//! A [`ModelConfig`] is the fully defaulted, validated form of a
//! [`ModelDeclaration`](crate::declaration::ModelDeclaration). It is plain
//! data (owned strings, serde-serializable) so it can be persisted as a
//! metadata artifact and read back without the declaring type.

use serde::{Deserialize, Serialize};

use crate::declaration::{FactoryBinding, HookKind, LoadingMode, RelationKind};
use crate::error::{Error, Result};
use crate::field::FieldKind;
use crate::validate::Validation;

/// Resolved relation of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationConfig {
    pub kind: RelationKind,
    /// Short name of the target model type
    pub target: String,
    pub target_table: String,
    pub target_primary_key: String,
    /// Factory used to construct targets, taken from the target type
    pub factory: Option<FactoryBinding>,
    pub foreign_key: String,
    pub local_key: String,
    pub loading: LoadingMode,
    pub factory_method: Option<String>,
    /// Link table, for many-to-many relations
    pub through: Option<String>,
}

/// Resolved configuration of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    /// Column the field maps to (snake_case of the name)
    pub column: String,
    pub is_primary_key: bool,
    pub nullable: bool,
    pub is_builtin: bool,
    pub is_extend: bool,
    pub is_enum: bool,
    pub is_date_time: bool,
    pub instantiate: bool,
    pub no_db: bool,
    pub is_virtual: bool,
    pub type_name: String,
    pub kind: FieldKind,
    pub relation: Option<RelationConfig>,
    #[serde(default)]
    pub validations: Vec<Validation>,
    #[serde(default)]
    pub skip_serializing: bool,
    pub alias: Option<String>,
}

impl PropertyConfig {
    /// Stored in the owner's row (scalars, enums, dates, to-one keys and
    /// extend columns).
    pub fn is_persisted(&self) -> bool {
        !self.no_db && !self.is_virtual
    }

    pub fn is_to_many(&self) -> bool {
        self.relation.as_ref().is_some_and(|r| r.kind.is_to_many())
    }

    /// Key used in serialized output.
    pub fn serialized_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Lifecycle hook method names, by kind, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hooks {
    pub before_insert: Vec<String>,
    pub after_insert: Vec<String>,
    pub before_update: Vec<String>,
    pub after_update: Vec<String>,
    pub before_delete: Vec<String>,
    pub after_delete: Vec<String>,
    pub after_external_update: Vec<String>,
    pub extends_serialization: Vec<String>,
}

impl Hooks {
    pub fn get(&self, kind: HookKind) -> &[String] {
        match kind {
            HookKind::BeforeInsert => &self.before_insert,
            HookKind::AfterInsert => &self.after_insert,
            HookKind::BeforeUpdate => &self.before_update,
            HookKind::AfterUpdate => &self.after_update,
            HookKind::BeforeDelete => &self.before_delete,
            HookKind::AfterDelete => &self.after_delete,
            HookKind::AfterExternalUpdate => &self.after_external_update,
        }
    }

    pub fn push(&mut self, kind: HookKind, method: impl Into<String>) {
        let list = match kind {
            HookKind::BeforeInsert => &mut self.before_insert,
            HookKind::AfterInsert => &mut self.after_insert,
            HookKind::BeforeUpdate => &mut self.before_update,
            HookKind::AfterUpdate => &mut self.after_update,
            HookKind::BeforeDelete => &mut self.before_delete,
            HookKind::AfterDelete => &mut self.after_delete,
            HookKind::AfterExternalUpdate => &mut self.after_external_update,
        };
        list.push(method.into());
    }
}

/// Resolved configuration of a model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Short type name
    pub model: String,
    /// Fully qualified type path
    pub type_path: String,
    pub table: String,
    pub primary_key: String,
    pub factory: Option<FactoryBinding>,
    pub properties: Vec<PropertyConfig>,
    pub hooks: Hooks,
    #[serde(default)]
    pub cache_tags: Vec<String>,
}

impl ModelConfig {
    pub fn property(&self, name: &str) -> Option<&PropertyConfig> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Like [`property`](Self::property), failing for unknown names.
    pub fn require_property(&self, name: &str) -> Result<&PropertyConfig> {
        self.property(name)
            .ok_or_else(|| Error::undefined_property(&self.model, name))
    }

    pub fn primary_key_property(&self) -> Option<&PropertyConfig> {
        self.properties.iter().find(|p| p.is_primary_key)
    }

    /// Properties that carry a relation.
    pub fn relations(&self) -> impl Iterator<Item = (&PropertyConfig, &RelationConfig)> {
        self.properties
            .iter()
            .filter_map(|p| p.relation.as_ref().map(|r| (p, r)))
    }

    pub fn hooks(&self, kind: HookKind) -> &[String] {
        self.hooks.get(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ScalarKind;

    fn property(name: &str) -> PropertyConfig {
        PropertyConfig {
            name: name.to_string(),
            column: name.to_string(),
            is_primary_key: false,
            nullable: false,
            is_builtin: true,
            is_extend: false,
            is_enum: false,
            is_date_time: false,
            instantiate: false,
            no_db: false,
            is_virtual: false,
            type_name: "String".to_string(),
            kind: FieldKind::Scalar(ScalarKind::Text),
            relation: None,
            validations: Vec::new(),
            skip_serializing: false,
            alias: None,
        }
    }

    fn config() -> ModelConfig {
        ModelConfig {
            model: "ModelA".into(),
            type_path: "app::ModelA".into(),
            table: "modelsA".into(),
            primary_key: "model_a_id".into(),
            factory: None,
            properties: vec![property("name")],
            hooks: Hooks::default(),
            cache_tags: Vec::new(),
        }
    }

    #[test]
    fn unknown_property_is_an_error() {
        let config = config();
        assert!(config.require_property("name").is_ok());
        assert!(matches!(
            config.require_property("nope"),
            Err(Error::UndefinedProperty { .. })
        ));
    }

    #[test]
    fn hooks_by_kind() {
        let mut hooks = Hooks::default();
        hooks.push(HookKind::BeforeInsert, "stamp");
        hooks.push(HookKind::BeforeInsert, "log");
        assert_eq!(hooks.get(HookKind::BeforeInsert), ["stamp", "log"]);
        assert!(hooks.get(HookKind::AfterDelete).is_empty());
    }

    #[test]
    fn survives_json_round_trip() {
        let config = config();
        let json = serde_json::to_string(&config).unwrap();
        let back: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
