//! Parsing logic for the derive macros.
//!
//! Extracts struct-level and field-level `#[orm(...)]` attributes into
//! `ModelDef` / `FieldDef`, and enum variants into `EnumDef`.

use syn::meta::ParseNestedMeta;
use syn::{
    Attribute, Data, DeriveInput, Error, Fields, Generics, Ident, Lit, LitStr, Path, Result, Type,
};

/// Lifecycle hook attributes, in the order they are accepted.
pub const HOOK_ATTRS: &[(&str, &str)] = &[
    ("before_insert", "BeforeInsert"),
    ("after_insert", "AfterInsert"),
    ("before_update", "BeforeUpdate"),
    ("after_update", "AfterUpdate"),
    ("before_delete", "BeforeDelete"),
    ("after_delete", "AfterDelete"),
    ("after_external_update", "AfterExternalUpdate"),
];

/// Parsed `#[derive(Model)]` input.
#[derive(Debug)]
pub struct ModelDef {
    pub name: Ident,
    pub generics: Generics,
    pub table: String,
    pub primary_key: Option<String>,
    pub factory: Option<String>,
    pub factory_options: Option<String>,
    pub cache_tags: Vec<String>,
    /// `(HookKind variant, method)`
    pub hooks: Vec<(&'static str, String)>,
    pub serializers: Vec<String>,
    pub state_field: Ident,
    pub fields: Vec<FieldDef>,
}

impl ModelDef {
    /// Instance hook methods, deduplicated, in declaration order.
    pub fn instance_hooks(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for (kind, method) in &self.hooks {
            if *kind != "AfterExternalUpdate" && !out.contains(&method.as_str()) {
                out.push(method);
            }
        }
        out
    }

    pub fn static_hooks(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for (kind, method) in &self.hooks {
            if *kind == "AfterExternalUpdate" && !out.contains(&method.as_str()) {
                out.push(method);
            }
        }
        out
    }

    /// Relation factory methods referenced by fields.
    pub fn factory_methods(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for rel in self.fields.iter().flat_map(|f| &f.relations) {
            if let Some(method) = &rel.factory_method {
                if !out.contains(&method.as_str()) {
                    out.push(method);
                }
            }
        }
        out
    }
}

/// Parsed struct field.
#[derive(Debug)]
pub struct FieldDef {
    pub name: Ident,
    pub ty: Type,
    pub relations: Vec<RelationAttr>,
    pub no_db: bool,
    pub virtual_field: bool,
    pub instantiate: bool,
    pub numeric: bool,
    pub pattern: Option<String>,
    pub skip_serializing: bool,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKindAttr {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKindAttr {
    fn from_ident(name: &str) -> Option<Self> {
        match name {
            "one_to_one" => Some(Self::OneToOne),
            "many_to_one" => Some(Self::ManyToOne),
            "one_to_many" => Some(Self::OneToMany),
            "many_to_many" => Some(Self::ManyToMany),
            _ => None,
        }
    }

    pub fn constructor(self) -> &'static str {
        match self {
            Self::OneToOne => "one_to_one",
            Self::ManyToOne => "many_to_one",
            Self::OneToMany => "one_to_many",
            Self::ManyToMany => "many_to_many",
        }
    }
}

/// Parsed `#[orm(many_to_one(...))]` and friends.
#[derive(Debug, Clone)]
pub struct RelationAttr {
    pub kind: RelationKindAttr,
    pub target: Option<Path>,
    pub foreign_key: Option<String>,
    pub local_key: Option<String>,
    pub through: Option<String>,
    pub eager: bool,
    pub factory_method: Option<String>,
    pub required: bool,
}

/// Parsed `#[derive(BackedEnum)]` input.
#[derive(Debug)]
pub struct EnumDef {
    pub name: Ident,
    pub variants: Vec<VariantDef>,
}

#[derive(Debug)]
pub struct VariantDef {
    pub name: Ident,
    pub backing: Backing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backing {
    Text(String),
    Int(i64),
}

impl Backing {
    /// Key compared against `backing_key` at runtime.
    pub fn key(&self) -> String {
        match self {
            Backing::Text(s) => s.clone(),
            Backing::Int(i) => i.to_string(),
        }
    }
}

fn string_value(meta: &ParseNestedMeta<'_>, what: &str) -> Result<String> {
    let value: Lit = meta.value()?.parse()?;
    match value {
        Lit::Str(s) => Ok(s.value()),
        other => Err(Error::new_spanned(
            other,
            format!("expected string literal for {what}"),
        )),
    }
}

fn set_once(slot: &mut Option<String>, meta: &ParseNestedMeta<'_>, what: &str) -> Result<()> {
    if slot.is_some() {
        return Err(meta.error(format!("duplicate orm attribute: {what}")));
    }
    *slot = Some(string_value(meta, what)?);
    Ok(())
}

fn is_model_state(ty: &Type) -> bool {
    match ty {
        Type::Path(p) => p
            .path
            .segments
            .last()
            .is_some_and(|seg| seg.ident == "ModelState"),
        _ => false,
    }
}

/// Parse a struct deriving `Model`.
pub fn parse_model(input: &DeriveInput) -> Result<ModelDef> {
    let name = input.ident.clone();
    let data = match &input.data {
        Data::Struct(data) => data,
        Data::Enum(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not enums",
            ));
        }
        Data::Union(_) => {
            return Err(Error::new_spanned(
                input,
                "Model can only be derived for structs, not unions",
            ));
        }
    };
    let Fields::Named(named) = &data.fields else {
        return Err(Error::new_spanned(
            &data.fields,
            "Model requires a struct with named fields",
        ));
    };

    let mut def = ModelDef {
        name: name.clone(),
        generics: input.generics.clone(),
        table: to_snake_case(&name.to_string()),
        primary_key: None,
        factory: None,
        factory_options: None,
        cache_tags: Vec::new(),
        hooks: Vec::new(),
        serializers: Vec::new(),
        state_field: name.clone(),
        fields: Vec::new(),
    };
    parse_struct_attrs(&input.attrs, &mut def)?;

    let mut state_field: Option<Ident> = None;
    for field in &named.named {
        let Some(ident) = field.ident.clone() else {
            continue;
        };
        let attrs = parse_field_attrs(&field.attrs)?;
        if attrs.state || (is_model_state(&field.ty) && state_field.is_none() && !attrs.skip) {
            if state_field.is_some() {
                return Err(Error::new_spanned(field, "only one state field is allowed"));
            }
            state_field = Some(ident);
            continue;
        }
        if attrs.skip {
            continue;
        }
        def.fields.push(FieldDef {
            name: ident,
            ty: field.ty.clone(),
            relations: attrs.relations,
            no_db: attrs.no_db,
            virtual_field: attrs.virtual_field,
            instantiate: attrs.instantiate,
            numeric: attrs.numeric,
            pattern: attrs.pattern,
            skip_serializing: attrs.skip_serializing,
            alias: attrs.alias,
        });
    }
    def.state_field = state_field.ok_or_else(|| {
        Error::new_spanned(
            &name,
            "Model requires a `ModelState` field (or one marked #[orm(state)])",
        )
    })?;
    Ok(def)
}

fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let boundary = i > 0
                && (chars[i - 1].is_lowercase()
                    || chars[i - 1].is_ascii_digit()
                    || chars.get(i + 1).is_some_and(|n| n.is_lowercase()));
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse struct-level `#[orm(...)]` attributes.
///
/// Supported keys:
/// - `table = "name"` (defaults to the snake_case struct name)
/// - `primary_key = "column"`
/// - `factory = "name"`, `factory_options = "{json}"`
/// - `cache_tag = "tag"` (repeatable)
/// - lifecycle hooks (`before_insert = "method"`, ...; repeatable)
/// - `extends_serialization = "method"` (repeatable)
fn parse_struct_attrs(attrs: &[Attribute], def: &mut ModelDef) -> Result<()> {
    let mut table: Option<String> = None;
    for attr in attrs {
        if !attr.path().is_ident("orm") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                set_once(&mut table, &meta, "table")
            } else if meta.path.is_ident("primary_key") {
                set_once(&mut def.primary_key, &meta, "primary_key")
            } else if meta.path.is_ident("factory") {
                set_once(&mut def.factory, &meta, "factory")
            } else if meta.path.is_ident("factory_options") {
                let json = string_value(&meta, "factory_options")?;
                if def.factory_options.is_some() {
                    return Err(meta.error("duplicate orm attribute: factory_options"));
                }
                def.factory_options = Some(json);
                Ok(())
            } else if meta.path.is_ident("cache_tag") {
                def.cache_tags.push(string_value(&meta, "cache_tag")?);
                Ok(())
            } else if meta.path.is_ident("extends_serialization") {
                def.serializers
                    .push(string_value(&meta, "extends_serialization")?);
                Ok(())
            } else if let Some(&(attr_name, kind)) = HOOK_ATTRS
                .iter()
                .find(|(attr_name, _)| meta.path.is_ident(attr_name))
            {
                def.hooks.push((kind, string_value(&meta, attr_name)?));
                Ok(())
            } else {
                let path = meta.path.to_token_stream_string();
                Err(meta.error(format!("unknown orm attribute `{path}`")))
            }
        })?;
    }
    if def.factory_options.is_some() && def.factory.is_none() {
        return Err(Error::new_spanned(
            &def.name,
            "factory_options requires factory",
        ));
    }
    if let Some(table) = table {
        def.table = table;
    }
    Ok(())
}

trait PathString {
    fn to_token_stream_string(&self) -> String;
}

impl PathString for Path {
    fn to_token_stream_string(&self) -> String {
        quote::ToTokens::to_token_stream(self)
            .to_string()
            .replace(' ', "")
    }
}

#[derive(Default)]
struct FieldAttrs {
    state: bool,
    skip: bool,
    relations: Vec<RelationAttr>,
    no_db: bool,
    virtual_field: bool,
    instantiate: bool,
    numeric: bool,
    pattern: Option<String>,
    skip_serializing: bool,
    alias: Option<String>,
}

fn parse_field_attrs(attrs: &[Attribute]) -> Result<FieldAttrs> {
    let mut out = FieldAttrs::default();
    for attr in attrs {
        if !attr.path().is_ident("orm") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            let ident = meta
                .path
                .get_ident()
                .map(ToString::to_string)
                .unwrap_or_default();
            if let Some(kind) = RelationKindAttr::from_ident(&ident) {
                out.relations.push(parse_relation(&meta, kind)?);
                return Ok(());
            }
            match ident.as_str() {
                "state" => out.state = true,
                "skip" => out.skip = true,
                "no_db" => out.no_db = true,
                "virtual_field" => out.virtual_field = true,
                "instantiate" => out.instantiate = true,
                "numeric" => out.numeric = true,
                "skip_serializing" => out.skip_serializing = true,
                "pattern" => set_once(&mut out.pattern, &meta, "pattern")?,
                "alias" => set_once(&mut out.alias, &meta, "alias")?,
                _ => {
                    let path = meta.path.to_token_stream_string();
                    return Err(meta.error(format!("unknown orm field attribute `{path}`")));
                }
            }
            Ok(())
        })?;
    }
    Ok(out)
}

fn parse_relation(meta: &ParseNestedMeta<'_>, kind: RelationKindAttr) -> Result<RelationAttr> {
    let mut rel = RelationAttr {
        kind,
        target: None,
        foreign_key: None,
        local_key: None,
        through: None,
        eager: false,
        factory_method: None,
        required: false,
    };
    // bare `#[orm(one_to_many)]`
    if !meta.input.peek(syn::token::Paren) {
        return Ok(rel);
    }
    meta.parse_nested_meta(|nested| {
        let path = &nested.path;
        if path.is_ident("target") {
            let lit: LitStr = nested.value()?.parse()?;
            rel.target = Some(lit.parse()?);
        } else if path.is_ident("foreign_key") {
            set_once(&mut rel.foreign_key, &nested, "foreign_key")?;
        } else if path.is_ident("local_key") {
            set_once(&mut rel.local_key, &nested, "local_key")?;
        } else if path.is_ident("through") {
            set_once(&mut rel.through, &nested, "through")?;
        } else if path.is_ident("factory_method") {
            set_once(&mut rel.factory_method, &nested, "factory_method")?;
        } else if path.is_ident("eager") {
            rel.eager = true;
        } else if path.is_ident("lazy") {
            rel.eager = false;
        } else if path.is_ident("required") {
            rel.required = true;
        } else {
            let name = path.to_token_stream_string();
            return Err(nested.error(format!("unknown relation attribute `{name}`")));
        }
        Ok(())
    })?;
    if rel.through.is_some() && kind != RelationKindAttr::ManyToMany {
        return Err(meta.error("`through` is only valid on many_to_many relations"));
    }
    Ok(rel)
}

/// Parse an enum deriving `BackedEnum`.
pub fn parse_enum(input: &DeriveInput) -> Result<EnumDef> {
    let Data::Enum(data) = &input.data else {
        return Err(Error::new_spanned(
            input,
            "BackedEnum can only be derived for enums",
        ));
    };
    let mut variants: Vec<VariantDef> = Vec::new();
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(Error::new_spanned(
                variant,
                "BackedEnum variants cannot carry data",
            ));
        }
        let mut backing: Option<Backing> = None;
        for attr in &variant.attrs {
            if !attr.path().is_ident("orm") {
                continue;
            }
            attr.parse_nested_meta(|meta| {
                if !meta.path.is_ident("value") {
                    return Err(meta.error("expected `value = ...`"));
                }
                let lit: Lit = meta.value()?.parse()?;
                backing = Some(match lit {
                    Lit::Str(s) => Backing::Text(s.value()),
                    Lit::Int(i) => Backing::Int(i.base10_parse()?),
                    other => {
                        return Err(Error::new_spanned(
                            other,
                            "expected string or integer backing value",
                        ));
                    }
                });
                Ok(())
            })?;
        }
        let backing = backing.unwrap_or_else(|| Backing::Text(variant.ident.to_string()));
        if variants.iter().any(|v| v.backing.key() == backing.key()) {
            return Err(Error::new_spanned(
                variant,
                format!("duplicate backing value `{}`", backing.key()),
            ));
        }
        variants.push(VariantDef {
            name: variant.ident.clone(),
            backing,
        });
    }
    Ok(EnumDef {
        name: input.ident.clone(),
        variants,
    })
}
