//! Procedural macros for tablebind.
//!
//! `tablebind-macros` is the compile-time codegen layer. It turns plain structs
//! into models the session can hydrate, track and persist.
//!
//! - `#[derive(Model)]` emits the model declaration (fields, relations, hooks)
//!   and the object-safe field accessors the session works through.
//! - `#[derive(BackedEnum)]` maps unit enums to a stored string or integer.
//!
//! These macros are used by application crates via the `tablebind` facade.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};

mod parse;

use parse::{Backing, EnumDef, FieldDef, ModelDef, RelationAttr, parse_enum, parse_model};

/// Derive macro for the `Model` trait.
///
/// # Struct attributes
///
/// - `#[orm(table = "name")]` - table name (defaults to the snake_case struct name)
/// - `#[orm(primary_key = "column")]` - primary key column (otherwise inferred)
/// - `#[orm(factory = "name", factory_options = "{json}")]` - construct related
///   instances of this type through a registered factory
/// - `#[orm(cache_tag = "tag")]` - extra query-cache tag
/// - `#[orm(before_insert = "method")]`, `after_insert`, `before_update`,
///   `after_update`, `before_delete`, `after_delete` - lifecycle hooks (`&mut self`)
/// - `#[orm(after_external_update = "function")]` - associated function taking
///   the id of an instance whose foreign key or link rows were rewritten by an
///   owner's one-to-many or many-to-many reconciliation
/// - `#[orm(extends_serialization = "method")]` - post-process serialized output
///
/// # Field attributes
///
/// - `#[orm(state)]` - the `ModelState` field (detected by type when omitted)
/// - `#[orm(one_to_one)]`, `many_to_one`, `one_to_many`, `many_to_many`, optionally
///   with `(foreign_key = "..", local_key = "..", through = "..", eager,
///   factory_method = "..", required, target = "Path")`
/// - `#[orm(no_db)]`, `#[orm(virtual_field)]`, `#[orm(instantiate)]`
/// - `#[orm(numeric)]`, `#[orm(pattern = "regex")]` - validations run on save
/// - `#[orm(alias = "name")]`, `#[orm(skip_serializing)]`
/// - `#[orm(skip)]` - not part of the model at all
///
/// # Example
///
/// ```ignore
/// use tablebind::prelude::*;
///
/// #[derive(Model, Default)]
/// #[orm(table = "modelsB", before_insert = "stamp")]
/// struct ModelB {
///     state: ModelState,
///     model_b_id: Option<i64>,
///     description: String,
///     #[orm(many_to_one(foreign_key = "model_a_id", eager))]
///     parent: Related<ModelA>,
/// }
/// ```
#[proc_macro_derive(Model, attributes(orm))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    let model = match parse_model(&input) {
        Ok(m) => m,
        Err(e) => return e.to_compile_error().into(),
    };

    generate_model_impl(&model).into()
}

/// Derive macro for `BackedEnum`, `ColumnType` and `FieldSlot` on unit enums.
///
/// Variants are stored as `#[orm(value = "...")]` / `#[orm(value = 1)]`, or
/// by variant name when no value is given.
#[proc_macro_derive(BackedEnum, attributes(orm))]
pub fn derive_backed_enum(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as syn::DeriveInput);

    match parse_enum(&input) {
        Ok(def) => generate_enum_impl(&def).into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn relation_tokens(rel: &RelationAttr) -> TokenStream2 {
    let constructor = format_ident!("{}", rel.kind.constructor());
    let mut tokens = quote! { ::tablebind_core::RelationDeclaration::#constructor() };
    if let Some(target) = &rel.target {
        tokens = quote! { #tokens.target(::tablebind_core::ModelType::of::<#target>()) };
    }
    if let Some(fk) = &rel.foreign_key {
        tokens = quote! { #tokens.foreign_key(#fk) };
    }
    if let Some(lk) = &rel.local_key {
        tokens = quote! { #tokens.local_key(#lk) };
    }
    if let Some(through) = &rel.through {
        tokens = quote! { #tokens.through(#through) };
    }
    if rel.eager {
        tokens = quote! { #tokens.eager() };
    }
    if let Some(method) = &rel.factory_method {
        tokens = quote! { #tokens.factory_method(#method) };
    }
    if rel.required {
        tokens = quote! { #tokens.required() };
    }
    tokens
}

fn field_declaration(field: &FieldDef) -> TokenStream2 {
    let name = field.name.to_string();
    let ty = &field.ty;
    let mut tokens = quote! { ::tablebind_core::FieldDeclaration::new::<#ty>(#name) };
    for rel in &field.relations {
        let rel = relation_tokens(rel);
        tokens = quote! { #tokens.relation(#rel) };
    }
    if field.no_db {
        tokens = quote! { #tokens.no_db() };
    }
    if field.virtual_field {
        tokens = quote! { #tokens.virtual_field() };
    }
    if field.instantiate {
        tokens = quote! { #tokens.instantiate() };
    }
    if field.numeric {
        tokens = quote! { #tokens.validate(::tablebind_core::Validation::Numeric) };
    }
    if let Some(pattern) = &field.pattern {
        tokens = quote! {
            #tokens.validate(::tablebind_core::Validation::Pattern(
                ::std::string::String::from(#pattern),
            ))
        };
    }
    if field.skip_serializing {
        tokens = quote! { #tokens.skip_serializing() };
    }
    if let Some(alias) = &field.alias {
        tokens = quote! { #tokens.alias(#alias) };
    }
    tokens
}

fn missing(what: &str, name: &syn::Ident, arg: &syn::Ident) -> TokenStream2 {
    let message = format!("{{}} has no {what} '{{}}'");
    let model = name.to_string();
    quote! {
        ::core::result::Result::Err(::tablebind_core::Error::Custom(
            ::std::format!(#message, #model, #arg)
        ))
    }
}

/// Generate the `Model` and `AnyModel` implementations.
fn generate_model_impl(model: &ModelDef) -> TokenStream2 {
    let name = &model.name;
    let table = &model.table;
    let state = &model.state_field;
    let (impl_generics, ty_generics, where_clause) = model.generics.split_for_impl();

    let mut declaration = quote! {
        ::tablebind_core::ModelDeclaration::new(::tablebind_core::ModelType::of::<Self>())
    };
    if let Some(pk) = &model.primary_key {
        declaration = quote! { #declaration.primary_key(#pk) };
    }
    for field in &model.fields {
        let field = field_declaration(field);
        declaration = quote! { #declaration.field(#field) };
    }
    for (kind, method) in &model.hooks {
        let kind = format_ident!("{}", kind);
        declaration = quote! { #declaration.hook(::tablebind_core::HookKind::#kind, #method) };
    }
    for method in model.factory_methods() {
        declaration = quote! { #declaration.method(#method) };
    }
    for method in &model.serializers {
        declaration = quote! { #declaration.serializer(#method) };
    }
    if let Some(factory) = &model.factory {
        let options = match &model.factory_options {
            Some(json) => quote! { ::core::option::Option::Some(#json) },
            None => quote! { ::core::option::Option::None },
        };
        declaration = quote! { #declaration.factory(#factory, #options) };
    }
    for tag in &model.cache_tags {
        declaration = quote! { #declaration.cache_tag(#tag) };
    }

    let static_hooks = model.static_hooks();
    let static_hook_fn = if static_hooks.is_empty() {
        quote! {}
    } else {
        let arg = format_ident!("name");
        let arms = static_hooks.iter().map(|method| {
            let ident = format_ident!("{}", method);
            quote! { #method => ::tablebind_core::HookResult::into_hook_result(Self::#ident(id)), }
        });
        let fallback = missing("static hook", name, &arg);
        quote! {
            fn call_static_hook(name: &str, id: i64) -> ::tablebind_core::Result<()> {
                match name {
                    #(#arms)*
                    _ => #fallback,
                }
            }
        }
    };

    let field_names: Vec<String> = model.fields.iter().map(|f| f.name.to_string()).collect();
    let field_idents: Vec<&syn::Ident> = model.fields.iter().map(|f| &f.name).collect();

    let instance_hooks = model.instance_hooks();
    let hook_fn = if instance_hooks.is_empty() {
        quote! {}
    } else {
        let arg = format_ident!("method");
        let arms = instance_hooks.iter().map(|method| {
            let ident = format_ident!("{}", method);
            quote! { #method => ::tablebind_core::HookResult::into_hook_result(self.#ident()), }
        });
        let fallback = missing("hook method", name, &arg);
        quote! {
            fn call_hook(&mut self, method: &str) -> ::tablebind_core::Result<()> {
                match method {
                    #(#arms)*
                    _ => #fallback,
                }
            }
        }
    };

    let factory_methods = model.factory_methods();
    let factory_fn = if factory_methods.is_empty() {
        quote! {}
    } else {
        let arg = format_ident!("method");
        let arms = factory_methods.iter().map(|method| {
            let ident = format_ident!("{}", method);
            quote! {
                #method => {
                    ::tablebind_core::IntoRelationValue::into_relation_value(self.#ident(db))
                }
            }
        });
        let fallback = missing("factory method", name, &arg);
        quote! {
            fn call_factory(
                &self,
                method: &str,
                db: &dyn ::tablebind_core::Resolve,
            ) -> ::tablebind_core::Result<::tablebind_core::RelationValue> {
                match method {
                    #(#arms)*
                    _ => #fallback,
                }
            }
        }
    };

    let serializer_fn = if model.serializers.is_empty() {
        quote! {}
    } else {
        let arg = format_ident!("method");
        let arms = model.serializers.iter().map(|method| {
            let ident = format_ident!("{}", method);
            quote! { #method => ::tablebind_core::HookResult::into_hook_result(self.#ident(data)), }
        });
        let fallback = missing("serialization method", name, &arg);
        quote! {
            fn extend_serialization(
                &self,
                method: &str,
                data: &mut ::tablebind_core::serde_json::Map<
                    ::std::string::String,
                    ::tablebind_core::serde_json::Value,
                >,
            ) -> ::tablebind_core::Result<()> {
                match method {
                    #(#arms)*
                    _ => #fallback,
                }
            }
        }
    };

    quote! {
        impl #impl_generics ::tablebind_core::Model for #name #ty_generics #where_clause {
            const TABLE: &'static str = #table;

            fn declaration() -> ::tablebind_core::ModelDeclaration {
                #declaration
            }

            #static_hook_fn
        }

        impl #impl_generics ::tablebind_core::AnyModel for #name #ty_generics #where_clause {
            fn model_type(&self) -> ::tablebind_core::ModelType {
                ::tablebind_core::ModelType::of::<Self>()
            }

            fn state(&self) -> &::tablebind_core::ModelState {
                &self.#state
            }

            fn state_mut(&mut self) -> &mut ::tablebind_core::ModelState {
                &mut self.#state
            }

            fn field(
                &self,
                name: &str,
            ) -> ::core::option::Option<&dyn ::tablebind_core::FieldSlot> {
                match name {
                    #(#field_names => ::core::option::Option::Some(
                        &self.#field_idents as &dyn ::tablebind_core::FieldSlot
                    ),)*
                    _ => ::core::option::Option::None,
                }
            }

            fn field_mut(
                &mut self,
                name: &str,
            ) -> ::core::option::Option<&mut dyn ::tablebind_core::FieldSlot> {
                match name {
                    #(#field_names => ::core::option::Option::Some(
                        &mut self.#field_idents as &mut dyn ::tablebind_core::FieldSlot
                    ),)*
                    _ => ::core::option::Option::None,
                }
            }

            #hook_fn

            #factory_fn

            #serializer_fn
        }
    }
}

/// Generate `BackedEnum`, `ColumnType` and `FieldSlot` for a unit enum.
fn generate_enum_impl(def: &EnumDef) -> TokenStream2 {
    let name = &def.name;
    let type_name = name.to_string();
    let keys: Vec<String> = def.variants.iter().map(|v| v.backing.key()).collect();
    let variants: Vec<&syn::Ident> = def.variants.iter().map(|v| &v.name).collect();
    let backings = def.variants.iter().map(|v| match &v.backing {
        Backing::Text(s) => {
            quote! { ::tablebind_core::Value::Text(::std::string::String::from(#s)) }
        }
        Backing::Int(i) => quote! { ::tablebind_core::Value::BigInt(#i) },
    });

    quote! {
        impl ::tablebind_core::BackedEnum for #name {
            fn from_backing(value: &::tablebind_core::Value) -> ::core::option::Option<Self> {
                let key = ::tablebind_core::field::backing_key(value)?;
                match key.as_str() {
                    #(#keys => ::core::option::Option::Some(Self::#variants),)*
                    _ => ::core::option::Option::None,
                }
            }

            fn backing(&self) -> ::tablebind_core::Value {
                match self {
                    #(Self::#variants => #backings,)*
                }
            }
        }

        impl ::tablebind_core::ColumnType for #name {
            fn type_info() -> ::tablebind_core::TypeInfo {
                ::tablebind_core::TypeInfo::new(#type_name, ::tablebind_core::TypeKind::Enum)
            }

            fn from_value(value: ::tablebind_core::Value) -> ::tablebind_core::Result<Self> {
                <Self as ::tablebind_core::BackedEnum>::from_backing(&value).ok_or_else(|| {
                    ::tablebind_core::Error::Type(::tablebind_core::error::TypeError {
                        expected: #type_name,
                        actual: ::std::format!("unknown backing value {:?}", value),
                        column: ::core::option::Option::None,
                    })
                })
            }

            fn to_value(&self) -> ::tablebind_core::Value {
                <Self as ::tablebind_core::BackedEnum>::backing(self)
            }
        }

        ::tablebind_core::impl_column_field!(#name);
    }
}
