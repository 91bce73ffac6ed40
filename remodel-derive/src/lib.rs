//! Derive macro that compiles a plain struct into a `remodel::Record` implementation:
//! a `'static` field table (name, Redis-visible name, kind, index kind) plus the
//! per-field encode/decode dispatch the registry and codec need.
//!
//! Rust has no runtime reflection, so the "reflective compilation" the original design
//! performs at registration time happens here instead, once per type, at compile time.

use convert_case::{Case, Casing};
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, Data, DeriveInput, Fields, GenericArgument, Ident, Lit, Meta,
    PathArguments, Type,
};

/// `#[derive(Record)]` plus `#[redis(...)]` field attributes.
///
/// Container requires a `String` field named `id` — the record identifier surface
/// (the Rust analogue of an embedded `ID`-providing aggregate in the source design).
///
/// Field attributes:
/// - `#[redis(skip)]` — exclude the field entirely (declared name `"-"`).
/// - `#[redis(rename = "name")]` — override the Redis-visible name.
/// - `#[redis(index)]` — index this field. Legal only on primitive or
///   `Option<primitive>` fields; anything else is a compile error.
#[proc_macro_derive(Record, attributes(redis))]
pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}

struct FieldPlan {
    ident: Ident,
    redis_name: String,
    kind: FieldKindPlan,
    indexed: bool,
}

enum FieldKindPlan {
    Primitive { scalar: ScalarKind },
    PointerPrimitive { scalar: ScalarKind },
    Inconvertible { optional: bool },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScalarKind {
    Int,
    Float,
    Bool,
    Str,
    Bytes,
}

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let struct_name = input.ident.clone();
    let type_name_str = struct_name.to_string();

    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Record can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                &input,
                "Record can only be derived for structs",
            ))
        }
    };

    let mut id_field: Option<Ident> = None;
    let mut plans = Vec::new();

    for field in fields.iter() {
        let ident = field.ident.clone().expect("named field");
        if ident == "id" {
            if !is_string_type(&field.ty) {
                return Err(syn::Error::new_spanned(
                    field,
                    "the `id` field of a Record must be of type String",
                ));
            }
            id_field = Some(ident);
            continue;
        }

        let attrs = parse_redis_attrs(field)?;
        if attrs.skip {
            continue;
        }

        let redis_name = attrs
            .rename
            .clone()
            .unwrap_or_else(|| ident.to_string().to_case(Case::Snake));

        let kind = classify(&field.ty)?;
        if attrs.index {
            if let FieldKindPlan::Inconvertible { .. } = kind {
                return Err(syn::Error::new_spanned(
                    field,
                    "#[redis(index)] is only legal on primitive or Option<primitive> fields",
                ));
            }
        }

        plans.push(FieldPlan {
            ident,
            redis_name,
            kind,
            indexed: attrs.index,
        });
    }

    let id_field = id_field.ok_or_else(|| {
        syn::Error::new_spanned(
            &input,
            "Record requires a `String` field named `id` to supply the record identifier",
        )
    })?;

    let field_specs = plans.iter().map(|p| {
        let name_lit = p.ident.to_string();
        let redis_name_lit = &p.redis_name;
        let (kind_tokens, index_tokens) = match &p.kind {
            FieldKindPlan::Primitive { scalar } => (
                quote! { ::remodel::FieldKind::Primitive },
                index_kind_tokens(*scalar, p.indexed),
            ),
            FieldKindPlan::PointerPrimitive { scalar } => (
                quote! { ::remodel::FieldKind::PointerPrimitive },
                index_kind_tokens(*scalar, p.indexed),
            ),
            FieldKindPlan::Inconvertible { .. } => (
                quote! { ::remodel::FieldKind::Inconvertible },
                quote! { ::remodel::IndexKind::None },
            ),
        };
        quote! {
            ::remodel::FieldSpec {
                name: #name_lit,
                redis_name: #redis_name_lit,
                kind: #kind_tokens,
                index: #index_tokens,
            }
        }
    });

    let encode_arms = plans.iter().map(|p| {
        let ident = &p.ident;
        let name_lit = ident.to_string();
        match &p.kind {
            FieldKindPlan::Primitive { .. } => quote! {
                #name_lit => ::remodel::codec::encode_primitive(&self.#ident),
            },
            FieldKindPlan::PointerPrimitive { .. } => quote! {
                #name_lit => ::remodel::codec::encode_pointer_primitive(&self.#ident),
            },
            FieldKindPlan::Inconvertible { optional: false } => quote! {
                #name_lit => ::remodel::codec::encode_inconvertible(marshaller, &self.#ident),
            },
            FieldKindPlan::Inconvertible { optional: true } => quote! {
                #name_lit => ::remodel::codec::encode_inconvertible_opt(marshaller, &self.#ident),
            },
        }
    });

    let decode_arms = plans.iter().map(|p| {
        let ident = &p.ident;
        let name_lit = ident.to_string();
        match &p.kind {
            FieldKindPlan::Primitive { .. } => quote! {
                #name_lit => ::remodel::codec::decode_primitive(raw, &mut self.#ident),
            },
            FieldKindPlan::PointerPrimitive { .. } => quote! {
                #name_lit => ::remodel::codec::decode_pointer_primitive(raw, &mut self.#ident),
            },
            FieldKindPlan::Inconvertible { optional: false } => quote! {
                #name_lit => ::remodel::codec::decode_inconvertible(marshaller, raw, &mut self.#ident),
            },
            FieldKindPlan::Inconvertible { optional: true } => quote! {
                #name_lit => ::remodel::codec::decode_inconvertible_opt(marshaller, raw, &mut self.#ident),
            },
        }
    });

    let field_count = plans.len();
    let default_fields = plans.iter().map(|p| {
        let ident = &p.ident;
        quote! { #ident: ::std::default::Default::default() }
    });

    let static_name = format_ident!(
        "__REMODEL_FIELDS_{}",
        struct_name.to_string().to_case(Case::UpperSnake)
    );

    Ok(quote! {
        #[allow(non_upper_case_globals)]
        static #static_name: [::remodel::FieldSpec; #field_count] = [
            #( #field_specs ),*
        ];

        impl ::remodel::Record for #struct_name {
            fn type_name() -> &'static str {
                #type_name_str
            }

            fn fields() -> &'static [::remodel::FieldSpec] {
                &#static_name
            }

            fn id(&self) -> &str {
                &self.#id_field
            }

            fn set_id(&mut self, id: ::std::string::String) {
                self.#id_field = id;
            }

            #[allow(unused_variables)]
            fn encode_field<M: ::remodel::codec::Marshaller>(
                &self,
                spec: &::remodel::FieldSpec,
                marshaller: &M,
            ) -> ::remodel::Result<::std::vec::Vec<u8>> {
                match spec.name {
                    #( #encode_arms )*
                    other => ::std::unreachable!("unknown field {}", other),
                }
            }

            #[allow(unused_variables)]
            fn decode_field<M: ::remodel::codec::Marshaller>(
                &mut self,
                spec: &::remodel::FieldSpec,
                marshaller: &M,
                raw: ::std::option::Option<&[u8]>,
            ) -> ::remodel::Result<()> {
                match spec.name {
                    #( #decode_arms )*
                    other => ::std::unreachable!("unknown field {}", other),
                }
            }
        }

        impl ::std::default::Default for #struct_name {
            fn default() -> Self {
                Self {
                    #id_field: ::std::string::String::new(),
                    #( #default_fields ),*
                }
            }
        }
    })
}

struct RedisAttrs {
    skip: bool,
    rename: Option<String>,
    index: bool,
}

fn parse_redis_attrs(field: &syn::Field) -> syn::Result<RedisAttrs> {
    let mut out = RedisAttrs {
        skip: false,
        rename: None,
        index: false,
    };
    for attr in &field.attrs {
        if !attr.path().is_ident("redis") {
            continue;
        }
        let meta = &attr.meta;
        let Meta::List(list) = meta else {
            return Err(syn::Error::new_spanned(attr, "expected #[redis(...)]"));
        };
        let nested = list.parse_args_with(
            syn::punctuated::Punctuated::<Meta, syn::Token![,]>::parse_terminated,
        )?;
        for item in nested {
            match item {
                Meta::Path(p) if p.is_ident("skip") => out.skip = true,
                Meta::Path(p) if p.is_ident("index") => out.index = true,
                Meta::NameValue(nv) if nv.path.is_ident("rename") => {
                    if let syn::Expr::Lit(syn::ExprLit {
                        lit: Lit::Str(s), ..
                    }) = &nv.value
                    {
                        out.rename = Some(s.value());
                    } else {
                        return Err(syn::Error::new_spanned(nv, "rename expects a string literal"));
                    }
                }
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "unknown #[redis(...)] option",
                    ))
                }
            }
        }
    }
    Ok(out)
}

fn is_string_type(ty: &Type) -> bool {
    scalar_kind_of(ty) == Some(ScalarKind::Str)
}

fn scalar_kind_of(ty: &Type) -> Option<ScalarKind> {
    let Type::Path(p) = ty else { return None };
    let seg = p.path.segments.last()?;
    let ident = seg.ident.to_string();
    match ident.as_str() {
        "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
        | "u128" | "usize" => Some(ScalarKind::Int),
        "f32" | "f64" => Some(ScalarKind::Float),
        "bool" => Some(ScalarKind::Bool),
        "String" => Some(ScalarKind::Str),
        "Vec" => {
            // Vec<u8> is treated as a raw byte string, matching the source spec's
            // "byte slices (treated as strings)" primitive rule.
            if let PathArguments::AngleBracketed(args) = &seg.arguments {
                if let Some(GenericArgument::Type(Type::Path(inner))) = args.args.first() {
                    if inner.path.is_ident("u8") {
                        return Some(ScalarKind::Bytes);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(p) = ty else { return None };
    let seg = p.path.segments.last()?;
    if seg.ident != "Option" {
        return None;
    }
    if let PathArguments::AngleBracketed(args) = &seg.arguments {
        if let Some(GenericArgument::Type(inner)) = args.args.first() {
            return Some(inner);
        }
    }
    None
}

fn classify(ty: &Type) -> syn::Result<FieldKindPlan> {
    if let Some(inner) = option_inner(ty) {
        return Ok(match scalar_kind_of(inner) {
            Some(scalar) => FieldKindPlan::PointerPrimitive { scalar },
            None => FieldKindPlan::Inconvertible { optional: true },
        });
    }
    Ok(match scalar_kind_of(ty) {
        Some(scalar) => FieldKindPlan::Primitive { scalar },
        None => FieldKindPlan::Inconvertible { optional: false },
    })
}

fn index_kind_tokens(scalar: ScalarKind, indexed: bool) -> proc_macro2::TokenStream {
    if !indexed {
        return quote! { ::remodel::IndexKind::None };
    }
    match scalar {
        ScalarKind::Int | ScalarKind::Float => quote! { ::remodel::IndexKind::Numeric },
        ScalarKind::Bool => quote! { ::remodel::IndexKind::Boolean },
        ScalarKind::Str | ScalarKind::Bytes => quote! { ::remodel::IndexKind::String },
    }
}
