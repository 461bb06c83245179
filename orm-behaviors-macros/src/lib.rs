use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::ext::IdentExt;
use syn::{parse_macro_input, spanned::Spanned, Attribute, Data, DeriveInput, Fields, LitStr};

/// Implements `orm_behaviors::Managed` for a struct with named fields.
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, Managed)]
/// #[managed(collection = "categories", id_field = "id")]
/// struct Category {
///     id: i64,
///     title: String,
///     #[managed(skip)]
///     cached: Vec<u8>,
/// }
/// ```
///
/// The collection defaults to `#[sea_orm(table_name = "...")]` when present,
/// then to the struct name in snake case.
#[proc_macro_derive(Managed, attributes(managed))]
pub fn derive_managed(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_managed(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct Options {
    collection: Option<String>,
    id_field: Option<String>,
}

fn impl_managed(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_ident = &input.ident;

    let data_struct = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new(
                input.span(),
                "Managed can only be derived for structs",
            ))
        }
    };

    let mut options = Options::default();
    let mut table_name: Option<String> = None;

    for attr in &input.attrs {
        if attr.path().is_ident("managed") {
            parse_managed_attr(attr, &mut options)?;
        }

        if attr.path().is_ident("sea_orm") {
            if let Some(name) = parse_sea_orm_table_name(attr)? {
                table_name = Some(name);
            }
        }
    }

    let fields = match &data_struct.fields {
        Fields::Named(fields) => fields,
        other => {
            return Err(syn::Error::new(
                other.span(),
                "Managed requires named fields",
            ))
        }
    };

    let mut slots = Vec::new();
    let mut field_names = Vec::new();
    for field in &fields.named {
        if is_skipped(&field.attrs)? {
            continue;
        }
        let Some(ident) = &field.ident else {
            continue;
        };
        let name = ident.unraw().to_string();
        let name_literal = LitStr::new(&name, ident.span());
        slots.push(quote! {
            ::orm_behaviors::FieldSlot::new(
                #name_literal,
                |model: &#struct_ident| {
                    ::orm_behaviors::FieldValue::from(::core::clone::Clone::clone(&model.#ident))
                },
                |model: &mut #struct_ident, value: ::orm_behaviors::FieldValue|
                    -> ::core::result::Result<(), ::orm_behaviors::BehaviorError> {
                    model.#ident = ::orm_behaviors::FromFieldValue::from_field_value(value)?;
                    ::core::result::Result::Ok(())
                },
            )
        });
        field_names.push(name);
    }

    let id_field_name = options.id_field.unwrap_or_else(|| "id".to_string());
    if !field_names.contains(&id_field_name) {
        return Err(syn::Error::new(
            struct_ident.span(),
            format!("identifier field `{id_field_name}` not found; specify `id_field = ...` in #[managed]"),
        ));
    }

    let collection = options
        .collection
        .or(table_name)
        .unwrap_or_else(|| to_snake_case(&struct_ident.unraw().to_string()));

    let collection_literal = LitStr::new(&collection, struct_ident.span());
    let id_field_literal = LitStr::new(&id_field_name, struct_ident.span());

    let generated = quote! {
        impl ::orm_behaviors::Managed for #struct_ident {
            fn collection() -> &'static str {
                #collection_literal
            }

            fn identifier_field() -> &'static str {
                #id_field_literal
            }

            fn fields() -> &'static [::orm_behaviors::FieldSlot<Self>] {
                static FIELDS: ::orm_behaviors::__private::Lazy<
                    ::std::vec::Vec<::orm_behaviors::FieldSlot<#struct_ident>>,
                > = ::orm_behaviors::__private::Lazy::new(|| {
                    ::std::vec![#(#slots),*]
                });
                FIELDS.as_slice()
            }
        }
    };

    Ok(generated)
}

fn parse_managed_attr(attr: &Attribute, options: &mut Options) -> syn::Result<()> {
    attr.parse_nested_meta(|meta| {
        let ident = meta
            .path
            .get_ident()
            .ok_or_else(|| syn::Error::new(meta.path.span(), "Invalid option key"))?
            .to_string();

        match ident.as_str() {
            "collection" => {
                let value: LitStr = meta.value()?.parse()?;
                options.collection = Some(value.value());
            }
            "id_field" => {
                let value: LitStr = meta.value()?.parse()?;
                options.id_field = Some(value.value());
            }
            other => {
                return Err(syn::Error::new(
                    meta.path.span(),
                    format!("Unsupported managed option `{other}`"),
                ));
            }
        }

        Ok(())
    })
}

fn is_skipped(attrs: &[Attribute]) -> syn::Result<bool> {
    let mut skipped = false;
    for attr in attrs {
        if !attr.path().is_ident("managed") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("skip") {
                skipped = true;
                Ok(())
            } else {
                Err(syn::Error::new(
                    meta.path.span(),
                    "Unsupported field option; only `skip` is allowed",
                ))
            }
        })?;
    }
    Ok(skipped)
}

fn parse_sea_orm_table_name(attr: &Attribute) -> syn::Result<Option<String>> {
    let mut table_name: Option<String> = None;
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("table_name") {
            let value: LitStr = meta.value()?.parse()?;
            table_name = Some(value.value());
        } else if meta.input.peek(syn::Token![=]) {
            let _: syn::Expr = meta.value()?.parse()?;
        }
        Ok(())
    })?;
    Ok(table_name)
}

fn to_snake_case(value: &str) -> String {
    let mut snake = String::with_capacity(value.len() + 4);
    for (index, ch) in value.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                snake.push('_');
            }
            snake.push(ch.to_ascii_lowercase());
        } else {
            snake.push(ch);
        }
    }
    snake
}
