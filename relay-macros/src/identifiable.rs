use crate::attr_args::{AttrArgs, ensure_field};
use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Item, Result, parse_macro_input};

/// #[identifiable] 宏实现
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as AttrArgs);
    let input = parse_macro_input!(item as Item);

    match generate(args, input) {
        Ok(ts) => ts.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn generate(args: AttrArgs, input: Item) -> Result<proc_macro2::TokenStream> {
    let st = match input {
        Item::Struct(s) => s,
        other => {
            return Err(syn::Error::new(
                other.span(),
                "#[identifiable] only on struct",
            ));
        }
    };
    args.ensure_known(&["id", "correlation_id", "event_type"])?;

    let id_body = match args.ident("id")? {
        Some(field) => {
            ensure_field(&st, &field)?;
            quote! { ::relay_domain::message::AsOptionalStr::as_optional_str(&self.#field) }
        }
        None => quote! { ::core::option::Option::None },
    };

    let correlation_fn = match args.ident("correlation_id")? {
        Some(field) => {
            ensure_field(&st, &field)?;
            quote! {
                fn correlation_id(&self) -> ::core::option::Option<&str> {
                    ::relay_domain::message::AsOptionalStr::as_optional_str(&self.#field)
                }
            }
        }
        None => quote! {},
    };

    let event_type_fn = match args.lit_str("event_type")? {
        Some(lit) => quote! {
            fn event_type(&self) -> &str {
                #lit
            }
        },
        None => quote! {},
    };

    let ident = &st.ident;
    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();

    Ok(quote! {
        #st

        impl #impl_generics ::relay_domain::message::Identifiable for #ident #ty_generics #where_clause {
            fn event_id(&self) -> ::core::option::Option<&str> {
                #id_body
            }

            #correlation_fn
            #event_type_fn
        }
    })
}
