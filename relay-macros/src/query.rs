use crate::attr_args::{AttrArgs, ensure_field};
use crate::derive_utils::apply_derives;
use proc_macro::TokenStream;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Item, Result, parse_macro_input};

/// #[query] 宏实现
/// - 合并/追加派生：Debug, serde::Serialize
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as AttrArgs);
    let input = parse_macro_input!(item as Item);

    match generate(args, input) {
        Ok(ts) => ts.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn generate(args: AttrArgs, input: Item) -> Result<proc_macro2::TokenStream> {
    let mut st = match input {
        Item::Struct(s) => s,
        other => return Err(syn::Error::new(other.span(), "#[query] only on struct")),
    };
    args.ensure_known(&["name", "output", "correlation_id"])?;

    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Debug),
        syn::parse_quote!(serde::Serialize),
    ];
    apply_derives(&mut st.attrs, required);

    let ident = &st.ident;
    let name = args
        .lit_str("name")?
        .unwrap_or_else(|| syn::LitStr::new(&ident.to_string(), ident.span()));
    let output = args.ty("output")?.unwrap_or_else(|| syn::parse_quote! { () });

    let correlation_fn = match args.ident("correlation_id")? {
        Some(field) => {
            ensure_field(&st, &field)?;
            quote! {
                fn correlation_id(&self) -> ::core::option::Option<&str> {
                    ::relay_application::command::AsOptionalStr::as_optional_str(&self.#field)
                }
            }
        }
        None => quote! {},
    };

    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();

    Ok(quote! {
        #st

        impl #impl_generics ::relay_application::query::Query for #ident #ty_generics #where_clause {
            const NAME: &'static str = #name;
            type Output = #output;

            #correlation_fn
        }
    })
}
