use proc_macro2::TokenStream as TokenStream2;
use quote::ToTokens;
use syn::spanned::Spanned;
use syn::{
    Expr, Fields, Ident, ItemStruct, LitStr, Result, Token, Type, parse::Parse, parse::ParseStream,
};

/// `key = value` 形式的宏参数列表
///
/// 值优先按类型解析（支持 `output = Vec<T>`），否则按表达式解析。
pub(crate) struct AttrArgs {
    entries: Vec<(Ident, TokenStream2)>,
}

impl Parse for AttrArgs {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut entries: Vec<(Ident, TokenStream2)> = Vec::new();

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            let fork = input.fork();
            let is_type = fork.parse::<Type>().is_ok() && (fork.is_empty() || fork.peek(Token![,]));
            let value = if is_type {
                input.parse::<Type>()?.to_token_stream()
            } else {
                input.parse::<Expr>()?.to_token_stream()
            };

            if entries.iter().any(|(k, _)| *k == key) {
                return Err(syn::Error::new(
                    key.span(),
                    format!("duplicate key '{key}' in attribute"),
                ));
            }
            entries.push((key, value));

            if input.is_empty() {
                break;
            }
            input.parse::<Token![,]>()?;
        }
        Ok(Self { entries })
    }
}

impl AttrArgs {
    /// 拒绝未声明的键
    pub(crate) fn ensure_known(&self, allowed: &[&str]) -> Result<()> {
        for (key, _) in &self.entries {
            if !allowed.iter().any(|a| key == a) {
                let expected = allowed
                    .iter()
                    .map(|a| format!("'{a}'"))
                    .collect::<Vec<_>>()
                    .join(" | ");
                return Err(syn::Error::new(
                    key.span(),
                    format!("unknown key; expected {expected}"),
                ));
            }
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Option<&TokenStream2> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub(crate) fn lit_str(&self, key: &str) -> Result<Option<LitStr>> {
        self.get(key)
            .map(|v| syn::parse2(v.clone()))
            .transpose()
    }

    pub(crate) fn ident(&self, key: &str) -> Result<Option<Ident>> {
        self.get(key)
            .map(|v| syn::parse2(v.clone()))
            .transpose()
    }

    pub(crate) fn ty(&self, key: &str) -> Result<Option<Type>> {
        self.get(key)
            .map(|v| syn::parse2(v.clone()))
            .transpose()
    }

    pub(crate) fn path(&self, key: &str) -> Result<Option<syn::Path>> {
        self.get(key)
            .map(|v| syn::parse2(v.clone()))
            .transpose()
    }
}

/// 校验字段参数指向结构体的具名字段
pub(crate) fn ensure_field(st: &ItemStruct, field: &Ident) -> Result<()> {
    let Fields::Named(named) = &st.fields else {
        return Err(syn::Error::new(
            st.span(),
            "only supports named-field struct",
        ));
    };
    if named
        .named
        .iter()
        .any(|f| f.ident.as_ref().is_some_and(|i| i == field))
    {
        Ok(())
    } else {
        Err(syn::Error::new(
            field.span(),
            format!("no field named '{field}' on struct {}", st.ident),
        ))
    }
}
