//! Internal implementation of `braid_wire` macros. Any relevant macros are re-exported by the main library.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, ToTokens};
use syn::{parse_macro_input, DataStruct, DeriveInput, Lit, Meta, NestedMeta};

/// Implements the `braid_wire::ProtocolDef` trait on the type,
/// interpreting its fields as the leaves of a protocol tree.
///
/// Struct level:
///  * `#[protocol(id = "...", name = "...")]`
///
/// Every field carries a `#[field(...)]` attribute:
///  * `kind = "uint" | "int" | "bit" | "hex" | "float" | "string" | "time"` (required)
///  * `bits = N` or `bytes = N`: wire width
///  * `id = "..."`: node id, defaults to the field name
///  * `section = "header" | "body" | "tail"`: defaults to body
///  * `endian = "big" | "little"`, `charset = "..."`, `time_unit = "..."`
///  * `value`, `forward`, `backward`, `length_expr`, `range`, `default`: literals and expressions
///  * `order = N.N`, `optional`, `trim_trailing_zeros`
///
/// `protocol()` assembles the same tree a schema document would;
/// `apply_values()` publishes the instance's field values into an encoder,
/// skipping forward-computed fields.
#[proc_macro_derive(ProtocolDef, attributes(protocol, field))]
pub fn protocol_def_derive(input: TokenStream) -> TokenStream {
    match protocol_def_derive_impl(parse_macro_input!(input as DeriveInput)) {
        Ok(ts) => ts.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn protocol_def_derive_impl(input: DeriveInput) -> syn::Result<TokenStream2> {
    // Lets the macro work both from the outside and from within braid_wire
    // itself, where the crate has to be referred to with `crate`.
    let braid_wire = if std::env::var("CARGO_PKG_NAME").unwrap() == "braid_wire" {
        quote!(crate)
    } else {
        quote!(::braid_wire)
    };

    let name = &input.ident;
    let (proto_id, proto_name) = extract_protocol_attr(&input)?;
    let fields = extract_field_metadata(match &input.data {
        syn::Data::Struct(s) => s,
        _ => return Err(syn::Error::new_spanned(&input, "expected struct")),
    })?;

    let node_builders = fields.iter().map(|field| {
        let FieldMeta {
            node_id,
            kind,
            bits,
            section,
            settings,
            ..
        } = field;
        let kind_ident = quote::format_ident!("{kind}");
        let section_vec = quote::format_ident!("{section}");
        quote! {
            let mut node = _bw::Node::leaf(
                #node_id,
                _bw::ValueKind::#kind_ident,
                #bits,
            );
            #(#settings)*
            #section_vec.push(node);
        }
    });

    let value_appliers = fields.iter().filter(|f| !f.computed).map(|field| {
        let FieldMeta {
            node_id, field_name, ..
        } = field;
        quote! {
            encoder.set_value(#node_id, self.#field_name.to_string());
        }
    });

    let proto_name_setter = match proto_name {
        Some(n) => quote!(let proto = proto.named(#n);),
        None => quote!(),
    };

    Ok(quote! {
        impl #braid_wire::ProtocolDef for #name {
            fn protocol() -> #braid_wire::Protocol {
                use #braid_wire as _bw;

                let mut header: Vec<_bw::Node> = Vec::new();
                let mut body: Vec<_bw::Node> = Vec::new();
                let mut tail: Vec<_bw::Node> = Vec::new();

                #({ #node_builders })*

                let proto = _bw::Protocol::new(#proto_id);
                #proto_name_setter
                let proto = if header.is_empty() { proto } else { proto.header(header) };
                let proto = if body.is_empty() { proto } else { proto.body(body) };
                let proto = if tail.is_empty() { proto } else { proto.tail(tail) };
                proto
            }

            fn apply_values(&self, encoder: &mut #braid_wire::Encoder<'_>) {
                #(#value_appliers)*
            }
        }
    })
}

fn extract_protocol_attr(input: &DeriveInput) -> syn::Result<(String, Option<String>)> {
    let mut id = None;
    let mut name = None;

    for attribute in &input.attrs {
        if !attribute.path.is_ident("protocol") {
            continue;
        }
        let Meta::List(list) = attribute.parse_meta()? else {
            return Err(syn::Error::new_spanned(
                attribute,
                "expected #[protocol(id = \"...\")]",
            ));
        };
        for nested in &list.nested {
            let NestedMeta::Meta(Meta::NameValue(nv)) = nested else {
                return Err(syn::Error::new_spanned(nested, "expected key = \"value\""));
            };
            let Lit::Str(value) = &nv.lit else {
                return Err(syn::Error::new_spanned(&nv.lit, "expected a string"));
            };
            if nv.path.is_ident("id") {
                id = Some(value.value());
            } else if nv.path.is_ident("name") {
                name = Some(value.value());
            } else {
                return Err(syn::Error::new_spanned(&nv.path, "unknown protocol key"));
            }
        }
    }

    let id = id.ok_or_else(|| {
        syn::Error::new_spanned(input, "missing #[protocol(id = \"...\")] attribute")
    })?;
    Ok((id, name))
}

struct FieldMeta {
    field_name: syn::Ident,
    node_id: String,
    /// `ValueKind` variant name, e.g. `Uint`.
    kind: String,
    bits: u64,
    /// `header`, `body` or `tail`.
    section: String,
    /// Setter statements applied to the freshly built `node`.
    settings: Vec<TokenStream2>,
    /// Forward-computed fields are skipped by `apply_values`.
    computed: bool,
}

fn kind_variant(name: &str, span: &dyn ToTokens) -> syn::Result<String> {
    Ok(match name {
        "hex" => "Hex",
        "bit" => "Bit",
        "uint" => "Uint",
        "int" => "Int",
        "float" => "Float",
        "string" => "String",
        "time" => "Time",
        other => {
            return Err(syn::Error::new_spanned(
                span,
                format!("unknown field kind `{other}`"),
            ))
        }
    }
    .to_owned())
}

fn extract_field_metadata(st: &DataStruct) -> syn::Result<Vec<FieldMeta>> {
    let mut result = Vec::with_capacity(st.fields.len());

    for field in &st.fields {
        let field_error = |msg: &str| Err(syn::Error::new_spanned(field, msg.to_owned()));

        let Some(field_ident) = &field.ident else {
            return field_error("tuple structs are not supported");
        };

        let mut meta = None;

        for attribute in &field.attrs {
            if !attribute.path.is_ident("field") {
                continue;
            }
            if meta.is_some() {
                return field_error("duplicate field attribute");
            }

            let Meta::List(list) = attribute.parse_meta()? else {
                return field_error("expected #[field(...)]");
            };

            let mut node_id = field_ident.to_string();
            let mut kind = None;
            let mut bits: Option<u64> = None;
            let mut section = "body".to_owned();
            let mut settings = Vec::new();
            let mut computed = false;
            let mut has_value = false;
            let mut has_optional = false;

            for nested in &list.nested {
                match nested {
                    NestedMeta::Meta(Meta::Path(path)) if path.is_ident("optional") => {
                        has_optional = true;
                        settings.push(quote!(node = node.optional();));
                    }
                    NestedMeta::Meta(Meta::Path(path)) if path.is_ident("trim_trailing_zeros") => {
                        settings.push(quote!(node = node.trim_trailing_zeros();));
                    }
                    NestedMeta::Meta(Meta::NameValue(nv)) => {
                        let key = nv
                            .path
                            .get_ident()
                            .map(|i| i.to_string())
                            .unwrap_or_default();
                        match (key.as_str(), &nv.lit) {
                            ("id", Lit::Str(v)) => node_id = v.value(),
                            ("kind", Lit::Str(v)) => kind = Some(kind_variant(&v.value(), nv)?),
                            ("bits", Lit::Int(v)) => bits = Some(v.base10_parse()?),
                            ("bytes", Lit::Int(v)) => bits = Some(v.base10_parse::<u64>()? * 8),
                            ("section", Lit::Str(v)) => {
                                let s = v.value();
                                if !matches!(s.as_str(), "header" | "body" | "tail") {
                                    return Err(syn::Error::new_spanned(
                                        &nv.lit,
                                        "section must be header, body or tail",
                                    ));
                                }
                                section = s;
                            }
                            ("endian", Lit::Str(v)) => {
                                let endian = match v.value().as_str() {
                                    "big" | "be" => quote!(Big),
                                    "little" | "le" => quote!(Little),
                                    _ => {
                                        return Err(syn::Error::new_spanned(
                                            &nv.lit,
                                            "endian must be big or little",
                                        ))
                                    }
                                };
                                settings.push(quote!(node = node.endian(_bw::Endian::#endian);));
                            }
                            ("charset", Lit::Str(v)) => {
                                let cs = v.value();
                                settings.push(quote! {
                                    node.charset = _bw::Charset::parse(#cs)
                                        .expect("unknown charset");
                                });
                            }
                            ("time_unit", Lit::Str(v)) => {
                                let unit = v.value();
                                settings.push(quote! {
                                    node.time_unit = Some(
                                        _bw::TimeUnit::parse(#unit).expect("unknown time unit"),
                                    );
                                });
                            }
                            ("name", Lit::Str(v)) => {
                                let n = v.value();
                                settings.push(quote!(node = node.named(#n);));
                            }
                            ("value", Lit::Str(v)) => {
                                has_value = true;
                                let value = v.value();
                                settings.push(quote!(node = node.value(#value);));
                            }
                            ("default", Lit::Str(v)) => {
                                let value = v.value();
                                settings.push(quote!(node = node.default_value(#value);));
                            }
                            ("forward", Lit::Str(v)) => {
                                let expr = v.value();
                                settings.push(quote!(node = node.forward(#expr);));
                                computed = true;
                            }
                            ("backward", Lit::Str(v)) => {
                                let expr = v.value();
                                settings.push(quote!(node = node.backward(#expr);));
                            }
                            ("length_expr", Lit::Str(v)) => {
                                let expr = v.value();
                                settings.push(quote!(node = node.length_expr(#expr);));
                            }
                            ("range", Lit::Str(v)) => {
                                let spec = v.value();
                                settings.push(quote!(node = node.range(#spec);));
                            }
                            ("order", Lit::Float(v)) => {
                                let order: f32 = v.base10_parse()?;
                                settings.push(quote!(node = node.order(#order);));
                            }
                            _ => {
                                return Err(syn::Error::new_spanned(
                                    nested,
                                    "unknown or mistyped field key",
                                ))
                            }
                        }
                    }
                    other => {
                        return Err(syn::Error::new_spanned(other, "unexpected attribute form"))
                    }
                }
            }

            let Some(kind) = kind else {
                return field_error("field needs kind = \"...\"");
            };
            // Instance-supplied fields have no tree literal; the encoder
            // receives their values through apply_values.
            if !has_value && !computed && !has_optional {
                settings.push(quote!(node = node.optional();));
            }
            let Some(bits) = bits else {
                return field_error("field needs bits = N or bytes = N");
            };

            meta = Some(FieldMeta {
                field_name: field_ident.clone(),
                node_id,
                kind,
                bits,
                section,
                settings,
                computed,
            });
        }

        match meta {
            Some(meta) => result.push(meta),
            None => return field_error("unattributed field"),
        }
    }

    Ok(result)
}
