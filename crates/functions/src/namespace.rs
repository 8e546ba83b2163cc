//! Synthesis of the `customFunctions` object from the enabled functions.
//!
//! The namespace is plain program text placed in front of the caller's
//! program, so functions and program share one compilation unit and no
//! values cross a host boundary to reach them.

use sha2::{Digest, Sha256};

use flint_script::{FunctionSignature, NAMESPACE_BINDING, namespace_type_text, quote_string};

use crate::{CustomFunction, FunctionSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    /// `const customFunctions: { … } = { … } as any;` followed by a newline.
    /// The annotation carries every function's signature, so programs are
    /// checked against the registered parameter and return types.
    pub text: String,
    /// The object type of the binding, as written in `text`.
    pub type_text: String,
    /// Cache key of the function set this text was built from.
    pub key: String,
    /// Enabled functions in name order.
    pub functions: Vec<FunctionSummary>,
    /// Lines occupied by `text`; a program appended after it starts on
    /// line `line_count + 1`.
    pub line_count: usize,
}

impl Namespace {
    /// Build the namespace text over the enabled functions in `functions`.
    pub fn synthesize<'a>(functions: impl IntoIterator<Item = &'a CustomFunction>) -> Self {
        let enabled = enabled_sorted(functions);
        let key = cache_key(enabled.iter().copied());

        let signatures: Vec<FunctionSignature> = enabled.iter().map(|f| f.signature()).collect();
        let type_text = namespace_type_text(
            enabled
                .iter()
                .zip(&signatures)
                .map(|(f, sig)| (f.name.as_str(), Some(sig))),
        );
        let mut text = format!("const {NAMESPACE_BINDING}: {type_text} = {{\n");
        for function in &enabled {
            text.push_str("  ");
            text.push_str(&function.name);
            text.push_str(": ");
            text.push_str(&indent(&function.compiled_text));
            text.push_str(",\n");
        }

        text.push_str("  list: function () {\n");
        if enabled.is_empty() {
            text.push_str("    return [];\n");
        } else {
            text.push_str("    return [\n");
            for function in &enabled {
                text.push_str(&format!(
                    "      {{ name: {}, description: {}, signature: {} }},\n",
                    quote_string(&function.name),
                    quote_string(&function.description),
                    quote_string(&function.rendered_signature()),
                ));
            }
            text.push_str("    ];\n");
        }
        text.push_str("  },\n");
        text.push_str("  remove: function (name) {\n");
        text.push_str("    return __functions.remove(name);\n");
        text.push_str("  },\n");
        text.push_str("} as any;\n");

        let line_count = text.lines().count();
        Self {
            text,
            type_text,
            key,
            functions: enabled.iter().map(|f| f.summary()).collect(),
            line_count,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name)
    }

    /// The namespace followed by `program`.
    pub fn prepend_to(&self, program: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + program.len());
        out.push_str(&self.text);
        out.push_str(program);
        out
    }
}

fn enabled_sorted<'a>(functions: impl IntoIterator<Item = &'a CustomFunction>) -> Vec<&'a CustomFunction> {
    let mut enabled: Vec<&CustomFunction> = functions.into_iter().filter(|f| f.enabled).collect();
    enabled.sort_by(|a, b| a.name.cmp(&b.name));
    enabled
}

/// SHA-256 over everything the namespace text is built from, for the
/// enabled functions only.  Order of the input does not matter.
pub fn cache_key<'a>(functions: impl IntoIterator<Item = &'a CustomFunction>) -> String {
    let mut h = Sha256::new();
    for function in enabled_sorted(functions) {
        for part in [
            function.name.as_str(),
            function.compiled_text.as_str(),
            function.description.as_str(),
            function.return_type.as_str(),
        ] {
            h.update(part.as_bytes());
            h.update([0u8]);
        }
        for param in &function.parameter_schema {
            h.update(param.name.as_bytes());
            h.update([u8::from(param.optional)]);
            h.update(param.ty.as_bytes());
            h.update([0u8]);
        }
        h.update([0xffu8]);
    }
    format!("{:x}", h.finalize())
}

/// Indent every line after the first by one level.  Compiled text never
/// holds raw newlines inside literals, so this cannot change a value.
fn indent(text: &str) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 0 || line.is_empty() {
                line.to_string()
            } else {
                format!("  {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
