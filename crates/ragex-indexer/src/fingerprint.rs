use ragex_core::{Function, Module};
use sha2::{Digest, Sha256};

/// The metadata key an `Analyzer` implementation is expected to populate
/// with the function body's raw source text, since the distilled entity
/// schema (§3) carries no dedicated source-slice field. See DESIGN.md.
pub const SOURCE_SLICE_KEY: &str = "source_slice";

/// Canonical textual fingerprint for a function, per §4.4:
/// `"<kind>:<qualified_name>/<arity>\n<doc>\n<source_slice>"`.
pub fn function_fingerprint(f: &Function) -> String {
    let qualified = format!("{}.{}", f.id.module.qualified_name, f.id.name);
    let doc = f.doc.as_deref().unwrap_or("");
    let source = f
        .metadata
        .get(SOURCE_SLICE_KEY)
        .map(|s| s.as_str())
        .unwrap_or("");
    format!("function:{}/{}\n{}\n{}", qualified, f.id.arity, doc, source)
}

/// Canonical textual fingerprint for a module. Modules have no arity or
/// source-slice concept at this granularity, so the fingerprint covers
/// just the qualified name and doc.
pub fn module_fingerprint(m: &Module) -> String {
    let doc = m.doc.as_deref().unwrap_or("");
    format!("module:{}\n{}", m.id.qualified_name, doc)
}

pub fn hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragex_core::{FunctionId, Language, ModuleId, Visibility};
    use std::collections::HashMap;

    #[test]
    fn fingerprint_changes_when_source_slice_changes() {
        let mut f = Function {
            id: FunctionId::new(ModuleId::new(Language::Elixir, "M"), "foo", 1),
            file: "m.ex".into(),
            line: 1,
            doc: None,
            visibility: Visibility::Public,
            metadata: HashMap::new(),
        };
        f.metadata.insert(SOURCE_SLICE_KEY.into(), "def foo(x), do: x".into());
        let h1 = hash(&function_fingerprint(&f));
        f.metadata.insert(SOURCE_SLICE_KEY.into(), "def foo(x), do: x + 1".into());
        let h2 = hash(&function_fingerprint(&f));
        assert_ne!(h1, h2);
    }
}
