//! Language detection, tree-sitter grammar registry, and grammar mapping table.
//!
//! Everything language-specific the decomposer needs lives in [`GrammarMapping`]
//! rows. Supporting another language means adding a `Lang` variant, its grammar
//! crate, and one mapping constant.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Php,
    Go,
}

/// Syntax-node kinds that carry meaning for decomposition in one grammar.
///
/// `None` means the grammar has no such construct; the decomposer then leaves
/// the corresponding unit field empty instead of guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrammarMapping {
    pub function: &'static str,
    pub class: Option<&'static str>,
    pub method: Option<&'static str>,
    /// Wrapper node holding a class's members.
    pub class_body: Option<&'static str>,
    /// Node listing base classes (`argument_list`, `class_heritage`, ...).
    pub parent_clause: Option<&'static str>,
    pub parent_name: Option<&'static str>,
    /// Qualified base names (`mod.Base`) taken whole from the clause.
    pub parent_paths: &'static [&'static str],
    /// Clause children whose own children name the bases (`extends_clause`).
    /// Any other clause child, such as a keyword argument, is skipped.
    pub parent_groups: &'static [&'static str],
    pub parameters: Option<&'static str>,
    /// Return-type annotation node.
    pub output: Option<&'static str>,
    /// Field holding the return type when the grammar has no wrapper node.
    pub output_field: Option<&'static str>,
    /// Function name node.
    pub name: &'static str,
    pub class_name: &'static str,
    pub method_name: Option<&'static str>,
    /// Nodes looked through when searching declarations (decorators, exports).
    pub wrappers: &'static [&'static str],
}

pub const PYTHON: GrammarMapping = GrammarMapping {
    function: "function_definition",
    class: Some("class_definition"),
    method: Some("function_definition"),
    class_body: Some("block"),
    parent_clause: Some("argument_list"),
    parent_name: Some("identifier"),
    parent_paths: &["attribute"],
    parent_groups: &[],
    parameters: Some("parameters"),
    output: Some("type"),
    output_field: None,
    name: "identifier",
    class_name: "identifier",
    method_name: Some("identifier"),
    wrappers: &["decorated_definition"],
};

pub const JAVASCRIPT: GrammarMapping = GrammarMapping {
    function: "function_declaration",
    class: Some("class_declaration"),
    method: Some("method_definition"),
    class_body: Some("class_body"),
    parent_clause: Some("class_heritage"),
    parent_name: Some("identifier"),
    parent_paths: &["member_expression"],
    parent_groups: &[],
    parameters: Some("formal_parameters"),
    output: None,
    output_field: None,
    name: "identifier",
    class_name: "identifier",
    method_name: Some("property_identifier"),
    wrappers: &["export_statement"],
};

pub const TYPESCRIPT: GrammarMapping = GrammarMapping {
    function: "function_declaration",
    class: Some("class_declaration"),
    method: Some("method_definition"),
    class_body: Some("class_body"),
    parent_clause: Some("class_heritage"),
    parent_name: Some("identifier"),
    parent_paths: &["member_expression"],
    parent_groups: &["extends_clause"],
    parameters: Some("formal_parameters"),
    output: Some("type_annotation"),
    output_field: None,
    name: "identifier",
    class_name: "type_identifier",
    method_name: Some("property_identifier"),
    wrappers: &["export_statement"],
};

pub const PHP: GrammarMapping = GrammarMapping {
    function: "function_definition",
    class: Some("class_declaration"),
    method: Some("method_declaration"),
    class_body: Some("declaration_list"),
    parent_clause: Some("base_clause"),
    parent_name: Some("name"),
    parent_paths: &["qualified_name"],
    parent_groups: &[],
    parameters: Some("formal_parameters"),
    output: None,
    output_field: Some("return_type"),
    name: "name",
    class_name: "name",
    method_name: Some("name"),
    wrappers: &[],
};

/// Go has no classes; methods are top-level declarations and come out as
/// functions.
pub const GO: GrammarMapping = GrammarMapping {
    function: "function_declaration",
    class: None,
    method: Some("method_declaration"),
    class_body: None,
    parent_clause: None,
    parent_name: None,
    parent_paths: &[],
    parent_groups: &[],
    parameters: Some("parameter_list"),
    output: None,
    output_field: Some("result"),
    name: "identifier",
    class_name: "type_identifier",
    method_name: Some("field_identifier"),
    wrappers: &[],
};

impl Lang {
    /// Identifier used in logs and config.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Php => "php",
            Self::Go => "go",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-php")]
            Self::Php => Some(tree_sitter_php::LANGUAGE_PHP.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    #[must_use]
    pub fn mapping(self) -> &'static GrammarMapping {
        match self {
            Self::Python => &PYTHON,
            Self::JavaScript => &JAVASCRIPT,
            Self::TypeScript | Self::Tsx => &TYPESCRIPT,
            Self::Php => &PHP,
            Self::Go => &GO,
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "mts" | "cts" => Some(Lang::TypeScript),
        "tsx" => Some(Lang::Tsx),
        "php" => Some(Lang::Php),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

/// Check if a file should be indexed (has a supported language with grammar).
#[must_use]
pub fn is_indexable(path: &Path) -> bool {
    detect_language(path).and_then(Lang::grammar).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_py() {
        assert_eq!(detect_language(Path::new("script.py")), Some(Lang::Python));
        assert_eq!(detect_language(Path::new("stubs.pyi")), Some(Lang::Python));
    }

    #[test]
    fn detect_language_js_variants() {
        for ext in &["js", "jsx", "mjs", "cjs"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Some(Lang::JavaScript),
                "failed for .{ext}"
            );
        }
    }

    #[test]
    fn detect_language_ts_variants() {
        for ext in &["ts", "mts", "cts"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Some(Lang::TypeScript),
                "failed for .{ext}"
            );
        }
        assert_eq!(detect_language(Path::new("view.tsx")), Some(Lang::Tsx));
    }

    #[test]
    fn detect_language_unknown_ext_returns_none() {
        assert_eq!(detect_language(Path::new("file.xyz")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
        assert_eq!(detect_language(Path::new("main.rs")), None);
    }

    #[test]
    fn detect_language_php_and_go() {
        assert_eq!(detect_language(Path::new("src/Shape.php")), Some(Lang::Php));
        assert_eq!(detect_language(Path::new("cmd/main.go")), Some(Lang::Go));
    }

    #[test]
    fn go_has_no_classes() {
        let m = Lang::Go.mapping();
        assert!(m.class.is_none());
        assert!(m.parent_clause.is_none());
        assert_eq!(m.output_field, Some("result"));
    }

    #[test]
    fn typescript_and_tsx_share_a_mapping() {
        assert_eq!(Lang::TypeScript.mapping(), Lang::Tsx.mapping());
        assert_eq!(Lang::TypeScript.mapping().class_name, "type_identifier");
    }

    #[test]
    fn javascript_has_no_output_annotation() {
        assert!(Lang::JavaScript.mapping().output.is_none());
        assert_eq!(Lang::Python.mapping().output, Some("type"));
    }

    #[test]
    fn python_methods_are_function_definitions() {
        let m = Lang::Python.mapping();
        assert_eq!(m.method, Some(m.function));
        assert!(m.wrappers.contains(&"decorated_definition"));
    }

    #[test]
    fn grammar_returns_some_for_enabled_features() {
        #[cfg(feature = "lang-python")]
        assert!(Lang::Python.grammar().is_some());
        #[cfg(feature = "lang-js")]
        {
            assert!(Lang::JavaScript.grammar().is_some());
            assert!(Lang::TypeScript.grammar().is_some());
            assert!(Lang::Tsx.grammar().is_some());
        }
        #[cfg(feature = "lang-php")]
        assert!(Lang::Php.grammar().is_some());
        #[cfg(feature = "lang-go")]
        assert!(Lang::Go.grammar().is_some());
    }

    #[test]
    fn is_indexable_unknown_extension() {
        assert!(!is_indexable(Path::new("file.xyz")));
    }

    #[test]
    fn lang_id_roundtrip() {
        for lang in [
            Lang::Python,
            Lang::JavaScript,
            Lang::TypeScript,
            Lang::Tsx,
            Lang::Php,
            Lang::Go,
        ] {
            assert!(!lang.id().is_empty());
            assert_eq!(lang.to_string(), lang.id());
        }
    }
}
