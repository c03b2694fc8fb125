//! Structural decomposition of one source file into functions, classes,
//! methods, and a leftover global unit, driven by a [`GrammarMapping`].

use tree_sitter::{Node, Parser, Point, Tree};

use crate::error::{IndexError, Result};
use crate::languages::{GrammarMapping, Lang};
use crate::unit::{CodeUnit, UnitKind};

/// Parse and decompose a source file.
///
/// Emission order follows the source: each class is immediately followed by
/// its methods, and the global unit (if any non-blank code is left over) comes
/// last. An empty file yields no units.
///
/// # Errors
///
/// Returns [`IndexError::Parse`] if no grammar is available or the syntax tree
/// contains error-recovery nodes.
pub fn decompose(source: &str, file_path: &str, lang: Lang) -> Result<Vec<CodeUnit>> {
    let parse_err = |reason: String| IndexError::Parse {
        path: file_path.to_owned(),
        reason,
    };

    let tree = parse(source, lang).map_err(parse_err)?;
    let root = tree.root_node();
    if root.has_error() {
        let at = first_error_position(root).unwrap_or(root.start_position());
        return Err(parse_err(format!(
            "syntax error at line {}, column {}",
            at.row + 1,
            at.column + 1
        )));
    }

    Ok(decompose_tree(source, root, lang.mapping()))
}

/// Cheap sanity check for generated code: the last top-level node must not be
/// an error-recovery node.
#[must_use]
pub fn is_syntactically_valid(text: &str, lang: Lang) -> bool {
    let Ok(tree) = parse(text, lang) else {
        return false;
    };
    let root = tree.root_node();
    if root.is_error() {
        return false;
    }
    let mut cursor = root.walk();
    root.children(&mut cursor).last().is_none_or(|n| !n.is_error())
}

fn parse(source: &str, lang: Lang) -> std::result::Result<Tree, String> {
    let grammar = lang
        .grammar()
        .ok_or_else(|| format!("no grammar for {}", lang.id()))?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| format!("set_language failed: {e}"))?;

    parser
        .parse(source, None)
        .ok_or_else(|| "parser returned no tree".to_owned())
}

/// Decompose an already parsed tree.
#[must_use]
pub fn decompose_tree(source: &str, root: Node<'_>, mapping: &GrammarMapping) -> Vec<CodeUnit> {
    let walker = Walker { source, mapping };
    let mut units = Vec::new();
    let mut consumed: Vec<(usize, usize)> = Vec::new();

    for child in named_children(root) {
        let Some(node) = walker.find_declaration(child, &|kind: &str| walker.is_top_level(kind)) else {
            continue;
        };

        if Some(node.kind()) == mapping.class {
            let (class, methods) = walker.class_units(node);
            units.push(class);
            units.extend(methods);
        } else {
            units.push(walker.function_unit(node, UnitKind::Function, None));
        }
        consumed.push(row_span(node));
    }

    if let Some(global) = leftover_code(source, &consumed) {
        units.push(CodeUnit::global(global));
    }
    units
}

struct Walker<'a> {
    source: &'a str,
    mapping: &'a GrammarMapping,
}

impl Walker<'_> {
    fn text(&self, node: Node<'_>) -> String {
        self.source[node.byte_range()].to_owned()
    }

    fn is_top_level(&self, kind: &str) -> bool {
        kind == self.mapping.function
            || Some(kind) == self.mapping.class
            || Some(kind) == self.mapping.method
    }

    /// Return `node` if it is accepted, or the first accepted declaration
    /// reachable through wrapper nodes (decorators, export statements).
    fn find_declaration<'t>(
        &self,
        node: Node<'t>,
        accept: &dyn Fn(&str) -> bool,
    ) -> Option<Node<'t>> {
        if accept(node.kind()) {
            return Some(node);
        }
        if !self.mapping.wrappers.contains(&node.kind()) {
            return None;
        }
        named_children(node)
            .into_iter()
            .find_map(|c| self.find_declaration(c, accept))
    }

    fn class_units(&self, node: Node<'_>) -> (CodeUnit, Vec<CodeUnit>) {
        let name = named_children(node)
            .into_iter()
            .find(|c| c.kind() == self.mapping.class_name)
            .map(|c| self.text(c));
        let parents = self.parent_names(node);

        let mut methods = Vec::new();
        if let (Some(body_kind), Some(method_kind)) = (self.mapping.class_body, self.mapping.method)
            && let Some(body) = named_children(node)
                .into_iter()
                .find(|c| c.kind() == body_kind)
        {
            for member in named_children(body) {
                if let Some(m) = self.find_declaration(member, &|kind: &str| kind == method_kind) {
                    methods.push(self.function_unit(m, UnitKind::Method, name.clone()));
                }
            }
        }

        let summary = class_summary(name.as_deref(), parents.as_deref(), &methods);
        let class = CodeUnit {
            kind: UnitKind::Class,
            name,
            enclosing_class: None,
            source_text: self.text(node),
            summary_text: Some(summary),
            input_signature: parents,
            output_signature: None,
            embedding: None,
        };
        (class, methods)
    }

    /// Names listed in the class's parent clause, one per clause entry.
    /// Grouping nodes (`class_heritage > extends_clause`) are looked into one
    /// level; entries that are neither names nor qualified paths, such as
    /// `metaclass=ABCMeta`, are skipped.
    fn parent_names(&self, class: Node<'_>) -> Option<Vec<String>> {
        let clause_kind = self.mapping.parent_clause?;
        let clause = named_children(class)
            .into_iter()
            .find(|c| c.kind() == clause_kind)?;

        let mut names = Vec::new();
        for entry in named_children(clause) {
            if self.mapping.parent_groups.contains(&entry.kind()) {
                names.extend(
                    named_children(entry)
                        .into_iter()
                        .filter_map(|c| self.parent_name(c)),
                );
            } else {
                names.extend(self.parent_name(entry));
            }
        }

        (!names.is_empty()).then_some(names)
    }

    fn parent_name(&self, node: Node<'_>) -> Option<String> {
        let kind = node.kind();
        (Some(kind) == self.mapping.parent_name || self.mapping.parent_paths.contains(&kind))
            .then(|| self.text(node))
    }

    fn function_unit(
        &self,
        node: Node<'_>,
        kind: UnitKind,
        enclosing_class: Option<String>,
    ) -> CodeUnit {
        let children = named_children(node);

        let name = children
            .iter()
            .find(|c| c.kind() == self.mapping.name || Some(c.kind()) == self.mapping.method_name)
            .map(|c| self.text(*c));

        // Prefer the `parameters` field: a Go receiver is a parameter list too.
        let input_signature = self.mapping.parameters.and_then(|kind| {
            node.child_by_field_name("parameters")
                .filter(|p| p.kind() == kind)
                .or_else(|| children.iter().copied().find(|c| c.kind() == kind))
                .map(|params| named_children(params).into_iter().map(|p| self.text(p)).collect())
        });

        let output_node = self
            .mapping
            .output
            .and_then(|kind| children.iter().copied().find(|c| c.kind() == kind))
            .or_else(|| {
                self.mapping
                    .output_field
                    .and_then(|field| node.child_by_field_name(field))
            });
        let output_signature = output_node.map(|out| {
            let parts: Vec<String> = named_children(out)
                .into_iter()
                .map(|p| self.text(p))
                .collect();
            if parts.is_empty() {
                vec![self.text(out)]
            } else {
                parts
            }
        });

        CodeUnit {
            kind,
            name,
            enclosing_class,
            source_text: self.text(node),
            summary_text: None,
            input_signature,
            output_signature,
            embedding: None,
        }
    }
}

/// Named, non-extra children (comments are extras and never carry structure).
fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| !c.is_extra())
        .collect()
}

/// Inclusive row span, ignoring a trailing newline that ends at column 0.
fn row_span(node: Node<'_>) -> (usize, usize) {
    let start = node.start_position().row;
    let end = node.end_position();
    let end_row = if end.column == 0 && end.row > start {
        end.row - 1
    } else {
        end.row
    };
    (start, end_row)
}

fn first_error_position(root: Node<'_>) -> Option<Point> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node.start_position());
        }
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

/// Source lines not covered by any consumed span.
///
/// Each stretch of consumed lines, together with the blank lines around it,
/// collapses into a single blank line (none at the start or end of the file).
/// With nothing consumed the result is the source verbatim.
fn leftover_code(source: &str, consumed: &[(usize, usize)]) -> Option<String> {
    let lines: Vec<&str> = source.split('\n').collect();
    let mut taken = vec![false; lines.len()];
    for &(start, end) in consumed {
        for flag in taken
            .iter_mut()
            .take(end.saturating_add(1).min(lines.len()))
            .skip(start)
        {
            *flag = true;
        }
    }

    let is_blank = |i: usize| taken[i] || lines[i].trim().is_empty();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if !is_blank(i) {
            out.push(lines[i]);
            i += 1;
            continue;
        }

        let run_start = i;
        let mut touches_consumed = false;
        while i < lines.len() && is_blank(i) {
            touches_consumed |= taken[i];
            i += 1;
        }

        if !touches_consumed {
            out.extend(&lines[run_start..i]);
        } else if run_start > 0 && i < lines.len() {
            out.push("");
        }
    }

    if out.iter().all(|l| l.trim().is_empty()) {
        return None;
    }
    Some(out.join("\n"))
}

fn render_signature(sig: Option<&[String]>) -> String {
    match sig {
        None => "None".to_owned(),
        Some(items) => format!("({})", items.join(", ")),
    }
}

fn class_summary(name: Option<&str>, parents: Option<&[String]>, methods: &[CodeUnit]) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let _ = writeln!(out, "class: {}", name.unwrap_or("<anonymous>"));
    let _ = writeln!(out, "    parent classes: {}", render_signature(parents));
    for m in methods {
        let _ = writeln!(out, "    method: {}", m.name.as_deref().unwrap_or("<anonymous>"));
        let _ = writeln!(
            out,
            "        input parameters: {}",
            render_signature(m.input_signature.as_deref())
        );
        let _ = writeln!(
            out,
            "        output parameters: {}",
            render_signature(m.output_signature.as_deref())
        );
    }
    out
}
