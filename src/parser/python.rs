//! Editable Python source backed by a tree-sitter syntax tree.
//!
//! Every edit rewrites the source text and re-parses it, so the tree and the
//! text never disagree. Edits happen on clones; callers decide which clone
//! becomes the live file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser as TsParser, Tree};

use crate::core::{Error, Result};

/// A function or method definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    /// Enclosing class, if this is a method.
    pub class_name: Option<String>,
    /// First line including decorators (1-indexed).
    pub start_line: u32,
    pub end_line: u32,
    /// Source text, dedented to column zero, decorators included.
    pub code: String,
}

impl FunctionDef {
    /// `Class.method` or `function`.
    pub fn qualified_name(&self) -> String {
        match &self.class_name {
            Some(cls) => format!("{cls}.{}", self.name),
            None => self.name.clone(),
        }
    }

    /// pytest node id relative to the repository root.
    pub fn node_id(&self, file: &Path) -> String {
        let file = file.to_string_lossy().replace('\\', "/");
        match &self.class_name {
            Some(cls) => format!("{file}::{cls}::{}", self.name),
            None => format!("{file}::{}", self.name),
        }
    }

    pub fn is_test(&self) -> bool {
        self.name.starts_with("test")
    }

    /// Same name in the same class; Python keeps only the last such definition.
    pub fn same_identity(&self, other: &FunctionDef) -> bool {
        self.name == other.name && self.class_name == other.class_name
    }
}

impl fmt::Display for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// A class definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// Innermost definitions enclosing a line range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub func_name: Option<String>,
    pub class_name: Option<String>,
}

/// A parsed Python file.
#[derive(Clone)]
pub struct PythonFile {
    path: PathBuf,
    source: String,
    tree: Arc<Tree>,
}

impl fmt::Debug for PythonFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PythonFile")
            .field("path", &self.path)
            .field("len", &self.source.len())
            .finish()
    }
}

impl PartialEq for PythonFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.source == other.source
    }
}

fn parse_tree(source: &str, path: &Path) -> Result<Tree> {
    let mut parser = TsParser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| Error::parse(path, format!("failed to load Python grammar: {e}")))?;
    parser
        .parse(source, None)
        .ok_or_else(|| Error::parse(path, "Failed to parse file"))
}

fn row(node: &Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

fn end_row(node: &Node<'_>) -> u32 {
    node.end_position().row as u32 + 1
}

/// Leading spaces and tabs, in bytes. Other whitespace is left to the parser.
fn leading_indent(line: &str) -> usize {
    line.bytes().take_while(|b| *b == b' ' || *b == b'\t').count()
}

/// Strip the common leading indentation of all non-blank lines.
pub fn dedent(code: &str) -> String {
    let min_indent = code
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(leading_indent)
        .min()
        .unwrap_or(0);

    code.lines()
        .map(|l| &l[min_indent.min(leading_indent(l))..])
        .collect::<Vec<_>>()
        .join("\n")
}

fn indent(code: &str, prefix: &str) -> String {
    code.lines()
        .map(|l| {
            if l.trim().is_empty() {
                String::new()
            } else {
                format!("{prefix}{l}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl PythonFile {
    /// Parse `source`; syntax errors are recorded in the tree, not returned.
    pub fn parse(path: impl Into<PathBuf>, source: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let source = source.into();
        let tree = parse_tree(&source, &path)?;
        Ok(Self {
            path,
            source,
            tree: Arc::new(tree),
        })
    }

    /// Read and parse `root/rel`, keeping `rel` as the file's path.
    pub fn load(root: &Path, rel: &Path) -> Result<Self> {
        let full = root.join(rel);
        let source = fs::read_to_string(&full).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::FileNotFound { path: full.clone() },
            _ => Error::Io(e),
        })?;
        Self::parse(rel, source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has_syntax_error(&self) -> bool {
        self.tree.root_node().has_error()
    }

    /// Fails with the first error location when the source does not parse.
    pub fn check_syntax(&self) -> Result<()> {
        if !self.has_syntax_error() {
            return Ok(());
        }
        let line = first_error(self.tree.root_node()).map(|n| row(&n)).unwrap_or(0);
        Err(Error::GeneratedSyntax(format!(
            "{}: syntax error near line {line}",
            self.path.display()
        )))
    }

    /// Text of lines `start..=end` (1-indexed).
    pub fn lines(&self, start: u32, end: u32) -> Vec<String> {
        self.source
            .lines()
            .enumerate()
            .filter(|(i, _)| {
                let n = *i as u32 + 1;
                n >= start && n <= end
            })
            .map(|(_, l)| l.to_string())
            .collect()
    }

    /// All function definitions that are module-level or directly in a class.
    pub fn functions(&self) -> Vec<FunctionDef> {
        let mut out = Vec::new();
        self.collect_functions(self.tree.root_node(), None, &mut out);
        out
    }

    /// All class definitions, including nested ones.
    pub fn classes(&self) -> Vec<ClassDef> {
        let mut out = Vec::new();
        visit_classes(self.tree.root_node(), &self.source, &mut out);
        out
    }

    /// Test functions: module-level `test*` functions and `test*` methods of `Test*` classes.
    pub fn test_functions(&self) -> Vec<FunctionDef> {
        self.functions()
            .into_iter()
            .filter(|f| {
                f.is_test()
                    && match &f.class_name {
                        Some(cls) => cls.starts_with("Test"),
                        None => true,
                    }
            })
            .collect()
    }

    pub fn find_function(&self, name: &str, class_name: Option<&str>) -> Option<FunctionDef> {
        self.functions()
            .into_iter()
            .find(|f| f.name == name && f.class_name.as_deref() == class_name)
    }

    pub fn find_class(&self, name: &str) -> Option<ClassDef> {
        self.classes().into_iter().find(|c| c.name == name)
    }

    /// Test functions here that `baseline` does not have.
    pub fn diff_test_funcs(&self, baseline: &PythonFile) -> Vec<FunctionDef> {
        let old = baseline.test_functions();
        self.test_functions()
            .into_iter()
            .filter(|f| !old.iter().any(|o| o.same_identity(f)))
            .collect()
    }

    /// Innermost function and class enclosing lines `start..=end`.
    pub fn map_line_range(&self, start: u32, end: u32) -> Scope {
        let mut scope = Scope::default();
        enclosing(self.tree.root_node(), &self.source, start, end, &mut scope);
        scope
    }

    /// Indentation of the class body, defaulting to four spaces.
    pub fn class_indent(&self, class_name: &str) -> Option<String> {
        let node = self.class_node(class_name)?;
        let body = node.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        let line_start = self.source[..first.start_byte()]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        let prefix = &self.source[line_start..first.start_byte()];
        if prefix.trim().is_empty() && !prefix.is_empty() {
            Some(prefix.to_string())
        } else {
            Some("    ".to_string())
        }
    }

    /// Remove a function definition (decorators included).
    ///
    /// A class left without statements gets a `pass` body.
    pub fn delete_function(&mut self, name: &str, class_name: Option<&str>) -> Result<FunctionDef> {
        let (def, start, end, only_stmt_indent) = {
            let node = self
                .function_node(name, class_name)
                .ok_or_else(|| self.not_found(name, class_name))?;
            let def = self.function_def(node, class_name.map(str::to_string));
            let start = self.line_start(node.start_byte());
            let end = self.line_end(node.end_byte());
            let only_stmt_indent = match node.parent() {
                Some(block) if block.kind() == "block" && block.named_child_count() == 1 => {
                    Some(self.source[start..node.start_byte()].to_string())
                }
                _ => None,
            };
            (def, start, end, only_stmt_indent)
        };

        let replacement = match only_stmt_indent {
            Some(indent) => format!("{indent}pass\n"),
            None => String::new(),
        };

        let mut source = String::with_capacity(self.source.len());
        source.push_str(&self.source[..start]);
        source.push_str(&replacement);
        source.push_str(&self.source[end..]);
        self.replace_source(source)?;
        Ok(def)
    }

    /// Append zero-indented `code` at module level or at the end of a class.
    pub fn append(&mut self, code: &str, class_name: Option<&str>) -> Result<()> {
        let code = dedent(code);
        let code = code.trim_matches('\n').trim_end();
        if code.is_empty() {
            return Ok(());
        }

        let source = match class_name {
            None => format!("{}\n\n\n{code}\n", self.source.trim_end()),
            Some(cls) => {
                let prefix = self.class_indent(cls).unwrap_or_else(|| "    ".to_string());
                let node = self
                    .class_node(cls)
                    .ok_or_else(|| self.not_found(cls, None))?;
                let at = node.end_byte();
                let rest = &self.source[at..];
                let trailer = if rest.starts_with('\n') { "" } else { "\n" };
                format!(
                    "{}\n\n{}{}{}",
                    &self.source[..at],
                    indent(code, &prefix),
                    trailer,
                    rest
                )
            }
        };
        self.replace_source(source)
    }

    /// Replace the whole source text.
    pub fn replace_source(&mut self, source: String) -> Result<()> {
        let tree = parse_tree(&source, &self.path)?;
        self.source = source;
        self.tree = Arc::new(tree);
        Ok(())
    }

    /// Write the source to `root/path`.
    pub fn write_to(&self, root: &Path) -> Result<()> {
        fs::write(root.join(&self.path), &self.source)?;
        Ok(())
    }

    fn not_found(&self, name: &str, class_name: Option<&str>) -> Error {
        let what = match class_name {
            Some(cls) => format!("{cls}.{name}"),
            None => name.to_string(),
        };
        Error::parse(&self.path, format!("definition not found: {what}"))
    }

    fn line_start(&self, byte: usize) -> usize {
        self.source[..byte].rfind('\n').map(|i| i + 1).unwrap_or(0)
    }

    fn line_end(&self, byte: usize) -> usize {
        self.source[byte..]
            .find('\n')
            .map(|i| byte + i + 1)
            .unwrap_or(self.source.len())
    }

    fn text(&self, node: &Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    fn function_def(&self, outer: Node<'_>, class_name: Option<String>) -> FunctionDef {
        let def = if outer.kind() == "decorated_definition" {
            outer.child_by_field_name("definition").unwrap_or(outer)
        } else {
            outer
        };
        let name = def
            .child_by_field_name("name")
            .map(|n| self.text(&n).to_string())
            .unwrap_or_default();
        let start = self.line_start(outer.start_byte());
        FunctionDef {
            name,
            class_name,
            start_line: row(&outer),
            end_line: end_row(&outer),
            code: dedent(&self.source[start..outer.end_byte()]),
        }
    }

    fn collect_functions(&self, node: Node<'_>, class_name: Option<&str>, out: &mut Vec<FunctionDef>) {
        for child in node.named_children(&mut node.walk()) {
            let inner = if child.kind() == "decorated_definition" {
                child.child_by_field_name("definition")
            } else {
                Some(child)
            };
            let Some(inner) = inner else { continue };
            match inner.kind() {
                "function_definition" => {
                    out.push(self.function_def(child, class_name.map(str::to_string)));
                }
                "class_definition" => {
                    let name = inner
                        .child_by_field_name("name")
                        .map(|n| self.text(&n).to_string());
                    if let (Some(name), Some(body)) = (name, inner.child_by_field_name("body")) {
                        self.collect_functions(body, Some(&name), out);
                    }
                }
                _ => {}
            }
        }
    }

    /// Outer node (decorated or plain) of a function definition.
    fn function_node(&self, name: &str, class_name: Option<&str>) -> Option<Node<'_>> {
        let container = match class_name {
            Some(cls) => self.class_node(cls)?.child_by_field_name("body")?,
            None => self.tree.root_node(),
        };
        container.named_children(&mut container.walk()).find(|child| {
            let inner = if child.kind() == "decorated_definition" {
                child.child_by_field_name("definition")
            } else {
                Some(*child)
            };
            inner.is_some_and(|n| {
                n.kind() == "function_definition"
                    && n.child_by_field_name("name")
                        .is_some_and(|id| self.text(&id) == name)
            })
        })
    }

    fn class_node(&self, name: &str) -> Option<Node<'_>> {
        fn find<'t>(node: Node<'t>, source: &str, name: &str) -> Option<Node<'t>> {
            for child in node.named_children(&mut node.walk()) {
                let inner = if child.kind() == "decorated_definition" {
                    child.child_by_field_name("definition").unwrap_or(child)
                } else {
                    child
                };
                if inner.kind() == "class_definition" {
                    let matches = inner
                        .child_by_field_name("name")
                        .and_then(|n| n.utf8_text(source.as_bytes()).ok())
                        == Some(name);
                    if matches {
                        return Some(inner);
                    }
                    if let Some(body) = inner.child_by_field_name("body") {
                        if let Some(found) = find(body, source, name) {
                            return Some(found);
                        }
                    }
                }
            }
            None
        }
        find(self.tree.root_node(), &self.source, name)
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error())
        .find_map(first_error)
}

fn visit_classes(node: Node<'_>, source: &str, out: &mut Vec<ClassDef>) {
    if node.kind() == "class_definition" {
        if let Some(name) = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(source.as_bytes()).ok())
        {
            out.push(ClassDef {
                name: name.to_string(),
                start_line: row(&node),
                end_line: end_row(&node),
            });
        }
    }
    for child in node.named_children(&mut node.walk()) {
        visit_classes(child, source, out);
    }
}

fn enclosing(node: Node<'_>, source: &str, start: u32, end: u32, scope: &mut Scope) {
    for child in node.named_children(&mut node.walk()) {
        if row(&child) > start || end_row(&child) < end {
            continue;
        }
        let name = || {
            child
                .child_by_field_name("name")
                .and_then(|n| n.utf8_text(source.as_bytes()).ok())
                .map(str::to_string)
        };
        match child.kind() {
            "function_definition" => scope.func_name = name(),
            "class_definition" => {
                scope.class_name = name();
                scope.func_name = None;
            }
            _ => {}
        }
        enclosing(child, source, start, end, scope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_FILE: &str = "\
import pytest

from pkg.calc import add, div


def helper():
    return 1


def test_add():
    assert add(1, 2) == 3


class TestCalc:
    def setup_method(self):
        self.x = 1

    def test_div(self):
        assert div(4, 2) == 2

    @pytest.mark.slow
    def test_div_zero(self):
        with pytest.raises(ZeroDivisionError):
            div(1, 0)
";

    fn file() -> PythonFile {
        PythonFile::parse("tests/test_calc.py", TEST_FILE).unwrap()
    }

    #[test]
    fn test_functions_and_scopes() {
        let f = file();
        let names: Vec<String> = f.functions().iter().map(|d| d.qualified_name()).collect();
        assert_eq!(
            names,
            vec![
                "helper",
                "test_add",
                "TestCalc.setup_method",
                "TestCalc.test_div",
                "TestCalc.test_div_zero"
            ]
        );
        assert!(!f.has_syntax_error());
    }

    #[test]
    fn test_test_functions_filter() {
        let names: Vec<String> = file()
            .test_functions()
            .iter()
            .map(|d| d.qualified_name())
            .collect();
        assert_eq!(names, vec!["test_add", "TestCalc.test_div", "TestCalc.test_div_zero"]);
    }

    #[test]
    fn test_decorated_function_code_includes_decorator() {
        let f = file();
        let def = f.find_function("test_div_zero", Some("TestCalc")).unwrap();
        assert!(def.code.starts_with("@pytest.mark.slow\ndef test_div_zero(self):"));
        assert_eq!(def.start_line, 21);
        assert_eq!(def.node_id(f.path()), "tests/test_calc.py::TestCalc::test_div_zero");
    }

    #[test]
    fn test_delete_method() {
        let mut f = file();
        let removed = f.delete_function("test_div", Some("TestCalc")).unwrap();
        assert_eq!(removed.name, "test_div");
        assert!(f.find_function("test_div", Some("TestCalc")).is_none());
        assert!(f.find_function("test_div_zero", Some("TestCalc")).is_some());
        assert!(!f.has_syntax_error());
    }

    #[test]
    fn test_delete_top_level() {
        let mut f = file();
        f.delete_function("test_add", None).unwrap();
        assert!(f.find_function("test_add", None).is_none());
        assert!(!f.source().contains("assert add(1, 2)"));
        assert!(!f.has_syntax_error());
    }

    #[test]
    fn test_delete_last_statement_leaves_pass() {
        let mut f = PythonFile::parse("t.py", "class TestA:\n    def test_x(self):\n        pass\n").unwrap();
        f.delete_function("test_x", Some("TestA")).unwrap();
        assert_eq!(f.source(), "class TestA:\n    pass\n");
        assert!(!f.has_syntax_error());
    }

    #[test]
    fn test_delete_missing_errors() {
        let mut f = file();
        assert!(f.delete_function("test_nope", Some("TestCalc")).is_err());
    }

    #[test]
    fn test_append_into_class_reindents() {
        let mut f = file();
        f.append(
            "def test_div_neg(self):\n    assert div(-4, 2) == -2\n",
            Some("TestCalc"),
        )
        .unwrap();

        assert!(!f.has_syntax_error());
        let def = f.find_function("test_div_neg", Some("TestCalc")).unwrap();
        assert!(def.code.contains("assert div(-4, 2) == -2"));
        assert!(f.source().contains("\n    def test_div_neg(self):\n        assert"));
    }

    #[test]
    fn test_append_already_indented_code() {
        let mut f = file();
        f.append("    def test_y(self):\n        assert True\n", Some("TestCalc"))
            .unwrap();
        assert!(f.find_function("test_y", Some("TestCalc")).is_some());
        assert!(!f.has_syntax_error());
    }

    #[test]
    fn test_append_top_level() {
        let mut f = file();
        f.append("def test_sub():\n    assert 1 - 1 == 0", None).unwrap();
        assert!(f.find_function("test_sub", None).is_some());
        assert!(f.source().ends_with("assert 1 - 1 == 0\n"));
    }

    #[test]
    fn test_append_to_unknown_class_errors() {
        let mut f = file();
        assert!(f.append("def test_q(self):\n    pass", Some("TestMissing")).is_err());
    }

    #[test]
    fn test_check_syntax_reports_error() {
        let f = PythonFile::parse("t.py", "def test_x(:\n    pass\n").unwrap();
        assert!(f.has_syntax_error());
        assert!(matches!(f.check_syntax(), Err(Error::GeneratedSyntax(_))));
    }

    #[test]
    fn test_diff_test_funcs() {
        let base = file();
        let mut cand = base.clone();
        cand.append("def test_new(self):\n    assert True", Some("TestCalc"))
            .unwrap();
        cand.append("def test_top():\n    assert True", None).unwrap();

        let new: Vec<String> = cand
            .diff_test_funcs(&base)
            .iter()
            .map(|d| d.qualified_name())
            .collect();
        assert_eq!(new, vec!["TestCalc.test_new", "test_top"]);
    }

    #[test]
    fn test_map_line_range() {
        let f = file();
        let scope = f.map_line_range(19, 19);
        assert_eq!(scope.class_name.as_deref(), Some("TestCalc"));
        assert_eq!(scope.func_name.as_deref(), Some("test_div"));

        let scope = f.map_line_range(7, 7);
        assert_eq!(scope.func_name.as_deref(), Some("helper"));
        assert_eq!(scope.class_name, None);

        assert_eq!(f.map_line_range(1, 1), Scope::default());
    }

    #[test]
    fn test_lines() {
        let f = file();
        assert_eq!(f.lines(10, 11), vec!["def test_add():", "    assert add(1, 2) == 3"]);
    }

    #[test]
    fn test_classes() {
        let classes = file().classes();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].name, "TestCalc");
        assert_eq!(classes[0].start_line, 14);
    }

    #[test]
    fn test_dedent() {
        assert_eq!(dedent("    a\n      b\n\n    c"), "a\n  b\n\nc");
    }

    #[test]
    fn test_dedent_ignores_non_ascii_whitespace() {
        // U+3000 is whitespace to `trim_start` but three bytes wide.
        let code = "\u{3000}def test_a(self):\n  \u{3000}pass\n";
        assert_eq!(dedent(code), "\u{3000}def test_a(self):\n  \u{3000}pass");

        let nested = "    def test_a(self):\n      \u{3000}pass\n    \u{3000}";
        assert_eq!(dedent(nested), "def test_a(self):\n  \u{3000}pass\n\u{3000}");
    }
}
