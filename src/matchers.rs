//! Pattern matchers over Go syntax nodes.
//!
//! Stateless, side-effect-free predicates used by the rewriter. Every matcher
//! that looks at a handle-method call is parameterized by the handle name in
//! scope — test code is free to name its `*testing.T` parameter anything, and
//! nested subtests routinely shadow or rename it (`t` outside, `x` inside),
//! so nothing here may hard-code `t`.

use tree_sitter::Node;

/// Method marking a scope eligible for concurrent execution.
pub const PARALLEL_METHOD: &str = "Parallel";
/// Method launching a named subtest with its own handle.
pub const RUN_METHOD: &str = "Run";
/// Method mutating process environment state; incompatible with `Parallel`.
pub const SETENV_METHOD: &str = "Setenv";

/// Recognized test-function name prefix.
const TEST_PREFIX: &str = "Test";
/// Package and type of the test harness handle (`*testing.T`).
const HARNESS_PACKAGE: &str = "testing";
const HARNESS_TYPE: &str = "T";

/// Bare suppression marker that opts a whole file or function out.
const NOLINT_MARKER: &str = "//nolint";
/// Rule identifiers that also act as suppression markers when they appear
/// anywhere in a nolint comment (`//nolint:paralleltest,tparallel` etc.).
const RULE_IDS: [&str; 2] = ["paralleltest", "tparallel"];

/// UTF-8 text of a node. The rewriter validates the whole file as UTF-8
/// before any matching, so the fallback is unreachable in practice.
pub fn node_text<'a>(node: Node, src: &'a [u8]) -> &'a str {
    node.utf8_text(src).unwrap_or("")
}

// ---------------------------------------------------------------------------
// Handle-method calls
// ---------------------------------------------------------------------------

/// `node` is a call expression `<handle>.<method>(...)` where `<handle>` is
/// exactly the identifier supplied.
pub fn is_method_call_on(node: Node, src: &[u8], handle: &str, method: &str) -> bool {
    if node.kind() != "call_expression" {
        return false;
    }
    let Some(function) = node.child_by_field_name("function") else {
        return false;
    };
    if function.kind() != "selector_expression" {
        return false;
    }
    let (Some(operand), Some(field)) = (
        function.child_by_field_name("operand"),
        function.child_by_field_name("field"),
    ) else {
        return false;
    };
    operand.kind() == "identifier"
        && node_text(operand, src) == handle
        && node_text(field, src) == method
}

/// `h.Parallel()` on the supplied handle.
pub fn is_parallel_call(node: Node, src: &[u8], handle: &str) -> bool {
    is_method_call_on(node, src, handle, PARALLEL_METHOD)
}

/// `h.Run(...)` on the supplied handle, with any argument count. Used as the
/// scope boundary when scanning: a subtest's own compliance must never leak
/// into its parent's.
pub fn is_run_call(node: Node, src: &[u8], handle: &str) -> bool {
    is_method_call_on(node, src, handle, RUN_METHOD)
}

/// `h.Setenv(...)` on the supplied handle.
pub fn is_setenv_call(node: Node, src: &[u8], handle: &str) -> bool {
    is_method_call_on(node, src, handle, SETENV_METHOD)
}

/// `h.Run(name, callback)` with exactly two arguments. A one-argument
/// `h.Run(x)` is never treated as a subtest launch.
pub fn is_subtest_launch(node: Node, src: &[u8], handle: &str) -> bool {
    is_run_call(node, src, handle) && call_arguments(node).len() == 2
}

/// The real (non-comment) arguments of a call expression, in source order.
pub fn call_arguments<'t>(call: Node<'t>) -> Vec<Node<'t>> {
    let Some(args) = call.child_by_field_name("arguments") else {
        return Vec::new();
    };
    let mut cursor = args.walk();
    args.named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect()
}

/// In `h.Run(name, func(q *testing.T) { ... })`, the name of the callback's
/// handle parameter (`q`). `None` when the callback is not a function
/// literal (e.g. `t.Run("a", nil)`) or takes no named parameter — in most
/// code the name is `t`, but we must not assume.
pub fn callback_handle_name(call: Node, src: &[u8]) -> Option<String> {
    let callback = call_arguments(call).get(1).copied()?;
    if callback.kind() != "func_literal" {
        return None;
    }
    let params = callback.child_by_field_name("parameters")?;
    let mut cursor = params.walk();
    let first = params
        .named_children(&mut cursor)
        .find(|n| n.kind() == "parameter_declaration")?;
    let mut cursor = first.walk();
    let name = first.children_by_field_name("name", &mut cursor).next()?;
    Some(node_text(name, src).to_string())
}

/// The body block of the callback function literal of a subtest launch.
pub fn callback_body<'t>(call: Node<'t>) -> Option<Node<'t>> {
    let callback = call_arguments(call).get(1).copied()?;
    if callback.kind() != "func_literal" {
        return None;
    }
    callback.child_by_field_name("body")
}

// ---------------------------------------------------------------------------
// Test functions
// ---------------------------------------------------------------------------

/// Check whether `node` is a top-level test function: name prefixed `Test`,
/// exactly one named parameter of type `*testing.T`. Returns the handle
/// parameter name and the body block.
pub fn as_test_function<'t>(node: Node<'t>, src: &[u8]) -> Option<(String, Node<'t>)> {
    if node.kind() != "function_declaration" {
        return None;
    }
    let name = node.child_by_field_name("name")?;
    if !node_text(name, src).starts_with(TEST_PREFIX) {
        return None;
    }

    let params = node.child_by_field_name("parameters")?;
    let mut cursor = params.walk();
    let decls: Vec<Node> = params
        .named_children(&mut cursor)
        .filter(|n| n.kind() == "parameter_declaration")
        .collect();
    if decls.len() != 1 {
        return None;
    }

    let decl = decls[0];
    let mut cursor = decl.walk();
    let names: Vec<Node> = decl.children_by_field_name("name", &mut cursor).collect();
    if names.len() != 1 {
        return None;
    }
    if !is_harness_pointer_type(decl.child_by_field_name("type")?, src) {
        return None;
    }

    let body = node.child_by_field_name("body")?;
    Some((node_text(names[0], src).to_string(), body))
}

/// `*testing.T`, structurally: a pointer to the qualified harness type.
fn is_harness_pointer_type(ty: Node, src: &[u8]) -> bool {
    if ty.kind() != "pointer_type" {
        return false;
    }
    let Some(inner) = ty.named_child(0) else {
        return false;
    };
    if inner.kind() != "qualified_type" {
        return false;
    }
    let (Some(package), Some(name)) = (
        inner.child_by_field_name("package"),
        inner.child_by_field_name("name"),
    ) else {
        return false;
    };
    node_text(package, src) == HARNESS_PACKAGE && node_text(name, src) == HARNESS_TYPE
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// The expression carried by a statement-position node, if any.
pub fn stmt_expression<'t>(node: Node<'t>) -> Option<Node<'t>> {
    match node.kind() {
        "expression_statement" => node.named_child(0),
        "call_expression" => Some(node),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Suppression directives
// ---------------------------------------------------------------------------

/// A single comment line opts its target out when it is exactly the bare
/// nolint marker, or names either of this tool's rule identifiers anywhere
/// in its text (space- or comma-separated, with or without a leading colon).
/// Matching is case-sensitive substring containment per the documented
/// markers; no general lint-directive syntax is parsed.
pub fn comment_suppresses(text: &str) -> bool {
    let text = text.trim_end();
    text == NOLINT_MARKER || RULE_IDS.iter().any(|id| text.contains(id))
}

/// The file's leading comment group: consecutive comment lines starting at
/// the very first byte of the file, before any declaration.
pub fn file_leading_comments<'t>(root: Node<'t>) -> Vec<Node<'t>> {
    let mut group = Vec::new();
    let mut cursor = root.walk();
    let mut expected_row = 0;
    for child in root.children(&mut cursor) {
        if child.kind() != "comment" {
            break;
        }
        // The group must be anchored at byte 0 and contiguous.
        if group.is_empty() && child.start_byte() != 0 {
            break;
        }
        if child.start_position().row > expected_row {
            break;
        }
        expected_row = child.end_position().row + 1;
        group.push(child);
    }
    group
}

/// Whether the file-level suppression directive is present. A suppressed
/// file is invisible to the rewriter and returned byte-for-byte unchanged.
pub fn file_suppressed(root: Node, src: &[u8]) -> bool {
    file_leading_comments(root)
        .iter()
        .any(|c| comment_suppresses(node_text(*c, src)))
}

/// The documentation comment group of a declaration: comment siblings
/// immediately above it, with no blank line in between.
pub fn doc_comments<'t>(decl: Node<'t>) -> Vec<Node<'t>> {
    let mut group = Vec::new();
    let mut row = decl.start_position().row;
    let mut prev = decl.prev_sibling();
    while let Some(node) = prev {
        if node.kind() != "comment" || node.end_position().row + 1 != row {
            break;
        }
        row = node.start_position().row;
        group.push(node);
        prev = node.prev_sibling();
    }
    group.reverse();
    group
}

/// Whether a function-level suppression directive is attached to `decl`.
pub fn func_suppressed(decl: Node, src: &[u8]) -> bool {
    doc_comments(decl)
        .iter()
        .any(|c| comment_suppresses(node_text(*c, src)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::GoParser;
    use test_case::test_case;
    use tree_sitter::Tree;

    fn parse(src: &str) -> Tree {
        GoParser::new().parse("test.go", src.as_bytes()).unwrap()
    }

    /// First node of the given kind, depth-first.
    fn find_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
        if node.kind() == kind {
            return Some(node);
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        children.into_iter().find_map(|c| find_kind(c, kind))
    }

    // -- Handle-method calls ------------------------------------------------

    #[test]
    fn parallel_call_matches_only_supplied_handle() {
        let src = "package t\n\nfunc f(t *testing.T) {\n\tt.Parallel()\n}\n";
        let tree = parse(src);
        let call = find_kind(tree.root_node(), "call_expression").unwrap();
        assert!(is_parallel_call(call, src.as_bytes(), "t"));
        assert!(!is_parallel_call(call, src.as_bytes(), "x"));
        assert!(!is_setenv_call(call, src.as_bytes(), "t"));
    }

    #[test]
    fn run_with_one_argument_is_not_a_launch() {
        let src = "package t\n\nfunc f(t *testing.T) {\n\tt.Run(\"a\")\n}\n";
        let tree = parse(src);
        let call = find_kind(tree.root_node(), "call_expression").unwrap();
        assert!(is_run_call(call, src.as_bytes(), "t"));
        assert!(!is_subtest_launch(call, src.as_bytes(), "t"));
    }

    #[test]
    fn callback_handle_name_resolves_renamed_parameter() {
        let src =
            "package t\n\nfunc f(t *testing.T) {\n\tt.Run(\"a\", func(x *testing.T) {})\n}\n";
        let tree = parse(src);
        let call = find_kind(tree.root_node(), "call_expression").unwrap();
        assert!(is_subtest_launch(call, src.as_bytes(), "t"));
        assert_eq!(callback_handle_name(call, src.as_bytes()).as_deref(), Some("x"));
        assert!(callback_body(call).is_some());
    }

    #[test]
    fn callback_handle_name_is_none_for_nil_callback() {
        let src = "package t\n\nfunc f(t *testing.T) {\n\tt.Run(\"a\", nil)\n}\n";
        let tree = parse(src);
        let call = find_kind(tree.root_node(), "call_expression").unwrap();
        assert!(is_subtest_launch(call, src.as_bytes(), "t"));
        assert_eq!(callback_handle_name(call, src.as_bytes()), None);
        assert!(callback_body(call).is_none());
    }

    #[test]
    fn callback_without_parameters_has_no_handle_name() {
        let src = "package t\n\nfunc f(t *testing.T) {\n\tt.Run(\"a\", func() {})\n}\n";
        let tree = parse(src);
        let call = find_kind(tree.root_node(), "call_expression").unwrap();
        assert_eq!(callback_handle_name(call, src.as_bytes()), None);
    }

    // -- Test functions -----------------------------------------------------

    #[test]
    fn test_function_is_recognized_with_handle_name() {
        let src = "package t\n\nfunc TestFoo(tr *testing.T) {}\n";
        let tree = parse(src);
        let decl = find_kind(tree.root_node(), "function_declaration").unwrap();
        let (handle, body) = as_test_function(decl, src.as_bytes()).unwrap();
        assert_eq!(handle, "tr");
        assert_eq!(body.kind(), "block");
    }

    #[test_case("func NoTest(t *testing.T) {}"; "missing prefix")]
    #[test_case("func TestFoo(i int) {}"; "wrong parameter type")]
    #[test_case("func TestFoo(t *testing.T, i int) {}"; "extra parameter")]
    #[test_case("func TestFoo() {}"; "no parameters")]
    #[test_case("func TestFoo(t *other.T) {}"; "wrong package")]
    #[test_case("func TestFoo(t testing.T) {}"; "not a pointer")]
    fn non_test_functions_are_rejected(decl_src: &str) {
        let src = format!("package t\n\n{decl_src}\n");
        let tree = parse(&src);
        let decl = find_kind(tree.root_node(), "function_declaration").unwrap();
        assert!(as_test_function(decl, src.as_bytes()).is_none());
    }

    // -- Suppression ---------------------------------------------------------

    #[test_case("//nolint", true; "bare nolint")]
    #[test_case("//nolint:paralleltest", true; "colon rule")]
    #[test_case("//nolint tparallel,paralleltest", true; "space separated list")]
    #[test_case("// mentions tparallel in prose", true; "substring containment")]
    #[test_case("//nolint:gosec", false; "other linter")]
    #[test_case("// ordinary comment", false; "ordinary comment")]
    fn comment_suppression_markers(text: &str, expected: bool) {
        assert_eq!(comment_suppresses(text), expected);
    }

    #[test]
    fn leading_comment_group_must_start_at_byte_zero() {
        let src = "package t\n\n//nolint\nfunc TestFoo(t *testing.T) {}\n";
        let tree = parse(src);
        assert!(file_leading_comments(tree.root_node()).is_empty());
        assert!(!file_suppressed(tree.root_node(), src.as_bytes()));
    }

    #[test]
    fn leading_comment_group_collects_contiguous_lines() {
        let src = "// first\n// second tparallel\npackage t\n";
        let tree = parse(src);
        assert_eq!(file_leading_comments(tree.root_node()).len(), 2);
        assert!(file_suppressed(tree.root_node(), src.as_bytes()));
    }

    #[test]
    fn doc_comment_attaches_only_without_blank_line() {
        let src = "package t\n\n//nolint:tparallel\nfunc TestFoo(t *testing.T) {}\n\n// detached\n\nfunc TestBar(t *testing.T) {}\n";
        let tree = parse(src);
        let mut cursor = tree.root_node().walk();
        let decls: Vec<Node> = tree
            .root_node()
            .children(&mut cursor)
            .filter(|n| n.kind() == "function_declaration")
            .collect();
        assert!(func_suppressed(decls[0], src.as_bytes()));
        assert!(doc_comments(decls[1]).is_empty());
    }
}
