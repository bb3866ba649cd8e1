//! Analyzer/Rewriter for one Go test file.
//!
//! [`rewrite`] parses a file, finds every top-level test function, and
//! prepends missing `Parallel()` directives — at function scope, in directly
//! launched subtests, and in subtests launched from `range` loops — unless a
//! `Setenv` call or a suppression comment makes the scope ineligible. When
//! the legacy loop-capture fix is enabled it also rebinds the range value
//! variable (`tc := tc`) so concurrently running subtests don't share the
//! mutating loop variable.
//!
//! Compliance is judged strictly per scope: a scan never descends into a
//! subtest callback while judging its parent, and each callback is judged
//! against its *own* handle parameter name. Loop-variable checks compare
//! variable identity, not spelling — a `tc := tc` rebinding introduces a new
//! variable that textually shadows the loop variable, and references beyond
//! it no longer count as loop-variable uses. Identity is resolved by scope
//! tracking during traversal (declarations and function-literal parameters
//! shadow the name for the remainder of their block).

use tree_sitter::Node;

use crate::edit::EditSet;
use crate::error::{ParagenError, Result};
use crate::matchers as m;
use crate::parser::GoParser;

/// Rewrite one file's source, returning the (possibly identical) new bytes.
///
/// Fails with [`ParagenError::Parse`] on invalid input and with
/// [`ParagenError::Format`] if the mutation produced an inconsistent edit
/// set. A file carrying a file-level suppression directive is returned
/// unchanged without any tree mutation, so no reformatting churn occurs.
pub fn rewrite(filename: &str, src: &[u8], fix_legacy_loop_capture: bool) -> Result<Vec<u8>> {
    // Validate UTF-8 once so node text extraction is infallible everywhere.
    std::str::from_utf8(src).map_err(|e| ParagenError::Parse {
        file: filename.to_string(),
        message: format!("not valid UTF-8: {e}"),
    })?;

    let tree = GoParser::new().parse(filename, src)?;
    let root = tree.root_node();

    if m::file_suppressed(root, src) {
        return Ok(src.to_vec());
    }

    let mut edits = EditSet::new();
    let mut cursor = root.walk();
    let decls: Vec<Node> = root.children(&mut cursor).collect();
    for decl in decls {
        if decl.kind() != "function_declaration" || m::func_suppressed(decl, src) {
            continue;
        }
        let Some((handle, body)) = m::as_test_function(decl, src) else {
            continue;
        };
        rewrite_test_function(body, src, &handle, fix_legacy_loop_capture, &mut edits);
    }

    if edits.is_empty() {
        return Ok(src.to_vec());
    }

    let mut out = edits.apply(src).map_err(|message| ParagenError::Format {
        file: filename.to_string(),
        message,
    })?;
    // A mutated file always ends with a newline, as the formatter would emit.
    if out.last() != Some(&b'\n') {
        out.push(b'\n');
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Per-function analysis
// ---------------------------------------------------------------------------

/// Parallel/Setenv observations within one scope.
#[derive(Debug, Default, Clone, Copy)]
struct ScopeUse {
    parallel: bool,
    setenv: bool,
}

impl ScopeUse {
    fn compliant(self) -> bool {
        self.parallel || self.setenv
    }
}

fn rewrite_test_function(
    body: Node,
    src: &[u8],
    handle: &str,
    fix_legacy_loop_capture: bool,
    edits: &mut EditSet,
) {
    let mut cursor = body.walk();
    let stmts: Vec<Node> = body
        .named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect();

    // Direct-scope scan: expression statements only.
    let mut scope = ScopeUse::default();
    for stmt in &stmts {
        if let Some(expr) = m::stmt_expression(*stmt) {
            scan_scope(expr, src, handle, &mut scope);
        }
    }

    // Direct sub-test patching.
    for stmt in &stmts {
        if m::stmt_expression(*stmt).is_some() {
            patch_direct_launches(*stmt, src, handle, edits);
        }
    }

    // Range loops.
    for stmt in &stmts {
        if stmt.kind() == "for_statement" && range_clause(*stmt).is_some() {
            rewrite_range_loop(*stmt, src, handle, fix_legacy_loop_capture, edits);
        }
    }

    // Function-scope patching.
    if !scope.compliant() {
        edits.prepend_statement(body, src, &format!("{handle}.Parallel()"));
    }
}

/// Deep-inspect `node` for `Parallel`/`Setenv` calls on `handle`, never
/// descending into a `handle.Run(...)` call reached along the way: what a
/// subtest does with its own handle is judged at its own scope.
fn scan_scope(node: Node, src: &[u8], handle: &str, found: &mut ScopeUse) {
    if m::is_run_call(node, src, handle) {
        return;
    }
    if m::is_parallel_call(node, src, handle) {
        found.parallel = true;
    } else if m::is_setenv_call(node, src, handle) {
        found.setenv = true;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        scan_scope(child, src, handle, found);
    }
}

/// Whether the callback of a subtest launch already complies (calls
/// `Parallel` or `Setenv` on its own handle).
fn launch_compliant(call: Node, src: &[u8], inner: &str) -> bool {
    let Some(cb_body) = m::callback_body(call) else {
        return false;
    };
    let mut used = ScopeUse::default();
    scan_scope(cb_body, src, inner, &mut used);
    used.compliant()
}

// ---------------------------------------------------------------------------
// Direct subtests
// ---------------------------------------------------------------------------

/// Patch every subtest launch found in one top-level statement: any launch
/// whose callback resolves to a handle name and complies with neither rule
/// gets a `Parallel()` call prepended to its callback body.
fn patch_direct_launches(stmt: Node, src: &[u8], handle: &str, edits: &mut EditSet) {
    let mut launches = Vec::new();
    collect_launch_calls(stmt, src, handle, &mut launches);
    for call in launches {
        let Some(inner) = m::callback_handle_name(call, src) else {
            // No resolvable nested handle (nil callback, unnamed parameter):
            // nothing can be judged or inserted here.
            continue;
        };
        if launch_compliant(call, src, &inner) {
            continue;
        }
        if let Some(cb_body) = m::callback_body(call) {
            edits.prepend_statement(cb_body, src, &format!("{inner}.Parallel()"));
        }
    }
}

/// Collect subtest launches on `handle` within a subtree, without entering
/// the callback of a launch already collected — launches nested inside
/// another subtest belong to that subtest's scope, not this one.
fn collect_launch_calls<'t>(node: Node<'t>, src: &[u8], handle: &str, out: &mut Vec<Node<'t>>) {
    if m::is_subtest_launch(node, src, handle) {
        out.push(node);
        return;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        collect_launch_calls(child, src, handle, out);
    }
}

// ---------------------------------------------------------------------------
// Range loops
// ---------------------------------------------------------------------------

/// Key and value variable names bound by a range clause. `None` for an
/// absent or blank (`_`) binding.
#[derive(Debug, Default)]
struct LoopVars {
    key: Option<String>,
    value: Option<String>,
}

impl LoopVars {
    fn names(&self) -> Vec<&str> {
        [self.key.as_deref(), self.value.as_deref()]
            .into_iter()
            .flatten()
            .collect()
    }
}

fn range_clause<'t>(for_stmt: Node<'t>) -> Option<Node<'t>> {
    let mut cursor = for_stmt.walk();
    let clause = for_stmt
        .named_children(&mut cursor)
        .find(|n| n.kind() == "range_clause");
    clause
}

fn range_loop_vars(clause: Node, src: &[u8]) -> LoopVars {
    let Some(left) = clause.child_by_field_name("left") else {
        return LoopVars::default();
    };
    let mut cursor = left.walk();
    let bound: Vec<Option<String>> = left
        .named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .map(|n| {
            let text = m::node_text(n, src);
            (n.kind() == "identifier" && text != "_").then(|| text.to_string())
        })
        .collect();
    LoopVars {
        key: bound.first().cloned().flatten(),
        value: bound.get(1).cloned().flatten(),
    }
}

fn rewrite_range_loop(
    for_stmt: Node,
    src: &[u8],
    handle: &str,
    fix_legacy_loop_capture: bool,
    edits: &mut EditSet,
) {
    let Some(clause) = range_clause(for_stmt) else {
        return;
    };
    let Some(body) = for_stmt.child_by_field_name("body") else {
        return;
    };
    let vars = range_loop_vars(clause, src);

    let mut launches = Vec::new();
    collect_launch_stmts(body, src, handle, &mut launches);
    if launches.is_empty() {
        return;
    }

    let mut any_compliant = false;
    let mut captures_loop_var = false;
    for call in &launches {
        if let Some(inner) = m::callback_handle_name(*call, src) {
            any_compliant |= launch_compliant(*call, src, &inner);
        }
        if !captures_loop_var {
            captures_loop_var = call_references_loop_var(*call, src, &vars);
        }
    }
    if any_compliant {
        return;
    }

    // Single-insertion-per-loop policy: only the first launch with a
    // resolvable nested handle gets the directive.
    for call in &launches {
        let (Some(inner), Some(cb_body)) = (m::callback_handle_name(*call, src), m::callback_body(*call))
        else {
            continue;
        };
        edits.prepend_statement(cb_body, src, &format!("{inner}.Parallel()"));
        break;
    }

    // Go < 1.22 shares the range variable across iterations; rebind it when
    // a launch captures it and no rebinding exists yet.
    if fix_legacy_loop_capture && captures_loop_var {
        if let Some(value) = &vars.value {
            if !has_rebinding(body, src, value) {
                edits.prepend_statement(body, src, &format!("{value} := {value}"));
            }
        }
    }
}

/// Collect launches sitting in statement position anywhere in the loop body,
/// without entering the callbacks of collected launches.
fn collect_launch_stmts<'t>(node: Node<'t>, src: &[u8], handle: &str, out: &mut Vec<Node<'t>>) {
    if let Some(expr) = m::stmt_expression(node) {
        if m::is_subtest_launch(expr, src, handle) {
            out.push(expr);
            return;
        }
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        collect_launch_stmts(child, src, handle, out);
    }
}

/// Whether any of the loop's bound variables is referenced in the launch's
/// arguments (the name expression or the callback).
fn call_references_loop_var(call: Node, src: &[u8], vars: &LoopVars) -> bool {
    let names = vars.names();
    if names.is_empty() {
        return false;
    }
    let Some(args) = call.child_by_field_name("arguments") else {
        return false;
    };
    names
        .iter()
        .any(|name| references_unshadowed(args, src, name))
}

// ---------------------------------------------------------------------------
// Identity resolution by scope tracking
// ---------------------------------------------------------------------------

/// Whether the subtree contains an identifier that still resolves to the
/// binding of `name` visible at the subtree's root. Declarations of the same
/// name along the way (short variable declarations, `var`/`const` specs,
/// function-literal parameters, nested range clauses) shadow it for the rest
/// of their scope, so occurrences beyond them are a *different* variable.
fn references_unshadowed(node: Node, src: &[u8], name: &str) -> bool {
    match node.kind() {
        "identifier" => m::node_text(node, src) == name,
        // Field names are not variable references.
        "selector_expression" => node
            .child_by_field_name("operand")
            .is_some_and(|op| references_unshadowed(op, src, name)),
        // The right-hand side is evaluated before the new binding exists;
        // the left-hand side is a definition, not a reference.
        "short_var_declaration" => node
            .child_by_field_name("right")
            .is_some_and(|r| references_unshadowed(r, src, name)),
        "range_clause" => node
            .child_by_field_name("right")
            .is_some_and(|r| references_unshadowed(r, src, name)),
        "func_literal" => {
            if func_literal_binds(node, src, name) {
                return false;
            }
            node.child_by_field_name("body")
                .is_some_and(|b| references_unshadowed(b, src, name))
        }
        "block" => {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            for child in children {
                if references_unshadowed(child, src, name) {
                    return true;
                }
                if declares_name(child, src, name) {
                    // Shadowed for the remainder of this block.
                    return false;
                }
            }
            false
        }
        "for_statement" => {
            if let Some(clause) = range_clause(node) {
                if references_unshadowed(clause, src, name) {
                    return true;
                }
                let vars = range_loop_vars(clause, src);
                if vars.names().contains(&name) {
                    // Rebound per iteration; the body sees the new binding.
                    return false;
                }
            }
            let mut cursor = node.walk();
            let children: Vec<Node> = node
                .named_children(&mut cursor)
                .filter(|n| n.kind() != "range_clause")
                .collect();
            children
                .into_iter()
                .any(|c| references_unshadowed(c, src, name))
        }
        _ => {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            children
                .into_iter()
                .any(|c| references_unshadowed(c, src, name))
        }
    }
}

/// Whether a statement introduces a new binding of `name` for the statements
/// after it in the same block.
fn declares_name(stmt: Node, src: &[u8], name: &str) -> bool {
    match stmt.kind() {
        "short_var_declaration" => stmt
            .child_by_field_name("left")
            .is_some_and(|l| expression_list_has_ident(l, src, name)),
        "var_declaration" | "const_declaration" => {
            let mut cursor = stmt.walk();
            let specs: Vec<Node> = stmt.named_children(&mut cursor).collect();
            specs.into_iter().any(|spec| {
                let mut cursor = spec.walk();
                let names: Vec<Node> = spec.children_by_field_name("name", &mut cursor).collect();
                names.into_iter().any(|n| m::node_text(n, src) == name)
            })
        }
        _ => false,
    }
}

fn expression_list_has_ident(list: Node, src: &[u8], name: &str) -> bool {
    let mut cursor = list.walk();
    let items: Vec<Node> = list.named_children(&mut cursor).collect();
    items
        .into_iter()
        .any(|n| n.kind() == "identifier" && m::node_text(n, src) == name)
}

fn func_literal_binds(func: Node, src: &[u8], name: &str) -> bool {
    let Some(params) = func.child_by_field_name("parameters") else {
        return false;
    };
    let mut cursor = params.walk();
    let decls: Vec<Node> = params.named_children(&mut cursor).collect();
    decls.into_iter().any(|decl| {
        let mut cursor = decl.walk();
        let names: Vec<Node> = decl.children_by_field_name("name", &mut cursor).collect();
        names.into_iter().any(|n| m::node_text(n, src) == name)
    })
}

/// Whether the loop body already contains a self-rebinding of the value
/// variable (`v := v` where the right-hand side still resolves to the loop
/// variable). A rebinding of a shadowing redeclaration does not count.
fn has_rebinding(node: Node, src: &[u8], value: &str) -> bool {
    match node.kind() {
        "short_var_declaration" => {
            let lhs = node
                .child_by_field_name("left")
                .is_some_and(|l| is_single_ident(l, src, value));
            let rhs = node
                .child_by_field_name("right")
                .is_some_and(|r| is_single_ident(r, src, value));
            lhs && rhs
        }
        "func_literal" => {
            if func_literal_binds(node, src, value) {
                return false;
            }
            node.child_by_field_name("body")
                .is_some_and(|b| has_rebinding(b, src, value))
        }
        "block" => {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            for child in children {
                if has_rebinding(child, src, value) {
                    return true;
                }
                if declares_name(child, src, value) {
                    // Later `v := v` would rebind the shadower, not the
                    // loop variable.
                    return false;
                }
            }
            false
        }
        _ => {
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            children.into_iter().any(|c| has_rebinding(c, src, value))
        }
    }
}

fn is_single_ident(list: Node, src: &[u8], name: &str) -> bool {
    let mut cursor = list.walk();
    let items: Vec<Node> = list
        .named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect();
    items.len() == 1 && items[0].kind() == "identifier" && m::node_text(items[0], src) == name
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rewrite_str(src: &str) -> String {
        String::from_utf8(rewrite("x_test.go", src.as_bytes(), true).unwrap()).unwrap()
    }

    // -- Scope scanning ------------------------------------------------------

    #[test]
    fn scan_does_not_leak_subtest_compliance_upward() {
        // The only Parallel call lives inside the subtest; the function's
        // own scope must still be judged non-compliant and patched.
        let src = "package t\n\nimport \"testing\"\n\nfunc TestA(t *testing.T) {\n\tt.Run(\"1\", func(t *testing.T) {\n\t\tt.Parallel()\n\t})\n}\n";
        let out = rewrite_str(src);
        assert_eq!(
            out,
            "package t\n\nimport \"testing\"\n\nfunc TestA(t *testing.T) {\n\tt.Parallel()\n\tt.Run(\"1\", func(t *testing.T) {\n\t\tt.Parallel()\n\t})\n}\n"
        );
    }

    #[test]
    fn handle_names_are_not_hard_coded() {
        let src = "package t\n\nimport \"testing\"\n\nfunc TestA(tr *testing.T) {\n\ttr.Run(\"1\", func(x *testing.T) {\n\t\tfmt.Println(1)\n\t})\n}\n";
        let out = rewrite_str(src);
        assert!(out.contains("\ttr.Parallel()\n"), "function patch uses tr: {out}");
        assert!(out.contains("\t\tx.Parallel()\n"), "subtest patch uses x: {out}");
    }

    // -- Identity resolution -------------------------------------------------

    fn loop_body_of(src: &str) -> (tree_sitter::Tree, Vec<u8>) {
        let tree = GoParser::new().parse("x_test.go", src.as_bytes()).unwrap();
        (tree, src.as_bytes().to_vec())
    }

    fn find_for<'t>(node: Node<'t>) -> Option<Node<'t>> {
        if node.kind() == "for_statement" {
            return Some(node);
        }
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        children.into_iter().find_map(find_for)
    }

    #[test]
    fn rebinding_is_detected_by_identity() {
        let src = "package t\n\nfunc TestA(t *testing.T) {\n\tfor _, tc := range cases {\n\t\ttc := tc\n\t\tt.Run(tc.name, func(t *testing.T) {})\n\t}\n}\n";
        let (tree, bytes) = loop_body_of(src);
        let body = find_for(tree.root_node())
            .unwrap()
            .child_by_field_name("body")
            .unwrap();
        assert!(has_rebinding(body, &bytes, "tc"));
    }

    #[test]
    fn rebinding_of_a_shadower_does_not_count() {
        // The first declaration introduces a new `tc`; the following
        // `tc := tc` rebinds that one, not the loop variable.
        let src = "package t\n\nfunc TestA(t *testing.T) {\n\tfor _, tc := range cases {\n\t\ttc := other\n\t\ttc := tc\n\t}\n}\n";
        let (tree, bytes) = loop_body_of(src);
        let body = find_for(tree.root_node())
            .unwrap()
            .child_by_field_name("body")
            .unwrap();
        assert!(!has_rebinding(body, &bytes, "tc"));
    }

    #[test]
    fn reference_behind_callback_parameter_shadow_is_ignored() {
        // The callback's own parameter is named like the loop variable, so
        // uses inside the body are not captures of the loop variable.
        let src = "package t\n\nfunc TestA(t *testing.T) {\n\tfor _, tc := range cases {\n\t\tt.Run(\"n\", func(tc *testing.T) {\n\t\t\tfmt.Println(tc)\n\t\t})\n\t}\n}\n";
        let (tree, bytes) = loop_body_of(src);
        let for_stmt = find_for(tree.root_node()).unwrap();
        let mut launches = Vec::new();
        collect_launch_stmts(
            for_stmt.child_by_field_name("body").unwrap(),
            &bytes,
            "t",
            &mut launches,
        );
        assert_eq!(launches.len(), 1);
        let vars = LoopVars {
            key: None,
            value: Some("tc".to_string()),
        };
        assert!(!call_references_loop_var(launches[0], &bytes, &vars));
    }

    #[test]
    fn reference_in_run_name_argument_counts_as_capture() {
        let src = "package t\n\nfunc TestA(t *testing.T) {\n\tfor _, tc := range cases {\n\t\tt.Run(tc.name, func(x *testing.T) {})\n\t}\n}\n";
        let (tree, bytes) = loop_body_of(src);
        let for_stmt = find_for(tree.root_node()).unwrap();
        let mut launches = Vec::new();
        collect_launch_stmts(
            for_stmt.child_by_field_name("body").unwrap(),
            &bytes,
            "t",
            &mut launches,
        );
        let vars = LoopVars {
            key: None,
            value: Some("tc".to_string()),
        };
        assert!(call_references_loop_var(launches[0], &bytes, &vars));
    }

    // -- Error paths ---------------------------------------------------------

    #[test]
    fn parse_failure_is_reported_with_filename() {
        let err = rewrite("bad_test.go", b"package t\n\nfunc Test( {\n", true).unwrap_err();
        match err {
            ParagenError::Parse { file, .. } => assert_eq!(file, "bad_test.go"),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let err = rewrite("bad_test.go", &[0x80, 0xff, 0xfe], true).unwrap_err();
        assert!(matches!(err, ParagenError::Parse { .. }));
    }
}
