//! Static analysis of undefined names
//!
//! Two questions are answered here without rendering: which top-level names
//! a template reads without defining them ([`find_candidates`]), and where in
//! the source a given undefined name is used ([`locate`]).

use crate::error::TemplaterError;
use minijinja::machinery::{self, ast, WhitespaceConfig};
use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, Error, Template};
use std::collections::BTreeSet;

/// Globals minijinja provides itself; never seeded with placeholders
const ENGINE_GLOBALS: &[&str] = &[
    "range", "dict", "debug", "namespace", "lipsum", "cycler", "joiner", "loop", "caller", "self",
    "varargs", "kwargs",
];

/// Names `source` reads without defining
pub fn find_candidates(env: &Environment<'_>, source: &str) -> Result<BTreeSet<String>, TemplaterError> {
    let template = env
        .template_from_str(source)
        .map_err(|e| TemplaterError::from_syntax_error(&e, "Failure to parse jinja template", None, Some(source)))?;
    Ok(undeclared_names(&template))
}

/// Undeclared top-level names of a compiled template
pub fn undeclared_names(template: &Template<'_, '_>) -> BTreeSet<String> {
    template
        .undeclared_variables(false)
        .into_iter()
        .filter(|name| !ENGINE_GLOBALS.contains(&name.as_str()))
        .collect()
}

/// Parse `source` into a syntax tree
pub fn parse(source: &str) -> Result<ast::Stmt<'_>, Error> {
    parse_named(source, "<template>")
}

pub(crate) fn parse_named<'s>(source: &'s str, name: &'s str) -> Result<ast::Stmt<'s>, Error> {
    let whitespace = WhitespaceConfig {
        keep_trailing_newline: true,
        ..Default::default()
    };
    machinery::parse(source, name, SyntaxConfig, whitespace)
}

/// Locate every use of `names` in `tree`
///
/// The walk is depth-first and post-order, so errors come out in evaluation
/// order. The column is the first occurrence of the name on the reported
/// line.
pub fn locate(tree: &ast::Stmt<'_>, names: &BTreeSet<String>, source: &str) -> Vec<TemplaterError> {
    let mut locator = UndefinedLocator {
        names,
        lines: source.split('\n').collect(),
        found: Vec::new(),
    };
    locator.visit_stmt(tree);
    locator.found
}

struct UndefinedLocator<'a> {
    names: &'a BTreeSet<String>,
    lines: Vec<&'a str>,
    found: Vec<TemplaterError>,
}

impl UndefinedLocator<'_> {
    fn visit_stmts(&mut self, stmts: &[ast::Stmt<'_>]) {
        for stmt in stmts {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &ast::Stmt<'_>) {
        match stmt {
            ast::Stmt::Template(template) => self.visit_stmts(&template.children),
            ast::Stmt::EmitExpr(emit) => self.visit_expr(&emit.expr),
            ast::Stmt::ForLoop(for_loop) => {
                self.visit_expr(&for_loop.iter);
                if let Some(filter) = &for_loop.filter_expr {
                    self.visit_expr(filter);
                }
                self.visit_stmts(&for_loop.body);
                self.visit_stmts(&for_loop.else_body);
            }
            ast::Stmt::IfCond(if_cond) => {
                self.visit_expr(&if_cond.expr);
                self.visit_stmts(&if_cond.true_body);
                self.visit_stmts(&if_cond.false_body);
            }
            ast::Stmt::WithBlock(with_block) => {
                for (_, value) in &with_block.assignments {
                    self.visit_expr(value);
                }
                self.visit_stmts(&with_block.body);
            }
            ast::Stmt::Set(set) => self.visit_expr(&set.expr),
            ast::Stmt::SetBlock(set_block) => self.visit_stmts(&set_block.body),
            ast::Stmt::AutoEscape(auto_escape) => self.visit_stmts(&auto_escape.body),
            ast::Stmt::FilterBlock(filter_block) => self.visit_stmts(&filter_block.body),
            ast::Stmt::Block(block) => self.visit_stmts(&block.body),
            ast::Stmt::Include(include) => self.visit_expr(&include.name),
            ast::Stmt::Import(import) => self.visit_expr(&import.expr),
            ast::Stmt::FromImport(from_import) => self.visit_expr(&from_import.expr),
            ast::Stmt::Extends(extends) => self.visit_expr(&extends.name),
            ast::Stmt::Macro(macro_stmt) => {
                self.visit_exprs(&macro_stmt.defaults);
                self.visit_stmts(&macro_stmt.body);
            }
            ast::Stmt::CallBlock(call_block) => {
                self.visit_call(&call_block.call);
                self.visit_stmts(&call_block.macro_decl.body);
            }
            ast::Stmt::Do(do_stmt) => self.visit_call(&do_stmt.call),
            _ => {}
        }
    }

    fn visit_exprs(&mut self, exprs: &[ast::Expr<'_>]) {
        for expr in exprs {
            self.visit_expr(expr);
        }
    }

    fn visit_call(&mut self, call: &ast::Call<'_>) {
        self.visit_expr(&call.expr);
        self.visit_args(&call.args);
    }

    fn visit_args(&mut self, args: &[ast::CallArg<'_>]) {
        for arg in args {
            match arg {
                ast::CallArg::Pos(expr)
                | ast::CallArg::Kwarg(_, expr)
                | ast::CallArg::PosSplat(expr)
                | ast::CallArg::KwargSplat(expr) => self.visit_expr(expr),
            }
        }
    }

    fn visit_expr(&mut self, expr: &ast::Expr<'_>) {
        match expr {
            ast::Expr::Var(var) => {
                if self.names.contains(var.id) {
                    self.record(var.id, var.span().start_line as usize);
                }
            }
            ast::Expr::GetAttr(attr) => self.visit_expr(&attr.expr),
            ast::Expr::GetItem(item) => {
                self.visit_expr(&item.expr);
                self.visit_expr(&item.subscript_expr);
            }
            ast::Expr::Slice(slice) => {
                self.visit_expr(&slice.expr);
                for part in [&slice.start, &slice.stop, &slice.step].into_iter().flatten() {
                    self.visit_expr(part);
                }
            }
            ast::Expr::UnaryOp(op) => self.visit_expr(&op.expr),
            ast::Expr::BinOp(op) => {
                self.visit_expr(&op.left);
                self.visit_expr(&op.right);
            }
            ast::Expr::IfExpr(if_expr) => {
                self.visit_expr(&if_expr.test_expr);
                self.visit_expr(&if_expr.true_expr);
                if let Some(false_expr) = &if_expr.false_expr {
                    self.visit_expr(false_expr);
                }
            }
            ast::Expr::Filter(filter) => {
                if let Some(inner) = &filter.expr {
                    self.visit_expr(inner);
                }
                self.visit_args(&filter.args);
            }
            ast::Expr::Test(test) => {
                self.visit_expr(&test.expr);
                self.visit_args(&test.args);
            }
            ast::Expr::Call(call) => self.visit_call(call),
            ast::Expr::List(list) => self.visit_exprs(&list.items),
            ast::Expr::Map(map) => {
                self.visit_exprs(&map.keys);
                self.visit_exprs(&map.values);
            }
            _ => {}
        }
    }

    fn record(&mut self, name: &str, line: usize) {
        let line = line.max(1);
        let column = self
            .lines
            .get(line - 1)
            .and_then(|text| text.find(name))
            .map_or(1, |idx| idx + 1);
        tracing::debug!(name, line, column, "located undefined variable");
        self.found.push(TemplaterError::UndefinedVariable {
            name: name.to_string(),
            line,
            column,
        });
    }
}
