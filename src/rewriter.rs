//! Three-pass rewriter (C5): turns a parsed module's raw body into the
//! form the interpreter actually runs. Walks the tree once, depth-first,
//! applying yield-coercion, free-variable rebinding, and template-function
//! coercion together on the way back up out of each block (§4.5); include
//! expansion (pass (d)) happens inline during the same walk since a spliced
//! include body must itself be rewritten before its siblings are.

use crate::error::FormatError;
use crate::include;
use crate::lang::{Expr, Stmt, Target};
use std::collections::HashSet;
use std::path::Path;

/// Names available unconditionally, exempt from free-variable rebinding
/// (§4.3.1, §4.5(b)).
const HOST_BUILTINS: &[&str] = &["len", "str", "int", "float", "range", "os"];

/// Reserved identifiers preloaded into `seen_store` (§4.5(b))
const RESERVED: &[&str] = &["args", "ResourceModified", "None", "True", "False"];

/// A module after rewriting: its body plus the freshness checks its
/// `include`s accumulated (§4.6, §4.7), to be run before the body itself.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledModule {
    pub preamble: Vec<Expr>,
    pub body: Vec<Stmt>,
}

/// Rewrite a freshly-parsed module's body in place. `root` is the base
/// directory relative includes without an explicit root resolve against.
pub fn rewrite(body: Vec<Stmt>, root: &Path) -> Result<CompiledModule, FormatError> {
    let mut rewriter = Rewriter::new(root);
    let body = rewriter.rewrite_block(body)?;
    Ok(CompiledModule { preamble: rewriter.preamble, body })
}

struct Rewriter<'a> {
    seen_store: HashSet<String>,
    seen_funcs: HashSet<String>,
    preamble: Vec<Expr>,
    root: &'a Path,
}

impl<'a> Rewriter<'a> {
    fn new(root: &'a Path) -> Self {
        Self {
            seen_store: RESERVED.iter().map(|s| (*s).to_string()).collect(),
            seen_funcs: HashSet::new(),
            preamble: Vec::new(),
            root,
        }
    }

    /// Rewrite a statement list: expand includes, recurse into nested
    /// blocks, then apply yield-coercion to the statements now in hand.
    fn rewrite_block(&mut self, stmts: Vec<Stmt>) -> Result<Vec<Stmt>, FormatError> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            if let Some((args, kwargs)) = as_include_call(&stmt) {
                let (freshness, included_body) = include::resolve(&args, &kwargs, self.root)?;
                self.preamble.push(freshness);
                let rewritten = self.rewrite_block(included_body)?;
                out.extend(rewritten);
                continue;
            }
            out.push(self.rewrite_stmt(stmt)?);
        }
        Ok(out.into_iter().map(|stmt| self.coerce_yield(stmt)).collect())
    }

    /// Pass (a): wrap a bare expression statement (that isn't itself an
    /// include, already stripped by `rewrite_block`) in a `yield`.
    fn coerce_yield(&self, stmt: Stmt) -> Stmt {
        match stmt {
            Stmt::Expr(expr) => Stmt::Yield(self.coerce_call(expr)),
            other => other,
        }
    }

    /// Pass (c): a call to a template-defined function in yield position is
    /// wrapped so it can act as either a macro or a value-returning call.
    fn coerce_call(&self, expr: Expr) -> Expr {
        if let Expr::Call { func, .. } = &expr {
            if let Expr::Name(name) = func.as_ref() {
                if self.seen_funcs.contains(name) {
                    return Expr::Join(Box::new(expr));
                }
            }
        }
        expr
    }

    fn rewrite_stmt(&mut self, stmt: Stmt) -> Result<Stmt, FormatError> {
        Ok(match stmt {
            Stmt::Expr(expr) => Stmt::Expr(self.rewrite_expr(expr)),
            Stmt::Yield(expr) => Stmt::Yield(self.rewrite_expr(expr)),
            Stmt::Assign { target, value } => {
                let value = self.rewrite_expr(value);
                let target = self.rewrite_target(target);
                Stmt::Assign { target, value }
            }
            Stmt::If { cond, body, orelse } => {
                let cond = self.rewrite_expr(cond);
                let body = self.rewrite_block(body)?;
                let orelse = self.rewrite_block(orelse)?;
                Stmt::If { cond, body, orelse }
            }
            Stmt::For { target, iter, body, orelse } => {
                let iter = self.rewrite_expr(iter);
                self.seen_store.insert(target.clone());
                let body = self.rewrite_block(body)?;
                let orelse = self.rewrite_block(orelse)?;
                Stmt::For { target, iter, body, orelse }
            }
            Stmt::While { cond, body, orelse } => {
                let cond = self.rewrite_expr(cond);
                let body = self.rewrite_block(body)?;
                let orelse = self.rewrite_block(orelse)?;
                Stmt::While { cond, body, orelse }
            }
            Stmt::With { ctx, target, body } => {
                let ctx = self.rewrite_expr(ctx);
                if let Some(name) = &target {
                    self.seen_store.insert(name.clone());
                }
                let body = self.rewrite_block(body)?;
                Stmt::With { ctx, target, body }
            }
            Stmt::Try { body, handler, finally } => {
                let body = self.rewrite_block(body)?;
                let handler = self.rewrite_block(handler)?;
                let finally = self.rewrite_block(finally)?;
                Stmt::Try { body, handler, finally }
            }
            Stmt::FunctionDef { name, params, body } => {
                self.seen_funcs.insert(name.clone());
                self.seen_store.insert(name.clone());
                for param in &params {
                    self.seen_store.insert(param.clone());
                }
                let body = self.rewrite_block(body)?;
                Stmt::FunctionDef { name, params, body }
            }
            Stmt::Import { module, alias } => {
                self.seen_store.insert(alias.clone().unwrap_or_else(|| module.clone()));
                Stmt::Import { module, alias }
            }
            Stmt::Pass => Stmt::Pass,
        })
    }

    fn rewrite_target(&mut self, target: Target) -> Target {
        match target {
            Target::Name(name) => {
                self.seen_store.insert(name.clone());
                Target::Name(name)
            }
            Target::Subscript { value, index } => Target::Subscript {
                value: Box::new(self.rewrite_expr(*value)),
                index: Box::new(self.rewrite_expr(*index)),
            },
            Target::Attribute { value, attr } => {
                Target::Attribute { value: Box::new(self.rewrite_expr(*value)), attr }
            }
        }
    }

    /// Pass (b): rebind every free name to `args[<name>]`.
    fn rewrite_expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Name(name) => {
                if self.seen_store.contains(&name)
                    || self.seen_funcs.contains(&name)
                    || HOST_BUILTINS.contains(&name.as_str())
                    || name == "include"
                {
                    Expr::Name(name)
                } else {
                    Expr::Subscript {
                        value: Box::new(Expr::Name("args".to_string())),
                        index: Box::new(Expr::Literal(crate::Value::String(name))),
                    }
                }
            }
            Expr::Literal(value) => Expr::Literal(value),
            Expr::List(items) => {
                Expr::List(items.into_iter().map(|item| self.rewrite_expr(item)).collect())
            }
            Expr::Dict(entries) => Expr::Dict(
                entries
                    .into_iter()
                    .map(|(k, v)| (self.rewrite_expr(k), self.rewrite_expr(v)))
                    .collect(),
            ),
            Expr::Attribute { value, attr } => {
                Expr::Attribute { value: Box::new(self.rewrite_expr(*value)), attr }
            }
            Expr::Subscript { value, index } => Expr::Subscript {
                value: Box::new(self.rewrite_expr(*value)),
                index: Box::new(self.rewrite_expr(*index)),
            },
            Expr::Call { func, args, kwargs } => {
                let func = Box::new(self.rewrite_expr(*func));
                let args = args.into_iter().map(|arg| self.rewrite_expr(arg)).collect();
                let kwargs = kwargs
                    .into_iter()
                    .map(|(name, value)| (name, self.rewrite_expr(value)))
                    .collect();
                Expr::Call { func, args, kwargs }
            }
            Expr::Unary { op, operand } => {
                Expr::Unary { op, operand: Box::new(self.rewrite_expr(*operand)) }
            }
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(self.rewrite_expr(*left)),
                right: Box::new(self.rewrite_expr(*right)),
            },
            Expr::Compare { left, op, right } => Expr::Compare {
                left: Box::new(self.rewrite_expr(*left)),
                op,
                right: Box::new(self.rewrite_expr(*right)),
            },
            Expr::BoolOp { op, values } => {
                Expr::BoolOp { op, values: values.into_iter().map(|v| self.rewrite_expr(v)).collect() }
            }
            Expr::Join(inner) => Expr::Join(Box::new(self.rewrite_expr(*inner))),
            Expr::Format { value, spec } => {
                Expr::Format { value: Box::new(self.rewrite_expr(*value)), spec }
            }
            Expr::Escape { value, kind } => {
                Expr::Escape { value: Box::new(self.rewrite_expr(*value)), kind }
            }
        }
    }
}

type CallArgs = (Vec<Expr>, Vec<(String, Expr)>);

/// Recognize `include(...)` used as a bare statement, extracting its
/// arguments before they get rebound by pass (b) — `include` is exempted
/// from rebinding, but its literal-string arguments must be seen as-is.
fn as_include_call(stmt: &Stmt) -> Option<CallArgs> {
    let Stmt::Expr(Expr::Call { func, args, kwargs }) = stmt else { return None };
    let Expr::Name(name) = func.as_ref() else { return None };
    if name != "include" {
        return None;
    }
    Some((args.clone(), kwargs.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{BinOp, CompareOp};
    use crate::Value;

    fn name(s: &str) -> Expr {
        Expr::Name(s.to_string())
    }

    fn arg_lookup(s: &str) -> Expr {
        Expr::Subscript {
            value: Box::new(Expr::Name("args".into())),
            index: Box::new(Expr::Literal(Value::String(s.into()))),
        }
    }

    #[test]
    fn test_bare_expr_becomes_yield() {
        let body = vec![Stmt::Expr(name("x"))];
        let out = rewrite(body, Path::new(".")).unwrap();
        assert_eq!(out.body, vec![Stmt::Yield(arg_lookup("x"))]);
    }

    #[test]
    fn test_free_name_rebound_to_args() {
        let body = vec![Stmt::Yield(name("greeting"))];
        let out = rewrite(body, Path::new(".")).unwrap();
        assert_eq!(out.body, vec![Stmt::Yield(arg_lookup("greeting"))]);
    }

    #[test]
    fn test_assigned_name_not_rebound() {
        let body = vec![
            Stmt::Assign { target: Target::Name("x".into()), value: Expr::Literal(Value::Integer(1)) },
            Stmt::Yield(name("x")),
        ];
        let out = rewrite(body, Path::new(".")).unwrap();
        assert_eq!(
            out.body,
            vec![
                Stmt::Assign { target: Target::Name("x".into()), value: Expr::Literal(Value::Integer(1)) },
                Stmt::Yield(name("x")),
            ]
        );
    }

    #[test]
    fn test_host_builtin_not_rebound() {
        let body = vec![Stmt::Yield(Expr::Call {
            func: Box::new(name("len")),
            args: vec![name("items")],
            kwargs: Vec::new(),
        })];
        let out = rewrite(body, Path::new(".")).unwrap();
        assert_eq!(
            out.body,
            vec![Stmt::Yield(Expr::Call {
                func: Box::new(name("len")),
                args: vec![arg_lookup("items")],
                kwargs: Vec::new(),
            })]
        );
    }

    #[test]
    fn test_template_function_call_wrapped_in_join() {
        let body = vec![
            Stmt::FunctionDef { name: "greet".into(), params: vec![], body: vec![Stmt::Yield(Expr::Literal(Value::String("hi".into())))] },
            Stmt::Expr(Expr::Call { func: Box::new(name("greet")), args: vec![], kwargs: vec![] }),
        ];
        let out = rewrite(body, Path::new(".")).unwrap();
        let Stmt::Yield(Expr::Join(inner)) = &out.body[1] else {
            panic!("expected join-wrapped yield, got {:?}", out.body[1]);
        };
        assert!(matches!(**inner, Expr::Call { .. }));
    }

    #[test]
    fn test_for_loop_target_not_rebound_inside_body() {
        let body = vec![Stmt::For {
            target: "item".into(),
            iter: name("items"),
            body: vec![Stmt::Yield(name("item"))],
            orelse: vec![],
        }];
        let out = rewrite(body, Path::new(".")).unwrap();
        let Stmt::For { body: inner, iter, .. } = &out.body[0] else { panic!("expected for") };
        assert_eq!(iter, &arg_lookup("items"));
        assert_eq!(inner, &vec![Stmt::Yield(name("item"))]);
    }

    #[test]
    fn test_nested_compare_expr_rebound() {
        let body = vec![Stmt::If {
            cond: Expr::Compare { left: Box::new(name("x")), op: CompareOp::Gt, right: Box::new(Expr::Literal(Value::Integer(0))) },
            body: vec![],
            orelse: vec![],
        }];
        let out = rewrite(body, Path::new(".")).unwrap();
        let Stmt::If { cond, .. } = &out.body[0] else { panic!("expected if") };
        assert_eq!(
            cond,
            &Expr::Compare { left: Box::new(arg_lookup("x")), op: CompareOp::Gt, right: Box::new(Expr::Literal(Value::Integer(0))) }
        );
    }

    #[test]
    fn test_binary_expr_both_sides_rebound() {
        let body = vec![Stmt::Yield(Expr::Binary { op: BinOp::Add, left: Box::new(name("a")), right: Box::new(name("b")) })];
        let out = rewrite(body, Path::new(".")).unwrap();
        assert_eq!(
            out.body,
            vec![Stmt::Yield(Expr::Binary { op: BinOp::Add, left: Box::new(arg_lookup("a")), right: Box::new(arg_lookup("b")) })]
        );
    }

    #[test]
    fn test_include_splices_body_and_records_preamble() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("partial.txt"), "static").unwrap();

        let body = vec![Stmt::Expr(Expr::Call {
            func: Box::new(name("include")),
            args: vec![Expr::Literal(Value::String("partial.txt".into()))],
            kwargs: vec![],
        })];
        let out = rewrite(body, dir.path()).unwrap();
        assert_eq!(out.preamble.len(), 1);
        assert_eq!(out.body, vec![Stmt::Yield(Expr::Literal(Value::String("static".into())))]);
    }

    #[test]
    fn test_import_alias_not_rebound() {
        let body = vec![
            Stmt::Import { module: "os".into(), alias: Some("o".into()) },
            Stmt::Yield(name("o")),
        ];
        let out = rewrite(body, Path::new(".")).unwrap();
        assert_eq!(out.body[1], Stmt::Yield(name("o")));
    }
}
