//! Tree-walking evaluator for the embedded language (C2).
//!
//! There's no teacher file to lift this from directly — `slumber_template`
//! only ever *evaluates a single expression* (`Expression::resolve`), never a
//! statement sequence — so the statement-walking shape here is this
//! implementation's own, built to the same error-propagation style
//! (`Result<_, RenderError>`, `?`) as the rest of the crate. Truthiness and
//! value semantics (`Value::to_bool`, `Display`) are reused verbatim from the
//! teacher's `Value`.

use super::ast::{BinOp, BoolOp, CompareOp, EscapeKind, Expr, Stmt, Target, UnaryOp};
use crate::error::{RenderError, ValueError};
use crate::Value;
use indexmap::IndexMap;
use std::fs;

/// A template-defined function: `def name(params): body`
#[derive(Clone, Debug)]
struct FunctionDef {
    params: Vec<String>,
    body: Vec<Stmt>,
}

/// Evaluates a compiled module body against a bound `args` map, per
/// SPEC_FULL.md §4.3.1. One `Interpreter` is used for exactly one render; it
/// is not re-entrant.
pub struct Interpreter {
    args: IndexMap<String, Value>,
    functions: IndexMap<String, FunctionDef>,
    scopes: Vec<IndexMap<String, Value>>,
}

impl Interpreter {
    pub fn new(args: IndexMap<String, Value>) -> Self {
        Self { args, functions: IndexMap::new(), scopes: vec![IndexMap::new()] }
    }

    /// Eagerly walk `body`, collecting yielded fragments. See SPEC_FULL.md
    /// §5.1 for why this is eager rather than a true generator.
    pub fn exec(&mut self, body: &[Stmt]) -> Vec<Result<String, RenderError>> {
        let mut out = Vec::new();
        if let Err(err) = self.exec_block(body, &mut out) {
            out.push(Err(err));
        }
        out
    }

    fn exec_block(
        &mut self,
        body: &[Stmt],
        out: &mut Vec<Result<String, RenderError>>,
    ) -> Result<(), RenderError> {
        for stmt in body {
            self.exec_stmt(stmt, out)?;
        }
        Ok(())
    }

    fn exec_stmt(
        &mut self,
        stmt: &Stmt,
        out: &mut Vec<Result<String, RenderError>>,
    ) -> Result<(), RenderError> {
        match stmt {
            Stmt::Pass => Ok(()),
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(())
            }
            Stmt::Yield(expr) => {
                let value = self.eval(expr)?;
                out.push(Ok(value.to_string()));
                Ok(())
            }
            Stmt::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)
            }
            Stmt::If { cond, body, orelse } => {
                if self.eval(cond)?.to_bool() {
                    self.exec_block(body, out)
                } else {
                    self.exec_block(orelse, out)
                }
            }
            Stmt::For { target, iter, body, orelse } => {
                let iter = self.eval(iter)?;
                let items = self.iterate(iter)?;
                if items.is_empty() {
                    return self.exec_block(orelse, out);
                }
                for item in items {
                    self.scope_mut().insert(target.clone(), item);
                    self.exec_block(body, out)?;
                }
                Ok(())
            }
            Stmt::While { cond, body, orelse } => {
                let mut ran = false;
                while self.eval(cond)?.to_bool() {
                    ran = true;
                    self.exec_block(body, out)?;
                }
                if ran {
                    Ok(())
                } else {
                    self.exec_block(orelse, out)
                }
            }
            Stmt::With { ctx, target, body } => {
                let value = self.eval(ctx)?;
                if let Some(name) = target {
                    self.scope_mut().insert(name.clone(), value);
                }
                self.exec_block(body, out)
            }
            Stmt::Try { body, handler, finally } => {
                let result = self.exec_block(body, out);
                if result.is_err() {
                    self.exec_block(handler, out)?;
                }
                self.exec_block(finally, out)?;
                Ok(())
            }
            Stmt::FunctionDef { name, params, body } => {
                self.functions.insert(
                    name.clone(),
                    FunctionDef { params: params.clone(), body: body.clone() },
                );
                Ok(())
            }
            Stmt::Import { module, alias } => {
                // No real module system; binds a placeholder so later name
                // lookups for the alias don't fail with NameUnknown. Only
                // `os` (for include freshness checks) has real behavior,
                // handled directly in `Expr::Call`/`Expr::Attribute`.
                let name = alias.clone().unwrap_or_else(|| module.clone());
                self.scope_mut().insert(name, Value::Null);
                Ok(())
            }
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), RenderError> {
        match target {
            Target::Name(name) => {
                self.scope_mut().insert(name.clone(), value);
                Ok(())
            }
            Target::Subscript { value: base, index } => {
                let index = self.eval(index)?;
                let mut container = self.eval(base)?;
                set_index(&mut container, &index, value)?;
                self.assign_expr(base, container)
            }
            Target::Attribute { value: base, attr } => {
                let mut container = self.eval(base)?;
                if let Value::Object(object) = &mut container {
                    object.insert(attr.clone(), value);
                } else {
                    return Err(ValueError::Type {
                        expected: "object",
                        actual: container.clone(),
                    }
                    .into());
                }
                self.assign_expr(base, container)
            }
        }
    }

    /// Write `value` back to wherever `expr` reads from, so that
    /// `a[0] = ...` / `a.b = ...` mutate `a` in place in its scope
    fn assign_expr(&mut self, expr: &Expr, value: Value) -> Result<(), RenderError> {
        match expr {
            Expr::Name(name) => {
                self.assign(&Target::Name(name.clone()), value)
            }
            Expr::Subscript { value: base, index } => {
                self.assign(&Target::Subscript { value: base.clone(), index: index.clone() }, value)
            }
            Expr::Attribute { value: base, attr } => {
                self.assign(&Target::Attribute { value: base.clone(), attr: attr.clone() }, value)
            }
            _ => Err(RenderError::Other(
                "cannot assign through a non-lvalue expression".into(),
            )),
        }
    }

    fn iterate(&self, value: Value) -> Result<Vec<Value>, RenderError> {
        match value {
            Value::Array(items) => Ok(items),
            Value::Object(object) => Ok(object.into_keys().map(Value::String).collect()),
            Value::String(s) => {
                Ok(s.chars().map(|c| Value::String(c.to_string())).collect())
            }
            other => Err(RenderError::NotIterable(other.type_name())),
        }
    }

    fn scope_mut(&mut self) -> &mut IndexMap<String, Value> {
        self.scopes.last_mut().expect("scope stack is never empty")
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => {
                if name == "args" {
                    return Ok(Value::Object(self.args.clone()));
                }
                self.lookup(name)
                    .cloned()
                    .ok_or_else(|| RenderError::NameUnknown { name: name.clone() })
            }
            Expr::List(items) => {
                let values =
                    items.iter().map(|item| self.eval(item)).collect::<Result<_, _>>()?;
                Ok(Value::Array(values))
            }
            Expr::Dict(entries) => {
                let mut object = IndexMap::new();
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    let key = key.as_str().map(str::to_owned).ok_or_else(|| {
                        ValueError::Type { expected: "string key", actual: key.clone() }
                    })?;
                    object.insert(key, self.eval(value)?);
                }
                Ok(Value::Object(object))
            }
            Expr::Attribute { value, attr } => self.eval_attribute(value, attr),
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                let index = self.eval(index)?;
                get_index(&container, &index)
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Boolean(!value.to_bool()),
                    UnaryOp::Negate => match value {
                        Value::Integer(i) => Value::Integer(-i),
                        Value::Float(f) => Value::Float(-f),
                        other => {
                            return Err(ValueError::Type {
                                expected: "number",
                                actual: other,
                            }
                            .into())
                        }
                    },
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                eval_binary(*op, left, right)
            }
            Expr::Compare { left, op, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                eval_compare(*op, &left, &right)
            }
            Expr::BoolOp { op, values } => {
                let mut result = Value::Boolean(matches!(op, BoolOp::And));
                for value in values {
                    result = self.eval(value)?;
                    let short_circuit = match op {
                        BoolOp::And => !result.to_bool(),
                        BoolOp::Or => result.to_bool(),
                    };
                    if short_circuit {
                        break;
                    }
                }
                Ok(result)
            }
            Expr::Join(inner) => {
                let value = self.eval(inner)?;
                Ok(Value::String(join_fragments(value)?))
            }
            Expr::Format { value, spec } => {
                let value = self.eval(value)?;
                Ok(Value::String(crate::format::printf(spec, &value)?))
            }
            Expr::Escape { value, kind } => {
                let value = self.eval(value)?;
                let s = value.to_string();
                Ok(Value::String(match kind {
                    EscapeKind::Quote => s.replace('"', "\\\""),
                    EscapeKind::Multiline => s.replace('\n', "\\\n"),
                }))
            }
        }
    }

    fn eval_attribute(&mut self, value: &Expr, attr: &str) -> Result<Value, RenderError> {
        // `os.path` is a synthetic namespace recognized only as the base of
        // an `os.path.getmtime(...)` call (see `eval_call`); reading it
        // standalone yields a null placeholder rather than an error.
        if matches!(value.name(), Some("os")) && attr == "path" {
            return Ok(Value::Null);
        }
        let container = self.eval(value)?;
        match &container {
            Value::Object(object) => object.get(attr).cloned().ok_or_else(|| {
                ValueError::NoSuchKey { key: attr.to_string(), actual: container.clone() }.into()
            }),
            other => Err(ValueError::Type { expected: "object", actual: other.clone() }.into()),
        }
    }

    fn eval_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, RenderError> {
        if is_os_path_getmtime(func) {
            let values = self.eval_args(args)?;
            let [path] = &values[..] else {
                return Err(RenderError::Other(
                    "os.path.getmtime() takes exactly one argument".into(),
                ));
            };
            return getmtime(path);
        }

        let Some(name) = func.name() else {
            return Err(RenderError::Other("call target must be a name".into()));
        };

        if let Some(result) = self.eval_builtin(name, args)? {
            return Ok(result);
        }

        let Some(function) = self.functions.get(name).cloned() else {
            return Err(RenderError::FunctionUnknown { name: name.to_string() });
        };
        self.call_function(&function, args, kwargs)
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, RenderError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    /// Host builtins (SPEC_FULL.md §4.3.1): `len`, `str`, `int`, `float`,
    /// `range`. Not subject to the rewriter's free-variable rebinding, and
    /// shadowed by nothing (template-defined functions of the same name are
    /// unreachable, matching Python builtin shadowing rules closely enough
    /// for this language's purposes).
    fn eval_builtin(&mut self, name: &str, args: &[Expr]) -> Result<Option<Value>, RenderError> {
        let values = self.eval_args(args)?;
        Ok(Some(match name {
            "len" => {
                let [value] = &values[..] else {
                    return Err(RenderError::Other("len() takes exactly one argument".into()));
                };
                let len = value.len().ok_or_else(|| ValueError::Type {
                    expected: "string, array, or object",
                    actual: value.clone(),
                })?;
                Value::Integer(len as i64)
            }
            "str" => {
                let [value] = &values[..] else {
                    return Err(RenderError::Other("str() takes exactly one argument".into()));
                };
                Value::String(value.to_string())
            }
            "int" => {
                let [value] = &values[..] else {
                    return Err(RenderError::Other("int() takes exactly one argument".into()));
                };
                Value::Integer(to_int(value)?)
            }
            "float" => {
                let [value] = &values[..] else {
                    return Err(RenderError::Other("float() takes exactly one argument".into()));
                };
                Value::Float(value.as_f64().or_else(|| {
                    value.as_str().and_then(|s| s.parse().ok())
                }).ok_or_else(|| ValueError::Type {
                    expected: "number or numeric string",
                    actual: value.clone(),
                })?)
            }
            "range" => Value::Array(range(&values)?.map(Value::Integer).collect()),
            _ => return Ok(None),
        }))
    }

    fn call_function(
        &mut self,
        function: &FunctionDef,
        args: &[Expr],
        kwargs: &[(String, Expr)],
    ) -> Result<Value, RenderError> {
        let positional = self.eval_args(args)?;
        let mut scope = IndexMap::new();
        for (param, value) in function.params.iter().zip(positional) {
            scope.insert(param.clone(), value);
        }
        for (name, expr) in kwargs {
            let value = self.eval(expr)?;
            scope.insert(name.clone(), value);
        }
        self.scopes.push(scope);
        let fragments = self.exec(&function.body);
        self.scopes.pop();

        let mut strings = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            strings.push(fragment?);
        }
        Ok(Value::Array(strings.into_iter().map(Value::String).collect()))
    }
}

fn is_os_path_getmtime(func: &Expr) -> bool {
    let Expr::Attribute { value, attr } = func else { return false };
    if attr != "getmtime" {
        return false;
    }
    let Expr::Attribute { value: base, attr: path_attr } = value.as_ref() else { return false };
    path_attr == "path" && matches!(base.name(), Some("os"))
}

fn getmtime(path: &Value) -> Result<Value, RenderError> {
    let path = path
        .as_str()
        .ok_or_else(|| ValueError::Type { expected: "string", actual: path.clone() })?;
    let metadata = fs::metadata(path).map_err(|source| RenderError::Io {
        path: path.into(),
        source,
    })?;
    let modified = metadata.modified().map_err(|source| RenderError::Io {
        path: path.into(),
        source,
    })?;
    let seconds = modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Float(seconds))
}

fn to_int(value: &Value) -> Result<i64, RenderError> {
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Float(f) => Ok(*f as i64),
        Value::Boolean(b) => Ok(i64::from(*b)),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ValueError::Type { expected: "numeric string", actual: value.clone() }.into()),
        other => Err(ValueError::Type { expected: "number or numeric string", actual: other.clone() }.into()),
    }
}

fn range(args: &[Value]) -> Result<impl Iterator<Item = i64>, RenderError> {
    let ints: Vec<i64> = args.iter().map(to_int).collect::<Result<_, _>>()?;
    let (start, stop, step) = match ints[..] {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step] => (start, stop, step),
        _ => return Err(RenderError::Other("range() takes 1 to 3 arguments".into())),
    };
    if step == 0 {
        return Err(RenderError::Other("range() step must not be zero".into()));
    }
    let len = if step > 0 {
        (stop - start).max(0) / step + i64::from((stop - start).max(0) % step != 0)
    } else {
        (start - stop).max(0) / (-step) + i64::from((start - stop).max(0) % (-step) != 0)
    };
    Ok((0..len).map(move |i| start + i * step))
}

/// `"".join(value)`: flattens a `Value::Array` of strings, or passes a
/// `Value::String` through, for macro/function result coercion (§4.5(c))
fn join_fragments(value: Value) -> Result<String, RenderError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Array(items) => {
            let mut out = String::new();
            for item in items {
                match item {
                    Value::String(s) => out.push_str(&s),
                    other => return Err(ValueError::Type { expected: "string", actual: other }.into()),
                }
            }
            Ok(out)
        }
        other => Err(ValueError::Type { expected: "string or array of strings", actual: other }.into()),
    }
}

fn eval_binary(op: BinOp, left: Value, right: Value) -> Result<Value, RenderError> {
    if op == BinOp::Add {
        if let (Value::String(a), Value::String(b)) = (&left, &right) {
            return Ok(Value::String(format!("{a}{b}")));
        }
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(ValueError::Type { expected: "number", actual: left }.into());
    };
    let both_int = matches!(left, Value::Integer(_)) && matches!(right, Value::Integer(_));
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(RenderError::DivideByZero);
            }
            a / b
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(RenderError::DivideByZero);
            }
            a.rem_euclid(b)
        }
    };
    Ok(if both_int && op != BinOp::Div {
        Value::Integer(result as i64)
    } else {
        Value::Float(result)
    })
}

fn eval_compare(op: CompareOp, left: &Value, right: &Value) -> Result<Value, RenderError> {
    let ordering_ok = |ord: Option<std::cmp::Ordering>, f: fn(std::cmp::Ordering) -> bool| {
        Value::Boolean(ord.is_some_and(f))
    };
    Ok(match op {
        CompareOp::Eq => Value::Boolean(left == right),
        CompareOp::Ne => Value::Boolean(left != right),
        CompareOp::Lt => ordering_ok(compare(left, right)?, std::cmp::Ordering::is_lt),
        CompareOp::Le => ordering_ok(compare(left, right)?, std::cmp::Ordering::is_le),
        CompareOp::Gt => ordering_ok(compare(left, right)?, std::cmp::Ordering::is_gt),
        CompareOp::Ge => ordering_ok(compare(left, right)?, std::cmp::Ordering::is_ge),
        CompareOp::In => Value::Boolean(contains(right, left)?),
        CompareOp::NotIn => Value::Boolean(!contains(right, left)?),
    })
}

fn compare(left: &Value, right: &Value) -> Result<Option<std::cmp::Ordering>, RenderError> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(a.partial_cmp(&b)),
        _ => match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
            _ => Err(ValueError::Type { expected: "comparable values", actual: left.clone() }.into()),
        },
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, RenderError> {
    match container {
        Value::Array(items) => Ok(items.contains(needle)),
        Value::String(s) => {
            let needle = needle
                .as_str()
                .ok_or_else(|| ValueError::Type { expected: "string", actual: needle.clone() })?;
            Ok(s.contains(needle))
        }
        Value::Object(object) => {
            let key = needle
                .as_str()
                .ok_or_else(|| ValueError::Type { expected: "string", actual: needle.clone() })?;
            Ok(object.contains_key(key))
        }
        other => Err(ValueError::Type { expected: "array, string, or object", actual: other.clone() }.into()),
    }
}

fn get_index(container: &Value, index: &Value) -> Result<Value, RenderError> {
    match container {
        Value::Array(items) => {
            let i = to_int(index)?;
            let len = items.len() as i64;
            let resolved = if i < 0 { i + len } else { i };
            usize::try_from(resolved)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| {
                    ValueError::IndexOutOfRange { index: i, actual: container.clone() }.into()
                })
        }
        Value::Object(object) => {
            let key = index
                .as_str()
                .ok_or_else(|| ValueError::Type { expected: "string", actual: index.clone() })?;
            object
                .get(key)
                .cloned()
                .ok_or_else(|| ValueError::NoSuchKey { key: key.to_string(), actual: container.clone() }.into())
        }
        Value::String(s) => {
            let i = to_int(index)?;
            let len = s.chars().count() as i64;
            let resolved = if i < 0 { i + len } else { i };
            usize::try_from(resolved)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .ok_or_else(|| ValueError::IndexOutOfRange { index: i, actual: container.clone() }.into())
        }
        other => Err(ValueError::Type { expected: "array, object, or string", actual: other.clone() }.into()),
    }
}

fn set_index(container: &mut Value, index: &Value, value: Value) -> Result<(), RenderError> {
    match container {
        Value::Array(items) => {
            let i = to_int(index)?;
            let len = items.len() as i64;
            let resolved = if i < 0 { i + len } else { i };
            let Some(slot) = usize::try_from(resolved).ok().and_then(|i| items.get_mut(i)) else {
                return Err(ValueError::IndexOutOfRange { index: i, actual: Value::Array(items.clone()) }.into());
            };
            *slot = value;
            Ok(())
        }
        Value::Object(object) => {
            let key = index
                .as_str()
                .ok_or_else(|| ValueError::Type { expected: "string", actual: index.clone() })?;
            object.insert(key.to_string(), value);
            Ok(())
        }
        other => Err(ValueError::Type { expected: "array or object", actual: other.clone() }.into()),
    }
}
