//! Expression AST and reference analysis.

use std::fmt;

/// Parsed expression body.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    /// `base.field`
    Member(Box<Expr>, String),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : else`
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `name(args)` or `receiver.name(args)`; parsed for reference analysis,
    /// rejected by the built-in evaluator.
    Call {
        receiver: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Null => f.write_str("null"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Float(n) => write!(f, "{n}"),
            Expr::Str(s) => write!(f, "{s:?}"),
            Expr::Ident(name) => f.write_str(name),
            Expr::Member(base, field) => write!(f, "{base}.{field}"),
            Expr::Index(base, index) => write!(f, "{base}[{index}]"),
            Expr::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Expr::Unary(op, e) => {
                let sym = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                };
                write!(f, "{sym}{e}")
            }
            Expr::Binary(op, l, r) => {
                let sym = match op {
                    BinaryOp::Or => "||",
                    BinaryOp::And => "&&",
                    BinaryOp::Eq => "==",
                    BinaryOp::Ne => "!=",
                    BinaryOp::Lt => "<",
                    BinaryOp::Le => "<=",
                    BinaryOp::Gt => ">",
                    BinaryOp::Ge => ">=",
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Mod => "%",
                };
                write!(f, "{l} {sym} {r}")
            }
            Expr::Ternary(c, t, e) => write!(f, "{c} ? {t} : {e}"),
            Expr::Call {
                receiver,
                name,
                args,
            } => {
                if let Some(receiver) = receiver {
                    write!(f, "{receiver}.")?;
                }
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// One free variable of an expression: the root identifier plus the longest
/// statically-known member path below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: String,
    pub segments: Vec<RefSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefSegment {
    Field(String),
    Index(usize),
}

impl Reference {
    /// Rendered path, e.g. `db.status.addresses[0].host`.
    pub fn path(&self) -> String {
        let mut out = self.root.clone();
        for segment in &self.segments {
            match segment {
                RefSegment::Field(name) => {
                    out.push('.');
                    out.push_str(name);
                }
                RefSegment::Index(i) => {
                    out.push_str(&format!("[{i}]"));
                }
            }
        }
        out
    }
}

/// Collect the free variables of an expression, deduplicated by path, in
/// first-appearance order.
pub fn references(expr: &Expr) -> Vec<Reference> {
    let mut out: Vec<Reference> = Vec::new();
    collect(expr, &mut out);
    out
}

fn push_unique(out: &mut Vec<Reference>, reference: Reference) {
    if !out.contains(&reference) {
        out.push(reference);
    }
}

fn collect(expr: &Expr, out: &mut Vec<Reference>) {
    match expr {
        Expr::Ident(name) => push_unique(
            out,
            Reference {
                root: name.clone(),
                segments: Vec::new(),
            },
        ),
        Expr::Member(..) | Expr::Index(..) => {
            if let Some(reference) = chain(expr, out) {
                push_unique(out, reference);
            }
        }
        Expr::List(items) => {
            for item in items {
                collect(item, out);
            }
        }
        Expr::Unary(_, e) => collect(e, out),
        Expr::Binary(_, l, r) => {
            collect(l, out);
            collect(r, out);
        }
        Expr::Ternary(c, t, e) => {
            collect(c, out);
            collect(t, out);
            collect(e, out);
        }
        Expr::Call {
            receiver, args, ..
        } => {
            if let Some(receiver) = receiver {
                collect(receiver, out);
            }
            for arg in args {
                collect(arg, out);
            }
        }
        Expr::Null | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) => {}
    }
}

/// Fold a `Member`/`Index` chain rooted at an identifier into a reference.
/// A dynamic index truncates the path at that point; its own subexpression
/// is scanned for further references.
fn chain(expr: &Expr, out: &mut Vec<Reference>) -> Option<Reference> {
    match expr {
        Expr::Ident(name) => Some(Reference {
            root: name.clone(),
            segments: Vec::new(),
        }),
        Expr::Member(base, field) => {
            let mut reference = chain(base, out)?;
            reference.segments.push(RefSegment::Field(field.clone()));
            Some(reference)
        }
        Expr::Index(base, index) => {
            let reference = chain(base, out);
            match (reference, index.as_ref()) {
                (Some(mut r), Expr::Int(i)) if *i >= 0 => {
                    r.segments.push(RefSegment::Index(*i as usize));
                    Some(r)
                }
                (Some(mut r), Expr::Str(s)) => {
                    r.segments.push(RefSegment::Field(s.clone()));
                    Some(r)
                }
                (reference, _) => {
                    // Dynamic index: keep the base reference as-is and scan
                    // the index expression separately.
                    collect(index, out);
                    reference
                }
            }
        }
        other => {
            collect(other, out);
            None
        }
    }
}
