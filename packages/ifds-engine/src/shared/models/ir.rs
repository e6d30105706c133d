//! Instruction model
//!
//! A closed, three-address instruction set that every front-end lowers into.
//! Flow functions pattern-match on it directly; the engine itself only asks
//! for call expressions, assignment sides and branch operands.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::features::ifds::domain::access_path::{Accessor, AccessPath};

// ============================================================================
// Identifiers
// ============================================================================

/// Method handle inside one application graph
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Instruction handle: owning method plus position in its instruction list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId {
    pub method: MethodId,
    pub index: u32,
}

impl InstId {
    pub fn new(method: MethodId, index: u32) -> Self {
        Self { method, index }
    }
}

impl fmt::Display for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.method, self.index)
    }
}

// ============================================================================
// Classes, fields, methods
// ============================================================================

/// Reference to a declared field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    pub class_name: String,
    pub name: String,
}

impl FieldRef {
    pub fn new(class_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name, self.name)
    }
}

/// Field declaration with the modifiers the NPE seeds look at
///
/// `nullable = None` means "unknown", which is treated as possibly null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub nullable: Option<bool>,
}

impl Field {
    pub fn reference(&self, class_name: &str) -> FieldRef {
        FieldRef::new(class_name, self.name.clone())
    }
}

/// Formal parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub nullable: Option<bool>,
}

/// Method declaration; `insts` is empty for methods without a body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    pub id: MethodId,
    pub class_name: String,
    pub name: String,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub return_nullable: Option<bool>,
    #[serde(default)]
    pub insts: Vec<Inst>,
}

impl Method {
    /// `"Class#name"`, the form method matchers are written against
    pub fn signature(&self) -> String {
        format!("{}#{}", self.class_name, self.name)
    }

    /// `"Class.name"`, the form of known-nullable method lists
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.class_name, self.name)
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn has_body(&self) -> bool {
        !self.insts.is_empty()
    }

    /// Formal parameters as values, in declaration order
    pub fn formal_values(&self) -> Vec<Value> {
        self.params
            .iter()
            .enumerate()
            .map(|(index, p)| Value::Argument {
                index: index as u32,
                name: p.name.clone(),
            })
            .collect()
    }

    /// Package part of the declaring class name
    pub fn package(&self) -> &str {
        match self.class_name.rfind('.') {
            Some(pos) => &self.class_name[..pos],
            None => "",
        }
    }
}

// ============================================================================
// Values and expressions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    Null,
    Int(i64),
    Bool(bool),
    Str(String),
}

/// Immediate operand
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Local(String),
    This,
    Argument { index: u32, name: String },
    StaticField(FieldRef),
    InstanceField { instance: Box<Value>, field: FieldRef },
    ArrayAccess { array: Box<Value>, index: Box<Value> },
    Constant(Constant),
}

impl Value {
    pub fn local(name: impl Into<String>) -> Self {
        Value::Local(name.into())
    }

    pub fn field(instance: Value, field: FieldRef) -> Self {
        Value::InstanceField {
            instance: Box::new(instance),
            field,
        }
    }

    pub fn element(array: Value, index: Value) -> Self {
        Value::ArrayAccess {
            array: Box::new(array),
            index: Box::new(index),
        }
    }

    pub fn null() -> Self {
        Value::Constant(Constant::Null)
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(self, Value::Constant(Constant::Null))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Value::Local(_) | Value::Argument { .. } | Value::This)
    }

    /// Access path denoted by this value, if it denotes storage
    pub fn to_path(&self) -> Option<AccessPath> {
        match self {
            Value::Local(name) => Some(AccessPath::from_local(name.clone())),
            Value::This => Some(AccessPath::from_this()),
            Value::Argument { index, .. } => Some(AccessPath::from_argument(*index)),
            Value::StaticField(field) => Some(AccessPath::from_static_field(field.clone())),
            Value::InstanceField { instance, field } => instance
                .to_path()
                .map(|base| base.extend([Accessor::Field(field.clone())])),
            Value::ArrayAccess { array, .. } => {
                array.to_path().map(|base| base.extend([Accessor::Element]))
            }
            Value::Constant(_) => None,
        }
    }

    /// Direct sub-values
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Value::InstanceField { instance, .. } => vec![instance.as_ref()],
            Value::ArrayAccess { array, index } => vec![array.as_ref(), index.as_ref()],
            _ => Vec::new(),
        }
    }

    /// This value and every nested value, outermost first
    pub fn collect_values<'a>(&'a self, out: &mut Vec<&'a Value>) {
        out.push(self);
        for operand in self.operands() {
            operand.collect_values(out);
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local(name) => write!(f, "{}", name),
            Value::This => write!(f, "this"),
            Value::Argument { name, .. } => write!(f, "{}", name),
            Value::StaticField(field) => write!(f, "{}", field),
            Value::InstanceField { instance, field } => write!(f, "{}.{}", instance, field.name),
            Value::ArrayAccess { array, index } => write!(f, "{}[{}]", array, index),
            Value::Constant(Constant::Null) => write!(f, "null"),
            Value::Constant(Constant::Int(v)) => write!(f, "{}", v),
            Value::Constant(Constant::Bool(v)) => write!(f, "{}", v),
            Value::Constant(Constant::Str(v)) => write!(f, "{:?}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Static,
    Virtual,
    Special,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallExpr {
    /// Declared target
    pub callee: MethodId,
    pub kind: CallKind,
    #[serde(default)]
    pub instance: Option<Value>,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl CallExpr {
    pub fn static_call(callee: MethodId, args: Vec<Value>) -> Self {
        Self {
            callee,
            kind: CallKind::Static,
            instance: None,
            args,
        }
    }

    pub fn virtual_call(callee: MethodId, instance: Value, args: Vec<Value>) -> Self {
        Self {
            callee,
            kind: CallKind::Virtual,
            instance: Some(instance),
            args,
        }
    }

    /// Constructor or private-method invocation
    pub fn special_call(callee: MethodId, instance: Value, args: Vec<Value>) -> Self {
        Self {
            callee,
            kind: CallKind::Special,
            instance: Some(instance),
            args,
        }
    }

    pub fn is_instance_call(&self) -> bool {
        self.instance.is_some()
    }

    pub fn operands(&self) -> Vec<&Value> {
        self.instance.iter().chain(self.args.iter()).collect()
    }

    /// Receiver and arguments with all nested values
    pub fn values(&self) -> Vec<&Value> {
        let mut out = Vec::new();
        for operand in self.operands() {
            operand.collect_values(&mut out);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

/// Right-hand side of an assignment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Value(Value),
    Call(CallExpr),
    New {
        class_name: String,
    },
    NewArray {
        /// `Some(false)` only when the element type is known non-null
        #[serde(default)]
        element_nullable: Option<bool>,
        dimensions: u32,
        length: Value,
    },
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        operand: Value,
        target: String,
    },
    Length(Value),
}

impl Expr {
    pub fn as_call(&self) -> Option<&CallExpr> {
        match self {
            Expr::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Value(Value::Constant(_)))
    }

    /// Access path when the expression denotes storage (casts are transparent)
    pub fn to_path(&self) -> Option<AccessPath> {
        match self {
            Expr::Value(v) => v.to_path(),
            Expr::Cast { operand, .. } => operand.to_path(),
            _ => None,
        }
    }

    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Expr::Value(v) => vec![v],
            Expr::Call(call) => call.operands(),
            Expr::New { .. } => Vec::new(),
            Expr::NewArray { length, .. } => vec![length],
            Expr::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Expr::Cast { operand, .. } => vec![operand],
            Expr::Length(array) => vec![array],
        }
    }

    /// Operands with all nested values
    pub fn values(&self) -> Vec<&Value> {
        let mut out = Vec::new();
        for operand in self.operands() {
            operand.collect_values(&mut out);
        }
        out
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Value(value)
    }
}

// ============================================================================
// Instructions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub op: CmpOp,
    pub lhs: Value,
    pub rhs: Value,
}

impl Condition {
    pub fn operands(&self) -> Vec<&Value> {
        vec![&self.lhs, &self.rhs]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstKind {
    Assign {
        lhv: Value,
        rhv: Expr,
    },
    Call(CallExpr),
    If {
        condition: Condition,
        true_branch: u32,
        false_branch: u32,
    },
    Switch {
        key: Value,
        targets: Vec<u32>,
        default: u32,
    },
    Goto {
        target: u32,
    },
    Return(Option<Value>),
    Throw(Value),
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Inst {
    /// Assigned from the owning method and position when a graph is built
    #[serde(default)]
    pub id: InstId,
    pub kind: InstKind,
    #[serde(default)]
    pub line: Option<u32>,
}

impl Inst {
    pub fn new(id: InstId, kind: InstKind) -> Self {
        Self {
            id,
            kind,
            line: None,
        }
    }

    pub fn method(&self) -> MethodId {
        self.id.method
    }

    /// Call expression of a call or call-assignment instruction
    pub fn call_expr(&self) -> Option<&CallExpr> {
        match &self.kind {
            InstKind::Call(call) => Some(call),
            InstKind::Assign { rhv, .. } => rhv.as_call(),
            _ => None,
        }
    }

    pub fn is_assign(&self) -> bool {
        matches!(self.kind, InstKind::Assign { .. })
    }

    pub fn assign_parts(&self) -> Option<(&Value, &Expr)> {
        match &self.kind {
            InstKind::Assign { lhv, rhv } => Some((lhv, rhv)),
            _ => None,
        }
    }

    pub fn lhv(&self) -> Option<&Value> {
        self.assign_parts().map(|(lhv, _)| lhv)
    }

    pub fn is_if(&self) -> bool {
        matches!(self.kind, InstKind::If { .. })
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.kind, InstKind::Noop)
    }

    pub fn is_goto(&self) -> bool {
        matches!(self.kind, InstKind::Goto { .. })
    }

    /// `return` or `throw`
    pub fn is_terminating(&self) -> bool {
        matches!(self.kind, InstKind::Return(_) | InstKind::Throw(_))
    }

    pub fn return_value(&self) -> Option<&Value> {
        match &self.kind {
            InstKind::Return(value) => value.as_ref(),
            _ => None,
        }
    }

    /// Direct operands of the instruction
    pub fn operands(&self) -> Vec<&Value> {
        match &self.kind {
            InstKind::Assign { lhv, rhv } => {
                let mut out = vec![lhv];
                out.extend(rhv.operands());
                out
            }
            InstKind::Call(call) => call.operands(),
            InstKind::If { condition, .. } => condition.operands(),
            InstKind::Switch { key, .. } => vec![key],
            InstKind::Return(value) => value.iter().collect(),
            InstKind::Throw(value) => vec![value],
            InstKind::Goto { .. } | InstKind::Noop => Vec::new(),
        }
    }

    /// Every value mentioned by the instruction, nested ones included
    pub fn values(&self) -> Vec<&Value> {
        let mut out = Vec::new();
        for operand in self.operands() {
            operand.collect_values(&mut out);
        }
        out
    }

    /// Storage paths of [`Inst::values`]
    pub fn value_paths(&self) -> Vec<AccessPath> {
        self.values().into_iter().filter_map(Value::to_path).collect()
    }

    /// Intra-procedural successor indices implied by the instruction kind
    pub fn local_successors(&self, method_len: u32) -> Vec<u32> {
        let next = self.id.index + 1;
        let fall_through = if next < method_len { vec![next] } else { Vec::new() };
        match &self.kind {
            InstKind::Assign { .. } | InstKind::Call(_) | InstKind::Noop => fall_through,
            InstKind::If {
                true_branch,
                false_branch,
                ..
            } => {
                if true_branch == false_branch {
                    vec![*true_branch]
                } else {
                    vec![*true_branch, *false_branch]
                }
            }
            InstKind::Switch {
                targets, default, ..
            } => {
                let mut out: Vec<u32> = Vec::with_capacity(targets.len() + 1);
                for t in targets.iter().chain(std::iter::once(default)) {
                    if !out.contains(t) {
                        out.push(*t);
                    }
                }
                out
            }
            InstKind::Goto { target } => vec![*target],
            InstKind::Return(_) | InstKind::Throw(_) => Vec::new(),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render_call = |call: &CallExpr| {
            let args = call
                .args
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            match &call.instance {
                Some(instance) => format!("{}.{}({})", instance, call.callee, args),
                None => format!("{}({})", call.callee, args),
            }
        };
        match &self.kind {
            InstKind::Assign { lhv, rhv } => {
                let rhs = match rhv {
                    Expr::Value(v) => v.to_string(),
                    Expr::Call(call) => render_call(call),
                    Expr::New { class_name } => format!("new {}", class_name),
                    Expr::NewArray { length, .. } => format!("new [{}]", length),
                    Expr::Binary { lhs, rhs, .. } => format!("{} op {}", lhs, rhs),
                    Expr::Cast { operand, target } => format!("({}) {}", target, operand),
                    Expr::Length(array) => format!("{}.length", array),
                };
                write!(f, "{} = {}", lhv, rhs)
            }
            InstKind::Call(call) => write!(f, "{}", render_call(call)),
            InstKind::If {
                condition,
                true_branch,
                false_branch,
            } => write!(
                f,
                "if ({} {:?} {}) goto {} else {}",
                condition.lhs, condition.op, condition.rhs, true_branch, false_branch
            ),
            InstKind::Switch { key, .. } => write!(f, "switch ({})", key),
            InstKind::Goto { target } => write!(f, "goto {}", target),
            InstKind::Return(Some(v)) => write!(f, "return {}", v),
            InstKind::Return(None) => write!(f, "return"),
            InstKind::Throw(v) => write!(f, "throw {}", v),
            InstKind::Noop => write!(f, "noop"),
        }
    }
}
