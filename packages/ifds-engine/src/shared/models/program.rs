//! In-memory program graph
//!
//! [`ProgramGraph`] is the reference [`ApplicationGraph`]: a set of methods in
//! the closed instruction model, indexed once for constant-time successor,
//! predecessor and callee queries. It is loaded from JSON by the CLI and built
//! with [`ProgramBuilder`] in tests.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::graph::ApplicationGraph;
use super::ir::{Field, Inst, InstId, InstKind, Method, MethodId, Param};
use crate::errors::{IfdsError, Result};

// ============================================================================
// Serialized form
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// Explicit call-graph edges for one call site (virtual dispatch targets)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTargets {
    pub inst: InstId,
    pub targets: Vec<MethodId>,
}

/// Serializable program description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramSpec {
    #[serde(default)]
    pub classes: Vec<ClassDecl>,
    pub methods: Vec<Method>,
    #[serde(default)]
    pub call_targets: Vec<CallTargets>,
}

// ============================================================================
// ProgramGraph
// ============================================================================

#[derive(Debug, Default)]
struct MethodCfg {
    entries: Vec<InstId>,
    exits: Vec<InstId>,
    successors: Vec<Vec<InstId>>,
    predecessors: Vec<Vec<InstId>>,
    callees: Vec<Vec<MethodId>>,
}

/// Indexed program
#[derive(Debug)]
pub struct ProgramGraph {
    methods: Vec<Method>,
    method_index: FxHashMap<MethodId, usize>,
    cfgs: Vec<MethodCfg>,
    classes: FxHashMap<String, Vec<Field>>,
    call_targets: Vec<CallTargets>,
}

impl ProgramGraph {
    /// Index a program description
    ///
    /// Instruction ids are normalized to `(method, position)`; branch targets
    /// outside the method body and duplicate method ids are rejected.
    pub fn from_spec(spec: ProgramSpec) -> Result<Self> {
        let ProgramSpec {
            classes,
            mut methods,
            call_targets,
        } = spec;

        let mut method_index = FxHashMap::default();
        for (pos, method) in methods.iter_mut().enumerate() {
            if method_index.insert(method.id, pos).is_some() {
                return Err(IfdsError::invalid_program(format!(
                    "duplicate method id {}",
                    method.id
                )));
            }
            for (index, inst) in method.insts.iter_mut().enumerate() {
                inst.id = InstId::new(method.id, index as u32);
            }
        }

        let mut overrides: FxHashMap<InstId, Vec<MethodId>> = FxHashMap::default();
        for entry in &call_targets {
            overrides
                .entry(entry.inst)
                .or_default()
                .extend(entry.targets.iter().copied());
        }

        let has_body = |id: &MethodId| {
            method_index
                .get(id)
                .map(|&pos| methods[pos].has_body())
                .unwrap_or(false)
        };

        let mut cfgs = Vec::with_capacity(methods.len());
        for method in &methods {
            let len = method.insts.len() as u32;
            let mut cfg = MethodCfg {
                successors: vec![Vec::new(); len as usize],
                predecessors: vec![Vec::new(); len as usize],
                callees: vec![Vec::new(); len as usize],
                ..MethodCfg::default()
            };
            if len > 0 {
                cfg.entries.push(InstId::new(method.id, 0));
            }

            for inst in &method.insts {
                let idx = inst.id.index as usize;
                for target in inst.local_successors(len) {
                    if target >= len {
                        return Err(IfdsError::invalid_program(format!(
                            "{} jumps to {} outside method {}",
                            inst.id,
                            target,
                            method.signature()
                        )));
                    }
                    let succ = InstId::new(method.id, target);
                    cfg.successors[idx].push(succ);
                    cfg.predecessors[target as usize].push(inst.id);
                }
                if inst.is_terminating() {
                    cfg.exits.push(inst.id);
                }
                if let Some(call) = inst.call_expr() {
                    let targets = overrides
                        .get(&inst.id)
                        .cloned()
                        .unwrap_or_else(|| vec![call.callee]);
                    let mut resolved: Vec<MethodId> =
                        targets.into_iter().filter(|t| has_body(t)).collect();
                    resolved.sort();
                    resolved.dedup();
                    cfg.callees[idx] = resolved;
                }
            }
            cfgs.push(cfg);
        }

        let classes = classes
            .into_iter()
            .map(|decl| (decl.name, decl.fields))
            .collect();

        Ok(Self {
            methods,
            method_index,
            cfgs,
            classes,
            call_targets,
        })
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let spec: ProgramSpec = serde_json::from_str(json)?;
        Self::from_spec(spec)
    }

    /// Back to the serializable form
    pub fn to_spec(&self) -> ProgramSpec {
        let mut classes: Vec<ClassDecl> = self
            .classes
            .iter()
            .map(|(name, fields)| ClassDecl {
                name: name.clone(),
                fields: fields.clone(),
            })
            .collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        ProgramSpec {
            classes,
            methods: self.methods.clone(),
            call_targets: self.call_targets.clone(),
        }
    }

    /// Find a method by `"Class#name"`
    pub fn find_method(&self, signature: &str) -> Option<MethodId> {
        self.methods
            .iter()
            .find(|m| m.signature() == signature)
            .map(|m| m.id)
    }

    fn cfg(&self, method: MethodId) -> Option<&MethodCfg> {
        self.method_index.get(&method).map(|&pos| &self.cfgs[pos])
    }
}

impl ApplicationGraph for ProgramGraph {
    fn method(&self, id: MethodId) -> Option<&Method> {
        self.method_index.get(&id).map(|&pos| &self.methods[pos])
    }

    fn inst(&self, id: InstId) -> Option<&Inst> {
        self.method(id.method)
            .and_then(|m| m.insts.get(id.index as usize))
    }

    fn methods(&self) -> Vec<MethodId> {
        self.methods.iter().map(|m| m.id).collect()
    }

    fn entry_points(&self, method: MethodId) -> &[InstId] {
        self.cfg(method).map(|c| c.entries.as_slice()).unwrap_or(&[])
    }

    fn exit_points(&self, method: MethodId) -> &[InstId] {
        self.cfg(method).map(|c| c.exits.as_slice()).unwrap_or(&[])
    }

    fn successors(&self, inst: InstId) -> &[InstId] {
        self.cfg(inst.method)
            .and_then(|c| c.successors.get(inst.index as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn predecessors(&self, inst: InstId) -> &[InstId] {
        self.cfg(inst.method)
            .and_then(|c| c.predecessors.get(inst.index as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn callees(&self, inst: InstId) -> &[MethodId] {
        self.cfg(inst.method)
            .and_then(|c| c.callees.get(inst.index as usize))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn fields_of(&self, class_name: &str) -> &[Field] {
        self.classes
            .get(class_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Incremental program construction
///
/// ```rust,ignore
/// let mut b = ProgramBuilder::new();
/// let source = b.method("Db", "read").static_method().finish();
/// let main = b
///     .method("Main", "run")
///     .static_method()
///     .body(vec![InstKind::Assign { lhv: Value::local("a"), rhv: Expr::Call(CallExpr::static_call(source, vec![])) }, InstKind::Return(None)])
///     .finish();
/// let graph = b.build()?;
/// ```
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    spec: ProgramSpec,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(&mut self, name: impl Into<String>, fields: Vec<Field>) -> &mut Self {
        self.spec.classes.push(ClassDecl {
            name: name.into(),
            fields,
        });
        self
    }

    /// Start a new method; its id is fixed immediately
    pub fn method(&mut self, class_name: impl Into<String>, name: impl Into<String>) -> MethodBuilder<'_> {
        let id = MethodId(self.spec.methods.len() as u32);
        self.spec.methods.push(Method {
            id,
            class_name: class_name.into(),
            name: name.into(),
            params: Vec::new(),
            is_static: false,
            return_nullable: None,
            insts: Vec::new(),
        });
        let index = self.spec.methods.len() - 1;
        MethodBuilder {
            program: self,
            index,
        }
    }

    /// Reopen a previously declared method, e.g. to add the body of a callee
    /// declared before its callers
    pub fn define(&mut self, id: MethodId) -> Option<MethodBuilder<'_>> {
        let index = self.spec.methods.iter().position(|m| m.id == id)?;
        Some(MethodBuilder {
            program: self,
            index,
        })
    }

    pub fn call_targets(&mut self, inst: InstId, targets: Vec<MethodId>) -> &mut Self {
        self.spec.call_targets.push(CallTargets { inst, targets });
        self
    }

    pub fn build(self) -> Result<ProgramGraph> {
        ProgramGraph::from_spec(self.spec)
    }

    pub fn into_spec(self) -> ProgramSpec {
        self.spec
    }
}

pub struct MethodBuilder<'a> {
    program: &'a mut ProgramBuilder,
    index: usize,
}

impl<'a> MethodBuilder<'a> {
    fn method_mut(&mut self) -> &mut Method {
        &mut self.program.spec.methods[self.index]
    }

    pub fn id(&self) -> MethodId {
        self.program.spec.methods[self.index].id
    }

    pub fn static_method(mut self) -> Self {
        self.method_mut().is_static = true;
        self
    }

    /// Parameters with unknown nullability
    pub fn params(mut self, names: &[&str]) -> Self {
        let params = names
            .iter()
            .map(|n| Param {
                name: n.to_string(),
                nullable: None,
            })
            .collect();
        self.method_mut().params = params;
        self
    }

    pub fn param(mut self, name: &str, nullable: Option<bool>) -> Self {
        self.method_mut().params.push(Param {
            name: name.to_string(),
            nullable,
        });
        self
    }

    pub fn returns_nullable(mut self, nullable: Option<bool>) -> Self {
        self.method_mut().return_nullable = nullable;
        self
    }

    pub fn body(mut self, kinds: Vec<InstKind>) -> Self {
        let id = self.id();
        self.method_mut().insts = kinds
            .into_iter()
            .enumerate()
            .map(|(index, kind)| Inst::new(InstId::new(id, index as u32), kind))
            .collect();
        self
    }

    pub fn finish(self) -> MethodId {
        self.id()
    }
}
