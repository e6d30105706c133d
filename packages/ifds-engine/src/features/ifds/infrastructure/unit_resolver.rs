//! Partitioning of methods into analysis units

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::UnitStrategy;
use crate::shared::models::{ApplicationGraph, MethodId};

/// Independently schedulable slice of the program
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitId {
    Singleton,
    Method(MethodId),
    Class(String),
    Package(String),
    /// Method missing from the graph
    Unknown,
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::Singleton => write!(f, "singleton"),
            UnitId::Method(id) => write!(f, "method:{}", id),
            UnitId::Class(name) => write!(f, "class:{}", name),
            UnitId::Package(name) if name.is_empty() => write!(f, "package:<default>"),
            UnitId::Package(name) => write!(f, "package:{}", name),
            UnitId::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitResolver {
    strategy: UnitStrategy,
}

impl UnitResolver {
    pub fn new(strategy: UnitStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> UnitStrategy {
        self.strategy
    }

    pub fn resolve(&self, graph: &dyn ApplicationGraph, method: MethodId) -> UnitId {
        if self.strategy == UnitStrategy::Singleton {
            return UnitId::Singleton;
        }
        let Some(decl) = graph.method(method) else {
            return UnitId::Unknown;
        };
        match self.strategy {
            UnitStrategy::Singleton => UnitId::Singleton,
            UnitStrategy::Method => UnitId::Method(method),
            UnitStrategy::Class => UnitId::Class(decl.class_name.clone()),
            UnitStrategy::Package => UnitId::Package(decl.package().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ProgramBuilder;

    #[test]
    fn test_strategies() {
        let mut b = ProgramBuilder::new();
        let a = b.method("com.app.Service", "run").finish();
        let c = b.method("com.app.Repo", "load").finish();
        let graph = b.build().unwrap();

        let by_class = UnitResolver::new(UnitStrategy::Class);
        assert_ne!(by_class.resolve(&graph, a), by_class.resolve(&graph, c));

        let by_package = UnitResolver::new(UnitStrategy::Package);
        assert_eq!(by_package.resolve(&graph, a), UnitId::Package("com.app".into()));
        assert_eq!(by_package.resolve(&graph, a), by_package.resolve(&graph, c));

        let single = UnitResolver::new(UnitStrategy::Singleton);
        assert_eq!(single.resolve(&graph, MethodId(99)), UnitId::Singleton);

        let by_method = UnitResolver::new(UnitStrategy::Method);
        assert_eq!(by_method.resolve(&graph, MethodId(99)), UnitId::Unknown);
        assert_eq!(by_method.resolve(&graph, c).to_string(), "method:m1");
    }
}
