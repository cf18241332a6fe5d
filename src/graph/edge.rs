use std::fmt;

use super::node::NodeKind;

/// The five dependency kinds retained in an architecture DSM.
///
/// Declaration order is the tie-break order for edges sharing both endpoints.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub enum DepKind {
    /// File -> File.
    Import,
    /// Class -> Class.
    Extend,
    /// Method|Constructor -> Class.
    Create,
    /// Method|Constructor -> Method.
    Call,
    /// Method|Constructor -> Field, restricted to self-field access.
    Use,
}

impl DepKind {
    pub const ALL: [DepKind; 5] = [
        DepKind::Import,
        DepKind::Extend,
        DepKind::Create,
        DepKind::Call,
        DepKind::Use,
    ];

    /// Parse an extractor kind string. Anything outside the core five yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DepKind::Import => "Import",
            DepKind::Extend => "Extend",
            DepKind::Create => "Create",
            DepKind::Call => "Call",
            DepKind::Use => "Use",
        }
    }

    /// Whether `(source, target)` matches the required endpoint shape for this kind.
    ///
    /// The Use self-field constraint needs ownership information and is checked separately.
    pub fn accepts(self, source: NodeKind, target: NodeKind) -> bool {
        match self {
            DepKind::Import => source == NodeKind::File && target == NodeKind::File,
            DepKind::Extend => source == NodeKind::Class && target == NodeKind::Class,
            DepKind::Create => source.is_member_callable() && target == NodeKind::Class,
            DepKind::Call => source.is_member_callable() && target == NodeKind::Method,
            DepKind::Use => source.is_member_callable() && target == NodeKind::Field,
        }
    }
}

impl fmt::Display for DepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weight of a directed edge in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub kind: DepKind,
    /// 1-based line of the reference site, when the extractor reported one.
    pub line: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_non_core_kinds() {
        assert_eq!(DepKind::parse("Call"), Some(DepKind::Call));
        assert_eq!(DepKind::parse("Implement"), None);
        assert_eq!(DepKind::parse("call"), None, "kind names are case-sensitive");
    }

    #[test]
    fn test_shape_table() {
        use NodeKind::*;
        assert!(DepKind::Import.accepts(File, File));
        assert!(!DepKind::Import.accepts(Module, File));
        assert!(DepKind::Extend.accepts(Class, Class));
        assert!(DepKind::Create.accepts(Constructor, Class));
        assert!(!DepKind::Create.accepts(Function, Class));
        assert!(DepKind::Call.accepts(Method, Method));
        assert!(!DepKind::Call.accepts(Method, Constructor));
        assert!(DepKind::Use.accepts(Method, Field));
        assert!(!DepKind::Use.accepts(Method, Class), "type-use is not a Use edge");
    }
}
