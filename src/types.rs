use serde::{Deserialize, Serialize};

/// Node label for source files.
pub const LABEL_FILE: &str = "File";
/// Node label for top-level function declarations.
pub const LABEL_FUNCTION: &str = "Function";
/// Relationship type for file-to-file imports.
pub const REL_IMPORTS_FROM: &str = "IMPORTS_FROM";
/// Relationship type for resolved function calls.
pub const REL_CALLS: &str = "CALLS";

/// One imported symbol: `import { clause } from '<resolved_source>'`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImportRecord {
    pub clause: String,
    pub resolved_source: String,
}

/// A top-level function declaration with the bare identifiers it calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDecl {
    pub name: String,
    pub body: String,
    /// Distinct callee names from direct identifier calls, sorted.
    pub callees: Vec<String>,
}

/// Identity of a Function node: `(name, path)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    pub name: String,
    pub path: String,
}

impl FunctionKey {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl std::fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.path, self.name)
    }
}

/// Kind of graph element, used as the prefix of an element id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    File,
    Function,
    ImportsFrom,
    Calls,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Function => "function",
            Self::ImportsFrom => "imports_from",
            Self::Calls => "calls",
        }
    }
}

impl std::str::FromStr for ElementKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "function" => Ok(Self::Function),
            "imports_from" => Ok(Self::ImportsFrom),
            "calls" => Ok(Self::Calls),
            _ => Err(anyhow::anyhow!("unknown element kind: '{s}'")),
        }
    }
}

impl std::fmt::Display for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build an element id from its components: `kind:rowid`
pub fn element_id(kind: ElementKind, rowid: i64) -> String {
    format!("{kind}:{rowid}")
}

/// Split an element id back into kind and rowid.
pub fn parse_element_id(id: &str) -> Option<(ElementKind, i64)> {
    let (kind, rowid) = id.split_once(':')?;
    Some((kind.parse().ok()?, rowid.parse().ok()?))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub element_id: String,
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl GraphNode {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// String property lookup.
    pub fn prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelationship {
    pub element_id: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A single column value in a query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GraphValue {
    Node(GraphNode),
    Relationship(GraphRelationship),
    List(Vec<GraphValue>),
    Scalar(serde_json::Value),
}

/// One result row: ordered `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    pub fields: Vec<(String, GraphValue)>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&GraphValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn values(&self) -> impl Iterator<Item = &GraphValue> {
        self.fields.iter().map(|(_, v)| v)
    }
}

/// Unique nodes and relationships, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Subgraph {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphRelationship>,
}

impl Subgraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

/// Enrichment side-store entry for one Function node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionRecord {
    /// Element id of the Function node.
    pub id: String,
    pub name: String,
    pub path: String,
    pub raw_text: Option<String>,
    pub summary: String,
    pub body_hash: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

/// Which path a natural-language query is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    Vector,
    Graph,
}

impl RouteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Graph => "graph",
        }
    }
}

impl std::str::FromStr for RouteDecision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "vector" => Ok(Self::Vector),
            "graph" => Ok(Self::Graph),
            _ => Err(anyhow::anyhow!("unknown route decision: '{s}'")),
        }
    }
}

impl std::fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub decision: RouteDecision,
    pub rationale: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_id_parses_back() {
        let id = element_id(ElementKind::ImportsFrom, 42);
        assert_eq!(id, "imports_from:42");
        assert_eq!(parse_element_id(&id), Some((ElementKind::ImportsFrom, 42)));
    }

    #[test]
    fn malformed_element_ids_are_rejected() {
        assert_eq!(parse_element_id("function"), None);
        assert_eq!(parse_element_id("widget:1"), None);
        assert_eq!(parse_element_id("file:abc"), None);
    }

    #[test]
    fn route_decision_is_strict() {
        assert_eq!("vector".parse::<RouteDecision>().unwrap(), RouteDecision::Vector);
        assert_eq!("graph".parse::<RouteDecision>().unwrap(), RouteDecision::Graph);
        assert!("Graph".parse::<RouteDecision>().is_err());
        assert!("hybrid".parse::<RouteDecision>().is_err());
    }

    #[test]
    fn relationship_type_field_is_renamed() {
        let rel: GraphRelationship = serde_json::from_str(
            r#"{"element_id":"calls:1","type":"CALLS","start":"function:1","end":"function:2"}"#,
        )
        .unwrap();
        assert_eq!(rel.rel_type, REL_CALLS);
        assert!(rel.properties.is_empty());
    }

    #[test]
    fn record_lookup_by_column() {
        let record = Record {
            fields: vec![
                ("n".into(), GraphValue::Scalar(serde_json::json!(1))),
                ("m".into(), GraphValue::Scalar(serde_json::json!("x"))),
            ],
        };
        assert_eq!(
            record.get("m"),
            Some(&GraphValue::Scalar(serde_json::json!("x")))
        );
        assert!(record.get("z").is_none());
    }
}
