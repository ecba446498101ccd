use crate::error::{Error, Result};
use crate::layers::store::write_atomic;
use crate::layers::PaperRecord;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaperNode {
    pub paper_id: String,
    pub title: String,
    pub year: i32,
    pub venue: String,
    pub reference_count: u64,
    pub citation_count: u64,
    pub influential_citation_count: u64,
    pub first_author_name: String,
    pub first_author_id: String,
    pub first_field_of_study: String,
    pub primary_category: String,
}

impl From<&PaperRecord> for PaperNode {
    fn from(paper: &PaperRecord) -> Self {
        let author = paper.first_author();
        PaperNode {
            paper_id: paper.paper_id.clone(),
            title: paper.title.clone(),
            year: paper.year,
            venue: paper.venue.clone(),
            reference_count: paper.reference_count,
            citation_count: paper.citation_count,
            influential_citation_count: paper.influential_citation_count,
            first_author_name: author.map(|a| a.name.clone()).unwrap_or_default(),
            first_author_id: author.map(|a| a.author_id.clone()).unwrap_or_default(),
            first_field_of_study: paper.first_field_of_study().unwrap_or("").to_string(),
            primary_category: paper.primary_category().to_string(),
        }
    }
}

#[derive(Default)]
pub struct CitationGraph {
    graph: DiGraph<PaperNode, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl CitationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `cited -> citing` unless it already exists. Returns true for a new edge.
    pub fn add_citation_edge(&mut self, citing: &PaperRecord, cited: &PaperRecord) -> bool {
        if !citing.is_resolved() || !cited.is_resolved() {
            return false;
        }
        let from = self.node_for(cited);
        let to = self.node_for(citing);
        if self.graph.contains_edge(from, to) {
            return false;
        }
        self.graph.add_edge(from, to, ());
        true
    }

    fn node_for(&mut self, paper: &PaperRecord) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(&paper.paper_id) {
            return idx;
        }
        self.insert_node(PaperNode::from(paper))
    }

    fn insert_node(&mut self, node: PaperNode) -> NodeIndex {
        let id = node.paper_id.clone();
        let idx = self.graph.add_node(node);
        self.nodes.insert(id, idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_node(&self, paper_id: &str) -> bool {
        self.nodes.contains_key(paper_id)
    }

    pub fn contains_edge(&self, from: &str, to: &str) -> bool {
        match (self.nodes.get(from), self.nodes.get(to)) {
            (Some(&a), Some(&b)) => self.graph.contains_edge(a, b),
            _ => false,
        }
    }

    pub fn node(&self, paper_id: &str) -> Option<&PaperNode> {
        self.nodes.get(paper_id).map(|&idx| &self.graph[idx])
    }

    // insertion order
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].paper_id.as_str(),
                    self.graph[e.target()].paper_id.as_str(),
                )
            })
            .collect()
    }

    pub fn to_graphml(&self) -> Result<String> {
        let doc = GraphMlDoc {
            xmlns: GRAPHML_NS.to_string(),
            keys: NODE_KEYS
                .iter()
                .map(|(name, ty)| GraphMlKey {
                    id: name.to_string(),
                    target: "node".to_string(),
                    name: name.to_string(),
                    ty: ty.to_string(),
                })
                .collect(),
            graph: GraphMlGraph {
                edgedefault: "directed".to_string(),
                nodes: self
                    .graph
                    .node_weights()
                    .map(|node| GraphMlNode {
                        id: node.paper_id.clone(),
                        data: node_data(node),
                    })
                    .collect(),
                edges: self
                    .edges()
                    .into_iter()
                    .map(|(source, target)| GraphMlEdge {
                        source: source.to_string(),
                        target: target.to_string(),
                    })
                    .collect(),
            },
        };

        let mut body = String::new();
        let mut ser = quick_xml::se::Serializer::new(&mut body);
        ser.indent(' ', 2);
        doc.serialize(ser)?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n{body}\n"))
    }

    pub fn from_graphml(text: &str) -> Result<Self> {
        let doc: GraphMlDoc = quick_xml::de::from_str(text)?;
        let key_names: HashMap<&str, &str> = doc
            .keys
            .iter()
            .map(|k| (k.id.as_str(), k.name.as_str()))
            .collect();

        let mut graph = CitationGraph::new();
        for node in &doc.graph.nodes {
            if node.id.is_empty() || graph.contains_node(&node.id) {
                continue;
            }
            let mut attrs = PaperNode {
                paper_id: node.id.clone(),
                year: crate::layers::UNKNOWN_YEAR,
                ..Default::default()
            };
            for data in &node.data {
                let name = key_names.get(data.key.as_str()).copied().unwrap_or(data.key.as_str());
                set_attribute(&mut attrs, name, &data.value);
            }
            graph.insert_node(attrs);
        }

        for edge in &doc.graph.edges {
            if edge.source.is_empty() || edge.target.is_empty() {
                continue;
            }
            let from = graph.node_or_bare(&edge.source);
            let to = graph.node_or_bare(&edge.target);
            graph.graph.update_edge(from, to, ());
        }
        Ok(graph)
    }

    fn node_or_bare(&mut self, paper_id: &str) -> NodeIndex {
        match self.nodes.get(paper_id) {
            Some(&idx) => idx,
            None => self.insert_node(PaperNode {
                paper_id: paper_id.to_string(),
                year: crate::layers::UNKNOWN_YEAR,
                ..Default::default()
            }),
        }
    }

    pub async fn save_graphml(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }
        write_atomic(path, self.to_graphml()?.as_bytes()).await
    }

    pub async fn load_graphml(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        Self::from_graphml(&text)
    }
}

const GRAPHML_NS: &str = "http://graphml.graphdrawing.org/xmlns";

const NODE_KEYS: &[(&str, &str)] = &[
    ("paper_id", "string"),
    ("title", "string"),
    ("year", "int"),
    ("venue", "string"),
    ("reference_count", "long"),
    ("citation_count", "long"),
    ("influential_citation_count", "long"),
    ("first_author_name", "string"),
    ("first_author_id", "string"),
    ("first_field_of_study", "string"),
    ("primary_category", "string"),
];

fn node_data(node: &PaperNode) -> Vec<GraphMlData> {
    let values = [
        node.paper_id.clone(),
        node.title.clone(),
        node.year.to_string(),
        node.venue.clone(),
        node.reference_count.to_string(),
        node.citation_count.to_string(),
        node.influential_citation_count.to_string(),
        node.first_author_name.clone(),
        node.first_author_id.clone(),
        node.first_field_of_study.clone(),
        node.primary_category.clone(),
    ];
    NODE_KEYS
        .iter()
        .zip(values)
        .map(|((key, _), value)| GraphMlData {
            key: key.to_string(),
            value,
        })
        .collect()
}

fn set_attribute(node: &mut PaperNode, name: &str, value: &str) {
    match name {
        "title" => node.title = value.to_string(),
        "year" => node.year = value.trim().parse().unwrap_or(crate::layers::UNKNOWN_YEAR),
        "venue" => node.venue = value.to_string(),
        "reference_count" => node.reference_count = value.trim().parse().unwrap_or(0),
        "citation_count" => node.citation_count = value.trim().parse().unwrap_or(0),
        "influential_citation_count" => {
            node.influential_citation_count = value.trim().parse().unwrap_or(0)
        }
        "first_author_name" => node.first_author_name = value.to_string(),
        "first_author_id" => node.first_author_id = value.to_string(),
        // older checkpoints spell it in the plural
        "first_field_of_study" | "first_fields_of_study" => {
            node.first_field_of_study = value.to_string()
        }
        "primary_category" => node.primary_category = value.to_string(),
        _ => {}
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename = "graphml")]
struct GraphMlDoc {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    #[serde(rename = "key", default)]
    keys: Vec<GraphMlKey>,
    graph: GraphMlGraph,
}

#[derive(Serialize, Deserialize)]
struct GraphMlKey {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@for", default)]
    target: String,
    #[serde(rename = "@attr.name", default)]
    name: String,
    #[serde(rename = "@attr.type", default)]
    ty: String,
}

#[derive(Serialize, Deserialize)]
struct GraphMlGraph {
    #[serde(rename = "@edgedefault", default)]
    edgedefault: String,
    #[serde(rename = "node", default)]
    nodes: Vec<GraphMlNode>,
    #[serde(rename = "edge", default)]
    edges: Vec<GraphMlEdge>,
}

#[derive(Serialize, Deserialize)]
struct GraphMlNode {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "data", default)]
    data: Vec<GraphMlData>,
}

#[derive(Serialize, Deserialize)]
struct GraphMlData {
    #[serde(rename = "@key")]
    key: String,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Serialize, Deserialize)]
struct GraphMlEdge {
    #[serde(rename = "@source")]
    source: String,
    #[serde(rename = "@target")]
    target: String,
}
