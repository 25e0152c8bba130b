//! A small RDF graph model with Turtle and JSON-LD serialisation.
//!
//! Terms are IRIs, blank nodes or (optionally typed) literals. The graph
//! keeps triples in insertion order, which keeps the serialised output
//! stable for tests and for humans diffing responses.

use std::collections::BTreeMap;
use std::fmt::Write as _;

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Iri(String),
    Blank(usize),
    Literal {
        value: String,
        datatype: Option<String>,
    },
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Self::Iri(value.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal { value: value.into(), datatype: None }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
        }
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Self::Iri(iri) => Some(iri),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
}

#[derive(Debug, Default, Clone)]
pub struct Graph {
    triples: Vec<Triple>,
    namespaces: Vec<(String, String)>,
    next_blank: usize,
}

impl Graph {
    pub fn with_namespaces(namespaces: &[(String, String)]) -> Self {
        Self {
            namespaces: namespaces.to_vec(),
            ..Self::default()
        }
    }

    pub fn new_blank(&mut self) -> Term {
        let id = self.next_blank;
        self.next_blank += 1;
        Term::Blank(id)
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    pub fn add(&mut self, subject: Term, predicate: &str, object: Term) {
        let triple = Triple {
            subject,
            predicate: predicate.to_owned(),
            object,
        };
        if !self.triples.contains(&triple) {
            self.triples.push(triple);
        }
    }

    /// Replaces the objects of `(subject, predicate)` with a single value.
    pub fn set(&mut self, subject: Term, predicate: &str, object: Term) {
        self.triples
            .retain(|t| !(t.subject == subject && t.predicate == predicate));
        self.add(subject, predicate, object);
    }

    pub fn objects<'a>(&'a self, subject: &Term, predicate: &str) -> impl Iterator<Item = &'a Term> + 'a {
        let subject = subject.clone();
        let predicate = predicate.to_owned();
        self.triples
            .iter()
            .filter(move |t| t.subject == subject && t.predicate == predicate)
            .map(|t| &t.object)
    }

    pub fn first_object(&self, subject: &Term, predicate: &str) -> Option<&Term> {
        self.objects(subject, predicate).next()
    }

    /// All objects of a predicate regardless of subject (used for
    /// `dct:conformsTo` lookup).
    pub fn objects_of_predicate<'a>(&'a self, predicate: &'a str) -> impl Iterator<Item = &'a Term> {
        self.triples
            .iter()
            .filter(move |t| t.predicate == predicate)
            .map(|t| &t.object)
    }

    pub fn subjects_with<'a>(&'a self, predicate: &'a str, object: &'a Term) -> Vec<&'a Term> {
        let mut subjects: Vec<&Term> = Vec::new();
        for triple in &self.triples {
            if triple.predicate == predicate && &triple.object == object
                && !subjects.contains(&&triple.subject)
            {
                subjects.push(&triple.subject);
            }
        }
        subjects
    }

    // ---------------------------------------------------------------- //
    // Serialisation
    // ---------------------------------------------------------------- //

    /// Compacts an IRI into a CURIE when a bound namespace matches and the
    /// local part is a safe prefixed name.
    fn compact(&self, iri: &str) -> Option<String> {
        for (prefix, namespace) in &self.namespaces {
            if let Some(local) = iri.strip_prefix(namespace.as_str())
                && !local.is_empty()
                && local
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
                && !local.ends_with('.')
            {
                return Some(format!("{prefix}:{local}"));
            }
        }
        None
    }

    fn turtle_iri(&self, iri: &str) -> String {
        self.compact(iri).unwrap_or_else(|| format!("<{iri}>"))
    }

    fn turtle_term(&self, term: &Term) -> String {
        match term {
            Term::Iri(iri) => self.turtle_iri(iri),
            Term::Blank(id) => format!("_:b{id}"),
            Term::Literal { value, datatype } => {
                let escaped = escape_literal(value);
                match datatype {
                    Some(datatype) => format!("\"{escaped}\"^^{}", self.turtle_iri(datatype)),
                    None => format!("\"{escaped}\""),
                }
            }
        }
    }

    pub fn to_turtle(&self) -> String {
        let mut output = String::new();
        for (prefix, namespace) in &self.namespaces {
            let _ = writeln!(output, "@prefix {prefix}: <{namespace}> .");
        }
        if !self.namespaces.is_empty() {
            output.push('\n');
        }

        // Group triples per subject, keeping first-seen subject order:
        let mut subject_order: Vec<&Term> = Vec::new();
        let mut grouped: BTreeMap<usize, Vec<&Triple>> = BTreeMap::new();
        for triple in &self.triples {
            let index = match subject_order.iter().position(|s| *s == &triple.subject) {
                Some(index) => index,
                None => {
                    subject_order.push(&triple.subject);
                    subject_order.len() - 1
                }
            };
            grouped.entry(index).or_default().push(triple);
        }

        for (index, subject) in subject_order.iter().enumerate() {
            let subject_text = match subject {
                Term::Iri(iri) => format!("<{iri}>"),
                Term::Blank(id) => format!("_:b{id}"),
                Term::Literal { .. } => continue,
            };

            let triples = &grouped[&index];
            let _ = write!(output, "{subject_text}");

            for (position, triple) in triples.iter().enumerate() {
                let predicate = if triple.predicate == RDF_TYPE {
                    "a".to_owned()
                } else {
                    self.turtle_iri(&triple.predicate)
                };
                let object = self.turtle_term(&triple.object);
                let separator = if position + 1 == triples.len() { " ." } else { " ;" };
                let _ = write!(output, "\n    {predicate} {object}{separator}");
            }
            output.push_str("\n\n");
        }

        output
    }

    pub fn to_jsonld(&self) -> serde_json::Value {
        use serde_json::{Map, Value, json};

        let mut context = Map::new();
        for (prefix, namespace) in &self.namespaces {
            context.insert(prefix.clone(), Value::String(namespace.clone()));
        }

        let mut nodes: Vec<(String, Map<String, Value>)> = Vec::new();
        for triple in &self.triples {
            let id = match &triple.subject {
                Term::Iri(iri) => iri.clone(),
                Term::Blank(blank_id) => format!("_:b{blank_id}"),
                Term::Literal { .. } => continue,
            };

            let position = nodes.iter().position(|(node_id, _)| node_id == &id);
            let node = match position {
                Some(position) => &mut nodes[position].1,
                None => {
                    let mut node = Map::new();
                    node.insert("@id".to_owned(), Value::String(id.clone()));
                    nodes.push((id, node));
                    let last = nodes.len() - 1;
                    &mut nodes[last].1
                }
            };

            if triple.predicate == RDF_TYPE {
                let type_value = match &triple.object {
                    Term::Iri(iri) => Value::String(self.compact(iri).unwrap_or_else(|| iri.clone())),
                    other => Value::String(format!("{other:?}")),
                };
                append_value(node, "@type", type_value);
                continue;
            }

            let key = self
                .compact(&triple.predicate)
                .unwrap_or_else(|| triple.predicate.clone());
            let value = match &triple.object {
                Term::Iri(iri) => json!({"@id": iri}),
                Term::Blank(blank_id) => json!({"@id": format!("_:b{blank_id}")}),
                Term::Literal { value, datatype: Some(datatype) } => {
                    json!({"@value": value, "@type": self.compact(datatype).unwrap_or_else(|| datatype.clone())})
                }
                Term::Literal { value, datatype: None } => Value::String(value.clone()),
            };
            append_value(node, &key, value);
        }

        json!({
            "@context": context,
            "@graph": nodes.into_iter().map(|(_, node)| Value::Object(node)).collect::<Vec<_>>(),
        })
    }
}

fn append_value(node: &mut serde_json::Map<String, serde_json::Value>, key: &str, value: serde_json::Value) {
    use serde_json::Value;
    match node.get_mut(key) {
        None => {
            node.insert(key.to_owned(), value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let previous = existing.take();
            *existing = Value::Array(vec![previous, value]);
        }
    }
}

fn escape_literal(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespaces() -> Vec<(String, String)> {
        vec![
            ("dct".to_owned(), "http://purl.org/dc/terms/".to_owned()),
            ("xsd".to_owned(), XSD_NS.to_owned()),
        ]
    }

    #[test]
    fn test_set_replaces_add_appends() {
        let mut graph = Graph::with_namespaces(&namespaces());
        let subject = Term::iri("http://example.org/x");

        graph.add(subject.clone(), "http://purl.org/dc/terms/title", Term::literal("one"));
        graph.add(subject.clone(), "http://purl.org/dc/terms/title", Term::literal("two"));
        assert_eq!(graph.objects(&subject, "http://purl.org/dc/terms/title").count(), 2);

        graph.set(subject.clone(), "http://purl.org/dc/terms/title", Term::literal("three"));
        let objects: Vec<&Term> = graph.objects(&subject, "http://purl.org/dc/terms/title").collect();
        assert_eq!(objects, [&Term::literal("three")]);
    }

    #[test]
    fn test_turtle_output_compacts_and_types() {
        let mut graph = Graph::with_namespaces(&namespaces());
        let subject = Term::iri("http://example.org/x");
        graph.add(subject.clone(), RDF_TYPE, Term::iri("http://purl.org/dc/terms/Standard"));
        graph.add(
            subject.clone(),
            "http://purl.org/dc/terms/modified",
            Term::typed_literal("2024-01-01T00:00:00Z", format!("{XSD_NS}dateTime")),
        );

        let turtle = graph.to_turtle();
        assert!(turtle.contains("@prefix dct: <http://purl.org/dc/terms/> ."));
        assert!(turtle.contains("<http://example.org/x>"));
        assert!(turtle.contains("a dct:Standard ;"));
        assert!(turtle.contains("dct:modified \"2024-01-01T00:00:00Z\"^^xsd:dateTime ."));
    }

    #[test]
    fn test_literal_escaping() {
        let mut graph = Graph::default();
        graph.add(
            Term::iri("http://example.org/x"),
            "http://purl.org/dc/terms/title",
            Term::literal("say \"hi\"\nplease"),
        );
        let turtle = graph.to_turtle();
        assert!(turtle.contains("\"say \\\"hi\\\"\\nplease\""));
    }

    #[test]
    fn test_jsonld_groups_by_subject() {
        let mut graph = Graph::with_namespaces(&namespaces());
        let subject = Term::iri("http://example.org/x");
        graph.add(subject.clone(), RDF_TYPE, Term::iri("http://purl.org/dc/terms/Standard"));
        graph.add(subject.clone(), "http://purl.org/dc/terms/title", Term::literal("T"));

        let jsonld = graph.to_jsonld();
        let nodes = jsonld["@graph"].as_array().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0]["@id"], "http://example.org/x");
        assert_eq!(nodes[0]["@type"], "dct:Standard");
        assert_eq!(nodes[0]["dct:title"], "T");
    }
}
