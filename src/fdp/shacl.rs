//! SHACL shapes and validation.
//!
//! The shapes shipped with the service (`shacl/*.ttl`) intentionally omit
//! the URL of their empty prefix; the line is prepended from the incoming
//! request URL when a shape is served or used, binding the actual resource
//! URL to the SHACL namespace.
//!
//! The validator implements the SHACL core subset these shapes use:
//! `sh:targetClass` node shapes with `sh:property` constraints carrying
//! `sh:path`, `sh:minCount`, `sh:maxCount`, `sh:nodeKind` and
//! `sh:datatype`. The textual report follows the upstream validator layout.

use std::fmt::Write as _;

use anyhow::{Result, anyhow, bail};

use crate::fdp::graph::{Graph, RDF_TYPE, Term};

const SH_NS: &str = "http://www.w3.org/ns/shacl#";

const SHACL_FILES: &[(&str, &str)] = &[
    ("fairdp", include_str!("shacl/fairdp.ttl")),
    ("catalogs", include_str!("shacl/catalogs.ttl")),
    ("catalog", include_str!("shacl/catalog.ttl")),
    ("dataset", include_str!("shacl/dataset.ttl")),
];

/// Known shape ids.
pub fn shacl_ids() -> Vec<&'static str> {
    SHACL_FILES.iter().map(|(id, _)| *id).collect()
}

pub fn has_shacl(id: &str) -> bool {
    SHACL_FILES.iter().any(|(known, _)| *known == id)
}

/// The raw shape document with the empty prefix bound to `resource_url`.
pub fn shacl_source(resource_url: &str, id: &str) -> Option<String> {
    let (_, body) = SHACL_FILES.iter().find(|(known, _)| *known == id)?;
    Some(format!("@prefix : <{resource_url}> .\n{}", body.trim()))
}

/// The shape document parsed into a graph (e.g. for JSON-LD output).
pub fn shacl_graph(resource_url: &str, id: &str) -> Option<Graph> {
    let source = shacl_source(resource_url, id)?;
    parse_turtle(&source).ok()
}

// ---------------------------------------------------------------- //
// Validation
// ---------------------------------------------------------------- //

#[derive(Debug)]
struct PropertyConstraint {
    path: String,
    min_count: Option<u64>,
    max_count: Option<u64>,
    node_kind: Option<String>,
    datatype: Option<String>,
}

#[derive(Debug)]
struct Violation {
    component: &'static str,
    source_shape: String,
    focus_node: String,
    result_path: String,
    message: String,
}

/// Validates a data graph against one shipped shape document and renders
/// the textual report.
pub fn validate(data: &Graph, shapes: &Graph) -> String {
    let mut violations = Vec::new();

    let node_shape = Term::iri(format!("{SH_NS}NodeShape"));
    for shape in shapes.subjects_with(RDF_TYPE, &node_shape) {
        let Some(target_class) = shapes
            .first_object(shape, &format!("{SH_NS}targetClass"))
            .and_then(Term::as_iri)
        else {
            continue;
        };

        let target_class_term = Term::iri(target_class);
        let focus_nodes = data.subjects_with(RDF_TYPE, &target_class_term);
        let constraints = property_constraints(shapes, shape);

        for focus in focus_nodes {
            for constraint in &constraints {
                check_constraint(data, shape, focus, constraint, &mut violations);
            }
        }
    }

    render_report(&violations)
}

fn property_constraints(shapes: &Graph, shape: &Term) -> Vec<PropertyConstraint> {
    let mut constraints = Vec::new();
    for property in shapes.objects(shape, &format!("{SH_NS}property")) {
        let Some(path) = shapes
            .first_object(property, &format!("{SH_NS}path"))
            .and_then(Term::as_iri)
        else {
            continue;
        };

        let count_of = |name: &str| -> Option<u64> {
            match shapes.first_object(property, &format!("{SH_NS}{name}")) {
                Some(Term::Literal { value, .. }) => value.parse().ok(),
                _ => None,
            }
        };

        constraints.push(PropertyConstraint {
            path: path.to_owned(),
            min_count: count_of("minCount"),
            max_count: count_of("maxCount"),
            node_kind: shapes
                .first_object(property, &format!("{SH_NS}nodeKind"))
                .and_then(Term::as_iri)
                .map(str::to_owned),
            datatype: shapes
                .first_object(property, &format!("{SH_NS}datatype"))
                .and_then(Term::as_iri)
                .map(str::to_owned),
        });
    }
    constraints
}

fn term_label(term: &Term) -> String {
    match term {
        Term::Iri(iri) => format!("<{iri}>"),
        Term::Blank(id) => format!("_:b{id}"),
        Term::Literal { value, .. } => format!("\"{value}\""),
    }
}

fn check_constraint(
    data: &Graph,
    shape: &Term,
    focus: &Term,
    constraint: &PropertyConstraint,
    violations: &mut Vec<Violation>,
) {
    let objects: Vec<&Term> = data.objects(focus, &constraint.path).collect();
    let focus_label = term_label(focus);
    let shape_label = term_label(shape);

    if let Some(min) = constraint.min_count
        && (objects.len() as u64) < min
    {
        violations.push(Violation {
            component: "MinCountConstraintComponent",
            source_shape: shape_label.clone(),
            focus_node: focus_label.clone(),
            result_path: constraint.path.clone(),
            message: format!("Less than {min} values on {focus_label}->{}", constraint.path),
        });
    }

    if let Some(max) = constraint.max_count
        && (objects.len() as u64) > max
    {
        violations.push(Violation {
            component: "MaxCountConstraintComponent",
            source_shape: shape_label.clone(),
            focus_node: focus_label.clone(),
            result_path: constraint.path.clone(),
            message: format!("More than {max} values on {focus_label}->{}", constraint.path),
        });
    }

    for object in &objects {
        if let Some(node_kind) = &constraint.node_kind {
            let ok = match node_kind.as_str() {
                kind if kind == format!("{SH_NS}IRI") => matches!(object, Term::Iri(_)),
                kind if kind == format!("{SH_NS}Literal") => matches!(object, Term::Literal { .. }),
                kind if kind == format!("{SH_NS}BlankNode") => matches!(object, Term::Blank(_)),
                _ => true,
            };
            if !ok {
                violations.push(Violation {
                    component: "NodeKindConstraintComponent",
                    source_shape: shape_label.clone(),
                    focus_node: focus_label.clone(),
                    result_path: constraint.path.clone(),
                    message: format!(
                        "Value {} does not have node kind {node_kind}",
                        term_label(object)
                    ),
                });
            }
        }

        if let Some(expected) = &constraint.datatype {
            let matches_type = matches!(
                object,
                Term::Literal { datatype: Some(datatype), .. } if datatype == expected
            );
            if !matches_type {
                violations.push(Violation {
                    component: "DatatypeConstraintComponent",
                    source_shape: shape_label.clone(),
                    focus_node: focus_label.clone(),
                    result_path: constraint.path.clone(),
                    message: format!(
                        "Value {} does not have datatype <{expected}>",
                        term_label(object)
                    ),
                });
            }
        }
    }
}

fn render_report(violations: &[Violation]) -> String {
    let mut report = String::from("Validation Report\n");
    if violations.is_empty() {
        report.push_str("Conforms: True\n");
        return report;
    }

    let _ = writeln!(report, "Conforms: False");
    let _ = writeln!(report, "Results ({}):", violations.len());
    for violation in violations {
        let _ = writeln!(
            report,
            "Constraint Violation in {} ({SH_NS}{}):",
            violation.component, violation.component
        );
        let _ = writeln!(report, "\tSeverity: sh:Violation");
        let _ = writeln!(report, "\tSource Shape: {}", violation.source_shape);
        let _ = writeln!(report, "\tFocus Node: {}", violation.focus_node);
        let _ = writeln!(report, "\tResult Path: <{}>", violation.result_path);
        let _ = writeln!(report, "\tMessage: {}", violation.message);
    }
    report
}

// ---------------------------------------------------------------- //
// A small Turtle reader (the subset the shipped shapes use)
// ---------------------------------------------------------------- //

#[derive(Debug, Clone, PartialEq)]
enum Token {
    PrefixKeyword,
    Iri(String),
    Curie(String, String),
    Literal(String),
    Integer(i64),
    A,
    Dot,
    Semicolon,
    Comma,
    OpenBracket,
    CloseBracket,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '<' => {
                chars.next();
                let mut iri = String::new();
                for c in chars.by_ref() {
                    if c == '>' {
                        break;
                    }
                    iri.push(c);
                }
                tokens.push(Token::Iri(iri));
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(match escaped {
                                    'n' => '\n',
                                    'r' => '\r',
                                    't' => '\t',
                                    other => other,
                                });
                            }
                        }
                        other => value.push(other),
                    }
                }
                tokens.push(Token::Literal(value));
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            ';' => {
                chars.next();
                tokens.push(Token::Semicolon);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '[' => {
                chars.next();
                tokens.push(Token::OpenBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::CloseBracket);
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, ';' | ',' | ']' | '[') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }

                // A trailing '.' is a statement terminator, not part of the
                // word (IRIs in CURIEs do not end with a dot here):
                let mut terminated = false;
                if word.ends_with('.') && !word.chars().all(|c| c.is_ascii_digit() || c == '.') {
                    word.pop();
                    terminated = true;
                }

                if word == "@prefix" {
                    tokens.push(Token::PrefixKeyword);
                } else if word == "a" {
                    tokens.push(Token::A);
                } else if let Ok(number) = word.parse::<i64>() {
                    tokens.push(Token::Integer(number));
                } else if let Some((prefix, local)) = word.split_once(':') {
                    tokens.push(Token::Curie(prefix.to_owned(), local.to_owned()));
                } else if !word.is_empty() {
                    bail!("Unexpected token: {word}");
                }

                if terminated {
                    tokens.push(Token::Dot);
                }
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    prefixes: Vec<(String, String)>,
    graph: Graph,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(token) if &token == expected => Ok(()),
            other => bail!("Expected {expected:?}, got {other:?}"),
        }
    }

    fn resolve(&self, prefix: &str, local: &str) -> Result<String> {
        let namespace = self
            .prefixes
            .iter()
            .find(|(bound, _)| bound == prefix)
            .map(|(_, iri)| iri)
            .ok_or_else(|| anyhow!("Unknown prefix '{prefix}:'"))?;
        Ok(format!("{namespace}{local}"))
    }

    fn parse_document(&mut self) -> Result<()> {
        while let Some(token) = self.peek() {
            if *token == Token::PrefixKeyword {
                self.next();
                let Some(Token::Curie(prefix, _)) = self.next() else {
                    bail!("Malformed @prefix line");
                };
                let Some(Token::Iri(namespace)) = self.next() else {
                    bail!("Malformed @prefix line");
                };
                self.expect(&Token::Dot)?;
                self.prefixes.push((prefix, namespace));
            } else {
                let subject = self.parse_subject()?;
                self.parse_predicate_object_list(&subject)?;
                self.expect(&Token::Dot)?;
            }
        }
        Ok(())
    }

    fn parse_subject(&mut self) -> Result<Term> {
        match self.next() {
            Some(Token::Iri(iri)) => Ok(Term::Iri(iri)),
            Some(Token::Curie(prefix, local)) => Ok(Term::Iri(self.resolve(&prefix, &local)?)),
            other => bail!("Expected a subject, got {other:?}"),
        }
    }

    fn parse_predicate_object_list(&mut self, subject: &Term) -> Result<()> {
        loop {
            let predicate = match self.next() {
                Some(Token::A) => RDF_TYPE.to_owned(),
                Some(Token::Iri(iri)) => iri,
                Some(Token::Curie(prefix, local)) => self.resolve(&prefix, &local)?,
                other => bail!("Expected a predicate, got {other:?}"),
            };

            loop {
                let object = self.parse_object()?;
                self.graph.add(subject.clone(), &predicate, object);
                if self.peek() == Some(&Token::Comma) {
                    self.next();
                } else {
                    break;
                }
            }

            if self.peek() == Some(&Token::Semicolon) {
                self.next();
                // A semicolon may be trailing (before '.' or ']'):
                if matches!(self.peek(), Some(Token::Dot) | Some(Token::CloseBracket) | None) {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn parse_object(&mut self) -> Result<Term> {
        match self.next() {
            Some(Token::Iri(iri)) => Ok(Term::Iri(iri)),
            Some(Token::Curie(prefix, local)) => Ok(Term::Iri(self.resolve(&prefix, &local)?)),
            Some(Token::Literal(value)) => Ok(Term::literal(value)),
            Some(Token::Integer(number)) => Ok(Term::typed_literal(
                number.to_string(),
                "http://www.w3.org/2001/XMLSchema#integer",
            )),
            Some(Token::OpenBracket) => {
                let blank = self.graph.new_blank();
                if self.peek() != Some(&Token::CloseBracket) {
                    self.parse_predicate_object_list(&blank)?;
                }
                self.expect(&Token::CloseBracket)?;
                Ok(blank)
            }
            other => bail!("Expected an object, got {other:?}"),
        }
    }
}

/// Parses the Turtle subset used by the shipped shape documents.
pub fn parse_turtle(text: &str) -> Result<Graph> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        prefixes: Vec::new(),
        graph: Graph::default(),
    };
    parser.parse_document()?;

    let prefixes = parser.prefixes.clone();
    let mut graph = Graph::with_namespaces(&prefixes);
    for triple in parser.graph.triples() {
        graph.add(triple.subject.clone(), &triple.predicate, triple.object.clone());
    }
    Ok(graph)
}
