//! The RDF template engine behind the FAIR Data Point responses.
//!
//! Templates are loaded once from the embedded `templates.yaml`. During the
//! load, `$FDP_CONFIG.<path>` scalars are substituted from the parsed FDP
//! configuration (a `null` result drops the enclosing predicate). During a
//! rendering, `$FDP_URL` scalars are substituted with the request-derived
//! FDP base URL, mapping parameters are bound, and every scalar passes
//! through the value conversion table below:
//!
//! * date-time strings  -> `xsd:dateTime` literals (microseconds stripped)
//! * date strings       -> `xsd:date` literals
//! * non-negative ints  -> `xsd:nonNegativeInteger` (negative: `xsd:integer`)
//! * booleans           -> `xsd:boolean`
//! * `http(s)://...`, `mailto:...` -> IRIs
//! * e-mail addresses   -> normalised `mailto:` IRIs
//! * everything else    -> plain literals
//!
//! Compound values: a map under a predicate creates (or reuses) a blank
//! node and recurses, a list creates one triple per element, and the
//! special key `a` means `rdf:type` with its value resolved as a CURIE.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::fdp::config::FdpConfig;
use crate::fdp::graph::{Graph, RDF_TYPE, Term, XSD_NS};

static URI_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(https?://|mailto:).*$").expect("static regex"));
static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static regex"));
static ISO_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[Tt ]\d{2}:\d{2}(:\d{2}(\.\d{1,6})?)?(Z|[+-]\d{2}:?\d{2})?$")
        .expect("static regex")
});
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("static regex")
});

const TEMPLATES_YAML: &str = include_str!("templates.yaml");

/// An FDP template: its URL path, the static predicates part, and the
/// mapping part binding runtime values to predicates.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FdpTemplate {
    pub path: String,
    #[serde(rename = "static")]
    pub static_block: Mapping,
    pub mapping: Mapping,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FdpItems {
    fairdp: FdpTemplate,
    catalogs: FdpTemplate,
    catalog: FdpTemplate,
    dataset: FdpTemplate,
    profile: FdpTemplate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FdpTemplates {
    namespaces: BTreeMap<String, String>,
    templates: FdpItems,
}

/// Runtime parameter values for a rendering.
pub type ParamMap = BTreeMap<String, Value>;

pub struct GraphGenerator {
    namespaces: Vec<(String, String)>,
    templates: BTreeMap<&'static str, FdpTemplate>,
}

impl GraphGenerator {
    /// Loads the embedded templates and applies the configuration
    /// substitution. Bad `$FDP_CONFIG` expressions are fatal.
    pub fn new(config: &FdpConfig) -> Result<Self> {
        let parsed: FdpTemplates =
            serde_yaml::from_str(TEMPLATES_YAML).context("Cannot parse templates.yaml")?;

        let mut namespaces: Vec<(String, String)> = parsed
            .namespaces
            .iter()
            .map(|(prefix, iri)| (prefix.clone(), iri.clone()))
            .collect();
        // rdf and xsd are bound at minimum:
        for (prefix, iri) in [
            ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
            ("xsd", XSD_NS),
        ] {
            if !namespaces.iter().any(|(bound, _)| bound == prefix) {
                namespaces.push((prefix.to_owned(), iri.to_owned()));
            }
        }

        let config_tree =
            serde_yaml::to_value(config).context("Cannot use fdp.yaml for substitution")?;

        let items = parsed.templates;
        let mut templates = BTreeMap::new();
        for (key, mut template) in [
            ("fairdp", items.fairdp),
            ("catalogs", items.catalogs),
            ("catalog", items.catalog),
            ("dataset", items.dataset),
            ("profile", items.profile),
        ] {
            apply_config(&mut template.static_block, &config_tree)
                .with_context(|| format!("template [{key}] static block"))?;
            apply_config(&mut template.mapping, &config_tree)
                .with_context(|| format!("template [{key}] mapping block"))?;
            tracing::info!("FDP template [{key}] is ready.");
            templates.insert(key, template);
        }

        Ok(Self { namespaces, templates })
    }

    /// The base URL path of the FAIR Data Point service.
    pub fn base_path(&self) -> &str {
        &self.templates["fairdp"].path
    }

    /// Constructs an entity URL from the template's `path` value.
    pub fn item_url(&self, base_url: &str, tmpl_id: &str, item_id: Option<&str>) -> String {
        let base_path = self
            .templates
            .get(tmpl_id)
            .map(|template| template.path.as_str())
            .unwrap_or_default();
        let mut result = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            base_path.trim_start_matches('/')
        );
        if let Some(item_id) = item_id {
            result = format!(
                "{}/{}",
                result.trim_end_matches('/'),
                item_id.trim_start_matches('/')
            );
        }
        result
    }

    /// Builds (or extends) a graph for the given template. When `values`
    /// contains an `id`, it is appended to the template path for the
    /// subject URI even if the template mapping does not declare it.
    pub fn render(
        &self,
        template_key: &str,
        base_url: &str,
        values: &ParamMap,
        graph: Option<Graph>,
    ) -> Result<Graph> {
        let template = self
            .templates
            .get(template_key)
            .ok_or_else(|| anyhow!("Unknown template '{template_key}'"))?;

        let mut graph = graph.unwrap_or_else(|| Graph::with_namespaces(&self.namespaces));

        let item_id = values.get("id").and_then(Value::as_str);
        let subject = Term::iri(self.item_url(base_url, template_key, item_id));
        let fdp_url = self.item_url(base_url, "fairdp", None);

        // 1) Apply static triples:
        for (key, value) in &template.static_block {
            let predicate = self.resolve_qname(as_key(key)?)?;
            self.set_value(&mut graph, &subject, &predicate, value, &fdp_url, false)?;
        }

        // 2) Apply mappings:
        for (param_key, path) in &template.mapping {
            let Some(value) = values.get(as_key(param_key)?) else {
                continue;
            };
            if !is_empty_value(value) {
                self.apply_mapping_path(&mut graph, &subject, path, value, &fdp_url)?;
            }
        }

        Ok(graph)
    }

    // ---------------------------------------------------------------- //
    // Core helpers
    // ---------------------------------------------------------------- //

    fn resolve_qname(&self, qname: &str) -> Result<String> {
        let qname = qname.trim();
        if qname == "a" {
            return Ok(RDF_TYPE.to_owned());
        }
        let (prefix, local) = qname
            .split_once(':')
            .ok_or_else(|| anyhow!("Expected CURIE like 'dct:title', got '{qname}'"))?;
        let namespace = self
            .namespaces
            .iter()
            .find(|(bound, _)| bound == prefix)
            .map(|(_, iri)| iri)
            .ok_or_else(|| anyhow!("Unknown namespace prefix '{prefix}' in '{qname}'"))?;
        Ok(format!("{namespace}{local}"))
    }

    fn set_value(
        &self,
        graph: &mut Graph,
        subject: &Term,
        predicate: &str,
        value: &Value,
        fdp_url: &str,
        add: bool,
    ) -> Result<()> {
        match value {
            Value::Null => Ok(()),

            // Map -> nested blank node filled by properties and values:
            Value::Mapping(entries) => {
                let blank = match (add, graph.first_object(subject, predicate)) {
                    (false, Some(existing @ Term::Blank(_))) => existing.clone(),
                    _ => {
                        let blank = graph.new_blank();
                        graph.add(subject.clone(), predicate, blank.clone());
                        blank
                    }
                };
                for (key, nested) in entries {
                    let nested_predicate = self.resolve_qname(as_key(key)?)?;
                    self.set_value(graph, &blank, &nested_predicate, nested, fdp_url, false)?;
                }
                Ok(())
            }

            // List -> multiple values:
            Value::Sequence(items) => {
                for item in items {
                    self.set_value(graph, subject, predicate, item, fdp_url, true)?;
                }
                Ok(())
            }

            scalar => {
                if predicate == RDF_TYPE {
                    let qname = scalar
                        .as_str()
                        .ok_or_else(|| anyhow!("rdf:type value must be a CURIE string"))?;
                    let class = Term::iri(self.resolve_qname(qname)?);
                    graph.add(subject.clone(), predicate, class);
                    return Ok(());
                }

                let scalar = match scalar.as_str() {
                    Some(text) if text.contains("$FDP_URL") => {
                        Value::String(text.replace("$FDP_URL", fdp_url))
                    }
                    _ => scalar.clone(),
                };

                let term = convert_value(&scalar);
                if add {
                    graph.add(subject.clone(), predicate, term);
                } else {
                    graph.set(subject.clone(), predicate, term);
                }
                Ok(())
            }
        }
    }

    fn apply_mapping_path(
        &self,
        graph: &mut Graph,
        subject: &Term,
        path: &Value,
        value: &Value,
        fdp_url: &str,
    ) -> Result<()> {
        match path {
            Value::String(qname) => {
                let predicate = self.resolve_qname(qname)?;
                self.set_value(graph, subject, &predicate, value, fdp_url, false)
            }

            Value::Sequence(items) => {
                for item in items {
                    self.apply_mapping_path(graph, subject, item, value, fdp_url)?;
                }
                Ok(())
            }

            Value::Mapping(entries) => {
                for (key, nested) in entries {
                    let predicate = self.resolve_qname(as_key(key)?)?;

                    match nested {
                        // A key without a value marks the insertion point:
                        Value::Null => {
                            self.set_value(graph, subject, &predicate, value, fdp_url, false)?;
                        }
                        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                            self.set_value(graph, subject, &predicate, nested, fdp_url, false)?;
                        }
                        Value::Mapping(_) => {
                            let blank = match graph.first_object(subject, &predicate) {
                                Some(existing @ Term::Blank(_)) => existing.clone(),
                                _ => {
                                    let blank = graph.new_blank();
                                    graph.add(subject.clone(), &predicate, blank.clone());
                                    blank
                                }
                            };
                            self.apply_mapping_path(graph, &blank, nested, value, fdp_url)?;
                        }
                        other => bail!("Unsupported mapping value: {other:?}"),
                    }
                }
                Ok(())
            }

            other => bail!("Unsupported mapping path: {other:?}"),
        }
    }
}

fn as_key(key: &Value) -> Result<&str> {
    key.as_str().ok_or_else(|| anyhow!("Template keys must be strings, got {key:?}"))
}

// ---------------------------------------------------------------- //
// Configuration substitution
// ---------------------------------------------------------------- //

/// Applies `$FDP_CONFIG.<path>` substitution to a template section. A
/// resolved `null` removes the property.
fn apply_config(section: &mut Mapping, config: &Value) -> Result<()> {
    let keys: Vec<Value> = section.keys().cloned().collect();
    for key in keys {
        let Some(value) = section.get_mut(&key) else {
            continue;
        };

        match value {
            Value::Mapping(nested) => apply_config(nested, config)?,
            Value::Sequence(items) => {
                for item in items.iter_mut() {
                    match item {
                        Value::Mapping(nested) => apply_config(nested, config)?,
                        Value::String(text) if text.starts_with("$FDP_CONFIG.") => {
                            *item = resolve_config(config, text)?;
                        }
                        _ => {}
                    }
                }
                items.retain(|item| !item.is_null());
            }
            Value::String(text) if text.starts_with("$FDP_CONFIG.") => {
                let expression = text.clone();
                let resolved = resolve_config(config, &expression)?;
                if resolved.is_null() {
                    section.remove(&key);
                } else if let Some(slot) = section.get_mut(&key) {
                    *slot = resolved;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn resolve_config(config: &Value, expression: &str) -> Result<Value> {
    let props: Vec<&str> = expression.split('.').skip(1).collect();
    if props.is_empty() {
        bail!("Bad/incomplete $FDP_CONFIG expression: {expression}");
    }

    let mut current = config;
    for prop in props {
        if prop.is_empty() {
            bail!("Empty $FDP_CONFIG property in [{expression}]");
        }
        if current.is_null() {
            return Ok(Value::Null);
        }
        current = current
            .get(prop)
            .ok_or_else(|| anyhow!("Bad $FDP_CONFIG expression: error at '{prop}' in '{expression}'"))?;
    }
    Ok(current.clone())
}

// ---------------------------------------------------------------- //
// Value conversion
// ---------------------------------------------------------------- //

/// The scalar conversion table (total over YAML scalars).
pub fn convert_value(value: &Value) -> Term {
    match value {
        Value::Bool(boolean) => {
            Term::typed_literal(boolean.to_string(), format!("{XSD_NS}boolean"))
        }
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                let datatype = if integer >= 0 { "nonNegativeInteger" } else { "integer" };
                Term::typed_literal(integer.to_string(), format!("{XSD_NS}{datatype}"))
            } else {
                Term::literal(number.to_string())
            }
        }
        Value::String(text) => convert_string(text),
        other => Term::literal(format!("{other:?}")),
    }
}

fn convert_string(text: &str) -> Term {
    let trimmed = text.trim();

    if URI_LIKE.is_match(trimmed) {
        return Term::iri(trimmed);
    }

    // Just an e-mail address -> mailto IRI:
    if trimmed.contains('@') && trimmed.contains('.') && !trimmed.contains(' ') {
        if trimmed.ends_with("@example.org") {
            return Term::iri(format!("mailto:{trimmed}"));
        }
        if EMAIL.is_match(trimmed) {
            return Term::iri(format!("mailto:{}", normalize_email(trimmed)));
        }
        tracing::warn!("Failed to validate email address: {trimmed}");
    }

    if ISO_DATETIME.is_match(trimmed) {
        if let Some(formatted) = normalize_datetime(trimmed) {
            return Term::typed_literal(formatted, format!("{XSD_NS}dateTime"));
        }
    }
    if ISO_DATE.is_match(trimmed) && NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_ok() {
        return Term::typed_literal(trimmed, format!("{XSD_NS}date"));
    }

    Term::literal(trimmed)
}

fn normalize_email(address: &str) -> String {
    match address.rsplit_once('@') {
        Some((local, domain)) => format!("{local}@{}", domain.to_lowercase()),
        None => address.to_owned(),
    }
}

/// Parses an ISO date-time string and renders it with microseconds
/// stripped (`' '` separators normalised to `'T'`).
fn normalize_datetime(text: &str) -> Option<String> {
    let normalized = text.replacen(' ', "T", 1).replace('t', "T");

    if let Ok(with_offset) = chrono::DateTime::parse_from_rfc3339(&normalized) {
        return Some(with_offset.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(naive.format("%Y-%m-%dT%H:%M:%S").to_string());
        }
    }
    None
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Sequence(items) => items.is_empty() || items.iter().all(is_empty_value),
        Value::Mapping(entries) => entries.is_empty(),
        _ => false,
    }
}
