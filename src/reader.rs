/// Profiler graph ingestion.
///
/// Reads the graphviz-subset text emitted by the profiler's call-graph
/// exporter: a `digraph` wrapper, node statements carrying `label`,
/// `filename` and `module` attributes, and edge statements carrying a
/// `label`. Only that subset is understood; statements that do not parse
/// are skipped with a warning so that a damaged file still yields a usable
/// graph.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::errors::GraphReadError;
use crate::graph::{CallGraph, CallSiteInfo, FunctionId, FunctionInfo};

/// Read and parse a call-graph file.
pub fn read_graph(path: &Path) -> Result<CallGraph, GraphReadError> {
    let text = fs::read_to_string(path).map_err(|source| GraphReadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let graph = parse_graph(&text);
    debug!(
        file = %path.display(),
        functions = graph.function_count(),
        call_sites = graph.call_site_count(),
        "graph imported"
    );
    Ok(graph)
}

/// Parse call-graph text into a raw graph. Never fails outright: statements
/// that cannot be understood are dropped.
pub fn parse_graph(text: &str) -> CallGraph {
    let mut graph = CallGraph::new();
    let mut nodes: HashMap<String, FunctionId> = HashMap::new();

    for statement in split_statements(text) {
        if statement.is_empty() {
            continue;
        }
        if parse_statement(&statement, &mut graph, &mut nodes).is_none() {
            warn!(statement = %statement, "skipping unparsable graph statement");
        }
    }

    graph
}

// ---------------------------------------------------------------------------
// Statement scanning
// ---------------------------------------------------------------------------

/// Split the input into statements, honoring quoted strings. `;`, `{` and
/// `}` terminate a statement; newlines are plain whitespace.
fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut escaped = false;

    for character in text.chars() {
        if in_quote {
            current.push(character);
            if escaped {
                escaped = false;
            } else if character == '\\' {
                escaped = true;
            } else if character == '"' {
                in_quote = false;
            }
        } else {
            match character {
                '"' => {
                    in_quote = true;
                    current.push(character);
                }
                ';' | '{' | '}' => {
                    statements.push(current.trim().to_string());
                    current.clear();
                }
                _ => current.push(character),
            }
        }
    }
    statements.push(current.trim().to_string());

    statements
}

struct Cursor {
    characters: Vec<char>,
    position: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Cursor {
            characters: text.chars().collect(),
            position: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.characters.get(self.position).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.characters.get(self.position + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let character = self.peek()?;
        self.position += 1;
        Some(character)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.position += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn at_arrow(&self) -> bool {
        self.peek() == Some('-') && self.peek_at(1) == Some('>')
    }

    fn at_end(&self) -> bool {
        self.position >= self.characters.len()
    }
}

/// A quoted string with escapes resolved, or a bare token. The `\n` escape
/// becomes a real newline; any other escaped character stands for itself.
fn parse_token(cursor: &mut Cursor) -> Option<String> {
    cursor.skip_whitespace();

    let mut token = String::new();

    if cursor.eat('"') {
        loop {
            let character = cursor.bump()?;
            match character {
                '"' => break,
                '\\' => {
                    let escaped = cursor.bump()?;
                    token.push(if escaped == 'n' { '\n' } else { escaped });
                }
                _ => token.push(character),
            }
        }
        Some(token)
    } else {
        while let Some(character) = cursor.peek() {
            if character.is_whitespace()
                || matches!(character, '[' | ']' | '=' | ',')
                || cursor.at_arrow()
            {
                break;
            }
            token.push(character);
            cursor.position += 1;
        }
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }
}

/// `[key="value", key=value, …]`, or nothing at all.
fn parse_attributes(cursor: &mut Cursor) -> Option<HashMap<String, String>> {
    let mut attributes = HashMap::new();

    cursor.skip_whitespace();
    if !cursor.eat('[') {
        return if cursor.at_end() { Some(attributes) } else { None };
    }

    loop {
        cursor.skip_whitespace();
        while cursor.eat(',') {
            cursor.skip_whitespace();
        }
        if cursor.eat(']') {
            break;
        }

        let key = parse_token(cursor)?;
        cursor.skip_whitespace();
        if !cursor.eat('=') {
            return None;
        }
        let value = parse_token(cursor)?;
        attributes.insert(key, value);
    }

    Some(attributes)
}

// ---------------------------------------------------------------------------
// Statement interpretation
// ---------------------------------------------------------------------------

fn parse_statement(
    statement: &str,
    graph: &mut CallGraph,
    nodes: &mut HashMap<String, FunctionId>,
) -> Option<()> {
    let mut cursor = Cursor::new(statement);

    let identifier = parse_token(&mut cursor)?;

    // Graph wrapper and attribute-default statements carry no call data.
    if matches!(
        identifier.as_str(),
        "digraph" | "graph" | "subgraph" | "strict" | "node" | "edge"
    ) {
        return Some(());
    }

    cursor.skip_whitespace();
    if cursor.at_arrow() {
        cursor.position += 2;
        let callee = parse_token(&mut cursor)?;
        let attributes = parse_attributes(&mut cursor)?;

        let caller = ensure_node(graph, nodes, &identifier);
        let callee = ensure_node(graph, nodes, &callee);
        graph.add_call_site(
            caller,
            callee,
            CallSiteInfo {
                label: attributes.get("label").cloned().unwrap_or_default(),
                ..CallSiteInfo::default()
            },
        );
    } else {
        let attributes = parse_attributes(&mut cursor)?;

        let function = ensure_node(graph, nodes, &identifier);
        let info = &mut graph[function];
        if let Some(label) = attributes.get("label") {
            info.label = label.clone();
        }
        if let Some(file_name) = attributes.get("filename") {
            info.file_name = file_name.clone();
        }
        if let Some(module) = attributes.get("module") {
            info.module = module.clone();
        }
    }

    Some(())
}

fn ensure_node(
    graph: &mut CallGraph,
    nodes: &mut HashMap<String, FunctionId>,
    name: &str,
) -> FunctionId {
    if let Some(&function) = nodes.get(name) {
        return function;
    }

    let function = graph.add_function(FunctionInfo {
        name: name.to_string(),
        ..FunctionInfo::default()
    });
    nodes.insert(name.to_string(), function);
    function
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
