//! Outline engine: statement-level stepping over Jsonnet source
//!
//! The engine reads a program's outline (one statement per line, nested
//! objects and arrays as frames, `local` and field definitions as
//! variables, `error` expressions as uncaught failures) and walks it
//! statement by statement. It gives the session layer a real engine to drive
//! without linking a Jsonnet interpreter; `evaluate` understands identifiers,
//! field paths, `std.extVar(...)` and JSON literals.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::common::{paths, Error, Result};

use super::bindings::{json_type, Bindings};
use super::{
    EvalResult, Evaluator, Frame, Halt, Interrupt, LineStatus, Location, ResumeMode, Scope,
    SourceInput, StopReason, Variable,
};

const ROOT_FRAME: &str = "<top-level>";

/// A parsed program outline
#[derive(Debug)]
struct Program {
    file: PathBuf,
    source: String,
    statements: Vec<Statement>,
    blocks: Vec<Block>,
}

#[derive(Debug)]
struct Statement {
    line: u32,
    column: u32,
    block: usize,
    kind: StatementKind,
}

#[derive(Debug)]
enum StatementKind {
    Binding,
    Raise(String),
    Expression,
}

/// A lexical scope: the file itself, or an object/array literal
#[derive(Debug)]
struct Block {
    name: String,
    parent: Option<usize>,
    depth: usize,
    opened_at: (u32, u32),
    bindings: Vec<Binding>,
}

#[derive(Debug)]
struct Binding {
    name: String,
    value: String,
    type_name: String,
    line: u32,
    child: Option<usize>,
}

/// Where execution currently is
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    NotStarted,
    At(usize),
    Raised { message: String },
    Done,
}

/// What a handle id refers to; ids are valid until the next resume
#[derive(Debug, Clone)]
enum Handle {
    Frame { block: usize, limit: u32 },
    Block { block: usize, limit: u32 },
    Json(Value),
    External,
    TopLevel,
}

/// Monotonic handle allocation; clearing never reuses ids
#[derive(Debug)]
struct HandleTable {
    next: i64,
    entries: HashMap<i64, Handle>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self {
            next: 1,
            entries: HashMap::new(),
        }
    }
}

impl HandleTable {
    fn alloc(&mut self, handle: Handle) -> i64 {
        let id = self.next;
        self.next += 1;
        self.entries.insert(id, handle);
        id
    }

    fn get(&self, id: i64) -> Option<&Handle> {
        self.entries.get(&id)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Statement-level stepping engine over Jsonnet source outlines
#[derive(Debug)]
pub struct OutlineEngine {
    program: Option<Program>,
    external: Bindings,
    top_level: Bindings,
    breakpoints: HashMap<PathBuf, BTreeSet<u32>>,
    cursor: Cursor,
    stack: Vec<Frame>,
    handles: HandleTable,
}

impl Default for OutlineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlineEngine {
    pub fn new() -> Self {
        Self {
            program: None,
            external: Bindings::new(),
            top_level: Bindings::new(),
            breakpoints: HashMap::new(),
            cursor: Cursor::NotStarted,
            stack: Vec::new(),
            handles: HandleTable::default(),
        }
    }

    /// Manifested output, known only for programs that are plain JSON
    fn result(&self) -> Option<String> {
        let program = self.program.as_ref()?;
        let value: Value = serde_json::from_str(&program.source).ok()?;
        serde_json::to_string_pretty(&value).ok()
    }

    /// Build the frame snapshot for a stop at statement `at`
    fn snapshot(&mut self, at: usize) {
        self.stack.clear();
        let Some(program) = self.program.as_ref() else {
            return;
        };
        let Some(statement) = program.statements.get(at) else {
            return;
        };

        let mut block = statement.block;
        let mut limit = statement.line;
        let mut location = Location {
            file: program.file.clone(),
            line: statement.line,
            column: statement.column,
        };

        loop {
            let current = &program.blocks[block];
            let id = self.handles.alloc(Handle::Frame { block, limit });
            self.stack.push(Frame {
                id,
                name: current.name.clone(),
                location: location.clone(),
            });
            match current.parent {
                Some(parent) => {
                    location = Location {
                        file: program.file.clone(),
                        line: current.opened_at.0,
                        column: current.opened_at.1,
                    };
                    limit = current.opened_at.0 + 1;
                    block = parent;
                }
                None => break,
            }
        }
    }

    fn frame_handle(&self, frame_id: i64) -> Result<(usize, u32)> {
        match self.handles.get(frame_id) {
            Some(Handle::Frame { block, limit }) => Ok((*block, *limit)),
            _ => Err(Error::unknown_reference("frame", frame_id)),
        }
    }

    fn json_variable(&mut self, name: String, value: &Value) -> Variable {
        let variables_reference = match value {
            Value::Object(map) if !map.is_empty() => self.handles.alloc(Handle::Json(value.clone())),
            Value::Array(items) if !items.is_empty() => {
                self.handles.alloc(Handle::Json(value.clone()))
            }
            _ => 0,
        };
        Variable {
            name,
            value: value.to_string(),
            type_name: Some(json_type(value).to_string()),
            variables_reference,
        }
    }

    fn binding_set(&mut self, set: &Bindings) -> Vec<Variable> {
        set.iter()
            .map(|(name, value)| self.json_variable(name.clone(), value))
            .collect()
    }
}

impl Evaluator for OutlineEngine {
    fn set_external_bindings(&mut self, bindings: Bindings) -> Result<()> {
        self.external = bindings;
        Ok(())
    }

    fn set_top_level_args(&mut self, args: Bindings) -> Result<()> {
        self.top_level = args;
        Ok(())
    }

    fn load_source(&mut self, input: SourceInput, search_paths: &[PathBuf]) -> Result<PathBuf> {
        let (file, source) = match input {
            SourceInput::File(path) => {
                let source = std::fs::read_to_string(&path).map_err(|e| Error::SourceLoad {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?;
                (paths::normalize(&path), source)
            }
            SourceInput::Code { name, code } => (PathBuf::from(name), code),
        };

        let mut program = parse_program(file.clone(), source);
        resolve_imports(&mut program, search_paths);

        tracing::debug!(
            file = %file.display(),
            statements = program.statements.len(),
            frames = program.blocks.len(),
            "Loaded program outline"
        );

        self.program = Some(program);
        self.cursor = Cursor::NotStarted;
        self.stack.clear();
        self.handles.clear();
        Ok(file)
    }

    fn check_line(&self, file: &Path, line: u32) -> LineStatus {
        match &self.program {
            Some(program) if program.file == file => {
                if program.statements.iter().any(|s| s.line == line) {
                    LineStatus::Executable
                } else {
                    LineStatus::NotExecutable(format!("No executable statement on line {}", line))
                }
            }
            _ => LineStatus::Unknown,
        }
    }

    fn set_breakpoints(&mut self, file: &Path, lines: &[u32]) {
        if lines.is_empty() {
            self.breakpoints.remove(file);
        } else {
            self.breakpoints
                .insert(file.to_path_buf(), lines.iter().copied().collect());
        }
    }

    fn resume(&mut self, mode: ResumeMode, interrupt: &Interrupt) -> Result<Halt> {
        self.handles.clear();
        self.stack.clear();

        let (from, start_depth) = match self.cursor.clone() {
            Cursor::NotStarted => (0, None),
            Cursor::At(at) => {
                let depth = self
                    .program
                    .as_ref()
                    .map(|p| p.blocks[p.statements[at].block].depth);
                (at + 1, depth)
            }
            Cursor::Raised { message } => {
                self.cursor = Cursor::Done;
                return Ok(Halt::Failed { message });
            }
            Cursor::Done => {
                return Err(Error::FatalEvaluator(
                    "evaluation already finished".to_string(),
                ))
            }
        };

        let program = self
            .program
            .as_ref()
            .ok_or_else(|| Error::FatalEvaluator("no program loaded".to_string()))?;
        let breakpoints = self.breakpoints.get(&program.file);
        let scan = scan(program, breakpoints, from, mode, start_depth, interrupt);

        match scan {
            Scan::Stop {
                at,
                reason,
                description,
            } => {
                let statement = &program.statements[at];
                let location = Location {
                    file: program.file.clone(),
                    line: statement.line,
                    column: statement.column,
                };
                self.cursor = match (&reason, &description) {
                    (StopReason::Exception, Some(message)) => Cursor::Raised {
                        message: message.clone(),
                    },
                    _ => Cursor::At(at),
                };
                self.snapshot(at);
                Ok(Halt::Stopped {
                    reason,
                    location,
                    description,
                })
            }
            Scan::End => {
                self.cursor = Cursor::Done;
                Ok(Halt::Finished {
                    result: self.result(),
                })
            }
            Scan::Interrupted => {
                self.cursor = Cursor::Done;
                Ok(Halt::Interrupted)
            }
        }
    }

    fn current_stack(&mut self) -> Result<Vec<Frame>> {
        match self.cursor {
            Cursor::At(_) | Cursor::Raised { .. } => Ok(self.stack.clone()),
            _ => Err(Error::NoActiveStack),
        }
    }

    fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>> {
        let (block, limit) = self.frame_handle(frame_id)?;

        let mut scopes = vec![Scope {
            name: "Locals".to_string(),
            variables_reference: self.handles.alloc(Handle::Block { block, limit }),
            expensive: false,
        }];
        if !self.external.is_empty() {
            scopes.push(Scope {
                name: "External variables".to_string(),
                variables_reference: self.handles.alloc(Handle::External),
                expensive: false,
            });
        }
        if !self.top_level.is_empty() {
            scopes.push(Scope {
                name: "Top-level arguments".to_string(),
                variables_reference: self.handles.alloc(Handle::TopLevel),
                expensive: false,
            });
        }
        Ok(scopes)
    }

    fn variables(&mut self, reference: i64) -> Result<Vec<Variable>> {
        let handle = self
            .handles
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::unknown_reference("variables", reference))?;

        match handle {
            Handle::Block { block, limit } | Handle::Frame { block, limit } => {
                let program = self.program.as_ref().ok_or(Error::NoActiveStack)?;
                let mut variables = Vec::new();
                for binding in program.blocks[block].bindings.iter().filter(|b| b.line < limit) {
                    let variables_reference = match binding.child {
                        Some(child) => self.handles.alloc(Handle::Block { block: child, limit }),
                        None => 0,
                    };
                    variables.push(Variable {
                        name: binding.name.clone(),
                        value: binding.value.clone(),
                        type_name: Some(binding.type_name.clone()),
                        variables_reference,
                    });
                }
                Ok(variables)
            }
            Handle::Json(value) => Ok(match &value {
                Value::Object(map) => map
                    .iter()
                    .map(|(k, v)| self.json_variable(k.clone(), v))
                    .collect(),
                Value::Array(items) => items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| self.json_variable(format!("[{}]", i), v))
                    .collect(),
                _ => Vec::new(),
            }),
            Handle::External => {
                let set = self.external.clone();
                Ok(self.binding_set(&set))
            }
            Handle::TopLevel => {
                let set = self.top_level.clone();
                Ok(self.binding_set(&set))
            }
        }
    }

    fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<EvalResult> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(Error::Evaluation("empty expression".to_string()));
        }

        if let Ok(value) = serde_json::from_str::<Value>(expression) {
            return Ok(json_result(&value));
        }

        if let Some(name) = ext_var_name(expression) {
            return self
                .external
                .get(name)
                .map(json_result)
                .ok_or_else(|| Error::Evaluation(format!("Undefined external variable: {}", name)));
        }

        let segments: Vec<&str> = expression.split('.').map(str::trim).collect();
        if !segments.iter().all(|s| is_identifier(s)) {
            return Err(Error::Evaluation(format!(
                "cannot evaluate '{}': only identifiers, field paths, std.extVar and literals are supported",
                expression
            )));
        }

        let program = self.program.as_ref();
        let scope = match (frame_id, self.stack.first()) {
            (Some(id), _) => Some(self.frame_handle(id)?),
            (None, Some(top)) => Some(self.frame_handle(top.id)?),
            (None, None) => None,
        };

        let mut current = match (program, scope) {
            (Some(program), Some((block, limit))) => lookup(program, block, limit, segments[0])
                .map(|binding| Resolved::Binding(program, binding)),
            _ => None,
        }
        .or_else(|| self.top_level.get(segments[0]).map(Resolved::Json))
        .ok_or_else(|| Error::Evaluation(format!("Unknown variable: {}", segments[0])))?;

        for segment in &segments[1..] {
            current = current
                .field(segment)
                .ok_or_else(|| Error::Evaluation(format!("Field does not exist: {}", segment)))?;
        }

        Ok(match current {
            Resolved::Binding(_, binding) => EvalResult {
                value: binding.value.clone(),
                type_name: Some(binding.type_name.clone()),
                variables_reference: 0,
            },
            Resolved::Json(value) => json_result(value),
        })
    }
}

/// A value reached while resolving a field path
enum Resolved<'a> {
    Binding(&'a Program, &'a Binding),
    Json(&'a Value),
}

impl<'a> Resolved<'a> {
    fn field(self, name: &str) -> Option<Resolved<'a>> {
        match self {
            Resolved::Binding(program, binding) => {
                let child = binding.child?;
                program.blocks[child]
                    .bindings
                    .iter()
                    .rev()
                    .find(|b| b.name == name)
                    .map(|b| Resolved::Binding(program, b))
            }
            Resolved::Json(value) => value.get(name).map(Resolved::Json),
        }
    }
}

fn json_result(value: &Value) -> EvalResult {
    EvalResult {
        value: value.to_string(),
        type_name: Some(json_type(value).to_string()),
        variables_reference: 0,
    }
}

/// Find the innermost visible binding named `name`
fn lookup<'a>(program: &'a Program, block: usize, limit: u32, name: &str) -> Option<&'a Binding> {
    let mut block = block;
    let mut limit = limit;
    loop {
        let current = &program.blocks[block];
        if let Some(binding) = current
            .bindings
            .iter()
            .rev()
            .find(|b| b.line < limit && b.name == name)
        {
            return Some(binding);
        }
        limit = current.opened_at.0 + 1;
        block = current.parent?;
    }
}

enum Scan {
    Stop {
        at: usize,
        reason: StopReason,
        description: Option<String>,
    },
    End,
    Interrupted,
}

/// Walk statements from `from` until one of them is a stopping point
fn scan(
    program: &Program,
    breakpoints: Option<&BTreeSet<u32>>,
    from: usize,
    mode: ResumeMode,
    start_depth: Option<usize>,
    interrupt: &Interrupt,
) -> Scan {
    for (at, statement) in program.statements.iter().enumerate().skip(from) {
        if interrupt.is_terminated() {
            return Scan::Interrupted;
        }
        let paused = interrupt.take_pause();
        let depth = program.blocks[statement.block].depth;

        let stepped = match (mode, start_depth) {
            (ResumeMode::Entry, None) => Some(StopReason::Entry),
            (ResumeMode::Entry, Some(_)) | (ResumeMode::StepIn, _) => Some(StopReason::Step),
            (ResumeMode::StepOver, None) => Some(StopReason::Step),
            (ResumeMode::StepOver, Some(d)) if depth <= d => Some(StopReason::Step),
            (ResumeMode::StepOut, Some(d)) if depth < d => Some(StopReason::Step),
            _ => None,
        };

        let stop = if let StatementKind::Raise(message) = &statement.kind {
            Some((StopReason::Exception, Some(message.clone())))
        } else if breakpoints.is_some_and(|lines| lines.contains(&statement.line)) {
            Some((StopReason::Breakpoint, None))
        } else if let Some(reason) = stepped {
            Some((reason, None))
        } else if paused {
            Some((StopReason::Pause, None))
        } else {
            None
        };

        if let Some((reason, description)) = stop {
            return Scan::Stop {
                at,
                reason,
                description,
            };
        }
    }
    Scan::End
}

/// Annotate `import` bindings with the file they resolve to
///
/// Resolution follows Jsonnet: the importing file's directory first, then
/// the library search paths in order.
fn resolve_imports(program: &mut Program, search_paths: &[PathBuf]) {
    let mut roots: Vec<PathBuf> = program
        .file
        .parent()
        .filter(|_| !paths::is_pseudo_file(&program.file))
        .map(|dir| vec![dir.to_path_buf()])
        .unwrap_or_default();
    roots.extend(search_paths.iter().cloned());

    for block in &mut program.blocks {
        for binding in &mut block.bindings {
            if binding.type_name != "import" {
                continue;
            }
            let Some(target) = quoted_literal(import_target(&binding.value)) else {
                continue;
            };
            if let Some(found) = roots.iter().map(|r| r.join(&target)).find(|p| p.is_file()) {
                binding.value = format!("{} ({})", binding.value, found.display());
            }
        }
    }
}

fn import_target(value: &str) -> &str {
    value
        .strip_prefix("importstr")
        .or_else(|| value.strip_prefix("importbin"))
        .or_else(|| value.strip_prefix("import"))
        .unwrap_or(value)
        .trim()
}

// === Outline parsing ===

fn parse_program(file: PathBuf, source: String) -> Program {
    let mut blocks = vec![Block {
        name: ROOT_FRAME.to_string(),
        parent: None,
        depth: 0,
        opened_at: (0, 0),
        bindings: Vec::new(),
    }];
    let mut statements = Vec::new();
    let mut open: Vec<usize> = vec![0];
    let mut lexer = Lexer::default();

    for (index, raw) in source.lines().enumerate() {
        let line = index as u32 + 1;
        let code = lexer.strip(raw);

        let mut rest = code.as_str();
        loop {
            rest = rest.trim_start();
            match rest.chars().next() {
                Some('}') | Some(']') => {
                    if open.len() > 1 {
                        open.pop();
                    }
                    rest = &rest[1..];
                }
                Some(')') | Some(',') | Some(';') => rest = &rest[1..],
                _ => break,
            }
        }
        let column = (code.chars().count() - rest.chars().count()) as u32 + 1;
        let text = rest.trim_end();
        if text.is_empty() {
            continue;
        }

        let block = open.last().copied().unwrap_or(0);
        let (openers, unmatched) = bracket_balance(text);

        let kind = match classify(text) {
            Classified::Binding { name, value } => {
                let child = if openers.is_empty() {
                    None
                } else {
                    Some(blocks.len())
                };
                let (value, type_name) = match (child, openers.first()) {
                    (Some(_), Some(opener)) => (elide_literal(&value, *opener), literal_type(*opener)),
                    _ => {
                        let type_name = infer_type(&value);
                        (value, type_name)
                    }
                };
                blocks[block].bindings.push(Binding {
                    name: name.clone(),
                    value,
                    type_name: type_name.to_string(),
                    line,
                    child,
                });
                push_blocks(&mut blocks, &mut open, &openers, Some(name), (line, column));
                StatementKind::Binding
            }
            Classified::Raise(message) => {
                push_blocks(&mut blocks, &mut open, &openers, None, (line, column));
                StatementKind::Raise(message)
            }
            Classified::Expression => {
                push_blocks(&mut blocks, &mut open, &openers, None, (line, column));
                StatementKind::Expression
            }
        };

        for _ in 0..unmatched {
            if open.len() > 1 {
                open.pop();
            }
        }

        statements.push(Statement {
            line,
            column,
            block,
            kind,
        });
    }

    Program {
        file,
        source,
        statements,
        blocks,
    }
}

fn push_blocks(
    blocks: &mut Vec<Block>,
    open: &mut Vec<usize>,
    openers: &[char],
    name: Option<String>,
    opened_at: (u32, u32),
) {
    for (i, opener) in openers.iter().enumerate() {
        let parent = open.last().copied().unwrap_or(0);
        let name = match (&name, i) {
            (Some(name), 0) => name.clone(),
            _ if *opener == '[' => "<array>".to_string(),
            _ => "<object>".to_string(),
        };
        let depth = blocks[parent].depth + 1;
        blocks.push(Block {
            name,
            parent: Some(parent),
            depth,
            opened_at,
            bindings: Vec::new(),
        });
        open.push(blocks.len() - 1);
    }
}

enum Classified {
    Binding { name: String, value: String },
    Raise(String),
    Expression,
}

fn classify(text: &str) -> Classified {
    if let Some(after) = strip_keyword(text, "local") {
        let name: String = after.chars().take_while(|c| is_ident_char(*c)).collect();
        if !name.is_empty() {
            let remainder = after[name.len()..].trim_start();
            let value = if remainder.starts_with('(') {
                function_value(remainder)
            } else {
                remainder.strip_prefix('=').unwrap_or(remainder).trim().to_string()
            };
            return Classified::Binding {
                name,
                value: clean_value(&value),
            };
        }
    }

    if let Some(after) = strip_keyword(text, "error") {
        let message = clean_value(after);
        return Classified::Raise(quoted_literal(&message).unwrap_or(message));
    }

    if let Some((name, value)) = field(text) {
        return Classified::Binding {
            name,
            value: clean_value(&value),
        };
    }

    Classified::Expression
}

/// `name(params) = body` or `name(params): body` → `function(params) body`
fn function_value(remainder: &str) -> String {
    let Some(close) = remainder.find(')') else {
        return remainder.to_string();
    };
    let params = &remainder[..=close];
    let body = remainder[close + 1..].trim_start();
    let body = body
        .strip_prefix('=')
        .or_else(|| body.strip_prefix(":::"))
        .or_else(|| body.strip_prefix("::"))
        .or_else(|| body.strip_prefix(':'))
        .unwrap_or(body)
        .trim();
    format!("function{} {}", params, body).trim_end().to_string()
}

/// Parse an object field definition (`name: v`, `'name':: v`, `name+: v`)
fn field(text: &str) -> Option<(String, String)> {
    let (name, after) = match text.chars().next()? {
        q @ ('"' | '\'') => {
            let end = text[1..].find(q)? + 1;
            (text[1..end].to_string(), &text[end + 1..])
        }
        c if is_ident_start(c) => {
            let name: String = text.chars().take_while(|c| is_ident_char(*c)).collect();
            if is_keyword(&name) {
                return None;
            }
            let after = &text[name.len()..];
            (name, after)
        }
        _ => return None,
    };

    let after = after.trim_start();
    if after.starts_with('(') {
        let value = function_value(after);
        return value.starts_with("function").then_some((name, value));
    }
    let after = after.strip_prefix('+').unwrap_or(after);
    let value = after.strip_prefix(":::").or_else(|| after.strip_prefix("::")).or_else(|| after.strip_prefix(':'))?;
    Some((name, value.trim().to_string()))
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let after = text.strip_prefix(keyword)?;
    match after.chars().next() {
        None => Some(after),
        Some(c) if c.is_whitespace() || c == '(' || c == '"' || c == '\'' => Some(after.trim_start()),
        _ => None,
    }
}

fn clean_value(value: &str) -> String {
    let value = value.trim();
    let value = value
        .strip_suffix(',')
        .or_else(|| value.strip_suffix(';'))
        .unwrap_or(value);
    value.trim_end().to_string()
}

/// Contents of a single- or double-quoted literal
fn quoted_literal(text: &str) -> Option<String> {
    let first = text.chars().next()?;
    if (first == '"' || first == '\'') && text.len() >= 2 && text.ends_with(first) {
        Some(text[1..text.len() - 1].to_string())
    } else {
        None
    }
}

/// `base + {` → `base + {...}`
fn elide_literal(value: &str, opener: char) -> String {
    let position = value.rfind(opener).unwrap_or(value.len());
    let closer = if opener == '[' { "[...]" } else { "{...}" };
    format!("{}{}", &value[..position], closer)
}

fn literal_type(opener: char) -> &'static str {
    if opener == '[' {
        "array"
    } else {
        "object"
    }
}

fn infer_type(value: &str) -> &'static str {
    let value = value.trim();
    if value.starts_with('"') || value.starts_with('\'') || value.starts_with("|||") {
        "string"
    } else if value == "true" || value == "false" {
        "boolean"
    } else if value == "null" {
        "null"
    } else if value.parse::<f64>().is_ok() {
        "number"
    } else if value.starts_with('{') {
        "object"
    } else if value.starts_with('[') {
        "array"
    } else if value.starts_with("function") {
        "function"
    } else if value.starts_with("import") {
        "import"
    } else {
        "expression"
    }
}

/// Unclosed openers (in order) and unmatched closers of one line
fn bracket_balance(text: &str) -> (Vec<char>, usize) {
    let mut stack: Vec<char> = Vec::new();
    let mut unmatched = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in text.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' | '[' | '(' => stack.push(c),
            '}' | ']' | ')' => {
                if stack.pop().is_none() && c != ')' {
                    unmatched += 1;
                }
            }
            _ => {}
        }
    }

    let openers = stack.into_iter().filter(|c| *c != '(').collect();
    (openers, unmatched)
}

fn ext_var_name(expression: &str) -> Option<&str> {
    let inner = expression.strip_prefix("std.extVar(")?.strip_suffix(')')?.trim();
    let first = inner.chars().next()?;
    if (first == '"' || first == '\'') && inner.len() >= 2 && inner.ends_with(first) {
        Some(&inner[1..inner.len() - 1])
    } else {
        None
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_ident_start) && chars.all(is_ident_char)
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "assert"
            | "else"
            | "error"
            | "false"
            | "for"
            | "function"
            | "if"
            | "import"
            | "importstr"
            | "importbin"
            | "in"
            | "local"
            | "null"
            | "self"
            | "super"
            | "tailstrict"
            | "then"
            | "true"
    )
}

/// Strips comments and text-block bodies, keeping columns intact
#[derive(Debug, Default)]
struct Lexer {
    in_block_comment: bool,
    in_text_block: bool,
}

impl Lexer {
    fn strip(&mut self, raw: &str) -> String {
        let chars: Vec<char> = raw.chars().collect();
        let mut out = String::with_capacity(raw.len());
        let mut quote: Option<char> = None;
        let mut i = 0;

        let starts = |i: usize, pat: &str| -> bool {
            pat.chars().enumerate().all(|(k, p)| chars.get(i + k) == Some(&p))
        };

        while i < chars.len() {
            let c = chars[i];

            if self.in_text_block {
                if starts(i, "|||") {
                    self.in_text_block = false;
                    out.push_str("   ");
                    i += 3;
                } else {
                    out.push(' ');
                    i += 1;
                }
                continue;
            }

            if self.in_block_comment {
                if starts(i, "*/") {
                    self.in_block_comment = false;
                    out.push_str("  ");
                    i += 2;
                } else {
                    out.push(' ');
                    i += 1;
                }
                continue;
            }

            if let Some(q) = quote {
                out.push(c);
                if c == '\\' {
                    if let Some(next) = chars.get(i + 1) {
                        out.push(*next);
                        i += 2;
                        continue;
                    }
                } else if c == q {
                    quote = None;
                }
                i += 1;
                continue;
            }

            match c {
                '"' | '\'' => {
                    quote = Some(c);
                    out.push(c);
                }
                '#' => break,
                '/' if starts(i, "//") => break,
                '/' if starts(i, "/*") => {
                    self.in_block_comment = true;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                '|' if starts(i, "|||") => {
                    // The text block opens on this line and its body starts on the next
                    self.in_text_block = true;
                    out.push_str("|||");
                    return out;
                }
                _ => out.push(c),
            }
            i += 1;
        }
        out
    }
}
