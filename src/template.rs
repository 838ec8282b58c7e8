//! Small text template language for custom prefixes and HTTP status rows.
//!
//! Templates are literal text mixed with `{{ ... }}` actions. An action is a
//! pipeline: an operand (a field path such as `.Body.status`, or a
//! parenthesised pipeline with an optional path) followed by `| function`
//! stages.

use serde_json::{Map, Value};

/// Rendering of a null value
const NO_VALUE: &str = "<no value>";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template contains no {{{{ ... }}}} action: {0}")]
    NoAction(String),
    #[error("unclosed action at byte {0}")]
    Unclosed(usize),
    #[error("empty action at byte {0}")]
    EmptyAction(usize),
    #[error("unexpected `{token}` in action `{action}`")]
    Syntax { action: String, token: String },
    #[error("function `{0}` not defined")]
    UnknownFunction(String),
    #[error("can't evaluate field {0}")]
    UnknownField(String),
    #[error("can't evaluate field {field} in {kind} value")]
    NotAMap { field: String, kind: &'static str },
    #[error("{function}: {message}")]
    Function { function: String, message: String },
}

/// Values a template can read fields from
pub trait TemplateData {
    /// Value of a top-level field, `None` if the field does not exist
    fn field(&self, name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    JsonParse,
    Upper,
    Lower,
    Trim,
}

impl Function {
    fn lookup(name: &str) -> Result<Self, TemplateError> {
        match name {
            "jsonParse" => Ok(Self::JsonParse),
            "upper" => Ok(Self::Upper),
            "lower" => Ok(Self::Lower),
            "trim" => Ok(Self::Trim),
            _ => Err(TemplateError::UnknownFunction(name.to_string())),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::JsonParse => "jsonParse",
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Trim => "trim",
        }
    }

    fn call(self, value: Value) -> Result<Value, TemplateError> {
        let text = match (self, &value) {
            (Self::JsonParse, Value::String(s)) if s.trim().is_empty() => {
                return Ok(Value::Object(Map::new()));
            }
            (_, Value::String(s)) => s.clone(),
            (_, Value::Null) => String::new(),
            _ => {
                return Err(TemplateError::Function {
                    function: self.name().to_string(),
                    message: format!("expected string, got {}", kind(&value)),
                });
            }
        };

        match self {
            Self::JsonParse => {
                serde_json::from_str(&text).map_err(|e| TemplateError::Function {
                    function: self.name().to_string(),
                    message: e.to_string(),
                })
            }
            Self::Upper => Ok(Value::String(text.to_uppercase())),
            Self::Lower => Ok(Value::String(text.to_lowercase())),
            Self::Trim => Ok(Value::String(text.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    /// Field path from the data root
    Path(Vec<String>),
    Group(Box<Pipeline>, Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pipeline {
    operand: Operand,
    stages: Vec<Function>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Action(Pipeline),
}

/// A compiled template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Compile a template, which must contain at least one action
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut nodes = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                nodes.push(Node::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or(TemplateError::Unclosed(offset + start))?;
            let action = after[..end].trim();
            if action.is_empty() {
                return Err(TemplateError::EmptyAction(offset + start));
            }
            nodes.push(Node::Action(Parser::new(action).pipeline()?));

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            nodes.push(Node::Text(rest.to_string()));
        }

        if !nodes.iter().any(|n| matches!(n, Node::Action(_))) {
            return Err(TemplateError::NoAction(source.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether any action reads the top-level field `name`
    pub fn references(&self, name: &str) -> bool {
        self.nodes.iter().any(|node| match node {
            Node::Action(pipeline) => pipeline.references(name),
            Node::Text(_) => false,
        })
    }

    /// Append `{{.field}}` to the end of the template
    pub fn append_field(&mut self, name: &str) {
        self.source.push_str(&format!("{{{{.{name}}}}}"));
        self.nodes.push(Node::Action(Pipeline {
            operand: Operand::Path(vec![name.to_string()]),
            stages: Vec::new(),
        }));
    }

    pub fn render(&self, data: &dyn TemplateData) -> Result<String, TemplateError> {
        let mut out = String::new();
        let mut i = 0;

        while i < self.nodes.len() {
            match &self.nodes[i] {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => {
                    let mut value = pipeline.eval(data)?;
                    let mut remainder = None;
                    // `{{...}}.key` indexes into a map or array result
                    if matches!(value, Value::Object(_) | Value::Array(_))
                        && let Some(Node::Text(text)) = self.nodes.get(i + 1)
                    {
                        let (path, rest) = split_trailing_path(text);
                        if !path.is_empty() {
                            value = index_path(value, &path)?;
                            remainder = Some(rest);
                            i += 1;
                        }
                    }
                    out.push_str(&display(&value));
                    if let Some(rest) = remainder {
                        out.push_str(rest);
                    }
                }
            }
            i += 1;
        }

        Ok(out)
    }
}

impl Pipeline {
    fn references(&self, name: &str) -> bool {
        match &self.operand {
            Operand::Path(path) => path.first().is_some_and(|f| f == name),
            Operand::Group(inner, _) => inner.references(name),
        }
    }

    fn eval(&self, data: &dyn TemplateData) -> Result<Value, TemplateError> {
        let mut value = match &self.operand {
            Operand::Path(path) => {
                let (first, rest) = path
                    .split_first()
                    .ok_or_else(|| TemplateError::UnknownField(".".to_string()))?;
                let root = data
                    .field(first)
                    .ok_or_else(|| TemplateError::UnknownField(first.clone()))?;
                index_path(root, rest)?
            }
            Operand::Group(inner, path) => index_path(inner.eval(data)?, path)?,
        };
        for stage in &self.stages {
            value = stage.call(value)?;
        }
        Ok(value)
    }
}

/// Recursive-descent parser over one action body
struct Parser<'a> {
    action: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(action: &'a str) -> Self {
        Self {
            action,
            chars: action.char_indices().peekable(),
        }
    }

    fn pipeline(&mut self) -> Result<Pipeline, TemplateError> {
        let pipeline = self.pipeline_inner()?;
        self.skip_ws();
        if let Some(&(i, _)) = self.chars.peek() {
            return Err(self.syntax(&self.action[i..]));
        }
        Ok(pipeline)
    }

    fn pipeline_inner(&mut self) -> Result<Pipeline, TemplateError> {
        let operand = self.operand()?;
        let mut stages = Vec::new();
        loop {
            self.skip_ws();
            match self.chars.peek() {
                Some(&(_, '|')) => {
                    self.chars.next();
                    self.skip_ws();
                    let name = self.ident();
                    if name.is_empty() {
                        return Err(self.syntax("|"));
                    }
                    stages.push(Function::lookup(&name)?);
                }
                _ => break,
            }
        }
        Ok(Pipeline { operand, stages })
    }

    fn operand(&mut self) -> Result<Operand, TemplateError> {
        self.skip_ws();
        match self.chars.peek() {
            Some(&(_, '.')) => Ok(Operand::Path(self.path()?)),
            Some(&(_, '(')) => {
                self.chars.next();
                let inner = self.pipeline_inner()?;
                self.skip_ws();
                match self.chars.next() {
                    Some((_, ')')) => {}
                    Some((i, _)) => return Err(self.syntax(&self.action[i..])),
                    None => return Err(self.syntax("(")),
                }
                let path = match self.chars.peek() {
                    Some(&(_, '.')) => self.path()?,
                    _ => Vec::new(),
                };
                Ok(Operand::Group(Box::new(inner), path))
            }
            Some(&(i, _)) => Err(self.syntax(&self.action[i..])),
            None => Err(self.syntax("")),
        }
    }

    fn path(&mut self) -> Result<Vec<String>, TemplateError> {
        let mut path = Vec::new();
        while let Some(&(_, '.')) = self.chars.peek() {
            self.chars.next();
            let segment = self.ident();
            if segment.is_empty() {
                if path.is_empty() {
                    return Err(TemplateError::UnknownField(".".to_string()));
                }
                return Err(self.syntax("."));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn ident(&mut self) -> String {
        let mut ident = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                ident.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        ident
    }

    fn skip_ws(&mut self) {
        while self.chars.peek().is_some_and(|&(_, c)| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn syntax(&self, token: &str) -> TemplateError {
        TemplateError::Syntax {
            action: self.action.to_string(),
            token: token.to_string(),
        }
    }
}

/// Split leading `.key.key` segments off literal text
fn split_trailing_path(text: &str) -> (Vec<String>, &str) {
    let mut path = Vec::new();
    let mut rest = text;
    while let Some(after_dot) = rest.strip_prefix('.') {
        let len = after_dot
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(after_dot.len());
        if len == 0 {
            break;
        }
        path.push(after_dot[..len].to_string());
        rest = &after_dot[len..];
    }
    (path, rest)
}

fn index_path(mut value: Value, path: &[String]) -> Result<Value, TemplateError> {
    for segment in path {
        value = match value {
            Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
            Value::Array(mut items) => match segment.parse::<usize>() {
                Ok(i) if i < items.len() => items.swap_remove(i),
                _ => Value::Null,
            },
            Value::Null => Value::Null,
            other => {
                return Err(TemplateError::NotAMap {
                    field: segment.clone(),
                    kind: kind(&other),
                });
            }
        };
    }
    Ok(value)
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => NO_VALUE.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    struct Record {
        body: &'static str,
    }

    impl TemplateData for Record {
        fn field(&self, name: &str) -> Option<Value> {
            match name {
                "Index" => Some(json!(2)),
                "Name" => Some(json!("web")),
                "Body" => Some(json!(self.body)),
                _ => None,
            }
        }
    }

    fn render(source: &str, body: &'static str) -> Result<String, TemplateError> {
        Template::parse(source)?.render(&Record { body })
    }

    #[rstest]
    #[case("{{.Index}}-{{.Name}}", "2-web")]
    #[case("{{ .Name | upper }}", "WEB")]
    #[case("{{.Body | jsonParse}}.ok", "true")]
    #[case("{{.Body | jsonParse}}.ok!", "true!")]
    #[case("{{(.Body | jsonParse).ok}}", "true")]
    #[case("{{(.Body | jsonParse).missing}}", "<no value>")]
    #[case("{{.Body | jsonParse}}", r#"{"ok":true}"#)]
    #[case("v{{.Index}}.0", "v2.0")]
    fn template_render_produces_expected_text(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(render(source, r#"{"ok":true}"#).unwrap(), expected);
    }

    #[test]
    fn template_json_parse_of_empty_body_is_empty_map() {
        assert_eq!(render("{{.Body | jsonParse}}.ok", "").unwrap(), "<no value>");
    }

    #[test]
    fn template_json_parse_reports_invalid_json() {
        let err = render("{{.Body | jsonParse}}", "not json").unwrap_err();
        assert!(matches!(err, TemplateError::Function { .. }));
    }

    #[rstest]
    #[case("plain text", TemplateError::NoAction("plain text".into()))]
    #[case("{{.Name", TemplateError::Unclosed(0))]
    #[case("a{{ }}", TemplateError::EmptyAction(1))]
    #[case("{{.Name | shout}}", TemplateError::UnknownFunction("shout".into()))]
    fn template_parse_rejects_malformed_source(
        #[case] source: &str,
        #[case] expected: TemplateError,
    ) {
        assert_eq!(Template::parse(source).unwrap_err(), expected);
    }

    #[test]
    fn template_render_rejects_unknown_field() {
        let err = render("{{.Nope}}", "").unwrap_err();
        assert_eq!(err, TemplateError::UnknownField("Nope".into()));
    }

    #[test]
    fn template_append_field_adds_action() {
        let mut template = Template::parse("{{.Name}}").unwrap();
        assert!(!template.references("Index"));

        template.append_field("Index");

        assert!(template.references("Index"));
        assert_eq!(template.source(), "{{.Name}}{{.Index}}");
        assert_eq!(template.render(&Record { body: "" }).unwrap(), "web2");
    }
}
