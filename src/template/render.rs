//! Rendering engine for SIRI templates
//!
//! Templates are plain text with actions between `{{` and `}}`:
//!
//! ```text
//! <RequestTimestamp>{{ dateTime .Now }}</RequestTimestamp>
//! <ValidUntil>{{ dateTime (addTime .Now "1h") }}</ValidUntil>
//! <RequestorRef>{{ .ClientRef }}</RequestorRef>
//! ```
//!
//! An action holds a pipeline of commands separated by `|`. Each command is a
//! field (`.Now`, `.ClientRef`), a string literal, a parenthesised pipeline or
//! a function call. The output of one command is passed as the last argument
//! of the next. `{{-` and `-}}` trim surrounding whitespace, `{{/* ... */}}` is
//! a comment.
//!
//! The whole template is parsed before anything is evaluated, so a syntax
//! error is always reported as such regardless of where it appears.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

use super::duration::parse_duration;
use super::types::{RenderContext, TemplateError, TemplateResult};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Render `text` against `ctx`.
///
/// Pure function: no state is kept between calls.
pub fn render(text: &str, ctx: &RenderContext) -> TemplateResult<String> {
    let nodes = Parser::new(text).parse()?;

    let mut out = String::with_capacity(text.len());
    for node in &nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Action(expr) => {
                let value = eval(expr, ctx)?;
                out.push_str(&value.to_string());
            }
        }
    }
    Ok(out)
}

#[derive(Debug)]
enum Node<'a> {
    Text(&'a str),
    Action(Expr),
}

#[derive(Debug, Clone)]
enum Expr {
    Field { name: String, offset: usize },
    Str(String),
    Call {
        name: String,
        args: Vec<Expr>,
        offset: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Field(String),
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Pipe,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

/// Outcome of scanning one `{{ ... }}` block
struct Action {
    tokens: Option<Vec<Token>>,
    end: usize,
    trim_after: bool,
}

struct Parser<'a> {
    src: &'a str,
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src }
    }

    fn parse(&self) -> TemplateResult<Vec<Node<'a>>> {
        let src = self.src;
        let mut nodes = Vec::new();
        let mut pos = 0;
        let mut trim_next_text = false;

        loop {
            let rest = &src[pos..];
            let Some(found) = rest.find(OPEN) else {
                self.push_text(&mut nodes, rest, trim_next_text, false);
                break;
            };

            let open = pos + found;
            let mut body = open + OPEN.len();
            let trim_before =
                src[body..].starts_with('-') && src[body + 1..].starts_with(is_space);
            if trim_before {
                body += 1;
            }

            self.push_text(&mut nodes, &src[pos..open], trim_next_text, trim_before);

            let action = self.scan_action(open, body)?;
            if let Some(tokens) = action.tokens {
                let mut cursor = 0;
                let expr = parse_pipeline(&tokens, &mut cursor, open, false)?;
                nodes.push(Node::Action(expr));
            }

            pos = action.end;
            trim_next_text = action.trim_after;
        }

        Ok(nodes)
    }

    fn push_text(&self, nodes: &mut Vec<Node<'a>>, text: &'a str, trim_start: bool, trim_end: bool) {
        let mut text = text;
        if trim_start {
            text = text.trim_start_matches(is_space);
        }
        if trim_end {
            text = text.trim_end_matches(is_space);
        }
        if !text.is_empty() {
            nodes.push(Node::Text(text));
        }
    }

    /// Tokenize an action body starting at `pos`, up to and including `}}`
    fn scan_action(&self, open: usize, mut pos: usize) -> TemplateResult<Action> {
        let src = self.src;
        let mut tokens = Vec::new();

        loop {
            let skipped_from = pos;
            while let Some(c) = src[pos..].chars().next().filter(|c| is_space(*c)) {
                pos += c.len_utf8();
            }
            let after_space = pos > skipped_from
                || src[..pos].chars().next_back().is_some_and(is_space);

            let rest = &src[pos..];
            let Some(c) = rest.chars().next() else {
                return Err(TemplateError::syntax(open, "unclosed action"));
            };

            if rest.starts_with(CLOSE) {
                return Ok(Action {
                    tokens: Some(tokens),
                    end: pos + CLOSE.len(),
                    trim_after: false,
                });
            }
            if after_space && rest.starts_with("-}}") {
                return Ok(Action {
                    tokens: Some(tokens),
                    end: pos + 3,
                    trim_after: true,
                });
            }

            if rest.starts_with("/*") {
                if !tokens.is_empty() {
                    return Err(TemplateError::syntax(pos, "comment must be the whole action"));
                }
                return self.scan_comment(open, pos);
            }

            let start = pos;
            let kind = match c {
                '(' => {
                    pos += 1;
                    TokenKind::LParen
                }
                ')' => {
                    pos += 1;
                    TokenKind::RParen
                }
                '|' => {
                    pos += 1;
                    TokenKind::Pipe
                }
                '"' => {
                    let (value, end) = scan_quoted(src, pos)?;
                    pos = end;
                    TokenKind::Str(value)
                }
                '`' => {
                    let body = &src[pos + 1..];
                    let Some(close) = body.find('`') else {
                        return Err(TemplateError::syntax(pos, "unterminated raw string"));
                    };
                    pos += close + 2;
                    TokenKind::Str(body[..close].to_string())
                }
                '.' => {
                    let name_len = src[pos + 1..]
                        .find(|c: char| !is_ident_char(c))
                        .unwrap_or(src.len() - pos - 1);
                    let name = src[pos + 1..pos + 1 + name_len].to_string();
                    pos += 1 + name_len;
                    TokenKind::Field(name)
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
                    pos += len;
                    TokenKind::Ident(rest[..len].to_string())
                }
                other => {
                    return Err(TemplateError::syntax(
                        pos,
                        format!("unexpected character {other:?} in action"),
                    ));
                }
            };

            tokens.push(Token { kind, offset: start });
        }
    }

    fn scan_comment(&self, open: usize, pos: usize) -> TemplateResult<Action> {
        let body = &self.src[pos + 2..];
        let Some(close) = body.find("*/") else {
            return Err(TemplateError::syntax(open, "unclosed comment"));
        };

        let comment_end = pos + 2 + close + 2;
        let rest = &self.src[comment_end..];
        let trimmed = rest.trim_start_matches(is_space);
        let spaces = rest.len() - trimmed.len();
        let end = comment_end + spaces;

        if spaces > 0 && trimmed.starts_with("-}}") {
            Ok(Action {
                tokens: None,
                end: end + 3,
                trim_after: true,
            })
        } else if trimmed.starts_with(CLOSE) {
            Ok(Action {
                tokens: None,
                end: end + CLOSE.len(),
                trim_after: false,
            })
        } else {
            Err(TemplateError::syntax(end, "comment ends before closing delimiter"))
        }
    }
}

fn scan_quoted(src: &str, start: usize) -> TemplateResult<(String, usize)> {
    let mut value = String::new();
    let mut chars = src[start + 1..].char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((value, start + 1 + i + 1)),
            '\n' => break,
            '\\' => {
                let escaped = match chars.next() {
                    Some((_, 'n')) => '\n',
                    Some((_, 't')) => '\t',
                    Some((_, 'r')) => '\r',
                    Some((_, '\\')) => '\\',
                    Some((_, '"')) => '"',
                    Some((j, other)) => {
                        return Err(TemplateError::syntax(
                            start + 1 + j,
                            format!("unknown escape sequence \\{other}"),
                        ));
                    }
                    None => break,
                };
                value.push(escaped);
            }
            c => value.push(c),
        }
    }

    Err(TemplateError::syntax(start, "unterminated quoted string"))
}

fn parse_pipeline(
    tokens: &[Token],
    cursor: &mut usize,
    offset: usize,
    nested: bool,
) -> TemplateResult<Expr> {
    let mut expr = parse_command(tokens, cursor, offset, nested)?;

    while let Some(token) = tokens.get(*cursor) {
        if token.kind != TokenKind::Pipe {
            break;
        }
        *cursor += 1;
        let next = parse_command(tokens, cursor, token.offset, nested)?;
        expr = match next {
            Expr::Call {
                name,
                mut args,
                offset,
            } => {
                args.push(expr);
                Expr::Call { name, args, offset }
            }
            _ => {
                return Err(TemplateError::syntax(
                    token.offset,
                    "only functions can follow '|'",
                ))
            }
        };
    }

    if !nested {
        if let Some(token) = tokens.get(*cursor) {
            return Err(TemplateError::syntax(token.offset, "unexpected ')'"));
        }
    }

    Ok(expr)
}

fn parse_command(
    tokens: &[Token],
    cursor: &mut usize,
    offset: usize,
    nested: bool,
) -> TemplateResult<Expr> {
    let mut operands: Vec<(Expr, bool)> = Vec::new();

    while let Some(token) = tokens.get(*cursor) {
        let operand = match &token.kind {
            TokenKind::Pipe => break,
            TokenKind::RParen if nested => break,
            TokenKind::RParen => {
                return Err(TemplateError::syntax(token.offset, "unexpected ')'"));
            }
            TokenKind::Field(name) => (
                Expr::Field {
                    name: name.clone(),
                    offset: token.offset,
                },
                false,
            ),
            TokenKind::Str(value) => (Expr::Str(value.clone()), false),
            TokenKind::Ident(name) => (
                Expr::Call {
                    name: name.clone(),
                    args: Vec::new(),
                    offset: token.offset,
                },
                true,
            ),
            TokenKind::LParen => {
                *cursor += 1;
                let inner = parse_pipeline(tokens, cursor, token.offset, true)?;
                match tokens.get(*cursor) {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => {}
                    _ => return Err(TemplateError::syntax(token.offset, "unclosed '('")),
                }
                (inner, false)
            }
        };
        operands.push(operand);
        *cursor += 1;
    }

    let mut operands = operands.into_iter();
    let Some((first, is_function)) = operands.next() else {
        return Err(TemplateError::syntax(offset, "missing value for command"));
    };
    let rest: Vec<Expr> = operands.map(|(expr, _)| expr).collect();

    match first {
        Expr::Call { name, offset, .. } if is_function => Ok(Expr::Call {
            name,
            args: rest,
            offset,
        }),
        expr if rest.is_empty() => Ok(expr),
        _ => Err(TemplateError::syntax(offset, "only functions accept arguments")),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Time(DateTime<Utc>),
    Str(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Time(_) => "time",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Time(t) => f.write_str(&format_date_time(t)),
            Value::Str(s) => f.write_str(s),
        }
    }
}

fn format_date_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn eval(expr: &Expr, ctx: &RenderContext) -> TemplateResult<Value> {
    match expr {
        Expr::Str(value) => Ok(Value::Str(value.clone())),
        Expr::Field { name, offset } => match name.as_str() {
            "Now" => Ok(Value::Time(ctx.now)),
            "ClientRef" => Ok(Value::Str(ctx.client_ref.clone())),
            "" => Err(TemplateError::Execution(format!(
                "cannot print the render context at byte {offset}"
            ))),
            other => Err(TemplateError::Execution(format!(
                "can't evaluate field {other} at byte {offset}"
            ))),
        },
        Expr::Call { name, args, offset } => {
            let args = args
                .iter()
                .map(|arg| eval(arg, ctx))
                .collect::<TemplateResult<Vec<_>>>()?;
            call(name, args, *offset)
        }
    }
}

fn call(name: &str, args: Vec<Value>, offset: usize) -> TemplateResult<Value> {
    match (name, args.as_slice()) {
        ("dateTime", [Value::Time(t)]) => Ok(Value::Str(format_date_time(t))),
        ("addTime", [Value::Time(t), Value::Str(duration)]) => Ok(Value::Time(add_time(*t, duration))),
        ("dateTime", _) | ("addTime", _) => Err(TemplateError::Execution(format!(
            "wrong arguments for {name} at byte {offset}: got ({})",
            args.iter().map(Value::type_name).collect::<Vec<_>>().join(", ")
        ))),
        _ => Err(TemplateError::Execution(format!(
            "function {name:?} not defined at byte {offset}"
        ))),
    }
}

/// Shift `t` by `duration`; an unparsable duration leaves `t` as it is so a
/// typo in an auto-response never blocks the reply
fn add_time(t: DateTime<Utc>, duration: &str) -> DateTime<Utc> {
    match parse_duration(duration).and_then(|d| t.checked_add_signed(d)) {
        Some(shifted) => shifted,
        None => {
            tracing::debug!(duration = %duration, "Ignoring unusable duration in addTime");
            t
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> RenderContext {
        RenderContext::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            "testClient",
        )
    }

    #[test]
    fn test_render_replaces_variables() {
        let template = r#"<Siri>
  <time>{{ dateTime .Now }}</time>
  <futureTime>{{ dateTime (addTime .Now "5m") }}<futureTime>
  <client>{{ .ClientRef }}</client>
</Siri>"#;

        let rendered = render(template, &ctx()).unwrap();
        assert_eq!(
            rendered,
            "<Siri>
  <time>2024-06-01T12:00:00Z</time>
  <futureTime>2024-06-01T12:05:00Z<futureTime>
  <client>testClient</client>
</Siri>"
        );
    }

    #[test]
    fn test_render_default_context() {
        let ctx = RenderContext::new(DateTime::<Utc>::UNIX_EPOCH, "");
        let rendered = render("{{ dateTime (addTime .Now \"5m\") }}|{{ .ClientRef }}|", &ctx).unwrap();
        assert_eq!(rendered, "1970-01-01T00:05:00Z||");
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render("", &ctx()).unwrap(), "");
    }

    #[test]
    fn test_render_plain_text_untouched() {
        let xml = "<Siri><Status>true</Status></Siri>";
        assert_eq!(render(xml, &ctx()).unwrap(), xml);
    }

    #[test]
    fn test_client_ref_is_verbatim() {
        let ctx = RenderContext::new(ctx().now, "A&B <C>");
        assert_eq!(render("{{.ClientRef}}", &ctx).unwrap(), "A&B <C>");
    }

    #[test]
    fn test_add_time_garbage_keeps_time() {
        assert_eq!(
            render(r#"{{ dateTime (addTime .Now "garbage") }}"#, &ctx()).unwrap(),
            "2024-06-01T12:00:00Z"
        );
        assert_eq!(
            render(r#"{{ addTime .Now "" }}"#, &ctx()).unwrap(),
            "2024-06-01T12:00:00Z"
        );
    }

    #[test]
    fn test_bare_now_renders_rfc3339() {
        assert_eq!(render("{{ .Now }}", &ctx()).unwrap(), "2024-06-01T12:00:00Z");
    }

    #[test]
    fn test_pipeline_and_raw_string() {
        let rendered = render("{{ addTime .Now `-1h30m` | dateTime }}", &ctx()).unwrap();
        assert_eq!(rendered, "2024-06-01T10:30:00Z");
    }

    #[test]
    fn test_string_may_contain_delimiters() {
        let rendered = render(r#"{{ dateTime (addTime .Now "}}") }}"#, &ctx()).unwrap();
        assert_eq!(rendered, "2024-06-01T12:00:00Z");
    }

    #[test]
    fn test_trim_markers_and_comments() {
        let rendered = render("<a>  {{- .ClientRef -}}  </a>{{/* ignored */}}", &ctx()).unwrap();
        assert_eq!(rendered, "<a>testClient</a>");

        let rendered = render("<a>\n  {{- /* gone */ -}}\n</a>", &ctx()).unwrap();
        assert_eq!(rendered, "<a></a>");
    }

    #[test]
    fn test_syntax_errors() {
        for template in [
            "<a>{{ .Now </a>",
            "{{ }}",
            r#"{{ addTime .Now "5m }}"#,
            "{{ dateTime (.Now }}",
            "{{ dateTime .Now) }}",
            "{{ .Now .ClientRef }}",
            "{{ .Now | .ClientRef }}",
            "{{ 42 }}",
            "{{/* never closed }}",
        ] {
            assert!(
                matches!(render(template, &ctx()), Err(TemplateError::Syntax { .. })),
                "template {template:?}"
            );
        }
    }

    #[test]
    fn test_syntax_error_reported_before_execution() {
        let template = "{{ undefined }} {{ .Now";
        assert!(matches!(
            render(template, &ctx()),
            Err(TemplateError::Syntax { .. })
        ));
    }

    #[test]
    fn test_execution_errors() {
        for template in [
            "{{ undefined .Now }}",
            "{{ .Unknown }}",
            "{{ . }}",
            r#"{{ dateTime "yesterday" }}"#,
            "{{ addTime .Now }}",
        ] {
            assert!(
                matches!(render(template, &ctx()), Err(TemplateError::Execution(_))),
                "template {template:?}"
            );
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let template = r#"{{ dateTime (addTime .Now "1h") }} {{ .ClientRef }}"#;
        assert_eq!(render(template, &ctx()).unwrap(), render(template, &ctx()).unwrap());
    }
}
