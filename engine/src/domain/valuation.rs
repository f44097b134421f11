//! The external valuation computation, represented as a swappable trait.
//!
//! The actual valuation engine is a black box invoked by reference; this
//! module ships a deterministic demo implementation so the rest of the
//! pipeline is runnable end-to-end without an external pricing system.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("task execution failed: {0}")]
    ExecutionFailed(String),
}

/// A task worker's computation, given the hydrated task XML fragment.
pub trait ValuationTask: Send + Sync {
    fn execute(&self, task_xml: &str) -> Result<String, TaskError>;
}

/// Demo valuator: extracts the content of an `<expr>...</expr>` child (or,
/// failing that, the task element's own text content) and evaluates it as a
/// small arithmetic expression over `+ - * /` and parentheses with
/// floating-point numbers. Returns the result formatted as a decimal string.
pub struct DemoValuator;

impl DemoValuator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DemoValuator {
    fn default() -> Self {
        Self::new()
    }
}

impl ValuationTask for DemoValuator {
    fn execute(&self, task_xml: &str) -> Result<String, TaskError> {
        let expr = extract_expression(task_xml)
            .ok_or_else(|| TaskError::ExecutionFailed("no evaluable expression".into()))?;
        let value = eval_expr(&expr).map_err(TaskError::ExecutionFailed)?;
        Ok(format_number(value))
    }
}

/// Pull the text to evaluate out of a task fragment: prefer an `<expr>`
/// child's text, otherwise fall back to the element's own text content
/// (e.g. after hydration substituted a numeric result).
fn extract_expression(fragment: &str) -> Option<String> {
    if let Some(start) = fragment.find("<expr>") {
        let rest = &fragment[start + "<expr>".len()..];
        let end = rest.find("</expr>")?;
        let text = rest[..end].trim();
        return (!text.is_empty()).then(|| text.to_string());
    }

    // No <expr> child: strip the outer tag and use the remaining text, if any.
    let gt = fragment.find('>')?;
    let after_open = &fragment[gt + 1..];
    let lt = after_open.rfind("</")?;
    let text = after_open[..lt].trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

// ---------------------------------------------------------------------------
// Minimal arithmetic expression evaluator: +  -  *  /  ( )  and f64 literals.
// ---------------------------------------------------------------------------

fn eval_expr(input: &str) -> Result<f64, String> {
    let tokens = tokenize(input)?;
    let mut pos = 0;
    let value = parse_additive(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(format!("unexpected trailing input in expression '{input}'"));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number literal '{text}'"))?;
                tokens.push(Token::Number(n));
            }
            other => return Err(format!("unexpected character '{other}' in expression")),
        }
    }
    Ok(tokens)
}

fn parse_additive(tokens: &[Token], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_multiplicative(tokens, pos)?;
    loop {
        match tokens.get(*pos) {
            Some(Token::Plus) => {
                *pos += 1;
                value += parse_multiplicative(tokens, pos)?;
            }
            Some(Token::Minus) => {
                *pos += 1;
                value -= parse_multiplicative(tokens, pos)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_multiplicative(tokens: &[Token], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_unary(tokens, pos)?;
    loop {
        match tokens.get(*pos) {
            Some(Token::Star) => {
                *pos += 1;
                value *= parse_unary(tokens, pos)?;
            }
            Some(Token::Slash) => {
                *pos += 1;
                let divisor = parse_unary(tokens, pos)?;
                if divisor == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= divisor;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_unary(tokens: &[Token], pos: &mut usize) -> Result<f64, String> {
    if let Some(Token::Minus) = tokens.get(*pos) {
        *pos += 1;
        return Ok(-parse_unary(tokens, pos)?);
    }
    parse_primary(tokens, pos)
}

fn parse_primary(tokens: &[Token], pos: &mut usize) -> Result<f64, String> {
    match tokens.get(*pos) {
        Some(Token::Number(n)) => {
            *pos += 1;
            Ok(*n)
        }
        Some(Token::LParen) => {
            *pos += 1;
            let value = parse_additive(tokens, pos)?;
            match tokens.get(*pos) {
                Some(Token::RParen) => {
                    *pos += 1;
                    Ok(value)
                }
                _ => Err("expected closing parenthesis".to_string()),
            }
        }
        other => Err(format!("unexpected token in expression: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_simple_addition() {
        assert_eq!(eval_expr("1 + 2").unwrap(), 3.0);
    }

    #[test]
    fn test_eval_operator_precedence() {
        assert_eq!(eval_expr("2 + 3 * 4").unwrap(), 14.0);
    }

    #[test]
    fn test_eval_parentheses() {
        assert_eq!(eval_expr("(2 + 3) * 4").unwrap(), 20.0);
    }

    #[test]
    fn test_eval_division_by_zero() {
        assert!(eval_expr("1 / 0").is_err());
    }

    #[test]
    fn test_demo_valuator_executes_expr_element() {
        let valuator = DemoValuator::new();
        let result = valuator.execute(r#"<t id="a"><expr>2 * 21</expr></t>"#).unwrap();
        assert_eq!(result, "42.0");
    }

    #[test]
    fn test_demo_valuator_falls_back_to_text_content() {
        let valuator = DemoValuator::new();
        let result = valuator.execute(r#"<t id="a">5 + 5</t>"#).unwrap();
        assert_eq!(result, "10.0");
    }

    #[test]
    fn test_demo_valuator_errors_without_expression() {
        let valuator = DemoValuator::new();
        let err = valuator.execute(r#"<t id="a"/>"#).unwrap_err();
        assert!(matches!(err, TaskError::ExecutionFailed(_)));
    }
}
