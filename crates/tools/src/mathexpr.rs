//! Arithmetic expression evaluation.
//!
//! Backs two things: the turn controller's math shortcut (a message that
//! is itself a pure expression is answered locally, without an LLM call)
//! and the `calculator` tool offered to the model.
//!
//! Supports `+`, `-`, `*`, `/`, parentheses, unary minus, and decimals.
//! Implemented as a shunting-yard pass to RPN followed by a stack fold.

use async_trait::async_trait;
use chatbridge_core::error::ToolError;
use chatbridge_core::tool::{Tool, ToolResult};

/// Whether a message looks like a bare arithmetic expression worth
/// answering locally: only expression characters, at least one digit,
/// and at least one operator.
pub fn is_arithmetic(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || "+-*/(). \t".contains(c))
        && trimmed.chars().any(|c| c.is_ascii_digit())
        && trimmed.chars().any(|c| "+-*/".contains(c))
}

/// Format an evaluation result, dropping the trailing `.0` on integers.
pub fn format_result(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Evaluate an arithmetic expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let rpn = to_rpn(expr)?;
    eval_rpn(&rpn)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Add,
    Sub,
    Mul,
    Div,
    /// Unary minus
    Neg,
    LParen,
}

fn precedence(op: Token) -> u8 {
    match op {
        Token::Neg => 3,
        Token::Mul | Token::Div => 2,
        Token::Add | Token::Sub => 1,
        _ => 0,
    }
}

/// Tokenize and convert to reverse Polish notation in one pass.
fn to_rpn(input: &str) -> Result<Vec<Token>, String> {
    let mut output: Vec<Token> = Vec::new();
    let mut ops: Vec<Token> = Vec::new();
    // Tracks whether the previous token can end an expression; decides
    // whether '-' is binary or unary.
    let mut prev_is_value = false;

    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut num = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = num.parse().map_err(|_| format!("Invalid number: {num}"))?;
                output.push(Token::Num(value));
                prev_is_value = true;
            }
            '(' => {
                chars.next();
                ops.push(Token::LParen);
                prev_is_value = false;
            }
            ')' => {
                chars.next();
                loop {
                    match ops.pop() {
                        Some(Token::LParen) => break,
                        Some(op) => output.push(op),
                        None => return Err("Unbalanced parenthesis".into()),
                    }
                }
                prev_is_value = true;
            }
            '+' | '-' | '*' | '/' => {
                chars.next();
                let op = match c {
                    '-' if !prev_is_value => Token::Neg,
                    '+' => Token::Add,
                    '-' => Token::Sub,
                    '*' => Token::Mul,
                    '/' => Token::Div,
                    _ => unreachable!(),
                };
                // Unary minus is right-associative; binaries are left.
                while let Some(&top) = ops.last() {
                    let pop = if op == Token::Neg {
                        precedence(top) > precedence(op)
                    } else {
                        precedence(top) >= precedence(op)
                    };
                    if pop && top != Token::LParen {
                        output.push(ops.pop().unwrap());
                    } else {
                        break;
                    }
                }
                ops.push(op);
                prev_is_value = false;
            }
            other => return Err(format!("Unexpected character: '{other}'")),
        }
    }

    while let Some(op) = ops.pop() {
        if op == Token::LParen {
            return Err("Unbalanced parenthesis".into());
        }
        output.push(op);
    }

    if output.is_empty() {
        return Err("Empty expression".into());
    }
    Ok(output)
}

fn eval_rpn(tokens: &[Token]) -> Result<f64, String> {
    let mut stack: Vec<f64> = Vec::new();

    for &token in tokens {
        match token {
            Token::Num(n) => stack.push(n),
            Token::Neg => {
                let v = stack.pop().ok_or("Malformed expression")?;
                stack.push(-v);
            }
            op => {
                let rhs = stack.pop().ok_or("Malformed expression")?;
                let lhs = stack.pop().ok_or("Malformed expression")?;
                let result = match op {
                    Token::Add => lhs + rhs,
                    Token::Sub => lhs - rhs,
                    Token::Mul => lhs * rhs,
                    Token::Div => {
                        if rhs == 0.0 {
                            return Err("Division by zero".into());
                        }
                        lhs / rhs
                    }
                    _ => return Err("Malformed expression".into()),
                };
                stack.push(result);
            }
        }
    }

    if stack.len() != 1 {
        return Err("Malformed expression".into());
    }
    Ok(stack[0])
}

/// The calculator tool exposed to the model.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression. Supports +, -, *, /, parentheses, and decimal numbers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '(2 + 3) * 4'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?;

        Ok(match evaluate(expr) {
            Ok(value) => ToolResult::ok(format_result(value)),
            Err(e) => ToolResult::failed(format!("Error: {e}")),
        })
    }
}
