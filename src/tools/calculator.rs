//! Calculator 工具：四则运算表达式求值（+ - * / 与括号、一元负号）

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression with + - * / and parentheses."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": { "type": "string", "description": "Expression, e.g. (1 + 2) * 3" }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let expr = args
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or("Missing 'expression' argument")?;
        let value = evaluate(expr)?;
        Ok(format_number(value))
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// 括号嵌套上限；表达式来自模型输出，递归深度必须有界
const MAX_DEPTH: usize = 256;

/// 递归下降求值：expr := term (('+'|'-') term)*；term := factor (('*'|'/') factor)*；
/// factor := '-'* (number | '(' expr ')')
pub fn evaluate(input: &str) -> Result<f64, String> {
    let mut parser = Parser {
        chars: input.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    if parser.chars.is_empty() {
        return Err("Empty expression".to_string());
    }
    let value = parser.expr()?;
    if parser.pos < parser.chars.len() {
        return Err(format!(
            "Unexpected character '{}' at position {}",
            parser.chars[parser.pos], parser.pos
        ));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                '+' => {
                    self.pos += 1;
                    value += self.term()?;
                }
                '-' => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                '*' => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                '/' => {
                    self.pos += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("Division by zero".to_string());
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, String> {
        let mut negate = false;
        while self.peek() == Some('-') {
            self.pos += 1;
            negate = !negate;
        }
        let value = self.operand()?;
        Ok(if negate { -value } else { value })
    }

    fn operand(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('(') => {
                if self.depth >= MAX_DEPTH {
                    return Err("Expression nested too deeply".to_string());
                }
                self.depth += 1;
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(')') {
                    return Err("Missing closing parenthesis".to_string());
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal
                    .parse::<f64>()
                    .map_err(|_| format!("Invalid number '{}'", literal))
            }
            Some(c) => Err(format!("Unexpected character '{}' at position {}", c, self.pos)),
            None => Err("Unexpected end of expression".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_and_parens() {
        assert_eq!(evaluate("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(evaluate("-4 / 2 + 10").unwrap(), 8.0);
    }

    #[test]
    fn test_errors() {
        assert!(evaluate("").is_err());
        assert!(evaluate("1 / 0").unwrap_err().contains("Division"));
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("2 $ 3").is_err());
    }

    #[test]
    fn test_repeated_unary_minus() {
        assert_eq!(evaluate("--3").unwrap(), 3.0);
        assert_eq!(evaluate("2 - -3").unwrap(), 5.0);
        assert_eq!(evaluate("-(-(2))").unwrap(), 2.0);

        let long = format!("{}1", "-".repeat(500_000));
        assert_eq!(evaluate(&long).unwrap(), 1.0);
    }

    #[test]
    fn test_nesting_depth_is_bounded() {
        let ok = format!("{}7{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert_eq!(evaluate(&ok).unwrap(), 7.0);

        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(evaluate(&deep).unwrap_err().contains("nested too deeply"));
        let deep_neg = "-(".repeat(100_000);
        assert!(evaluate(&deep_neg).unwrap_err().contains("nested too deeply"));
    }

    #[tokio::test]
    async fn test_tool_rejects_deep_nesting_as_error_text() {
        let expr = format!("{}1", "(".repeat(10_000));
        let err = CalculatorTool
            .execute(serde_json::json!({ "expression": expr }))
            .await
            .unwrap_err();
        assert!(err.contains("nested too deeply"));
    }

    #[tokio::test]
    async fn test_tool_formats_integers() {
        let out = CalculatorTool
            .execute(serde_json::json!({ "expression": "6 * 7" }))
            .await
            .unwrap();
        assert_eq!(out, "42");
        let out = CalculatorTool
            .execute(serde_json::json!({ "expression": "1 / 4" }))
            .await
            .unwrap();
        assert_eq!(out, "0.25");
        assert!(CalculatorTool.execute(Value::Null).await.is_err());
    }
}
