//! General-purpose tools

use agent_core::{AgentError, Result, Tool, ToolDefinition, ToolParameter, ToolParams, ToolParamsExt};
use async_trait::async_trait;
use serde_json::{Value, json};

/// DateTime tool - returns current time
#[derive(Clone, Copy, Debug, Default)]
pub struct DateTimeTool;

impl DateTimeTool {
    pub const NAME: &'static str = "datetime";
}

#[async_trait]
impl Tool for DateTimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(Self::NAME, "Get the current date and time (UTC)").param(
            "format",
            ToolParameter::string("Output format: 'iso', 'human', or 'unix'")
                .with_default("human")
                .with_enum(["iso", "human", "unix"]),
        )
    }

    async fn execute(&self, params: &ToolParams) -> Result<Value> {
        let format = params.opt_str("format").unwrap_or("human");
        let now = chrono::Utc::now();

        let formatted = match format {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        };
        Ok(json!({ "datetime": formatted, "format": format }))
    }
}

/// Calculator tool - evaluates arithmetic expressions
#[derive(Clone, Copy, Debug, Default)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub const NAME: &'static str = "calculate";
}

#[async_trait]
impl Tool for CalculatorTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(Self::NAME, "Evaluate an arithmetic expression (+ - * / ^ and parentheses)")
            .param(
                "expression",
                ToolParameter::string("Expression to evaluate, e.g. '(2 + 3) * 4'").required(),
            )
    }

    async fn execute(&self, params: &ToolParams) -> Result<Value> {
        let expression = params.str_param("expression")?;
        let result = evaluate_expression(expression).map_err(AgentError::ToolExecution)?;
        Ok(json!({ "expression": expression, "result": result }))
    }
}

/// Longest expression accepted, in characters
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Deepest nesting of parentheses, signs and exponents
pub const MAX_NESTING: usize = 64;

/// Recursive-descent evaluator over `+ - * / ^`, unary minus and parentheses.
/// `^` binds tightest and is right-associative. Input length and nesting are
/// bounded so hostile input fails instead of exhausting the stack.
pub fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    if expr.chars().count() > MAX_EXPRESSION_LEN {
        return Err(format!("expression longer than {MAX_EXPRESSION_LEN} characters"));
    }
    let tokens: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.sum()?;
    if let Some(c) = parser.peek() {
        return Err(format!("unexpected '{c}' at position {}", parser.pos));
    }
    if value.is_finite() {
        Ok(value)
    } else {
        Err("result is not a finite number".into())
    }
}

struct Parser {
    tokens: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).copied()
    }

    /// Run `step` one nesting level down
    fn nested(
        &mut self,
        step: fn(&mut Self) -> std::result::Result<f64, String>,
    ) -> std::result::Result<f64, String> {
        if self.depth >= MAX_NESTING {
            return Err("expression nested too deeply".into());
        }
        self.depth += 1;
        let value = step(self);
        self.depth -= 1;
        value
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn sum(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.product()?;
        loop {
            if self.eat('+') {
                value += self.product()?;
            } else if self.eat('-') {
                value -= self.product()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn product(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.power()?;
        loop {
            if self.eat('*') {
                value *= self.power()?;
            } else if self.eat('/') {
                let divisor = self.power()?;
                if divisor == 0.0 {
                    return Err("Division by zero".into());
                }
                value /= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.unary()?;
        if self.eat('^') {
            let exponent = self.nested(Self::power)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        if self.eat('-') {
            return Ok(-self.nested(Self::unary)?);
        }
        if self.eat('+') {
            return self.nested(Self::unary);
        }
        self.atom()
    }

    fn atom(&mut self) -> std::result::Result<f64, String> {
        if self.eat('(') {
            let value = self.nested(Self::sum)?;
            if !self.eat(')') {
                return Err("missing ')'".into());
            }
            return Ok(value);
        }

        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.peek() {
                Some(c) => format!("unexpected '{c}' at position {start}"),
                None => "unexpected end of expression".into(),
            });
        }
        let literal: String = self.tokens[start..self.pos].iter().collect();
        literal.parse::<f64>().map_err(|e| format!("Parse error: {e}"))
    }
}
