//! Calculator addon: arithmetic tools plus a helper prompt.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::addons::{
    Addon, AddonContext, AddonError, HasPrompts, HasTools, PromptArgument, PromptDef, ToolDef,
};

/// Parameters for the `calculate` tool.
#[derive(Debug, Deserialize, JsonSchema)]
struct CalculateParams {
    /// Mathematical expression to calculate.
    expression: String,
}

/// Parameters for the `factorial` tool.
#[derive(Debug, Deserialize, JsonSchema)]
struct FactorialParams {
    /// Number to calculate factorial for.
    number: u64,
}

/// Arithmetic over `+ - * /`, parentheses, and unary minus.
pub struct CalculatorAddon;

impl CalculatorAddon {
    pub fn new(_ctx: AddonContext) -> Self {
        Self
    }
}

#[async_trait]
impl Addon for CalculatorAddon {
    fn name(&self) -> &str {
        "calculator"
    }

    async fn init(&mut self) -> Result<(), AddonError> {
        info!("Calculator addon initialized");
        Ok(())
    }

    fn as_tool_source(&self) -> Option<&dyn HasTools> {
        Some(self)
    }

    fn as_prompt_source(&self) -> Option<&dyn HasPrompts> {
        Some(self)
    }
}

impl HasTools for CalculatorAddon {
    fn declared_tools(&self) -> Vec<ToolDef> {
        vec![
            ToolDef {
                name: "calculate".to_string(),
                title: Some("Math calculate".to_string()),
                description: Some("Perform mathematical calculations".to_string()),
                input_schema: serde_json::to_value(schemars::schema_for!(CalculateParams))
                    .unwrap_or_else(|_| json!({"type": "object"})),
                handler: Arc::new(|args| {
                    async move {
                        let params: CalculateParams = serde_json::from_value(args)
                            .map_err(|e| AddonError::invalid_arguments(e.to_string()))?;
                        match evaluate(&params.expression) {
                            Ok(result) => Ok(json!({
                                "success": true,
                                "expression": params.expression,
                                "result": result,
                                "timestamp": chrono::Utc::now().to_rfc3339()
                            })),
                            Err(_) => Ok(json!({
                                "success": false,
                                "expression": params.expression,
                                "error": "Invalid expression"
                            })),
                        }
                    }
                    .boxed()
                }),
            },
            ToolDef {
                name: "factorial".to_string(),
                title: Some("Math Factorial".to_string()),
                description: Some("Calculate factorial of a number".to_string()),
                input_schema: serde_json::to_value(schemars::schema_for!(FactorialParams))
                    .unwrap_or_else(|_| json!({"type": "object"})),
                handler: Arc::new(|args| {
                    async move {
                        let params: FactorialParams = serde_json::from_value(args)
                            .map_err(|e| AddonError::invalid_arguments(e.to_string()))?;
                        if params.number > 20 {
                            return Err(AddonError::invalid_arguments(
                                "Factorial overflows above 20",
                            ));
                        }
                        let result: u64 = (1..=params.number).product();
                        Ok(json!({
                            "number": params.number,
                            "result": result
                        }))
                    }
                    .boxed()
                }),
            },
        ]
    }
}

impl HasPrompts for CalculatorAddon {
    fn declared_prompts(&self) -> Vec<PromptDef> {
        vec![PromptDef {
            name: "math_helper".to_string(),
            description: Some("Get help with math problems".to_string()),
            arguments: vec![PromptArgument {
                name: "problem_type".to_string(),
                description: Some("Type of math problem".to_string()),
                required: false,
            }],
            handler: Arc::new(|_args| {
                async move {
                    Ok(json!({
                        "description": "Math helper",
                        "messages": [{
                            "role": "user",
                            "content": {
                                "type": "text",
                                "text": "I can help with calculations and factorials."
                            }
                        }]
                    }))
                }
                .boxed()
            }),
        }]
    }
}

/// Evaluate an arithmetic expression.
///
/// Grammar: expr = term (('+'|'-') term)*; term = factor (('*'|'/')
/// factor)*; factor = '-' factor | number | '(' expr ')'.
fn evaluate(input: &str) -> Result<f64, String> {
    let mut parser = Parser {
        chars: input.chars().peekable(),
    };
    let value = parser.expr()?;
    parser.skip_whitespace();
    if parser.chars.peek().is_some() {
        return Err("trailing input".to_string());
    }
    if !value.is_finite() {
        return Err("result is not finite".to_string());
    }
    Ok(value)
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl Parser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some('+') => {
                    self.chars.next();
                    value += self.term()?;
                }
                Some('-') => {
                    self.chars.next();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some('*') => {
                    self.chars.next();
                    value *= self.factor()?;
                }
                Some('/') => {
                    self.chars.next();
                    value /= self.factor()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64, String> {
        self.skip_whitespace();
        match self.chars.peek() {
            Some('-') => {
                self.chars.next();
                Ok(-self.factor()?)
            }
            Some('(') => {
                self.chars.next();
                let value = self.expr()?;
                self.skip_whitespace();
                if self.chars.next() != Some(')') {
                    return Err("expected closing parenthesis".to_string());
                }
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || *c == '.' => self.number(),
            other => Err(format!("unexpected input: {other:?}")),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let mut literal = String::new();
        while self
            .chars
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            literal.push(self.chars.next().ok_or("exhausted input")?);
        }
        literal
            .parse()
            .map_err(|_| format!("invalid number: {literal}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_precedence() {
        assert_eq!(evaluate("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(evaluate("10 / 4").unwrap(), 2.5);
        assert_eq!(evaluate("-3 + 5").unwrap(), 2.0);
        assert_eq!(evaluate("2 * -(1 + 1)").unwrap(), -4.0);
    }

    #[test]
    fn test_evaluate_rejects_garbage() {
        assert!(evaluate("").is_err());
        assert!(evaluate("1 +").is_err());
        assert!(evaluate("(1").is_err());
        assert!(evaluate("two plus two").is_err());
        assert!(evaluate("1 / 0").is_err());
    }

    #[tokio::test]
    async fn test_calculate_tool() {
        let addon = CalculatorAddon;
        let tools = addon.declared_tools();
        let calculate = tools.iter().find(|t| t.name == "calculate").unwrap();

        let result = (calculate.handler)(serde_json::json!({"expression": "6 * 7"}))
            .await
            .unwrap();
        assert_eq!(result["success"], serde_json::json!(true));
        assert_eq!(result["result"], serde_json::json!(42.0));

        // Invalid expressions report failure in-band, like the tool's
        // description promises.
        let result = (calculate.handler)(serde_json::json!({"expression": "nope"}))
            .await
            .unwrap();
        assert_eq!(result["success"], serde_json::json!(false));
    }

    #[tokio::test]
    async fn test_factorial_tool() {
        let addon = CalculatorAddon;
        let tools = addon.declared_tools();
        let factorial = tools.iter().find(|t| t.name == "factorial").unwrap();

        let result = (factorial.handler)(serde_json::json!({"number": 5})).await.unwrap();
        assert_eq!(result["result"], serde_json::json!(120));

        let err = (factorial.handler)(serde_json::json!({"number": 99})).await;
        assert!(err.is_err());
    }

    #[test]
    fn test_schema_names_required_field() {
        let addon = CalculatorAddon;
        let tools = addon.declared_tools();
        let schema = &tools[0].input_schema;
        assert!(schema["properties"]["expression"].is_object());
    }
}
