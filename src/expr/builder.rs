use crate::error::ExprError;
use crate::expr::tokens::{OperatorCategory, Token};
use crate::expr::tree::Expr;
use crate::expr::Operator;

#[derive(Debug, Clone)]
enum StackItem {
    Expr(Expr),
    DeltaTime(i32),
}

impl StackItem {
    fn is_featured(&self) -> bool {
        match self {
            StackItem::Expr(e) => e.is_featured(),
            StackItem::DeltaTime(_) => false,
        }
    }

    fn is_delta_time(&self) -> bool {
        matches!(self, StackItem::DeltaTime(_))
    }
}

/// Builds an [`Expr`] from tokens in reverse Polish order.
///
/// Every pushed token is checked against the current stack so the builder can
/// only ever hold prefixes of well-formed, data-dependent expressions.
#[derive(Debug, Clone, Default)]
pub struct ExpressionBuilder {
    stack: Vec<StackItem>,
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the stack holds exactly one expression that reads market data.
    pub fn is_valid(&self) -> bool {
        self.stack.len() == 1 && self.stack[0].is_featured()
    }

    pub fn validate(&self, token: &Token) -> bool {
        match token {
            Token::Operator(op) => self.validate_op(op.category()),
            Token::Feature(_) => !self.top(0).is_some_and(StackItem::is_delta_time),
            Token::Constant(_) => self.stack.is_empty() || self.top(0).is_some_and(StackItem::is_featured),
            Token::DeltaTime(_) => self.top(0).is_some_and(StackItem::is_featured),
            Token::Sep => self.is_valid(),
        }
    }

    /// Whether any operator of `category` could be applied to the current stack.
    pub fn validate_op(&self, category: OperatorCategory) -> bool {
        let featured = |depth| self.top(depth).is_some_and(StackItem::is_featured);
        let delta = |depth| self.top(depth).is_some_and(StackItem::is_delta_time);
        match category {
            OperatorCategory::Unary => featured(0),
            OperatorCategory::Binary => {
                self.stack.len() >= 2
                    && (featured(0) || featured(1))
                    && !delta(0)
                    && !delta(1)
            }
            OperatorCategory::Rolling => delta(0) && featured(1),
            OperatorCategory::PairRolling => delta(0) && featured(1) && featured(2),
        }
    }

    pub fn add_token(&mut self, token: Token) -> Result<(), ExprError> {
        if !self.validate(&token) {
            return Err(ExprError::InvalidToken(token.to_string()));
        }
        match token {
            Token::Operator(op) => {
                let item = self.apply(op)?;
                self.stack.push(StackItem::Expr(item));
            }
            Token::Feature(feature) => self.stack.push(StackItem::Expr(Expr::feature(feature))),
            Token::Constant(value) => self.stack.push(StackItem::Expr(Expr::constant(value))),
            Token::DeltaTime(dt) => self.stack.push(StackItem::DeltaTime(dt)),
            Token::Sep => {}
        }
        Ok(())
    }

    /// Consume the builder, returning the finished expression.
    pub fn into_expr(mut self) -> Result<Expr, ExprError> {
        if !self.is_valid() {
            return Err(ExprError::Incomplete(self.stack.len()));
        }
        match self.stack.pop() {
            Some(StackItem::Expr(e)) => Ok(e),
            _ => Err(ExprError::Incomplete(0)),
        }
    }

    fn top(&self, depth: usize) -> Option<&StackItem> {
        self.stack.len().checked_sub(depth + 1).map(|i| &self.stack[i])
    }

    fn pop_expr(&mut self, op: Operator) -> Result<Expr, ExprError> {
        match self.stack.pop() {
            Some(StackItem::Expr(e)) => Ok(e),
            _ => Err(ExprError::InvalidToken(op.name().to_string())),
        }
    }

    fn apply(&mut self, op: Operator) -> Result<Expr, ExprError> {
        match op.category() {
            OperatorCategory::Unary => Ok(Expr::unary(op, self.pop_expr(op)?)),
            OperatorCategory::Binary => {
                let rhs = self.pop_expr(op)?;
                let lhs = self.pop_expr(op)?;
                Ok(Expr::binary(op, lhs, rhs))
            }
            OperatorCategory::Rolling => {
                let window = self.pop_window(op)?;
                Ok(Expr::rolling(op, self.pop_expr(op)?, window))
            }
            OperatorCategory::PairRolling => {
                let window = self.pop_window(op)?;
                let rhs = self.pop_expr(op)?;
                let lhs = self.pop_expr(op)?;
                Ok(Expr::pair_rolling(op, lhs, rhs, window))
            }
        }
    }

    fn pop_window(&mut self, op: Operator) -> Result<i32, ExprError> {
        match self.stack.pop() {
            Some(StackItem::DeltaTime(dt)) => Ok(dt),
            _ => Err(ExprError::InvalidToken(op.name().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::FeatureType;

    fn build(tokens: &[Token]) -> Result<Expr, ExprError> {
        let mut builder = ExpressionBuilder::new();
        for t in tokens {
            builder.add_token(*t)?;
        }
        builder.into_expr()
    }

    #[test]
    fn test_builds_rolling_expression() {
        let e = build(&[
            Token::Feature(FeatureType::Close),
            Token::DeltaTime(20),
            Token::Operator(Operator::Mean),
        ])
        .unwrap();
        assert_eq!(e.to_string(), "Mean($close,20)");
    }

    #[test]
    fn test_binary_operand_order() {
        let e = build(&[
            Token::Feature(FeatureType::Open),
            Token::Constant(2.0),
            Token::Operator(Operator::Div),
        ])
        .unwrap();
        assert_eq!(e.to_string(), "Div($open,Constant(2.0))");
    }

    #[test]
    fn test_rejects_constant_only_operands() {
        let mut builder = ExpressionBuilder::new();
        builder.add_token(Token::Constant(1.0)).unwrap();
        // a constant may not follow a non-featured item
        assert!(!builder.validate(&Token::Constant(2.0)));
        assert!(!builder.validate(&Token::Operator(Operator::Abs)));
        assert!(!builder.is_valid());
    }

    #[test]
    fn test_delta_time_rules() {
        let mut builder = ExpressionBuilder::new();
        assert!(!builder.validate(&Token::DeltaTime(10)));
        builder.add_token(Token::Feature(FeatureType::High)).unwrap();
        builder.add_token(Token::DeltaTime(10)).unwrap();
        assert!(!builder.validate(&Token::Feature(FeatureType::Low)));
        assert!(!builder.validate_op(OperatorCategory::Binary));
        assert!(!builder.validate_op(OperatorCategory::Unary));
        assert!(builder.validate_op(OperatorCategory::Rolling));
        assert!(!builder.validate(&Token::Sep));
    }

    #[test]
    fn test_pair_rolling_needs_two_featured_operands() {
        let mut builder = ExpressionBuilder::new();
        builder.add_token(Token::Feature(FeatureType::High)).unwrap();
        builder.add_token(Token::Feature(FeatureType::Low)).unwrap();
        builder.add_token(Token::DeltaTime(30)).unwrap();
        assert!(builder.validate_op(OperatorCategory::PairRolling));
        builder.add_token(Token::Operator(Operator::Corr)).unwrap();
        assert!(builder.is_valid());
        assert_eq!(
            builder.into_expr().unwrap().to_string(),
            "Corr($high,$low,30)"
        );
    }

    #[test]
    fn test_incomplete_expression() {
        let err = build(&[
            Token::Feature(FeatureType::High),
            Token::Feature(FeatureType::Low),
        ])
        .unwrap_err();
        assert!(matches!(err, ExprError::Incomplete(2)));
    }
}
