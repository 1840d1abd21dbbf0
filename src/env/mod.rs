use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{DataError, TrainingError};
use crate::expr::{action_to_token, ExpressionBuilder, Token, SIZE_ACTION};
use crate::pool::AlphaPool;

/// Longest token sequence an episode may write.
pub const MAX_EXPR_LENGTH: usize = 15;

/// Observation handed to agents: the tokens written so far and the legal actions.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaState {
    /// `MAX_EXPR_LENGTH` slots, each `action + 1`, or 0 when empty.
    pub tokens: Vec<usize>,
    pub mask: Vec<bool>,
}

impl AlphaState {
    pub fn legal_actions(&self) -> impl Iterator<Item = usize> + '_ {
        self.mask.iter().enumerate().filter(|(_, &ok)| ok).map(|(i, _)| i)
    }
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub state: AlphaState,
    pub reward: f32,
    pub done: bool,
}

/// Episodic environment in which each episode writes one expression and offers it
/// to the shared pool.
pub struct AlphaEnv {
    pool: Rc<RefCell<AlphaPool>>,
    builder: ExpressionBuilder,
    tokens: Vec<Token>,
    actions: Vec<usize>,
}

impl AlphaEnv {
    pub fn new(pool: Rc<RefCell<AlphaPool>>) -> Self {
        AlphaEnv {
            pool,
            builder: ExpressionBuilder::new(),
            tokens: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn pool(&self) -> &Rc<RefCell<AlphaPool>> {
        &self.pool
    }

    pub fn reset(&mut self) -> AlphaState {
        self.builder = ExpressionBuilder::new();
        self.tokens.clear();
        self.actions.clear();
        self.state()
    }

    pub fn state(&self) -> AlphaState {
        let mut tokens = vec![0; MAX_EXPR_LENGTH];
        for (slot, action) in tokens.iter_mut().zip(&self.actions) {
            *slot = action + 1;
        }
        AlphaState {
            tokens,
            mask: self.action_mask(),
        }
    }

    pub fn action_mask(&self) -> Vec<bool> {
        let mut mask: Vec<bool> = (0..SIZE_ACTION)
            .map(|a| action_to_token(a).is_some_and(|t| self.builder.validate(&t)))
            .collect();
        if !mask.iter().any(|&ok| ok) {
            // Nothing can extend the stack; SEP ends the episode with the invalid-expression penalty.
            mask[SIZE_ACTION - 1] = true;
        }
        mask
    }

    pub fn step(&mut self, action: usize) -> Result<StepResult, TrainingError> {
        let legal = self.action_mask();
        let token = match action_to_token(action) {
            Some(token) if legal[action] => token,
            _ => return Err(TrainingError::IllegalAction { action }),
        };

        let (reward, done) = if token == Token::Sep {
            (self.evaluate()?, true)
        } else {
            self.builder
                .add_token(token)
                .map_err(|_| TrainingError::IllegalAction { action })?;
            self.tokens.push(token);
            self.actions.push(action);
            if self.tokens.len() >= MAX_EXPR_LENGTH {
                (self.evaluate()?, true)
            } else {
                (0.0, false)
            }
        };

        Ok(StepResult {
            state: self.state(),
            reward: if reward.is_nan() { 0.0 } else { reward },
            done,
        })
    }

    /// Offer the finished expression to the pool. Invalid expressions score -1 and
    /// expressions that read outside the loaded data score 0.
    fn evaluate(&mut self) -> Result<f32, TrainingError> {
        let Ok(expr) = std::mem::take(&mut self.builder).into_expr() else {
            return Ok(-1.0);
        };
        tracing::trace!(%expr, "offering expression to pool");
        match self.pool.borrow_mut().try_new_expr(expr) {
            Ok(ic) => Ok(ic as f32),
            Err(DataError::OutOfRange { .. }) => Ok(0.0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{token_to_action, FeatureType, Operator};
    use crate::pool::testing::FixedCalculator;
    use crate::pool::{AlphaPoolConfig, PoolStateView};

    fn make_env() -> AlphaEnv {
        let calc = FixedCalculator {
            single: [("Abs($close)".to_string(), 0.2)].into_iter().collect(),
            mutual: 0.0,
        };
        let pool = AlphaPool::new(AlphaPoolConfig::new(5), Rc::new(calc));
        AlphaEnv::new(Rc::new(RefCell::new(pool)))
    }

    fn act(token: Token) -> usize {
        token_to_action(&token).unwrap()
    }

    #[test]
    fn test_initial_mask() {
        let mut env = make_env();
        let state = env.reset();
        assert_eq!(state.tokens, vec![0; MAX_EXPR_LENGTH]);
        assert!(state.mask[act(Token::Feature(FeatureType::Open))]);
        assert!(state.mask[act(Token::Constant(1.0))]);
        assert!(!state.mask[act(Token::Sep)]);
        assert!(!state.mask[act(Token::Operator(Operator::Add))]);
        assert!(!state.mask[act(Token::DeltaTime(10))]);
    }

    #[test]
    fn test_episode_offers_expression_to_pool() {
        let mut env = make_env();
        env.reset();
        let close = act(Token::Feature(FeatureType::Close));
        let step = env.step(close).unwrap();
        assert!(!step.done);
        assert_eq!(step.state.tokens[0], close + 1);
        env.step(act(Token::Operator(Operator::Abs))).unwrap();
        let last = env.step(act(Token::Sep)).unwrap();
        assert!(last.done);
        assert!((last.reward - 0.04).abs() < 1e-6);
        assert_eq!(env.pool().borrow().snapshot().size, 1);
    }

    #[test]
    fn test_illegal_action_is_an_error() {
        let mut env = make_env();
        env.reset();
        let err = env.step(act(Token::Sep)).unwrap_err();
        assert!(matches!(err, TrainingError::IllegalAction { .. }));
        assert!(env.step(SIZE_ACTION + 3).is_err());
    }

    #[test]
    fn test_max_length_without_valid_expression_is_penalised() {
        let mut env = make_env();
        env.reset();
        let open = act(Token::Feature(FeatureType::Open));
        let mut last = None;
        for _ in 0..MAX_EXPR_LENGTH {
            last = Some(env.step(open).unwrap());
        }
        let last = last.unwrap();
        assert!(last.done);
        assert_eq!(last.reward, -1.0);
        assert_eq!(env.pool().borrow().snapshot().evaluation_count, 0);
    }
}
