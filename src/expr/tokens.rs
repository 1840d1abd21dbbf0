use std::fmt;

/// Raw market features available to expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureType {
    Open,
    Close,
    High,
    Low,
    Volume,
    Vwap,
}

impl FeatureType {
    pub const ALL: [FeatureType; 6] = [
        FeatureType::Open,
        FeatureType::Close,
        FeatureType::High,
        FeatureType::Low,
        FeatureType::Volume,
        FeatureType::Vwap,
    ];

    /// Position of this feature inside a [`crate::data::StockData`] panel.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            FeatureType::Open => "open",
            FeatureType::Close => "close",
            FeatureType::High => "high",
            FeatureType::Low => "low",
            FeatureType::Volume => "volume",
            FeatureType::Vwap => "vwap",
        }
    }
}

/// Arity class of an operator, used by the builder's validity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCategory {
    Unary,
    Binary,
    Rolling,
    PairRolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Abs,
    Log,
    Add,
    Sub,
    Mul,
    Div,
    Greater,
    Less,
    Ref,
    Mean,
    Sum,
    Std,
    Var,
    Max,
    Min,
    Delta,
    Cov,
    Corr,
}

impl Operator {
    pub const ALL: [Operator; 18] = [
        Operator::Abs,
        Operator::Log,
        Operator::Add,
        Operator::Sub,
        Operator::Mul,
        Operator::Div,
        Operator::Greater,
        Operator::Less,
        Operator::Ref,
        Operator::Mean,
        Operator::Sum,
        Operator::Std,
        Operator::Var,
        Operator::Max,
        Operator::Min,
        Operator::Delta,
        Operator::Cov,
        Operator::Corr,
    ];

    pub fn category(self) -> OperatorCategory {
        match self {
            Operator::Abs | Operator::Log => OperatorCategory::Unary,
            Operator::Add
            | Operator::Sub
            | Operator::Mul
            | Operator::Div
            | Operator::Greater
            | Operator::Less => OperatorCategory::Binary,
            Operator::Ref
            | Operator::Mean
            | Operator::Sum
            | Operator::Std
            | Operator::Var
            | Operator::Max
            | Operator::Min
            | Operator::Delta => OperatorCategory::Rolling,
            Operator::Cov | Operator::Corr => OperatorCategory::PairRolling,
        }
    }

    /// Number of stack items the operator consumes (window lengths included).
    pub fn arity(self) -> usize {
        match self.category() {
            OperatorCategory::Unary => 1,
            OperatorCategory::Binary | OperatorCategory::Rolling => 2,
            OperatorCategory::PairRolling => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Operator::Abs => "Abs",
            Operator::Log => "Log",
            Operator::Add => "Add",
            Operator::Sub => "Sub",
            Operator::Mul => "Mul",
            Operator::Div => "Div",
            Operator::Greater => "Greater",
            Operator::Less => "Less",
            Operator::Ref => "Ref",
            Operator::Mean => "Mean",
            Operator::Sum => "Sum",
            Operator::Std => "Std",
            Operator::Var => "Var",
            Operator::Max => "Max",
            Operator::Min => "Min",
            Operator::Delta => "Delta",
            Operator::Cov => "Cov",
            Operator::Corr => "Corr",
        }
    }
}

pub const CONSTANTS: [f32; 14] = [
    -30.0, -10.0, -5.0, -2.0, -1.0, -0.5, -0.01, 0.01, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0,
];

pub const DELTA_TIMES: [i32; 5] = [10, 20, 30, 40, 50];

/// One discrete choice the agent can make while writing an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    Operator(Operator),
    Feature(FeatureType),
    Constant(f32),
    DeltaTime(i32),
    Sep,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Operator(op) => write!(f, "{}", op.name()),
            Token::Feature(feature) => write!(f, "${}", feature.name()),
            Token::Constant(value) => write!(f, "{value:?}"),
            Token::DeltaTime(dt) => write!(f, "{dt}d"),
            Token::Sep => write!(f, "SEP"),
        }
    }
}

pub const SIZE_OP: usize = Operator::ALL.len();
pub const SIZE_FEATURE: usize = FeatureType::ALL.len();
pub const SIZE_CONSTANT: usize = CONSTANTS.len();
pub const SIZE_DELTA_TIME: usize = DELTA_TIMES.len();

pub const OFFSET_OP: usize = 0;
pub const OFFSET_FEATURE: usize = OFFSET_OP + SIZE_OP;
pub const OFFSET_CONSTANT: usize = OFFSET_FEATURE + SIZE_FEATURE;
pub const OFFSET_DELTA_TIME: usize = OFFSET_CONSTANT + SIZE_CONSTANT;
pub const OFFSET_SEP: usize = OFFSET_DELTA_TIME + SIZE_DELTA_TIME;

/// Total number of discrete actions.
pub const SIZE_ACTION: usize = OFFSET_SEP + 1;

/// Map an action index to its token. Indices past the action space yield `None`.
pub fn action_to_token(action: usize) -> Option<Token> {
    if action < OFFSET_FEATURE {
        Some(Token::Operator(Operator::ALL[action - OFFSET_OP]))
    } else if action < OFFSET_CONSTANT {
        Some(Token::Feature(FeatureType::ALL[action - OFFSET_FEATURE]))
    } else if action < OFFSET_DELTA_TIME {
        Some(Token::Constant(CONSTANTS[action - OFFSET_CONSTANT]))
    } else if action < OFFSET_SEP {
        Some(Token::DeltaTime(DELTA_TIMES[action - OFFSET_DELTA_TIME]))
    } else if action == OFFSET_SEP {
        Some(Token::Sep)
    } else {
        None
    }
}

/// Inverse of [`action_to_token`] for tokens that belong to the action space.
pub fn token_to_action(token: &Token) -> Option<usize> {
    match token {
        Token::Operator(op) => Operator::ALL.iter().position(|o| o == op).map(|i| OFFSET_OP + i),
        Token::Feature(feature) => FeatureType::ALL
            .iter()
            .position(|f| f == feature)
            .map(|i| OFFSET_FEATURE + i),
        Token::Constant(value) => CONSTANTS
            .iter()
            .position(|c| c == value)
            .map(|i| OFFSET_CONSTANT + i),
        Token::DeltaTime(dt) => DELTA_TIMES
            .iter()
            .position(|d| d == dt)
            .map(|i| OFFSET_DELTA_TIME + i),
        Token::Sep => Some(OFFSET_SEP),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_space_layout() {
        assert_eq!(SIZE_ACTION, 18 + 6 + 14 + 5 + 1);
        assert_eq!(action_to_token(OFFSET_SEP), Some(Token::Sep));
        assert_eq!(action_to_token(SIZE_ACTION), None);
        assert_eq!(
            action_to_token(OFFSET_FEATURE + 1),
            Some(Token::Feature(FeatureType::Close))
        );
    }

    #[test]
    fn test_every_action_maps_back_to_itself() {
        for action in 0..SIZE_ACTION {
            let token = action_to_token(action).unwrap();
            assert_eq!(token_to_action(&token), Some(action));
        }
    }

    #[test]
    fn test_operator_arity() {
        assert_eq!(Operator::Abs.arity(), 1);
        assert_eq!(Operator::Div.arity(), 2);
        assert_eq!(Operator::Mean.arity(), 2);
        assert_eq!(Operator::Corr.arity(), 3);
    }

    #[test]
    fn test_token_display() {
        assert_eq!(Token::Feature(FeatureType::Vwap).to_string(), "$vwap");
        assert_eq!(Token::DeltaTime(20).to_string(), "20d");
        assert_eq!(Token::Constant(0.5).to_string(), "0.5");
    }
}
