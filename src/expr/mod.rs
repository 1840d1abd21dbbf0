mod builder;
pub mod tokens;
mod tree;

pub use builder::ExpressionBuilder;
pub use tokens::{
    action_to_token, token_to_action, FeatureType, Operator, OperatorCategory, Token, SIZE_ACTION,
};
pub use tree::Expr;
