//! Catalog of functions the model may call.

pub mod call;
pub mod catalog;
pub mod indicators;
pub mod trading;

pub use call::{parse_function_call, FunctionCall};
pub use catalog::{
    FunctionArgs, FunctionDefinition, FunctionHandler, FunctionRegistry, ParamSchema, ParamType,
};
