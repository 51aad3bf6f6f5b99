pub mod cli;
pub mod compiler;
pub mod document;
pub mod fill;
pub mod helpers;
pub mod lint;
pub mod resolver;
pub mod snapshot;
pub mod validator;
