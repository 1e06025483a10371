pub mod commands;
pub mod lexer;
pub mod name;
