// tfc — Task Flow Compiler
//
// Library root. Host front end (lexer, parser, ast, resolve) feeds the task
// discovery core (recognize, graph, registry, visitor); emit and dot
// serialize the result.

pub mod ast;
pub mod consteval;
pub mod diag;
pub mod dot;
pub mod emit;
pub mod graph;
pub mod id;
pub mod layout;
pub mod lexer;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod ports;
pub mod recognize;
pub mod registry;
pub mod resolve;
pub mod rewrite;
pub mod visitor;
