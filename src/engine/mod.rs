pub mod cleanup;
pub mod compiler;
pub mod executer;
pub mod sandbox;
