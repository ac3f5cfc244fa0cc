pub mod flow;
pub mod webhook;
