pub mod environment;
pub mod partner;
