pub mod listen;
pub mod serve;
