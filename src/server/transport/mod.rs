pub mod sse;
pub mod stdio;
