pub mod analyzer;
pub mod change;
pub mod deobfuscate;
pub mod pipeline;
pub mod rolling;
pub mod signals;
pub mod snapshot;
pub mod threshold;
pub mod versions;
