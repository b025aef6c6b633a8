//! Context assembly and caching: the file state oracle contract, the
//! stable/dynamic splitter, and the process-wide prompt cache.

pub mod cache;
pub mod oracle;
pub mod prompt_cache;
