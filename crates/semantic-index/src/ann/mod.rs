#[cfg(test)]
pub(crate) mod flat;
pub mod hnsw;
