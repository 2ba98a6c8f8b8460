pub mod crawler;

pub use crawler::{CrawlState, Crawler};

#[cfg(test)]
pub(crate) mod tests;
