//! Catalog access for the session engine.
//!
//! The catalog is external: it owns the authored sheets (image pairs,
//! difficulty, difference sets). The engine only needs two questions
//! answered, captured by [`CatalogSource`]. [`InMemoryCatalog`] backs
//! tests and single-process embeddings.

use std::collections::HashMap;

use async_trait::async_trait;
use spotdiff_game::DifferenceGroup;
use thiserror::Error;

/// One authored game sheet: the image pair plus its difference set.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSheet {
    pub title: String,
    /// Asset references for the image pair, opaque to the engine.
    pub image_a: String,
    pub image_b: String,
    pub difficulty: u32,
    pub groups: Vec<DifferenceGroup>,
}

/// Catalog lookup failure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("unknown title: {0}")]
    UnknownTitle(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// External provider of authored sheets.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// The sheet authored under `title`.
    async fn sheet(&self, title: &str) -> Result<GameSheet, CatalogError>;

    /// All currently authored titles. Survival sessions snapshot this
    /// list into their deck at creation; later catalog changes do not
    /// affect running sessions.
    async fn titles(&self) -> Result<Vec<String>, CatalogError>;
}

/// A fixed catalog held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    sheets: HashMap<String, GameSheet>,
}

impl InMemoryCatalog {
    pub fn new(sheets: impl IntoIterator<Item = GameSheet>) -> Self {
        Self {
            sheets: sheets
                .into_iter()
                .map(|s| (s.title.clone(), s))
                .collect(),
        }
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalog {
    async fn sheet(&self, title: &str) -> Result<GameSheet, CatalogError> {
        self.sheets
            .get(title)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownTitle(title.to_string()))
    }

    async fn titles(&self) -> Result<Vec<String>, CatalogError> {
        let mut titles: Vec<String> = self.sheets.keys().cloned().collect();
        titles.sort();
        Ok(titles)
    }
}
